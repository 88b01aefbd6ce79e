//! vksc-server 的服务循环
//!
//! device 只能在创建它的线程上使用，所以连接按顺序在同一个线程上处理。

use std::net::{SocketAddr, TcpListener, TcpStream};

use vkt_gfx::{
    error::{VktError, VktResult},
    resource_interface::{CacheBuilder, ProgramCompiler},
};

use crate::{
    cache_builder::LocalCacheBuilder,
    protocol::{CompileShaderResponse, Request, Response, read_message, write_message},
};

pub struct Server {
    listener: TcpListener,
    builder: LocalCacheBuilder,
    compiler: Option<Box<dyn ProgramCompiler>>,
}

impl Server {
    pub fn bind(address: &str, builder: LocalCacheBuilder) -> VktResult<Self> {
        let listener = TcpListener::bind(address)
            .map_err(|e| VktError::Resource(format!("failed to listen on {address}: {e}")))?;
        Ok(Self {
            listener,
            builder,
            compiler: None,
        })
    }

    pub fn with_compiler(mut self, compiler: Box<dyn ProgramCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn local_addr(&self) -> VktResult<SocketAddr> {
        self.listener.local_addr().map_err(|e| VktError::Resource(format!("failed to query listen address: {e}")))
    }

    /// 一直服务下去
    pub fn run(&self) -> VktResult<()> {
        self.serve(None)
    }

    /// 处理 `limit` 个连接后返回，`None` 表示不限
    ///
    /// 单个连接上的错误只记录日志，不会终止服务。
    pub fn serve(&self, limit: Option<usize>) -> VktResult<()> {
        log::info!("vksc server listening on {}", self.local_addr()?);
        for (index, stream) in self.listener.incoming().enumerate() {
            let stream = stream.map_err(|e| VktError::Resource(format!("failed to accept connection: {e}")))?;
            if let Err(e) = self.serve_connection(stream) {
                log::error!("connection {index} failed: {e}");
            }
            if limit.is_some_and(|limit| index + 1 >= limit) {
                break;
            }
        }
        Ok(())
    }

    /// 依次处理连接上的请求，直到对端关闭
    pub fn serve_connection(&self, mut stream: TcpStream) -> VktResult<()> {
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        log::debug!("connection from {peer}");
        while let Some(request) = read_message::<_, Request>(&mut stream)? {
            let response = self.handle(request);
            write_message(&mut stream, &response)?;
        }
        log::debug!("{peer} disconnected");
        Ok(())
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateCache(request) => match self.builder.create_pipeline_cache(&request) {
                Ok(response) => Response::CreateCache(response),
                Err(e) => {
                    log::error!("pipeline cache build failed: {e}");
                    Response::Error(e.to_string())
                }
            },
            Request::CompileShader(request) => {
                let Some(compiler) = self.compiler.as_ref() else {
                    return Response::Error("no shader compiler configured".to_string());
                };
                match compiler.compile(&request.source, &request.source_type, &request.build_options) {
                    Ok(binary) => Response::CompileShader(CompileShaderResponse {
                        status: true,
                        binary,
                        log: String::new(),
                    }),
                    Err(e) => Response::CompileShader(CompileShaderResponse {
                        status: false,
                        binary: vec![],
                        log: e.to_string(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread};

    use ash::vk;
    use vkt_gfx::{
        mock::{MockDriverConfig, MockPlatform},
        resource_interface::CreateCacheRequest,
        resource_json::{ComputePipelineDesc, PipelineDesc, PipelineEntry, PipelineIdentifier, ShaderStageDesc},
    };

    use super::*;
    use crate::remote::{RemoteCacheBuilder, RemoteCompiler};

    struct EchoCompiler;

    impl ProgramCompiler for EchoCompiler {
        fn compile(&self, source: &str, _source_type: &str, _build_options: &str) -> VktResult<Vec<u8>> {
            if source.is_empty() {
                return Err(VktError::test_failed("empty source"));
            }
            Ok(source.as_bytes().to_vec())
        }
    }

    /// 在独立线程上启动服务，处理 `connections` 个连接后退出
    fn spawn_server(connections: usize, with_compiler: bool) -> (String, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let platform = MockPlatform::new(MockDriverConfig::default());
            let builder = LocalCacheBuilder::new(platform.create_test_device());
            let mut server = Server::bind("127.0.0.1:0", builder).unwrap();
            if with_compiler {
                server = server.with_compiler(Box::new(EchoCompiler));
            }
            tx.send(server.local_addr().unwrap().to_string()).unwrap();
            server.serve(Some(connections)).unwrap();
        });
        (rx.recv().unwrap(), handle)
    }

    #[test]
    fn test_remote_cache_build() {
        let (address, handle) = spawn_server(2, false);
        let remote = RemoteCacheBuilder::new(address);

        let response = remote.create_pipeline_cache(&CreateCacheRequest::default()).unwrap();
        assert!(response.status);
        assert!(response.binary.is_empty());

        // 引用了不存在的 pipeline layout
        let mut request = CreateCacheRequest::default();
        request.input.pipelines.push(PipelineEntry {
            identifier: PipelineIdentifier::new("dEQP-VK.remote", "{}"),
            desc: PipelineDesc::Compute(ComputePipelineDesc {
                flags: 0,
                stage: ShaderStageDesc {
                    flags: 0,
                    stage: vk::ShaderStageFlags::COMPUTE.as_raw(),
                    module: 0,
                    name: "main".to_string(),
                    specialization: None,
                },
                layout: 0x300,
            }),
        });
        let err = remote.create_pipeline_cache(&request).unwrap_err();
        assert!(matches!(err, VktError::Internal(_)));
        assert!(err.message().contains("unknown pipeline layout"));

        handle.join().unwrap();
    }

    #[test]
    fn test_remote_compile() {
        let (address, handle) = spawn_server(2, true);
        let remote = RemoteCompiler::new(address);

        assert_eq!(remote.compile("abcd", "comp", "").unwrap(), b"abcd".to_vec());
        assert!(matches!(remote.compile("", "comp", ""), Err(VktError::TestFailed(_))));

        handle.join().unwrap();
    }

    #[test]
    fn test_compile_without_compiler_is_internal() {
        let (address, handle) = spawn_server(1, false);
        let err = RemoteCompiler::new(address).compile("abcd", "comp", "").unwrap_err();
        assert!(matches!(err, VktError::Internal(_)));
        handle.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_resource_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = RemoteCacheBuilder::new(address).create_pipeline_cache(&CreateCacheRequest::default()).unwrap_err();
        assert!(err.is_resource_error());
    }
}
