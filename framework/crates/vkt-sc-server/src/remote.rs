//! 通过 vksc-server 构建 pipeline cache 与编译 shader

use std::net::TcpStream;

use vkt_gfx::{
    error::{VktError, VktResult},
    resource_interface::{CacheBuilder, CreateCacheRequest, CreateCacheResponse, ProgramCompiler},
};

use crate::protocol::{CompileShaderRequest, Request, Response, read_message, write_message};

/// 每个请求使用一次新的连接
fn round_trip(address: &str, request: &Request) -> VktResult<Response> {
    let mut stream = TcpStream::connect(address)
        .map_err(|e| VktError::Resource(format!("failed to connect to vksc server {address}: {e}")))?;
    write_message(&mut stream, request)?;
    match read_message::<_, Response>(&mut stream)? {
        Some(Response::Error(msg)) => Err(VktError::internal(format!("vksc server: {msg}"))),
        Some(response) => Ok(response),
        None => Err(VktError::internal(format!("vksc server {address} closed the connection without a response"))),
    }
}

pub struct RemoteCacheBuilder {
    address: String,
}

impl RemoteCacheBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl CacheBuilder for RemoteCacheBuilder {
    fn create_pipeline_cache(&self, request: &CreateCacheRequest) -> VktResult<CreateCacheResponse> {
        log::info!("requesting pipeline cache from {}", self.address);
        match round_trip(&self.address, &Request::CreateCache(request.clone()))? {
            Response::CreateCache(response) => Ok(response),
            other => Err(VktError::internal(format!("unexpected response to CreateCache: {other:?}"))),
        }
    }
}

pub struct RemoteCompiler {
    address: String,
}

impl RemoteCompiler {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl ProgramCompiler for RemoteCompiler {
    fn compile(&self, source: &str, source_type: &str, build_options: &str) -> VktResult<Vec<u8>> {
        let request = Request::CompileShader(CompileShaderRequest {
            source: source.to_string(),
            source_type: source_type.to_string(),
            build_options: build_options.to_string(),
        });
        match round_trip(&self.address, &request)? {
            Response::CompileShader(response) if response.status => Ok(response.binary),
            Response::CompileShader(response) => {
                Err(VktError::test_failed(format!("shader compilation failed: {}", response.log)))
            }
            other => Err(VktError::internal(format!("unexpected response to CompileShader: {other:?}"))),
        }
    }
}
