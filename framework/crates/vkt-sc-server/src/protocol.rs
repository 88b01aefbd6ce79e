//! 子进程与 vksc-server 之间的消息
//!
//! 每条消息是 4 字节小端长度，后面跟着 JSON 文本。一次连接上可以依次发送多个请求，每个请求对应一个响应。

use std::io::{ErrorKind, Read, Write};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use vkt_gfx::error::{VktError, VktResult};

pub use vkt_gfx::resource_interface::{CreateCacheRequest, CreateCacheResponse};

/// 单条消息的上限
pub const MAX_MESSAGE_SIZE: usize = 512 << 20;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileShaderRequest {
    pub source: String,
    /// glslc 的 stage 名：vert、frag、comp …
    pub source_type: String,
    pub build_options: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileShaderResponse {
    pub status: bool,
    pub binary: Vec<u8>,
    pub log: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Request {
    CompileShader(CompileShaderRequest),
    CreateCache(CreateCacheRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Response {
    CompileShader(CompileShaderResponse),
    CreateCache(CreateCacheResponse),
    /// 服务端无法处理请求
    Error(String),
}

fn io_error(what: &str, e: std::io::Error) -> VktError {
    VktError::Resource(format!("{what}: {e}"))
}

pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> VktResult<()> {
    let body =
        serde_json::to_vec(message).map_err(|e| VktError::internal(format!("failed to serialize message: {e}")))?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(VktError::Resource(format!("message of {} bytes is too large", body.len())));
    }

    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes()).map_err(|e| io_error("failed to write message length", e))?;
    writer.write_all(&body).map_err(|e| io_error("failed to write message body", e))?;
    writer.flush().map_err(|e| io_error("failed to flush message", e))
}

/// 对端正常关闭连接时返回 `Ok(None)`
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> VktResult<Option<T>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error("failed to read message length", e)),
    }

    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(VktError::Resource(format!("message of {len} bytes is too large")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| io_error("failed to read message body", e))?;
    let message =
        serde_json::from_slice(&body).map_err(|e| VktError::internal(format!("malformed message: {e}")))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_framing() {
        let request = Request::CompileShader(CompileShaderRequest {
            source: "void main() {}".to_string(),
            source_type: "comp".to_string(),
            build_options: String::new(),
        });

        let mut buf = vec![];
        write_message(&mut buf, &request).unwrap();
        let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(body_len, buf.len() - 4);
        assert!(std::str::from_utf8(&buf[4..]).unwrap().contains("\"type\":\"CompileShader\""));

        let mut cursor = Cursor::new(buf);
        let read: Request = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(read, request);
        // 流结束
        assert!(read_message::<_, Request>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_several_messages_on_one_stream() {
        let mut buf = vec![];
        write_message(&mut buf, &Response::Error("first".to_string())).unwrap();
        write_message(&mut buf, &Response::CreateCache(CreateCacheResponse::default())).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_message::<_, Response>(&mut cursor).unwrap(), Some(Response::Error("first".to_string())));
        assert!(matches!(read_message::<_, Response>(&mut cursor).unwrap(), Some(Response::CreateCache(_))));
    }

    #[test]
    fn test_truncated_body_is_resource_error() {
        let mut buf = 100u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let err = read_message::<_, Request>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.is_resource_error());
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        assert!(read_message::<_, Request>(&mut Cursor::new(buf)).unwrap_err().is_resource_error());
    }

    #[test]
    fn test_garbage_body_is_internal() {
        let mut buf = 3u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"???");
        assert!(matches!(read_message::<_, Request>(&mut Cursor::new(buf)), Err(VktError::Internal(_))));
    }
}
