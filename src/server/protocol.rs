//! Wire framing and message shapes (§4.D, §6.1).
//!
//! Framing is newline-delimited JSON on both channels: one client write of a
//! single JSON object, terminated by `\n`, produces exactly one dispatch;
//! one response object, terminated by `\n`, is written back. This resolves
//! the open framing question in SPEC_FULL.md §9 in the "adopt explicit
//! framing" direction while preserving the source's one-write/one-dispatch
//! contract.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Reads one newline-delimited JSON request from `reader`. Returns `Ok(None)`
/// on clean EOF (§4.D connection lifecycle: closed on EOF).
pub async fn read_request<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

pub fn parse_request(line: &str) -> Result<Request, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Writes a single response object followed by a newline (one send per
/// response, §4.D).
pub async fn write_response<W>(writer: &mut W, mut response: Value, id: Option<Value>) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if let Some(id) = id {
        if let Value::Object(map) = &mut response {
            map.insert("id".to_string(), id);
        }
    }
    let mut line = serde_json::to_vec(&response).unwrap_or_default();
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

pub fn error_response(message: impl Into<String>) -> Value {
    serde_json::json!({ "status": "error", "message": message.into() })
}

pub fn unknown_command_response(command: &str) -> Value {
    error_response(format!("Unknown command: {command}"))
}

pub fn invalid_format_response() -> Value {
    error_response("Invalid request format")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_request() {
        let req = parse_request(r#"{"command":"get_ports"}"#).unwrap();
        assert_eq!(req.command, "get_ports");
        assert!(req.params.is_null());
    }

    #[test]
    fn parses_request_with_params_and_id() {
        let req =
            parse_request(r#"{"command":"login","params":{"username":"a"},"id":"42"}"#).unwrap();
        assert_eq!(req.command, "login");
        assert_eq!(req.params["username"], "a");
        assert_eq!(req.id, Some(Value::String("42".to_string())));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_request("not json").is_err());
    }
}
