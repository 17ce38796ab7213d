//! Streamable HTTP transport: each message is a POST; replies arrive as a
//! JSON body or as a `text/event-stream` carrying the response event.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use super::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{McpError, Transport};

const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Header values often carry bearer tokens
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport for `url` sending `headers` on every request.
    pub fn new(url: impl Into<String>, headers: &[(String, String)]) -> Result<Self, McpError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| McpError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let mut value = HeaderValue::from_str(value.trim())
                .map_err(|e| McpError::Config(format!("invalid value for header '{}': {}", name, e)))?;
            value.set_sensitive(true);
            map.insert(name, value);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: map,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Connection(e.to_string()))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session.to_string());
        }

        let status = response.status();
        if status.is_server_error() {
            return Err(McpError::Connection(format!("server responded {}", status)));
        }
        if !status.is_success() {
            return Err(McpError::Protocol(format!("server responded {}", status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| McpError::Connection(e.to_string()))?;

        let reply = if is_stream {
            find_response(sse_data(&body), id)?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)
                .map_err(|e| McpError::Protocol(format!("invalid JSON-RPC response: {}", e)))?
        };

        match reply.error {
            Some(err) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }
}

/// Payloads of the `data:` fields of each event, multi-line data joined.
fn sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}

fn find_response(events: Vec<String>, id: u64) -> Result<JsonRpcResponse, McpError> {
    events
        .iter()
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
        .find(|r| r.numeric_id() == Some(id))
        .ok_or_else(|| McpError::Protocol(format!("no response for request {} in event stream", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_sse_data_extraction() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":3,\n\
                    data: \"result\":{\"ok\":true}}\n\n";
        let events = sse_data(body);
        assert_eq!(events.len(), 2);

        let reply = find_response(events, 3).unwrap();
        assert_eq!(reply.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_missing_stream_response() {
        let events = sse_data("data: {\"jsonrpc\":\"2.0\",\"id\":9,\"result\":{}}\n\n");
        assert!(matches!(find_response(events, 1), Err(McpError::Protocol(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = HttpTransport::new(
            "http://localhost",
            &[("bad header".to_string(), "x".to_string())],
        )
        .err()
        .unwrap();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn test_debug_hides_header_values() {
        let transport = HttpTransport::new(
            "http://localhost/mcp",
            &[("Authorization".to_string(), "Bearer secret-token".to_string())],
        )
        .unwrap();
        let debug = format!("{:?}", transport);
        assert!(debug.contains("authorization"));
        assert!(!debug.contains("secret-token"));
    }

    /// Serve one canned HTTP response and return the raw request.
    async fn serve_once(listener: TcpListener, response: String) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    #[tokio::test]
    async fn test_json_reply_and_session_capture() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());

        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: sess-42\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let server = tokio::spawn(serve_once(listener, response));

        let transport = HttpTransport::new(
            url,
            &[("X-Api-Token".to_string(), "t0k".to_string())],
        )
        .unwrap();
        let result = transport.request("initialize", None).await.unwrap();

        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(transport.session_id().as_deref(), Some("sess-42"));

        let raw_request = server.await.unwrap().to_ascii_lowercase();
        assert!(raw_request.contains("x-api-token: t0k"));
        assert!(raw_request.contains("text/event-stream"));
    }
}
