//! Stdio transport: the server runs as a child process and exchanges
//! newline-delimited JSON-RPC messages over stdin/stdout.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{McpError, Transport};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// JSON-RPC over a child process's stdio.
///
/// The child is killed when the transport is dropped.
pub struct StdioTransport {
    writer: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    _child: Child,
}

impl StdioTransport {
    /// Spawn `command` with `args` and extra environment variables.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connection(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("child stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{}", line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(stdout, pending.clone(), closed.clone()));

        tracing::debug!(command, "spawned stdio tool server");

        Ok(Self {
            writer: tokio::sync::Mutex::new(stdin),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader,
            _child: child,
        })
    }

    async fn send_line(&self, message: &impl serde::Serialize) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| McpError::Protocol(format!("failed to encode request: {}", e)))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| McpError::Connection(format!("write to server failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Connection(format!("flush to server failed: {}", e)))
    }
}

/// Route responses to waiting requests until stdout closes.
async fn read_loop(stdout: ChildStdout, pending: Pending, closed: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response: JsonRpcResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring non-JSON line from server");
                        continue;
                    }
                };
                // Server-initiated requests and notifications carry no id of ours
                let Some(id) = response.numeric_id() else {
                    continue;
                };
                if let Some(tx) = pending.lock().remove(&id) {
                    let _ = tx.send(response);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading from tool server");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request
    pending.lock().clear();
}

/// Removes a request's slot from the pending map when the request ends,
/// including when its future is dropped mid-flight.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Connection("tool server exited".to_string()));
        }

        self.send_line(&JsonRpcRequest::new(id, method, params)).await?;

        let response = rx
            .await
            .map_err(|_| McpError::Connection("tool server closed the connection".to_string()))?;

        match response.error {
            Some(err) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send_line(&JsonRpcNotification::new(method, params)).await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_routed_by_id() {
        // `cat` echoes each request back; the echo carries our id and no result
        let transport = StdioTransport::spawn("cat", &[], &[]).unwrap();
        let value = transport.request("ping", None).await.unwrap();
        assert_eq!(value, Value::Null);

        let value = transport.request("ping", None).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_exited_server_is_connection_error() {
        let transport = StdioTransport::spawn("true", &[], &[]).unwrap();
        let err = transport.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let err = StdioTransport::spawn("verity-no-such-server-binary", &[], &[])
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Connection(_)));
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let script = r#"read line; echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such method"}}'; sleep 1"#;
        let transport =
            StdioTransport::spawn("sh", &["-c".to_string(), script.to_string()], &[]).unwrap();
        let err = transport.request("bogus", None).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_abandoned_request_frees_its_slot() {
        // Reads every request and never answers
        let transport = StdioTransport::spawn(
            "sh",
            &["-c".to_string(), "cat > /dev/null".to_string()],
            &[],
        )
        .unwrap();

        for _ in 0..3 {
            let timed_out = tokio::time::timeout(
                std::time::Duration::from_millis(50),
                transport.request("tools/call", None),
            )
            .await;
            assert!(timed_out.is_err());
        }

        assert!(transport.pending.lock().is_empty());
    }
}
