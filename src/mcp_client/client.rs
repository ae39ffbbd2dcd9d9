//! JSON-RPC client over a child process's stdio.
//!
//! One reader task per connection drives a [`MessageFramer`] and dispatches
//! each frame synchronously:
//! - responses settle the matching pending request (matched by id, not order)
//! - notifications fan out to subscribers through a broadcast channel
//! - server-initiated requests get a `Method not found` reply
//!
//! When the stream ends or errors, every pending request is rejected with
//! [`McpError::ConnectionClosed`] and the client stays disconnected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::framer::MessageFramer;
use super::types::{
    decode_message, IncomingMessage, JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest,
    ServerNotification,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Buffered notifications per subscriber before the oldest are dropped.
const NOTIFICATION_CAPACITY: usize = 64;

/// Read size for the stdout loop.
const READ_CHUNK: usize = 8 * 1024;

/// Longest frame excerpt included in a malformed-frame warning.
const FRAME_EXCERPT_LEN: usize = 200;

type Outcome = Result<Value, McpError>;
type SharedWriter = Arc<Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>>;

// ─── Pending Requests ────────────────────────────────────────────────────────

/// A request waiting for its response. Settling consumes it.
struct PendingRequest {
    method: String,
    responder: oneshot::Sender<Outcome>,
}

impl PendingRequest {
    fn settle(self, outcome: Outcome) {
        // The caller may already be gone (timed out); nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

#[derive(Default)]
struct PendingState {
    slots: HashMap<u64, PendingRequest>,
    closed: Option<String>,
}

/// Pending-request table keyed by id. A slot is removed by exactly one of:
/// matching response, timeout, or close.
struct PendingRequests {
    server: String,
    state: StdMutex<PendingState>,
}

impl PendingRequests {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            state: StdMutex::new(PendingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, id: u64, method: &str) -> Result<oneshot::Receiver<Outcome>, McpError> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(McpError::ConnectionClosed {
                server: self.server.clone(),
                reason: reason.clone(),
            });
        }
        let (responder, receiver) = oneshot::channel();
        state.slots.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                responder,
            },
        );
        Ok(receiver)
    }

    fn take(&self, id: u64) -> Option<PendingRequest> {
        self.lock().slots.remove(&id)
    }

    /// Mark closed and reject everything outstanding. Returns the number rejected.
    fn close(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.slots.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(server = %self.server, id, method = %pending.method, "rejecting pending request");
            pending.settle(Err(McpError::ConnectionClosed {
                server: self.server.clone(),
                reason: reason.to_string(),
            }));
        }
        count
    }

    fn len(&self) -> usize {
        self.lock().slots.len()
    }
}

// ─── JsonRpcClient ───────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC client. Ids are per-client and monotonically increasing.
pub struct JsonRpcClient {
    server: String,
    writer: SharedWriter,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    notifications: broadcast::Sender<ServerNotification>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl JsonRpcClient {
    /// Wrap a readable/writable stream pair and start the reader task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(server: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Some(Box::new(writer))));
        let pending = Arc::new(PendingRequests::new(server));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let dispatcher = Dispatcher {
            server: server.to_string(),
            writer: writer.clone(),
            pending: pending.clone(),
            notifications: notifications.clone(),
            connected: connected.clone(),
        };
        let reader = tokio::spawn(read_loop(reader, dispatcher));

        Self {
            server: server.to_string(),
            writer,
            pending,
            next_id: AtomicU64::new(1),
            notifications,
            connected,
            reader,
        }
    }

    /// Send a request and wait for its response, a timeout, or connection close.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(self.closed_error("client is disconnected"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut receiver = self.pending.register(id, method)?;

        let request = JsonRpcRequest::new(id, method, params);
        let deadline = tokio::time::Instant::now() + timeout;

        // The write shares the deadline: a server that stops reading stdin
        // can block it indefinitely once the pipe fills.
        match tokio::time::timeout_at(deadline, self.write_message(&request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pending.take(id);
                return Err(e);
            }
            Err(_) => {
                self.pending.take(id);
                // A partially written line leaves the stream unframed.
                self.connected.store(false, Ordering::Release);
                tracing::warn!(
                    server = %self.server,
                    id,
                    method,
                    "request write timed out, connection marked unusable"
                );
                return Err(timeout_error(method, id, timeout));
            }
        }

        match tokio::time::timeout_at(deadline, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self.closed_error("request dropped without a response")),
            Err(_) => {
                if self.pending.take(id).is_none() {
                    // Settled between the deadline and the take: honour that outcome.
                    if let Ok(outcome) = receiver.try_recv() {
                        return outcome;
                    }
                }
                tracing::warn!(
                    server = %self.server,
                    id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(timeout_error(method, id, timeout))
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(self.closed_error("client is disconnected"));
        }
        self.write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Subscribe to server notifications received after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Whether the connection can still carry requests.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the connection: stop reading, drop stdin, reject every pending request.
    ///
    /// Returns the number of requests rejected. Calling it again is a no-op.
    pub async fn close(&self, reason: &str) -> usize {
        self.connected.store(false, Ordering::Release);
        self.reader.abort();
        let rejected = self.pending.close(reason);

        // A write stuck on a full pipe holds the lock; it fails once the
        // process is killed, and the stream is dropped with the client.
        match self.writer.try_lock() {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => tracing::debug!(server = %self.server, "stdin busy, left to close on kill"),
        }
        rejected
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let line = encode_line(&self.server, message)?;
        write_line(&self.server, &self.writer, &line).await
    }

    fn closed_error(&self, reason: &str) -> McpError {
        McpError::ConnectionClosed {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ─── Reader Loop ─────────────────────────────────────────────────────────────

/// State the reader task needs to route frames.
struct Dispatcher {
    server: String,
    writer: SharedWriter,
    pending: Arc<PendingRequests>,
    notifications: broadcast::Sender<ServerNotification>,
    connected: Arc<AtomicBool>,
}

impl Dispatcher {
    fn dispatch(&self, frame: &str) {
        match decode_message(frame) {
            Ok(IncomingMessage::Response(response)) => match self.pending.take(response.id) {
                Some(pending) => pending.settle(response.into_result()),
                None => tracing::debug!(
                    server = %self.server,
                    id = response.id,
                    "discarding response with no pending request"
                ),
            },
            Ok(IncomingMessage::Notification { method, params }) => {
                match ServerNotification::from_method(&method, &params) {
                    // No subscribers is fine.
                    Some(notification) => {
                        let _ = self.notifications.send(notification);
                    }
                    None => tracing::debug!(
                        server = %self.server,
                        method = %method,
                        "ignoring unsupported notification"
                    ),
                }
            }
            Ok(IncomingMessage::Request { id, method }) => {
                tracing::debug!(server = %self.server, method = %method, "rejecting server-initiated request");
                let reply = JsonRpcErrorReply::method_not_found(id, &method);
                let server = self.server.clone();
                let writer = self.writer.clone();
                // Replies go out on their own task so a blocked stdin never stalls reading.
                tokio::spawn(async move {
                    let result = match encode_line(&server, &reply) {
                        Ok(line) => write_line(&server, &writer, &line).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        tracing::debug!(server = %server, error = %e, "failed to reply to server request");
                    }
                });
            }
            Err(e) => tracing::warn!(
                server = %self.server,
                error = %e,
                frame = %excerpt(frame),
                "discarding malformed frame"
            ),
        }
    }

    fn shutdown(&self, reason: &str) {
        self.connected.store(false, Ordering::Release);
        let rejected = self.pending.close(reason);
        tracing::debug!(server = %self.server, rejected, reason, "connection closed");
    }
}

async fn read_loop<R>(mut reader: R, dispatcher: Dispatcher)
where
    R: AsyncRead + Unpin,
{
    let mut framer = MessageFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    let reason = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break "server stdout closed (process may have exited)".to_string(),
            Ok(n) => {
                for frame in framer.feed(&buf[..n]) {
                    dispatcher.dispatch(&frame);
                }
            }
            Err(e) => break format!("failed to read from stdout: {e}"),
        }
    };

    if let Some(rest) = framer.finish() {
        dispatcher.dispatch(&rest);
    }
    dispatcher.shutdown(&reason);
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn encode_line<T: Serialize>(server: &str, message: &T) -> Result<String, McpError> {
    let mut json = serde_json::to_string(message).map_err(|e| McpError::TransportError {
        server: server.to_string(),
        reason: format!("failed to serialize message: {e}"),
    })?;
    json.push('\n');
    Ok(json)
}

async fn write_line(server: &str, writer: &SharedWriter, line: &str) -> Result<(), McpError> {
    let mut guard = writer.lock().await;
    let stream = guard.as_mut().ok_or(McpError::ConnectionClosed {
        server: server.to_string(),
        reason: "stdin already closed".into(),
    })?;

    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("failed to write to stdin: {e}"),
        })?;
    stream.flush().await.map_err(|e| McpError::TransportError {
        server: server.to_string(),
        reason: format!("failed to flush stdin: {e}"),
    })
}

fn timeout_error(method: &str, id: u64, timeout: Duration) -> McpError {
    McpError::RequestTimeout {
        method: method.to_string(),
        id,
        timeout_ms: timeout.as_millis() as u64,
    }
}

fn excerpt(frame: &str) -> &str {
    match frame.char_indices().nth(FRAME_EXCERPT_LEN) {
        Some((idx, _)) => &frame[..idx],
        None => frame,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    /// The server half of an in-memory connection.
    struct FakeServer {
        requests: Lines<BufReader<DuplexStream>>,
        out: DuplexStream,
    }

    impl FakeServer {
        async fn next_message(&mut self) -> Value {
            let line = self
                .requests
                .next_line()
                .await
                .unwrap()
                .expect("client closed its stdin");
            serde_json::from_str(&line).unwrap()
        }

        async fn send_raw(&mut self, line: &str) {
            self.out.write_all(line.as_bytes()).await.unwrap();
            self.out.write_all(b"\n").await.unwrap();
            self.out.flush().await.unwrap();
        }

        async fn respond(&mut self, id: &Value, result: Value) {
            let msg = json!({"jsonrpc": "2.0", "id": id, "result": result});
            self.send_raw(&msg.to_string()).await;
        }
    }

    fn connect() -> (Arc<JsonRpcClient>, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let client = JsonRpcClient::new("fake", client_in, client_out);
        let server = FakeServer {
            requests: BufReader::new(server_in).lines(),
            out: server_out,
        };
        (Arc::new(client), server)
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (client, mut server) = connect();

        let mut handles = Vec::new();
        for method in ["a", "b", "c"] {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.send_request(method, None, LONG).await
            }));
        }

        let mut ids: HashMap<String, Value> = HashMap::new();
        for _ in 0..3 {
            let msg = server.next_message().await;
            ids.insert(msg["method"].as_str().unwrap().to_string(), msg["id"].clone());
        }

        for method in ["c", "a", "b"] {
            server.respond(&ids[method], json!({ "echo": method })).await;
        }

        for (handle, method) in handles.into_iter().zip(["a", "b", "c"]) {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result["echo"], method);
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_per_client() {
        let (client, mut server) = connect();
        let c = client.clone();
        let first = tokio::spawn(async move { c.send_request("one", None, LONG).await });
        let msg1 = server.next_message().await;
        server.respond(&msg1["id"], json!(1)).await;
        first.await.unwrap().unwrap();

        let c = client.clone();
        let second = tokio::spawn(async move { c.send_request("two", None, LONG).await });
        let msg2 = server.next_message().await;
        server.respond(&msg2["id"], json!(2)).await;
        second.await.unwrap().unwrap();

        assert!(msg2["id"].as_u64().unwrap() > msg1["id"].as_u64().unwrap());
    }

    #[tokio::test]
    async fn test_timeout_settles_once_and_late_response_is_ignored() {
        let (client, mut server) = connect();

        let err = client
            .send_request("slow", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::RequestTimeout { ref method, .. } if method == "slow"));
        assert_eq!(client.pending_count(), 0);

        let late = server.next_message().await;
        server.respond(&late["id"], json!("too late")).await;

        // The connection survives and later requests still work.
        let c = client.clone();
        let next = tokio::spawn(async move { c.send_request("fast", None, LONG).await });
        let msg = server.next_message().await;
        assert_eq!(msg["method"], "fast");
        server.respond(&msg["id"], json!("ok")).await;
        assert_eq!(next.await.unwrap().unwrap(), json!("ok"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_error_object_rejects_request() {
        let (client, mut server) = connect();
        let c = client.clone();
        let pending = tokio::spawn(async move { c.send_request("tools/call", None, LONG).await });

        let msg = server.next_message().await;
        let reply = json!({
            "jsonrpc": "2.0",
            "id": msg["id"],
            "error": {"code": -32602, "message": "bad params"}
        });
        server.send_raw(&reply.to_string()).await;

        let err = pending.await.unwrap().unwrap_err();
        match err {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (client, mut server) = connect();
        let c = client.clone();
        let pending = tokio::spawn(async move { c.send_request("ping", None, LONG).await });

        let msg = server.next_message().await;
        server.send_raw("this is not json").await;
        server.send_raw("{\"jsonrpc\":\"2.0\"}").await;
        server.respond(&msg["id"], json!({})).await;

        assert_eq!(pending.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_stream_close_rejects_all_pending() {
        let (client, mut server) = connect();

        let mut handles = Vec::new();
        for method in ["x", "y"] {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.send_request(method, None, LONG).await
            }));
        }
        server.next_message().await;
        server.next_message().await;
        drop(server);

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, McpError::ConnectionClosed { .. }));
        }
        assert!(!client.is_connected());

        let err = client.send_request("after", None, LONG).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_CLOSED");
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_is_idempotent() {
        let (client, mut server) = connect();
        let c = client.clone();
        let pending = tokio::spawn(async move { c.send_request("hang", None, LONG).await });
        server.next_message().await;

        assert_eq!(client.close("cleanup").await, 1);
        assert_eq!(client.close("cleanup").await, 0);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed { ref reason, .. } if reason == "cleanup"));
        assert!(client.send_notification("late", None).await.is_err());
    }

    /// A client whose peer never reads: large writes fill the pipe and block.
    fn stalled() -> (Arc<JsonRpcClient>, DuplexStream, DuplexStream) {
        let (client_out, server_in) = tokio::io::duplex(16);
        let (server_out, client_in) = tokio::io::duplex(16);
        let client = JsonRpcClient::new("stalled", client_in, client_out);
        (Arc::new(client), server_in, server_out)
    }

    #[tokio::test]
    async fn test_stalled_write_is_bounded_by_request_timeout() {
        let (client, _server_in, _server_out) = stalled();

        let params = json!({ "files": "x".repeat(4096) });
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            client.send_request("tools/call", Some(params), Duration::from_millis(50)),
        )
        .await
        .expect("write should give up at the request deadline")
        .unwrap_err();
        assert!(matches!(err, McpError::RequestTimeout { ref method, .. } if method == "tools/call"));
        assert!(!client.is_connected());
        assert_eq!(client.close("shutdown").await, 0);
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_blocked_write() {
        let (client, _server_in, _server_out) = stalled();

        let c = client.clone();
        let params = json!({ "files": "x".repeat(4096) });
        let blocked =
            tokio::spawn(async move { c.send_request("tools/call", Some(params), LONG).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rejected = tokio::time::timeout(Duration::from_secs(2), client.close("shutdown"))
            .await
            .expect("close should return while stdin is held");
        assert_eq!(rejected, 1);
        assert!(!client.is_connected());
        blocked.abort();
    }

    #[tokio::test]
    async fn test_notifications_delivered_in_order() {
        let (client, mut server) = connect();
        let mut rx = client.subscribe();

        server
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progressToken":"t","progress":1}}"#)
            .await;
        server
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"warning","data":"slow rule"}}"#)
            .await;
        server
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
            .await;
        server
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/resources/updated","params":{"uri":"file:///x"}}"#)
            .await;

        assert!(matches!(rx.recv().await.unwrap(), ServerNotification::Progress { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerNotification::Log {
                level: "warning".into(),
                logger: None,
                data: json!("slow rule"),
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerNotification::ResourceUpdated {
                uri: "file:///x".into()
            }
        );
    }

    #[tokio::test]
    async fn test_server_request_gets_method_not_found() {
        let (_client, mut server) = connect();
        server
            .send_raw(r#"{"jsonrpc":"2.0","id":99,"method":"sampling/createMessage"}"#)
            .await;

        let reply = server.next_message().await;
        assert_eq!(reply["id"], 99);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_notification_is_written_without_id() {
        let (client, mut server) = connect();
        client
            .send_notification("notifications/initialized", None)
            .await
            .unwrap();
        let msg = server.next_message().await;
        assert_eq!(msg["method"], "notifications/initialized");
        assert!(msg.get("id").is_none());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(excerpt(&long).chars().count(), FRAME_EXCERPT_LEN);
        assert_eq!(excerpt("short"), "short");
    }
}
