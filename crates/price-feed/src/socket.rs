//! Reconnecting WebSocket primitive
//!
//! Fixed delay between attempts, bounded by `max_reconnect_attempts`
//! consecutive failures. The counter resets whenever a connection opens.
//! Once exhausted the socket stays closed until `reconnect()`.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use livefeed_core::{ConnectionStatus, FeedError, FeedResult, SocketConfig};

/// Outbound half handed to handlers on open
#[derive(Debug, Clone)]
pub struct SocketSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SocketSender {
    pub fn send(&self, text: impl Into<String>) -> FeedResult<()> {
        self.tx.send(text.into()).map_err(|_| FeedError::Disconnected)
    }
}

/// Socket event callbacks. All are invoked from the socket task.
pub trait SocketHandler: Send + Sync + 'static {
    fn on_open(&self, _sender: &SocketSender) {}
    fn on_message(&self, _text: &str) {}
    fn on_close(&self) {}
    fn on_error(&self, _error: &FeedError) {}
    fn on_status(&self, _status: ConnectionStatus) {}
}

#[derive(Debug, Default)]
struct Link {
    generation: u64,
    status: ConnectionStatus,
    sender: Option<SocketSender>,
}

/// State shared between the socket handle and its task
struct SocketShared {
    link: Mutex<Link>,
    attempts: AtomicU32,
    handler: Arc<dyn SocketHandler>,
}

impl SocketShared {
    fn set_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        {
            let mut link = self.link.lock();
            if link.generation != generation {
                return false;
            }
            if link.status == status {
                return true;
            }
            link.status = status;
            if status != ConnectionStatus::Open {
                link.sender = None;
            }
        }
        self.handler.on_status(status);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link.lock().generation == generation
    }

    fn open(&self, generation: u64, sender: SocketSender) -> bool {
        {
            let mut link = self.link.lock();
            if link.generation != generation {
                return false;
            }
            link.sender = Some(sender.clone());
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.set_status(generation, ConnectionStatus::Open);
        self.handler.on_open(&sender);
        true
    }
}

/// WebSocket client that reconnects on a fixed schedule
pub struct ReconnectingSocket {
    config: SocketConfig,
    shared: Arc<SocketShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectingSocket {
    pub fn new(config: SocketConfig, handler: Arc<dyn SocketHandler>) -> FeedResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            shared: Arc::new(SocketShared {
                link: Mutex::new(Link::default()),
                attempts: AtomicU32::new(0),
                handler,
            }),
            handle: Mutex::new(None),
        })
    }

    /// Open the connection unless a connection task is already running
    pub fn connect(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *handle = Some(self.spawn());
    }

    /// Reset the attempt counter and force a fresh connection
    pub fn reconnect(&self) {
        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        info!(url = %self.config.url, "Forcing socket reconnect");
        *handle = Some(self.spawn());
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&self) {
        let previous = self.handle.lock().take();
        let Some(previous) = previous else {
            return;
        };
        previous.abort();

        let was_open = {
            let mut link = self.shared.link.lock();
            link.generation += 1;
            link.sender = None;
            std::mem::replace(&mut link.status, ConnectionStatus::Closed) != ConnectionStatus::Closed
        };
        if was_open {
            self.shared.handler.on_status(ConnectionStatus::Closed);
            self.shared.handler.on_close();
        }
        info!(url = %self.config.url, "Socket disconnected");
    }

    /// Queue a text frame on the open connection
    pub fn send(&self, text: impl Into<String>) -> FeedResult<()> {
        let sender = self.shared.link.lock().sender.clone();
        match sender {
            Some(sender) => sender.send(text),
            None => Err(FeedError::NotConnected),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.link.lock().status
    }

    /// Consecutive failed attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn spawn(&self) -> JoinHandle<()> {
        let generation = {
            let mut link = self.shared.link.lock();
            link.generation += 1;
            link.sender = None;
            link.generation
        };
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        tokio::spawn(run(shared, config, generation))
    }
}

impl Drop for ReconnectingSocket {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
            self.shared.link.lock().generation += 1;
        }
    }
}

async fn run(shared: Arc<SocketShared>, config: SocketConfig, generation: u64) {
    loop {
        if !shared.set_status(generation, ConnectionStatus::Connecting) {
            break;
        }

        match connect_and_listen(&shared, &config, generation).await {
            Ok(true) => {
                info!(url = %config.url, "Socket closed by server");
                // Not open while waiting to reconnect
                if !shared.set_status(generation, ConnectionStatus::Closed) {
                    break;
                }
            }
            Ok(false) => {
                debug!(url = %config.url, "Socket session superseded");
                break;
            }
            Err(e) => {
                error!(url = %config.url, error = %e, "Socket error");
                if !shared.set_status(generation, ConnectionStatus::Error) {
                    break;
                }
                shared.handler.on_error(&e);
            }
        }

        let attempts = shared.attempts.load(Ordering::SeqCst);
        if attempts >= config.max_reconnect_attempts {
            error!(
                url = %config.url,
                attempts,
                "Max reconnects reached, staying closed"
            );
            shared.set_status(generation, ConnectionStatus::Closed);
            break;
        }
        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        warn!(
            "Reconnecting {} in {:?} (attempt {}/{})",
            config.url,
            config.reconnect_delay(),
            attempt,
            config.max_reconnect_attempts
        );

        tokio::time::sleep(config.reconnect_delay()).await;
    }
}

/// Returns `Ok(true)` when the session ended and a reconnect may follow,
/// `Ok(false)` when the session was superseded by a newer generation.
async fn connect_and_listen(
    shared: &SocketShared,
    config: &SocketConfig,
    generation: u64,
) -> FeedResult<bool> {
    info!("Connecting to {}", config.url);

    let (ws_stream, _) = connect_async(config.url.as_str())
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
    if !shared.open(generation, SocketSender { tx }) {
        return Ok(false);
    }
    info!("Connected to {}", config.url);

    let result = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    break Ok(true);
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    break Err(FeedError::Transport(e.to_string()));
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !shared.is_current(generation) {
                            break Ok(false);
                        }
                        shared.handler.on_message(&text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break Err(FeedError::Transport(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Ok(true);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Err(FeedError::Transport(e.to_string()));
                    }
                }
            }
        }
    };

    if shared.is_current(generation) {
        shared.handler.on_close();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[derive(Default)]
    struct Recorder {
        opens: AtomicU32,
        closes: AtomicU32,
        errors: AtomicU32,
        messages: Mutex<Vec<String>>,
        statuses: Mutex<Vec<ConnectionStatus>>,
    }

    impl SocketHandler for Recorder {
        fn on_open(&self, sender: &SocketSender) {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let _ = sender.send("hello");
        }

        fn on_message(&self, text: &str) {
            self.messages.lock().push(text.to_string());
        }

        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &FeedError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_status(&self, status: ConnectionStatus) {
            self.statuses.lock().push(status);
        }
    }

    fn config(url: String, max_reconnect_attempts: u32) -> SocketConfig {
        SocketConfig {
            url,
            reconnect_delay_ms: 20,
            max_reconnect_attempts,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Port with nothing listening
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}")
    }

    /// Echo server that accepts `sessions` connections
    async fn echo_server(sessions: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..sessions {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() {
                            let reply = format!("echo:{}", msg.into_text().unwrap());
                            if ws.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_open_send_and_receive() {
        let url = echo_server(1).await;
        let recorder = Arc::new(Recorder::default());
        let socket = ReconnectingSocket::new(config(url, 3), recorder.clone()).unwrap();

        socket.connect();
        wait_for(|| socket.status() == ConnectionStatus::Open).await;
        wait_for(|| !recorder.messages.lock().is_empty()).await;
        assert_eq!(recorder.messages.lock()[0], "echo:hello");

        socket.send("ping").unwrap();
        wait_for(|| recorder.messages.lock().len() == 2).await;
        assert_eq!(recorder.messages.lock()[1], "echo:ping");
        assert_eq!(socket.reconnect_attempts(), 0);

        socket.disconnect();
        assert_eq!(socket.status(), ConnectionStatus::Closed);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(socket.send("late"), Err(FeedError::NotConnected)));

        socket.disconnect();
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let recorder = Arc::new(Recorder::default());
        let socket = ReconnectingSocket::new(config(dead_url(), 2), recorder.clone()).unwrap();

        socket.connect();
        wait_for(|| !socket.is_running()).await;

        assert_eq!(socket.status(), ConnectionStatus::Closed);
        assert_eq!(socket.reconnect_attempts(), 2);
        // initial try plus two reconnects
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 0);

        // stays closed on its own
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reconnect_resets_attempts() {
        let recorder = Arc::new(Recorder::default());
        let socket = ReconnectingSocket::new(config(dead_url(), 1), recorder.clone()).unwrap();

        socket.connect();
        wait_for(|| !socket.is_running()).await;
        assert_eq!(socket.reconnect_attempts(), 1);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 2);

        socket.reconnect();
        assert_eq!(socket.reconnect_attempts(), 0);
        wait_for(|| !socket.is_running()).await;
        assert_eq!(socket.status(), ConnectionStatus::Closed);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_reconnects_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            // First session is closed by the server right away
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let recorder = Arc::new(Recorder::default());
        let socket = ReconnectingSocket::new(config(url, 5), recorder.clone()).unwrap();
        socket.connect();

        wait_for(|| recorder.opens.load(Ordering::SeqCst) == 2).await;
        wait_for(|| socket.status() == ConnectionStatus::Open).await;
        assert!(recorder.closes.load(Ordering::SeqCst) >= 1);
        assert_eq!(socket.reconnect_attempts(), 0);

        let statuses = recorder.statuses.lock().clone();
        assert_eq!(statuses[0], ConnectionStatus::Connecting);
        assert_eq!(statuses[1], ConnectionStatus::Open);

        socket.disconnect();
    }

    #[tokio::test]
    async fn test_closed_while_waiting_to_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let recorder = Arc::new(Recorder::default());
        let socket = ReconnectingSocket::new(
            SocketConfig {
                url,
                reconnect_delay_ms: 2_000,
                max_reconnect_attempts: 5,
            },
            recorder.clone(),
        )
        .unwrap();
        socket.connect();

        wait_for(|| recorder.closes.load(Ordering::SeqCst) == 1).await;
        assert_eq!(socket.status(), ConnectionStatus::Closed);
        assert!(matches!(socket.send("x"), Err(FeedError::NotConnected)));
        assert_eq!(
            recorder.statuses.lock().last(),
            Some(&ConnectionStatus::Closed)
        );
        assert!(socket.is_running());

        socket.disconnect();
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_url_rejected() {
        let recorder = Arc::new(Recorder::default());
        assert!(ReconnectingSocket::new(config(String::new(), 1), recorder).is_err());
    }
}
