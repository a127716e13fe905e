//! Connection endpoint: the orchestrator's single link to the host.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --socket opens--> Connected
//!                              |                            |
//!                              +-- error / timeout ---------+-- close / disconnect()
//!                              v                            v
//!                          Disconnected                 Disconnected
//! ```
//!
//! Every successful connect starts a new *generation*. Callers that obtained
//! a generation from [`Endpoint::connect`] send with [`Endpoint::send_on`],
//! which refuses to put their envelope on a different link than the one they
//! registered against. When a link goes down, the listener is told which
//! generation ended so it can reject exactly the work tied to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use hostbridge_config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PATH};
use hostbridge_types::{BridgeError, Envelope, Result};

/// Handshake header carrying the client name.
pub const CLIENT_NAME_HEADER: &str = "x-client-name";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Link open.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Receives what arrives on, and what happens to, the link.
///
/// Both methods are called from the link task and must not block.
pub trait EndpointListener: Send + Sync {
    /// An envelope arrived.
    fn on_envelope(&self, envelope: Envelope);

    /// The link of `generation` went down.
    fn on_disconnected(&self, generation: u64, reason: &str);
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    url: Url,
    client_name: Option<String>,
    connect_timeout: Duration,
}

impl EndpointConfig {
    /// Target a host URL. `http(s)` URLs are converted to `ws(s)`; a URL
    /// without a path gets the default bridge path.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: normalize_url(url)?,
            client_name: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    /// Build from the `[client]` configuration section.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        let mut endpoint = Self::new(&config.url)?.with_connect_timeout(config.connect_timeout());
        if let Some(name) = &config.client_name {
            endpoint = endpoint.with_client_name(name.clone());
        }
        Ok(endpoint)
    }

    /// Name presented to the host in the handshake.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Deadline for opening the link.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Client name, if any.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

fn normalize_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| BridgeError::validation(format!("invalid host URL '{}': {}", raw, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(BridgeError::validation(format!(
                "unsupported URL scheme '{}'",
                other
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| BridgeError::validation(format!("cannot use '{}' with {}", raw, scheme)))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_PATH);
    }
    Ok(url)
}

struct Link {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

/// State shared with the link task.
struct Shared {
    link: Mutex<Option<Link>>,
    state: watch::Sender<ConnectionState>,
    listener: Arc<dyn EndpointListener>,
}

impl Shared {
    /// Tear down the link of `generation` if it is still the current one,
    /// then tell the listener. Returns false if someone else already did.
    fn mark_down(&self, generation: u64, reason: &str) -> bool {
        let link = {
            let mut link = self.link.lock();
            if !link.as_ref().is_some_and(|l| l.generation == generation) {
                return false;
            }
            self.state.send_replace(ConnectionState::Disconnected);
            link.take()
        };
        if let Some(link) = link {
            link.cancel.cancel();
        }

        tracing::warn!(generation, reason, "connection to host lost");
        self.listener.on_disconnected(generation, reason);
        true
    }
}

/// The orchestrator's connection to the host.
pub struct Endpoint {
    config: EndpointConfig,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl Endpoint {
    /// Create a disconnected endpoint reporting to `listener`.
    pub fn new(config: EndpointConfig, listener: Arc<dyn EndpointListener>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                link: Mutex::new(None),
                state,
                listener,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Generation of the open link, if any.
    pub fn generation(&self) -> Option<u64> {
        self.shared.link.lock().as_ref().map(|l| l.generation)
    }

    /// Open the link if needed and return its generation.
    ///
    /// A no-op when already connected. Concurrent callers share one attempt.
    pub async fn connect(&self) -> Result<u64> {
        if let Some(generation) = self.generation() {
            return Ok(generation);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(generation) = self.generation() {
            return Ok(generation);
        }

        self.shared.state.send_replace(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "connecting to host");

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(err) => {
                self.shared.state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(url = %self.config.url, error = %err, "connect failed");
                return Err(err);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        {
            let mut link = self.shared.link.lock();
            *link = Some(Link {
                generation,
                tx,
                cancel: cancel.clone(),
            });
            self.shared.state.send_replace(ConnectionState::Connected);
        }

        tokio::spawn(run_link(
            Arc::clone(&self.shared),
            stream,
            rx,
            cancel,
            generation,
        ));

        tracing::info!(url = %self.config.url, generation, "connected to host");
        Ok(generation)
    }

    async fn open(&self) -> Result<WsStream> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::validation(format!("invalid host URL: {}", e)))?;

        if let Some(name) = &self.config.client_name {
            let value = HeaderValue::from_str(name).map_err(|_| {
                BridgeError::validation(format!("client name '{}' is not a valid header", name))
            })?;
            request.headers_mut().insert(CLIENT_NAME_HEADER, value);
        }

        match tokio::time::timeout(self.config.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(BridgeError::connection(format!(
                "failed to connect to {}: {}",
                self.config.url, e
            ))),
            Err(_) => Err(BridgeError::connection(format!(
                "timed out connecting to {} after {} ms",
                self.config.url,
                self.config.connect_timeout.as_millis()
            ))),
        }
    }

    /// Close the link. Work tied to it is rejected through the listener.
    pub fn disconnect(&self) {
        if let Some(generation) = self.generation() {
            tracing::info!(generation, "disconnecting from host");
            self.shared.mark_down(generation, "disconnected by caller");
        }
    }

    /// Send an envelope, connecting first if needed.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let generation = self.connect().await?;
        self.send_on(generation, envelope)
    }

    /// Send an envelope on the link of `generation`.
    ///
    /// Fails with `connection` if that link is no longer the open one.
    pub fn send_on(&self, generation: u64, envelope: &Envelope) -> Result<()> {
        let json = envelope.to_json()?;
        let link = self.shared.link.lock();
        match link.as_ref() {
            Some(l) if l.generation == generation => l
                .tx
                .send(Message::Text(json.into()))
                .map_err(|_| BridgeError::connection("connection to host closed")),
            _ => Err(BridgeError::connection(
                "connection to host was lost before the message was sent",
            )),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(link) = self.shared.link.lock().take() {
            link.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.config.url.as_str())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Pump one link until it closes, is cancelled, or fails.
async fn run_link(
    shared: Arc<Shared>,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    generation: u64,
) {
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }

            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    break format!("send failed: {}", e);
                }
            }

            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => deliver(&shared, generation, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => deliver(&shared, generation, text),
                    Err(_) => tracing::warn!(generation, "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            format!("closed by host: {}", frame.reason.as_str())
                        }
                        _ => "closed by host".to_string(),
                    };
                }
                Some(Err(e)) => break format!("{}", e),
                None => break "connection closed".to_string(),
            },
        }
    };

    shared.mark_down(generation, &reason);
}

/// Hand a frame to the listener. A frame that does not decode still fails
/// the request it names, as `internal`, if its id can be recovered.
fn deliver(shared: &Shared, generation: u64, text: &str) {
    match Envelope::from_json(text) {
        Ok(envelope) => shared.listener.on_envelope(envelope),
        Err(e) => match Envelope::salvage_id(text) {
            Some(id) => {
                tracing::error!(generation, request_id = %id, error = %e, "malformed reply from host");
                let err = BridgeError::internal("malformed reply from host")
                    .with_details(serde_json::json!({ "error": e.message, "frame": text }));
                shared.listener.on_envelope(Envelope::error(id, err));
            }
            None => tracing::warn!(generation, error = %e, "discarding malformed envelope"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl EndpointListener for Silent {
        fn on_envelope(&self, _envelope: Envelope) {}
        fn on_disconnected(&self, _generation: u64, _reason: &str) {}
    }

    #[derive(Default)]
    struct Recorder {
        envelopes: Mutex<Vec<Envelope>>,
    }

    impl EndpointListener for Recorder {
        fn on_envelope(&self, envelope: Envelope) {
            self.envelopes.lock().push(envelope);
        }
        fn on_disconnected(&self, _generation: u64, _reason: &str) {}
    }

    fn shared_with(listener: Arc<Recorder>) -> Shared {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Shared {
            link: Mutex::new(None),
            state,
            listener,
        }
    }

    #[test]
    fn test_malformed_reply_becomes_internal_error() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared_with(Arc::clone(&recorder));

        deliver(&shared, 1, r#"{"id":"req-3","error":"oops"}"#);
        deliver(&shared, 1, "not json at all");

        let envelopes = recorder.envelopes.lock();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].id(), "req-3");
        let err = envelopes[0].clone().into_outcome().unwrap_err();
        assert_eq!(err.kind, hostbridge_types::ErrorKind::Internal);
        let details = err.details.unwrap();
        assert_eq!(details["frame"], r#"{"id":"req-3","error":"oops"}"#);
        assert!(details["error"].as_str().is_some());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("http://localhost:8090").unwrap().as_str(),
            "ws://localhost:8090/bridge"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap().as_str(),
            "wss://example.com/bridge"
        );
        assert_eq!(
            normalize_url("ws://127.0.0.1:9000/custom").unwrap().as_str(),
            "ws://127.0.0.1:9000/custom"
        );
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_from_client_config() {
        let config = ClientConfig {
            url: "ws://127.0.0.1:9000/bridge".to_string(),
            client_name: Some("orchestrator".to_string()),
            request_timeout_secs: 10,
            connect_timeout_secs: 3,
        };
        let endpoint = EndpointConfig::from_client_config(&config).unwrap();
        assert_eq!(endpoint.client_name(), Some("orchestrator"));
        assert_eq!(endpoint.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[tokio::test]
    async fn test_send_on_without_link() {
        let config = EndpointConfig::new("ws://127.0.0.1:1/bridge").unwrap();
        let endpoint = Endpoint::new(config, Arc::new(Silent));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);

        let err = endpoint
            .send_on(1, &Envelope::request("1", "echo", serde_json::json!({})))
            .unwrap_err();
        assert!(err.is(hostbridge_types::ErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_connect_refused_returns_to_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = EndpointConfig::new(&format!("ws://{}/bridge", addr))
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2));
        let endpoint = Endpoint::new(config, Arc::new(Silent));

        let err = endpoint.connect().await.unwrap_err();
        assert!(err.is(hostbridge_types::ErrorKind::Connection));
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        assert_eq!(endpoint.generation(), None);

        // Lazy reconnect on send fails the same way.
        let err = endpoint
            .send(&Envelope::request("1", "echo", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(err.is(hostbridge_types::ErrorKind::Connection));
    }
}
