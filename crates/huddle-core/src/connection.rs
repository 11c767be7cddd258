use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::{HealthConfig, RetryConfig};
use crate::errors::{ApiError, CallError};
use crate::fsm::{Keyed, StateMachine, StateMachineBuilder};
use crate::health::HealthMonitor;
use crate::signal::{SocketConfig, SocketError, SocketFactory, SocketHandle, SocketListener};

/// Connection state of the signaling socket. Exactly one variant is active.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected {
        error: Option<String>,
        api_error: Option<ApiError>,
    },
    Connecting {
        attempt: u32,
    },
    Connected {
        user_id: String,
        connection_id: String,
    },
}

impl ConnectionState {
    fn disconnected() -> Self {
        ConnectionState::Disconnected { error: None, api_error: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStateKind {
    Disconnected,
    Connecting,
    Connected,
}

impl Keyed for ConnectionState {
    type Kind = ConnectionStateKind;

    fn kind(&self) -> ConnectionStateKind {
        match self {
            ConnectionState::Disconnected { .. } => ConnectionStateKind::Disconnected,
            ConnectionState::Connecting { .. } => ConnectionStateKind::Connecting,
            ConnectionState::Connected { .. } => ConnectionStateKind::Connected,
        }
    }
}

/// A failure report fed to the state machine, already classified.
#[derive(Clone, Debug)]
pub struct Failure {
    pub message: String,
    pub api_error: Option<ApiError>,
    pub transient: bool,
}

impl Failure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), api_error: None, transient: true }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), api_error: None, transient: false }
    }

    pub fn from_api(api_error: ApiError) -> Self {
        Self {
            message: api_error.message.clone(),
            transient: api_error.retryable,
            api_error: Some(api_error),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connect { attempt: u32 },
    Opened { user_id: String, connection_id: String },
    Closed { code: u16, reason: String },
    Failed(Failure),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connect,
    Opened,
    Closed,
    Failed,
}

impl Keyed for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Connect { .. } => ConnectionEventKind::Connect,
            ConnectionEvent::Opened { .. } => ConnectionEventKind::Opened,
            ConnectionEvent::Closed { .. } => ConnectionEventKind::Closed,
            ConnectionEvent::Failed(_) => ConnectionEventKind::Failed,
        }
    }
}

fn build_fsm() -> StateMachine<ConnectionState, ConnectionEvent> {
    use ConnectionEventKind as E;
    use ConnectionStateKind as S;

    // Handlers stay total: a payload that cannot match the registered
    // event kind falls back to the unchanged state.
    let to_connecting = |state: &ConnectionState, event: &ConnectionEvent| match event {
        ConnectionEvent::Connect { attempt } => ConnectionState::Connecting { attempt: *attempt },
        _ => state.clone(),
    };
    let to_connected = |state: &ConnectionState, event: &ConnectionEvent| match event {
        ConnectionEvent::Opened { user_id, connection_id } => ConnectionState::Connected {
            user_id: user_id.clone(),
            connection_id: connection_id.clone(),
        },
        _ => state.clone(),
    };
    let to_failed = |state: &ConnectionState, event: &ConnectionEvent| match event {
        ConnectionEvent::Failed(failure) => ConnectionState::Disconnected {
            error: Some(failure.message.clone()),
            api_error: failure.api_error.clone(),
        },
        _ => state.clone(),
    };
    let to_closed = |_: &ConnectionState, _: &ConnectionEvent| ConnectionState::disconnected();

    StateMachineBuilder::new(ConnectionState::disconnected())
        .on(S::Disconnected, E::Connect, to_connecting)
        .on(S::Connecting, E::Opened, to_connected)
        .on(S::Connecting, E::Closed, to_closed)
        .on(S::Connecting, E::Failed, to_failed)
        .on(S::Connected, E::Closed, to_closed)
        .on(S::Connected, E::Failed, to_failed)
        .build()
}

/// Handler for decoded-side processing of inbound signaling bytes.
/// Returning a decode error drops the message without touching the
/// connection; the actual codec lives outside this crate.
type MessageHandler = Arc<dyn Fn(&[u8]) -> Result<(), CallError> + Send + Sync>;

const KEEPALIVE_FRAME: &[u8] = &[0u8];

/// Drives connect/reconnect of the signaling socket.
///
/// Composes the state machine, the health monitor, and the retry policy.
/// One instance exists per connection lifetime; it is the single authority
/// for connection-state transitions. All socket callbacks and user calls
/// funnel through one event channel, so transitions stay serialized.
pub struct SfuConnection {
    fsm: Arc<StateMachine<ConnectionState, ConnectionEvent>>,
    retry: RetryConfig,
    attempts: Arc<AtomicU32>,
    factory: Arc<dyn SocketFactory>,
    socket_config: SocketConfig,
    health: Arc<HealthMonitor>,
    socket: Arc<Mutex<Option<Arc<dyn SocketHandle>>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    on_message: Arc<RwLock<Option<MessageHandler>>>,
}

struct Listener {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    health: Arc<HealthMonitor>,
    user_id: String,
    on_message: Arc<RwLock<Option<MessageHandler>>>,
}

impl SocketListener for Listener {
    fn on_open(&self) {
        let _ = self.events.send(ConnectionEvent::Opened {
            user_id: self.user_id.clone(),
            connection_id: Uuid::new_v4().to_string(),
        });
    }

    fn on_message(&self, payload: &[u8]) {
        // Any inbound traffic proves the connection alive.
        self.health.ack();
        let handler = self.on_message.read().unwrap().clone();
        if let Some(handler) = handler {
            if let Err(e) = handler(payload) {
                tracing::warn!("dropping undecodable signaling message: {e}");
            }
        }
    }

    fn on_closed(&self, code: u16, reason: &str) {
        let _ = self.events.send(ConnectionEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_failure(&self, error: SocketError) {
        let failure = if error.transient {
            Failure::transient(error.message)
        } else {
            Failure::fatal(error.message)
        };
        let _ = self.events.send(ConnectionEvent::Failed(failure));
    }
}

impl SfuConnection {
    pub fn new(
        socket_config: SocketConfig,
        retry: RetryConfig,
        health_config: HealthConfig,
        factory: Arc<dyn SocketFactory>,
    ) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            fsm: Arc::new(build_fsm()),
            retry,
            attempts: Arc::new(AtomicU32::new(0)),
            factory,
            socket_config,
            health: Arc::new(HealthMonitor::new(health_config)),
            socket: Arc::new(Mutex::new(None)),
            events,
            on_message: Arc::new(RwLock::new(None)),
        });

        // Liveness loss behaves exactly like a network-level failure.
        let events = connection.events.clone();
        let threshold = Duration::from_millis(health_config.liveness_threshold_ms);
        connection.health.on_liveness_lost(move || {
            let _ = events.send(ConnectionEvent::Failed(Failure::transient(format!(
                "no ack within {threshold:?}"
            ))));
        });
        // Opportunistic keep-alive on every healthy check.
        let socket = connection.socket.clone();
        connection.health.on_interval(move || {
            let handle = socket.lock().unwrap().clone();
            if let Some(handle) = handle {
                if let Err(e) = handle.send(KEEPALIVE_FRAME) {
                    tracing::debug!("keep-alive send failed: {e}");
                }
            }
        });

        let driver = connection.clone();
        tokio::spawn(async move {
            driver.run(rx).await;
        });
        connection
    }

    /// Register the decoder for inbound signaling messages.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&[u8]) -> Result<(), CallError> + Send + Sync + 'static,
    {
        *self.on_message.write().unwrap() = Some(Arc::new(handler));
    }

    /// Begin connecting. Ignored unless currently disconnected.
    pub fn connect(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Connect { attempt: 0 });
    }

    /// Tear the connection down without retrying.
    pub fn disconnect(&self) {
        let _ = self.events.send(ConnectionEvent::Closed {
            code: 1000,
            reason: "client disconnect".to_string(),
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.fsm.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.fsm.subscribe()
    }

    async fn run(&self, mut rx: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = rx.recv().await {
            self.process(event).await;
        }
        tracing::debug!("connection event loop ended");
    }

    /// Apply one event and perform the side effects the resulting
    /// transition calls for. Handlers themselves stay pure.
    async fn process(&self, event: ConnectionEvent) {
        let before = self.fsm.state();
        let after = self.fsm.send_event(event.clone()).await;
        if before == after {
            // The machine stayed put; nothing to act on.
            return;
        }
        tracing::debug!("connection transition {before:?} -> {after:?}");

        match (&after, &event) {
            (ConnectionState::Connecting { attempt }, _) => {
                self.open_socket(*attempt);
            }
            (ConnectionState::Connected { connection_id, .. }, _) => {
                tracing::info!("signaling socket connected ({connection_id})");
                self.attempts.store(0, Ordering::SeqCst);
                self.health.start();
            }
            (ConnectionState::Disconnected { .. }, ConnectionEvent::Failed(failure)) => {
                self.teardown_socket();
                if failure.transient {
                    self.schedule_retry(failure);
                } else {
                    tracing::warn!("fatal connection failure: {}", failure.message);
                }
            }
            (ConnectionState::Disconnected { .. }, _) => {
                self.teardown_socket();
            }
            _ => {}
        }
    }

    fn open_socket(&self, attempt: u32) {
        tracing::info!("opening signaling socket (attempt {attempt})");
        let listener = Arc::new(Listener {
            events: self.events.clone(),
            health: self.health.clone(),
            user_id: self.socket_config.user_id.clone(),
            on_message: self.on_message.clone(),
        });
        match self.factory.create_socket(&self.socket_config, listener) {
            Ok(handle) => {
                *self.socket.lock().unwrap() = Some(handle);
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(ConnectionEvent::Failed(Failure::transient(e.to_string())));
            }
        }
    }

    fn schedule_retry(&self, failure: &Failure) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.retry.max_retries {
            tracing::warn!(
                "giving up after {} attempts: {}",
                self.retry.max_retries,
                failure.message
            );
            return;
        }
        let delay = Duration::from_millis(self.retry.retry_interval_ms);
        tracing::info!(
            "transient failure ({}), reconnect {attempt}/{} in {delay:?}",
            failure.message,
            self.retry.max_retries
        );
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent::Connect { attempt });
        });
    }

    fn teardown_socket(&self) {
        self.health.stop();
        if let Some(handle) = self.socket.lock().unwrap().take() {
            handle.close(1000, "teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    struct FakeSocket;

    impl SocketHandle for FakeSocket {
        fn send(&self, _payload: &[u8]) -> Result<(), CallError> {
            Ok(())
        }

        fn close(&self, _code: u16, _reason: &str) {}
    }

    /// Factory that records every attempt and hands the listener back to
    /// the test so it can play the server side.
    struct ScriptedFactory {
        created: AtomicUsize,
        listeners: Mutex<Vec<Arc<dyn SocketListener>>>,
    }

    impl ScriptedFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self { created: AtomicUsize::new(0), listeners: Mutex::new(Vec::new()) })
        }

        fn attempts(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn last_listener(&self) -> Arc<dyn SocketListener> {
            self.listeners.lock().unwrap().last().unwrap().clone()
        }
    }

    impl SocketFactory for ScriptedFactory {
        fn create_socket(
            &self,
            _config: &SocketConfig,
            listener: Arc<dyn SocketListener>,
        ) -> Result<Arc<dyn SocketHandle>, CallError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.listeners.lock().unwrap().push(listener);
            Ok(Arc::new(FakeSocket))
        }
    }

    fn socket_config() -> SocketConfig {
        SocketConfig {
            url: "wss://sfu.example.com/ws".to_string(),
            user_id: "alice".to_string(),
            session_id: "session-1".to_string(),
            auth_token: "token".to_string(),
        }
    }

    fn retry(max_retries: u32, interval_ms: u64) -> RetryConfig {
        RetryConfig { max_retries, retry_interval_ms: interval_ms }
    }

    async fn drain() {
        // Let the driver task process queued events.
        tokio::time::sleep(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_open_close_walks_the_three_states() {
        init_test_logging();
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );
        let mut rx = connection.subscribe();

        connection.connect();
        drain().await;
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting { attempt: 0 });

        factory.last_listener().on_open();
        drain().await;
        match rx.borrow_and_update().clone() {
            ConnectionState::Connected { user_id, connection_id } => {
                assert_eq!(user_id, "alice");
                assert!(!connection_id.is_empty());
            }
            other => panic!("expected Connected, got {other:?}"),
        }

        factory.last_listener().on_closed(1000, "bye");
        drain().await;
        assert_eq!(
            *rx.borrow_and_update(),
            ConnectionState::Disconnected { error: None, api_error: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_surface_fatal() {
        init_test_logging();
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );

        connection.connect();
        drain().await;
        assert_eq!(factory.attempts(), 1);

        // Three transient failures each schedule one reconnect attempt.
        for expected in 2..=4usize {
            factory.last_listener().on_failure(SocketError {
                message: "connection reset".to_string(),
                transient: true,
            });
            tokio::time::sleep(Duration::from_millis(260)).await;
            drain().await;
            assert_eq!(factory.attempts(), expected);
        }

        // The fourth failure exhausts the budget: terminal disconnect.
        factory.last_listener().on_failure(SocketError {
            message: "connection reset".to_string(),
            transient: true,
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        drain().await;
        assert_eq!(factory.attempts(), 4);
        match connection.state() {
            ConnectionState::Disconnected { error, .. } => {
                assert_eq!(error.as_deref(), Some("connection reset"));
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_does_not_retry() {
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );

        connection.connect();
        drain().await;
        factory.last_listener().on_failure(SocketError {
            message: "authentication rejected".to_string(),
            transient: false,
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        drain().await;

        assert_eq!(factory.attempts(), 1);
        match connection.state() {
            ConnectionState::Disconnected { error, .. } => {
                assert_eq!(error.as_deref(), Some("authentication rejected"));
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn api_failure_carries_api_error_into_state() {
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );

        connection.connect();
        drain().await;
        let api = ApiError { code: 401, message: "bad token".to_string(), retryable: false };
        let _ = connection
            .events
            .send(ConnectionEvent::Failed(Failure::from_api(api.clone())));
        drain().await;

        match connection.state() {
            ConnectionState::Disconnected { api_error, .. } => {
                assert_eq!(api_error, Some(api));
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_loss_forces_reconnect() {
        init_test_logging();
        let factory = ScriptedFactory::new();
        let health = HealthConfig { check_interval_ms: 100, liveness_threshold_ms: 250 };
        let connection =
            SfuConnection::new(socket_config(), retry(3, 50), health, factory.clone());

        connection.connect();
        drain().await;
        factory.last_listener().on_open();
        drain().await;
        assert_eq!(factory.attempts(), 1);

        // No inbound messages: the monitor trips after ~300ms and injects a
        // transient failure, which schedules a reconnect.
        tokio::time::sleep(Duration::from_millis(400)).await;
        drain().await;
        assert!(factory.attempts() >= 2, "liveness loss should have reconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_keep_the_connection_alive() {
        let factory = ScriptedFactory::new();
        let health = HealthConfig { check_interval_ms: 100, liveness_threshold_ms: 250 };
        let connection =
            SfuConnection::new(socket_config(), retry(3, 50), health, factory.clone());

        connection.connect();
        drain().await;
        factory.last_listener().on_open();
        drain().await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            factory.last_listener().on_message(b"push");
        }
        drain().await;
        assert_eq!(factory.attempts(), 1);
        assert!(matches!(connection.state(), ConnectionState::Connected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_message_is_dropped_without_state_change() {
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );
        connection.on_message(|payload| {
            if payload == b"garbage" {
                Err(CallError::Decode("unknown frame".into()))
            } else {
                Ok(())
            }
        });

        connection.connect();
        drain().await;
        factory.last_listener().on_open();
        drain().await;
        factory.last_listener().on_message(b"garbage");
        drain().await;

        assert!(matches!(connection.state(), ConnectionState::Connected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn client_disconnect_is_clean() {
        let factory = ScriptedFactory::new();
        let connection = SfuConnection::new(
            socket_config(),
            retry(3, 250),
            HealthConfig::default(),
            factory.clone(),
        );

        connection.connect();
        drain().await;
        factory.last_listener().on_open();
        drain().await;
        connection.disconnect();
        drain().await;

        assert_eq!(
            connection.state(),
            ConnectionState::Disconnected { error: None, api_error: None }
        );
        // No retry after a clean close.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(factory.attempts(), 1);
    }
}
