use std::sync::Arc;
use std::time::Duration;

use crate::config::{CallConfig, CodecPreference};
use crate::connection::SfuConnection;
use crate::errors::CallError;
use crate::signal::{IceRestartRequest, SignalingService, SocketConfig, SocketFactory};
use crate::subscription::CallSubscriptions;
use crate::transceiver::{PublishOption, TransceiverCache, TransceiverHandle};

/// One call session: the signaling connection, the subscription pipeline,
/// and the transceiver cache, created together on join and torn down
/// together on leave.
pub struct CallSession {
    session_id: String,
    preferred_codec: CodecPreference,
    transceivers: Arc<TransceiverCache>,
    subscriptions: Arc<CallSubscriptions>,
    connection: Arc<SfuConnection>,
    signaling: Arc<dyn SignalingService>,
}

impl CallSession {
    pub fn new(
        socket_config: SocketConfig,
        config: CallConfig,
        factory: Arc<dyn SocketFactory>,
        signaling: Arc<dyn SignalingService>,
    ) -> Self {
        let session_id = socket_config.session_id.clone();
        let subscriptions = Arc::new(CallSubscriptions::new(
            &session_id,
            signaling.clone(),
            Duration::from_millis(config.subscription_debounce_ms),
        ));
        let connection =
            SfuConnection::new(socket_config, config.retry, config.health, factory);
        Self {
            session_id,
            preferred_codec: config.preferred_codec,
            transceivers: Arc::new(TransceiverCache::new()),
            subscriptions,
            connection,
            signaling,
        }
    }

    /// Connect the signaling socket.
    pub fn join(&self) {
        tracing::info!(
            "joining session {} (preferred codec {:?})",
            self.session_id,
            self.preferred_codec
        );
        self.connection.connect();
    }

    /// Tear the session down: cancel the pending subscription flush, close
    /// the socket, stop the health loop, release all cached transceivers.
    pub async fn leave(&self) {
        tracing::info!("leaving session {}", self.session_id);
        self.subscriptions.shutdown().await;
        self.connection.disconnect();
        self.transceivers.clear();
    }

    /// Ask the SFU to restart ICE for this session, typically after the
    /// socket reconnected but media stopped flowing.
    pub async fn restart_ice(&self) -> Result<(), CallError> {
        self.signaling
            .ice_restart(IceRestartRequest { session_id: self.session_id.clone() })
            .await
    }

    /// Record the transport handle for an activated publish option.
    pub fn track_activated(&self, option: PublishOption, handle: Arc<dyn TransceiverHandle>) {
        self.transceivers.add(option, handle);
    }

    /// Forget the transport handle for a deactivated publish option.
    pub fn track_deactivated(&self, option: &PublishOption) {
        self.transceivers.remove(option);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The codec this session asks the SFU to prefer. Per-session
    /// configuration, threaded through construction.
    pub fn preferred_codec(&self) -> CodecPreference {
        self.preferred_codec
    }

    pub fn transceivers(&self) -> &Arc<TransceiverCache> {
        &self.transceivers
    }

    pub fn subscriptions(&self) -> &Arc<CallSubscriptions> {
        &self.subscriptions
    }

    pub fn connection(&self) -> &Arc<SfuConnection> {
        &self.connection
    }
}
