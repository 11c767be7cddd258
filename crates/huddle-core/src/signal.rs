use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CallError;
use crate::types::SubscriptionRequest;

/// Connection parameters handed to the socket factory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// Signaling endpoint (wss://).
    pub url: String,
    pub user_id: String,
    pub session_id: String,
    pub auth_token: String,
}

/// A socket-level failure as reported by the transport.
#[derive(Debug, Clone)]
pub struct SocketError {
    pub message: String,
    /// `false` for auth failures and explicit server rejections.
    pub transient: bool,
}

/// Callbacks delivered by the raw socket transport.
///
/// Called from the transport's receive path; implementations must not block.
pub trait SocketListener: Send + Sync {
    fn on_open(&self);
    fn on_message(&self, payload: &[u8]);
    fn on_closed(&self, code: u16, reason: &str);
    fn on_failure(&self, error: SocketError);
}

/// A live signaling socket.
pub trait SocketHandle: Send + Sync {
    fn send(&self, payload: &[u8]) -> Result<(), CallError>;
    fn close(&self, code: u16, reason: &str);
}

/// Creates signaling sockets. Implemented outside this crate by the raw
/// transport (TCP/TLS/WebSocket).
pub trait SocketFactory: Send + Sync {
    fn create_socket(
        &self,
        config: &SocketConfig,
        listener: Arc<dyn SocketListener>,
    ) -> Result<Arc<dyn SocketHandle>, CallError>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdateSubscriptionsResponse {
    /// Tracks the server refused, if any; informational only.
    #[serde(default)]
    pub rejected_user_ids: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceRestartRequest {
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SendStatsRequest {
    pub session_id: String,
    pub stats_json: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SdpRequest {
    pub session_id: String,
    pub sdp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceTrickleRequest {
    pub session_id: String,
    pub candidate: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MuteStateUpdate {
    pub session_id: String,
    pub muted_track_types: Vec<crate::types::TrackType>,
}

/// The SFU's RPC surface, request/response pairs carried over a binary
/// codec that lives outside this crate.
///
/// The session core itself calls only `update_subscriptions` and
/// `ice_restart`; the remaining RPCs are used by the adjacent publishing
/// code and default to no-ops so test doubles stay small.
#[async_trait]
pub trait SignalingService: Send + Sync {
    async fn update_subscriptions(
        &self,
        request: SubscriptionRequest,
    ) -> Result<UpdateSubscriptionsResponse, CallError>;

    async fn ice_restart(&self, request: IceRestartRequest) -> Result<(), CallError>;

    async fn send_stats(&self, request: SendStatsRequest) -> Result<(), CallError> {
        let _ = request;
        Ok(())
    }

    async fn set_publisher(&self, request: SdpRequest) -> Result<(), CallError> {
        let _ = request;
        Ok(())
    }

    async fn send_answer(&self, request: SdpRequest) -> Result<(), CallError> {
        let _ = request;
        Ok(())
    }

    async fn ice_trickle(&self, request: IceTrickleRequest) -> Result<(), CallError> {
        let _ = request;
        Ok(())
    }

    async fn update_mute_states(&self, request: MuteStateUpdate) -> Result<(), CallError> {
        let _ = request;
        Ok(())
    }

    async fn start_noise_cancellation(&self, session_id: &str) -> Result<(), CallError> {
        let _ = session_id;
        Ok(())
    }

    async fn stop_noise_cancellation(&self, session_id: &str) -> Result<(), CallError> {
        let _ = session_id;
        Ok(())
    }
}
