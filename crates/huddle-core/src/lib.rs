//! Huddle call-session core.
//!
//! Media-session resilience and subscription selection for a real-time
//! call client: the signaling-connection state machine, liveness
//! monitoring, reconnect policy, the subscription decision pipeline, and
//! the transceiver cache. Transport, codecs, and UI live outside this
//! crate behind the traits in [`signal`] and [`transceiver`].

pub mod config;
pub mod connection;
pub mod errors;
pub mod fsm;
pub mod health;
pub mod session;
pub mod signal;
pub mod subscription;
pub mod transceiver;
pub mod types;

pub use config::CallConfig;
pub use errors::CallError;
pub use session::CallSession;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Route tracing output through the test harness; safe to call from
    /// every test.
    pub fn init_test_logging() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}
