use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::signal::SignalingService;
use crate::types::{SubscriptionRequest, TrackSubscriptionDetails, TrackType, VideoDimension};

/// Resolution tiers requested from the SFU, chosen by rendered tile size.
pub const FULL_RESOLUTION: VideoDimension = VideoDimension::new(1280, 720);
pub const HALF_RESOLUTION: VideoDimension = VideoDimension::new(640, 360);
pub const QUARTER_RESOLUTION: VideoDimension = VideoDimension::new(320, 180);

/// One remote track currently visible in the UI grid, with its render size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibleTrack {
    pub user_id: String,
    pub track_type: TrackType,
    pub tile: VideoDimension,
}

/// The decorator interface for the subscription pipeline.
///
/// `subscribe` replaces the desired set and flows inward through the chain;
/// each layer refines the set before delegating. `pin`/`unpin` flow inward
/// until the override layer handles them.
#[async_trait]
pub trait SubscriptionManager: Send + Sync {
    async fn subscribe(&self, tracks: Vec<TrackSubscriptionDetails>);

    async fn pin(&self, user_id: &str);

    async fn unpin(&self, user_id: &str);

    /// The merged desired set as this layer sees it, including state that
    /// is still waiting on a debounce flush.
    async fn desired(&self) -> Vec<TrackSubscriptionDetails>;

    /// Cancel pending work. The chain must not send anything afterwards.
    async fn shutdown(&self);
}

struct BaseState {
    desired: Vec<TrackSubscriptionDetails>,
    last_sent: Option<SubscriptionRequest>,
}

/// Innermost layer: records the desired set verbatim and sends it to the
/// signaling service, skipping sends whose request equals the last one
/// actually delivered.
pub struct BaseSubscriptionManager {
    session_id: String,
    signaling: Arc<dyn SignalingService>,
    state: tokio::sync::Mutex<BaseState>,
}

impl BaseSubscriptionManager {
    pub fn new(session_id: &str, signaling: Arc<dyn SignalingService>) -> Self {
        Self {
            session_id: session_id.to_string(),
            signaling,
            state: tokio::sync::Mutex::new(BaseState { desired: Vec::new(), last_sent: None }),
        }
    }
}

#[async_trait]
impl SubscriptionManager for BaseSubscriptionManager {
    async fn subscribe(&self, tracks: Vec<TrackSubscriptionDetails>) {
        let mut state = self.state.lock().await;
        state.desired = tracks;
        let request = SubscriptionRequest::from_tracks(&self.session_id, state.desired.clone());
        if state.last_sent.as_ref() == Some(&request) {
            tracing::trace!("subscriptions unchanged, not resending");
            return;
        }
        match self.signaling.update_subscriptions(request.clone()).await {
            Ok(response) => {
                if !response.rejected_user_ids.is_empty() {
                    tracing::warn!("sfu rejected tracks for users {:?}", response.rejected_user_ids);
                }
                state.last_sent = Some(request);
            }
            Err(e) => {
                // Desired state stays; the next state-changing event retries.
                tracing::warn!("updateSubscriptions failed: {e}");
            }
        }
    }

    async fn pin(&self, user_id: &str) {
        tracing::debug!("pin({user_id}) reached base manager, ignoring");
    }

    async fn unpin(&self, user_id: &str) {
        tracing::debug!("unpin({user_id}) reached base manager, ignoring");
    }

    async fn desired(&self) -> Vec<TrackSubscriptionDetails> {
        self.state.lock().await.desired.clone()
    }

    async fn shutdown(&self) {}
}

struct Pending {
    latest: Option<Vec<TrackSubscriptionDetails>>,
    flush: Option<JoinHandle<()>>,
}

/// Coalesces rapid subscribe calls into a single delayed flush carrying
/// only the latest desired state.
pub struct DebouncedSubscriptionManager {
    inner: Arc<dyn SubscriptionManager>,
    window: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl DebouncedSubscriptionManager {
    pub fn new(inner: Arc<dyn SubscriptionManager>, window: Duration) -> Self {
        Self {
            inner,
            window,
            pending: Arc::new(Mutex::new(Pending { latest: None, flush: None })),
        }
    }
}

#[async_trait]
impl SubscriptionManager for DebouncedSubscriptionManager {
    async fn subscribe(&self, tracks: Vec<TrackSubscriptionDetails>) {
        // Cancel-and-reschedule happens under one lock so concurrent
        // callers cannot leave two flushes alive.
        let mut pending = self.pending.lock().unwrap();
        pending.latest = Some(tracks);
        if let Some(flush) = pending.flush.take() {
            flush.abort();
        }
        let inner = self.inner.clone();
        let window = self.window;
        let shared = self.pending.clone();
        pending.flush = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let latest = shared.lock().unwrap().latest.take();
            if let Some(latest) = latest {
                inner.subscribe(latest).await;
            }
        }));
    }

    async fn pin(&self, user_id: &str) {
        self.inner.pin(user_id).await;
    }

    async fn unpin(&self, user_id: &str) {
        self.inner.unpin(user_id).await;
    }

    async fn desired(&self) -> Vec<TrackSubscriptionDetails> {
        let waiting = self.pending.lock().unwrap().latest.clone();
        match waiting {
            Some(tracks) => tracks,
            None => self.inner.desired().await,
        }
    }

    async fn shutdown(&self) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.latest = None;
            if let Some(flush) = pending.flush.take() {
                flush.abort();
            }
        }
        self.inner.shutdown().await;
    }
}

struct PinState {
    /// user id -> override resolution, applied to that user's video tracks.
    pins: HashMap<String, VideoDimension>,
    /// Last viewport-derived input, kept so pin/unpin can recompute.
    last_input: Vec<TrackSubscriptionDetails>,
}

/// Manual-override layer: pinned users' video tracks get the override
/// resolution no matter what the viewport computed, and pinned users stay
/// subscribed even when scrolled out of view.
pub struct PinnedSubscriptionManager {
    inner: Arc<dyn SubscriptionManager>,
    state: Mutex<PinState>,
}

impl PinnedSubscriptionManager {
    pub fn new(inner: Arc<dyn SubscriptionManager>) -> Self {
        Self {
            inner,
            state: Mutex::new(PinState { pins: HashMap::new(), last_input: Vec::new() }),
        }
    }

    /// Pin with an explicit resolution instead of the highest tier.
    pub async fn pin_with(&self, user_id: &str, dimension: VideoDimension) {
        let applied = {
            let mut state = self.state.lock().unwrap();
            state.pins.insert(user_id.to_string(), dimension);
            apply_pins(&state.pins, state.last_input.clone())
        };
        self.inner.subscribe(applied).await;
    }
}

fn apply_pins(
    pins: &HashMap<String, VideoDimension>,
    mut tracks: Vec<TrackSubscriptionDetails>,
) -> Vec<TrackSubscriptionDetails> {
    for track in &mut tracks {
        if track.track_type.has_video() {
            if let Some(dimension) = pins.get(&track.user_id) {
                track.dimension = Some(*dimension);
            }
        }
    }
    // A pinned user with no visible video track is still subscribed.
    for (user_id, dimension) in pins {
        let present = tracks
            .iter()
            .any(|t| t.track_type.has_video() && &t.user_id == user_id);
        if !present {
            tracks.push(TrackSubscriptionDetails {
                user_id: user_id.clone(),
                track_type: TrackType::Video,
                dimension: Some(*dimension),
            });
        }
    }
    tracks
}

#[async_trait]
impl SubscriptionManager for PinnedSubscriptionManager {
    async fn subscribe(&self, tracks: Vec<TrackSubscriptionDetails>) {
        let applied = {
            let mut state = self.state.lock().unwrap();
            state.last_input = tracks.clone();
            apply_pins(&state.pins, tracks)
        };
        self.inner.subscribe(applied).await;
    }

    async fn pin(&self, user_id: &str) {
        tracing::debug!("pinning {user_id}");
        self.pin_with(user_id, FULL_RESOLUTION).await;
    }

    async fn unpin(&self, user_id: &str) {
        tracing::debug!("unpinning {user_id}");
        let applied = {
            let mut state = self.state.lock().unwrap();
            state.pins.remove(user_id);
            // Recompute from the stored viewport decision so the track
            // reverts instead of keeping the override.
            apply_pins(&state.pins, state.last_input.clone())
        };
        self.inner.subscribe(applied).await;
    }

    async fn desired(&self) -> Vec<TrackSubscriptionDetails> {
        self.inner.desired().await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

/// Outermost layer: turns the visible tile set into per-track resolution
/// requests. Tracks outside the viewport are simply omitted.
pub struct ViewportSubscriptionManager {
    inner: Arc<dyn SubscriptionManager>,
    viewport: Mutex<Vec<VisibleTrack>>,
}

impl ViewportSubscriptionManager {
    pub fn new(inner: Arc<dyn SubscriptionManager>) -> Self {
        Self { inner, viewport: Mutex::new(Vec::new()) }
    }

    /// Recompute desired subscriptions from the current viewport and push
    /// them through the chain.
    pub async fn update_viewport(&self, visible: Vec<VisibleTrack>) {
        let tracks = compute_tracks(&visible);
        *self.viewport.lock().unwrap() = visible;
        self.subscribe(tracks).await;
    }

    /// Re-run the computation over the unchanged viewport. Used as a
    /// periodic nudge so a previously failed send gets another chance.
    pub async fn refresh(&self) {
        let tracks = compute_tracks(&self.viewport.lock().unwrap());
        self.subscribe(tracks).await;
    }
}

fn compute_tracks(visible: &[VisibleTrack]) -> Vec<TrackSubscriptionDetails> {
    visible
        .iter()
        .map(|v| TrackSubscriptionDetails {
            user_id: v.user_id.clone(),
            track_type: v.track_type,
            dimension: v.track_type.has_video().then(|| resolution_for_tile(v.tile)),
        })
        .collect()
}

/// Larger tiles request higher resolution. Thresholds sit halfway between
/// tiers so a tile rendered at roughly tier size picks that tier.
pub fn resolution_for_tile(tile: VideoDimension) -> VideoDimension {
    if tile.area() >= HALF_RESOLUTION.area() * 2 {
        FULL_RESOLUTION
    } else if tile.area() >= QUARTER_RESOLUTION.area() * 2 {
        HALF_RESOLUTION
    } else {
        QUARTER_RESOLUTION
    }
}

#[async_trait]
impl SubscriptionManager for ViewportSubscriptionManager {
    async fn subscribe(&self, tracks: Vec<TrackSubscriptionDetails>) {
        self.inner.subscribe(tracks).await;
    }

    async fn pin(&self, user_id: &str) {
        self.inner.pin(user_id).await;
    }

    async fn unpin(&self, user_id: &str) {
        self.inner.unpin(user_id).await;
    }

    async fn desired(&self) -> Vec<TrackSubscriptionDetails> {
        self.inner.desired().await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

/// The assembled pipeline: viewport computation, then manual overrides,
/// then the debounced sender, then the base manager talking to the SFU.
pub struct CallSubscriptions {
    session_id: String,
    viewport: Arc<ViewportSubscriptionManager>,
}

impl CallSubscriptions {
    pub fn new(
        session_id: &str,
        signaling: Arc<dyn SignalingService>,
        debounce_window: Duration,
    ) -> Self {
        let base = Arc::new(BaseSubscriptionManager::new(session_id, signaling));
        let debounced = Arc::new(DebouncedSubscriptionManager::new(base, debounce_window));
        let pinned = Arc::new(PinnedSubscriptionManager::new(debounced));
        let viewport = Arc::new(ViewportSubscriptionManager::new(pinned));
        Self { session_id: session_id.to_string(), viewport }
    }

    pub async fn update_viewport(&self, visible: Vec<VisibleTrack>) {
        self.viewport.update_viewport(visible).await;
    }

    pub async fn pin(&self, user_id: &str) {
        self.viewport.pin(user_id).await;
    }

    pub async fn unpin(&self, user_id: &str) {
        self.viewport.unpin(user_id).await;
    }

    /// Recompute from the unchanged viewport, retrying any send that
    /// failed since the last state change.
    pub async fn refresh(&self) {
        self.viewport.refresh().await;
    }

    /// The fully merged desired state, overrides included.
    pub async fn current_request(&self) -> SubscriptionRequest {
        SubscriptionRequest::from_tracks(&self.session_id, self.viewport.desired().await)
    }

    /// Cancel any pending flush. Called on session teardown.
    pub async fn shutdown(&self) {
        self.viewport.shutdown().await;
    }
}
