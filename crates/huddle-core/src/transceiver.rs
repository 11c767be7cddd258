use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::TrackType;

/// A track-type/quality identity a sender may expose.
///
/// The `(track_type, id)` pair is unique within a session and is the key
/// under which the live transport handle is cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublishOption {
    pub id: u32,
    pub track_type: TrackType,
}

impl PublishOption {
    pub fn new(id: u32, track_type: TrackType) -> Self {
        Self { id, track_type }
    }

    fn key(&self) -> (TrackType, u32) {
        (self.track_type, self.id)
    }
}

/// One quality tier a publish option can be encoded at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualityLayer {
    pub rid: String,
    pub width: u32,
    pub height: u32,
    pub max_bitrate: u32,
}

/// The live transport object carrying one media track.
///
/// Implemented outside this crate by the peer-media transport; the cache
/// only needs to know whether the underlying track is still live. Identity
/// is pointer identity of the `Arc`.
pub trait TransceiverHandle: Send + Sync {
    fn is_live(&self) -> bool;
}

struct Inner {
    entries: HashMap<(TrackType, u32), (PublishOption, Arc<dyn TransceiverHandle>)>,
    order: Vec<Arc<dyn TransceiverHandle>>,
    layers: HashMap<(TrackType, u32), Vec<QualityLayer>>,
}

/// Single source of truth for publish-option → transport-handle mappings.
///
/// Publishers and the subscription pipeline read and write concurrently,
/// so every operation goes through one internal lock.
pub struct TransceiverCache {
    inner: Mutex<Inner>,
}

impl TransceiverCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                layers: HashMap::new(),
            }),
        }
    }

    /// Insert or overwrite the handle for an option and append it to the
    /// insertion-order list.
    pub fn add(&self, option: PublishOption, handle: Arc<dyn TransceiverHandle>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, old)) = inner.entries.insert(option.key(), (option, handle.clone())) {
            inner.order.retain(|h| !Arc::ptr_eq(h, &old));
        }
        inner.order.push(handle);
    }

    /// Delete the entry and its slot in the order list. No-op if absent.
    pub fn remove(&self, option: &PublishOption) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, handle)) = inner.entries.remove(&option.key()) {
            inner.order.retain(|h| !Arc::ptr_eq(h, &handle));
        }
    }

    pub fn get(&self, option: &PublishOption) -> Option<Arc<dyn TransceiverHandle>> {
        self.get_by(option.track_type, option.id)
    }

    pub fn get_by(&self, track_type: TrackType, id: u32) -> Option<Arc<dyn TransceiverHandle>> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&(track_type, id)).map(|(_, h)| h.clone())
    }

    /// All entries whose underlying media track is still live, in no
    /// particular order. Disposed tracks are skipped, not removed.
    pub fn items(&self) -> Vec<(PublishOption, Arc<dyn TransceiverHandle>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .values()
            .filter(|(_, handle)| handle.is_live())
            .map(|(option, handle)| (*option, handle.clone()))
            .collect()
    }

    /// Position of the handle in insertion order, or -1 if unknown.
    pub fn index_of(&self, handle: &Arc<dyn TransceiverHandle>) -> i32 {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .position(|h| Arc::ptr_eq(h, handle))
            .map_or(-1, |i| i as i32)
    }

    /// Associate computed optimal quality layers with an option. Valid
    /// whether or not a transport handle currently exists for it.
    pub fn set_layers(&self, option: &PublishOption, layers: Vec<QualityLayer>) {
        self.inner.lock().unwrap().layers.insert(option.key(), layers);
    }

    pub fn get_layers(&self, option: &PublishOption) -> Option<Vec<QualityLayer>> {
        self.inner.lock().unwrap().layers.get(&option.key()).cloned()
    }

    /// Drop every entry, order slot, and layer override. Called on session
    /// teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
        inner.layers.clear();
    }
}

impl Default for TransceiverCache {
    fn default() -> Self {
        Self::new()
    }
}
