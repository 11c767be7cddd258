use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackType {
    Audio,
    Video,
    ScreenShare,
}

impl TrackType {
    /// Whether subscription quality (resolution) applies to this track type.
    pub fn has_video(self) -> bool {
        matches!(self, TrackType::Video | TrackType::ScreenShare)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VideoDimension {
    pub width: u32,
    pub height: u32,
}

impl VideoDimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One remote track the client wants to receive.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TrackSubscriptionDetails {
    pub user_id: String,
    pub track_type: TrackType,
    /// Requested resolution; `None` for audio-only tracks.
    pub dimension: Option<VideoDimension>,
}

/// Canonical desired-subscription state sent to the signaling service.
///
/// Entries are deduplicated per (user, track type) and sorted, so two
/// requests describing the same desired state compare equal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub session_id: String,
    pub tracks: Vec<TrackSubscriptionDetails>,
}

impl SubscriptionRequest {
    pub fn from_tracks(session_id: &str, tracks: Vec<TrackSubscriptionDetails>) -> Self {
        let mut tracks = tracks;
        // Last write wins within a batch: keep the final entry per key.
        tracks.reverse();
        let mut seen = std::collections::HashSet::new();
        tracks.retain(|t| seen.insert((t.user_id.clone(), t.track_type)));
        tracks.sort_by(|a, b| {
            (&a.user_id, a.track_type).cmp(&(&b.user_id, b.track_type))
        });
        Self { session_id: session_id.to_string(), tracks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(user: &str, w: u32, h: u32) -> TrackSubscriptionDetails {
        TrackSubscriptionDetails {
            user_id: user.to_string(),
            track_type: TrackType::Video,
            dimension: Some(VideoDimension::new(w, h)),
        }
    }

    #[test]
    fn request_dedups_last_write_wins() {
        let req = SubscriptionRequest::from_tracks(
            "s1",
            vec![video("alice", 320, 180), video("alice", 1280, 720)],
        );
        assert_eq!(req.tracks.len(), 1);
        assert_eq!(req.tracks[0].dimension, Some(VideoDimension::new(1280, 720)));
    }

    #[test]
    fn request_order_is_canonical() {
        let a = SubscriptionRequest::from_tracks(
            "s1",
            vec![video("bob", 320, 180), video("alice", 320, 180)],
        );
        let b = SubscriptionRequest::from_tracks(
            "s1",
            vec![video("alice", 320, 180), video("bob", 320, 180)],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn same_user_different_track_types_both_kept() {
        let req = SubscriptionRequest::from_tracks(
            "s1",
            vec![
                video("alice", 640, 360),
                TrackSubscriptionDetails {
                    user_id: "alice".to_string(),
                    track_type: TrackType::Audio,
                    dimension: None,
                },
            ],
        );
        assert_eq!(req.tracks.len(), 2);
    }
}
