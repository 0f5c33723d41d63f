//! # Media
//!
//! The endpoint's view of media tracks, and the capability-provider contract
//! through which local capture is acquired.
//!
//! Capture and rendering happen outside this crate. A track here is only the
//! bookkeeping the signaling layer needs: its kind and whether it is enabled.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Microphone / remote audio
    Audio,
    /// Camera / remote video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// A single media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Track identifier (device- or transport-assigned)
    pub id: String,
    /// Audio or video
    pub kind: MediaKind,
    /// Whether the track currently produces/plays media
    pub enabled: bool,
}

impl MediaTrack {
    /// Create an enabled track.
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }
}

/// An ordered set of tracks, at most one per kind is addressed by toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// An empty stream (receive-only / no-media peer).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a stream from tracks.
    pub fn from_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    /// All tracks in insertion order.
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Whether the stream carries no tracks at all.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// First track of the given kind.
    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Add a track, replacing an existing track with the same id.
    pub fn add_track(&mut self, track: MediaTrack) {
        if let Some(existing) = self.tracks.iter_mut().find(|t| t.id == track.id) {
            *existing = track;
        } else {
            self.tracks.push(track);
        }
    }

    /// Flip the first track of `kind`. Returns the new enabled state, or
    /// `None` when the stream has no such track.
    pub fn toggle(&mut self, kind: MediaKind) -> Option<bool> {
        let track = self.tracks.iter_mut().find(|t| t.kind == kind)?;
        track.enabled = !track.enabled;
        Some(track.enabled)
    }

    /// Disable every track.
    pub fn disable_all(&mut self) {
        for track in &mut self.tracks {
            track.enabled = false;
        }
    }

    /// Drop every track.
    pub fn release(&mut self) {
        self.tracks.clear();
    }
}

/// The endpoint's captured media.
///
/// Owned by the local endpoint; every `PeerRecord` holds a clone of this
/// handle, so toggling a local track is visible to all negotiated connections.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    stream: Arc<Mutex<MediaStream>>,
}

impl LocalMedia {
    /// Wrap a captured stream.
    pub fn new(stream: MediaStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    /// Snapshot of the current tracks.
    pub fn snapshot(&self) -> MediaStream {
        self.stream.lock().clone()
    }

    /// Whether any track was captured.
    pub fn has_tracks(&self) -> bool {
        !self.stream.lock().is_empty()
    }

    /// Enabled state of the local track of `kind`, if captured.
    pub fn is_enabled(&self, kind: MediaKind) -> Option<bool> {
        self.stream.lock().track(kind).map(|t| t.enabled)
    }

    /// Flip the local track of `kind`.
    pub fn toggle(&self, kind: MediaKind) -> Option<bool> {
        self.stream.lock().toggle(kind)
    }

    /// Whether two handles point at the same captured stream.
    pub fn same_as(&self, other: &LocalMedia) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Access to local capture devices.
///
/// Returning [`Error::CapabilityDenied`] (permission refused, no device) is an
/// expected outcome: the caller degrades to a no-media peer.
#[async_trait]
pub trait MediaCapabilityProvider: Send + Sync {
    /// Capture tracks matching `constraints`.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Vec<MediaTrack>>;
}

/// Provider for endpoints without capture devices (bots, receive-only
/// clients). Always denies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMediaProvider;

#[async_trait]
impl MediaCapabilityProvider for NoMediaProvider {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Vec<MediaTrack>> {
        Err(Error::CapabilityDenied("no capture devices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn av_stream() -> MediaStream {
        MediaStream::from_tracks(vec![
            MediaTrack::new("mic-0", MediaKind::Audio),
            MediaTrack::new("cam-0", MediaKind::Video),
        ])
    }

    #[test]
    fn test_toggle_flips_only_requested_kind() {
        let mut stream = av_stream();
        assert_eq!(stream.toggle(MediaKind::Video), Some(false));
        assert!(stream.track(MediaKind::Audio).unwrap().enabled);
        assert!(!stream.track(MediaKind::Video).unwrap().enabled);
        assert_eq!(stream.toggle(MediaKind::Video), Some(true));
    }

    #[test]
    fn test_toggle_missing_track_is_none() {
        let mut stream = MediaStream::from_tracks(vec![MediaTrack::new("mic-0", MediaKind::Audio)]);
        assert_eq!(stream.toggle(MediaKind::Video), None);
        assert_eq!(MediaStream::empty().toggle(MediaKind::Audio), None);
    }

    #[test]
    fn test_add_track_replaces_same_id() {
        let mut stream = av_stream();
        let mut replacement = MediaTrack::new("cam-0", MediaKind::Video);
        replacement.enabled = false;
        stream.add_track(replacement);
        assert_eq!(stream.tracks().len(), 2);
        assert!(!stream.track(MediaKind::Video).unwrap().enabled);
    }

    #[test]
    fn test_local_media_handles_share_state() {
        let local = LocalMedia::new(av_stream());
        let clone = local.clone();
        assert!(local.same_as(&clone));

        clone.toggle(MediaKind::Audio);
        assert_eq!(local.is_enabled(MediaKind::Audio), Some(false));
    }

    #[tokio::test]
    async fn test_no_media_provider_denies() {
        let err = NoMediaProvider
            .acquire(MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied(_)));
    }
}
