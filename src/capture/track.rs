//! Live media tracks
//!
//! A `MediaTrack` is a cheap, cloneable handle. All clones share the same
//! live flag, so stopping any clone stops the track everywhere, and the first
//! stop releases the device behind the feed. A track also ends when its feed
//! does, for example when a camera is unplugged. Tracks built by the
//! compositor list the tracks they were built from; they report themselves
//! as ended as soon as one of those ends.

use super::traits::{AudioFeed, TrackKind, TrackOrigin, VideoFeed};
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The signal behind a track
#[derive(Clone)]
pub enum TrackFeed {
    Video(Arc<dyn VideoFeed>),
    Audio(Arc<dyn AudioFeed>),
}

impl TrackFeed {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackFeed::Video(_) => TrackKind::Video,
            TrackFeed::Audio(_) => TrackKind::Audio,
        }
    }

    fn stop(&self) {
        match self {
            TrackFeed::Video(feed) => feed.stop(),
            TrackFeed::Audio(feed) => feed.stop(),
        }
    }

    fn has_ended(&self) -> bool {
        match self {
            TrackFeed::Video(feed) => feed.has_ended(),
            TrackFeed::Audio(feed) => feed.has_ended(),
        }
    }
}

struct TrackInner {
    id: Uuid,
    label: String,
    origin: TrackOrigin,
    feed: TrackFeed,
    live: AtomicBool,
    dependencies: Vec<MediaTrack>,
}

/// Handle to a live audio or video signal
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

/// Serializable description of a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: Uuid,
    pub label: String,
    pub kind: TrackKind,
    pub origin: TrackOrigin,
    pub live: bool,
}

impl MediaTrack {
    /// Create a live track backed by `feed`
    pub fn new(label: impl Into<String>, origin: TrackOrigin, feed: TrackFeed) -> Self {
        Self::derived(label, origin, feed, Vec::new())
    }

    /// Create a track whose liveness depends on other tracks
    pub fn derived(
        label: impl Into<String>,
        origin: TrackOrigin,
        feed: TrackFeed,
        dependencies: Vec<MediaTrack>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                label: label.into(),
                origin,
                feed,
                live: AtomicBool::new(true),
                dependencies,
            }),
        }
    }

    pub fn video(label: impl Into<String>, origin: TrackOrigin, feed: Arc<dyn VideoFeed>) -> Self {
        Self::new(label, origin, TrackFeed::Video(feed))
    }

    pub fn audio(label: impl Into<String>, origin: TrackOrigin, feed: Arc<dyn AudioFeed>) -> Self {
        Self::new(label, origin, TrackFeed::Audio(feed))
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.feed.kind()
    }

    pub fn origin(&self) -> TrackOrigin {
        self.inner.origin
    }

    /// Tracks this one was built from
    pub fn dependencies(&self) -> &[MediaTrack] {
        &self.inner.dependencies
    }

    /// Live until stopped or until its feed ends, and only while every
    /// dependency is live
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
            && !self.inner.feed.has_ended()
            && self.inner.dependencies.iter().all(MediaTrack::is_live)
    }

    /// Stop the track and release its device. Returns `true` if this call
    /// stopped it.
    pub fn stop(&self) -> bool {
        let was_live = self.inner.live.swap(false, Ordering::AcqRel);
        if was_live {
            self.inner.feed.stop();
            tracing::debug!("Stopped {} track {}", self.origin_label(), self.inner.label);
        }
        was_live
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Frame size of a video track
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.inner.feed {
            TrackFeed::Video(feed) => Some(feed.dimensions()),
            TrackFeed::Audio(_) => None,
        }
    }

    /// Current frame of a live video track
    pub fn video_frame(&self, at: Duration) -> Option<Frame> {
        if !self.is_live() {
            return None;
        }
        match &self.inner.feed {
            TrackFeed::Video(feed) => feed.frame_at(at),
            TrackFeed::Audio(_) => None,
        }
    }

    /// Read samples from a live audio track. Returns `false` (and leaves `out`
    /// untouched) for ended or video tracks.
    pub fn read_audio(&self, at: Duration, sample_rate: u32, out: &mut [f32]) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.inner.feed {
            TrackFeed::Audio(feed) => {
                feed.read(at, sample_rate, out);
                true
            }
            TrackFeed::Video(_) => false,
        }
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id(),
            label: self.inner.label.clone(),
            kind: self.kind(),
            origin: self.origin(),
            live: self.is_live(),
        }
    }

    fn origin_label(&self) -> &'static str {
        match self.inner.origin {
            TrackOrigin::Camera => "camera",
            TrackOrigin::Screen => "screen",
            TrackOrigin::Mixed => "mixed",
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.kind())
            .field("origin", &self.inner.origin)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{Pattern, PatternFeed, ToneFeed};

    fn video_track() -> MediaTrack {
        MediaTrack::video(
            "screen",
            TrackOrigin::Screen,
            Arc::new(PatternFeed::new(4, 4, Pattern::Solid([1, 2, 3, 255]))),
        )
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = video_track();
        assert!(track.is_live());
        assert!(track.stop());
        assert!(!track.stop());
        assert!(!track.is_live());
    }

    #[test]
    fn test_clones_share_liveness() {
        let track = video_track();
        let clone = track.clone();
        clone.stop();
        assert!(!track.is_live());
        assert!(track.same_track(&clone));
    }

    #[test]
    fn test_derived_track_ends_with_dependency() {
        let source = video_track();
        let derived = MediaTrack::derived(
            "canvas",
            TrackOrigin::Mixed,
            TrackFeed::Video(Arc::new(PatternFeed::new(4, 4, Pattern::Bars))),
            vec![source.clone()],
        );
        assert!(derived.is_live());
        source.stop();
        assert!(!derived.is_live());
        assert!(derived.video_frame(Duration::ZERO).is_none());
    }

    #[test]
    fn test_ended_audio_track_reads_nothing() {
        let track = MediaTrack::audio("mic", TrackOrigin::Camera, Arc::new(ToneFeed::new(440.0, 0.5)));
        let mut out = [7.0f32; 8];
        assert!(track.read_audio(Duration::ZERO, 8000, &mut out));
        track.stop();
        let mut out = [7.0f32; 8];
        assert!(!track.read_audio(Duration::ZERO, 8000, &mut out));
        assert!(out.iter().all(|&s| s == 7.0));
    }

    /// Feed that counts releases and can be unplugged
    #[derive(Default)]
    struct DeviceFeed {
        stops: std::sync::atomic::AtomicUsize,
        unplugged: AtomicBool,
    }

    impl AudioFeed for DeviceFeed {
        fn read(&self, _at: Duration, _sample_rate: u32, out: &mut [f32]) {
            out.fill(0.0);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn has_ended(&self) -> bool {
            self.unplugged.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_stop_releases_device_once() {
        let feed = Arc::new(DeviceFeed::default());
        let track = MediaTrack::audio("mic", TrackOrigin::Camera, feed.clone());
        let clone = track.clone();
        track.stop();
        clone.stop();
        assert_eq!(feed.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_track_ends_with_its_device() {
        let feed = Arc::new(DeviceFeed::default());
        let track = MediaTrack::audio("mic", TrackOrigin::Camera, feed.clone());
        let mixed = MediaTrack::derived(
            "mix",
            TrackOrigin::Mixed,
            TrackFeed::Audio(Arc::new(ToneFeed::new(220.0, 0.1))),
            vec![track.clone()],
        );
        feed.unplugged.store(true, Ordering::SeqCst);
        assert!(!track.is_live());
        assert!(!mixed.is_live());
    }

    #[test]
    fn test_info_reports_kind_and_origin() {
        let info = video_track().info();
        assert_eq!(info.kind, TrackKind::Video);
        assert_eq!(info.origin, TrackOrigin::Screen);
        assert!(info.live);
    }
}
