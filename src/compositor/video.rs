//! Video composition
//!
//! The primary track is scaled to fill the canvas. Every further track is
//! drawn as a fixed-size overlay inset from the bottom-right corner, in the
//! order given, so the last one ends up on top.

use crate::capture::{MediaTrack, TrackFeed, TrackKind, TrackOrigin, VideoFeed};
use crate::config::CompositorSettings;
use crate::frame::Frame;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Placement of the overlay on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl OverlayRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Bottom-right inset for secondary tracks
pub fn overlay_rect(settings: &CompositorSettings) -> OverlayRect {
    let width = settings.overlay_width.min(settings.canvas_width);
    let height = settings.overlay_height.min(settings.canvas_height);
    OverlayRect {
        x: settings
            .canvas_width
            .saturating_sub(width)
            .saturating_sub(settings.overlay_margin),
        y: settings
            .canvas_height
            .saturating_sub(height)
            .saturating_sub(settings.overlay_margin),
        width,
        height,
    }
}

/// Exposes the shared canvas as a video feed
struct CanvasFeed {
    canvas: Arc<RwLock<Frame>>,
}

impl VideoFeed for CanvasFeed {
    fn dimensions(&self) -> (u32, u32) {
        self.canvas.read().dimensions()
    }

    fn frame_at(&self, _at: Duration) -> Option<Frame> {
        Some(self.canvas.read().clone())
    }
}

/// Draws source video tracks into one canvas
pub struct VideoCompositor {
    primary: MediaTrack,
    overlays: Vec<MediaTrack>,
    overlay: OverlayRect,
    canvas: Arc<RwLock<Frame>>,
    output: MediaTrack,
}

impl VideoCompositor {
    /// Build a compositor from the live video tracks in `tracks`. The first
    /// one becomes the primary.
    pub fn new(tracks: &[MediaTrack], settings: &CompositorSettings) -> RecorderResult<Self> {
        let mut sources = tracks
            .iter()
            .filter(|t| t.kind() == TrackKind::Video && t.is_live())
            .cloned();
        let primary = sources.next().ok_or(RecorderError::NoVideoSource)?;
        let overlays: Vec<MediaTrack> = sources.collect();

        let canvas = Arc::new(RwLock::new(Frame::new(
            settings.canvas_width,
            settings.canvas_height,
        )));

        let mut dependencies = vec![primary.clone()];
        dependencies.extend(overlays.iter().cloned());
        let output = MediaTrack::derived(
            "composed video",
            TrackOrigin::Mixed,
            TrackFeed::Video(Arc::new(CanvasFeed {
                canvas: Arc::clone(&canvas),
            })),
            dependencies,
        );

        Ok(Self {
            primary,
            overlays,
            overlay: overlay_rect(settings),
            canvas,
            output,
        })
    }

    /// The synthetic track sourced from the canvas
    pub fn output(&self) -> &MediaTrack {
        &self.output
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn overlay_rect(&self) -> OverlayRect {
        self.overlay
    }

    /// Draw one frame. Returns `false` when there was nothing to draw.
    pub fn render(&self, at: Duration) -> bool {
        let Some(primary) = self.primary.video_frame(at) else {
            return false;
        };
        let overlays: Vec<Frame> = self
            .overlays
            .iter()
            .filter_map(|t| t.video_frame(at))
            .collect();

        let mut canvas = self.canvas.write();
        let (width, height) = canvas.dimensions();
        canvas.draw_scaled(&primary, 0, 0, width, height);
        let rect = self.overlay;
        for frame in &overlays {
            canvas.draw_scaled(frame, rect.x, rect.y, rect.width, rect.height);
        }
        true
    }

    /// Copy of the current canvas
    pub fn snapshot(&self) -> Frame {
        self.canvas.read().clone()
    }
}
