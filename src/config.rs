// SPDX-License-Identifier: GPL-3.0-only

//! Session configuration
//!
//! These structs are set up once by the session controller and read by the
//! pipeline on the capture queue. They are plain serde types so front-ends
//! can persist them.

use serde::{Deserialize, Serialize};

/// How sources are arranged in the output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompositionLayout {
    /// One camera fills the frame
    #[default]
    Single,
    /// Secondary camera composited into a sub-rectangle over the primary
    PictureInPicture,
    /// Two disjoint half-frame quads covering the whole frame
    SideBySide,
}

impl CompositionLayout {
    /// True for layouts that consume two sources per frame
    pub fn is_dual(&self) -> bool {
        !matches!(self, CompositionLayout::Single)
    }
}

/// Placement of a scaled camera window (crop window or PiP quad)
///
/// `scale` of 1.0 means fill; below 1.0 selects a sub-rectangle whose
/// position is set by the alignment fractions (0.0 = left/top, 1.0 =
/// right/bottom).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipWindow {
    pub scale: f64,
    pub align_x: f64,
    pub align_y: f64,
}

impl Default for PipWindow {
    fn default() -> Self {
        Self {
            scale: 0.5,
            align_x: 1.0,
            align_y: 0.0,
        }
    }
}

/// Fixed per-session capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Nominal output width in pixels
    pub width: u32,
    /// Nominal output height in pixels
    pub height: u32,
    /// Nominal camera frame rate
    pub fps: f64,
    /// Output is portrait-oriented video
    pub portrait: bool,
    /// Source arrangement, chosen at session configuration time
    pub layout: CompositionLayout,
    /// Optional crop window for the main camera (single layout)
    pub camera_window: Option<PipWindow>,
    /// Placement of the secondary camera (dual layouts)
    pub pip_window: PipWindow,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30.0,
            portrait: false,
            layout: CompositionLayout::Single,
            camera_window: None,
            pip_window: PipWindow::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn layout_duality() {
        assert!(!CompositionLayout::Single.is_dual());
        assert!(CompositionLayout::PictureInPicture.is_dual());
        assert!(CompositionLayout::SideBySide.is_dual());
    }
}
