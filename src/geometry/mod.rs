// SPDX-License-Identifier: GPL-3.0-only

//! Closed-form affine geometry for live rotation, mirroring and crop windows
//!
//! The solver produces a forward affine transform (source pixel → destination
//! pixel) from the discrete orientation/mirror state, then [`SampleMap`]
//! inverts it into the destination → source form both compositor backends
//! sample with. Everything here is pure: it is recomputed from current state
//! every frame and has no hidden caching.

use crate::constants::{DET_EPSILON, SCALE_EPSILON};
use crate::errors::GeometryError;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Capture/display rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// Native sensor orientation; identity when unmirrored
    #[default]
    LandscapeLeft,
    /// Reflected landscape
    LandscapeRight,
    /// ±90° rotation, sense depends on camera position and mirror
    Portrait,
    /// Reflect + rotate
    PortraitUpsideDown,
}

impl Orientation {
    /// Check if this orientation swaps width and height of landscape content
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Portrait | Orientation::PortraitUpsideDown)
    }
}

/// Physical camera position, which decides the portrait rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraPosition {
    #[default]
    Back,
    Front,
}

/// 2D affine transform in CGAffineTransform layout
///
/// Maps a point as `x' = a·x + c·y + tx`, `y' = b·x + d·y + ty`.
/// Composition via [`AffineTransform::then`] applies `self` first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    /// Rotation by `theta` radians; positive is clockwise in the y-down
    /// pixel coordinate system
    pub fn rotation(theta: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Compose: apply `self`, then `next`
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    /// Map a point through the transform
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Axis-aligned bounding quad of the source rect `(0,0)..(w,h)` mapped
    /// through this transform, as `[min_x, min_y, max_x, max_y]`
    pub fn quad(&self, width: f64, height: f64) -> [i32; 4] {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width, 0.0),
            self.apply(0.0, height),
            self.apply(width, height),
        ];
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        [
            min_x.round() as i32,
            min_y.round() as i32,
            max_x.round() as i32,
            max_y.round() as i32,
        ]
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Destination → source sampling map consumed by both compositor backends
///
/// `src = M · dest + offset`. This is the inverse of the solver's forward
/// transform; kernels evaluate it per destination pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMap {
    pub m: [[f64; 2]; 2],
    pub offset: [f64; 2],
}

impl SampleMap {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0], [0.0, 1.0]],
            offset: [0.0, 0.0],
        }
    }

    /// Invert a forward transform into sampling form.
    ///
    /// A determinant too close to zero (degenerate alignment/scale input)
    /// is reported instead of producing infinities; the caller falls back
    /// to its last-known-good map.
    pub fn invert(transform: &AffineTransform) -> Result<Self, GeometryError> {
        let det = transform.determinant();
        if !det.is_finite() || det.abs() < DET_EPSILON {
            return Err(GeometryError::Degenerate { det });
        }
        let m = [
            [transform.d / det, -transform.c / det],
            [-transform.b / det, transform.a / det],
        ];
        let offset = [
            -transform.tx * m[0][0] - transform.ty * m[0][1],
            -transform.tx * m[1][0] - transform.ty * m[1][1],
        ];
        Ok(Self { m, offset })
    }

    /// Map a destination pixel to its source sampling position
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.m[0][0] + y * self.m[0][1] + self.offset[0],
            x * self.m[1][0] + y * self.m[1][1] + self.offset[1],
        )
    }
}

impl Default for SampleMap {
    fn default() -> Self {
        Self::identity()
    }
}

/// Result of one solver run
#[derive(Debug, Clone, Copy)]
pub struct SolvedTransform {
    /// Forward source → destination transform
    pub transform: AffineTransform,
    /// Width/height were swapped by the orientation step
    pub rotated: bool,
    /// Uniform fit-inside scale that was applied (1.0 when skipped)
    pub scale_f: f64,
}

/// Per-slot geometry state (main or pip source)
///
/// Mutated by the session controller on the capture queue, read every frame.
/// Solving is a pure function of this block plus the destination extent.
#[derive(Debug, Clone)]
pub struct ViewTransform {
    pub orientation: Orientation,
    pub position: CameraPosition,
    /// Output is portrait-oriented video
    pub portrait_video: bool,
    /// Mirror (selfie) flag
    pub mirror: bool,
    /// Placement fractions of the scaled window, 0.0..=1.0
    pub align_x: f64,
    pub align_y: f64,
    /// Sub-rectangle scale; 1.0 = fill
    pub scale_pip_x: f64,
    pub scale_pip_y: f64,
    src_width: f64,
    src_height: f64,
}

impl ViewTransform {
    pub fn new(src_width: u32, src_height: u32) -> Self {
        Self::with_scale(src_width, src_height, 1.0)
    }

    pub fn with_scale(src_width: u32, src_height: u32, scale: f64) -> Self {
        Self {
            orientation: Orientation::default(),
            position: CameraPosition::default(),
            portrait_video: false,
            mirror: false,
            align_x: 0.5,
            align_y: 0.5,
            scale_pip_x: scale,
            scale_pip_y: scale,
            src_width: src_width as f64,
            src_height: src_height as f64,
        }
    }

    /// Set a uniform sub-rectangle scale
    pub fn set_scale(&mut self, scale: f64) {
        self.scale_pip_x = scale;
        self.scale_pip_y = scale;
    }

    /// Solve the forward transform for a destination extent.
    ///
    /// `invert_y` flips the vertical alignment term to match backends whose
    /// texture coordinates grow upward.
    pub fn solve(&self, extent_w: f64, extent_h: f64, invert_y: bool) -> SolvedTransform {
        let norm_w = if self.portrait_video {
            extent_h
        } else {
            extent_w
        };
        let norm_h = if self.portrait_video {
            extent_w
        } else {
            extent_h
        };

        let mut matrix = AffineTransform::identity();
        let rotated = match self.orientation {
            Orientation::LandscapeLeft => {
                if self.mirror {
                    matrix = Self::flip(&matrix, norm_w, norm_h);
                }
                self.portrait_video
            }
            Orientation::LandscapeRight => {
                if !self.mirror {
                    matrix = Self::flip(&matrix, norm_w, norm_h);
                }
                self.portrait_video
            }
            Orientation::Portrait => {
                let clockwise = (self.position == CameraPosition::Front) != self.mirror;
                matrix = Self::rotate(&matrix, clockwise, norm_w, norm_h);
                !self.portrait_video
            }
            Orientation::PortraitUpsideDown => {
                if !self.mirror {
                    matrix = Self::flip(&matrix, norm_w, norm_h);
                }
                let clockwise = (self.position == CameraPosition::Back) != self.mirror;
                matrix = Self::rotate(&matrix, clockwise, norm_w, norm_h);
                !self.portrait_video
            }
        };

        let out_w = if rotated { self.src_height } else { self.src_width };
        let out_h = if rotated { self.src_width } else { self.src_height };
        let scale_x = self.src_width / out_w * self.scale_pip_x;
        let scale_y = self.src_height / out_h * self.scale_pip_y;
        let scale_f = scale_x.min(scale_y);

        if (scale_f - 1.0).abs() > SCALE_EPSILON {
            matrix = matrix.then(&AffineTransform::scale(scale_f, scale_f));
            let offset_x = (self.src_width - out_w * scale_f) * self.align_x;
            let offset_y = if invert_y {
                (self.src_height - out_h * scale_f) * (1.0 - self.align_y)
            } else {
                (self.src_height - out_h * scale_f) * self.align_y
            };
            matrix = matrix.then(&AffineTransform::translation(offset_x, offset_y));
        }

        SolvedTransform {
            transform: matrix,
            rotated,
            scale_f,
        }
    }

    /// Reflect both axes and re-center within the (portrait-swapped) extent
    fn flip(matrix: &AffineTransform, norm_w: f64, norm_h: f64) -> AffineTransform {
        AffineTransform::translation(-norm_w, -norm_h)
            .then(matrix)
            .then(&AffineTransform::scale(-1.0, -1.0))
    }

    /// ±90° rotation about the frame center, re-centered with swapped extents
    fn rotate(matrix: &AffineTransform, clockwise: bool, norm_w: f64, norm_h: f64) -> AffineTransform {
        let angle = if clockwise { FRAC_PI_2 } else { -FRAC_PI_2 };
        matrix
            .then(&AffineTransform::translation(-norm_w / 2.0, -norm_h / 2.0))
            .then(&AffineTransform::rotation(angle))
            .then(&AffineTransform::translation(norm_h / 2.0, norm_w / 2.0))
    }
}
