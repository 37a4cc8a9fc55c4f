//! Output sizing for a source image.
//!
//! The resolver keeps the source aspect ratio, fits the longer side to a
//! maximum, then aligns both sides down to the model's spatial grid.

use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both sides doubled, `None` on overflow
    pub fn doubled(&self) -> Option<Self> {
        Some(Self::new(self.width.checked_mul(2)?, self.height.checked_mul(2)?))
    }

    /// Scale both sides by `factor` (truncating), then align down.
    pub fn scaled_aligned(&self, factor: f64, alignment: u32) -> Self {
        let width = (self.width as f64 * factor) as u32;
        let height = (self.height as f64 * factor) as u32;
        Self::new(align_down(width, alignment), align_down(height, alignment))
    }

    pub fn is_aligned(&self, alignment: u32) -> bool {
        alignment > 0 && self.width % alignment == 0 && self.height % alignment == 0
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub fn align_down(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value - value % alignment
}

/// Grid alignment and minimum side length for one model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionPolicy {
    pub alignment: u32,
    pub min_dimension: u32,
}

impl DimensionPolicy {
    /// 32-pixel VAE grid with a 256 floor
    pub const HIGH_CAPABILITY: Self = Self {
        alignment: 32,
        min_dimension: 256,
    };

    /// Policy for a VAE with the given spatial compression ratio.
    ///
    /// Every policy keeps at least one alignment unit per side, so a
    /// resolved dimension is never zero.
    pub fn for_compression_ratio(ratio: u32) -> Self {
        let alignment = ratio.max(1);
        if alignment == Self::HIGH_CAPABILITY.alignment {
            Self::HIGH_CAPABILITY
        } else {
            Self {
                alignment,
                min_dimension: alignment,
            }
        }
    }
}

/// Computes the size the caller will receive
#[derive(Debug, Clone, Copy)]
pub struct DimensionResolver {
    policy: DimensionPolicy,
}

impl DimensionResolver {
    pub fn new(policy: DimensionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DimensionPolicy {
        self.policy
    }

    /// Explicit targets pass through unchanged. Otherwise fit the native
    /// size into `max_dimension`.
    pub fn resolve(
        &self,
        native: Dimensions,
        max_dimension: u32,
        explicit: Option<Dimensions>,
    ) -> Result<Dimensions> {
        if let Some(target) = explicit {
            if target.is_empty() {
                return Err(Error::Input(format!(
                    "explicit target {}x{} must be positive",
                    target.width, target.height
                )));
            }
            return Ok(target);
        }

        if native.is_empty() {
            return Err(Error::Input("source image has no pixels".into()));
        }
        if max_dimension == 0 {
            return Err(Error::Input("max_dimension must be positive".into()));
        }

        let aspect = native.width as f64 / native.height as f64;
        let (width, height) = if native.width > native.height {
            (max_dimension, (max_dimension as f64 / aspect) as u32)
        } else {
            ((max_dimension as f64 * aspect) as u32, max_dimension)
        };

        let DimensionPolicy { alignment, min_dimension } = self.policy;
        let width = align_down(width, alignment).max(min_dimension);
        let height = align_down(height, alignment).max(min_dimension);

        log::debug!(
            "Resolved {}x{} (max {}) to {}x{}",
            native.width, native.height, max_dimension, width, height
        );

        Ok(Dimensions::new(width, height))
    }
}
