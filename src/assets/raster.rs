//! SVG rasterization behind a narrow trait.
//!
//! [`Rasterizer`] is the seam between the asset resolver and the vector
//! renderer. The production implementation is [`ResvgRasterizer`]; tests
//! can swap in a recording fake.

use crate::model::Resolution;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg;
use thiserror::Error;

/// CSS reference resolution: one CSS pixel is 1/96 inch.
pub const CSS_DPI: f32 = 96.0;

/// Upper bound on either output dimension.
pub const MAX_DIMENSION: u32 = 16_384;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("invalid SVG: {0}")]
    Parse(String),
    #[error("output size {width}x{height} is out of range")]
    Size { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

/// Turn SVG bytes into PNG bytes at a target resolution.
///
/// Implementations must be deterministic: equal `(svg, resolution)` inputs
/// produce byte-identical output, which is what makes caching sound.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, svg: &[u8], resolution: Resolution) -> Result<Vec<u8>, RasterError>;
}

/// resvg/tiny-skia renderer. Text in icons renders with no system fonts
/// loaded, so icons should use outlined paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResvgRasterizer;

impl ResvgRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl Rasterizer for ResvgRasterizer {
    fn rasterize(&self, svg: &[u8], resolution: Resolution) -> Result<Vec<u8>, RasterError> {
        let options = usvg::Options::default();
        let tree =
            usvg::Tree::from_data(svg, &options).map_err(|e| RasterError::Parse(e.to_string()))?;
        let size = tree.size();
        let (width, height, scale_x, scale_y) =
            output_size(size.width(), size.height(), resolution)?;

        let mut pixmap =
            Pixmap::new(width, height).ok_or(RasterError::Size { width, height })?;
        resvg::render(
            &tree,
            Transform::from_scale(scale_x, scale_y),
            &mut pixmap.as_mut(),
        );
        pixmap
            .encode_png()
            .map_err(|e| RasterError::Encode(e.to_string()))
    }
}

/// Pixel dimensions and scale factors for an SVG of intrinsic size `w`x`h`
/// (CSS pixels).
///
/// - `Dpi(d)` scales by `d / 96`.
/// - `Pixels { width, height }` fits inside the box, preserving aspect ratio.
pub fn output_size(w: f32, h: f32, resolution: Resolution) -> Result<(u32, u32, f32, f32), RasterError> {
    let scale = match resolution {
        Resolution::Dpi(dpi) => dpi as f32 / CSS_DPI,
        Resolution::Pixels { width, height } => (width as f32 / w).min(height as f32 / h),
    };
    let out_w = (w * scale).round().max(1.0) as u32;
    let out_h = (h * scale).round().max(1.0) as u32;
    if !scale.is_finite() || scale <= 0.0 || out_w > MAX_DIMENSION || out_h > MAX_DIMENSION {
        return Err(RasterError::Size {
            width: out_w,
            height: out_h,
        });
    }
    Ok((out_w, out_h, out_w as f32 / w, out_h as f32 / h))
}
