//
// Ultrasound preprocessing.
//
// Raw scans are low contrast and noisy, and the face usually sits near the centre of the
// frame. Every variant is rendered as 8-bit grayscale PNG so the generation service sees
// the same format regardless of what was uploaded.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat};
use sonoportrait_core::config::{EnhancementConfig, EnhancementVariant};
use sonoportrait_core::types::ImageBytes;

use crate::adjust;

/// Smallest accepted width or height, in pixels.
pub const MIN_DIMENSION: u32 = 64;

const ROI_FRACTION: f32 = 0.8;
const NORMALIZE_LO: u8 = 50;
const NORMALIZE_HI: u8 = 230;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image too small: {width}x{height} (minimum {min}x{min})")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedImage {
    pub variant: EnhancementVariant,
    pub bytes: ImageBytes,
    pub width: u32,
    pub height: u32,
}

/// Normalizes an uploaded ultrasound into the selected variant.
pub fn preprocess(
    input: &[u8],
    cfg: &EnhancementConfig,
) -> Result<PreprocessedImage, PreprocessError> {
    let gray = decode_checked(input)?;
    let enhanced = (cfg.variant != EnhancementVariant::Original).then(|| enhance(&gray, cfg));
    render(&gray, enhanced.as_ref(), cfg.variant, cfg)
}

/// Renders every variant from a single decode, in `EnhancementVariant::ALL` order.
pub fn preprocess_all_variants(
    input: &[u8],
    cfg: &EnhancementConfig,
) -> Result<Vec<PreprocessedImage>, PreprocessError> {
    let gray = decode_checked(input)?;
    let enhanced = enhance(&gray, cfg);
    EnhancementVariant::ALL
        .into_iter()
        .map(|v| render(&gray, Some(&enhanced), v, cfg))
        .collect()
}

fn decode_checked(input: &[u8]) -> Result<GrayImage, PreprocessError> {
    let format = image::guess_format(input)
        .map_err(|e| PreprocessError::UnsupportedFormat(e.to_string()))?;
    let img = image::load_from_memory_with_format(input, format)
        .map_err(|e| PreprocessError::UnsupportedFormat(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(PreprocessError::ImageTooSmall {
            width,
            height,
            min: MIN_DIMENSION,
        });
    }

    log::debug!("decoded {format:?} upload: {width}x{height}");
    Ok(img.to_luma8())
}

fn enhance(gray: &GrayImage, cfg: &EnhancementConfig) -> GrayImage {
    let mut out = if cfg.denoise {
        adjust::denoise(gray)
    } else {
        gray.clone()
    };
    if cfg.contrast_boost != 1.0 {
        out = adjust::adjust_contrast(&out, cfg.contrast_boost);
    }
    if cfg.brightness != 1.0 {
        out = adjust::adjust_brightness(&out, cfg.brightness);
    }
    out
}

fn render(
    gray: &GrayImage,
    enhanced: Option<&GrayImage>,
    variant: EnhancementVariant,
    cfg: &EnhancementConfig,
) -> Result<PreprocessedImage, PreprocessError> {
    let img = match (variant, enhanced) {
        (EnhancementVariant::Original, _) | (_, None) => gray.clone(),
        (EnhancementVariant::FaceRoi, Some(e)) => adjust::center_roi(e, ROI_FRACTION),
        (EnhancementVariant::Normalized, Some(e)) => normalized_roi(e, cfg),
        (EnhancementVariant::SdOptimized, Some(e)) => adjust::sharpen(&normalized_roi(e, cfg)),
    };

    let img = match cfg.resize_target {
        Some((w, h)) => adjust::fit_within(img, w.max(1), h.max(1)),
        None => img,
    };

    let (width, height) = img.dimensions();
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img).write_to(&mut buf, ImageFormat::Png)?;

    log::debug!("rendered {} variant: {width}x{height}", variant.label());
    Ok(PreprocessedImage {
        variant,
        bytes: ImageBytes::new(buf.into_inner()),
        width,
        height,
    })
}

fn normalized_roi(enhanced: &GrayImage, cfg: &EnhancementConfig) -> GrayImage {
    let roi = adjust::center_roi(enhanced, ROI_FRACTION);
    if cfg.normalize {
        adjust::normalize_range(&roi, NORMALIZE_LO, NORMALIZE_HI)
    } else {
        roi
    }
}
