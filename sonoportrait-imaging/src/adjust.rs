use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

/// Multiplicative contrast around mid-grey. `factor == 1.0` is a no-op.
pub fn adjust_contrast(img: &GrayImage, factor: f32) -> GrayImage {
    map_pixels(img, |v| (v - 128.0) * factor + 128.0)
}

/// Multiplicative brightness. `factor == 1.0` is a no-op.
pub fn adjust_brightness(img: &GrayImage, factor: f32) -> GrayImage {
    map_pixels(img, |v| v * factor)
}

/// Stretches intensities linearly so the darkest pixel maps to `lo` and the brightest to `hi`.
///
/// Flat images are returned unchanged.
pub fn normalize_range(img: &GrayImage, lo: u8, hi: u8) -> GrayImage {
    let (min, max) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));
    if max <= min {
        return img.clone();
    }

    let scale = (hi as f32 - lo as f32) / (max as f32 - min as f32);
    map_pixels(img, |v| lo as f32 + (v - min as f32) * scale)
}

/// Centre square covering `fraction` of the shorter side.
pub fn center_roi(img: &GrayImage, fraction: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let side = ((w.min(h) as f32 * fraction) as u32).clamp(1, w.min(h));
    let x = (w - side) / 2;
    let y = (h - side) / 2;
    imageops::crop_imm(img, x, y, side, side).to_image()
}

/// Mild sharpen tuned for diffusion input.
pub fn sharpen(img: &GrayImage) -> GrayImage {
    const KERNEL: [f32; 9] = [0.0, -0.5, 0.0, -0.5, 3.0, -0.5, 0.0, -0.5, 0.0];
    imageops::filter3x3(img, &KERNEL)
}

pub fn denoise(img: &GrayImage) -> GrayImage {
    imageops::blur(img, 1.0)
}

/// Shrinks to fit inside `max_w` x `max_h`, preserving aspect ratio. Never upscales.
pub fn fit_within(img: GrayImage, max_w: u32, max_h: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w <= max_w && h <= max_h {
        return img;
    }

    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(&img, nw, nh, FilterType::Lanczos3)
}

fn map_pixels(img: &GrayImage, f: impl Fn(f32) -> f32) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        *p = Luma([f(p[0] as f32).round().clamp(0.0, 255.0) as u8]);
    }
    out
}
