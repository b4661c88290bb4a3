//! Watermark overlay rendering.
//!
//! The overlay has two layers drawn onto a transparent canvas the size of the
//! source frame:
//!
//! * a dense layer: the mark rotated 45° counter-clockwise about the frame
//!   centre and tiled every 350 × 180 px (in rotated space) across the whole
//!   rotated diagonal, so no crop of the frame escapes it;
//! * one emphasis instance, unrotated and more opaque, placed at random inside
//!   a padded safe zone (or centred).
//!
//! Every instance is painted as a dark outline followed by a light fill so it
//! reads on both light and dark content. Glyphs come from an embedded 8×8
//! bitmap font scaled 3×, so rendering needs no font files on the host.

use std::path::Path;

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageFormat, ImageReader, Rgba, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

pub const GLYPH_SCALE: u32 = 3;
/// Rendered glyph cell edge (24 px).
pub const CELL: u32 = 8 * GLYPH_SCALE;
pub const LINE_ADVANCE: u32 = CELL + 2;
pub const TILE_STEP_X: f64 = 350.0;
pub const TILE_STEP_Y: f64 = 180.0;
pub const EMPHASIS_PADDING: u32 = 20;
const OUTLINE_RADIUS: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Paint {
    rgb: [u8; 3],
    alpha: f32,
}

const TILE_OUTLINE: Paint = Paint {
    rgb: [0, 0, 0],
    alpha: 0.3,
};
const TILE_FILL: Paint = Paint {
    rgb: [255, 255, 255],
    alpha: 0.4,
};
const EMPHASIS_OUTLINE: Paint = Paint {
    rgb: [0, 0, 0],
    alpha: 0.5,
};
const EMPHASIS_FILL: Paint = Paint {
    rgb: [0, 255, 255],
    alpha: 0.7,
};

/// Where the emphasis instance goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmphasisPlacement {
    #[default]
    Random,
    Centered,
}

/// Rasterised watermark text: a fill mask plus an outline mask grown by
/// `OUTLINE_RADIUS` around it.
#[derive(Debug, Clone)]
pub struct TextMask {
    width: u32,
    height: u32,
    fill: Vec<bool>,
    outline: Vec<bool>,
}

impl TextMask {
    pub fn new(text: &str) -> Self {
        let lines: Vec<&str> = text.split('\n').collect();
        let cols = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
        let pad = OUTLINE_RADIUS;
        let width = cols * CELL + 2 * pad;
        let height = (lines.len() as u32 - 1) * LINE_ADVANCE + CELL + 2 * pad;

        let mut fill = vec![false; (width * height) as usize];
        for (row, line) in lines.iter().enumerate() {
            for (col, ch) in line.chars().enumerate() {
                let glyph = BASIC_FONTS
                    .get(ch)
                    .or_else(|| BASIC_FONTS.get('?'))
                    .unwrap_or([0; 8]);
                let x0 = pad + col as u32 * CELL;
                let y0 = pad + row as u32 * LINE_ADVANCE;
                for (gy, bits) in glyph.iter().enumerate() {
                    for gx in 0..8u32 {
                        if bits & (1 << gx) == 0 {
                            continue;
                        }
                        for dy in 0..GLYPH_SCALE {
                            for dx in 0..GLYPH_SCALE {
                                let x = x0 + gx * GLYPH_SCALE + dx;
                                let y = y0 + gy as u32 * GLYPH_SCALE + dy;
                                fill[(y * width + x) as usize] = true;
                            }
                        }
                    }
                }
            }
        }

        let outline = dilate(&fill, width, height, OUTLINE_RADIUS);
        Self {
            width,
            height,
            fill,
            outline,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_blank(&self) -> bool {
        !self.fill.iter().any(|&b| b)
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some((y as u32 * self.width + x as u32) as usize)
    }

    pub fn fill_at(&self, x: i64, y: i64) -> bool {
        self.index(x, y).is_some_and(|i| self.fill[i])
    }

    pub fn outline_at(&self, x: i64, y: i64) -> bool {
        self.index(x, y).is_some_and(|i| self.outline[i])
    }
}

fn dilate(src: &[bool], width: u32, height: u32, radius: u32) -> Vec<bool> {
    let (w, h, r) = (width as i64, height as i64, radius as i64);
    let mut out = vec![false; src.len()];
    for y in 0..h {
        for x in 0..w {
            if !src[(y * w + x) as usize] {
                continue;
            }
            for ny in (y - r).max(0)..=(y + r).min(h - 1) {
                for nx in (x - r).max(0)..=(x + r).min(w - 1) {
                    out[(ny * w + nx) as usize] = true;
                }
            }
        }
    }
    out
}

/// Source-over in straight alpha.
fn paint_over(dst: &mut Rgba<u8>, rgb: [u8; 3], alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = alpha + dst_a * (1.0 - alpha);
    for c in 0..3 {
        let v = (rgb[c] as f32 * alpha + dst[c] as f32 * dst_a * (1.0 - alpha)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn paint(dst: &mut Rgba<u8>, p: Paint) {
    paint_over(dst, p.rgb, p.alpha);
}

/// Top-left corner of the emphasis instance.
pub fn emphasis_origin<R: Rng + ?Sized>(
    width: u32,
    height: u32,
    mask: &TextMask,
    placement: EmphasisPlacement,
    rng: &mut R,
) -> (i64, i64) {
    let free_x = width as i64 - mask.width() as i64;
    let free_y = height as i64 - mask.height() as i64;
    match placement {
        EmphasisPlacement::Centered => (free_x / 2, free_y / 2),
        EmphasisPlacement::Random => (pick_offset(free_x, rng), pick_offset(free_y, rng)),
    }
}

fn pick_offset<R: Rng + ?Sized>(free: i64, rng: &mut R) -> i64 {
    let pad = EMPHASIS_PADDING as i64;
    if free > 2 * pad {
        rng.random_range(pad..=free - pad)
    } else {
        free / 2
    }
}

fn draw_tiles(canvas: &mut RgbaImage, mask: &TextMask) {
    let (w, h) = canvas.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let diag = (w as f64).hypot(h as f64);
    let (sin, cos) = std::f64::consts::FRAC_PI_4.sin_cos();

    let last_col = (2.0 * diag / TILE_STEP_X).floor() as i64;
    let last_row = (2.0 * diag / TILE_STEP_Y).floor() as i64;
    let mw = mask.width() as f64;
    let mh = mask.height() as f64;
    // Tile anchors sit at (-diag + k*step_x, -diag + m*step_y) in rotated
    // space; text hangs to the right of the anchor and is vertically centred
    // on it.
    let anchor_dx = OUTLINE_RADIUS as f64;
    let anchor_dy = CELL as f64 / 2.0 + OUTLINE_RADIUS as f64;

    for (px, py, pixel) in canvas.enumerate_pixels_mut() {
        let dx = px as f64 + 0.5 - cx;
        let dy = py as f64 + 0.5 - cy;
        let u = cos * dx - sin * dy;
        let v = sin * dx + cos * dy;
        let a = u + diag + anchor_dx;
        let b = v + diag + anchor_dy;

        let k_hi = ((a / TILE_STEP_X).floor() as i64).min(last_col);
        let k_lo = (((a - mw) / TILE_STEP_X).floor() as i64 + 1).max(0);
        let m_hi = ((b / TILE_STEP_Y).floor() as i64).min(last_row);
        let m_lo = (((b - mh) / TILE_STEP_Y).floor() as i64 + 1).max(0);

        let mut outline = false;
        let mut fill = false;
        for k in k_lo..=k_hi {
            let mx = (a - k as f64 * TILE_STEP_X).floor() as i64;
            for m in m_lo..=m_hi {
                let my = (b - m as f64 * TILE_STEP_Y).floor() as i64;
                outline |= mask.outline_at(mx, my);
                fill |= mask.fill_at(mx, my);
            }
        }

        if outline {
            paint(pixel, TILE_OUTLINE);
        }
        if fill {
            paint(pixel, TILE_FILL);
        }
    }
}

fn draw_emphasis(canvas: &mut RgbaImage, mask: &TextMask, origin: (i64, i64)) {
    let (w, h) = canvas.dimensions();
    for my in 0..mask.height() as i64 {
        let y = origin.1 + my;
        if y < 0 || y >= h as i64 {
            continue;
        }
        for mx in 0..mask.width() as i64 {
            let x = origin.0 + mx;
            if x < 0 || x >= w as i64 {
                continue;
            }
            let pixel = canvas.get_pixel_mut(x as u32, y as u32);
            if mask.outline_at(mx, my) {
                paint(pixel, EMPHASIS_OUTLINE);
            }
            if mask.fill_at(mx, my) {
                paint(pixel, EMPHASIS_FILL);
            }
        }
    }
}

/// Render the transparent overlay for a `width × height` frame.
pub fn render_overlay<R: Rng + ?Sized>(
    width: u32,
    height: u32,
    text: &str,
    placement: EmphasisPlacement,
    rng: &mut R,
) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    let mask = TextMask::new(text);
    if width == 0 || height == 0 || mask.is_blank() {
        return canvas;
    }

    draw_tiles(&mut canvas, &mask);
    let origin = emphasis_origin(width, height, &mask, placement, rng);
    draw_emphasis(&mut canvas, &mask, origin);
    canvas
}

/// Composite `overlay` onto `base` in place. Both must have the same size.
pub fn apply_overlay(base: &mut RgbaImage, overlay: &RgbaImage) {
    for (dst, src) in base.pixels_mut().zip(overlay.pixels()) {
        paint_over(dst, [src[0], src[1], src[2]], src[3] as f32 / 255.0);
    }
}

/// Decode `input`, burn the mark in and write a PNG to `output`.
///
/// CPU-bound; call from a blocking context.
pub fn watermark_image_file(
    input: &Path,
    output: &Path,
    text: &str,
    placement: EmphasisPlacement,
) -> Result<(u32, u32), ProcessingError> {
    let decoded = ImageReader::open(input)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;

    let mut canvas = decoded.to_rgba8();
    let (width, height) = canvas.dimensions();
    let overlay = render_overlay(width, height, text, placement, &mut rand::rng());
    apply_overlay(&mut canvas, &overlay);

    canvas
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| ProcessingError::Io(std::io::Error::other(e)))?;
    Ok((width, height))
}

/// Write the bare overlay as a PNG, for compositing onto video frames.
pub fn write_overlay_png(
    output: &Path,
    width: u32,
    height: u32,
    text: &str,
    placement: EmphasisPlacement,
) -> Result<(), ProcessingError> {
    render_overlay(width, height, text, placement, &mut rand::rng())
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| ProcessingError::Io(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gray(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
    }

    #[test]
    fn mask_dimensions_follow_text_layout() {
        let one = TextMask::new("AB");
        assert_eq!(one.width(), 2 * CELL + 2);
        assert_eq!(one.height(), CELL + 2);

        let two = TextMask::new("ABC\nD");
        assert_eq!(two.width(), 3 * CELL + 2);
        assert_eq!(two.height(), LINE_ADVANCE + CELL + 2);
        assert!(!two.is_blank());
        assert!(TextMask::new(" ").is_blank());
    }

    #[test]
    fn outline_surrounds_fill() {
        let mask = TextMask::new("I");
        for y in 0..mask.height() as i64 {
            for x in 0..mask.width() as i64 {
                if mask.fill_at(x, y) {
                    assert!(mask.outline_at(x, y));
                }
            }
        }
        let outline_only = (0..mask.height() as i64)
            .flat_map(|y| (0..mask.width() as i64).map(move |x| (x, y)))
            .filter(|&(x, y)| mask.outline_at(x, y) && !mask.fill_at(x, y))
            .count();
        assert!(outline_only > 0);
    }

    #[test]
    fn tiled_layer_reaches_every_corner_region() {
        let overlay = render_overlay(
            900,
            700,
            "4Lp9#Qz81",
            EmphasisPlacement::Centered,
            &mut StdRng::seed_from_u64(1),
        );
        let quadrants = [(0, 0), (450, 0), (0, 350), (450, 350)];
        for (qx, qy) in quadrants {
            let marked = (qy..qy + 350)
                .flat_map(|y| (qx..qx + 450).map(move |x| (x, y)))
                .filter(|&(x, y)| overlay.get_pixel(x, y)[3] > 0)
                .count();
            assert!(marked > 500, "quadrant ({qx},{qy}) has {marked} marked pixels");
        }
    }

    #[test]
    fn centered_emphasis_is_cyan_on_glyph_pixels() {
        let text = "7nQ#Zk2";
        let (w, h) = (640, 360);
        let mut frame = gray(w, h);
        let overlay = render_overlay(
            w,
            h,
            text,
            EmphasisPlacement::Centered,
            &mut StdRng::seed_from_u64(7),
        );
        apply_overlay(&mut frame, &overlay);

        let mask = TextMask::new(text);
        let (ox, oy) = emphasis_origin(
            w,
            h,
            &mask,
            EmphasisPlacement::Centered,
            &mut StdRng::seed_from_u64(0),
        );
        let mut checked = 0;
        for my in 0..mask.height() as i64 {
            for mx in 0..mask.width() as i64 {
                if !mask.fill_at(mx, my) {
                    continue;
                }
                let p = frame.get_pixel((ox + mx) as u32, (oy + my) as u32);
                assert!(p[1] > 150 && p[2] > 150 && p[0] < 100, "pixel {p:?}");
                checked += 1;
            }
        }
        assert!(checked > 50);
    }

    #[test]
    fn random_emphasis_stays_inside_safe_zone() {
        let mask = TextMask::new("abc#def");
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let (x, y) = emphasis_origin(800, 600, &mask, EmphasisPlacement::Random, &mut rng);
            assert!(x >= EMPHASIS_PADDING as i64);
            assert!(y >= EMPHASIS_PADDING as i64);
            assert!(x + mask.width() as i64 <= 800 - EMPHASIS_PADDING as i64);
            assert!(y + mask.height() as i64 <= 600 - EMPHASIS_PADDING as i64);
        }
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let overlay = render_overlay(
            10,
            10,
            "long watermark text",
            EmphasisPlacement::Random,
            &mut StdRng::seed_from_u64(3),
        );
        assert_eq!(overlay.dimensions(), (10, 10));
        assert_eq!(render_overlay(0, 5, "x", EmphasisPlacement::Random, &mut rand::rng()).len(), 0);
    }

    #[test]
    fn reruns_differ_only_where_emphasis_moves() {
        let a = render_overlay(
            500,
            400,
            "mark#1",
            EmphasisPlacement::Random,
            &mut StdRng::seed_from_u64(1),
        );
        let b = render_overlay(
            500,
            400,
            "mark#1",
            EmphasisPlacement::Random,
            &mut StdRng::seed_from_u64(2),
        );
        let c = render_overlay(
            500,
            400,
            "mark#1",
            EmphasisPlacement::Random,
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn file_round_trip_produces_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.png");
        image::DynamicImage::ImageRgba8(gray(320, 240))
            .to_rgb8()
            .save_with_format(&input, ImageFormat::Jpeg)
            .unwrap();

        let dims = watermark_image_file(&input, &output, "x#y", EmphasisPlacement::Centered)
            .unwrap();
        assert_eq!(dims, (320, 240));

        let back = image::open(&output).unwrap();
        assert_eq!((back.width(), back.height()), (320, 240));
        assert_ne!(back.to_rgba8(), gray(320, 240));
    }

    #[test]
    fn undecodable_input_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"definitely not an image").unwrap();
        let err = watermark_image_file(
            &input,
            &dir.path().join("out.png"),
            "x",
            EmphasisPlacement::Random,
        )
        .unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
    }
}
