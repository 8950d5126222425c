//! Frame composition: selective blurring and name labels.
//!
//! Blur strength scales with the bounding box so small faces still become
//! unidentifiable. Labels are rasterized from a built-in 5x7 glyph set
//! covering the capture-name alphabet `[a-z0-9_]`.

use crate::defaults;
use image::{imageops, Rgb, RgbImage};

/// Label color (bright green, legible over most footage).
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Pixel scale applied to the 5x7 glyphs.
const GLYPH_SCALE: u32 = 3;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SPACING: u32 = 1;

/// Gaussian sigma for a padded bbox of the given size. Derived from the
/// kernel-to-box ratio so blur strength follows apparent face size.
pub fn blur_sigma(region_w: u32, region_h: u32) -> f32 {
    let kernel = region_w.max(region_h) as f32 * defaults::BLUR_KERNEL_RATIO;
    // sigma ~ kernel/6 covers +-3 sigma inside the kernel span
    (kernel / 6.0).max(1.5)
}

/// Blurs the rectangle (x1, y1)..=(x2, y2) in place.
pub fn blur_region(frame: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32) {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        return;
    }
    let x1 = x1.min(fw - 1);
    let y1 = y1.min(fh - 1);
    let x2 = x2.min(fw - 1);
    let y2 = y2.min(fh - 1);
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    let w = x2 - x1;
    let h = y2 - y1;
    let region = imageops::crop_imm(frame, x1, y1, w, h).to_image();
    let blurred = imageops::blur(&region, blur_sigma(w, h));
    imageops::replace(frame, &blurred, x1 as i64, y1 as i64);
}

/// Blurs the entire frame. Fallback when detection fails: the privacy
/// guarantee requires that an unverified frame never leaves sharp.
pub fn blur_full_frame(frame: &mut RgbImage) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let blurred = imageops::blur(frame, blur_sigma(w, h));
    *frame = blurred;
}

/// Draws `text` with its baseline box anchored at (x, y) being the top-left
/// corner of the rendered string. Characters outside `[a-z0-9_]` are
/// rendered as underscores. Returns the rendered width in pixels.
pub fn draw_label(frame: &mut RgbImage, text: &str, x: i64, y: i64) -> u32 {
    let mut cursor = x;
    for c in text.chars() {
        draw_glyph(frame, glyph_rows(c), cursor, y);
        cursor += ((GLYPH_WIDTH + GLYPH_SPACING) * GLYPH_SCALE) as i64;
    }
    (cursor - x).max(0) as u32
}

/// Draws a label just above a bounding box, clamped inside the frame.
pub fn draw_label_above(frame: &mut RgbImage, text: &str, bbox_x: u32, bbox_y: u32) {
    let label_height = (GLYPH_HEIGHT * GLYPH_SCALE) as i64;
    let y = (bbox_y as i64 - label_height - 4).max(0);
    draw_label(frame, text, bbox_x as i64, y);
}

fn draw_glyph(frame: &mut RgbImage, rows: [u8; 7], x: i64, y: i64) {
    let (fw, fh) = frame.dimensions();
    for (row_index, row) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if row & (0b10000 >> col) == 0 {
                continue;
            }
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    let px = x + (col * GLYPH_SCALE + dx) as i64;
                    let py = y + (row_index as u32 * GLYPH_SCALE + dy) as i64;
                    if px >= 0 && py >= 0 && (px as u32) < fw && (py as u32) < fh {
                        frame.put_pixel(px as u32, py as u32, LABEL_COLOR);
                    }
                }
            }
        }
    }
}

/// 5x7 glyphs for the capture-name alphabet, one u8 of 5 bits per row.
fn glyph_rows(c: char) -> [u8; 7] {
    match c {
        'a' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'b' => [0b11110, 0b10001, 0b11110, 0b10001, 0b10001, 0b10001, 0b11110],
        'c' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'd' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'e' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'f' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'g' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'h' => [0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001, 0b10001],
        'i' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'j' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'k' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'l' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'm' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'n' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'o' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'p' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'r' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        's' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        't' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'u' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'v' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'w' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'x' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        _ => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
    }
}

/// Crops a head region (padded bbox) out of a frame.
pub fn crop_head(
    frame: &RgbImage,
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
) -> RgbImage {
    imageops::crop_imm(frame, x1, y1, (x2 - x1).max(1), (y2 - y1).max(1)).to_image()
}
