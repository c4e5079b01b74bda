//! Bounding-box geometry: IoU and EXIF orientation correction.
//!
//! Face detectors report boxes in pixels of the stored file. Markers in the
//! metadata service are relative (0..1) to the image as displayed, i.e. after
//! the EXIF orientation has been applied. [`to_display_rel`] bridges the two.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the stored file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PixelBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Box relative to the displayed image: origin top-left, all values in 0..1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RelBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RelBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }
}

/// Intersection-over-union of two relative boxes. Returns 0 for empty boxes.
pub fn iou(a: &RelBox, b: &RelBox) -> f64 {
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = (a.x + a.w).min(b.x + b.w);
    let iy2 = (a.y + a.h).min(b.y + b.h);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// Map a normalized point on the stored file into display space.
fn orient_point(x: f64, y: f64, orientation: u8) -> (f64, f64) {
    match orientation {
        2 => (1.0 - x, y),
        3 => (1.0 - x, 1.0 - y),
        4 => (x, 1.0 - y),
        5 => (y, x),
        6 => (1.0 - y, x),
        7 => (1.0 - y, 1.0 - x),
        8 => (y, 1.0 - x),
        _ => (x, y),
    }
}

/// Convert a pixel box on the stored file into a display-relative box.
///
/// `width`/`height` are the stored file's pixel dimensions. Unknown
/// orientations are treated as 1 (no transform). A zero dimension yields an
/// empty box.
pub fn to_display_rel(bbox: &PixelBox, width: u32, height: u32, orientation: u8) -> RelBox {
    if width == 0 || height == 0 {
        return RelBox::default();
    }
    let (w, h) = (width as f64, height as f64);
    let nx1 = (bbox.x1 / w).clamp(0.0, 1.0);
    let ny1 = (bbox.y1 / h).clamp(0.0, 1.0);
    let nx2 = (bbox.x2 / w).clamp(0.0, 1.0);
    let ny2 = (bbox.y2 / h).clamp(0.0, 1.0);

    let (ax, ay) = orient_point(nx1, ny1, orientation);
    let (bx, by) = orient_point(nx2, ny2, orientation);

    RelBox {
        x: ax.min(bx),
        y: ay.min(by),
        w: (ax - bx).abs(),
        h: (ay - by).abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_iou_identical() {
        let a = RelBox::new(0.1, 0.1, 0.2, 0.2);
        assert!(approx(iou(&a, &a), 1.0));
    }

    #[test]
    fn test_iou_disjoint() {
        let a = RelBox::new(0.0, 0.0, 0.1, 0.1);
        let b = RelBox::new(0.5, 0.5, 0.1, 0.1);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = RelBox::new(0.0, 0.0, 0.2, 0.2);
        let b = RelBox::new(0.1, 0.0, 0.2, 0.2);
        // intersection 0.1*0.2 = 0.02, union 0.04+0.04-0.02 = 0.06
        assert!(approx(iou(&a, &b), 0.02 / 0.06));
    }

    #[test]
    fn test_iou_empty_boxes() {
        let a = RelBox::default();
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_display_rel_identity() {
        let bbox = PixelBox::new(100.0, 50.0, 300.0, 250.0);
        let rel = to_display_rel(&bbox, 1000, 500, 1);
        assert!(approx(rel.x, 0.1));
        assert!(approx(rel.y, 0.1));
        assert!(approx(rel.w, 0.2));
        assert!(approx(rel.h, 0.4));
    }

    #[test]
    fn test_display_rel_rotate_90_cw() {
        // Stored 1000x500; orientation 6 displays as 500x1000.
        let bbox = PixelBox::new(0.0, 0.0, 100.0, 50.0);
        let rel = to_display_rel(&bbox, 1000, 500, 6);
        // top-left strip of the stored file ends up on the right edge
        assert!(approx(rel.x, 0.9));
        assert!(approx(rel.y, 0.0));
        assert!(approx(rel.w, 0.1));
        assert!(approx(rel.h, 0.1));
    }

    #[test]
    fn test_display_rel_rotate_180() {
        let bbox = PixelBox::new(0.0, 0.0, 100.0, 100.0);
        let rel = to_display_rel(&bbox, 1000, 1000, 3);
        assert!(approx(rel.x, 0.9));
        assert!(approx(rel.y, 0.9));
    }

    #[test]
    fn test_display_rel_rotate_270_cw() {
        let bbox = PixelBox::new(0.0, 0.0, 100.0, 50.0);
        let rel = to_display_rel(&bbox, 1000, 500, 8);
        assert!(approx(rel.x, 0.0));
        assert!(approx(rel.y, 0.9));
    }

    #[test]
    fn test_display_rel_mirror_keeps_size() {
        let bbox = PixelBox::new(100.0, 100.0, 200.0, 300.0);
        let rel = to_display_rel(&bbox, 1000, 1000, 2);
        assert!(approx(rel.x, 0.8));
        assert!(approx(rel.w, 0.1));
        assert!(approx(rel.h, 0.2));
    }

    #[test]
    fn test_display_rel_zero_dimensions() {
        let bbox = PixelBox::new(1.0, 1.0, 2.0, 2.0);
        assert_eq!(to_display_rel(&bbox, 0, 100, 1), RelBox::default());
    }

    #[test]
    fn test_pixel_box_inverted_has_zero_width() {
        let bbox = PixelBox::new(10.0, 10.0, 5.0, 5.0);
        assert_eq!(bbox.width(), 0.0);
        assert_eq!(bbox.height(), 0.0);
    }
}
