use serde::{Deserialize, Serialize};

use crate::projection::PixelPoint;

/// Pixel-space bounding box stored as top-left corner plus size (TLWH).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

/// Point of a bounding box used as the carrier's reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Geometric center of the box.
    #[default]
    Center,
    /// Middle of the bottom edge, where the carrier touches the floor.
    BottomCenter,
}

impl Rect {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Create a Rect of the given size centered on `(cx, cy)`.
    #[inline]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Reference point of the box for the given anchor.
    pub fn anchor(&self, anchor: Anchor) -> PixelPoint {
        let (cx, cy) = self.center();
        match anchor {
            Anchor::Center => PixelPoint::new(cx, cy),
            Anchor::BottomCenter => PixelPoint::new(cx, self.y + self.height),
        }
    }

    /// Whether any edge lies within `margin` pixels of the frame border.
    pub fn touches_border(&self, frame_width: u32, frame_height: u32, margin: f32) -> bool {
        let [x1, y1, x2, y2] = self.to_tlbr();
        x1 < margin
            || y1 < margin
            || x2 > frame_width as f32 - margin
            || y2 > frame_height as f32 - margin
    }

    /// Calculate Intersection over Union (IoU) with another bounding box.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tlbr() {
        let rect = Rect::from_tlbr(10.0, 20.0, 40.0, 60.0);
        assert_eq!(rect, Rect::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(rect.to_tlbr(), [10.0, 20.0, 40.0, 60.0]);
    }

    #[test]
    fn test_anchor_points() {
        let rect = Rect::from_center(400.0, 300.0, 80.0, 120.0);
        assert_eq!(rect.anchor(Anchor::Center), PixelPoint::new(400.0, 300.0));
        assert_eq!(rect.anchor(Anchor::BottomCenter), PixelPoint::new(400.0, 360.0));
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);

        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_touches_border() {
        let inner = Rect::new(200.0, 200.0, 100.0, 100.0);
        let edge = Rect::new(1150.0, 200.0, 100.0, 100.0);
        assert!(!inner.touches_border(1280, 720, 50.0));
        assert!(edge.touches_border(1280, 720, 50.0));
    }
}
