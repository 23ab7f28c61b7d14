//! Builder for creating Detection objects from various box formats.

use crate::tracker::{Detection, Rect};

#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    score: f32,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::from_center(cx, cy, w, h);
        self
    }

    /// Set bounding box in TLWH format (top, left, width, height).
    pub fn tlwh(mut self, t: f32, l: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(l, t, w, h);
        self
    }

    /// Set the confidence score.
    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn build(self) -> Detection {
        Detection::from_rect(self.bbox, self.score)
    }

    /// Like [`build`](Self::build), but rejects empty boxes and non-finite values.
    pub fn try_build(self) -> Option<Detection> {
        let Rect {
            x,
            y,
            width,
            height,
        } = self.bbox;
        let finite = [x, y, width, height, self.score]
            .iter()
            .all(|v| v.is_finite());
        (finite && width > 0.0 && height > 0.0).then(|| self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .score(0.95)
            .build();

        assert_eq!(det.score, 0.95);
        assert_eq!(det.bbox.center(), (30.0, 50.0));
    }

    #[test]
    fn test_box_formats_agree() {
        let a = DetectionBuilder::new().tlbr(10.0, 20.0, 50.0, 80.0).build();
        let b = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        let c = DetectionBuilder::new().tlwh(20.0, 10.0, 40.0, 60.0).build();
        assert_eq!(a.bbox, b.bbox);
        assert_eq!(a.bbox, c.bbox);
    }

    #[test]
    fn test_try_build_rejects_degenerate() {
        assert!(DetectionBuilder::new().xywh(5.0, 5.0, 0.0, 3.0).try_build().is_none());
        assert!(DetectionBuilder::new().xywh(5.0, 5.0, 2.0, 3.0).score(f32::INFINITY).try_build().is_none());
        assert!(DetectionBuilder::new().xywh(5.0, 5.0, 2.0, 3.0).score(0.5).try_build().is_some());
    }
}
