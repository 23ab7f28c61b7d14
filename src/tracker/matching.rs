//! Cost matrices and gated linear assignment between tracks and detections.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;

/// Detection input for the associator.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box in pixel coordinates
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
        }
    }

    pub fn from_rect(bbox: Rect, score: f32) -> Self {
        Self { bbox, score }
    }
}

/// How the distance between a track and a detection is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMetric {
    /// `1 - IoU` of the predicted track box and the detection box.
    #[default]
    Iou,
    /// Center distance divided by the expected carrier size in pixels.
    Centroid,
}

/// Compute IoU distance matrix between tracks and detections.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
    for (i, t) in track_boxes.iter().enumerate() {
        for (j, d) in det_boxes.iter().enumerate() {
            dists[[i, j]] = 1.0 - t.iou(d);
        }
    }
    dists
}

/// Center distance normalized by `carrier_size` pixels.
pub fn centroid_distance(track_boxes: &[Rect], det_boxes: &[Rect], carrier_size: f32) -> Array2<f32> {
    let size = carrier_size.max(f32::EPSILON);
    let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
    for (i, t) in track_boxes.iter().enumerate() {
        let (tx, ty) = t.center();
        for (j, d) in det_boxes.iter().enumerate() {
            let (dx, dy) = d.center();
            dists[[i, j]] = (tx - dx).hypot(ty - dy) / size;
        }
    }
    dists
}

pub fn cost_matrix(
    metric: CostMetric,
    track_boxes: &[Rect],
    det_boxes: &[Rect],
    carrier_size: f32,
) -> Array2<f32> {
    match metric {
        CostMetric::Iou => iou_distance(track_boxes, det_boxes),
        CostMetric::Centroid => centroid_distance(track_boxes, det_boxes, carrier_size),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Cost of pairs above the gate, steering the solver away from them.
const GATED_COST: f64 = 1e5;
/// Cost of padding cells in the square matrix.
const PADDING_COST: f64 = 1e6;
/// Per-row bias so equal costs go to the earlier row.
const ROW_TIE_BREAK: f64 = 1e-9;

/// Minimum-cost assignment rejecting pairs whose cost exceeds `thresh`.
///
/// Rows must be ordered by preference: when two rows are equally good for
/// one column, the earlier row wins.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), PADDING_COST);
    for i in 0..num_rows {
        for j in 0..num_cols {
            let cost = cost_matrix[[i, j]];
            padded[[i, j]] = if cost <= thresh {
                cost as f64 + i as f64 * ROW_TIE_BREAK
            } else {
                GATED_COST
            };
        }
    }

    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut unmatched_detections_mask = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate().take(num_rows) {
                if col_idx < num_cols && cost_matrix[[row_idx, col_idx]] <= thresh {
                    matches.push((row_idx, col_idx));
                    unmatched_detections_mask[col_idx] = false;
                } else {
                    unmatched_tracks.push(row_idx);
                }
            }
        }
        Err(_) => {
            unmatched_tracks = (0..num_rows).collect();
        }
    }

    let unmatched_detections = unmatched_detections_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &u)| u.then_some(i))
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}
