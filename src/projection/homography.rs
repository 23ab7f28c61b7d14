//! Planar homography between the camera image and the floor plan.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use super::{FloorPoint, PixelPoint};
use crate::error::{FusionError, Result};

/// Homogeneous weights below this are treated as points at infinity.
const MIN_WEIGHT: f64 = 1e-12;

/// Fixed pixel → floor transform together with its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    /// Build a homography from a row-major 3x3 matrix mapping pixels to floor.
    pub fn from_matrix(rows: [[f64; 3]; 3]) -> Result<Self> {
        Self::from_forward(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    fn from_forward(mut forward: Matrix3<f64>) -> Result<Self> {
        if forward.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::calibration(
                "homography contains non-finite values",
            ));
        }
        let scale = forward[(2, 2)];
        if scale.abs() > MIN_WEIGHT {
            forward /= scale;
        }
        let inverse = forward
            .try_inverse()
            .ok_or_else(|| FusionError::calibration("homography matrix is singular"))?;
        Ok(Self { forward, inverse })
    }

    /// Solve the homography from four pixel/floor point correspondences.
    ///
    /// No three of the points may be collinear.
    pub fn from_correspondences(pixel: &[PixelPoint; 4], floor: &[FloorPoint; 4]) -> Result<Self> {
        let pixel_xy = pixel.map(|p| (p.x, p.y));
        let floor_xy = floor.map(|p| (p.x, p.y));
        if has_collinear_triple(&pixel_xy) || has_collinear_triple(&floor_xy) {
            return Err(FusionError::calibration(
                "calibration points are degenerate (collinear)",
            ));
        }

        // Conditioning: solve in centred, scaled coordinates, then undo.
        let (t_pixel, pixel_n) = normalize(&pixel_xy);
        let (t_floor, floor_n) = normalize(&floor_xy);

        // h33 is fixed to 1, leaving an 8x8 linear system.
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (&(x, y), &(u, v))) in pixel_n.iter().zip(floor_n.iter()).enumerate() {
            let r = 2 * i;
            a.row_mut(r)
                .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
            a.row_mut(r + 1)
                .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
            b[r] = u;
            b[r + 1] = v;
        }
        let h = a.lu().solve(&b).ok_or_else(|| {
            FusionError::calibration("calibration points are degenerate (collinear)")
        })?;
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let t_floor_inv = t_floor
            .try_inverse()
            .ok_or_else(|| FusionError::calibration("floor calibration points coincide"))?;
        Self::from_forward(t_floor_inv * normalized * t_pixel)
    }

    /// Row-major pixel → floor matrix, normalised so that `h33 == 1` when possible.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let m = &self.forward;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    pub fn to_floor(&self, p: PixelPoint) -> Result<FloorPoint> {
        let (x, y) = apply(&self.forward, p.x, p.y)?;
        Ok(FloorPoint::new(x, y))
    }

    pub fn to_pixel(&self, p: FloorPoint) -> Result<PixelPoint> {
        let (x, y) = apply(&self.inverse, p.x, p.y)?;
        Ok(PixelPoint::new(x, y))
    }
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2).
fn normalize(points: &[(f64, f64); 4]) -> (Matrix3<f64>, [(f64, f64); 4]) {
    let cx = points.iter().map(|p| p.0).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| (p.0 - cx).hypot(p.1 - cy))
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 0.0 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    (t, points.map(|(x, y)| (s * (x - cx), s * (y - cy))))
}

fn has_collinear_triple(points: &[(f64, f64); 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[a, b, c]| {
        let (ax, ay) = points[a];
        let (bx, by) = points[b];
        let (cx, cy) = points[c];
        let area2 = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
        area2.abs() < 1e-9
    })
}

fn apply(m: &Matrix3<f64>, x: f64, y: f64) -> Result<(f64, f64)> {
    let v = m * Vector3::new(x, y, 1.0);
    if v.z.abs() < MIN_WEIGHT {
        return Err(FusionError::calibration(format!(
            "point ({x}, {y}) maps to infinity"
        )));
    }
    Ok((v.x / v.z, v.y / v.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_scaling_matrix() {
        let h = Homography::from_matrix([[0.01, 0.0, 0.0], [0.0, 0.01, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        let p = h.to_floor(PixelPoint::new(400.0, 300.0)).unwrap();
        assert!(close(p.x, 4.0) && close(p.y, 3.0));

        let back = h.to_pixel(p).unwrap();
        assert!(close(back.x, 400.0) && close(back.y, 300.0));
    }

    #[test]
    fn test_matrix_is_normalised() {
        let h = Homography::from_matrix([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]])
            .unwrap();
        assert_eq!(h.matrix()[2][2], 1.0);
        assert_eq!(h.matrix()[0][0], 1.0);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let err = Homography::from_matrix([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(err, Err(FusionError::Calibration(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = Homography::from_matrix([[f64::NAN, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(err, Err(FusionError::Calibration(_))));
    }

    #[test]
    fn test_from_correspondences() {
        // Reference points of a ceiling-mounted camera and their floor-plan positions.
        let pixel = [
            PixelPoint::new(634.0, 120.0),
            PixelPoint::new(2086.0, 150.0),
            PixelPoint::new(2104.0, 1296.0),
            PixelPoint::new(600.0, 1302.0),
        ];
        let floor = [
            FloorPoint::new(30.0, 38.0),
            FloorPoint::new(765.0, 38.0),
            FloorPoint::new(766.0, 844.0),
            FloorPoint::new(29.0, 847.0),
        ];
        let h = Homography::from_correspondences(&pixel, &floor).unwrap();
        for (p, f) in pixel.iter().zip(floor.iter()) {
            let mapped = h.to_floor(*p).unwrap();
            assert!((mapped.x - f.x).abs() < 1e-6, "{mapped:?} vs {f:?}");
            assert!((mapped.y - f.y).abs() < 1e-6, "{mapped:?} vs {f:?}");
        }
    }

    #[test]
    fn test_collinear_correspondences_rejected() {
        let pixel = [
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(1.0, 1.0),
            PixelPoint::new(2.0, 2.0),
            PixelPoint::new(3.0, 3.0),
        ];
        let floor = [
            FloorPoint::new(0.0, 0.0),
            FloorPoint::new(1.0, 0.0),
            FloorPoint::new(1.0, 1.0),
            FloorPoint::new(0.0, 1.0),
        ];
        assert!(Homography::from_correspondences(&pixel, &floor).is_err());
    }

    #[test]
    fn test_point_at_infinity() {
        let h = Homography::from_matrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 1.0]])
            .unwrap();
        assert!(h.to_floor(PixelPoint::new(-1.0, 5.0)).is_err());
    }
}
