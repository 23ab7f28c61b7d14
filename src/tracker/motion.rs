//! Constant-velocity Kalman filter over a track's box center.
//!
//! State is `[x, y, vx, vy]` in pixels and pixels per frame. Noise is scaled
//! by the box height so that near and far carriers are treated alike.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub mean: Vector4<f64>,
    pub covariance: Matrix4<f64>,
}

impl MotionState {
    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.mean[0], self.mean[1])
    }

    #[inline]
    pub fn velocity(&self) -> (f64, f64) {
        (self.mean[2], self.mean[3])
    }
}

#[derive(Debug, Clone)]
pub struct MotionModel {
    transition: Matrix4<f64>,
    observation: Matrix2x4<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionModel {
    pub fn new() -> Self {
        #[rustfmt::skip]
        let transition = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let observation = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );
        Self {
            transition,
            observation,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start a track at `position` with zero velocity.
    pub fn initiate(&self, position: (f64, f64), scale: f64) -> MotionState {
        let scale = scale.max(1.0);
        let pos = 2.0 * self.std_weight_position * scale;
        let vel = 10.0 * self.std_weight_velocity * scale;
        MotionState {
            mean: Vector4::new(position.0, position.1, 0.0, 0.0),
            covariance: Matrix4::from_diagonal(&Vector4::new(
                pos * pos,
                pos * pos,
                vel * vel,
                vel * vel,
            )),
        }
    }

    /// Advance one frame.
    pub fn predict(&self, state: &MotionState, scale: f64) -> MotionState {
        let scale = scale.max(1.0);
        let pos = self.std_weight_position * scale;
        let vel = self.std_weight_velocity * scale;
        let process_noise =
            Matrix4::from_diagonal(&Vector4::new(pos * pos, pos * pos, vel * vel, vel * vel));

        MotionState {
            mean: self.transition * state.mean,
            covariance: self.transition * state.covariance * self.transition.transpose()
                + process_noise,
        }
    }

    /// Fold a measured box center into the state.
    pub fn update(&self, state: &MotionState, measurement: (f64, f64), scale: f64) -> MotionState {
        let scale = scale.max(1.0);
        let pos = self.std_weight_position * scale;
        let measurement_noise = Matrix2::from_diagonal(&Vector2::new(pos * pos, pos * pos));

        let innovation_cov =
            self.observation * state.covariance * self.observation.transpose() + measurement_noise;
        let Some(innovation_inv) = innovation_cov.try_inverse() else {
            // Degenerate covariance: trust the measurement outright.
            let mut mean = state.mean;
            mean[0] = measurement.0;
            mean[1] = measurement.1;
            return MotionState {
                mean,
                covariance: state.covariance,
            };
        };

        let gain = state.covariance * self.observation.transpose() * innovation_inv;
        let innovation = Vector2::new(measurement.0, measurement.1) - self.observation * state.mean;

        MotionState {
            mean: state.mean + gain * innovation,
            covariance: state.covariance - gain * innovation_cov * gain.transpose(),
        }
    }
}
