/**
 * Heading hold
 *
 * Discrete LQR on a two-state yaw model:
 *   x = [heading error, yaw rate]
 *   delta = -K x, clamped to +-25 degrees of rudder
 *
 * K comes from the discrete algebraic Riccati equation, solved once by
 * fixed-point iteration when the controller is built.
 */

use nalgebra::{Matrix2, Vector2};
use serde::Serialize;
use std::time::Instant;

pub const MAX_HOLD_RUDDER: f64 = 25.0;

const RICCATI_MAX_ITERATIONS: usize = 10_000;
const RICCATI_TOLERANCE: f64 = 1e-10;

/// Yaw dynamics and LQR weights identified for the hull.
#[derive(Debug, Clone, PartialEq)]
pub struct YawModel {
    pub a: Matrix2<f64>,
    pub b: Vector2<f64>,
    pub q: Matrix2<f64>,
    pub r: f64,
}

impl Default for YawModel {
    fn default() -> Self {
        Self {
            a: Matrix2::new(0.9521, 0.0479, 1.0, 0.0),
            b: Vector2::new(-0.2043, 0.0),
            q: Matrix2::new(5.0, 0.0, 0.0, 1.0),
            r: 23.0,
        }
    }
}

/// Solves P = Q + A'PA - A'PB (R + B'PB)^-1 B'PA by iteration from P = Q.
pub fn solve_dare(model: &YawModel) -> Matrix2<f64> {
    let (a, b, q, r) = (&model.a, &model.b, &model.q, model.r);
    let mut p = *q;

    for _ in 0..RICCATI_MAX_ITERATIONS {
        let pb = p * b;
        let s = r + b.dot(&pb);
        let at_pb = a.transpose() * pb;
        let next = q + a.transpose() * p * a - at_pb * at_pb.transpose() / s;

        let converged = (next - p).amax() < RICCATI_TOLERANCE;
        p = next;
        if converged {
            break;
        }
    }
    p
}

/// Feedback gain K = (R + B'PB)^-1 B'PA, as a row stored in a vector.
pub fn lqr_gain(model: &YawModel) -> Vector2<f64> {
    let p = solve_dare(model);
    let pb = p * model.b;
    let s = model.r + model.b.dot(&pb);
    model.a.transpose() * pb / s
}

/// Signed shortest turn from `current` to `target`, in [-180, 180).
pub fn heading_difference(current: f64, target: f64) -> f64 {
    (target - current + 180.0).rem_euclid(360.0) - 180.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadingCommand {
    pub rudder: i32,
    pub target_heading: f64,
    pub heading_error: f64,
}

pub struct HeadingHoldController {
    gain: Vector2<f64>,
    last_heading: Option<f64>,
    last_time: Instant,
}

impl Default for HeadingHoldController {
    fn default() -> Self {
        Self::new(&YawModel::default())
    }
}

impl HeadingHoldController {
    pub fn new(model: &YawModel) -> Self {
        let gain = lqr_gain(model);
        log::debug!("heading hold gain K = [{:.4}, {:.4}]", gain[0], gain[1]);
        Self {
            gain,
            last_heading: None,
            last_time: Instant::now(),
        }
    }

    pub fn gain(&self) -> Vector2<f64> {
        self.gain
    }

    /// Held target, if one has been latched.
    pub fn target(&self) -> Option<f64> {
        self.last_heading
    }

    /// Forgets the held target; the next update latches a new one.
    pub fn reset(&mut self) {
        self.last_heading = None;
    }

    /// Rudder angle that turns `current` towards `target`.
    pub fn rudder_command(&self, current: f64, target: f64, yaw_rate: f64) -> HeadingCommand {
        let heading_error = heading_difference(current, target);
        let x = Vector2::new(heading_error, yaw_rate);
        let delta = -self.gain.dot(&x);
        HeadingCommand {
            rudder: delta.clamp(-MAX_HOLD_RUDDER, MAX_HOLD_RUDDER) as i32,
            target_heading: target,
            heading_error,
        }
    }

    /// One control step at time `now`.
    ///
    /// The first call after a reset latches `current` as the target.
    pub fn update(&mut self, current: f64, now: Instant) -> HeadingCommand {
        let target = *self.last_heading.get_or_insert(current);

        let dt = now.saturating_duration_since(self.last_time).as_secs_f64();
        let yaw_rate = if dt > 0.0 { (current - target) / dt } else { 0.0 };

        let command = self.rudder_command(current, target, yaw_rate);
        self.last_time = now;
        log::info!(
            target: "helm::telemetry",
            "heading,{:.2},{:.2},{:.2},{}",
            target, current, command.heading_error, command.rudder
        );
        command
    }

    pub fn update_now(&mut self, current: f64) -> HeadingCommand {
        self.update(current, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_heading_difference_wraps() {
        assert_eq!(heading_difference(359.0, 10.0), 11.0);
        assert_eq!(heading_difference(10.0, 359.0), -11.0);
        assert_eq!(heading_difference(90.0, 90.0), 0.0);
        assert_eq!(heading_difference(0.0, 180.0), -180.0);
    }

    #[test]
    fn test_gain_matches_reference() {
        let k = lqr_gain(&YawModel::default());
        assert!((k[0] - (-0.46354)).abs() < 1e-4, "{}", k);
        assert!((k[1] - (-0.02231)).abs() < 1e-4, "{}", k);
    }

    #[test]
    fn test_riccati_fixed_point() {
        let model = YawModel::default();
        let p = solve_dare(&model);
        let pb = p * model.b;
        let s = model.r + model.b.dot(&pb);
        let at_pb = model.a.transpose() * pb;
        let rhs = model.q + model.a.transpose() * p * model.a - at_pb * at_pb.transpose() / s;
        assert!((rhs - p).amax() < 1e-6);
    }

    #[test]
    fn test_wrapped_command() {
        let controller = HeadingHoldController::default();
        let command = controller.rudder_command(359.0, 10.0, 0.0);
        assert_eq!(command.heading_error, 11.0);
        assert_eq!(command.rudder, 5);
        assert!(command.rudder.abs() <= 25);
    }

    #[test]
    fn test_command_is_clamped() {
        let controller = HeadingHoldController::default();
        assert_eq!(controller.rudder_command(0.0, 120.0, 0.0).rudder, 25);
        assert_eq!(controller.rudder_command(120.0, 0.0, 0.0).rudder, -25);
    }

    #[test]
    fn test_first_update_latches_target() {
        let mut controller = HeadingHoldController::default();
        let t0 = Instant::now();
        let first = controller.update(100.0, t0);
        assert_eq!(first.target_heading, 100.0);
        assert_eq!(first.rudder, 0);

        let second = controller.update(95.0, t0 + Duration::from_secs(1));
        assert_eq!(second.target_heading, 100.0);
        assert_eq!(second.heading_error, 5.0);
        //error 5, yaw rate -5 deg/s
        assert_eq!(second.rudder, 2);

        controller.reset();
        assert_eq!(controller.target(), None);
        assert_eq!(controller.update(42.0, t0 + Duration::from_secs(2)).target_heading, 42.0);
    }
}
