#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library for 2D rigid-transform algebra."]
#![doc = ""]
#![doc = "This crate provides planar poses with frame composition and inversion,"]
#![doc = "relative poses between frames, polar conversion and pose integration."]

use core::f64::consts::PI;
use core::fmt;
use libm::{atan2, cos, fabs, hypot, sin};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::GeometryError;

/// A 2‑D pose `(x, y, θ)` in meters and radians (θ measured counter‑clockwise
/// from the x‑axis of the parent frame).
///
/// A pose doubles as a rigid transform from its own frame into its parent
/// frame, which is what [`Pose::compose`], [`Pose::inverse`] and
/// [`Pose::relative`] operate on.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// Parent‑frame x position (m).
    pub x: f64,
    /// Parent‑frame y position (m).
    pub y: f64,
    /// Heading (rad).
    pub theta: f64,
}

impl Pose {
    /// Construct a new pose.
    ///
    /// # Arguments
    ///
    /// * `x`: Parent-frame x position in meters.
    /// * `y`: Parent-frame y position in meters.
    /// * `theta`: Heading in radians.
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }

    /// The identity transform: zero position, zero heading.
    pub const fn identity() -> Self {
        Pose::new(0.0, 0.0, 0.0)
    }

    /// Construct a pose from untrusted values.
    ///
    /// # Errors
    ///
    /// Returns `Err(GeometryError::NonFiniteValue)` if any component is NaN or infinite.
    pub fn checked(x: f64, y: f64, theta: f64) -> Result<Self, GeometryError> {
        if !(x.is_finite() && y.is_finite() && theta.is_finite()) {
            return Err(GeometryError::NonFiniteValue("pose components must be finite"));
        }
        Ok(Pose::new(x, y, Pose::normalize_angle(theta)))
    }

    /// Construct a pose from a position and an orientation vector `[cos θ, sin θ]`.
    ///
    /// The orientation vector does not need to be unit length.
    ///
    /// # Errors
    ///
    /// Returns `Err(GeometryError::NonFiniteValue)` if any value is NaN or infinite.
    /// Returns `Err(GeometryError::DegenerateOrientation)` if the orientation vector is zero.
    pub fn from_orientation(position: [f64; 2], orientation: [f64; 2]) -> Result<Self, GeometryError> {
        if !orientation.iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFiniteValue("orientation must be finite"));
        }
        if hypot(orientation[0], orientation[1]) == 0.0 {
            return Err(GeometryError::DegenerateOrientation("orientation vector is zero"));
        }
        Pose::checked(position[0], position[1], atan2(orientation[1], orientation[0]))
    }

    /// Unit orientation vector `[cos θ, sin θ]`.
    pub fn orientation(&self) -> [f64; 2] {
        [cos(self.theta), sin(self.theta)]
    }

    /// Normalize an angle to be within `(-PI, PI]`.
    ///
    /// Angles at `-PI` will be normalized to `PI`.
    ///
    /// # Arguments
    ///
    /// * `angle`: The angle in radians to normalize.
    ///
    /// # Returns
    ///
    /// The normalized angle in radians.
    pub fn normalize_angle(angle: f64) -> f64 {
        let a = angle % (2.0 * PI);
        if a > PI {
            a - 2.0 * PI
        } else if a <= -PI {
            a + 2.0 * PI
        } else {
            a
        }
    }

    /// Distance of the position from the frame origin.
    pub fn norm(&self) -> f64 {
        hypot(self.x, self.y)
    }

    /// Chain two transforms: `other` is expressed in `self`'s frame and the
    /// result is expressed in `self`'s parent frame.
    pub fn compose(&self, other: &Pose) -> Pose {
        let (c, s) = (cos(self.theta), sin(self.theta));
        Pose {
            x: self.x + c * other.x - s * other.y,
            y: self.y + s * other.x + c * other.y,
            theta: Pose::normalize_angle(self.theta + other.theta),
        }
    }

    /// The inverse transform, so that `p.compose(&p.inverse())` is the identity.
    pub fn inverse(&self) -> Pose {
        let (c, s) = (cos(self.theta), sin(self.theta));
        Pose {
            x: -c * self.x - s * self.y,
            y: s * self.x - c * self.y,
            theta: Pose::normalize_angle(-self.theta),
        }
    }

    /// Pose of `other` expressed in `self`'s frame.
    ///
    /// Both poses must share the same parent frame. `self.compose(&self.relative(b))`
    /// gives back `b`.
    pub fn relative(&self, other: &Pose) -> Pose {
        let (lx, ly) = self.to_local(other.x, other.y);
        Pose {
            x: lx,
            y: ly,
            theta: Pose::normalize_angle(other.theta - self.theta),
        }
    }

    /// Express a parent-frame point in this pose's frame.
    pub fn to_local(&self, x: f64, y: f64) -> (f64, f64) {
        let (c, s) = (cos(self.theta), sin(self.theta));
        let (dx, dy) = (x - self.x, y - self.y);
        (c * dx + s * dy, -s * dx + c * dy)
    }

    /// Express a point given in this pose's frame in the parent frame.
    pub fn to_parent(&self, x: f64, y: f64) -> (f64, f64) {
        let (c, s) = (cos(self.theta), sin(self.theta));
        (self.x + c * x - s * y, self.y + s * x + c * y)
    }

    /// Euclidean distance from this pose's position to a parent-frame point.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        hypot(x - self.x, y - self.y)
    }

    /// Bearing of a parent-frame point as seen from this pose, in `(-PI, PI]`.
    pub fn bearing_to(&self, x: f64, y: f64) -> f64 {
        let (lx, ly) = self.to_local(x, y);
        atan2(ly, lx)
    }

    /// The pose shifted by `distance` along its own heading.
    pub fn offset_forward(&self, distance: f64) -> Pose {
        Pose {
            x: self.x + distance * cos(self.theta),
            y: self.y + distance * sin(self.theta),
            theta: self.theta,
        }
    }

    /// Component-wise comparison with angle wrap-around.
    pub fn approx_eq(&self, other: &Pose, epsilon: f64) -> bool {
        fabs(self.x - other.x) < epsilon
            && fabs(self.y - other.y) < epsilon
            && fabs(Pose::normalize_angle(self.theta - other.theta)) < epsilon
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x: {:.2}, y: {:.2}, θ: {:.2} rad)", self.x, self.y, self.theta)
    }
}

/// Polar coordinates of a point in some frame.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Polar {
    /// Distance from the origin (m).
    pub range: f64,
    /// Angle from the x-axis (rad), in `(-PI, PI]`.
    pub bearing: f64,
}

impl Polar {
    /// Polar coordinates of the point `(x, y)`: `range = sqrt(x² + y²)`, `bearing = atan2(y, x)`.
    pub fn from_xy(x: f64, y: f64) -> Self {
        Polar {
            range: hypot(x, y),
            bearing: atan2(y, x),
        }
    }

    /// Polar coordinates of a pose's position.
    pub fn of(pose: &Pose) -> Self {
        Polar::from_xy(pose.x, pose.y)
    }
}

impl fmt::Display for Polar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(r: {:.2} m, φ: {:.2} rad)", self.range, self.bearing)
    }
}

/// Linear and angular chassis velocities.
/// These represent the overall motion of the robot's chassis.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisSpeeds {
    /// Forward speed of the chassis center (m/s).
    pub vx: f64,
    /// Lateral speed of the chassis center (m/s).
    pub vy: f64,
    /// Angular speed of the chassis (rad/s).
    pub omega: f64,
}

impl ChassisSpeeds {
    /// Construct chassis speeds.
    ///
    /// # Arguments
    ///
    /// * `vx`: Forward speed of the chassis center (m/s).
    /// * `vy`: Lateral speed of the chassis center (m/s).
    /// * `omega`: Angular speed of the chassis (rad/s).
    pub const fn new(vx: f64, vy: f64, omega: f64) -> Self {
        ChassisSpeeds { vx, vy, omega }
    }
}

impl fmt::Display for ChassisSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(vx: {:.2} m/s, vy: {:.2} m/s, ω: {:.2} rad/s)", self.vx, self.vy, self.omega)
    }
}

/// Updates a pose given constant chassis speeds applied for `dt` seconds.
///
/// The speeds are expressed in the robot frame at the start of the interval.
/// The final heading is normalized to `(-PI, PI]`.
///
/// # Arguments
///
/// * `current_pose`: The robot's current pose `(x, y, theta)`.
/// * `speeds`: The chassis speeds.
/// * `dt`: The time delta in seconds over which the speeds are applied.
///
/// # Errors
///
/// Returns `Err(GeometryError::NegativeTimeDelta)` if `dt` is negative.
pub fn integrate(current_pose: Pose, speeds: ChassisSpeeds, dt: f64) -> Result<Pose, GeometryError> {
    if dt < 0.0 {
        return Err(GeometryError::NegativeTimeDelta("must be non-negative"));
    }
    let step = Pose::new(speeds.vx * dt, speeds.vy * dt, speeds.omega * dt);
    Ok(current_pose.compose(&step))
}

#[cfg(test)]
mod tests {
    use super::*;
    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_angle_normalization() {
        assert!((Pose::normalize_angle(0.0) - 0.0).abs() < EPSILON);
        assert!((Pose::normalize_angle(PI) - PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-PI) - PI).abs() < EPSILON); // -PI maps to PI for (-PI, PI]
        assert!((Pose::normalize_angle(3.0 * PI) - PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(2.5 * PI) - 0.5 * PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-2.5 * PI) - -0.5 * PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-3.0 * PI) - PI).abs() < EPSILON);
        assert!((Pose::normalize_angle(-PI + 0.1) - (-PI + 0.1)).abs() < EPSILON);
    }

    #[test]
    fn test_relative_to_itself_is_identity() {
        let poses = [
            Pose::new(0.0, 0.0, 0.0),
            Pose::new(2.0, 1.0, PI / 2.0),
            Pose::new(-3.5, 0.25, -2.9),
            Pose::new(100.0, -42.0, PI),
        ];
        for pose in poses {
            let rel = pose.relative(&pose);
            assert!(rel.approx_eq(&Pose::identity(), EPSILON), "{rel}");
        }
    }

    #[test]
    fn test_compose_undoes_relative() {
        let a = Pose::new(1.0, -2.0, 0.7);
        let b = Pose::new(-0.5, 3.0, -2.2);
        let back = a.compose(&a.relative(&b));
        assert!(back.approx_eq(&b, 1e-9), "{back} != {b}");

        // relative applied twice is not an inverse of itself
        let twice = a.relative(&a.relative(&b));
        assert!(!twice.approx_eq(&b, 1e-3));
    }

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let p = Pose::new(0.3, 4.0, -1.1);
        assert!(p.compose(&p.inverse()).approx_eq(&Pose::identity(), EPSILON));
        assert!(p.inverse().compose(&p).approx_eq(&Pose::identity(), EPSILON));
    }

    #[test]
    fn test_relative_known_values() {
        // Frame at (2, 1) facing +y; a point 1 m further along +y is straight ahead.
        let frame = Pose::new(2.0, 1.0, PI / 2.0);
        let rel = frame.relative(&Pose::new(2.0, 2.0, PI / 2.0));
        assert!(rel.approx_eq(&Pose::new(1.0, 0.0, 0.0), EPSILON));

        // A point at +x of the world is to the right of the frame.
        let rel = frame.relative(&Pose::new(3.0, 1.0, 0.0));
        assert!(rel.approx_eq(&Pose::new(0.0, -1.0, -PI / 2.0), EPSILON));
    }

    #[test]
    fn test_local_and_parent_points_round_trip() {
        let frame = Pose::new(-1.0, 2.0, 2.0);
        let (lx, ly) = frame.to_local(0.5, 0.25);
        let (px, py) = frame.to_parent(lx, ly);
        assert!((px - 0.5).abs() < EPSILON);
        assert!((py - 0.25).abs() < EPSILON);
    }

    #[test]
    fn test_distance_and_bearing() {
        let robot = Pose::new(1.0, 1.0, PI / 2.0);
        assert!((robot.distance_to(1.0, 3.0) - 2.0).abs() < EPSILON);
        assert!(robot.bearing_to(1.0, 3.0).abs() < EPSILON);
        assert!((robot.bearing_to(0.0, 1.0) - PI / 2.0).abs() < EPSILON);
        assert!((robot.bearing_to(1.0, 0.0) - PI).abs() < EPSILON);
    }

    #[test]
    fn test_offset_forward() {
        let p = Pose::new(1.0, 0.0, PI).offset_forward(0.7);
        assert!(p.approx_eq(&Pose::new(0.3, 0.0, PI), EPSILON));
    }

    #[test]
    fn test_polar() {
        let polar = Polar::from_xy(-1.0, 1.0);
        assert!((polar.range - 2.0_f64.sqrt()).abs() < EPSILON);
        assert!((polar.bearing - 3.0 * PI / 4.0).abs() < EPSILON);

        // atan2 keeps the quadrant that y / x would lose
        let behind = Polar::from_xy(-1.0, -1.0);
        assert!((behind.bearing + 3.0 * PI / 4.0).abs() < EPSILON);
    }

    #[test]
    fn test_orientation_round_trip() {
        let p = Pose::new(0.5, -0.5, -2.5);
        let back = Pose::from_orientation([p.x, p.y], p.orientation()).unwrap();
        assert!(back.approx_eq(&p, EPSILON));
    }

    #[test]
    fn test_invalid_orientation() {
        assert!(matches!(
            Pose::from_orientation([0.0, 0.0], [0.0, 0.0]),
            Err(GeometryError::DegenerateOrientation(_))
        ));
        assert!(matches!(
            Pose::from_orientation([f64::NAN, 0.0], [1.0, 0.0]),
            Err(GeometryError::NonFiniteValue(_))
        ));
    }

    #[test]
    fn test_integrate_straight_with_initial_rotation() {
        let current_pose = Pose::new(1.0, 1.0, PI / 2.0); // At (1,1), facing along Y-axis
        let speeds = ChassisSpeeds::new(1.0, 0.0, 0.0);
        let new_pose = integrate(current_pose, speeds, 2.0).unwrap();
        assert!((new_pose.x - 1.0).abs() < EPSILON);
        assert!((new_pose.y - 3.0).abs() < EPSILON);
        assert!((new_pose.theta - PI / 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_integrate_pivot_turn() {
        let speeds = ChassisSpeeds::new(0.0, 0.0, PI / 2.0);
        let new_pose = integrate(Pose::identity(), speeds, 1.0).unwrap();
        assert!(new_pose.approx_eq(&Pose::new(0.0, 0.0, PI / 2.0), EPSILON));
    }

    #[test]
    fn test_integrate_negative_dt() {
        let result = integrate(Pose::identity(), ChassisSpeeds::new(1.0, 0.0, 0.0), -0.1);
        assert!(matches!(result, Err(GeometryError::NegativeTimeDelta("must be non-negative"))));
    }
}
