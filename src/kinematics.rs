use crate::configuration::DimensionsConfig;
use crate::error::{VegaError, VegaResult};
use crate::quadruped::{JointAngles, JointTriple, LegId, LegPositions};
use nalgebra::Point3;

/// Closed-form solvers for one leg plus whole-body tilt compensation.
///
/// A leg is a planar two-link arm (femur, tibia) in the x–z plane. The coxa
/// rotates that plane about the z axis, so a lateral y component lifts the
/// plane out of x–z. All positions are body-frame millimetres, +x forward,
/// +y left, +z up (z > 0 means the hip is above the foot).
#[derive(Debug, Clone)]
pub struct Kinematics {
    femur: f32,
    tibia: f32,
    width: f32,
    length: f32,
}

impl Kinematics {
    pub fn new(dimensions: &DimensionsConfig) -> Self {
        Self {
            femur: dimensions.femur_length,
            tibia: dimensions.tibia_length,
            width: dimensions.robot_width,
            length: dimensions.robot_length,
        }
    }

    /// Fully stretched leg length, the z coordinate of the HOME posture.
    pub fn max_height(&self) -> f32 {
        self.femur + self.tibia
    }

    /// Inverse kinematics for a single leg.
    ///
    /// Fails when the target lies outside the reachable annulus
    /// |femur − tibia| ≤ √(x² + z²) ≤ femur + tibia.
    pub fn leg_ik(&self, leg: LegId, target: &Point3<f32>) -> VegaResult<JointTriple<f32>> {
        // negated x converts body frame forward into the leg-local chain direction
        let x = -target.x;
        let y = target.y;
        let z = target.z;

        let reach = (x * x + z * z).sqrt();
        if reach > self.femur + self.tibia || reach < (self.femur - self.tibia).abs() {
            return Err(VegaError::UnreachablePosition { leg });
        }

        let cos_q2 = (reach * reach - self.femur.powi(2) - self.tibia.powi(2))
            / (2.0 * self.femur * self.tibia);
        let q2 = cos_q2.clamp(-1.0, 1.0).acos();
        let q1 = z.atan2(x) - (self.tibia * q2.sin()).atan2(self.femur + self.tibia * q2.cos());
        let q0 = y.atan2(z);

        Ok(JointTriple::new(q0, q1, q2))
    }

    /// Forward kinematics for a single leg.
    ///
    /// Total. Returns the planar solution; the coxa angle only shifts the
    /// plane and is discarded.
    pub fn leg_fk(&self, angles: &JointTriple<f32>) -> Point3<f32> {
        let q1 = angles.femur();
        let q2 = angles.tibia();
        let x = self.femur * q1.cos() + self.tibia * (q1 + q2).cos();
        let z = self.femur * q1.sin() + self.tibia * (q1 + q2).sin();
        Point3::new(-x, 0.0, z)
    }

    pub fn ik(&self, positions: &LegPositions) -> VegaResult<JointAngles> {
        Ok(JointAngles::new(
            self.leg_ik(LegId::FrontRight, positions.front_right())?,
            self.leg_ik(LegId::FrontLeft, positions.front_left())?,
            self.leg_ik(LegId::BackLeft, positions.back_left())?,
            self.leg_ik(LegId::BackRight, positions.back_right())?,
        ))
    }

    pub fn fk(&self, angles: &JointAngles) -> LegPositions {
        angles.map(|_, joint_angles| self.leg_fk(joint_angles))
    }

    /// Small-angle body rotation expressed as per-leg z shifts.
    ///
    /// Positive yaw pitches the nose up along the body length, positive
    /// pitch rolls the body clockwise across its width. The feet stay put in
    /// x and y; only the commanded hip heights change.
    pub fn body_tilt(
        &self,
        positions: &LegPositions,
        pitch_deg: f32,
        yaw_deg: f32,
    ) -> LegPositions {
        let zx = self.length / 2.0 * yaw_deg.to_radians().sin();
        let zy = self.width / 2.0 * pitch_deg.to_radians().sin();
        // front legs ride the yaw shift, right legs the pitch shift
        let yaw_pattern = [1.0, 1.0, -1.0, -1.0];
        let pitch_pattern = [1.0, -1.0, -1.0, 1.0];
        positions.map(|leg, position| {
            let shift = zx * yaw_pattern[leg.index()] + zy * pitch_pattern[leg.index()];
            Point3::new(position.x, position.y, position.z + shift)
        })
    }
}
