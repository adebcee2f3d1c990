use crate::configuration::ServosConfig;
use crate::error::{VegaError, VegaResult};
use crate::quadruped::{JointAngles, JointTriple, LegId, QuadrupedTypes};

/// Full mechanical range of the bus servos. Raw count 0 corresponds to
/// −120° from the calibrated zero, 1000 to +120°, 500 to the zero itself.
const SERVO_RANGE_RAD: f32 = 240.0 * std::f32::consts::PI / 180.0;
const SERVO_CENTER: i32 = 500;
const SERVO_MAX: i32 = 1000;

/// One raw position for one addressable servo.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ServoTarget {
    pub id: u8,
    pub count: u16,
}

impl ServoTarget {
    pub fn new(id: u8, count: u16) -> Self {
        Self { id, count }
    }
}

/// Result of encoding a full set of joint angles.
///
/// `saturated` is set when any joint clipped at the mechanical range. The
/// command is still usable; saturation indicates a geometry or calibration
/// mismatch upstream.
#[derive(Debug, Clone)]
pub struct EncodedCommand {
    pub targets: Vec<ServoTarget>,
    pub saturated: bool,
}

/// Maps joint angles to raw servo counts using per-joint calibration.
///
/// Calibration is a zero angle (radians) and a flip sign per joint, loaded
/// from configuration since the values differ per physical unit.
#[derive(Debug, Clone)]
pub struct ServoCodec {
    ids: QuadrupedTypes<JointTriple<u8>>,
    zero: JointAngles,
    flip: QuadrupedTypes<JointTriple<f32>>,
}

impl ServoCodec {
    pub fn new(config: &ServosConfig) -> VegaResult<Self> {
        for leg in &config.flip {
            for &flip in leg {
                if flip != 1.0 && flip != -1.0 {
                    return Err(VegaError::InvalidRequest(format!(
                        "servo flip must be 1 or -1, got {}",
                        flip
                    )));
                }
            }
        }
        let ids = QuadrupedTypes::from_fn(|leg| JointTriple::from_array(config.ids[leg.index()]));
        let zero = JointAngles::from_fn(|leg| {
            let [coxa, femur, tibia] = config.zero_deg[leg.index()];
            JointTriple::new(
                coxa.to_radians(),
                femur.to_radians(),
                tibia.to_radians(),
            )
        });
        let flip =
            QuadrupedTypes::from_fn(|leg| JointTriple::from_array(config.flip[leg.index()]));
        Ok(Self { ids, zero, flip })
    }

    /// All servo ids in canonical leg and joint order.
    pub fn ids(&self) -> [u8; 12] {
        let mut ids = [0u8; 12];
        for (leg_index, leg) in LegId::ALL.into_iter().enumerate() {
            let triple = self.ids.leg(leg).to_array();
            ids[leg_index * 3..leg_index * 3 + 3].copy_from_slice(&triple);
        }
        ids
    }

    pub fn encode(&self, angles: &JointAngles) -> EncodedCommand {
        let mut targets = Vec::with_capacity(12);
        let mut saturated = false;
        for leg in LegId::ALL {
            let ids = self.ids.leg(leg).to_array();
            let zero = self.zero.leg(leg).to_array();
            let flip = self.flip.leg(leg).to_array();
            let angles = angles.leg(leg).to_array();
            for joint in 0..3 {
                let (count, clipped) = count_from_angle(angles[joint], zero[joint], flip[joint]);
                saturated |= clipped;
                targets.push(ServoTarget::new(ids[joint], count));
            }
        }
        EncodedCommand { targets, saturated }
    }

    /// Inverse of [`encode`](Self::encode). Requires a count for every
    /// configured servo id.
    pub fn decode(&self, targets: &[ServoTarget]) -> VegaResult<JointAngles> {
        let mut angles = [[0f32; 3]; 4];
        for leg in LegId::ALL {
            let ids = self.ids.leg(leg).to_array();
            let zero = self.zero.leg(leg).to_array();
            let flip = self.flip.leg(leg).to_array();
            for joint in 0..3 {
                let target = targets
                    .iter()
                    .find(|target| target.id == ids[joint])
                    .ok_or(VegaError::MalformedResponse)?;
                angles[leg.index()][joint] =
                    angle_from_count(target.count, zero[joint], flip[joint]);
            }
        }
        Ok(JointAngles::from_array(angles))
    }
}

fn count_from_angle(angle: f32, zero: f32, flip: f32) -> (u16, bool) {
    let adjusted = (angle - zero) * flip;
    let count = (adjusted * 1000.0 / SERVO_RANGE_RAD).round() as i32 + SERVO_CENTER;
    let clipped = !(0..=SERVO_MAX).contains(&count);
    (count.clamp(0, SERVO_MAX) as u16, clipped)
}

fn angle_from_count(count: u16, zero: f32, flip: f32) -> f32 {
    (count as f32 - SERVO_CENTER as f32) * SERVO_RANGE_RAD / 1000.0 * flip + zero
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn codec() -> ServoCodec {
        ServoCodec::new(&ServosConfig::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_flip() {
        let mut config = ServosConfig::default();
        config.flip[2][1] = 0.0;
        assert!(ServoCodec::new(&config).is_err());
    }

    #[test]
    fn zero_angle_encodes_to_center() {
        let (count, clipped) = count_from_angle(0.5, 0.5, 1.0);
        assert_eq!(count, 500);
        assert!(!clipped);
    }

    #[test]
    fn range_limits_map_to_frame_limits() {
        let range = SERVO_RANGE_RAD;
        let (low, low_clipped) = count_from_angle(-range / 2.0, 0.0, 1.0);
        let (high, high_clipped) = count_from_angle(range / 2.0, 0.0, 1.0);
        assert_eq!(low, 0);
        assert_eq!(high, 1000);
        assert!(!low_clipped);
        assert!(!high_clipped);
    }

    #[test]
    fn flip_mirrors_the_count() {
        let (forward, _) = count_from_angle(0.3, 0.0, 1.0);
        let (mirrored, _) = count_from_angle(0.3, 0.0, -1.0);
        assert_eq!(forward - 500, 500 - mirrored);
    }

    #[test]
    fn out_of_range_angle_saturates() {
        let (count, clipped) = count_from_angle(3.0, 0.0, 1.0);
        assert_eq!(count, 1000);
        assert!(clipped);
        let (count, clipped) = count_from_angle(-3.0, 0.0, 1.0);
        assert_eq!(count, 0);
        assert!(clipped);
    }

    #[test]
    fn every_count_round_trips_exactly() {
        for count in 0..=1000u16 {
            let angle = angle_from_count(count, 0.2, -1.0);
            let (recovered, clipped) = count_from_angle(angle, 0.2, -1.0);
            assert_eq!(recovered, count);
            assert!(!clipped);
        }
    }

    #[test]
    fn full_command_round_trips() {
        let codec = codec();
        let angles = JointAngles::from_array([
            [0.0, 1.2, 0.6],
            [-0.1, 1.4, 0.4],
            [0.1, 1.3, 0.5],
            [0.0, 1.5, 0.7],
        ]);
        let encoded = codec.encode(&angles);
        assert_eq!(encoded.targets.len(), 12);
        assert!(!encoded.saturated);
        let decoded = codec.decode(&encoded.targets).unwrap();
        for (expected, actual) in angles.all_legs().iter().zip(decoded.all_legs()) {
            assert_relative_eq!(expected.coxa(), actual.coxa(), epsilon = 1e-2);
            assert_relative_eq!(expected.femur(), actual.femur(), epsilon = 1e-2);
            assert_relative_eq!(expected.tibia(), actual.tibia(), epsilon = 1e-2);
        }
    }

    #[test]
    fn decode_requires_every_servo() {
        let codec = codec();
        let encoded = codec.encode(&JointAngles::zeros());
        let partial = &encoded.targets[..11];
        assert!(matches!(
            codec.decode(partial),
            Err(VegaError::MalformedResponse)
        ));
    }

    #[test]
    fn ids_follow_leg_times_ten_plus_joint() {
        let codec = codec();
        assert_eq!(
            codec.ids(),
            [11, 12, 13, 21, 22, 23, 31, 32, 33, 41, 42, 43]
        );
    }
}
