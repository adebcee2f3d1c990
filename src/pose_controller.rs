use crate::configuration::{NamedPosture, SharedRuntimeState, VegaConfig};
use crate::error::{VegaError, VegaResult};
use crate::kinematics::Kinematics;
use crate::quadruped::{JointAngles, LegPositions};
use crate::servo_bus::ServoBus;
use crate::servo_codec::{EncodedCommand, ServoCodec};
use nalgebra::Point3;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

/// Duration of postural moves; gait ticks use the control-loop period so the
/// servos interpolate between consecutive commands themselves.
pub const DEFAULT_MOVE_DURATION: Duration = Duration::from_millis(800);

/// Snapshot of the commanded state of the body.
#[derive(Debug, Clone)]
pub struct Pose {
    pub positions: LegPositions,
    pub angles: JointAngles,
    pub target_positions: LegPositions,
    pub target_angles: JointAngles,
    pub last_command: Option<EncodedCommand>,
}

impl Pose {
    fn new() -> Self {
        let origin = LegPositions::same(Point3::origin());
        Self {
            positions: origin.clone(),
            angles: JointAngles::zeros(),
            target_positions: origin,
            target_angles: JointAngles::zeros(),
            last_command: None,
        }
    }
}

/// Fault counters kept across the life of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseFaults {
    pub unreachable: u64,
    pub saturated: u64,
    pub bus: u64,
}

/// Mediates every motion: applies offsets and tilt, runs IK, encodes and
/// dispatches to the servo bus, and maintains the pose snapshot.
pub struct PoseController {
    config: Arc<VegaConfig>,
    runtime: SharedRuntimeState,
    kinematics: Kinematics,
    codec: ServoCodec,
    bus: Box<dyn ServoBus>,
    pose: Pose,
    faults: PoseFaults,
}

impl PoseController {
    pub fn new(
        config: Arc<VegaConfig>,
        runtime: SharedRuntimeState,
        bus: Box<dyn ServoBus>,
    ) -> VegaResult<Self> {
        let kinematics = Kinematics::new(&config.dimensions);
        let codec = ServoCodec::new(&config.servos)?;
        Ok(Self {
            config,
            runtime,
            kinematics,
            codec,
            bus,
            pose: Pose::new(),
            faults: PoseFaults::default(),
        })
    }

    /// Reads back whatever the servos report, logs the battery level and
    /// settles the body into SIT before the control loop starts.
    pub fn startup(&mut self) -> VegaResult<()> {
        match self.bus.read_positions(&self.codec.ids()) {
            Ok(positions) if !positions.is_empty() => match self.codec.decode(&positions) {
                Ok(angles) => info!(angles = ?angles.to_degrees(), "servo positions at startup"),
                Err(_) => warn!("servo position readback did not cover every servo"),
            },
            Ok(_) => info!("no servo position data available"),
            Err(error) => warn!(%error, "failed to read servo positions at startup"),
        }
        match self.bus.voltage() {
            Ok(voltage) => info!("battery voltage: {:.2} V", voltage),
            Err(error) => warn!(%error, "failed to read battery voltage"),
        }
        self.move_to_posture(NamedPosture::Sit, DEFAULT_MOVE_DURATION)
    }

    /// Stores target positions and precomputes the target angles.
    pub fn set_targets(&mut self, positions: &LegPositions) -> VegaResult<()> {
        let angles = self.kinematics.ik(positions)?;
        self.pose.target_positions = positions.clone();
        self.pose.target_angles = angles;
        Ok(())
    }

    pub fn move_to_targets(&mut self, duration: Duration) -> VegaResult<()> {
        let target = self.pose.target_positions.clone();
        self.move_to(&target, duration)
    }

    /// The full command path. On per-leg IK failure the whole command is
    /// dropped and the pose snapshot stays where it was; on bus write
    /// failure the command is skipped and the fault recorded, which keeps
    /// the control loop alive through transient transport errors.
    pub fn move_to(&mut self, positions: &LegPositions, duration: Duration) -> VegaResult<()> {
        let (offsets, tilt) = self.runtime.snapshot();
        let tilted = self
            .kinematics
            .body_tilt(positions, tilt.pitch_deg, tilt.yaw_deg);
        let adjusted = tilted.translated(&offsets);

        let angles = match self.kinematics.ik(&adjusted) {
            Ok(angles) => angles,
            Err(error) => {
                self.faults.unreachable += 1;
                return Err(error);
            }
        };

        let encoded = self.codec.encode(&angles);
        if encoded.saturated {
            self.faults.saturated += 1;
            warn!("servo command saturated at the mechanical range");
        }

        if let Err(error) = self.bus.move_servos(&encoded.targets, duration) {
            self.faults.bus += 1;
            warn!(%error, "dropping servo command after bus write failure");
            return Ok(());
        }

        self.pose.positions = adjusted;
        self.pose.angles = angles;
        self.pose.last_command = Some(encoded);
        Ok(())
    }

    pub fn move_to_posture(&mut self, posture: NamedPosture, duration: Duration) -> VegaResult<()> {
        let positions = self.config.posture(posture);
        self.move_to(&positions, duration)
    }

    pub fn ready(&mut self, duration: Duration) -> VegaResult<()> {
        self.move_to_posture(NamedPosture::Ready, duration)
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn faults(&self) -> PoseFaults {
        self.faults
    }

    pub fn battery_voltage(&mut self) -> VegaResult<f32> {
        self.bus.voltage()
    }

    /// Best-effort safe posture and torque release. Idempotent; failures
    /// are logged and do not prevent process exit.
    pub fn shutdown(&mut self) {
        if let Err(error) = self.move_to_posture(NamedPosture::Sit, DEFAULT_MOVE_DURATION) {
            warn!(%error, "failed to reach safe posture during shutdown");
        }
        if let Err(error) = self.bus.unload(&self.codec.ids()) {
            warn!(%error, "failed to unload servos during shutdown");
        }
    }
}
