use crate::configuration::{NamedPosture, SharedRuntimeState, Tilt, TiltAxis, VegaConfig};
use crate::error::{VegaError, VegaResult};
use crate::gaits::Gait;
use crate::imu::Orientation;
use crate::pose_controller::{PoseController, DEFAULT_MOVE_DURATION};
use crate::quadruped::LegFlags;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::*;

const DEMO_HOLD: Duration = Duration::from_secs(2);
const VOLTAGE_LOG_PERIOD: Duration = Duration::from_secs(60);
const LEVEL_SETTLE_AFTER_READY: Duration = Duration::from_millis(200);

/// High-level locomotion intents accepted from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveIntent {
    Stop,
    Forward,
    ForwardLt,
    ForwardRt,
    Backward,
    BackwardLt,
    BackwardRt,
    Left,
    Right,
    TrotInPlace,
}

/// Snapshot returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct RobotStats {
    pub euler: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub angular_acceleration: [f32; 3],
    pub angles_deg: [[f32; 3]; 4],
    pub positions: [[f32; 3]; 4],
    pub offsets: [[f32; 3]; 4],
    pub tilt: Tilt,
    pub height: f32,
    pub moving: bool,
    pub intent: Option<MoveIntent>,
}

enum SchedulerCommand {
    SetPose {
        posture: NamedPosture,
        reply: oneshot::Sender<VegaResult<()>>,
    },
    ProcessMove {
        intent: MoveIntent,
        reply: oneshot::Sender<VegaResult<()>>,
    },
    Level {
        reply: oneshot::Sender<VegaResult<[[f32; 3]; 4]>>,
    },
    AdjustOffsets {
        delta: Vector3<f32>,
        group: LegFlags,
    },
    ResetOffsets,
    SetTilt {
        axis: TiltAxis,
        degrees: f32,
        reply: oneshot::Sender<VegaResult<()>>,
    },
    GetStats {
        reply: oneshot::Sender<RobotStats>,
    },
    Demo {
        reply: oneshot::Sender<VegaResult<()>>,
    },
    Shutdown,
}

/// Handle to the control loop task. This is the whole command surface an
/// external adaptor (HTTP, UI, remote) talks to.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    join_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(
        config: Arc<VegaConfig>,
        runtime: SharedRuntimeState,
        pose_controller: PoseController,
        orientation: watch::Receiver<Orientation>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler_loop =
            SchedulerLoop::new(config, runtime, pose_controller, orientation, receiver);
        let join_handle = tokio::spawn(scheduler_loop.run());
        Self {
            commands: sender,
            join_handle: Some(join_handle),
        }
    }

    pub async fn set_pose(&self, posture: NamedPosture) -> VegaResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::SetPose { posture, reply })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)?
    }

    pub async fn process_move(&self, intent: MoveIntent) -> VegaResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::ProcessMove { intent, reply })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)?
    }

    pub async fn stop(&self) -> VegaResult<()> {
        self.process_move(MoveIntent::Stop).await
    }

    /// Runs auto-level and returns the resulting position offsets.
    pub async fn level(&self) -> VegaResult<[[f32; 3]; 4]> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::Level { reply })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)?
    }

    pub fn adjust_offsets(&self, delta: Vector3<f32>, group: LegFlags) -> VegaResult<()> {
        self.send(SchedulerCommand::AdjustOffsets { delta, group })
    }

    pub fn reset_offsets(&self) -> VegaResult<()> {
        self.send(SchedulerCommand::ResetOffsets)
    }

    pub async fn set_tilt(&self, axis: TiltAxis, degrees: f32) -> VegaResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::SetTilt {
            axis,
            degrees,
            reply,
        })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)?
    }

    pub async fn get_stats(&self) -> VegaResult<RobotStats> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::GetStats { reply })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)
    }

    pub async fn demo(&self) -> VegaResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SchedulerCommand::Demo { reply })?;
        response.await.map_err(|_| VegaError::SchedulerStopped)?
    }

    /// Stops the loop and waits for the safe-posture write. Idempotent.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(SchedulerCommand::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            if let Err(error) = handle.await {
                error!(%error, "scheduler task failed to join");
            }
        }
    }

    fn send(&self, command: SchedulerCommand) -> VegaResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VegaError::SchedulerStopped)
    }
}

enum MoveState {
    Idle,
    Moving { intent: MoveIntent, gait: Gait },
}

struct SchedulerLoop {
    config: Arc<VegaConfig>,
    runtime: SharedRuntimeState,
    pose: PoseController,
    orientation: watch::Receiver<Orientation>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    state: MoveState,
    period: Duration,
    running: bool,
    last_voltage_log: Instant,
}

impl SchedulerLoop {
    fn new(
        config: Arc<VegaConfig>,
        runtime: SharedRuntimeState,
        pose: PoseController,
        orientation: watch::Receiver<Orientation>,
        commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    ) -> Self {
        let period = Duration::from_secs_f32(1.0 / config.base.control_rate_hz.max(1.0));
        Self {
            config,
            runtime,
            pose,
            orientation,
            commands,
            state: MoveState::Idle,
            period,
            running: true,
            last_voltage_log: Instant::now(),
        }
    }

    async fn run(mut self) {
        info!("Starting scheduler loop");
        if let Err(error) = self.pose.startup() {
            warn!(%error, "startup posture write failed");
        }
        if self.config.leveling.auto_level {
            match self.auto_level().await {
                Ok(offsets) => info!(?offsets, "startup auto-level finished"),
                Err(error) => warn!(%error, "startup auto-level failed"),
            }
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.running {
            ticker.tick().await;
            let tick_start = Instant::now();
            self.drain_commands().await;
            if !self.running {
                break;
            }
            self.tick();
            // measure battery only when not walking
            if matches!(self.state, MoveState::Idle)
                && self.last_voltage_log.elapsed() > VOLTAGE_LOG_PERIOD
            {
                self.last_voltage_log = Instant::now();
                match self.pose.battery_voltage() {
                    Ok(voltage) => debug!("battery voltage: {:.2} V", voltage),
                    Err(error) => warn!(%error, "failed to read battery voltage"),
                }
            }
            let elapsed = tick_start.elapsed();
            if elapsed > self.period {
                warn!(
                    ?elapsed,
                    "tick overran the control period, skipping to fresh data"
                );
            }
        }

        info!("Scheduler loop exiting");
        self.pose.shutdown();
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command).await;
        }
    }

    async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::SetPose { posture, reply } => {
                let _ = reply.send(self.set_pose(posture));
            }
            SchedulerCommand::ProcessMove { intent, reply } => {
                let _ = reply.send(self.process_move(intent));
            }
            SchedulerCommand::Level { reply } => {
                let _ = reply.send(self.auto_level().await);
            }
            SchedulerCommand::AdjustOffsets { delta, group } => {
                self.runtime.adjust_offsets(delta, group);
            }
            SchedulerCommand::ResetOffsets => {
                self.runtime.reset_offsets();
            }
            SchedulerCommand::SetTilt {
                axis,
                degrees,
                reply,
            } => {
                let _ = reply.send(self.runtime.set_tilt(axis, degrees));
            }
            SchedulerCommand::GetStats { reply } => {
                let _ = reply.send(self.stats());
            }
            SchedulerCommand::Demo { reply } => {
                let _ = reply.send(self.demo().await);
            }
            SchedulerCommand::Shutdown => {
                self.running = false;
            }
        }
    }

    /// One control tick: advance the active gait by one step.
    fn tick(&mut self) {
        let MoveState::Moving { gait, .. } = &mut self.state else {
            return;
        };
        let Some(positions) = gait.next() else {
            return;
        };
        match self.pose.move_to(&positions, self.period) {
            Ok(()) => {}
            Err(VegaError::UnreachablePosition { leg }) => {
                warn!(%leg, "gait emitted an unreachable foot position, tick dropped");
            }
            Err(error) => {
                warn!(%error, "gait tick failed");
            }
        }
    }

    fn set_pose(&mut self, posture: NamedPosture) -> VegaResult<()> {
        if matches!(self.state, MoveState::Moving { .. }) {
            info!("pose change preempts active gait");
            self.state = MoveState::Idle;
        }
        self.pose.move_to_posture(posture, DEFAULT_MOVE_DURATION)
    }

    fn process_move(&mut self, intent: MoveIntent) -> VegaResult<()> {
        if intent == MoveIntent::Stop {
            return self.stop();
        }
        if let MoveState::Moving {
            intent: current, ..
        } = &self.state
        {
            if *current == intent {
                return Ok(());
            }
        }
        let gait = self.build_gait(intent);
        info!(?intent, "starting gait");
        self.state = MoveState::Moving { intent, gait };
        Ok(())
    }

    fn stop(&mut self) -> VegaResult<()> {
        if matches!(self.state, MoveState::Moving { .. }) {
            info!("stopping gait");
        }
        self.state = MoveState::Idle;
        self.pose
            .move_to_posture(NamedPosture::Ready, DEFAULT_MOVE_DURATION)
    }

    fn build_gait(&self, intent: MoveIntent) -> Gait {
        let gaits = &self.config.gaits;
        let positioning = &self.config.positioning;
        let ready = self.config.posture(NamedPosture::Ready);
        let forward = ready.translated_all(Vector3::from(positioning.forward_offsets));
        let backward = ready.translated_all(Vector3::from(positioning.backward_offsets));
        let bias = gaits.turn.turn_bias.unwrap_or(0.7);
        match intent {
            MoveIntent::Forward => Gait::trot(forward, &gaits.trot, false, None),
            MoveIntent::ForwardLt => Gait::trot(ready, &gaits.turn, false, Some(bias)),
            MoveIntent::ForwardRt => Gait::trot(ready, &gaits.turn, false, Some(-bias)),
            MoveIntent::Backward => Gait::trot(backward, &gaits.trot_reverse, true, None),
            MoveIntent::BackwardLt => Gait::trot(ready, &gaits.turn, true, Some(bias)),
            MoveIntent::BackwardRt => Gait::trot(ready, &gaits.turn, true, Some(-bias)),
            MoveIntent::Left => Gait::sidestep(ready, &gaits.sidestep, true),
            MoveIntent::Right => Gait::sidestep(ready, &gaits.sidestep, false),
            MoveIntent::TrotInPlace => Gait::trot_in_place(ready, &gaits.trot_in_place),
            // handled in process_move before gait construction
            MoveIntent::Stop => Gait::trot_in_place(ready, &gaits.trot_in_place),
        }
    }

    /// Closed-loop leveling: nudge per-leg z offsets until measured pitch
    /// and yaw sit inside the thresholds. On failure or IMU loss the
    /// offsets go back to their defaults and the body returns to READY, so
    /// the procedure never leaves the body half-adjusted.
    async fn auto_level(&mut self) -> VegaResult<[[f32; 3]; 4]> {
        if matches!(self.state, MoveState::Moving { .. }) {
            return Err(VegaError::InvalidRequest(
                "cannot auto-level while moving".to_owned(),
            ));
        }
        match self.try_level().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("auto-level did not converge, restoring default offsets");
                self.runtime.reset_offsets();
                self.pose.ready(DEFAULT_MOVE_DURATION)?;
            }
            Err(error) => {
                warn!(%error, "auto-level aborted, restoring default offsets");
                self.runtime.reset_offsets();
                self.pose.ready(DEFAULT_MOVE_DURATION)?;
            }
        }
        Ok(self.runtime.offsets().to_array())
    }

    async fn try_level(&mut self) -> VegaResult<bool> {
        let leveling = self.config.leveling.clone();
        let pitch_pattern = [1.0, -1.0, -1.0, 1.0];
        let yaw_pattern = [-1.0, -1.0, 1.0, 1.0];

        self.pose.ready(DEFAULT_MOVE_DURATION)?;
        tokio::time::sleep(LEVEL_SETTLE_AFTER_READY).await;

        for iteration in 0..leveling.max_iterations {
            let orientation = self.orientation.borrow().clone();
            if orientation.consecutive_failures >= leveling.max_imu_failures {
                return Err(VegaError::Imu(format!(
                    "{} consecutive IMU read failures",
                    orientation.consecutive_failures
                )));
            }
            let pitch = orientation.pitch();
            let yaw = orientation.yaw();
            if pitch.abs() <= leveling.pitch_threshold && yaw.abs() <= leveling.yaw_threshold {
                info!(iteration, pitch, yaw, "auto-level converged");
                return Ok(true);
            }

            let mut deltas = [0.0f32; 4];
            if pitch.abs() > leveling.pitch_threshold {
                for (delta, pattern) in deltas.iter_mut().zip(pitch_pattern) {
                    *delta += pattern * pitch.signum();
                }
            }
            if yaw.abs() > leveling.yaw_threshold {
                for (delta, pattern) in deltas.iter_mut().zip(yaw_pattern) {
                    *delta += pattern * yaw.signum();
                }
            }
            self.runtime.nudge_offsets_z(deltas);
            debug!(iteration, pitch, yaw, ?deltas, "auto-level nudging offsets");

            self.pose.ready(Duration::from_millis(10))?;
            tokio::time::sleep(Duration::from_millis(leveling.settle_ms)).await;
        }
        Ok(false)
    }

    /// Walks through the showcase postures with two second holds.
    async fn demo(&mut self) -> VegaResult<()> {
        if matches!(self.state, MoveState::Moving { .. }) {
            return Err(VegaError::InvalidRequest(
                "cannot run the demo while moving".to_owned(),
            ));
        }
        let sequence = [
            NamedPosture::Ready,
            NamedPosture::Crouch,
            NamedPosture::Ready,
            NamedPosture::Sit,
        ];
        for posture in sequence {
            let positions = self.config.posture(posture);
            self.pose.set_targets(&positions)?;
            self.pose.move_to_targets(DEFAULT_MOVE_DURATION)?;
            tokio::time::sleep(DEMO_HOLD).await;
        }
        Ok(())
    }

    fn stats(&mut self) -> RobotStats {
        let orientation = self.orientation.borrow().clone();
        let (offsets, tilt) = self.runtime.snapshot();
        let pose = self.pose.pose();
        let (moving, intent) = match &self.state {
            MoveState::Idle => (false, None),
            MoveState::Moving { intent, .. } => (true, Some(*intent)),
        };
        RobotStats {
            euler: orientation.euler.into(),
            angular_velocity: orientation.angular_velocity.into(),
            angular_acceleration: orientation.angular_acceleration.into(),
            angles_deg: pose.angles.to_degrees(),
            positions: pose.positions.to_array(),
            offsets: offsets.to_array(),
            tilt,
            height: pose.positions.mean_height(),
            moving,
            intent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::test_config;
    use crate::imu::Orientation;
    use crate::servo_bus::testing::{BusEvent, RecordingBus};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    struct TestRig {
        scheduler_loop: SchedulerLoop,
        log: Arc<Mutex<Vec<BusEvent>>>,
        orientation_sender: watch::Sender<Orientation>,
        command_sender: mpsc::UnboundedSender<SchedulerCommand>,
        runtime: SharedRuntimeState,
    }

    fn rig() -> TestRig {
        let config = Arc::new(test_config());
        let runtime = SharedRuntimeState::new(&config);
        let (bus, log) = RecordingBus::new();
        let pose = PoseController::new(config.clone(), runtime.clone(), Box::new(bus)).unwrap();
        let (orientation_sender, orientation_receiver) = watch::channel(Orientation::default());
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let scheduler_loop = SchedulerLoop::new(
            config,
            runtime.clone(),
            pose,
            orientation_receiver,
            command_receiver,
        );
        TestRig {
            scheduler_loop,
            log,
            orientation_sender,
            command_sender,
            runtime,
        }
    }

    fn move_durations(log: &Arc<Mutex<Vec<BusEvent>>>) -> Vec<Duration> {
        log.lock()
            .unwrap()
            .iter()
            .filter_map(BusEvent::move_duration)
            .collect()
    }

    #[tokio::test]
    async fn stop_empties_the_gait_before_the_next_tick() {
        let mut rig = rig();
        let period = rig.scheduler_loop.period;

        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        for _ in 0..5 {
            rig.scheduler_loop.tick();
        }
        assert_eq!(move_durations(&rig.log), vec![period; 5]);

        rig.scheduler_loop.process_move(MoveIntent::Stop).unwrap();
        rig.scheduler_loop.tick();
        rig.scheduler_loop.tick();

        let durations = move_durations(&rig.log);
        // exactly one READY command after the stop, no stray gait commands
        assert_eq!(durations.len(), 6);
        assert_eq!(durations[5], DEFAULT_MOVE_DURATION);
        assert!(matches!(rig.scheduler_loop.state, MoveState::Idle));
    }

    #[tokio::test]
    async fn reissuing_the_active_intent_is_a_no_op() {
        let mut rig = rig();
        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        rig.scheduler_loop.tick();
        rig.scheduler_loop.tick();
        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        rig.scheduler_loop.tick();

        // the gait kept its phase: three consecutive distinct steps
        let events = rig.log.lock().unwrap();
        let moves: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Move { targets, .. } => Some(targets.clone()),
                BusEvent::Unload(_) => None,
            })
            .collect();
        assert_eq!(moves.len(), 3);
        assert_ne!(moves[0], moves[1]);
        assert_ne!(moves[1], moves[2]);
    }

    #[tokio::test]
    async fn changing_intent_swaps_the_gait() {
        let mut rig = rig();
        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        rig.scheduler_loop.tick();
        rig.scheduler_loop.process_move(MoveIntent::Left).unwrap();
        let MoveState::Moving { intent, .. } = &rig.scheduler_loop.state else {
            panic!("expected to be moving");
        };
        assert_eq!(*intent, MoveIntent::Left);
    }

    #[tokio::test]
    async fn set_pose_preempts_an_active_gait() {
        let mut rig = rig();
        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        rig.scheduler_loop.set_pose(NamedPosture::Sit).unwrap();
        assert!(matches!(rig.scheduler_loop.state, MoveState::Idle));
        rig.scheduler_loop.tick();
        // only the posture write, the gait is gone
        assert_eq!(move_durations(&rig.log), vec![DEFAULT_MOVE_DURATION]);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_level_converges_against_a_synthetic_imu() {
        let mut rig = rig();
        let runtime = rig.runtime.clone();
        let sender = rig.orientation_sender;

        // synthetic IMU: pitch 2 degrees until the offsets reach
        // [+2, -2, -2, +2] in z, level afterwards
        tokio::spawn(async move {
            loop {
                let offsets = runtime.offsets().to_array();
                let reached = (offsets[0][2] - 2.0).abs() < 1e-3
                    && (offsets[1][2] + 2.0).abs() < 1e-3
                    && (offsets[2][2] + 2.0).abs() < 1e-3
                    && (offsets[3][2] - 2.0).abs() < 1e-3;
                let pitch = if reached { 0.0 } else { 2.0 };
                let mut orientation = Orientation::default();
                orientation.euler.y = pitch;
                if sender.send(orientation).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let offsets = rig.scheduler_loop.auto_level().await.unwrap();
        assert_relative_eq!(offsets[0][2], 2.0);
        assert_relative_eq!(offsets[1][2], -2.0);
        assert_relative_eq!(offsets[2][2], -2.0);
        assert_relative_eq!(offsets[3][2], 2.0);

        // converged in two nudges: READY + 2 fast adjustments
        let durations = move_durations(&rig.log);
        assert_eq!(
            durations,
            vec![
                DEFAULT_MOVE_DURATION,
                Duration::from_millis(10),
                Duration::from_millis(10),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_level_resets_offsets_when_it_cannot_converge() {
        let mut rig = rig();
        let mut stubborn = Orientation::default();
        stubborn.euler.y = 2.0;
        rig.orientation_sender.send(stubborn).unwrap();

        let offsets = rig.scheduler_loop.auto_level().await.unwrap();
        for leg in offsets {
            assert_relative_eq!(leg[2], 0.0);
        }
        // one READY at start, ten nudges, one READY restoring the stance
        let durations = move_durations(&rig.log);
        assert_eq!(durations.len(), 12);
        assert_eq!(durations[11], DEFAULT_MOVE_DURATION);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_level_aborts_after_consecutive_imu_failures() {
        let mut rig = rig();
        let mut dead = Orientation::default();
        dead.euler.y = 2.0;
        dead.consecutive_failures = 10;
        rig.orientation_sender.send(dead).unwrap();

        let offsets = rig.scheduler_loop.auto_level().await.unwrap();
        for leg in offsets {
            assert_relative_eq!(leg[2], 0.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_level_is_rejected_while_moving() {
        let mut rig = rig();
        rig.scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        let result = rig.scheduler_loop.auto_level().await;
        assert!(matches!(result, Err(VegaError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn demo_walks_the_posture_sequence() {
        let mut rig = rig();
        rig.scheduler_loop.demo().await.unwrap();
        let durations = move_durations(&rig.log);
        assert_eq!(durations, vec![DEFAULT_MOVE_DURATION; 4]);
    }

    #[tokio::test]
    async fn stats_reflect_the_latest_state() {
        let mut rig = rig();
        let mut orientation = Orientation::default();
        orientation.euler = Vector3::new(1.0, 2.0, 3.0);
        rig.orientation_sender.send(orientation).unwrap();
        rig.scheduler_loop
            .set_pose(NamedPosture::Ready)
            .unwrap();
        rig.scheduler_loop.process_move(MoveIntent::Right).unwrap();

        let stats = rig.scheduler_loop.stats();
        assert_eq!(stats.euler, [1.0, 2.0, 3.0]);
        assert!(stats.moving);
        assert_eq!(stats.intent, Some(MoveIntent::Right));
        assert_relative_eq!(stats.height, 216.0 * 0.65, epsilon = 1e-3);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"intent\":\"right\""));
    }

    #[tokio::test]
    async fn shutdown_command_stops_the_loop_and_sits() {
        let rig = rig();
        let TestRig {
            scheduler_loop,
            log,
            command_sender,
            orientation_sender: _orientation_sender,
            ..
        } = rig;
        command_sender.send(SchedulerCommand::Shutdown).unwrap();
        scheduler_loop.run().await;
        let events = log.lock().unwrap();
        assert!(matches!(events.last(), Some(BusEvent::Unload(_))));
    }

    #[tokio::test]
    async fn unreachable_gait_steps_drop_the_tick_and_continue() {
        let config = {
            let mut config = test_config();
            // a stride past the leg length makes part of the cycle unreachable
            config.gaits.trot.stride = 300.0;
            Arc::new(config)
        };
        let runtime = SharedRuntimeState::new(&config);
        let (bus, log) = RecordingBus::new();
        let pose = PoseController::new(config.clone(), runtime.clone(), Box::new(bus)).unwrap();
        let (_orientation_sender, orientation_receiver) = watch::channel(Orientation::default());
        let (_command_sender, command_receiver) = mpsc::unbounded_channel();
        let mut scheduler_loop = SchedulerLoop::new(
            config,
            runtime,
            pose,
            orientation_receiver,
            command_receiver,
        );

        scheduler_loop.process_move(MoveIntent::Forward).unwrap();
        for _ in 0..10 {
            scheduler_loop.tick();
        }
        // some steps are feasible, the unreachable ones were dropped
        let issued = move_durations(&log).len();
        assert!(issued > 0);
        assert!(issued < 10);
        assert!(matches!(
            scheduler_loop.state,
            MoveState::Moving { .. }
        ));
    }
}
