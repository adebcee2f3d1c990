use crate::error::{VegaError, VegaResult};
use crate::gaits::GaitParams;
use crate::quadruped::{LegFlags, LegPositions, PositionOffsets};
use config::Config;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::*;

/// Use default config if no path is provided
pub fn get_configuration(config: &Option<PathBuf>) -> Result<VegaConfig, anyhow::Error> {
    let settings = if let Some(config) = config {
        info!("Using configuration from {:?}", config);
        Config::builder()
            .add_source(config::Environment::with_prefix("VEGA"))
            .add_source(config::File::with_name(
                config
                    .to_str()
                    .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
            ))
            .build()?
    } else {
        info!("Using default configuration");
        Config::builder()
            .add_source(config::Environment::with_prefix("VEGA"))
            .add_source(config::File::with_name("config/settings"))
            .build()?
    };

    Ok(settings.try_deserialize()?)
}

#[derive(Deserialize, Debug, Clone)]
pub struct VegaConfig {
    pub base: BaseConfig,
    pub dimensions: DimensionsConfig,
    pub servos: ServosConfig,
    pub imu: ImuConfig,
    pub leveling: LevelingConfig,
    pub positioning: PositioningConfig,
    pub gaits: GaitsConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BaseConfig {
    pub serial_port: String,
    pub control_rate_hz: f32,
    pub imu_rate_hz: f32,
}

/// Body dimensions in millimetres.
#[derive(Deserialize, Debug, Clone)]
pub struct DimensionsConfig {
    pub robot_width: f32,
    pub robot_length: f32,
    pub coxa_length: f32,
    pub femur_length: f32,
    pub tibia_length: f32,
}

/// Servo addressing and per-joint calibration.
///
/// Ids are `10·leg + joint` with legs 1..4 in FR, FL, BL, BR order and
/// joints 1..3 from coxa to tibia. Zero angles and flip signs are
/// calibration data for one physical unit and always come from the config
/// file, never from code.
#[derive(Deserialize, Debug, Clone)]
pub struct ServosConfig {
    pub ids: [[u8; 3]; 4],
    pub zero_deg: [[f32; 3]; 4],
    pub flip: [[f32; 3]; 4],
}

impl Default for ServosConfig {
    fn default() -> Self {
        Self {
            ids: [[11, 12, 13], [21, 22, 23], [31, 32, 33], [41, 42, 43]],
            zero_deg: [
                [-2.0, 90.0, 30.0],
                [-2.0, 90.0, 30.0],
                [2.0, 90.0, 30.0],
                [2.0, 90.0, 30.0],
            ],
            flip: [
                [-1.0, 1.0, 1.0],
                [-1.0, -1.0, -1.0],
                [-1.0, -1.0, -1.0],
                [-1.0, 1.0, 1.0],
            ],
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ImuConfig {
    /// I2C device path; `None` runs with the fake level driver.
    pub device: Option<String>,
    #[serde(default = "default_imu_address")]
    pub address: u16,
    /// BNO055 axis remap tuple (x, y, z, x_sign, y_sign, z_sign). Consult
    /// section 3.4 of the datasheet before changing.
    pub axis_remap: Option<[u8; 6]>,
    #[serde(default)]
    pub offsets: ImuOffsets,
}

fn default_imu_address() -> u16 {
    0x28
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ImuOffsets {
    pub magnetic: Option<[i16; 3]>,
    pub gyro: Option<[i16; 3]>,
    pub acceleration: Option<[i16; 3]>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LevelingConfig {
    pub auto_level: bool,
    pub pitch_threshold: f32,
    pub yaw_threshold: f32,
    pub max_iterations: u32,
    pub max_imu_failures: u32,
    pub settle_ms: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            auto_level: false,
            pitch_threshold: 0.5,
            yaw_threshold: 0.5,
            max_iterations: 10,
            max_imu_failures: 10,
            settle_ms: 300,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PositioningConfig {
    pub ready_height_pct: f32,
    pub crouch_pct: f32,
    /// Per-leg x shift of the READY stance, biases weight fore or aft.
    pub ready_x_offsets: [f32; 4],
    /// Shift applied to the gait origin when walking forward.
    pub forward_offsets: [f32; 3],
    /// Shift applied to the gait origin when walking backward.
    pub backward_offsets: [f32; 3],
    pub default_offsets: [[f32; 3]; 4],
    pub tilt_limit_deg: f32,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self {
            ready_height_pct: 0.65,
            crouch_pct: 0.6,
            ready_x_offsets: [10.0; 4],
            forward_offsets: [0.0; 3],
            backward_offsets: [0.0; 3],
            default_offsets: [[0.0; 3]; 4],
            tilt_limit_deg: 50.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct GaitsConfig {
    pub trot: GaitParams,
    pub trot_reverse: GaitParams,
    pub sidestep: GaitParams,
    pub turn: GaitParams,
    pub walk: GaitParams,
    pub trot_in_place: GaitParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedPosture {
    Home,
    Ready,
    Crouch,
    Sit,
    Walk,
}

impl VegaConfig {
    /// Deterministic posture derivation from the body dimensions.
    pub fn posture(&self, posture: NamedPosture) -> LegPositions {
        let height = self.dimensions.femur_length + self.dimensions.tibia_length;
        let pct = self.positioning.ready_height_pct;
        match posture {
            NamedPosture::Home => LegPositions::same(Point3::new(0.0, 0.0, height)),
            NamedPosture::Ready => LegPositions::from_fn(|leg| {
                Point3::new(
                    self.positioning.ready_x_offsets[leg.index()],
                    0.0,
                    height * pct,
                )
            }),
            NamedPosture::Crouch => {
                let crouch_pct = self.positioning.crouch_pct;
                self.posture(NamedPosture::Ready)
                    .map(|_, position| Point3::from(position.coords * crouch_pct))
            }
            NamedPosture::Sit => {
                // front legs up, rear tucked
                let z_scale = [0.8, 0.8, 0.2, 0.2];
                let x_shift = [10.0, 10.0, -25.0, -35.0];
                LegPositions::from_fn(|leg| {
                    Point3::new(x_shift[leg.index()], 0.0, height * z_scale[leg.index()])
                })
            }
            NamedPosture::Walk => {
                let z_scale = [0.8, 0.8, 1.0, 1.0];
                LegPositions::from_fn(|leg| {
                    Point3::new(0.0, 0.0, height * pct * z_scale[leg.index()])
                })
            }
        }
    }

    pub fn default_offsets(&self) -> PositionOffsets {
        PositionOffsets::from_fn(|leg| {
            Vector3::from(self.positioning.default_offsets[leg.index()])
        })
    }
}

/// Body tilt intent in degrees, bounded by the configured slider range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Tilt {
    pub pitch_deg: f32,
    pub yaw_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiltAxis {
    Pitch,
    Yaw,
}

#[derive(Debug)]
struct RuntimeState {
    offsets: PositionOffsets,
    default_offsets: PositionOffsets,
    tilt: Tilt,
    tilt_limit_deg: f32,
}

/// The mutable slice of the configuration surface.
///
/// Written by the scheduler task (auto-level) and by the external request
/// handler; the mutex makes every snapshot a consistent 4×3 matrix. The
/// lock is never held across servo bus I/O.
#[derive(Debug, Clone)]
pub struct SharedRuntimeState {
    inner: Arc<Mutex<RuntimeState>>,
}

impl SharedRuntimeState {
    pub fn new(config: &VegaConfig) -> Self {
        let defaults = config.default_offsets();
        Self {
            inner: Arc::new(Mutex::new(RuntimeState {
                offsets: defaults.clone(),
                default_offsets: defaults,
                tilt: Tilt::default(),
                tilt_limit_deg: config.positioning.tilt_limit_deg,
            })),
        }
    }

    pub fn snapshot(&self) -> (PositionOffsets, Tilt) {
        let state = self.inner.lock().expect("runtime state lock poisoned");
        (state.offsets.clone(), state.tilt)
    }

    pub fn offsets(&self) -> PositionOffsets {
        self.inner
            .lock()
            .expect("runtime state lock poisoned")
            .offsets
            .clone()
    }

    pub fn tilt(&self) -> Tilt {
        self.inner.lock().expect("runtime state lock poisoned").tilt
    }

    pub fn adjust_offsets(&self, delta: Vector3<f32>, group: LegFlags) {
        let mut state = self.inner.lock().expect("runtime state lock poisoned");
        state.offsets = state.offsets.map(|leg, offset| {
            if group.contains(leg.as_flag()) {
                offset + delta
            } else {
                *offset
            }
        });
    }

    /// Per-leg z nudge used by the auto-level procedure.
    pub fn nudge_offsets_z(&self, deltas: [f32; 4]) {
        let mut state = self.inner.lock().expect("runtime state lock poisoned");
        state.offsets = state
            .offsets
            .map(|leg, offset| offset + Vector3::new(0.0, 0.0, deltas[leg.index()]));
    }

    pub fn reset_offsets(&self) {
        let mut state = self.inner.lock().expect("runtime state lock poisoned");
        state.offsets = state.default_offsets.clone();
    }

    pub fn set_tilt(&self, axis: TiltAxis, degrees: f32) -> VegaResult<()> {
        let mut state = self.inner.lock().expect("runtime state lock poisoned");
        if degrees.abs() > state.tilt_limit_deg {
            return Err(VegaError::InvalidRequest(format!(
                "tilt of {} degrees exceeds the {} degree limit",
                degrees, state.tilt_limit_deg
            )));
        }
        match axis {
            TiltAxis::Pitch => state.tilt.pitch_deg = degrees,
            TiltAxis::Yaw => state.tilt.yaw_deg = degrees,
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> VegaConfig {
    VegaConfig {
        base: BaseConfig {
            serial_port: "/dev/null".to_owned(),
            control_rate_hz: 30.0,
            imu_rate_hz: 20.0,
        },
        dimensions: DimensionsConfig {
            robot_width: 142.0,
            robot_length: 223.0,
            coxa_length: 53.0,
            femur_length: 102.0,
            tibia_length: 114.0,
        },
        servos: ServosConfig::default(),
        imu: ImuConfig {
            device: None,
            address: 0x28,
            axis_remap: None,
            offsets: ImuOffsets::default(),
        },
        leveling: LevelingConfig::default(),
        positioning: PositioningConfig::default(),
        gaits: GaitsConfig {
            trot: GaitParams::new(40.0, 60.0, 15.0),
            trot_reverse: GaitParams::new(40.0, 60.0, 15.0),
            sidestep: GaitParams::new(25.0, 30.0, 15.0),
            turn: GaitParams::new(20.0, 60.0, 10.0).with_turn_bias(0.7),
            walk: GaitParams::new(50.0, 50.0, 15.0),
            trot_in_place: GaitParams::new(0.0, 40.0, 25.0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    #[test]
    fn default_config_deserializes() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        builder.try_deserialize::<VegaConfig>().unwrap();
    }

    #[test]
    fn home_posture_is_fully_stretched() {
        let config = test_config();
        let home = config.posture(NamedPosture::Home);
        for leg in home.all_legs() {
            assert_relative_eq!(leg.x, 0.0);
            assert_relative_eq!(leg.y, 0.0);
            assert_relative_eq!(leg.z, 216.0);
        }
    }

    #[test]
    fn ready_posture_scales_height_and_shifts_stance() {
        let config = test_config();
        let ready = config.posture(NamedPosture::Ready);
        for leg in ready.all_legs() {
            assert_relative_eq!(leg.x, 10.0);
            assert_relative_eq!(leg.z, 216.0 * 0.65);
        }
    }

    #[test]
    fn sit_posture_tucks_the_rear() {
        let config = test_config();
        let sit = config.posture(NamedPosture::Sit);
        assert_relative_eq!(sit.front_right().z, 216.0 * 0.8);
        assert_relative_eq!(sit.front_left().z, 216.0 * 0.8);
        assert_relative_eq!(sit.back_left().z, 216.0 * 0.2);
        assert_relative_eq!(sit.back_right().z, 216.0 * 0.2);
        assert_relative_eq!(sit.front_right().x, 10.0);
        assert_relative_eq!(sit.back_left().x, -25.0);
        assert_relative_eq!(sit.back_right().x, -35.0);
    }

    #[test]
    fn walk_posture_drops_the_front() {
        let config = test_config();
        let walk = config.posture(NamedPosture::Walk);
        assert_relative_eq!(walk.front_right().z, 216.0 * 0.65 * 0.8);
        assert_relative_eq!(walk.back_left().z, 216.0 * 0.65);
    }

    #[test]
    fn crouch_scales_ready() {
        let config = test_config();
        let ready = config.posture(NamedPosture::Ready);
        let crouch = config.posture(NamedPosture::Crouch);
        assert_relative_eq!(crouch.front_right().z, ready.front_right().z * 0.6);
    }

    #[test]
    fn adjust_offsets_touches_only_the_group() {
        let config = test_config();
        let runtime = SharedRuntimeState::new(&config);
        runtime.adjust_offsets(Vector3::new(0.0, 0.0, 5.0), LegFlags::FRONT);
        let offsets = runtime.offsets();
        assert_relative_eq!(offsets.front_right().z, 5.0);
        assert_relative_eq!(offsets.front_left().z, 5.0);
        assert_relative_eq!(offsets.back_left().z, 0.0);
        assert_relative_eq!(offsets.back_right().z, 0.0);
        runtime.reset_offsets();
        assert_eq!(runtime.offsets(), PositionOffsets::zeros());
    }

    #[test]
    fn tilt_outside_the_slider_range_is_rejected() {
        let config = test_config();
        let runtime = SharedRuntimeState::new(&config);
        assert!(runtime.set_tilt(TiltAxis::Yaw, 30.0).is_ok());
        assert!(runtime.set_tilt(TiltAxis::Yaw, 51.0).is_err());
        assert_relative_eq!(runtime.tilt().yaw_deg, 30.0);
        assert!(runtime.set_tilt(TiltAxis::Pitch, -50.0).is_ok());
        assert_relative_eq!(runtime.tilt().pitch_deg, -50.0);
    }
}
