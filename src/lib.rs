//! Motion control core of the Vega quadruped robot.
//!
//! Four legs with three serial-bus servos each, an IMU, and a fixed-rate
//! control loop that turns posture and locomotion intents into servo
//! command frames. The pipeline per tick: gait → position offsets and body
//! tilt → inverse kinematics → calibration codec → one framed bus command.

pub mod configuration;
pub mod error;
pub mod gaits;
pub mod imu;
pub mod kinematics;
pub mod logging;
pub mod pose_controller;
pub mod quadruped;
pub mod scheduler;
pub mod servo_bus;
pub mod servo_codec;
