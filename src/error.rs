use crate::quadruped::LegId;
use std::result::Result;
use thiserror::Error;

pub type VegaResult<T> = Result<T, VegaError>;

#[derive(Error, Debug)]
pub enum VegaError {
    #[error("foot position unreachable for {leg} leg")]
    UnreachablePosition { leg: LegId },

    #[error("servo bus transport error")]
    Transport(#[from] std::io::Error),
    #[error("serial port error")]
    SerialPort(#[from] serialport::Error),
    #[error("malformed servo bus response")]
    MalformedResponse,

    #[error("IMU bus error")]
    I2c(#[from] i2cdev::linux::LinuxI2CError),
    #[error("IMU error: {0}")]
    Imu(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("scheduler is not running")]
    SchedulerStopped,
}
