use crate::configuration::ImuConfig;
use crate::error::{VegaError, VegaResult};
use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use nalgebra::Vector3;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::*;

const REG_CHIP_ID: u8 = 0x00;
const REG_PAGE_ID: u8 = 0x07;
const REG_EULER_DATA: u8 = 0x1a;
const REG_CALIB_STAT: u8 = 0x35;
const REG_OPR_MODE: u8 = 0x3d;
const REG_PWR_MODE: u8 = 0x3e;
const REG_AXIS_MAP_CONFIG: u8 = 0x41;
const REG_AXIS_MAP_SIGN: u8 = 0x42;
const REG_ACCEL_OFFSETS: u8 = 0x55;
const REG_MAG_OFFSETS: u8 = 0x5b;
const REG_GYRO_OFFSETS: u8 = 0x61;

const CHIP_ID: u8 = 0xa0;
const MODE_CONFIG: u8 = 0x00;
const MODE_NDOF: u8 = 0x0c;
const POWER_NORMAL: u8 = 0x00;
// euler registers hold 1/16 degree per LSB
const EULER_SCALE: f32 = 16.0;

/// Latest orientation sample published by the reader task.
///
/// Angles are degrees, derivatives are per second. `consecutive_failures`
/// counts sensor reads that kept the previous sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Orientation {
    pub euler: Vector3<f32>,
    pub angular_velocity: Vector3<f32>,
    pub angular_acceleration: Vector3<f32>,
    pub consecutive_failures: u32,
}

impl Orientation {
    pub fn roll(&self) -> f32 {
        self.euler.x
    }

    pub fn pitch(&self) -> f32 {
        self.euler.y
    }

    pub fn yaw(&self) -> f32 {
        self.euler.z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationStatus {
    pub sys: u8,
    pub gyro: u8,
    pub accel: u8,
    pub mag: u8,
}

/// Blocking orientation sensor, configured once at init.
pub trait ImuDriver: Send {
    /// Euler angles (roll, pitch, yaw) in degrees after axis remap.
    fn read_euler(&mut self) -> VegaResult<(f32, f32, f32)>;
    fn read_calibration_status(&mut self) -> VegaResult<CalibrationStatus>;
}

/// BNO055 over Linux I2C.
pub struct Bno055 {
    device: LinuxI2CDevice,
}

impl Bno055 {
    pub fn open(path: &str, config: &ImuConfig) -> VegaResult<Self> {
        let mut device = LinuxI2CDevice::new(path, config.address)?;
        let chip = device.smbus_read_byte_data(REG_CHIP_ID)?;
        if chip != CHIP_ID {
            return Err(VegaError::Imu(format!(
                "unexpected chip id 0x{:02x} on {}",
                chip, path
            )));
        }
        let mut sensor = Self { device };
        sensor.configure(config)?;
        Ok(sensor)
    }

    fn configure(&mut self, config: &ImuConfig) -> VegaResult<()> {
        self.set_mode(MODE_CONFIG)?;
        self.device.smbus_write_byte_data(REG_PAGE_ID, 0)?;
        self.device
            .smbus_write_byte_data(REG_PWR_MODE, POWER_NORMAL)?;

        if let Some([x, y, z, x_sign, y_sign, z_sign]) = config.axis_remap {
            self.device
                .smbus_write_byte_data(REG_AXIS_MAP_CONFIG, (z << 4) | (y << 2) | x)?;
            self.device.smbus_write_byte_data(
                REG_AXIS_MAP_SIGN,
                (x_sign << 2) | (y_sign << 1) | z_sign,
            )?;
        }
        if let Some(offsets) = config.offsets.acceleration {
            self.write_offsets(REG_ACCEL_OFFSETS, offsets)?;
        }
        if let Some(offsets) = config.offsets.magnetic {
            self.write_offsets(REG_MAG_OFFSETS, offsets)?;
        }
        if let Some(offsets) = config.offsets.gyro {
            self.write_offsets(REG_GYRO_OFFSETS, offsets)?;
        }

        self.set_mode(MODE_NDOF)?;
        Ok(())
    }

    fn set_mode(&mut self, mode: u8) -> VegaResult<()> {
        self.device.smbus_write_byte_data(REG_OPR_MODE, mode)?;
        // mode switches need up to 19 ms per the datasheet
        thread::sleep(Duration::from_millis(25));
        Ok(())
    }

    fn write_offsets(&mut self, register: u8, offsets: [i16; 3]) -> VegaResult<()> {
        for (index, offset) in offsets.into_iter().enumerate() {
            let bytes = offset.to_le_bytes();
            let base = register + index as u8 * 2;
            self.device.smbus_write_byte_data(base, bytes[0])?;
            self.device.smbus_write_byte_data(base + 1, bytes[1])?;
        }
        Ok(())
    }
}

impl ImuDriver for Bno055 {
    fn read_euler(&mut self) -> VegaResult<(f32, f32, f32)> {
        let data = self.device.smbus_read_i2c_block_data(REG_EULER_DATA, 6)?;
        if data.len() != 6 {
            return Err(VegaError::Imu("short euler read".to_owned()));
        }
        let heading = i16::from_le_bytes([data[0], data[1]]) as f32 / EULER_SCALE;
        let roll = i16::from_le_bytes([data[2], data[3]]) as f32 / EULER_SCALE;
        let pitch = i16::from_le_bytes([data[4], data[5]]) as f32 / EULER_SCALE;
        Ok((roll, pitch, heading))
    }

    fn read_calibration_status(&mut self) -> VegaResult<CalibrationStatus> {
        let status = self.device.smbus_read_byte_data(REG_CALIB_STAT)?;
        Ok(CalibrationStatus {
            sys: (status >> 6) & 0x03,
            gyro: (status >> 4) & 0x03,
            accel: (status >> 2) & 0x03,
            mag: status & 0x03,
        })
    }
}

/// Stand-in driver for running without the sensor attached.
pub struct FakeImu {
    euler: (f32, f32, f32),
}

impl FakeImu {
    pub fn level() -> Self {
        Self {
            euler: (0.0, 0.0, 0.0),
        }
    }

    pub fn tilted(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            euler: (roll, pitch, yaw),
        }
    }
}

impl ImuDriver for FakeImu {
    fn read_euler(&mut self) -> VegaResult<(f32, f32, f32)> {
        Ok(self.euler)
    }

    fn read_calibration_status(&mut self) -> VegaResult<CalibrationStatus> {
        Ok(CalibrationStatus {
            sys: 3,
            gyro: 3,
            accel: 3,
            mag: 3,
        })
    }
}

/// Samples the driver on its own thread and publishes the latest
/// orientation into a single-slot channel. Readers never wait; a failed
/// read keeps the previous sample.
pub struct ImuReader {
    receiver: watch::Receiver<Orientation>,
    running: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl ImuReader {
    pub fn start(mut driver: Box<dyn ImuDriver>, sample_rate_hz: f32) -> Self {
        let (sender, receiver) = watch::channel(Orientation::default());
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);
        let period = Duration::from_secs_f32(1.0 / sample_rate_hz.max(1.0));

        let join_handle = thread::spawn(move || {
            match driver.read_calibration_status() {
                Ok(status) => info!(?status, "IMU calibration status"),
                Err(error) => warn!(%error, "failed to read IMU calibration status"),
            }
            let mut last_sample = Orientation::default();
            let mut last_instant = Instant::now();
            while running_flag.load(Ordering::Relaxed) {
                let sample = match driver.read_euler() {
                    Ok((roll, pitch, yaw)) => {
                        let now = Instant::now();
                        let dt = now.duration_since(last_instant).as_secs_f32().max(1e-3);
                        last_instant = now;
                        let euler = Vector3::new(roll, pitch, yaw);
                        let angular_velocity = (euler - last_sample.euler) / dt;
                        let angular_acceleration =
                            (angular_velocity - last_sample.angular_velocity) / dt;
                        Orientation {
                            euler,
                            angular_velocity,
                            angular_acceleration,
                            consecutive_failures: 0,
                        }
                    }
                    Err(error) => {
                        debug!(%error, "IMU read failed, keeping last sample");
                        let mut sample = last_sample.clone();
                        sample.consecutive_failures += 1;
                        sample
                    }
                };
                last_sample = sample.clone();
                if sender.send(sample).is_err() {
                    break;
                }
                thread::sleep(period);
            }
        });

        Self {
            receiver,
            running,
            join_handle: Some(join_handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Orientation> {
        self.receiver.clone()
    }

    pub fn latest(&self) -> Orientation {
        self.receiver.borrow().clone()
    }
}

impl Drop for ImuReader {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                error!("Failed joining IMU reader thread");
            }
        }
    }
}
