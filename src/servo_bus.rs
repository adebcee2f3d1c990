use crate::error::{VegaError, VegaResult};
use crate::servo_codec::ServoTarget;
use serialport::TTYPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::*;

const FRAME_HEADER: u8 = 0x55;
const CMD_SERVO_MOVE: u8 = 3;
const CMD_GET_BATTERY_VOLTAGE: u8 = 15;
const CMD_MULT_SERVO_UNLOAD: u8 = 20;
const CMD_MULT_SERVO_POS_READ: u8 = 21;

const DEFAULT_BAUD_RATE: u32 = 9600;
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const MIN_MOVE_MS: u64 = 1;
const MAX_MOVE_MS: u64 = 30_000;
// bytes tolerated while hunting for a frame header in the receive stream
const MAX_SYNC_BYTES: usize = 64;

/// Addressable multi-servo operations against the serial servo board.
pub trait ServoBus: Send {
    /// Dispatch one coordinated move; all servos travel over `duration`.
    fn move_servos(&mut self, targets: &[ServoTarget], duration: Duration) -> VegaResult<()>;
    /// Blocking position readback.
    fn read_positions(&mut self, ids: &[u8]) -> VegaResult<Vec<ServoTarget>>;
    /// Release servo torque.
    fn unload(&mut self, ids: &[u8]) -> VegaResult<()>;
    /// Battery readout in volts, zero when unsupported.
    fn voltage(&mut self) -> VegaResult<f32>;
}

/// Servo bus over a serial transport.
///
/// When the port cannot be opened at startup the bus degrades into dry-run
/// mode: every operation succeeds without wire effect and the condition is
/// logged once.
pub struct SerialServoBus {
    port: Option<TTYPort>,
}

impl SerialServoBus {
    pub fn open(port_name: &str) -> SerialServoBus {
        match serialport::new(port_name, DEFAULT_BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open_native()
        {
            Ok(port) => SerialServoBus { port: Some(port) },
            Err(error) => {
                warn!(
                    %error,
                    port_name, "failed to open servo port, running in dry-run mode"
                );
                SerialServoBus { port: None }
            }
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.port.is_none()
    }

    fn send(&mut self, frame: &[u8]) -> VegaResult<()> {
        if let Some(port) = self.port.as_mut() {
            port.write_all(frame)?;
        }
        Ok(())
    }

    fn request(&mut self, frame: &[u8], expected_cmd: u8) -> VegaResult<Option<Vec<u8>>> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Ok(None),
        };
        port.write_all(frame)?;
        let payload = read_response(port, expected_cmd)?;
        Ok(Some(payload))
    }
}

impl ServoBus for SerialServoBus {
    fn move_servos(&mut self, targets: &[ServoTarget], duration: Duration) -> VegaResult<()> {
        self.send(&move_frame(targets, duration))
    }

    fn read_positions(&mut self, ids: &[u8]) -> VegaResult<Vec<ServoTarget>> {
        match self.request(&id_list_frame(CMD_MULT_SERVO_POS_READ, ids), CMD_MULT_SERVO_POS_READ)? {
            Some(payload) => parse_positions(&payload),
            None => Ok(Vec::new()),
        }
    }

    fn unload(&mut self, ids: &[u8]) -> VegaResult<()> {
        self.send(&id_list_frame(CMD_MULT_SERVO_UNLOAD, ids))
    }

    fn voltage(&mut self) -> VegaResult<f32> {
        match self.request(&command_frame(CMD_GET_BATTERY_VOLTAGE), CMD_GET_BATTERY_VOLTAGE)? {
            Some(payload) => parse_voltage(&payload),
            None => Ok(0.0),
        }
    }
}

fn move_frame(targets: &[ServoTarget], duration: Duration) -> Vec<u8> {
    let millis = (duration.as_millis() as u64).clamp(MIN_MOVE_MS, MAX_MOVE_MS) as u16;
    let count = targets.len() as u8;
    let mut frame = Vec::with_capacity(7 + targets.len() * 3);
    frame.extend_from_slice(&[
        FRAME_HEADER,
        FRAME_HEADER,
        3 * count + 5,
        CMD_SERVO_MOVE,
        count,
        (millis & 0xff) as u8,
        (millis >> 8) as u8,
    ]);
    for target in targets {
        frame.push(target.id);
        frame.push((target.count & 0xff) as u8);
        frame.push((target.count >> 8) as u8);
    }
    frame
}

fn id_list_frame(cmd: u8, ids: &[u8]) -> Vec<u8> {
    let count = ids.len() as u8;
    let mut frame = Vec::with_capacity(5 + ids.len());
    frame.extend_from_slice(&[FRAME_HEADER, FRAME_HEADER, count + 3, cmd, count]);
    frame.extend_from_slice(ids);
    frame
}

fn command_frame(cmd: u8) -> Vec<u8> {
    vec![FRAME_HEADER, FRAME_HEADER, 2, cmd]
}

/// Reads one framed response, scanning past noise until the double header.
fn read_response(port: &mut TTYPort, expected_cmd: u8) -> VegaResult<Vec<u8>> {
    let mut byte = [0u8; 1];
    let mut skipped = 0;
    loop {
        port.read_exact(&mut byte)?;
        if byte[0] != FRAME_HEADER {
            skipped += 1;
            if skipped > MAX_SYNC_BYTES {
                return Err(VegaError::MalformedResponse);
            }
            continue;
        }
        port.read_exact(&mut byte)?;
        if byte[0] == FRAME_HEADER {
            break;
        }
        skipped += 2;
        if skipped > MAX_SYNC_BYTES {
            return Err(VegaError::MalformedResponse);
        }
    }
    let mut header = [0u8; 2];
    port.read_exact(&mut header)?;
    let [length, cmd] = header;
    if cmd != expected_cmd || length < 2 {
        return Err(VegaError::MalformedResponse);
    }
    let mut payload = vec![0u8; length as usize - 2];
    port.read_exact(&mut payload)?;
    Ok(payload)
}

fn parse_positions(payload: &[u8]) -> VegaResult<Vec<ServoTarget>> {
    let count = *payload.first().ok_or(VegaError::MalformedResponse)? as usize;
    if payload.len() != 1 + count * 3 {
        return Err(VegaError::MalformedResponse);
    }
    let mut positions = Vec::with_capacity(count);
    for entry in payload[1..].chunks_exact(3) {
        let count = u16::from_le_bytes([entry[1], entry[2]]);
        positions.push(ServoTarget::new(entry[0], count));
    }
    Ok(positions)
}

fn parse_voltage(payload: &[u8]) -> VegaResult<f32> {
    if payload.len() != 2 {
        return Err(VegaError::MalformedResponse);
    }
    let millivolts = u16::from_le_bytes([payload[0], payload[1]]);
    Ok(millivolts as f32 / 1000.0)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum BusEvent {
        Move {
            targets: Vec<ServoTarget>,
            duration: Duration,
        },
        Unload(Vec<u8>),
    }

    impl BusEvent {
        pub(crate) fn move_duration(&self) -> Option<Duration> {
            match self {
                BusEvent::Move { duration, .. } => Some(*duration),
                BusEvent::Unload(_) => None,
            }
        }
    }

    /// Bus double that records every command in issue order.
    pub(crate) struct RecordingBus {
        pub(crate) log: Arc<Mutex<Vec<BusEvent>>>,
        pub(crate) fail_writes: bool,
    }

    impl RecordingBus {
        pub(crate) fn new() -> (Self, Arc<Mutex<Vec<BusEvent>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    log: Arc::clone(&log),
                    fail_writes: false,
                },
                log,
            )
        }
    }

    impl ServoBus for RecordingBus {
        fn move_servos(&mut self, targets: &[ServoTarget], duration: Duration) -> VegaResult<()> {
            if self.fail_writes {
                return Err(VegaError::Transport(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "simulated write failure",
                )));
            }
            self.log.lock().unwrap().push(BusEvent::Move {
                targets: targets.to_vec(),
                duration,
            });
            Ok(())
        }

        fn read_positions(&mut self, ids: &[u8]) -> VegaResult<Vec<ServoTarget>> {
            Ok(ids.iter().map(|&id| ServoTarget::new(id, 500)).collect())
        }

        fn unload(&mut self, ids: &[u8]) -> VegaResult<()> {
            self.log.lock().unwrap().push(BusEvent::Unload(ids.to_vec()));
            Ok(())
        }

        fn voltage(&mut self) -> VegaResult<f32> {
            Ok(7.4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_frame_layout() {
        let targets = [ServoTarget::new(11, 500), ServoTarget::new(23, 1000)];
        let frame = move_frame(&targets, Duration::from_millis(800));
        assert_eq!(
            frame,
            vec![
                0x55, 0x55, 11, CMD_SERVO_MOVE, 2, 0x20, 0x03, // 800 ms little endian
                11, 0xf4, 0x01, // id 11 at 500
                23, 0xe8, 0x03, // id 23 at 1000
            ]
        );
    }

    #[test]
    fn move_duration_is_clamped_to_protocol_limits() {
        let targets = [ServoTarget::new(11, 500)];
        let too_long = move_frame(&targets, Duration::from_secs(120));
        assert_eq!(u16::from_le_bytes([too_long[5], too_long[6]]), 30_000);
        let too_short = move_frame(&targets, Duration::from_millis(0));
        assert_eq!(u16::from_le_bytes([too_short[5], too_short[6]]), 1);
    }

    #[test]
    fn unload_frame_layout() {
        let frame = id_list_frame(CMD_MULT_SERVO_UNLOAD, &[11, 12, 13]);
        assert_eq!(frame, vec![0x55, 0x55, 6, CMD_MULT_SERVO_UNLOAD, 3, 11, 12, 13]);
    }

    #[test]
    fn voltage_request_layout() {
        assert_eq!(
            command_frame(CMD_GET_BATTERY_VOLTAGE),
            vec![0x55, 0x55, 2, CMD_GET_BATTERY_VOLTAGE]
        );
    }

    #[test]
    fn parses_position_payload() {
        let payload = [2, 11, 0xf4, 0x01, 12, 0x00, 0x02];
        let positions = parse_positions(&payload).unwrap();
        assert_eq!(
            positions,
            vec![ServoTarget::new(11, 500), ServoTarget::new(12, 512)]
        );
    }

    #[test]
    fn rejects_truncated_position_payload() {
        let payload = [2, 11, 0xf4, 0x01];
        assert!(matches!(
            parse_positions(&payload),
            Err(VegaError::MalformedResponse)
        ));
    }

    #[test]
    fn parses_voltage_payload() {
        let voltage = parse_voltage(&[0xe8, 0x1c]).unwrap();
        assert!((voltage - 7.4).abs() < 1e-3);
    }

    #[test]
    fn unopenable_port_enters_dry_run() {
        let mut bus = SerialServoBus::open("/dev/nonexistent-servo-port");
        assert!(bus.is_dry_run());
        let targets = [ServoTarget::new(11, 500)];
        bus.move_servos(&targets, Duration::from_millis(10)).unwrap();
        assert_eq!(bus.read_positions(&[11, 12]).unwrap(), Vec::new());
        bus.unload(&[11, 12]).unwrap();
        assert_eq!(bus.voltage().unwrap(), 0.0);
    }
}
