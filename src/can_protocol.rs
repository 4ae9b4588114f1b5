// CAN communication protocol definitions for the actuator pipeline

use embedded_can::{ExtendedId, Frame, Id, StandardId};

use crate::error::Error;

/// Classic CAN payload limit
pub const MAX_PAYLOAD: usize = 8;

/// Payload length of a scalar (f32) command or status frame
pub const SCALAR_LEN: usize = 4;

/// Payload length of a dual-PWM command (two i32)
pub const DUAL_PWM_LEN: usize = 8;

/// Raw numeric value of a CAN identifier (standard or extended)
pub fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(std_id) => std_id.as_raw() as u32,
        Id::Extended(ext_id) => ext_id.as_raw(),
    }
}

/// Build an identifier from a raw value: 11-bit values become standard ids,
/// anything up to 29 bits becomes an extended id.
pub fn id_from_raw(raw: u32) -> Option<Id> {
    if raw <= StandardId::MAX.as_raw() as u32 {
        StandardId::new(raw as u16).map(Id::Standard)
    } else {
        ExtendedId::new(raw).map(Id::Extended)
    }
}

/// Classic (non-FD) CAN frame with up to 8 payload bytes.
///
/// Immutable once constructed. Implements [`embedded_can::Frame`] so it can be
/// converted to and from whatever frame type the CAN peripheral driver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    data: [u8; MAX_PAYLOAD],
    len: u8,
    remote: bool,
}

impl CanFrame {
    /// Create a data frame from a raw identifier and payload
    ///
    /// # Returns
    /// * `None` if the id does not fit 29 bits or the payload exceeds 8 bytes
    pub fn from_raw(raw: u32, data: &[u8]) -> Option<Self> {
        Self::new(id_from_raw(raw)?, data)
    }

    /// Copy any driver frame into a `CanFrame`
    pub fn from_frame<F: Frame>(frame: &F) -> Self {
        if frame.is_remote_frame() {
            let dlc = frame.dlc().min(MAX_PAYLOAD);
            return Self {
                id: frame.id(),
                data: [0; MAX_PAYLOAD],
                len: dlc as u8,
                remote: true,
            };
        }

        let data = frame.data();
        let len = data.len().min(MAX_PAYLOAD);
        let mut buf = [0u8; MAX_PAYLOAD];
        buf[..len].copy_from_slice(&data[..len]);
        Self {
            id: frame.id(),
            data: buf,
            len: len as u8,
            remote: false,
        }
    }

    /// Convert into the driver's frame type for transmission
    pub fn to_frame<F: Frame>(&self) -> Result<F, Error> {
        let frame = if self.remote {
            F::new_remote(self.id, self.len as usize)
        } else {
            F::new(self.id, self.payload())
        };
        frame.ok_or(Error::InvalidFrame)
    }

    /// Numeric identifier
    pub fn raw_id(&self) -> u32 {
        raw_id(self.id)
    }

    /// Payload bytes (`len` of them)
    pub fn payload(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len as usize]
        }
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CanFrame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "CanFrame {{ id: {:#x}, data: {=[u8]:#x}, remote: {} }}",
            self.raw_id(),
            self.payload(),
            self.remote
        )
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_PAYLOAD {
            return None;
        }
        let mut buf = [0u8; MAX_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: buf,
            len: data.len() as u8,
            remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_PAYLOAD {
            return None;
        }
        Some(Self {
            id: id.into(),
            data: [0; MAX_PAYLOAD],
            len: dlc as u8,
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

/// Command payload as interpreted by the consuming task.
///
/// There is no tag on the wire: the payload length selects the variant.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorCommand {
    /// One f32: normalized speed [-1, 1] or steering angle [deg]
    Scalar(f32),
    /// Independent signed PWM tick counts for the left and right wheels
    DualPwm { left: i32, right: i32 },
}

/// Decode a command payload by length
///
/// # Arguments
/// * `data` - CAN frame data
///
/// # Returns
/// * `Some(DualPwm)` for 8 or more bytes
/// * `Some(Scalar)` for 4 to 7 bytes
/// * `None` (command ignored) for anything shorter
pub fn decode_command(data: &[u8]) -> Option<ActuatorCommand> {
    if data.len() >= DUAL_PWM_LEN {
        let (left, right) = parse_dual_pwm(data)?;
        Some(ActuatorCommand::DualPwm { left, right })
    } else if data.len() >= SCALAR_LEN {
        parse_scalar_command(data).map(ActuatorCommand::Scalar)
    } else {
        debug!("Command ignored: payload length {}", data.len());
        None
    }
}

/// Parse a float command (speed or angle) from CAN data
///
/// # Arguments
/// * `data` - CAN frame data (at least 4 bytes, extra bytes are ignored)
///
/// # Returns
/// * `Some(value)` if parsing successful
/// * `None` if the payload is shorter than 4 bytes
pub fn parse_scalar_command(data: &[u8]) -> Option<f32> {
    if data.len() < SCALAR_LEN {
        debug!("Scalar command: short payload {}", data.len());
        return None;
    }

    let bytes = [data[0], data[1], data[2], data[3]];
    Some(f32::from_le_bytes(bytes))
}

/// Parse a dual-PWM command from CAN data
///
/// # Arguments
/// * `data` - CAN frame data (should be 8 bytes)
///
/// # Returns
/// * `Some((left_counts, right_counts))` if parsing successful
/// * `None` if data length is incorrect
pub fn parse_dual_pwm(data: &[u8]) -> Option<(i32, i32)> {
    if data.len() < DUAL_PWM_LEN {
        debug!("Dual PWM command: short payload {}", data.len());
        return None;
    }

    let left = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let right = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Some((left, right))
}

/// Encode a float command into CAN data
pub fn encode_scalar_command(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Encode a dual-PWM command into CAN data
pub fn encode_dual_pwm(left: i32, right: i32) -> [u8; 8] {
    let mut data = [0u8; 8];
    data[0..4].copy_from_slice(&left.to_le_bytes());
    data[4..8].copy_from_slice(&right.to_le_bytes());
    data
}

/// Encode vehicle speed into a status payload
///
/// # Arguments
/// * `speed_mps` - Linear speed in m/s
///
/// # Returns
/// 4-byte little-endian IEEE-754 float
pub fn encode_status_speed(speed_mps: f32) -> [u8; 4] {
    speed_mps.to_le_bytes()
}

/// Decode vehicle speed from a status payload (telemetry consumers)
pub fn decode_status_speed(data: &[u8]) -> Option<f32> {
    parse_scalar_command(data)
}

/// Build the speed status frame
pub fn status_speed_frame(status_id: u32, speed_mps: f32) -> Result<CanFrame, Error> {
    CanFrame::from_raw(status_id, &encode_status_speed(speed_mps)).ok_or(Error::InvalidFrame)
}
