//! Fixed-size controller telemetry packet sent on the streaming channel.
//!
//! ```text
//! offset  size  field
//!   0      4    sequence (u32)
//!   4      4    buttons bitmask (u32)
//!   8      2+2  circle pad dx, dy (i16)
//!  12      2+2  touch x, y (u16)
//!  16      2+2  c-stick dx, dy (i16)
//!  20      2*3  accelerometer x, y, z (i16)
//!  26      2*3  gyroscope x, z, y (i16)
//! ```
//!
//! The gyroscope triple is ordered x, z, y on the wire; this matches the
//! device's native angular-rate struct and existing receivers rely on it.

use crate::protocol::codec::{ProtocolError, WireReader};

/// Size of one controller packet in bytes.
pub const CONTROLLER_PACKET_SIZE: usize = 0x20;

/// Signed two-axis stick displacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StickPosition {
    pub dx: i16,
    pub dy: i16,
}

/// Touch-screen coordinate; (0, 0) when the screen is not touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchPosition {
    pub x: u16,
    pub y: u16,
}

/// Raw three-axis sensor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vector3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// One sample of every input the device exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    /// Held-buttons bitmask.
    pub buttons: u32,
    pub circle_pad: StickPosition,
    pub touch: TouchPosition,
    pub c_stick: StickPosition,
    pub accel: Vector3,
    pub gyro: Vector3,
}

/// A sampled [`ControllerState`] stamped with its stream sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerPacket {
    pub sequence: u32,
    pub state: ControllerState,
}

impl ControllerPacket {
    pub fn new(sequence: u32, state: ControllerState) -> Self {
        Self { sequence, state }
    }

    /// Serializes the packet into its 32-byte wire form.
    pub fn encode(&self) -> [u8; CONTROLLER_PACKET_SIZE] {
        let s = &self.state;
        let mut out = [0u8; CONTROLLER_PACKET_SIZE];
        let fields: [&[u8]; 14] = [
            &self.sequence.to_le_bytes(),
            &s.buttons.to_le_bytes(),
            &s.circle_pad.dx.to_le_bytes(),
            &s.circle_pad.dy.to_le_bytes(),
            &s.touch.x.to_le_bytes(),
            &s.touch.y.to_le_bytes(),
            &s.c_stick.dx.to_le_bytes(),
            &s.c_stick.dy.to_le_bytes(),
            &s.accel.x.to_le_bytes(),
            &s.accel.y.to_le_bytes(),
            &s.accel.z.to_le_bytes(),
            &s.gyro.x.to_le_bytes(),
            &s.gyro.z.to_le_bytes(),
            &s.gyro.y.to_le_bytes(),
        ];
        for (slot, byte) in out.iter_mut().zip(fields.iter().flat_map(|f| f.iter())) {
            *slot = *byte;
        }
        out
    }

    /// Parses a packet from the first 32 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if fewer than 32 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(bytes);
        let sequence = r.read_u32()?;
        let buttons = r.read_u32()?;
        let circle_pad = StickPosition {
            dx: r.read_i16()?,
            dy: r.read_i16()?,
        };
        let touch = TouchPosition {
            x: r.read_u16()?,
            y: r.read_u16()?,
        };
        let c_stick = StickPosition {
            dx: r.read_i16()?,
            dy: r.read_i16()?,
        };
        let accel = Vector3 {
            x: r.read_i16()?,
            y: r.read_i16()?,
            z: r.read_i16()?,
        };
        let gyro_x = r.read_i16()?;
        let gyro_z = r.read_i16()?;
        let gyro_y = r.read_i16()?;

        Ok(Self {
            sequence,
            state: ControllerState {
                buttons,
                circle_pad,
                touch,
                c_stick,
                accel,
                gyro: Vector3 {
                    x: gyro_x,
                    y: gyro_y,
                    z: gyro_z,
                },
            },
        })
    }
}
