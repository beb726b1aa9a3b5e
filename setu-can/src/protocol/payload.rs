//! Payload layouts for the FS-AI CAN interface
//!
//! Outgoing frames are always 8 bytes, little-endian, unused bytes zero.
//!
//! | ID    | Name          | Layout                                               |
//! |-------|---------------|------------------------------------------------------|
//! | 0x510 | AI2VCU_Status | B0 bit0 handshake; B1 estop bit0, mission 4-5, dir 6-7 |
//! | 0x512 | AI2VCU_Drive_R| B0-1 torque u16, B2-3 speed u16                      |
//! | 0x513 | AI2VCU_Steer  | B0-1 steer i16                                       |
//! | 0x514 | AI2VCU_Brake  | B0 brake, B1 brake (repeated)                        |
//! | other | generic       | B0-6 last gamepad event, B7 state byte               |
//!
//! Incoming VCU2AI_Status (0x520): B0 bit0 handshake, B1 bit3 go signal,
//! B2 low nibble AS state, B2 high nibble AMI state.

use crate::core::shared::EventBytes;
use crate::core::types::{ControlVector, MissionState};

/// AI to VCU status word
pub const AI2VCU_STATUS_ID: u16 = 0x510;
/// Rear drive torque/speed request
pub const AI2VCU_DRIVE_REAR_ID: u16 = 0x512;
/// Steering request
pub const AI2VCU_STEER_ID: u16 = 0x513;
/// Brake request
pub const AI2VCU_BRAKE_ID: u16 = 0x514;
/// VCU to AI status report (default receive filter)
pub const VCU2AI_STATUS_ID: u16 = 0x520;

/// Outgoing payload length
pub const PAYLOAD_LEN: usize = 8;

/// Everything an outgoing payload can be built from
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadInputs {
    pub mission: MissionState,
    pub control: ControlVector,
    pub event: EventBytes,
    pub state_byte: u8,
}

type Encoder = fn(&PayloadInputs) -> [u8; PAYLOAD_LEN];

/// Known layouts, keyed by CAN id; anything else uses [`encode_generic`]
const LAYOUTS: &[(u16, Encoder)] = &[
    (AI2VCU_STATUS_ID, encode_status),
    (AI2VCU_DRIVE_REAR_ID, encode_drive_rear),
    (AI2VCU_STEER_ID, encode_steer),
    (AI2VCU_BRAKE_ID, encode_brake),
];

/// Build the payload transmitted under `id`
pub fn build_outgoing_payload(id: u16, inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    LAYOUTS
        .iter()
        .find(|(layout_id, _)| *layout_id == id)
        .map(|(_, encode)| encode(inputs))
        .unwrap_or_else(|| encode_generic(inputs))
}

/// Decode the VCU2AI status payload; missing bytes read as zero
pub fn decode_status(data: &[u8]) -> MissionState {
    let byte = |i: usize| data.get(i).copied().unwrap_or(0);
    MissionState {
        handshake: byte(0) & 0x01 != 0,
        go_signal: byte(1) & 0x08 != 0,
        as_state: byte(2) & 0x0F,
        ami_state: (byte(2) >> 4) & 0x0F,
    }
}

// ============================================================================
// Layouts
// ============================================================================

fn encode_status(inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    let c = &inputs.control;
    let mut out = [0u8; PAYLOAD_LEN];
    out[0] = inputs.mission.handshake as u8;
    out[1] = (c.estop & 0x01) | ((c.mission_status & 0x03) << 4) | ((c.direction & 0x03) << 6);
    out
}

fn encode_drive_rear(inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    let mut out = [0u8; PAYLOAD_LEN];
    out[0..2].copy_from_slice(&saturate_u16(inputs.control.torque).to_le_bytes());
    out[2..4].copy_from_slice(&saturate_u16(inputs.control.speed).to_le_bytes());
    out
}

fn encode_steer(inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    let mut out = [0u8; PAYLOAD_LEN];
    out[0..2].copy_from_slice(&saturate_i16(inputs.control.steer).to_le_bytes());
    out
}

fn encode_brake(inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    let lo = saturate_u16(inputs.control.brake).to_le_bytes()[0];
    let mut out = [0u8; PAYLOAD_LEN];
    // Byte 1 repeats the low byte; receivers depend on this layout
    out[0] = lo;
    out[1] = lo;
    out
}

fn encode_generic(inputs: &PayloadInputs) -> [u8; PAYLOAD_LEN] {
    let mut out = [0u8; PAYLOAD_LEN];
    out[..7].copy_from_slice(&inputs.event);
    out[7] = inputs.state_byte;
    out
}

#[inline]
fn saturate_u16(value: i32) -> u16 {
    value.clamp(0, u16::MAX as i32) as u16
}

#[inline]
fn saturate_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(control: ControlVector) -> PayloadInputs {
        PayloadInputs {
            control,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_status() {
        let state = decode_status(&[0x01, 0x08, 0x23]);
        assert!(state.handshake);
        assert!(state.go_signal);
        assert_eq!(state.as_state, 3);
        assert_eq!(state.ami_state, 2);
    }

    #[test]
    fn test_decode_status_short_payload() {
        let state = decode_status(&[0x00]);
        assert_eq!(state, MissionState::default());
        assert_eq!(decode_status(&[]), MissionState::default());
    }

    #[test]
    fn test_status_word() {
        let mut p = inputs(ControlVector {
            mission_status: 3,
            direction: 1,
            estop: 1,
            ..ControlVector::NEUTRAL
        });
        p.mission.handshake = true;
        let out = build_outgoing_payload(AI2VCU_STATUS_ID, &p);
        assert_eq!(out, [0x01, 0x71, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_drive_rear_saturates() {
        let p = inputs(ControlVector {
            torque: 1950,
            speed: 70_000,
            ..ControlVector::NEUTRAL
        });
        let out = build_outgoing_payload(AI2VCU_DRIVE_REAR_ID, &p);
        assert_eq!(&out[..4], &[0x9E, 0x07, 0xFF, 0xFF]);

        let p = inputs(ControlVector {
            torque: -5,
            ..ControlVector::NEUTRAL
        });
        let out = build_outgoing_payload(AI2VCU_DRIVE_REAR_ID, &p);
        assert_eq!(&out[..2], &[0, 0]);
    }

    #[test]
    fn test_steer_twos_complement() {
        let p = inputs(ControlVector {
            steer: -250,
            ..ControlVector::NEUTRAL
        });
        let out = build_outgoing_payload(AI2VCU_STEER_ID, &p);
        assert_eq!(&out[..2], &[0x06, 0xFF]);

        let p = inputs(ControlVector {
            steer: -40_000,
            ..ControlVector::NEUTRAL
        });
        let out = build_outgoing_payload(AI2VCU_STEER_ID, &p);
        assert_eq!(&out[..2], &[0x00, 0x80]);
    }

    #[test]
    fn test_brake_duplicates_low_byte() {
        let p = inputs(ControlVector {
            brake: 0x0164,
            ..ControlVector::NEUTRAL
        });
        let out = build_outgoing_payload(AI2VCU_BRAKE_ID, &p);
        assert_eq!(out, [0x64, 0x64, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_id_uses_generic_layout() {
        let p = PayloadInputs {
            event: [0x20, 0, 1, 0xFF, 0x7F, 0, 0],
            state_byte: 3,
            ..Default::default()
        };
        let out = build_outgoing_payload(0x123, &p);
        assert_eq!(out, [0x20, 0, 1, 0xFF, 0x7F, 0, 0, 3]);
    }
}
