//! Incoming MCU events.
//!
//! `decode_frame` is total: a frame whose payload does not parse, or whose
//! opcode is unknown, decodes to [`McuEvent::Malformed`]. The reader drops
//! those and keeps going; line noise is never fatal.

use hansom_core::{DeviceIdentity, MeterTariff};

use crate::command::opcode;
use crate::frame::{self, RawFrame};

#[derive(Debug, Clone, PartialEq)]
pub enum McuEvent {
    FareParams(MeterTariff),
    DeviceId(DeviceIdentity),
    TimeSync(jiff::Timestamp),
    /// Free-running cumulative pulse count since MCU power-on.
    PulseCount(u32),
    AbnormalPulse,
    OverSpeed {
        /// Observed speed in 0.1 km/h units.
        speed_dkmh: u16,
    },
    AccStatus(bool),
    Ack {
        opcode: u8,
        status: u8,
    },
    Malformed,
}

impl McuEvent {
    pub fn decode_frame(frame: &RawFrame) -> Self {
        decode(frame).unwrap_or(Self::Malformed)
    }

    /// Wire encoding of this event; the mock MCU and tests speak with it.
    pub fn encode(&self) -> Option<Vec<u8>> {
        let (op, payload) = match self {
            Self::FareParams(t) => (opcode::FARE_PARAMS, crate::command::encode_tariff(t)),
            Self::DeviceId(id) => {
                let serial = id.serial.as_bytes();
                let plate = id.license_plate.as_bytes();
                let mut p = Vec::with_capacity(1 + serial.len() + plate.len());
                p.push(serial.len() as u8);
                p.extend_from_slice(serial);
                p.extend_from_slice(plate);
                (opcode::DEVICE_ID, p)
            }
            Self::TimeSync(ts) => (opcode::TIME_SYNC, ts.as_second().to_le_bytes().to_vec()),
            Self::PulseCount(count) => (opcode::PULSE_COUNT, count.to_le_bytes().to_vec()),
            Self::AbnormalPulse => (opcode::ABNORMAL_PULSE, Vec::new()),
            Self::OverSpeed { speed_dkmh } => {
                (opcode::OVER_SPEED, speed_dkmh.to_le_bytes().to_vec())
            }
            Self::AccStatus(on) => (opcode::ACC_STATUS, vec![u8::from(*on)]),
            Self::Ack { opcode: op, status } => (opcode::ACK, vec![*op, *status]),
            Self::Malformed => return None,
        };
        frame::encode_frame(op, &payload).ok()
    }
}

fn decode(frame: &RawFrame) -> Option<McuEvent> {
    let p = &frame.payload;
    match frame.opcode {
        opcode::FARE_PARAMS => Some(McuEvent::FareParams(MeterTariff {
            k_value: frame::u32_le(p, 0)?,
            start_cents: frame::u32_le(p, 4)?,
            step_cents: frame::u32_le(p, 8)?,
            step2_cents: frame::u32_le(p, 12)?,
            threshold_m: frame::u32_le(p, 16)?,
            step2_change_m: frame::u32_le(p, 20)?,
        })),
        opcode::DEVICE_ID => {
            let serial_len = usize::from(*p.first()?);
            let serial = p.get(1..1 + serial_len)?;
            let plate = p.get(1 + serial_len..)?;
            Some(McuEvent::DeviceId(DeviceIdentity {
                serial: std::str::from_utf8(serial).ok()?.into(),
                license_plate: std::str::from_utf8(plate).ok()?.into(),
            }))
        }
        opcode::TIME_SYNC => Some(McuEvent::TimeSync(
            jiff::Timestamp::from_second(frame::i64_le(p, 0)?).ok()?,
        )),
        opcode::PULSE_COUNT => Some(McuEvent::PulseCount(frame::u32_le(p, 0)?)),
        opcode::ABNORMAL_PULSE => Some(McuEvent::AbnormalPulse),
        opcode::OVER_SPEED => Some(McuEvent::OverSpeed {
            speed_dkmh: frame::u16_le(p, 0)?,
        }),
        opcode::ACC_STATUS => Some(McuEvent::AccStatus(*p.first()? != 0)),
        opcode::ACK => Some(McuEvent::Ack {
            opcode: *p.first()?,
            status: *p.get(1)?,
        }),
        _ => None,
    }
}
