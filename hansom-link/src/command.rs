//! Outgoing MCU commands and their wire encoding.
//!
//! Every command is validated against the peripheral's fixed-point ranges
//! before a single byte is framed; out-of-range values never reach the wire.

use hansom_core::tariff::{
    K_VALUE_MAX, K_VALUE_MIN, MAX_PLATE_BYTES, MAX_PRICE_CENTS, MAX_THRESHOLD_M,
};
use hansom_core::{MeterTariff, TripData};
use thiserror::Error;

use crate::frame::{self, RawFrame};

/// Command and event opcodes of the MCU firmware contract.
pub mod opcode {
    pub const ENQUIRE_PARAMETERS: u8 = 0x01;
    pub const SET_K_VALUE: u8 = 0x02;
    pub const SET_LICENSE_PLATE: u8 = 0x03;
    pub const SET_PRICE_PARAMS: u8 = 0x04;
    pub const PRINT_RECEIPT: u8 = 0x05;
    pub const UPDATE_MCU_PARAMS: u8 = 0x06;

    pub const FARE_PARAMS: u8 = 0x81;
    pub const DEVICE_ID: u8 = 0x82;
    pub const TIME_SYNC: u8 = 0x83;
    pub const PULSE_COUNT: u8 = 0x84;
    pub const ABNORMAL_PULSE: u8 = 0x85;
    pub const OVER_SPEED: u8 = 0x86;
    pub const ACC_STATUS: u8 = 0x87;
    pub const ACK: u8 = 0x90;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("k-value {0} outside accepted range {K_VALUE_MIN}..={K_VALUE_MAX}")]
    KValueOutOfRange(u32),
    #[error("price {0} exceeds {MAX_PRICE_CENTS} cents")]
    PriceOutOfRange(u32),
    #[error("threshold {0} m exceeds {MAX_THRESHOLD_M} m")]
    ThresholdOutOfRange(u32),
    #[error("second-rate change point {change_m} m precedes threshold {threshold_m} m")]
    ChangePointBeforeThreshold { change_m: u32, threshold_m: u32 },
    #[error("license plate must be 1..={MAX_PLATE_BYTES} bytes without NUL")]
    InvalidPlate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum McuCommand {
    EnquireParameters,
    SetKValue(u32),
    SetLicensePlate(String),
    SetPriceParams {
        start_cents: u32,
        step_cents: u32,
        step2_cents: u32,
        threshold_m: u32,
    },
    PrintReceipt(TripData),
    UpdateMcuParams(MeterTariff),
}

fn check_k(k: u32) -> Result<(), ValidationError> {
    if !(K_VALUE_MIN..=K_VALUE_MAX).contains(&k) {
        return Err(ValidationError::KValueOutOfRange(k));
    }
    Ok(())
}

fn check_price(cents: u32) -> Result<(), ValidationError> {
    if cents > MAX_PRICE_CENTS {
        return Err(ValidationError::PriceOutOfRange(cents));
    }
    Ok(())
}

fn check_threshold(m: u32) -> Result<(), ValidationError> {
    if m > MAX_THRESHOLD_M {
        return Err(ValidationError::ThresholdOutOfRange(m));
    }
    Ok(())
}

pub fn check_plate(plate: &str) -> Result<(), ValidationError> {
    let bytes = plate.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_PLATE_BYTES || bytes.contains(&0) {
        return Err(ValidationError::InvalidPlate);
    }
    Ok(())
}

pub fn check_tariff(t: &MeterTariff) -> Result<(), ValidationError> {
    check_k(t.k_value)?;
    check_price(t.start_cents)?;
    check_price(t.step_cents)?;
    check_price(t.step2_cents)?;
    check_threshold(t.threshold_m)?;
    if t.step2_change_m < t.threshold_m {
        return Err(ValidationError::ChangePointBeforeThreshold {
            change_m: t.step2_change_m,
            threshold_m: t.threshold_m,
        });
    }
    Ok(())
}

impl McuCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::EnquireParameters => opcode::ENQUIRE_PARAMETERS,
            Self::SetKValue(_) => opcode::SET_K_VALUE,
            Self::SetLicensePlate(_) => opcode::SET_LICENSE_PLATE,
            Self::SetPriceParams { .. } => opcode::SET_PRICE_PARAMS,
            Self::PrintReceipt(_) => opcode::PRINT_RECEIPT,
            Self::UpdateMcuParams(_) => opcode::UPDATE_MCU_PARAMS,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::EnquireParameters | Self::PrintReceipt(_) => Ok(()),
            Self::SetKValue(k) => check_k(*k),
            Self::SetLicensePlate(plate) => check_plate(plate),
            Self::SetPriceParams {
                start_cents,
                step_cents,
                step2_cents,
                threshold_m,
            } => {
                check_price(*start_cents)?;
                check_price(*step_cents)?;
                check_price(*step2_cents)?;
                check_threshold(*threshold_m)
            }
            Self::UpdateMcuParams(t) => check_tariff(t),
        }
    }

    /// Validate, then produce the full frame bytes for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ValidationError> {
        self.validate()?;

        let payload = match self {
            Self::EnquireParameters => Vec::new(),
            Self::SetKValue(k) => k.to_le_bytes().to_vec(),
            Self::SetLicensePlate(plate) => plate.as_bytes().to_vec(),
            Self::SetPriceParams {
                start_cents,
                step_cents,
                step2_cents,
                threshold_m,
            } => {
                let mut p = Vec::with_capacity(16);
                p.extend_from_slice(&start_cents.to_le_bytes());
                p.extend_from_slice(&step_cents.to_le_bytes());
                p.extend_from_slice(&step2_cents.to_le_bytes());
                p.extend_from_slice(&threshold_m.to_le_bytes());
                p
            }
            Self::PrintReceipt(trip) => encode_receipt(trip),
            Self::UpdateMcuParams(t) => encode_tariff(t),
        };

        // Every validated payload is at most 32 bytes, well under the cap.
        Ok(frame::encode_frame(self.opcode(), &payload).expect("payload within frame cap"))
    }

    /// Decode a command frame, as the peripheral does. Used by the mock MCU
    /// and the codec round-trip tests.
    pub fn decode(frame: &RawFrame) -> Option<Self> {
        let p = &frame.payload;
        match frame.opcode {
            opcode::ENQUIRE_PARAMETERS => Some(Self::EnquireParameters),
            opcode::SET_K_VALUE => Some(Self::SetKValue(frame::u32_le(p, 0)?)),
            opcode::SET_LICENSE_PLATE => {
                Some(Self::SetLicensePlate(String::from_utf8(p.clone()).ok()?))
            }
            opcode::SET_PRICE_PARAMS => Some(Self::SetPriceParams {
                start_cents: frame::u32_le(p, 0)?,
                step_cents: frame::u32_le(p, 4)?,
                step2_cents: frame::u32_le(p, 8)?,
                threshold_m: frame::u32_le(p, 12)?,
            }),
            opcode::PRINT_RECEIPT => decode_receipt(p),
            opcode::UPDATE_MCU_PARAMS => Some(Self::UpdateMcuParams(MeterTariff {
                k_value: frame::u32_le(p, 0)?,
                start_cents: frame::u32_le(p, 4)?,
                step_cents: frame::u32_le(p, 8)?,
                step2_cents: frame::u32_le(p, 12)?,
                threshold_m: frame::u32_le(p, 16)?,
                step2_change_m: frame::u32_le(p, 20)?,
            })),
            _ => None,
        }
    }
}

pub(crate) fn encode_tariff(t: &MeterTariff) -> Vec<u8> {
    let mut p = Vec::with_capacity(24);
    p.extend_from_slice(&t.k_value.to_le_bytes());
    p.extend_from_slice(&t.start_cents.to_le_bytes());
    p.extend_from_slice(&t.step_cents.to_le_bytes());
    p.extend_from_slice(&t.step2_cents.to_le_bytes());
    p.extend_from_slice(&t.threshold_m.to_le_bytes());
    p.extend_from_slice(&t.step2_change_m.to_le_bytes());
    p
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn encode_receipt(trip: &TripData) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);
    p.extend_from_slice(&trip.started_at.as_second().to_le_bytes());
    let ended = trip.ended_at.map(|t| t.as_second()).unwrap_or(0);
    p.extend_from_slice(&ended.to_le_bytes());
    p.extend_from_slice(&clamp_u32(trip.fare_cents).to_le_bytes());
    p.extend_from_slice(&clamp_u32(trip.extras_cents).to_le_bytes());
    p.extend_from_slice(&clamp_u32(trip.wait_secs).to_le_bytes());
    p.extend_from_slice(&trip.distance_m.to_le_bytes());
    p
}

fn decode_receipt(p: &[u8]) -> Option<McuCommand> {
    let started = jiff::Timestamp::from_second(frame::i64_le(p, 0)?).ok()?;
    let ended_secs = frame::i64_le(p, 8)?;
    let ended = if ended_secs == 0 {
        None
    } else {
        Some(jiff::Timestamp::from_second(ended_secs).ok()?)
    };
    Some(McuCommand::PrintReceipt(TripData {
        id: hansom_core::TripId::new(),
        started_at: started,
        ended_at: ended,
        fare_cents: u64::from(frame::u32_le(p, 16)?),
        extras_cents: u64::from(frame::u32_le(p, 20)?),
        wait_secs: u64::from(frame::u32_le(p, 24)?),
        distance_m: frame::u32_le(p, 28)?,
    }))
}
