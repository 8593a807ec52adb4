use num_enum::FromPrimitive;

use crate::constants::{ResponseTag, BATTERY_EMPTY_MV, BATTERY_FULL_MV, WEIGHT_RECORD_LEN};
use crate::error::{Error, Result};

/// One TLV unit borrowed from a notification buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub tag: u8,
    pub length: u8,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightMeasurement {
    /// Kilograms.
    pub weight: f32,
    /// Device-relative milliseconds.
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryInfo {
    pub voltage: u16,
    pub percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
}

/// A notification classified by its response tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    CommandResponse(Vec<u8>),
    Weight(Vec<WeightMeasurement>),
    RfdPeak(Vec<u8>),
    RfdPeakSeries(Vec<u8>),
    LowBatteryWarning,
    Unknown { tag: u8, payload: Vec<u8> },
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>> {
    if bytes.len() < 2 {
        return Err(Error::FrameTooShort {
            actual: bytes.len(),
        });
    }

    let tag = bytes[0];
    let length = bytes[1];
    let available = bytes.len() - 2;
    if available < length as usize {
        return Err(Error::FrameIncomplete {
            declared: length as usize,
            available,
        });
    }

    Ok(Frame {
        tag,
        length,
        payload: &bytes[2..2 + length as usize],
    })
}

pub fn parse_weight_batch(payload: &[u8]) -> Result<Vec<WeightMeasurement>> {
    if payload.len() % WEIGHT_RECORD_LEN != 0 {
        return Err(Error::InvalidLength {
            what: "weight measurement",
            actual: payload.len(),
        });
    }

    Ok(payload
        .chunks_exact(WEIGHT_RECORD_LEN)
        .map(|record| WeightMeasurement {
            weight: f32::from_le_bytes([record[0], record[1], record[2], record[3]]),
            timestamp: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
        })
        .collect())
}

pub fn parse_battery_voltage(payload: &[u8]) -> Result<BatteryInfo> {
    let bytes: [u8; 2] = payload.try_into().map_err(|_| Error::InvalidLength {
        what: "battery voltage",
        actual: payload.len(),
    })?;
    let voltage = u16::from_le_bytes(bytes);

    Ok(BatteryInfo {
        voltage,
        percentage: battery_percentage(voltage),
    })
}

pub fn parse_firmware_version(payload: &[u8]) -> Result<FirmwareVersion> {
    let [major, minor, patch]: [u8; 3] =
        payload.try_into().map_err(|_| Error::InvalidLength {
            what: "firmware version",
            actual: payload.len(),
        })?;

    Ok(FirmwareVersion {
        major,
        minor,
        patch,
        version: format!("{major}.{minor}.{patch}"),
    })
}

pub fn parse_error_info(payload: &[u8]) -> ErrorInfo {
    ErrorInfo {
        message: String::from_utf8_lossy(payload)
            .trim_end_matches('\0')
            .to_string(),
    }
}

fn battery_percentage(voltage: u16) -> u8 {
    let span = f32::from(BATTERY_FULL_MV - BATTERY_EMPTY_MV);
    let pct = (f32::from(voltage) - f32::from(BATTERY_EMPTY_MV)) / span * 100.0;
    pct.clamp(0.0, 100.0).round() as u8
}

impl TryFrom<Frame<'_>> for Response {
    type Error = Error;

    fn try_from(frame: Frame<'_>) -> Result<Self> {
        let payload = frame.payload;
        Ok(match ResponseTag::from_primitive(frame.tag) {
            ResponseTag::CommandResponse => Response::CommandResponse(payload.to_vec()),
            ResponseTag::WeightMeasurement => Response::Weight(parse_weight_batch(payload)?),
            ResponseTag::RfdPeak => Response::RfdPeak(payload.to_vec()),
            ResponseTag::RfdPeakSeries => Response::RfdPeakSeries(payload.to_vec()),
            ResponseTag::LowBatteryWarning => Response::LowBatteryWarning,
            ResponseTag::Unknown(tag) => Response::Unknown {
                tag,
                payload: payload.to_vec(),
            },
        })
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Response::try_from(decode_frame(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CommandTag;
    use crate::encoding::encode_command;

    fn weight_record(weight: f32, timestamp: u32) -> Vec<u8> {
        let mut bytes = weight.to_le_bytes().to_vec();
        bytes.extend_from_slice(&timestamp.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_what_encode_command_produces() {
        for tag in CommandTag::ALL {
            for len in [0usize, 1, 255] {
                let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let bytes = encode_command(tag, &payload);
                let frame = decode_frame(&bytes).unwrap();

                assert_eq!(frame.tag, u8::from(tag));
                assert_eq!(frame.length as usize, len);
                assert_eq!(frame.payload, payload.as_slice());
            }
        }
    }

    #[test]
    fn rejects_short_and_incomplete_frames() {
        assert!(matches!(
            decode_frame(&[0x01]),
            Err(Error::FrameTooShort { actual: 1 })
        ));
        assert!(matches!(decode_frame(&[]), Err(Error::FrameTooShort { actual: 0 })));
        assert!(matches!(
            decode_frame(&[0x01, 5, 0x10]),
            Err(Error::FrameIncomplete {
                declared: 5,
                available: 1
            })
        ));
    }

    #[test]
    fn ignores_bytes_past_declared_length() {
        let frame = decode_frame(&[0, 2, 0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(frame.payload, &[0xaa, 0xbb]);
    }

    #[test]
    fn weight_batch_keeps_emission_order() {
        let mut payload = weight_record(50.5, 1000);
        payload.extend(weight_record(-5.25, 1010));

        let batch = parse_weight_batch(&payload).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].weight, 50.5);
        assert_eq!(batch[0].timestamp, 1000);
        assert_eq!(batch[1].weight, -5.25);
        assert_eq!(batch[1].timestamp, 1010);
    }

    #[test]
    fn weight_batch_rejects_partial_records() {
        assert!(matches!(
            parse_weight_batch(&[0; 5]),
            Err(Error::InvalidLength { actual: 5, .. })
        ));
        assert!(parse_weight_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn battery_percentage_is_clamped_and_rounded() {
        let pct = |mv: u16| parse_battery_voltage(&mv.to_le_bytes()).unwrap().percentage;
        assert_eq!(pct(3000), 0);
        assert_eq!(pct(4200), 100);
        assert_eq!(pct(3600), 50);
        assert_eq!(pct(2800), 0);
        assert_eq!(pct(4500), 100);
        assert_eq!(pct(3850), 71);
    }

    #[test]
    fn battery_voltage_is_little_endian() {
        let info = parse_battery_voltage(&[0x10, 0x0e]).unwrap();
        assert_eq!(info.voltage, 3600);
        assert!(parse_battery_voltage(&[1, 2, 3]).is_err());
    }

    #[test]
    fn firmware_version_is_formatted() {
        assert_eq!(parse_firmware_version(&[1, 2, 3]).unwrap().version, "1.2.3");
        assert_eq!(parse_firmware_version(&[0, 0, 0]).unwrap().version, "0.0.0");
        assert!(matches!(
            parse_firmware_version(&[1, 2]),
            Err(Error::InvalidLength { actual: 2, .. })
        ));
    }

    #[test]
    fn error_info_strips_padding() {
        assert_eq!(parse_error_info(b"no errors\0\0").message, "no errors");
    }

    #[test]
    fn classifies_responses_by_tag() {
        let mut bytes = vec![1, 8];
        bytes.extend(weight_record(12.0, 7));
        assert_eq!(
            Response::try_from(bytes.as_slice()).unwrap(),
            Response::Weight(vec![WeightMeasurement {
                weight: 12.0,
                timestamp: 7
            }])
        );
        assert_eq!(
            Response::try_from(&[4u8, 0][..]).unwrap(),
            Response::LowBatteryWarning
        );
        assert_eq!(
            Response::try_from(&[0u8, 2, 0x10, 0x0e][..]).unwrap(),
            Response::CommandResponse(vec![0x10, 0x0e])
        );
        assert_eq!(
            Response::try_from(&[9u8, 1, 0xff][..]).unwrap(),
            Response::Unknown {
                tag: 9,
                payload: vec![0xff]
            }
        );
        assert!(Response::try_from(&[1u8, 3, 0, 0, 0][..]).is_err());
    }
}
