use crate::constants::CommandTag;

/// Encode a command as `[tag, len, payload..]`.
///
/// Payloads are at most a handful of bytes for this protocol; the length
/// byte is the payload length truncated to `u8`.
pub fn encode_command(tag: CommandTag, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + payload.len());
    bytes.push(tag.into());
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    bytes
}

/// AddCalibrationPoint carries the reference weight in kg as a LE f32.
pub fn encode_calibration_point(reference_kg: f32) -> Vec<u8> {
    encode_command(CommandTag::AddCalibrationPoint, &reference_kg.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command_without_payload() {
        assert_eq!(encode_command(CommandTag::Tare, &[]), vec![100, 0]);
        assert_eq!(
            encode_command(CommandTag::StartWeightMeasurement, &[]),
            vec![0x65, 0]
        );
        assert_eq!(
            encode_command(CommandTag::StopWeightMeasurement, &[]),
            vec![0x66, 0]
        );
    }

    #[test]
    fn encodes_command_with_payload() {
        let bytes = encode_command(CommandTag::AddCalibrationPoint, &[1, 2, 3]);
        assert_eq!(bytes, vec![105, 3, 1, 2, 3]);
    }

    #[test]
    fn calibration_point_is_little_endian_float() {
        let bytes = encode_calibration_point(20.0);
        assert_eq!(bytes[0], 105);
        assert_eq!(bytes[1], 4);
        assert_eq!(&bytes[2..], &20.0f32.to_le_bytes());
    }
}
