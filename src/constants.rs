use num_enum::{FromPrimitive, IntoPrimitive};
use uuid::Uuid;

pub const PROGRESSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x7e4e1701_1ea6_40c9_9dcc_13d34ffead57);
pub const DATA_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x7e4e1702_1ea6_40c9_9dcc_13d34ffead57);
pub const CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7e4e1703_1ea6_40c9_9dcc_13d34ffead57);

pub const DEVICE_NAME_PREFIX: &str = "Progressor";

/// Battery cell voltage treated as empty, in millivolts.
pub const BATTERY_EMPTY_MV: u16 = 3000;
/// Battery cell voltage treated as full, in millivolts.
pub const BATTERY_FULL_MV: u16 = 4200;

/// Size of one weight record: f32 weight + u32 timestamp.
pub const WEIGHT_RECORD_LEN: usize = 8;

/// Outbound command tags written to the control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum CommandTag {
    Tare = 100,
    StartWeightMeasurement = 101,
    StopWeightMeasurement = 102,
    StartPeakRfdMeasurement = 103,
    StartPeakRfdMeasurementSeries = 104,
    AddCalibrationPoint = 105,
    SaveCalibration = 106,
    GetAppVersion = 107,
    GetErrorInfo = 108,
    ClearErrorInfo = 109,
    Sleep = 110,
    GetBatteryVoltage = 111,
}

impl CommandTag {
    pub const ALL: [CommandTag; 12] = [
        CommandTag::Tare,
        CommandTag::StartWeightMeasurement,
        CommandTag::StopWeightMeasurement,
        CommandTag::StartPeakRfdMeasurement,
        CommandTag::StartPeakRfdMeasurementSeries,
        CommandTag::AddCalibrationPoint,
        CommandTag::SaveCalibration,
        CommandTag::GetAppVersion,
        CommandTag::GetErrorInfo,
        CommandTag::ClearErrorInfo,
        CommandTag::Sleep,
        CommandTag::GetBatteryVoltage,
    ];
}

/// Inbound response tags seen on the data characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ResponseTag {
    CommandResponse = 0,
    WeightMeasurement = 1,
    RfdPeak = 2,
    RfdPeakSeries = 3,
    LowBatteryWarning = 4,

    #[num_enum(catch_all)]
    Unknown(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_match_wire_values() {
        assert_eq!(u8::from(CommandTag::Tare), 100);
        assert_eq!(u8::from(CommandTag::StartWeightMeasurement), 101);
        assert_eq!(u8::from(CommandTag::StopWeightMeasurement), 102);
        assert_eq!(u8::from(CommandTag::GetAppVersion), 107);
        assert_eq!(u8::from(CommandTag::ClearErrorInfo), 109);
        assert_eq!(u8::from(CommandTag::GetBatteryVoltage), 111);
    }

    #[test]
    fn response_tags_round_trip_and_catch_unknown() {
        assert_eq!(ResponseTag::from_primitive(0), ResponseTag::CommandResponse);
        assert_eq!(ResponseTag::from_primitive(1), ResponseTag::WeightMeasurement);
        assert_eq!(ResponseTag::from_primitive(4), ResponseTag::LowBatteryWarning);
        assert_eq!(ResponseTag::from_primitive(200), ResponseTag::Unknown(200));
        assert_eq!(u8::from(ResponseTag::Unknown(200)), 200);
    }

    #[test]
    fn uuids_share_the_progressor_base() {
        assert_eq!(
            PROGRESSOR_SERVICE_UUID.to_string(),
            "7e4e1701-1ea6-40c9-9dcc-13d34ffead57"
        );
        assert_eq!(
            CONTROL_CHARACTERISTIC_UUID.to_string(),
            "7e4e1703-1ea6-40c9-9dcc-13d34ffead57"
        );
    }
}
