//! Routing of decoded notifications.
//!
//! The wire format has no request identifier, so a one-shot info request is
//! matched to the next command response of the right shape. Only one such
//! request may be outstanding per client; the slot enforces it.

use tokio::sync::oneshot;

use crate::decoding::{
    parse_battery_voltage, parse_error_info, parse_firmware_version, BatteryInfo, ErrorInfo,
    FirmwareVersion, Response, WeightMeasurement,
};
use crate::error::{Error, Result};
use crate::stream::StreamState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InfoRequest {
    Battery,
    Firmware,
    ErrorInfo,
}

impl InfoRequest {
    pub(crate) fn name(self) -> &'static str {
        match self {
            InfoRequest::Battery => "battery voltage",
            InfoRequest::Firmware => "firmware version",
            InfoRequest::ErrorInfo => "error info",
        }
    }

    fn accepts(self, payload: &[u8]) -> bool {
        match self {
            InfoRequest::Battery => payload.len() == 2,
            InfoRequest::Firmware => payload.len() == 3,
            InfoRequest::ErrorInfo => true,
        }
    }

    fn parse(self, payload: &[u8]) -> Result<InfoReply> {
        Ok(match self {
            InfoRequest::Battery => InfoReply::Battery(parse_battery_voltage(payload)?),
            InfoRequest::Firmware => InfoReply::Firmware(parse_firmware_version(payload)?),
            InfoRequest::ErrorInfo => InfoReply::ErrorInfo(parse_error_info(payload)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InfoReply {
    Battery(BatteryInfo),
    Firmware(FirmwareVersion),
    ErrorInfo(ErrorInfo),
}

impl InfoReply {
    pub(crate) fn into_battery(self) -> Result<BatteryInfo> {
        match self {
            InfoReply::Battery(info) => Ok(info),
            _ => Err(Error::UnexpectedReply(InfoRequest::Battery.name())),
        }
    }

    pub(crate) fn into_firmware(self) -> Result<FirmwareVersion> {
        match self {
            InfoReply::Firmware(version) => Ok(version),
            _ => Err(Error::UnexpectedReply(InfoRequest::Firmware.name())),
        }
    }

    pub(crate) fn into_error_info(self) -> Result<ErrorInfo> {
        match self {
            InfoReply::ErrorInfo(info) => Ok(info),
            _ => Err(Error::UnexpectedReply(InfoRequest::ErrorInfo.name())),
        }
    }
}

/// The single outstanding one-shot request.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) kind: InfoRequest,
    reply: oneshot::Sender<Result<InfoReply>>,
}

impl PendingRequest {
    pub(crate) fn new(kind: InfoRequest) -> (Self, oneshot::Receiver<Result<InfoReply>>) {
        let (reply, rx) = oneshot::channel();
        (Self { kind, reply }, rx)
    }

    pub(crate) fn resolve(self, reply: InfoReply) {
        // The caller may have timed out already.
        let _ = self.reply.send(Ok(reply));
    }

    pub(crate) fn fail(self, error: Error) {
        let _ = self.reply.send(Err(error));
    }

    /// The caller stopped waiting.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// What the client should do with one notification.
#[derive(Debug)]
pub(crate) enum Route {
    /// Hand each sample to the weight callback, in order.
    Deliver(Vec<WeightMeasurement>),
    /// Samples decoded while not streaming; dropped.
    Discard(usize),
    /// Complete the pending request.
    Resolve(InfoReply),
    /// Unsolicited battery reading.
    Battery(BatteryInfo),
    /// Push onto the error channel.
    Warning(Error),
    Ignore,
}

pub(crate) fn route(
    response: Response,
    stream: StreamState,
    pending: Option<InfoRequest>,
) -> Result<Route> {
    Ok(match response {
        Response::Weight(batch) if stream.forwards_samples() => Route::Deliver(batch),
        Response::Weight(batch) => Route::Discard(batch.len()),
        Response::CommandResponse(payload) => match pending {
            Some(kind) if kind.accepts(&payload) => Route::Resolve(kind.parse(&payload)?),
            None if payload.len() == 2 => Route::Battery(parse_battery_voltage(&payload)?),
            _ => Route::Ignore,
        },
        Response::LowBatteryWarning => Route::Warning(Error::LowBattery),
        Response::RfdPeak(_) | Response::RfdPeakSeries(_) | Response::Unknown { .. } => {
            Route::Ignore
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(weight: f32) -> WeightMeasurement {
        WeightMeasurement {
            weight,
            timestamp: 0,
        }
    }

    #[test]
    fn weights_follow_stream_state() {
        let batch = vec![sample(1.0), sample(2.0)];
        assert!(matches!(
            route(Response::Weight(batch.clone()), StreamState::Streaming, None).unwrap(),
            Route::Deliver(delivered) if delivered == batch
        ));
        assert!(matches!(
            route(Response::Weight(batch.clone()), StreamState::Paused, None).unwrap(),
            Route::Discard(2)
        ));
        assert!(matches!(
            route(Response::Weight(batch), StreamState::Idle, None).unwrap(),
            Route::Discard(2)
        ));
    }

    #[test]
    fn command_response_resolves_matching_request() {
        let battery = Response::CommandResponse(vec![0x10, 0x0e]);
        match route(battery, StreamState::Idle, Some(InfoRequest::Battery)).unwrap() {
            Route::Resolve(InfoReply::Battery(info)) => assert_eq!(info.voltage, 3600),
            other => panic!("unexpected route {other:?}"),
        }

        let version = Response::CommandResponse(vec![1, 2, 3]);
        match route(version, StreamState::Streaming, Some(InfoRequest::Firmware)).unwrap() {
            Route::Resolve(InfoReply::Firmware(fw)) => assert_eq!(fw.version, "1.2.3"),
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn mismatched_shape_leaves_request_pending() {
        let reply = Response::CommandResponse(vec![1, 2, 3]);
        assert!(matches!(
            route(reply, StreamState::Idle, Some(InfoRequest::Battery)).unwrap(),
            Route::Ignore
        ));
    }

    #[test]
    fn unsolicited_two_byte_reply_is_a_battery_update() {
        let reply = Response::CommandResponse(vec![0xb8, 0x0b]);
        match route(reply, StreamState::Idle, None).unwrap() {
            Route::Battery(info) => {
                assert_eq!(info.voltage, 3000);
                assert_eq!(info.percentage, 0);
            }
            other => panic!("unexpected route {other:?}"),
        }
        assert!(matches!(
            route(Response::CommandResponse(vec![0]), StreamState::Idle, None).unwrap(),
            Route::Ignore
        ));
    }

    #[test]
    fn low_battery_is_a_warning_and_unknown_is_ignored() {
        assert!(matches!(
            route(Response::LowBatteryWarning, StreamState::Streaming, None).unwrap(),
            Route::Warning(Error::LowBattery)
        ));
        let unknown = Response::Unknown {
            tag: 42,
            payload: vec![],
        };
        assert!(matches!(
            route(unknown, StreamState::Streaming, None).unwrap(),
            Route::Ignore
        ));
    }

    #[test]
    fn reply_of_another_kind_is_an_error() {
        let battery = InfoReply::Battery(BatteryInfo {
            voltage: 3600,
            percentage: 50,
        });
        assert!(matches!(
            battery.clone().into_firmware(),
            Err(Error::UnexpectedReply("firmware version"))
        ));
        assert!(matches!(
            battery.clone().into_error_info(),
            Err(Error::UnexpectedReply("error info"))
        ));
        assert_eq!(battery.into_battery().unwrap().voltage, 3600);
    }

    #[tokio::test]
    async fn pending_request_delivers_reply() {
        let (pending, rx) = PendingRequest::new(InfoRequest::ErrorInfo);
        assert_eq!(pending.kind.name(), "error info");
        pending.resolve(InfoReply::ErrorInfo(ErrorInfo {
            message: "ok".into(),
        }));
        assert!(matches!(rx.await, Ok(Ok(InfoReply::ErrorInfo(_)))));
    }
}
