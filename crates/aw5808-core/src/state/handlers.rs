//! Inbound frame handlers - dispatch logic for each reply id.
//!
//! Each handler validates the payload, updates the cached status and returns
//! the event to publish. Side effects on the link (the notify ack) are left
//! to the device.

use tracing::{debug, warn};

use crate::events::DeviceEvent;
use crate::protocol::constants::{
    CONFIG_REPORT_LEN, RF_CHANNEL_MAX, RF_CHANNEL_MIN, RF_POWER_MAX, RF_POWER_MIN,
    SINGLE_BYTE_LEN,
};
use crate::protocol::{Command, ConfigReport, ConnectMode, I2sMode, Mode, RfStatus};
use crate::state::machine::DeviceStatus;

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleResult {
    /// Status updated; publish this event.
    Event(DeviceEvent),
    /// Id not in the table.
    Unknown { command: u8 },
    /// Known id with a payload of the wrong size.
    Rejected { command: Command, len: usize },
    /// Single-byte reply whose value is outside the settable range.
    OutOfRange { command: Command, value: u8 },
}

/// What a reply payload must look like.
#[derive(Debug, Clone, Copy)]
enum PayloadRule {
    Any,
    Exact(usize),
    /// One byte within `min..=max`.
    ByteIn(u8, u8),
}

impl PayloadRule {
    fn accepts_len(self, len: usize) -> bool {
        match self {
            PayloadRule::Any => true,
            PayloadRule::Exact(n) => len == n,
            PayloadRule::ByteIn(..) => len == SINGLE_BYTE_LEN,
        }
    }

    fn accepts_value(self, payload: &[u8]) -> bool {
        match self {
            PayloadRule::ByteIn(min, max) => {
                payload.first().is_some_and(|v| (min..=max).contains(v))
            }
            _ => true,
        }
    }
}

type Handler = fn(&mut DeviceStatus, &[u8]) -> DeviceEvent;

struct HandlerEntry {
    command: Command,
    payload: PayloadRule,
    handle: Handler,
}

static DISPATCH_TABLE: [HandlerEntry; 9] = [
    HandlerEntry {
        command: Command::GetConfig,
        payload: PayloadRule::Exact(CONFIG_REPORT_LEN),
        handle: on_config,
    },
    HandlerEntry {
        command: Command::GetRfStatus,
        payload: PayloadRule::Exact(SINGLE_BYTE_LEN),
        handle: on_rfstatus,
    },
    HandlerEntry {
        command: Command::NotifyRfStatus,
        payload: PayloadRule::Exact(SINGLE_BYTE_LEN),
        handle: on_rfstatus_notify,
    },
    HandlerEntry {
        command: Command::Pair,
        payload: PayloadRule::Any,
        handle: on_pair,
    },
    HandlerEntry {
        command: Command::SetMode,
        payload: PayloadRule::Exact(SINGLE_BYTE_LEN),
        handle: on_set_mode,
    },
    HandlerEntry {
        command: Command::SetI2sMode,
        payload: PayloadRule::Exact(SINGLE_BYTE_LEN),
        handle: on_set_i2s_mode,
    },
    HandlerEntry {
        command: Command::SetConnectMode,
        payload: PayloadRule::Exact(SINGLE_BYTE_LEN),
        handle: on_set_connect_mode,
    },
    HandlerEntry {
        command: Command::SetRfChannel,
        payload: PayloadRule::ByteIn(RF_CHANNEL_MIN, RF_CHANNEL_MAX),
        handle: on_set_rfchannel,
    },
    HandlerEntry {
        command: Command::SetRfPower,
        payload: PayloadRule::ByteIn(RF_POWER_MIN, RF_POWER_MAX),
        handle: on_set_rfpower,
    },
];

/// Route one decoded frame by its command id.
pub fn handle_frame(status: &mut DeviceStatus, command_id: u8, payload: &[u8]) -> HandleResult {
    let Some(entry) = DISPATCH_TABLE
        .iter()
        .find(|e| e.command.inbound_id() == command_id)
    else {
        debug!(command = %format!("0x{command_id:02X}"), "No handler");
        return HandleResult::Unknown {
            command: command_id,
        };
    };

    if !entry.payload.accepts_len(payload.len()) {
        warn!(
            command = %entry.command,
            len = payload.len(),
            "Reply has wrong payload length"
        );
        return HandleResult::Rejected {
            command: entry.command,
            len: payload.len(),
        };
    }

    if !entry.payload.accepts_value(payload) {
        warn!(
            command = %entry.command,
            value = ?payload.first(),
            "Reply value out of range"
        );
        return HandleResult::OutOfRange {
            command: entry.command,
            value: payload.first().copied().unwrap_or_default(),
        };
    }

    HandleResult::Event((entry.handle)(status, payload))
}

fn on_config(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    // Length already checked against CONFIG_REPORT_LEN.
    let report = ConfigReport::parse(payload).unwrap_or_default();
    status.firmware_version = Some(report.firmware_version);
    status.mcu_version = Some(report.mcu_version);
    status.mode = report.mode;
    status.rf_channel = report.rf_channel;
    status.rf_power = report.rf_power;
    DeviceEvent::Config(report)
}

fn on_rfstatus(_status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    DeviceEvent::RfStatus(RfStatus::from_byte(payload[0]))
}

fn on_rfstatus_notify(_status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    DeviceEvent::RfStatusNotify(RfStatus::from_byte(payload[0]))
}

fn on_pair(_status: &mut DeviceStatus, _payload: &[u8]) -> DeviceEvent {
    DeviceEvent::Paired
}

fn on_set_mode(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    status.mode = Mode::from_u8(payload[0]);
    DeviceEvent::ModeSet(status.mode)
}

fn on_set_i2s_mode(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    status.i2s_mode = I2sMode::from_u8(payload[0]);
    DeviceEvent::I2sModeSet(status.i2s_mode)
}

fn on_set_connect_mode(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    status.connect_mode = ConnectMode::from_u8(payload[0]);
    DeviceEvent::ConnectModeSet(status.connect_mode)
}

fn on_set_rfchannel(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    status.rf_channel = payload[0];
    DeviceEvent::RfChannelSet(status.rf_channel)
}

fn on_set_rfpower(status: &mut DeviceStatus, payload: &[u8]) -> DeviceEvent {
    status.rf_power = payload[0];
    DeviceEvent::RfPowerSet(status.rf_power)
}
