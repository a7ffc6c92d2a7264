//! Protocol module - AW5808 wire definitions.

pub mod command;
pub mod constants;
pub mod frame;
pub mod hid_report;

pub use command::{Command, ConfigReport, ConnectMode, I2sMode, Mode, PairStatus, RfStatus};
pub use constants::*;
pub use frame::{Decoded, Frame, FrameError, decode, encode};
pub use hid_report::HidReport;
