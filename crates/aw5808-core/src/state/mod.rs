//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, handle_frame};
pub use machine::{DeviceState, DeviceStatus};
