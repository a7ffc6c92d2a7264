//! Transport layer module.

pub mod channel;
#[cfg(target_os = "linux")]
pub mod hidraw;
pub mod mock;
pub mod serial;
#[cfg(target_os = "linux")]
pub mod system;
pub mod traits;

pub use channel::{ChannelLimits, IoChannel, ReadStatus};
pub use mock::{MockConnector, MockTransport};
pub use serial::{SerialTransport, list_serial_ports};
#[cfg(target_os = "linux")]
pub use system::SystemConnector;
pub use traits::{Connector, Transport, TransportError, TransportKind, UsbIdentity};
