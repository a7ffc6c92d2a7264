//! aw5808-core: control library for the AW5808 wireless audio transceiver.
//!
//! The module talks a small framed protocol over a UART and exposes a HID
//! register interface when it enumerates on USB. This crate drives both
//! from one non-blocking reactor.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: frame codec, command ids, typed reports, HID report layout
//! - **Transport**: non-blocking serial/hidraw descriptors, buffered channels, mocks
//! - **Hotplug**: kernel uevent subscription and USB attach/detach matching
//! - **State**: device lifecycle and per-reply handlers
//! - **Events**: observer trait and registry for client decoupling
//! - **Device**: the state machine tying it all together
//! - **Event loop**: `poll(2)` reactor over a table of devices
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use aw5808_core::{Device, DeviceObserver, Mode, OpenOptions, SystemConnector, TracingObserver};
//!
//! let mut device = Device::new(Arc::new(SystemConnector));
//! let observer: Arc<dyn DeviceObserver> = Arc::new(TracingObserver);
//! device.register(&observer)?;
//! device.open(OpenOptions::serial("/dev/ttyS1").with_mode(Mode::Usb))?;
//! device.get_config()?;
//! # Ok::<(), aw5808_core::DeviceError>(())
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod hotplug;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{DEFAULT_CONFIG_PATH, DevctlConfig, DeviceConfig, IoConfig, UsbConfig};
pub use device::{Device, OpenOptions, Source};
pub use dispatch::ObserverRegistry;
pub use error::{DeviceError, ErrorKind, LastError};
pub use event_loop::{EventLoop, LoopClosed, LoopHandle};
pub use events::{DeviceEvent, DeviceObserver, EventKind, EventMask, TracingObserver};
pub use hotplug::{HotplugAction, HotplugEvent, HotplugManager, HotplugSource};
pub use protocol::{Command, ConfigReport, ConnectMode, I2sMode, Mode, PairStatus, RfStatus};
pub use registry::{DeviceId, DeviceTable};
pub use state::{DeviceState, DeviceStatus};
#[cfg(target_os = "linux")]
pub use transport::SystemConnector;
#[cfg(target_os = "linux")]
pub use transport::hidraw::{HidrawNode, UsbDeviceEntry, list_usb_devices};
pub use transport::{
    Connector, MockConnector, MockTransport, Transport, TransportError, TransportKind, UsbIdentity,
};
