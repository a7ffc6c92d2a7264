//! Device-level error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::transport::{TransportError, TransportKind};

/// Coarse error class, kept as the device's last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Open,
    Query,
    Configure,
    Io,
    Close,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Argument => write!(f, "argument error"),
            ErrorKind::Open => write!(f, "open error"),
            ErrorKind::Query => write!(f, "query error"),
            ErrorKind::Configure => write!(f, "configure error"),
            ErrorKind::Io => write!(f, "io error"),
            ErrorKind::Close => write!(f, "close error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Open failed: {message}")]
    Open {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("Configure failed: {message}")]
    Configure {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("I/O error on {transport}: {source}")]
    Io {
        transport: TransportKind,
        #[source]
        source: TransportError,
    },

    #[error("Close failed: {0}")]
    Close(String),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Argument(_) => ErrorKind::Argument,
            DeviceError::Open { .. } => ErrorKind::Open,
            DeviceError::Query { .. } => ErrorKind::Query,
            DeviceError::Configure { .. } => ErrorKind::Configure,
            DeviceError::Io { .. } => ErrorKind::Io,
            DeviceError::Close(_) => ErrorKind::Close,
        }
    }

    /// OS error code behind this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            DeviceError::Open { source, .. }
            | DeviceError::Query { source, .. }
            | DeviceError::Configure { source, .. } => {
                source.as_ref().and_then(TransportError::raw_os_error)
            }
            DeviceError::Io { source, .. } => source.raw_os_error(),
            DeviceError::Argument(_) | DeviceError::Close(_) => None,
        }
    }

    pub(crate) fn open(message: impl Into<String>) -> Self {
        DeviceError::Open {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn open_with(message: impl Into<String>, source: TransportError) -> Self {
        DeviceError::Open {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn query_with(message: impl Into<String>, source: TransportError) -> Self {
        DeviceError::Query {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn configure(message: impl Into<String>) -> Self {
        DeviceError::Configure {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn configure_with(message: impl Into<String>, source: TransportError) -> Self {
        DeviceError::Configure {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Snapshot of the most recent failure on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub os_code: Option<i32>,
}

impl From<&DeviceError> for LastError {
    fn from(err: &DeviceError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                message.push_str(": ");
                message.push_str(&cause_text);
            }
            source = cause.source();
        }
        Self {
            kind: err.kind(),
            message,
            os_code: err.os_code(),
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.os_code {
            write!(f, " (os error {code})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_kind_and_os_code() {
        let err = DeviceError::open_with(
            "Opening serial /dev/ttyS9",
            TransportError::Io(io::Error::from_raw_os_error(libc::ENOENT)),
        );
        assert_eq!(err.kind(), ErrorKind::Open);
        assert_eq!(err.os_code(), Some(libc::ENOENT));

        let err = DeviceError::Argument("Invalid channel 9".to_string());
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.os_code(), None);
    }

    #[test]
    fn test_last_error_includes_cause() {
        let err = DeviceError::configure_with(
            "Setting mode",
            TransportError::Timeout { timeout_ms: 200 },
        );
        let last = LastError::from(&err);
        assert_eq!(last.kind, ErrorKind::Configure);
        assert_eq!(
            last.message,
            "Configure failed: Setting mode: Timeout after 200ms"
        );
        assert_eq!(
            last.to_string(),
            "configure error: Configure failed: Setting mode: Timeout after 200ms"
        );
    }

    #[test]
    fn test_io_error_keeps_transport_and_os_code() {
        let err = DeviceError::Io {
            transport: TransportKind::UsbHid,
            source: TransportError::Io(io::Error::from_raw_os_error(libc::ENODEV)),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.os_code(), Some(libc::ENODEV));

        let last = LastError::from(&err);
        assert_eq!(last.kind, ErrorKind::Io);
        assert_eq!(last.os_code, Some(libc::ENODEV));
        assert!(last.message.starts_with("I/O error on usb-hid: IO error: "));
        // The cause is already part of the message and is not repeated.
        assert_eq!(last.message.matches("IO error").count(), 1);
    }
}
