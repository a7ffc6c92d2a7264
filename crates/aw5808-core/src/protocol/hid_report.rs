//! Fixed 64-byte HID register report.

use super::constants::{
    HID_FIRMWARE_VERSION_LEN, HID_REG_FIRMWARE_VERSION, HID_REPORT_DATA_LEN, HID_REPORT_LEN,
    HID_RW_READ, HID_RW_WRITE,
};

/// `{rw: u8, reg: u8, len: u8, data: [u8; 61]}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidReport {
    pub rw: u8,
    pub reg: u8,
    pub len: u8,
    pub data: [u8; HID_REPORT_DATA_LEN],
}

impl HidReport {
    pub const SIZE: usize = HID_REPORT_LEN;

    pub fn read_request(reg: u8, len: u8) -> Self {
        Self {
            rw: HID_RW_READ,
            reg,
            len,
            data: [0; HID_REPORT_DATA_LEN],
        }
    }

    /// Register write carrying up to 61 data bytes; extra bytes are dropped.
    pub fn write_request(reg: u8, data: &[u8]) -> Self {
        let len = data.len().min(HID_REPORT_DATA_LEN);
        let mut report = Self {
            rw: HID_RW_WRITE,
            reg,
            len: len as u8,
            data: [0; HID_REPORT_DATA_LEN],
        };
        report.data[..len].copy_from_slice(&data[..len]);
        report
    }

    pub fn firmware_version_request() -> Self {
        Self::read_request(HID_REG_FIRMWARE_VERSION, HID_FIRMWARE_VERSION_LEN)
    }

    pub fn to_bytes(&self) -> [u8; HID_REPORT_LEN] {
        let mut out = [0u8; HID_REPORT_LEN];
        out[0] = self.rw;
        out[1] = self.reg;
        out[2] = self.len;
        out[3..].copy_from_slice(&self.data);
        out
    }

    /// Parse a report; short input is zero-padded, long input is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 || bytes.len() > HID_REPORT_LEN {
            return None;
        }
        let mut data = [0u8; HID_REPORT_DATA_LEN];
        let body = &bytes[3..];
        data[..body.len()].copy_from_slice(body);
        Some(Self {
            rw: bytes[0],
            reg: bytes[1],
            len: bytes[2],
            data,
        })
    }

    /// Valid data bytes, clamped to the data field.
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(HID_REPORT_DATA_LEN)]
    }

    /// Firmware version carried by a read-back of the version register.
    pub fn firmware_version(&self) -> Option<u16> {
        if self.reg != HID_REG_FIRMWARE_VERSION || self.len < HID_FIRMWARE_VERSION_LEN {
            return None;
        }
        Some(u16::from_be_bytes([self.data[0], self.data[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_request_layout() {
        let bytes = HidReport::firmware_version_request().to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..3], &[0x02, 0x00, 0x02]);
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_firmware_version_readback() {
        let mut raw = [0u8; 64];
        raw[..5].copy_from_slice(&[0x02, 0x00, 0x02, 0x01, 0x23]);
        let report = HidReport::from_bytes(&raw).unwrap();
        assert_eq!(report.firmware_version(), Some(0x0123));
        assert_eq!(report.payload(), &[0x01, 0x23]);
    }

    #[test]
    fn test_other_register_is_not_a_version() {
        let report = HidReport::write_request(0x10, &[0xAB]);
        assert_eq!(report.firmware_version(), None);
        assert_eq!(report.payload(), &[0xAB]);
    }

    #[test]
    fn test_from_bytes_bounds() {
        assert!(HidReport::from_bytes(&[0x02, 0x00]).is_none());
        assert!(HidReport::from_bytes(&[0u8; 65]).is_none());
        assert!(HidReport::from_bytes(&[0x02, 0x00, 0x00]).is_some());
    }
}
