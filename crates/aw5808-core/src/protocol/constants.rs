// Serial framing
pub const PREAMBLE: u8 = 0x55;
pub const DELIMITER: u8 = 0xAA;
/// Preamble + delimiter + length byte.
pub const HEADER_LEN: usize = 3;
/// Header + command id + checksum.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 2;
/// Smallest buffer that can hold a header and a command id.
pub const MIN_DECODE_LEN: usize = HEADER_LEN + 1;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
pub const MAX_FRAME_LEN: usize = FRAME_OVERHEAD + MAX_PAYLOAD_LEN;

// Request command ids (host -> device)
pub const CMD_GET_CONFIG: u8 = 0x50;
pub const CMD_GET_RFSTATUS: u8 = 0x51;
pub const CMD_NOTIFY_RFSTATUS: u8 = 0x52; // unsolicited, device -> host
pub const CMD_PAIR: u8 = 0x53;
pub const CMD_SET_MODE: u8 = 0x54;
pub const CMD_SET_I2S_MODE: u8 = 0x55;
pub const CMD_SET_CONNECT_MODE: u8 = 0x56;
pub const CMD_SET_RFCHANNEL: u8 = 0x57;
pub const CMD_SET_RFPOWER: u8 = 0x58;

/// Replies set the high bit of the request id.
pub const REPLY_FLAG: u8 = 0x80;

// Request payload fillers
pub const QUERY_FILLER: u8 = 0x00;
pub const ACK_FILLER: u8 = 0xFF;

// Payload lengths
pub const CONFIG_REPORT_LEN: usize = 6;
pub const SINGLE_BYTE_LEN: usize = 1;

// Value ranges
pub const RF_CHANNEL_MIN: u8 = 1;
pub const RF_CHANNEL_MAX: u8 = 8;
pub const RF_POWER_MIN: u8 = 1;
pub const RF_POWER_MAX: u8 = 16;

// USB identity
pub const AW5808_VENDOR_ID: u16 = 0x25A7;
pub const AW5808_PRODUCT_ID: u16 = 0x5804;
pub const HIDRAW_SUBSYSTEM: &str = "hidraw";

/// Netlink multicast group of the kernel's raw uevents.
pub const KERNEL_UEVENT_GROUP: u32 = 1;
/// Netlink multicast group udevd re-broadcasts processed events on.
pub const UDEV_UEVENT_GROUP: u32 = 2;
pub const UDEV_MONITOR_PREFIX: &[u8] = b"libudev\0";
pub const UDEV_MONITOR_MAGIC: u32 = 0xFEED_CAFE;
/// Prefix, magic, header size, properties offset and length.
pub const UDEV_MONITOR_HEADER_LEN: usize = 24;

// HID register reports
pub const HID_REPORT_LEN: usize = 64;
pub const HID_REPORT_DATA_LEN: usize = HID_REPORT_LEN - 3;
pub const HID_RW_WRITE: u8 = 0x01;
pub const HID_RW_READ: u8 = 0x02;
pub const HID_REG_FIRMWARE_VERSION: u8 = 0x00;
pub const HID_FIRMWARE_VERSION_LEN: u8 = 0x02;

// Serial link
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 200;

// I/O buffers
/// Receive/send buffer growth granularity.
pub const IO_SIZE: usize = 2 * 1024;
pub const MAX_RECV_BUF_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_READ_PER_POLL: usize = 64 * 1024;
