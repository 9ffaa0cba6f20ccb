use crate::DriverError;
use std::convert::TryFrom;
use std::fmt;

/// Authentication tier declared by the device. It decides which session handshake has to be
/// run before the sensor accepts scan commands.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SecurityModel {
    /// No session is required.
    None = 0,
    /// Single legacy authentication key (65100 family).
    LegacyAuth = 1,
    /// Primary CAK only (65200 family).
    CakOnly = 2,
    /// Primary CAK plus a provisionable CDK (65200 family).
    CakCdk = 3,
}

impl fmt::Display for SecurityModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            SecurityModel::None => "None",
            SecurityModel::LegacyAuth => "LegacyAuth",
            SecurityModel::CakOnly => "CakOnly",
            SecurityModel::CakCdk => "CakCdk",
        };

        write!(f, "{}", string)
    }
}

impl TryFrom<u32> for SecurityModel {
    type Error = DriverError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityModel::None),
            1 => Ok(SecurityModel::LegacyAuth),
            2 => Ok(SecurityModel::CakOnly),
            3 => Ok(SecurityModel::CakCdk),
            n => Err(DriverError::invalid_code("security model", n)),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionType {
    Usb = 0,
    Spi = 1,
    Bluetooth = 2,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            ConnectionType::Usb => "USB",
            ConnectionType::Spi => "SPI",
            ConnectionType::Bluetooth => "Bluetooth",
        };

        write!(f, "{}", string)
    }
}

impl TryFrom<u32> for ConnectionType {
    type Error = DriverError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectionType::Usb),
            1 => Ok(ConnectionType::Spi),
            2 => Ok(ConnectionType::Bluetooth),
            n => Err(DriverError::invalid_code("connection type", n)),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceState {
    Ready = 0,
    Busy = 1,
    Sleeping = 2,
    Fault = 3,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            DeviceState::Ready => "Ready",
            DeviceState::Busy => "Busy",
            DeviceState::Sleeping => "Sleeping",
            DeviceState::Fault => "Fault",
        };

        write!(f, "{}", string)
    }
}

impl TryFrom<u32> for DeviceState {
    type Error = DriverError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceState::Ready),
            1 => Ok(DeviceState::Busy),
            2 => Ok(DeviceState::Sleeping),
            3 => Ok(DeviceState::Fault),
            n => Err(DriverError::invalid_code("device state", n)),
        }
    }
}

/// Opaque parameters written with `Driver::set_blob_parameter`.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlobParameter {
    /// Per-device compensation data.
    CalibrationData = 0,
    /// Provisioning key slot. Writing an empty value clears it.
    SetCdk = 1,
}

impl fmt::Display for BlobParameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            BlobParameter::CalibrationData => "CalibrationData",
            BlobParameter::SetCdk => "SetCdk",
        };

        write!(f, "{}", string)
    }
}

/// Status attached to every frame the sensor produces.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScanStatus {
    Ok = 0,
    NoFinger = 1,
    FingerDetected = 2,
    FingerRemoved = 3,
    BadQuality = 4,
    Canceled = 5,
    Timeout = 6,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            ScanStatus::Ok => "OK",
            ScanStatus::NoFinger => "NO_FINGER",
            ScanStatus::FingerDetected => "FINGER_DETECTED",
            ScanStatus::FingerRemoved => "FINGER_REMOVED",
            ScanStatus::BadQuality => "BAD_QUALITY",
            ScanStatus::Canceled => "CANCELED",
            ScanStatus::Timeout => "TIMEOUT",
        };

        write!(f, "{}", string)
    }
}

impl TryFrom<u32> for ScanStatus {
    type Error = DriverError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScanStatus::Ok),
            1 => Ok(ScanStatus::NoFinger),
            2 => Ok(ScanStatus::FingerDetected),
            3 => Ok(ScanStatus::FingerRemoved),
            4 => Ok(ScanStatus::BadQuality),
            5 => Ok(ScanStatus::Canceled),
            6 => Ok(ScanStatus::Timeout),
            n => Err(DriverError::invalid_code("scan status", n)),
        }
    }
}

/// Image geometry the sensor can capture in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ScanFormat {
    pub width: u32,
    pub height: u32,
    pub horizontal_resolution: u32,
}

impl ScanFormat {
    pub fn new(width: u32, height: u32, horizontal_resolution: u32) -> Self {
        ScanFormat {
            width,
            height,
            horizontal_resolution,
        }
    }

    /// Number of 8-bit greyscale pixels in one image of this format.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for ScanFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} dpi)",
            self.width, self.height, self.horizontal_resolution
        )
    }
}

/// Final frame returned by a scan command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanFrame {
    pub status: ScanStatus,
    pub format: ScanFormat,
    pub image: Vec<u8>,
}

/// A frame together with the finger-detect reading taken for it. Preview callbacks receive
/// these while a continuous scan is running.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanEvent {
    pub status: ScanStatus,
    pub finger_detect_value: i32,
    pub format: ScanFormat,
    pub image: Vec<u8>,
}

impl ScanEvent {
    pub fn from_frame(frame: ScanFrame, finger_detect_value: i32) -> Self {
        ScanEvent {
            status: frame.status,
            finger_detect_value,
            format: frame.format,
            image: frame.image,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Capabilities {
    pub requires_external_calibration_data: bool,
    pub security_model: SecurityModel,
}

/// Static descriptor of a connected sensor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub serial_number: String,
    pub module_serial_number: String,
    pub manufacturer: String,
    pub model: String,
    pub product: String,
    pub firmware_version: String,
    pub device_type: String,
    pub connection_type: ConnectionType,
    pub capabilities: Capabilities,
    /// Ordered by preference, the first entry is the default capture format.
    pub scan_formats: Vec<ScanFormat>,
}

/// Parameters of a direct SPI connection. Pin numbers are GPIO numbers as exported by the
/// platform, already offset by the controller base.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SpiBus {
    pub name: String,
    pub awake_pin: u32,
    pub reset_pin: u32,
    pub chip_select_pin: u32,
}

impl SpiBus {
    pub fn new(name: impl Into<String>, awake_pin: u32, reset_pin: u32, chip_select_pin: u32) -> Self {
        SpiBus {
            name: name.into(),
            awake_pin,
            reset_pin,
            chip_select_pin,
        }
    }
}

impl fmt::Display for SpiBus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (awake {}, reset {}, cs {})",
            self.name, self.awake_pin, self.reset_pin, self.chip_select_pin
        )
    }
}

/// Hot-plug notification emitted by a transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DeviceChange {
    Added(String),
    Removed(String),
}
