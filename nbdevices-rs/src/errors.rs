use crate::{CredentialKind, DriverError, HandshakeStep};
use failure::Fail;
use std::io;
use std::path::Path;

#[derive(Debug, Fail)]
pub enum ConnectionError {
    #[fail(display = "Device endpoint `{}` is unreachable", _0)]
    Unreachable(String),
    #[fail(display = "Device `{}` is already claimed by a live handle", _0)]
    Claimed(String),
    #[fail(display = "Connection failed: {}", _0)]
    Driver(#[cause] DriverError),
}

#[derive(Debug, Fail)]
pub enum SessionError {
    #[fail(display = "Session handshake failed at step `{}`: {}", step, cause)]
    Step {
        step: HandshakeStep,
        #[cause]
        cause: DriverError,
    },
    #[fail(display = "A session is already open on this device")]
    AlreadyOpen,
    #[fail(display = "Cannot change the session while a scan is running")]
    ScanInProgress,
    #[fail(display = "No {} credential configured", _0)]
    MissingCredential(CredentialKind),
    #[fail(display = "Device handle has been disposed")]
    Disposed,
}

impl SessionError {
    /// Step at which the handshake failed, if it failed inside the device.
    pub fn step(&self) -> Option<HandshakeStep> {
        match self {
            SessionError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[derive(Debug, Fail)]
pub enum CalibrationError {
    #[fail(display = "Device rejected calibration data: {}", _0)]
    ApplyFailed(#[cause] DriverError),
    #[fail(display = "Calibration was declined by the user")]
    UserDeclined,
    #[fail(display = "Calibration data generation failed: {}", _0)]
    GenerationFailed(#[cause] DriverError),
    #[fail(display = "Calibration file `{}` is not accessible: {}", _0, _1)]
    IoFailed(String, #[cause] io::Error),
    #[fail(display = "Calibration worker exited without a result")]
    WorkerLost,
    #[fail(display = "Calibration requires an open session")]
    SessionClosed,
    #[fail(display = "Device handle has been disposed")]
    Disposed,
}

impl CalibrationError {
    pub(crate) fn io(path: &Path, cause: io::Error) -> Self {
        CalibrationError::IoFailed(path.display().to_string(), cause)
    }
}

#[derive(Debug, Clone, Fail)]
pub enum ScanError {
    #[fail(display = "Device fault during scan: {}", _0)]
    DeviceFault(#[cause] DriverError),
    #[fail(display = "Scan was cancelled")]
    Cancelled,
    #[fail(display = "Scan timed out")]
    Timeout,
    #[fail(display = "Another scan is already running on this device")]
    Busy,
    #[fail(display = "Scanning requires an open session")]
    SessionClosed,
    #[fail(display = "Device handle has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum QualityComputationError {
    #[fail(
        display = "Invalid image dimensions: {}x{} at {} dpi with {} bytes",
        width, height, resolution, len
    )]
    InvalidDimensions {
        width: u32,
        height: u32,
        resolution: u32,
        len: usize,
    },
}

#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "Can not read settings file `{}`: {}", _0, _1)]
    Io(String, #[cause] io::Error),
    #[fail(display = "Malformed settings: {}", _0)]
    Parse(#[cause] toml::de::Error),
    #[fail(display = "Invalid credential `{}`: {}", name, reason)]
    Credential { name: String, reason: String },
    #[fail(display = "Platform directory `{}` can not be determined", _0)]
    MissingDirectory(&'static str),
}

/// Umbrella error of the command surface.
#[derive(Debug, Fail)]
pub enum NBError {
    #[fail(display = "{}", _0)]
    Connection(#[cause] ConnectionError),
    #[fail(display = "{}", _0)]
    Session(#[cause] SessionError),
    #[fail(display = "{}", _0)]
    Calibration(#[cause] CalibrationError),
    #[fail(display = "{}", _0)]
    Scan(#[cause] ScanError),
    #[fail(display = "{}", _0)]
    Config(#[cause] ConfigError),
    #[fail(display = "{}", _0)]
    Driver(#[cause] DriverError),
    #[fail(display = "No device connected")]
    NoDevice,
    #[fail(display = "Device `{}` offers no scan format", _0)]
    NoScanFormat(String),
    #[fail(display = "Unknown command `{}`", _0)]
    UnknownCommand(String),
}

impl From<ConnectionError> for NBError {
    fn from(err: ConnectionError) -> Self {
        NBError::Connection(err)
    }
}

impl From<SessionError> for NBError {
    fn from(err: SessionError) -> Self {
        NBError::Session(err)
    }
}

impl From<CalibrationError> for NBError {
    fn from(err: CalibrationError) -> Self {
        NBError::Calibration(err)
    }
}

impl From<ScanError> for NBError {
    fn from(err: ScanError) -> Self {
        NBError::Scan(err)
    }
}

impl From<ConfigError> for NBError {
    fn from(err: ConfigError) -> Self {
        NBError::Config(err)
    }
}

impl From<DriverError> for NBError {
    fn from(err: DriverError) -> Self {
        NBError::Driver(err)
    }
}
