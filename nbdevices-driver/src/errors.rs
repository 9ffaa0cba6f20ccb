use failure::Fail;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Error reported by a device command. Codes follow the negative errno convention used by the
/// sensor firmware interface: `-ENOENT` for a parameter that was never set, `-ECANCELED` when
/// an operation was aborted, `-ETIMEDOUT` when it ran out of time and so on.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
#[fail(display = "Device command failed (code {}): {}", code, message)]
pub struct DriverError {
    code: i32,
    message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
        }
    }

    /// The requested parameter has never been set on the device.
    pub fn not_set(message: impl Into<String>) -> Self {
        Self::new(-libc::ENOENT, message)
    }

    pub fn cancelled() -> Self {
        Self::new(-libc::ECANCELED, "operation aborted")
    }

    pub fn timed_out() -> Self {
        Self::new(-libc::ETIMEDOUT, "operation timed out")
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(-libc::EACCES, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(-libc::ENODEV, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(-libc::EBUSY, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(-libc::EIO, message)
    }

    /// Raw value does not map onto a known enum variant.
    pub fn invalid_code(what: &str, value: u32) -> Self {
        Self::new(-libc::EINVAL, format!("unknown {} code {}", what, value))
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_set(&self) -> bool {
        self.code == -libc::ENOENT
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == -libc::ECANCELED
    }

    pub fn is_timed_out(&self) -> bool {
        self.code == -libc::ETIMEDOUT
    }

    pub fn is_unreachable(&self) -> bool {
        self.code == -libc::ENODEV
    }
}
