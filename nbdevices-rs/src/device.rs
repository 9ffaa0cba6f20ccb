use crate::{
    Capabilities, ConnectionType, DeviceInfo, Driver, ScanFormat, SecurityModel,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Authentication state of a handle, driven by `SessionManager`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Closed,
    Open,
}

/// Scan state of a handle, driven by `CaptureController`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CaptureState {
    Idle,
    Running,
    Cancelling,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            CaptureState::Idle => "Idle",
            CaptureState::Running => "Running",
            CaptureState::Cancelling => "Cancelling",
        };

        write!(f, "{}", string)
    }
}

/// Capture state of a handle together with the ticket of the scan holding it.
#[derive(Debug)]
pub(crate) struct CaptureSlot {
    pub(crate) state: CaptureState,
    /// Ticket of the running scan; `None` while idle or during a pass-through command.
    pub(crate) ticket: Option<u64>,
    issued: u64,
}

impl CaptureSlot {
    fn new() -> Self {
        CaptureSlot {
            state: CaptureState::Idle,
            ticket: None,
            issued: 0,
        }
    }

    /// Ticket the running scan holds, or the one the next scan will get.
    pub(crate) fn current_or_next(&self) -> u64 {
        self.ticket.unwrap_or(self.issued + 1)
    }

    pub(crate) fn begin(&mut self, scan: bool) {
        self.state = CaptureState::Running;
        self.ticket = if scan {
            self.issued += 1;
            Some(self.issued)
        } else {
            None
        };
    }

    pub(crate) fn finish(&mut self) {
        self.state = CaptureState::Idle;
        self.ticket = None;
    }
}

type Release = Box<dyn FnOnce() + Send>;

pub(crate) struct DeviceInner {
    info: DeviceInfo,
    driver: Arc<dyn Driver>,
    session: Mutex<SessionState>,
    capture: Mutex<CaptureSlot>,
    disposed: AtomicBool,
    release: Mutex<Option<Release>>,
}

impl DeviceInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.capture.lock().ticket.is_some() {
            debug!("Aborting running scan on {} before disposal", self.info.id);
            if let Err(err) = self.driver.cancel_scan() {
                warn!("Abort on disposal of {} failed: {}", self.info.id, err);
            }
        }

        let mut session = self.session.lock();
        if *session == SessionState::Open {
            if self.info.capabilities.security_model != SecurityModel::None {
                if let Err(err) = self.driver.close_session() {
                    warn!("Closing session on disposal of {} failed: {}", self.info.id, err);
                }
            }
            *session = SessionState::Closed;
        }
        drop(session);

        self.driver.dispose();
        if let Some(release) = self.release.lock().take() {
            release();
        }

        info!("Disposed device {}", self.info.id);
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Handle to one connected sensor.
///
/// Clones share the same connection, so a scan worker or the calibration worker can keep the
/// device alive while the owner holds on to it. The connection is released by the first call to
/// [`Device::dispose`], or when the last clone is dropped.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub(crate) fn new(driver: Arc<dyn Driver>, release: Option<Release>) -> Self {
        let info = driver.info();

        Device {
            inner: Arc::new(DeviceInner {
                info,
                driver,
                session: Mutex::new(SessionState::Closed),
                capture: Mutex::new(CaptureSlot::new()),
                disposed: AtomicBool::new(false),
                release: Mutex::new(release),
            }),
        }
    }

    /// Wraps a driver that was connected outside of a `DeviceRegistry`. The handle takes
    /// ownership of the connection but does not take part in claim tracking.
    pub fn from_driver(driver: Arc<dyn Driver>) -> Self {
        Self::new(driver, None)
    }

    pub fn get_info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    /// Stable identity used to find the same sensor again after a reconnect.
    pub fn get_id(&self) -> &str {
        &self.inner.info.id
    }

    pub fn get_serial_number(&self) -> &str {
        &self.inner.info.serial_number
    }

    pub fn get_module_serial_number(&self) -> &str {
        &self.inner.info.module_serial_number
    }

    pub fn get_manufacturer(&self) -> &str {
        &self.inner.info.manufacturer
    }

    pub fn get_model(&self) -> &str {
        &self.inner.info.model
    }

    pub fn get_product(&self) -> &str {
        &self.inner.info.product
    }

    pub fn get_firmware_version(&self) -> &str {
        &self.inner.info.firmware_version
    }

    pub fn get_device_type(&self) -> &str {
        &self.inner.info.device_type
    }

    pub fn get_connection_type(&self) -> ConnectionType {
        self.inner.info.connection_type
    }

    pub fn get_capabilities(&self) -> Capabilities {
        self.inner.info.capabilities
    }

    pub fn get_security_model(&self) -> SecurityModel {
        self.inner.info.capabilities.security_model
    }

    pub fn requires_external_calibration_data(&self) -> bool {
        self.inner.info.capabilities.requires_external_calibration_data
    }

    pub fn get_scan_formats(&self) -> &[ScanFormat] {
        &self.inner.info.scan_formats
    }

    /// First supported format, used when the caller does not pick one.
    pub fn get_default_scan_format(&self) -> Option<ScanFormat> {
        self.inner.info.scan_formats.first().copied()
    }

    pub fn session_state(&self) -> SessionState {
        *self.inner.session.lock()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.inner.capture.lock().state
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Releases the hardware. A running scan is aborted and an open session is closed on a
    /// best-effort basis. Calling it again is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.inner.driver.as_ref()
    }

    pub(crate) fn session_slot(&self) -> &Mutex<SessionState> {
        &self.inner.session
    }

    pub(crate) fn capture_slot(&self) -> &Mutex<CaptureSlot> {
        &self.inner.capture
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.info.id)
            .field("serial_number", &self.inner.info.serial_number)
            .field("security_model", &self.inner.info.capabilities.security_model)
            .field("session", &self.session_state())
            .field("capture", &self.capture_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
