use crate::{
    CalibrationError, CalibrationManager, CalibrationOutcome, Canceller, CaptureController,
    Confirm, ConnectionType, Device, DeviceChange, DeviceRegistry, DeviceState, NBError, ScanFormat, ScanMessage,
    ScanResult, ScanSink, SessionManager, Settings, SpiBus, Transport,
};
use crate::calibration::GenerationTask;
use log::{info, warn};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Verbs understood by [`Reader::execute`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Command {
    Connect,
    ConnectToSpi,
    ScanSnapshot,
    ScanContinuous,
    GetStatus,
    GetFingerDetectValue,
    SoftReset,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Connect,
        Command::ConnectToSpi,
        Command::ScanSnapshot,
        Command::ScanContinuous,
        Command::GetStatus,
        Command::GetFingerDetectValue,
        Command::SoftReset,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::ConnectToSpi => "CONNECT_TO_SPI",
            Command::ScanSnapshot => "SCAN_SNAPSHOT",
            Command::ScanContinuous => "SCAN_CONTINUOUS",
            Command::GetStatus => "GET_STATUS",
            Command::GetFingerDetectValue => "GET_FINGER_DETECT_VALUE",
            Command::SoftReset => "SOFT_RESET",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Command {
    type Err = NBError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        Command::ALL
            .iter()
            .copied()
            .find(|command| command.name() == wanted)
            .ok_or_else(|| NBError::UnknownCommand(s.to_string()))
    }
}

/// Human readable report of the connected device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub id: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub module_serial_number: String,
    pub product: String,
    pub firmware_version: String,
    pub device_type: String,
    pub connection_type: ConnectionType,
    pub state: Option<DeviceState>,
    pub scan_formats: Vec<ScanFormat>,
    pub calibration_path: Option<PathBuf>,
    pub calibration_missing: bool,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Id: {}", self.id)?;
        writeln!(f, "Manufacturer: {}", self.manufacturer)?;
        writeln!(f, "Model: {}", self.model)?;
        writeln!(f, "Serial number: {}", self.serial_number)?;
        if self.module_serial_number != self.serial_number {
            writeln!(f, "Module serial number: {}", self.module_serial_number)?;
        }
        writeln!(f, "Product: {}", self.product)?;
        writeln!(f, "Firmware: {}", self.firmware_version)?;
        writeln!(f, "Type: {}", self.device_type)?;
        writeln!(f, "Connection: {}", self.connection_type)?;
        match self.state {
            Some(state) => writeln!(f, "State: {}", state)?,
            None => writeln!(f, "State: unknown")?,
        }
        let formats: Vec<String> = self.scan_formats.iter().map(ToString::to_string).collect();
        writeln!(f, "Scan formats: {}", formats.join(", "))?;
        if let Some(path) = &self.calibration_path {
            writeln!(f, "Calibration data: {}", path.display())?;
        }
        if self.calibration_missing {
            writeln!(f, "Compensation data missing")?;
        }

        Ok(())
    }
}

/// What a command produced.
#[derive(Debug, Clone)]
pub enum CommandOutput {
    Connected(String),
    NoDevice,
    Scanned(ScanResult),
    Status(DeviceStatus),
    FingerDetectValue(i32),
    Reset,
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandOutput::Connected(id) => write!(f, "Connected to {}", id),
            CommandOutput::NoDevice => write!(f, "No device found"),
            CommandOutput::Scanned(result) => write!(f, "{}", result),
            CommandOutput::Status(status) => write!(f, "{}", status),
            CommandOutput::FingerDetectValue(value) => write!(f, "Finger detect value: {}", value),
            CommandOutput::Reset => write!(f, "Device reset"),
        }
    }
}

/// The application's device context: owns at most one connected device, brings it up
/// (session, then calibration) and runs commands against it.
pub struct Reader {
    registry: DeviceRegistry,
    sessions: SessionManager,
    calibration: CalibrationManager,
    capture: CaptureController,
    spi: SpiBus,
    scan_timeout: Duration,
    device: Option<Device>,
    known_id: Option<String>,
    pending: Option<GenerationTask>,
    /// Calibration was put off while another device generated its data.
    deferred: bool,
}

impl Reader {
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: SessionManager,
        calibration: CalibrationManager,
        capture: CaptureController,
    ) -> Self {
        let settings = Settings::default();

        Reader {
            registry: DeviceRegistry::new(transport),
            sessions,
            calibration,
            capture,
            spi: settings.spi_bus(),
            scan_timeout: settings.continuous_timeout(),
            device: None,
            known_id: None,
            pending: None,
            deferred: false,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        confirm: impl Confirm + 'static,
    ) -> crate::Result<Self> {
        let credentials = settings.credential_store()?;
        let sessions = SessionManager::new(Arc::new(credentials)).with_probe(settings.session.probe);
        let calibration = CalibrationManager::new(settings.calibration_store()?, confirm);

        Ok(Self::new(transport, sessions, calibration, settings.capture_controller())
            .with_spi_bus(settings.spi_bus())
            .with_scan_timeout(settings.continuous_timeout()))
    }

    pub fn with_spi_bus(mut self, bus: SpiBus) -> Self {
        self.spi = bus;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    fn current(&self) -> crate::Result<&Device> {
        self.device.as_ref().ok_or(NBError::NoDevice)
    }

    fn default_format(device: &Device) -> crate::Result<ScanFormat> {
        device
            .get_default_scan_format()
            .ok_or_else(|| NBError::NoScanFormat(device.get_id().to_string()))
    }

    /// Connects the previously used sensor, or the first available one. Returns the id of the
    /// adopted device, `None` if no sensor is reachable.
    pub fn connect(&mut self) -> crate::Result<Option<String>> {
        self.release();
        let device = match self.registry.connect_by_identity(self.known_id.as_deref()) {
            Some(device) => device,
            None => {
                info!("No device available");
                return Ok(None);
            }
        };

        self.adopt(device).map(Some)
    }

    /// Connects through the configured SPI endpoint.
    pub fn connect_spi(&mut self) -> crate::Result<String> {
        self.release();
        let bus = self.spi.clone();
        let device = self.registry.connect_by_bus(
            &bus.name,
            bus.awake_pin,
            bus.reset_pin,
            bus.chip_select_pin,
        )?;

        self.adopt(device)
    }

    /// Opens the session and brings calibration up to date. A failed session releases the
    /// device; a declined calibration keeps it.
    pub fn adopt(&mut self, device: Device) -> crate::Result<String> {
        self.release();
        let id = device.get_id().to_string();
        info!("Adopting device {} ({})", id, device.get_serial_number());

        if let Err(err) = self.sessions.open_session(&device) {
            device.dispose();
            return Err(err.into());
        }

        match self.calibration.ensure_calibration(&device) {
            Ok(CalibrationOutcome::Generating(task)) => self.pending = Some(task),
            Ok(CalibrationOutcome::Pending) => {
                info!("Calibration of another device in progress, {} stays uncalibrated", id);
                self.deferred = true;
            }
            Ok(_) => {}
            Err(CalibrationError::UserDeclined) => {
                warn!("Device {} runs without compensation data", id)
            }
            Err(err) => {
                if let Err(close) = self.sessions.close_session(&device) {
                    warn!("Session on {} not closed: {}", id, close);
                }
                device.dispose();
                return Err(err.into());
            }
        }

        self.known_id = Some(id.clone());
        self.device = Some(device);

        Ok(id)
    }

    /// Waits for a calibration started by the last adoption, if any.
    pub fn wait_for_calibration(&mut self) -> crate::Result<Option<CalibrationOutcome>> {
        match self.pending.take() {
            Some(task) => Ok(Some(task.wait()?)),
            None => Ok(None),
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.pending.is_some()
    }

    /// Checks on calibration without blocking. Reports a finished generation, or retries one
    /// put off while another device was generating; `None` while nothing has settled.
    pub fn poll_calibration(&mut self) -> crate::Result<Option<CalibrationOutcome>> {
        if let Some(task) = self.pending.take() {
            return match task.wait_timeout(Duration::from_millis(0)) {
                Some(result) => Ok(Some(result?)),
                None => {
                    self.pending = Some(task);
                    Ok(None)
                }
            };
        }
        if !self.deferred {
            return Ok(None);
        }

        let device = self.current()?.clone();
        self.deferred = false;
        match self.calibration.ensure_calibration(&device)? {
            CalibrationOutcome::Pending => {
                self.deferred = true;
                Ok(None)
            }
            CalibrationOutcome::Generating(task) => {
                self.pending = Some(task);
                Ok(None)
            }
            outcome => Ok(Some(outcome)),
        }
    }

    /// Follows a notification from [`DeviceRegistry::watch`]. Losing the current sensor
    /// releases it; a new sensor is connected while none is adopted. Returns the id of a
    /// newly adopted device.
    pub fn on_device_change(&mut self, change: DeviceChange) -> crate::Result<Option<String>> {
        match change {
            DeviceChange::Removed(id) => {
                if self.device.as_ref().map(Device::get_id) == Some(id.as_str()) {
                    info!("Device {} removed", id);
                    self.release();
                }
                Ok(None)
            }
            DeviceChange::Added(id) if self.device.is_none() => {
                info!("Device {} added", id);
                self.connect()
            }
            DeviceChange::Added(_) => Ok(None),
        }
    }

    pub fn scan_snapshot(&self) -> crate::Result<ScanResult> {
        let device = self.current()?;
        let format = Self::default_format(device)?;

        Ok(self.capture.start_snapshot(device, &format)?)
    }

    pub fn scan_continuous(&self, sink: &mut dyn ScanSink) -> crate::Result<ScanResult> {
        let device = self.current()?;
        let format = Self::default_format(device)?;

        Ok(self
            .capture
            .start_continuous(device, &format, self.scan_timeout, sink)?)
    }

    /// Handle for aborting a scan from another thread.
    pub fn canceller(&self) -> Option<Canceller> {
        self.device
            .as_ref()
            .map(|device| self.capture.canceller(device))
    }

    pub fn status(&self) -> crate::Result<DeviceStatus> {
        let device = self.current()?;
        let info = device.get_info();
        let state = match self.capture.state(device) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("Device state unavailable: {}", err);
                None
            }
        };

        let store = self.calibration.store();
        let needs_calibration = device.requires_external_calibration_data();
        let calibration_path = if needs_calibration {
            store.path_for(&info.serial_number).ok()
        } else {
            None
        };

        Ok(DeviceStatus {
            id: info.id.clone(),
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
            serial_number: info.serial_number.clone(),
            module_serial_number: info.module_serial_number.clone(),
            product: info.product.clone(),
            firmware_version: info.firmware_version.clone(),
            device_type: info.device_type.clone(),
            connection_type: info.connection_type,
            state,
            scan_formats: info.scan_formats.clone(),
            calibration_missing: needs_calibration && !store.exists(&info.serial_number),
            calibration_path,
        })
    }

    pub fn finger_detect_value(&self) -> crate::Result<i32> {
        Ok(self.capture.finger_detect_value(self.current()?)?)
    }

    pub fn soft_reset(&self) -> crate::Result<()> {
        Ok(self.capture.reset(self.current()?)?)
    }

    /// Runs one command. Continuous scans stream their messages into `sink`; every other
    /// command only returns its output.
    pub fn execute(
        &mut self,
        command: Command,
        sink: &mut dyn ScanSink,
    ) -> crate::Result<CommandOutput> {
        info!("Executing {}", command);
        let output = match command {
            Command::Connect => match self.connect()? {
                Some(id) => CommandOutput::Connected(id),
                None => CommandOutput::NoDevice,
            },
            Command::ConnectToSpi => CommandOutput::Connected(self.connect_spi()?),
            Command::ScanSnapshot => CommandOutput::Scanned(self.scan_snapshot()?),
            Command::ScanContinuous => CommandOutput::Scanned(self.scan_continuous(sink)?),
            Command::GetStatus => CommandOutput::Status(self.status()?),
            Command::GetFingerDetectValue => {
                CommandOutput::FingerDetectValue(self.finger_detect_value()?)
            }
            Command::SoftReset => {
                self.soft_reset()?;
                CommandOutput::Reset
            }
        };

        Ok(output)
    }

    /// Drops the current device: aborts its scan, closes its session and disposes it.
    pub fn release(&mut self) {
        self.deferred = false;
        if let Some(device) = self.device.take() {
            self.capture.cancel(&device);
            if let Err(err) = self.sessions.close_session(&device) {
                warn!("Session on {} not closed: {}", device.get_id(), err);
            }
            device.dispose();
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sink that ignores everything, for commands run without a preview consumer.
pub fn discard(_: ScanMessage) {}
