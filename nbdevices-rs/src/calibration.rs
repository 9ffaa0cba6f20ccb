use crate::{BlobParameter, CalibrationError, Device, SessionState};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use directories::UserDirs;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// Directory below the public downloads folder holding calibration blobs.
pub const CALIBRATION_DIR: &str = "NBData";

/// Flat files holding one calibration blob per device serial number.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CalibrationStore {
    root: PathBuf,
}

impl CalibrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CalibrationStore { root: root.into() }
    }

    /// `<downloads>/NBData`, if the platform has a downloads directory.
    pub fn in_downloads() -> Option<Self> {
        let dirs = UserDirs::new()?;
        let downloads = dirs.download_dir()?;

        Some(Self::new(downloads.join(CALIBRATION_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, serial_number: &str) -> Result<PathBuf, CalibrationError> {
        if serial_number.is_empty()
            || serial_number.contains(|c: char| c == '/' || c == '\\')
            || serial_number == "."
            || serial_number == ".."
        {
            return Err(CalibrationError::io(
                &self.root,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("serial number `{}` can not name a file", serial_number),
                ),
            ));
        }

        Ok(self.root.join(format!("{}_calblob.bin", serial_number)))
    }

    /// Reads the blob of `serial_number`. A missing file is `None`.
    pub fn load(&self, serial_number: &str) -> Result<Option<Vec<u8>>, CalibrationError> {
        let path = self.path_for(serial_number)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CalibrationError::io(&path, err)),
        }
    }

    /// Writes the whole blob, replacing an existing one.
    pub fn save(&self, serial_number: &str, data: &[u8]) -> Result<PathBuf, CalibrationError> {
        let path = self.path_for(serial_number)?;
        fs::create_dir_all(&self.root).map_err(|err| CalibrationError::io(&self.root, err))?;
        fs::write(&path, data).map_err(|err| CalibrationError::io(&path, err))?;

        Ok(path)
    }

    pub fn exists(&self, serial_number: &str) -> bool {
        self.path_for(serial_number)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}

/// Asks the user whether calibration may run now. Generation needs a clean, untouched sensor
/// and takes a long time, so it is never started silently.
pub trait Confirm: Send + Sync {
    fn confirm(&self, device: &Device) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&Device) -> bool + Send + Sync,
{
    fn confirm(&self, device: &Device) -> bool {
        self(device)
    }
}

#[derive(Debug)]
pub enum CalibrationOutcome {
    /// The device needs no external calibration data.
    NotRequired,
    /// Stored calibration data was pushed to the device.
    Applied,
    /// A generation is already running elsewhere in the process.
    Pending,
    /// Generation was started on a worker.
    Generating(GenerationTask),
}

/// Handle to a running calibration generation.
#[derive(Debug)]
pub struct GenerationTask {
    serial_number: String,
    receiver: Receiver<Result<CalibrationOutcome, CalibrationError>>,
}

impl GenerationTask {
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Blocks until the worker is done. `Ok` carries the outcome of pushing the fresh blob.
    pub fn wait(self) -> Result<CalibrationOutcome, CalibrationError> {
        self.receiver
            .recv()
            .unwrap_or(Err(CalibrationError::WorkerLost))
    }

    /// Like `wait`, but gives up after `timeout` and returns `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<CalibrationOutcome, CalibrationError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CalibrationError::WorkerLost)),
        }
    }
}

fn process_guard() -> Arc<AtomicBool> {
    static GUARD: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    GUARD
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

/// Holds the single-flight flag and clears it when dropped.
struct GuardRelease(Arc<AtomicBool>);

impl GuardRelease {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardRelease(flag.clone()))
    }
}

impl Drop for GuardRelease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Makes sure devices that need external calibration data have it.
///
/// Stored blobs are pushed straight away. A missing blob is generated on the device, at most
/// once at a time in the whole process, after the user agreed.
#[derive(Clone)]
pub struct CalibrationManager {
    store: CalibrationStore,
    confirm: Arc<dyn Confirm>,
    guard: Arc<AtomicBool>,
}

impl CalibrationManager {
    pub fn new(store: CalibrationStore, confirm: impl Confirm + 'static) -> Self {
        CalibrationManager {
            store,
            confirm: Arc::new(confirm),
            guard: process_guard(),
        }
    }

    /// Uses `guard` instead of the process-wide single-flight flag.
    pub fn with_guard(mut self, guard: Arc<AtomicBool>) -> Self {
        self.guard = guard;
        self
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Whether a generation currently holds the single-flight flag.
    pub fn is_generating(&self) -> bool {
        self.guard.load(Ordering::Acquire)
    }

    pub fn ensure_calibration(
        &self,
        device: &Device,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        if device.is_disposed() {
            return Err(CalibrationError::Disposed);
        }
        if !device.requires_external_calibration_data() {
            return Ok(CalibrationOutcome::NotRequired);
        }
        if device.session_state() != SessionState::Open {
            return Err(CalibrationError::SessionClosed);
        }

        let serial_number = device.get_serial_number();
        if let Some(blob) = self.store.load(serial_number)? {
            device
                .driver()
                .set_blob_parameter(BlobParameter::CalibrationData, Some(&blob))
                .map_err(CalibrationError::ApplyFailed)?;
            info!(
                "Applied {} bytes of calibration data to {}",
                blob.len(),
                serial_number
            );
            return Ok(CalibrationOutcome::Applied);
        }

        let release = match GuardRelease::acquire(&self.guard) {
            Some(release) => release,
            None => {
                debug!("Calibration already being generated, {} waits", serial_number);
                return Ok(CalibrationOutcome::Pending);
            }
        };

        if !self.confirm.confirm(device) {
            warn!("Calibration of {} declined", serial_number);
            return Err(CalibrationError::UserDeclined);
        }

        let (sender, receiver) = bounded(1);
        let manager = self.clone();
        let worker_device = device.clone();
        thread::Builder::new()
            .name("nb-calibration".to_string())
            .spawn(move || {
                let result = manager.generate(&worker_device);
                drop(release);
                let _ = sender.send(result);
            })
            .map_err(|err| {
                warn!("Can not start calibration worker: {}", err);
                CalibrationError::WorkerLost
            })?;
        info!("Generating calibration data for {}", serial_number);

        Ok(CalibrationOutcome::Generating(GenerationTask {
            serial_number: serial_number.to_string(),
            receiver,
        }))
    }

    fn generate(&self, device: &Device) -> Result<CalibrationOutcome, CalibrationError> {
        let serial_number = device.get_serial_number();
        let data = device
            .driver()
            .generate_calibration_data()
            .map_err(|err| {
                warn!("Calibration generation on {} failed: {}", serial_number, err);
                CalibrationError::GenerationFailed(err)
            })?;

        let path = self.store.save(serial_number, &data)?;
        info!(
            "Stored {} bytes of calibration data at {}",
            data.len(),
            path.display()
        );

        self.ensure_calibration(device)
    }
}
