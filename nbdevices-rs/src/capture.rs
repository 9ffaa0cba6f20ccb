use crate::device::CaptureState;
use crate::{
    Device, DeviceState, DriverError, DriverResult, QualityAlgorithm, QualityScorer, ScanError,
    ScanEvent, ScanFormat, ScanMessage, ScanMode, ScanRequest, ScanResult, ScanSink,
    SessionState,
};
use crossbeam_channel::{after, bounded, select};
use crossbeam_queue::ArrayQueue;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const DEFAULT_PREVIEW_CAPACITY: usize = 16;
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

// Niceness of the audio scheduling class, the level scan workers ask for.
#[cfg(target_os = "linux")]
const SCAN_NICE: libc::c_int = -16;

/// Marks a device as busy for as long as it lives.
struct Running<'a> {
    device: &'a Device,
}

impl<'a> Running<'a> {
    /// `scan` tells a capture, which may be cancelled, from a pass-through command.
    fn enter(device: &'a Device, scan: bool) -> Result<Self, ScanError> {
        if device.is_disposed() {
            return Err(ScanError::Disposed);
        }

        // Held until the slot is taken so the session can not close in between.
        let session = device.session_slot().lock();
        if *session != SessionState::Open {
            return Err(ScanError::SessionClosed);
        }

        let mut slot = device.capture_slot().lock();
        if slot.state != CaptureState::Idle {
            return Err(ScanError::Busy);
        }
        slot.begin(scan);

        Ok(Running { device })
    }

    fn cancelled(&self) -> bool {
        self.device.capture_slot().lock().state == CaptureState::Cancelling
    }
}

impl<'a> Drop for Running<'a> {
    fn drop(&mut self) {
        self.device.capture_slot().lock().finish();
    }
}

fn elevate_current_thread() {
    #[cfg(target_os = "linux")]
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        if libc::setpriority(libc::PRIO_PROCESS, tid, SCAN_NICE) != 0 {
            debug!(
                "Scan worker keeps default priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

fn spawn_worker<F>(name: &str, elevate: bool, body: F) -> Result<(), ScanError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if elevate {
                elevate_current_thread();
            }
            body()
        })
        .map(|_| ())
        .map_err(|err| {
            ScanError::DeviceFault(DriverError::io(format!("can not start scan worker: {}", err)))
        })
}

fn capture_frame(
    device: &Device,
    format: &ScanFormat,
    preview: Option<(Duration, &mut dyn FnMut(ScanEvent))>,
) -> DriverResult<ScanEvent> {
    let driver = device.driver();
    let frame = match preview {
        None => driver.scan(format)?,
        Some((timeout, sink)) => driver.scan_with_preview(format, timeout, sink)?,
    };
    let finger_detect_value = driver.finger_detect_value().unwrap_or_else(|err| {
        warn!("Finger detect value unavailable after scan: {}", err);
        0
    });

    Ok(ScanEvent::from_frame(frame, finger_detect_value))
}

fn worker_lost() -> DriverResult<ScanEvent> {
    Err(DriverError::io("scan worker exited without a result"))
}

/// Issues a hardware abort if a scan is running on `device`, and, given a `ticket`, only if
/// it is that scan. Returns whether the scan is being cancelled.
fn cancel_device(device: &Device, ticket: Option<u64>) -> bool {
    let mut slot = device.capture_slot().lock();
    let running = match slot.ticket {
        Some(running) => running,
        None => return false,
    };
    if ticket.map_or(false, |ticket| ticket != running) {
        debug!("Stale cancel for scan {} on {}", running, device.get_id());
        return false;
    }
    match slot.state {
        CaptureState::Idle => return false,
        CaptureState::Cancelling => return true,
        CaptureState::Running => slot.state = CaptureState::Cancelling,
    }

    // The slot stays locked so the scan can not end and a new one start under the abort.
    info!("Cancelling scan {} on {}", running, device.get_id());
    if let Err(err) = device.driver().cancel_scan() {
        warn!("Abort request on {} failed: {}", device.get_id(), err);
    }

    true
}

/// Cancels one scan on one device from any thread: the scan running when the canceller was
/// made, or else the next one started.
#[derive(Debug, Clone)]
pub struct Canceller {
    device: Device,
    ticket: u64,
}

impl Canceller {
    pub fn cancel(&self) -> bool {
        cancel_device(&self.device, Some(self.ticket))
    }
}

/// Runs scans on session-bound devices, one at a time per device.
#[derive(Debug, Clone)]
pub struct CaptureController {
    scorer: QualityScorer,
    preview_capacity: usize,
    cancel_grace: Duration,
    elevate_priority: bool,
}

impl Default for CaptureController {
    fn default() -> Self {
        CaptureController {
            scorer: QualityScorer::default(),
            preview_capacity: DEFAULT_PREVIEW_CAPACITY,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            elevate_priority: true,
        }
    }
}

impl CaptureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(mut self, algorithm: QualityAlgorithm) -> Self {
        self.scorer = QualityScorer::new(algorithm);
        self
    }

    /// Previews kept while the caller is slow to drain them; older ones are dropped first.
    pub fn with_preview_capacity(mut self, capacity: usize) -> Self {
        self.preview_capacity = capacity.max(1);
        self
    }

    /// Extra time a continuous scan gets past its own timeout before it is aborted.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_priority_elevation(mut self, elevate: bool) -> Self {
        self.elevate_priority = elevate;
        self
    }

    pub fn algorithm(&self) -> QualityAlgorithm {
        self.scorer.algorithm()
    }

    fn settle(
        &self,
        mode: ScanMode,
        running: &Running<'_>,
        outcome: DriverResult<ScanEvent>,
        ceiling_hit: bool,
    ) -> Result<ScanResult, ScanError> {
        let device = running.device;
        match outcome {
            Ok(event) => {
                if running.cancelled() {
                    debug!("Scan on {} completed before the abort took effect", device.get_id());
                }
                let quality = self.scorer.score(&event.image, &event.format);
                if let Err(err) = &quality {
                    warn!("Quality score unavailable: {}", err);
                }

                Ok(ScanResult {
                    mode,
                    event,
                    quality,
                })
            }
            Err(_) if running.cancelled() => Err(ScanError::Cancelled),
            Err(err) if ceiling_hit || err.is_timed_out() => Err(ScanError::Timeout),
            Err(err) if err.is_cancelled() => Err(ScanError::Cancelled),
            Err(err) => {
                warn!("Scan on {} failed: {}", device.get_id(), err);
                Err(ScanError::DeviceFault(err))
            }
        }
    }

    /// Captures one frame and blocks until it is available.
    pub fn start_snapshot(
        &self,
        device: &Device,
        format: &ScanFormat,
    ) -> Result<ScanResult, ScanError> {
        let running = Running::enter(device, true)?;
        debug!("Snapshot scan on {} in {}", device.get_id(), format);

        let (done_sender, done) = bounded(1);
        let worker_device = device.clone();
        let worker_format = *format;
        spawn_worker("nb-scan-snapshot", self.elevate_priority, move || {
            let outcome = capture_frame(&worker_device, &worker_format, None);
            let _ = done_sender.send(outcome);
        })?;

        let outcome = done.recv().unwrap_or_else(|_| worker_lost());
        self.settle(ScanMode::Snapshot, &running, outcome, false)
    }

    /// Streams previews into `sink` while the sensor waits for a stable capture, then delivers
    /// the terminal message. Blocks until the scan has ended; the result is also returned.
    pub fn start_continuous(
        &self,
        device: &Device,
        format: &ScanFormat,
        timeout: Duration,
        sink: &mut dyn ScanSink,
    ) -> Result<ScanResult, ScanError> {
        let running = Running::enter(device, true)?;
        debug!(
            "Continuous scan on {} in {}, timeout {:?}",
            device.get_id(),
            format,
            timeout
        );

        let queue = Arc::new(ArrayQueue::new(self.preview_capacity));
        let dropped = Arc::new(AtomicUsize::new(0));
        let (wake_sender, wake) = bounded::<()>(1);
        let (done_sender, done) = bounded(1);

        let worker_device = device.clone();
        let worker_format = *format;
        let worker_queue = queue.clone();
        let worker_dropped = dropped.clone();
        spawn_worker("nb-scan-continuous", self.elevate_priority, move || {
            let mut push = |event: ScanEvent| {
                if worker_queue.force_push(event).is_some() {
                    worker_dropped.fetch_add(1, Ordering::Relaxed);
                }
                let _ = wake_sender.try_send(());
            };
            let preview: &mut dyn FnMut(ScanEvent) = &mut push;
            let outcome = capture_frame(&worker_device, &worker_format, Some((timeout, preview)));
            let _ = done_sender.send(outcome);
        })?;

        let drain = |sink: &mut dyn ScanSink| {
            while let Some(event) = queue.pop() {
                sink.deliver(ScanMessage::Preview(event));
            }
        };

        let ceiling = after(timeout.saturating_add(self.cancel_grace));
        let mut ceiling_hit = false;
        let outcome = loop {
            select! {
                recv(wake) -> signal => {
                    if signal.is_err() {
                        break done.recv().unwrap_or_else(|_| worker_lost());
                    }
                    drain(&mut *sink);
                },
                recv(done) -> outcome => break outcome.unwrap_or_else(|_| worker_lost()),
                recv(ceiling) -> _ => {
                    warn!("Scan on {} outlived its timeout, aborting", device.get_id());
                    ceiling_hit = true;
                    if let Err(err) = device.driver().cancel_scan() {
                        warn!("Abort request on {} failed: {}", device.get_id(), err);
                    }
                },
            }
        };
        drain(&mut *sink);

        let dropped = dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!("Dropped {} preview frame(s) on {}", dropped, device.get_id());
        }

        let result = self.settle(ScanMode::Continuous, &running, outcome, ceiling_hit);
        sink.deliver(match &result {
            Ok(result) => ScanMessage::Completed(result.clone()),
            Err(err) => ScanMessage::Failed(err.clone()),
        });

        result
    }

    /// Runs `request`; snapshot results are delivered to `sink` as well.
    pub fn run(
        &self,
        device: &Device,
        request: &ScanRequest,
        sink: &mut dyn ScanSink,
    ) -> Result<ScanResult, ScanError> {
        debug!("{:?} scan at {} on {}", request.mode(), request.format(), device.get_id());
        match request {
            ScanRequest::Snapshot(format) => {
                let result = self.start_snapshot(device, format);
                sink.deliver(match &result {
                    Ok(result) => ScanMessage::Completed(result.clone()),
                    Err(err) => ScanMessage::Failed(err.clone()),
                });
                result
            }
            ScanRequest::Continuous { format, timeout } => {
                self.start_continuous(device, format, *timeout, sink)
            }
        }
    }

    /// Requests an abort of the scan running on `device`. Returns whether a scan was running.
    /// A scan that already finished in hardware still completes normally.
    pub fn cancel(&self, device: &Device) -> bool {
        cancel_device(device, None)
    }

    pub fn canceller(&self, device: &Device) -> Canceller {
        let ticket = device.capture_slot().lock().current_or_next();

        Canceller {
            device: device.clone(),
            ticket,
        }
    }

    fn exclusive<T>(
        &self,
        device: &Device,
        command: impl FnOnce(&Device) -> DriverResult<T>,
    ) -> Result<T, ScanError> {
        let _running = Running::enter(device, false)?;
        command(device).map_err(ScanError::DeviceFault)
    }

    pub fn finger_detect_value(&self, device: &Device) -> Result<i32, ScanError> {
        self.exclusive(device, |device| device.driver().finger_detect_value())
    }

    pub fn reset(&self, device: &Device) -> Result<(), ScanError> {
        info!("Soft reset of {}", device.get_id());
        self.exclusive(device, |device| device.driver().reset())
    }

    pub fn state(&self, device: &Device) -> Result<DeviceState, ScanError> {
        self.exclusive(device, |device| device.driver().state())
    }
}
