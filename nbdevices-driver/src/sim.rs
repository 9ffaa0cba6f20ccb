//! Software sensor and bus.
//!
//! [`SimulatedSensor`] answers every [`Driver`] command from in-memory state and records the
//! calls it receives, so the lifecycle layer can be exercised without hardware. Scan timing is
//! scriptable: scans can stall until aborted, or hold their finished frame back to reproduce
//! the race between a hardware completion and a late abort.

use crate::{
    BlobParameter, Capabilities, ConnectionType, DeviceChange, DeviceInfo, DeviceState, Driver,
    DriverError, DriverResult, ScanEvent, ScanFormat, ScanFrame, ScanStatus, SecurityModel,
    SpiBus, Transport,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A command as received by the simulated sensor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Call {
    OpenSession(Vec<u8>),
    CloseSession,
    SetBlobParameter(BlobParameter, Option<Vec<u8>>),
    GenerateCalibrationData,
    Scan(ScanFormat),
    ScanWithPreview(ScanFormat, Duration),
    CancelScan,
    FingerDetectValue,
    Reset,
    State,
    Dispose,
}

/// Commands that can be made to fail with [`SimulatedSensor::fail_next`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Op {
    OpenSession,
    CloseSession,
    SetBlobParameter(BlobParameter),
    GenerateCalibrationData,
    Scan,
    ScanWithPreview,
    FingerDetectValue,
    Reset,
    State,
}

struct Injected {
    op: Op,
    skip: usize,
    error: DriverError,
}

struct SensorState {
    info: DeviceInfo,
    calls: Vec<Call>,
    accepted: Vec<(Vec<u8>, Vec<u8>)>,
    cdk_id: Vec<u8>,
    cdk_key: Option<Vec<u8>>,
    session: Option<Vec<u8>>,
    calibration: Option<Vec<u8>>,
    calibration_output: Vec<u8>,
    generations: usize,
    hold_generation: bool,
    injected: Vec<Injected>,
    previews: usize,
    preview_interval: Duration,
    fill: u8,
    image: Option<Vec<u8>>,
    finger_detect_value: i32,
    stall: bool,
    ignore_timeout: bool,
    hold_completion: bool,
    scanning: bool,
    scans_started: usize,
    cancel_requested: bool,
    hardware_completions: usize,
    disposals: usize,
}

impl SensorState {
    fn take_failure(&mut self, op: Op) -> Option<DriverError> {
        let position = self.injected.iter().position(|injected| injected.op == op)?;
        if self.injected[position].skip > 0 {
            self.injected[position].skip -= 1;
            return None;
        }

        Some(self.injected.remove(position).error)
    }

    fn image_for(&self, format: &ScanFormat) -> Vec<u8> {
        match &self.image {
            Some(image) => image.clone(),
            None => vec![self.fill; format.pixel_count()],
        }
    }

    fn preview_event(&self, format: &ScanFormat, index: usize) -> ScanEvent {
        ScanEvent {
            status: ScanStatus::FingerDetected,
            finger_detect_value: 10 * (index as i32 + 1),
            format: *format,
            image: self.image_for(format),
        }
    }

    fn end_scan(&mut self) {
        self.scanning = false;
        self.cancel_requested = false;
    }
}

struct SensorInner {
    state: Mutex<SensorState>,
    changed: Condvar,
}

/// In-memory sensor. Clones share the same device.
#[derive(Clone)]
pub struct SimulatedSensor {
    inner: Arc<SensorInner>,
}

/// Descriptor used by [`SimulatedSensor::with_serial`]: a USB sensor without security or
/// calibration requirements and a single 8x8 test format.
pub fn device_info(id: &str, serial_number: &str) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        serial_number: serial_number.to_string(),
        module_serial_number: serial_number.to_string(),
        manufacturer: "Simulated".to_string(),
        model: "NB-SIM".to_string(),
        product: "Simulated fingerprint sensor".to_string(),
        firmware_version: "0.0.0".to_string(),
        device_type: "Simulator".to_string(),
        connection_type: ConnectionType::Usb,
        capabilities: Capabilities {
            requires_external_calibration_data: false,
            security_model: SecurityModel::None,
        },
        scan_formats: vec![ScanFormat::new(8, 8, 500)],
    }
}

impl SimulatedSensor {
    pub fn new(info: DeviceInfo) -> Self {
        let state = SensorState {
            calibration_output: default_calibration(&info.serial_number),
            info,
            calls: Vec::new(),
            accepted: Vec::new(),
            cdk_id: Vec::new(),
            cdk_key: None,
            session: None,
            calibration: None,
            generations: 0,
            hold_generation: false,
            injected: Vec::new(),
            previews: 0,
            preview_interval: Duration::from_millis(0),
            fill: 0x80,
            image: None,
            finger_detect_value: 120,
            stall: false,
            ignore_timeout: false,
            hold_completion: false,
            scanning: false,
            scans_started: 0,
            cancel_requested: false,
            hardware_completions: 0,
            disposals: 0,
        };

        SimulatedSensor {
            inner: Arc::new(SensorInner {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn with_serial(id: &str, serial_number: &str) -> Self {
        Self::new(device_info(id, serial_number))
    }

    fn lock(&self) -> MutexGuard<'_, SensorState> {
        self.inner.state.lock()
    }

    fn notify(&self) {
        self.inner.changed.notify_all();
    }

    fn configure(self, apply: impl FnOnce(&mut SensorState)) -> Self {
        apply(&mut self.lock());
        self
    }

    pub fn with_security_model(self, model: SecurityModel) -> Self {
        self.configure(|st| st.info.capabilities.security_model = model)
    }

    pub fn with_calibration_required(self, required: bool) -> Self {
        self.configure(|st| st.info.capabilities.requires_external_calibration_data = required)
    }

    pub fn with_connection_type(self, connection_type: ConnectionType) -> Self {
        self.configure(|st| st.info.connection_type = connection_type)
    }

    pub fn with_scan_formats(self, formats: Vec<ScanFormat>) -> Self {
        self.configure(|st| st.info.scan_formats = formats)
    }

    /// Accepts sessions opened with exactly this identifier and key (CAK or legacy keys).
    pub fn accept_credential(self, id: &[u8], key: &[u8]) -> Self {
        self.configure(|st| st.accepted.push((id.to_vec(), key.to_vec())))
    }

    /// Names the provisioning key slot. With `key` set the sensor starts provisioned.
    pub fn with_cdk(self, id: &[u8], key: Option<&[u8]>) -> Self {
        self.configure(|st| {
            st.cdk_id = id.to_vec();
            st.cdk_key = key.map(<[u8]>::to_vec);
        })
    }

    pub fn with_calibration_output(self, data: Vec<u8>) -> Self {
        self.configure(|st| st.calibration_output = data)
    }

    /// Number of preview frames a continuous scan emits before its final frame.
    pub fn with_previews(self, count: usize, interval: Duration) -> Self {
        self.configure(|st| {
            st.previews = count;
            st.preview_interval = interval;
        })
    }

    /// Grey level used for generated images.
    pub fn with_fill(self, fill: u8) -> Self {
        self.configure(|st| st.fill = fill)
    }

    /// Fixed image returned regardless of the requested format.
    pub fn with_image(self, image: Vec<u8>) -> Self {
        self.configure(|st| st.image = Some(image))
    }

    pub fn with_finger_detect_value(self, value: i32) -> Self {
        self.configure(|st| st.finger_detect_value = value)
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Op, error: DriverError) {
        self.fail_nth(op, 0, error);
    }

    /// Lets `skip` calls of `op` pass, then fails the following one.
    pub fn fail_nth(&self, op: Op, skip: usize, error: DriverError) {
        self.lock().injected.push(Injected { op, skip, error });
    }

    /// While stalled, scans never settle: they end only on abort or timeout.
    pub fn stall_scans(&self, stall: bool) {
        self.lock().stall = stall;
        self.notify();
    }

    /// Makes stalled preview scans ignore their own timeout, like a wedged sensor.
    pub fn ignore_scan_timeout(&self, ignore: bool) {
        self.lock().ignore_timeout = ignore;
        self.notify();
    }

    /// While held, a scan that finished in hardware keeps its frame until released.
    pub fn hold_completion(&self, hold: bool) {
        self.lock().hold_completion = hold;
        self.notify();
    }

    /// While held, calibration generation blocks after it started.
    pub fn hold_generation(&self, hold: bool) {
        self.lock().hold_generation = hold;
        self.notify();
    }

    fn wait_until(&self, timeout: Duration, condition: impl Fn(&SensorState) -> bool) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut st = self.lock();
        while !condition(&st) {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.inner.changed.wait_for(&mut st, deadline - now);
                }
                None => self.inner.changed.wait(&mut st),
            }
        }

        true
    }

    /// Waits until `count` scans have finished in hardware.
    pub fn wait_for_hardware_completion(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |st| st.hardware_completions >= count)
    }

    /// Waits until `count` scans have been started.
    pub fn wait_for_scan_start(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |st| st.scans_started >= count)
    }

    /// Waits until `count` calibration generations have been started.
    pub fn wait_for_generation(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |st| st.generations >= count)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn session(&self) -> Option<Vec<u8>> {
        self.lock().session.clone()
    }

    pub fn provisioned_cdk(&self) -> Option<Vec<u8>> {
        self.lock().cdk_key.clone()
    }

    pub fn applied_calibration(&self) -> Option<Vec<u8>> {
        self.lock().calibration.clone()
    }

    pub fn generations(&self) -> usize {
        self.lock().generations
    }

    pub fn disposals(&self) -> usize {
        self.lock().disposals
    }

    fn begin(&self, call: Call, op: Op) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls.push(call);
        if let Some(error) = st.take_failure(op) {
            return Err(error);
        }
        st.scanning = true;
        st.cancel_requested = false;
        st.scans_started += 1;
        drop(st);
        self.notify();

        Ok(())
    }

    fn abort(&self, mut st: MutexGuard<'_, SensorState>, error: DriverError) -> DriverResult<ScanFrame> {
        st.end_scan();
        drop(st);
        self.notify();

        Err(error)
    }

    fn run_scan(
        &self,
        format: &ScanFormat,
        deadline: Option<Instant>,
        preview: Option<&mut dyn FnMut(ScanEvent)>,
    ) -> DriverResult<ScanFrame> {
        if let Some(preview) = preview {
            let (count, interval) = {
                let st = self.lock();
                (st.previews, st.preview_interval)
            };
            for index in 0..count {
                let event = {
                    let st = self.lock();
                    if st.cancel_requested {
                        return self.abort(st, DriverError::cancelled());
                    }
                    st.preview_event(format, index)
                };
                preview(event);
                if interval > Duration::from_millis(0) {
                    thread::sleep(interval);
                }
            }
        }

        let mut st = self.lock();
        while st.stall && !st.cancel_requested {
            match deadline.filter(|_| !st.ignore_timeout) {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.abort(st, DriverError::timed_out());
                    }
                    self.inner.changed.wait_for(&mut st, deadline - now);
                }
                None => self.inner.changed.wait(&mut st),
            }
        }
        if st.cancel_requested {
            return self.abort(st, DriverError::cancelled());
        }

        let frame = ScanFrame {
            status: ScanStatus::Ok,
            format: *format,
            image: st.image_for(format),
        };
        st.hardware_completions += 1;
        self.notify();
        while st.hold_completion {
            self.inner.changed.wait(&mut st);
        }
        st.end_scan();
        drop(st);
        self.notify();

        Ok(frame)
    }
}

impl fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("SimulatedSensor")
            .field("id", &st.info.id)
            .field("serial_number", &st.info.serial_number)
            .finish()
    }
}

fn default_calibration(serial_number: &str) -> Vec<u8> {
    serial_number.bytes().cycle().take(256).collect()
}

impl Driver for SimulatedSensor {
    fn info(&self) -> DeviceInfo {
        self.lock().info.clone()
    }

    fn open_session(&self, id: &[u8], key: &[u8]) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls.push(Call::OpenSession(id.to_vec()));
        if let Some(error) = st.take_failure(Op::OpenSession) {
            return Err(error);
        }
        if st.session.is_some() {
            return Err(DriverError::busy("session already open"));
        }

        let accepted = st
            .accepted
            .iter()
            .any(|(accepted_id, accepted_key)| accepted_id == id && accepted_key == key)
            || (id == st.cdk_id.as_slice() && st.cdk_key.as_deref() == Some(key));
        if !accepted {
            let name = String::from_utf8_lossy(id);
            return Err(DriverError::access_denied(format!(
                "credential `{}` rejected",
                name.trim_end_matches('\0')
            )));
        }

        st.session = Some(id.to_vec());
        Ok(())
    }

    fn close_session(&self) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls.push(Call::CloseSession);
        if let Some(error) = st.take_failure(Op::CloseSession) {
            return Err(error);
        }

        match st.session.take() {
            Some(_) => Ok(()),
            None => Err(DriverError::not_set("no session open")),
        }
    }

    fn set_blob_parameter(&self, kind: BlobParameter, data: Option<&[u8]>) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls
            .push(Call::SetBlobParameter(kind, data.map(<[u8]>::to_vec)));
        if let Some(error) = st.take_failure(Op::SetBlobParameter(kind)) {
            return Err(error);
        }

        match kind {
            BlobParameter::CalibrationData => match data {
                Some(data) => {
                    st.calibration = Some(data.to_vec());
                    Ok(())
                }
                None => Err(DriverError::new(-libc::EINVAL, "calibration data missing")),
            },
            BlobParameter::SetCdk => {
                let session = st
                    .session
                    .clone()
                    .ok_or_else(|| DriverError::access_denied("no session open"))?;
                match data {
                    None => match st.cdk_key.take() {
                        Some(_) => Ok(()),
                        None => Err(DriverError::not_set("provisioning key not set")),
                    },
                    Some(key) => {
                        if session == st.cdk_id {
                            return Err(DriverError::access_denied(
                                "provisioning key requires the primary credential",
                            ));
                        }
                        st.cdk_key = Some(key.to_vec());
                        Ok(())
                    }
                }
            }
        }
    }

    fn generate_calibration_data(&self) -> DriverResult<Vec<u8>> {
        let mut st = self.lock();
        st.calls.push(Call::GenerateCalibrationData);
        if let Some(error) = st.take_failure(Op::GenerateCalibrationData) {
            return Err(error);
        }
        st.generations += 1;
        self.notify();
        while st.hold_generation {
            self.inner.changed.wait(&mut st);
        }

        Ok(st.calibration_output.clone())
    }

    fn scan(&self, format: &ScanFormat) -> DriverResult<ScanFrame> {
        self.begin(Call::Scan(*format), Op::Scan)?;
        self.run_scan(format, None, None)
    }

    fn scan_with_preview(
        &self,
        format: &ScanFormat,
        timeout: Duration,
        preview: &mut dyn FnMut(ScanEvent),
    ) -> DriverResult<ScanFrame> {
        self.begin(Call::ScanWithPreview(*format, timeout), Op::ScanWithPreview)?;
        // A timeout past the end of the clock never fires.
        self.run_scan(format, Instant::now().checked_add(timeout), Some(preview))
    }

    fn cancel_scan(&self) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls.push(Call::CancelScan);
        if st.scanning {
            st.cancel_requested = true;
        }
        drop(st);
        self.notify();

        Ok(())
    }

    fn finger_detect_value(&self) -> DriverResult<i32> {
        let mut st = self.lock();
        st.calls.push(Call::FingerDetectValue);
        if let Some(error) = st.take_failure(Op::FingerDetectValue) {
            return Err(error);
        }

        Ok(st.finger_detect_value)
    }

    fn reset(&self) -> DriverResult<()> {
        let mut st = self.lock();
        st.calls.push(Call::Reset);
        match st.take_failure(Op::Reset) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn state(&self) -> DriverResult<DeviceState> {
        let mut st = self.lock();
        st.calls.push(Call::State);
        if let Some(error) = st.take_failure(Op::State) {
            return Err(error);
        }

        Ok(if st.scanning {
            DeviceState::Busy
        } else {
            DeviceState::Ready
        })
    }

    fn dispose(&self) {
        let mut st = self.lock();
        st.calls.push(Call::Dispose);
        st.disposals += 1;
        st.session = None;
    }
}

#[derive(Default)]
struct BusInner {
    devices: Mutex<Vec<SimulatedSensor>>,
    spi: Mutex<HashMap<String, SimulatedSensor>>,
    spi_connections: Mutex<Vec<(SpiBus, bool)>>,
    subscribers: Mutex<Vec<Sender<DeviceChange>>>,
}

/// In-memory transport holding plugged [`SimulatedSensor`]s and SPI endpoints.
#[derive(Clone, Default)]
pub struct SimulatedBus {
    inner: Arc<BusInner>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, sensor: SimulatedSensor) {
        let id = sensor.info().id;
        self.inner.devices.lock().push(sensor);
        self.notify(DeviceChange::Added(id));
    }

    pub fn unplug(&self, id: &str) -> Option<SimulatedSensor> {
        let sensor = {
            let mut devices = self.inner.devices.lock();
            let position = devices.iter().position(|sensor| sensor.info().id == id)?;
            devices.remove(position)
        };
        self.notify(DeviceChange::Removed(id.to_string()));

        Some(sensor)
    }

    /// Makes `sensor` reachable through `connect_spi` on the endpoint `name`.
    pub fn attach_spi(&self, name: &str, sensor: SimulatedSensor) {
        self.inner.spi.lock().insert(name.to_string(), sensor);
    }

    /// Every `connect_spi` request received so far, with its `skip_gpio_init` flag.
    pub fn spi_connections(&self) -> Vec<(SpiBus, bool)> {
        self.inner.spi_connections.lock().clone()
    }

    fn notify(&self, change: DeviceChange) {
        self.inner
            .subscribers
            .lock()
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
    }
}

impl fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SimulatedBus")
            .field("devices", &*self.inner.devices.lock())
            .finish()
    }
}

impl Transport for SimulatedBus {
    fn devices(&self) -> Vec<Arc<dyn Driver>> {
        self.inner
            .devices
            .lock()
            .iter()
            .map(|sensor| Arc::new(sensor.clone()) as Arc<dyn Driver>)
            .collect()
    }

    fn connect_spi(&self, bus: &SpiBus, skip_gpio_init: bool) -> DriverResult<Arc<dyn Driver>> {
        self.inner
            .spi_connections
            .lock()
            .push((bus.clone(), skip_gpio_init));

        match self.inner.spi.lock().get(&bus.name) {
            Some(sensor) => Ok(Arc::new(sensor.clone())),
            None => Err(DriverError::unreachable(format!(
                "no SPI endpoint at {}",
                bus.name
            ))),
        }
    }

    fn subscribe(&self) -> Option<Receiver<DeviceChange>> {
        let (sender, receiver) = unbounded();
        self.inner.subscribers.lock().push(sender);

        Some(receiver)
    }
}
