use crate::{
    BlobParameter, DeviceChange, DeviceInfo, DeviceState, DriverResult, ScanEvent, ScanFormat,
    ScanFrame, SpiBus,
};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Command interface of one physical sensor.
///
/// Implementations wrap a vendor transport and must be internally synchronised: the lifecycle
/// layer calls `cancel_scan` from one thread while another thread is blocked inside `scan` or
/// `scan_with_preview`, so every method takes `&self`.
pub trait Driver: Send + Sync {
    /// Static descriptor read once at connection time.
    fn info(&self) -> DeviceInfo;

    /// Opens an authenticated session with the credential identified by `id`.
    fn open_session(&self, id: &[u8], key: &[u8]) -> DriverResult<()>;

    fn close_session(&self) -> DriverResult<()>;

    /// Writes an opaque parameter. `None` clears the slot.
    fn set_blob_parameter(&self, kind: BlobParameter, data: Option<&[u8]>) -> DriverResult<()>;

    /// Runs the on-device calibration routine. This blocks for a long time (minutes on real
    /// hardware) and needs a clean sensor surface.
    fn generate_calibration_data(&self) -> DriverResult<Vec<u8>>;

    /// Captures a single frame, blocking until the sensor produces it.
    fn scan(&self, format: &ScanFormat) -> DriverResult<ScanFrame>;

    /// Captures with live previews. `preview` is invoked on the calling thread for every
    /// intermediate frame. The sensor aborts by itself once `timeout` has elapsed without a
    /// stable capture; backends pass it down in microseconds.
    fn scan_with_preview(
        &self,
        format: &ScanFormat,
        timeout: Duration,
        preview: &mut dyn FnMut(ScanEvent),
    ) -> DriverResult<ScanFrame>;

    /// Requests an abort of the running scan. The abort races with the hardware: a scan that
    /// already finished still returns its frame.
    fn cancel_scan(&self) -> DriverResult<()>;

    fn finger_detect_value(&self) -> DriverResult<i32>;

    fn reset(&self) -> DriverResult<()>;

    fn state(&self) -> DriverResult<DeviceState>;

    /// Releases the hardware resource. Called at most once per connection by the owner.
    fn dispose(&self);
}

/// Enumeration and connection side of a backend.
pub trait Transport: Send + Sync {
    /// Devices that are reachable right now.
    fn devices(&self) -> Vec<Arc<dyn Driver>>;

    /// Connects straight to an SPI endpoint. With `skip_gpio_init` the backend assumes the
    /// caller already configured the awake/reset/chip-select pins.
    fn connect_spi(&self, bus: &SpiBus, skip_gpio_init: bool) -> DriverResult<Arc<dyn Driver>>;

    /// Hot-plug notifications, for backends that produce them.
    fn subscribe(&self) -> Option<Receiver<DeviceChange>> {
        None
    }
}
