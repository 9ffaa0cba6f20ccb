use crate::{ConnectionError, Device, DeviceChange, Driver, SpiBus, Transport};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Entry point for finding sensors.
///
/// Every handle returned by the registry holds an exclusive claim on its sensor until it is
/// disposed, so the same sensor is never handed out twice.
#[derive(Clone)]
pub struct DeviceRegistry {
    transport: Arc<dyn Transport>,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        DeviceRegistry {
            transport,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, driver: Arc<dyn Driver>) -> Result<Device, ConnectionError> {
        let id = driver.info().id;
        if !self.claims.lock().insert(id.clone()) {
            return Err(ConnectionError::Claimed(id));
        }

        let claims = self.claims.clone();
        let release = Box::new(move || {
            claims.lock().remove(&id);
        });

        Ok(Device::new(driver, Some(release)))
    }

    /// Reachable sensors that are not held by a live handle. An empty list is a normal result.
    pub fn enumerate(&self) -> Vec<Device> {
        let devices: Vec<Device> = self
            .transport
            .devices()
            .into_iter()
            .filter_map(|driver| self.claim(driver).ok())
            .collect();
        debug!("Enumerated {} available device(s)", devices.len());

        devices
    }

    /// Connects the sensor seen earlier as `known_id` if it is still reachable, otherwise the
    /// first available one. Handles that were not chosen are disposed right away.
    pub fn connect_by_identity(&self, known_id: Option<&str>) -> Option<Device> {
        let mut devices = self.enumerate();
        if devices.is_empty() {
            return None;
        }

        let position = known_id
            .and_then(|id| devices.iter().position(|device| device.get_id() == id))
            .unwrap_or(0);
        let chosen = devices.remove(position);
        for device in devices {
            device.dispose();
        }
        info!("Connected to device {} ({})", chosen.get_id(), chosen.get_serial_number());

        Some(chosen)
    }

    /// Direct SPI connection for platforms where the caller already configured the GPIO pins.
    pub fn connect_by_bus(
        &self,
        name: &str,
        awake_pin: u32,
        reset_pin: u32,
        chip_select_pin: u32,
    ) -> Result<Device, ConnectionError> {
        let bus = SpiBus::new(name, awake_pin, reset_pin, chip_select_pin);

        self.connect_spi(&bus, true)
    }

    pub fn connect_spi(&self, bus: &SpiBus, skip_gpio_init: bool) -> Result<Device, ConnectionError> {
        debug!("Connecting over SPI: {}", bus);
        let driver = self.transport.connect_spi(bus, skip_gpio_init).map_err(|err| {
            if err.is_unreachable() {
                ConnectionError::Unreachable(bus.name.clone())
            } else {
                ConnectionError::Driver(err)
            }
        })?;

        let device = self.claim(driver).map_err(|err| {
            warn!("SPI endpoint {} is already in use", bus.name);
            err
        })?;
        info!("Connected to device {} over {}", device.get_id(), bus.name);

        Ok(device)
    }

    /// Hot-plug notifications, if the transport produces them. Callers re-poll on each signal.
    pub fn watch(&self) -> Option<Receiver<DeviceChange>> {
        self.transport.subscribe()
    }

    /// Whether a live handle currently holds the sensor `id`.
    pub fn is_claimed(&self, id: &str) -> bool {
        self.claims.lock().contains(id)
    }
}
