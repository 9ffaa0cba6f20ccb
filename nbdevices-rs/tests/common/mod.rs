#![allow(dead_code)]

use nbdevices::sim::SimulatedSensor;
use nbdevices::{
    CalibrationManager, CalibrationStore, Confirm, Credential, CredentialKind, CredentialStore,
    Device, SecurityModel, SessionManager, DEFAULT_CAK_NAME, DEFAULT_CDK_NAME,
    DEFAULT_LEGACY_NAME, KEY_LEN,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const CAK_KEY: [u8; KEY_LEN] = [0x11; KEY_LEN];
pub const CDK_KEY: [u8; KEY_LEN] = [0x22; KEY_LEN];
pub const LEGACY_KEY: [u8; KEY_LEN] = [0x33; KEY_LEN];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn cak() -> Credential {
    Credential::new(DEFAULT_CAK_NAME, CAK_KEY)
}

pub fn cdk() -> Credential {
    Credential::new(DEFAULT_CDK_NAME, CDK_KEY)
}

pub fn legacy() -> Credential {
    Credential::new(DEFAULT_LEGACY_NAME, LEGACY_KEY)
}

pub fn credentials() -> CredentialStore {
    CredentialStore::new()
        .with(CredentialKind::Cak, cak())
        .with(CredentialKind::Cdk, cdk())
        .with(CredentialKind::LegacyAuth, legacy())
}

pub fn sessions() -> SessionManager {
    SessionManager::new(Arc::new(credentials()))
}

/// Sensor of the given model that accepts the test credentials and starts provisioned.
pub fn sensor(id: &str, serial_number: &str, model: SecurityModel) -> SimulatedSensor {
    SimulatedSensor::with_serial(id, serial_number)
        .with_security_model(model)
        .accept_credential(cak().id(), cak().key())
        .accept_credential(legacy().id(), legacy().key())
        .with_cdk(cdk().id(), Some(cdk().key()))
}

/// Wraps `sensor` in a handle with an open session.
pub fn open_device(sensor: &SimulatedSensor) -> Device {
    let device = Device::from_driver(Arc::new(sensor.clone()));
    sessions()
        .open_session(&device)
        .expect("session should open");

    device
}

/// Calibration manager over `root` with its own single-flight flag.
pub fn calibration(root: &Path, confirm: impl Confirm + 'static) -> CalibrationManager {
    CalibrationManager::new(CalibrationStore::new(root), confirm)
        .with_guard(Arc::new(AtomicBool::new(false)))
}
