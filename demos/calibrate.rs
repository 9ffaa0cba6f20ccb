use nbdevices::sim::{SimulatedBus, SimulatedSensor};
use nbdevices::{CalibrationManager, CalibrationOutcome, CalibrationStore, CredentialStore, Device};
use nbdevices::{DeviceRegistry, SessionManager};
use std::env;
use std::sync::Arc;

fn main() -> nbdevices::Result<()> {
    env_logger::init();

    let bus = SimulatedBus::new();
    bus.plug(
        SimulatedSensor::with_serial("usb-0", "NB65200-000001")
            .with_calibration_required(true)
            .with_calibration_output(vec![0x5a; 256]),
    );

    let registry = DeviceRegistry::new(Arc::new(bus));
    let device = registry.connect_by_identity(None).ok_or(nbdevices::NBError::NoDevice)?;
    SessionManager::new(Arc::new(CredentialStore::new())).open_session(&device)?;

    let store = CalibrationStore::new(env::temp_dir().join("nbdevices-calibration"));
    println!("Calibration data lives in {}", store.root().display());
    let manager = CalibrationManager::new(store, |device: &Device| {
        println!(
            "Generating calibration data for {}, keep the sensor clear.",
            device.get_serial_number()
        );
        true
    });

    match manager.ensure_calibration(&device)? {
        CalibrationOutcome::NotRequired => println!("Sensor needs no calibration data."),
        CalibrationOutcome::Applied => println!("Stored calibration data applied."),
        CalibrationOutcome::Pending => println!("Another calibration is running."),
        CalibrationOutcome::Generating(task) => {
            let serial_number = task.serial_number().to_string();
            task.wait()?;
            println!("Calibration data for {} generated and applied.", serial_number);
        }
    }

    Ok(())
}
