use failure::Error;
use nbdevices::sim::{SimulatedBus, SimulatedSensor};
use nbdevices::{CaptureController, CredentialStore, DeviceRegistry, SessionManager};
use std::fs;
use std::sync::Arc;

fn main() -> Result<(), Error> {
    env_logger::init();

    // Sensors without a security model need no credentials.
    let image: Vec<u8> = (0..64u32).map(|i| ((i * 37) % 256) as u8).collect();
    let bus = SimulatedBus::new();
    bus.plug(SimulatedSensor::with_serial("usb-0", "NB65200-000001").with_image(image));

    let registry = DeviceRegistry::new(Arc::new(bus));
    let device = match registry.connect_by_identity(None) {
        Some(device) => device,
        None => {
            eprintln!("Device not found");
            return Ok(());
        }
    };
    SessionManager::new(Arc::new(CredentialStore::new())).open_session(&device)?;

    let format = match device.get_default_scan_format() {
        Some(format) => format,
        None => {
            eprintln!("This device does not offer any scan format.");
            return Ok(());
        }
    };

    println!("Opened device. It's now time to scan your finger.");
    let result = CaptureController::new().start_snapshot(&device, &format)?;
    println!("{}", result);

    let mut pgm = format!("P5\n{} {}\n255\n", format.width, format.height).into_bytes();
    pgm.extend_from_slice(&result.event.image);
    fs::write("finger.pgm", pgm)?;

    Ok(())
}
