//! Runs reader commands against a simulated sensor configured from the settings file.
//!
//! ```text
//! nbsample --config credentials.example.toml CONNECT GET_STATUS SCAN_CONTINUOUS
//! ```

mod logging;

use clap::{Parser, ValueEnum};
use failure::Error;
use log::info;
use nbdevices::sim::{SimulatedBus, SimulatedSensor};
use nbdevices::{
    CalibrationOutcome, Command, ConnectionType, CredentialKind, CredentialProvider, Device,
    Reader, ScanMessage, SecurityModel, Settings,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "nbsample", author, version, about = "Drives an NB fingerprint sensor")]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Settings file
    #[arg(short, long, value_name = "PATH", env = "NBDEVICES_CONFIG")]
    config: Option<PathBuf>,

    /// Generate missing calibration data without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Security model of the simulated sensor
    #[arg(long, value_enum, default_value = "cak-cdk")]
    model: Model,

    /// Put the simulated sensor behind the configured SPI endpoint
    #[arg(long)]
    spi: bool,

    /// Commands to run, in order
    #[arg(value_name = "COMMAND", default_values = ["CONNECT", "GET_STATUS", "SCAN_SNAPSHOT"])]
    commands: Vec<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Model {
    None,
    Legacy,
    CakOnly,
    CakCdk,
}

impl From<Model> for SecurityModel {
    fn from(model: Model) -> Self {
        match model {
            Model::None => SecurityModel::None,
            Model::Legacy => SecurityModel::LegacyAuth,
            Model::CakOnly => SecurityModel::CakOnly,
            Model::CakCdk => SecurityModel::CakCdk,
        }
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);
    info!("nbdevices {}", nbdevices::version());

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };

    let bus = SimulatedBus::new();
    let sensor = simulated_sensor(&settings, cli.model.into(), cli.spi)?;
    if cli.spi {
        bus.attach_spi(&settings.spi.name, sensor);
    } else {
        bus.plug(sensor);
    }

    let yes = cli.yes;
    let mut reader =
        Reader::from_settings(&settings, Arc::new(bus), move |device: &Device| yes || ask(device))?;

    for name in &cli.commands {
        let command: Command = name.parse()?;
        let output = reader.execute(command, &mut print_preview)?;
        println!("{}", output);

        if reader.is_calibrating() {
            info!("Generating calibration data, keep the sensor clear");
            if let Some(CalibrationOutcome::Applied) = reader.wait_for_calibration()? {
                println!("Calibration data applied");
            }
        }
    }

    Ok(())
}

/// Sensor accepting the configured credentials. Without credentials only the `none` model
/// can open a session.
fn simulated_sensor(
    settings: &Settings,
    model: SecurityModel,
    spi: bool,
) -> Result<SimulatedSensor, Error> {
    let credentials = settings.credential_store()?;
    let id = if spi { "spi-0" } else { "usb-0" };

    let mut sensor = SimulatedSensor::with_serial(id, "NB65200-000001")
        .with_security_model(model)
        .with_calibration_required(true)
        .with_calibration_output(vec![0x5a; 256])
        .with_previews(4, Duration::from_millis(50));
    if spi {
        sensor = sensor.with_connection_type(ConnectionType::Spi);
    }

    for kind in [CredentialKind::Cak, CredentialKind::LegacyAuth].iter() {
        if let Some(credential) = credentials.credential(*kind) {
            sensor = sensor.accept_credential(credential.id(), credential.key());
        }
    }
    if let Some(cdk) = credentials.credential(CredentialKind::Cdk) {
        sensor = sensor.with_cdk(cdk.id(), Some(cdk.key()));
    }

    Ok(sensor)
}

fn ask(device: &Device) -> bool {
    print!(
        "Sensor {} has no calibration data. Generate it now? [y/N] ",
        device.get_serial_number()
    );
    let _ = io::stdout().flush();

    let mut answer = String::new();
    match io::stdin().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn print_preview(message: ScanMessage) {
    if let ScanMessage::Preview(event) = message {
        println!(
            "Preview: {} (finger detect value {})",
            event.status, event.finger_detect_value
        );
    }
}
