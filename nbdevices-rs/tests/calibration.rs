mod common;

use common::{calibration, open_device, sensor};
use nbdevices::sim::{Call, Op, SimulatedSensor};
use nbdevices::{
    BlobParameter, CalibrationError, CalibrationOutcome, CalibrationStore, Device, DriverError,
    SecurityModel,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const BLOB: &[u8] = &[0xCA, 0x1B, 0x00, 0x01, 0x02];

fn calibrated_sensor(serial_number: &str) -> SimulatedSensor {
    sensor(&format!("usb-{}", serial_number), serial_number, SecurityModel::CakOnly)
        .with_calibration_required(true)
        .with_calibration_output(BLOB.to_vec())
}

fn always(_: &Device) -> bool {
    true
}

#[test]
fn not_required_skips_everything() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let sensor = sensor("usb-1", "SN1", SecurityModel::None);
    let device = open_device(&sensor);

    let outcome = calibration(dir.path(), always).ensure_calibration(&device).unwrap();

    assert!(matches!(outcome, CalibrationOutcome::NotRequired));
    assert!(sensor.calls().is_empty());
}

#[test]
fn requires_open_session() {
    let dir = tempfile::tempdir().unwrap();
    let device = Device::from_driver(Arc::new(calibrated_sensor("SN1")));

    match calibration(dir.path(), always).ensure_calibration(&device) {
        Err(CalibrationError::SessionClosed) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn generates_stores_and_applies_missing_blob() {
    let dir = tempfile::tempdir().unwrap();
    let sensor = calibrated_sensor("SN1");
    let device = open_device(&sensor);
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    let manager = calibration(dir.path(), move |_: &Device| {
        counter.fetch_add(1, Ordering::SeqCst);
        true
    });

    let task = match manager.ensure_calibration(&device).unwrap() {
        CalibrationOutcome::Generating(task) => task,
        other => panic!("expected generation, got {:?}", other),
    };
    assert_eq!(task.serial_number(), "SN1");
    assert!(matches!(task.wait().unwrap(), CalibrationOutcome::Applied));

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read(dir.path().join("SN1_calblob.bin")).unwrap(), BLOB);
    assert_eq!(sensor.applied_calibration(), Some(BLOB.to_vec()));
    assert!(!manager.is_generating());

    assert!(matches!(
        manager.ensure_calibration(&device).unwrap(),
        CalibrationOutcome::Applied
    ));
    assert_eq!(sensor.generations(), 1);
    assert_eq!(asked.load(Ordering::SeqCst), 1);
}

#[test]
fn stored_blob_is_applied_without_generation() {
    let dir = tempfile::tempdir().unwrap();
    CalibrationStore::new(dir.path()).save("SN1", &[9, 9, 9]).unwrap();
    let sensor = calibrated_sensor("SN1");
    let device = open_device(&sensor);
    sensor.clear_calls();

    let outcome = calibration(dir.path(), |_: &Device| false)
        .ensure_calibration(&device)
        .unwrap();

    assert!(matches!(outcome, CalibrationOutcome::Applied));
    assert_eq!(
        sensor.calls(),
        vec![Call::SetBlobParameter(
            BlobParameter::CalibrationData,
            Some(vec![9, 9, 9])
        )]
    );
}

#[test]
fn rejected_blob_is_apply_failure() {
    let dir = tempfile::tempdir().unwrap();
    CalibrationStore::new(dir.path()).save("SN1", BLOB).unwrap();
    let sensor = calibrated_sensor("SN1");
    let device = open_device(&sensor);
    sensor.fail_next(
        Op::SetBlobParameter(BlobParameter::CalibrationData),
        DriverError::io("checksum mismatch"),
    );

    match calibration(dir.path(), always).ensure_calibration(&device) {
        Err(CalibrationError::ApplyFailed(err)) => assert_eq!(err.message(), "checksum mismatch"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn second_caller_gets_pending_while_generating() {
    let dir = tempfile::tempdir().unwrap();
    let sensor = calibrated_sensor("SN1");
    sensor.hold_generation(true);
    let device = open_device(&sensor);
    let manager = calibration(dir.path(), always);

    let task = match manager.ensure_calibration(&device).unwrap() {
        CalibrationOutcome::Generating(task) => task,
        other => panic!("expected generation, got {:?}", other),
    };
    assert!(sensor.wait_for_generation(1, Duration::from_secs(5)));
    assert!(manager.is_generating());

    assert!(matches!(
        manager.ensure_calibration(&device).unwrap(),
        CalibrationOutcome::Pending
    ));

    sensor.hold_generation(false);
    assert!(matches!(task.wait().unwrap(), CalibrationOutcome::Applied));
    assert_eq!(sensor.generations(), 1);
    assert!(!manager.is_generating());
}

#[test]
fn concurrent_callers_run_one_generation() {
    let dir = tempfile::tempdir().unwrap();
    let sensor = calibrated_sensor("SN1");
    sensor.hold_generation(true);
    let device = open_device(&sensor);
    let manager = calibration(dir.path(), always);
    let barrier = Arc::new(Barrier::new(2));

    let callers: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            let device = device.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.ensure_calibration(&device).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<CalibrationOutcome> = callers
        .into_iter()
        .map(|caller| caller.join().unwrap())
        .collect();

    let pending = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, CalibrationOutcome::Pending))
        .count();
    assert_eq!(pending, 1);

    sensor.hold_generation(false);
    for outcome in outcomes {
        if let CalibrationOutcome::Generating(task) = outcome {
            task.wait().unwrap();
        }
    }
    assert_eq!(sensor.generations(), 1);
}

#[test]
fn declined_confirmation_releases_guard() {
    let dir = tempfile::tempdir().unwrap();
    let sensor = calibrated_sensor("SN1");
    let device = open_device(&sensor);
    let guard = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let declining = calibration(dir.path(), |_: &Device| false).with_guard(guard.clone());

    match declining.ensure_calibration(&device) {
        Err(CalibrationError::UserDeclined) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!declining.is_generating());
    assert_eq!(sensor.generations(), 0);

    let accepting = calibration(dir.path(), always).with_guard(guard);
    let outcome = accepting.ensure_calibration(&device).unwrap();
    assert!(matches!(outcome, CalibrationOutcome::Generating(_)));
}

#[test]
fn failed_generation_releases_guard() {
    let dir = tempfile::tempdir().unwrap();
    let sensor = calibrated_sensor("SN1");
    let device = open_device(&sensor);
    sensor.fail_next(Op::GenerateCalibrationData, DriverError::io("finger on sensor"));
    let manager = calibration(dir.path(), always);

    let task = match manager.ensure_calibration(&device).unwrap() {
        CalibrationOutcome::Generating(task) => task,
        other => panic!("expected generation, got {:?}", other),
    };
    match task.wait() {
        Err(CalibrationError::GenerationFailed(err)) => {
            assert_eq!(err.message(), "finger on sensor")
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(!manager.is_generating());
    assert!(!dir.path().join("SN1_calblob.bin").exists());

    let retry = match manager.ensure_calibration(&device).unwrap() {
        CalibrationOutcome::Generating(task) => task,
        other => panic!("expected a second generation, got {:?}", other),
    };
    assert!(matches!(retry.wait().unwrap(), CalibrationOutcome::Applied));
    assert_eq!(sensor.generations(), 1);
    let attempts = sensor
        .calls()
        .iter()
        .filter(|call| **call == Call::GenerateCalibrationData)
        .count();
    assert_eq!(attempts, 2);
    assert_eq!(fs::read(dir.path().join("SN1_calblob.bin")).unwrap(), BLOB);
}

#[test]
fn disposed_handle_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let device = open_device(&calibrated_sensor("SN1"));
    device.dispose();

    match calibration(dir.path(), always).ensure_calibration(&device) {
        Err(CalibrationError::Disposed) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}
