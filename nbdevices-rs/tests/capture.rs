mod common;

use common::{open_device, sensor, sessions};
use nbdevices::sim::{Call, SimulatedSensor};
use nbdevices::{
    CaptureController, CaptureState, QualityScore, ScanError, ScanFormat, ScanMessage, ScanMode,
    ScanRequest, ScanStatus, SecurityModel,
};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn format() -> ScanFormat {
    ScanFormat::new(8, 8, 500)
}

fn controller() -> CaptureController {
    CaptureController::new().with_priority_elevation(false)
}

fn plain_sensor() -> SimulatedSensor {
    sensor("usb-1", "SN1", SecurityModel::CakOnly)
}

fn terminals(messages: &[ScanMessage]) -> usize {
    messages.iter().filter(|message| message.is_terminal()).count()
}

fn preview_values(messages: &[ScanMessage]) -> Vec<i32> {
    messages
        .iter()
        .filter_map(|message| match message {
            ScanMessage::Preview(event) => Some(event.finger_detect_value),
            _ => None,
        })
        .collect()
}

#[test]
fn snapshot_of_mid_grey_frame() {
    common::init_logging();
    let sensor = plain_sensor();
    let device = open_device(&sensor);
    let mut messages = Vec::new();

    let result = controller()
        .run(&device, &ScanRequest::Snapshot(format()), &mut |message: ScanMessage| {
            messages.push(message)
        })
        .unwrap();

    assert_eq!(terminals(&messages), 1);
    assert_eq!(messages.len(), 1);
    assert_eq!(result.mode, ScanMode::Snapshot);
    assert_eq!(result.event.status, ScanStatus::Ok);
    assert_eq!(result.event.image.len(), 64);
    assert!(result.event.image.iter().all(|pixel| *pixel == 0x80));
    assert_eq!(result.event.finger_detect_value, 120);
    assert_eq!(result.quality, Ok(QualityScore::WORST));

    let again = controller().start_snapshot(&device, &format()).unwrap();
    assert_eq!(again.quality, result.quality);
    assert_eq!(device.capture_state(), CaptureState::Idle);
}

#[test]
fn snapshot_runs_scan_then_reads_finger_detect_value() {
    let sensor = plain_sensor();
    let device = open_device(&sensor);
    sensor.clear_calls();

    controller().start_snapshot(&device, &format()).unwrap();

    assert_eq!(
        sensor.calls(),
        vec![Call::Scan(format()), Call::FingerDetectValue]
    );
}

#[test]
fn continuous_streams_previews_before_terminal() {
    let sensor = plain_sensor().with_previews(3, Duration::from_millis(1));
    let device = open_device(&sensor);
    let mut messages = Vec::new();

    let result = controller()
        .start_continuous(&device, &format(), Duration::from_secs(1), &mut |message: ScanMessage| {
            messages.push(message)
        })
        .unwrap();

    assert_eq!(messages.len(), 4);
    assert_eq!(preview_values(&messages), vec![10, 20, 30]);
    match messages.last() {
        Some(ScanMessage::Completed(completed)) => assert_eq!(completed, &result),
        other => panic!("unexpected terminal message: {:?}", other),
    }
    assert_eq!(result.mode, ScanMode::Continuous);
    assert!(sensor
        .calls()
        .contains(&Call::ScanWithPreview(format(), Duration::from_secs(1))));
}

#[test]
fn slow_sink_keeps_newest_previews() {
    let sensor = plain_sensor().with_previews(5, Duration::from_millis(0));
    let device = open_device(&sensor);
    let watcher = sensor.clone();
    let mut messages = Vec::new();

    controller()
        .with_preview_capacity(2)
        .start_continuous(&device, &format(), Duration::from_secs(1), &mut |message: ScanMessage| {
            if messages.is_empty() {
                // Stall the consumer until the sensor is done producing.
                assert!(watcher.wait_for_hardware_completion(1, WAIT));
            }
            messages.push(message)
        })
        .unwrap();

    let previews = preview_values(&messages);
    assert!(previews.len() <= 3);
    assert!(previews.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(&previews[previews.len() - 2..], &[40, 50]);
    assert_eq!(terminals(&messages), 1);
    assert!(messages.last().map(ScanMessage::is_terminal).unwrap_or(false));
}

#[test]
fn cancel_after_hardware_completion_still_completes() {
    let sensor = plain_sensor();
    sensor.hold_completion(true);
    let device = open_device(&sensor);
    let controller = controller();

    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || {
            let mut messages = Vec::new();
            let result = controller.start_continuous(
                &device,
                &format(),
                Duration::from_secs(5),
                &mut |message: ScanMessage| messages.push(message),
            );
            (result, messages)
        })
    };

    assert!(sensor.wait_for_hardware_completion(1, WAIT));
    assert!(controller.cancel(&device));
    assert_eq!(device.capture_state(), CaptureState::Cancelling);
    sensor.hold_completion(false);

    let (result, messages) = scan.join().unwrap();
    assert!(result.is_ok());
    assert_eq!(terminals(&messages), 1);
    assert!(matches!(messages.last(), Some(ScanMessage::Completed(_))));
    assert_eq!(device.capture_state(), CaptureState::Idle);
}

#[test]
fn cancel_before_completion_reports_cancelled_once() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    let device = open_device(&sensor);
    let controller = controller();
    let canceller = controller.canceller(&device);

    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || {
            let mut messages = Vec::new();
            let result = controller.start_continuous(
                &device,
                &format(),
                Duration::from_secs(5),
                &mut |message: ScanMessage| messages.push(message),
            );
            (result, messages)
        })
    };

    assert!(sensor.wait_for_scan_start(1, WAIT));
    assert!(canceller.cancel());

    let (result, messages) = scan.join().unwrap();
    assert!(matches!(result, Err(ScanError::Cancelled)));
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], ScanMessage::Failed(ScanError::Cancelled)));
    assert!(!canceller.cancel());
}

#[test]
fn second_scan_on_busy_device_is_refused() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    let device = open_device(&sensor);
    let controller = controller();

    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || controller.start_snapshot(&device, &format()))
    };
    assert!(sensor.wait_for_scan_start(1, WAIT));

    assert!(matches!(
        controller.start_snapshot(&device, &format()),
        Err(ScanError::Busy)
    ));
    assert!(matches!(
        controller.finger_detect_value(&device),
        Err(ScanError::Busy)
    ));
    assert!(matches!(
        sessions().open_session(&device),
        Err(nbdevices::SessionError::AlreadyOpen)
    ));

    controller.cancel(&device);
    assert!(matches!(scan.join().unwrap(), Err(ScanError::Cancelled)));
}

#[test]
fn sensor_timeout_is_reported() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    let device = open_device(&sensor);

    let result = controller().start_continuous(
        &device,
        &format(),
        Duration::from_millis(30),
        &mut |_: ScanMessage| {},
    );

    assert!(matches!(result, Err(ScanError::Timeout)));
}

#[test]
fn wedged_sensor_is_aborted_at_the_ceiling() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    sensor.ignore_scan_timeout(true);
    let device = open_device(&sensor);
    let mut messages = Vec::new();

    let result = controller()
        .with_cancel_grace(Duration::from_millis(30))
        .start_continuous(&device, &format(), Duration::from_millis(20), &mut |message: ScanMessage| {
            messages.push(message)
        });

    assert!(matches!(result, Err(ScanError::Timeout)));
    assert!(sensor.calls().contains(&Call::CancelScan));
    assert!(matches!(
        messages.as_slice(),
        [ScanMessage::Failed(ScanError::Timeout)]
    ));
}

#[test]
fn disposing_during_scan_aborts_it() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    let device = open_device(&sensor);
    let controller = controller();

    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || controller.start_snapshot(&device, &format()))
    };
    assert!(sensor.wait_for_scan_start(1, WAIT));

    device.dispose();

    assert!(matches!(scan.join().unwrap(), Err(ScanError::Cancelled)));
    assert!(matches!(
        controller.start_snapshot(&device, &format()),
        Err(ScanError::Disposed)
    ));
}

#[test]
fn closed_session_refuses_scans() {
    let sensor = plain_sensor();
    let device = open_device(&sensor);
    sessions().close_session(&device).unwrap();

    assert!(matches!(
        controller().start_snapshot(&device, &format()),
        Err(ScanError::SessionClosed)
    ));
}

#[test]
fn pass_through_commands() {
    let sensor = plain_sensor().with_finger_detect_value(42);
    let device = open_device(&sensor);
    let controller = controller();

    assert_eq!(controller.finger_detect_value(&device).unwrap(), 42);
    assert_eq!(
        controller.state(&device).unwrap(),
        nbdevices::DeviceState::Ready
    );
    controller.reset(&device).unwrap();
    assert!(sensor.calls().contains(&Call::Reset));
}

#[test]
fn frame_carries_sensor_fill() {
    let sensor = plain_sensor().with_fill(0x20);
    let device = open_device(&sensor);

    let result = controller().start_snapshot(&device, &format()).unwrap();

    assert!(result.event.image.iter().all(|pixel| *pixel == 0x20));
}

#[test]
fn session_stays_open_while_scanning() {
    let sensor = plain_sensor();
    sensor.stall_scans(true);
    let device = open_device(&sensor);
    let controller = controller();

    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || controller.start_snapshot(&device, &format()))
    };
    assert!(sensor.wait_for_scan_start(1, WAIT));
    sensor.clear_calls();

    assert!(matches!(
        sessions().close_session(&device),
        Err(nbdevices::SessionError::ScanInProgress)
    ));
    assert!(!sensor.calls().contains(&Call::CloseSession));
    assert_eq!(device.session_state(), nbdevices::SessionState::Open);

    controller.cancel(&device);
    assert!(matches!(scan.join().unwrap(), Err(ScanError::Cancelled)));
    sessions().close_session(&device).unwrap();
    assert_eq!(device.session_state(), nbdevices::SessionState::Closed);
}

#[test]
fn unbounded_timeout_is_accepted() {
    let sensor = plain_sensor().with_previews(1, Duration::from_millis(1));
    let device = open_device(&sensor);

    let result = controller().start_continuous(
        &device,
        &format(),
        Duration::MAX,
        &mut |_: ScanMessage| {},
    );

    assert!(result.is_ok());
}

#[test]
fn late_cancel_leaves_the_next_scan_running() {
    let sensor = plain_sensor();
    let device = open_device(&sensor);
    let controller = controller();
    let canceller = controller.canceller(&device);

    controller.start_snapshot(&device, &format()).unwrap();

    sensor.stall_scans(true);
    let scan = {
        let device = device.clone();
        let controller = controller.clone();
        thread::spawn(move || controller.start_snapshot(&device, &format()))
    };
    assert!(sensor.wait_for_scan_start(2, WAIT));

    assert!(!canceller.cancel());
    assert!(!sensor.calls().contains(&Call::CancelScan));
    assert_eq!(device.capture_state(), CaptureState::Running);

    assert!(controller.cancel(&device));
    assert!(matches!(scan.join().unwrap(), Err(ScanError::Cancelled)));
}
