mod common;

use common::{cak, cdk, legacy, open_device, sensor, sessions, CDK_KEY};
use nbdevices::sim::{Call, Op, SimulatedSensor};
use nbdevices::{
    BlobParameter, Device, DriverError, HandshakeStep, ProvisioningProbe, SecurityModel,
    SessionError, SessionState,
};
use std::sync::Arc;

fn provisioning_trace() -> Vec<Call> {
    vec![
        Call::OpenSession(cdk().id().to_vec()),
        Call::SetBlobParameter(BlobParameter::SetCdk, None),
        Call::CloseSession,
        Call::OpenSession(cak().id().to_vec()),
        Call::SetBlobParameter(BlobParameter::SetCdk, Some(CDK_KEY.to_vec())),
        Call::CloseSession,
        Call::OpenSession(cdk().id().to_vec()),
    ]
}

fn failed_step(result: Result<(), SessionError>) -> (HandshakeStep, DriverError) {
    match result {
        Err(SessionError::Step { step, cause }) => (step, cause),
        other => panic!("expected a failed handshake step, got {:?}", other),
    }
}

#[test]
fn none_issues_no_commands() {
    common::init_logging();
    let sensor = sensor("usb-1", "SN1", SecurityModel::None);

    let device = open_device(&sensor);

    assert_eq!(device.session_state(), SessionState::Open);
    assert!(sensor.calls().is_empty());
}

#[test]
fn legacy_opens_with_legacy_key() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::LegacyAuth);

    let _device = open_device(&sensor);

    assert_eq!(sensor.calls(), vec![Call::OpenSession(legacy().id().to_vec())]);
    assert_eq!(sensor.session(), Some(b"AUTH1\0".to_vec()));
}

#[test]
fn legacy_failure_is_fatal() {
    let sensor = SimulatedSensor::with_serial("usb-1", "SN1")
        .with_security_model(SecurityModel::LegacyAuth);
    let device = Device::from_driver(Arc::new(sensor.clone()));

    let (step, cause) = failed_step(sessions().open_session(&device));

    assert_eq!(step, HandshakeStep::LegacyOpen);
    assert_eq!(cause.code(), -libc::EACCES);
    assert_eq!(device.session_state(), SessionState::Closed);
}

#[test]
fn cak_only_opens_with_primary_key() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakOnly);

    let _device = open_device(&sensor);

    assert_eq!(sensor.calls(), vec![Call::OpenSession(cak().id().to_vec())]);
}

#[test]
fn cak_only_failure_is_fatal() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakOnly);
    sensor.fail_next(Op::OpenSession, DriverError::io("link down"));
    let device = Device::from_driver(Arc::new(sensor.clone()));

    let (step, _) = failed_step(sessions().open_session(&device));

    assert_eq!(step, HandshakeStep::CakOpen);
}

#[test]
fn cak_cdk_runs_steps_in_order() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);

    let device = open_device(&sensor);

    assert_eq!(sensor.calls(), provisioning_trace());
    assert_eq!(sensor.session(), Some(cdk().id().to_vec()));
    assert_eq!(sensor.provisioned_cdk(), Some(CDK_KEY.to_vec()));
    assert_eq!(device.session_state(), SessionState::Open);
}

#[test]
fn cak_cdk_survives_failing_clear() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);
    sensor.fail_next(
        Op::SetBlobParameter(BlobParameter::SetCdk),
        DriverError::io("rejected"),
    );

    let device = open_device(&sensor);

    assert_eq!(sensor.calls(), provisioning_trace());
    assert_eq!(sensor.session(), Some(cdk().id().to_vec()));
    assert_eq!(device.session_state(), SessionState::Open);
}

#[test]
fn cak_cdk_unprovisioned_first_open_is_fatal() {
    let sensor = SimulatedSensor::with_serial("usb-1", "SN1")
        .with_security_model(SecurityModel::CakCdk)
        .accept_credential(cak().id(), cak().key())
        .with_cdk(cdk().id(), None);
    let device = Device::from_driver(Arc::new(sensor.clone()));

    let (step, _) = failed_step(sessions().open_session(&device));

    assert_eq!(step, HandshakeStep::CdkOpen);
    assert_eq!(sensor.calls(), vec![Call::OpenSession(cdk().id().to_vec())]);
    assert_eq!(device.session_state(), SessionState::Closed);
}

#[test]
fn cak_cdk_set_failure_closes_the_session() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);
    sensor.fail_nth(
        Op::SetBlobParameter(BlobParameter::SetCdk),
        1,
        DriverError::io("flash write failed"),
    );
    let device = Device::from_driver(Arc::new(sensor.clone()));

    let (step, cause) = failed_step(sessions().open_session(&device));

    assert_eq!(step, HandshakeStep::SetProvisioningKey);
    assert_eq!(cause.message(), "flash write failed");
    assert_eq!(sensor.calls().last(), Some(&Call::CloseSession));
    assert_eq!(sensor.session(), None);
    assert_eq!(device.session_state(), SessionState::Closed);
}

#[test]
fn cak_cdk_reopen_failure_is_fatal() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);
    sensor.fail_nth(Op::OpenSession, 2, DriverError::io("no answer"));
    let device = Device::from_driver(Arc::new(sensor.clone()));

    let (step, _) = failed_step(sessions().open_session(&device));

    assert_eq!(step, HandshakeStep::CdkReopen);
    assert_eq!(sensor.calls(), provisioning_trace());
    assert_eq!(device.session_state(), SessionState::Closed);
}

#[test]
fn strict_probe_tolerates_only_not_set() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);
    sensor.fail_next(
        Op::SetBlobParameter(BlobParameter::SetCdk),
        DriverError::not_set("no key stored"),
    );
    let device = Device::from_driver(Arc::new(sensor.clone()));
    let manager = sessions().with_probe(ProvisioningProbe::TolerateNotSet);

    manager.open_session(&device).unwrap();

    assert_eq!(sensor.calls(), provisioning_trace());
}

#[test]
fn strict_probe_surfaces_other_clear_failures() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakCdk);
    sensor.fail_next(
        Op::SetBlobParameter(BlobParameter::SetCdk),
        DriverError::io("bus error"),
    );
    let device = Device::from_driver(Arc::new(sensor.clone()));
    let manager = sessions().with_probe(ProvisioningProbe::TolerateNotSet);

    let (step, cause) = failed_step(manager.open_session(&device));

    assert_eq!(step, HandshakeStep::ClearProvisioningKey);
    assert_eq!(cause.code(), -libc::EIO);
    assert_eq!(sensor.session(), None);
}

#[test]
fn close_session_is_best_effort() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakOnly);
    let device = open_device(&sensor);
    sensor.fail_next(Op::CloseSession, DriverError::io("gone"));

    sessions().close_session(&device).unwrap();

    assert_eq!(device.session_state(), SessionState::Closed);
    assert_eq!(sensor.calls().last(), Some(&Call::CloseSession));
}

#[test]
fn disposed_handle_refuses_sessions() {
    let sensor = sensor("usb-1", "SN1", SecurityModel::CakOnly);
    let device = Device::from_driver(Arc::new(sensor));
    device.dispose();

    match sessions().open_session(&device) {
        Err(SessionError::Disposed) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}
