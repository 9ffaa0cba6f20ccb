use crate::{
    BlobParameter, Credential, CredentialKind, CredentialProvider, Device, Driver, DriverError,
    SecurityModel, SessionError, SessionState,
};
use crate::device::CaptureState;
use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Device command issued during a session handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeStep {
    LegacyOpen,
    CakOpen,
    CdkOpen,
    ClearProvisioningKey,
    ProvisionOpen,
    SetProvisioningKey,
    ProvisionClose,
    CdkReopen,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            HandshakeStep::LegacyOpen => "open legacy session",
            HandshakeStep::CakOpen => "open CAK session",
            HandshakeStep::CdkOpen => "open CDK session",
            HandshakeStep::ClearProvisioningKey => "clear provisioning key",
            HandshakeStep::ProvisionOpen => "open provisioning session",
            HandshakeStep::SetProvisioningKey => "set provisioning key",
            HandshakeStep::ProvisionClose => "close provisioning session",
            HandshakeStep::CdkReopen => "reopen CDK session",
        };

        write!(f, "{}", string)
    }
}

/// Which failures of the provisioning-key clear are taken as "already provisioned".
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningProbe {
    /// Any failure is tolerated.
    TolerateAny,
    /// Only the device's "parameter not set" answer is tolerated.
    TolerateNotSet,
}

impl ProvisioningProbe {
    fn tolerates(self, err: &DriverError) -> bool {
        match self {
            ProvisioningProbe::TolerateAny => true,
            ProvisioningProbe::TolerateNotSet => err.is_not_set(),
        }
    }
}

impl Default for ProvisioningProbe {
    fn default() -> Self {
        ProvisioningProbe::TolerateAny
    }
}

fn step<T>(step: HandshakeStep, result: Result<T, DriverError>) -> Result<T, SessionError> {
    debug!("Handshake: {}", step);
    result.map_err(|cause| SessionError::Step { step, cause })
}

fn close_quietly(driver: &dyn Driver, context: &str) {
    if let Err(err) = driver.close_session() {
        warn!("Closing session {} failed: {}", context, err);
    }
}

/// Opens and closes authenticated sessions according to the security model a device declares.
pub struct SessionManager {
    credentials: Arc<dyn CredentialProvider>,
    probe: ProvisioningProbe,
}

impl SessionManager {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        SessionManager {
            credentials,
            probe: ProvisioningProbe::default(),
        }
    }

    pub fn with_probe(mut self, probe: ProvisioningProbe) -> Self {
        self.probe = probe;
        self
    }

    fn require(&self, kind: CredentialKind) -> Result<Credential, SessionError> {
        self.credentials
            .credential(kind)
            .ok_or(SessionError::MissingCredential(kind))
    }

    /// Runs the handshake of the device's security model. On success the handle is `Open`; on
    /// failure it is left `Closed`.
    pub fn open_session(&self, device: &Device) -> Result<(), SessionError> {
        if device.is_disposed() {
            return Err(SessionError::Disposed);
        }

        let mut session = device.session_slot().lock();
        if *session == SessionState::Open {
            return Err(SessionError::AlreadyOpen);
        }
        if device.capture_state() != CaptureState::Idle {
            return Err(SessionError::ScanInProgress);
        }

        let driver = device.driver();
        let model = device.get_security_model();
        match model {
            SecurityModel::None => {}
            SecurityModel::LegacyAuth => {
                let legacy = self.require(CredentialKind::LegacyAuth)?;
                step(
                    HandshakeStep::LegacyOpen,
                    driver.open_session(legacy.id(), legacy.key()),
                )?;
            }
            SecurityModel::CakOnly => {
                let cak = self.require(CredentialKind::Cak)?;
                step(HandshakeStep::CakOpen, driver.open_session(cak.id(), cak.key()))?;
            }
            SecurityModel::CakCdk => self.provision(driver)?,
        }

        *session = SessionState::Open;
        info!("Session open on {} ({})", device.get_id(), model);

        Ok(())
    }

    // Provisioning state is unknown at first contact, so the CDK is always rewritten.
    fn provision(&self, driver: &dyn Driver) -> Result<(), SessionError> {
        let cak = self.require(CredentialKind::Cak)?;
        let cdk = self.require(CredentialKind::Cdk)?;

        step(HandshakeStep::CdkOpen, driver.open_session(cdk.id(), cdk.key()))?;

        debug!("Handshake: {}", HandshakeStep::ClearProvisioningKey);
        match driver.set_blob_parameter(BlobParameter::SetCdk, None) {
            Ok(()) => debug!("Provisioning key cleared"),
            Err(err) if self.probe.tolerates(&err) => {
                warn!("Clearing provisioning key failed, assuming provisioned: {}", err)
            }
            Err(cause) => {
                close_quietly(driver, "after a rejected provisioning probe");
                return Err(SessionError::Step {
                    step: HandshakeStep::ClearProvisioningKey,
                    cause,
                });
            }
        }
        close_quietly(driver, "after the provisioning probe");

        step(HandshakeStep::ProvisionOpen, driver.open_session(cak.id(), cak.key()))?;
        if let Err(err) = step(
            HandshakeStep::SetProvisioningKey,
            driver.set_blob_parameter(BlobParameter::SetCdk, Some(cdk.key())),
        ) {
            close_quietly(driver, "after a failed provisioning");
            return Err(err);
        }
        step(HandshakeStep::ProvisionClose, driver.close_session())?;

        step(HandshakeStep::CdkReopen, driver.open_session(cdk.id(), cdk.key()))
    }

    /// Closes the session if one is open. A running scan or command keeps the session open
    /// and gives [`SessionError::ScanInProgress`]; device errors are logged, never returned.
    pub fn close_session(&self, device: &Device) -> Result<(), SessionError> {
        let mut session = device.session_slot().lock();
        if *session == SessionState::Closed {
            return Ok(());
        }
        if device.capture_state() != CaptureState::Idle {
            warn!("Session on {} kept open, a scan is running", device.get_id());
            return Err(SessionError::ScanInProgress);
        }

        if device.get_security_model() != SecurityModel::None {
            close_quietly(device.driver(), &format!("on {}", device.get_id()));
        }
        *session = SessionState::Closed;
        debug!("Session closed on {}", device.get_id());
        Ok(())
    }
}
