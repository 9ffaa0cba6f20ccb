use crate::ConfigError;
use std::collections::HashMap;
use std::fmt;

/// Length of every session key accepted by the sensors.
pub const KEY_LEN: usize = 32;

pub const DEFAULT_CAK_NAME: &str = "DefaultCAKKey1";
pub const DEFAULT_CDK_NAME: &str = "Application Lock";
pub const DEFAULT_LEGACY_NAME: &str = "AUTH1";

/// Role a credential plays in the session handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CredentialKind {
    /// Primary authentication key.
    Cak,
    /// Provisionable application key.
    Cdk,
    /// Single key of the legacy protocol.
    LegacyAuth,
}

impl CredentialKind {
    pub fn default_name(self) -> &'static str {
        match self {
            CredentialKind::Cak => DEFAULT_CAK_NAME,
            CredentialKind::Cdk => DEFAULT_CDK_NAME,
            CredentialKind::LegacyAuth => DEFAULT_LEGACY_NAME,
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            CredentialKind::Cak => "CAK",
            CredentialKind::Cdk => "CDK",
            CredentialKind::LegacyAuth => "legacy",
        };

        write!(f, "{}", string)
    }
}

/// Named session key. The identifier goes on the wire NUL-terminated.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential {
    id: Vec<u8>,
    key: [u8; KEY_LEN],
}

impl Credential {
    pub fn new(name: &str, key: [u8; KEY_LEN]) -> Self {
        let mut id = Vec::with_capacity(name.len() + 1);
        id.extend_from_slice(name.as_bytes());
        id.push(0);

        Credential { id, key }
    }

    pub fn from_slice(name: &str, key: &[u8]) -> Result<Self, ConfigError> {
        if key.len() != KEY_LEN {
            return Err(ConfigError::Credential {
                name: name.to_string(),
                reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
            });
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key);

        Ok(Self::new(name, bytes))
    }

    /// Parses a hex-encoded key as found in settings files.
    pub fn from_hex(name: &str, key: &str) -> Result<Self, ConfigError> {
        let bytes = hex::decode(key.trim()).map_err(|err| ConfigError::Credential {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

        Self::from_slice(name, &bytes)
    }

    /// Identifier as sent to the device, including the terminating NUL.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.id[..self.id.len() - 1]).into_owned()
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Source of session keys. Key material never lives in this crate; it is injected by the
/// application, typically from a settings file or a platform keystore.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self, kind: CredentialKind) -> Option<Credential>;
}

/// In-memory [`CredentialProvider`].
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: HashMap<CredentialKind, Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CredentialKind, credential: Credential) -> Self {
        self.insert(kind, credential);
        self
    }

    pub fn insert(&mut self, kind: CredentialKind, credential: Credential) {
        self.credentials.insert(kind, credential);
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialProvider for CredentialStore {
    fn credential(&self, kind: CredentialKind) -> Option<Credential> {
        self.credentials.get(&kind).cloned()
    }
}
