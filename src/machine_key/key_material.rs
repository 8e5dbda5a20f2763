//! Process-wide key seed and auto-generated key derivation
use std::fmt;

use once_cell::sync::Lazy;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{BcResult, BrowserCapsError};

pub const SEED_LEN: usize = 256;

/// Auto-generated decryption keys start at this seed offset
pub const DECRYPTION_KEY_OFFSET: usize = 128;

static PROCESS_SEED: Lazy<KeySeed> = Lazy::new(KeySeed::generate);

/// Random bytes backing every auto-generated key
#[derive(Clone, PartialEq, Eq)]
pub struct KeySeed([u8; SEED_LEN]);

impl fmt::Debug for KeySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySeed(..)")
    }
}

impl KeySeed {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> BcResult<Self> {
        let bytes: [u8; SEED_LEN] = bytes.try_into().map_err(|_| {
            BrowserCapsError::MachineKeyConfig(format!(
                "key seed must be {} bytes, got {}",
                SEED_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Seed shared by the whole process, generated on first use
    pub fn process_wide() -> &'static KeySeed {
        &PROCESS_SEED
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    pub(crate) fn validation_key(&self, len: usize) -> BcResult<Vec<u8>> {
        self.slice(0, len)
    }

    pub(crate) fn decryption_key(&self, len: usize) -> BcResult<Vec<u8>> {
        self.slice(DECRYPTION_KEY_OFFSET, len)
    }

    fn slice(&self, offset: usize, len: usize) -> BcResult<Vec<u8>> {
        self.0
            .get(offset..offset + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                BrowserCapsError::MachineKeyConfig(format!("cannot auto-generate a {} byte key", len))
            })
    }
}

/// The application a key is derived for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    pub virtual_path: String,
    pub app_id: String,
}

impl AppIdentity {
    pub fn new(virtual_path: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            app_id: app_id.into(),
        }
    }
}

/// Apply the isolation modifiers to an auto-generated key in place.
pub(crate) fn isolate(key: &mut [u8], app: &AppIdentity, isolate_apps: bool, isolate_by_app_id: bool) {
    if isolate_apps {
        let digest = Sha256::digest(app.virtual_path.to_lowercase().as_bytes());
        xor_into(key, 0, &digest[..4]);
    }
    if isolate_by_app_id {
        let digest = Sha256::digest(app.app_id.as_bytes());
        xor_into(key, 4, &digest[..4]);
    }
}

fn xor_into(key: &mut [u8], offset: usize, mask: &[u8]) {
    for (byte, m) in key.iter_mut().skip(offset).zip(mask) {
        *byte ^= m;
    }
}
