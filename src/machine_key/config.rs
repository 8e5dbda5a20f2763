//! Machine key configuration and key descriptors

use serde::{Deserialize, Serialize};

use crate::error::{BcResult, BrowserCapsError};

pub const AUTO_GENERATE: &str = "AutoGenerate";
pub const ISOLATE_APPS: &str = "IsolateApps";
pub const ISOLATE_BY_APP_ID: &str = "IsolateByAppId";

/// `machineKey` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineKeyConfig {
    pub validation_key: String,
    pub decryption_key: String,
    pub validation: String,
    pub decryption: String,
}

impl Default for MachineKeyConfig {
    fn default() -> Self {
        Self {
            validation_key: format!("{},{}", AUTO_GENERATE, ISOLATE_APPS),
            decryption_key: format!("{},{}", AUTO_GENERATE, ISOLATE_APPS),
            validation: "HMACSHA256".to_string(),
            decryption: "Auto".to_string(),
        }
    }
}

/// Parsed `validationKey` / `decryptionKey` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDescriptor {
    Explicit(Vec<u8>),
    AutoGenerate {
        isolate_apps: bool,
        isolate_by_app_id: bool,
    },
}

impl KeyDescriptor {
    /// `field` names the setting in error messages.
    pub fn parse(raw: &str, field: &str) -> BcResult<Self> {
        let mut tokens = raw.split(',').map(str::trim);
        let first = tokens.next().unwrap_or_default();

        if !first.eq_ignore_ascii_case(AUTO_GENERATE) {
            if tokens.next().is_some() {
                return Err(BrowserCapsError::MachineKeyConfig(format!(
                    "{}: '{}' and '{}' are only valid with '{}'",
                    field, ISOLATE_APPS, ISOLATE_BY_APP_ID, AUTO_GENERATE
                )));
            }
            let key = hex::decode(first)
                .map_err(|e| BrowserCapsError::MachineKeyConfig(format!("{}: invalid hex key: {}", field, e)))?;
            if key.is_empty() {
                return Err(BrowserCapsError::MachineKeyConfig(format!("{}: key is empty", field)));
            }
            return Ok(Self::Explicit(key));
        }

        let mut isolate_apps = false;
        let mut isolate_by_app_id = false;
        for token in tokens {
            if token.eq_ignore_ascii_case(ISOLATE_APPS) {
                isolate_apps = true;
            } else if token.eq_ignore_ascii_case(ISOLATE_BY_APP_ID) {
                isolate_by_app_id = true;
            } else {
                return Err(BrowserCapsError::MachineKeyConfig(format!(
                    "{}: unknown modifier '{}'",
                    field, token
                )));
            }
        }
        Ok(Self::AutoGenerate {
            isolate_apps,
            isolate_by_app_id,
        })
    }

    pub fn explicit_len(&self) -> Option<usize> {
        match self {
            Self::Explicit(key) => Some(key.len()),
            Self::AutoGenerate { .. } => None,
        }
    }
}
