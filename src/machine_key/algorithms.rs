//! Validation and decryption algorithm selection

use crate::error::{BcResult, BrowserCapsError};

/// Key size used when a probed algorithm does not report one
pub const DEFAULT_VALIDATION_KEY_SIZE: usize = 64;

/// Shortest explicit validation key accepted, in bytes
pub const MIN_VALIDATION_KEY_SIZE: usize = 20;

/// Key size of auto-generated AES keys
pub const AUTO_AES_KEY_SIZE: usize = 32;

const CUSTOM_PREFIX: &str = "alg:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestKind {
    pub fn output_size(&self) -> usize {
        match self {
            DigestKind::Md5 => 16,
            DigestKind::Sha1 => 20,
            DigestKind::Sha256 => 32,
            DigestKind::Sha384 => 48,
            DigestKind::Sha512 => 64,
        }
    }
}

/// Signing algorithm together with its digest and key sizes, in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationAlgorithm {
    pub name: String,
    pub digest: DigestKind,
    pub hash_size: usize,
    pub key_size: usize,
}

impl ValidationAlgorithm {
    pub fn parse(name: &str) -> BcResult<Self> {
        let trimmed = name.trim();
        let (digest, key_size) = match trimmed.to_ascii_uppercase().as_str() {
            "MD5" => (DigestKind::Md5, 64),
            // the cipher names validate with SHA1
            "SHA1" | "3DES" | "AES" => (DigestKind::Sha1, 64),
            "HMACSHA256" => (DigestKind::Sha256, 64),
            "HMACSHA384" => (DigestKind::Sha384, 128),
            "HMACSHA512" => (DigestKind::Sha512, 128),
            _ => match custom_name(trimmed) {
                Some(custom) => Self::probe(custom)
                    .ok_or_else(|| unknown("validation", trimmed))?,
                None => return Err(unknown("validation", trimmed)),
            },
        };
        Ok(Self {
            name: trimmed.to_string(),
            digest,
            hash_size: digest.output_size(),
            key_size,
        })
    }

    /// Plain digests report no key size and get the default
    fn probe(name: &str) -> Option<(DigestKind, usize)> {
        let found = match name.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => (DigestKind::Md5, None),
            "SHA1" | "SHA" => (DigestKind::Sha1, None),
            "SHA256" => (DigestKind::Sha256, None),
            "SHA384" => (DigestKind::Sha384, None),
            "SHA512" => (DigestKind::Sha512, None),
            "HMACMD5" => (DigestKind::Md5, Some(64)),
            "HMACSHA1" => (DigestKind::Sha1, Some(64)),
            "HMACSHA256" => (DigestKind::Sha256, Some(64)),
            "HMACSHA384" => (DigestKind::Sha384, Some(128)),
            "HMACSHA512" => (DigestKind::Sha512, Some(128)),
            _ => return None,
        };
        Some((found.0, found.1.unwrap_or(DEFAULT_VALIDATION_KEY_SIZE)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Des,
    TripleDes,
    Aes,
}

impl CipherKind {
    pub fn block_size(&self) -> usize {
        match self {
            CipherKind::Des | CipherKind::TripleDes => 8,
            CipherKind::Aes => 16,
        }
    }

    fn accepts_key_len(&self, len: usize) -> bool {
        match self {
            CipherKind::Des => len == 8,
            CipherKind::TripleDes => len == 24,
            CipherKind::Aes => matches!(len, 16 | 24 | 32),
        }
    }

    fn auto_key_len(&self) -> usize {
        match self {
            CipherKind::Des => 8,
            CipherKind::TripleDes => 24,
            CipherKind::Aes => AUTO_AES_KEY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionAlgorithm {
    /// DES for an explicit 8-byte key, AES otherwise
    Auto,
    Fixed(CipherKind),
}

impl DecryptionAlgorithm {
    pub fn parse(name: &str) -> BcResult<Self> {
        let trimmed = name.trim();
        let cipher = match trimmed.to_ascii_uppercase().as_str() {
            "AUTO" => return Ok(Self::Auto),
            "DES" => CipherKind::Des,
            "3DES" => CipherKind::TripleDes,
            "AES" => CipherKind::Aes,
            _ => {
                let custom = custom_name(trimmed).ok_or_else(|| unknown("decryption", trimmed))?;
                match custom.to_ascii_uppercase().as_str() {
                    "DES" => CipherKind::Des,
                    "3DES" | "TRIPLEDES" => CipherKind::TripleDes,
                    "AES" | "RIJNDAEL" => CipherKind::Aes,
                    _ => return Err(unknown("decryption", trimmed)),
                }
            }
        };
        Ok(Self::Fixed(cipher))
    }

    /// Concrete cipher and key length, given the explicit key length if one is configured.
    pub fn resolve(&self, explicit_len: Option<usize>) -> BcResult<(CipherKind, usize)> {
        let cipher = match (self, explicit_len) {
            (Self::Fixed(cipher), _) => *cipher,
            (Self::Auto, Some(8)) => CipherKind::Des,
            (Self::Auto, _) => CipherKind::Aes,
        };
        match explicit_len {
            Some(len) if cipher.accepts_key_len(len) => Ok((cipher, len)),
            Some(len) => Err(BrowserCapsError::MachineKeyConfig(format!(
                "decryptionKey: {} bytes is not a valid {:?} key length",
                len, cipher
            ))),
            None => Ok((cipher, cipher.auto_key_len())),
        }
    }
}

fn custom_name(name: &str) -> Option<&str> {
    let prefix = name.get(..CUSTOM_PREFIX.len())?;
    prefix
        .eq_ignore_ascii_case(CUSTOM_PREFIX)
        .then(|| name[CUSTOM_PREFIX.len()..].trim())
}

fn unknown(setting: &str, name: &str) -> BrowserCapsError {
    BrowserCapsError::MachineKeyConfig(format!("unsupported {} algorithm '{}'", setting, name))
}
