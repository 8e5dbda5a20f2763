//! Derived machine keys: signing, verification and symmetric encryption
use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use super::algorithms::{
    CipherKind, DecryptionAlgorithm, DigestKind, ValidationAlgorithm, MIN_VALIDATION_KEY_SIZE,
};
use super::config::{KeyDescriptor, MachineKeyConfig};
use super::key_material::{isolate, AppIdentity, KeySeed};
use crate::error::{BcResult, BrowserCapsError};

/// How the CBC initialization vector is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvMode {
    /// All-zero IV, not stored in the output
    None,
    #[default]
    Random,
    /// SHA-256 prefix of the plaintext, so equal inputs encrypt equally
    Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionOptions {
    pub iv: IvMode,
    /// Append an HMAC over IV and ciphertext. Without it CBC has no integrity
    /// check, and a modified payload can decrypt to different plaintext instead
    /// of failing.
    pub sign: bool,
    pub modifier: Option<Vec<u8>>,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            iv: IvMode::Random,
            sign: true,
            modifier: None,
        }
    }
}

impl EncryptionOptions {
    pub fn with_modifier(mut self, modifier: impl Into<Vec<u8>>) -> Self {
        self.modifier = Some(modifier.into());
        self
    }
}

/// Validation and decryption keys resolved for one application
#[derive(Clone)]
pub struct MachineKey {
    validation: ValidationAlgorithm,
    cipher: CipherKind,
    validation_key: Vec<u8>,
    decryption_key: Vec<u8>,
}

impl fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineKey")
            .field("validation", &self.validation.name)
            .field("cipher", &self.cipher)
            .field("validation_key_len", &self.validation_key.len())
            .field("decryption_key_len", &self.decryption_key.len())
            .finish()
    }
}

macro_rules! hmac_over {
    ($digest:ty, $key:expr, $parts:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .map_err(|e| BrowserCapsError::MachineKeyConfig(format!("validationKey: {}", e)))?;
        for part in $parts {
            mac.update(part);
        }
        mac.finalize().into_bytes().to_vec()
    }};
}

impl MachineKey {
    pub fn derive(config: &MachineKeyConfig, seed: &KeySeed, app: &AppIdentity) -> BcResult<Self> {
        // 1. Algorithms
        let validation = ValidationAlgorithm::parse(&config.validation)?;
        let validation_desc = KeyDescriptor::parse(&config.validation_key, "validationKey")?;
        let decryption_desc = KeyDescriptor::parse(&config.decryption_key, "decryptionKey")?;
        let (cipher, decryption_len) =
            DecryptionAlgorithm::parse(&config.decryption)?.resolve(decryption_desc.explicit_len())?;

        // 2. Key bytes
        let validation_key = match validation_desc {
            KeyDescriptor::Explicit(key) if key.len() < MIN_VALIDATION_KEY_SIZE => {
                return Err(BrowserCapsError::MachineKeyConfig(format!(
                    "validationKey: {} bytes is shorter than the {} byte minimum",
                    key.len(),
                    MIN_VALIDATION_KEY_SIZE
                )));
            }
            KeyDescriptor::Explicit(key) => key,
            KeyDescriptor::AutoGenerate {
                isolate_apps,
                isolate_by_app_id,
            } => {
                let mut key = seed.validation_key(validation.key_size)?;
                isolate(&mut key, app, isolate_apps, isolate_by_app_id);
                key
            }
        };
        let decryption_key = match decryption_desc {
            KeyDescriptor::Explicit(key) => key,
            KeyDescriptor::AutoGenerate {
                isolate_apps,
                isolate_by_app_id,
            } => {
                let mut key = seed.decryption_key(decryption_len)?;
                isolate(&mut key, app, isolate_apps, isolate_by_app_id);
                key
            }
        };

        debug!(
            "derived machine key: validation={} ({} byte key), cipher={:?} ({} byte key)",
            validation.name,
            validation_key.len(),
            cipher,
            decryption_key.len()
        );
        Ok(Self {
            validation,
            cipher,
            validation_key,
            decryption_key,
        })
    }

    /// Derive against the process-wide seed
    pub fn for_app(config: &MachineKeyConfig, app: &AppIdentity) -> BcResult<Self> {
        Self::derive(config, KeySeed::process_wide(), app)
    }

    pub fn validation_algorithm(&self) -> &ValidationAlgorithm {
        &self.validation
    }

    pub fn cipher(&self) -> CipherKind {
        self.cipher
    }

    pub fn validation_key(&self) -> &[u8] {
        &self.validation_key
    }

    pub fn decryption_key(&self) -> &[u8] {
        &self.decryption_key
    }

    /// `data ‖ HMAC(data ‖ modifier)`
    pub fn sign(&self, data: &[u8], modifier: Option<&[u8]>) -> BcResult<Vec<u8>> {
        let tag = self.mac(&[data, modifier.unwrap_or_default()])?;
        let mut out = Vec::with_capacity(data.len() + tag.len());
        out.extend_from_slice(data);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Check a [`sign`](Self::sign) output and return the data without its tag.
    pub fn verify(&self, signed: &[u8], modifier: Option<&[u8]>) -> BcResult<Vec<u8>> {
        let data = self.split_tag(signed, &[modifier.unwrap_or_default()])?;
        Ok(data.to_vec())
    }

    pub fn encrypt(&self, plaintext: &[u8], options: &EncryptionOptions) -> BcResult<Vec<u8>> {
        let block = self.cipher.block_size();

        let mut input = plaintext.to_vec();
        if let Some(modifier) = &options.modifier {
            input.extend_from_slice(modifier);
        }

        let iv = match options.iv {
            IvMode::None => vec![0u8; block],
            IvMode::Random => {
                let mut iv = vec![0u8; block];
                rand::thread_rng().fill_bytes(&mut iv);
                iv
            }
            IvMode::Hash => Sha256::digest(plaintext)[..block].to_vec(),
        };

        let ciphertext = self.cbc_encrypt(&iv, &input)?;
        let mut out = Vec::with_capacity(block + ciphertext.len() + self.validation.hash_size);
        if options.iv != IvMode::None {
            out.extend_from_slice(&iv);
        }
        out.extend_from_slice(&ciphertext);

        if options.sign {
            let tag = self.mac(&[out.as_slice()])?;
            out.extend_from_slice(&tag);
        }
        Ok(out)
    }

    /// Every failure after key setup surfaces as [`BrowserCapsError::UnableToValidateData`].
    pub fn decrypt(&self, payload: &[u8], options: &EncryptionOptions) -> BcResult<Vec<u8>> {
        let block = self.cipher.block_size();

        // 1. Tag
        let body = if options.sign {
            self.split_tag(payload, &[])?
        } else {
            payload
        };

        // 2. IV
        let (iv, ciphertext) = match options.iv {
            IvMode::None => (vec![0u8; block], body),
            IvMode::Random | IvMode::Hash => {
                if body.len() < block {
                    return Err(BrowserCapsError::UnableToValidateData);
                }
                let (iv, rest) = body.split_at(block);
                (iv.to_vec(), rest)
            }
        };

        // 3. Decrypt
        let mut plaintext = self.cbc_decrypt(&iv, ciphertext)?;

        // 4. Modifier
        if let Some(modifier) = &options.modifier {
            if plaintext.len() < modifier.len() {
                return Err(BrowserCapsError::UnableToValidateData);
            }
            let split = plaintext.len() - modifier.len();
            if !constant_time_eq(&plaintext[split..], modifier) {
                return Err(BrowserCapsError::UnableToValidateData);
            }
            plaintext.truncate(split);
        }
        Ok(plaintext)
    }

    fn mac(&self, parts: &[&[u8]]) -> BcResult<Vec<u8>> {
        let key = self.validation_key.as_slice();
        Ok(match self.validation.digest {
            DigestKind::Md5 => hmac_over!(Md5, key, parts),
            DigestKind::Sha1 => hmac_over!(Sha1, key, parts),
            DigestKind::Sha256 => hmac_over!(Sha256, key, parts),
            DigestKind::Sha384 => hmac_over!(Sha384, key, parts),
            DigestKind::Sha512 => hmac_over!(Sha512, key, parts),
        })
    }

    /// Strip and check a trailing HMAC; `extra` is appended to the body when computing it.
    fn split_tag<'p>(&self, payload: &'p [u8], extra: &[&[u8]]) -> BcResult<&'p [u8]> {
        let hash_size = self.validation.hash_size;
        if payload.len() < hash_size {
            return Err(BrowserCapsError::UnableToValidateData);
        }
        let (body, tag) = payload.split_at(payload.len() - hash_size);
        let mut parts: Vec<&[u8]> = Vec::with_capacity(extra.len() + 1);
        parts.push(body);
        parts.extend_from_slice(extra);
        let expected = self
            .mac(&parts)
            .map_err(|_| BrowserCapsError::UnableToValidateData)?;
        if constant_time_eq(&expected, tag) {
            Ok(body)
        } else {
            Err(BrowserCapsError::UnableToValidateData)
        }
    }

    fn cbc_encrypt(&self, iv: &[u8], data: &[u8]) -> BcResult<Vec<u8>> {
        let key = self.decryption_key.as_slice();
        match (self.cipher, key.len()) {
            (CipherKind::Des, _) => cbc_encrypt::<des::Des>(key, iv, data),
            (CipherKind::TripleDes, _) => cbc_encrypt::<des::TdesEde3>(key, iv, data),
            (CipherKind::Aes, 16) => cbc_encrypt::<aes::Aes128>(key, iv, data),
            (CipherKind::Aes, 24) => cbc_encrypt::<aes::Aes192>(key, iv, data),
            (CipherKind::Aes, _) => cbc_encrypt::<aes::Aes256>(key, iv, data),
        }
    }

    fn cbc_decrypt(&self, iv: &[u8], data: &[u8]) -> BcResult<Vec<u8>> {
        let key = self.decryption_key.as_slice();
        match (self.cipher, key.len()) {
            (CipherKind::Des, _) => cbc_decrypt::<des::Des>(key, iv, data),
            (CipherKind::TripleDes, _) => cbc_decrypt::<des::TdesEde3>(key, iv, data),
            (CipherKind::Aes, 16) => cbc_decrypt::<aes::Aes128>(key, iv, data),
            (CipherKind::Aes, 24) => cbc_decrypt::<aes::Aes192>(key, iv, data),
            (CipherKind::Aes, _) => cbc_decrypt::<aes::Aes256>(key, iv, data),
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> BcResult<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| BrowserCapsError::MachineKeyConfig(format!("decryptionKey: {}", e)))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(data))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> BcResult<Vec<u8>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| BrowserCapsError::UnableToValidateData)?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| BrowserCapsError::UnableToValidateData)
}

/// Compare two buffers without stopping at the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u64;
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= u64::from(x ^ y);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> KeySeed {
        KeySeed::from_bytes(&[7u8; 256]).unwrap()
    }

    fn app() -> AppIdentity {
        AppIdentity::new("/store", "LM/W3SVC/1/ROOT/store")
    }

    fn config(validation_key: &str, decryption_key: &str, validation: &str, decryption: &str) -> MachineKeyConfig {
        MachineKeyConfig {
            validation_key: validation_key.to_string(),
            decryption_key: decryption_key.to_string(),
            validation: validation.to_string(),
            decryption: decryption.to_string(),
        }
    }

    #[test]
    fn auto_generated_keys_are_deterministic_per_seed() {
        let plain = config("AutoGenerate", "AutoGenerate", "HMACSHA256", "Auto");
        let first = MachineKey::derive(&plain, &seed(), &app()).unwrap();
        let second = MachineKey::derive(&plain, &seed(), &app()).unwrap();
        assert_eq!(first.validation_key(), second.validation_key());
        assert_eq!(first.decryption_key(), second.decryption_key());
        assert_eq!(first.validation_key().len(), 64);
        assert_eq!(first.decryption_key().len(), 32);
        assert_eq!(first.cipher(), CipherKind::Aes);

        let isolated = config("AutoGenerate,IsolateApps", "AutoGenerate,IsolateApps", "HMACSHA256", "Auto");
        let third = MachineKey::derive(&isolated, &seed(), &app()).unwrap();
        assert_ne!(third.validation_key()[..4], first.validation_key()[..4]);
        assert_eq!(third.validation_key()[4..], first.validation_key()[4..]);
        assert_ne!(third.decryption_key()[..4], first.decryption_key()[..4]);
        assert_eq!(third.decryption_key()[4..], first.decryption_key()[4..]);
    }

    #[test]
    fn round_trips_for_every_cipher() {
        let cases = [
            ("0123456789abcdef", "Auto"),
            ("0123456789abcdef0123456789abcdef0123456789abcdef", "3DES"),
            ("00112233445566778899aabbccddeeff", "AES"),
            ("AutoGenerate,IsolateApps", "AES"),
        ];
        let plaintext = b"ticket payload with some length to it".to_vec();
        for (decryption_key, decryption) in cases {
            let key = MachineKey::derive(
                &config("AutoGenerate", decryption_key, "SHA1", decryption),
                &seed(),
                &app(),
            )
            .unwrap();
            for iv in [IvMode::None, IvMode::Random, IvMode::Hash] {
                let options = EncryptionOptions {
                    iv,
                    sign: true,
                    modifier: Some(b"ctx".to_vec()),
                };
                let sealed = key.encrypt(&plaintext, &options).unwrap();
                assert_eq!(key.decrypt(&sealed, &options).unwrap(), plaintext, "{decryption} {iv:?}");
            }
        }
    }

    #[test]
    fn tampering_fails_with_generic_error() {
        let key = MachineKey::derive(&MachineKeyConfig::default(), &seed(), &app()).unwrap();
        let options = EncryptionOptions::default();
        let sealed = key.encrypt(b"secret", &options).unwrap();
        for index in [0, sealed.len() / 2, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[index] ^= 0x01;
            assert!(matches!(
                key.decrypt(&tampered, &options),
                Err(BrowserCapsError::UnableToValidateData)
            ));
        }
        assert!(matches!(
            key.decrypt(&sealed[..4], &options),
            Err(BrowserCapsError::UnableToValidateData)
        ));
    }

    #[test]
    fn unsigned_payloads_have_no_integrity_check() {
        let key = MachineKey::derive(&MachineKeyConfig::default(), &seed(), &app()).unwrap();
        let options = EncryptionOptions {
            sign: false,
            ..EncryptionOptions::default()
        };
        let plaintext = b"hello world, spanning two blocks".to_vec();
        let mut sealed = key.encrypt(&plaintext, &options).unwrap();
        sealed[0] ^= 0x01;
        let opened = key.decrypt(&sealed, &options).unwrap();
        assert_eq!(opened[0], b'i');
        assert_eq!(opened[1..], plaintext[1..]);
    }

    #[test]
    fn modifier_mismatch_is_rejected() {
        let key = MachineKey::derive(&MachineKeyConfig::default(), &seed(), &app()).unwrap();
        let sealed = key
            .encrypt(b"cart", &EncryptionOptions::default().with_modifier("user-1"))
            .unwrap();
        assert!(matches!(
            key.decrypt(&sealed, &EncryptionOptions::default().with_modifier("user-2")),
            Err(BrowserCapsError::UnableToValidateData)
        ));
    }

    #[test]
    fn hash_iv_is_deterministic() {
        let key = MachineKey::derive(&MachineKeyConfig::default(), &seed(), &app()).unwrap();
        let options = EncryptionOptions {
            iv: IvMode::Hash,
            ..EncryptionOptions::default()
        };
        assert_eq!(key.encrypt(b"same", &options).unwrap(), key.encrypt(b"same", &options).unwrap());
    }

    #[test]
    fn sign_and_verify() {
        let key = MachineKey::derive(&config("AutoGenerate", "AutoGenerate", "MD5", "Auto"), &seed(), &app()).unwrap();
        let signed = key.sign(b"viewstate", Some(b"page")).unwrap();
        assert_eq!(signed.len(), b"viewstate".len() + 16);
        assert_eq!(key.verify(&signed, Some(b"page")).unwrap(), b"viewstate");
        assert!(key.verify(&signed, Some(b"other")).is_err());
        assert!(key.verify(&signed, None).is_err());
    }

    #[test]
    fn descriptor_errors_surface_as_config_errors() {
        for bad in [
            config("AutoGenerate", "0011,IsolateApps", "SHA1", "Auto"),
            config("AutoGenerate", "00112233", "SHA1", "AES"),
            config("AutoGenerate", "AutoGenerate", "CRC32", "Auto"),
        ] {
            assert!(matches!(
                MachineKey::derive(&bad, &seed(), &app()),
                Err(BrowserCapsError::MachineKeyConfig(_))
            ));
        }
    }

    #[test]
    fn short_explicit_validation_key_is_rejected() {
        for short in ["01", "00112233445566778899aabbccddeeff0011aa"] {
            assert!(matches!(
                MachineKey::derive(&config(short, "AutoGenerate", "HMACSHA256", "Auto"), &seed(), &app()),
                Err(BrowserCapsError::MachineKeyConfig(_))
            ));
        }

        let exact = "00112233445566778899aabbccddeeff00112233";
        let key = MachineKey::derive(&config(exact, "AutoGenerate", "HMACSHA256", "Auto"), &seed(), &app()).unwrap();
        assert_eq!(key.validation_key().len(), 20);
        let signed = key.sign(b"form", None).unwrap();
        assert_eq!(key.verify(&signed, None).unwrap(), b"form");
    }

    #[test]
    fn constant_time_eq_checks_whole_buffers() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn debug_hides_key_bytes() {
        let key = MachineKey::derive(
            &config("AutoGenerate", "0123456789abcdef", "SHA1", "DES"),
            &seed(),
            &app(),
        )
        .unwrap();
        let printed = format!("{:?}", key);
        assert!(!printed.contains("0123"));
        assert!(printed.contains("Des"));
    }
}
