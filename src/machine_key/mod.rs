//! Machine key derivation and payload protection
pub mod algorithms;
pub mod config;
pub mod crypto;
pub mod key_material;

pub use self::algorithms::{CipherKind, DecryptionAlgorithm, DigestKind, ValidationAlgorithm};
pub use self::config::{KeyDescriptor, MachineKeyConfig};
pub use self::crypto::{constant_time_eq, EncryptionOptions, IvMode, MachineKey};
pub use self::key_material::{AppIdentity, KeySeed};
