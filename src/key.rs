use base58::{FromBase58 as _, ToBase58 as _};
use onlyerror::Error;
use secp256k1::Secp256k1;
pub use secp256k1::{PublicKey, SecretKey};

/// Multikey prefix specified by [Data Integrity BIP340 Cryptosuites]
///
/// [Data Integrity BIP340 Cryptosuites]: https://dcdpr.github.io/data-integrity-schnorr-secp256k1/#multikey
const MULTIKEY_PREFIX: [u8; 2] = [0xe7, 0x01];

/// Prefix plus a compressed secp256k1 key.
pub const MULTIKEY_LEN: usize = MULTIKEY_PREFIX.len() + 33;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Failed to create public key from bytes
    InvalidBytesForPublicKey(#[source] secp256k1::Error),

    /// Failed to create secret key from bytes
    InvalidBytesForSecretKey(#[source] secp256k1::Error),

    /// Multikey must start with 'z' (base58-btc)
    MultibasePrefix,

    /// Failed to decode base58
    MultikeyBase58,

    /// Invalid Multikey prefix for secp256k1 public key
    MultikeyPrefix,

    /// Multikey must decode to 35 bytes
    #[error("Multikey must decode to 35 bytes, found {0}")]
    MultikeyLength(usize),
}

pub trait PublicKeyExt {
    /// Create a `PublicKey` from a BIP-340 Multikey.
    fn from_multikey(multikey: &str) -> Result<Self, Error>
    where
        Self: Sized;

    /// Encode a `PublicKey` into a BIP-340 Multikey.
    fn to_multikey(&self) -> String;
}

pub trait SecretKeyExt {
    /// Generate a new random secret key.
    fn generate() -> Self;

    /// Parse a secret key from 64 hex characters.
    fn from_hex(hex: &str) -> Result<Self, Error>
    where
        Self: Sized;
}

impl PublicKeyExt for PublicKey {
    fn from_multikey(multikey: &str) -> Result<Self, Error> {
        let encoded = multikey.strip_prefix('z').ok_or(Error::MultibasePrefix)?;
        let data = encoded.from_base58().map_err(|_| Error::MultikeyBase58)?;

        if data.len() != MULTIKEY_LEN {
            return Err(Error::MultikeyLength(data.len()));
        }
        if data[..2] != MULTIKEY_PREFIX {
            return Err(Error::MultikeyPrefix);
        }

        Self::from_slice(&data[2..]).map_err(Error::InvalidBytesForPublicKey)
    }

    fn to_multikey(&self) -> String {
        let mut data = Vec::with_capacity(MULTIKEY_LEN);
        data.extend_from_slice(&MULTIKEY_PREFIX);
        data.extend_from_slice(&self.serialize());

        format!("z{}", data.to_base58())
    }
}

impl SecretKeyExt for SecretKey {
    fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;

        Self::new(&mut rng)
    }

    fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex)
            .map_err(|_| Error::InvalidBytesForSecretKey(secp256k1::Error::InvalidSecretKey))?;

        Self::from_slice(&bytes).map_err(Error::InvalidBytesForSecretKey)
    }
}

/// Represents a key pair (public and secret key)
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// The public key
    pub public_key: PublicKey,
    /// The secret key
    pub secret_key: SecretKey,
}

impl KeyPair {
    /// Create a new key pair from a secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        Self {
            public_key,
            secret_key,
        }
    }

    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::generate())
    }
}
