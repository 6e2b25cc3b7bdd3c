//! # DID:BTC1 Identifiers
//!
//! Encoding and decoding of DID:BTC1 identifiers.
//!
//! ## DID:BTC1 Identifier Format
//!
//! A DID:BTC1 identifier consists of:
//! - `did:btc1:` prefix
//! - Bech32m-encoded data containing:
//!   - Version nibbles: `(version - 1) / 15` filler nibbles of `0xF`, then `(version - 1) % 15`
//!   - Network nibble
//!   - A zero padding nibble when the nibble count is odd
//!   - Genesis bytes (33-byte public key for key-based, 32-byte hash for external)
//!
//! ## Examples
//!
//! ```rust
//! use did_btc1::identifier::{Did, DidComponents, DidVersion, Error, IdType, Network};
//! use did_btc1::key::{KeyPair, PublicKeyExt as _};
//!
//! let key_pair = KeyPair::generate();
//! let components =
//!     DidComponents::new(DidVersion::ONE, Network::Regtest, key_pair.public_key.into())?;
//! let did = Did::new(components)?;
//!
//! let parsed: Did = did.encode().parse()?;
//! assert_eq!(parsed.components().network(), Network::Regtest);
//! assert!(matches!(parsed.components().id_type(), IdType::Key(_)));
//!
//! if let Some(public_key) = parsed.public_key() {
//!     println!("{}", public_key.to_multikey());
//! }
//! # Ok::<(), Error>(())
//! ```

use bech32::primitives::decode::{CheckedHrpstring, CheckedHrpstringError};
use bech32::{Bech32m, EncodeError, Hrp};
use onlyerror::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::PublicKey;

/// The DID method prefix for BTC1 identifiers
pub const DID_BTC1_PREFIX: &str = "did:btc1:";

/// Human-readable part for key-based DID identifiers
pub const HRP_KEY: &str = "k";

/// Human-readable part for external document-based DID identifiers
pub const HRP_EXTERNAL: &str = "x";

/// Expected length of a compressed secp256k1 public key
pub const SECP256K1_COMPRESSED_KEY_LEN: usize = 33;

/// Expected length of a SHA-256 hash
pub const SHA256_HASH_LEN: usize = 32;

/// Highest version that fits in two filler nibbles plus a remainder nibble.
pub const MAX_VERSION: u8 = 45;

const FILLER_NIBBLE: u8 = 0xf;
const MAX_FILLER_NIBBLES: u8 = 2;

/// Network nibbles `0x8..=0xF` carry custom test networks `1..=8`.
const CUSTOM_NETWORK_OFFSET: u8 = 7;
const MAX_CUSTOM_NETWORK: u8 = 8;

/// Errors that can occur during DID identifier encoding/decoding
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid DID format - missing or incorrect prefix
    #[error("Invalid DID format: {0}")]
    InvalidDidFormat(String),

    /// Invalid version number
    #[error("Invalid version: {0} (must be 1-45)")]
    InvalidVersion(u8),

    /// Invalid network identifier
    #[error("Invalid network identifier: {0}")]
    InvalidNetwork(u8),

    /// Invalid human-readable part
    #[error("Invalid HRP: {0} (must be 'k' or 'x')")]
    InvalidHrp(String),

    /// Invalid genesis bytes length
    #[error("Invalid genesis bytes length: {0} (expected {1})")]
    InvalidGenesisLength(usize, usize),

    /// Bech32m decoding error
    #[error("Bech32m error: {0}")]
    Bech32(#[from] CheckedHrpstringError),

    /// Bech32m encoding error
    #[error("Bech32m encoding error: {0}")]
    Bech32Encode(#[from] EncodeError),

    /// Error with key operations
    Key(#[from] crate::key::Error),

    /// Invalid hash length
    InvalidHashLength,

    /// Invalid hash encoding
    #[error("Invalid hash encoding: {0}")]
    InvalidHashEncoding(String),
}

/// A SHA-256 digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash(pub [u8; SHA256_HASH_LEN]);

impl Sha256Hash {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self(bytes.try_into().map_err(|_| Error::InvalidHashLength)?))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Sha256Hash {
    type Err = Error;

    /// Accepts 64 hex characters or any multibase encoding of 32 bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = if s.len() == SHA256_HASH_LEN * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(s).map_err(|err| Error::InvalidHashEncoding(err.to_string()))?
        } else {
            multibase::decode(s)
                .map(|(_, bytes)| bytes)
                .map_err(|err| Error::InvalidHashEncoding(err.to_string()))?
        };

        Self::from_slice(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Did {
    encoded: String,
    components: DidComponents,
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(did: &str) -> Result<Self, Self::Err> {
        let components = parse_did_identifier(did)?;

        Ok(Self {
            encoded: did.to_string(),
            components,
        })
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl Serialize for Did {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.encode())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let did = String::deserialize(deserializer)?;

        did.parse().map_err(serde::de::Error::custom)
    }
}

impl Did {
    pub fn new(components: DidComponents) -> Result<Self, Error> {
        let encoded = encode_did_identifier(&components)?;

        Ok(Self {
            encoded,
            components,
        })
    }

    pub fn encode(&self) -> &str {
        &self.encoded
    }

    pub fn components(&self) -> &DidComponents {
        &self.components
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        match self.components.id_type {
            IdType::Key(key) => PublicKey::from_slice(&key).ok(),
            IdType::External(_) => None,
        }
    }

    /// The Bitcoin network this DID anchors to.
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        self.components.network.into()
    }
}

/// DID:BTC1 encoding version (1-45)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DidVersion(u8);

impl DidVersion {
    pub const ONE: Self = Self(1);

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for DidVersion {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u8> for DidVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=MAX_VERSION).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidVersion(value))
        }
    }
}

impl From<DidVersion> for u8 {
    fn from(value: DidVersion) -> Self {
        value.0
    }
}

/// Bitcoin networks supported by DID:BTC1
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Bitcoin mainnet
    #[default]
    Mainnet,
    /// Bitcoin signet
    Signet,
    /// Bitcoin regtest
    Regtest,
    /// Bitcoin testnet v3
    TestnetV3,
    /// Bitcoin testnet v4
    TestnetV4,
    /// Mutinynet
    Mutinynet,
    /// Custom test network (1-8)
    Custom(u8),
}

impl TryFrom<u8> for Network {
    type Error = Error;

    fn try_from(nibble: u8) -> Result<Self, Self::Error> {
        match nibble {
            0 => Ok(Network::Mainnet),
            1 => Ok(Network::Signet),
            2 => Ok(Network::Regtest),
            3 => Ok(Network::TestnetV3),
            4 => Ok(Network::TestnetV4),
            5 => Ok(Network::Mutinynet),
            0x8..=0xf => Ok(Network::Custom(nibble - CUSTOM_NETWORK_OFFSET)),
            _ => Err(Error::InvalidNetwork(nibble)),
        }
    }
}

impl From<Network> for u8 {
    fn from(value: Network) -> Self {
        match value {
            Network::Mainnet => 0,
            Network::Signet => 1,
            Network::Regtest => 2,
            Network::TestnetV3 => 3,
            Network::TestnetV4 => 4,
            Network::Mutinynet => 5,
            Network::Custom(n) => n + CUSTOM_NETWORK_OFFSET,
        }
    }
}

impl From<Network> for bitcoin::Network {
    fn from(value: Network) -> Self {
        match value {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Signet | Network::Mutinynet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
            Network::TestnetV3 | Network::TestnetV4 | Network::Custom(_) => {
                bitcoin::Network::Testnet
            }
        }
    }
}

impl Network {
    fn validate(self) -> Result<Self, Error> {
        match self {
            Network::Custom(n) if !(1..=MAX_CUSTOM_NETWORK).contains(&n) => {
                Err(Error::InvalidNetwork(n))
            }
            network => Ok(network),
        }
    }
}

/// Type of DID identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    /// Key-based identifier (secp256k1 public key)
    Key([u8; SECP256K1_COMPRESSED_KEY_LEN]),
    /// External document-based identifier (hash of external document)
    External([u8; SHA256_HASH_LEN]),
}

impl From<PublicKey> for IdType {
    fn from(key: PublicKey) -> Self {
        Self::Key(key.serialize())
    }
}

impl From<Sha256Hash> for IdType {
    fn from(hash: Sha256Hash) -> Self {
        Self::External(hash.0)
    }
}

impl IdType {
    /// Create External from byte slice. Slice must be exactly 32 bytes long.
    pub fn from_sha256_hash(hash: &[u8]) -> Result<Self, Error> {
        Ok(IdType::External(
            hash.try_into().map_err(|_| Error::InvalidHashLength)?,
        ))
    }

    /// Build an identifier type from an hrp and its genesis bytes.
    fn from_genesis_bytes(hrp: &str, genesis_bytes: &[u8]) -> Result<Self, Error> {
        let expected_len = match hrp {
            HRP_KEY => SECP256K1_COMPRESSED_KEY_LEN,
            HRP_EXTERNAL => SHA256_HASH_LEN,
            _ => return Err(Error::InvalidHrp(hrp.to_string())),
        };

        if genesis_bytes.len() != expected_len {
            return Err(Error::InvalidGenesisLength(genesis_bytes.len(), expected_len));
        }

        match hrp {
            HRP_KEY => Ok(IdType::Key(
                genesis_bytes
                    .try_into()
                    .map_err(|_| Error::InvalidGenesisLength(genesis_bytes.len(), expected_len))?,
            )),
            _ => IdType::from_sha256_hash(genesis_bytes),
        }
    }

    /// Get the human-readable part for this identifier type
    pub fn hrp(&self) -> &'static str {
        match self {
            IdType::Key(_) => HRP_KEY,
            IdType::External(_) => HRP_EXTERNAL,
        }
    }

    pub fn genesis_bytes(&self) -> &[u8] {
        match self {
            IdType::Key(key) => &key[..],
            IdType::External(hash) => &hash[..],
        }
    }
}

/// Components of a parsed DID:BTC1 identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidComponents {
    /// Specification version (1-45)
    version: DidVersion,
    /// Bitcoin network
    network: Network,
    /// Identifier type
    id_type: IdType,
}

impl DidComponents {
    /// Create new DID components with validation
    pub fn new(version: DidVersion, network: Network, id_type: IdType) -> Result<Self, Error> {
        if let IdType::Key(key) = &id_type {
            PublicKey::from_slice(key).map_err(crate::key::Error::InvalidBytesForPublicKey)?;
        }

        Ok(Self {
            version,
            network: network.validate()?,
            id_type,
        })
    }

    pub fn version(&self) -> DidVersion {
        self.version
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn genesis_bytes(&self) -> &[u8] {
        self.id_type.genesis_bytes()
    }
}

/// Pack version and network into the nibble header, padded to whole bytes.
fn encode_header(version: DidVersion, network: Network) -> Vec<u8> {
    let version = u8::from(version) - 1;
    let mut nibbles = vec![FILLER_NIBBLE; usize::from(version / 15)];
    nibbles.push(version % 15);
    nibbles.push(u8::from(network));
    if nibbles.len() % 2 == 1 {
        nibbles.push(0);
    }

    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

/// Unpack the nibble header. Returns the version, network and header length in bytes.
fn decode_header(data: &[u8]) -> Result<(DidVersion, Network, usize), Error> {
    let mut nibbles = data.iter().flat_map(|byte| [byte >> 4, byte & 0x0f]);
    let mut next_nibble = || {
        nibbles
            .next()
            .ok_or_else(|| Error::InvalidDidFormat("Truncated version/network header".into()))
    };

    let mut version: u8 = 1;
    let mut fillers = 0;
    let mut nibble = next_nibble()?;
    while nibble == FILLER_NIBBLE {
        fillers += 1;
        if fillers > MAX_FILLER_NIBBLES {
            return Err(Error::InvalidVersion(version.saturating_add(15)));
        }
        version += 15;
        nibble = next_nibble()?;
    }
    version += nibble;

    let network = Network::try_from(next_nibble()?)?;

    let mut consumed = usize::from(fillers) + 2;
    if consumed % 2 == 1 {
        let padding = next_nibble()?;
        if padding != 0 {
            return Err(Error::InvalidDidFormat(format!(
                "Padding nibble must be zero, found {padding:#x}"
            )));
        }
        consumed += 1;
    }

    Ok((version.try_into()?, network, consumed / 2))
}

/// Parse a DID:BTC1 identifier string into its components
///
/// # Examples
///
/// ```rust
/// use did_btc1::identifier::{encode_did_identifier, parse_did_identifier};
/// use did_btc1::identifier::{DidComponents, DidVersion, Error, IdType, Network};
///
/// let components =
///     DidComponents::new(DidVersion::ONE, Network::Signet, IdType::External([7; 32]))?;
/// let did = encode_did_identifier(&components)?;
///
/// assert!(did.starts_with("did:btc1:x1"));
/// assert_eq!(parse_did_identifier(&did)?, components);
/// # Ok::<(), Error>(())
/// ```
pub fn parse_did_identifier(did: &str) -> Result<DidComponents, Error> {
    let mut parts = did.splitn(3, ':');
    let (Some(scheme), Some(method), Some(bech32_part)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidDidFormat(format!(
            "DID must start with '{DID_BTC1_PREFIX}'",
        )));
    };
    if scheme != "did" {
        return Err(Error::InvalidDidFormat(format!("Invalid scheme `{scheme}`")));
    }
    if method != "btc1" {
        return Err(Error::InvalidDidFormat(format!("Invalid method `{method}`")));
    }

    let decoded = CheckedHrpstring::new::<Bech32m>(bech32_part)?;
    let hrp = decoded.hrp().to_lowercase();
    if hrp != HRP_KEY && hrp != HRP_EXTERNAL {
        return Err(Error::InvalidHrp(hrp));
    }

    let data: Vec<u8> = decoded.byte_iter().collect();
    if data.is_empty() {
        return Err(Error::InvalidDidFormat(
            "No data in DID identifier".to_string(),
        ));
    }

    let (version, network, header_len) = decode_header(&data)?;
    let id_type = IdType::from_genesis_bytes(&hrp, &data[header_len..])?;

    DidComponents::new(version, network, id_type)
}

/// Encode DID components into a DID:BTC1 identifier string
pub fn encode_did_identifier(components: &DidComponents) -> Result<String, Error> {
    let genesis_bytes = components.genesis_bytes();

    let mut data = encode_header(components.version, components.network);
    data.extend_from_slice(genesis_bytes);

    let hrp = Hrp::parse(components.id_type.hrp())
        .map_err(|err| Error::InvalidHrp(err.to_string()))?;
    let bech32_part = bech32::encode::<Bech32m>(hrp, &data)?;

    Ok(format!("{DID_BTC1_PREFIX}{bech32_part}"))
}

/// Check if a string is a valid DID:BTC1 identifier
pub fn is_valid_did(did: &str) -> bool {
    parse_did_identifier(did).is_ok()
}
