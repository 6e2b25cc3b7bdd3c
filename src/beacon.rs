//! Beacons: Bitcoin addresses listed as DID document services.
//!
//! A transaction spending a beacon address is a beacon signal. The Singleton beacon commits to
//! exactly one update payload in its first output. Map, CAS and SMT beacons are recognized so
//! that documents listing them validate, but their signals cannot be processed.

use crate::canonicalization::{CanonicalHash as _, Canonicalization};
use crate::error::Btc1Error;
use crate::key::{PublicKey, SecretKey};
use crate::resolution::{SignalMetadata, SignalsMetadata};
use crate::service::Service;
use crate::update::Update;
use bitcoin::key::{CompressedPublicKey, Secp256k1};
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction, TxOut};
use onlyerror::Error;
use std::{fmt, str::FromStr};
use tracing::debug;

pub mod singleton;

const BIP21_SCHEME: &str = "bitcoin:";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Invalid beacon type
    #[error("Invalid beacon type `{0}`")]
    InvalidBeaconType(String),

    /// A beacon service must have exactly one 'serviceEndpoint'
    InvalidBeaconDescriptor,

    /// Invalid BIP21 address.
    InvalidBip21,

    /// Bitcoin Address Parse error
    AddressParse(#[from] bitcoin::address::ParseError),

    /// Beacon type is recognized but signals cannot be built or processed
    #[error("Unsupported beacon type `{0}`")]
    UnsupportedBeaconType(Type),

    /// Beacon address type cannot be spent with a single key
    UnsupportedAddressType,

    /// Funding output does not pay to the beacon address
    FundingMismatch,

    /// Secret key does not control the beacon address
    KeyMismatch,

    /// Funding output cannot cover the fee
    InsufficientFunds,

    /// Update payload could not be hashed
    #[error("Update payload could not be hashed: {0}")]
    Hashing(String),

    /// Signature hash computation failed
    #[error("Signing error: {0}")]
    Signing(String),
}

/// Extension trait for [`Address`]. Allows parsing from [BIP21] URI.
///
/// [BIP21]: https://github.com/bitcoin/bips/blob/master/bip-0021.mediawiki
pub trait AddressExt {
    fn from_bip21(uri: &str, network: Network) -> Result<Self, Error>
    where
        Self: Sized;

    fn to_bip21(&self) -> String;
}

impl AddressExt for Address {
    fn from_bip21(uri: &str, network: Network) -> Result<Self, Error> {
        let address = uri.strip_prefix(BIP21_SCHEME).ok_or(Error::InvalidBip21)?;
        let address = address
            .split_once('?')
            .map(|(addr, _params)| addr)
            .unwrap_or(address);

        Ok(address.parse::<Address<_>>()?.require_network(network)?)
    }

    fn to_bip21(&self) -> String {
        format!("{BIP21_SCHEME}{self}")
    }
}

/// Single-key address encodings used for deterministic beacons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2wpkh,
    P2tr,
}

impl AddressKind {
    pub const ALL: [Self; 3] = [Self::P2pkh, Self::P2wpkh, Self::P2tr];

    pub fn address(self, public_key: &PublicKey, network: Network) -> Address {
        match self {
            Self::P2pkh => Address::p2pkh(bitcoin::PublicKey::new(*public_key).pubkey_hash(), network),
            Self::P2wpkh => Address::p2wpkh(&CompressedPublicKey(*public_key), network),
            Self::P2tr => {
                let secp = Secp256k1::verification_only();
                let (internal_key, _) = public_key.x_only_public_key();

                Address::p2tr(&secp, internal_key, None, network)
            }
        }
    }

    /// Fragment of the deterministic beacon service id.
    pub fn service_fragment(self) -> &'static str {
        match self {
            Self::P2pkh => "initialP2PKH",
            Self::P2wpkh => "initialP2WPKH",
            Self::P2tr => "initialP2TR",
        }
    }

    fn of(address: &Address) -> Option<Self> {
        match address.address_type()? {
            bitcoin::AddressType::P2pkh => Some(Self::P2pkh),
            bitcoin::AddressType::P2wpkh => Some(Self::P2wpkh),
            bitcoin::AddressType::P2tr => Some(Self::P2tr),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Singleton,
    Map,
    Cas,
    SparseMerkleTree,
}

impl FromStr for Type {
    type Err = Error;

    fn from_str(ty: &str) -> Result<Self, Self::Err> {
        match ty {
            "SingletonBeacon" => Ok(Self::Singleton),
            "MapBeacon" => Ok(Self::Map),
            "CASBeacon" => Ok(Self::Cas),
            "SMTBeacon" => Ok(Self::SparseMerkleTree),
            _ => Err(Error::InvalidBeaconType(ty.to_string())),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => f.write_str("SingletonBeacon"),
            Self::Map => f.write_str("MapBeacon"),
            Self::Cas => f.write_str("CASBeacon"),
            Self::SparseMerkleTree => f.write_str("SMTBeacon"),
        }
    }
}

/// The beacon UTXO spent by a signal transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Funding {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

/// A signed signal transaction and the sidecar data needed to resolve it.
#[derive(Clone, Debug, PartialEq)]
pub struct BeaconSignal {
    pub transaction: Transaction,
    pub signals_metadata: SignalsMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    id: String,
    ty: Type,
    address: Address,
}

impl Beacon {
    pub fn new(id: impl Into<String>, ty: Type, address: Address) -> Self {
        Self {
            id: id.into(),
            ty,
            address,
        }
    }

    /// Build a beacon from a document service.
    ///
    /// Returns `None` for services that are not beacons.
    pub fn from_service(service: &Service, network: Network) -> Result<Option<Self>, Error> {
        let Some(ty) = service.types().iter().find_map(|ty| ty.parse::<Type>().ok()) else {
            return Ok(None);
        };

        let [endpoint] = service.endpoints() else {
            return Err(Error::InvalidBeaconDescriptor);
        };
        let address = Address::from_bip21(endpoint, network)?;

        Ok(Some(Self::new(service.id(), ty, address)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    pub fn to_service(&self) -> Result<Service, crate::service::Error> {
        Service::new(
            self.id.as_str(),
            [self.ty.to_string()],
            [self.address.to_bip21()],
        )
    }

    /// Extract the update announced by a signal transaction.
    ///
    /// `Ok(None)` means the transaction is not a signal of this beacon type.
    pub fn process_signal(
        &self,
        tx: &Transaction,
        signals_metadata: &SignalsMetadata,
        canonicalization: Canonicalization,
    ) -> Result<Option<Update>, Btc1Error> {
        match self.ty {
            Type::Singleton => singleton::process_signal(tx, signals_metadata, canonicalization),
            ty => Err(Btc1Error::UnsupportedBeaconType(format!(
                "{ty} `{}` signals cannot be processed",
                self.id
            ))),
        }
    }

    /// Build and sign a transaction announcing `update` through this beacon.
    ///
    /// The transaction is not submitted.
    pub fn broadcast_signal(
        &self,
        update: &Update,
        funding: &Funding,
        fee: Amount,
        secret_key: &SecretKey,
        canonicalization: Canonicalization,
    ) -> Result<BeaconSignal, Error> {
        if self.ty != Type::Singleton {
            return Err(Error::UnsupportedBeaconType(self.ty));
        }
        let kind = AddressKind::of(&self.address).ok_or(Error::UnsupportedAddressType)?;

        let update_hash = update
            .canonical_hash(canonicalization)
            .map_err(|err| Error::Hashing(err.to_string()))?;
        let transaction =
            singleton::signal_transaction(self, kind, update_hash, funding, fee, secret_key)?;
        let txid = transaction.compute_txid();
        debug!(beacon = %self.id, %txid, "built beacon signal");

        let signals_metadata = SignalsMetadata::from([(
            txid,
            SignalMetadata {
                update_payload: Some(update.as_ref().clone()),
            },
        )]);

        Ok(BeaconSignal {
            transaction,
            signals_metadata,
        })
    }
}
