//! Resolution options and sidecar data.

use crate::canonicalization::Canonicalization;
use crate::identifier::Network;
use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::{fs, path::Path};

/// Blocks a signal must be buried under before the latest version is trusted.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 6;

/// Off-chain data for one signal transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_payload: Option<Value>,
}

pub type SignalsMetadata = HashMap<Txid, SignalMetadata>;

/// Data necessary for resolving a DID that cannot be found on chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_document: Option<Value>,

    #[serde(default)]
    pub signals_metadata: SignalsMetadata,
}

impl SidecarData {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, serde_json::Error> {
        let json = fs::read_to_string(path).map_err(serde_json::Error::io)?;

        serde_json::from_str(&json)
    }

    pub fn with_initial_document(mut self, initial_document: Value) -> Self {
        self.initial_document = Some(initial_document);
        self
    }

    /// Merge signal metadata, e.g. the output of a beacon broadcast.
    pub fn with_signals_metadata(mut self, signals_metadata: SignalsMetadata) -> Self {
        self.signals_metadata.extend(signals_metadata);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ResolutionOptions {
    /// The version of the DID document to resolve
    pub version_id: Option<NonZeroU64>,

    /// Resolve the document as it was at this time
    pub version_time: Option<DateTime<Utc>>,

    /// Data necessary for resolving a DID such as DID Update Payloads
    pub sidecar_data: Option<SidecarData>,

    /// The Bitcoin network the caller expects the DID to live on
    pub network: Option<Network>,

    /// Confirmations required on top of a signal when no version time is given
    pub required_confirmations: u32,

    /// First block height scanned for signals
    pub start_block_height: u32,

    /// Canonicalization used for document and update hashes
    pub canonicalization: Canonicalization,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            version_id: None,
            version_time: None,
            sidecar_data: None,
            network: None,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            start_block_height: 0,
            canonicalization: Canonicalization::default(),
        }
    }
}

impl ResolutionOptions {
    pub fn with_version_id(mut self, version_id: NonZeroU64) -> Self {
        self.version_id = Some(version_id);
        self
    }

    pub fn with_version_time(mut self, version_time: DateTime<Utc>) -> Self {
        self.version_time = Some(version_time);
        self
    }

    pub fn with_sidecar_data(mut self, sidecar_data: SidecarData) -> Self {
        self.sidecar_data = Some(sidecar_data);
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_required_confirmations(mut self, required_confirmations: u32) -> Self {
        self.required_confirmations = required_confirmations;
        self
    }

    pub fn with_start_block_height(mut self, start_block_height: u32) -> Self {
        self.start_block_height = start_block_height;
        self
    }

    pub fn with_canonicalization(mut self, canonicalization: Canonicalization) -> Self {
        self.canonicalization = canonicalization;
        self
    }

    pub(crate) fn target(&self) -> Target {
        match (self.version_id, self.version_time) {
            (Some(version_id), _) => Target::VersionId(version_id),
            (None, Some(time)) => Target::Time(time),
            (None, None) => Target::Latest,
        }
    }
}

/// When to stop applying updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    Latest,
    VersionId(NonZeroU64),
    Time(DateTime<Utc>),
}
