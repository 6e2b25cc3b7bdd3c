//! DID update payloads.
//!
//! An update is constructed unsigned from a source document and a JSON Patch, then invoked
//! with a capability-invocation proof. Once signed it is never modified: commitments are
//! computed over the exact JSON that was published.

use crate::canonicalization::{CanonicalHash, Canonicalization, HashEncoding};
use crate::cryptosuite::{Cryptosuite, Multikey};
use crate::document::Document;
use crate::error::Btc1Error;
use crate::identifier::{self, Did, Sha256Hash};
use crate::json_tools;
use crate::zcap::proof::{CryptoSuiteName, Proof, ProofOptions, ProofPurpose};
use crate::zcap::{self, WRITE_ACTION};
use chrono::{DateTime, Utc};
use json_patch::Patch;
use onlyerror::Error;
use serde_json::{Value, json};
use std::num::NonZeroU64;
use std::{fs, path::Path};
use tracing::debug;

/// JSON-LD contexts of an update payload.
pub const UPDATE_CONTEXT: [&str; 4] = [
    "https://w3id.org/security/v2",
    zcap::ZCAP_CONTEXT,
    "https://w3id.org/json-ld-patch/v1",
    "https://btc1.dev/context/v1",
];

#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    Io(#[from] std::io::Error),

    /// JSON parse error
    Json(#[from] serde_json::Error),

    /// JSON value parse error
    JsonValue(#[from] json_tools::Error),

    /// Invalid source or target hash
    Hash(#[from] identifier::Error),

    /// Version ids start at 1
    ZeroVersion,
}

/// A signed (or at least published) update payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    json: Value,
    source_hash: Sha256Hash,
    target_hash: Sha256Hash,
    target_version_id: NonZeroU64,
    patch: Patch,
    proof: Option<Proof>,
}

impl Update {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let json = fs::read_to_string(path)?;

        Self::from_json_string(&json)
    }

    pub fn from_json_string(json: &str) -> Result<Self, Error> {
        let json = serde_json::from_str(json)?;

        Self::from_json_value(json)
    }

    pub fn from_json_value(json: Value) -> Result<Self, Error> {
        let source_hash = json_tools::string_from_object(&json, "sourceHash")?.parse()?;
        let target_hash = json_tools::string_from_object(&json, "targetHash")?.parse()?;
        let target_version_id =
            NonZeroU64::new(json_tools::uint_from_object(&json, "targetVersionId")?)
                .ok_or(Error::ZeroVersion)?;

        if json["patch"].is_null() {
            return Err(json_tools::Error::JsonMissingElement("patch".into()).into());
        }
        let patch = serde_json::from_value(json["patch"].clone())?;

        let proof = match &json["proof"] {
            Value::Null => None,
            proof => Some(serde_json::from_value(proof.clone())?),
        };

        Ok(Self {
            json,
            source_hash,
            target_hash,
            target_version_id,
            patch,
            proof,
        })
    }

    pub fn source_hash(&self) -> Sha256Hash {
        self.source_hash
    }

    pub fn target_hash(&self) -> Sha256Hash {
        self.target_hash
    }

    pub fn target_version_id(&self) -> NonZeroU64 {
        self.target_version_id
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn proof(&self) -> Option<&Proof> {
        self.proof.as_ref()
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.json)?)
    }
}

impl AsRef<Value> for Update {
    fn as_ref(&self) -> &Value {
        &self.json
    }
}

impl CanonicalHash for Update {}

/// An update payload without a proof.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsignedUpdate {
    json: Value,
    target_version_id: NonZeroU64,
}

impl UnsignedUpdate {
    /// Apply `patch` to `source` and commit to both documents.
    ///
    /// Returns the unsigned payload and the target document.
    pub fn construct(
        source: &Document,
        source_version_id: NonZeroU64,
        patch: Patch,
        canonicalization: Canonicalization,
    ) -> Result<(Self, Document), Btc1Error> {
        let target_version_id = source_version_id
            .checked_add(1)
            .ok_or_else(|| Btc1Error::InvalidDidUpdate("Version id overflow".into()))?;

        let mut target_json = source.as_ref().clone();
        json_patch::patch(&mut target_json, &patch.0)
            .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))?;
        let target = Document::from_json_value(target_json)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        if target.did() != source.did() {
            return Err(Btc1Error::InvalidDidUpdate(
                "An update cannot change the document id".into(),
            ));
        }

        let hash = |document: &Document| {
            document
                .canonical_hash(canonicalization)
                .map(|hash| Canonicalization::encode(&hash, HashEncoding::Base58))
                .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))
        };
        let patch =
            serde_json::to_value(&patch).map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))?;

        let json = json!({
            "@context": UPDATE_CONTEXT,
            "patch": patch,
            "sourceHash": hash(source)?,
            "targetHash": hash(&target)?,
            "targetVersionId": target_version_id.get(),
        });

        Ok((
            Self {
                json,
                target_version_id,
            },
            target,
        ))
    }

    pub fn target_version_id(&self) -> NonZeroU64 {
        self.target_version_id
    }

    /// Sign the payload with a capability invocation of the root capability of `did`.
    ///
    /// `multikey` must carry its secret key.
    pub fn invoke(
        self,
        did: &Did,
        multikey: Multikey,
        canonicalization: Canonicalization,
    ) -> Result<Update, Btc1Error> {
        self.sign(did, multikey, canonicalization, None)
    }

    /// Like [`UnsignedUpdate::invoke`], with a proof that expires at `expires`.
    ///
    /// Resolvers check the expiry against the time of the block announcing the update.
    pub fn invoke_until(
        self,
        did: &Did,
        multikey: Multikey,
        canonicalization: Canonicalization,
        expires: DateTime<Utc>,
    ) -> Result<Update, Btc1Error> {
        self.sign(did, multikey, canonicalization, Some(expires))
    }

    fn sign(
        self,
        did: &Did,
        multikey: Multikey,
        canonicalization: Canonicalization,
        expires: Option<DateTime<Utc>>,
    ) -> Result<Update, Btc1Error> {
        let root_capability = zcap::derive_root_capability(did);
        let name = CryptoSuiteName::from(canonicalization);
        let mut options = ProofOptions::new(
            name,
            multikey.id.clone(),
            ProofPurpose::CapabilityInvocation,
        )
        .with_capability(root_capability.id, WRITE_ACTION, Some(did.to_string()));
        if let Some(expires) = expires {
            options = options.with_expires(expires);
        }

        let secured = Cryptosuite::new(name, multikey).add_proof(&self.json, &options)?;
        debug!(%did, version_id = self.target_version_id.get(), "invoked update");

        Update::from_json_value(secured).map_err(|err| Btc1Error::ProofGeneration(err.to_string()))
    }
}

impl AsRef<Value> for UnsignedUpdate {
    fn as_ref(&self) -> &Value {
        &self.json
    }
}

impl CanonicalHash for UnsignedUpdate {}
