use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::canonicalization::Canonicalization;

/// Types of proofs supported by the library
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    /// General Data Integrity Proof
    #[default]
    DataIntegrityProof,

    /// Any other proof type. Rejected by the cryptosuite.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataIntegrityProof => f.write_str("DataIntegrityProof"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Purposes for cryptographic proofs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofPurpose {
    /// Authentication of entity identified by a DID
    Authentication,
    /// Assertion method for making verifiable claims
    #[default]
    AssertionMethod,
    /// Capability invocation
    CapabilityInvocation,
    /// Capability delegation
    CapabilityDelegation,
    /// Other purposes
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for ProofPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofPurpose::Authentication => f.write_str("authentication"),
            ProofPurpose::AssertionMethod => f.write_str("assertionMethod"),
            ProofPurpose::CapabilityInvocation => f.write_str("capabilityInvocation"),
            ProofPurpose::CapabilityDelegation => f.write_str("capabilityDelegation"),
            ProofPurpose::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum CryptoSuiteName {
    #[default]
    #[serde(rename = "bip340-jcs-2025")]
    Jcs,

    #[serde(rename = "bip340-rdfc-2025")]
    Rdfc,
}

impl CryptoSuiteName {
    pub fn canonicalization(self) -> Canonicalization {
        match self {
            Self::Jcs => Canonicalization::Jcs,
            Self::Rdfc => Canonicalization::Rdfc,
        }
    }
}

impl From<Canonicalization> for CryptoSuiteName {
    fn from(canonicalization: Canonicalization) -> Self {
        match canonicalization {
            Canonicalization::Jcs => Self::Jcs,
            Canonicalization::Rdfc => Self::Rdfc,
        }
    }
}

impl fmt::Display for CryptoSuiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jcs => f.write_str("bip340-jcs-2025"),
            Self::Rdfc => f.write_str("bip340-rdfc-2025"),
        }
    }
}

/// A single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<&str> {
        match self {
            Self::One(one) => vec![one.as_str()],
            Self::Many(many) => many.iter().map(String::as_str).collect(),
        }
    }
}

/// Proof options: every proof field except the signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOptions {
    /// Optional identifier for the proof
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Type of proof
    #[serde(rename = "type")]
    pub proof_type: ProofType,

    /// Cryptographic suite used for the proof
    pub cryptosuite: CryptoSuiteName,

    /// Verification method that can be used to verify the proof
    pub verification_method: String,

    /// Purpose of the proof
    pub proof_purpose: ProofPurpose,

    /// When the proof was created (ISO8601 dateTime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// When the proof expires (ISO8601 dateTime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    /// Security domain for the proof
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<OneOrMany>,

    /// Challenge to prevent replay attacks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,

    /// Previous proof ID or array of IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_proof: Option<Value>,

    /// Random value to increase privacy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// JSON-LD context, copied from the secured document
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// ZCAP: Capability being invoked (for capabilityInvocation proof purpose)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    /// ZCAP: Action being performed with the capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_action: Option<String>,

    /// ZCAP: Target of the capability invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_target: Option<String>,
}

impl ProofOptions {
    pub fn new(
        cryptosuite: CryptoSuiteName,
        verification_method: impl Into<String>,
        proof_purpose: ProofPurpose,
    ) -> Self {
        Self {
            cryptosuite,
            verification_method: verification_method.into(),
            proof_purpose,
            ..Default::default()
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_domain(mut self, domain: OneOrMany) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// Capability invocation fields for a ZCAP proof.
    pub fn with_capability(
        mut self,
        capability: impl Into<String>,
        action: impl Into<String>,
        invocation_target: Option<String>,
    ) -> Self {
        self.capability = Some(capability.into());
        self.capability_action = Some(action.into());
        self.invocation_target = invocation_target;
        self
    }
}

/// Represents a cryptographic proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(flatten)]
    pub options: ProofOptions,

    /// Proof value (multibase encoded signature)
    pub proof_value: String,
}

impl Proof {
    pub(crate) fn from_options(options: ProofOptions, proof_value: String) -> Self {
        Self {
            options,
            proof_value,
        }
    }
}
