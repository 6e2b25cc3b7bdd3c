use crate::identifier::Sha256Hash;
use onlyerror::Error;
use serde_json::{Value, json};

// Errors defined by the DID:BTC1 specification and other related specifications.
pub trait ProblemDetails {
    fn details(&self) -> Option<Value> {
        None
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Btc1Error {
    // Errors from DID Resolution Spec
    //
    /// An invalid DID was detected during DID Resolution.
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    /// The DID document was malformed.
    #[error("Invalid DID document: {0}")]
    InvalidDidDocument(String),

    // Errors from DID BTC1 Spec
    //
    /// Sidecar data was invalid
    #[error("Invalid sidecar data: {0}")]
    InvalidSidecarData(String),

    /// Update payload was published late
    #[error("Late publishing: {0}")]
    LatePublishingError(String),

    /// Invalid Update Proof
    #[error("Invalid update proof: {0}")]
    InvalidUpdateProof(String),

    /// ZCAP (Authorization Capabilities) related errors
    #[error("ZCAP error: {0}")]
    Zcap(String),

    /// Problems when creating or applying a DID Update
    #[error("Invalid DID update: {0}")]
    InvalidDidUpdate(String),

    /// Beacon type is recognized but cannot be processed
    #[error("Unsupported beacon type: {0}")]
    UnsupportedBeaconType(String),

    /// The Bitcoin data source failed or returned an unexpected response
    #[error("Bitcoin data source error: {0}")]
    ChainSource(String),

    // Errors from Verifiable Credentials Data Integrity Spec
    //
    /// Proof options do not match the cryptosuite
    #[error("Proof configuration error: {0}")]
    ProofConfiguration(String),

    /// Proof cannot be serialized with this cryptosuite's key
    #[error("Proof serialization error: {0}")]
    ProofSerialization(String),

    /// Proof verification error
    #[error("Proof verification error: {0}")]
    ProofVerification(String),

    /// Proof transformation error
    #[error("Proof transformation error: {0}")]
    ProofTransformation(String),

    /// Proof generation error
    #[error("Proof generation error: {0}")]
    ProofGeneration(String),
}

impl Btc1Error {
    pub(crate) fn late_publishing(found_hash: Sha256Hash, expected_hash: Sha256Hash) -> Self {
        Self::LatePublishingError(format!(
            "Found hash `{}`, expected `{}`",
            hex::encode(found_hash.0),
            hex::encode(expected_hash.0),
        ))
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDid(_) => "INVALID_DID",
            Self::InvalidDidDocument(_) => "INVALID_DID_DOCUMENT",
            Self::InvalidSidecarData(_) => "INVALID_SIDECAR_DATA",
            Self::LatePublishingError(_) => "LATE_PUBLISHING_ERROR",
            Self::InvalidUpdateProof(_) => "INVALID_UPDATE_PROOF",
            Self::Zcap(_) => "ZCAP",
            Self::InvalidDidUpdate(_) => "INVALID_DID_UPDATE",
            Self::UnsupportedBeaconType(_) => "UNSUPPORTED_BEACON_TYPE",
            Self::ChainSource(_) => "INTERNAL_ERROR",
            Self::ProofConfiguration(_) => "PROOF_CONFIGURATION_ERROR",
            Self::ProofSerialization(_) => "PROOF_SERIALIZATION_ERROR",
            Self::ProofVerification(_) => "PROOF_VERIFICATION_ERROR",
            Self::ProofTransformation(_) => "PROOF_TRANSFORMATION_ERROR",
            Self::ProofGeneration(_) => "PROOF_GENERATION_ERROR",
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::InvalidDid(detail)
            | Self::InvalidDidDocument(detail)
            | Self::InvalidSidecarData(detail)
            | Self::LatePublishingError(detail)
            | Self::InvalidUpdateProof(detail)
            | Self::Zcap(detail)
            | Self::InvalidDidUpdate(detail)
            | Self::UnsupportedBeaconType(detail)
            | Self::ChainSource(detail)
            | Self::ProofConfiguration(detail)
            | Self::ProofSerialization(detail)
            | Self::ProofVerification(detail)
            | Self::ProofTransformation(detail)
            | Self::ProofGeneration(detail) => detail,
        }
    }
}

impl ProblemDetails for Btc1Error {
    fn details(&self) -> Option<Value> {
        let prefix = match self {
            Self::InvalidDid(_) | Self::InvalidDidDocument(_) | Self::ChainSource(_) => {
                "https://www.w3.org/ns/did"
            }
            // From: https://github.com/dcdpr/did-btc1/issues/71#issuecomment-3179550385
            Self::InvalidSidecarData(_)
            | Self::LatePublishingError(_)
            | Self::InvalidUpdateProof(_)
            | Self::Zcap(_)
            | Self::InvalidDidUpdate(_)
            | Self::UnsupportedBeaconType(_) => "https://btc1.dev/context/v1",
            Self::ProofConfiguration(_)
            | Self::ProofSerialization(_)
            | Self::ProofVerification(_)
            | Self::ProofTransformation(_)
            | Self::ProofGeneration(_) => "https://w3id.org/security",
        };

        Some(json!({
            "type": format!("{prefix}#{}", self.code()),
            "title": self.to_string(),
            "detail": self.detail(),
        }))
    }
}
