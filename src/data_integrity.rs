//! Data Integrity proof checks layered over [`Cryptosuite`].
//!
//! See <https://www.w3.org/TR/vc-data-integrity/#add-proof> and
//! <https://www.w3.org/TR/vc-data-integrity/#verify-proof>.

use crate::cryptosuite::{self, Cryptosuite, VerificationResult};
use crate::error::Btc1Error;
use crate::zcap::proof::{ProofOptions, ProofPurpose};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Caller expectations checked before the signature.
#[derive(Clone, Debug, Default)]
pub struct ProofExpectations {
    pub purpose: Option<ProofPurpose>,
    pub domain: Option<Vec<String>>,
    pub challenge: Option<String>,

    /// Time used for the `expires` check. Defaults to now.
    pub now: Option<DateTime<Utc>>,
}

impl ProofExpectations {
    pub fn with_purpose(mut self, purpose: ProofPurpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn with_domain<I, S>(mut self, domain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = Some(domain.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

impl Cryptosuite {
    /// Create a proof and return the document with it attached.
    pub fn add_proof(&self, document: &Value, options: &ProofOptions) -> Result<Value, Btc1Error> {
        let proof = self.create_proof(document, options)?;

        cryptosuite::secure(document, &proof)
    }

    /// Verify a secured document against caller expectations.
    pub fn data_integrity_verify_proof(
        &self,
        secured_document: &Value,
        expectations: &ProofExpectations,
    ) -> Result<VerificationResult, Btc1Error> {
        let proof = secured_document
            .get("proof")
            .ok_or_else(|| Btc1Error::ProofVerification("Document has no proof".into()))?;

        for required in ["type", "verificationMethod", "proofPurpose"] {
            if proof.get(required).is_none_or(Value::is_null) {
                return Err(Btc1Error::ProofVerification(format!(
                    "Proof is missing `{required}`"
                )));
            }
        }

        let options: ProofOptions = serde_json::from_value(proof.clone())
            .map_err(|err| Btc1Error::ProofVerification(format!("Malformed proof: {err}")))?;

        if let Some(purpose) = &expectations.purpose {
            if &options.proof_purpose != purpose {
                return Err(Btc1Error::ProofVerification(format!(
                    "Proof purpose was expected to be `{purpose}`, found `{}`",
                    options.proof_purpose
                )));
            }
        }

        if let Some(expected) = &expectations.domain {
            let found = options
                .domain
                .as_ref()
                .map(|domain| domain.to_vec())
                .unwrap_or_default();
            let matches = found.len() == expected.len()
                && expected.iter().all(|domain| found.contains(&domain.as_str()));

            if !matches {
                return Err(Btc1Error::ProofVerification(format!(
                    "Proof domain {found:?} does not match {expected:?}"
                )));
            }
        }

        if let Some(expected) = &expectations.challenge {
            if options.challenge.as_ref() != Some(expected) {
                return Err(Btc1Error::ProofVerification(format!(
                    "Proof challenge does not match `{expected}`"
                )));
            }
        }

        if let Some(expires) = options.expires {
            let now = expectations.now.unwrap_or_else(Utc::now);
            if expires < now {
                return Err(Btc1Error::ProofVerification(format!(
                    "Proof expired at {expires}"
                )));
            }
        }

        self.verify_proof(secured_document)
    }
}
