//! BIP340 cryptosuite implementation
//!
//! One cryptosuite covers both `bip340-jcs-2025` and `bip340-rdfc-2025`. The only difference
//! between them is the canonicalization used to transform the document and proof options.

use crate::canonicalization::Canonicalization;
use crate::error::Btc1Error;
use crate::identifier::Did;
use crate::key::{PublicKey, SecretKey};
use crate::verification::VerificationMethod;
use crate::zcap::proof::{CryptoSuiteName, Proof, ProofOptions, ProofType};
use secp256k1::Secp256k1;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

mod utils;

/// A Multikey verification method, optionally holding its secret key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Multikey {
    pub id: String,
    pub controller: String,
    pub public_key: PublicKey,
    secret_key: Option<SecretKey>,
}

impl Multikey {
    pub fn new(id: impl Into<String>, controller: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            id: id.into(),
            controller: controller.into(),
            public_key,
            secret_key: None,
        }
    }

    /// Attach the secret key. It must belong to the public key.
    pub fn with_secret_key(mut self, secret_key: SecretKey) -> Result<Self, Btc1Error> {
        if secret_key.public_key(&Secp256k1::signing_only()) != self.public_key {
            return Err(Btc1Error::ProofSerialization(format!(
                "Secret key does not match verification method `{}`",
                self.id
            )));
        }
        self.secret_key = Some(secret_key);

        Ok(self)
    }

    pub fn can_sign(&self) -> bool {
        self.secret_key.is_some()
    }
}

impl From<&VerificationMethod<Did>> for Multikey {
    fn from(method: &VerificationMethod<Did>) -> Self {
        Self::new(
            method.id.0.clone(),
            method.controller.encode(),
            method.public_key,
        )
    }
}

/// Result of verifying a secured document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub verified: bool,

    /// The document without its proof, present only when verified.
    pub verified_document: Option<Value>,
}

impl VerificationResult {
    fn failed() -> Self {
        Self {
            verified: false,
            verified_document: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Cryptosuite {
    name: CryptoSuiteName,
    multikey: Multikey,
}

impl Cryptosuite {
    pub fn new(name: CryptoSuiteName, multikey: Multikey) -> Self {
        Self { name, multikey }
    }

    pub fn name(&self) -> CryptoSuiteName {
        self.name
    }

    pub fn multikey(&self) -> &Multikey {
        &self.multikey
    }

    fn canonicalization(&self) -> Canonicalization {
        self.name.canonicalization()
    }

    // bip340 cryptosuite spec Section 3.3.1
    pub fn create_proof(&self, document: &Value, options: &ProofOptions) -> Result<Proof, Btc1Error> {
        let mut options = options.clone();
        if let Some(context) = document.get("@context") {
            options.context = Some(context.clone());
        }

        let canonical_config = self.configure_proof(&options)?;
        let canonical_document = self.transform(&unsecured(document))?;
        let hash_data = utils::hash_proof_input(&canonical_config, &canonical_document);

        if options.verification_method != self.multikey.id {
            return Err(Btc1Error::ProofSerialization(format!(
                "Verification method `{}` is not `{}`",
                options.verification_method, self.multikey.id
            )));
        }
        let secret_key = self.multikey.secret_key.as_ref().ok_or_else(|| {
            Btc1Error::ProofSerialization(format!(
                "No secret key for verification method `{}`",
                self.multikey.id
            ))
        })?;

        let signature = utils::bip340_sign(hash_data, secret_key);
        debug!(cryptosuite = %self.name, verification_method = %options.verification_method, "created proof");

        Ok(Proof::from_options(options, utils::multibase_encode(&signature)))
    }

    // bip340 cryptosuite spec Section 3.3.2
    pub fn verify_proof(&self, secured_document: &Value) -> Result<VerificationResult, Btc1Error> {
        let proof_json = secured_document
            .get("proof")
            .ok_or_else(|| Btc1Error::ProofVerification("Document has no proof".into()))?;
        let proof: Proof = serde_json::from_value(proof_json.clone())
            .map_err(|err| Btc1Error::ProofVerification(format!("Malformed proof: {err}")))?;
        self.check_configuration(&proof.options)?;

        if proof.options.verification_method != self.multikey.id {
            return Err(Btc1Error::ProofVerification(format!(
                "Verification method `{}` is not `{}`",
                proof.options.verification_method, self.multikey.id
            )));
        }

        // The signature covers the proof as published, not its typed view.
        let mut proof_config = proof_json.clone();
        if let Some(map) = proof_config.as_object_mut() {
            map.remove("proofValue");
        }

        let unsecured_document = unsecured(secured_document);
        if let Some(context) = unsecured_document.get("@context") {
            if proof_config.get("@context") != Some(context) {
                debug!("proof context does not match document context");
                return Ok(VerificationResult::failed());
            }
        }

        let canonical_config = self
            .canonicalization()
            .canonicalize(&proof_config)
            .map_err(|err| Btc1Error::ProofConfiguration(err.to_string()))?;
        let canonical_document = self.transform(&unsecured_document)?;
        let hash_data = utils::hash_proof_input(&canonical_config, &canonical_document);

        let Ok(signature) = utils::multibase_decode(&proof.proof_value) else {
            debug!("undecodable proofValue");
            return Ok(VerificationResult::failed());
        };

        let (x_only, _) = self.multikey.public_key.x_only_public_key();
        if utils::bip340_verify(hash_data, &signature, &x_only) {
            Ok(VerificationResult {
                verified: true,
                verified_document: Some(unsecured_document),
            })
        } else {
            Ok(VerificationResult::failed())
        }
    }

    fn check_configuration(&self, options: &ProofOptions) -> Result<(), Btc1Error> {
        if options.proof_type != ProofType::DataIntegrityProof {
            return Err(Btc1Error::ProofConfiguration(format!(
                "Proof type must be `DataIntegrityProof`, found `{}`",
                options.proof_type
            )));
        }
        if options.cryptosuite != self.name {
            return Err(Btc1Error::ProofConfiguration(format!(
                "Cryptosuite must be `{}`, found `{}`",
                self.name, options.cryptosuite
            )));
        }

        Ok(())
    }

    // bip340 cryptosuite spec Section 3.3.3
    fn transform(&self, document: &Value) -> Result<String, Btc1Error> {
        self.canonicalization()
            .canonicalize(document)
            .map_err(|err| Btc1Error::ProofTransformation(err.to_string()))
    }

    // bip340 cryptosuite spec Section 3.3.5
    fn configure_proof(&self, options: &ProofOptions) -> Result<String, Btc1Error> {
        self.check_configuration(options)?;

        self.canonicalization()
            .canonicalize(options)
            .map_err(|err| Btc1Error::ProofConfiguration(err.to_string()))
    }
}

/// A copy of the document without its `proof`.
fn unsecured(document: &Value) -> Value {
    let mut document = document.clone();
    if let Some(map) = document.as_object_mut() {
        map.remove("proof");
    }

    document
}

/// Attach a proof to a copy of the document.
pub(crate) fn secure<T: Serialize>(document: &Value, proof: &T) -> Result<Value, Btc1Error> {
    let mut secured = unsecured(document);
    let proof = serde_json::to_value(proof)
        .map_err(|err| Btc1Error::ProofGeneration(err.to_string()))?;

    secured
        .as_object_mut()
        .ok_or_else(|| Btc1Error::ProofGeneration("Document must be a JSON object".into()))?
        .insert("proof".into(), proof);

    Ok(secured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;
    use crate::zcap::proof::ProofPurpose;
    use serde_json::json;

    const METHOD: &str = "did:example:123#key-0";

    fn document() -> Value {
        json!({
            "@context": [
                "https://www.w3.org/ns/credentials/v2",
                {"myWebsite": "https://vocabulary.example/myWebsite"}
            ],
            "myWebsite": "https://hello.world.example/"
        })
    }

    fn suite(name: CryptoSuiteName, key_pair: &KeyPair) -> Cryptosuite {
        let multikey = Multikey::new(METHOD, "did:example:123", key_pair.public_key)
            .with_secret_key(key_pair.secret_key)
            .unwrap();

        Cryptosuite::new(name, multikey)
    }

    fn options(name: CryptoSuiteName) -> ProofOptions {
        ProofOptions::new(name, METHOD, ProofPurpose::AssertionMethod)
    }

    #[test]
    fn test_proof_round_trip() {
        let key_pair = KeyPair::generate();

        for name in [CryptoSuiteName::Jcs, CryptoSuiteName::Rdfc] {
            let suite = suite(name, &key_pair);
            let proof = suite.create_proof(&document(), &options(name)).unwrap();
            assert_eq!(proof.options.context.as_ref(), document().get("@context"));

            let secured = secure(&document(), &proof).unwrap();
            let result = suite.verify_proof(&secured).unwrap();

            assert!(result.verified, "{name}");
            assert_eq!(result.verified_document, Some(document()));
        }
    }

    #[test]
    fn test_tampered_document_fails() {
        let key_pair = KeyPair::generate();
        let suite = suite(CryptoSuiteName::Jcs, &key_pair);
        let proof = suite
            .create_proof(&document(), &options(CryptoSuiteName::Jcs))
            .unwrap();

        let mut secured = secure(&document(), &proof).unwrap();
        secured["myWebsite"] = json!("https://hello.world.example/!");

        let result = suite.verify_proof(&secured).unwrap();
        assert!(!result.verified);
        assert_eq!(result.verified_document, None);
    }

    #[test]
    fn test_tampered_proof_value_fails() {
        let key_pair = KeyPair::generate();
        let suite = suite(CryptoSuiteName::Jcs, &key_pair);
        let proof = suite
            .create_proof(&document(), &options(CryptoSuiteName::Jcs))
            .unwrap();

        let (_, mut bytes) = multibase::decode(&proof.proof_value).unwrap();
        for bit in [0, 7, 255, 511] {
            bytes[bit / 8] ^= 1 << (bit % 8);

            let mut tampered = proof.clone();
            tampered.proof_value = multibase::encode(multibase::Base::Base58Btc, &bytes);
            let secured = secure(&document(), &tampered).unwrap();

            assert!(!suite.verify_proof(&secured).unwrap().verified, "bit {bit}");
            bytes[bit / 8] ^= 1 << (bit % 8);
        }
    }

    #[test]
    fn test_context_mismatch_fails() {
        let key_pair = KeyPair::generate();
        let suite = suite(CryptoSuiteName::Jcs, &key_pair);
        let mut proof = suite
            .create_proof(&document(), &options(CryptoSuiteName::Jcs))
            .unwrap();
        proof.options.context = Some(json!(["https://other.example"]));

        let secured = secure(&document(), &proof).unwrap();
        assert!(!suite.verify_proof(&secured).unwrap().verified);
    }

    #[test]
    fn test_configuration_errors() {
        let key_pair = KeyPair::generate();
        let suite = suite(CryptoSuiteName::Jcs, &key_pair);

        let err = suite
            .create_proof(&document(), &options(CryptoSuiteName::Rdfc))
            .unwrap_err();
        assert!(matches!(err, Btc1Error::ProofConfiguration(_)));

        let mut wrong_type = options(CryptoSuiteName::Jcs);
        wrong_type.proof_type = ProofType::Other("Ed25519Signature2020".into());
        let err = suite.create_proof(&document(), &wrong_type).unwrap_err();
        assert!(matches!(err, Btc1Error::ProofConfiguration(_)));

        let mut wrong_method = options(CryptoSuiteName::Jcs);
        wrong_method.verification_method = "did:example:123#key-1".into();
        let err = suite.create_proof(&document(), &wrong_method).unwrap_err();
        assert!(matches!(err, Btc1Error::ProofSerialization(_)));
    }

    #[test]
    fn test_verify_with_other_key_is_structural_error() {
        let key_pair = KeyPair::generate();
        let signer = suite(CryptoSuiteName::Jcs, &key_pair);
        let proof = signer
            .create_proof(&document(), &options(CryptoSuiteName::Jcs))
            .unwrap();
        let secured = secure(&document(), &proof).unwrap();

        let verifier = Cryptosuite::new(
            CryptoSuiteName::Jcs,
            Multikey::new("did:example:456#key-0", "did:example:456", key_pair.public_key),
        );
        let err = verifier.verify_proof(&secured).unwrap_err();
        assert!(matches!(err, Btc1Error::ProofVerification(_)));

        let rdfc = Cryptosuite::new(CryptoSuiteName::Rdfc, signer.multikey().clone());
        let err = rdfc.verify_proof(&secured).unwrap_err();
        assert!(matches!(err, Btc1Error::ProofConfiguration(_)));
    }

    #[test]
    fn test_verify_uses_published_proof_fields() {
        let key_pair = KeyPair::generate();
        let suite = suite(CryptoSuiteName::Jcs, &key_pair);

        // Millisecond timestamps and fields unknown to `ProofOptions` are signed as written.
        let mut proof = json!({
            "@context": document()["@context"],
            "type": "DataIntegrityProof",
            "cryptosuite": "bip340-jcs-2025",
            "verificationMethod": METHOD,
            "proofPurpose": "assertionMethod",
            "created": "2025-01-01T00:00:00.000Z",
            "extension": {"note": "kept"},
        });
        let canonical_config = Canonicalization::Jcs.canonicalize(&proof).unwrap();
        let canonical_document = Canonicalization::Jcs.canonicalize(&document()).unwrap();
        let signature = utils::bip340_sign(
            utils::hash_proof_input(&canonical_config, &canonical_document),
            &key_pair.secret_key,
        );
        proof["proofValue"] = json!(utils::multibase_encode(&signature));

        let secured = secure(&document(), &proof).unwrap();
        assert!(suite.verify_proof(&secured).unwrap().verified);

        let mut altered = secured.clone();
        altered["proof"]["extension"]["note"] = json!("changed");
        assert!(!suite.verify_proof(&altered).unwrap().verified);
    }

    #[test]
    fn test_mismatched_secret_key() {
        let key_pair = KeyPair::generate();
        let other = KeyPair::generate();
        let multikey = Multikey::new(METHOD, "did:example:123", key_pair.public_key);

        assert!(!multikey.can_sign());
        assert!(multikey.with_secret_key(other.secret_key).is_err());
    }
}
