use crate::{error::Btc1Error, identifier::Sha256Hash};
use multibase::{Base, decode, encode};
use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};

/// `sha256(sha256(proof_config) || sha256(document))`
pub(crate) fn hash_proof_input(canonical_config: &str, canonical_document: &str) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(canonical_config.as_bytes()));
    hasher.update(Sha256::digest(canonical_document.as_bytes()));

    Sha256Hash(hasher.finalize().into())
}

/// Sign a hash with BIP340 Schnorr using fresh auxiliary randomness.
pub(crate) fn bip340_sign(message_hash: Sha256Hash, secret_key: &SecretKey) -> Signature {
    let secp = Secp256k1::new();
    let message = Message::from_digest(message_hash.0);
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let aux_rand: [u8; 32] = rand::random();

    secp.sign_schnorr_with_aux_rand(&message, &keypair, &aux_rand)
}

/// Verify a BIP340 Schnorr signature
pub(crate) fn bip340_verify(
    message_hash: Sha256Hash,
    signature: &Signature,
    public_key: &XOnlyPublicKey,
) -> bool {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(message_hash.0);

    secp.verify_schnorr(signature, &message, public_key).is_ok()
}

/// Encode a signature using Multibase (base58-btc)
pub(crate) fn multibase_encode(signature: &Signature) -> String {
    encode(Base::Base58Btc, signature.as_ref())
}

/// Decode a multibase (base58-btc) encoded signature
pub(crate) fn multibase_decode(proof_value: &str) -> Result<Signature, Btc1Error> {
    let (base, decoded) = decode(proof_value)
        .map_err(|_| Btc1Error::ProofVerification("Invalid proofValue encoding".into()))?;
    if base != Base::Base58Btc {
        return Err(Btc1Error::ProofVerification(format!(
            "proofValue must be base58-btc, found {base:?}"
        )));
    }

    Signature::from_slice(&decoded)
        .map_err(|_| Btc1Error::ProofVerification("Invalid proofValue length".into()))
}
