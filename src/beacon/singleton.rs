//! Singleton beacon: one update payload per signal transaction.
//!
//! The first output of a signal is `OP_RETURN <32-byte update hash>`.

use super::{AddressKind, Beacon, Error, Funding};
use crate::canonicalization::{CanonicalHash as _, Canonicalization};
use crate::error::Btc1Error;
use crate::identifier::{SHA256_HASH_LEN, Sha256Hash};
use crate::key::SecretKey;
use crate::resolution::SignalsMetadata;
use crate::update::Update;
use bitcoin::hashes::Hash as _;
use bitcoin::key::TapTweak as _;
use bitcoin::opcodes::all::{OP_PUSHBYTES_32, OP_RETURN};
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Network, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, absolute::LockTime,
    ecdsa, taproot,
};
use tracing::{debug, trace};

/// Length of the commitment script.
pub const SIGNAL_SCRIPT_LEN: usize = 2 + SHA256_HASH_LEN;

/// The `OP_RETURN` script committing to `update_hash`.
pub fn generate_signal(update_hash: &Sha256Hash) -> ScriptBuf {
    let mut script = Vec::with_capacity(SIGNAL_SCRIPT_LEN);
    script.push(OP_RETURN.to_u8());
    script.push(OP_PUSHBYTES_32.to_u8());
    script.extend_from_slice(&update_hash.0);

    ScriptBuf::from_bytes(script)
}

/// Hash committed to by the first output, if the transaction is a Singleton signal.
pub(crate) fn signal_hash(tx: &Transaction) -> Option<Sha256Hash> {
    let script = tx.output.first()?.script_pubkey.as_bytes();

    match script {
        [op_return, push, hash @ ..]
            if *op_return == OP_RETURN.to_u8()
                && *push == OP_PUSHBYTES_32.to_u8()
                && hash.len() == SHA256_HASH_LEN =>
        {
            Sha256Hash::from_slice(hash).ok()
        }
        _ => None,
    }
}

pub(crate) fn process_signal(
    tx: &Transaction,
    signals_metadata: &SignalsMetadata,
    canonicalization: Canonicalization,
) -> Result<Option<Update>, Btc1Error> {
    let Some(signal_hash) = signal_hash(tx) else {
        return Ok(None);
    };
    let txid = tx.compute_txid();
    trace!(%txid, %signal_hash, "singleton signal");

    let payload = signals_metadata
        .get(&txid)
        .and_then(|metadata| metadata.update_payload.as_ref())
        .ok_or_else(|| {
            Btc1Error::InvalidSidecarData(format!("No update payload for signal `{txid}`"))
        })?;

    let update = Update::from_json_value(payload.clone()).map_err(|err| {
        Btc1Error::InvalidSidecarData(format!("Malformed update payload for `{txid}`: {err}"))
    })?;
    let update_hash = update
        .canonical_hash(canonicalization)
        .map_err(|err| Btc1Error::InvalidSidecarData(err.to_string()))?;

    if update_hash != signal_hash {
        return Err(Btc1Error::InvalidSidecarData(format!(
            "Update payload hash `{update_hash}` does not match signal `{signal_hash}` in `{txid}`"
        )));
    }

    Ok(Some(update))
}

/// Build and sign a transaction spending `funding` with the commitment as its first output.
pub(crate) fn signal_transaction(
    beacon: &Beacon,
    kind: AddressKind,
    update_hash: Sha256Hash,
    funding: &Funding,
    fee: Amount,
    secret_key: &SecretKey,
) -> Result<Transaction, Error> {
    let secp = Secp256k1::new();
    let script_pubkey = beacon.script_pubkey();
    if funding.txout.script_pubkey != script_pubkey {
        return Err(Error::FundingMismatch);
    }

    let public_key = secret_key.public_key(&secp);
    if kind.address(&public_key, Network::Bitcoin).script_pubkey() != script_pubkey {
        return Err(Error::KeyMismatch);
    }

    let change = funding
        .txout
        .value
        .checked_sub(fee)
        .ok_or(Error::InsufficientFunds)?;

    let mut output = vec![TxOut {
        value: Amount::ZERO,
        script_pubkey: generate_signal(&update_hash),
    }];
    if change > Amount::ZERO {
        output.push(TxOut {
            value: change,
            script_pubkey: script_pubkey.clone(),
        });
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: funding.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output,
    };

    let mut cache = SighashCache::new(&tx);
    let signing_error = |err: &dyn std::fmt::Display| Error::Signing(err.to_string());

    match kind {
        AddressKind::P2wpkh => {
            let sighash = cache
                .p2wpkh_signature_hash(0, &script_pubkey, funding.txout.value, EcdsaSighashType::All)
                .map_err(|err| signing_error(&err))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, secret_key),
                sighash_type: EcdsaSighashType::All,
            };

            tx.input[0].witness = Witness::p2wpkh(&signature, &public_key);
        }
        AddressKind::P2pkh => {
            let sighash = cache
                .legacy_signature_hash(0, &script_pubkey, EcdsaSighashType::All.to_u32())
                .map_err(|err| signing_error(&err))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, secret_key),
                sighash_type: EcdsaSighashType::All,
            };
            let signature =
                PushBytesBuf::try_from(signature.to_vec()).map_err(|err| signing_error(&err))?;

            tx.input[0].script_sig = ScriptBuf::builder()
                .push_slice(signature)
                .push_key(&bitcoin::PublicKey::new(public_key))
                .into_script();
        }
        AddressKind::P2tr => {
            let prevouts = [&funding.txout];
            let sighash = cache
                .taproot_key_spend_signature_hash(
                    0,
                    &Prevouts::All(&prevouts),
                    TapSighashType::Default,
                )
                .map_err(|err| signing_error(&err))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let keypair = Keypair::from_secret_key(&secp, secret_key)
                .tap_tweak(&secp, None)
                .to_inner();
            let signature = taproot::Signature {
                signature: secp.sign_schnorr_no_aux_rand(&message, &keypair),
                sighash_type: TapSighashType::Default,
            };

            tx.input[0].witness = Witness::p2tr_key_spend(&signature);
        }
    }

    debug!(beacon = beacon.id(), ?kind, %update_hash, "signed signal transaction");

    Ok(tx)
}
