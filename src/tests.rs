//! End-to-end resolution against an in-memory chain.

use crate::beacon::{Beacon, Funding};
use crate::blockchain::BitcoinSource;
use crate::canonicalization::{CanonicalHash as _, Canonicalization};
use crate::cryptosuite::Multikey;
use crate::document::{
    DID_BTC1_CONTEXT, DID_CORE_V1_1_CONTEXT, DID_PLACEHOLDER, DidUpdate, Document,
    InitialDocument, IntermediateDocument,
};
use crate::error::Btc1Error;
use crate::identifier::{Did, DidVersion, IdType, Network, Sha256Hash};
use crate::key::{KeyPair, PublicKeyExt as _};
use crate::resolution::{ResolutionOptions, SidecarData, SignalsMetadata};
use crate::update::{UnsignedUpdate, Update};
use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash as _;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness, absolute::LockTime, transaction,
};
use chrono::{DateTime, Utc};
use json_patch::Patch;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::num::NonZeroU64;

const GENESIS_TIME: u32 = 1_700_000_000;
const BLOCK_INTERVAL: u32 = 600;

#[derive(Default)]
struct MockChain {
    blocks: Vec<Block>,
    transactions: HashMap<Txid, Transaction>,
    content: HashMap<Sha256Hash, Vec<u8>>,
}

impl MockChain {
    fn new() -> Self {
        let mut chain = Self::default();
        chain.mine(vec![]);
        chain
    }

    fn tip(&self) -> u32 {
        self.blocks.len() as u32 - 1
    }

    fn time(height: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(GENESIS_TIME + height * BLOCK_INTERVAL), 0).unwrap()
    }

    /// Mine a block holding a coinbase followed by `txdata`.
    fn mine(&mut self, txdata: Vec<Transaction>) -> u32 {
        let height = self.blocks.len() as u32;
        let coinbase = Transaction {
            version: transaction::Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };

        let txdata: Vec<_> = std::iter::once(coinbase).chain(txdata).collect();
        for tx in &txdata {
            self.transactions.insert(tx.compute_txid(), tx.clone());
        }
        self.blocks.push(Block {
            header: Header {
                version: Version::TWO,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: GENESIS_TIME + height * BLOCK_INTERVAL,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: 0,
            },
            txdata,
        });

        height
    }

    /// Mine a transaction paying to `beacon`.
    fn fund(&mut self, beacon: &Beacon) -> Funding {
        let coinbase = self.blocks[self.tip() as usize].txdata[0].compute_txid();
        let txout = TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: beacon.script_pubkey(),
        };
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(coinbase, 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![txout.clone()],
        };
        let outpoint = OutPoint::new(tx.compute_txid(), 0);
        self.mine(vec![tx]);

        Funding { outpoint, txout }
    }

    /// Fund `beacon_id`, then mine the signal announcing `did_update` through it.
    fn announce(
        &mut self,
        did_update: &DidUpdate,
        beacon_id: &str,
        key_pair: &KeyPair,
    ) -> (u32, SignalsMetadata) {
        let beacon = did_update
            .beacons
            .iter()
            .find(|beacon| beacon.id().ends_with(beacon_id))
            .unwrap()
            .clone();
        let funding = self.fund(&beacon);
        let signal = did_update
            .announce(beacon.id(), &funding, Amount::from_sat(1_000), &key_pair.secret_key)
            .unwrap();

        (self.mine(vec![signal.transaction]), signal.signals_metadata)
    }
}

impl BitcoinSource for MockChain {
    type Error = String;

    fn block_count(&self) -> Result<u32, Self::Error> {
        Ok(self.tip())
    }

    fn block(&self, height: u32) -> Result<Block, Self::Error> {
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| format!("no block at height {height}"))
    }

    fn transaction(&self, txid: &Txid) -> Result<Transaction, Self::Error> {
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| format!("unknown transaction {txid}"))
    }

    fn content(&self, hash: &Sha256Hash) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.content.get(hash).cloned())
    }
}

fn patch(value: Value) -> Patch {
    serde_json::from_value(value).unwrap()
}

fn add_service(id: &str) -> Patch {
    patch(json!([{
        "op": "add",
        "path": "/service/-",
        "value": {
            "id": id,
            "type": "LinkedDomains",
            "serviceEndpoint": format!("https://example.com/{id}"),
        },
    }]))
}

struct Fixture {
    key_pair: KeyPair,
    did: Did,
    document: Document,
    chain: MockChain,
}

impl Fixture {
    fn new() -> Self {
        let key_pair = KeyPair::generate();
        let (did, document) =
            Document::create_deterministic(key_pair.public_key, None, Some(Network::Regtest))
                .unwrap();

        Self {
            key_pair,
            did,
            document,
            chain: MockChain::new(),
        }
    }

    fn update(&self, source: &Document, version_id: u64, patch: Patch) -> DidUpdate {
        source
            .update(
                NonZeroU64::new(version_id).unwrap(),
                patch,
                &format!("{}#initialKey", self.did),
                self.key_pair.secret_key,
                Canonicalization::Jcs,
            )
            .unwrap()
    }

    fn resolve(&self, options: ResolutionOptions) -> Result<Document, Btc1Error> {
        Document::read(&self.did, options)?.resolve_with(&self.chain)
    }
}

fn options(signals_metadata: SignalsMetadata) -> ResolutionOptions {
    ResolutionOptions::default()
        .with_required_confirmations(0)
        .with_sidecar_data(SidecarData::default().with_signals_metadata(signals_metadata))
}

#[test]
fn test_resolve_without_signals() {
    let fixture = Fixture::new();

    let resolved = fixture.resolve(ResolutionOptions::default()).unwrap();
    assert_eq!(resolved, fixture.document);
}

#[test]
fn test_resolve_applies_update() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let (_, metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);

    let mut traversal = Document::read(&fixture.did, options(metadata)).unwrap();
    let resolved = traversal.resolve_with(&fixture.chain).unwrap();

    assert_eq!(resolved, v2.target_document);
    assert_eq!(traversal.version_id().get(), 2);
    assert_eq!(traversal.contemporary_block_height(), fixture.chain.tip());
}

#[test]
fn test_resolve_through_every_address_kind() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let v3 = fixture.update(&v2.target_document, 2, add_service("#v3"));
    let v4 = fixture.update(&v3.target_document, 3, add_service("#v4"));

    let mut metadata = SignalsMetadata::new();
    for (did_update, beacon_id) in [
        (&v2, "#initialP2PKH"),
        (&v3, "#initialP2WPKH"),
        (&v4, "#initialP2TR"),
    ] {
        let (_, signal) = fixture.chain.announce(did_update, beacon_id, &fixture.key_pair);
        metadata.extend(signal);
    }

    let resolved = fixture.resolve(options(metadata)).unwrap();
    assert_eq!(resolved, v4.target_document);
    assert_eq!(resolved.services().len(), 6);
}

#[test]
fn test_signals_need_confirmations() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let (_, metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);

    let unconfirmed = options(metadata.clone()).with_required_confirmations(6);
    assert_eq!(fixture.resolve(unconfirmed).unwrap(), fixture.document);

    for _ in 0..6 {
        fixture.chain.mine(vec![]);
    }
    let confirmed = options(metadata).with_required_confirmations(6);
    assert_eq!(fixture.resolve(confirmed).unwrap(), v2.target_document);
}

#[test]
fn test_missing_update_payload() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);

    assert!(matches!(
        fixture.resolve(options(SignalsMetadata::new())),
        Err(Btc1Error::InvalidSidecarData(_))
    ));
}

#[test]
fn test_duplicate_update_is_ignored() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));

    let mut metadata = SignalsMetadata::new();
    for beacon_id in ["#initialP2WPKH", "#initialP2TR"] {
        let (_, signal) = fixture.chain.announce(&v2, beacon_id, &fixture.key_pair);
        metadata.extend(signal);
    }

    let resolved = fixture.resolve(options(metadata)).unwrap();
    assert_eq!(resolved, v2.target_document);
}

#[test]
fn test_divergent_duplicate_is_late_publishing() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let fork = fixture.update(&fixture.document, 1, add_service("#fork"));

    let (_, mut metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);
    let (_, signal) = fixture.chain.announce(&fork, "#initialP2TR", &fixture.key_pair);
    metadata.extend(signal);

    assert!(matches!(
        fixture.resolve(options(metadata)),
        Err(Btc1Error::LatePublishingError(_))
    ));
}

#[test]
fn test_version_gap_is_late_publishing() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let v3 = fixture.update(&v2.target_document, 2, add_service("#v3"));

    // Only version 3 is announced.
    let (_, metadata) = fixture.chain.announce(&v3, "#initialP2WPKH", &fixture.key_pair);

    let err = fixture.resolve(options(metadata)).unwrap_err();
    assert_eq!(err.code(), "LATE_PUBLISHING_ERROR");
}

#[test]
fn test_updates_in_one_block_are_ordered_by_version() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let v3 = fixture.update(&v2.target_document, 2, add_service("#v3"));

    let p2wpkh = fixture.document.beacon("#initialP2WPKH").unwrap().clone();
    let p2tr = fixture.document.beacon("#initialP2TR").unwrap().clone();
    let wpkh_funding = fixture.chain.fund(&p2wpkh);
    let tr_funding = fixture.chain.fund(&p2tr);
    let fee = Amount::from_sat(1_000);

    let s3 = v3
        .announce(p2wpkh.id(), &wpkh_funding, fee, &fixture.key_pair.secret_key)
        .unwrap();
    let s2 = v2
        .announce(p2tr.id(), &tr_funding, fee, &fixture.key_pair.secret_key)
        .unwrap();
    let mut metadata = s2.signals_metadata;
    metadata.extend(s3.signals_metadata);
    fixture.chain.mine(vec![s3.transaction, s2.transaction]);

    assert_eq!(
        fixture.resolve(options(metadata)).unwrap(),
        v3.target_document
    );
}

#[test]
fn test_resolve_version_id() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let v3 = fixture.update(&v2.target_document, 2, add_service("#v3"));
    let (_, mut metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);
    let (_, signal) = fixture.chain.announce(&v3, "#initialP2WPKH", &fixture.key_pair);
    metadata.extend(signal);

    let first = options(metadata.clone()).with_version_id(NonZeroU64::MIN);
    assert_eq!(fixture.resolve(first).unwrap(), fixture.document);

    let second = options(metadata.clone()).with_version_id(NonZeroU64::new(2).unwrap());
    let mut traversal = Document::read(&fixture.did, second).unwrap();
    assert_eq!(
        traversal.resolve_with(&fixture.chain).unwrap(),
        v2.target_document
    );
    assert_eq!(traversal.version_id().get(), 2);

    // A version beyond the chain resolves to the best known document.
    let future = options(metadata).with_version_id(NonZeroU64::new(9).unwrap());
    assert_eq!(fixture.resolve(future).unwrap(), v3.target_document);
}

#[test]
fn test_resolve_version_time() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let v3 = fixture.update(&v2.target_document, 2, add_service("#v3"));
    let (h2, mut metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);
    let (h3, signal) = fixture.chain.announce(&v3, "#initialP2WPKH", &fixture.key_pair);
    metadata.extend(signal);
    fixture.chain.mine(vec![]);

    let before_v2 = options(metadata.clone()).with_version_time(MockChain::time(h2));
    assert_eq!(fixture.resolve(before_v2).unwrap(), fixture.document);

    let after_v2 = options(metadata.clone()).with_version_time(MockChain::time(h3));
    assert_eq!(fixture.resolve(after_v2).unwrap(), v2.target_document);

    let latest = options(metadata).with_version_time(MockChain::time(h3 + 10));
    assert_eq!(fixture.resolve(latest).unwrap(), v3.target_document);
}

#[test]
fn test_start_block_height_skips_signals() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let (height, metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);

    let options = options(metadata).with_start_block_height(height + 1);
    assert_eq!(fixture.resolve(options).unwrap(), fixture.document);
}

/// Version 2 of the fixture document, signed with a proof expiring at `expires`.
fn expiring_update(fixture: &Fixture, expires: DateTime<Utc>) -> (Update, Document) {
    let (unsigned, target) = UnsignedUpdate::construct(
        &fixture.document,
        NonZeroU64::MIN,
        add_service("#v2"),
        Canonicalization::Jcs,
    )
    .unwrap();
    let multikey = Multikey::new(
        format!("{}#initialKey", fixture.did),
        fixture.did.encode(),
        fixture.key_pair.public_key,
    )
    .with_secret_key(fixture.key_pair.secret_key)
    .unwrap();
    let update = unsigned
        .invoke_until(&fixture.did, multikey, Canonicalization::Jcs, expires)
        .unwrap();

    (update, target)
}

/// Mine the signal for `update` in the block after its funding; `expires_after` is the
/// proof lifetime in blocks relative to that signal block.
fn resolve_expiring(expires_after: i32) -> (Result<Document, Btc1Error>, Document) {
    let mut fixture = Fixture::new();
    let beacon = fixture.document.beacon("#initialP2WPKH").unwrap().clone();
    let funding = fixture.chain.fund(&beacon);
    let signal_height = fixture.chain.tip() + 1;

    let expires = MockChain::time(signal_height)
        + chrono::Duration::seconds(i64::from(expires_after) * i64::from(BLOCK_INTERVAL));
    let (update, target) = expiring_update(&fixture, expires);
    let signal = beacon
        .broadcast_signal(
            &update,
            &funding,
            Amount::from_sat(1_000),
            &fixture.key_pair.secret_key,
            Canonicalization::Jcs,
        )
        .unwrap();
    assert_eq!(fixture.chain.mine(vec![signal.transaction]), signal_height);

    (fixture.resolve(options(signal.signals_metadata)), target)
}

#[test]
fn test_update_expiry_is_checked_at_signal_time() {
    // Mock block times are in 2023: this proof has long expired by the wall clock, but was
    // valid when its signal was mined.
    let (resolved, target) = resolve_expiring(10);
    assert!(MockChain::time(0) + chrono::Duration::days(365) < Utc::now());
    assert_eq!(resolved.unwrap(), target);
}

#[test]
fn test_update_expired_before_signal_is_rejected() {
    let (resolved, _) = resolve_expiring(-1);
    assert!(matches!(resolved, Err(Btc1Error::InvalidUpdateProof(_))));
}

#[test]
fn test_deactivated_document_rejects_later_updates() {
    let mut fixture = Fixture::new();
    let v2 = fixture
        .document
        .deactivate(
            NonZeroU64::MIN,
            &format!("{}#initialKey", fixture.did),
            fixture.key_pair.secret_key,
            Canonicalization::Jcs,
        )
        .unwrap();
    let (_, metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);

    let resolved = fixture.resolve(options(metadata)).unwrap();
    assert!(resolved.is_deactivated());
}

#[test]
fn test_resolve_external_did() {
    let key_pair = KeyPair::generate();
    let beacon_address = crate::beacon::AddressKind::P2wpkh
        .address(&key_pair.public_key, bitcoin::Network::Regtest);
    let intermediate = json!({
        "id": DID_PLACEHOLDER,
        "@context": [DID_CORE_V1_1_CONTEXT, DID_BTC1_CONTEXT],
        "verificationMethod": [{
            "id": format!("{DID_PLACEHOLDER}#key-0"),
            "type": "Multikey",
            "controller": DID_PLACEHOLDER,
            "publicKeyMultibase": key_pair.public_key.to_multikey(),
        }],
        "capabilityInvocation": ["#key-0"],
        "service": [{
            "id": format!("{DID_PLACEHOLDER}#beacon-0"),
            "type": "SingletonBeacon",
            "serviceEndpoint": format!("bitcoin:{beacon_address}"),
        }],
    });
    let (did, initial) = InitialDocument::from_external_intermediate(
        IntermediateDocument::from_json_value(intermediate.clone()).unwrap(),
        None,
        Some(Network::Regtest),
        Canonicalization::Jcs,
    )
    .unwrap();
    let document = initial.document().clone();

    let v2 = document
        .update(
            NonZeroU64::MIN,
            add_service("#v2"),
            &format!("{did}#key-0"),
            key_pair.secret_key,
            Canonicalization::Jcs,
        )
        .unwrap();
    let mut chain = MockChain::new();
    let (_, metadata) = chain.announce(&v2, "#beacon-0", &key_pair);

    // Initial document supplied as sidecar data.
    let sidecar = SidecarData::default()
        .with_initial_document(document.as_ref().clone())
        .with_signals_metadata(metadata.clone());
    let options = ResolutionOptions::default()
        .with_required_confirmations(0)
        .with_sidecar_data(sidecar);
    let resolved = Document::read(&did, options)
        .unwrap()
        .resolve_with(&chain)
        .unwrap();
    assert_eq!(resolved, v2.target_document);

    // Initial document fetched from content addressable storage.
    let IdType::External(genesis) = did.components().id_type() else {
        panic!("expected an external identifier");
    };
    let options = ResolutionOptions::default()
        .with_required_confirmations(0)
        .with_sidecar_data(SidecarData::default().with_signals_metadata(metadata));
    let mut traversal = Document::read(&did, options.clone()).unwrap();
    assert!(matches!(
        traversal.resolve_with(&chain),
        Err(Btc1Error::InvalidDidDocument(_))
    ));

    chain
        .content
        .insert(Sha256Hash(genesis), serde_json::to_vec(&intermediate).unwrap());
    let resolved = Document::read(&did, options)
        .unwrap()
        .resolve_with(&chain)
        .unwrap();
    assert_eq!(resolved, v2.target_document);
}

#[test]
fn test_chain_source_errors() {
    struct Offline;

    impl BitcoinSource for Offline {
        type Error = &'static str;

        fn block_count(&self) -> Result<u32, Self::Error> {
            Err("offline")
        }

        fn block(&self, _height: u32) -> Result<Block, Self::Error> {
            Err("offline")
        }

        fn transaction(&self, _txid: &Txid) -> Result<Transaction, Self::Error> {
            Err("offline")
        }
    }

    let fixture = Fixture::new();
    let err = Document::read(&fixture.did, ResolutionOptions::default())
        .unwrap()
        .resolve_with(&Offline)
        .unwrap_err();
    assert_eq!(err, Btc1Error::ChainSource("offline".into()));
}

#[test]
fn test_identifier_decodes_to_its_components() {
    let key_pair = KeyPair::generate();
    let (did, _) =
        Document::create_deterministic(key_pair.public_key, None, Some(Network::Mainnet))
            .unwrap();

    let parsed: Did = did.encode().parse().unwrap();
    let components = parsed.components();
    assert_eq!(components.version(), DidVersion::default());
    assert_eq!(components.version().get(), 1);
    assert_eq!(components.network(), Network::Mainnet);
    assert_eq!(
        components.id_type(),
        IdType::Key(key_pair.public_key.serialize())
    );
    assert_eq!(parsed.public_key(), Some(key_pair.public_key));
}

#[test]
fn test_patched_document_hash_is_key_order_independent() {
    let fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let h0 = fixture.document.canonical_hash(Canonicalization::Jcs).unwrap();
    let h1 = v2.target_document.canonical_hash(Canonicalization::Jcs).unwrap();
    assert_ne!(h0, h1);

    // The same service written with its keys in another order.
    let mut json = fixture.document.as_ref().clone();
    json["service"].as_array_mut().unwrap().push(json!({
        "serviceEndpoint": "https://example.com/#v2",
        "type": "LinkedDomains",
        "id": "#v2",
    }));
    let rebuilt = Document::from_json_value(json).unwrap();
    assert_eq!(rebuilt.canonical_hash(Canonicalization::Jcs).unwrap(), h1);
    assert_eq!(v2.update.target_hash(), h1);
    assert_eq!(v2.update.source_hash(), h0);
}

#[test]
fn test_tampered_sidecar_payload_is_rejected() {
    let mut fixture = Fixture::new();
    let v2 = fixture.update(&fixture.document, 1, add_service("#v2"));
    let (height, metadata) = fixture.chain.announce(&v2, "#initialP2WPKH", &fixture.key_pair);
    let signal = fixture.chain.blocks[height as usize].txdata[1].clone();
    let beacon = fixture.document.beacon("#initialP2WPKH").unwrap();

    let update = beacon
        .process_signal(&signal, &metadata, Canonicalization::Jcs)
        .unwrap();
    assert_eq!(update, Some(v2.update.clone()));

    let mut tampered = metadata.clone();
    let payload = tampered
        .get_mut(&signal.compute_txid())
        .and_then(|metadata| metadata.update_payload.as_mut())
        .unwrap();
    payload["targetVersionId"] = json!(3);
    assert!(matches!(
        beacon.process_signal(&signal, &tampered, Canonicalization::Jcs),
        Err(Btc1Error::InvalidSidecarData(_))
    ));

    let err = fixture.resolve(options(tampered)).unwrap_err();
    assert_eq!(err.code(), "INVALID_SIDECAR_DATA");
}
