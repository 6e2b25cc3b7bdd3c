//! Sans-I/O traversal of the Bitcoin blockchain.
//!
//! [`Traversal`] walks blocks from the start height up to a target height, looking for
//! transactions that spend the beacons of the contemporary document. The caller performs the
//! [`Request`]s it emits and feeds the answers back through [`Traversal::process_responses`].

use crate::beacon::Beacon;
use crate::canonicalization::{CanonicalHash, Canonicalization};
use crate::document::{Document, InitialDocument};
use crate::error::Btc1Error;
use crate::identifier::{Did, IdType, Sha256Hash};
use crate::resolution::{ResolutionOptions, SignalsMetadata, Target};
use crate::update::Update;
use bitcoin::{Block, OutPoint, ScriptBuf, Transaction, Txid};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use tracing::{debug, info, instrument, trace};

/// A query the caller must answer before the traversal can continue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Request {
    /// Height of the chain tip
    BlockCount,

    Block { height: u32 },

    Transaction { txid: Txid },

    /// Content addressable storage lookup
    Content { hash: Sha256Hash },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    BlockCount(u32),
    Block { height: u32, block: Block },
    Transaction(Transaction),
    Content { hash: Sha256Hash, content: Option<Vec<u8>> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TraversalState {
    Requests(Vec<Request>),
    Resolved(Document),
}

/// Blocking access to Bitcoin data, for callers who do not drive [`Traversal`] themselves.
pub trait BitcoinSource {
    type Error: std::fmt::Display;

    fn block_count(&self) -> Result<u32, Self::Error>;

    fn block(&self, height: u32) -> Result<Block, Self::Error>;

    fn transaction(&self, txid: &Txid) -> Result<Transaction, Self::Error>;

    /// Content addressable storage. Sources without one find nothing.
    fn content(&self, _hash: &Sha256Hash) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Waiting for the initial document from content addressable storage
    Initial,

    ChainTip,

    /// Scanning backwards from `height` for the last block before the version time
    TargetHeight { height: u32 },

    Walk { height: u32, target_height: u32 },

    Resolved,
}

enum Scan {
    Missing(Vec<Request>),
    Updates(Vec<Update>),
}

/// State machine for Bitcoin blockchain traversal.
#[derive(Debug)]
pub struct Traversal {
    did: Did,
    target: Target,
    canonicalization: Canonicalization,
    required_confirmations: u32,
    start_block_height: u32,
    signals_metadata: SignalsMetadata,

    contemporary_doc: Option<Document>,
    contemporary_block_height: u32,
    current_version_id: NonZeroU64,

    /// Hash of the update that produced version `i + 2`
    update_hash_history: Vec<Sha256Hash>,

    phase: Phase,
    chain_tip: Option<u32>,
    content: Option<Option<Vec<u8>>>,
    blocks: HashMap<u32, Block>,
    transactions: HashMap<Txid, Transaction>,
}

impl Traversal {
    pub(crate) fn new(did: Did, options: ResolutionOptions) -> Result<Self, Btc1Error> {
        let network = did.components().network();
        if let Some(expected) = options.network {
            if expected != network {
                return Err(Btc1Error::InvalidDid(format!(
                    "`{did}` is a {network:?} identifier, expected {expected:?}"
                )));
            }
        }

        let target = options.target();
        let sidecar = options.sidecar_data.unwrap_or_default();
        let initial = match did.components().id_type() {
            IdType::Key(_) => Some(
                InitialDocument::deterministic(&did)
                    .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?,
            ),
            IdType::External(_) => sidecar
                .initial_document
                .as_ref()
                .map(|document| {
                    InitialDocument::from_sidecar(&did, document, options.canonicalization)
                })
                .transpose()?,
        };

        let mut traversal = Self {
            did,
            target,
            canonicalization: options.canonicalization,
            required_confirmations: options.required_confirmations,
            start_block_height: options.start_block_height,
            signals_metadata: sidecar.signals_metadata,
            contemporary_doc: None,
            contemporary_block_height: 0,
            current_version_id: NonZeroU64::MIN,
            update_hash_history: Vec::new(),
            phase: Phase::Initial,
            chain_tip: None,
            content: None,
            blocks: HashMap::new(),
            transactions: HashMap::new(),
        };
        if let Some(initial) = initial {
            traversal.set_initial(initial.into_document());
        }

        Ok(traversal)
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Version of the contemporary document.
    pub fn version_id(&self) -> NonZeroU64 {
        self.current_version_id
    }

    /// Height of the block holding the last applied update.
    pub fn contemporary_block_height(&self) -> u32 {
        self.contemporary_block_height
    }

    /// Advance the traversal as far as the buffered responses allow.
    #[instrument(skip(self), fields(did = %self.did))]
    pub fn traverse(&mut self) -> Result<TraversalState, Btc1Error> {
        loop {
            match self.phase {
                Phase::Initial => match self.content.take() {
                    None => {
                        let hash = self.genesis_hash()?;
                        return Ok(TraversalState::Requests(vec![Request::Content { hash }]));
                    }
                    Some(None) => {
                        return Err(Btc1Error::InvalidDidDocument(format!(
                            "Initial document of `{}` not found in content addressable storage",
                            self.did
                        )));
                    }
                    Some(Some(content)) => {
                        let initial =
                            InitialDocument::from_content(&self.did, &content, self.canonicalization)?;
                        self.set_initial(initial.into_document());
                    }
                },

                Phase::ChainTip => {
                    let Some(tip) = self.chain_tip else {
                        return Ok(TraversalState::Requests(vec![Request::BlockCount]));
                    };

                    self.phase = match self.target {
                        Target::Time(_) => Phase::TargetHeight { height: tip },
                        Target::Latest | Target::VersionId(_) => {
                            match tip.checked_sub(self.required_confirmations) {
                                Some(target_height) => Phase::Walk {
                                    height: self.start_block_height,
                                    target_height,
                                },
                                None => Phase::Resolved,
                            }
                        }
                    };
                    debug!(tip, phase = ?self.phase, "chain tip");
                }

                Phase::TargetHeight { height } => {
                    let Target::Time(version_time) = self.target else {
                        return Err(Btc1Error::ChainSource(
                            "Target height scan without a version time".into(),
                        ));
                    };
                    let Some(block) = self.blocks.remove(&height) else {
                        return Ok(TraversalState::Requests(vec![Request::Block { height }]));
                    };

                    let block_time = block_time(&block)?;
                    self.phase = if block_time < version_time {
                        self.blocks.insert(height, block);
                        Phase::Walk {
                            height: self.start_block_height,
                            target_height: height,
                        }
                    } else if height <= self.start_block_height {
                        Phase::Resolved
                    } else {
                        Phase::TargetHeight { height: height - 1 }
                    };
                }

                Phase::Walk {
                    height,
                    target_height,
                } => {
                    if height > target_height {
                        self.phase = Phase::Resolved;
                        continue;
                    }
                    if let Some(requests) = self.process_block(height)? {
                        return Ok(TraversalState::Requests(requests));
                    }

                    self.blocks.remove(&height);
                    self.transactions.clear();
                    if self.phase != Phase::Resolved {
                        self.phase = Phase::Walk {
                            height: height + 1,
                            target_height,
                        };
                    }
                }

                Phase::Resolved => {
                    let document = self.contemporary()?.clone();
                    info!(version_id = self.current_version_id.get(), "resolved");

                    return Ok(TraversalState::Resolved(document));
                }
            }
        }
    }

    /// Buffer answers to earlier requests.
    pub fn process_responses(&mut self, responses: Vec<Response>) {
        for response in responses {
            match response {
                Response::BlockCount(count) => self.chain_tip = Some(count),
                Response::Block { height, block } => {
                    self.blocks.insert(height, block);
                }
                Response::Transaction(tx) => {
                    self.transactions.insert(tx.compute_txid(), tx);
                }
                Response::Content { hash, content } => {
                    if self.phase == Phase::Initial && self.genesis_hash().ok() == Some(hash) {
                        self.content = Some(content);
                    }
                }
            }
        }
    }

    /// Drive the traversal to completion against `source`.
    pub fn resolve_with<S: BitcoinSource>(&mut self, source: &S) -> Result<Document, Btc1Error> {
        loop {
            match self.traverse()? {
                TraversalState::Resolved(document) => return Ok(document),
                TraversalState::Requests(requests) => {
                    let responses = requests
                        .into_iter()
                        .map(|request| fetch(source, request))
                        .collect::<Result<Vec<_>, _>>()?;

                    self.process_responses(responses);
                }
            }
        }
    }

    fn set_initial(&mut self, document: Document) {
        self.contemporary_doc = Some(document);
        self.phase = match self.target {
            Target::VersionId(version_id) if version_id == NonZeroU64::MIN => Phase::Resolved,
            _ => Phase::ChainTip,
        };
    }

    fn contemporary(&self) -> Result<&Document, Btc1Error> {
        self.contemporary_doc.as_ref().ok_or_else(|| {
            Btc1Error::InvalidDidDocument(format!("No initial document for `{}`", self.did))
        })
    }

    fn genesis_hash(&self) -> Result<Sha256Hash, Btc1Error> {
        match self.did.components().id_type() {
            IdType::External(hash) => Ok(Sha256Hash(hash)),
            IdType::Key(_) => Err(Btc1Error::InvalidDid(format!(
                "`{}` has no content addressable initial document",
                self.did
            ))),
        }
    }

    /// Find, process and apply the signals of one block.
    ///
    /// Returns the requests still needed to do so.
    fn process_block(&mut self, height: u32) -> Result<Option<Vec<Request>>, Btc1Error> {
        let Some(block) = self.blocks.get(&height) else {
            return Ok(Some(vec![Request::Block { height }]));
        };

        let time = block_time(block)?;
        let updates = match self.scan(block, self.contemporary()?)? {
            Scan::Missing(requests) => return Ok(Some(requests)),
            Scan::Updates(updates) => updates,
        };
        if !updates.is_empty() {
            debug!(height, count = updates.len(), "beacon signals");
        }

        self.apply_updates(updates, height, time)?;

        Ok(None)
    }

    /// Collect the updates announced in `block` through the beacons of `document`.
    fn scan(&self, block: &Block, document: &Document) -> Result<Scan, Btc1Error> {
        // Signals commit through an OP_RETURN first output.
        let candidates: Vec<_> = block
            .txdata
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .filter(|tx| {
                tx.output
                    .first()
                    .is_some_and(|output| output.script_pubkey.is_op_return())
            })
            .collect();
        let in_block: HashMap<Txid, &Transaction> = block
            .txdata
            .iter()
            .map(|tx| (tx.compute_txid(), tx))
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<_> = candidates
            .iter()
            .flat_map(|tx| &tx.input)
            .map(|input| input.previous_output.txid)
            .filter(|txid| !in_block.contains_key(txid) && !self.transactions.contains_key(txid))
            .filter(|txid| seen.insert(*txid))
            .map(|txid| Request::Transaction { txid })
            .collect();
        if !missing.is_empty() {
            trace!(count = missing.len(), "missing previous transactions");
            return Ok(Scan::Missing(missing));
        }

        let beacons: Vec<(&Beacon, ScriptBuf)> = document
            .beacons()
            .iter()
            .map(|beacon| (beacon, beacon.script_pubkey()))
            .collect();

        let mut updates = Vec::new();
        for tx in candidates {
            let spent = tx
                .input
                .iter()
                .map(|input| self.prevout_script(&in_block, &input.previous_output))
                .collect::<Result<Vec<_>, _>>()?;

            for (beacon, script_pubkey) in &beacons {
                if !spent.contains(&script_pubkey) {
                    continue;
                }
                trace!(txid = %tx.compute_txid(), beacon = beacon.id(), "beacon signal");

                if let Some(update) =
                    beacon.process_signal(tx, &self.signals_metadata, self.canonicalization)?
                {
                    updates.push(update);
                }
            }
        }
        updates.sort_by_key(Update::target_version_id);

        Ok(Scan::Updates(updates))
    }

    fn prevout_script<'a>(
        &'a self,
        in_block: &HashMap<Txid, &'a Transaction>,
        outpoint: &OutPoint,
    ) -> Result<&'a ScriptBuf, Btc1Error> {
        let tx = in_block
            .get(&outpoint.txid)
            .copied()
            .or_else(|| self.transactions.get(&outpoint.txid))
            .ok_or_else(|| {
                Btc1Error::ChainSource(format!("Missing transaction `{}`", outpoint.txid))
            })?;

        tx.output
            .get(outpoint.vout as usize)
            .map(|output| &output.script_pubkey)
            .ok_or_else(|| {
                Btc1Error::ChainSource(format!(
                    "Transaction `{}` has no output {}",
                    outpoint.txid, outpoint.vout
                ))
            })
    }

    /// Apply updates ordered by target version id, checking their proofs at the time of the
    /// block that announced them.
    fn apply_updates(
        &mut self,
        updates: Vec<Update>,
        height: u32,
        time: DateTime<Utc>,
    ) -> Result<(), Btc1Error> {
        for update in updates {
            let target_version_id = update.target_version_id();
            let current = self.current_version_id.get();

            if target_version_id <= self.current_version_id {
                self.check_duplicate(&update)?;
                debug!(version_id = target_version_id.get(), "duplicate update");
            } else if target_version_id.get() == current + 1 {
                let contemporary = self.contemporary()?;
                let contemporary_hash = hash(contemporary, self.canonicalization)?;
                if update.source_hash() != contemporary_hash {
                    return Err(Btc1Error::late_publishing(
                        update.source_hash(),
                        contemporary_hash,
                    ));
                }

                let next = contemporary.apply_update(&update, time, self.canonicalization)?;
                self.contemporary_doc = Some(next);
                self.contemporary_block_height = height;
                self.current_version_id = target_version_id;
                self.update_hash_history
                    .push(hash(&update, self.canonicalization)?);
                info!(version_id = target_version_id.get(), height, "applied update");

                if self.target == Target::VersionId(target_version_id) {
                    self.phase = Phase::Resolved;
                    return Ok(());
                }
            } else {
                return Err(Btc1Error::LatePublishingError(format!(
                    "Update to version {target_version_id} skips version {}",
                    current + 1
                )));
            }
        }

        Ok(())
    }

    /// An update for an already applied version must be the update that was applied.
    fn check_duplicate(&self, update: &Update) -> Result<(), Btc1Error> {
        let target_version_id = update.target_version_id().get();
        let update_hash = hash(update, self.canonicalization)?;

        let index = usize::try_from(target_version_id)
            .ok()
            .and_then(|version| version.checked_sub(2));
        match index.and_then(|index| self.update_hash_history.get(index)) {
            Some(expected) if *expected == update_hash => Ok(()),
            Some(expected) => Err(Btc1Error::late_publishing(update_hash, *expected)),
            None => Err(Btc1Error::LatePublishingError(format!(
                "Update targets version {target_version_id}, which cannot be updated to"
            ))),
        }
    }
}

fn hash<T: CanonicalHash>(value: &T, canonicalization: Canonicalization) -> Result<Sha256Hash, Btc1Error> {
    value
        .canonical_hash(canonicalization)
        .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))
}

fn block_time(block: &Block) -> Result<DateTime<Utc>, Btc1Error> {
    DateTime::from_timestamp(i64::from(block.header.time), 0).ok_or_else(|| {
        Btc1Error::ChainSource(format!("Invalid block time {}", block.header.time))
    })
}

fn fetch<S: BitcoinSource>(source: &S, request: Request) -> Result<Response, Btc1Error> {
    let source_error = |err: S::Error| Btc1Error::ChainSource(err.to_string());

    Ok(match request {
        Request::BlockCount => Response::BlockCount(source.block_count().map_err(source_error)?),
        Request::Block { height } => Response::Block {
            height,
            block: source.block(height).map_err(source_error)?,
        },
        Request::Transaction { txid } => {
            let tx = source.transaction(&txid).map_err(source_error)?;
            if tx.compute_txid() != txid {
                return Err(Btc1Error::ChainSource(format!(
                    "Requested `{txid}`, received `{}`",
                    tx.compute_txid()
                )));
            }

            Response::Transaction(tx)
        }
        Request::Content { hash } => Response::Content {
            hash,
            content: source.content(&hash).map_err(source_error)?,
        },
    })
}
