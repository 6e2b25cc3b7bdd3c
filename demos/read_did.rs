//! Resolve a did:btc1 identifier against an Esplora HTTP API.
//!
//! ```text
//! ESPLORA_URL=https://mempool.space/signet/api cargo run --example read_did -- <did> [start height]
//! ```

use anyhow::{Context as _, Result};
use bitcoin::{Block, Transaction, Txid, consensus};
use did_btc1::blockchain::BitcoinSource;
use did_btc1::identifier::Did;
use did_btc1::{Document, ResolutionOptions};

const DEFAULT_DID: &str = "did:btc1:k1qqp8n0nx0muaewav2ksx99wwsu9swq5mlndjmn3gm9vl9q2mzmup0xqhmkf96";
const DEFAULT_ESPLORA_URL: &str = "https://blockstream.info/api";

struct Esplora {
    agent: ureq::Agent,
    base_url: String,
}

impl Esplora {
    fn get_text(&self, path: &str) -> Result<String> {
        let mut resp = self.agent.get(format!("{}{path}", self.base_url)).call()?;

        Ok(resp.body_mut().read_to_string()?)
    }

    fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut resp = self.agent.get(format!("{}{path}", self.base_url)).call()?;

        Ok(resp.body_mut().with_config().limit(16 * 1024 * 1024).read_to_vec()?)
    }
}

impl BitcoinSource for Esplora {
    type Error = anyhow::Error;

    fn block_count(&self) -> Result<u32> {
        Ok(self.get_text("/blocks/tip/height")?.trim().parse()?)
    }

    fn block(&self, height: u32) -> Result<Block> {
        let hash = self.get_text(&format!("/block-height/{height}"))?;
        let raw = self.get_bytes(&format!("/block/{}/raw", hash.trim()))?;

        consensus::deserialize(&raw).with_context(|| format!("block at height {height}"))
    }

    fn transaction(&self, txid: &Txid) -> Result<Transaction> {
        let raw = self.get_bytes(&format!("/tx/{txid}/raw"))?;

        consensus::deserialize(&raw).with_context(|| format!("transaction {txid}"))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let did: Did = args.next().as_deref().unwrap_or(DEFAULT_DID).parse()?;
    let start_block_height = args.next().map(|height| height.parse()).transpose()?;

    let esplora = Esplora {
        agent: ureq::agent(),
        base_url: std::env::var("ESPLORA_URL").unwrap_or_else(|_| DEFAULT_ESPLORA_URL.into()),
    };
    let mut options = ResolutionOptions::default();
    if let Some(height) = start_block_height {
        options = options.with_start_block_height(height);
    }

    let mut traversal = Document::read(&did, options)?;
    let document = traversal.resolve_with(&esplora)?;

    println!("Resolved version {}:", traversal.version_id());
    println!("{}", document.to_json_string()?);

    Ok(())
}
