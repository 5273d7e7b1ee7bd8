// Persistence of chain state across restarts

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data_structures::ChainId;
use crate::error::BridgeError;
use crate::onchain::chain::Chain;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Whole-chain state: ledger, route tables, security configs, consumed guids,
/// inbound nonces, compose records and pending composes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub version: u32,
    pub chain_id: ChainId,
    pub block_number: u64,
    pub chain: Chain,
}

impl ChainSnapshot {
    pub fn capture(chain: &Chain) -> Self {
        ChainSnapshot {
            version: SNAPSHOT_VERSION,
            chain_id: chain.chain_id(),
            block_number: chain.block_number(),
            chain: chain.clone(),
        }
    }

    pub fn into_chain(self) -> Result<Chain, BridgeError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(storage(format!(
                "snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        if self.chain.chain_id() != self.chain_id {
            return Err(storage(format!(
                "snapshot header says chain {}, body holds chain {}",
                self.chain_id,
                self.chain.chain_id()
            )));
        }
        Ok(self.chain)
    }
}

pub trait StateStore {
    /// Replaces the stored snapshot of `snapshot.chain_id` in one step.
    fn save(&mut self, snapshot: &ChainSnapshot) -> Result<(), BridgeError>;
    fn load(&self, chain_id: ChainId) -> Result<Option<ChainSnapshot>, BridgeError>;
}

fn storage(reason: String) -> BridgeError {
    BridgeError::Storage { reason }
}

fn to_json(snapshot: &ChainSnapshot) -> Result<String, BridgeError> {
    serde_json::to_string(snapshot).map_err(|e| storage(format!("encode snapshot: {}", e)))
}

fn from_json(json: &str) -> Result<ChainSnapshot, BridgeError> {
    serde_json::from_str(json).map_err(|e| storage(format!("decode snapshot: {}", e)))
}

/// Serialized snapshots held in memory; same encoding path as `FileStore`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshots: BTreeMap<ChainId, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl StateStore for InMemoryStore {
    fn save(&mut self, snapshot: &ChainSnapshot) -> Result<(), BridgeError> {
        self.snapshots.insert(snapshot.chain_id, to_json(snapshot)?);
        Ok(())
    }

    fn load(&self, chain_id: ChainId) -> Result<Option<ChainSnapshot>, BridgeError> {
        self.snapshots
            .get(&chain_id)
            .map(|json| from_json(json))
            .transpose()
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: String,
}

fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// One JSON file per chain under `dir`, guarded by a SHA-256 checksum.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, chain_id: ChainId) -> PathBuf {
        self.dir.join(format!("chain-{}.json", chain_id))
    }
}

impl StateStore for FileStore {
    fn save(&mut self, snapshot: &ChainSnapshot) -> Result<(), BridgeError> {
        let payload = to_json(snapshot)?;
        let envelope = Envelope {
            checksum: checksum(&payload),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| storage(format!("encode envelope: {}", e)))?;

        let path = self.path_for(snapshot.chain_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        info!(
            "Saved chain {} at block {} to {}",
            snapshot.chain_id,
            snapshot.block_number,
            path.display()
        );
        Ok(())
    }

    fn load(&self, chain_id: ChainId) -> Result<Option<ChainSnapshot>, BridgeError> {
        let path = self.path_for(chain_id);
        if !path.exists() {
            debug!("No snapshot for chain {} at {}", chain_id, path.display());
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| storage(format!("decode envelope {}: {}", path.display(), e)))?;
        if checksum(&envelope.payload) != envelope.checksum {
            return Err(storage(format!("checksum mismatch in {}", path.display())));
        }
        from_json(&envelope.payload).map(Some)
    }
}
