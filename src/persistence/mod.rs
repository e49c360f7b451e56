//! Ledger persistence
//!
//! Positions are saved as one JSON document per position so a restart can resume
//! mid-cycle. Saves are spawned in the background; the engine awaits the handle before the
//! next tick touches the same position.

mod audit;

pub use audit::{export_cycles, CycleAuditRecord};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PersistenceError;
use crate::ledger::Position;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn save_ledger(&self, position: &Position) -> Result<(), PersistenceError>;

    async fn load_ledger(&self, position_id: &str) -> Result<Option<Position>, PersistenceError>;

    /// Every stored position, for resuming after a restart
    async fn load_all(&self) -> Result<Vec<Position>, PersistenceError>;
}

/// JSON files under `<data_dir>/positions/<id>.json`
pub struct JsonLedgerStore {
    dir: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = data_dir.as_ref().join("positions");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, position_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", position_id))
    }
}

#[async_trait]
impl LedgerStore for JsonLedgerStore {
    async fn save_ledger(&self, position: &Position) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(position)?;
        let path = self.path_for(&position.id);
        let tmp = path.with_extension("json.tmp");
        // Write-then-rename so a crash never leaves a truncated ledger
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), cycles = position.ledger.cycles.len(), "Ledger saved");
        Ok(())
    }

    async fn load_ledger(&self, position_id: &str) -> Result<Option<Position>, PersistenceError> {
        let path = self.path_for(position_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Position>, PersistenceError> {
        let mut positions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            positions.push(serde_json::from_str(&json)?);
        }
        info!(dir = %self.dir.display(), count = positions.len(), "Loaded stored ledgers");
        Ok(positions)
    }
}

/// In-memory store; keeps serialized JSON so loads exercise the same round trip
#[derive(Default)]
pub struct MemoryLedgerStore {
    docs: RwLock<HashMap<String, String>>,
    saves: RwLock<usize>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.read().map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn save_ledger(&self, position: &Position) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(position)?;
        if let Ok(mut docs) = self.docs.write() {
            docs.insert(position.id.clone(), json);
        }
        if let Ok(mut saves) = self.saves.write() {
            *saves += 1;
        }
        Ok(())
    }

    async fn load_ledger(&self, position_id: &str) -> Result<Option<Position>, PersistenceError> {
        let json = self
            .docs
            .read()
            .ok()
            .and_then(|docs| docs.get(position_id).cloned());
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<Position>, PersistenceError> {
        let docs: Vec<String> = self
            .docs
            .read()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        docs.iter()
            .map(|json| serde_json::from_str(json).map_err(PersistenceError::from))
            .collect()
    }
}

/// Spawn a fire-and-forget save of `snapshot`
pub fn spawn_save(store: Arc<dyn LedgerStore>, snapshot: Position) -> JoinHandle<Result<(), PersistenceError>> {
    tokio::spawn(async move {
        let result = store.save_ledger(&snapshot).await;
        if let Err(e) = &result {
            error!(position_id = %snapshot.id, symbol = %snapshot.symbol, error = %e, "Ledger save failed");
        }
        result
    })
}

/// Wait for an outstanding save so the next tick starts from durable state
pub async fn await_pending(pending: &mut Option<JoinHandle<Result<(), PersistenceError>>>) -> Result<(), PersistenceError> {
    match pending.take() {
        Some(handle) => handle
            .await
            .map_err(|e| PersistenceError::Join(e.to_string()))?,
        None => Ok(()),
    }
}
