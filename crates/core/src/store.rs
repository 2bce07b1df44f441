use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::coordinator::{SwapId, SwapRecord};
use crate::{Error, Result};

/// Persistence collaborator for swap records
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn save(&self, record: &SwapRecord) -> Result<()>;

    async fn load(&self, id: &SwapId) -> Result<SwapRecord>;

    async fn list(&self) -> Result<Vec<SwapId>>;
}

/// Keeps each record as serialized JSON in memory
#[derive(Default)]
pub struct InMemorySwapStore {
    records: RwLock<HashMap<SwapId, String>>,
}

impl InMemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStore for InMemorySwapStore {
    async fn save(&self, record: &SwapRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::Persistence(format!("encode {}: {}", record.id, e)))?;
        self.records.write().insert(record.id, json);
        Ok(())
    }

    async fn load(&self, id: &SwapId) -> Result<SwapRecord> {
        let json = self
            .records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SwapNotFound(id.to_string()))?;
        serde_json::from_str(&json).map_err(|e| Error::Persistence(format!("decode {}: {}", id, e)))
    }

    async fn list(&self) -> Result<Vec<SwapId>> {
        Ok(self.records.read().keys().copied().collect())
    }
}
