use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{
    CooldownRow, CooldownStore, ErrorLogEntry, StoreResult, UsageLogEntry, UsageStore,
};

/// In-memory store for tests and ephemeral runs. Nothing survives restart.
#[derive(Default)]
pub struct MemoryStore {
    cooldowns: RwLock<HashMap<(String, String), CooldownRow>>,
    usage: RwLock<HashMap<String, UsageLogEntry>>,
    errors: RwLock<Vec<ErrorLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn usage_rows(&self) -> Vec<UsageLogEntry> {
        self.usage.read().await.values().cloned().collect()
    }

    pub async fn usage_row(&self, request_id: &str) -> Option<UsageLogEntry> {
        self.usage.read().await.get(request_id).cloned()
    }

    pub async fn error_rows(&self) -> Vec<ErrorLogEntry> {
        self.errors.read().await.clone()
    }

    pub async fn cooldown_rows(&self) -> Vec<CooldownRow> {
        self.cooldowns.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    async fn load_live(&self, now_ms: i64) -> StoreResult<Vec<CooldownRow>> {
        let mut guard = self.cooldowns.write().await;
        guard.retain(|_, row| row.expiry_ms > now_ms);
        Ok(guard.values().cloned().collect())
    }

    async fn upsert(&self, row: &CooldownRow) -> StoreResult<()> {
        self.cooldowns
            .write()
            .await
            .insert((row.provider.clone(), row.model.clone()), row.clone());
        Ok(())
    }

    async fn delete(&self, provider: &str, model: &str) -> StoreResult<()> {
        self.cooldowns
            .write()
            .await
            .remove(&(provider.to_string(), model.to_string()));
        Ok(())
    }

    async fn clear(&self, provider: Option<&str>, model: Option<&str>) -> StoreResult<()> {
        let mut guard = self.cooldowns.write().await;
        guard.retain(|(p, m), _| {
            let provider_hit = provider.is_none_or(|want| want == p);
            let model_hit = model.is_none_or(|want| want == m);
            !(provider_hit && model_hit)
        });
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn insert_usage(&self, entry: &UsageLogEntry) -> StoreResult<()> {
        self.usage
            .write()
            .await
            .insert(entry.request_id.clone(), entry.clone());
        Ok(())
    }

    async fn finalize_usage(&self, entry: &UsageLogEntry) -> StoreResult<()> {
        self.insert_usage(entry).await
    }

    async fn insert_error(&self, entry: &ErrorLogEntry) -> StoreResult<()> {
        self.errors.write().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(provider: &str, model: &str, expiry_ms: i64) -> CooldownRow {
        CooldownRow {
            provider: provider.to_string(),
            model: model.to_string(),
            expiry_ms,
            consecutive_failures: 1,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn load_live_purges_expired() {
        let store = MemoryStore::new();
        store.upsert(&row("a", "m1", 100)).await.unwrap();
        store.upsert(&row("a", "m2", 10_000)).await.unwrap();
        let live = store.load_live(5_000).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].model, "m2");
        assert_eq!(store.cooldown_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_scopes() {
        let store = MemoryStore::new();
        store.upsert(&row("a", "m1", i64::MAX)).await.unwrap();
        store.upsert(&row("a", "m2", i64::MAX)).await.unwrap();
        store.upsert(&row("b", "m1", i64::MAX)).await.unwrap();

        store.clear(Some("a"), Some("m1")).await.unwrap();
        assert_eq!(store.cooldown_rows().await.len(), 2);

        store.clear(Some("a"), None).await.unwrap();
        let rest = store.cooldown_rows().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].provider, "b");

        store.clear(None, None).await.unwrap();
        assert!(store.cooldown_rows().await.is_empty());
    }
}
