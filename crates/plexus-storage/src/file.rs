use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::{
    CooldownRow, CooldownStore, ErrorLogEntry, StoreResult, UsageLogEntry, UsageStore,
};

/// Single-node file persistence.
///
/// Cooldowns live in one JSON snapshot file rewritten on every change (the
/// map is tiny). Usage and errors are JSONL appends; a finalized stream row
/// is appended again with the same `request_id`, and readers take the last
/// row per id.
pub struct FileStore {
    cooldown_path: PathBuf,
    usage_path: PathBuf,
    errors_path: PathBuf,
    // One writer at a time per file family; writes are short.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let dir = state_dir.as_ref();
        Self {
            cooldown_path: dir.join("cooldowns.json"),
            usage_path: dir.join("request_usage.jsonl"),
            errors_path: dir.join("inference_errors.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_cooldowns(&self) -> StoreResult<HashMap<(String, String), CooldownRow>> {
        let raw = match tokio::fs::read_to_string(&self.cooldown_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let rows: Vec<CooldownRow> = serde_json::from_str(&raw)?;
        Ok(rows
            .into_iter()
            .map(|row| ((row.provider.clone(), row.model.clone()), row))
            .collect())
    }

    async fn write_cooldowns(
        &self,
        rows: &HashMap<(String, String), CooldownRow>,
    ) -> StoreResult<()> {
        if let Some(parent) = self.cooldown_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&CooldownRow> = rows.values().collect();
        let encoded = serde_json::to_vec_pretty(&list)?;
        // Write-then-rename so a crash mid-write cannot truncate the file.
        let tmp = self.cooldown_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &self.cooldown_path).await?;
        Ok(())
    }

    async fn append_line(&self, path: &Path, line: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CooldownStore for FileStore {
    async fn load_live(&self, now_ms: i64) -> StoreResult<Vec<CooldownRow>> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_cooldowns().await?;
        let before = rows.len();
        rows.retain(|_, row| row.expiry_ms > now_ms);
        if rows.len() != before {
            self.write_cooldowns(&rows).await?;
        }
        Ok(rows.into_values().collect())
    }

    async fn upsert(&self, row: &CooldownRow) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_cooldowns().await?;
        rows.insert((row.provider.clone(), row.model.clone()), row.clone());
        self.write_cooldowns(&rows).await
    }

    async fn delete(&self, provider: &str, model: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_cooldowns().await?;
        if rows
            .remove(&(provider.to_string(), model.to_string()))
            .is_some()
        {
            self.write_cooldowns(&rows).await?;
        }
        Ok(())
    }

    async fn clear(&self, provider: Option<&str>, model: Option<&str>) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_cooldowns().await?;
        rows.retain(|(p, m), _| {
            let provider_hit = provider.is_none_or(|want| want == p);
            let model_hit = model.is_none_or(|want| want == m);
            !(provider_hit && model_hit)
        });
        self.write_cooldowns(&rows).await
    }
}

#[async_trait]
impl UsageStore for FileStore {
    async fn insert_usage(&self, entry: &UsageLogEntry) -> StoreResult<()> {
        let line = serde_json::to_vec(entry)?;
        let _guard = self.write_lock.lock().await;
        self.append_line(&self.usage_path, &line).await
    }

    async fn finalize_usage(&self, entry: &UsageLogEntry) -> StoreResult<()> {
        // Append-only finalize: last row per request_id wins on read.
        self.insert_usage(entry).await
    }

    async fn insert_error(&self, entry: &ErrorLogEntry) -> StoreResult<()> {
        let line = serde_json::to_vec(entry)?;
        let _guard = self.write_lock.lock().await;
        self.append_line(&self.errors_path, &line).await
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
            consecutive_failures: 2,
            created_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn cooldowns_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path());
            store.upsert(&row("p", "m", 99_999)).await.unwrap();
        }
        let store = FileStore::new(dir.path());
        let live = store.load_live(0).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn load_purges_expired_rows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.upsert(&row("p", "old", 10)).await.unwrap();
        store.upsert(&row("p", "new", 10_000)).await.unwrap();

        let live = store.load_live(100).await.unwrap();
        assert_eq!(live.len(), 1);

        // The purge must be durable, not just filtered on read.
        let reread = store.load_live(0).await.unwrap();
        assert_eq!(reread.len(), 1);
        assert_eq!(reread[0].model, "new");
    }

    #[tokio::test]
    async fn usage_rows_append_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut entry = UsageLogEntry {
            request_id: "req-1".into(),
            timestamp_ms: 0,
            api_key_name: None,
            client_ip: None,
            client_api_type: "chat".into(),
            alias: None,
            provider: "p".into(),
            model: "m".into(),
            target_api_type: "chat".into(),
            streaming: true,
            passthrough: false,
            pending: true,
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: None,
            reasoning_tokens: None,
            latency_ms: 0,
            provider_ttft_ms: None,
            client_ttft_ms: None,
            transformation_overhead_ms: None,
            provider_tokens_per_second: None,
            client_tokens_per_second: None,
            cost: None,
            cost_source: None,
        };
        store.insert_usage(&entry).await.unwrap();
        entry.pending = false;
        entry.output_tokens = 42;
        store.finalize_usage(&entry).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("request_usage.jsonl")).unwrap();
        let rows: Vec<UsageLogEntry> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].pending);
        assert!(!rows[1].pending);
        assert_eq!(rows[1].output_tokens, 42);
    }
}
