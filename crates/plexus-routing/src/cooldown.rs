use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use plexus_config::ConfigHandle;
use plexus_storage::{CooldownRow, CooldownStore, Event, EventBus};

use crate::now_ms;

type TargetKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct Entry {
    expiry_ms: i64,
    consecutive_failures: u32,
    created_at_ms: i64,
}

/// A live cooldown, as reported by `snapshot()`.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownSnapshotEntry {
    pub provider: String,
    pub model: String,
    pub consecutive_failures: u32,
    pub time_remaining_ms: i64,
}

/// Tracks per-`(provider, model)` failure state with exponential backoff.
///
/// The in-memory map is the authority while the process runs; the store
/// exists to survive restarts. The map mutex is never held across await
/// points: state is mutated under the lock, IO happens after.
pub struct CooldownManager {
    entries: Mutex<HashMap<TargetKey, Entry>>,
    store: Option<Arc<dyn CooldownStore>>,
    config: ConfigHandle,
    events: EventBus,
}

impl CooldownManager {
    pub fn new(
        config: ConfigHandle,
        store: Option<Arc<dyn CooldownStore>>,
        events: EventBus,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
            config,
            events,
        }
    }

    /// Restore persisted cooldowns. Expired rows were already purged by the
    /// store's `load_live`.
    pub async fn restore(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load_live(now_ms()).await {
            Ok(rows) => {
                let count = rows.len();
                let mut guard = lock(&self.entries);
                for row in rows {
                    guard.insert(
                        (row.provider, row.model),
                        Entry {
                            expiry_ms: row.expiry_ms,
                            consecutive_failures: row.consecutive_failures,
                            created_at_ms: row.created_at_ms,
                        },
                    );
                }
                drop(guard);
                if count > 0 {
                    info!(event = "cooldowns_restored", count);
                }
            }
            Err(err) => error!(event = "cooldown_restore_failed", error = %err),
        }
    }

    /// Record a failure; returns the applied cooldown duration in ms.
    ///
    /// Without an explicit duration the n-th consecutive failure cools down
    /// for `min(max, initial * 2^(n-1))`.
    pub async fn mark_failure(
        &self,
        provider: &str,
        model: &str,
        duration_ms: Option<u64>,
    ) -> u64 {
        let snapshot = self.config.snapshot();
        let initial_ms = snapshot.cooldown.initial_ms();
        let max_ms = snapshot.cooldown.max_ms();
        let now = now_ms();

        let (row, duration) = {
            let mut guard = lock(&self.entries);
            let key = (provider.to_string(), model.to_string());
            let previous = guard.get(&key).copied();
            let failures = previous.map(|e| e.consecutive_failures).unwrap_or(0) + 1;
            let duration = duration_ms.unwrap_or_else(|| backoff_ms(initial_ms, max_ms, failures));
            let entry = Entry {
                expiry_ms: now + duration as i64,
                consecutive_failures: failures,
                created_at_ms: previous.map(|e| e.created_at_ms).unwrap_or(now),
            };
            guard.insert(key, entry);
            (
                CooldownRow {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    expiry_ms: entry.expiry_ms,
                    consecutive_failures: entry.consecutive_failures,
                    created_at_ms: entry.created_at_ms,
                },
                duration,
            )
        };

        if let Some(store) = &self.store {
            // Durable before returning; on failure the memory map still
            // stands as the authority for this run.
            if let Err(err) = store.upsert(&row).await {
                error!(event = "cooldown_persist_failed", provider, model, error = %err);
            }
        }
        self.events
            .emit(Event::CooldownStart {
                provider: provider.to_string(),
                model: model.to_string(),
                consecutive_failures: row.consecutive_failures,
                duration_ms: duration,
            })
            .await;
        duration
    }

    /// Remove the entry, resetting the failure count. Idempotent.
    pub async fn mark_success(&self, provider: &str, model: &str) {
        let removed = {
            let mut guard = lock(&self.entries);
            guard
                .remove(&(provider.to_string(), model.to_string()))
                .is_some()
        };
        if !removed {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.delete(provider, model).await {
                error!(event = "cooldown_delete_failed", provider, model, error = %err);
            }
        }
        self.events
            .emit(Event::CooldownEnd {
                provider: provider.to_string(),
                model: model.to_string(),
            })
            .await;
    }

    /// True iff no live entry exists. Providers with `disable_cooldown` in
    /// the *current* config snapshot always pass. Lazily removes expired
    /// entries from memory and store.
    pub async fn is_healthy(&self, provider: &str, model: &str) -> bool {
        if self
            .config
            .snapshot()
            .provider(provider)
            .map(|p| p.disable_cooldown)
            .unwrap_or(false)
        {
            return true;
        }
        let now = now_ms();
        let expired = {
            let mut guard = lock(&self.entries);
            match guard.get(&(provider.to_string(), model.to_string())) {
                None => return true,
                Some(entry) if entry.expiry_ms > now => return false,
                Some(_) => {
                    guard.remove(&(provider.to_string(), model.to_string()));
                    true
                }
            }
        };
        if expired {
            if let Some(store) = &self.store {
                if let Err(err) = store.delete(provider, model).await {
                    error!(event = "cooldown_delete_failed", provider, model, error = %err);
                }
            }
        }
        true
    }

    /// Keep only healthy targets, preserving caller order.
    pub async fn filter_healthy<T>(
        &self,
        targets: Vec<T>,
        key: impl Fn(&T) -> (&str, &str),
    ) -> Vec<T> {
        let mut kept = Vec::with_capacity(targets.len());
        for target in targets {
            let (provider, model) = {
                let (p, m) = key(&target);
                (p.to_string(), m.to_string())
            };
            if self.is_healthy(&provider, &model).await {
                kept.push(target);
            }
        }
        kept
    }

    /// Scoped deletion: everything, one provider, or one key.
    pub async fn clear(&self, provider: Option<&str>, model: Option<&str>) {
        {
            let mut guard = lock(&self.entries);
            guard.retain(|(p, m), _| {
                let provider_hit = provider.is_none_or(|want| want == p);
                let model_hit = model.is_none_or(|want| want == m);
                !(provider_hit && model_hit)
            });
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.clear(provider, model).await {
                error!(event = "cooldown_clear_failed", error = %err);
            }
        }
    }

    /// Live entries with remaining time; expired entries are skipped.
    pub fn snapshot(&self) -> Vec<CooldownSnapshotEntry> {
        let now = now_ms();
        let guard = lock(&self.entries);
        let mut entries: Vec<CooldownSnapshotEntry> = guard
            .iter()
            .filter(|(_, entry)| entry.expiry_ms > now)
            .map(|((provider, model), entry)| CooldownSnapshotEntry {
                provider: provider.clone(),
                model: model.clone(),
                consecutive_failures: entry.consecutive_failures,
                time_remaining_ms: entry.expiry_ms - now,
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.provider.as_str(), a.model.as_str()).cmp(&(b.provider.as_str(), b.model.as_str()))
        });
        entries
    }
}

fn backoff_ms(initial_ms: u64, max_ms: u64, failures: u32) -> u64 {
    let exponent = failures.saturating_sub(1).min(32);
    initial_ms
        .saturating_mul(1u64 << exponent)
        .min(max_ms)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned map mutex means a panic mid-update; the data is plain
    // values, so continuing with it is safe.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_config::{ConfigSnapshot, CooldownConfig};
    use plexus_storage::MemoryStore;

    fn manager_with(
        initial_minutes: u64,
        max_minutes: u64,
        store: Option<Arc<MemoryStore>>,
    ) -> CooldownManager {
        let snapshot = ConfigSnapshot {
            cooldown: CooldownConfig {
                initial_minutes,
                max_minutes,
            },
            ..Default::default()
        };
        CooldownManager::new(
            ConfigHandle::new(snapshot),
            store.map(|s| s as Arc<dyn CooldownStore>),
            EventBus::new(8),
        )
    }

    #[test]
    fn backoff_series_doubles_then_saturates() {
        let initial = 60_000;
        let max = 3_600_000;
        let minutes: Vec<u64> = (1..=7).map(|n| backoff_ms(initial, max, n) / 60_000).collect();
        assert_eq!(minutes, vec![1, 2, 4, 8, 16, 32, 60]);
    }

    #[test]
    fn backoff_saturates_at_high_counts() {
        assert_eq!(backoff_ms(120_000, 18_000_000, 200), 18_000_000);
    }

    #[tokio::test]
    async fn failure_then_success_resets() {
        let manager = manager_with(2, 300, None);
        assert!(manager.is_healthy("p", "m").await);

        let duration = manager.mark_failure("p", "m", None).await;
        assert_eq!(duration, 120_000);
        assert!(!manager.is_healthy("p", "m").await);

        // Sibling models on the same provider stay healthy.
        assert!(manager.is_healthy("p", "m2").await);

        manager.mark_success("p", "m").await;
        assert!(manager.is_healthy("p", "m").await);
        // Counter reset: next failure gets the initial duration again.
        assert_eq!(manager.mark_failure("p", "m", None).await, 120_000);
    }

    #[tokio::test]
    async fn consecutive_failures_double() {
        let manager = manager_with(1, 60, None);
        assert_eq!(manager.mark_failure("p", "m", None).await, 60_000);
        assert_eq!(manager.mark_failure("p", "m", None).await, 120_000);
        assert_eq!(manager.mark_failure("p", "m", None).await, 240_000);
    }

    #[tokio::test]
    async fn explicit_duration_overrides_backoff() {
        let manager = manager_with(2, 300, None);
        assert_eq!(manager.mark_failure("p", "m", Some(20_000)).await, 20_000);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].time_remaining_ms <= 20_000);
        assert!(snapshot[0].time_remaining_ms > 19_000);
    }

    #[tokio::test]
    async fn filter_healthy_preserves_order() {
        let manager = manager_with(2, 300, None);
        manager.mark_failure("b", "m", None).await;
        let targets = vec![("a", "m"), ("b", "m"), ("c", "m")];
        let kept = manager
            .filter_healthy(targets, |t| (t.0, t.1))
            .await;
        assert_eq!(kept, vec![("a", "m"), ("c", "m")]);
    }

    #[tokio::test]
    async fn persists_and_restores() {
        let store = Arc::new(MemoryStore::new());
        {
            let manager = manager_with(2, 300, Some(store.clone()));
            manager.mark_failure("p", "m", None).await;
            manager.mark_failure("p", "m", None).await;
        }
        let manager = manager_with(2, 300, Some(store));
        manager.restore().await;
        assert!(!manager.is_healthy("p", "m").await);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn disable_cooldown_bypasses_check() {
        let yaml = r#"
providers:
  free:
    api_base_url: https://free.example
    disable_cooldown: true
"#;
        let manager = CooldownManager::new(
            ConfigHandle::new(ConfigSnapshot::from_yaml(yaml).unwrap()),
            None,
            EventBus::new(8),
        );
        manager.mark_failure("free", "m", None).await;
        assert!(manager.is_healthy("free", "m").await);
    }
}
