// =============================================================================
// Strategy state persistence
// =============================================================================
//
// Ported from `StrategyStateManager`: the Python original keys each strategy's
// serialized state under `strategy_state:<id>` in Redis with a 24-hour
// (`setex(key, 86400, ...)`) expiry, plus a separate `active_strategies` set
// mirroring which strategies are RUNNING. There is no Redis dependency here,
// so each strategy's state lands in its own file under `state_dir`, atomically
// written the same way `CoreConfig::save` writes its config file, with the
// save timestamp recorded alongside the payload so a load can tell whether the
// entry has outlived its TTL.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::StrategyInstance;

/// TTL a persisted strategy state remains valid for, mirroring the Python
/// original's `setex(key, 86400, ...)`.
pub const STATE_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    instance: StrategyInstance,
    saved_at: DateTime<Utc>,
}

/// File-backed strategy state store, one file per strategy plus an
/// `active_strategies.json` index.
pub struct StrategyStateStore {
    state_dir: PathBuf,
}

impl StrategyStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
        Ok(Self { state_dir })
    }

    fn state_path(&self, strategy_id: &str) -> PathBuf {
        self.state_dir.join(format!("{strategy_id}.json"))
    }

    fn active_index_path(&self) -> PathBuf {
        self.state_dir.join("active_strategies.json")
    }

    /// Persist an instance's full state, atomically.
    pub fn save_state(&self, instance: &StrategyInstance) -> Result<()> {
        let persisted = PersistedState {
            instance: instance.clone(),
            saved_at: Utc::now(),
        };
        let path = self.state_path(instance.id());
        atomic_write_json(&path, &persisted)?;

        if instance.status == crate::types::StrategyStatus::Running {
            self.add_active(instance.id())?;
        } else {
            self.remove_active(instance.id())?;
        }

        Ok(())
    }

    /// Load a previously persisted instance. Returns `Ok(None)` both when no
    /// state file exists and when the entry has outlived `STATE_TTL_SECS` —
    /// callers treat either case as "start fresh".
    pub fn load_state(&self, strategy_id: &str) -> Result<Option<StrategyInstance>> {
        let path = self.state_path(strategy_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        let persisted: PersistedState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state file {}", path.display()))?;

        let age = Utc::now().signed_duration_since(persisted.saved_at);
        if age.num_seconds() > STATE_TTL_SECS {
            tracing::warn!(strategy_id, age_secs = age.num_seconds(), "persisted strategy state expired, discarding");
            return Ok(None);
        }

        Ok(Some(persisted.instance))
    }

    pub fn delete_state(&self, strategy_id: &str) -> Result<()> {
        let path = self.state_path(strategy_id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove state file {}", path.display()))?;
        }
        self.remove_active(strategy_id)?;
        Ok(())
    }

    pub fn get_active_strategies(&self) -> Result<Vec<String>> {
        Ok(self.read_active_index()?)
    }

    fn read_active_index(&self) -> Result<Vec<String>> {
        let path = self.active_index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read active index {}", path.display()))?;
        let ids: Vec<String> = serde_json::from_str(&content).unwrap_or_default();
        Ok(ids)
    }

    fn add_active(&self, strategy_id: &str) -> Result<()> {
        let mut ids = self.read_active_index()?;
        if !ids.iter().any(|id| id == strategy_id) {
            ids.push(strategy_id.to_string());
            atomic_write_json(&self.active_index_path(), &ids)?;
        }
        Ok(())
    }

    fn remove_active(&self, strategy_id: &str) -> Result<()> {
        let mut ids = self.read_active_index()?;
        let before = ids.len();
        ids.retain(|id| id != strategy_id);
        if ids.len() != before {
            atomic_write_json(&self.active_index_path(), &ids)?;
        }
        Ok(())
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("failed to serialise state to JSON")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp state to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp state to {}", path.display()))?;
    Ok(())
}
