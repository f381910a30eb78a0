//! On-disk state: per-host commit checkpoints and saved sessions.
//!
//! A checkpoint records the digest of the last committed config per
//! host so `--lazy` can skip a device whose desired config has not
//! changed. Sessions keep the last login cookie per host so repeat runs
//! can reuse it instead of logging in again (some devices allow only
//! one admin session at a time).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vlansync_core::Config;
use vlansync_driver::SessionState;

const CHECKPOINT_FILE: &str = "checkpoints.json";
const SESSION_FILE: &str = "sessions.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    cksum: String,
    time: DateTime<Utc>,
}

/// Directory-backed store under the user cache dir.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Opens (creating if needed) the default store at
    /// `<cache_dir>/vlansyncd`.
    pub fn open_default() -> Result<Self> {
        let base = dirs::cache_dir().context("no cache directory for this user")?;
        Self::open(base.join("vlansyncd"))
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating state directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Digest of a config's canonical JSON form.
    pub fn digest(config: &Config) -> Result<String> {
        let encoded = serde_json::to_vec(config).context("encoding config")?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    /// Returns the commit time if `config` matches the checkpoint
    /// recorded for `host`.
    pub fn unchanged_since(&self, host: &str, config: &Config) -> Result<Option<DateTime<Utc>>> {
        let checkpoints: BTreeMap<String, Checkpoint> = self.load(CHECKPOINT_FILE)?;
        let digest = Self::digest(config)?;
        Ok(checkpoints
            .get(host)
            .filter(|checkpoint| checkpoint.cksum == digest)
            .map(|checkpoint| checkpoint.time))
    }

    /// Records `config` as committed to `host` now.
    pub fn record_commit(&self, host: &str, config: &Config) -> Result<()> {
        let mut checkpoints: BTreeMap<String, Checkpoint> = self.load(CHECKPOINT_FILE)?;
        checkpoints.insert(
            host.to_string(),
            Checkpoint {
                cksum: Self::digest(config)?,
                time: Utc::now(),
            },
        );
        self.save(CHECKPOINT_FILE, &checkpoints)
    }

    pub fn load_session(&self, host: &str) -> Result<Option<SessionState>> {
        let mut sessions: BTreeMap<String, SessionState> = self.load(SESSION_FILE)?;
        Ok(sessions.remove(host))
    }

    pub fn save_session(&self, host: &str, session: &SessionState) -> Result<()> {
        let mut sessions: BTreeMap<String, SessionState> = self.load(SESSION_FILE)?;
        sessions.insert(host.to_string(), session.clone());
        self.save(SESSION_FILE, &sessions)
    }

    fn load<T: Default + for<'de> Deserialize<'de>>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes =
            fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(value).context("encoding state")?;
        write_atomic(&path, &bytes)
    }
}

/// Writes via a sibling temp file and rename so a crash never leaves a
/// truncated state file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vlansync_core::PortPlan;

    fn sample() -> Config {
        let plans = BTreeMap::from([(1, PortPlan::access(1)), (2, PortPlan::access(12))]);
        Config::from_plans(&plans).unwrap()
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let config = sample();

        assert_eq!(store.unchanged_since("sw1", &config).unwrap(), None);
        store.record_commit("sw1", &config).unwrap();
        assert!(store.unchanged_since("sw1", &config).unwrap().is_some());
        // Other hosts are unaffected.
        assert_eq!(store.unchanged_since("sw2", &config).unwrap(), None);
    }

    #[test]
    fn test_changed_config_misses_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.record_commit("sw1", &sample()).unwrap();

        let plans = BTreeMap::from([(1, PortPlan::access(12)), (2, PortPlan::access(12))]);
        let changed = Config::from_plans(&plans).unwrap();
        assert_eq!(store.unchanged_since("sw1", &changed).unwrap(), None);
    }

    #[test]
    fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.load_session("sw1").unwrap(), None);

        let session = SessionState {
            cookie: Some("SID=abc123".to_string()),
        };
        store.save_session("sw1", &session).unwrap();
        assert_eq!(store.load_session("sw1").unwrap(), Some(session));
    }
}
