//! Snapshot storage for breaker state across restarts.
//!
//! Adapters are only touched at checkpoints (startup restore, shutdown
//! save), never on the call path.

use crate::circuit_breaker::types::{BreakerConfig, CircuitState};
use crate::error::{BreakerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persistent view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Failure timestamps still in the window when the snapshot was taken
    #[serde(default)]
    pub failures: Vec<DateTime<Utc>>,
    pub trip_time: Option<DateTime<Utc>>,
    pub config: BreakerConfig,
    pub saved_at: DateTime<Utc>,
}

/// Storage for breaker snapshots
pub trait PersistenceAdapter: Send + Sync + Debug {
    /// Load the snapshot stored for `name`, if any
    fn load(&self, name: &str) -> Result<Option<BreakerSnapshot>>;

    /// Store `snapshot` under `name`, replacing any previous one
    fn save(&self, name: &str, snapshot: &BreakerSnapshot) -> Result<()>;

    /// Names of every stored breaker
    fn names(&self) -> Result<Vec<String>>;
}

/// In-process snapshot store
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, BreakerSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<BreakerSnapshot>> {
        Ok(self.snapshots.lock().get(name).cloned())
    }

    fn save(&self, name: &str, snapshot: &BreakerSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.snapshots.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// One JSON file per breaker under a directory
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

const SNAPSHOT_EXTENSION: &str = "json";

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            BreakerError::Persistence(format!(
                "Failed to create snapshot directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        info!(dir = %dir.display(), "Opened breaker snapshot store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_name(name), SNAPSHOT_EXTENSION))
    }
}

impl PersistenceAdapter for JsonFileStore {
    fn load(&self, name: &str) -> Result<Option<BreakerSnapshot>> {
        let path = self.path_for(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: BreakerSnapshot = serde_json::from_str(&content)?;
        if snapshot.name != name {
            return Err(BreakerError::Persistence(format!(
                "Snapshot {} belongs to '{}', expected '{}'",
                path.display(),
                snapshot.name,
                name
            )));
        }

        debug!(breaker = name, path = %path.display(), "Loaded breaker snapshot");
        Ok(Some(snapshot))
    }

    fn save(&self, name: &str, snapshot: &BreakerSnapshot) -> Result<()> {
        let path = self.path_for(name);
        let tmp = path.with_extension(format!("{}.tmp", SNAPSHOT_EXTENSION));

        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        debug!(breaker = name, path = %path.display(), "Saved breaker snapshot");
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_name(stem) {
                Some(name) => names.push(name),
                None => warn!(path = %path.display(), "Skipping unrecognised snapshot file"),
            }
        }
        names.sort();
        Ok(names)
    }
}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so any name maps to a
/// distinct, file-safe stem
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if is_safe(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else if is_safe(bytes[i]) {
            decoded.push(bytes[i]);
            i += 1;
        } else {
            return None;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot(name: &str) -> BreakerSnapshot {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        BreakerSnapshot {
            name: name.to_string(),
            state: CircuitState::Open,
            failures: vec![],
            trip_time: Some(t),
            config: BreakerConfig::default(),
            saved_at: t,
        }
    }

    #[test]
    fn test_name_encoding_round_trips() {
        for name in ["claude-agent", "agent/../etc", "ünïcode name", ".", "a%b"] {
            let encoded = encode_name(name);
            assert!(encoded.bytes().all(|b| is_safe(b) || b == b'%'));
            assert_eq!(decode_name(&encoded).as_deref(), Some(name));
        }
        assert_ne!(encode_name("a/b"), encode_name("a_b"));
        assert_eq!(decode_name("bad.name"), None);
        assert_eq!(decode_name("trunc%4"), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load("agent").unwrap().is_none());

        store.save("agent", &snapshot("agent")).unwrap();
        assert_eq!(store.load("agent").unwrap(), Some(snapshot("agent")));
        assert_eq!(store.names().unwrap(), vec!["agent".to_string()]);
    }

    #[test]
    fn test_json_file_store_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("breakers")).unwrap();

        store.save("review/agent", &snapshot("review/agent")).unwrap();
        store.save("planner", &snapshot("planner")).unwrap();

        let loaded = store.load("review/agent").unwrap().unwrap();
        assert_eq!(loaded, snapshot("review/agent"));
        assert!(store.load("missing").unwrap().is_none());
        assert_eq!(
            store.names().unwrap(),
            vec!["planner".to_string(), "review/agent".to_string()]
        );
    }

    #[test]
    fn test_json_file_store_overwrites_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let mut snap = snapshot("agent");
        store.save("agent", &snap).unwrap();
        snap.state = CircuitState::HalfOpen;
        store.save("agent", &snap).unwrap();

        assert_eq!(store.load("agent").unwrap().unwrap().state, CircuitState::HalfOpen);
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_json_file_store_rejects_mismatched_name() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        store.save("agent", &snapshot("someone-else")).unwrap();
        let err = store.load("agent").unwrap_err();
        assert!(matches!(err, BreakerError::Persistence(_)));
    }

    #[test]
    fn test_json_file_store_reports_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        fs::write(dir.path().join("agent.json"), "{ not json").unwrap();
        let err = store.load("agent").unwrap_err();
        assert!(matches!(err, BreakerError::Serialization(_)));
    }
}
