#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use carevault_kernel_contracts::appointment::AppointmentId;
use carevault_kernel_contracts::reminder::{notified_state_key, NOTIFIED_STATE_VALUE};

use crate::care_store::StorageError;

/// Durable string key-value store local to one client, in the shape of
/// browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    /// Whether values survive a restart.
    fn is_durable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: BTreeMap<String, String>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

const KV_JOURNAL_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum KvJournalOp {
    Set { key: String, value: String },
    Remove { key: String },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct KvJournalEntry {
    schema_version: u8,
    #[serde(flatten)]
    op: KvJournalOp,
}

impl KvJournalEntry {
    fn v1(op: KvJournalOp) -> Self {
        Self {
            schema_version: KV_JOURNAL_SCHEMA_VERSION,
            op,
        }
    }
}

/// JSON-lines backed store. Every write is appended and synced before the
/// in-memory view changes; opening replays the file.
#[derive(Debug)]
pub struct JournalKeyValueStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JournalKeyValueStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        ensure_journal_file(&path)?;
        let replay = replay_journal(&path)?;
        tracing::debug!(
            path = %path.display(),
            entries = replay.entries.len(),
            "replayed key-value journal"
        );
        let mut store = Self {
            path,
            entries: replay.entries,
        };
        if let Some(line) = replay.torn_line {
            tracing::warn!(
                path = %store.path.display(),
                line,
                "dropping torn final journal line"
            );
            store.compact()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites the journal with one `set` line per live key.
    pub fn compact(&mut self) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("jsonl.compact");
        let mut buf = String::new();
        for (key, value) in &self.entries {
            let entry = KvJournalEntry::v1(KvJournalOp::Set {
                key: key.clone(),
                value: value.clone(),
            });
            buf.push_str(&encode_entry(&self.path, &entry)?);
            buf.push('\n');
        }
        let mut file = File::create(&tmp).map_err(|source| io_err(&tmp, source))?;
        file.write_all(buf.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|source| io_err(&tmp, source))?;
        fs::rename(&tmp, &self.path).map_err(|source| io_err(&self.path, source))?;
        Ok(())
    }

    fn append(&self, op: KvJournalOp) -> Result<(), StorageError> {
        let entry = KvJournalEntry::v1(op);
        let json = encode_entry(&self.path, &entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| io_err(&self.path, source))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_data())
            .map_err(|source| io_err(&self.path, source))
    }
}

impl KeyValueStore for JournalKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.append(KvJournalOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.entries.contains_key(key) {
            return Ok(());
        }
        self.append(KvJournalOp::Remove {
            key: key.to_string(),
        })?;
        self.entries.remove(key);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_entry(path: &Path, entry: &KvJournalEntry) -> Result<String, StorageError> {
    serde_json::to_string(entry).map_err(|err| StorageError::Journal {
        path: path.to_path_buf(),
        line: 0,
        reason: format!("failed to encode entry: {err}"),
    })
}

fn ensure_journal_file(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
    }
    if !path.exists() {
        File::create(path).map_err(|source| io_err(path, source))?;
    }
    Ok(())
}

struct JournalReplay {
    entries: BTreeMap<String, String>,
    /// 1-based line number of an unparseable last line, if any.
    torn_line: Option<usize>,
}

/// An unparseable last line is what a crash inside `append` leaves behind and
/// is skipped; anything unparseable before it is corruption.
fn replay_journal(path: &Path) -> Result<JournalReplay, StorageError> {
    let bytes = fs::read(path).map_err(|source| io_err(path, source))?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| (idx + 1, line))
        .collect();
    let last = lines.last().map(|(line_no, _)| *line_no);

    let mut entries = BTreeMap::new();
    let mut torn_line = None;
    for (line_no, line) in lines {
        let entry: KvJournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) if Some(line_no) == last => {
                torn_line = Some(line_no);
                break;
            }
            Err(err) => {
                return Err(StorageError::Journal {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason: err.to_string(),
                })
            }
        };
        if entry.schema_version != KV_JOURNAL_SCHEMA_VERSION {
            return Err(StorageError::Journal {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("unsupported schema_version={}", entry.schema_version),
            });
        }
        match entry.op {
            KvJournalOp::Set { key, value } => {
                entries.insert(key, value);
            }
            KvJournalOp::Remove { key } => {
                entries.remove(&key);
            }
        }
    }
    Ok(JournalReplay { entries, torn_line })
}

/// Journal-backed store that degrades to process memory when the journal
/// cannot be opened, so reminder bookkeeping never keeps the app from starting.
#[derive(Debug)]
pub enum LocalKeyValueStore {
    Journal(JournalKeyValueStore),
    Volatile(InMemoryKeyValueStore),
}

impl LocalKeyValueStore {
    pub fn open_or_volatile(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match JournalKeyValueStore::open(&path) {
            Ok(store) => Self::Journal(store),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "key-value journal unavailable; reminder flags will not survive restart"
                );
                Self::Volatile(InMemoryKeyValueStore::new())
            }
        }
    }
}

impl KeyValueStore for LocalKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self {
            Self::Journal(s) => s.get(key),
            Self::Volatile(s) => s.get(key),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        match self {
            Self::Journal(s) => s.set(key, value),
            Self::Volatile(s) => s.set(key, value),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match self {
            Self::Journal(s) => s.remove(key),
            Self::Volatile(s) => s.remove(key),
        }
    }

    fn is_durable(&self) -> bool {
        matches!(self, Self::Journal(_))
    }
}

/// Per-appointment "reminder already shown" flags over a [`KeyValueStore`].
/// A key is only ever written with `"true"`; any other value reads as unset.
///
/// Ids marked in this process are also held in memory, so a failed durable
/// write still suppresses repeats until restart.
#[derive(Debug, Clone, Default)]
pub struct NotifiedState<S> {
    store: S,
    marked: BTreeSet<AppointmentId>,
}

impl<S: KeyValueStore> NotifiedState<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            marked: BTreeSet::new(),
        }
    }

    pub fn is_notified(&self, id: &AppointmentId) -> Result<bool, StorageError> {
        if self.marked.contains(id) {
            return Ok(true);
        }
        Ok(self.store.get(&notified_state_key(id))?.as_deref() == Some(NOTIFIED_STATE_VALUE))
    }

    pub fn mark_notified(&mut self, id: &AppointmentId) -> Result<(), StorageError> {
        self.marked.insert(id.clone());
        self.store.set(&notified_state_key(id), NOTIFIED_STATE_VALUE)
    }

    pub fn forget(&mut self, id: &AppointmentId) -> Result<(), StorageError> {
        self.marked.remove(id);
        self.store.remove(&notified_state_key(id))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
