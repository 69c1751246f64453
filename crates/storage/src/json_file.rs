// JSON file tables
//
// Each store keeps an `id -> record` map in memory, mirrored to one pretty
// JSON object on disk. The CLI and a running daemon may both write the same
// file, so every access first checks whether the file changed since this
// process last read or wrote it and, if so, merges the disk content in.
// Writes go to a temporary file that is renamed over the target, and the
// in-memory map only changes once that rename succeeded.

use overseer_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Combines a record read from disk with this process's copy of it, if any
pub(crate) type Merge<T> = fn(disk: T, memory: Option<T>) -> T;

/// What identifies one version of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    async fn read(path: &Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

pub(crate) struct Snapshot<T> {
    pub(crate) records: HashMap<Uuid, T>,
    stamp: Option<FileStamp>,
}

pub(crate) struct JsonTable<T> {
    path: PathBuf,
    merge: Merge<T>,
    state: Mutex<Snapshot<T>>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    pub(crate) fn open(path: impl AsRef<Path>, merge: Merge<T>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = load_map(&path)?;
        let stamp = std::fs::metadata(&path).ok().and_then(|meta| {
            Some(FileStamp {
                modified: meta.modified().ok()?,
                len: meta.len(),
            })
        });
        Ok(Self {
            path,
            merge,
            state: Mutex::new(Snapshot { records, stamp }),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the table, picking up changes other processes made to the file.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Snapshot<T>> {
        let mut snapshot = self.state.lock().await;
        self.refresh(&mut snapshot).await;
        snapshot
    }

    /// Persist `next` and make it the current content. On error the snapshot
    /// is left as it was.
    pub(crate) async fn commit(
        &self,
        snapshot: &mut Snapshot<T>,
        next: HashMap<Uuid, T>,
    ) -> Result<()> {
        write_map(&self.path, &next).await?;
        snapshot.records = next;
        snapshot.stamp = FileStamp::read(&self.path).await;
        Ok(())
    }

    async fn refresh(&self, snapshot: &mut Snapshot<T>) {
        let Some(stamp) = FileStamp::read(&self.path).await else {
            return;
        };
        if snapshot.stamp == Some(stamp) {
            return;
        }

        let disk: HashMap<Uuid, T> = match read_map(&self.path).await {
            Ok(disk) => disk,
            Err(e) => {
                tracing::warn!("Keeping in-memory copy, cannot read {:?}: {}", self.path, e);
                return;
            }
        };
        let mut memory = std::mem::take(&mut snapshot.records);
        snapshot.records = disk
            .into_iter()
            .map(|(id, record)| {
                let kept = memory.remove(&id);
                (id, (self.merge)(record, kept))
            })
            .collect();
        snapshot.stamp = Some(stamp);
        tracing::info!(
            "Reloaded {:?} after an external change ({} records, {} dropped)",
            self.path,
            snapshot.records.len(),
            memory.len()
        );
    }
}

/// Read an `id -> record` JSON object, creating an empty file (and its
/// parent directories) when it does not exist yet.
pub(crate) fn load_map<T: DeserializeOwned>(path: &Path) -> Result<HashMap<Uuid, T>> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, "{}")?;
    }

    let content = std::fs::read_to_string(path)?;
    parse_map(&content)
}

async fn read_map<T: DeserializeOwned>(path: &Path) -> Result<HashMap<Uuid, T>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_map(&content)
}

fn parse_map<T: DeserializeOwned>(content: &str) -> Result<HashMap<Uuid, T>> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(content)?)
}

async fn write_map<T: Serialize>(path: &Path, map: &HashMap<Uuid, T>) -> Result<()> {
    let content = serde_json::to_string_pretty(map)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
