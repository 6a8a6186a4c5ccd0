use crate::memory::InMemoryRepository;
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tinylink_core::repository::{
    Closer, Deleter, Pinger, Retriever, Saver, Stats, StatsRetriever, UrlRecord,
};
use tinylink_core::{Result, ShortCode, StorageError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

type Journal = BufWriter<File>;

#[derive(Debug)]
enum JournalState {
    Open(Journal),
    /// A write or rewrite failed; the file may not match the cache.
    Broken,
    Closed,
}

/// Append-only journal backed repository.
///
/// Every record is stored as one JSON object per line. The journal is replayed
/// into an [`InMemoryRepository`] on open and all reads are served from that
/// cache. Writes append to the journal and flush before the cache is updated,
/// so a record is never visible before it is durable.
///
/// Deletions rewrite the journal with the tombstones applied: the state of
/// every record is written to a temporary file which atomically replaces the
/// journal. The cache is only tombstoned once the rewrite has succeeded.
///
/// After a failed write the journal is rebuilt from the cache by the next
/// operation that needs it, which discards any partially written lines.
///
/// A single mutex guards the journal handle; appends and rewrites never
/// interleave. Reads do not take the lock.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    cache: InMemoryRepository,
    journal: Mutex<JournalState>,
}

impl FileRepository {
    /// Opens the journal at `path`, creating it (and its parent directories)
    /// if missing, and replays it into memory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let cache = InMemoryRepository::new();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        let replayed = replay(&path, file, &cache).await?;

        info!(path = %path.display(), replayed, records = cache.len(), "opened journal");

        let journal = open_for_append(&path).await?;
        Ok(Self {
            path,
            cache,
            journal: Mutex::new(JournalState::Open(journal)),
        })
    }

    /// Returns the path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the open journal, rebuilding it from the cache if a previous
    /// write failed.
    async fn writer<'a>(&self, state: &'a mut JournalState) -> Result<&'a mut Journal> {
        match *state {
            JournalState::Closed => return Err(StorageError::Closed),
            JournalState::Broken => {
                warn!(path = %self.path.display(), "rebuilding journal after failed write");
                self.rewrite(state, &self.cache.snapshot()).await?;
            }
            JournalState::Open(_) => {}
        }

        match state {
            JournalState::Open(journal) => Ok(journal),
            _ => Err(StorageError::Closed),
        }
    }

    /// Replaces the journal with exactly `records` and reopens it for
    /// appending. On failure the state is left `Broken`.
    ///
    /// Must be called with the journal lock held.
    async fn rewrite(&self, state: &mut JournalState, records: &[UrlRecord]) -> Result<()> {
        *state = JournalState::Broken;
        let tmp_path = tmp_path(&self.path);

        if let Err(e) = write_snapshot(&tmp_path, records).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        *state = JournalState::Open(open_for_append(&self.path).await?);
        info!(path = %self.path.display(), records = records.len(), "rewrote journal");
        Ok(())
    }

    /// Appends `records` and flushes. A failure marks the journal `Broken`.
    async fn append(&self, state: &mut JournalState, records: &[&UrlRecord]) -> Result<()> {
        let journal = self.writer(state).await?;

        let mut written = Ok(());
        for record in records {
            written = write_line(journal, record).await;
            if written.is_err() {
                break;
            }
        }
        if written.is_ok() {
            written = journal.flush().await.map_err(StorageError::from);
        }

        if let Err(e) = written {
            error!(path = %self.path.display(), error = %e, "journal append failed");
            *state = JournalState::Broken;
            return Err(e);
        }
        Ok(())
    }
}

async fn replay(path: &Path, file: File, cache: &InMemoryRepository) -> Result<usize> {
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut replayed = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: UrlRecord = serde_json::from_str(&line).map_err(|e| {
            StorageError::InvalidData(format!("{}:{}: {}", path.display(), line_no, e))
        })?;
        cache.restore(record);
        replayed += 1;
    }

    Ok(replayed)
}

async fn open_for_append(path: &Path) -> Result<Journal> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(BufWriter::new(file))
}

async fn write_snapshot(path: &Path, records: &[UrlRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path).await?);
    for record in records {
        write_line(&mut writer, record).await?;
    }
    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    Ok(())
}

async fn write_line(writer: &mut Journal, record: &UrlRecord) -> Result<()> {
    let mut line = serde_json::to_vec(record)
        .map_err(|e| StorageError::InvalidData(format!("failed to encode record: {e}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl Saver for FileRepository {
    async fn save(&self, record: &UrlRecord) -> Result<()> {
        let mut guard = self.journal.lock().await;
        if matches!(*guard, JournalState::Closed) {
            return Err(StorageError::Closed);
        }

        if self.cache.contains(&record.short_code) {
            return Err(StorageError::AlreadyExists(record.short_code.to_string()));
        }

        self.append(&mut guard, &[record]).await?;
        self.cache.insert_if_absent(record);

        trace!(code = %record.short_code, "appended record");
        Ok(())
    }

    async fn save_many(&self, records: &[UrlRecord]) -> Result<()> {
        let mut guard = self.journal.lock().await;
        if matches!(*guard, JournalState::Closed) {
            return Err(StorageError::Closed);
        }

        let mut seen = HashSet::new();
        let fresh: Vec<&UrlRecord> = records
            .iter()
            .filter(|r| !self.cache.contains(&r.short_code))
            .filter(|r| seen.insert(r.short_code.clone()))
            .collect();

        if fresh.is_empty() {
            return Ok(());
        }

        self.append(&mut guard, &fresh).await?;
        for record in &fresh {
            self.cache.insert_if_absent(record);
        }

        debug!(requested = records.len(), appended = fresh.len(), "appended batch");
        Ok(())
    }
}

#[async_trait]
impl Retriever for FileRepository {
    async fn get(&self, code: &ShortCode) -> Result<String> {
        self.cache.get(code).await
    }

    async fn get_all(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        self.cache.get_all(owner_id).await
    }
}

#[async_trait]
impl Deleter for FileRepository {
    async fn delete_many(&self, owner_id: &str, codes: &[ShortCode]) -> Result<()> {
        let mut guard = self.journal.lock().await;
        if matches!(*guard, JournalState::Closed) {
            return Err(StorageError::Closed);
        }

        let deletable = self.cache.deletable(owner_id, codes);
        if deletable.is_empty() {
            trace!(owner = %owner_id, "nothing to delete");
            return Ok(());
        }

        let targets: HashSet<&str> = deletable.iter().map(ShortCode::as_str).collect();
        let mut records = self.cache.snapshot();
        for record in &mut records {
            if targets.contains(record.short_code.as_str()) {
                record.deleted = true;
            }
        }

        if let Err(e) = self.rewrite(&mut guard, &records).await {
            error!(path = %self.path.display(), error = %e, "journal rewrite failed");
            return Err(e);
        }
        let changed = self.cache.tombstone(owner_id, &deletable);

        debug!(owner = %owner_id, changed, "deleted records");
        Ok(())
    }
}

#[async_trait]
impl Pinger for FileRepository {
    async fn ping(&self) -> Result<()> {
        let mut guard = self.journal.lock().await;
        self.writer(&mut guard).await?;
        fs::metadata(&self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StatsRetriever for FileRepository {
    async fn stats(&self) -> Result<Stats> {
        self.cache.stats().await
    }
}

#[async_trait]
impl Closer for FileRepository {
    async fn close(&self) -> Result<()> {
        let mut guard = self.journal.lock().await;
        match std::mem::replace(&mut *guard, JournalState::Closed) {
            JournalState::Open(mut journal) => {
                journal.flush().await?;
                journal.get_ref().sync_all().await?;
                info!(path = %self.path.display(), "closed journal");
            }
            JournalState::Broken => {
                warn!(path = %self.path.display(), "closed journal after failed write");
            }
            JournalState::Closed => {}
        }
        Ok(())
    }
}
