use bytes::Bytes;
use relay_core::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Separator written after every record body.
pub const RECORD_SEPARATOR: u8 = b'\n';

/// The active log file and its in-session event counter.
///
/// All mutation goes through one exclusive hold on the file handle: either a
/// single [`append`](Self::append) or a whole [`drain`](Self::drain) /
/// [`Drain::reset`] sequence. Size and count are mirrored in atomics so they
/// can be read without waiting behind a rotation.
pub struct AppendLog {
    path: PathBuf,
    file: Mutex<File>,
    size: AtomicU64,
    events: AtomicU64,
}

impl AppendLog {
    /// Opens the log, creating it and its parent directory when absent.
    ///
    /// Content left by a previous run is kept and will go out with the next
    /// rotation. The event counter always starts at zero.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        if size > 0 {
            info!(path = %path.display(), bytes = size, "Append log has content from a previous run");
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            size: AtomicU64::new(size),
            events: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Records appended since the last successful rotation.
    pub fn event_count(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    /// Appends one record body followed by the separator.
    ///
    /// The body and separator go out in a single write. If the write fails
    /// part way the file is cut back to its previous length so that only
    /// whole records remain. Returns the updated event counter.
    pub async fn append(&self, record: &[u8]) -> Result<u64> {
        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(RECORD_SEPARATOR);

        let mut file = self.file.lock().await;
        let before = self.size.load(Ordering::Acquire);

        if let Err(e) = write_line(&mut file, &line).await {
            warn!(path = %self.path.display(), error = %e, "Append failed, restoring previous length");
            if let Err(restore) = file.set_len(before).await {
                warn!(path = %self.path.display(), error = %restore, "Could not restore log length");
            }
            return Err(e.into());
        }

        self.size.store(before + line.len() as u64, Ordering::Release);
        let events = self.events.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(events)
    }

    /// Takes exclusive hold of the log and reads its full content.
    ///
    /// Returns `None` when the log is empty. While the returned [`Drain`] is
    /// alive no append can proceed. Dropping it without calling
    /// [`Drain::reset`] leaves the content in place.
    pub async fn drain(&self) -> Result<Option<Drain<'_>>> {
        let file = self.file.lock().await;

        if self.size.load(Ordering::Acquire) == 0 {
            return Ok(None);
        }

        let contents = Bytes::from(tokio::fs::read(&self.path).await?);
        if contents.is_empty() {
            return Ok(None);
        }

        Ok(Some(Drain {
            log: self,
            file,
            events: self.events.load(Ordering::Acquire),
            contents,
        }))
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Exclusive hold on a non-empty log for one rotation.
pub struct Drain<'a> {
    log: &'a AppendLog,
    file: MutexGuard<'a, File>,
    events: u64,
    contents: Bytes,
}

impl Drain<'_> {
    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    /// Event counter at the moment of the drain.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Path of the log being drained. Its content is unchanged until reset.
    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Truncates the log and zeroes the counter, then releases the hold.
    /// Returns the number of bytes discarded.
    pub async fn reset(self) -> Result<u64> {
        let discarded = self.contents.len() as u64;

        self.file.set_len(0).await?;
        self.file.sync_data().await?;

        self.log.size.store(0, Ordering::Release);
        self.log.events.store(0, Ordering::Release);

        debug!(path = %self.log.path.display(), bytes = discarded, events = self.events, "Append log reset");
        Ok(discarded)
    }
}
