#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::completion::{Payload, WriteOutcome, WriteRequest, WriteTicket};
use super::{JournalCounters, JournalOptions, JournalStats, JournalWriter};
use crate::primitives::concurrency::FileLock;
use crate::primitives::io::{FileIo, OpenMode, StdFileIo};
use crate::primitives::pager::{MmapPager, VirtualPager};
use crate::types::{Result, VaultError};

/// Journal writer over a preallocated, exclusively locked file.
///
/// Writes are queued and executed by `io_workers` dedicated threads. Each
/// request is one vectored positioned write, so the caller never blocks past
/// submission. Requests to disjoint ranges complete in no particular order;
/// callers serialise writes that overlap.
///
/// Dropping the writer runs [`JournalWriter::dispose`], which joins the
/// worker threads. Dispose or drop it from a blocking context, not from an
/// async runtime thread.
pub struct FileJournalWriter {
    path: PathBuf,
    options: JournalOptions,
    allocated_pages: u64,
    shared: Arc<Shared>,
    handle: Mutex<Option<Handle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    queue: Mutex<QueueState>,
    wakeup: Condvar,
    disposed: AtomicBool,
    counters: JournalCounters,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WriteRequest>,
    closed: bool,
}

struct Handle {
    io: Arc<dyn FileIo>,
    file: StdFileIo,
    lock: FileLock,
}

impl FileJournalWriter {
    /// Opens or creates the journal at `path` and starts the I/O workers.
    ///
    /// The file is extended to `journal_size` if it is shorter and is never
    /// shrunk. Fails with [`VaultError::JournalLocked`] when another writer
    /// holds the file.
    pub fn open(path: impl AsRef<Path>, options: JournalOptions) -> Result<Self> {
        let writer = Self::open_unstarted(path.as_ref(), options)?;
        writer.start_workers()?;
        info!(
            path = %writer.path.display(),
            page_size = writer.options.page_size,
            journal_size = writer.options.journal_size,
            write_through = writer.options.write_through,
            io_workers = writer.options.io_workers,
            "journal.writer.open"
        );
        Ok(writer)
    }

    fn open_unstarted(path: &Path, options: JournalOptions) -> Result<Self> {
        Self::open_unstarted_with(path, options, |file| -> Arc<dyn FileIo> {
            Arc::new(file)
        })
    }

    /// Opens the journal and routes every write through the I/O returned by
    /// `wrap`, which receives the locked file.
    fn open_unstarted_with(
        path: &Path,
        options: JournalOptions,
        wrap: impl FnOnce(StdFileIo) -> Arc<dyn FileIo>,
    ) -> Result<Self> {
        options.validate()?;
        let file = StdFileIo::open_with(
            path,
            OpenMode {
                write_through: options.write_through,
            },
        )
        .map_err(locked_on_sharing_violation)?;
        let lock =
            FileLock::try_exclusive(file.shared_file())?.ok_or(VaultError::JournalLocked)?;
        let io = wrap(file.clone());
        let existing = io.len()?;
        // Always reserve: an existing journal of the right length may be sparse.
        io.preallocate(options.journal_size)?;
        io.sync_all()?;
        debug!(
            from = existing,
            to = existing.max(options.journal_size),
            "journal.writer.preallocate"
        );
        let allocated_pages = options.journal_size / options.page_size as u64;
        let workers = Vec::with_capacity(options.io_workers);
        Ok(Self {
            path: path.to_path_buf(),
            options,
            allocated_pages,
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState::default()),
                wakeup: Condvar::new(),
                disposed: AtomicBool::new(false),
                counters: JournalCounters::default(),
            }),
            handle: Mutex::new(Some(Handle {
                io,
                file,
                lock,
            })),
            workers: Mutex::new(workers),
        })
    }

    fn start_workers(&self) -> Result<()> {
        let io = match self.handle.lock().as_ref() {
            Some(handle) => Arc::clone(&handle.io),
            None => return Err(VaultError::Disposed("journal writer")),
        };
        // Without write-through the worker syncs after every write instead.
        let sync_after_write = !self.options.write_through;
        let mut workers = self.workers.lock();
        for worker in 0..self.options.io_workers {
            let shared = Arc::clone(&self.shared);
            let io = Arc::clone(&io);
            let handle = thread::Builder::new()
                .name(format!("pagevault-journal-io-{worker}"))
                .spawn(move || worker_loop(shared, io, worker, sync_after_write))
                .map_err(VaultError::from)?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options the writer was opened with.
    pub fn options(&self) -> &JournalOptions {
        &self.options
    }

    /// Preallocated journal length in bytes.
    pub fn journal_size(&self) -> u64 {
        self.options.journal_size
    }

    /// Snapshot of the write counters.
    pub fn stats(&self) -> JournalStats {
        self.shared.counters.snapshot()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(VaultError::Disposed("journal writer"));
        }
        Ok(())
    }

    fn check_range(&self, position: u64, len: u64) -> Result<()> {
        let page_size = self.options.page_size;
        if position % page_size as u64 != 0 {
            return Err(VaultError::Misaligned {
                position,
                page_size,
            });
        }
        let journal_size = self.options.journal_size;
        match position.checked_add(len) {
            Some(end) if end <= journal_size => Ok(()),
            _ => Err(VaultError::WriteOutOfBounds {
                position,
                len,
                journal_size,
            }),
        }
    }

    fn submit(&self, position: u64, payload: Payload) -> Result<WriteTicket> {
        let (request, ticket) = WriteRequest::new(position, payload);
        let len = request.len();
        let slices = request.descriptor_count();
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(VaultError::Disposed("journal writer"));
            }
            queue.pending.push_back(request);
            self.shared
                .counters
                .writes_submitted
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                position,
                len,
                slices,
                pending = queue.pending.len(),
                "journal.writer.submit"
            );
        }
        self.shared.wakeup.notify_one();
        Ok(ticket)
    }
}

impl JournalWriter for FileJournalWriter {
    fn write_gather(&self, position: u64, pages: Vec<Bytes>) -> Result<WriteTicket> {
        self.ensure_live()?;
        if pages.is_empty() {
            return Err(VaultError::Invalid("gather write needs at least one page"));
        }
        let page_size = self.options.page_size;
        if let Some(page) = pages.iter().find(|page| page.len() != page_size) {
            return Err(VaultError::PageSizeMismatch {
                expected: page_size,
                actual: page.len(),
            });
        }
        let len = (pages.len() as u64)
            .checked_mul(page_size as u64)
            .ok_or(VaultError::Invalid("gather length overflows u64"))?;
        self.check_range(position, len)?;
        self.submit(position, Payload::Gather(pages))
    }

    fn write(&self, position: u64, buffer: Bytes) -> Result<WriteTicket> {
        self.ensure_live()?;
        if buffer.is_empty() {
            return Err(VaultError::Invalid("journal write needs a non-empty buffer"));
        }
        self.check_range(position, buffer.len() as u64)?;
        self.submit(position, Payload::Single(buffer))
    }

    fn number_of_allocated_pages(&self) -> u64 {
        self.allocated_pages
    }

    fn page_size(&self) -> usize {
        self.options.page_size
    }

    fn create_pager(&self) -> Result<Box<dyn VirtualPager>> {
        self.ensure_live()?;
        let file = match self.handle.lock().as_ref() {
            Some(handle) => handle.file.try_clone_file()?,
            None => return Err(VaultError::Disposed("journal writer")),
        };
        let pager = MmapPager::with_fixed_len(file, self.options.pager_options())?;
        debug!(
            file_pages = pager.file_pages(),
            "journal.writer.create_pager"
        );
        Ok(Box::new(pager))
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let canceled: Vec<WriteRequest> = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            queue.pending.drain(..).collect()
        };
        self.shared.wakeup.notify_all();
        if !canceled.is_empty() {
            warn!(
                canceled = canceled.len(),
                "journal.writer.dispose_canceled_pending"
            );
        }
        for request in canceled {
            self.shared
                .counters
                .writes_canceled
                .fetch_add(1, Ordering::Relaxed);
            request.complete(Ok(WriteOutcome::Canceled));
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for (worker, handle) in workers.into_iter().enumerate() {
            if handle.join().is_err() {
                warn!(worker, "journal.writer.worker_panicked");
            }
        }
        // Workers are gone; release the lock, then drop the last file handle.
        if let Some(Handle { io, file, lock }) = self.handle.lock().take() {
            drop(io);
            if let Err(err) = lock.release() {
                warn!(error = %err, "journal.writer.unlock_failed");
            }
            drop(file);
        }
        let stats = self.stats();
        info!(
            path = %self.path.display(),
            writes_durable = stats.writes_durable,
            writes_failed = stats.writes_failed,
            writes_canceled = stats.writes_canceled,
            "journal.writer.dispose"
        );
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl Drop for FileJournalWriter {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn worker_loop(shared: Arc<Shared>, io: Arc<dyn FileIo>, worker: usize, sync_after_write: bool) {
    debug!(worker, "journal.worker.start");
    loop {
        let request = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(request) = queue.pending.pop_front() {
                    break Some(request);
                }
                if queue.closed {
                    break None;
                }
                shared.wakeup.wait(&mut queue);
            }
        };
        let Some(request) = request else {
            break;
        };
        let position = request.position();
        let len = request.len();
        let mut result = request.issue(io.as_ref());
        if result.is_ok() && sync_after_write {
            result = io.sync_all();
        }
        match result {
            Ok(()) => {
                shared
                    .counters
                    .writes_durable
                    .fetch_add(1, Ordering::Relaxed);
                shared
                    .counters
                    .bytes_written
                    .fetch_add(len, Ordering::Relaxed);
                debug!(worker, position, len, "journal.worker.durable");
                request.complete(Ok(WriteOutcome::Durable));
            }
            Err(err) => {
                shared.counters.writes_failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker, position, len, error = %err, "journal.worker.write_failed");
                request.complete(Err(err));
            }
        }
    }
    debug!(worker, "journal.worker.exit");
}

/// Windows refuses a second read-write open of a journal through the share
/// mode before the lock is ever tried; report that as a locked journal.
fn locked_on_sharing_violation(err: VaultError) -> VaultError {
    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::ERROR_SHARING_VIOLATION;
        if let VaultError::Io(io_err) = &err {
            if io_err.raw_os_error() == Some(ERROR_SHARING_VIOLATION as i32) {
                return VaultError::JournalLocked;
            }
        }
    }
    err
}
