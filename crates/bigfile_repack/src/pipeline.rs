//! Ordered output tasks and the thread that drains them
//!
//! The traversal enqueues one [`FileTask`] per unit of output. Producers fill tasks in any order, but the
//! drain only ever works on the head of the queue, so the output follows enqueue order no matter which
//! worker finishes first.

use bigfile_archive::Archive;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::sync::Guarded;
use crate::transcode::BufferAllocator;

/// Where the bytes of a task go
#[derive(Debug)]
pub enum Placement {
    /// At the end of the output
    Append,
    /// At the end of the output, as `len` placeholder bytes overwritten later
    Reserve(u64),
    /// Over the bytes reserved by an earlier task
    Patch(Arc<FileTask>),
}

#[derive(Debug, Default)]
struct TaskState {
    chunks: VecDeque<Vec<u8>>,
    complete: bool,
    failed: bool,
    offset: Option<u64>,
}

/// What the drain gets from a task
#[derive(Debug)]
pub enum Next {
    Chunk(Vec<u8>),
    Done,
    Failed,
}

/// One ordered unit of output
pub struct FileTask {
    label: String,
    placement: Placement,
    /// Input offset of the archive level this task finishes
    finishes: Option<u64>,
    state: Guarded<TaskState>,
    chunk_size: usize,
    max_chunks: usize,
    allocator: Arc<dyn BufferAllocator>,
}

impl fmt::Debug for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTask")
            .field("label", &self.label)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

impl FileTask {
    /// Create a task. `chunk_size` and `max_chunks` bound the memory held by [`FileTask::copy`].
    pub fn new(
        label: impl Into<String>,
        placement: Placement,
        chunk_size: usize,
        max_chunks: usize,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Arc<FileTask> {
        Arc::new(FileTask {
            label: label.into(),
            placement,
            finishes: None,
            state: Guarded::default(),
            chunk_size: chunk_size.max(1),
            max_chunks: max_chunks.max(1),
            allocator,
        })
    }

    /// Create a task writing the directory block of the archive level at input offset `level`.
    pub fn patch(
        label: impl Into<String>,
        reserved: Arc<FileTask>,
        level: u64,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Arc<FileTask> {
        Arc::new(FileTask {
            label: label.into(),
            placement: Placement::Patch(reserved),
            finishes: Some(level),
            state: Guarded::default(),
            chunk_size: usize::MAX,
            max_chunks: usize::MAX,
            allocator,
        })
    }

    /// Short description used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Stream `count` bytes from `reader` in bounded chunks.
    ///
    /// Waits while the drain still holds `max_chunks` undrained chunks of this task.
    pub fn copy<R: Read>(&self, reader: &mut R, count: u64) -> Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            let len = remaining.min(self.chunk_size as u64) as usize;
            let mut chunk = self.allocator.allocate(len);
            reader.by_ref().take(len as u64).read_to_end(&mut chunk)?;
            if chunk.len() != len {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.push_bounded(chunk)?;
            remaining -= len as u64;
        }
        Ok(())
    }

    fn push_bounded(&self, chunk: Vec<u8>) -> Result<()> {
        let mut yielding = false;
        loop {
            let mut state = self.state.lock(yielding);
            if state.failed {
                return Err(Error::Aborted);
            }
            if state.chunks.len() < self.max_chunks {
                trace!(task = %self.label, size = chunk.len(), "queued chunk");
                state.chunks.push_back(chunk);
                return Ok(());
            }
            yielding = true;
        }
    }

    /// Append already produced bytes without waiting.
    pub fn push(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock(false);
        if !state.failed {
            state.chunks.push_back(bytes);
        }
    }

    /// Mark that no more bytes will follow.
    pub fn complete(&self) {
        self.state.lock(false).complete = true;
    }

    /// Mark the task as failed, waking anyone waiting on it.
    pub fn fail(&self) {
        let mut state = self.state.lock(false);
        state.failed = true;
        state.chunks.clear();
    }

    /// Whether [`FileTask::complete`] was called
    pub fn is_complete(&self) -> bool {
        self.state.lock(false).complete
    }

    /// Wait for the next chunk or the end of the task.
    pub fn next(&self) -> Next {
        let mut yielding = false;
        loop {
            let mut state = self.state.lock(yielding);
            if state.failed {
                return Next::Failed;
            }
            if let Some(chunk) = state.chunks.pop_front() {
                return Next::Chunk(chunk);
            }
            if state.complete {
                return Next::Done;
            }
            yielding = true;
        }
    }

    /// Output offset the drain wrote this task at
    pub fn offset(&self) -> Option<u64> {
        self.state.lock(false).offset
    }

    fn set_offset(&self, offset: u64) {
        self.state.lock(false).offset = Some(offset);
    }
}

/// A nested archive seen by the traversal
#[derive(Debug)]
pub struct SubArchiveTask {
    /// Input length of the nested archive
    pub len: u64,
    /// Directory tree parsed in the background
    pub parsed: Option<flume::Receiver<bigfile_archive::error::Result<Archive>>>,
    /// Rewritten size, once known
    pub size: Option<u64>,
    /// Number of files on the nested level
    pub files: usize,
}

#[derive(Debug, Default)]
struct Queue {
    tasks: VecDeque<Arc<FileTask>>,
    closed: bool,
    aborted: bool,
}

/// Every in-flight task of one repack
#[derive(Debug)]
pub struct Tasks {
    fifo: Guarded<Queue>,
    archives: Guarded<BTreeMap<u64, SubArchiveTask>>,
    error: Guarded<Option<Error>>,
    max_tasks: usize,
}

impl Tasks {
    /// Create the queues, allowing `max_tasks` file tasks in flight.
    pub fn new(max_tasks: usize) -> Tasks {
        Tasks {
            fifo: Guarded::default(),
            archives: Guarded::default(),
            error: Guarded::default(),
            max_tasks: max_tasks.max(1),
        }
    }

    /// Append a task, waiting while the queue is full.
    pub fn enqueue(&self, task: Arc<FileTask>) -> Result<()> {
        let mut yielding = false;
        loop {
            let mut queue = self.fifo.lock(yielding);
            if queue.aborted {
                return Err(Error::Aborted);
            }
            if queue.tasks.len() < self.max_tasks {
                trace!(task = %task.label, queued = queue.tasks.len(), "enqueued");
                queue.tasks.push_back(task);
                return Ok(());
            }
            yielding = true;
        }
    }

    /// Signal that no more tasks will be enqueued.
    pub fn close(&self) {
        self.fifo.lock(false).closed = true;
    }

    /// Record a failure and stop everything.
    ///
    /// The first failure that is not itself caused by an abort is kept.
    pub fn fail(&self, error: Error) {
        {
            let mut slot = self.error.lock(false);
            let replace = match slot.as_ref() {
                None => true,
                Some(existing) => existing.is_secondary() && !error.is_secondary(),
            };
            if replace {
                debug!("stopping: {error}");
                *slot = Some(error);
            }
        }

        let pending: Vec<_> = {
            let mut queue = self.fifo.lock(false);
            queue.aborted = true;
            queue.tasks.iter().cloned().collect()
        };
        for task in pending {
            task.fail();
        }
    }

    /// Take the recorded failure, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.error.lock(false).take()
    }

    /// Wait for the head of the queue without removing it.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub fn head(&self) -> Result<Option<Arc<FileTask>>> {
        let mut yielding = false;
        loop {
            let queue = self.fifo.lock(yielding);
            if queue.aborted {
                return Err(Error::Aborted);
            }
            if let Some(task) = queue.tasks.front() {
                return Ok(Some(task.clone()));
            }
            if queue.closed {
                return Ok(None);
            }
            yielding = true;
        }
    }

    /// Remove the head of the queue after it was written.
    pub fn pop_head(&self) -> Option<Arc<FileTask>> {
        self.fifo.lock(false).tasks.pop_front()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.fifo.lock(false).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a nested archive at input offset `offset`.
    pub fn register_archive(&self, offset: u64, task: SubArchiveTask) {
        self.archives.lock(false).insert(offset, task);
    }

    /// Take the receiver of the background parse of the nested archive at `offset`.
    pub fn take_parsed(
        &self,
        offset: u64,
    ) -> Option<flume::Receiver<bigfile_archive::error::Result<Archive>>> {
        self.archives
            .lock(false)
            .get_mut(&offset)
            .and_then(|task| task.parsed.take())
    }

    /// Record the outcome of rewriting the nested archive at `offset`.
    pub fn settle_archive(&self, offset: u64, size: u64, files: usize) {
        if let Some(task) = self.archives.lock(false).get_mut(&offset) {
            task.size = Some(size);
            task.files = files;
        }
    }

    /// Drop the nested archive at `offset` and everything inside its input range.
    fn finish_archive(&self, offset: u64) {
        let mut archives = self.archives.lock(false);
        let Some(task) = archives.remove(&offset) else {
            return;
        };

        let behind: Vec<u64> = archives
            .range(offset..offset + task.len)
            .map(|(&k, _)| k)
            .collect();
        for key in &behind {
            archives.remove(key);
        }
        debug!(
            offset,
            input = task.len,
            size = task.size,
            files = task.files,
            dropped = behind.len(),
            "nested archive written"
        );
    }

    /// Number of nested archives not yet written
    pub fn pending_archives(&self) -> usize {
        self.archives.lock(false).len()
    }
}

/// Write every task to `out`, strictly head first, until the queue is closed.
///
/// Returns the number of bytes appended.
pub fn drain<W: Write + Seek>(
    tasks: &Tasks,
    out: &mut W,
    allocator: &dyn BufferAllocator,
) -> Result<u64> {
    let base = out.stream_position()?;
    let mut end = 0u64;
    let mut zeros = Vec::new();

    while let Some(task) = tasks.head()? {
        match task.placement() {
            Placement::Append => {
                task.set_offset(end);
                end += write_chunks(&task, out, allocator)?;
            }
            Placement::Reserve(len) => {
                task.set_offset(end);
                let mut left = *len;
                while left > 0 {
                    let step = left.min(64 * 1024) as usize;
                    zeros.resize(step, 0);
                    out.write_all(&zeros)?;
                    left -= step as u64;
                }
                end += *len;
                if !matches!(task.next(), Next::Done) {
                    return Err(Error::Aborted);
                }
            }
            Placement::Patch(reserved) => {
                let Some(at) = reserved.offset() else {
                    return Err(Error::Aborted);
                };
                let expected = match reserved.placement() {
                    Placement::Reserve(len) => *len,
                    _ => 0,
                };

                out.seek(SeekFrom::Start(base + at))?;
                let written = write_chunks(&task, out, allocator)?;
                out.seek(SeekFrom::Start(base + end))?;
                if written != expected {
                    return Err(Error::MetadataChanged {
                        expected,
                        actual: written,
                    });
                }
            }
        }

        trace!(task = %task.label(), end, "drained");
        tasks.pop_head();
        if let Some(level) = task.finishes {
            tasks.finish_archive(level);
        }
    }

    out.flush()?;
    Ok(end)
}

fn write_chunks<W: Write>(
    task: &FileTask,
    out: &mut W,
    allocator: &dyn BufferAllocator,
) -> Result<u64> {
    let mut written = 0u64;
    loop {
        match task.next() {
            Next::Chunk(chunk) => {
                out.write_all(&chunk)?;
                written += chunk.len() as u64;
                allocator.release(chunk);
            }
            Next::Done => return Ok(written),
            Next::Failed => return Err(Error::Aborted),
        }
    }
}
