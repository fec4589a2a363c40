//! Running a whole repack: thread pool, output thread and the atomic swap of the result

use bigfile_archive::Archive;
use memmap2::Mmap;
use std::fs;
use std::io::{BufWriter, Seek, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::options::RepackOptions;
use crate::pipeline::{drain, SubArchiveTask, Tasks};
use crate::rewrite::{Counters, Engine};
use crate::transcode::{BufferAllocator, SystemAllocator, Transcoder};

/// Summary of a finished repack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepackStats {
    /// Length of the input
    pub input_len: u64,
    /// Length of the output
    pub output_len: u64,
    /// Archive levels rewritten, the outermost included
    pub levels: usize,
    /// Images handed to the transcoder
    pub converted: usize,
    /// Images promoted by classification
    pub special: usize,
}

/// Rewrites archives, converting their images
///
/// ```
/// # fn doit() -> bigfile_repack::error::Result<()>
/// # {
/// use bigfile_archive::{write::BigFileWriterOptions, BigFileWriter};
/// use bigfile_repack::{error::BoxError, RepackOptions, Repacker, TranscodeRequest};
/// use std::io::{Cursor, Write};
///
/// fn shrink(request: &TranscodeRequest<'_>, mut out: Vec<u8>) -> Result<Vec<u8>, BoxError> {
///     out.extend_from_slice(&request.data[..16]);
///     Ok(out)
/// }
///
/// let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
/// writer.start_file("tiles/sky_top_00_00.jpg")?;
/// writer.write_all(&[0xFF; 64])?;
/// let input = writer.finish()?;
///
/// let repacker = Repacker::new(RepackOptions::default(), shrink);
/// let mut output = Cursor::new(Vec::new());
/// let stats = repacker.repack(&input, &mut output)?;
///
/// assert_eq!(stats.converted, 1);
/// assert_eq!(stats.output_len, stats.input_len - 48);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct Repacker {
    options: RepackOptions,
    transcoder: Arc<dyn Transcoder>,
    allocator: Arc<dyn BufferAllocator>,
}

impl Repacker {
    /// Create a repacker using plain heap buffers.
    pub fn new(options: RepackOptions, transcoder: impl Transcoder + 'static) -> Repacker {
        Repacker {
            options,
            transcoder: Arc::new(transcoder),
            allocator: Arc::new(SystemAllocator),
        }
    }

    /// Use `allocator` for every chunk and transcode buffer.
    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Repacker {
        self.allocator = allocator;
        self
    }

    pub fn options(&self) -> &RepackOptions {
        &self.options
    }

    /// Rewrite the archive `input` into `output`, starting at its current position.
    #[instrument(skip_all, fields(len = input.len()), err)]
    pub fn repack<W: Write + Seek + Send>(
        &self,
        input: &[u8],
        output: &mut W,
    ) -> Result<RepackStats> {
        self.options.validate()?;
        let workers = self.options.workers()?;
        let tasks = Tasks::new(self.options.max_tasks(workers));
        let counters = Counters::default();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("bigfile-worker-{i}"))
            .build()?;

        let archive = Archive::from_bytes(input)?;
        tasks.register_archive(
            0,
            SubArchiveTask {
                len: input.len() as u64,
                parsed: None,
                size: None,
                files: archive.len(),
            },
        );
        info!(workers, files = archive.len(), "repacking");

        let engine = Engine {
            tasks: &tasks,
            transcoder: &*self.transcoder,
            allocator: &self.allocator,
            options: &self.options,
            counters: &counters,
        };
        let allocator = &*self.allocator;
        let tasks = &tasks;

        let (size, written) = thread::scope(|s| {
            let output_thread = thread::Builder::new()
                .name("bigfile-output".into())
                .spawn_scoped(s, move || {
                    let drained =
                        panic::catch_unwind(AssertUnwindSafe(|| drain(tasks, output, allocator)))
                            .unwrap_or(Err(Error::WorkerLost));
                    drained.map_err(|err| tasks.fail(err)).ok()
                })?;

            let traversed = pool.in_place_scope(|scope| engine.level(scope, archive, input, 0, 0));
            let size = match traversed {
                Ok(size) => {
                    tasks.close();
                    Some(size)
                }
                Err(err) => {
                    tasks.fail(err);
                    None
                }
            };

            let written = output_thread.join().map_err(|_| Error::WorkerLost)?;
            Ok::<_, Error>((size, written))
        })?;

        let (Some(size), Some(written)) = (size, written) else {
            return Err(tasks.take_error().unwrap_or(Error::Aborted));
        };
        if size != written {
            return Err(Error::MetadataChanged {
                expected: size,
                actual: written,
            });
        }

        let stats = RepackStats {
            input_len: input.len() as u64,
            output_len: written,
            levels: counters.levels.load(Ordering::Relaxed),
            converted: counters.converted.load(Ordering::Relaxed),
            special: counters.special.load(Ordering::Relaxed),
        };
        debug!(pending = tasks.pending_archives(), "output thread finished");
        info!(
            input = stats.input_len,
            output = stats.output_len,
            converted = stats.converted,
            "repacked"
        );
        Ok(stats)
    }

    /// Repack the archive at `path` into `output`, or over itself.
    ///
    /// The result is written to a temporary file next to the destination and only moved into place once
    /// everything succeeded, so a failure leaves the destination untouched.
    #[instrument(skip(self), err)]
    pub fn repack_file(&self, path: &Path, output: Option<&Path>) -> Result<RepackStats> {
        let target = output.unwrap_or(path);
        let directory = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let file = fs::File::open(path)?;
        // SAFETY: the file is only read, and it is not replaced before the mapping is dropped below.
        let input = unsafe { Mmap::map(&file)? };

        let temp = tempfile::Builder::new()
            .prefix(".bigfile-")
            .suffix(".tmp")
            .tempfile_in(directory)?;
        let mut writer = BufWriter::new(temp);
        let stats = self.repack(&input, &mut writer)?;
        let temp = writer.into_inner().map_err(|err| err.into_error())?;

        drop(input);
        drop(file);
        temp.persist(target)?;
        Ok(stats)
    }
}
