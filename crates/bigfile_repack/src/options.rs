//! Tuning knobs for a repack

use bon::Builder;
use std::{env, num::NonZeroUsize, thread};

use crate::error::{Error, Result};
use crate::transcode::TextureLimits;

/// Environment variable overriding the default worker count
pub const WORKER_THREADS_ENV: &str = "BIGFILE_WORKER_THREADS";

/// Options for how an archive should be repacked
#[derive(Debug, Clone, Copy, Builder)]
pub struct RepackOptions {
    /// Number of transcode workers, see [`RepackOptions::workers`]
    pub workers: Option<usize>,

    /// Upper bound on queued output tasks, see [`RepackOptions::max_tasks`]
    pub max_tasks: Option<usize>,

    /// Largest chunk copied at once
    #[builder(default = 1 << 20)]
    pub chunk_size: usize,

    /// Undrained chunks a single task may hold before its producer waits
    #[builder(default = 4)]
    pub max_chunks: usize,

    /// Bounds handed to the transcoder
    #[builder(default)]
    pub limits: TextureLimits,

    /// Whether record files are read to promote flagged tiles
    #[builder(default = true)]
    pub classify: bool,
}

impl Default for RepackOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RepackOptions {
    /// Resolve the worker count.
    ///
    /// An explicit value wins, then [`WORKER_THREADS_ENV`], then the available parallelism. Never less
    /// than one.
    pub fn workers(&self) -> Result<usize> {
        if let Some(workers) = self.workers {
            return Ok(workers.max(1));
        }

        match env::var(WORKER_THREADS_ENV) {
            Ok(value) => value
                .trim()
                .parse::<NonZeroUsize>()
                .map(NonZeroUsize::get)
                .map_err(|_| {
                    Error::Configuration(format!(
                        "{WORKER_THREADS_ENV} must be a positive number, got {value:?}"
                    ))
                }),
            Err(env::VarError::NotPresent) => {
                Ok(thread::available_parallelism().map_or(1, NonZeroUsize::get))
            }
            Err(env::VarError::NotUnicode(_)) => Err(Error::Configuration(format!(
                "{WORKER_THREADS_ENV} is not valid unicode"
            ))),
        }
    }

    /// Resolve the bound on queued output tasks for `workers` workers.
    pub fn max_tasks(&self, workers: usize) -> usize {
        self.max_tasks.unwrap_or(workers * 4 + 8).max(1)
    }

    /// Check everything that can be checked up front.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk size must not be zero".into()));
        }
        if self.max_chunks == 0 {
            return Err(Error::Configuration(
                "a task must be able to hold at least one chunk".into(),
            ));
        }
        self.limits.validate()
    }
}
