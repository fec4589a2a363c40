//! The recursive rewrite of one archive level
//!
//! Every level is handled in two passes over its position groups. The dispatch pass enqueues output tasks
//! in final order: literal copies of untouched runs, one task per converted group, and the nested levels in
//! place. Transcoding runs on the pool while the traversal moves on. The settle pass then walks the same
//! groups, waits for each converted size and assigns the new positions.

use bigfile_archive::{Archive, FileId, FileKind, PositionGroup};
use bigfile_layers::Classification;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::options::RepackOptions;
use crate::pipeline::{FileTask, Placement, SubArchiveTask, Tasks};
use crate::transcode::{BufferAllocator, TranscodeRequest, Transcoder};

/// Deepest accepted nesting of archives inside archives
pub const MAX_NESTING: usize = 64;

/// How a converted position group is produced
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Conversion {
    /// The representative is transcoded
    Image(FileId),
    /// The representative is rewritten recursively
    Nested(FileId),
}

enum Pending {
    Untouched,
    Image(flume::Receiver<Result<u64>>),
    Nested(u64),
}

/// Totals collected while rewriting
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub levels: AtomicUsize,
    pub converted: AtomicUsize,
    pub special: AtomicUsize,
}

/// Everything a level needs, shared by the traversal and the jobs it spawns
#[derive(Clone, Copy)]
pub(crate) struct Engine<'s> {
    pub tasks: &'s Tasks,
    pub transcoder: &'s dyn Transcoder,
    pub allocator: &'s Arc<dyn BufferAllocator>,
    pub options: &'s RepackOptions,
    pub counters: &'s Counters,
}

impl<'s> Engine<'s> {
    /// Rewrite the level `archive` parsed from `bytes`, which start `offset` bytes into the input.
    ///
    /// Returns the rewritten length of the level, directory block included.
    #[instrument(skip(self, scope, archive, bytes), fields(len = bytes.len()), err)]
    pub fn level(
        &self,
        scope: &rayon::Scope<'s>,
        mut archive: Archive,
        bytes: &'s [u8],
        offset: u64,
        depth: usize,
    ) -> Result<u64> {
        if depth > MAX_NESTING {
            return Err(Error::NestingTooDeep(MAX_NESTING));
        }
        self.counters.levels.fetch_add(1, Ordering::Relaxed);

        let metadata_len = archive.metadata_len();
        let data = bytes
            .get(metadata_len as usize..)
            .ok_or(bigfile_archive::error::Error::BoundsViolation {
                declared: metadata_len,
                remaining: bytes.len() as u64,
            })?;
        let data_offset = offset + metadata_len;

        if self.options.classify {
            self.classify(&mut archive, data);
        }

        let reserved = self.task(format!("directory@{offset}"), Placement::Reserve(metadata_len));
        reserved.complete();
        self.tasks.enqueue(reserved.clone())?;

        let groups = archive.position_groups();
        let conversions = groups
            .iter()
            .map(|group| conversion(&archive, group))
            .collect::<Result<Vec<_>>>()?;

        for (group, conversion) in groups.iter().zip(&conversions) {
            if let Some(Conversion::Nested(id)) = *conversion {
                let len = archive.file(id).size as u64;
                let slice = &data[group.position as usize..group.end() as usize];
                let (tx, rx) = flume::bounded(1);
                self.tasks.register_archive(
                    data_offset + group.position as u64,
                    SubArchiveTask {
                        len,
                        parsed: Some(rx),
                        size: None,
                        files: 0,
                    },
                );
                scope.spawn(move |_| {
                    if tx.send(Archive::from_bytes(slice)).is_err() {
                        trace!(offset, "nested parse finished after the pass stopped");
                    }
                });
            }
        }

        info!(
            offset,
            depth,
            files = archive.len(),
            groups = groups.len(),
            converted = conversions.iter().flatten().count(),
            "rewriting archive level"
        );

        let pending = self.dispatch(
            scope,
            &archive,
            data,
            data_offset,
            depth,
            &groups,
            &conversions,
        )?;
        let data_len = self.settle(&mut archive, data.len() as u64, &groups, pending)?;

        let metadata = archive.metadata()?;
        if metadata.len() as u64 != metadata_len {
            return Err(Error::MetadataChanged {
                expected: metadata_len,
                actual: metadata.len() as u64,
            });
        }

        let size = metadata_len + data_len;
        self.tasks.settle_archive(offset, size, archive.len());
        let patch = FileTask::patch(
            format!("directory@{offset}"),
            reserved,
            offset,
            self.allocator.clone(),
        );
        patch.push(metadata);
        patch.complete();
        self.tasks.enqueue(patch)?;

        debug!(offset, input = bytes.len(), size, "settled archive level");
        Ok(size)
    }

    fn classify(&self, archive: &mut Archive, data: &[u8]) {
        match Classification::build(archive, data) {
            Ok(classification) => {
                let special = classification.apply(archive);
                self.counters.special.fetch_add(special, Ordering::Relaxed);
            }
            Err(err) => warn!("continuing without classification: {err}"),
        }
    }

    /// Enqueue the output of every group in order and start the conversions.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        scope: &rayon::Scope<'s>,
        archive: &Archive,
        data: &'s [u8],
        data_offset: u64,
        depth: usize,
        groups: &[PositionGroup],
        conversions: &[Option<Conversion>],
    ) -> Result<Vec<Pending>> {
        let mut pending = Vec::with_capacity(groups.len());
        let mut cursor = 0u64;
        let mut converted_end = 0u64;
        let mut untouched_end = 0u64;

        for (group, conversion) in groups.iter().zip(conversions) {
            let position = group.position as u64;
            if position < converted_end {
                return Err(Error::OverlappingEntries {
                    position,
                    previous_end: converted_end,
                });
            }

            let Some(conversion) = *conversion else {
                untouched_end = untouched_end.max(group.end());
                pending.push(Pending::Untouched);
                continue;
            };
            if position < untouched_end {
                return Err(Error::OverlappingEntries {
                    position,
                    previous_end: untouched_end,
                });
            }

            self.copy(data, cursor, position, data_offset)?;
            let slice = &data[group.position as usize..group.end() as usize];

            match conversion {
                Conversion::Image(id) => {
                    let file = archive.file(id);
                    let task = self.task(
                        format!("{}@{}", file.display_name(), data_offset + position),
                        Placement::Append,
                    );
                    self.tasks.enqueue(task.clone())?;

                    let (tx, rx) = flume::bounded(1);
                    let job = ImageJob {
                        name: file.display_name(),
                        kind: file.kind,
                        layer: file.layer,
                        data: slice,
                        task,
                        size: tx,
                    };
                    let engine = *self;
                    scope.spawn(move |_| engine.transcode(job));
                    pending.push(Pending::Image(rx));
                }
                Conversion::Nested(_) => {
                    let key = data_offset + position;
                    let parsed = self
                        .tasks
                        .take_parsed(key)
                        .ok_or(Error::WorkerLost)?
                        .recv()
                        .map_err(|_| Error::WorkerLost)??;
                    let size = self.level(scope, parsed, slice, key, depth + 1)?;
                    pending.push(Pending::Nested(size));
                }
            }

            cursor = group.end();
            converted_end = group.end();
        }

        self.copy(data, cursor, data.len() as u64, data_offset)?;
        Ok(pending)
    }

    /// Assign output positions and sizes and return the rewritten length of the data region.
    fn settle(
        &self,
        archive: &mut Archive,
        data_len: u64,
        groups: &[PositionGroup],
        pending: Vec<Pending>,
    ) -> Result<u64> {
        let mut out = 0u64;
        let mut cursor = 0u64;

        for (group, pending) in groups.iter().zip(pending) {
            let position = group.position as u64;
            out += position - cursor;
            let new_position = fit(out)?;

            let new_size = match pending {
                Pending::Untouched => {
                    cursor = position;
                    for &id in &group.files {
                        archive.file_mut(id).position = new_position;
                    }
                    continue;
                }
                Pending::Image(rx) => {
                    self.counters.converted.fetch_add(1, Ordering::Relaxed);
                    rx.recv().map_err(|_| Error::WorkerLost)??
                }
                Pending::Nested(size) => size,
            };

            let size = fit(new_size)?;
            for &id in &group.files {
                let file = archive.file_mut(id);
                file.position = new_position;
                if file.size != 0 {
                    file.size = size;
                }
            }
            out += new_size;
            cursor = group.end();
        }

        out += data_len.saturating_sub(cursor);
        Ok(out)
    }

    /// Enqueue a literal copy of `data[from..to]`.
    fn copy(&self, data: &'s [u8], from: u64, to: u64, data_offset: u64) -> Result<()> {
        if to <= from {
            return Ok(());
        }

        let task = self.task(
            format!("copy@{}..{}", data_offset + from, data_offset + to),
            Placement::Append,
        );
        self.tasks.enqueue(task.clone())?;
        let mut slice = &data[from as usize..to as usize];
        task.copy(&mut slice, to - from)?;
        task.complete();
        Ok(())
    }

    fn task(&self, label: String, placement: Placement) -> Arc<FileTask> {
        FileTask::new(
            label,
            placement,
            self.options.chunk_size,
            self.options.max_chunks,
            self.allocator.clone(),
        )
    }

    /// Runs on a pool worker.
    fn transcode(&self, job: ImageJob<'s>) {
        let request = TranscodeRequest {
            name: &job.name,
            kind: job.kind,
            data: job.data,
            layer: job.layer,
            limits: self.options.limits,
        };
        let out = self.allocator.allocate(job.data.len());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transcoder.transcode(&request, out)
        }))
        .unwrap_or_else(|_| Err("transcoder panicked".into()));

        match result {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                debug!(
                    name = %job.name,
                    kind = %job.kind,
                    input = job.data.len(),
                    size,
                    "transcoded"
                );
                job.task.push(bytes);
                job.task.complete();
                if job.size.send(Ok(size)).is_err() {
                    trace!(name = %job.name, "size no longer awaited");
                }
            }
            Err(source) => {
                job.task.fail();
                self.tasks.fail(Error::Transcode {
                    name: job.name,
                    source,
                });
                if job.size.send(Err(Error::Aborted)).is_err() {
                    trace!("failure no longer awaited");
                }
            }
        }
    }
}

struct ImageJob<'s> {
    name: String,
    kind: FileKind,
    layer: Option<usize>,
    data: &'s [u8],
    task: Arc<FileTask>,
    size: flume::Sender<Result<u64>>,
}

fn priority(kind: FileKind) -> u8 {
    match kind {
        FileKind::Archive => 2,
        FileKind::ImageStandard | FileKind::ImageSpecial => 1,
        FileKind::None | FileKind::Binary => 0,
    }
}

/// Decide whether a group is converted, and through which of its members.
///
/// The representative is the non-empty member of the highest priority kind, the larger one on ties and
/// the first written one after that. Groups without an archive or image representative stay untouched.
fn conversion(archive: &Archive, group: &PositionGroup) -> Result<Option<Conversion>> {
    let representative = group
        .files
        .iter()
        .rev()
        .copied()
        .filter(|&id| archive.file(id).size > 0)
        .max_by_key(|&id| {
            let file = archive.file(id);
            (priority(file.kind), file.size)
        });
    let Some(id) = representative else {
        return Ok(None);
    };

    let conversion = match archive.file(id).kind {
        FileKind::Archive => Conversion::Nested(id),
        FileKind::ImageStandard | FileKind::ImageSpecial => Conversion::Image(id),
        FileKind::None | FileKind::Binary => return Ok(None),
    };

    let expected = archive.file(id).size;
    for &alias in &group.files {
        let found = archive.file(alias).size;
        if found != 0 && found != expected {
            return Err(Error::AliasMismatch {
                position: group.position,
                expected,
                found,
            });
        }
    }
    Ok(Some(conversion))
}

fn fit(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::TooLarge(value))
}
