use bigfile_repack::{RepackOptions, RepackStats, Repacker, TextureLimits};
use clap::{ArgGroup, Args};
use miette::miette;
use miette::{Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::transcode::JpegTranscoder;

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "directory"])))]
pub struct RepackArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Repack every archive below this directory in place
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Write the result here instead of replacing the input
    #[arg(short, long, value_name = "FILE", requires = "file", conflicts_with = "directory")]
    output: Option<PathBuf>,

    /// Number of transcode workers, defaults to BIGFILE_WORKER_THREADS or the core count
    #[arg(long)]
    workers: Option<usize>,

    /// Upper bound on queued output tasks
    #[arg(long)]
    max_tasks: Option<usize>,

    /// JPEG quality for standard tiles
    #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// JPEG quality for tiles flagged by the records
    #[arg(long, default_value_t = 95, value_parser = clap::value_parser!(u8).range(1..=100))]
    special_quality: u8,

    #[arg(long, default_value_t = 1)]
    min_width: u32,

    #[arg(long, default_value_t = TextureLimits::MAX)]
    max_width: u32,

    #[arg(long, default_value_t = 1)]
    min_height: u32,

    #[arg(long, default_value_t = TextureLimits::MAX)]
    max_height: u32,

    #[arg(long, default_value_t = 1)]
    min_volume: u32,

    #[arg(long, default_value_t = TextureLimits::MAX)]
    max_volume: u32,

    /// Do not read record files to find flagged tiles
    #[arg(long, default_value_t = false)]
    no_classify: bool,
}

impl RepackArgs {
    pub fn handle(&self) -> Result<()> {
        let options = RepackOptions::builder()
            .maybe_workers(self.workers)
            .maybe_max_tasks(self.max_tasks)
            .limits(TextureLimits {
                min_width: self.min_width,
                max_width: self.max_width,
                min_height: self.min_height,
                max_height: self.max_height,
                min_volume: self.min_volume,
                max_volume: self.max_volume,
            })
            .classify(!self.no_classify)
            .build();
        options.validate()?;

        let repacker = Repacker::new(
            options,
            JpegTranscoder {
                quality: self.quality,
                special_quality: self.special_quality,
            },
        );

        if let Some(file) = &self.file {
            return self.repack(&repacker, file, self.output.as_deref());
        }

        let directory = self
            .directory
            .as_ref()
            .ok_or(miette!("either a file or a directory is required"))?;
        let archives = WalkDir::new(directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("m4b"))
            })
            .collect::<Vec<_>>();

        if archives.is_empty() {
            return Err(miette!("no archives found below {}", directory.display()));
        }
        for archive in archives {
            self.repack(&repacker, archive.path(), None)?;
        }
        Ok(())
    }

    fn repack(&self, repacker: &Repacker, path: &Path, output: Option<&Path>) -> Result<()> {
        info!("repacking {}", path.display());
        let stats = repacker
            .repack_file(path, output)
            .context(format!("repacking {}", path.display()))?;
        print_stats(output.unwrap_or(path), &stats);
        Ok(())
    }
}

fn print_stats(path: &Path, stats: &RepackStats) {
    let saved = stats.input_len.saturating_sub(stats.output_len);
    let percent = if stats.input_len == 0 {
        0.0
    } else {
        saved as f64 * 100.0 / stats.input_len as f64
    };
    println!(
        "{}: {} -> {} bytes ({}), {} levels, {} images of which {} flagged",
        path.display().bold(),
        stats.input_len,
        stats.output_len,
        format!("-{percent:.1}%").green(),
        stats.levels,
        stats.converted,
        stats.special,
    );
}
