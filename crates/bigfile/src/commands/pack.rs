use bigfile_archive::{write::BigFileWriterOptions, BigFileWriter};
use clap::Args;
use itertools::Itertools;
use miette::miette;
use miette::{Context, IntoDiagnostic, Result};
use std::{fs::File, io::BufWriter, path::PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Start every file on a multiple of this many bytes
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    alignment: u32,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        info!("creating {}", &self.file.display());

        let files = WalkDir::new(&self.directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        let out = if !self.overwrite {
            File::create_new(&self.file)
                .into_diagnostic()
                .context(format!("creating {}", &self.file.display()))?
        } else {
            File::create(&self.file)
                .into_diagnostic()
                .context(format!("creating {}", &self.file.display()))?
        };

        let mut bigfile = BigFileWriter::new(
            BufWriter::new(out),
            BigFileWriterOptions::builder()
                .alignment(self.alignment)
                .build(),
        );

        for file in files {
            let name = file
                .path()
                .strip_prefix(&self.directory)
                .into_diagnostic()?;
            info!("packing {}", name.display());

            let segments = name
                .components()
                .map(|c| {
                    c.as_os_str()
                        .to_str()
                        .ok_or(miette!("unable to convert {} to a string", name.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            bigfile
                .start_file(&segments.iter().join("/"))
                .context(format!("starting entry for {}", name.display()))?;

            let mut f = File::open(file.path())
                .into_diagnostic()
                .context(format!("opening {}", file.path().display()))?;

            std::io::copy(&mut f, &mut bigfile)
                .into_diagnostic()
                .context(format!("copying {}", file.path().display()))?;
        }

        bigfile
            .finish()
            .context("finalizing archive")?
            .into_inner()
            .map_err(|err| err.into_error())
            .into_diagnostic()
            .context("flushing archive")?;

        Ok(())
    }
}
