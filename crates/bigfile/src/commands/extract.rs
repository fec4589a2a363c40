use bigfile_archive::{locate, Archive, ArchivePath};
use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};
use tracing::{info, warn};

#[derive(Args)]
pub struct ExtractArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Extract only this file, crossing into nested archives
    #[arg(short, long, value_name = "PATH")]
    path: Option<String>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let f = File::open(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;
        let len = f.metadata().into_diagnostic()?.len();
        let mut reader = BufReader::new(f);

        if let Some(path) = &self.path {
            let path: ArchivePath = path.parse()?;
            let located = locate(&mut reader, &path).context(format!("locating {path}"))?;
            let target = path.segments().iter().collect::<PathBuf>();
            if !stays_inside(&target) {
                return Err(miette!(
                    "{path} would leave {}",
                    self.directory.display()
                ));
            }
            return self.write(&mut reader, located.offset, located.size as u64, &target);
        }

        let archive = Archive::parse(&mut reader, len)?;
        let data_start = archive.metadata_len();
        for (name, id) in archive.walk(archive.root()) {
            let file = archive.file(id);
            let name = if file.name.is_none() {
                format!("{name}unnamed_{}", id.0)
            } else {
                name
            };

            let target = Path::new(&name);
            if !stays_inside(target) {
                warn!("skipping {name}, it would leave the target directory");
                continue;
            }
            self.write(
                &mut reader,
                data_start + file.position as u64,
                file.size as u64,
                target,
            )?;
        }
        Ok(())
    }

    fn write(
        &self,
        reader: &mut BufReader<File>,
        offset: u64,
        size: u64,
        name: &Path,
    ) -> Result<()> {
        let p = self.directory.join(name);
        info!("writing {}", p.display());

        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;
        }
        let mut out = if !self.overwrite {
            File::create_new(&p)
                .into_diagnostic()
                .context(format!("creating {}", &p.display()))?
        } else {
            File::create(&p)
                .into_diagnostic()
                .context(format!("creating {}", &p.display()))?
        };

        reader.seek(SeekFrom::Start(offset)).into_diagnostic()?;
        std::io::copy(&mut reader.by_ref().take(size), &mut out)
            .into_diagnostic()
            .context(format!("copying {}", name.display()))?;
        Ok(())
    }
}

/// Whether joining `path` onto a directory stays below that directory
fn stays_inside(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}
