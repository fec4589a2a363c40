use bigfile_archive::{Archive, DirId, FileId, FileKind};
use clap::Args;
use itertools::Itertools;
use miette::{Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Seek, SeekFrom},
    path::PathBuf,
};

#[derive(Args)]
pub struct ListArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Also list the contents of nested archives
    #[arg(short, long, default_value_t = false)]
    recursive: bool,
}

struct Level<'a> {
    archive: &'a Archive,
    data_start: u64,
    aliased: HashSet<FileId>,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let f = File::open(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;
        let len = f.metadata().into_diagnostic()?.len();
        let mut reader = BufReader::new(f);

        let archive = self.print_level(&mut reader, 0, len, 0)?;
        let summary = archive
            .files()
            .map(|(_, f)| f.kind)
            .counts()
            .into_iter()
            .sorted()
            .map(|(kind, count)| format!("{count} {kind}"))
            .join(", ");
        println!("{} files: {summary}", archive.len());
        Ok(())
    }

    fn print_level(
        &self,
        reader: &mut BufReader<File>,
        start: u64,
        len: u64,
        depth: usize,
    ) -> Result<Archive> {
        reader.seek(SeekFrom::Start(start)).into_diagnostic()?;
        let archive = Archive::parse(&mut *reader, len)
            .context(format!("reading archive at offset {start}"))?;

        let level = Level {
            archive: &archive,
            data_start: start + archive.metadata_len(),
            aliased: archive
                .position_groups()
                .into_iter()
                .filter(|g| g.files.len() > 1)
                .flat_map(|g| g.files)
                .collect(),
        };
        self.print_dir(reader, &level, archive.root(), depth)?;
        Ok(archive)
    }

    fn print_dir(
        &self,
        reader: &mut BufReader<File>,
        level: &Level<'_>,
        dir: DirId,
        depth: usize,
    ) -> Result<()> {
        let pad = "  ".repeat(depth);
        let archive = level.archive;
        let directory = archive.dir(dir);

        for &child in &directory.dirs {
            match &archive.dir(child).name {
                Some(name) => println!("{pad}{}", format!("{name}/").blue().bold()),
                None => println!("{pad}{}", "<unnamed>/".dimmed()),
            }
            self.print_dir(reader, level, child, depth + 1)?;
        }

        for id in directory.all_files() {
            let file = archive.file(id);
            let name = match &file.name {
                Some(name) => name.to_string(),
                None => "<unnamed>".to_string(),
            };
            let name = match file.kind {
                FileKind::Archive => name.magenta().to_string(),
                FileKind::Binary => name.cyan().to_string(),
                FileKind::ImageStandard | FileKind::ImageSpecial => name.green().to_string(),
                FileKind::None => name,
            };
            let alias = if level.aliased.contains(&id) {
                " (alias)".yellow().to_string()
            } else {
                String::new()
            };
            println!(
                "{pad}{name} {} {} bytes @ {}{alias}",
                file.kind.dimmed(),
                file.size,
                file.position
            );

            if self.recursive && file.kind == FileKind::Archive && file.size > 0 {
                let start = level.data_start + file.position as u64;
                self.print_level(reader, start, file.size as u64, depth + 1)?;
            }
        }
        Ok(())
    }
}
