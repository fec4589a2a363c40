use miette::{IntoDiagnostic, Result};
use std::io::Write;

use bigfile_archive::{write::BigFileWriterOptions, Archive, BigFileWriter, Name};
use pretty_assertions::assert_eq;
use tracing::{info, instrument};
use tracing_test::traced_test;

#[instrument(skip_all, fields(alignment = alignment))]
fn validate_rewrite(alignment: u32) -> Result<()> {
    let mut writer = BigFileWriter::new(
        Vec::new(),
        BigFileWriterOptions::builder().alignment(alignment).build(),
    );

    let node = writer.start_file("cube/layers.bin")?;
    writer.write_all(b"LAYR").into_diagnostic()?;
    writer.start_file("cube//tile_front_00_00.jpg")?;
    writer.write_all(&[0xFF, 0xD8, 0xFF, 0xD9]).into_diagnostic()?;
    writer.alias("water/layers.bin", node)?;
    writer.start_file("sounds/ambient.ogg")?;
    writer.write_all(&[7; 33]).into_diagnostic()?;
    let expected = writer.finish()?;

    let archive = Archive::from_bytes(&expected)?;
    info!("parsed {} files", archive.len());

    let metadata_len = archive.metadata_len() as usize;
    let mut actual = Vec::new();
    archive.write(&mut actual)?;
    actual.extend_from_slice(&expected[metadata_len..]);

    assert_eq!(actual, expected);
    Ok(())
}

#[traced_test]
#[test]
fn rewrite_is_lossless() -> Result<()> {
    for alignment in [1, 4, 2048] {
        validate_rewrite(alignment)?;
    }
    Ok(())
}

#[test]
fn names_without_terminator_survive() -> Result<()> {
    let mut writer = BigFileWriter::new(
        Vec::new(),
        BigFileWriterOptions::builder().terminate_names(false).build(),
    );
    writer.start_file("dir/file.txt")?;
    let bytes = writer.finish()?;

    let archive = Archive::from_bytes(&bytes)?;
    let id = archive
        .find(&"dir/file.txt".parse()?)
        .ok_or_else(|| miette::miette!("file.txt missing"))?;
    assert_eq!(archive.file(id).name, Some(Name::unterminated("file.txt")));

    let mut rewritten = Vec::new();
    archive.write(&mut rewritten)?;
    assert_eq!(rewritten, bytes);
    Ok(())
}

#[test]
fn too_many_directories() -> Result<()> {
    let mut archive = Archive::new();
    for i in 0..256 {
        archive.add_directory(archive.root(), Some(Name::new(format!("d{i}"))));
    }

    assert!(matches!(
        archive.metadata(),
        Err(bigfile_archive::error::Error::TooManyDirectories(256))
    ));
    Ok(())
}
