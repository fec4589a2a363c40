use miette::{IntoDiagnostic, Result};
use parking_lot::{Condvar, Mutex};
use std::io::{Cursor, Write};
use std::sync::Arc;

use bigfile_archive::{
    locate, write::BigFileWriterOptions, Archive, BigFileWriter, File, FileKind, Name,
};
use bigfile_layers::swizzle::swizzle_in_place;
use bigfile_repack::{
    error::{BoxError, Error},
    PooledAllocator, RepackOptions, RepackStats, Repacker, TranscodeRequest, Transcoder,
    MAX_NESTING,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

/// Replaces every image with `len` copies of `fill`
struct Fixed {
    len: usize,
    fill: u8,
}

impl Transcoder for Fixed {
    fn transcode(
        &self,
        _request: &TranscodeRequest<'_>,
        mut out: Vec<u8>,
    ) -> Result<Vec<u8>, BoxError> {
        out.resize(self.len, self.fill);
        Ok(out)
    }
}

/// Keeps every other byte, reversed
fn halve(request: &TranscodeRequest<'_>, mut out: Vec<u8>) -> Result<Vec<u8>, BoxError> {
    out.extend(request.data.iter().rev().step_by(2));
    Ok(out)
}

fn refuse(request: &TranscodeRequest<'_>, _out: Vec<u8>) -> Result<Vec<u8>, BoxError> {
    Err(format!("refusing {}", request.name).into())
}

fn options() -> RepackOptions {
    RepackOptions::builder()
        .workers(2)
        .chunk_size(7)
        .max_chunks(2)
        .build()
}

fn repack(input: &[u8], transcoder: impl Transcoder + 'static) -> Result<(Vec<u8>, RepackStats)> {
    let repacker = Repacker::new(options(), transcoder);
    let mut output = Cursor::new(Vec::new());
    let stats = repacker.repack(input, &mut output)?;
    Ok((output.into_inner(), stats))
}

/// Position and size of the file at `path`
fn record(archive: &Archive, path: &str) -> Result<(u32, u32)> {
    let id = archive
        .find(&path.parse()?)
        .ok_or_else(|| miette::miette!("{path} missing"))?;
    let file = archive.file(id);
    Ok((file.position, file.size))
}

/// An archive level from raw records, all in the root directory
fn assemble(files: &[(&str, u32, u32)], data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = Archive::new();
    for &(name, size, position) in files {
        archive.add_file(archive.root(), File::new(Some(Name::new(name)), size, position));
    }
    let mut out = archive.metadata()?;
    out.extend_from_slice(data);
    Ok(out)
}

fn data_region(bytes: &[u8]) -> Result<(Archive, &[u8])> {
    let archive = Archive::from_bytes(bytes)?;
    let start = archive.metadata_len() as usize;
    Ok((archive, &bytes[start..]))
}

#[traced_test]
#[test]
fn archive_without_images_is_copied_exactly() -> Result<()> {
    let mut inner = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    inner.start_file("notes/a.txt")?;
    inner.write_all(b"inner notes").into_diagnostic()?;
    let inner = inner.finish()?;

    let mut writer = BigFileWriter::new(
        Vec::new(),
        BigFileWriterOptions::builder().alignment(16).build(),
    );
    let config = writer.start_file("config/settings.bin")?;
    writer.write_all(&[1, 2, 3, 4, 5]).into_diagnostic()?;
    writer.alias("config/copy.bin", config)?;
    writer.start_file("packs/inner.m4b")?;
    writer.write_all(&inner).into_diagnostic()?;
    writer.start_file("sounds/")?;
    writer.write_all(&[9; 100]).into_diagnostic()?;
    writer.start_file("empty.txt")?;
    let input = writer.finish()?;

    let (output, stats) = repack(&input, Fixed { len: 1, fill: 0 })?;

    assert_eq!(output, input);
    assert_eq!(stats.converted, 0);
    assert_eq!(stats.levels, 2);
    assert_eq!(stats.output_len, input.len() as u64);
    assert!(logs_contain("rewriting archive level"));
    Ok(())
}

#[traced_test]
#[test]
fn converted_image_moves_later_files() -> Result<()> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("A.txt")?;
    writer.write_all(&[1; 100]).into_diagnostic()?;
    writer.start_file("B.jpg")?;
    writer.write_all(&[2; 500]).into_diagnostic()?;
    writer.start_file("C.txt")?;
    writer.write_all(&[3; 50]).into_diagnostic()?;
    let input = writer.finish()?;

    let (output, stats) = repack(&input, Fixed { len: 300, fill: 0xAB })?;
    let (archive, data) = data_region(&output)?;

    assert_eq!(data.len(), 450);
    assert_eq!(record(&archive, "A.txt")?, (0, 100));
    assert_eq!(record(&archive, "B.jpg")?, (100, 300));
    assert_eq!(record(&archive, "C.txt")?, (400, 50));

    assert!(data[..100].iter().all(|&b| b == 1));
    assert!(data[100..400].iter().all(|&b| b == 0xAB));
    assert!(data[400..].iter().all(|&b| b == 3));

    assert_eq!(stats.converted, 1);
    assert_eq!(stats.output_len, output.len() as u64);
    assert_eq!(stats.input_len - stats.output_len, 200);
    Ok(())
}

#[test]
fn aliases_share_the_new_position() -> Result<()> {
    #[rustfmt::skip]
    let data = [
        // a.jpg, b.jpg and c.txt
        0, 1, 2, 3, 4, 5, 6, 7,
        // d.txt
        8, 9, 10, 11,
    ];
    let input = assemble(
        &[
            ("a.jpg", 8, 0),
            ("d.txt", 4, 8),
            ("b.jpg", 8, 0),
            ("c.txt", 0, 0),
        ],
        &data,
    )?;

    let (output, stats) = repack(&input, Fixed { len: 3, fill: 0x55 })?;
    let (archive, data) = data_region(&output)?;

    assert_eq!(stats.converted, 1);
    assert_eq!(record(&archive, "a.jpg")?, (0, 3));
    assert_eq!(record(&archive, "b.jpg")?, (0, 3));
    assert_eq!(record(&archive, "c.txt")?, (0, 0));
    assert_eq!(record(&archive, "d.txt")?, (3, 4));
    assert_eq!(data, &[0x55, 0x55, 0x55, 8, 9, 10, 11]);
    Ok(())
}

#[test]
fn positions_keep_their_order_and_gaps() -> Result<()> {
    let mut writer = BigFileWriter::new(
        Vec::new(),
        BigFileWriterOptions::builder().alignment(32).build(),
    );
    let names = ["a.jpg", "b.txt", "c.jpg", "d.jpeg", "e.txt"];
    for (i, name) in names.iter().enumerate() {
        writer.start_file(&format!("tiles/{name}"))?;
        writer
            .write_all(&vec![i as u8 + 1; 10 + i * 7])
            .into_diagnostic()?;
    }
    let input = writer.finish()?;
    let (input_archive, input_data) = data_region(&input)?;

    let (output, stats) = repack(&input, halve)?;
    let (archive, data) = data_region(&output)?;

    let mut previous = 0;
    let mut expected_len = input_data.len() as u64;
    for name in names {
        let path = format!("tiles/{name}");
        let (in_position, in_size) = record(&input_archive, &path)?;
        let (position, size) = record(&archive, &path)?;
        assert!(position >= previous, "{name} moved backwards");
        previous = position;

        let before = &input_data[in_position as usize..(in_position + in_size) as usize];
        let after = &data[position as usize..(position + size) as usize];
        if name.ends_with(".txt") {
            assert_eq!(after, before);
        } else {
            let expected: Vec<u8> = before.iter().rev().step_by(2).copied().collect();
            assert_eq!(after, expected.as_slice());
            expected_len -= (in_size - size) as u64;
        }
    }

    assert_eq!(stats.converted, 3);
    assert_eq!(data.len() as u64, expected_len);
    Ok(())
}

#[traced_test]
#[test]
fn nested_archive_size_matches_its_rewrite() -> Result<()> {
    let mut inner = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    inner.start_file("tiles/x_front_00_00.jpg")?;
    inner.write_all(&[7; 40]).into_diagnostic()?;
    inner.start_file("readme.txt")?;
    inner.write_all(b"0123456789").into_diagnostic()?;
    let inner = inner.finish()?;
    let inner_metadata = Archive::from_bytes(&inner)?.metadata_len() as u32;

    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("before.txt")?;
    writer.write_all(b"hello").into_diagnostic()?;
    writer.start_file("nested/inner.m4b")?;
    writer.write_all(&inner).into_diagnostic()?;
    writer.start_file("after.txt")?;
    writer.write_all(b"goodbye").into_diagnostic()?;
    let input = writer.finish()?;

    let (output, stats) = repack(&input, Fixed { len: 12, fill: 0xEE })?;
    let (archive, data) = data_region(&output)?;

    let (position, size) = record(&archive, "nested/inner.m4b")?;
    assert_eq!((position, size), (5, inner_metadata + 12 + 10));
    assert_eq!(record(&archive, "after.txt")?, (5 + size, 7));
    assert_eq!(stats.levels, 2);

    let nested = &data[position as usize..(position + size) as usize];
    let (nested_archive, nested_data) = data_region(nested)?;
    assert_eq!(record(&nested_archive, "tiles/x_front_00_00.jpg")?, (0, 12));
    assert_eq!(record(&nested_archive, "readme.txt")?, (12, 10));
    assert_eq!(&nested_data[12..], b"0123456789");

    let located = locate(Cursor::new(&output), &"nested/inner.m4b/readme.txt".parse()?)?;
    let start = located.offset as usize;
    assert_eq!(&output[start..start + located.size as usize], b"0123456789");
    Ok(())
}

/// Lets jobs finish only in the order given by `order`
struct Skewed {
    order: Vec<&'static str>,
    done: Mutex<usize>,
    turn: Condvar,
}

impl Transcoder for Skewed {
    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        mut out: Vec<u8>,
    ) -> Result<Vec<u8>, BoxError> {
        let slot = self
            .order
            .iter()
            .position(|&name| name == request.name)
            .ok_or("unexpected file")?;

        let mut done = self.done.lock();
        while *done != slot {
            self.turn.wait(&mut done);
        }
        out.extend_from_slice(request.name.as_bytes());
        *done += 1;
        self.turn.notify_all();
        Ok(out)
    }
}

#[traced_test]
#[test]
fn output_follows_enqueue_order_under_skew() -> Result<()> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    for name in ["A.jpg", "B.jpg", "C.jpg"] {
        writer.start_file(name)?;
        writer.write_all(&[0; 16]).into_diagnostic()?;
    }
    let input = writer.finish()?;

    let skewed = Skewed {
        order: vec!["B.jpg", "A.jpg", "C.jpg"],
        done: Mutex::new(0),
        turn: Condvar::new(),
    };
    let repacker = Repacker::new(RepackOptions::builder().workers(3).build(), skewed);
    let mut output = Cursor::new(Vec::new());
    repacker.repack(&input, &mut output)?;

    let output = output.into_inner();
    let (archive, data) = data_region(&output)?;
    assert_eq!(data, b"A.jpgB.jpgC.jpg");
    assert_eq!(record(&archive, "B.jpg")?, (5, 5));
    Ok(())
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, FileKind, Option<usize>)>>>);

impl Transcoder for Recorder {
    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        mut out: Vec<u8>,
    ) -> Result<Vec<u8>, BoxError> {
        self.0
            .lock()
            .push((request.name.to_string(), request.kind, request.layer));
        out.extend_from_slice(request.data);
        Ok(out)
    }
}

fn string(out: &mut Vec<u8>, text: &str) {
    let mut raw = text.as_bytes().to_vec();
    raw.push(0);
    swizzle_in_place(&mut raw);
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out.extend_from_slice(&raw);
}

fn record_file(id: &[u8; 4], version: u32, fields: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut body = version.to_le_bytes().to_vec();
    fields(&mut body);
    let mut out = id.to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn cube(layers: &[u8]) -> Result<Vec<u8>> {
    let water = record_file(b"WATR", 1, |body| {
        string(body, "ocean");
        body.extend_from_slice(&1u32.to_le_bytes());
        string(body, "wet");
    });

    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("cube/layers.bin")?;
    writer.write_all(layers).into_diagnostic()?;
    writer.start_file("water/ocean.bin")?;
    writer.write_all(&water).into_diagnostic()?;
    for name in ["sea_front_00_00.jpg", "sea_front_00_01.jpg"] {
        writer.start_file(&format!("cube/tiles/{name}"))?;
        writer.write_all(&[0xFF, 0xD8, 0xFF, 0xD9]).into_diagnostic()?;
    }
    Ok(writer.finish()?)
}

#[traced_test]
#[test]
fn flagged_tiles_reach_the_transcoder_as_special() -> Result<()> {
    let layers = record_file(b"LAYR", 2, |body| {
        string(body, "sea");
        string(body, "");
        body.extend_from_slice(&1u32.to_le_bytes());
        string(body, "wet");
        body.extend_from_slice(&1u32.to_le_bytes());
        string(body, "front_00_01");
    });
    let input = cube(&layers)?;

    let recorder = Recorder::default();
    let (output, stats) = repack(&input, recorder.clone())?;

    assert_eq!(output, input);
    assert_eq!(stats.special, 1);
    let mut seen = recorder.0.lock().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("sea_front_00_00.jpg".to_string(), FileKind::ImageStandard, None),
            ("sea_front_00_01.jpg".to_string(), FileKind::ImageSpecial, Some(0)),
        ]
    );
    Ok(())
}

#[traced_test]
#[test]
fn broken_records_only_disable_classification() -> Result<()> {
    let input = cube(b"JUNKJUNK")?;

    let recorder = Recorder::default();
    let (output, stats) = repack(&input, recorder.clone())?;

    assert_eq!(output, input);
    assert_eq!(stats.special, 0);
    assert_eq!(stats.converted, 2);
    assert!(recorder
        .0
        .lock()
        .iter()
        .all(|(_, kind, _)| *kind == FileKind::ImageStandard));
    assert!(logs_contain("continuing without classification"));
    Ok(())
}

#[traced_test]
#[test]
fn transcode_failure_is_reported() -> Result<()> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    for name in ["a.txt", "bad.jpg", "c.txt"] {
        writer.start_file(name)?;
        writer.write_all(&[1; 4000]).into_diagnostic()?;
    }
    let input = writer.finish()?;

    let repacker = Repacker::new(options(), refuse);
    let result = repacker.repack(&input, &mut Cursor::new(Vec::new()));

    assert!(matches!(
        result,
        Err(Error::Transcode { ref name, .. }) if name == "bad.jpg"
    ));
    Ok(())
}

#[test]
fn overlapping_conversions_are_rejected() -> Result<()> {
    let image_first = assemble(&[("a.jpg", 8, 0), ("b.txt", 8, 4)], &[0; 12])?;
    let result =
        Repacker::new(options(), halve).repack(&image_first, &mut Cursor::new(Vec::new()));
    assert!(matches!(
        result,
        Err(Error::OverlappingEntries {
            position: 4,
            previous_end: 8
        })
    ));

    let text_first = assemble(&[("a.txt", 8, 0), ("b.jpg", 4, 4)], &[0; 12])?;
    let result =
        Repacker::new(options(), halve).repack(&text_first, &mut Cursor::new(Vec::new()));
    assert!(matches!(
        result,
        Err(Error::OverlappingEntries {
            position: 4,
            previous_end: 8
        })
    ));
    Ok(())
}

#[test]
fn converted_aliases_of_different_sizes_are_rejected() -> Result<()> {
    let input = assemble(&[("a.jpg", 8, 0), ("b.txt", 4, 0)], &[0; 8])?;
    let result = Repacker::new(options(), halve).repack(&input, &mut Cursor::new(Vec::new()));
    assert!(matches!(
        result,
        Err(Error::AliasMismatch {
            position: 0,
            expected: 8,
            found: 4
        })
    ));
    Ok(())
}

/// One image wrapped in `levels` nested archives
fn wrapped(levels: usize) -> Result<Vec<u8>> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("tile.jpg")?;
    writer.write_all(&[7; 64]).into_diagnostic()?;
    let mut bytes = writer.finish()?;

    for _ in 0..levels {
        let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
        writer.start_file("inner.m4b")?;
        writer.write_all(&bytes).into_diagnostic()?;
        bytes = writer.finish()?;
    }
    Ok(bytes)
}

#[test]
fn nesting_up_to_the_limit_is_rewritten() -> Result<()> {
    let input = wrapped(MAX_NESTING)?;
    let (output, stats) = repack(&input, Fixed { len: 16, fill: 1 })?;

    assert_eq!(stats.levels, MAX_NESTING + 1);
    assert_eq!(stats.converted, 1);
    assert_eq!(stats.output_len, input.len() as u64 - 48);
    assert_eq!(output.len() as u64, stats.output_len);
    Ok(())
}

#[test]
fn nesting_past_the_limit_is_rejected() -> Result<()> {
    let input = wrapped(MAX_NESTING + 1)?;
    let result = Repacker::new(options(), Fixed { len: 16, fill: 1 })
        .repack(&input, &mut Cursor::new(Vec::new()));

    assert!(matches!(result, Err(Error::NestingTooDeep(limit)) if limit == MAX_NESTING));
    Ok(())
}

#[test]
fn invalid_input_is_rejected() {
    let result = Repacker::new(options(), halve)
        .repack(b"not an archive at all", &mut Cursor::new(Vec::new()));
    assert!(matches!(
        result,
        Err(Error::Archive(bigfile_archive::error::Error::InvalidSignature))
    ));
}

#[test]
fn pooled_buffers_produce_the_same_output() -> Result<()> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    for i in 0..20u8 {
        writer.start_file(&format!("tiles/t{i}.jpg"))?;
        writer.write_all(&vec![i; 50 + i as usize]).into_diagnostic()?;
        writer.start_file(&format!("data/d{i}.txt"))?;
        writer.write_all(&vec![i; 33]).into_diagnostic()?;
    }
    let input = writer.finish()?;

    let (expected, _) = repack(&input, halve)?;

    let pool = PooledAllocator::new(8);
    let repacker = Repacker::new(options(), halve).with_allocator(pool.clone());
    let mut output = Cursor::new(Vec::new());
    repacker.repack(&input, &mut output)?;

    assert_eq!(output.into_inner(), expected);
    assert!(pool.idle() > 0);
    Ok(())
}

#[test]
fn failed_file_repack_leaves_the_input_untouched() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("tiles.m4b");

    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("bad.jpg")?;
    writer.write_all(&[5; 64]).into_diagnostic()?;
    let input = writer.finish()?;
    std::fs::write(&path, &input).into_diagnostic()?;

    let result = Repacker::new(options(), refuse).repack_file(&path, None);
    assert!(matches!(result, Err(Error::Transcode { .. })));
    assert_eq!(std::fs::read(&path).into_diagnostic()?, input);
    assert_eq!(std::fs::read_dir(directory.path()).into_diagnostic()?.count(), 1);

    let stats = Repacker::new(options(), halve).repack_file(&path, None)?;
    assert_eq!(stats.output_len, input.len() as u64 - 32);
    assert_eq!(std::fs::metadata(&path).into_diagnostic()?.len(), stats.output_len);
    Ok(())
}
