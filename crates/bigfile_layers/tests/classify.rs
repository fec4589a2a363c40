use std::io::Write;

use bigfile_archive::{write::BigFileWriterOptions, Archive, BigFileWriter, FileKind};
use bigfile_layers::{error::Error, swizzle::swizzle_in_place, Classification, LayerId};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn string(out: &mut Vec<u8>, text: &str) {
    let mut raw = text.as_bytes().to_vec();
    raw.push(0);
    swizzle_in_place(&mut raw);
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out.extend_from_slice(&raw);
}

fn record(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn layer(name: &str, tag: &str, cell: &str) -> Vec<u8> {
    let mut body = 2u32.to_le_bytes().to_vec();
    string(&mut body, name);
    string(&mut body, "");
    body.extend_from_slice(&1u32.to_le_bytes());
    string(&mut body, tag);
    body.extend_from_slice(&1u32.to_le_bytes());
    string(&mut body, cell);
    record(b"LAYR", &body)
}

fn water(target: &str) -> Vec<u8> {
    let mut body = 1u32.to_le_bytes().to_vec();
    string(&mut body, "ocean");
    body.extend_from_slice(&1u32.to_le_bytes());
    string(&mut body, target);
    record(b"WATR", &body)
}

fn build(layers: &[u8], water_records: &[u8]) -> Result<Vec<u8>, Error> {
    let mut writer = BigFileWriter::new(Vec::new(), BigFileWriterOptions::default());
    writer.start_file("cube//layers.bin")?;
    writer.write_all(layers)?;
    writer.start_file("water/ocean.bin")?;
    writer.write_all(water_records)?;
    for name in ["sea_front_00_00.jpg", "sea_front_00_01.jpg", "sky_top_00_00.jpg"] {
        writer.start_file(&format!("cube/tiles/{name}"))?;
        writer.write_all(&[0xFF, 0xD8, 0xFF, 0xD9])?;
    }
    Ok(writer.finish()?)
}

#[traced_test]
#[test]
fn flagged_tiles_become_special() -> Result<(), Error> {
    let mut layers = layer("sea", "wet", "front_00_01");
    layers.extend(layer("sky", "dry", "top_00_00"));
    let bytes = build(&layers, &water("wet"))?;

    let mut archive = Archive::from_bytes(&bytes)?;
    let data = &bytes[archive.metadata_len() as usize..];
    let classification = Classification::build(&archive, data)?;
    assert_eq!(classification.apply(&mut archive), 1);

    let kind_of = |path: &str| {
        let id = archive.find(&path.parse().expect("valid path")).expect("present");
        (archive.file(id).kind, archive.file(id).layer)
    };
    assert_eq!(
        kind_of("cube/tiles/sea_front_00_01.jpg"),
        (FileKind::ImageSpecial, Some(LayerId(0).0))
    );
    assert_eq!(
        kind_of("cube/tiles/sea_front_00_00.jpg"),
        (FileKind::ImageStandard, None)
    );
    assert_eq!(kind_of("cube/tiles/sky_top_00_00.jpg"), (FileKind::ImageStandard, None));
    Ok(())
}

#[test]
fn corrupt_records_fail_the_pass() -> Result<(), Error> {
    let mut layers = layer("sea", "wet", "front_00_01");
    layers.truncate(layers.len() - 3);
    let bytes = build(&layers, &water("wet"))?;

    let archive = Archive::from_bytes(&bytes)?;
    let data = &bytes[archive.metadata_len() as usize..];
    assert!(Classification::build(&archive, data).is_err());
    Ok(())
}

#[test]
fn invalid_cell_fails_the_pass() -> Result<(), Error> {
    let bytes = build(&layer("sea", "wet", "Front_00_01"), &water("wet"))?;

    let archive = Archive::from_bytes(&bytes)?;
    let data = &bytes[archive.metadata_len() as usize..];
    assert!(matches!(
        Classification::build(&archive, data),
        Err(Error::InvalidCell(cell)) if cell == "Front_00_01"
    ));
    Ok(())
}
