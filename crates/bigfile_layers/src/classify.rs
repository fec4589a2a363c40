//! Deciding which cube tiles need special handling
//!
//! Layers touched by water keep their flagged tiles at a higher quality. The records describing layers,
//! texture boxes and water resources live in `.bin` files below the top level `cube` and `water`
//! directories. The result maps image stems to the index of the layer that flagged them.

use bigfile_archive::{error::Error as ArchiveError, Archive, FileKind};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument, trace};

use crate::error::Result;
use crate::records::{Layer, OffsetProvider, Record, StateData, TextureBox, WaterResource};
use crate::tile::Face;

/// Top level directories holding record files
pub const RECORD_DIRECTORIES: [&str; 2] = ["cube", "water"];

/// Index of a layer inside a [`Classification`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub usize);

/// Flagged tiles of one layer, by face, then row, then column
pub type TileMask = BTreeMap<Face, BTreeMap<u8, BTreeSet<u8>>>;

/// Everything learned from the record files of one archive level
#[derive(Debug, Clone, Default)]
pub struct Classification {
    layers: Vec<Layer>,
    boxes: IndexMap<String, TextureBox>,
    water: Vec<WaterResource>,
    offsets: Vec<OffsetProvider>,
    states: Vec<StateData>,
    lookup: HashMap<String, LayerId>,
}

impl Classification {
    /// Read the record files of `archive`, whose data region is `data`.
    #[instrument(skip_all, err)]
    pub fn build(archive: &Archive, data: &[u8]) -> Result<Classification> {
        let mut records = Vec::new();

        for directory in RECORD_DIRECTORIES {
            let Some(dir) = archive.find_dir(&[directory]) else {
                continue;
            };
            for id in archive.files_below(dir) {
                let file = archive.file(id);
                if file.kind != FileKind::Binary {
                    continue;
                }

                let bytes = data
                    .get(file.position as usize..file.end() as usize)
                    .ok_or(ArchiveError::BoundsViolation {
                        declared: file.end(),
                        remaining: data.len() as u64,
                    })?;
                trace!(file = %file.display_name(), size = file.size, "reading records");
                records.extend(Record::read_all(bytes)?);
            }
        }

        let classification = Classification::from_records(records);
        debug!(
            layers = classification.layers.len(),
            tiles = classification.lookup.len(),
            "built classification"
        );
        Ok(classification)
    }

    /// Collect records and derive the tile lookup.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Classification {
        let mut classification = Classification::default();
        for record in records {
            match record {
                Record::Layer(layer) => classification.layers.push(layer),
                Record::TextureBox(texture_box) => {
                    classification
                        .boxes
                        .insert(texture_box.name.clone(), texture_box);
                }
                Record::Water(water) => classification.water.push(water),
                Record::Offset(offset) => classification.offsets.push(offset),
                Record::State(state) => classification.states.push(state),
            }
        }

        let targets: HashSet<&str> = classification
            .water
            .iter()
            .flat_map(|w| w.targets.iter().map(String::as_str))
            .collect();

        let mut lookup = HashMap::new();
        for (index, layer) in classification.layers.iter().enumerate() {
            if !classification.touches(layer, &targets) {
                continue;
            }
            for cell in &layer.cells {
                lookup.entry(cell.stem(&layer.name)).or_insert(LayerId(index));
            }
        }
        classification.lookup = lookup;
        classification
    }

    fn touches(&self, layer: &Layer, targets: &HashSet<&str>) -> bool {
        let tagged = layer.tags.iter().any(|t| targets.contains(t.as_str()));
        let boxed = layer.texture_box.as_deref().is_some_and(|name| {
            targets.contains(name)
                || self
                    .boxes
                    .get(name)
                    .is_some_and(|b| b.tags.iter().any(|t| targets.contains(t.as_str())))
        });
        tagged || boxed
    }

    /// Whether nothing is flagged
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// All layers in record order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Get a layer.
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    /// Get a texture box by name.
    pub fn texture_box(&self, name: &str) -> Option<&TextureBox> {
        self.boxes.get(name)
    }

    /// Offsets that apply to the named layer
    pub fn offsets_for<'a>(&'a self, layer: &'a str) -> impl Iterator<Item = &'a OffsetProvider> {
        self.offsets.iter().filter(move |o| o.layer == layer)
    }

    /// State values stored under `name`
    pub fn state(&self, name: &str) -> Option<&StateData> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Tiles of a layer that are flagged, if the layer is touched by water.
    pub fn mask(&self, id: LayerId) -> TileMask {
        let mut mask = TileMask::new();
        let Some(layer) = self.layer(id) else {
            return mask;
        };
        for cell in &layer.cells {
            if self.lookup.get(&cell.stem(&layer.name)) == Some(&id) {
                mask.entry(cell.face)
                    .or_default()
                    .entry(cell.row)
                    .or_default()
                    .insert(cell.column);
            }
        }
        mask
    }

    /// Layer that flagged the image called `file_name`, compared without its extension.
    pub fn layer_for(&self, file_name: &str) -> Option<LayerId> {
        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        self.lookup.get(stem).copied()
    }

    /// Promote every flagged image of `archive` and return how many were promoted.
    pub fn apply(&self, archive: &mut Archive) -> usize {
        if self.is_empty() {
            return 0;
        }

        let flagged: Vec<_> = archive
            .files()
            .filter(|(_, f)| f.kind.is_image())
            .filter_map(|(id, f)| Some((id, self.layer_for(&f.name.as_ref()?.to_str_lossy())?)))
            .collect();

        for &(id, layer) in &flagged {
            let file = archive.file_mut(id);
            file.kind = FileKind::ImageSpecial;
            file.layer = Some(layer.0);
        }
        flagged.len()
    }
}
