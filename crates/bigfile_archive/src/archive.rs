//! In-memory model of one archive level
//!
//! Directories and files live in two flat arenas owned by [`Archive`] and refer to each other by index.
//! Nothing here borrows the archive bytes, so a parsed level can be mutated freely while its data is
//! being rewritten.

use std::collections::BTreeMap;

use crate::path::ArchivePath;
use crate::types::{EntryRecord, FileKind, Header, Name};

/// Index of a file inside its [`Archive`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub usize);

/// Index of a directory inside its [`Archive`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirId(pub usize);

/// A file record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct File {
    /// Optional name. Unnamed files match any path segment.
    pub name: Option<Name>,
    /// Size of the data in bytes
    pub size: u32,
    /// Offset of the data from the start of the owning level's data region
    pub position: u32,
    /// Kind derived from the extension, possibly promoted by classification
    pub kind: FileKind,
    /// Index of the classification layer that flagged this file
    pub layer: Option<usize>,
}

impl File {
    /// Create a file, deriving its kind from the name.
    pub fn new(name: Option<Name>, size: u32, position: u32) -> Self {
        let kind = name.as_ref().map_or(FileKind::None, Name::kind);
        Self {
            name,
            size,
            position,
            kind,
            layer: None,
        }
    }

    /// Name as text, empty for unnamed files
    pub fn display_name(&self) -> String {
        self.name
            .as_ref()
            .map(|n| n.to_str_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The size and position pair as stored
    pub fn record(&self) -> EntryRecord {
        EntryRecord {
            size: self.size,
            position: self.position,
        }
    }

    /// End of the data relative to the data region
    pub fn end(&self) -> u64 {
        self.position as u64 + self.size as u64
    }

    fn matches(&self, segment: &str) -> bool {
        self.name.as_ref().map_or(true, |n| n.matches(segment))
    }
}

/// A directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
    /// Optional name. Unnamed directories are transparent to lookups.
    pub name: Option<Name>,
    /// Child directories in stored order
    pub dirs: Vec<DirId>,
    /// Record files, written before every other file
    pub binary_files: Vec<FileId>,
    /// Every other file
    pub files: Vec<FileId>,
}

impl Directory {
    /// Files in written order: binary files first.
    pub fn all_files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.binary_files.iter().chain(self.files.iter()).copied()
    }

    /// Number of file records written for this directory
    pub fn file_count(&self) -> usize {
        self.binary_files.len() + self.files.len()
    }
}

/// All files sharing one input position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionGroup {
    /// The shared position
    pub position: u32,
    /// Members in written order
    pub files: Vec<FileId>,
    /// Largest size among the members
    pub size: u32,
}

impl PositionGroup {
    /// End of the group's input extent relative to the data region
    pub fn end(&self) -> u64 {
        self.position as u64 + self.size as u64
    }
}

/// One parsed archive level
///
/// ```
/// use bigfile_archive::{Archive, File, Name};
///
/// let mut archive = Archive::new();
/// let cube = archive.add_directory(archive.root(), Some(Name::new("cube")));
/// let id = archive.add_file(cube, File::new(Some(Name::new("node.bin")), 4, 0));
///
/// assert_eq!(archive.find(&"cube/NODE.BIN".parse().unwrap()), Some(id));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    /// Level header
    pub header: Header,
    dirs: Vec<Directory>,
    files: Vec<File>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    /// An archive holding a single unnamed root directory.
    pub fn new() -> Self {
        Self {
            header: Header::default(),
            dirs: vec![Directory::default()],
            files: Vec::new(),
        }
    }

    /// The root directory
    pub fn root(&self) -> DirId {
        DirId(0)
    }

    /// Add a directory below `parent`.
    pub fn add_directory(&mut self, parent: DirId, name: Option<Name>) -> DirId {
        let id = DirId(self.dirs.len());
        self.dirs.push(Directory {
            name,
            ..Default::default()
        });
        self.dirs[parent.0].dirs.push(id);
        id
    }

    /// Add a file to `parent`, sorting it into the binary list by its kind.
    pub fn add_file(&mut self, parent: DirId, file: File) -> FileId {
        let id = FileId(self.files.len());
        let binary = file.kind == FileKind::Binary;
        self.files.push(file);

        let dir = &mut self.dirs[parent.0];
        if binary {
            dir.binary_files.push(id);
        } else {
            dir.files.push(id);
        }
        id
    }

    /// Get a directory.
    pub fn dir(&self, id: DirId) -> &Directory {
        &self.dirs[id.0]
    }

    /// Get a directory for modification.
    pub fn dir_mut(&mut self, id: DirId) -> &mut Directory {
        &mut self.dirs[id.0]
    }

    /// Get a file.
    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.0]
    }

    /// Get a file for modification.
    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id.0]
    }

    /// Number of files on this level
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether this level holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of directories on this level, including the root
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Iterate over every file in arena order.
    pub fn files(&self) -> impl Iterator<Item = (FileId, &File)> {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i), f))
    }

    /// Every file below `dir`, in written order, together with its slash-joined path.
    ///
    /// Unnamed directories add no segment. Unnamed files have an empty last segment.
    pub fn walk(&self, dir: DirId) -> Vec<(String, FileId)> {
        let mut out = Vec::new();
        self.walk_into(dir, String::new(), &mut out);
        out
    }

    fn walk_into(&self, dir: DirId, prefix: String, out: &mut Vec<(String, FileId)>) {
        let directory = self.dir(dir);
        for &child in &directory.dirs {
            let prefix = match &self.dir(child).name {
                Some(name) => format!("{prefix}{name}/"),
                None => prefix.clone(),
            };
            self.walk_into(child, prefix, out);
        }
        for id in directory.all_files() {
            out.push((format!("{prefix}{}", self.file(id).display_name()), id));
        }
    }

    /// Find a file of this level by path.
    ///
    /// The root's own name is never matched. Segments compare ignoring ASCII case, unnamed directories
    /// are passed through without consuming a segment and unnamed files match any final segment.
    pub fn find(&self, path: &ArchivePath) -> Option<FileId> {
        if path.is_empty() {
            return None;
        }
        self.find_below(self.root(), path.segments())
    }

    fn find_below(&self, dir: DirId, rest: &[String]) -> Option<FileId> {
        let directory = self.dir(dir);
        if let [dir_name, tail @ ..] = rest {
            for &child in &directory.dirs {
                let found = match &self.dir(child).name {
                    None => self.find_below(child, rest),
                    Some(name) if !tail.is_empty() && name.matches(dir_name) => {
                        self.find_below(child, tail)
                    }
                    Some(_) => None,
                };
                if found.is_some() {
                    return found;
                }
            }
        }
        match rest {
            [file_name] => directory
                .all_files()
                .find(|&id| self.file(id).matches(file_name)),
            _ => None,
        }
    }

    /// Find a directory by path, passing through unnamed directories.
    pub fn find_dir(&self, segments: &[&str]) -> Option<DirId> {
        self.find_dir_below(self.root(), segments)
    }

    fn find_dir_below(&self, dir: DirId, rest: &[&str]) -> Option<DirId> {
        let [head, tail @ ..] = rest else {
            return Some(dir);
        };
        for &child in &self.dir(dir).dirs {
            let found = match &self.dir(child).name {
                None => self.find_dir_below(child, rest),
                Some(name) if name.matches(head) => self.find_dir_below(child, tail),
                Some(_) => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Every file below `dir`, in written order
    pub fn files_below(&self, dir: DirId) -> Vec<FileId> {
        self.walk(dir).into_iter().map(|(_, id)| id).collect()
    }

    /// Group every file by its position, ascending.
    pub fn position_groups(&self) -> Vec<PositionGroup> {
        let mut by_position: BTreeMap<u32, Vec<FileId>> = BTreeMap::new();
        for (_, id) in self.walk(self.root()) {
            by_position
                .entry(self.file(id).position)
                .or_default()
                .push(id);
        }

        by_position
            .into_iter()
            .map(|(position, files)| {
                let size = files
                    .iter()
                    .map(|&id| self.file(id).size)
                    .max()
                    .unwrap_or_default();
                PositionGroup {
                    position,
                    files,
                    size,
                }
            })
            .collect()
    }

    /// Encoded length of the header and directory tree.
    ///
    /// The data region starts right after it.
    pub fn metadata_len(&self) -> u64 {
        Header::SIZE + self.dir_len(self.root())
    }

    fn dir_len(&self, dir: DirId) -> u64 {
        let directory = self.dir(dir);
        let children: u64 = directory.dirs.iter().map(|&d| self.dir_len(d)).sum();
        let files: u64 = directory
            .all_files()
            .map(|id| Name::encoded_len(self.file(id).name.as_ref()) + EntryRecord::SIZE)
            .sum();

        Name::encoded_len(directory.name.as_ref()) + 1 + children + 4 + files
    }

    /// End of the furthest file relative to the data region
    pub fn data_extent(&self) -> u64 {
        self.files.iter().map(File::end).max().unwrap_or_default()
    }
}
