//! Paths addressing one file across nested archives

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// A sequence of directory or archive names followed by a file name
///
/// Either `/` or `\` separates segments. Empty segments are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ArchivePath {
    segments: Vec<String>,
}

impl ArchivePath {
    /// Build a path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// All segments, the file name last
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether the path has no segments at all
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for ArchivePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let path = ArchivePath::new(s.split(['/', '\\']));
        if path.is_empty() {
            return Err(Error::CustomError(format!("'{s}' does not name a file")));
        }
        Ok(path)
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
