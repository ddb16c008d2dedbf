use std::fmt;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Literal used wherever a call could not be made.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenomeId(String);

impl GenomeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Recovers the bare identifier from a path-like table entry: the directory
    /// prefix (explicit or any) and the genome extension are dropped.
    pub fn from_table_entry(raw: &str, prefix: Option<&str>, extension: &str) -> Self {
        let trimmed = raw.trim();
        let without_prefix = match prefix {
            Some(prefix) if !prefix.is_empty() => trimmed.strip_prefix(prefix).unwrap_or(trimmed),
            _ => trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed),
        };
        let bare = without_prefix
            .strip_suffix(extension)
            .unwrap_or(without_prefix);
        Self(bare.to_string())
    }

    /// Identifier for a genome file on disk (`{id}{extension}`).
    pub fn from_file_name(path: &Path, extension: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(extension)?;
        if stem.is_empty() {
            return None;
        }
        Some(Self(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}{extension}", self.0)
    }
}

impl fmt::Display for GenomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Clade(String);

impl Clade {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Clade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based position of a reference group in the component ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupIndex(usize);

impl GroupIndex {
    pub fn new(value: usize) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for GroupIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupIndex {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(GroupIndex::new)
            .ok_or_else(|| KiraError::InvalidGroupIndex(value.to_string()))
    }
}

/// The single "unknown" encoding for a run. Built once from the number of
/// reference groups; its index is always past the last valid group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownSentinel {
    index: usize,
}

impl UnknownSentinel {
    pub fn for_group_count(groups: usize) -> Self {
        Self { index: groups + 1 }
    }

    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for UnknownSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(UNKNOWN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupLabel {
    Group(GroupIndex),
    Unknown(UnknownSentinel),
}

impl GroupLabel {
    pub fn is_unknown(&self) -> bool {
        matches!(self, GroupLabel::Unknown(_))
    }

    /// Numeric position; unknown sorts after every group.
    pub fn ordinal(&self) -> usize {
        match self {
            GroupLabel::Group(index) => index.get(),
            GroupLabel::Unknown(sentinel) => sentinel.index(),
        }
    }
}

impl fmt::Display for GroupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupLabel::Group(index) => write!(f, "{index}"),
            GroupLabel::Unknown(sentinel) => write!(f, "{sentinel}"),
        }
    }
}

/// Numbering convention for connected components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComponentOrder {
    /// Largest component is group 1.
    #[default]
    Descending,
    /// Smallest component is group 1.
    Ascending,
}

impl fmt::Display for ComponentOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentOrder::Descending => write!(f, "descending"),
            ComponentOrder::Ascending => write!(f, "ascending"),
        }
    }
}

pub const DEFAULT_NAME_PATTERN: &str = r"^(?P<isolate>[^_]+)_(?P<clade>[^_.]+)";

/// Splits genome identifiers into isolate id and clade tag.
#[derive(Debug, Clone)]
pub struct GenomeNaming {
    pattern: Regex,
}

impl GenomeNaming {
    pub fn new(pattern: &str) -> Result<Self, KiraError> {
        let pattern =
            Regex::new(pattern).map_err(|err| KiraError::InvalidPattern(err.to_string()))?;
        let names = pattern.capture_names().flatten().collect::<Vec<_>>();
        if !names.contains(&"clade") {
            return Err(KiraError::InvalidPattern(
                "pattern needs a named group `clade`".to_string(),
            ));
        }
        Ok(Self { pattern })
    }

    pub fn clade(&self, genome: &GenomeId) -> Option<Clade> {
        self.pattern
            .captures(genome.as_str())
            .and_then(|caps| caps.name("clade"))
            .map(|m| Clade::new(m.as_str()))
    }

    /// Falls back to the whole identifier when the pattern has no `isolate` group.
    pub fn isolate_id<'a>(&self, genome: &'a GenomeId) -> &'a str {
        self.pattern
            .captures(genome.as_str())
            .and_then(|caps| caps.name("isolate"))
            .map(|m| m.as_str())
            .unwrap_or(genome.as_str())
    }
}
