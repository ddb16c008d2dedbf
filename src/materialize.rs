use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::domain::{GenomeId, GroupIndex, GroupLabel};
use crate::error::KiraError;
use crate::fs_util;
use crate::identity::Partition;

const SOURCE_DIR_PREFIX: &str = "source_genomes_";

/// Directory naming for staged groups under one output root.
#[derive(Debug, Clone)]
pub struct GroupLayout {
    root: Utf8PathBuf,
}

impl GroupLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_path(root: &Path) -> Result<Self, KiraError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
            .map_err(|_| KiraError::Filesystem("non-utf8 output path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn source_dir(&self, index: GroupIndex) -> Utf8PathBuf {
        self.root.join(format!("{SOURCE_DIR_PREFIX}{index}"))
    }

    /// Group index encoded in a `source_genomes_{i}` directory name.
    pub fn index_from_dir(path: &Path) -> Option<GroupIndex> {
        path.file_name()?
            .to_str()?
            .strip_prefix(SOURCE_DIR_PREFIX)?
            .parse::<GroupIndex>()
            .ok()
    }

    pub fn test_dir(&self) -> Utf8PathBuf {
        self.root.join("test_genomes")
    }

    pub fn dir_for(&self, label: GroupLabel) -> Utf8PathBuf {
        match label {
            GroupLabel::Group(index) => self.source_dir(index),
            GroupLabel::Unknown(_) => self.test_dir(),
        }
    }
}

/// Where genome files come from: a directory or a zip archive of `{id}.fa`.
#[derive(Debug, Clone)]
pub enum GenomeArchive {
    Directory(PathBuf),
    Zip(PathBuf),
}

impl GenomeArchive {
    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        if path.is_dir() {
            return Ok(GenomeArchive::Directory(path.to_path_buf()));
        }
        let is_zip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip && path.is_file() {
            return Ok(GenomeArchive::Zip(path.to_path_buf()));
        }
        Err(KiraError::InputRead {
            path: path.to_path_buf(),
            message: "expected a genome directory or .zip archive".to_string(),
        })
    }

    /// Extracted view of the archive; the temp dir (if any) lives as long as the view.
    pub fn open(&self, extension: &str) -> Result<ArchiveView, KiraError> {
        match self {
            GenomeArchive::Directory(dir) => Ok(ArchiveView {
                files: fs_util::list_genome_files(dir, extension)?.into_iter().collect(),
                _extracted: None,
            }),
            GenomeArchive::Zip(zip_path) => {
                let temp = tempfile::Builder::new()
                    .prefix("kira-sp-archive")
                    .tempdir()
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
                fs_util::extract_zip(zip_path, temp.path())?;
                info!(archive = %zip_path.display(), "genome archive extracted");
                Ok(ArchiveView {
                    files: fs_util::list_genome_files(temp.path(), extension)?
                        .into_iter()
                        .collect(),
                    _extracted: Some(temp),
                })
            }
        }
    }
}

pub struct ArchiveView {
    files: BTreeMap<GenomeId, PathBuf>,
    _extracted: Option<TempDir>,
}

impl ArchiveView {
    pub fn files(&self) -> &BTreeMap<GenomeId, PathBuf> {
        &self.files
    }

    pub fn path_of(&self, genome: &GenomeId) -> Option<&Path> {
        self.files.get(genome).map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyFailure {
    pub genome: GenomeId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializeReport {
    pub layout_root: String,
    pub group_dirs: Vec<String>,
    pub test_dir: String,
    pub copied: usize,
    pub archive_only: Vec<GenomeId>,
    pub failures: Vec<CopyFailure>,
}

pub struct GroupMaterializer {
    layout: GroupLayout,
    extension: String,
}

impl GroupMaterializer {
    pub fn new(layout: GroupLayout, extension: impl Into<String>) -> Self {
        Self {
            layout,
            extension: extension.into(),
        }
    }

    pub fn layout(&self) -> &GroupLayout {
        &self.layout
    }

    /// Stages every genome of the partition, then every archive file the
    /// partition does not mention (as unassigned). Per-genome copy failures are
    /// collected, not raised.
    pub fn materialize(
        &self,
        partition: &mut Partition,
        archive: &ArchiveView,
    ) -> Result<MaterializeReport, KiraError> {
        let archive_only = archive
            .files()
            .keys()
            .filter(|genome| matches!(partition.group_of(genome), GroupLabel::Unknown(_)))
            .filter(|genome| !partition.unassigned().contains(*genome))
            .cloned()
            .collect::<Vec<_>>();
        if !archive_only.is_empty() {
            warn!(
                count = archive_only.len(),
                "archive genomes absent from the identity table are staged as unassigned"
            );
        }
        partition.absorb_unassigned(archive_only.iter().cloned());

        let mut group_dirs = Vec::new();
        for group in partition.groups() {
            let dir = self.layout.source_dir(group.index);
            fs_util::ensure_dir(dir.as_std_path())?;
            group_dirs.push(dir.to_string());
        }
        let test_dir = self.layout.test_dir();
        fs_util::ensure_dir(test_dir.as_std_path())?;

        let mut copied = 0;
        let mut failures = Vec::new();
        for genome in partition.genomes() {
            let target = self.layout.dir_for(partition.group_of(&genome));
            let Some(source) = archive.path_of(&genome) else {
                warn!(genome = %genome, "genome file missing from archive");
                failures.push(CopyFailure {
                    reason: format!("no {} in archive", genome.file_name(&self.extension)),
                    genome,
                });
                continue;
            };
            match fs_util::copy_into(source, target.as_std_path()) {
                Ok(_) => copied += 1,
                Err(err) => {
                    warn!(genome = %genome, error = %err, "genome copy failed");
                    failures.push(CopyFailure {
                        genome,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            copied,
            failures = failures.len(),
            groups = group_dirs.len(),
            root = %self.layout.root(),
            "groups materialized"
        );

        Ok(MaterializeReport {
            layout_root: self.layout.root().to_string(),
            group_dirs,
            test_dir: test_dir.to_string(),
            copied,
            archive_only,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = GroupLayout::new(Utf8PathBuf::from("/runs/sar11"));
        let index = GroupIndex::new(2).unwrap();
        assert!(layout.source_dir(index).ends_with("source_genomes_2"));
        assert!(layout.test_dir().ends_with("test_genomes"));
    }
}
