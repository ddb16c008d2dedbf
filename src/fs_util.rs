use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::domain::GenomeId;
use crate::error::KiraError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::filesystem(format!("open zip {}", zip_path.display()), err))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(KiraError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Opens a text input, decompressing transparently when the name ends in `.gz`.
pub fn open_text(path: &Path) -> Result<Box<dyn Read>, KiraError> {
    let file = fs::File::open(path).map_err(|err| KiraError::InputRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let is_gz = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Genome files directly inside `dir`, sorted by identifier. Files without the
/// genome extension are ignored; the archive may be nested one level deep.
pub fn list_genome_files(
    dir: &Path,
    extension: &str,
) -> Result<Vec<(GenomeId, PathBuf)>, KiraError> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    let mut depth = 0usize;
    while !stack.is_empty() && depth < 2 {
        let mut next = Vec::new();
        for path in stack {
            let entries = fs::read_dir(&path)
                .map_err(|err| KiraError::filesystem(format!("read {}", path.display()), err))?;
            for entry in entries {
                let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
                let path = entry.path();
                if path.is_dir() {
                    next.push(path);
                } else if let Some(id) = GenomeId::from_file_name(&path, extension) {
                    out.push((id, path));
                }
            }
        }
        // Only descend when the top level held no genomes (zip with a root folder).
        if !out.is_empty() {
            break;
        }
        stack = next;
        depth += 1;
    }
    out.sort();
    Ok(out)
}

/// Genome identifiers from a list file, one per line; blank lines are skipped.
pub fn read_genome_list(path: &Path, extension: &str) -> Result<Vec<GenomeId>, KiraError> {
    let content = fs::read_to_string(path).map_err(|err| KiraError::InputRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| GenomeId::from_table_entry(line, None, extension))
        .collect())
}

pub fn copy_into(source: &Path, dest_dir: &Path) -> Result<PathBuf, KiraError> {
    let name = source
        .file_name()
        .ok_or_else(|| KiraError::Filesystem(format!("not a file: {}", source.display())))?;
    let target = dest_dir.join(name);
    fs::copy(source, &target)
        .map_err(|err| KiraError::filesystem(format!("copy {}", source.display()), err))?;
    Ok(target)
}

/// Copies every regular file of `source_dir` into `dest_dir` (non-recursive).
pub fn copy_dir_files(source_dir: &Path, dest_dir: &Path) -> Result<usize, KiraError> {
    let entries = fs::read_dir(source_dir)
        .map_err(|err| KiraError::filesystem(format!("read {}", source_dir.display()), err))?;
    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            copy_into(&path, dest_dir)?;
            copied += 1;
        }
    }
    Ok(copied)
}

pub fn ensure_dir(path: &Path) -> Result<(), KiraError> {
    fs::create_dir_all(path)
        .map_err(|err| KiraError::filesystem(format!("create {}", path.display()), err))
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), KiraError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(KiraError::filesystem(format!("replace {}", path.display()), err));
    }
    Ok(())
}

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), KiraError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}
