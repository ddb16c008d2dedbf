use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Serialize;
use tracing::debug;

use crate::config::TableColumns;
use crate::error::KiraError;
use crate::fs_util;

/// Header-indexed view over a tab-separated table.
struct HeadedTable {
    path: PathBuf,
    headers: StringRecord,
    records: Vec<StringRecord>,
}

impl HeadedTable {
    fn read(path: &Path) -> Result<Self, KiraError> {
        let reader = fs_util::open_text(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let parse_err = |line: usize, err: csv::Error| KiraError::InputParse {
            path: path.to_path_buf(),
            line,
            message: err.to_string(),
        };
        let headers = rdr.headers().map_err(|err| parse_err(1, err))?.clone();
        let records = rdr
            .records()
            .enumerate()
            .map(|(idx, record)| record.map_err(|err| parse_err(idx + 2, err)))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(path = %path.display(), rows = records.len(), "table loaded");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            records,
        })
    }

    fn column(&self, name: &str) -> Result<usize, KiraError> {
        self.headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| KiraError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }
}

fn cell(record: &StringRecord, col: usize) -> Option<&str> {
    record
        .get(col)
        .map(str::trim)
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("nan"))
}

/// Accepts both `97.3` and `97,3`; anything unparseable is a gap.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse::<f64>().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityRecord {
    pub accession: Option<String>,
    pub completeness: Option<f64>,
    pub contamination: Option<f64>,
}

impl QualityRecord {
    /// RefSeq accession usable for remote lookups. IMG genome ids are marked
    /// with a trailing `*` and have none.
    pub fn refseq_accession(&self) -> Option<&str> {
        self.accession
            .as_deref()
            .filter(|accession| !accession.ends_with('*'))
    }
}

/// Quality metrics keyed by isolate id.
#[derive(Debug, Clone, Default)]
pub struct QualityTable {
    by_isolate: BTreeMap<String, QualityRecord>,
}

impl QualityTable {
    pub fn read(path: &Path, columns: &TableColumns) -> Result<Self, KiraError> {
        let table = HeadedTable::read(path)?;
        let isolate = table.column(&columns.isolate)?;
        let accession = table.column(&columns.accession)?;
        let completeness = table.column(&columns.completeness)?;
        let contamination = table.column(&columns.contamination)?;

        let mut by_isolate = BTreeMap::new();
        for record in &table.records {
            let Some(id) = cell(record, isolate) else {
                continue;
            };
            by_isolate
                .entry(id.to_string())
                .or_insert_with(|| QualityRecord {
                    accession: cell(record, accession).map(str::to_string),
                    completeness: cell(record, completeness).and_then(parse_decimal),
                    contamination: cell(record, contamination).and_then(parse_decimal),
                });
        }
        Ok(Self { by_isolate })
    }

    pub fn insert(&mut self, isolate: impl Into<String>, record: QualityRecord) {
        self.by_isolate.insert(isolate.into(), record);
    }

    pub fn get(&self, isolate: &str) -> Option<&QualityRecord> {
        self.by_isolate.get(isolate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceTaxon {
    pub genus: String,
    pub species: String,
}

/// Third-party genus/species calls keyed by clade; the first row per clade wins.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    by_clade: BTreeMap<String, ReferenceTaxon>,
}

impl ReferenceTable {
    pub fn read(path: &Path, columns: &TableColumns) -> Result<Self, KiraError> {
        let table = HeadedTable::read(path)?;
        let clade = table.column(&columns.reference_clade)?;
        let genus = table.column(&columns.reference_genus)?;
        let species = table.column(&columns.reference_species)?;

        let mut by_clade = BTreeMap::new();
        for record in &table.records {
            let Some(key) = cell(record, clade) else {
                continue;
            };
            by_clade
                .entry(key.to_string())
                .or_insert_with(|| ReferenceTaxon {
                    genus: record.get(genus).unwrap_or_default().trim().to_string(),
                    species: record.get(species).unwrap_or_default().trim().to_string(),
                });
        }
        Ok(Self { by_clade })
    }

    pub fn insert(&mut self, clade: impl Into<String>, taxon: ReferenceTaxon) {
        self.by_clade.insert(clade.into(), taxon);
    }

    pub fn get(&self, clade: &str) -> Option<&ReferenceTaxon> {
        self.by_clade.get(clade)
    }
}

/// Population-genomics cluster per strain (genome identifier).
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    by_strain: BTreeMap<String, String>,
}

impl PopulationTable {
    pub fn read(path: &Path, columns: &TableColumns) -> Result<Self, KiraError> {
        let table = HeadedTable::read(path)?;
        let strain = table.column(&columns.population_strain)?;
        let cluster = table.column(&columns.population_cluster)?;
        let by_strain = table
            .records
            .iter()
            .filter_map(|record| {
                Some((
                    cell(record, strain)?.to_string(),
                    cell(record, cluster)?.to_string(),
                ))
            })
            .collect();
        Ok(Self { by_strain })
    }

    pub fn get(&self, strain: &str) -> Option<&str> {
        self.by_strain.get(strain).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn quality_with_comma_decimals() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("genomes.tsv");
        fs::write(
            &path,
            "SAG or Isolate ID\tRefSeq Assembly (*IMG Genome ID)\tCompleteness\tContamination\n\
             HTCC1062\tGCF_000012345.1\t97,5\t0,8\n\
             HIMB59\t2504557020*\tnan\t1.2\n",
        )
        .unwrap();

        let table = QualityTable::read(&path, &TableColumns::default()).unwrap();
        let htcc = table.get("HTCC1062").unwrap();
        assert_eq!(htcc.completeness, Some(97.5));
        assert_eq!(htcc.contamination, Some(0.8));
        assert_eq!(htcc.refseq_accession(), Some("GCF_000012345.1"));

        let himb = table.get("HIMB59").unwrap();
        assert_eq!(himb.completeness, None);
        assert_eq!(himb.refseq_accession(), None);
    }

    #[test]
    fn missing_column_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ref.tsv");
        fs::write(&path, "Clade\tGenus\n1a\tPelagibacter\n").unwrap();
        let err = ReferenceTable::read(&path, &TableColumns::default()).unwrap_err();
        assert_matches!(err, KiraError::MissingColumn { .. });
    }
}
