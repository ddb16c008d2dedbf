use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{GenomeId, GenomeNaming, GroupIndex, GroupLabel, UNKNOWN, UnknownSentinel};
use crate::error::KiraError;
use crate::fs_util;
use crate::identity::Partition;
use crate::orchestrator::VerdictAggregate;
use crate::tables::{PopulationTable, QualityTable, ReferenceTable};
use crate::taxonomy::TaxonomyIndex;

pub const COLUMNS: [&str; 12] = [
    "Accession ID",
    "Isolate ID",
    "Clade",
    "Completeness",
    "Contamination",
    "ANI species",
    "ConSpeciFix species",
    "Population species",
    "GTDB genus",
    "GTDB species",
    "Proposed genus",
    "Proposed species",
];

/// Oracle-derived species call. Several unanimous groups are all reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleCall {
    Groups(Vec<GroupIndex>),
    Unknown(UnknownSentinel),
}

impl OracleCall {
    pub fn is_unknown(&self) -> bool {
        matches!(self, OracleCall::Unknown(_))
    }
}

impl fmt::Display for OracleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleCall::Groups(groups) => {
                let joined = groups
                    .iter()
                    .map(GroupIndex::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                f.write_str(&joined)
            }
            OracleCall::Unknown(sentinel) => write!(f, "{sentinel}"),
        }
    }
}

impl Serialize for OracleCall {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn serialize_label<S: serde::Serializer>(
    label: &GroupLabel,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(label)
}

/// One output row. Every field is populated; gaps carry the `unknown` literal.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRow {
    pub genome: GenomeId,
    pub accession: String,
    pub isolate_id: String,
    pub clade: String,
    pub completeness: String,
    pub contamination: String,
    #[serde(serialize_with = "serialize_label")]
    pub ani_species: GroupLabel,
    pub oracle_species: OracleCall,
    pub population_species: String,
    pub gtdb_genus: String,
    pub gtdb_species: String,
    pub proposed_genus: String,
    pub proposed_species: String,
}

impl ClassificationRow {
    pub fn cells(&self) -> [String; 12] {
        [
            self.accession.clone(),
            self.isolate_id.clone(),
            self.clade.clone(),
            self.completeness.clone(),
            self.contamination.clone(),
            self.ani_species.to_string(),
            self.oracle_species.to_string(),
            self.population_species.clone(),
            self.gtdb_genus.clone(),
            self.gtdb_species.clone(),
            self.proposed_genus.clone(),
            self.proposed_species.clone(),
        ]
    }
}

fn known(value: Option<impl Into<String>>) -> String {
    value
        .map(Into::into)
        .filter(|value: &String| !value.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

pub struct ConsensusResolver<'a> {
    pub partition: &'a Partition,
    pub verdicts: &'a VerdictAggregate,
    pub taxonomy: &'a TaxonomyIndex,
    pub reference: &'a ReferenceTable,
    pub quality: &'a QualityTable,
    pub population: Option<&'a PopulationTable>,
    pub naming: &'a GenomeNaming,
}

impl ConsensusResolver<'_> {
    /// One row per distinct genome, in input order.
    pub fn resolve(&self, genomes: &[GenomeId]) -> Vec<ClassificationRow> {
        let mut seen = BTreeSet::new();
        let rows = genomes
            .iter()
            .filter(|genome| seen.insert((*genome).clone()))
            .map(|genome| self.resolve_genome(genome))
            .collect::<Vec<_>>();
        let unresolved = rows
            .iter()
            .filter(|row| row.oracle_species.is_unknown())
            .count();
        info!(rows = rows.len(), unresolved, "classification resolved");
        rows
    }

    pub fn resolve_genome(&self, genome: &GenomeId) -> ClassificationRow {
        let isolate = self.naming.isolate_id(genome);
        let clade = self.naming.clade(genome);
        let quality = self.quality.get(isolate);
        if quality.is_none() {
            debug!(genome = %genome, isolate, "no quality entry");
        }
        let taxon = self.taxonomy.get(genome);
        let reference = clade.as_ref().and_then(|clade| self.reference.get(clade.as_str()));

        ClassificationRow {
            genome: genome.clone(),
            accession: known(quality.and_then(|q| q.accession.clone())),
            isolate_id: isolate.to_string(),
            clade: known(clade.as_ref().map(|clade| clade.to_string())),
            completeness: known(quality.and_then(|q| q.completeness).map(|v| v.to_string())),
            contamination: known(quality.and_then(|q| q.contamination).map(|v| v.to_string())),
            ani_species: self.partition.group_of(genome),
            oracle_species: self.oracle_call(clade.as_ref().map(|clade| clade.as_str())),
            population_species: known(
                self.population
                    .and_then(|table| table.get(genome.as_str())),
            ),
            gtdb_genus: known(taxon.and_then(|t| t.genus())),
            gtdb_species: known(taxon.and_then(|t| t.species())),
            proposed_genus: known(reference.map(|r| r.genus.clone())),
            proposed_species: known(reference.map(|r| r.species.clone())),
        }
    }

    fn oracle_call(&self, clade: Option<&str>) -> OracleCall {
        let targets = clade
            .map(|clade| self.verdicts.unanimous_targets(clade))
            .unwrap_or_default();
        if targets.is_empty() {
            OracleCall::Unknown(self.partition.unknown())
        } else {
            OracleCall::Groups(targets)
        }
    }
}

/// Writes the tab-separated table with its header row.
pub fn write_table(path: &Path, rows: &[ClassificationRow]) -> Result<(), KiraError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    let to_err = |err: csv::Error| KiraError::filesystem(format!("write {}", path.display()), err);
    writer.write_record(COLUMNS).map_err(to_err)?;
    for row in rows {
        writer.write_record(row.cells()).map_err(to_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| KiraError::filesystem(format!("write {}", path.display()), err))?;
    fs_util::write_bytes_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_call_display() {
        let one = GroupIndex::new(1).unwrap();
        let three = GroupIndex::new(3).unwrap();
        assert_eq!(OracleCall::Groups(vec![one, three]).to_string(), "1,3");
        assert_eq!(
            OracleCall::Unknown(UnknownSentinel::for_group_count(3)).to_string(),
            "unknown"
        );
    }

    #[test]
    fn blank_values_are_unknown() {
        assert_eq!(known(Some("  ")), "unknown");
        assert_eq!(known(None::<String>), "unknown");
        assert_eq!(known(Some("Pelagibacter")), "Pelagibacter");
    }
}
