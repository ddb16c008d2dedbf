use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ComponentOrder, DEFAULT_NAME_PATTERN, GenomeNaming};
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-species.json";

/// Six hours per oracle trial. `timeout_secs: 0` runs without a limit.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub identity_threshold: Option<f64>,
    #[serde(default)]
    pub min_group_size: Option<usize>,
    #[serde(default)]
    pub component_order: Option<ComponentOrder>,
    #[serde(default)]
    pub genome_extension: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub genome_name_pattern: Option<String>,
    #[serde(default)]
    pub probes_per_clade: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub oracle: OracleEntry,
    #[serde(default)]
    pub taxonomy: TaxonomyEntry,
    #[serde(default)]
    pub tables: TableColumnsEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OracleEntry {
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub plot_path: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TaxonomyEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TableColumnsEntry {
    #[serde(default)]
    pub isolate: Option<String>,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub completeness: Option<String>,
    #[serde(default)]
    pub contamination: Option<String>,
    #[serde(default)]
    pub reference_clade: Option<String>,
    #[serde(default)]
    pub reference_genus: Option<String>,
    #[serde(default)]
    pub reference_species: Option<String>,
    #[serde(default)]
    pub population_strain: Option<String>,
    #[serde(default)]
    pub population_cluster: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub report_path: PathBuf,
    pub plot_path: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TaxonomySettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumns {
    pub isolate: String,
    pub accession: String,
    pub completeness: String,
    pub contamination: String,
    pub reference_clade: String,
    pub reference_genus: String,
    pub reference_species: String,
    pub population_strain: String,
    pub population_cluster: String,
}

impl Default for TableColumns {
    fn default() -> Self {
        Self {
            isolate: "SAG or Isolate ID".to_string(),
            accession: "RefSeq Assembly (*IMG Genome ID)".to_string(),
            completeness: "Completeness".to_string(),
            contamination: "Contamination".to_string(),
            reference_clade: "Subclade Classification".to_string(),
            reference_genus: "Genus".to_string(),
            reference_species: "Species name".to_string(),
            population_strain: "Strain".to_string(),
            population_cluster: "Main_cluster".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub identity_threshold: f64,
    pub min_group_size: usize,
    pub component_order: ComponentOrder,
    pub genome_extension: String,
    pub path_prefix: Option<String>,
    pub naming: GenomeNaming,
    pub probes_per_clade: usize,
    pub workers: usize,
    pub seed: Option<u64>,
    pub oracle: OracleSettings,
    pub taxonomy: TaxonomySettings,
    pub tables: TableColumns,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads an explicit config path, or `kira-species.json` when present.
    /// A missing default file resolves to built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let identity_threshold = config.identity_threshold.unwrap_or(95.0);
        validate_threshold(identity_threshold)?;

        let min_group_size = config.min_group_size.unwrap_or(15);
        if min_group_size == 0 {
            return Err(KiraError::InvalidGroupSize("must be at least 1".to_string()));
        }

        let naming = GenomeNaming::new(
            config
                .genome_name_pattern
                .as_deref()
                .unwrap_or(DEFAULT_NAME_PATTERN),
        )?;

        let defaults = TableColumns::default();
        let columns = config.tables;
        let tables = TableColumns {
            isolate: columns.isolate.unwrap_or(defaults.isolate),
            accession: columns.accession.unwrap_or(defaults.accession),
            completeness: columns.completeness.unwrap_or(defaults.completeness),
            contamination: columns.contamination.unwrap_or(defaults.contamination),
            reference_clade: columns.reference_clade.unwrap_or(defaults.reference_clade),
            reference_genus: columns.reference_genus.unwrap_or(defaults.reference_genus),
            reference_species: columns
                .reference_species
                .unwrap_or(defaults.reference_species),
            population_strain: columns
                .population_strain
                .unwrap_or(defaults.population_strain),
            population_cluster: columns
                .population_cluster
                .unwrap_or(defaults.population_cluster),
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            identity_threshold,
            min_group_size,
            component_order: config.component_order.unwrap_or_default(),
            genome_extension: config
                .genome_extension
                .unwrap_or_else(|| ".fa".to_string()),
            path_prefix: config.path_prefix.filter(|prefix| !prefix.is_empty()),
            naming,
            probes_per_clade: config.probes_per_clade.unwrap_or(2).max(1),
            workers: config.workers.unwrap_or(1).max(1),
            seed: config.seed,
            oracle: OracleSettings {
                program: config.oracle.program,
                args: config.oracle.args,
                report_path: config
                    .oracle
                    .report_path
                    .unwrap_or_else(|| PathBuf::from("results.txt")),
                plot_path: config
                    .oracle
                    .plot_path
                    .unwrap_or_else(|| PathBuf::from("_conspecifix/database/User_spec/gno2.png")),
                timeout: match config
                    .oracle
                    .timeout_secs
                    .unwrap_or(DEFAULT_ORACLE_TIMEOUT_SECS)
                {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
            taxonomy: TaxonomySettings {
                base_url: config
                    .taxonomy
                    .base_url
                    .unwrap_or_else(|| "https://gtdb-api.ecogenomic.org".to_string()),
                timeout: Duration::from_secs(config.taxonomy.timeout_secs.unwrap_or(30)),
            },
            tables,
        })
    }
}

/// Identity scores are percentages.
pub fn validate_threshold(value: f64) -> Result<(), KiraError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(KiraError::InvalidThreshold(value.to_string()));
    }
    Ok(())
}

pub fn parse_threshold(raw: &str) -> Result<f64, KiraError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| KiraError::InvalidThreshold(raw.to_string()))?;
    validate_threshold(value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_fill_empty_config() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.identity_threshold, 95.0);
        assert_eq!(resolved.min_group_size, 15);
        assert_eq!(resolved.component_order, ComponentOrder::Descending);
        assert_eq!(resolved.probes_per_clade, 2);
        assert_eq!(resolved.oracle.report_path, PathBuf::from("results.txt"));
        assert!(resolved.oracle.program.is_none());
        assert_eq!(
            resolved.oracle.timeout,
            Some(Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS))
        );
        assert_eq!(resolved.tables, TableColumns::default());
    }

    #[test]
    fn zero_timeout_runs_unbounded() {
        let config = Config {
            oracle: OracleEntry {
                timeout_secs: Some(0),
                ..OracleEntry::default()
            },
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.oracle.timeout, None);
    }

    #[test]
    fn threshold_out_of_range() {
        let config = Config {
            identity_threshold: Some(101.0),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, KiraError::InvalidThreshold(_));
        assert_matches!(parse_threshold("abc"), Err(KiraError::InvalidThreshold(_)));
    }
}
