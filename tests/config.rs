use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_species::config::{Config, ConfigLoader, OracleEntry};
use kira_species::domain::{ComponentOrder, GenomeId};
use kira_species::error::KiraError;

#[test]
fn parse_full_config() {
    let raw = r#"{
        "schema_version": 1,
        "identity_threshold": 96.5,
        "min_group_size": 10,
        "component_order": "ascending",
        "genome_extension": ".fna",
        "path_prefix": "/home/user/SAR11_genomes/",
        "probes_per_clade": 3,
        "workers": 4,
        "seed": 17,
        "oracle": {
            "program": "conda",
            "args": ["run", "-n", "CSF", "python", "runner_personal.py"],
            "timeout_secs": 7200
        },
        "taxonomy": { "base_url": "http://localhost:8080/" },
        "tables": { "isolate": "Isolate" }
    }"#;
    let config: Config = serde_json::from_str(raw).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(resolved.identity_threshold, 96.5);
    assert_eq!(resolved.min_group_size, 10);
    assert_eq!(resolved.component_order, ComponentOrder::Ascending);
    assert_eq!(resolved.genome_extension, ".fna");
    assert_eq!(resolved.probes_per_clade, 3);
    assert_eq!(resolved.workers, 4);
    assert_eq!(resolved.seed, Some(17));
    assert_eq!(resolved.oracle.program, Some(PathBuf::from("conda")));
    assert_eq!(resolved.oracle.args.len(), 5);
    assert_eq!(resolved.oracle.timeout, Some(Duration::from_secs(7200)));
    assert_eq!(resolved.tables.isolate, "Isolate");
    assert_eq!(resolved.tables.accession, "RefSeq Assembly (*IMG Genome ID)");
    assert_eq!(
        resolved.naming.clade(&GenomeId::new("HTCC1062_1a")).unwrap().as_str(),
        "1a"
    );
}

#[test]
fn explicit_missing_file_is_error() {
    let err = ConfigLoader::resolve(Some("/nonexistent/kira-species.json")).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn invalid_json_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-species.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn pattern_without_clade_group_is_rejected() {
    let config = Config {
        genome_name_pattern: Some("^(?P<isolate>[^_]+)".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidPattern(_))
    );
}

#[test]
fn zero_min_group_size_is_rejected() {
    let config = Config {
        min_group_size: Some(0),
        oracle: OracleEntry::default(),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidGroupSize(_))
    );
}
