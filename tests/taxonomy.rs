use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use kira_species::domain::{DEFAULT_NAME_PATTERN, GenomeId, GenomeNaming};
use kira_species::error::KiraError;
use kira_species::tables::{QualityRecord, QualityTable};
use kira_species::taxonomy::{TaxonRecord, TaxonomyClient, sweep};

struct MockGtdb {
    histories: BTreeMap<String, Vec<TaxonRecord>>,
    requested: Mutex<Vec<String>>,
}

impl TaxonomyClient for MockGtdb {
    fn taxon_history(&self, accession: &str) -> Result<Vec<TaxonRecord>, KiraError> {
        self.requested.lock().unwrap().push(accession.to_string());
        if accession == "GCF_DOWN" {
            return Err(KiraError::TaxonomyHttp("connection refused".to_string()));
        }
        Ok(self.histories.get(accession).cloned().unwrap_or_default())
    }
}

fn record(genus: &str, species: &str, release: &str) -> TaxonRecord {
    TaxonRecord {
        release: Some(release.to_string()),
        g: genus.to_string(),
        s: species.to_string(),
        ..TaxonRecord::default()
    }
}

fn quality(entries: &[(&str, &str)]) -> QualityTable {
    let mut table = QualityTable::default();
    for (isolate, accession) in entries {
        table.insert(
            *isolate,
            QualityRecord {
                accession: Some(accession.to_string()),
                completeness: None,
                contamination: None,
            },
        );
    }
    table
}

fn genome(name: &str) -> (GenomeId, PathBuf) {
    (GenomeId::new(name), PathBuf::from(format!("/genomes/{name}.fa")))
}

#[test]
fn sweep_keeps_latest_entry_and_collects_gaps() {
    let mut histories = BTreeMap::new();
    histories.insert(
        "GCF_1".to_string(),
        vec![
            record("g__Pelagibacter", "s__Pelagibacter ubique", "R220"),
            record("g__Pelagibacter", "s__", "R214"),
        ],
    );
    let client = MockGtdb {
        histories,
        requested: Mutex::new(Vec::new()),
    };
    let quality = quality(&[
        ("HTCC1062", "GCF_1"),
        ("HIMB59", "2504557020*"),
        ("HTCC7211", "GCF_EMPTY"),
        ("HIMB83", "GCF_DOWN"),
    ]);
    let genomes = vec![
        genome("HTCC1062_1a"),
        genome("HIMB59_5"),
        genome("HTCC7211_1a"),
        genome("HIMB83_1a"),
        genome("NOPE_2"),
    ];
    let naming = GenomeNaming::new(DEFAULT_NAME_PATTERN).unwrap();

    let result = sweep(&client, &genomes, &quality, &naming);

    assert_eq!(result.classified.len(), 1);
    let taxon = result.classified.get(&GenomeId::new("HTCC1062_1a")).unwrap();
    assert_eq!(taxon.release.as_deref(), Some("R220"));
    assert_eq!(taxon.species().as_deref(), Some("Pelagibacter ubique"));

    assert_eq!(result.gaps.len(), 4);
    assert_eq!(result.unclassified.len(), 4);
    assert!(
        result
            .unclassified
            .iter()
            .all(|(id, path)| path.ends_with(format!("{id}.fa")))
    );

    let requested = client.requested.lock().unwrap();
    assert_eq!(
        *requested,
        vec!["GCF_1".to_string(), "GCF_EMPTY".to_string(), "GCF_DOWN".to_string()]
    );
}

#[test]
fn index_round_trips_through_json() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("GTDB_classification.json");
    let raw = r#"{"HTCC1062_1a": {"d": "d__Bacteria", "g": "g__Pelagibacter",
        "s": "s__Pelagibacter ubique"}}"#;
    std::fs::write(&path, raw).unwrap();

    let index = kira_species::taxonomy::TaxonomyIndex::read(&path).unwrap();
    let taxon = index.get(&GenomeId::new("HTCC1062_1a")).unwrap();
    assert_eq!(taxon.genus().as_deref(), Some("Pelagibacter"));
}
