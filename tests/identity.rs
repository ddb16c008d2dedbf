use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use proptest::prelude::*;

use kira_species::domain::{ComponentOrder, GenomeId, GroupLabel};
use kira_species::error::KiraError;
use kira_species::identity::{IdentityGraphBuilder, IdentityRow, IdentityTable};

fn ids(names: &[&str]) -> BTreeSet<GenomeId> {
    names.iter().map(|name| GenomeId::new(*name)).collect()
}

fn sample_table() -> IdentityTable {
    IdentityTable::from_rows(vec![
        IdentityRow::new("A", "B", 96.0),
        IdentityRow::new("B", "C", 96.0),
        IdentityRow::new("D", "E", 99.0),
    ])
}

#[test]
fn two_groups_at_min_size_two() {
    let builder = IdentityGraphBuilder::new(95.0, 2, ComponentOrder::Descending).unwrap();
    let partition = builder.build(&sample_table()).unwrap();

    assert_eq!(partition.groups().len(), 2);
    assert_eq!(partition.groups()[0].members, ids(&["A", "B", "C"]));
    assert_eq!(partition.groups()[1].members, ids(&["D", "E"]));
    assert!(partition.unassigned().is_empty());
}

#[test]
fn undersized_component_is_unassigned() {
    let builder = IdentityGraphBuilder::new(95.0, 3, ComponentOrder::Descending).unwrap();
    let partition = builder.build(&sample_table()).unwrap();

    assert_eq!(partition.groups().len(), 1);
    assert_eq!(partition.groups()[0].members, ids(&["A", "B", "C"]));
    assert_eq!(partition.unassigned(), &ids(&["D", "E"]));
    assert_matches!(
        partition.group_of(&GenomeId::new("D")),
        GroupLabel::Unknown(sentinel) if sentinel.index() == 2
    );
}

#[test]
fn exact_size_component_qualifies() {
    let builder = IdentityGraphBuilder::new(95.0, 3, ComponentOrder::Ascending).unwrap();
    let partition = builder.build(&sample_table()).unwrap();
    assert_eq!(partition.groups().len(), 1);
    assert_eq!(partition.components()[0].members(), &ids(&["D", "E"]));
}

#[test]
fn no_group_is_fatal() {
    let builder = IdentityGraphBuilder::new(95.0, 4, ComponentOrder::Descending).unwrap();
    let err = builder.build(&sample_table()).unwrap_err();
    assert_matches!(err, KiraError::NoReferenceGroupFound { min_group_size: 4 });
}

#[test]
fn genome_without_edges_is_kept_as_unassigned() {
    let mut rows = sample_table().rows().to_vec();
    rows.push(IdentityRow::new("F", "F", 100.0));
    rows.push(IdentityRow::new("F", "A", 80.0));
    let table = IdentityTable::from_rows(rows);

    let builder = IdentityGraphBuilder::new(95.0, 2, ComponentOrder::Descending).unwrap();
    let partition = builder.build(&table).unwrap();
    assert!(partition.unassigned().contains(&GenomeId::new("F")));
    assert!(!builder.graph(&table).contains(&GenomeId::new("F")));
}

fn write_gz(path: &Path, content: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

#[test]
fn reads_gzipped_table_and_strips_paths() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ani.tsv.gz");
    write_gz(
        &path,
        "/data/genomes/HTCC1062_1a.fa\t/data/genomes/HTCC7211_1a.fa\t97.1\t400\t450\n",
    );

    let table = IdentityTable::read(&path, None, ".fa").unwrap();
    let row = &table.rows()[0];
    assert_eq!(row.query.as_str(), "HTCC1062_1a");
    assert_eq!(row.reference.as_str(), "HTCC7211_1a");
    assert_eq!(row.bidirectional_mappings, Some(400));
    assert_eq!(row.query_fragments, Some(450));
}

#[test]
fn malformed_identity_reports_line() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ani.tsv");
    std::fs::write(&path, "A.fa\tB.fa\t97\nA.fa\tC.fa\tninety\n").unwrap();

    let err = IdentityTable::read(&path, None, ".fa").unwrap_err();
    assert_matches!(err, KiraError::InputParse { line: 2, .. });
}

#[test]
fn short_row_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ani.tsv");
    std::fs::write(&path, "A.fa\tB.fa\n").unwrap();
    assert_matches!(
        IdentityTable::read(&path, None, ".fa"),
        Err(KiraError::InputParse { line: 1, .. })
    );
}

#[test]
fn missing_table_is_input_error() {
    let err = IdentityTable::read(Path::new("/nonexistent/ani.tsv"), None, ".fa").unwrap_err();
    assert_matches!(err, KiraError::InputRead { .. });
}

fn arb_rows() -> impl Strategy<Value = Vec<IdentityRow>> {
    let genome = prop::sample::select(vec!["g1", "g2", "g3", "g4", "g5", "g6", "g7", "g8"]);
    prop::collection::vec((genome.clone(), genome, 80.0f64..100.0), 1..30).prop_map(|rows| {
        rows.into_iter()
            .map(|(a, b, identity)| IdentityRow::new(a, b, identity))
            .collect()
    })
}

proptest! {
    #[test]
    fn partition_covers_every_genome_once(rows in arb_rows(), min_size in 1usize..4) {
        let table = IdentityTable::from_rows(rows);
        let builder =
            IdentityGraphBuilder::new(90.0, min_size, ComponentOrder::Descending).unwrap();
        if let Ok(partition) = builder.build(&table) {
            let mut seen = BTreeSet::new();
            for group in partition.groups() {
                for member in &group.members {
                    prop_assert!(seen.insert(member.clone()));
                }
            }
            for genome in partition.unassigned() {
                prop_assert!(seen.insert(genome.clone()));
            }
            prop_assert_eq!(seen, table.genomes());
        }
    }

    #[test]
    fn raising_threshold_never_merges(
        rows in arb_rows(),
        low in 80.0f64..95.0,
        delta in 0.0f64..5.0,
    ) {
        let table = IdentityTable::from_rows(rows);
        let loose = IdentityGraphBuilder::new(low, 1, ComponentOrder::Descending).unwrap();
        let strict = IdentityGraphBuilder::new(low + delta, 1, ComponentOrder::Descending).unwrap();
        let loose_components = loose.graph(&table).components(ComponentOrder::Descending);
        let strict_components = strict.graph(&table).components(ComponentOrder::Descending);
        for component in &strict_components {
            let contained = loose_components
                .iter()
                .any(|outer| component.members().is_subset(outer.members()));
            prop_assert!(contained);
        }
    }

    #[test]
    fn qualifying_edge_into_group_is_never_unassigned(rows in arb_rows()) {
        let table = IdentityTable::from_rows(rows);
        let builder = IdentityGraphBuilder::new(90.0, 2, ComponentOrder::Descending).unwrap();
        if let Ok(partition) = builder.build(&table) {
            for row in table.rows() {
                if row.identity >= 90.0 && row.query != row.reference {
                    let in_group = !partition.group_of(&row.reference).is_unknown();
                    if in_group {
                        prop_assert!(!partition.unassigned().contains(&row.query));
                    }
                }
            }
        }
    }
}
