use std::fs;

use kira_species::consensus::{COLUMNS, ConsensusResolver, OracleCall, write_table};
use kira_species::domain::{
    ComponentOrder, DEFAULT_NAME_PATTERN, GenomeId, GenomeNaming, GroupIndex,
};
use kira_species::identity::{IdentityGraphBuilder, IdentityRow, IdentityTable, Partition};
use kira_species::orchestrator::VerdictAggregate;
use kira_species::tables::{
    PopulationTable, QualityRecord, QualityTable, ReferenceTable, ReferenceTaxon,
};
use kira_species::taxonomy::{TaxonRecord, TaxonomyIndex};

fn partition() -> Partition {
    let table = IdentityTable::from_rows(vec![
        IdentityRow::new("A_1a", "B_1a", 96.0),
        IdentityRow::new("B_1a", "C_1a", 96.0),
        IdentityRow::new("D_2", "E_2", 99.0),
        IdentityRow::new("Q_7", "A_1a", 70.0),
    ]);
    IdentityGraphBuilder::new(95.0, 2, ComponentOrder::Descending)
        .unwrap()
        .build(&table)
        .unwrap()
}

fn group(index: usize) -> GroupIndex {
    GroupIndex::new(index).unwrap()
}

struct Inputs {
    partition: Partition,
    verdicts: VerdictAggregate,
    taxonomy: TaxonomyIndex,
    reference: ReferenceTable,
    quality: QualityTable,
    naming: GenomeNaming,
}

fn inputs() -> Inputs {
    let mut verdicts = VerdictAggregate::default();
    verdicts.record("1a", group(1), true);
    verdicts.record("1a", group(1), true);
    verdicts.record("1a", group(2), false);
    verdicts.record("2", group(1), true);
    verdicts.record("2", group(2), true);
    verdicts.record("7", group(1), true);
    verdicts.record("7", group(1), false);

    let mut taxonomy = TaxonomyIndex::default();
    taxonomy.insert(
        GenomeId::new("A_1a"),
        TaxonRecord {
            g: "g__Pelagibacter".to_string(),
            s: "s__Pelagibacter ubique".to_string(),
            ..TaxonRecord::default()
        },
    );
    taxonomy.insert(
        GenomeId::new("D_2"),
        TaxonRecord {
            g: "g__Pelagibacter".to_string(),
            s: "s__".to_string(),
            ..TaxonRecord::default()
        },
    );

    let mut reference = ReferenceTable::default();
    reference.insert(
        "1a",
        ReferenceTaxon {
            genus: "Pelagibacter".to_string(),
            species: "P. ubique".to_string(),
        },
    );

    let mut quality = QualityTable::default();
    quality.insert(
        "A",
        QualityRecord {
            accession: Some("GCF_000012345.1".to_string()),
            completeness: Some(97.5),
            contamination: Some(0.8),
        },
    );

    Inputs {
        partition: partition(),
        verdicts,
        taxonomy,
        reference,
        quality,
        naming: GenomeNaming::new(DEFAULT_NAME_PATTERN).unwrap(),
    }
}

fn resolver<'a>(
    inputs: &'a Inputs,
    population: Option<&'a PopulationTable>,
) -> ConsensusResolver<'a> {
    ConsensusResolver {
        partition: &inputs.partition,
        verdicts: &inputs.verdicts,
        taxonomy: &inputs.taxonomy,
        reference: &inputs.reference,
        quality: &inputs.quality,
        population,
        naming: &inputs.naming,
    }
}

#[test]
fn fully_known_genome() {
    let inputs = inputs();
    let row = resolver(&inputs, None).resolve_genome(&GenomeId::new("A_1a"));
    assert_eq!(row.accession, "GCF_000012345.1");
    assert_eq!(row.isolate_id, "A");
    assert_eq!(row.clade, "1a");
    assert_eq!(row.completeness, "97.5");
    assert_eq!(row.ani_species.to_string(), "1");
    assert_eq!(row.oracle_species, OracleCall::Groups(vec![group(1)]));
    assert_eq!(row.gtdb_genus, "Pelagibacter");
    assert_eq!(row.gtdb_species, "Pelagibacter ubique");
    assert_eq!(row.proposed_species, "P. ubique");
    assert_eq!(row.population_species, "unknown");
}

#[test]
fn unresolved_genome_is_unknown_everywhere() {
    let inputs = inputs();
    let row = resolver(&inputs, None).resolve_genome(&GenomeId::new("Q_7"));
    assert_eq!(row.ani_species.to_string(), "unknown");
    assert_eq!(row.ani_species.ordinal(), 3);
    assert!(row.oracle_species.is_unknown());
    assert_eq!(row.oracle_species.to_string(), "unknown");
    assert_eq!(row.gtdb_species, "unknown");
    assert_eq!(row.gtdb_genus, "unknown");
    assert_eq!(row.accession, "unknown");
    assert_eq!(row.completeness, "unknown");
    assert!(row.cells().iter().all(|cell| !cell.is_empty()));
}

#[test]
fn tied_groups_are_all_reported() {
    let inputs = inputs();
    let row = resolver(&inputs, None).resolve_genome(&GenomeId::new("D_2"));
    assert_eq!(row.oracle_species, OracleCall::Groups(vec![group(1), group(2)]));
    assert_eq!(row.oracle_species.to_string(), "1,2");
    assert_eq!(row.gtdb_species, "unknown");
    assert_eq!(row.gtdb_genus, "Pelagibacter");
}

#[test]
fn one_row_per_genome_written_as_tsv() {
    let inputs = inputs();
    let genomes = vec![
        GenomeId::new("A_1a"),
        GenomeId::new("Q_7"),
        GenomeId::new("A_1a"),
        GenomeId::new("E_2"),
    ];
    let rows = resolver(&inputs, None).resolve(&genomes);
    assert_eq!(rows.len(), 3);

    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("genomes_classification.tsv");
    write_table(&path, &rows).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], COLUMNS.join("\t"));
    for line in &lines[1..] {
        let cells = line.split('\t').collect::<Vec<_>>();
        assert_eq!(cells.len(), COLUMNS.len());
        assert!(cells.iter().all(|cell| !cell.is_empty()));
    }
    assert!(lines[2].starts_with("unknown\tQ\t7\t"));
}

#[test]
fn population_cluster_is_looked_up_by_genome() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("popcogent.tsv");
    fs::write(&path, "Strain\tMain_cluster\nA_1a\t0.3\nB_1a\t0.3\n").unwrap();
    let population = PopulationTable::read(&path, &Default::default()).unwrap();

    let inputs = inputs();
    let row = resolver(&inputs, Some(&population)).resolve_genome(&GenomeId::new("A_1a"));
    assert_eq!(row.population_species, "0.3");
}
