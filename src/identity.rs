use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::validate_threshold;
use crate::domain::{ComponentOrder, GenomeId, GroupIndex, GroupLabel, UnknownSentinel};
use crate::error::KiraError;
use crate::fs_util;

/// One pairwise comparison: `(query, reference, identity%, mappings, fragments)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRow {
    pub query: GenomeId,
    pub reference: GenomeId,
    pub identity: f64,
    pub bidirectional_mappings: Option<u64>,
    pub query_fragments: Option<u64>,
}

impl IdentityRow {
    pub fn new(query: &str, reference: &str, identity: f64) -> Self {
        Self {
            query: GenomeId::new(query),
            reference: GenomeId::new(reference),
            identity,
            bidirectional_mappings: None,
            query_fragments: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    rows: Vec<IdentityRow>,
}

impl IdentityTable {
    pub fn from_rows(rows: Vec<IdentityRow>) -> Self {
        Self { rows }
    }

    pub fn read(path: &Path, prefix: Option<&str>, extension: &str) -> Result<Self, KiraError> {
        let reader = fs_util::open_text(path)?;
        Self::from_reader(reader, path, prefix, extension)
    }

    /// Parses headerless tab-separated rows. `source` only labels diagnostics.
    pub fn from_reader<R: Read>(
        reader: R,
        source: &Path,
        prefix: Option<&str>,
        extension: &str,
    ) -> Result<Self, KiraError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let line = idx + 1;
            let parse_err = |message: String| KiraError::InputParse {
                path: source.to_path_buf(),
                line,
                message,
            };
            let record = record.map_err(|err| parse_err(err.to_string()))?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if record.len() < 3 {
                return Err(parse_err(format!(
                    "expected at least 3 columns, found {}",
                    record.len()
                )));
            }
            let identity = record[2]
                .trim()
                .parse::<f64>()
                .map_err(|_| parse_err(format!("identity is not a number: {:?}", &record[2])))?;
            let optional_count = |col: usize| -> Result<Option<u64>, KiraError> {
                match record.get(col).map(str::trim).filter(|v| !v.is_empty()) {
                    None => Ok(None),
                    Some(value) => value.parse::<u64>().map(Some).map_err(|_| {
                        parse_err(format!("column {} is not an integer: {value:?}", col + 1))
                    }),
                }
            };
            rows.push(IdentityRow {
                query: GenomeId::from_table_entry(&record[0], prefix, extension),
                reference: GenomeId::from_table_entry(&record[1], prefix, extension),
                identity,
                bidirectional_mappings: optional_count(3)?,
                query_fragments: optional_count(4)?,
            });
        }

        debug!(rows = rows.len(), source = %source.display(), "identity table loaded");
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[IdentityRow] {
        &self.rows
    }

    /// Every genome named in either column, including self-pairs.
    pub fn genomes(&self) -> BTreeSet<GenomeId> {
        self.rows
            .iter()
            .flat_map(|row| [row.query.clone(), row.reference.clone()])
            .collect()
    }
}

/// Undirected graph of qualifying identity edges keyed by the ordered pair.
#[derive(Debug, Clone, Default)]
pub struct SimilarityGraph {
    edges: BTreeMap<(GenomeId, GenomeId), f64>,
    adjacency: BTreeMap<GenomeId, BTreeSet<GenomeId>>,
}

impl SimilarityGraph {
    /// Rows below `threshold` and self-pairs are dropped before insertion; a
    /// repeated qualifying pair (either direction) overwrites the stored score.
    pub fn from_rows(rows: &[IdentityRow], threshold: f64) -> Self {
        let mut graph = Self::default();
        for row in rows {
            if row.query == row.reference || row.identity < threshold {
                continue;
            }
            graph.insert(row.query.clone(), row.reference.clone(), row.identity);
        }
        graph
    }

    fn insert(&mut self, a: GenomeId, b: GenomeId, identity: f64) {
        let key = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.edges.insert(key, identity);
        self.adjacency.entry(a.clone()).or_default().insert(b.clone());
        self.adjacency.entry(b).or_default().insert(a);
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, genome: &GenomeId) -> bool {
        self.adjacency.contains_key(genome)
    }

    pub fn weight(&self, a: &GenomeId, b: &GenomeId) -> Option<f64> {
        let key = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.edges.get(&key).copied()
    }

    pub fn neighbors(&self, genome: &GenomeId) -> impl Iterator<Item = &GenomeId> {
        self.adjacency.get(genome).into_iter().flatten()
    }

    /// Connected components in the requested numbering order. Ties on size are
    /// broken by the lexicographically smallest member.
    pub fn components(&self, order: ComponentOrder) -> Vec<Component> {
        let nodes = self.adjacency.keys().collect::<Vec<_>>();
        let position = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (*node, idx))
            .collect::<BTreeMap<_, _>>();

        let mut sets = DisjointSet::new(nodes.len());
        for (a, b) in self.edges.keys() {
            sets.union(position[a], position[b]);
        }

        let mut by_root = BTreeMap::<usize, BTreeSet<GenomeId>>::new();
        for (idx, node) in nodes.iter().enumerate() {
            by_root
                .entry(sets.find(idx))
                .or_default()
                .insert((*node).clone());
        }

        let mut components = by_root
            .into_values()
            .map(|members| Component { members })
            .collect::<Vec<_>>();
        components.sort_by(|a, b| {
            let by_size = match order {
                ComponentOrder::Descending => b.len().cmp(&a.len()),
                ComponentOrder::Ascending => a.len().cmp(&b.len()),
            };
            by_size.then_with(|| a.first_member().cmp(&b.first_member()))
        });
        components
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    members: BTreeSet<GenomeId>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &BTreeSet<GenomeId> {
        &self.members
    }

    pub fn contains(&self, genome: &GenomeId) -> bool {
        self.members.contains(genome)
    }

    fn first_member(&self) -> Option<&GenomeId> {
        self.members.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceGroup {
    pub index: GroupIndex,
    pub members: BTreeSet<GenomeId>,
}

/// Result of grouping: reference groups numbered 1.. in component order, plus
/// every other genome of the table in the unassigned set.
#[derive(Debug, Clone)]
pub struct Partition {
    components: Vec<Component>,
    groups: Vec<ReferenceGroup>,
    unassigned: BTreeSet<GenomeId>,
    unknown: UnknownSentinel,
}

impl Partition {
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn groups(&self) -> &[ReferenceGroup] {
        &self.groups
    }

    pub fn unassigned(&self) -> &BTreeSet<GenomeId> {
        &self.unassigned
    }

    pub fn unknown(&self) -> UnknownSentinel {
        self.unknown
    }

    pub fn group_of(&self, genome: &GenomeId) -> GroupLabel {
        self.groups
            .iter()
            .find(|group| group.members.contains(genome))
            .map(|group| GroupLabel::Group(group.index))
            .unwrap_or(GroupLabel::Unknown(self.unknown))
    }

    pub fn genomes(&self) -> BTreeSet<GenomeId> {
        self.groups
            .iter()
            .flat_map(|group| group.members.iter().cloned())
            .chain(self.unassigned.iter().cloned())
            .collect()
    }

    /// Adds genomes seen outside the identity table (e.g. archive-only files).
    pub fn absorb_unassigned<I: IntoIterator<Item = GenomeId>>(&mut self, genomes: I) -> usize {
        let mut added = 0;
        for genome in genomes {
            if matches!(self.group_of(&genome), GroupLabel::Unknown(_))
                && self.unassigned.insert(genome)
            {
                added += 1;
            }
        }
        added
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityGraphBuilder {
    threshold: f64,
    min_group_size: usize,
    order: ComponentOrder,
}

impl IdentityGraphBuilder {
    pub fn new(
        threshold: f64,
        min_group_size: usize,
        order: ComponentOrder,
    ) -> Result<Self, KiraError> {
        validate_threshold(threshold)?;
        if min_group_size == 0 {
            return Err(KiraError::InvalidGroupSize("must be at least 1".to_string()));
        }
        Ok(Self {
            threshold,
            min_group_size,
            order,
        })
    }

    pub fn graph(&self, table: &IdentityTable) -> SimilarityGraph {
        SimilarityGraph::from_rows(table.rows(), self.threshold)
    }

    /// Fails with `NoReferenceGroupFound` when no component is large enough.
    pub fn build(&self, table: &IdentityTable) -> Result<Partition, KiraError> {
        let graph = self.graph(table);
        let components = graph.components(self.order);

        let groups = components
            .iter()
            .filter(|component| component.len() >= self.min_group_size)
            .enumerate()
            .filter_map(|(idx, component)| {
                GroupIndex::new(idx + 1).map(|index| ReferenceGroup {
                    index,
                    members: component.members.clone(),
                })
            })
            .collect::<Vec<_>>();

        if groups.is_empty() {
            return Err(KiraError::NoReferenceGroupFound {
                min_group_size: self.min_group_size,
            });
        }

        let grouped = groups
            .iter()
            .flat_map(|group| group.members.iter())
            .collect::<BTreeSet<_>>();
        let unassigned = table
            .genomes()
            .into_iter()
            .filter(|genome| !grouped.contains(genome))
            .collect::<BTreeSet<_>>();

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            components = components.len(),
            groups = groups.len(),
            unassigned = unassigned.len(),
            threshold = self.threshold,
            order = %self.order,
            "identity graph partitioned"
        );

        let unknown = UnknownSentinel::for_group_count(groups.len());
        Ok(Partition {
            components,
            groups,
            unassigned,
            unknown,
        })
    }
}
