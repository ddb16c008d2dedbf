use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::consensus::{self, ConsensusResolver};
use crate::domain::{ComponentOrder, GenomeId, GroupIndex, GroupLabel};
use crate::error::KiraError;
use crate::fs_util;
use crate::identity::{IdentityGraphBuilder, IdentityTable, Partition};
use crate::materialize::{GenomeArchive, GroupLayout, GroupMaterializer, MaterializeReport};
use crate::oracle::{Oracle, WorkspaceRunner};
use crate::orchestrator::{
    CrossValidationRun, CrossValidator, GroupDir, ValidationMode, ValidationOptions,
    VerdictAggregate, probes_by_clade, probes_from_clade_dirs,
};
use crate::tables::{PopulationTable, QualityTable, ReferenceTable};
use crate::taxonomy::{self, TaxonomyClient, TaxonomyGap, TaxonomyIndex};

pub const TRIALS_FILE: &str = "trials.json";

#[derive(Debug, Clone)]
pub struct GroupRequest {
    pub identity_table: PathBuf,
    /// Directory or `.zip` archive of genome files; nothing is staged without it.
    pub archive: Option<PathBuf>,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    pub threshold: f64,
    pub min_group_size: usize,
    pub order: ComponentOrder,
    pub genomes: usize,
    pub components: Vec<ComponentSummary>,
    pub unassigned: usize,
    pub materialized: Option<MaterializeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub position: usize,
    pub group: Option<GroupIndex>,
    pub size: usize,
    pub qualifies: bool,
    pub members: Vec<GenomeId>,
}

/// Where clade-mode probes come from.
#[derive(Debug, Clone)]
pub enum ProbeSource {
    /// A directory of genomes under test, optionally narrowed by a genome list.
    TestDir {
        dir: PathBuf,
        genome_list: Option<PathBuf>,
    },
    /// Folders `clade_{clade}` under `root`, one per clade named in the list.
    CladeDirs { root: PathBuf, genome_list: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub groups: Vec<PathBuf>,
    pub output: PathBuf,
    pub results_dir: PathBuf,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub mode: ValidationMode,
    pub seed: u64,
    pub groups: usize,
    pub trials: usize,
    pub skipped: usize,
    pub output: String,
    pub trials_file: String,
}

#[derive(Debug, Clone)]
pub struct TaxonomyRequest {
    pub genome_dir: PathBuf,
    pub quality_table: PathBuf,
    pub output: PathBuf,
    pub unclassified_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonomyResult {
    pub genomes: usize,
    pub classified: usize,
    pub gaps: Vec<TaxonomyGap>,
    pub output: String,
    pub unclassified_dir: String,
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub identity_table: PathBuf,
    pub quality_table: PathBuf,
    pub reference_table: PathBuf,
    pub taxonomy: PathBuf,
    pub verdicts: PathBuf,
    pub population_table: Option<PathBuf>,
    /// Defaults to every genome of the identity table.
    pub genome_list: Option<PathBuf>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub rows: usize,
    pub groups: usize,
    pub oracle_unknown: usize,
    pub output: String,
}

/// Pipeline entry points. Each one reads all of its inputs before writing any
/// output; outputs are replaced atomically.
#[derive(Debug, Clone)]
pub struct App {
    config: ResolvedConfig,
}

impl App {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    fn builder(&self) -> Result<IdentityGraphBuilder, KiraError> {
        IdentityGraphBuilder::new(
            self.config.identity_threshold,
            self.config.min_group_size,
            self.config.component_order,
        )
    }

    fn read_identity_table(&self, path: &Path) -> Result<IdentityTable, KiraError> {
        IdentityTable::read(
            path,
            self.config.path_prefix.as_deref(),
            &self.config.genome_extension,
        )
    }

    pub fn group(&self, request: &GroupRequest) -> Result<GroupResult, KiraError> {
        let table = self.read_identity_table(&request.identity_table)?;
        let mut partition = self.builder()?.build(&table)?;

        let materialized = match &request.archive {
            Some(archive) => {
                let view = GenomeArchive::from_path(archive)?.open(&self.config.genome_extension)?;
                let layout = GroupLayout::from_path(&request.out_dir)?;
                let materializer =
                    GroupMaterializer::new(layout, self.config.genome_extension.clone());
                Some(materializer.materialize(&mut partition, &view)?)
            }
            None => None,
        };

        let components = partition
            .components()
            .iter()
            .enumerate()
            .map(|(idx, component)| {
                let members = component.members().iter().cloned().collect::<Vec<_>>();
                let group = members
                    .first()
                    .and_then(|first| match partition.group_of(first) {
                        GroupLabel::Group(index) => Some(index),
                        GroupLabel::Unknown(_) => None,
                    });
                ComponentSummary {
                    position: idx + 1,
                    group,
                    size: component.len(),
                    qualifies: group.is_some(),
                    members,
                }
            })
            .collect();

        Ok(GroupResult {
            threshold: self.config.identity_threshold,
            min_group_size: self.config.min_group_size,
            order: self.config.component_order,
            genomes: partition.genomes().len(),
            components,
            unassigned: partition.unassigned().len(),
            materialized,
        })
    }

    fn validator<O: Oracle>(&self, oracle: O, request: &ValidationRequest) -> CrossValidator<O> {
        let runner =
            WorkspaceRunner::from_settings(oracle, request.work_dir.clone(), &self.config.oracle);
        CrossValidator::new(
            runner,
            ValidationOptions {
                results_dir: request.results_dir.clone(),
                probes_per_clade: self.config.probes_per_clade,
                workers: self.config.workers,
                seed: self.config.seed,
            },
        )
    }

    pub fn validate_clades<O: Oracle>(
        &self,
        oracle: O,
        probes: &ProbeSource,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, KiraError> {
        let groups = GroupDir::load_all(&request.groups, &self.config.genome_extension)?;
        let ext = &self.config.genome_extension;
        let probes = match probes {
            ProbeSource::TestDir { dir, genome_list } => {
                let only = genome_list
                    .as_deref()
                    .map(|path| fs_util::read_genome_list(path, ext))
                    .transpose()?
                    .map(|list| list.into_iter().collect::<BTreeSet<_>>());
                let files = fs_util::list_genome_files(dir, ext)?;
                probes_by_clade(files, &self.config.naming, only.as_ref())
            }
            ProbeSource::CladeDirs { root, genome_list } => {
                let genomes = fs_util::read_genome_list(genome_list, ext)?;
                probes_from_clade_dirs(root, &genomes, &self.config.naming, ext)?
            }
        };
        if probes.is_empty() {
            warn!("no clade probes found");
        }

        let validator = self.validator(oracle, request);
        let run = validator.run_clades(&probes, &groups)?;
        self.write_run(&run, groups.len(), request)
    }

    pub fn validate_sources<O: Oracle>(
        &self,
        oracle: O,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, KiraError> {
        let groups = GroupDir::load_all(&request.groups, &self.config.genome_extension)?;
        let validator = self.validator(oracle, request);
        let run = validator.run_sources(&groups)?;
        self.write_run(&run, groups.len(), request)
    }

    fn write_run(
        &self,
        run: &CrossValidationRun,
        groups: usize,
        request: &ValidationRequest,
    ) -> Result<ValidationResult, KiraError> {
        // Verdicts first: a trial log never exists without them.
        fs_util::write_json_atomic(&request.output, &run.outcomes)?;
        let trials_file = request.results_dir.join(TRIALS_FILE);
        fs_util::write_json_atomic(&trials_file, run)?;
        info!(output = %request.output.display(), "verdicts written");
        Ok(ValidationResult {
            mode: run.mode,
            seed: run.seed,
            groups,
            trials: run.trials.len(),
            skipped: run.skipped(),
            output: request.output.display().to_string(),
            trials_file: trials_file.display().to_string(),
        })
    }

    pub fn taxonomy<T: TaxonomyClient>(
        &self,
        client: &T,
        request: &TaxonomyRequest,
    ) -> Result<TaxonomyResult, KiraError> {
        let genomes =
            fs_util::list_genome_files(&request.genome_dir, &self.config.genome_extension)?;
        let quality = QualityTable::read(&request.quality_table, &self.config.tables)?;

        let sweep = taxonomy::sweep(client, &genomes, &quality, &self.config.naming);

        fs_util::write_json_atomic(&request.output, &sweep.classified)?;
        if !sweep.unclassified.is_empty() {
            fs_util::ensure_dir(&request.unclassified_dir)?;
            for (genome, path) in &sweep.unclassified {
                if let Err(err) = fs_util::copy_into(path, &request.unclassified_dir) {
                    warn!(genome = %genome, error = %err, "could not copy unclassified genome");
                }
            }
        }
        info!(
            classified = sweep.classified.len(),
            unclassified = sweep.unclassified.len(),
            "taxonomy sweep finished"
        );

        Ok(TaxonomyResult {
            genomes: genomes.len(),
            classified: sweep.classified.len(),
            gaps: sweep.gaps,
            output: request.output.display().to_string(),
            unclassified_dir: request.unclassified_dir.display().to_string(),
        })
    }

    pub fn summarize(&self, request: &SummaryRequest) -> Result<SummaryResult, KiraError> {
        let table = self.read_identity_table(&request.identity_table)?;
        let mut partition: Partition = self.builder()?.build(&table)?;
        let tables = &self.config.tables;
        let quality = QualityTable::read(&request.quality_table, tables)?;
        let reference = ReferenceTable::read(&request.reference_table, tables)?;
        let taxonomy = TaxonomyIndex::read(&request.taxonomy)?;
        let verdicts = VerdictAggregate::read(&request.verdicts)?;
        let population = request
            .population_table
            .as_deref()
            .map(|path| PopulationTable::read(path, tables))
            .transpose()?;

        let genomes = match &request.genome_list {
            Some(path) => {
                let listed = fs_util::read_genome_list(path, &self.config.genome_extension)?;
                partition.absorb_unassigned(listed.iter().cloned());
                listed
            }
            None => partition.genomes().into_iter().collect(),
        };

        let resolver = ConsensusResolver {
            partition: &partition,
            verdicts: &verdicts,
            taxonomy: &taxonomy,
            reference: &reference,
            quality: &quality,
            population: population.as_ref(),
            naming: &self.config.naming,
        };
        let rows = resolver.resolve(&genomes);
        consensus::write_table(&request.output, &rows)?;

        Ok(SummaryResult {
            rows: rows.len(),
            groups: partition.groups().len(),
            oracle_unknown: rows
                .iter()
                .filter(|row| row.oracle_species.is_unknown())
                .count(),
            output: request.output.display().to_string(),
        })
    }
}
