use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Clade, GenomeId, GenomeNaming, GroupIndex};
use crate::error::KiraError;
use crate::fs_util;
use crate::materialize::GroupLayout;
use crate::oracle::{Oracle, TrialRequest, WorkspaceOutputs, WorkspaceRunner};
use crate::verdict::OracleReport;

/// A staged reference group directory and the genome files inside it.
#[derive(Debug, Clone)]
pub struct GroupDir {
    pub index: GroupIndex,
    pub path: PathBuf,
    pub genomes: Vec<ProbeGenome>,
}

impl GroupDir {
    pub fn load(index: GroupIndex, path: &Path, extension: &str) -> Result<Self, KiraError> {
        if !path.is_dir() {
            return Err(KiraError::MissingGroupDir(path.to_path_buf()));
        }
        let genomes = fs_util::list_genome_files(path, extension)?
            .into_iter()
            .map(|(id, path)| ProbeGenome { id, path })
            .collect();
        Ok(Self {
            index,
            path: path.to_path_buf(),
            genomes,
        })
    }

    /// Directories named `source_genomes_{i}` keep their staged index and are
    /// returned sorted by it; the indices must then run 1..=n without gaps.
    /// Other names are numbered 1.. in the order given. Mixing both is rejected.
    pub fn load_all(paths: &[PathBuf], extension: &str) -> Result<Vec<Self>, KiraError> {
        let named = paths
            .iter()
            .map(|path| GroupLayout::index_from_dir(path))
            .collect::<Vec<_>>();

        let indexed = if named.iter().all(Option::is_some) && !named.is_empty() {
            let mut indexed = paths
                .iter()
                .zip(named.into_iter().flatten())
                .map(|(path, index)| (index, path))
                .collect::<Vec<_>>();
            indexed.sort_by_key(|(index, _)| *index);
            for (position, (index, path)) in indexed.iter().enumerate() {
                if index.get() != position + 1 {
                    return Err(KiraError::InvalidGroupIndex(format!(
                        "expected group {} but found {} (duplicate or missing index)",
                        position + 1,
                        path.display()
                    )));
                }
            }
            indexed
        } else if named.iter().any(Option::is_some) {
            return Err(KiraError::InvalidGroupIndex(
                "mix of source_genomes_{i} and other group directories".to_string(),
            ));
        } else {
            paths
                .iter()
                .enumerate()
                .map(|(idx, path)| {
                    GroupIndex::new(idx + 1)
                        .map(|index| (index, path))
                        .ok_or_else(|| KiraError::InvalidGroupIndex((idx + 1).to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        indexed
            .into_iter()
            .map(|(index, path)| Self::load(index, path, extension))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProbeGenome {
    pub id: GenomeId,
    pub path: PathBuf,
}

/// Buckets genome files by clade. Genomes without a clade tag are left out.
pub fn probes_by_clade(
    files: Vec<(GenomeId, PathBuf)>,
    naming: &GenomeNaming,
    only: Option<&BTreeSet<GenomeId>>,
) -> BTreeMap<Clade, Vec<ProbeGenome>> {
    let mut out = BTreeMap::<Clade, Vec<ProbeGenome>>::new();
    for (id, path) in files {
        if only.is_some_and(|allowed| !allowed.contains(&id)) {
            continue;
        }
        match naming.clade(&id) {
            Some(clade) => out.entry(clade).or_default().push(ProbeGenome { id, path }),
            None => warn!(genome = %id, "no clade tag in genome name; not sampled"),
        }
    }
    out
}

/// Probes from per-clade folders `clade_{clade}` under `root`, for the clades
/// named by `genomes`.
pub fn probes_from_clade_dirs(
    root: &Path,
    genomes: &[GenomeId],
    naming: &GenomeNaming,
    extension: &str,
) -> Result<BTreeMap<Clade, Vec<ProbeGenome>>, KiraError> {
    let clades = genomes
        .iter()
        .filter_map(|genome| naming.clade(genome))
        .collect::<BTreeSet<_>>();
    let mut out = BTreeMap::new();
    for clade in clades {
        let dir = root.join(format!("clade_{clade}"));
        if !dir.is_dir() {
            warn!(clade = %clade, dir = %dir.display(), "no folder for clade");
            continue;
        }
        let probes = fs_util::list_genome_files(&dir, extension)?
            .into_iter()
            .map(|(id, path)| ProbeGenome { id, path })
            .collect::<Vec<_>>();
        out.insert(clade, probes);
    }
    Ok(out)
}

/// `key -> target group -> [0|1, ...]` in trial order. Keys are clades in
/// clade mode and source group indices in source mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerdictAggregate {
    outcomes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl VerdictAggregate {
    pub fn ensure_key(&mut self, key: &str) {
        self.outcomes.entry(key.to_string()).or_default();
    }

    pub fn record(&mut self, key: &str, target: GroupIndex, same_species: bool) {
        self.outcomes
            .entry(key.to_string())
            .or_default()
            .entry(target.to_string())
            .or_default()
            .push(u8::from(same_species));
    }

    pub fn outcomes(&self, key: &str) -> Option<&BTreeMap<String, Vec<u8>>> {
        self.outcomes.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    /// Targets for which every recorded outcome under `key` is positive.
    /// Targets with no recorded outcome never qualify.
    pub fn unanimous_targets(&self, key: &str) -> Vec<GroupIndex> {
        let mut targets = self
            .outcomes
            .get(key)
            .into_iter()
            .flatten()
            .filter(|(_, votes)| !votes.is_empty() && votes.iter().all(|vote| *vote == 1))
            .filter_map(|(target, _)| target.parse::<GroupIndex>().ok())
            .collect::<Vec<_>>();
        targets.sort();
        targets
    }

    pub fn read(path: &Path) -> Result<Self, KiraError> {
        let content = fs::read_to_string(path).map_err(|err| KiraError::InputRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|err| KiraError::InputParse {
            path: path.to_path_buf(),
            line: err.line(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Clades,
    Sources,
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationMode::Clades => f.write_str("clades"),
            ValidationMode::Sources => f.write_str("sources"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrialOutcome {
    SameSpecies,
    DifferentSpecies,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    pub probe: GenomeId,
    pub key: String,
    pub target: GroupIndex,
    pub outcome: TrialOutcome,
    pub reason: Option<String>,
    pub results_file: Option<String>,
    pub plot_file: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossValidationRun {
    pub mode: ValidationMode,
    pub seed: u64,
    pub generated_at: String,
    pub tool: String,
    pub outcomes: VerdictAggregate,
    pub trials: Vec<TrialRecord>,
}

impl CrossValidationRun {
    pub fn skipped(&self) -> usize {
        self.trials
            .iter()
            .filter(|trial| trial.outcome == TrialOutcome::Skipped)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub results_dir: PathBuf,
    pub probes_per_clade: usize,
    pub workers: usize,
    /// Drawn from the OS when absent; the value used is reported in the run.
    pub seed: Option<u64>,
}

struct TrialPlan {
    probe: ProbeGenome,
    key: String,
    target: usize,
}

pub struct CrossValidator<O: Oracle> {
    runner: WorkspaceRunner<O>,
    options: ValidationOptions,
    seed: u64,
}

impl<O: Oracle> CrossValidator<O> {
    pub fn new(runner: WorkspaceRunner<O>, options: ValidationOptions) -> Self {
        let seed = options.seed.unwrap_or_else(rand::random);
        Self {
            runner,
            options,
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Up to `probes_per_clade` genomes per clade, each tested against every group.
    pub fn run_clades(
        &self,
        probes: &BTreeMap<Clade, Vec<ProbeGenome>>,
        groups: &[GroupDir],
    ) -> Result<CrossValidationRun, KiraError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut plans = Vec::new();
        let mut keys = Vec::new();
        for (clade, genomes) in probes {
            if genomes.is_empty() {
                warn!(clade = %clade, "clade has no genomes to sample");
                continue;
            }
            let take = self.options.probes_per_clade.min(genomes.len());
            let sampled = genomes
                .choose_multiple(&mut rng, take)
                .cloned()
                .collect::<Vec<_>>();
            info!(
                clade = %clade,
                sampled = ?sampled.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
                "clade probes selected"
            );
            keys.push(clade.to_string());
            for probe in sampled {
                for target in 0..groups.len() {
                    plans.push(TrialPlan {
                        probe: probe.clone(),
                        key: clade.to_string(),
                        target,
                    });
                }
            }
        }
        self.execute(ValidationMode::Clades, keys, plans, groups)
    }

    /// One random genome per group, tested against every other group.
    pub fn run_sources(&self, groups: &[GroupDir]) -> Result<CrossValidationRun, KiraError> {
        if groups.len() < 2 {
            warn!(
                groups = groups.len(),
                "source mode needs at least two groups; nothing to test"
            );
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut plans = Vec::new();
        let mut keys = Vec::new();
        for (source, group) in groups.iter().enumerate() {
            let Some(probe) = group.genomes.choose(&mut rng) else {
                warn!(group = %group.index, "group has no genome files; no probe drawn");
                continue;
            };
            info!(group = %group.index, probe = %probe.id, "source probe selected");
            let key = group.index.to_string();
            keys.push(key.clone());
            for target in (0..groups.len()).filter(|target| *target != source) {
                plans.push(TrialPlan {
                    probe: probe.clone(),
                    key: key.clone(),
                    target,
                });
            }
        }
        self.execute(ValidationMode::Sources, keys, plans, groups)
    }

    fn execute(
        &self,
        mode: ValidationMode,
        keys: Vec<String>,
        plans: Vec<TrialPlan>,
        groups: &[GroupDir],
    ) -> Result<CrossValidationRun, KiraError> {
        fs_util::ensure_dir(&self.options.results_dir)?;
        self.runner.prepare()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;

        info!(
            trials = plans.len(),
            workers = self.options.workers,
            seed = self.seed,
            "cross-validation started"
        );
        let trials = pool.install(|| {
            plans
                .par_iter()
                .map(|plan| self.run_trial(plan, &groups[plan.target]))
                .collect::<Result<Vec<_>, KiraError>>()
        })?;

        let mut outcomes = VerdictAggregate::default();
        for key in &keys {
            outcomes.ensure_key(key);
        }
        for trial in &trials {
            match trial.outcome {
                TrialOutcome::SameSpecies => outcomes.record(&trial.key, trial.target, true),
                TrialOutcome::DifferentSpecies => outcomes.record(&trial.key, trial.target, false),
                TrialOutcome::Skipped => {}
            }
        }

        let run = CrossValidationRun {
            mode,
            seed: self.seed,
            generated_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("kira-sp/{}", env!("CARGO_PKG_VERSION")),
            outcomes,
            trials,
        };
        info!(trials = run.trials.len(), skipped = run.skipped(), "cross-validation finished");
        Ok(run)
    }

    fn run_trial(&self, plan: &TrialPlan, target: &GroupDir) -> Result<TrialRecord, KiraError> {
        let artifact = format!("{}_{}_s{}", plan.probe.id, plan.key, target.index);
        let label = format!("{}_{}_s{}", plan.key, plan.probe.id, target.index);
        let request = TrialRequest {
            probe: &plan.probe.path,
            group_dir: &target.path,
            label: &label,
        };

        let start = Instant::now();
        let result = self.runner.run(&request, |outputs| {
            let same_species =
                OracleReport::parse(&outputs.report_text).is_member(plan.probe.id.as_str());
            let (results_file, plot_file) = self.archive(outputs, &artifact)?;
            Ok((same_species, results_file, plot_file))
        });
        let elapsed_ms = start.elapsed().as_millis();

        let mut record = TrialRecord {
            probe: plan.probe.id.clone(),
            key: plan.key.clone(),
            target: target.index,
            outcome: TrialOutcome::Skipped,
            reason: None,
            results_file: None,
            plot_file: None,
            elapsed_ms,
        };
        match result {
            Ok((same_species, results_file, plot_file)) => {
                info!(
                    probe = %plan.probe.id,
                    key = %plan.key,
                    group = %target.index,
                    same_species,
                    elapsed_ms,
                    "trial finished"
                );
                record.outcome = if same_species {
                    TrialOutcome::SameSpecies
                } else {
                    TrialOutcome::DifferentSpecies
                };
                record.results_file = Some(results_file);
                record.plot_file = plot_file;
            }
            Err(err) if err.is_trial_local() => {
                warn!(
                    probe = %plan.probe.id,
                    key = %plan.key,
                    group = %target.index,
                    error = %err,
                    "trial skipped"
                );
                if let KiraError::OracleInvocationFailed { stdout, stderr, .. } = &err {
                    debug!(stdout = %stdout, stderr = %stderr, "oracle output");
                }
                record.reason = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }
        Ok(record)
    }

    /// Copies the report (and plot when present) into the results directory.
    fn archive(
        &self,
        outputs: &WorkspaceOutputs<'_>,
        artifact: &str,
    ) -> Result<(String, Option<String>), KiraError> {
        let results_name = format!("{artifact}_results.txt");
        let results_path = self.options.results_dir.join(&results_name);
        fs::copy(&outputs.report_path, &results_path)
            .map_err(|err| KiraError::filesystem(format!("archive {results_name}"), err))?;

        let plot_file = outputs.plot_path.as_ref().and_then(|plot| {
            let plot_name = format!("{artifact}_gno2.png");
            match fs::copy(plot, self.options.results_dir.join(&plot_name)) {
                Ok(_) => Some(plot_name),
                Err(err) => {
                    warn!(plot = %plot.display(), error = %err, "plot copy failed");
                    None
                }
            }
        });
        if plot_file.is_none() && outputs.plot_path.is_none() {
            debug!(workspace = %outputs.workspace.display(), "oracle produced no plot");
        }

        Ok((results_name, plot_file))
    }
}
