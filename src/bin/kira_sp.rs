use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_species::app::{
    App, GroupRequest, ProbeSource, SummaryRequest, TaxonomyRequest, ValidationRequest,
};
use kira_species::config::{ConfigLoader, ResolvedConfig, parse_threshold};
use kira_species::domain::ComponentOrder;
use kira_species::error::KiraError;
use kira_species::oracle::CommandOracle;
use kira_species::output::{JsonOutput, OutputMode, TextOutput};
use kira_species::taxonomy::GtdbHttpClient;

#[derive(Parser)]
#[command(name = "kira-sp")]
#[command(
    about = "Species delimitation from genome identity, oracle cross-validation and taxonomy"
)]
#[command(version, author)]
struct Cli {
    /// Config file (default: kira-species.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print command results as JSON
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Group genomes into reference groups by identity and stage them")]
    Group(GroupArgs),
    #[command(about = "Cross-validate reference groups with the species oracle")]
    Validate(ValidateArgs),
    #[command(about = "Look up taxonomy records for genome files")]
    Taxonomy(TaxonomyArgs),
    #[command(about = "Merge every classification into one table")]
    Summarize(SummarizeArgs),
}

#[derive(Args, Clone)]
struct GroupingArgs {
    /// Minimum identity percentage for an edge
    #[arg(long)]
    threshold: Option<String>,

    #[arg(long)]
    min_group_size: Option<usize>,

    #[arg(long, value_enum)]
    order: Option<ComponentOrder>,
}

#[derive(Args)]
struct GroupArgs {
    identity_table: PathBuf,

    /// Genome directory or .zip archive to stage into group folders
    #[arg(long)]
    archive: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    #[command(flatten)]
    grouping: GroupingArgs,
}

#[derive(Args)]
struct ValidateArgs {
    #[command(subcommand)]
    mode: ValidateMode,
}

#[derive(Subcommand)]
enum ValidateMode {
    #[command(about = "Sample genomes per clade and test them against every group")]
    Clades(CladesArgs),
    #[command(about = "Test one genome of each group against the other groups")]
    Sources(SourcesArgs),
}

#[derive(Args, Clone)]
struct OracleArgs {
    /// Oracle program; overrides oracle.program
    #[arg(long)]
    oracle: Option<PathBuf>,

    /// Extra argument passed before the workspace path (repeatable)
    #[arg(long = "oracle-arg", allow_hyphen_values = true)]
    oracle_args: Vec<String>,

    /// Per-trial timeout in seconds; 0 disables it
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long, default_value = "CSF_results_and_plots")]
    results_dir: PathBuf,

    #[arg(long, default_value = "kira-sp-work")]
    work_dir: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct CladesArgs {
    /// Directory of genomes under test (or clade folder root with --clade-dirs)
    test_dir: PathBuf,

    /// Reference group directories, numbered 1.. in the order given
    #[arg(required = true, num_args = 1..)]
    groups: Vec<PathBuf>,

    /// Read probes from clade_{clade} folders under the test directory
    #[arg(long, requires = "genomes")]
    clade_dirs: bool,

    /// Genome list restricting (or, with --clade-dirs, naming) the clades
    #[arg(long)]
    genomes: Option<PathBuf>,

    #[arg(long)]
    probes_per_clade: Option<usize>,

    #[arg(long, default_value = "CSF_clades_results.json")]
    output: PathBuf,

    #[command(flatten)]
    oracle: OracleArgs,
}

#[derive(Args)]
struct SourcesArgs {
    #[arg(required = true, num_args = 1..)]
    groups: Vec<PathBuf>,

    #[arg(long, default_value = "CSF_sources_results.json")]
    output: PathBuf,

    #[command(flatten)]
    oracle: OracleArgs,
}

#[derive(Args)]
struct TaxonomyArgs {
    genome_dir: PathBuf,

    /// Genome table with isolate ids and accessions
    quality_table: PathBuf,

    #[arg(long, default_value = "GTDB_classification.json")]
    output: PathBuf,

    #[arg(long, default_value = "unclassified")]
    unclassified_dir: PathBuf,
}

#[derive(Args)]
struct SummarizeArgs {
    identity_table: PathBuf,
    quality_table: PathBuf,
    reference_table: PathBuf,
    taxonomy: PathBuf,
    verdicts: PathBuf,

    #[arg(long)]
    population: Option<PathBuf>,

    #[arg(long)]
    genomes: Option<PathBuf>,

    #[arg(long, default_value = "genomes_classification.tsv")]
    output: PathBuf,

    #[command(flatten)]
    grouping: GroupingArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InputRead { .. }
        | KiraError::InputParse { .. }
        | KiraError::InvalidThreshold(_)
        | KiraError::InvalidGroupSize(_)
        | KiraError::InvalidGroupIndex(_)
        | KiraError::InvalidPattern(_)
        | KiraError::MissingColumn { .. }
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::MissingOracle
        | KiraError::MissingGroupDir(_)
        | KiraError::WorkDir { .. } => 2,
        KiraError::NoReferenceGroupFound { .. } => 4,
        KiraError::OracleInvocationFailed { .. }
        | KiraError::OracleTimedOut { .. }
        | KiraError::OracleReportMissing(_)
        | KiraError::TaxonomyHttp(_)
        | KiraError::TaxonomyStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Group(args) => run_group(args, config, output_mode),
        Commands::Validate(args) => match args.mode {
            ValidateMode::Clades(args) => run_clades(args, config, output_mode),
            ValidateMode::Sources(args) => run_sources(args, config, output_mode),
        },
        Commands::Taxonomy(args) => run_taxonomy(args, config, output_mode),
        Commands::Summarize(args) => run_summarize(args, config, output_mode),
    }
}

fn apply_grouping(config: &mut ResolvedConfig, args: &GroupingArgs) -> Result<(), KiraError> {
    if let Some(raw) = &args.threshold {
        config.identity_threshold = parse_threshold(raw)?;
    }
    if let Some(size) = args.min_group_size {
        if size == 0 {
            return Err(KiraError::InvalidGroupSize("must be at least 1".to_string()));
        }
        config.min_group_size = size;
    }
    if let Some(order) = args.order {
        config.component_order = order;
    }
    Ok(())
}

fn apply_oracle(
    config: &mut ResolvedConfig,
    args: &OracleArgs,
) -> Result<CommandOracle, KiraError> {
    if let Some(program) = &args.oracle {
        config.oracle.program = Some(program.clone());
    }
    if !args.oracle_args.is_empty() {
        config.oracle.args = args.oracle_args.clone();
    }
    if let Some(secs) = args.timeout {
        // 0 disables the timeout.
        config.oracle.timeout = (secs > 0).then_some(Duration::from_secs(secs));
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    CommandOracle::from_settings(&config.oracle)
}

fn validation_request(
    groups: Vec<PathBuf>,
    output: PathBuf,
    args: &OracleArgs,
) -> ValidationRequest {
    ValidationRequest {
        groups,
        output,
        results_dir: args.results_dir.clone(),
        work_dir: args.work_dir.clone(),
    }
}

fn run_group(
    args: GroupArgs,
    mut config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    apply_grouping(&mut config, &args.grouping)?;
    let app = App::new(config);
    let result = app.group(&GroupRequest {
        identity_table: args.identity_table,
        archive: args.archive,
        out_dir: args.out_dir,
    })?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_group(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_group(&result);
            Ok(())
        }
    }
}

fn run_clades(
    args: CladesArgs,
    mut config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let oracle = apply_oracle(&mut config, &args.oracle)?;
    if let Some(cap) = args.probes_per_clade {
        config.probes_per_clade = cap.max(1);
    }
    let probes = match (args.clade_dirs, args.genomes) {
        (true, Some(genome_list)) => ProbeSource::CladeDirs {
            root: args.test_dir,
            genome_list,
        },
        (_, genome_list) => ProbeSource::TestDir {
            dir: args.test_dir,
            genome_list,
        },
    };
    let request = validation_request(args.groups, args.output, &args.oracle);
    let app = App::new(config);
    let result = app.validate_clades(oracle, &probes, &request)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_validation(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_validation(&result);
            Ok(())
        }
    }
}

fn run_sources(
    args: SourcesArgs,
    mut config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let oracle = apply_oracle(&mut config, &args.oracle)?;
    let request = validation_request(args.groups, args.output, &args.oracle);
    let app = App::new(config);
    let result = app.validate_sources(oracle, &request)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_validation(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_validation(&result);
            Ok(())
        }
    }
}

fn run_taxonomy(
    args: TaxonomyArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let client = GtdbHttpClient::new(&config.taxonomy)?;
    let app = App::new(config);
    let result = app.taxonomy(
        &client,
        &TaxonomyRequest {
            genome_dir: args.genome_dir,
            quality_table: args.quality_table,
            output: args.output,
            unclassified_dir: args.unclassified_dir,
        },
    )?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_taxonomy(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_taxonomy(&result);
            Ok(())
        }
    }
}

fn run_summarize(
    args: SummarizeArgs,
    mut config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    apply_grouping(&mut config, &args.grouping)?;
    let app = App::new(config);
    let result = app.summarize(&SummaryRequest {
        identity_table: args.identity_table,
        quality_table: args.quality_table,
        reference_table: args.reference_table,
        taxonomy: args.taxonomy,
        verdicts: args.verdicts,
        population_table: args.population,
        genome_list: args.genomes,
        output: args.output,
    })?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_summary(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::print_summary(&result);
            Ok(())
        }
    }
}
