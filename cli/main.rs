#![deny(unused_variables)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use std::error::Error;
use std::path::PathBuf;
use std::process;

use igwas::covariance::CovarianceMatrix;
use igwas::phenotype::validate_definition;
use igwas::pipeline::{
    CohortStore, DirectoryCohortStore, Settings, generate_request_id, run_pipeline,
};
use igwas::progress::observer_for;
use igwas::project::read_beta_file;
use igwas::propagate::{FeatureSource, propagate_to_file, sources_in_dir};
use igwas::types::{PropagationOptions, SampleSizePolicy, VarianceModelKind};

#[derive(Clone, Copy, ValueEnum)]
pub enum VarianceModelCli {
    CorrelatedDelta,
    GenotypePartialVariance,
}

impl From<VarianceModelCli> for VarianceModelKind {
    fn from(value: VarianceModelCli) -> Self {
        match value {
            VarianceModelCli::CorrelatedDelta => Self::CorrelatedDelta,
            VarianceModelCli::GenotypePartialVariance => Self::GenotypePartialVariance,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SampleSizeCli {
    ContributingMinimum,
    GlobalMinimum,
}

impl From<SampleSizeCli> for SampleSizePolicy {
    fn from(value: SampleSizeCli) -> Self {
        match value {
            SampleSizeCli::ContributingMinimum => Self::ContributingMinimum,
            SampleSizeCli::GlobalMinimum => Self::GlobalMinimum,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Cohort directory name under `<data_root>/cohorts`
    #[arg(long)]
    pub cohort: String,

    /// Phenotype definition in postfix notation, e.g. "age bmi +"
    #[arg(long)]
    pub phenotype: String,

    /// Identifier naming the output artifacts (random when omitted)
    #[arg(long)]
    pub request_id: Option<String>,

    /// Override `storage.data_root`
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Override `storage.results_root`
    #[arg(long)]
    pub results_root: Option<PathBuf>,

    /// Run every stage except the upload
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    #[arg(long)]
    pub cohort: String,

    #[arg(long)]
    pub phenotype: String,

    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

#[derive(Args)]
pub struct PropagateArgs {
    /// Beta file (CSV with `feature,<name>` header)
    #[arg(long)]
    pub beta: PathBuf,

    /// Labelled feature covariance matrix (TSV)
    #[arg(long)]
    pub covariance: PathBuf,

    /// Per-feature GWAS files, or a single directory containing them
    #[arg(long, num_args = 1.., required = true)]
    pub gwas: Vec<PathBuf>,

    /// Output path; gzip-compressed when `--compress` is given
    #[arg(long)]
    pub output: PathBuf,

    /// Variants read per file per unit of work
    #[arg(long, default_value = "100000")]
    pub chunk_size: usize,

    /// Worker threads (defaults to all logical CPUs)
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Chunks queued between the reader and the workers
    #[arg(long, default_value = "8")]
    pub capacity: usize,

    #[arg(long)]
    pub compress: bool,

    /// Hide the progress display
    #[arg(long)]
    pub quiet: bool,

    #[arg(long, value_enum, default_value_t = VarianceModelCli::CorrelatedDelta)]
    pub variance_model: VarianceModelCli,

    #[arg(long, value_enum, default_value_t = SampleSizeCli::ContributingMinimum)]
    pub sample_size: SampleSizeCli,

    /// Covariates included in each per-feature GWAS
    #[arg(long, default_value = "0")]
    pub num_covar: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the GWAS of a phenotype definition over a stored cohort
    Run(RunArgs),
    /// Check a phenotype definition against a cohort's features
    Check(CheckArgs),
    /// Propagate an existing beta file through per-feature GWAS files
    Propagate(PropagateArgs),
}

#[derive(Parser)]
#[command(
    name = "igwas",
    about = "Indirect GWAS of derived phenotypes",
    long_about = "Computes GWAS summary statistics for phenotypes defined as expressions \
                 over cohort features, using the stored GWAS of each feature."
)]
struct Cli {
    /// Settings file (TOML); defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, Box<dyn Error>> {
    Ok(match path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    })
}

fn run(mut settings: Settings, args: RunArgs) -> Result<(), Box<dyn Error>> {
    if let Some(root) = args.data_root {
        settings.storage.data_root = root;
    }
    if let Some(root) = args.results_root {
        settings.storage.results_root = root;
    }
    settings.storage.dry_run |= args.dry_run;
    let request_id = args.request_id.unwrap_or_else(generate_request_id);

    match run_pipeline(&settings, &request_id, &args.phenotype, &args.cohort) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Err(failure.into())
        }
    }
}

fn check(settings: Settings, args: CheckArgs) -> Result<(), Box<dyn Error>> {
    let data_root = args.data_root.unwrap_or(settings.storage.data_root);
    let store = DirectoryCohortStore::new(data_root);
    let (table, _, _) = store.feature_table_and_gwas_paths(&args.cohort)?;
    let validation = validate_definition(&args.phenotype, table.names());
    println!("{}", serde_json::to_string_pretty(&validation)?);
    if validation.is_valid {
        Ok(())
    } else {
        Err(validation.message.into())
    }
}

/// Settings only contribute the statistic column names; flags control the rest.
fn propagate(settings: Settings, args: PropagateArgs) -> Result<(), Box<dyn Error>> {
    let (name, beta) = read_beta_file(&args.beta)?;
    log::info!("Propagating '{name}' with {} coefficients", beta.len());
    let covariance = CovarianceMatrix::load(&args.covariance)?;

    let sources = match args.gwas.as_slice() {
        [dir] if dir.is_dir() => sources_in_dir(dir)?,
        paths => paths
            .iter()
            .map(|path| {
                FeatureSource::from_path(path)
                    .ok_or_else(|| format!("cannot name a feature after '{}'", path.display()))
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let options = PropagationOptions {
        chunk_size: args.chunk_size,
        num_threads: args.num_threads.unwrap_or_else(num_cpus::get),
        capacity: args.capacity,
        compress: args.compress,
        quiet: args.quiet,
        sample_size: args.sample_size.into(),
        variance_model: args.variance_model.into(),
        num_covar: args.num_covar,
        columns: settings.indirect_gwas.columns,
    };
    let mut observer = observer_for(options.quiet);
    let summary = propagate_to_file(
        &beta,
        &covariance,
        &sources,
        &options,
        &args.output,
        observer.as_mut(),
    )?;
    println!(
        "Wrote {} variants to {} ({})",
        summary.num_variants,
        args.output.display(),
        summary.method
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let Cli { config, command } = Cli::parse();
    let result = load_settings(config.as_ref()).and_then(|settings| match command {
        Some(Commands::Run(args)) => run(settings, args),
        Some(Commands::Check(args)) => check(settings, args),
        Some(Commands::Propagate(args)) => propagate(settings, args),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
