mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

use registry::{init_run_logging, start_run, write_experiment, write_forms, RunContext, RunOptions};
use tallyform_core::{
    consolidate_form_set, validate, ConsolidatedForm, ExtractionError, FormCategory, PageRecord,
    FORM_VERSION,
};
use tallyform_eval::{
    ExperimentRunner, FileDatasetStore, RunOptions as ExperimentOptions,
};
use tallyform_model::{
    load_model_registry, ConfigError, GenerativeExtractor, ModelConfig, ModelError, PageExtractor,
    PageImage,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("model registry error: {0}")]
    Config(#[from] ConfigError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("experiment error: {0}")]
    Experiment(#[from] tallyform_eval::ExperimentError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "tallyform", version, about = "Tally form extraction and model experiments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and consolidate one scanned form set.
    Extract(ExtractArgs),
    /// Compare model configurations over a labeled dataset.
    Experiment(ExperimentArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Page image files, in reading order.
    #[arg(value_name = "PAGE", required = true)]
    pages: Vec<PathBuf>,
    /// Model registry TOML file.
    #[arg(long, default_value = "models.toml")]
    models: PathBuf,
    /// Extraction configuration name; defaults to the registry's first entry.
    #[arg(long)]
    model: Option<String>,
    /// Category to validate against when no page states one.
    #[arg(long, value_enum)]
    category: Option<CategoryArg>,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Optional output path for forms.json.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExperimentArgs {
    /// Dataset name in the dataset directory.
    #[arg(value_name = "DATASET")]
    dataset: String,
    /// Dataset version; unversioned when omitted.
    #[arg(long)]
    dataset_version: Option<String>,
    /// Directory holding dataset JSON files.
    #[arg(long, default_value = "datasets")]
    dataset_dir: PathBuf,
    /// Model registry TOML file.
    #[arg(long, default_value = "models.toml")]
    models: PathBuf,
    /// Configuration names to compare; defaults to every registry entry.
    #[arg(long = "model", value_name = "NAME")]
    model_names: Vec<String>,
    /// Records taken from the head of the dataset.
    #[arg(long, default_value_t = 25)]
    sample_size: usize,
    /// Concurrent in-flight records per configuration.
    #[arg(long, default_value_t = 2)]
    max_parallel: usize,
    /// Abort a configuration on the first record failure.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,
    /// Score outputs with the registry's judge model.
    #[arg(long, default_value_t = false)]
    judge: bool,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Constituency,
    PartyList,
}

impl From<CategoryArg> for FormCategory {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Constituency => FormCategory::Constituency,
            CategoryArg::PartyList => FormCategory::PartyList,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Extract(args) => run_extract(args).await,
        Command::Experiment(args) => run_experiment(args).await,
    }
}

async fn run_extract(args: ExtractArgs) -> Result<(), CliError> {
    let model_registry = load_model_registry(&args.models)?;
    let config = match &args.model {
        Some(name) => model_registry
            .model(name)
            .ok_or_else(|| CliError::InvalidConfig(format!("no model named '{name}'")))?,
        None => model_registry
            .models
            .first()
            .ok_or_else(|| CliError::InvalidConfig("model registry is empty".to_string()))?,
    }
    .clone();

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        command: "extract".to_string(),
        form_version: FORM_VERSION.to_string(),
        run_dir: args.run_dir,
        out: args.out,
        options: RunOptions {
            models: vec![config.name.clone()],
            dataset: None,
            dataset_version: None,
            sample_size: None,
            max_parallel: None,
            fail_fast: false,
            pages: args.pages.clone(),
        },
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;

    tracing::info!(event = "run_started", run_id = %run_id, command = "extract", model = %config.name);

    let timer = Instant::now();
    let extractor: Arc<dyn PageExtractor> = Arc::new(GenerativeExtractor::new(config)?);

    let (pages, errors) = extract_pages(&extractor, &args.pages).await?;
    for err in &errors {
        tracing::warn!(event = "page_extraction_failed", kind = ?err.kind(), reason = %err);
    }

    let mut forms = consolidate_form_set(&pages);
    for form in &mut forms {
        let category = form
            .category
            .or(args.category.map(FormCategory::from))
            .unwrap_or(FormCategory::Constituency);
        let report = validate(form, category);
        tracing::info!(
            event = "form_validated",
            category = ?category,
            passed = report.passed(),
            score = report.composite_score(),
        );
        form.validation = Some(report);
    }

    write_forms(&run_paths, &forms, run_ctx.out.as_deref())?;
    tracing::info!(event = "forms_written", path = %run_paths.forms_path.display(), forms = forms.len());

    print_extract_report(&forms, errors.len())?;

    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(event = "run_finished", status = "success", duration_ms = duration_ms);

    Ok(())
}

/// Extract every page concurrently; failed pages are reported, not fatal.
async fn extract_pages(
    extractor: &Arc<dyn PageExtractor>,
    paths: &[PathBuf],
) -> Result<(Vec<PageRecord>, Vec<ExtractionError>), CliError> {
    let mut tasks: JoinSet<(usize, Result<PageRecord, ExtractionError>)> = JoinSet::new();
    for (index, path) in paths.iter().enumerate() {
        let bytes = std::fs::read(path)?;
        let extractor = Arc::clone(extractor);
        tasks.spawn(async move {
            let image = PageImage::new(bytes);
            (index, extractor.extract(&image, index).await)
        });
    }

    let mut by_index: BTreeMap<usize, PageRecord> = BTreeMap::new();
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined
            .map_err(|err| CliError::InvalidConfig(format!("extraction task failed: {err}")))?;
        match result {
            Ok(page) => {
                by_index.insert(index, page);
            }
            Err(err) => errors.push(err),
        }
    }

    Ok((by_index.into_values().collect(), errors))
}

fn print_extract_report(forms: &[ConsolidatedForm], failed_pages: usize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(forms)
        .map_err(|err| CliError::InvalidConfig(format!("cannot render forms: {err}")))?;
    println!("{rendered}");
    if failed_pages > 0 {
        eprintln!("warning: {failed_pages} page(s) failed extraction");
    }
    Ok(())
}

async fn run_experiment(args: ExperimentArgs) -> Result<(), CliError> {
    let model_registry = load_model_registry(&args.models)?;

    let configs: Vec<ModelConfig> = if args.model_names.is_empty() {
        model_registry.models.clone()
    } else {
        args.model_names
            .iter()
            .map(|name| {
                model_registry
                    .model(name)
                    .cloned()
                    .ok_or_else(|| CliError::InvalidConfig(format!("no model named '{name}'")))
            })
            .collect::<Result<_, _>>()?
    };
    if configs.is_empty() {
        return Err(CliError::InvalidConfig(
            "model registry has no extraction configurations".to_string(),
        ));
    }

    let judge_config = if args.judge {
        model_registry.judge.clone()
    } else {
        None
    };

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        command: "experiment".to_string(),
        form_version: FORM_VERSION.to_string(),
        run_dir: args.run_dir,
        out: None,
        options: RunOptions {
            models: configs.iter().map(|config| config.name.clone()).collect(),
            dataset: Some(args.dataset.clone()),
            dataset_version: args.dataset_version.clone(),
            sample_size: Some(args.sample_size),
            max_parallel: Some(args.max_parallel),
            fail_fast: args.fail_fast,
            pages: Vec::new(),
        },
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;

    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        command = "experiment",
        dataset = %args.dataset,
        configurations = configs.len(),
    );

    let timer = Instant::now();
    let runner = ExperimentRunner::with_defaults(judge_config);
    let store = FileDatasetStore::new(args.dataset_dir);
    let options = ExperimentOptions {
        sample_size: args.sample_size,
        max_parallel: args.max_parallel,
        fail_fast: args.fail_fast,
    };

    let outcome = runner
        .run(
            &store,
            &args.dataset,
            args.dataset_version.as_deref(),
            &configs,
            &options,
        )
        .await?;

    write_experiment(&run_paths, &outcome.summaries, &outcome.comparison)?;
    tracing::info!(
        event = "experiment_written",
        summaries = %run_paths.summaries_path.display(),
        comparison = %run_paths.comparison_path.display(),
    );

    for summary in &outcome.summaries {
        println!(
            "configuration {}: state={:?} total={} successful={} failed={}",
            summary.configuration,
            summary.state,
            summary.total_records,
            summary.successful_records,
            summary.failed_records,
        );
        for (name, aggregate) in &summary.aggregates {
            println!("  {name}: {:.4} (n={})", aggregate.value, aggregate.count);
        }
    }
    for (rank, (name, value)) in outcome.comparison.ranked_by("exact_match").iter().enumerate() {
        println!("#{} {name}: exact_match={value:.4}", rank + 1);
    }

    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(event = "run_finished", status = "success", duration_ms = duration_ms);

    Ok(())
}
