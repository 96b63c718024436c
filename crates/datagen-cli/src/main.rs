mod config;
mod registry;

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use datagen_core::{BuiltTree, Error as CoreError, parse_schema};
use datagen_generate::output::NdjsonWriter;
use datagen_generate::{FilteringBehavior, GenerationEngine, GenerationError, GeneratorRegistry};
use thiserror::Error;
use uuid::Uuid;

use config::{ConfigError, OptionOverrides, resolve_options};
use registry::{
    OutputFormat, RunContext, init_run_logging, init_stderr_logging, start_run, write_dataset,
    write_report,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("{0}")]
    Generation(#[from] GenerationError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "datagen", version, about = "Synthetic data from declarative schemas")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a schema and report every problem found.
    Validate(ValidateArgs),
    /// Generate every collection into a run directory.
    Generate(GenerateArgs),
    /// Emit one collection as NDJSON, item by item.
    Stream(StreamArgs),
    /// List the available generators.
    Generators,
    /// Print the JSON Schema of the run configuration.
    ConfigSchema,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Schema document (JSON).
    schema: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Schema document (JSON).
    schema: PathBuf,
    /// Run configuration (TOML or JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run seed; overrides the config file and the schema.
    #[arg(long)]
    seed: Option<u64>,
    /// Attempts per value for retry-based filtering.
    #[arg(long)]
    max_filtering_retries: Option<u32>,
    /// What to do when filtering leaves no acceptable value.
    #[arg(long, value_enum)]
    filtering_behavior: Option<BehaviorArg>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    run: RunArgs,
    /// Keep unreferenced fields pending until output.
    #[arg(long, default_value_t = false)]
    memory_optimized: bool,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Dataset destination instead of the run directory.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[command(flatten)]
    run: RunArgs,
    /// DSL key or final name of the collection to emit.
    #[arg(long)]
    collection: String,
    /// NDJSON destination; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BehaviorArg {
    ReturnNull,
    ThrowException,
}

impl From<BehaviorArg> for FilteringBehavior {
    fn from(value: BehaviorArg) -> Self {
        match value {
            BehaviorArg::ReturnNull => FilteringBehavior::ReturnNull,
            BehaviorArg::ThrowException => FilteringBehavior::ThrowException,
        }
    }
}

impl RunArgs {
    fn overrides(&self, memory_optimized: bool) -> OptionOverrides {
        OptionOverrides {
            seed: self.seed,
            max_filtering_retries: self.max_filtering_retries,
            filtering_behavior: self.filtering_behavior.map(FilteringBehavior::from),
            memory_optimized,
        }
    }
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Generate(args) => run_generate(args),
        Command::Stream(args) => run_stream(args),
        Command::Generators => run_generators(),
        Command::ConfigSchema => run_config_schema(),
    }
}

fn load_tree(path: &Path, registry: &GeneratorRegistry) -> Result<BuiltTree, CliError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_schema(&text, registry)?)
}

fn log_warnings(tree: &BuiltTree) {
    for warning in &tree.warnings {
        tracing::warn!(
            event = "schema_warning",
            code = %warning.code,
            path = %warning.path,
            "{}",
            warning.message
        );
    }
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    init_stderr_logging()?;
    let registry = GeneratorRegistry::with_defaults();
    let tree = load_tree(&args.schema, &registry)?;
    log_warnings(&tree);

    let items: u64 = tree
        .root
        .collections
        .iter()
        .map(|collection| collection.count)
        .sum();
    println!(
        "{}: {} collections, {} items",
        args.schema.display(),
        tree.root.collections.len(),
        items
    );
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    let options = resolve_options(
        args.run.config.as_deref(),
        &args.run.overrides(args.memory_optimized),
    )?;
    options.validate()?;

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        schema_path: args.run.schema.clone(),
        run_dir: args.run_dir,
        out: args.out,
        format: args.format,
        options: options.clone(),
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;

    tracing::info!(event = "run_started", run_id = %run_id, schema = %run_ctx.schema_path.display());
    let timer = Instant::now();

    let registry = GeneratorRegistry::with_defaults();
    let tree = load_tree(&run_ctx.schema_path, &registry)?;
    log_warnings(&tree);

    let result = GenerationEngine::new(options).run(&tree.root, &registry)?;

    let files = write_dataset(&run_paths, &result.dataset, run_ctx.format)?;
    for file in &files {
        tracing::info!(event = "dataset_written", path = %file.display());
    }
    write_report(&run_paths, &result.report)?;
    tracing::info!(event = "report_written", path = %run_paths.report_path.display());

    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(
        event = "run_finished",
        status = "success",
        items = result.dataset.total_items(),
        duration_ms = duration_ms
    );

    println!("{}", run_paths.root.display());
    Ok(())
}

fn run_stream(args: StreamArgs) -> Result<(), CliError> {
    init_stderr_logging()?;
    let options = resolve_options(args.run.config.as_deref(), &args.run.overrides(false))?;

    let registry = GeneratorRegistry::with_defaults();
    let tree = load_tree(&args.run.schema, &registry)?;
    log_warnings(&tree);

    let sink: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(fs::File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = NdjsonWriter::new(BufWriter::new(sink));

    let mut streaming = GenerationEngine::new(options).streaming(&tree.root, &registry)?;
    for item in streaming.stream(&args.collection)? {
        writer.write_item(&item?)?;
    }
    let lines = writer.lines();
    writer.finish()?;

    let report = streaming.into_report();
    tracing::info!(
        event = "stream_finished",
        collection = %args.collection,
        items = lines,
        filters_exhausted = report.filters_exhausted
    );
    Ok(())
}

fn run_generators() -> Result<(), CliError> {
    let registry = GeneratorRegistry::with_defaults();
    let mut stdout = io::stdout().lock();
    for id in registry.ids() {
        let generator = registry
            .generator(id)
            .ok_or_else(|| GenerationError::UnknownGenerator(id.to_string()))?;
        let fields: Vec<&str> = generator
            .field_suppliers()
            .iter()
            .map(|supplier| supplier.name)
            .collect();
        if fields.is_empty() {
            writeln!(stdout, "{id}")?;
        } else {
            writeln!(stdout, "{id} ({})", fields.join(", "))?;
        }
    }
    Ok(())
}

fn run_config_schema() -> Result<(), CliError> {
    let schema = schemars::schema_for!(datagen_generate::GenerateOptions);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "datagen",
            "generate",
            "schema.json",
            "--seed",
            "7",
            "--filtering-behavior",
            "throw-exception",
            "--memory-optimized",
            "--format",
            "csv",
        ])
        .expect("parse");

        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.run.schema, PathBuf::from("schema.json"));
        assert_eq!(args.format, OutputFormat::Csv);
        assert_eq!(args.run_dir, PathBuf::from("runs"));

        let overrides = args.run.overrides(args.memory_optimized);
        assert_eq!(overrides.seed, Some(7));
        assert_eq!(
            overrides.filtering_behavior,
            Some(FilteringBehavior::ThrowException)
        );
        assert!(overrides.memory_optimized);
    }

    #[test]
    fn stream_requires_a_collection() {
        assert!(Cli::try_parse_from(["datagen", "stream", "schema.json"]).is_err());
        assert!(
            Cli::try_parse_from(["datagen", "stream", "schema.json", "--collection", "users"])
                .is_ok()
        );
    }
}
