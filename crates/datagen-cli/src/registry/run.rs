use std::fs::{OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;

use datagen_generate::output::{write_dataset_csv, write_dataset_json};
use datagen_generate::{Dataset, GenerateOptions, GenerationReport};

use super::{RegistryError, RegistryResult};

/// Dataset file layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One `dataset.json` object.
    #[default]
    Json,
    /// One `<collection>.csv` per collection.
    Csv,
}

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub schema_path: PathBuf,
    pub run_dir: PathBuf,
    pub out: Option<PathBuf>,
    pub format: OutputFormat,
    pub options: GenerateOptions,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub schema_path: String,
    pub format: OutputFormat,
    pub options: GenerateOptions,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub report_path: PathBuf,
    /// `dataset.json`, or the directory receiving CSV files.
    pub dataset_path: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx
        .run_dir
        .join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&root)?;

    let config_path = root.join("config.json");
    let logs_path = root.join("logs.ndjson");
    let report_path = root.join("report.json");
    let dataset_path = match (&ctx.out, ctx.format) {
        (Some(out), _) => out.clone(),
        (None, OutputFormat::Json) => root.join("dataset.json"),
        (None, OutputFormat::Csv) => root.join("csv"),
    };

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        schema_path: ctx.schema_path.display().to_string(),
        format: ctx.format,
        options: ctx.options.clone(),
        git: collect_git_info(),
    };

    write_json(&config_path, &config)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)?;

    Ok(RunPaths {
        root,
        logs_path,
        report_path,
        dataset_path,
    })
}

/// Write the dataset in `format`. Returns every file written.
pub fn write_dataset(
    paths: &RunPaths,
    dataset: &Dataset,
    format: OutputFormat,
) -> RegistryResult<Vec<PathBuf>> {
    ensure_parent(&paths.dataset_path)?;
    match format {
        OutputFormat::Json => {
            write_dataset_json(&paths.dataset_path, dataset)?;
            Ok(vec![paths.dataset_path.clone()])
        }
        OutputFormat::Csv => {
            let (files, _) = write_dataset_csv(&paths.dataset_path, dataset)?;
            Ok(files)
        }
    }
}

pub fn write_report(paths: &RunPaths, report: &GenerationReport) -> RegistryResult<()> {
    write_json(&paths.report_path, report)
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

fn ensure_parent(path: &Path) -> RegistryResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent)?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn context(run_dir: &Path, format: OutputFormat) -> RunContext {
        RunContext {
            run_id: "abc".to_string(),
            started_at: DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
                .map(|time| time.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            schema_path: PathBuf::from("schema.json"),
            run_dir: run_dir.to_path_buf(),
            out: None,
            format,
            options: GenerateOptions::default(),
        }
    }

    #[test]
    fn run_directory_holds_config_and_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = start_run(&context(dir.path(), OutputFormat::Json)).expect("start run");

        assert_eq!(
            paths.root,
            dir.path().join("2024-05-01T10-20-30Z__run_abc")
        );
        assert!(paths.logs_path.exists());
        assert_eq!(paths.dataset_path, paths.root.join("dataset.json"));

        let config: Value = serde_json::from_str(
            &std::fs::read_to_string(paths.root.join("config.json")).expect("read config"),
        )
        .expect("parse config");
        assert_eq!(config["run_id"], "abc");
        assert_eq!(config["format"], "json");
        assert_eq!(config["options"]["filtering_behavior"], "return_null");
    }

    #[test]
    fn csv_datasets_land_in_their_own_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = start_run(&context(dir.path(), OutputFormat::Csv)).expect("start run");

        let mut dataset = Dataset::new();
        dataset.push("users", json!({"id": 1}));
        dataset.push("orders", json!({"user": 1}));
        let files = write_dataset(&paths, &dataset, OutputFormat::Csv).expect("write dataset");

        assert_eq!(
            files,
            vec![
                paths.root.join("csv").join("users.csv"),
                paths.root.join("csv").join("orders.csv"),
            ]
        );
    }
}
