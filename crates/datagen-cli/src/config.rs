use std::path::Path;

use thiserror::Error;

use datagen_generate::{FilteringBehavior, GenerateOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Flags that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    pub seed: Option<u64>,
    pub max_filtering_retries: Option<u32>,
    pub filtering_behavior: Option<FilteringBehavior>,
    pub memory_optimized: bool,
}

/// Read generation options from a `.toml` or `.json` file.
pub fn load_options(path: &Path) -> ConfigResult<GenerateOptions> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Defaults, then the config file when given, then the flags.
pub fn resolve_options(
    path: Option<&Path>,
    overrides: &OptionOverrides,
) -> ConfigResult<GenerateOptions> {
    let mut options = match path {
        Some(path) => load_options(path)?,
        None => GenerateOptions::default(),
    };

    if let Some(seed) = overrides.seed {
        options.seed = Some(seed);
    }
    if let Some(retries) = overrides.max_filtering_retries {
        options.max_filtering_retries = retries;
    }
    if let Some(behavior) = overrides.filtering_behavior {
        options.filtering_behavior = behavior;
    }
    if overrides.memory_optimized {
        options.memory_optimized = true;
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn toml_and_json_configs_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let toml_path = dir.path().join("run.toml");
        fs::write(
            &toml_path,
            "seed = 5\nfiltering_behavior = \"throw_exception\"\n",
        )
        .expect("write toml");
        let json_path = dir.path().join("run.json");
        fs::write(&json_path, r#"{"max_filtering_retries": 7}"#).expect("write json");

        let from_toml = load_options(&toml_path).expect("load toml");
        assert_eq!(from_toml.seed, Some(5));
        assert_eq!(from_toml.filtering_behavior, FilteringBehavior::ThrowException);

        let from_json = load_options(&json_path).expect("load json");
        assert_eq!(from_json.max_filtering_retries, 7);
        assert!(!from_json.memory_optimized);
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.toml");
        fs::write(&path, "seed = 5\nmax_filtering_retries = 3\n").expect("write toml");

        let overrides = OptionOverrides {
            seed: Some(9),
            memory_optimized: true,
            ..OptionOverrides::default()
        };
        let options = resolve_options(Some(&path), &overrides).expect("resolve");
        assert_eq!(options.seed, Some(9));
        assert_eq!(options.max_filtering_retries, 3);
        assert!(options.memory_optimized);
    }

    #[test]
    fn unknown_keys_and_extensions_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let typo = dir.path().join("run.toml");
        fs::write(&typo, "seeds = 5\n").expect("write toml");
        assert!(matches!(load_options(&typo), Err(ConfigError::TomlDecode(_))));

        let yaml = dir.path().join("run.yaml");
        fs::write(&yaml, "seed: 5\n").expect("write yaml");
        assert!(matches!(
            load_options(&yaml),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
