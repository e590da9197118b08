use anyhow::{Context, Result, anyhow, bail};
use chunkup::{RetryConfig, UploadClient, UploadOptions};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_CHUNK_SIZE: &str = "5MiB";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PART_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    pub base_url: Option<Url>,
    pub chunk_size: Option<String>,
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub request_timeout: Option<String>,
    pub part_timeout: Option<String>,
    pub abort_on_failure: Option<bool>,
}

impl ConfigFile {
    /// Replaces the interactively prompted settings, keeping everything else
    /// already on disk.
    pub fn with_prompted(self, base_url: Url, chunk_size: String, concurrency: usize) -> Self {
        Self {
            base_url: Some(base_url),
            chunk_size: Some(chunk_size),
            concurrency: Some(concurrency),
            ..self
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    base_url: Option<Url>,
    chunk_size: Option<String>,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
    request_timeout: Option<String>,
    part_timeout: Option<String>,
    abort_on_failure: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSize {
    Auto,
    Bytes(u64),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub chunk_size: ChunkSize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub part_timeout: Duration,
    pub abort_on_failure: bool,
}

impl Config {
    pub fn client(&self) -> UploadClient {
        UploadClient::new(self.base_url.clone())
            .with_request_timeout(self.request_timeout)
            .with_part_timeout(self.part_timeout)
    }

    pub fn upload_options(&self, chunk_size: u64) -> UploadOptions {
        UploadOptions {
            chunk_size,
            concurrency: self.concurrency,
            retry: RetryConfig::new(self.max_retries),
            byte_progress: false,
            abort_on_failure: self.abort_on_failure,
        }
    }
}

/// Parses `auto`, a plain byte count, or a count with a binary unit
/// (`K`, `KiB`, `M`, `MiB`, `G`, `GiB`; `B` is optional).
pub fn parse_chunk_size(input: &str) -> Result<ChunkSize, String> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("auto") {
        return Ok(ChunkSize::Auto);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid chunk size '{}'", input))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{}'", other)),
    };

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("chunk size '{}' is too large", input))?;
    if bytes == 0 {
        return Err("chunk size must be greater than zero".to_string());
    }
    Ok(ChunkSize::Bytes(bytes))
}

fn parse_duration(name: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(value) => humantime::parse_duration(&value)
            .with_context(|| format!("Invalid {} '{}'", name, value)),
        None => Ok(default),
    }
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let base_url = match override_config.base_url.or(base.base_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_BASE_URL)?,
    };

    let chunk_size = override_config
        .chunk_size
        .or(base.chunk_size)
        .unwrap_or_else(|| DEFAULT_CHUNK_SIZE.to_string());
    let chunk_size = parse_chunk_size(&chunk_size).map_err(|e| anyhow!(e))?;

    let concurrency = override_config
        .concurrency
        .or(base.concurrency)
        .unwrap_or(1);
    if concurrency == 0 {
        bail!("concurrency must be at least 1");
    }

    let max_retries = override_config
        .max_retries
        .or(base.max_retries)
        .unwrap_or(RetryConfig::default().max_retries);

    let request_timeout = parse_duration(
        "request timeout",
        override_config.request_timeout.or(base.request_timeout),
        DEFAULT_REQUEST_TIMEOUT,
    )?;
    let part_timeout = parse_duration(
        "part timeout",
        override_config.part_timeout.or(base.part_timeout),
        DEFAULT_PART_TIMEOUT,
    )?;

    let abort_on_failure = override_config
        .abort_on_failure
        .or(base.abort_on_failure)
        .unwrap_or(false);

    Ok(Config {
        base_url,
        chunk_size,
        concurrency,
        max_retries,
        request_timeout,
        part_timeout,
        abort_on_failure,
    })
}

pub fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("dev", "chunkup", "chunkup")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed("CHUNKUP_")
        .from_env::<ConfigEnv>()
        .context("Invalid CHUNKUP_* environment variable")?;

    merge_config(read_config_file()?, env_config)
}

/// The settings stored on disk, or defaults when there is no file yet.
pub fn read_config_file() -> Result<ConfigFile> {
    let config_file = config_file_path()?;
    match fs::read_to_string(&config_file) {
        Ok(config) => toml::from_str(&config)
            .with_context(|| format!("Failed to parse {}", config_file.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

pub fn write_config(config: ConfigFile) -> Result<()> {
    let config_file = config_file_path()?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&config)?;
    fs::write(&config_file, content)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_nothing_configured() {
        let config = merge_config(ConfigFile::default(), ConfigEnv::default()).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.chunk_size, ChunkSize::Bytes(5 * 1024 * 1024));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.part_timeout, Duration::from_secs(300));
        assert!(!config.abort_on_failure);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            base_url: Some(Url::parse("https://files.example.com").unwrap()),
            chunk_size: Some("8MiB".into()),
            concurrency: Some(2),
            request_timeout: Some("10s".into()),
            ..Default::default()
        };
        let env = ConfigEnv {
            base_url: Some(Url::parse("http://127.0.0.1:8080").unwrap()),
            concurrency: Some(4),
            part_timeout: Some("2m".into()),
            ..Default::default()
        };

        let config = merge_config(file, env).unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.chunk_size, ChunkSize::Bytes(8 * 1024 * 1024));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.part_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_duration_is_reported() {
        let env = ConfigEnv {
            part_timeout: Some("soon".into()),
            ..Default::default()
        };
        assert!(merge_config(ConfigFile::default(), env).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let file = ConfigFile {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(merge_config(file, ConfigEnv::default()).is_err());
    }

    #[test]
    fn test_prompted_values_keep_other_settings() {
        let existing: ConfigFile = toml::from_str(
            r#"
            base_url = "https://old.example.com/"
            chunk_size = "8MiB"
            max_retries = 7
            part_timeout = "2m"
            abort_on_failure = true
            "#,
        )
        .unwrap();

        let updated = existing.with_prompted(
            Url::parse("https://files.example.com").unwrap(),
            "auto".into(),
            4,
        );

        assert_eq!(updated.base_url.unwrap().as_str(), "https://files.example.com/");
        assert_eq!(updated.chunk_size.as_deref(), Some("auto"));
        assert_eq!(updated.concurrency, Some(4));
        assert_eq!(updated.max_retries, Some(7));
        assert_eq!(updated.part_timeout.as_deref(), Some("2m"));
        assert_eq!(updated.abort_on_failure, Some(true));
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("auto"), Ok(ChunkSize::Auto));
        assert_eq!(parse_chunk_size("1024"), Ok(ChunkSize::Bytes(1024)));
        assert_eq!(parse_chunk_size("5MiB"), Ok(ChunkSize::Bytes(5 * 1024 * 1024)));
        assert_eq!(parse_chunk_size("64k"), Ok(ChunkSize::Bytes(64 * 1024)));
        assert_eq!(parse_chunk_size("1 G"), Ok(ChunkSize::Bytes(1024 * 1024 * 1024)));
        assert!(parse_chunk_size("0").is_err());
        assert!(parse_chunk_size("5XB").is_err());
        assert!(parse_chunk_size("MiB").is_err());
    }

    #[test]
    fn test_config_file_round_trips_through_toml() {
        let file: ConfigFile = toml::from_str(
            r#"
            base_url = "https://files.example.com/api/"
            chunk_size = "auto"
            max_retries = 5
            "#,
        )
        .unwrap();
        let config = merge_config(file, ConfigEnv::default()).unwrap();
        assert_eq!(config.chunk_size, ChunkSize::Auto);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_url.path(), "/api/");
    }
}
