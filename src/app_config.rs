//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use streamgrab_core::config::MAX_CONCURRENCY;

/// TOML-style `key = value` file configuration for CLI defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default destination directory.
    pub output_dir: Option<PathBuf>,
    /// Default quality (`720p`, `best`, ...).
    pub quality: Option<String>,
    /// Default segment worker cap.
    pub concurrency: Option<u8>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    /// Script runtime used for packed pages.
    pub node_path: Option<PathBuf>,
    /// Muxer executable.
    pub ffmpeg_path: Option<PathBuf>,
    /// Probe sibling playlist names on manifest failure.
    pub probe_playlists: Option<bool>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=MAX_CONCURRENCY).contains(&usize::from(concurrency))
        {
            bail!(
                "Invalid config value for `concurrency`: {concurrency}. Expected range: 1..={MAX_CONCURRENCY}"
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(quality) = &self.quality {
            streamgrab_core::parse_quality(quality)
                .with_context(|| format!("Invalid config value for `quality`: '{quality}'"))?;
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/streamgrab/config.toml`
/// 2. `$HOME/.config/streamgrab/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("streamgrab")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("streamgrab")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path; a missing file yields defaults.
pub fn load_default_file_config() -> Result<FileConfig> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

/// Loads and validates the config file at `path`.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_no, line) in raw.lines().enumerate().map(|(i, l)| (i + 1, l)) {
        let line = without_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=').map(|(k, v)| (k.trim(), v.trim())) else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        apply_entry(&mut cfg, key, value)
            .with_context(|| format!("Invalid `{key}` value on line {line_no}"))?;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn apply_entry(cfg: &mut FileConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "output_dir" => cfg.output_dir = Some(quoted(value)?.into()),
        "quality" => cfg.quality = Some(quoted(value)?),
        "concurrency" => cfg.concurrency = Some(integer(value)?),
        "connect_timeout_secs" => cfg.connect_timeout_secs = Some(integer(value)?),
        "read_timeout_secs" => cfg.read_timeout_secs = Some(integer(value)?),
        "node_path" => cfg.node_path = Some(quoted(value)?.into()),
        "ffmpeg_path" => cfg.ffmpeg_path = Some(quoted(value)?.into()),
        "probe_playlists" => cfg.probe_playlists = Some(boolean(value)?),
        unknown => bail!("Unknown configuration key: '{unknown}'"),
    }
    Ok(())
}

/// Cuts a trailing `# comment`, ignoring `#` inside double quotes.
fn without_comment(line: &str) -> &str {
    let mut in_string = false;
    line.char_indices()
        .find(|&(_, ch)| {
            if ch == '"' {
                in_string = !in_string;
            }
            ch == '#' && !in_string
        })
        .map_or(line, |(index, _)| &line[..index])
}

fn quoted(value: &str) -> Result<String> {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Expected double-quoted string"))
}

fn integer<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = ParseIntError>,
{
    value
        .parse::<T>()
        .with_context(|| format!("Expected an unsigned integer, got '{value}'"))
}

fn boolean(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
