use super::PresetArg;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub name: String,
    pub keys_file: Option<PathBuf>,
    pub simulate: Option<usize>,
    pub seed: Option<u64>,
    pub delimiter: Option<String>,
    pub pattern: Option<String>,
    pub preset: Option<PresetArg>,
    pub page_size: Option<usize>,
    pub scan_count: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
    profiles: HashMap<String, Profile>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            data,
            profiles,
        })
    }

    pub fn default_keys_file(&self) -> Option<&PathBuf> {
        self.data.source.keys_file.as_ref()
    }

    pub fn default_profile_name(&self) -> Option<&str> {
        self.data
            .default_profile
            .as_deref()
            .filter(|name| self.profiles.contains_key(*name))
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Profiles sorted by name.
    pub fn profiles(&self) -> Vec<&Profile> {
        let mut profiles: Vec<&Profile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    /// Profile named on the command line, else the default one.
    pub fn select(&self, requested: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        match requested {
            Some(name) => self
                .profile(name)
                .map(Some)
                .ok_or_else(|| ConfigError::ProfileNotFound {
                    name: name.to_string(),
                }),
            None => Ok(self.default_profile_name().and_then(|name| self.profile(name))),
        }
    }

    pub fn set_default_profile(&mut self, name: Option<&str>) -> Result<(), ConfigError> {
        if let Some(name) = name {
            if !self.profiles.contains_key(name) {
                return Err(ConfigError::ProfileNotFound {
                    name: name.to_string(),
                });
            }
            self.data.default_profile = Some(name.to_string());
        } else {
            self.data.default_profile = None;
        }
        Ok(())
    }

    pub fn upsert_profile(&mut self, name: &str, update: ProfileUpdate) -> Result<(), ConfigError> {
        let entry = self.data.profiles.entry(name.to_string()).or_default();
        if let Some(keys_file) = update.keys_file {
            entry.keys_file = Some(keys_file);
            entry.simulate = None;
        }
        if let Some(simulate) = update.simulate {
            entry.simulate = Some(simulate);
            entry.keys_file = None;
        }
        if let Some(seed) = update.seed {
            entry.seed = Some(seed);
        }
        if let Some(delimiter) = update.delimiter {
            entry.delimiter = Some(delimiter);
        }
        if let Some(pattern) = update.pattern {
            entry.pattern = Some(pattern);
        }
        if let Some(preset) = update.preset {
            entry.preset = Some(preset_to_string(preset));
        }
        if let Some(page_size) = update.page_size {
            entry.page_size = Some(page_size);
        }
        if let Some(scan_count) = update.scan_count {
            entry.scan_count = Some(scan_count);
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }

    pub fn persist(&self) -> Result<PathBuf, ConfigError> {
        let target = if let Some(path) = &self.path {
            path.clone()
        } else if let Some(default) = default_config_path() {
            default
        } else {
            return Err(ConfigError::NoConfigPath);
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&self.data)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.data.profiles.remove(name).is_none() {
            return Err(ConfigError::ProfileNotFound {
                name: name.to_string(),
            });
        }
        if self.data.default_profile.as_deref() == Some(name) {
            self.data.default_profile = None;
        }
        self.profiles = parse_profiles(&self.data)?;
        Ok(())
    }
}

fn preset_to_string(value: PresetArg) -> String {
    match value {
        PresetArg::Default => "default",
        PresetArg::Interactive => "interactive",
        PresetArg::Large => "large",
    }
    .to_string()
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<HashMap<String, Profile>, ConfigError> {
    let mut profiles = HashMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let preset = match raw.preset.as_deref() {
        Some(value) => Some(PresetArg::from_str(value, true).map_err(|_| {
            ConfigError::InvalidPreset {
                profile: name.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };
    if raw.delimiter.as_deref() == Some("") {
        return Err(ConfigError::EmptyDelimiter {
            profile: name.to_string(),
        });
    }
    Ok(Profile {
        name: name.to_string(),
        keys_file: raw.keys_file.clone(),
        simulate: raw.simulate,
        seed: raw.seed,
        delimiter: raw.delimiter.clone(),
        pattern: raw.pattern.clone(),
        preset,
        page_size: raw.page_size,
        scan_count: raw.scan_count,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    profiles: HashMap<String, RawProfile>,
    #[serde(default)]
    default_profile: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct SourceSection {
    keys_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawProfile {
    keys_file: Option<PathBuf>,
    simulate: Option<usize>,
    seed: Option<u64>,
    delimiter: Option<String>,
    pattern: Option<String>,
    preset: Option<String>,
    page_size: Option<usize>,
    scan_count: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub keys_file: Option<PathBuf>,
    pub simulate: Option<usize>,
    pub seed: Option<u64>,
    pub delimiter: Option<String>,
    pub pattern: Option<String>,
    pub preset: Option<PresetArg>,
    pub page_size: Option<usize>,
    pub scan_count: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize CLI config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write CLI config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' preset '{value}' is invalid")]
    InvalidPreset { profile: String, value: String },
    #[error("profile '{profile}' has an empty delimiter")]
    EmptyDelimiter { profile: String },
    #[error("no config directory found; pass --config or set KEYSCOPE_CONFIG")]
    NoConfigPath,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("keyscope").join("config.toml"))
}
