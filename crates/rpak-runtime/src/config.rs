//! Runtime configuration and file name resolution.

use std::path::{Path, PathBuf};

use rpak_codec::DecoderConfig;
use rpak_format::FormatLimits;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime settings, loadable from TOML.
///
/// ```
/// use rpak_runtime::PakConfig;
///
/// let config = PakConfig::from_toml_str(r#"
///     base_dir = "/games/title"
///     max_outstanding_jobs = 32
/// "#).unwrap();
/// assert_eq!(config.max_outstanding_jobs, 32);
/// assert_eq!(config.platform_subdir, "paks/Win64");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PakConfig {
    /// Root that container and streaming names are resolved against.
    pub base_dir: PathBuf,
    pub platform_subdir: String,
    /// Consulted before the platform directory. Empty disables it.
    pub override_subdir: String,
    pub read_chunk_size: usize,
    pub max_reads_in_flight: usize,
    pub input_window: usize,
    pub output_window: usize,
    pub window_margin: usize,
    pub max_loaded_paks: usize,
    pub registry_capacity: usize,
    pub max_segments: u16,
    pub max_outstanding_jobs: usize,
    /// Worker threads for the threaded file service.
    pub io_threads: usize,
    pub disable_optional_streaming: bool,
}

impl Default for PakConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            platform_subdir: "paks/Win64".to_string(),
            override_subdir: "paks/Win32".to_string(),
            read_chunk_size: 512 << 10,
            max_reads_in_flight: 4,
            input_window: 4 << 20,
            output_window: 4 << 20,
            window_margin: 64,
            max_loaded_paks: 512,
            registry_capacity: 0x40000,
            max_segments: 20,
            max_outstanding_jobs: 200,
            io_threads: 2,
            disable_optional_streaming: false,
        }
    }
}

impl PakConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let powers = [
            ("input_window", self.input_window),
            ("output_window", self.output_window),
            ("registry_capacity", self.registry_capacity),
        ];
        for (name, value) in powers {
            if !value.is_power_of_two() {
                return Err(ConfigError::Invalid(format!("{name} = {value} is not a power of two")));
            }
        }

        let positive = [
            ("read_chunk_size", self.read_chunk_size),
            ("max_reads_in_flight", self.max_reads_in_flight),
            ("max_loaded_paks", self.max_loaded_paks),
            ("max_outstanding_jobs", self.max_outstanding_jobs),
            ("io_threads", self.io_threads),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        if self.max_loaded_paks > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_loaded_paks = {} does not fit a 16-bit slot",
                self.max_loaded_paks
            )));
        }
        Ok(())
    }

    pub fn limits(&self) -> FormatLimits {
        FormatLimits {
            max_segments: self.max_segments,
            max_assets: self.registry_capacity.min(u32::MAX as usize) as u32,
        }
    }

    pub fn decoder(&self) -> DecoderConfig {
        DecoderConfig {
            input_window: self.input_window,
            output_window: self.output_window,
            margin: self.window_margin,
        }
    }

    pub fn paths(&self) -> PakPaths {
        PakPaths::new(self)
    }
}

/// Resolves container, patch and streaming file names to paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakPaths {
    base: PathBuf,
    platform: PathBuf,
    override_dir: Option<PathBuf>,
}

impl PakPaths {
    pub fn new(config: &PakConfig) -> Self {
        let override_dir = (!config.override_subdir.is_empty()).then(|| config.base_dir.join(&config.override_subdir));
        Self {
            base: config.base_dir.clone(),
            platform: config.base_dir.join(&config.platform_subdir),
            override_dir,
        }
    }

    pub fn platform_dir(&self) -> &Path {
        &self.platform
    }

    pub fn override_dir(&self) -> Option<&Path> {
        self.override_dir.as_deref()
    }

    /// Paths to try for `name`, in order.
    ///
    /// The override directory is tried first with the unqualified file name.
    /// Bare names then resolve in the platform directory, names with a
    /// directory part relative to the base directory, and absolute paths as
    /// given.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let normalized = name.replace('\\', "/");
        let file = unqualified(&normalized);

        let mut paths = Vec::with_capacity(2);
        if let Some(dir) = &self.override_dir {
            paths.push(dir.join(file));
        }

        let path = Path::new(&normalized);
        if path.is_absolute() {
            paths.push(path.to_path_buf());
        } else if normalized.contains('/') {
            paths.push(self.base.join(path));
        } else {
            paths.push(self.platform.join(file));
        }
        paths
    }

    /// Where a container's embedded streaming data is read from.
    pub fn embedded_streaming_path(&self, container: &str) -> PathBuf {
        self.platform.join(unqualified(&container.replace('\\', "/")))
    }
}

/// The file name part of a path written with either separator.
pub fn unqualified(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Name of chain file `number` of a patch container: `stem(nn).ext`.
pub fn chain_file_name(container: &str, number: u16) -> String {
    let (dir, file) = match container.rfind(['/', '\\']) {
        Some(split) => container.split_at(split + 1),
        None => ("", container),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{}({number:02}){}", &file[..dot], &file[dot..]),
        _ => format!("{dir}{file}({number:02})"),
    }
}
