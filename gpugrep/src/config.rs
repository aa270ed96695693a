use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Match-semantics selectors recognized by every engine.
///
/// These mirror the grep selectors: `-i -w -v -F -E -P`. All other behavior
/// (output shape, context lines) lives in the CLI layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// ASCII case folding (A-Z / a-z only).
    #[serde(default)]
    pub case_insensitive: bool,

    /// Accept matches only where neither adjacent byte is `[A-Za-z0-9_]`.
    #[serde(default)]
    pub word_boundary: bool,

    /// Select lines that do *not* contain a match.
    #[serde(default)]
    pub invert_match: bool,

    /// Treat the pattern as literal bytes, never as a regex.
    #[serde(default)]
    pub fixed_string: bool,

    /// ERE syntax; otherwise BRE (metacharacters need backslash escapes).
    #[serde(default)]
    pub extended: bool,

    /// Delegate to the Perl-compatible adapter.
    #[serde(default)]
    pub perl: bool,
}

/// Which execution engine the caller wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendOverride {
    /// Let the dispatcher score the workload.
    #[default]
    Auto,
    Cpu,
    /// Platform-default GPU (Metal on macOS, Vulkan elsewhere).
    Gpu,
    Metal,
    Vulkan,
}

impl FromStr for BackendOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendOverride::Auto),
            "cpu" => Ok(BackendOverride::Cpu),
            "gpu" => Ok(BackendOverride::Gpu),
            "metal" => Ok(BackendOverride::Metal),
            "vulkan" => Ok(BackendOverride::Vulkan),
            other => Err(format!(
                "unknown backend '{other}' (expected auto|cpu|gpu|metal|vulkan)"
            )),
        }
    }
}

fn default_short_pattern_len() -> u32 {
    4
}

fn default_long_pattern_len() -> u32 {
    8
}

fn default_min_gpu_size() -> u64 {
    512 * 1024
}

fn default_max_gpu_size() -> u64 {
    1024 * 1024 * 1024
}

/// Tunables for the backend dispatcher.
///
/// Values can come from a config file (`~/.config/gpugrep/config.yaml` or a
/// local `.gpugrep.yaml`), with CLI flags taking precedence. The hardware
/// probe may adjust `gpu_bias` and the size window once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTuning {
    /// User bias added to the workload score, clamped to [-8, 8].
    #[serde(default)]
    pub gpu_bias: i32,

    /// Patterns at or below this length score as "short" (GPU-friendly).
    #[serde(default = "default_short_pattern_len")]
    pub short_pattern_len: u32,

    /// Patterns at or above this length score as "long".
    #[serde(default = "default_long_pattern_len")]
    pub long_pattern_len: u32,

    /// Buffers below this size always run on the CPU.
    #[serde(default = "default_min_gpu_size")]
    pub min_gpu_size: u64,

    /// Buffers above this size always run on the CPU (device buffer limit).
    #[serde(default = "default_max_gpu_size")]
    pub max_gpu_size: u64,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        Self {
            gpu_bias: 0,
            short_pattern_len: default_short_pattern_len(),
            long_pattern_len: default_long_pattern_len(),
            min_gpu_size: default_min_gpu_size(),
            max_gpu_size: default_max_gpu_size(),
        }
    }
}

impl DispatchTuning {
    /// Loads tuning from the default config locations.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads tuning from a specific file, falling back to the defaults for
    /// anything the file does not set.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("gpugrep/config.yaml")),
            Some(PathBuf::from(".gpugrep.yaml")),
            config_path.map(PathBuf::from),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Merges CLI-provided values over config-file values. `None` means the
    /// flag was not given on the command line.
    pub fn merge_with_cli(
        mut self,
        gpu_bias: Option<i32>,
        short_pattern_len: Option<u32>,
        long_pattern_len: Option<u32>,
        min_gpu_size: Option<u64>,
        max_gpu_size: Option<u64>,
    ) -> Self {
        if let Some(bias) = gpu_bias {
            self.gpu_bias = bias;
        }
        if let Some(len) = short_pattern_len {
            self.short_pattern_len = len;
        }
        if let Some(len) = long_pattern_len {
            self.long_pattern_len = len;
        }
        if let Some(size) = min_gpu_size {
            self.min_gpu_size = size;
        }
        if let Some(size) = max_gpu_size {
            self.max_gpu_size = size;
        }
        self.gpu_bias = self.gpu_bias.clamp(-8, 8);
        self
    }
}

/// Parses human-readable sizes like `64K`, `4M`, `1G`.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size".to_string());
    }
    let (digits, multiplier) = match s.as_bytes()[s.len() - 1].to_ascii_uppercase() {
        b'K' => (&s[..s.len() - 1], 1024u64),
        b'M' => (&s[..s.len() - 1], 1024 * 1024),
        b'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .map(|n| n.saturating_mul(multiplier))
        .map_err(|_| format!("invalid size '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_backend_override_parse() {
        assert_eq!("auto".parse(), Ok(BackendOverride::Auto));
        assert_eq!("METAL".parse(), Ok(BackendOverride::Metal));
        assert_eq!("vulkan".parse(), Ok(BackendOverride::Vulkan));
        assert!("cuda".parse::<BackendOverride>().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64K"), Ok(64 * 1024));
        assert_eq!(parse_size("4M"), Ok(4 * 1024 * 1024));
        assert_eq!(parse_size("2g"), Ok(2 * 1024 * 1024 * 1024));
        assert!(parse_size("").is_err());
        assert!(parse_size("12Q").is_err());
    }

    #[test]
    fn test_load_tuning_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let mut file = File::create(&config_path).unwrap();
        file.write_all(
            b"gpu_bias: 3\nshort_pattern_len: 5\nmin_gpu_size: 1024\n",
        )
        .unwrap();

        let tuning = DispatchTuning::load_from(Some(&config_path)).unwrap();
        assert_eq!(tuning.gpu_bias, 3);
        assert_eq!(tuning.short_pattern_len, 5);
        assert_eq!(tuning.min_gpu_size, 1024);
        // untouched fields keep their defaults
        assert_eq!(tuning.long_pattern_len, 8);
        assert_eq!(tuning.max_gpu_size, default_max_gpu_size());
    }

    #[test]
    fn test_merge_with_cli_clamps_bias() {
        let tuning = DispatchTuning::default().merge_with_cli(
            Some(100),
            None,
            Some(16),
            None,
            Some(1 << 20),
        );
        assert_eq!(tuning.gpu_bias, 8);
        assert_eq!(tuning.long_pattern_len, 16);
        assert_eq!(tuning.max_gpu_size, 1 << 20);
        assert_eq!(tuning.short_pattern_len, 4); // config value retained
    }
}
