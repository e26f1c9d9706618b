//! Processor configuration.
//!
//! Configuration is layered with `figment`: built-in defaults, then
//! `dna-processor.toml`, then `dna-processor.yaml`, then `DNA_`-prefixed
//! environment variables (`__` separates nested keys, e.g.
//! `DNA_STORAGE__BASE_PATH=/mnt/ssd`). Everything is validated once at load
//! time and treated as immutable afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::thermal::{CPU_SYSFS_ROOT, DEFAULT_SENSOR_PATH, DEFAULT_THRESHOLD_C};
use crate::error::{ProcessorError, Result};

/// Serde helper for Duration serialization/deserialization as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helper for Duration serialization/deserialization as microseconds
mod duration_us {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_micros() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

/// Default TOML configuration file name.
pub const TOML_FILE: &str = "dna-processor.toml";

/// Default YAML configuration file name.
pub const YAML_FILE: &str = "dna-processor.yaml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DNA_";

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// How a channel's device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Serial line configured through the OS serial API.
    #[default]
    Serial,
    /// Plain file, FIFO or pre-configured character device read as a byte stream.
    File,
}

fn default_baud_rate() -> u32 { 115_200 }
fn default_data_bits() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }

/// One input channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Device path or identifier, unique across channels.
    pub device: String,

    #[serde(default)]
    pub kind: ChannelKind,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Core index the channel's Ingest worker is pinned to.
    #[serde(default)]
    pub core_affinity: Option<usize>,
}

impl ChannelConfig {
    /// Serial channel with default line settings.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind: ChannelKind::Serial,
            baud_rate: default_baud_rate(),
            parity: Parity::None,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            core_affinity: None,
        }
    }
}

/// Storage layout and write-behind cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of all stored files.
    pub base_path: PathBuf,

    /// Keep the container text as received.
    pub store_original: bool,

    /// Keep the unpacked nucleotide text.
    pub store_decoded: bool,

    /// Keep the packed payload without a header.
    pub store_raw: bool,

    /// Flush once this many bytes are cached.
    pub write_cache_size: usize,

    /// Buffer size of each file write.
    pub optimal_block_size: usize,

    /// Append a JSON line per sequence to the index file.
    pub enable_indexing: bool,

    /// Flush at least this often.
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/data/dna"),
            store_original: true,
            store_decoded: true,
            store_raw: false,
            write_cache_size: 128 * 1024 * 1024,
            optimal_block_size: 256 * 1024,
            enable_indexing: true,
            flush_interval: crate::constants::timeouts::FLUSH_INTERVAL,
        }
    }
}

/// Thermal governor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Throttled above this temperature.
    pub threshold_celsius: f32,

    #[serde(with = "duration_ms")]
    pub sample_interval: Duration,

    /// Thermal zone node reporting millidegrees.
    pub sensor_path: PathBuf,

    /// Directory holding `cpuN/cpufreq/scaling_governor`.
    pub cpu_sysfs_root: PathBuf,

    /// Slow down Parse, Encode and Store while throttled.
    pub throttle_stages: bool,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            threshold_celsius: DEFAULT_THRESHOLD_C,
            sample_interval: Duration::from_secs(1),
            sensor_path: PathBuf::from(DEFAULT_SENSOR_PATH),
            cpu_sysfs_root: PathBuf::from(CPU_SYSFS_ROOT),
            throttle_stages: false,
        }
    }
}

/// Queue and worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Slots per queue; a power of two.
    pub queue_capacity: usize,

    /// Parallel lanes. Each lane runs one parse, one encode and one store
    /// worker; channel `c` is served by lane `c % lanes`.
    pub lanes: usize,

    /// Sleep of an idle worker after its spin budget.
    #[serde(with = "duration_us")]
    pub idle_wait: Duration,

    /// Attempts to push into a full downstream queue before dropping.
    pub output_retry_attempts: u32,

    /// Pause after a failed channel read.
    #[serde(with = "duration_ms")]
    pub read_retry_delay: Duration,

    /// Add a SHA-256 digest to each sequence's metadata.
    pub compute_digest: bool,

    /// Pin workers to cores.
    pub enable_affinity: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            lanes: 1,
            idle_wait: Duration::from_micros(100),
            output_retry_attempts: 8,
            read_retry_delay: Duration::from_millis(10),
            compute_digest: false,
            enable_affinity: true,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete processor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Bytes of frame buffers kept pooled.
    pub memory_pool_size: usize,

    /// Switch the CPU governor to `performance` while running.
    pub enable_performance_mode: bool,

    pub enable_thermal_monitoring: bool,

    /// Address of the Prometheus endpoint, e.g. `0.0.0.0:9100`.
    pub metrics_listen: Option<String>,

    /// Period of the statistics report in the binary.
    pub stats_interval_secs: u64,

    // Tables last so TOML export stays well-formed
    pub channels: Vec<ChannelConfig>,
    pub storage: StorageConfig,
    pub thermal: ThermalConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            memory_pool_size: 32 * 1024 * 1024,
            enable_performance_mode: true,
            enable_thermal_monitoring: true,
            metrics_listen: None,
            stats_interval_secs: 5,
            channels: vec![ChannelConfig::new("/dev/ttyUSB0")],
            storage: StorageConfig::default(),
            thermal: ThermalConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. `DNA_*` environment variables (highest priority)
    /// 2. dna-processor.yaml (if exists)
    /// 3. dna-processor.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::extract(
            Self::default_figment()
                .merge(Toml::file(TOML_FILE))
                .merge(Yaml::file(YAML_FILE)),
        )
    }

    /// Load defaults, then `path` (TOML or YAML by extension), then environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ProcessorError::Configuration(format!(
                "configuration file {} not found",
                path.display()
            )));
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::default_figment().merge(Yaml::file(path)),
            _ => Self::default_figment().merge(Toml::file(path)),
        };
        debug!("Loading configuration from {}", path.display());
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: ProcessorConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ProcessorError::Configuration(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Generate default configuration values
    fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(ProcessorConfig::default()))
    }

    /// Check every constraint the processor relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ProcessorError::Configuration(msg));

        if self.channels.is_empty() {
            return invalid("at least one channel must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.device.trim().is_empty() {
                return invalid("channel device cannot be empty".to_string());
            }
            if !seen.insert(channel.device.as_str()) {
                return invalid(format!("channel '{}' configured twice", channel.device));
            }
            if channel.baud_rate == 0 {
                return invalid(format!("channel '{}': baud rate must be positive", channel.device));
            }
            if !(5..=8).contains(&channel.data_bits) {
                return invalid(format!(
                    "channel '{}': data bits must be 5-8, got {}",
                    channel.device, channel.data_bits
                ));
            }
            if !(1..=2).contains(&channel.stop_bits) {
                return invalid(format!(
                    "channel '{}': stop bits must be 1 or 2, got {}",
                    channel.device, channel.stop_bits
                ));
            }
        }

        let pipeline = &self.pipeline;
        if pipeline.queue_capacity < 2 || !pipeline.queue_capacity.is_power_of_two() {
            return invalid(format!(
                "queue capacity must be a power of two >= 2, got {}",
                pipeline.queue_capacity
            ));
        }
        if pipeline.lanes == 0 {
            return invalid("the pipeline needs at least one lane".to_string());
        }

        let storage = &self.storage;
        if storage.base_path.as_os_str().is_empty() {
            return invalid("storage base path cannot be empty".to_string());
        }
        if storage.write_cache_size == 0 {
            return invalid("write cache size must be positive".to_string());
        }
        if storage.optimal_block_size == 0 {
            return invalid("optimal block size must be positive".to_string());
        }
        if storage.flush_interval.is_zero() {
            return invalid("flush interval must be positive".to_string());
        }

        if !self.thermal.threshold_celsius.is_finite() {
            return invalid("thermal threshold must be a finite number".to_string());
        }
        if self.thermal.sample_interval.is_zero() {
            return invalid("thermal sample interval must be positive".to_string());
        }

        if let Some(addr) = &self.metrics_listen {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return invalid(format!("metrics_listen '{}' is not a socket address", addr));
            }
        }

        Ok(())
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ProcessorError::Configuration(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| ProcessorError::Configuration(format!("Failed to serialize to YAML: {}", e)))
    }
}
