use super::logger::{LogLevel, LoggerConfig};

/// Configuration of the scratch memory.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MemoryConfig {
    /// Logger configuration for scratch allocations, using binary log levels.
    #[serde(default)]
    pub logger: LoggerConfig<MemoryLogLevel>,

    /// Scratch pool settings.
    #[serde(default)]
    pub scratch: ScratchPoolConfig,
}

/// Settings of the pool serving transient scratch buffers.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScratchPoolConfig {
    /// Released buffers are kept for reuse until their total size reaches this amount.
    #[serde(default = "default_max_cached_bytes")]
    pub max_cached_bytes: u64,

    /// Every scratch buffer capacity is a multiple of this value.
    #[serde(default = "default_alignment")]
    pub alignment: u64,
}

impl Default for ScratchPoolConfig {
    fn default() -> Self {
        Self {
            max_cached_bytes: default_max_cached_bytes(),
            alignment: default_alignment(),
        }
    }
}

fn default_max_cached_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_alignment() -> u64 {
    256
}

/// Log levels for scratch memory.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MemoryLogLevel {
    /// Memory logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Every reservation and release is logged.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for MemoryLogLevel {}
