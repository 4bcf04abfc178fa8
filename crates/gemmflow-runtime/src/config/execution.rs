use super::logger::{LogLevel, LoggerConfig};

/// Configuration of the matmul call path.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExecutionConfig {
    /// Logger configuration for calls, using execution log levels.
    #[serde(default)]
    pub logger: LoggerConfig<ExecutionLogLevel>,

    /// How the host waits for a runtime output scale before dispatching.
    #[serde(default)]
    pub scale_sync: ScaleSyncMode,
}

/// How the host waits on the device-to-host copy of a runtime output scale.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScaleSyncMode {
    /// Drain the whole queue after enqueueing the copy.
    ///
    /// Also waits on unrelated work submitted to the same queue.
    #[default]
    #[serde(rename = "full")]
    FullBarrier,

    /// Only wait on the copy's own dependency.
    #[serde(rename = "scoped")]
    Scoped,
}

/// Log levels for the matmul call path.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionLogLevel {
    /// Execution logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// One line per call.
    #[serde(rename = "basic")]
    Basic,

    /// Every state transition and every enqueued task.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for ExecutionLogLevel {}
