use super::{execution::ExecutionConfig, memory::MemoryConfig};
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static GEMMFLOW_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Represents the global configuration for gemmflow, combining execution and memory settings.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration of the matmul call path.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Configuration of the scratch memory.
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `gemmflow.toml` or `GemmFlow.toml`
    /// in the current directory or its parents. If no file is found, a default configuration is
    /// used. Environment variables are applied on top.
    ///
    /// # Notes
    ///
    /// Calling this function takes a global lock, read the values once during initialization
    /// instead of on every call.
    pub fn get() -> Arc<Self> {
        let mut state = GEMMFLOW_GLOBAL_CONFIG.lock();

        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                cfg_if::cfg_if! {
                    if #[cfg(any(target_os = "windows", target_os = "linux", target_os = "macos"))] {
                        let config = Self::from_current_dir().override_from_env();
                    } else {
                        let config = Self::default().override_from_env();
                    }
                }

                let config = Arc::new(config);
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    ///
    /// # Warning
    /// This method must be called at the start of the program, before any calls to `get`.
    pub fn set(config: Self) {
        let mut state = GEMMFLOW_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = config
            .to_toml()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        std::fs::write(path, content)
    }

    /// Parses a configuration from its toml representation.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serializes the configuration as pretty toml.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(self) -> Self {
        self.override_from(|key| std::env::var(key).ok())
    }

    fn override_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        use super::{
            execution::{ExecutionLogLevel, ScaleSyncMode},
            memory::MemoryLogLevel,
        };

        if let Some(val) = var("GEMMFLOW_DEBUG_LOG") {
            self.execution.logger.level = ExecutionLogLevel::Full;
            self.memory.logger.level = MemoryLogLevel::Full;

            match val.as_str() {
                "stdout" => {
                    self.execution.logger.stdout = true;
                    self.memory.logger.stdout = true;
                }
                "stderr" => {
                    self.execution.logger.stderr = true;
                    self.memory.logger.stderr = true;
                }
                "1" | "true" => {
                    let file_path = "/tmp/gemmflow.log";
                    self.execution.logger.file = Some(file_path.into());
                    self.memory.logger.file = Some(file_path.into());
                }
                "0" | "false" => {
                    self.execution.logger.level = ExecutionLogLevel::Disabled;
                    self.memory.logger.level = MemoryLogLevel::Disabled;
                }
                file_path => {
                    self.execution.logger.file = Some(file_path.into());
                    self.memory.logger.file = Some(file_path.into());
                }
            }
        };

        if let Some(val) = var("GEMMFLOW_SCALE_SYNC") {
            match val.as_str() {
                "full" | "barrier" => self.execution.scale_sync = ScaleSyncMode::FullBarrier,
                "scoped" => self.execution.scale_sync = ScaleSyncMode::Scoped,
                other => log::warn!("Unknown GEMMFLOW_SCALE_SYNC value {other:?}, ignored"),
            }
        }

        if let Some(val) = var("GEMMFLOW_SCRATCH_POOL") {
            match val.parse::<u64>() {
                Ok(bytes) => self.memory.scratch.max_cached_bytes = bytes,
                Err(_) => log::warn!("Invalid GEMMFLOW_SCRATCH_POOL value {val:?}, ignored"),
            }
        }

        self
    }

    // Loads configuration from `gemmflow.toml` or `GemmFlow.toml` in the current directory or its
    // parents.
    //
    // Traverses up the directory tree until a valid configuration file is found or the root is
    // reached. Returns a default configuration if no file is found.
    #[allow(dead_code)]
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            if let Some(content) = Self::from_file_path(dir.join("gemmflow.toml")) {
                return content;
            }

            if let Some(content) = Self::from_file_path(dir.join("GemmFlow.toml")) {
                return content;
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    // Loads configuration from a specified file path.
    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> Option<Self> {
        let content = std::fs::read_to_string(&path).ok()?;

        match Self::from_toml(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                log::warn!(
                    "Invalid gemmflow configuration {}: {err}",
                    path.as_ref().display()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        execution::{ExecutionLogLevel, ScaleSyncMode},
        memory::MemoryLogLevel,
    };
    use pretty_assertions::assert_eq;

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = GlobalConfig::from_toml("").unwrap();

        assert_eq!(config.execution.scale_sync, ScaleSyncMode::FullBarrier);
        assert_eq!(config.memory.scratch.alignment, 256);
        assert_eq!(config.execution.logger.level, ExecutionLogLevel::Disabled);
    }

    #[test]
    fn parses_sections() {
        let config = GlobalConfig::from_toml(
            r#"
            [execution]
            scale_sync = "scoped"

            [execution.logger]
            level = "basic"
            stdout = true

            [memory.scratch]
            max_cached_bytes = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.scale_sync, ScaleSyncMode::Scoped);
        assert_eq!(config.execution.logger.level, ExecutionLogLevel::Basic);
        assert!(config.execution.logger.stdout);
        assert_eq!(config.memory.scratch.max_cached_bytes, 1024);
        assert_eq!(config.memory.scratch.alignment, 256);
    }

    #[test]
    fn toml_round_trip_keeps_values() {
        let mut config = GlobalConfig::default();
        config.execution.scale_sync = ScaleSyncMode::Scoped;

        let parsed = GlobalConfig::from_toml(&config.to_toml().unwrap()).unwrap();

        assert_eq!(parsed.execution.scale_sync, ScaleSyncMode::Scoped);
    }

    #[test]
    fn debug_log_to_stderr() {
        let config = GlobalConfig::default().override_from(env(&[("GEMMFLOW_DEBUG_LOG", "stderr")]));

        assert_eq!(config.execution.logger.level, ExecutionLogLevel::Full);
        assert_eq!(config.memory.logger.level, MemoryLogLevel::Full);
        assert!(config.execution.logger.stderr);
        assert!(!config.execution.logger.stdout);
    }

    #[test]
    fn debug_log_disabled() {
        let config = GlobalConfig::default().override_from(env(&[("GEMMFLOW_DEBUG_LOG", "0")]));

        assert_eq!(config.execution.logger.level, ExecutionLogLevel::Disabled);
        assert_eq!(config.memory.logger.level, MemoryLogLevel::Disabled);
    }

    #[test]
    fn scale_sync_and_pool_overrides() {
        let config = GlobalConfig::default().override_from(env(&[
            ("GEMMFLOW_SCALE_SYNC", "scoped"),
            ("GEMMFLOW_SCRATCH_POOL", "4096"),
        ]));

        assert_eq!(config.execution.scale_sync, ScaleSyncMode::Scoped);
        assert_eq!(config.memory.scratch.max_cached_bytes, 4096);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let config = GlobalConfig::default().override_from(env(&[
            ("GEMMFLOW_SCALE_SYNC", "sometimes"),
            ("GEMMFLOW_SCRATCH_POOL", "lots"),
        ]));

        assert_eq!(config.execution.scale_sync, ScaleSyncMode::FullBarrier);
        assert_eq!(
            config.memory.scratch.max_cached_bytes,
            GlobalConfig::default().memory.scratch.max_cached_bytes
        );
    }

    #[test]
    #[serial_test::serial]
    fn process_environment_overrides() {
        // SAFETY: serialized with every other test touching the process environment.
        unsafe { std::env::set_var("GEMMFLOW_SCALE_SYNC", "scoped") };
        let config = GlobalConfig::default().override_from_env();
        unsafe { std::env::remove_var("GEMMFLOW_SCALE_SYNC") };

        assert_eq!(config.execution.scale_sync, ScaleSyncMode::Scoped);
    }
}
