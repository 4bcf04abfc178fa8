use crate::config::{
    GlobalConfig, Logger, execution::ExecutionLogLevel, memory::MemoryLogLevel,
};
use core::fmt::Display;
use std::sync::Arc;

/// Logger shared by the components of a call path.
///
/// Holds nothing when every category is disabled, so checking the level is free.
#[derive(Debug, Default)]
pub struct RuntimeLogger {
    kind: RuntimeLoggerKind,
}

#[derive(Debug)]
enum RuntimeLoggerKind {
    Activated(Logger, ExecutionLogLevel, MemoryLogLevel),
    None,
}

impl Default for RuntimeLoggerKind {
    fn default() -> Self {
        Self::new(GlobalConfig::get())
    }
}

impl RuntimeLogger {
    /// Creates a logger from an explicit configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        Self {
            kind: RuntimeLoggerKind::new(config),
        }
    }

    /// The execution level, none when execution logging is disabled.
    pub fn execution_level(&self) -> Option<ExecutionLogLevel> {
        match &self.kind {
            RuntimeLoggerKind::Activated(_, ExecutionLogLevel::Disabled, _) => None,
            RuntimeLoggerKind::Activated(_, level, _) => Some(*level),
            RuntimeLoggerKind::None => None,
        }
    }

    /// Whether scratch allocations are logged.
    pub fn memory_activated(&self) -> bool {
        matches!(
            &self.kind,
            RuntimeLoggerKind::Activated(_, _, MemoryLogLevel::Full)
        )
    }

    /// Logs a message emitted once per call.
    pub fn log_call<I: Display>(&mut self, arg: I) {
        if let RuntimeLoggerKind::Activated(logger, level, _) = &mut self.kind {
            match level {
                ExecutionLogLevel::Basic | ExecutionLogLevel::Full => logger.log_execution(&arg),
                ExecutionLogLevel::Disabled => {}
            }
        }
    }

    /// Logs a message describing a step inside a call.
    pub fn log_step<I: Display>(&mut self, arg: I) {
        if let RuntimeLoggerKind::Activated(logger, ExecutionLogLevel::Full, _) = &mut self.kind {
            logger.log_execution(&arg);
        }
    }

    /// Logs a scratch memory event.
    pub fn log_memory<I: Display>(&mut self, arg: I) {
        if let RuntimeLoggerKind::Activated(logger, _, MemoryLogLevel::Full) = &mut self.kind {
            logger.log_memory(&arg);
        }
    }
}

impl RuntimeLoggerKind {
    fn new(config: Arc<GlobalConfig>) -> Self {
        let execution = config.execution.logger.level;
        let memory = config.memory.logger.level;

        if let (ExecutionLogLevel::Disabled, MemoryLogLevel::Disabled) = (execution, memory) {
            return Self::None;
        }

        Self::Activated(Logger::from_config(config), execution, memory)
    }
}
