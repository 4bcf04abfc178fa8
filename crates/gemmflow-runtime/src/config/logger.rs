use super::GlobalConfig;
use crate::config::{execution::ExecutionLogLevel, memory::MemoryLogLevel};
use core::fmt::Display;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

/// Configuration for logging in gemmflow, parameterized by a log level type.
///
/// Note that you can use multiple loggers at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    ///
    /// ## Notes
    ///
    /// This parameter might get ignored based on other loggers config.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional crate-level logging configuration (e.g., info, debug, trace).
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this logger, determining verbosity.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
///
/// This enum defines verbosity levels for crate-level logging.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Writes the log lines of each configuration section to the outputs it selected.
///
/// An output selected by both sections is opened once and receives the lines of both.
#[derive(Debug, Default)]
pub struct Logger {
    sinks: Vec<Sink>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Execution,
    Memory,
}

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    File(PathBuf),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

#[derive(Debug)]
struct Sink {
    target: Target,
    writer: Option<BufWriter<File>>,
    sections: Vec<Section>,
}

impl Logger {
    /// Creates a logger from a configuration.
    ///
    /// Opening log files is expensive, build loggers once.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let mut logger = Self::default();

        if config.execution.logger.level != ExecutionLogLevel::Disabled {
            logger.register(&config.execution.logger, Section::Execution);
        }
        if config.memory.logger.level != MemoryLogLevel::Disabled {
            logger.register(&config.memory.logger, Section::Memory);
        }

        logger
    }

    /// Logs a message to the outputs of the execution section.
    pub fn log_execution<S: Display>(&mut self, msg: &S) {
        self.write(Section::Execution, msg);
    }

    /// Logs a message to the outputs of the memory section.
    pub fn log_memory<S: Display>(&mut self, msg: &S) {
        self.write(Section::Memory, msg);
    }

    fn register<L: LogLevel>(&mut self, config: &LoggerConfig<L>, section: Section) {
        let targets = config
            .file
            .iter()
            .map(|file| Target::File(file.clone()))
            .chain(config.stdout.then_some(Target::Stdout))
            .chain(config.stderr.then_some(Target::Stderr))
            .chain(config.log.map(Target::Log));

        for target in targets {
            let sink = match self.sinks.iter().position(|sink| sink.target == target) {
                Some(index) => &mut self.sinks[index],
                None => match Sink::open(target, config.append) {
                    Some(sink) => {
                        self.sinks.push(sink);
                        let last = self.sinks.len() - 1;
                        &mut self.sinks[last]
                    }
                    None => continue,
                },
            };
            sink.sections.push(section);
        }
    }

    fn write<S: Display>(&mut self, section: Section, msg: &S) {
        for sink in self
            .sinks
            .iter_mut()
            .filter(|sink| sink.sections.contains(&section))
        {
            sink.write(msg);
        }
    }
}

impl Sink {
    // None when the log file can't be opened.
    fn open(target: Target, append: bool) -> Option<Self> {
        let writer = match &target {
            Target::File(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .create(true)
                    .open(path);

                match file {
                    Ok(file) => Some(BufWriter::new(file)),
                    Err(err) => {
                        log::warn!("Can't open log file {}: {err}", path.display());
                        return None;
                    }
                }
            }
            _ => None,
        };

        Some(Self {
            target,
            writer,
            sections: Vec::new(),
        })
    }

    fn write<S: Display>(&mut self, msg: &S) {
        match (&self.target, &mut self.writer) {
            (Target::File(_), Some(writer)) => {
                if let Err(err) = writeln!(writer, "{msg}").and_then(|_| writer.flush()) {
                    log::warn!("Can't write to the log file: {err}");
                }
            }
            (Target::Stdout, _) => println!("{msg}"),
            (Target::Stderr, _) => eprintln!("{msg}"),
            (Target::Log(LogCrateLevel::Info), _) => log::info!("{msg}"),
            (Target::Log(LogCrateLevel::Debug), _) => log::debug!("{msg}"),
            (Target::Log(LogCrateLevel::Trace), _) => log::trace!("{msg}"),
            (Target::File(_), None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_levels_register_nothing() {
        let mut config = GlobalConfig::default();
        config.memory.logger.stderr = true;

        let logger = Logger::from_config(Arc::new(config));

        assert!(logger.sinks.is_empty());
    }

    #[test]
    fn shared_outputs_are_registered_once() {
        let mut config = GlobalConfig::default();
        config.execution.logger.level = ExecutionLogLevel::Full;
        config.execution.logger.stderr = true;
        config.memory.logger.level = MemoryLogLevel::Full;
        config.memory.logger.stderr = true;
        config.memory.logger.log = Some(LogCrateLevel::Debug);

        let logger = Logger::from_config(Arc::new(config));

        assert_eq!(logger.sinks.len(), 2);
        assert_eq!(logger.sinks[0].target, Target::Stderr);
        assert_eq!(
            logger.sinks[0].sections,
            vec![Section::Execution, Section::Memory]
        );
        assert_eq!(logger.sinks[1].target, Target::Log(LogCrateLevel::Debug));
        assert_eq!(logger.sinks[1].sections, vec![Section::Memory]);
    }

    #[test]
    fn file_logger_writes_lines() {
        let path = std::env::temp_dir().join(format!("gemmflow-logger-{}.log", std::process::id()));
        let mut config = GlobalConfig::default();
        config.execution.logger.level = ExecutionLogLevel::Basic;
        config.execution.logger.file = Some(path.clone());
        config.execution.logger.append = false;

        let mut logger = Logger::from_config(Arc::new(config));
        logger.log_execution(&"first call");
        logger.log_memory(&"not routed");
        logger.log_execution(&"second call");

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(content, "first call\nsecond call\n");
    }
}
