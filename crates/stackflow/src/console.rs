use colored::Colorize;
use stackflow_cloud::{HostLogger, LogLevel};

/// Host logger printing plugin records to stderr
#[derive(Debug, Default)]
pub struct ConsoleLogger;

impl HostLogger for ConsoleLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let label = match level {
            l if l >= LogLevel::ERROR => level.name().red().bold(),
            l if l >= LogLevel::WARNING => level.name().yellow(),
            l if l >= LogLevel::INFO => level.name().green(),
            _ => level.name().dimmed(),
        };
        eprintln!("[{}] {}", label, message);
    }
}
