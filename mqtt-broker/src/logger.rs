use std::{fs, io::Write};

use colored::*;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use time::{format_description::FormatItem, OffsetDateTime};

use crate::config::MqttConfig;

pub struct BrokerLogger {
    write_file: bool,
    write_console: bool,
}

const TIMESTAMP_FORMAT_UTC: &[FormatItem] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

impl log::Log for BrokerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = OffsetDateTime::now_utc()
            .format(TIMESTAMP_FORMAT_UTC)
            .expect("logger could not format the UTC time");

        let colorized_level_string = match record.level() {
            Level::Error => format!("{:<5}", record.level().to_string())
                .red()
                .to_string(),
            Level::Warn => format!("{:<5}", record.level().to_string())
                .yellow()
                .to_string(),
            Level::Info => format!("{:<5}", record.level().to_string())
                .cyan()
                .to_string(),
            Level::Debug => format!("{:<5}", record.level().to_string())
                .purple()
                .to_string(),
            Level::Trace => format!("{:<5}", record.level().to_string())
                .normal()
                .to_string(),
        };

        if self.write_console {
            self.log_console(record, &colorized_level_string, &timestamp);
        }

        if self.write_file {
            self.log_file(record, &colorized_level_string, &timestamp);
        }
    }

    fn flush(&self) {}
}

impl BrokerLogger {
    fn log_file(&self, record: &Record, colorized_level_string: &str, timestamp: &str) {
        let log_string = format!("{};{};{}\n", record.level(), record.args(), timestamp);

        let path = match record.level() {
            Level::Trace | Level::Debug => "logs/debug.log",
            Level::Error => "logs/error.log",
            Level::Warn | Level::Info => "logs/main.log",
        };

        match fs::OpenOptions::new().append(true).open(path) {
            Ok(mut file) => {
                let _ = file.write_all(log_string.as_bytes());
            }
            Err(err) => {
                eprintln!(
                    "{colorized_level_string} - could not write log message to {path}\n\t{err}\n\t - {timestamp};"
                );
            }
        }
    }

    fn log_console(&self, record: &Record, colorized_level_string: &str, timestamp: &str) {
        println!(
            "{colorized_level_string} - {} - {timestamp};",
            record.args(),
        );
    }
}

impl BrokerLogger {
    pub fn new(config: &MqttConfig) -> Self {
        return Self {
            write_file: config.should_log_file(),
            write_console: config.should_log_console(),
        };
    }

    pub fn init(self, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(self))
    }
}
