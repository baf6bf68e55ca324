/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::Result;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::str::FromStr;

const LOG_ENV: &str = "STONEGATE_LOG";

/// Our own logger, layered over `env_logger` so third-party crates don't
/// drown out our own `info!`/`debug!` lines when `--debug` is passed.
pub struct StoneGateLogger {
    max_level: LevelFilter,
    log_filter: env_logger::Logger,
}

impl StoneGateLogger {
    pub fn new(max_level: LevelFilter) -> Self {
        // keep noisy library crates one level quieter than the app itself
        let lib_log_level = if max_level == LevelFilter::Trace {
            LevelFilter::Debug
        } else if max_level == LevelFilter::Debug {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        };
        let timestamp_precision = if max_level == LevelFilter::Debug {
            env_logger::fmt::TimestampPrecision::Millis
        } else {
            env_logger::fmt::TimestampPrecision::Seconds
        };
        Self {
            max_level,
            log_filter: env_logger::Builder::from_env(LOG_ENV)
                .filter_level(max_level)
                .filter_module("hyper", lib_log_level)
                .filter_module("tungstenite", lib_log_level)
                .filter_module("tower_http", lib_log_level)
                .filter_module("axum", lib_log_level)
                .format_timestamp(Some(timestamp_precision))
                .build(),
        }
    }

    pub fn init(self) -> Result<(), SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }
}

impl Log for StoneGateLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.log_filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.log_filter.matches(record) {
            self.log_filter.log(record);
        }
    }

    fn flush(&self) {}
}

/// Resolves the configured log level from `--debug` or `$STONEGATE_LOG`.
pub fn resolve_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else if let Ok(lvl) = std::env::var(LOG_ENV) {
        LevelFilter::from_str(&lvl).unwrap_or(LevelFilter::Info)
    } else {
        LevelFilter::Info
    }
}
