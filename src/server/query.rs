// Query path: linear scan of the current log file with filter predicates.

use super::ServerState;
use crate::codec;
use crate::error::LogError;
use crate::message::{FilterOptions, LogEntry};
use std::io::{BufRead, BufReader};

/// Scan the log file oldest-first and collect entries matching `filter`.
///
/// Lines that fail to parse (damaged records, continuations of multi-line
/// messages) are skipped. The scan holds the reader half of the file lock
/// so rotation cannot swap the file out from underneath it.
pub(crate) fn get_entries(
    state: &ServerState,
    filter: &FilterOptions,
) -> Result<Vec<LogEntry>, LogError> {
    filter.validate()?;

    let _writer = state.writer.read().unwrap();
    let file = std::fs::File::open(&state.config.log_file)?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let Ok(entry) = codec::parse_line(&line) else {
            continue;
        };
        if !matches_filter(&entry, filter) {
            continue;
        }
        entries.push(entry);
        if filter.limit > 0 && entries.len() >= filter.limit {
            break;
        }
    }
    Ok(entries)
}

fn matches_filter(entry: &LogEntry, filter: &FilterOptions) -> bool {
    if let Some(start) = filter.start_time {
        if entry.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_time {
        if entry.timestamp > end {
            return false;
        }
    }
    if let Some(level) = filter.level {
        if entry.level != level {
            return false;
        }
    }
    if let Some(service) = &filter.service {
        if entry.service != *service {
            return false;
        }
    }
    true
}
