//! Batch ingestion progress reporting.
//!
//! Reports observable progress during `filer ingest <dir>` so users see how
//! much is left and how files are being classified (new, alternate location,
//! exact duplicate, error). Progress is emitted on **stderr** so stdout stays
//! parseable for scripts.

use std::io::Write;

/// A single progress event for a directory ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Walking the directory tree. Total unknown.
    Discovering { root: String },
    /// `n` of `total` files resolved so far.
    Ingesting {
        root: String,
        n: u64,
        total: u64,
        created: u64,
        location_added: u64,
        already_recorded: u64,
        failed: u64,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

const BAR_WIDTH: usize = 30;

/// Human-friendly progress bar on stderr, redrawn in place.
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { root } => {
                format!("ingest {}  discovering...\n", root)
            }
            IngestProgressEvent::Ingesting {
                n,
                total,
                created,
                location_added,
                already_recorded,
                failed,
                ..
            } => {
                let filled = if *total > 0 {
                    (BAR_WIDTH as u64 * n / total) as usize
                } else {
                    BAR_WIDTH
                };
                let mut line = format!(
                    "\r[{}{}] {} / {} | new {} | alt {} | dup {} | err {}",
                    "#".repeat(filled),
                    "-".repeat(BAR_WIDTH - filled),
                    format_number(*n),
                    format_number(*total),
                    created,
                    location_added,
                    already_recorded,
                    failed
                );
                if n >= total {
                    line.push('\n');
                }
                line
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "discovering"
            }),
            IngestProgressEvent::Ingesting {
                root,
                n,
                total,
                created,
                location_added,
                already_recorded,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "ingesting",
                "n": n,
                "total": total,
                "created": created,
                "location_added": location_added,
                "already_recorded": already_recorded,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}': use off, human or json", other)),
        }
    }
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>(), Ok(ProgressMode::Json));
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
