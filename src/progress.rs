//! Fetch-all progress reporting.
//!
//! Reports observable progress while `gtc fetch-all` walks a variant's
//! hierarchy, so operators see how many Parts are done on large variants.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts
//! (the report itself, or its `--json` rendition, goes to stdout).

use std::io::Write;
use std::str::FromStr;

/// A single progress event for one aggregation pass.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateProgressEvent {
    /// The pass has started over `parts_total` Parts.
    Started { variant_id: String, parts_total: u64 },
    /// One Part's subtree finished (successfully or not). Parts complete in
    /// any order; `parts_done` counts completions.
    PartDone {
        part_name: String,
        parts_done: u64,
        parts_total: u64,
        captures: u64,
        modules: u64,
    },
}

/// Reports aggregation progress. Called concurrently from Part branches.
pub trait AggregateProgressReporter: Send + Sync {
    fn report(&self, event: AggregateProgressEvent);
}

/// Human-friendly progress on stderr: "fetch-all  Door  3 / 12 parts  (4 captures, 9 modules)".
pub struct StderrProgress;

impl AggregateProgressReporter for StderrProgress {
    fn report(&self, event: AggregateProgressEvent) {
        let line = match &event {
            AggregateProgressEvent::Started {
                variant_id,
                parts_total,
            } => format!(
                "fetch-all {}  walking {} parts...\n",
                variant_id,
                format_number(*parts_total)
            ),
            AggregateProgressEvent::PartDone {
                part_name,
                parts_done,
                parts_total,
                captures,
                modules,
            } => format!(
                "fetch-all  {}  {} / {} parts  ({} captures, {} modules)\n",
                part_name,
                format_number(*parts_done),
                format_number(*parts_total),
                format_number(*captures),
                format_number(*modules)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AggregateProgressReporter for JsonProgress {
    fn report(&self, event: AggregateProgressEvent) {
        let obj = match &event {
            AggregateProgressEvent::Started {
                variant_id,
                parts_total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "started",
                "variant_id": variant_id,
                "parts_total": parts_total
            }),
            AggregateProgressEvent::PartDone {
                part_name,
                parts_done,
                parts_total,
                captures,
                modules,
            } => serde_json::json!({
                "event": "progress",
                "phase": "part_done",
                "part": part_name,
                "parts_done": parts_done,
                "parts_total": parts_total,
                "captures": captures,
                "modules": modules
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

impl AggregateProgressReporter for NoProgress {
    fn report(&self, _event: AggregateProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AggregateProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    /// `auto` resolves against the current stderr.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ProgressMode::default_for_tty()),
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected auto, off, human, or json",
                other
            )),
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
        assert_eq!("off".parse::<ProgressMode>(), Ok(ProgressMode::Off));
        assert_eq!("JSON".parse::<ProgressMode>(), Ok(ProgressMode::Json));
        assert_eq!("human".parse::<ProgressMode>(), Ok(ProgressMode::Human));
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
