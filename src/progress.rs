//! Pipeline and ingest progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! The matching engine produces [`ProgressEvent`]s; this module renders them.

use std::io::Write;
use std::str::FromStr;

use anyhow::bail;

use d2d_harness_core::progress::{format_progress, NoProgress, ProgressEvent, ProgressReporter};

/// Human-friendly progress on stderr: `map_path  1,234 / 5,000 (24.68%)`.
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::StepStarted { step } => format!("{}  started\n", step),
            ProgressEvent::Progress { step, n, total } => {
                format!("{}  {}\n", step, format_progress(*n, *total))
            }
            ProgressEvent::StepCompleted { step, elapsed } => {
                format!("{}  done in {:.2}s\n", step, elapsed.as_secs_f64())
            }
            ProgressEvent::Notice { step, message } => format!("{}  {}\n", step, message),
        }
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = Self::render(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::StepStarted { step } => serde_json::json!({
                "event": "step_started",
                "step": step,
            }),
            ProgressEvent::Progress { step, n, total } => serde_json::json!({
                "event": "progress",
                "step": step,
                "n": n,
                "total": total,
            }),
            ProgressEvent::StepCompleted { step, elapsed } => serde_json::json!({
                "event": "step_completed",
                "step": step,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
            ProgressEvent::Notice { step, message } => serde_json::json!({
                "event": "notice",
                "step": step,
                "message": message,
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::render(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => bail!("Unknown progress mode: '{}'. Must be off, human or json.", other),
        }
    }
}
