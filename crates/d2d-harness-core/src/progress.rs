//! Progress events emitted while a pipeline runs.
//!
//! The core only produces [`ProgressEvent`]s; writing them somewhere is the
//! job of a [`ProgressReporter`] supplied by the caller (stderr, JSON lines,
//! or nothing).

use std::time::Duration;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// A pipeline step is starting.
    StepStarted { step: String },
    /// `n` of `total` resources processed by the current step.
    Progress { step: String, n: u64, total: u64 },
    /// A pipeline step finished successfully.
    StepCompleted { step: String, elapsed: Duration },
    /// A free-form notice (e.g. a matcher phase being skipped).
    Notice { step: String, message: String },
}

/// Receives progress events. Implementations must not fail the run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Reporter that drops every event.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Percentage of `n` over `total`, 100 when `total` is zero.
pub fn percent(n: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        n as f64 * 100.0 / total as f64
    }
}

/// Format an integer with thousands separators: `1234567` → `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// `"1,234 / 5,000 (24.68%)"`.
pub fn format_progress(n: u64, total: u64) -> String {
    format!(
        "{} / {} ({:.2}%)",
        format_number(n),
        format_number(total),
        percent(n, total)
    )
}

/// Emits a [`ProgressEvent::Progress`] each time the processed share crosses
/// the next multiple of `step_percent`, and once more at completion.
pub struct LoopProgress<'a> {
    reporter: &'a dyn ProgressReporter,
    step: String,
    total: u64,
    n: u64,
    step_percent: u8,
    next_threshold: f64,
}

impl<'a> LoopProgress<'a> {
    pub fn new(
        reporter: &'a dyn ProgressReporter,
        step: &str,
        total: u64,
        step_percent: u8,
    ) -> Self {
        let step_percent = step_percent.clamp(1, 100);
        Self {
            reporter,
            step: step.to_string(),
            total,
            n: 0,
            step_percent,
            next_threshold: step_percent as f64,
        }
    }

    /// Record one processed item.
    pub fn tick(&mut self) {
        self.n += 1;
        if self.n >= self.total {
            return;
        }
        let current = percent(self.n, self.total);
        if current >= self.next_threshold {
            while self.next_threshold <= current {
                self.next_threshold += self.step_percent as f64;
            }
            self.emit();
        }
    }

    /// Emit the final event.
    pub fn finish(self) {
        self.emit();
    }

    pub fn processed(&self) -> u64 {
        self.n
    }

    fn emit(&self) {
        self.reporter.report(ProgressEvent::Progress {
            step: self.step.clone(),
            n: self.n,
            total: self.total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Collect {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn format_progress_line() {
        assert_eq!(format_progress(1234, 5000), "1,234 / 5,000 (24.68%)");
        assert_eq!(format_progress(0, 0), "0 / 0 (100.00%)");
    }

    #[test]
    fn loop_progress_cadence() {
        let collect = Collect::default();
        let mut progress = LoopProgress::new(&collect, "map_path", 100, 25);
        for _ in 0..100 {
            progress.tick();
        }
        progress.finish();
        let counts: Vec<u64> = collect
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { n, .. } => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![25, 50, 75, 100]);
    }
}
