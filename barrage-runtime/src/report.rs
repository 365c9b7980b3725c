use crate::error::RuntimeError;
use barrage::core::{CheckSummary, MetricSummary, RunReport, ThresholdOutcome, TrendSummary};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Presentation of a finished run.
pub trait Reporter {
    fn report(&mut self, report: &RunReport) -> Result<(), RuntimeError>;
}

/// Human readable summary, k6 style.
pub struct TextReporter<W> {
    out: W,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for TextReporter<W> {
    fn report(&mut self, report: &RunReport) -> Result<(), RuntimeError> {
        write!(self.out, "{}", Summary(report))
            .and_then(|_| self.out.flush())
            .map_err(|e| RuntimeError::Export {
                path: PathBuf::from("<stdout>"),
                reason: e.to_string(),
            })
    }
}

/// Writes the full report as pretty-printed JSON.
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for JsonExporter {
    fn report(&mut self, report: &RunReport) -> Result<(), RuntimeError> {
        let failed = |reason: String| RuntimeError::Export {
            path: self.path.clone(),
            reason,
        };
        let json = serde_json::to_string_pretty(report).map_err(|e| failed(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| failed(e.to_string()))
    }
}

pub struct Summary<'a>(pub &'a RunReport);

const LABEL_WIDTH: usize = 22;

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let elapsed = Duration::from_millis(report.elapsed.as_millis() as u64);
        write!(
            f,
            "run {} finished in {}",
            report.run_id,
            humantime::format_duration(elapsed)
        )?;
        if report.aborted {
            f.write_str(" (aborted)")?;
        }
        writeln!(f)?;

        for (name, scenario) in &report.scenarios {
            let dispatch = &scenario.dispatch;
            writeln!(f, "\nscenario {name}")?;
            line(f, "iterations")?;
            writeln!(
                f,
                "{} completed, {} dropped, {} interrupted, peak {} workers",
                dispatch.completed, dispatch.dropped, dispatch.interrupted, dispatch.peak_workers
            )?;
            metric(f, "iteration", &scenario.iterations)?;
            if scenario.requests.total > 0 {
                metric(f, "http_req", &scenario.requests)?;
                line(f, "http_reqs")?;
                writeln!(f, "{}", scenario.requests.total)?;
            }
            if !scenario.checks.is_empty() {
                checks(f, &scenario.checks)?;
            }
        }

        if !report.thresholds.is_empty() {
            writeln!(f, "\nthresholds")?;
            for outcome in &report.thresholds {
                threshold(f, outcome)?;
            }
        }

        let failed = report.failed_thresholds().count();
        if report.aborted {
            writeln!(f, "\nABORTED ({failed} thresholds failed)")
        } else if failed > 0 {
            writeln!(f, "\nFAILED ({failed} of {} thresholds)", report.thresholds.len())
        } else {
            writeln!(f, "\nPASSED")
        }
    }
}

fn line(f: &mut fmt::Formatter<'_>, label: &str) -> fmt::Result {
    write!(f, "  {:.<width$}: ", label, width = LABEL_WIDTH)
}

fn metric(f: &mut fmt::Formatter<'_>, prefix: &str, summary: &MetricSummary) -> fmt::Result {
    line(f, &format!("{prefix}_duration"))?;
    match &summary.latency {
        Some(trend) => writeln!(f, "{}", Trend(trend))?,
        None => writeln!(f, "no data")?,
    }

    line(f, &format!("{prefix}_failed"))?;
    writeln!(
        f,
        "{:.2}% ({} of {})",
        summary.error_rate * 100.,
        summary.failures,
        summary.total
    )?;

    if !summary.errors.is_empty() {
        line(f, &format!("{prefix}_errors"))?;
        let errors: Vec<String> = summary
            .errors
            .iter()
            .map(|(tag, count)| format!("{tag}={count}"))
            .collect();
        writeln!(f, "{}", errors.join(" "))?;
    }
    Ok(())
}

fn checks(f: &mut fmt::Formatter<'_>, summary: &CheckSummary) -> fmt::Result {
    line(f, "checks")?;
    writeln!(
        f,
        "{:.2}% ({} of {})",
        summary.pass_rate() * 100.,
        summary.passed,
        summary.total
    )?;
    for (name, failed) in &summary.failures {
        writeln!(f, "    ✗ {name}: {failed} failed")?;
    }
    Ok(())
}

fn threshold(f: &mut fmt::Formatter<'_>, outcome: &ThresholdOutcome) -> fmt::Result {
    let mark = if outcome.passed { '✓' } else { '✗' };
    write!(f, "  {mark} {}", outcome.rule)?;
    match outcome.observed {
        Some(observed) => writeln!(f, " (observed {observed:.4})"),
        None => writeln!(f, " (no data)"),
    }
}

struct Trend<'a>(&'a TrendSummary);

impl fmt::Display for Trend<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0;
        write!(
            f,
            "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms p(99)={:.2}ms",
            t.avg, t.min, t.p50, t.max, t.p90, t.p95, t.p99
        )
    }
}
