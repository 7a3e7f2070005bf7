use std::str::FromStr;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::error::Error;
use crate::eval::{Decision, MergeContext};

/// Env var holding the file log level (`error`..`trace`, `off`).
pub const LEVEL_ENV: &str = "DEBUG_GATE_LOG";

/// Install the global logger: warnings to stderr, everything at the configured
/// level appended to ~/.local/share/debug-gate/debug-gate.log.
///
/// Best-effort: if the log file cannot be opened only stderr is used, and a
/// logger that is already installed is left alone. Stdout is never touched.
pub fn init() {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Warn,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Never,
    )];
    if let Some(file) = open_log_file() {
        loggers.push(WriteLogger::new(level_from_env(), LogConfig::default(), file));
    }
    let _ = CombinedLogger::init(loggers);
}

fn level_from_env() -> LevelFilter {
    std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

fn open_log_file() -> Option<std::fs::File> {
    let home = std::env::var_os("HOME")?;
    let log_dir = std::path::Path::new(&home).join(".local/share/debug-gate");
    std::fs::create_dir_all(&log_dir).ok()?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("debug-gate.log"))
        .ok()
}

/// Emit one compact decision record per merge attempt.
pub fn log_decision(ctx: &MergeContext, decision: &Decision) {
    log::info!(
        target: "decision",
        "{outcome}\trepo={repo}\tproject={project}\tref={changeset}\t{summary}",
        outcome = decision.outcome.as_str(),
        repo = ctx.repository.id,
        project = ctx.repository.project,
        changeset = ctx.changeset_ref,
        summary = summary(decision),
    );
}

/// Decision record for hook input that never became a [`MergeContext`].
pub fn log_input_fault(err: &Error, decision: &Decision) {
    log::info!(target: "decision", "{}", input_fault_record(err, decision));
}

fn input_fault_record(err: &Error, decision: &Decision) -> String {
    let reason: String = err.to_string().replace('\n', " ").chars().take(200).collect();
    format!(
        "{outcome}\trepo=?\tproject=?\tref=?\tunreadable input ({reason})\t{summary}",
        outcome = decision.outcome.as_str(),
        summary = summary(decision),
    )
}

/// Single-line, length-capped summary of a decision for the log.
fn summary(decision: &Decision) -> String {
    let text = if decision.title.is_empty() {
        decision.message.clone()
    } else {
        format!("{}: {}", decision.title, decision.message)
    };
    let oneline = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    oneline.chars().take(300).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_single_line() {
        let d = Decision::rejected("Title", "line one\n\n   line two\n");
        assert_eq!(summary(&d), "Title: line one; line two");
    }

    #[test]
    fn input_fault_record_is_one_line() {
        let err: Error = serde_json::from_str::<MergeContext>("{not json").unwrap_err().into();
        let d = Decision::accepted("check skipped");
        let record = input_fault_record(&err, &d);
        assert!(record.starts_with("accepted\trepo=?\tproject=?\tref=?\tunreadable input (JSON error"));
        assert!(record.ends_with("\tcheck skipped"));
        assert!(!record.contains('\n'));
    }

    #[test]
    fn summary_is_capped() {
        let d = Decision::accepted("x".repeat(1000));
        assert_eq!(summary(&d).chars().count(), 300);
    }
}
