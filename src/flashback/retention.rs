// ABOUTME: Retention validation - proves undo/flashback settings support consistent reads
// ABOUTME: Enforces a seven-day retention floor, failing fast or warning per operator policy

use serde::Serialize;

use super::database::FlashbackDatabase;
use crate::error::{CaptureError, Result};

/// Minimum undo retention the engine requires: one week.
pub const MIN_RETENTION_SECONDS: u64 = 60 * 60 * 24 * 7;

/// Server-side undo and flashback configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionConfig {
    pub undo_tablespace: String,
    /// `AUTO` or `MANUAL`
    pub undo_management: String,
    pub undo_retention_seconds: u64,
    pub max_size: Option<u64>,
    /// `GUARANTEE`, `NOGUARANTEE` or `NOT APPLY`
    pub retention_mode: String,
    pub autoextensible: bool,
    pub flashback_on: bool,
    /// Average auto-tuned retention over the undo statistics window (four
    /// days). Only available with automatic undo management.
    pub avg_retention_seconds: Option<u64>,
}

impl RetentionConfig {
    pub fn is_guaranteed(&self) -> bool {
        self.retention_mode.eq_ignore_ascii_case("GUARANTEE")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Individual check result
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }

    fn warn(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }
}

/// Outcome of evaluating a [`RetentionConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub checks: Vec<CheckResult>,
}

impl RetentionReport {
    pub fn passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Warn)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }

    /// Print formatted output
    pub fn print(&self) {
        println!();
        println!("Flashback Retention Checks");
        println!("{}", "═".repeat(61));
        for check in &self.checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Warn => "!",
                CheckStatus::Fail => "✗",
            };
            println!("  {} {}", icon, check.message);
        }
        println!("{}", "═".repeat(61));
        if self.passed() {
            println!(
                "PASSED: flashback retention is sufficient ({} warning(s))",
                self.warnings().count()
            );
        } else {
            println!("FAILED: {} issue(s) must be resolved", self.failures().count());
        }
    }
}

/// Evaluate a retention snapshot against the seven-day floor.
///
/// Hard failures become warnings when `skip_retention_checks` is set. A
/// non-autoextensible tablespace and non-guaranteed retention only ever warn.
pub fn evaluate(config: &RetentionConfig, skip_retention_checks: bool) -> RetentionReport {
    let mut report = RetentionReport::default();
    let mut enforce = |name: &'static str, ok: bool, pass_msg: String, fail_msg: String| {
        if ok {
            report.checks.push(CheckResult::pass(name, pass_msg));
        } else if skip_retention_checks {
            report.checks.push(CheckResult::warn(name, fail_msg));
        } else {
            report.checks.push(CheckResult::fail(name, fail_msg));
        }
    };

    enforce(
        "flashback",
        config.flashback_on,
        "Flashback is enabled".to_string(),
        "Flashback must be enabled on the database.".to_string(),
    );

    enforce(
        "undo_retention",
        config.undo_retention_seconds >= MIN_RETENTION_SECONDS,
        format!(
            "UNDO_RETENTION is {} seconds",
            config.undo_retention_seconds
        ),
        format!(
            "We require a minimum of 7 days UNDO_RETENTION to ensure consistency of this task. \
             The current UNDO_RETENTION is {} seconds.",
            config.undo_retention_seconds
        ),
    );

    match config.avg_retention_seconds {
        Some(avg) => enforce(
            "avg_retention",
            avg >= MIN_RETENTION_SECONDS,
            format!("Average auto-tuned undo retention is {} seconds", avg),
            format!(
                "We require a minimum of 7 days undo retention to ensure consistency of this task. \
                 The current average auto-tuned retention of the database for the past four days \
                 is {} seconds.",
                avg
            ),
        ),
        None => report.checks.push(CheckResult::warn(
            "avg_retention",
            format!(
                "Average auto-tuned retention is unavailable (UNDO_MANAGEMENT={}); \
                 the observed retention could not be verified.",
                config.undo_management
            ),
        )),
    }

    if config.autoextensible {
        report.checks.push(CheckResult::pass(
            "autoextend",
            format!("Undo tablespace {} is auto-extensible", config.undo_tablespace),
        ));
    } else {
        report.checks.push(CheckResult::warn(
            "autoextend",
            "We recommend making your undo tablespace auto-extensible.",
        ));
    }

    if config.is_guaranteed() {
        report
            .checks
            .push(CheckResult::pass("guarantee", "Undo retention is guaranteed"));
    } else {
        report.checks.push(CheckResult::warn(
            "guarantee",
            "We recommend guaranteeing retention of the undo tablespace.",
        ));
    }

    report
}

/// Read the server's retention configuration and validate it.
///
/// Must run before any snapshot marker is captured. Returns a configuration
/// error naming the first violated condition unless checks are skipped.
pub async fn validate_flashback(
    db: &dyn FlashbackDatabase,
    skip_retention_checks: bool,
) -> Result<RetentionReport> {
    let config = db.retention_config().await?;

    tracing::info!(
        "Flashback configuration: undo_tablespace={}, undo_management={}, undo_retention_seconds={}, \
         max_size={:?}, retention_mode={}, autoextensible={}, flashback_on={}, avg_retention_seconds={:?}",
        config.undo_tablespace,
        config.undo_management,
        config.undo_retention_seconds,
        config.max_size,
        config.retention_mode,
        config.autoextensible,
        config.flashback_on,
        config.avg_retention_seconds
    );

    let report = evaluate(&config, skip_retention_checks);
    for check in report.warnings() {
        tracing::warn!("{}", check.message);
    }

    if let Some(failure) = report.failures().next() {
        tracing::error!("{}", failure.message);
        return Err(CaptureError::configuration(failure.message.clone()));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> RetentionConfig {
        RetentionConfig {
            undo_tablespace: "UNDOTBS1".to_string(),
            undo_management: "AUTO".to_string(),
            undo_retention_seconds: 700_000,
            max_size: Some(2_147_483_645),
            retention_mode: "GUARANTEE".to_string(),
            autoextensible: true,
            flashback_on: true,
            avg_retention_seconds: Some(900_000),
        }
    }

    #[test]
    fn test_healthy_config_passes_cleanly() {
        let report = evaluate(&healthy(), false);
        assert!(report.passed());
        assert_eq!(report.warnings().count(), 0);
    }

    #[test]
    fn test_short_retention_fails_without_override() {
        let config = RetentionConfig {
            undo_retention_seconds: 500_000,
            ..healthy()
        };
        let report = evaluate(&config, false);
        assert!(!report.passed());
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.name, "undo_retention");
        assert!(failure.message.contains("500000 seconds"));
    }

    #[test]
    fn test_short_retention_warns_with_override() {
        let config = RetentionConfig {
            undo_retention_seconds: 500_000,
            ..healthy()
        };
        let report = evaluate(&config, true);
        assert!(report.passed());
        assert!(report.warnings().any(|c| c.name == "undo_retention"));
    }

    #[test]
    fn test_no_guarantee_only_warns() {
        let config = RetentionConfig {
            retention_mode: "NOGUARANTEE".to_string(),
            ..healthy()
        };
        let report = evaluate(&config, false);
        assert!(report.passed());
        assert!(report.warnings().any(|c| c.name == "guarantee"));
    }

    #[test]
    fn test_not_autoextensible_only_warns() {
        let config = RetentionConfig {
            autoextensible: false,
            ..healthy()
        };
        let report = evaluate(&config, false);
        assert!(report.passed());
        assert!(report.warnings().any(|c| c.name == "autoextend"));
    }

    #[test]
    fn test_flashback_off_fails() {
        let config = RetentionConfig {
            flashback_on: false,
            ..healthy()
        };
        let report = evaluate(&config, false);
        assert_eq!(report.failures().next().unwrap().name, "flashback");
    }

    #[test]
    fn test_low_average_retention_fails() {
        let config = RetentionConfig {
            avg_retention_seconds: Some(86_400),
            ..healthy()
        };
        let report = evaluate(&config, false);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.name, "avg_retention");
        assert!(failure.message.contains("past four days"));
    }

    #[test]
    fn test_manual_undo_management_warns() {
        let config = RetentionConfig {
            undo_management: "MANUAL".to_string(),
            avg_retention_seconds: None,
            ..healthy()
        };
        let report = evaluate(&config, false);
        assert!(report.passed());
        assert!(report.warnings().any(|c| c.name == "avg_retention"));
    }
}
