// 📋 Run Report - Per-item outcomes and scraping statistics for one run

use crate::error::{FailureKind, FetchError, ItemError, ParseError};
use crate::model::{BillKey, BillType, Target};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// ITEM OUTCOME
// ============================================================================

/// What happened to one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success,
    NotFound,
    ParseError { message: String },
    Failed { kind: FailureKind, message: String },
}

impl ItemOutcome {
    /// Map a per-item error onto the report taxonomy.
    ///
    /// An empty shell page is the site's way of saying "no such record",
    /// so it counts as not-found rather than a parse failure.
    pub fn from_error(err: &ItemError) -> Self {
        match err {
            ItemError::Fetch(FetchError::NotFound { .. }) => ItemOutcome::NotFound,
            ItemError::Fetch(e @ FetchError::Blocked { .. }) => ItemOutcome::Failed {
                kind: FailureKind::Blocked,
                message: e.to_string(),
            },
            ItemError::Fetch(e @ FetchError::Transient { .. }) => ItemOutcome::Failed {
                kind: FailureKind::Transient,
                message: e.to_string(),
            },
            ItemError::Parse(ParseError::NotARecord { .. }) => ItemOutcome::NotFound,
            ItemError::Parse(e) => ItemOutcome::ParseError {
                message: e.to_string(),
            },
            ItemError::Storage(e) => ItemOutcome::Failed {
                kind: FailureKind::Storage,
                message: e.to_string(),
            },
            ItemError::Crashed(message) => ItemOutcome::Failed {
                kind: FailureKind::Crashed,
                message: message.clone(),
            },
        }
    }

    /// Whether the identifier exists upstream (drives lane early-stop)
    pub fn found(&self) -> bool {
        !matches!(self, ItemOutcome::NotFound)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Success => "success",
            ItemOutcome::NotFound => "not_found",
            ItemOutcome::ParseError { .. } => "parse_error",
            ItemOutcome::Failed { .. } => "failed",
        }
    }
}

/// A failed identifier, enough for an operator to re-run a narrow range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub target: Target,
    pub kind: FailureKind,
    pub message: String,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_name: Option<String>,
    pub attempted: usize,
    pub succeeded: usize,
    pub not_found: usize,
    pub parse_errors: usize,
    pub failed: usize,
    pub failures: Vec<FailedItem>,
    pub elapsed: Duration,
    /// Set when a cooperative stop ended the run before the plan was done
    pub stopped_early: bool,
}

impl RunReport {
    pub fn new(run_name: Option<String>) -> Self {
        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            run_name,
            attempted: 0,
            succeeded: 0,
            not_found: 0,
            parse_errors: 0,
            failed: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
            stopped_early: false,
        }
    }

    pub fn record(&mut self, target: Target, outcome: &ItemOutcome) {
        self.attempted += 1;
        match outcome {
            ItemOutcome::Success => self.succeeded += 1,
            ItemOutcome::NotFound => self.not_found += 1,
            ItemOutcome::ParseError { message } => {
                self.parse_errors += 1;
                self.failures.push(FailedItem {
                    target,
                    kind: FailureKind::Parse,
                    message: message.clone(),
                });
            }
            ItemOutcome::Failed { kind, message } => {
                self.failed += 1;
                self.failures.push(FailedItem {
                    target,
                    kind: *kind,
                    message: message.clone(),
                });
            }
        }
    }

    /// No parse errors and no failures (not-found is a normal outcome)
    pub fn is_clean(&self) -> bool {
        self.parse_errors == 0 && self.failed == 0
    }

    /// Succeeded / attempted, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.attempted as f64 * 100.0
    }

    pub fn average_per_item(&self) -> Duration {
        match u32::try_from(self.attempted) {
            Ok(n) if n > 0 => self.elapsed / n,
            _ => Duration::ZERO,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} attempted: {} succeeded, {} not found, {} parse errors, {} failed ({:.1}% success) in {:.1}s, {:.2}s/item",
            self.attempted,
            self.succeeded,
            self.not_found,
            self.parse_errors,
            self.failed,
            self.success_rate(),
            self.elapsed.as_secs_f64(),
            self.average_per_item().as_secs_f64(),
        )
    }

    /// Write failed identifiers as CSV: kind,identifier,year,error_kind,message
    pub fn write_failures_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writer.write_record(["kind", "identifier", "year", "error_kind", "message"])?;
        for failure in &self.failures {
            let (kind, identifier) = match failure.target {
                Target::Bill(key) => ("bill", format!("{}{}", key.bill_type, key.number)),
                Target::Member { member_id, .. } => ("member", member_id.to_string()),
            };
            writer.write_record([
                kind,
                identifier.as_str(),
                failure.target.year().to_string().as_str(),
                failure.kind.as_str(),
                failure.message.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Read back the identifiers of a failures CSV so a run can retry just those
pub fn read_failures_csv(path: &Path) -> Result<Vec<Target>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut targets = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let target = failure_target(
            record.get(0).unwrap_or_default(),
            record.get(1).unwrap_or_default(),
            record.get(2).unwrap_or_default(),
        )
        .with_context(|| format!("{} row {}", path.display(), line + 1))?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

fn failure_target(kind: &str, identifier: &str, year: &str) -> Result<Target> {
    let year: i32 = year.trim().parse().with_context(|| format!("invalid year: {}", year))?;
    match kind.trim() {
        "bill" => {
            let identifier = identifier.trim();
            let split = identifier
                .find(|c: char| c.is_ascii_digit())
                .ok_or_else(|| anyhow!("invalid bill identifier: {}", identifier))?;
            let (bill_type, number) = identifier.split_at(split);
            let bill_type: BillType = bill_type.parse().map_err(|e: String| anyhow!(e))?;
            let number = number
                .parse()
                .with_context(|| format!("invalid bill number: {}", identifier))?;
            Ok(Target::Bill(BillKey::new(bill_type, number, year)))
        }
        "member" => {
            let member_id = identifier
                .trim()
                .parse()
                .with_context(|| format!("invalid member id: {}", identifier))?;
            Ok(Target::Member { member_id, year })
        }
        other => bail!("unknown target kind: {}", other),
    }
}

// ============================================================================
// TESTS
// ============================================================================
