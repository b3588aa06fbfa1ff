//! Post-run coverage summary
//!
//! For every application, the number of unique element ids visited so far
//! is accumulated across attempts in (attempt, device) order. A curve that
//! flattens means later attempts stopped finding new widgets.

use std::collections::{BTreeMap, HashSet};

use droidwalk_core::prelude::*;
use droidwalk_core::{FailureCause, RunRecord, DELIMITER};

/// Coverage and failure counts of one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCoverage {
    pub package: String,
    /// Cumulative unique visited elements after each record
    pub curve: Vec<usize>,
    pub successes: usize,
    pub failures: BTreeMap<String, usize>,
}

impl AppCoverage {
    fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            curve: Vec::new(),
            successes: 0,
            failures: BTreeMap::new(),
        }
    }

    pub fn unique_elements(&self) -> usize {
        self.curve.last().copied().unwrap_or(0)
    }

    pub fn failure_count(&self, cause: FailureCause) -> usize {
        self.failures.get(&cause.to_string()).copied().unwrap_or(0)
    }

    pub fn line(&self) -> String {
        let curve: Vec<String> = self.curve.iter().map(|n| n.to_string()).collect();
        let mut line = format!(
            "{}: {} unique element(s), curve [{}], {} success(es)",
            self.package,
            self.unique_elements(),
            curve.join(", "),
            self.successes
        );
        for (cause, count) in &self.failures {
            line.push_str(&format!(", {} {}", count, cause));
        }
        line
    }
}

/// Summaries keyed and ordered by package
#[derive(Debug, Default)]
pub struct CoverageReport {
    apps: BTreeMap<String, AppCoverage>,
}

impl CoverageReport {
    pub fn get(&self, package: &str) -> Option<&AppCoverage> {
        self.apps.get(package)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.apps.values().map(AppCoverage::line).collect()
    }

    pub fn log(&self) {
        if self.is_empty() {
            info!("No attempts recorded");
            return;
        }
        info!("Coverage summary:");
        for line in self.lines() {
            info!("  {}", line);
        }
    }
}

pub fn summarize(records: &[RunRecord]) -> CoverageReport {
    let mut ordered: Vec<&RunRecord> = records.iter().collect();
    ordered.sort_by(|a, b| (a.attempt, &a.serial).cmp(&(b.attempt, &b.serial)));

    let mut report = CoverageReport::default();
    let mut seen: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();

    for record in ordered {
        let ids = seen.entry(record.package.as_str()).or_default();
        ids.extend(
            record
                .visited
                .iter()
                .filter(|id| id.contains(DELIMITER))
                .map(String::as_str),
        );

        let app = report
            .apps
            .entry(record.package.clone())
            .or_insert_with(|| AppCoverage::new(&record.package));
        app.curve.push(ids.len());
        match record.verdict.cause() {
            None => app.successes += 1,
            Some(cause) => *app.failures.entry(cause.to_string()).or_default() += 1,
        }
    }
    report
}
