// instancetool/src/report.rs
use std::fmt;
use tracing::{error, info, warn};

/// Result of one item of a batch (a database, a sanitizer action).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded(String),
    Skipped(String),
    Failed(String),
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(detail) => write!(f, "succeeded: {detail}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Per-item outcomes of a sequential batch, in execution order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    items: Vec<(String, ItemOutcome)>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: impl Into<String>, outcome: ItemOutcome) {
        self.items.push((item.into(), outcome));
    }

    pub fn items(&self) -> &[(String, ItemOutcome)] {
        &self.items
    }

    pub fn outcome(&self, item: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|(name, _)| name == item)
            .map(|(_, outcome)| outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|(_, outcome)| outcome.is_failure())
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|(_, o)| o.is_failure()).count()
    }

    pub fn log_summary(&self, what: &str) {
        for (item, outcome) in &self.items {
            match outcome {
                ItemOutcome::Succeeded(_) => info!("  ✓ {} {}", item, outcome),
                ItemOutcome::Skipped(_) => warn!("  - {} {}", item, outcome),
                ItemOutcome::Failed(_) => error!("  ✗ {} {}", item, outcome),
            }
        }
        info!(
            "{}: {} item(s), {} failed",
            what,
            self.items.len(),
            self.failed_count()
        );
    }
}
