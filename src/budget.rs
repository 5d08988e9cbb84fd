//! Per-table category budgets and spending summaries.
//!
//! Category spending is entered by hand and is independent of the formula
//! engine; the only thing shared with it is the safe-division helpers.

use crate::numeric::{parse_leading, safe_divide, safe_percent};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 80.0;

const NUMERIC_HEADER_HINTS: [&str; 5] = ["amount", "price", "cost", "total", "value"];

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBudget {
    pub id: String,
    pub name: String,
    pub limit: f64,
    pub spent: f64,
    /// Percentage of the limit at which the category is flagged.
    pub alert_threshold: f64,
}

impl CategoryBudget {
    /// Build a category from form input.
    ///
    /// Returns `None` when the name is blank or the limit has no leading
    /// number. A blank, unparsable or zero threshold falls back to
    /// [`DEFAULT_ALERT_THRESHOLD`].
    pub fn from_input(name: &str, limit: &str, threshold: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let limit = parse_leading(limit)?;
        let alert_threshold = parse_leading(threshold)
            .filter(|t| *t != 0.0)
            .unwrap_or(DEFAULT_ALERT_THRESHOLD);
        Some(CategoryBudget {
            id: format!("cat_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            limit,
            spent: 0.0,
            alert_threshold,
        })
    }

    pub fn percentage(&self) -> f64 {
        safe_percent(self.spent, self.limit)
    }

    pub fn is_over_budget(&self) -> bool {
        self.percentage() > 100.0
    }

    pub fn is_near_limit(&self) -> bool {
        !self.is_over_budget() && self.percentage() >= self.alert_threshold
    }

    pub fn remaining(&self) -> f64 {
        self.limit - self.spent
    }

    pub fn status(&self) -> BudgetStatus {
        if self.is_over_budget() {
            BudgetStatus::Over
        } else if self.is_near_limit() {
            BudgetStatus::NearLimit
        } else {
            BudgetStatus::Ok
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetStatus {
    Ok,
    NearLimit,
    Over,
}

/// This category's share of all spending, in percent.
pub fn share_of_total(category: &CategoryBudget, all: &[CategoryBudget]) -> f64 {
    let total: f64 = all.iter().map(|c| c.spent).sum();
    safe_percent(category.spent, total)
}

/// Bar widths (spent, limit) in percent of the largest spent-or-limit
/// figure across all categories.
pub fn bar_widths(category: &CategoryBudget, all: &[CategoryBudget]) -> (f64, f64) {
    let max = all
        .iter()
        .map(|c| c.spent.max(c.limit))
        .fold(0.0_f64, f64::max);
    (
        safe_divide(category.spent, max) * 100.0,
        safe_divide(category.limit, max) * 100.0,
    )
}

/// Headers that look like money columns, or are themselves numbers.
pub fn is_numeric_column(header: &str) -> bool {
    let lower = header.to_lowercase();
    NUMERIC_HEADER_HINTS.iter().any(|hint| lower.contains(hint))
        || header.trim().parse::<f64>().is_ok()
}

/// Sum of one column's displayed values; non-numeric cells count as zero.
pub fn column_sum(table: &Table, col: usize) -> f64 {
    let Some(header) = table.headers.get(col) else {
        return 0.0;
    };
    table
        .rows
        .iter()
        .filter_map(|row| row.cell(header))
        .map(|cell| parse_leading(&cell.value).unwrap_or(0.0))
        .sum()
}

/// Total across every column that [`is_numeric_column`] accepts.
pub fn total_spending(table: &Table) -> f64 {
    table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| is_numeric_column(h))
        .map(|(i, _)| column_sum(table, i))
        .sum()
}
