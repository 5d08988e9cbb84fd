use crate::budget::CategoryBudget;
use crate::cell::{Cell, Row};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Highest column reachable by a coordinate: single letters `A`..`Z`.
pub const MAX_ADDRESSABLE_COLUMNS: usize = 26;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub category_budgets: Vec<CategoryBudget>,
}

impl Table {
    /// Build a `rows` x `cols` table with headers `Column 1..N`.
    ///
    /// Callers guarantee both counts are positive.
    pub fn create(name: &str, rows: usize, cols: usize) -> Self {
        let headers: Vec<String> = (1..=cols).map(|i| format!("Column {}", i)).collect();
        let rows = (0..rows).map(|_| Row::create(&headers)).collect();
        Table {
            id: format!("tbl_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            headers,
            rows,
            created_at: Utc::now(),
            category_budgets: Vec::new(),
        }
    }

    pub fn row_index(&self, row_id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id == row_id)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Positional lookup: `col` and `row` are zero-based indexes into the
    /// current header and row order.
    pub fn cell_at(&self, col: usize, row: usize) -> Option<&Cell> {
        let header = self.headers.get(col)?;
        self.rows.get(row)?.cell(header)
    }

    pub fn cell_at_mut(&mut self, col: usize, row: usize) -> Option<&mut Cell> {
        let header = self.headers.get(col)?;
        self.rows.get_mut(row)?.cell_mut(header)
    }

    pub fn cell_at_coord(&self, coord: Coordinate) -> Option<&Cell> {
        self.cell_at(coord.col, coord.row)
    }

    pub fn category(&self, id: &str) -> Option<&CategoryBudget> {
        self.category_budgets.iter().find(|c| c.id == id)
    }

    /// True when the name matches this table's id, or its display name
    /// ignoring case.
    pub fn answers_to(&self, name: &str) -> bool {
        self.id == name || self.name.to_lowercase() == name.to_lowercase()
    }
}

/// A positional (column, row) address, both zero-based.
///
/// Coordinates are resolved against the current header and row order each
/// time they are read, so reordering changes what a fixed address points
/// at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub col: usize,
    pub row: usize,
}

impl Coordinate {
    pub fn new(col: usize, row: usize) -> Self {
        Coordinate { col, row }
    }

    /// Parse `LETTER DIGITS` such as `B12`. Only one uppercase letter is
    /// accepted and the row number is 1-based.
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let col = letter_to_col(chars.next()?)?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Coordinate { col, row: row - 1 })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match col_to_letter(self.col) {
            Some(letter) => write!(f, "{}{}", letter, self.row + 1),
            None => write!(f, "?{}", self.row + 1),
        }
    }
}

pub fn col_to_letter(col: usize) -> Option<char> {
    if col >= MAX_ADDRESSABLE_COLUMNS {
        return None;
    }
    Some((b'A' + col as u8) as char)
}

pub fn letter_to_col(letter: char) -> Option<usize> {
    if letter.is_ascii_uppercase() {
        Some((letter as u8 - b'A') as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_seeds_headers_and_rows() {
        let table = Table::create("Table 1", 3, 2);
        assert_eq!(table.headers, vec!["Column 1", "Column 2"]);
        assert_eq!(table.rows.len(), 3);
        for row in &table.rows {
            let keys: Vec<&String> = row.cells.keys().collect();
            assert_eq!(keys, vec!["Column 1", "Column 2"]);
        }
        assert!(table.id.starts_with("tbl_"));
    }

    #[test]
    fn coordinate_parsing() {
        assert_eq!(Coordinate::parse("A1"), Some(Coordinate::new(0, 0)));
        assert_eq!(Coordinate::parse("C12"), Some(Coordinate::new(2, 11)));
        assert_eq!(Coordinate::parse("A0"), None);
        assert_eq!(Coordinate::parse("a1"), None);
        assert_eq!(Coordinate::parse("AB1"), None);
        assert_eq!(Coordinate::parse("1A"), None);
        assert_eq!(Coordinate::parse("A"), None);
    }

    #[test]
    fn column_letters_stop_at_z() {
        assert_eq!(col_to_letter(0), Some('A'));
        assert_eq!(col_to_letter(25), Some('Z'));
        assert_eq!(col_to_letter(26), None);
        assert_eq!(letter_to_col('Z'), Some(25));
        assert_eq!(Coordinate::new(1, 4).to_string(), "B5");
    }

    #[test]
    fn name_matching_is_case_insensitive_or_by_id() {
        let mut table = Table::create("Rent", 1, 1);
        table.id = "tbl_rent".to_string();
        assert!(table.answers_to("rent"));
        assert!(table.answers_to("RENT"));
        assert!(table.answers_to("tbl_rent"));
        assert!(!table.answers_to("Budget"));
    }
}
