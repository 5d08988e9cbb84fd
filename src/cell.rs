use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Prefix marking a raw cell input as a formula.
pub const FORMULA_SIGIL: char = '=';

/// Display value written into a formula cell whose expression failed.
pub const ERROR_MARKER: &str = "#ERROR";

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Cell {
    pub value: String,
    #[serde(default)]
    pub formula: Option<String>,
}

impl Cell {
    pub fn empty() -> Self {
        Cell::default()
    }

    /// A plain cell holding the raw text exactly as entered.
    pub fn plain(raw: &str) -> Self {
        Cell {
            value: raw.to_string(),
            formula: None,
        }
    }

    pub fn computed(formula: &str, value: String) -> Self {
        Cell {
            value,
            formula: Some(formula.to_string()),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

pub fn is_formula_input(raw: &str) -> bool {
    raw.starts_with(FORMULA_SIGIL)
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Row {
    pub id: String,
    pub cells: BTreeMap<String, Cell>,
}

impl Row {
    /// A fresh row with one empty cell per header.
    pub fn create(headers: &[String]) -> Self {
        Row {
            id: format!("row_{}", Uuid::new_v4().simple()),
            cells: headers
                .iter()
                .map(|h| (h.clone(), Cell::empty()))
                .collect(),
        }
    }

    pub fn cell(&self, header: &str) -> Option<&Cell> {
        self.cells.get(header)
    }

    pub fn cell_mut(&mut self, header: &str) -> Option<&mut Cell> {
        self.cells.get_mut(header)
    }

    pub fn insert_empty(&mut self, header: &str) {
        self.cells.insert(header.to_string(), Cell::empty());
    }

    pub fn remove(&mut self, header: &str) -> Option<Cell> {
        self.cells.remove(header)
    }

    /// Move a cell to a new key, keeping formula and value.
    pub fn rekey(&mut self, old: &str, new: &str) {
        if let Some(cell) = self.cells.remove(old) {
            self.cells.insert(new.to_string(), cell);
        }
    }
}
