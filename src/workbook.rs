use crate::budget::CategoryBudget;
use crate::cell::{Cell, Row, is_formula_input};
use crate::formula;
use crate::recalc::{RecalcOutcome, Recalculator};
use crate::table::Table;
use log::debug;

/// The set of budget tables for one session, plus the mutation API.
///
/// Structural edits with invalid input (blank names, non-positive counts,
/// unknown ids, out-of-range indexes) are silent no-ops: the method returns
/// `None`/`false` and nothing changes.
#[derive(Clone, Debug, Default)]
pub struct Workbook {
    tables: Vec<Table>,
    active: Option<String>,
    recalc: Recalculator,
}

impl Workbook {
    pub fn new(recalc: Recalculator) -> Self {
        Workbook {
            tables: Vec::new(),
            active: None,
            recalc,
        }
    }

    /// Rebuild a workbook from a persisted snapshot. The first table becomes
    /// active.
    pub fn from_tables(tables: Vec<Table>, recalc: Recalculator) -> Self {
        let active = tables.first().map(|t| t.id.clone());
        Workbook {
            tables,
            active,
            recalc,
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Clone of the current tables, ready to persist.
    pub fn snapshot(&self) -> Vec<Table> {
        self.tables.clone()
    }

    /// Swap in a full replacement snapshot (last writer wins). The active
    /// table is kept if it still exists.
    pub fn replace_tables(&mut self, tables: Vec<Table>) {
        let keep = self
            .active
            .as_ref()
            .is_some_and(|id| tables.iter().any(|t| &t.id == id));
        if !keep {
            self.active = tables.first().map(|t| t.id.clone());
        }
        self.tables = tables;
    }

    pub fn recalculator(&self) -> Recalculator {
        self.recalc
    }

    pub fn table(&self, table_id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == table_id)
    }

    fn table_mut(&mut self, table_id: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == table_id)
    }

    pub fn active_table(&self) -> Option<&Table> {
        self.active.as_deref().and_then(|id| self.table(id))
    }

    pub fn set_active(&mut self, table_id: &str) -> bool {
        if self.table(table_id).is_none() {
            return false;
        }
        self.active = Some(table_id.to_string());
        true
    }

    /// Append a `rows` x `cols` table named `Table N` and make it active.
    pub fn create_table(&mut self, rows: i64, cols: i64) -> Option<&Table> {
        if rows <= 0 || cols <= 0 {
            return None;
        }
        let name = format!("Table {}", self.tables.len() + 1);
        let table = Table::create(&name, rows as usize, cols as usize);
        debug!("created table {} ({}x{})", table.id, rows, cols);
        self.active = Some(table.id.clone());
        self.tables.push(table);
        self.tables.last()
    }

    pub fn rename_table(&mut self, table_id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        match self.table_mut(table_id) {
            Some(table) => {
                table.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn delete_table(&mut self, table_id: &str) -> bool {
        let before = self.tables.len();
        self.tables.retain(|t| t.id != table_id);
        if self.tables.len() == before {
            return false;
        }
        if self.active.as_deref() == Some(table_id) {
            self.active = self.tables.first().map(|t| t.id.clone());
        }
        true
    }

    /// Append a row seeded with empty cells. Returns the new row's id.
    pub fn add_row(&mut self, table_id: &str) -> Option<String> {
        let table = self.table_mut(table_id)?;
        let row = Row::create(&table.headers);
        let id = row.id.clone();
        table.rows.push(row);
        Some(id)
    }

    pub fn delete_row(&mut self, table_id: &str, row_id: &str) -> bool {
        let Some(table) = self.table_mut(table_id) else {
            return false;
        };
        let Some(index) = table.row_index(row_id) else {
            return false;
        };
        table.rows.remove(index);
        true
    }

    /// Append a column. Blank or duplicate names are ignored.
    pub fn add_column(&mut self, table_id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(table) = self.table_mut(table_id) else {
            return false;
        };
        if table.has_header(name) {
            return false;
        }
        table.headers.push(name.to_string());
        for row in &mut table.rows {
            row.insert_empty(name);
        }
        true
    }

    pub fn delete_column(&mut self, table_id: &str, index: usize) -> bool {
        let Some(table) = self.table_mut(table_id) else {
            return false;
        };
        if index >= table.headers.len() {
            return false;
        }
        let header = table.headers.remove(index);
        for row in &mut table.rows {
            row.remove(&header);
        }
        true
    }

    /// Rename a column, carrying every row's cell over to the new key.
    pub fn rename_column(&mut self, table_id: &str, index: usize, new_name: &str) -> bool {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return false;
        }
        let Some(table) = self.table_mut(table_id) else {
            return false;
        };
        let Some(old) = table.headers.get(index).cloned() else {
            return false;
        };
        if old == new_name {
            return true;
        }
        if table.has_header(new_name) {
            return false;
        }
        table.headers[index] = new_name.to_string();
        for row in &mut table.rows {
            row.rekey(&old, new_name);
        }
        true
    }

    /// Write raw input into a cell, then recalculate the whole workbook.
    ///
    /// Input starting with `=` is evaluated against the tables as they were
    /// before this write; anything else is stored verbatim and clears the
    /// formula. Returns `None` if the table, row or column does not exist.
    pub fn set_cell(
        &mut self,
        table_id: &str,
        row_id: &str,
        col: usize,
        raw: &str,
    ) -> Option<RecalcOutcome> {
        let cell = if is_formula_input(raw) {
            Cell::computed(raw, formula::evaluate(raw, table_id, &self.tables))
        } else {
            Cell::plain(raw)
        };

        let table = self.table_mut(table_id)?;
        let header = table.headers.get(col)?.clone();
        let row = table.rows.iter_mut().find(|r| r.id == row_id)?;
        let slot = row.cell_mut(&header)?;
        *slot = cell;

        Some(self.recalculate())
    }

    /// Evaluate raw input in the context of a table without storing it.
    pub fn preview(&self, table_id: &str, raw: &str) -> String {
        formula::evaluate(raw, table_id, &self.tables)
    }

    pub fn recalculate(&mut self) -> RecalcOutcome {
        self.recalc.run(&mut self.tables)
    }

    pub fn cell(&self, table_id: &str, row_id: &str, col: usize) -> Option<&Cell> {
        let table = self.table(table_id)?;
        let header = table.headers.get(col)?;
        table.rows.iter().find(|r| r.id == row_id)?.cell(header)
    }

    pub fn add_category(
        &mut self,
        table_id: &str,
        name: &str,
        limit: &str,
        threshold: &str,
    ) -> Option<String> {
        let category = CategoryBudget::from_input(name, limit, threshold)?;
        let table = self.table_mut(table_id)?;
        let id = category.id.clone();
        table.category_budgets.push(category);
        Some(id)
    }

    pub fn delete_category(&mut self, table_id: &str, category_id: &str) -> bool {
        let Some(table) = self.table_mut(table_id) else {
            return false;
        };
        let before = table.category_budgets.len();
        table.category_budgets.retain(|c| c.id != category_id);
        table.category_budgets.len() != before
    }

    pub fn set_category_spent(&mut self, table_id: &str, category_id: &str, spent: f64) -> bool {
        let Some(category) = self
            .table_mut(table_id)
            .and_then(|t| t.category_budgets.iter_mut().find(|c| c.id == category_id))
        else {
            return false;
        };
        category.spent = spent;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with_table(rows: i64, cols: i64) -> (Workbook, String) {
        let mut book = Workbook::default();
        let id = book.create_table(rows, cols).unwrap().id.clone();
        (book, id)
    }

    fn row_id(book: &Workbook, table: &str, index: usize) -> String {
        book.table(table).unwrap().rows[index].id.clone()
    }

    #[test]
    fn create_rejects_non_positive_counts() {
        let mut book = Workbook::default();
        assert!(book.create_table(0, 3).is_none());
        assert!(book.create_table(3, -1).is_none());
        assert!(book.tables().is_empty());

        let table = book.create_table(2, 2).unwrap();
        assert_eq!(table.name, "Table 1");
        let id = table.id.clone();
        assert_eq!(book.active_table().map(|t| t.id.clone()), Some(id));
        assert_eq!(book.create_table(1, 1).unwrap().name, "Table 2");
    }

    #[test]
    fn plain_write_clears_formula() {
        let (mut book, t) = book_with_table(2, 2);
        let r = row_id(&book, &t, 0);
        book.set_cell(&t, &r, 0, "=1+1");
        assert_eq!(book.cell(&t, &r, 0).unwrap().formula.as_deref(), Some("=1+1"));
        book.set_cell(&t, &r, 0, "hello");
        assert_eq!(book.cell(&t, &r, 0), Some(&Cell::plain("hello")));
    }

    #[test]
    fn set_cell_on_missing_target_is_none() {
        let (mut book, t) = book_with_table(1, 1);
        let r = row_id(&book, &t, 0);
        assert!(book.set_cell("nope", &r, 0, "1").is_none());
        assert!(book.set_cell(&t, "nope", 0, "1").is_none());
        assert!(book.set_cell(&t, &r, 5, "1").is_none());
    }

    #[test]
    fn rows_are_seeded_and_removed() {
        let (mut book, t) = book_with_table(1, 3);
        let id = book.add_row(&t).unwrap();
        let table = book.table(&t).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].cells.len(), 3);
        assert!(book.delete_row(&t, &id));
        assert!(!book.delete_row(&t, &id));
        assert_eq!(book.table(&t).unwrap().rows.len(), 1);
    }

    #[test]
    fn column_edits_keep_rows_in_step_with_headers() {
        let (mut book, t) = book_with_table(2, 2);
        assert!(!book.add_column(&t, "   "));
        assert!(!book.add_column(&t, "Column 1"));
        assert!(book.add_column(&t, " Amount "));

        let table = book.table(&t).unwrap();
        assert_eq!(table.headers, vec!["Column 1", "Column 2", "Amount"]);
        for row in &table.rows {
            assert!(row.cell("Amount").is_some_and(|c| c.is_empty()));
        }

        assert!(!book.rename_column(&t, 0, ""));
        assert!(!book.rename_column(&t, 9, "X"));
        assert!(!book.rename_column(&t, 0, "Amount"));
    }

    #[test]
    fn rename_column_moves_formula_and_value() {
        let (mut book, t) = book_with_table(1, 2);
        let r = row_id(&book, &t, 0);
        book.set_cell(&t, &r, 1, "=2*3");
        assert!(book.rename_column(&t, 1, "Total"));
        let table = book.table(&t).unwrap();
        assert_eq!(table.headers[1], "Total");
        let cell = table.rows[0].cell("Total").unwrap();
        assert_eq!(cell.value, "6");
        assert_eq!(cell.formula.as_deref(), Some("=2*3"));
        assert!(table.rows[0].cell("Column 2").is_none());
    }

    #[test]
    fn table_rename_and_delete() {
        let (mut book, t1) = book_with_table(1, 1);
        let t2 = book.create_table(1, 1).unwrap().id.clone();
        assert!(!book.rename_table(&t1, "  "));
        assert!(book.rename_table(&t1, "Groceries"));
        assert_eq!(book.table(&t1).unwrap().name, "Groceries");

        assert!(book.delete_table(&t2));
        assert_eq!(book.active_table().unwrap().id, t1);
        assert!(!book.delete_table(&t2));
    }

    #[test]
    fn preview_does_not_store() {
        let (mut book, t) = book_with_table(1, 1);
        let r = row_id(&book, &t, 0);
        book.set_cell(&t, &r, 0, "4");
        assert_eq!(book.preview(&t, "=A1*2"), "8");
        assert_eq!(book.cell(&t, &r, 0).unwrap().value, "4");
    }

    #[test]
    fn categories_live_on_a_table() {
        let (mut book, t) = book_with_table(1, 1);
        assert!(book.add_category(&t, "", "100", "80").is_none());
        let c = book.add_category(&t, "Food", "500", "80").unwrap();
        assert!(book.set_category_spent(&t, &c, 450.0));
        assert!(book.table(&t).unwrap().category(&c).unwrap().is_near_limit());
        assert!(book.delete_category(&t, &c));
        assert!(!book.set_category_spent(&t, &c, 1.0));
    }

    #[test]
    fn replacement_keeps_active_table_when_present() {
        let (mut book, t1) = book_with_table(1, 1);
        let t2 = book.create_table(1, 1).unwrap().id.clone();
        let snapshot = book.snapshot();
        book.replace_tables(snapshot.clone());
        assert_eq!(book.active_table().unwrap().id, t2);
        book.replace_tables(snapshot.into_iter().filter(|t| t.id == t1).collect());
        assert_eq!(book.active_table().unwrap().id, t1);
    }
}
