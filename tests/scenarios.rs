use budget_sheet::cell::ERROR_MARKER;
use budget_sheet::recalc::{RecalcMode, Recalculator};
use budget_sheet::workbook::Workbook;

fn row_id(book: &Workbook, table: &str, index: usize) -> String {
    book.table(table).unwrap().rows[index].id.clone()
}

fn value(book: &Workbook, table: &str, col: usize, row: usize) -> String {
    book.table(table)
        .unwrap()
        .cell_at(col, row)
        .unwrap()
        .value
        .clone()
}

fn set(book: &mut Workbook, table: &str, col: usize, row: usize, raw: &str) {
    let row_id = row_id(book, table, row);
    book.set_cell(table, &row_id, col, raw).unwrap();
}

#[test]
fn sum_follows_edits_after_one_set_cell() {
    for mode in [RecalcMode::Dependency, RecalcMode::Iterative] {
        let mut book = Workbook::new(Recalculator::new(mode, 10));
        let t = book.create_table(3, 3).unwrap().id.clone();
        set(&mut book, &t, 0, 0, "10");
        set(&mut book, &t, 0, 1, "20");
        set(&mut book, &t, 0, 2, "=SUM(A1:A2)");
        assert_eq!(value(&book, &t, 0, 2), "30");

        set(&mut book, &t, 0, 0, "15");
        assert_eq!(value(&book, &t, 0, 2), "35", "{:?}", mode);
    }
}

#[test]
fn malformed_formula_is_contained() {
    let mut book = Workbook::default();
    let t = book.create_table(3, 3).unwrap().id.clone();
    set(&mut book, &t, 0, 0, "4");
    set(&mut book, &t, 1, 0, "=A1*2");
    set(&mut book, &t, 2, 0, "=A1+");

    assert_eq!(value(&book, &t, 2, 0), ERROR_MARKER);
    assert_eq!(value(&book, &t, 1, 0), "8");

    set(&mut book, &t, 0, 0, "5");
    assert_eq!(value(&book, &t, 1, 0), "10");
    assert_eq!(value(&book, &t, 2, 0), ERROR_MARKER);
    // The raw text is kept so the user can fix it.
    let cell = book.table(&t).unwrap().cell_at(2, 0).unwrap();
    assert_eq!(cell.formula.as_deref(), Some("=A1+"));
}

#[test]
fn cross_table_reference_by_name_and_by_id() {
    let mut book = Workbook::default();
    let rent = book.create_table(1, 1).unwrap().id.clone();
    assert!(book.rename_table(&rent, "Rent"));
    let budget = book.create_table(1, 2).unwrap().id.clone();
    assert!(book.rename_table(&budget, "Budget"));

    set(&mut book, &rent, 0, 0, "500");
    set(&mut book, &budget, 1, 0, "=Rent.A1*2");
    set(&mut book, &budget, 0, 0, &format!("={}.A1*3", rent));
    assert_eq!(value(&book, &budget, 1, 0), "1000");
    assert_eq!(value(&book, &budget, 0, 0), "1500");

    // Names are looked up each time; the old name no longer resolves.
    assert!(book.rename_table(&rent, "Housing"));
    // Structural edits leave values alone until the next recalculation.
    assert_eq!(value(&book, &budget, 1, 0), "1000");
    book.recalculate();
    assert_eq!(value(&book, &budget, 1, 0), "0");
    assert_eq!(value(&book, &budget, 0, 0), "1500");

    set(&mut book, &rent, 0, 0, "600");
    assert_eq!(value(&book, &budget, 0, 0), "1800");
}

#[test]
fn category_thresholds() {
    let mut book = Workbook::default();
    let t = book.create_table(1, 1).unwrap().id.clone();
    let cat = book.add_category(&t, "Food", "500", "80").unwrap();
    assert!(book.set_category_spent(&t, &cat, 450.0));

    let c = book.table(&t).unwrap().category(&cat).unwrap();
    assert_eq!(c.percentage(), 90.0);
    assert!(c.is_near_limit());
    assert!(!c.is_over_budget());

    book.set_category_spent(&t, &cat, 600.0);
    let c = book.table(&t).unwrap().category(&cat).unwrap();
    assert!(c.is_over_budget());
}

#[test]
fn deleting_a_column_leaves_the_others_alone() {
    let mut book = Workbook::default();
    let t = book.create_table(2, 3).unwrap().id.clone();
    set(&mut book, &t, 0, 0, "a");
    set(&mut book, &t, 1, 0, "b");
    set(&mut book, &t, 2, 0, "c");
    set(&mut book, &t, 2, 1, "z");

    assert!(book.delete_column(&t, 1));
    let table = book.table(&t).unwrap();
    assert_eq!(table.headers, vec!["Column 1", "Column 3"]);
    for row in &table.rows {
        assert!(row.cell("Column 2").is_none());
        assert_eq!(row.cells.len(), 2);
    }
    assert_eq!(table.cell_at(0, 0).unwrap().value, "a");
    assert_eq!(table.cell_at(1, 0).unwrap().value, "c");
    assert_eq!(table.cell_at(1, 1).unwrap().value, "z");
}

#[test]
fn circular_reference_stops_at_the_cap() {
    let mut book = Workbook::new(Recalculator::new(RecalcMode::Iterative, 10));
    let t = book.create_table(1, 2).unwrap().id.clone();
    let row = row_id(&book, &t, 0);
    book.set_cell(&t, &row, 0, "=B1+1").unwrap();
    let outcome = book.set_cell(&t, &row, 1, "=A1+1").unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.passes, 10);
    // Values stay finite and are left wherever the last pass put them.
    assert!(value(&book, &t, 0, 0).parse::<f64>().is_ok());
}
