//! Bring every formula cell in a workbook to a fixed point.
//!
//! Two strategies share one contract: after a run, every formula cell shows
//! `evaluate(formula, final tables)` unless the pass cap was hit.
//!
//! * [`RecalcMode::Dependency`] builds the reference graph between formula
//!   cells and evaluates them once in topological order. Cells on a cycle,
//!   or downstream of one, fall through to the capped iteration.
//! * [`RecalcMode::Iterative`] re-evaluates every formula cell of every
//!   table, in table/row/column order, until a pass changes nothing or the
//!   cap is reached. Later cells in a pass see values written earlier in the
//!   same pass.

use crate::formula::{self, CellAddress, EvalContext, Formula};
use crate::table::{Coordinate, Table};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

pub const DEFAULT_MAX_PASSES: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcMode {
    #[default]
    Dependency,
    Iterative,
}

/// What a recalculation did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecalcOutcome {
    /// Evaluation passes run. A topological sweep counts as one.
    pub passes: usize,
    /// False when the pass cap stopped a run that was still changing.
    pub converged: bool,
    /// Cell writes performed.
    pub updated: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recalculator {
    pub mode: RecalcMode,
    pub max_passes: usize,
}

impl Default for Recalculator {
    fn default() -> Self {
        Recalculator {
            mode: RecalcMode::default(),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl Recalculator {
    pub fn new(mode: RecalcMode, max_passes: usize) -> Self {
        Recalculator {
            mode,
            max_passes: max_passes.max(1),
        }
    }

    pub fn run(&self, tables: &mut [Table]) -> RecalcOutcome {
        let cells = formula_cells(tables);
        if cells.is_empty() {
            return RecalcOutcome {
                passes: 0,
                converged: true,
                updated: 0,
            };
        }
        let outcome = match self.mode {
            RecalcMode::Iterative => self.iterate(tables, &cells),
            RecalcMode::Dependency => self.topological(tables, &cells),
        };
        if outcome.converged {
            debug!(
                "recalculated {} formula cells in {} passes ({} updates)",
                cells.len(),
                outcome.passes,
                outcome.updated
            );
        } else {
            warn!(
                "recalculation stopped after {} passes without settling",
                outcome.passes
            );
        }
        outcome
    }

    fn iterate(&self, tables: &mut [Table], cells: &[CellAddress]) -> RecalcOutcome {
        let mut outcome = RecalcOutcome::default();
        while outcome.passes < self.max_passes {
            outcome.passes += 1;
            let changed = cells
                .iter()
                .filter(|addr| refresh(tables, **addr))
                .count();
            outcome.updated += changed;
            if changed == 0 {
                outcome.converged = true;
                break;
            }
        }
        outcome
    }

    fn topological(&self, tables: &mut [Table], cells: &[CellAddress]) -> RecalcOutcome {
        let index: HashMap<CellAddress, usize> =
            cells.iter().enumerate().map(|(i, a)| (*a, i)).collect();

        // Edges run from a referenced formula cell to the cell reading it.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); cells.len()];
        let mut indegree = vec![0usize; cells.len()];
        for (i, addr) in cells.iter().enumerate() {
            let table = &tables[addr.table];
            let Some(text) = table.cell_at_coord(addr.coord).and_then(|c| c.formula.as_ref())
            else {
                continue;
            };
            let Ok(parsed) = Formula::parse(text) else {
                continue;
            };
            let ctx = EvalContext::new(tables, &table.id);
            let sources: BTreeSet<usize> = parsed
                .references(&ctx)
                .iter()
                .filter_map(|r| index.get(r).copied())
                .collect();
            for src in sources {
                dependents[src].push(i);
                indegree[i] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..cells.len()).filter(|i| indegree[*i] == 0).collect();
        let mut done = vec![false; cells.len()];
        let mut outcome = RecalcOutcome {
            passes: 1,
            converged: true,
            updated: 0,
        };
        while let Some(i) = ready.pop_front() {
            done[i] = true;
            if refresh(tables, cells[i]) {
                outcome.updated += 1;
            }
            for &next in &dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        let tangled: Vec<CellAddress> = cells
            .iter()
            .zip(&done)
            .filter(|(_, d)| !**d)
            .map(|(a, _)| *a)
            .collect();
        if !tangled.is_empty() {
            debug!("{} formula cells sit on or behind a cycle", tangled.len());
            let rest = self.iterate(tables, &tangled);
            outcome.passes += rest.passes;
            outcome.updated += rest.updated;
            outcome.converged = rest.converged;
        }
        outcome
    }
}

/// All formula cells in stable table, row, column order.
fn formula_cells(tables: &[Table]) -> Vec<CellAddress> {
    let mut out = Vec::new();
    for (t, table) in tables.iter().enumerate() {
        for (r, row) in table.rows.iter().enumerate() {
            for (c, header) in table.headers.iter().enumerate() {
                if row.cell(header).is_some_and(|cell| cell.is_formula()) {
                    out.push(CellAddress {
                        table: t,
                        coord: Coordinate::new(c, r),
                    });
                }
            }
        }
    }
    out
}

/// Re-evaluate one formula cell in place. Returns whether its value changed.
fn refresh(tables: &mut [Table], addr: CellAddress) -> bool {
    let (formula, current) = match tables[addr.table].cell_at_coord(addr.coord) {
        Some(cell) => match &cell.formula {
            Some(f) => (f.clone(), cell.value.clone()),
            None => return false,
        },
        None => return false,
    };
    let table_id = tables[addr.table].id.clone();
    let fresh = formula::evaluate(&formula, &table_id, tables);
    if fresh == current {
        return false;
    }
    if let Some(cell) = tables[addr.table].cell_at_mut(addr.coord.col, addr.coord.row) {
        cell.value = fresh;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn sheet(cells: &[(&str, usize, usize)]) -> Vec<Table> {
        let mut table = Table::create("T", 4, 3);
        table.id = "t1".into();
        for (raw, col, row) in cells {
            let cell = if raw.starts_with('=') {
                Cell::computed(raw, String::new())
            } else {
                Cell::plain(raw)
            };
            *table.cell_at_mut(*col, *row).unwrap() = cell;
        }
        vec![table]
    }

    fn value(tables: &[Table], col: usize, row: usize) -> String {
        tables[0].cell_at(col, row).unwrap().value.clone()
    }

    #[test]
    fn chain_resolves_in_one_topological_sweep() {
        // A3 depends on A2 which depends on A1; written out of order.
        let mut tables = sheet(&[("=A2*2", 0, 2), ("=A1+1", 0, 1), ("5", 0, 0)]);
        let outcome = Recalculator::default().run(&mut tables);
        assert_eq!(value(&tables, 0, 1), "6");
        assert_eq!(value(&tables, 0, 2), "12");
        assert_eq!(outcome.passes, 1);
        assert!(outcome.converged);
    }

    #[test]
    fn iterative_mode_reaches_same_fixed_point() {
        let mut tables = sheet(&[("=A2*2", 0, 0), ("=A3+1", 0, 1), ("5", 0, 2)]);
        let outcome = Recalculator::new(RecalcMode::Iterative, 10).run(&mut tables);
        assert_eq!(value(&tables, 0, 0), "12");
        assert!(outcome.converged);
        // Pass 1 reads stale A2, pass 2 fixes A1, pass 3 sees no change.
        assert_eq!(outcome.passes, 3);
    }

    #[test]
    fn second_run_changes_nothing() {
        for mode in [RecalcMode::Dependency, RecalcMode::Iterative] {
            let mut tables = sheet(&[("1", 0, 0), ("=A1+1", 1, 0), ("=B1*3", 2, 0)]);
            let recalc = Recalculator::new(mode, 10);
            recalc.run(&mut tables);
            let again = recalc.run(&mut tables);
            assert_eq!(again.updated, 0, "{:?}", mode);
            assert!(again.converged);
        }
    }

    #[test]
    fn self_reference_hits_the_cap() {
        for mode in [RecalcMode::Dependency, RecalcMode::Iterative] {
            let mut tables = sheet(&[("=A1+1", 0, 0)]);
            let outcome = Recalculator::new(mode, 10).run(&mut tables);
            assert!(!outcome.converged, "{:?}", mode);
            assert_eq!(value(&tables, 0, 0), "10");
        }
    }

    #[test]
    fn cycle_does_not_block_independent_cells() {
        let mut tables = sheet(&[
            ("=B1", 0, 0),
            ("=A1", 1, 0),
            ("7", 0, 1),
            ("=A2*2", 1, 1),
        ]);
        let outcome = Recalculator::default().run(&mut tables);
        assert_eq!(value(&tables, 1, 1), "14");
        // The two-cell cycle settles on 0 immediately.
        assert_eq!(value(&tables, 0, 0), "0");
        assert!(outcome.converged);
    }

    #[test]
    fn no_formulas_is_a_converged_no_op() {
        let mut tables = sheet(&[("1", 0, 0)]);
        let outcome = Recalculator::default().run(&mut tables);
        assert_eq!(outcome, RecalcOutcome { passes: 0, converged: true, updated: 0 });
    }
}
