/*!
# Budget Sheet

Budget tables with spreadsheet-style formulas, per-category spending limits,
and storage that follows the user from guest mode into a signed-in account.

## Architecture

### Engine Layer
- **Table Model** - Ordered tables of rows and named columns; every cell keeps
  its raw formula text next to its last computed value
- **Formula Evaluator** - Tokenizer and precedence-climbing parser over numbers,
  cell references (`B3`, `Rent.A1`), `SUM`/`AVERAGE`/`COUNT` over ranges and
  `+ - * /`; anything malformed evaluates to `#ERROR`
- **Recalculation Engine** - Topological order over formula dependencies, with
  capped iteration for cells on a cycle, or the plain capped iteration alone
- **Budget Tracker** - Category limits, alert thresholds and spending totals

### Data Persistence Layer
- **Storage Adapter** - Opaque JSON snapshots keyed by entity kind and owner
- **Local Store** - One JSON key-value file under the data directory
- **Remote Store** - Row store (fetch, replace, update, delete by id) with a
  change feed, reachable in-process or over HTTP
- **Identity Resolver** - Guest id generation and persistence, cookie fallback
- **Migration** - One-time copy of guest data into a new account
- **Archives** - Gzip-compressed bincode and JSON export/import

## Modules

- **numeric**: Division and number-parsing helpers that never yield NaN
- **cell**: Cells and rows
- **table**: Tables, A1 coordinates and column letters
- **formula**: Parsing and evaluation of formula text
- **recalc**: Fixed-point recalculation strategies
- **budget**: Category budgets and spending summaries
- **workbook**: Table collection plus the mutation API
- **storage**, **remote**, **identity**, **migration**, **sync**: persistence
- **saving**: Archive export/import
- **config**: Runtime settings from file and environment
- **login**, **http**: Accounts, sessions and the HTTP row store (`web` feature)

## Usage

```no_run
use budget_sheet::workbook::Workbook;

let mut book = Workbook::default();
let table = book.create_table(3, 2).unwrap().id.clone();
let row = book.table(&table).unwrap().rows[0].id.clone();
book.set_cell(&table, &row, 0, "100");
book.set_cell(&table, &row, 1, "=A1*2");
assert_eq!(book.cell(&table, &row, 1).unwrap().value, "200");
```
*/

pub mod budget;
pub mod cell;
pub mod config;
pub mod error;
pub mod formula;
pub mod identity;
pub mod migration;
pub mod numeric;
pub mod recalc;
pub mod remote;
pub mod saving;
pub mod storage;
pub mod sync;
pub mod table;
pub mod workbook;

#[cfg(feature = "web")]
pub mod http;
#[cfg(feature = "web")]
pub mod login;

pub use error::{ConfigError, StoreError, StoreResult};
pub use workbook::Workbook;
