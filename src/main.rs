#![cfg(not(tarpaulin_include))]

use budget_sheet::budget::{BudgetStatus, total_spending};
use budget_sheet::config::Config;
use budget_sheet::identity::{AuthenticatedUser, IdentityResolver};
use budget_sheet::numeric::parse_leading;
use budget_sheet::recalc::RecalcMode;
use budget_sheet::remote::RemoteStore;
use budget_sheet::saving;
use budget_sheet::storage::LocalStore;
use budget_sheet::sync::DataSync;
use budget_sheet::table::{Coordinate, Table, col_to_letter, letter_to_col};
use budget_sheet::workbook::Workbook;
use clap::Parser;
use log::{error, info};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "budget-sheet", about = "Budget tables with spreadsheet formulas")]
struct Args {
    /// JSON config file; BUDGET_* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the local store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use plain capped iteration instead of dependency order
    #[arg(long)]
    iterative: bool,

    /// Remote row-store server to sign in to
    #[arg(long)]
    remote: Option<String>,

    #[arg(long, requires = "remote")]
    username: Option<String>,

    #[arg(long, requires = "remote")]
    password: Option<String>,
}

const HELP: &str = "\
Commands:
  tables                       List tables
  new <rows> <cols>            Create a table and switch to it
  use <id|name>                Switch active table
  rename <name>                Rename the active table
  drop                         Delete the active table
  show                         Print the active table
  set <cell> <input>           Write a value or =formula (e.g. set B2 =A1*2)
  preview <input>              Evaluate without storing
  addrow | delrow <n>          Append or delete a row
  addcol <name> | delcol <L>   Append or delete a column
  rencol <L> <name>            Rename a column
  cat <name> <limit> [alert%]  Add a spending category
  spent <name> <amount>        Set a category's spending
  uncat <name>                 Remove a category
  cats                         Show categories
  export <path> | import <path>        Gzip archive
  export-json <path> | import-json <path>
  q                            Quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_overrides(|key| std::env::var(key).ok())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.iterative {
        config.recalc_mode = RecalcMode::Iterative;
    }
    if args.remote.is_some() {
        config.remote_url = args.remote;
    }

    let local = Arc::new(LocalStore::open(&config.data_dir, &config.scope)?);
    let identity = IdentityResolver::resolve(&local, None, None)?;
    let (remote, user) = connect(&config, &args.username, &args.password).await?;
    let mut sync = DataSync::new(local.clone(), remote, identity);
    if let Some(user) = user {
        let report = sync.sign_in(user).await?;
        if !report.is_noop() {
            println!("Moved guest data into your account: {:?}", report.migrated);
        }
    }
    info!("session owner {}", sync.owner_key());

    let mut book = sync.load_workbook(config.recalculator()).await;
    book.recalculate();
    repl(&mut book, &sync).await;
    Ok(())
}

type Connection = (Option<RemoteStore>, Option<AuthenticatedUser>);

#[cfg(feature = "web")]
async fn connect(
    config: &Config,
    username: &Option<String>,
    password: &Option<String>,
) -> Result<Connection, Box<dyn std::error::Error>> {
    use budget_sheet::http::HttpRowStore;
    let (Some(url), Some(user), Some(pass)) = (&config.remote_url, username, password) else {
        return Ok((None, None));
    };
    let store = HttpRowStore::login(url, user, pass).await?;
    let user = store.user().clone();
    Ok((Some(RemoteStore::new(Arc::new(store))), Some(user)))
}

#[cfg(not(feature = "web"))]
async fn connect(
    config: &Config,
    _username: &Option<String>,
    _password: &Option<String>,
) -> Result<Connection, Box<dyn std::error::Error>> {
    if config.remote_url.is_some() {
        eprintln!("Remote storage needs the `web` feature; staying local");
    }
    Ok((None, None))
}

fn render(table: &Table) -> String {
    let mut out = format!("{} ({})\n", table.name, table.id);
    out.push_str(&format!("{:>4} ", ""));
    for (i, header) in table.headers.iter().enumerate() {
        let letter = col_to_letter(i).unwrap_or('?');
        out.push_str(&format!("{:>14}", format!("{}:{}", letter, header)));
    }
    out.push('\n');
    for (r, row) in table.rows.iter().enumerate() {
        out.push_str(&format!("{:>4} ", r + 1));
        for header in &table.headers {
            let value = row.cell(header).map(|c| c.value.as_str()).unwrap_or("");
            out.push_str(&format!("{:>14}", value));
        }
        out.push('\n');
    }
    out.push_str(&format!("Total spending: {}", total_spending(table)));
    out
}

fn render_categories(table: &Table) -> String {
    if table.category_budgets.is_empty() {
        return "No categories".to_string();
    }
    table
        .category_budgets
        .iter()
        .map(|c| {
            let flag = match c.status() {
                BudgetStatus::Over => " OVER",
                BudgetStatus::NearLimit => " near limit",
                BudgetStatus::Ok => "",
            };
            format!(
                "{:<16} {:>10.2} / {:>10.2} ({:.1}%){}",
                c.name,
                c.spent,
                c.limit,
                c.percentage(),
                flag
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn find_table(book: &Workbook, name: &str) -> Option<String> {
    book.tables()
        .iter()
        .find(|t| t.answers_to(name))
        .map(|t| t.id.clone())
}

fn find_category(table: &Table, name: &str) -> Option<String> {
    table
        .category_budgets
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.id.clone())
}

fn column_index(arg: &str) -> Option<usize> {
    let mut chars = arg.chars();
    let col = letter_to_col(chars.next()?)?;
    chars.next().is_none().then_some(col)
}

/// Run one command. Returns the status text and whether anything changed.
fn execute(book: &mut Workbook, line: &str) -> (String, bool) {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let ok = |changed: bool| (String::from("ok"), changed);
    let active = book.active_table().map(|t| t.id.clone());

    match (cmd, active) {
        ("tables", _) => {
            for t in book.tables() {
                println!("{}  {}  {}x{}", t.id, t.name, t.rows.len(), t.headers.len());
            }
            ok(false)
        }
        ("new", _) => {
            let mut parts = rest.split_whitespace().map(|p| p.parse::<i64>().unwrap_or(0));
            let rows = parts.next().unwrap_or(0);
            let cols = parts.next().unwrap_or(0);
            match book.create_table(rows, cols) {
                Some(t) => (format!("created {}", t.name), true),
                None => (String::from("invalid dimensions"), false),
            }
        }
        ("use", _) => match find_table(book, rest) {
            Some(id) => {
                book.set_active(&id);
                ok(false)
            }
            None => (String::from("no such table"), false),
        },
        (_, None) => (String::from("no active table"), false),
        ("rename", Some(id)) => ok(book.rename_table(&id, rest)),
        ("drop", Some(id)) => ok(book.delete_table(&id)),
        ("show", Some(id)) => {
            if let Some(t) = book.table(&id) {
                println!("{}", render(t));
            }
            ok(false)
        }
        ("set", Some(id)) => {
            let (name, input) = rest.split_once(' ').unwrap_or((rest, ""));
            let Some(coord) = Coordinate::parse(name) else {
                return (String::from("invalid cell"), false);
            };
            let Some(row_id) = book
                .table(&id)
                .and_then(|t| t.rows.get(coord.row))
                .map(|r| r.id.clone())
            else {
                return (String::from("invalid cell"), false);
            };
            match book.set_cell(&id, &row_id, coord.col, input.trim()) {
                Some(outcome) if !outcome.converged => {
                    (String::from("circular reference (stopped)"), true)
                }
                Some(_) => ok(true),
                None => (String::from("invalid cell"), false),
            }
        }
        ("preview", Some(id)) => {
            println!("{}", book.preview(&id, rest));
            ok(false)
        }
        ("addrow", Some(id)) => ok(book.add_row(&id).is_some()),
        ("delrow", Some(id)) => {
            let row_id = rest
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| book.table(&id)?.rows.get(i).map(|r| r.id.clone()));
            match row_id {
                Some(row_id) => ok(book.delete_row(&id, &row_id)),
                None => (String::from("invalid row"), false),
            }
        }
        ("addcol", Some(id)) => ok(book.add_column(&id, rest)),
        ("delcol", Some(id)) => match column_index(rest) {
            Some(col) => ok(book.delete_column(&id, col)),
            None => (String::from("invalid column"), false),
        },
        ("rencol", Some(id)) => {
            let (letter, name) = rest.split_once(' ').unwrap_or((rest, ""));
            match column_index(letter) {
                Some(col) => ok(book.rename_column(&id, col, name)),
                None => (String::from("invalid column"), false),
            }
        }
        ("cat", Some(id)) => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            let (name, limit, threshold) = match parts.as_slice() {
                [name, limit] => (*name, *limit, ""),
                [name, limit, threshold] => (*name, *limit, *threshold),
                _ => return (String::from("usage: cat <name> <limit> [alert%]"), false),
            };
            match book.add_category(&id, name, limit, threshold) {
                Some(_) => ok(true),
                None => (String::from("invalid category"), false),
            }
        }
        ("spent", Some(id)) => {
            let (name, amount) = rest.split_once(' ').unwrap_or((rest, ""));
            let category = book.table(&id).and_then(|t| find_category(t, name));
            match (category, parse_leading(amount)) {
                (Some(cat), Some(amount)) => ok(book.set_category_spent(&id, &cat, amount)),
                _ => (String::from("invalid category or amount"), false),
            }
        }
        ("uncat", Some(id)) => {
            match book.table(&id).and_then(|t| find_category(t, rest)) {
                Some(cat) => ok(book.delete_category(&id, &cat)),
                None => (String::from("no such category"), false),
            }
        }
        ("cats", Some(id)) => {
            if let Some(t) = book.table(&id) {
                println!("{}", render_categories(t));
            }
            ok(false)
        }
        ("export", Some(_)) => match saving::save_tables(book.tables(), rest) {
            Ok(()) => ok(false),
            Err(e) => (e.to_string(), false),
        },
        ("export-json", Some(_)) => {
            match saving::export_json(book.tables()).and_then(|json| Ok(std::fs::write(rest, json)?)) {
                Ok(()) => ok(false),
                Err(e) => (e.to_string(), false),
            }
        }
        _ => (String::from("invalid command"), false),
    }
}

fn import(book: &mut Workbook, cmd: &str, path: &str) -> (String, bool) {
    let loaded = match cmd {
        "import" => saving::load_tables(path),
        _ => std::fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|text| saving::import_json(&text)),
    };
    match loaded {
        Ok(tables) => {
            book.replace_tables(tables);
            book.recalculate();
            (String::from("ok"), true)
        }
        Err(e) => (e.to_string(), false),
    }
}

async fn repl(book: &mut Workbook, sync: &DataSync) {
    let mut status = String::from("ok");
    let mut start_time = Instant::now();
    if let Some(t) = book.active_table() {
        println!("{}", render(t));
    }
    loop {
        print!("[{:.1}] ({}) > ", start_time.elapsed().as_secs_f64(), status);
        if io::stdout().flush().is_err() {
            break;
        }

        let mut command = String::new();
        match io::stdin().read_line(&mut command) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = command.trim();
        start_time = Instant::now();

        if command.is_empty() {
            status = String::from("invalid command");
            continue;
        }
        if command == "q" {
            break;
        }
        if command == "help" {
            println!("{}", HELP);
            continue;
        }

        let (next, changed) = match command.split_once(' ') {
            Some((cmd @ ("import" | "import-json"), path)) => import(book, cmd, path.trim()),
            _ => execute(book, command),
        };
        status = next;
        if changed {
            if let Err(e) = sync.save_workbook(book).await {
                error!("save failed: {}", e);
                status = String::from("save failed");
            }
            if let Some(t) = book.active_table() {
                println!("{}", render(t));
            }
        }
    }
}
