//! Formula micro-language.
//!
//! A formula is `=` followed by an arithmetic expression over numbers,
//! `+ - * / ( )`, cell references and three aggregate functions:
//!
//! ```text
//! =A1+B1            same-table reference
//! =Rent.A1*2        cross-table reference (table id or display name)
//! =SUM(A1:A5)       also AVERAGE(range) and COUNT(range)
//! ```
//!
//! Text is tokenized and parsed into an [`Expr`] tree, then evaluated
//! against a read-only view of the workbook. Nothing is ever executed as
//! code. Evaluation never mutates tables.

use crate::cell::{ERROR_MARKER, FORMULA_SIGIL};
use crate::numeric::{format_number, parse_leading, parse_strict, safe_divide};
use crate::table::{Coordinate, Table};
use log::debug;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

const MAX_NESTING: usize = 128;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula must start with `=`")]
    MissingSigil,
    #[error("empty expression")]
    Empty,
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("unexpected `{0}`")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("`{0}` is not a cell reference")]
    UnknownName(String),
    #[error("function argument must be a range like A1:B3")]
    BadRange,
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("result is not a finite number")]
    NotANumber,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Word(String),
    Dot,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Word(w) => w.clone(),
            Token::Dot => ".".into(),
            Token::Colon => ":".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                // Table names may start with digits: `2024.A1`, `2024Budget.A1`.
                let word = word_end(src, start);
                let names_table = src[word..]
                    .strip_prefix('.')
                    .is_some_and(|rest| rest.starts_with(|n: char| n.is_ascii_alphabetic()));
                if names_table || number_end(src, start) < word {
                    advance_to(&mut chars, word);
                    tokens.push(Token::Word(src[start..word].to_string()));
                } else {
                    tokens.push(Token::Number(lex_number(src, &mut chars, start)?));
                }
            }
            '.' => {
                let next_is_digit = src[start + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit());
                if next_is_digit {
                    tokens.push(Token::Number(lex_number(src, &mut chars, start)?));
                } else {
                    chars.next();
                    tokens.push(Token::Dot);
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = word_end(src, start);
                advance_to(&mut chars, end);
                tokens.push(Token::Word(src[start..end].to_string()));
            }
            _ => {
                chars.next();
                tokens.push(match c {
                    ':' => Token::Colon,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => return Err(FormulaError::UnexpectedChar(other)),
                });
            }
        }
    }
    Ok(tokens)
}

/// End of the `[A-Za-z0-9_]` run starting at `start`.
fn word_end(src: &str, start: usize) -> usize {
    src[start..]
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map_or(src.len(), |i| start + i)
}

/// End of the numeric literal starting at `start`.
fn number_end(src: &str, start: usize) -> usize {
    let mut end = start;
    let mut seen_dot = false;
    for c in src[start..].chars() {
        if c.is_ascii_digit() || (c == '.' && !seen_dot) {
            seen_dot |= c == '.';
            end += 1;
        } else {
            break;
        }
    }

    // Optional exponent, only consumed when digits follow.
    let mut exp = src[end..].chars();
    if matches!(exp.next(), Some('e' | 'E')) {
        let mut len = 1;
        let mut after = exp.clone();
        if matches!(after.next(), Some('+' | '-')) {
            exp = after;
            len += 1;
        }
        let digits = exp.take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            end += len + digits;
        }
    }
    end
}

fn advance_to(chars: &mut Peekable<CharIndices<'_>>, end: usize) {
    while chars.next_if(|&(i, _)| i < end).is_some() {}
}

fn lex_number(
    src: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    start: usize,
) -> Result<f64, FormulaError> {
    let end = number_end(src, start);
    advance_to(chars, end);
    src[start..end]
        .parse::<f64>()
        .map_err(|_| FormulaError::UnexpectedToken(src[start..end].to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sum,
    Average,
    Count,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SUM" => Some(Function::Sum),
            "AVERAGE" => Some(Function::Average),
            "COUNT" => Some(Function::Count),
            _ => None,
        }
    }
}

/// Inclusive rectangle in the formula's own table. Corners may be given in
/// any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Coordinate,
    pub end: Coordinate,
}

impl Range {
    pub fn coordinates(self) -> impl Iterator<Item = Coordinate> {
        let (r0, r1) = min_max(self.start.row, self.end.row);
        let (c0, c1) = min_max(self.start.col, self.end.col);
        (r0..=r1).flat_map(move |row| (c0..=c1).map(move |col| Coordinate::new(col, row)))
    }
}

fn min_max(a: usize, b: usize) -> (usize, usize) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Local(Coordinate),
    Foreign { table: String, coord: Coordinate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ref(Reference),
    Call(Function, Range),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, want: Token) -> Result<(), FormulaError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(FormulaError::UnexpectedToken(t.describe())),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(FormulaError::TooDeep);
        }
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(Token::Minus) | Some(Token::Plus) => {
                let negate = self.next() == Some(Token::Minus);
                self.depth += 1;
                if self.depth > MAX_NESTING {
                    return Err(FormulaError::TooDeep);
                }
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(if negate { Expr::Neg(Box::new(inner)) } else { inner })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(word)) => match self.peek() {
                Some(Token::LParen) => {
                    let func = Function::from_name(&word)
                        .ok_or_else(|| FormulaError::UnknownFunction(word.clone()))?;
                    self.pos += 1;
                    let range = self.range()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(func, range))
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let coord = self.coordinate()?;
                    Ok(Expr::Ref(Reference::Foreign { table: word, coord }))
                }
                _ => Coordinate::parse(&word)
                    .map(|c| Expr::Ref(Reference::Local(c)))
                    .ok_or(FormulaError::UnknownName(word)),
            },
            Some(t) => Err(FormulaError::UnexpectedToken(t.describe())),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn coordinate(&mut self) -> Result<Coordinate, FormulaError> {
        match self.next() {
            Some(Token::Word(w)) => Coordinate::parse(&w).ok_or(FormulaError::UnknownName(w)),
            Some(t) => Err(FormulaError::UnexpectedToken(t.describe())),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn range(&mut self) -> Result<Range, FormulaError> {
        let start = self.coordinate().map_err(|_| FormulaError::BadRange)?;
        self.expect(Token::Colon).map_err(|_| FormulaError::BadRange)?;
        let end = self.coordinate().map_err(|_| FormulaError::BadRange)?;
        Ok(Range { start, end })
    }
}

/// A parsed formula, ready to evaluate against any workbook state.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub expr: Expr,
}

impl Formula {
    /// Parse formula text including the leading `=`.
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let body = text
            .strip_prefix(FORMULA_SIGIL)
            .ok_or(FormulaError::MissingSigil)?;
        let tokens = tokenize(body)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.next() {
            return Err(FormulaError::UnexpectedToken(extra.describe()));
        }
        Ok(Formula { expr })
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<f64, FormulaError> {
        let n = ctx.eval(&self.expr);
        if n.is_finite() {
            Ok(n)
        } else {
            Err(FormulaError::NotANumber)
        }
    }

    /// Every existing cell this formula reads, in reading order.
    pub fn references(&self, ctx: &EvalContext<'_>) -> Vec<CellAddress> {
        let mut out = Vec::new();
        ctx.collect(&self.expr, &mut out);
        out
    }
}

/// Resolved address of a cell inside a table slice: table index plus a
/// positional coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub table: usize,
    pub coord: Coordinate,
}

/// Read-only view used while evaluating: all tables plus the table the
/// formula lives in.
pub struct EvalContext<'a> {
    tables: &'a [Table],
    current: Option<usize>,
}

impl<'a> EvalContext<'a> {
    pub fn new(tables: &'a [Table], current_table_id: &str) -> Self {
        EvalContext {
            tables,
            current: tables.iter().position(|t| t.id == current_table_id),
        }
    }

    fn resolve(&self, reference: &Reference) -> Option<CellAddress> {
        let (table, coord) = match reference {
            Reference::Local(coord) => (self.current?, *coord),
            Reference::Foreign { table, coord } => {
                let index = self
                    .tables
                    .iter()
                    .position(|t| t.id == *table)
                    .or_else(|| self.tables.iter().position(|t| t.answers_to(table)))?;
                (index, *coord)
            }
        };
        self.tables[table].cell_at_coord(coord)?;
        Some(CellAddress { table, coord })
    }

    fn value_of(&self, reference: &Reference) -> f64 {
        self.resolve(reference)
            .and_then(|addr| self.tables[addr.table].cell_at_coord(addr.coord))
            .and_then(|cell| parse_strict(&cell.value))
            .unwrap_or(0.0)
    }

    fn range_cells(&self, range: &Range) -> Vec<(Coordinate, &'a str)> {
        let tables: &'a [Table] = self.tables;
        let Some(table) = self.current.map(|i| &tables[i]) else {
            return Vec::new();
        };
        if table.rows.is_empty() || table.headers.is_empty() {
            return Vec::new();
        }
        // Clip to the table so an oversized range stays cheap.
        let clipped = Range {
            start: Coordinate::new(
                range.start.col.min(table.headers.len() - 1),
                range.start.row.min(table.rows.len() - 1),
            ),
            end: Coordinate::new(
                range.end.col.min(table.headers.len() - 1),
                range.end.row.min(table.rows.len() - 1),
            ),
        };
        let outside = |c: usize, r: usize| {
            let (r0, r1) = min_max(range.start.row, range.end.row);
            let (c0, c1) = min_max(range.start.col, range.end.col);
            r < r0 || r > r1 || c < c0 || c > c1
        };
        clipped
            .coordinates()
            .filter(|coord| !outside(coord.col, coord.row))
            .filter_map(|coord| {
                table
                    .cell_at_coord(coord)
                    .map(|cell| (coord, cell.value.as_str()))
            })
            .collect()
    }

    fn sum(&self, range: &Range) -> f64 {
        self.range_cells(range)
            .into_iter()
            .map(|(_, v)| parse_leading(v).unwrap_or(0.0))
            .sum()
    }

    fn count(&self, range: &Range) -> f64 {
        self.range_cells(range)
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .count() as f64
    }

    fn eval(&self, expr: &Expr) -> f64 {
        match expr {
            Expr::Number(n) => *n,
            Expr::Ref(r) => self.value_of(r),
            Expr::Call(Function::Sum, range) => self.sum(range),
            Expr::Call(Function::Average, range) => safe_divide(self.sum(range), self.count(range)),
            Expr::Call(Function::Count, range) => self.count(range),
            Expr::Neg(inner) => -self.eval(inner),
            Expr::Binary(op, lhs, rhs) => {
                let (a, b) = (self.eval(lhs), self.eval(rhs));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                }
            }
        }
    }

    fn collect(&self, expr: &Expr, out: &mut Vec<CellAddress>) {
        match expr {
            Expr::Number(_) => {}
            Expr::Ref(r) => out.extend(self.resolve(r)),
            Expr::Call(_, range) => {
                if let Some(table) = self.current {
                    out.extend(
                        self.range_cells(range)
                            .into_iter()
                            .map(|(coord, _)| CellAddress { table, coord }),
                    );
                }
            }
            Expr::Neg(inner) => self.collect(inner, out),
            Expr::Binary(_, lhs, rhs) => {
                self.collect(lhs, out);
                self.collect(rhs, out);
            }
        }
    }
}

/// Turn raw cell input into its display value.
///
/// Input without the `=` sigil comes back unchanged. A formula that fails to
/// parse, or whose result is not a finite number, displays as `#ERROR`.
pub fn evaluate(input: &str, table_id: &str, tables: &[Table]) -> String {
    if !input.starts_with(FORMULA_SIGIL) {
        return input.to_string();
    }
    let ctx = EvalContext::new(tables, table_id);
    let result = Formula::parse(input).and_then(|f| f.evaluate(&ctx));
    match result.map(format_number) {
        Ok(Some(display)) => display,
        Ok(None) => ERROR_MARKER.to_string(),
        Err(e) => {
            debug!("formula `{}` in table {}: {}", input, table_id, e);
            ERROR_MARKER.to_string()
        }
    }
}
