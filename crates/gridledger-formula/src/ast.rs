use std::collections::HashSet;
use std::fmt;

use gridledger_core::{col_to_label, Val};

use crate::sheet::Sheet;

/// Bounds the depth of recursive evaluation and rebasing so that a
/// pathologically deep (but acyclic) formula cannot overflow the native
/// stack. Reaching the budget is reported the same way a cycle is: `Empty`.
pub const MAX_EVAL_DEPTH: u32 = 4096;

/// The expression tree. A closed sum type: one variant per operator kind,
/// each owning its children outright. There is no shared/virtual dispatch —
/// `evaluate`, `rebase`, `render` and `collect_refs` are exhaustive matches
/// over this enum, so the compiler enforces completeness whenever a variant
/// is added.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value. Never `Val::Empty` — an empty literal has no
    /// useful formula representation, so `set` stores bare emptiness as a
    /// cell with no expression at all (see `Cell`).
    Literal(Val),
    /// A cell reference, storing the absolute target coordinates plus the
    /// per-axis absoluteness flags that govern rebasing (§4.3), and the
    /// origin `(row, col)` of the cell the reference was parsed for. The
    /// origin is retained only for round-trip provenance; evaluation never
    /// reads it.
    Reference {
        row: u32,
        col: u32,
        row_abs: bool,
        col_abs: bool,
        origin_row: u32,
        origin_col: u32,
    },
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates the tree against `sheet`. References recurse into
    /// `sheet.value_at`, which is only safe to call because the sheet has
    /// already run its cycle precheck (§4.6) before the top-level call;
    /// this method does not repeat that precheck.
    pub fn evaluate(&self, sheet: &Sheet) -> Val {
        self.evaluate_depth(sheet, 0)
    }

    /// Continues evaluation at an already-established recursion `depth`.
    /// Only the sheet (whose references recurse back into each other) needs
    /// this; external callers should use [`Expr::evaluate`].
    pub(crate) fn evaluate_depth_pub(&self, sheet: &Sheet, depth: u32) -> Val {
        self.evaluate_depth(sheet, depth)
    }

    fn evaluate_depth(&self, sheet: &Sheet, depth: u32) -> Val {
        if depth > MAX_EVAL_DEPTH {
            return Val::Empty;
        }
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Reference { row, col, .. } => sheet.value_at(*row, *col, depth + 1),
            Expr::Neg(e) => match e.evaluate_depth(sheet, depth + 1) {
                Val::Number(n) => Val::Number(-n),
                _ => Val::Empty,
            },
            Expr::Add(l, r) => {
                let lv = l.evaluate_depth(sheet, depth + 1);
                let rv = r.evaluate_depth(sheet, depth + 1);
                add(lv, rv)
            }
            Expr::Sub(l, r) => numeric_op(l, r, sheet, depth, |a, b| a - b),
            Expr::Mul(l, r) => numeric_op(l, r, sheet, depth, |a, b| a * b),
            Expr::Div(l, r) => {
                let lv = l.evaluate_depth(sheet, depth + 1);
                let rv = r.evaluate_depth(sheet, depth + 1);
                match (lv, rv) {
                    (Val::Number(_), Val::Number(b)) if b == 0.0 => Val::Empty,
                    (Val::Number(a), Val::Number(b)) => Val::Number(a / b),
                    _ => Val::Empty,
                }
            }
            Expr::Pow(l, r) => numeric_op(l, r, sheet, depth, |a, b| a.powf(b)),
            Expr::Eq(l, r) => compare(l, r, sheet, depth, |o| o == std::cmp::Ordering::Equal),
            Expr::Ne(l, r) => compare(l, r, sheet, depth, |o| o != std::cmp::Ordering::Equal),
            Expr::Lt(l, r) => compare(l, r, sheet, depth, |o| o == std::cmp::Ordering::Less),
            Expr::Le(l, r) => compare(l, r, sheet, depth, |o| o != std::cmp::Ordering::Greater),
            Expr::Gt(l, r) => compare(l, r, sheet, depth, |o| o == std::cmp::Ordering::Greater),
            Expr::Ge(l, r) => compare(l, r, sheet, depth, |o| o != std::cmp::Ordering::Less),
        }
    }

    /// Produces a new tree with every non-absolute reference coordinate
    /// shifted by `(dr, dc)`; absolute coordinates are left untouched.
    /// Never fails and never drops references — this is a copy/paste
    /// rebase, not an insert/delete shift, so there is no "reference fell
    /// off the edge" case to report.
    pub fn rebase(&self, dr: i64, dc: i64) -> Expr {
        match self {
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Reference {
                row,
                col,
                row_abs,
                col_abs,
                origin_row,
                origin_col,
            } => Expr::Reference {
                row: shift(*row, *row_abs, dr),
                col: shift(*col, *col_abs, dc),
                row_abs: *row_abs,
                col_abs: *col_abs,
                origin_row: *origin_row,
                origin_col: *origin_col,
            },
            Expr::Neg(e) => Expr::Neg(Box::new(e.rebase(dr, dc))),
            Expr::Add(l, r) => Expr::Add(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Sub(l, r) => Expr::Sub(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Mul(l, r) => Expr::Mul(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Div(l, r) => Expr::Div(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Pow(l, r) => Expr::Pow(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Eq(l, r) => Expr::Eq(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Ne(l, r) => Expr::Ne(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Lt(l, r) => Expr::Lt(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Le(l, r) => Expr::Le(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Gt(l, r) => Expr::Gt(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
            Expr::Ge(l, r) => Expr::Ge(Box::new(l.rebase(dr, dc)), Box::new(r.rebase(dr, dc))),
        }
    }

    /// Collects every position statically referenced anywhere in the tree
    /// (deduplicated). Used by the sheet's cycle precheck, which only cares
    /// about the static reference graph, not runtime values.
    pub fn collect_refs(&self, out: &mut HashSet<(u32, u32)>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference { row, col, .. } => {
                out.insert((*row, *col));
            }
            Expr::Neg(e) => e.collect_refs(out),
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::Pow(l, r)
            | Expr::Eq(l, r)
            | Expr::Ne(l, r)
            | Expr::Lt(l, r)
            | Expr::Le(l, r)
            | Expr::Gt(l, r)
            | Expr::Ge(l, r) => {
                l.collect_refs(out);
                r.collect_refs(out);
            }
        }
    }
}

/// Shifts a non-absolute coordinate by `offset`. A coordinate that would
/// fall to zero or below is clamped to `0` rather than `1`: `Pos::parse`
/// never produces row/col `0` (§3.1), so a reference left at `0` can never
/// alias a real cell and correctly evaluates to `Val::Empty` via a sheet
/// lookup miss, instead of silently aliasing `1` — a real, addressable
/// position.
fn shift(coord: u32, is_abs: bool, offset: i64) -> u32 {
    if is_abs {
        coord
    } else {
        (coord as i64 + offset).max(0) as u32
    }
}

fn add(lv: Val, rv: Val) -> Val {
    match (&lv, &rv) {
        (Val::Empty, _) | (_, Val::Empty) => Val::Empty,
        (Val::Number(a), Val::Number(b)) => Val::Number(a + b),
        (Val::Text(_), _) | (_, Val::Text(_)) => Val::Text(format!("{lv}{rv}")),
    }
}

fn numeric_op(
    l: &Expr,
    r: &Expr,
    sheet: &Sheet,
    depth: u32,
    f: impl FnOnce(f64, f64) -> f64,
) -> Val {
    let lv = l.evaluate_depth(sheet, depth + 1);
    let rv = r.evaluate_depth(sheet, depth + 1);
    match (lv, rv) {
        (Val::Number(a), Val::Number(b)) => Val::Number(f(a, b)),
        _ => Val::Empty,
    }
}

fn compare(
    l: &Expr,
    r: &Expr,
    sheet: &Sheet,
    depth: u32,
    pass: impl FnOnce(std::cmp::Ordering) -> bool,
) -> Val {
    let lv = l.evaluate_depth(sheet, depth + 1);
    let rv = r.evaluate_depth(sheet, depth + 1);
    let ordering = match (&lv, &rv) {
        (Val::Number(a), Val::Number(b)) => a.partial_cmp(b),
        (Val::Text(a), Val::Text(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ordering {
        Some(o) => Val::Number(if pass(o) { 1.0 } else { 0.0 }),
        None => Val::Empty,
    }
}

/// Renders the tree as fully parenthesized canonical infix text, usable as
/// the right-hand side of a formula (callers prefix `=`). Spacing and
/// parenthesization are an implementation choice — the save format does
/// not promise byte-identical round-trips, only value-identical ones
/// (§9).
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Val::Number(n)) => write!(f, "{n}"),
            Expr::Literal(Val::Text(s)) => write!(f, "{s}"),
            Expr::Literal(Val::Empty) => Ok(()),
            Expr::Reference {
                row,
                col,
                row_abs,
                col_abs,
                ..
            } => {
                if *col_abs {
                    write!(f, "$")?;
                }
                write!(f, "{}", col_to_label(*col))?;
                if *row_abs {
                    write!(f, "$")?;
                }
                write!(f, "{row}")
            }
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::Add(l, r) => write!(f, "({l}+{r})"),
            Expr::Sub(l, r) => write!(f, "({l}-{r})"),
            Expr::Mul(l, r) => write!(f, "({l}*{r})"),
            Expr::Div(l, r) => write!(f, "({l}/{r})"),
            Expr::Pow(l, r) => write!(f, "{l}^{r}"),
            Expr::Eq(l, r) => write!(f, "{l}={r}"),
            Expr::Ne(l, r) => write!(f, "{l}<>{r}"),
            Expr::Lt(l, r) => write!(f, "{l}<{r}"),
            Expr::Le(l, r) => write!(f, "{l}<={r}"),
            Expr::Gt(l, r) => write!(f, "{l}>{r}"),
            Expr::Ge(l, r) => write!(f, "{l}>={r}"),
        }
    }
}
