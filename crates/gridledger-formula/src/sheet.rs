use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, Write};

use gridledger_core::{col_to_label, Pos, Val};

use crate::ast::{Expr, MAX_EVAL_DEPTH};
use crate::builder::Builder;
use crate::cell::Cell;
use crate::parsing;

/// Advertises that this implementation tolerates (rather than forbids)
/// dependency cycles, per §6.3. The other bits are defined by the
/// specification for implementations that add the matching feature; this
/// core implements none of them.
pub const CAP_CYCLIC_DEPS: u32 = 0x01;
pub const CAP_FUNCTIONS: u32 = 0x02;
pub const CAP_FILE_IO: u32 = 0x04;
pub const CAP_SPEED: u32 = 0x08;
pub const CAP_PARSER: u32 = 0x10;

/// The owning container: a sparse mapping from [`Pos`] to [`Cell`].
///
/// Storage is a `BTreeMap` rather than a `HashMap` so that `save` iterates
/// cells in a deterministic, reproducible order (row-major by `(row,
/// col)`) without needing a separate sort pass; semantics never depend on
/// this ordering, only save-file determinism does (§3.5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    cells: BTreeMap<Pos, Cell>,
}

impl Sheet {
    pub fn new() -> Self {
        Sheet {
            cells: BTreeMap::new(),
        }
    }

    /// Returns the bitmask of optional capabilities this implementation
    /// advertises. This core only tolerates cycles; it does not implement
    /// functions, file I/O beyond the byte-stream save/load already
    /// described, a speed guarantee, or an alternate parser.
    pub fn capabilities(&self) -> u32 {
        CAP_CYCLIC_DEPS
    }

    /// Sets the contents of `pos` from raw input text, per §4.7.
    ///
    /// - Empty text stores `Val::Empty`.
    /// - Text beginning with `=` is parsed as a formula; success stores
    ///   the tree and original text, failure clears the cell and returns
    ///   `false`.
    /// - Otherwise a full-string decimal parse is attempted; success
    ///   stores `Number`, failure stores `Text` verbatim.
    pub fn set(&mut self, pos: Pos, text: &str) -> bool {
        if text.is_empty() {
            self.cells.entry(pos).or_default().set_literal(Val::Empty);
            return true;
        }

        if text.starts_with('=') {
            let mut builder = Builder::new();
            builder.set_origin(pos.row, pos.col);
            return match parsing::parse_into(text, &mut builder) {
                Ok(()) => {
                    let expr = builder.finish();
                    self.cells
                        .entry(pos)
                        .or_default()
                        .set_formula(expr, text.to_string());
                    true
                }
                Err(_) => {
                    self.cells.entry(pos).or_default().clear();
                    false
                }
            };
        }

        if let Ok(n) = text.parse::<f64>() {
            self.cells.entry(pos).or_default().set_literal(Val::Number(n));
        } else {
            self.cells
                .entry(pos)
                .or_default()
                .set_literal(Val::Text(text.to_string()));
        }
        true
    }

    /// Looks up the current value of `pos`. Never mutates the sheet and
    /// never panics: a missing cell, a dependency cycle reachable from
    /// `pos`, or a runaway recursion depth all yield `Val::Empty` (§4.6,
    /// §5).
    pub fn get(&self, pos: Pos) -> Val {
        if self.has_cycle_from(pos) {
            return Val::Empty;
        }
        self.value_at(pos.row, pos.col, 0)
    }

    /// Looks up the value at `(row, col)` without running the cycle
    /// precheck. Only safe to call once the caller (either `get`, or an
    /// `Expr::Reference` recursing from an already-prechecked `get`) has
    /// established the active subgraph is cycle-free.
    pub(crate) fn value_at(&self, row: u32, col: u32, depth: u32) -> Val {
        if depth > MAX_EVAL_DEPTH {
            return Val::Empty;
        }
        match self.cells.get(&Pos::new(row, col)) {
            None => Val::Empty,
            // depth 0 is the top-level call from `get`: route it through
            // the public `Expr::evaluate` entry point rather than the
            // depth-threaded helper, since there is no prior depth to
            // resume from.
            Some(cell) => match cell.expr() {
                Some(expr) if depth == 0 => expr.evaluate(self),
                Some(expr) => expr.evaluate_depth_pub(self, depth),
                None => cell.literal_value().clone(),
            },
        }
    }

    fn has_cycle_from(&self, pos: Pos) -> bool {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        self.detect_cycle((pos.row, pos.col), &mut visited, &mut on_stack, 0)
    }

    fn detect_cycle(
        &self,
        pos: (u32, u32),
        visited: &mut HashSet<(u32, u32)>,
        on_stack: &mut HashSet<(u32, u32)>,
        depth: u32,
    ) -> bool {
        if depth > MAX_EVAL_DEPTH {
            return true;
        }
        if on_stack.contains(&pos) {
            return true;
        }
        if visited.contains(&pos) {
            return false;
        }
        visited.insert(pos);
        on_stack.insert(pos);

        if let Some(cell) = self.cells.get(&Pos::new(pos.0, pos.1)) {
            if let Some(expr) = cell.expr() {
                let mut refs = HashSet::new();
                expr.collect_refs(&mut refs);
                for r in refs {
                    if self.detect_cycle(r, visited, on_stack, depth + 1) {
                        return true;
                    }
                }
            }
        }

        on_stack.remove(&pos);
        false
    }

    /// Copies a `w`-wide by `h`-tall rectangle from `src` to `dst`,
    /// rebasing every reference in every copied formula by
    /// `dst - src` (§4.5). Reads the whole source rectangle into a
    /// staging buffer before writing any destination cell, so overlapping
    /// source/destination rectangles behave identically to a copy through
    /// a temporary area. A source position with no cell becomes an
    /// explicit `Empty` destination cell, shadowing whatever was there
    /// before.
    pub fn copy_rect(&mut self, dst: Pos, src: Pos, w: u32, h: u32) {
        let dr = dst.row as i64 - src.row as i64;
        let dc = dst.col as i64 - src.col as i64;

        let mut staging = Vec::with_capacity((w as usize) * (h as usize));
        for i in 0..h {
            for j in 0..w {
                let source_pos = Pos::new(src.row + i, src.col + j);
                let dest_pos = Pos::new(dst.row + i, dst.col + j);
                let cell = match self.cells.get(&source_pos) {
                    Some(cell) => match cell.expr() {
                        Some(expr) => {
                            let rebased = expr.rebase(dr, dc);
                            let text = format!("={rebased}");
                            Cell::formula(rebased, text)
                        }
                        None => Cell::literal(cell.literal_value().clone()),
                    },
                    None => Cell::empty(),
                };
                staging.push((dest_pos, cell));
            }
        }

        for (pos, cell) in staging {
            self.cells.insert(pos, cell);
        }
    }

    /// Writes every cell as a `<COL_LETTERS>|<ROW_DIGITS>|<PAYLOAD>` line
    /// (§6.3). Returns `false` on the first write failure.
    pub fn save(&self, out: &mut impl Write) -> bool {
        for (pos, cell) in &self.cells {
            let payload = match cell.expr() {
                Some(_) => cell.formula_text().to_string(),
                None => cell.literal_value().to_string(),
            };
            if writeln!(out, "{}|{}|{}", col_to_label(pos.col), pos.row, payload).is_err() {
                return false;
            }
        }
        true
    }

    /// Clears the sheet, then loads each non-blank line written by
    /// [`Sheet::save`]. A line is split on its first two `|` characters so
    /// that any further `|` in the payload is preserved verbatim. Any I/O
    /// error (including invalid UTF-8) or unparsable position aborts the
    /// load and returns `false`, leaving the sheet in an unspecified
    /// partial state (§6.3).
    pub fn load(&mut self, input: impl BufRead) -> bool {
        self.cells.clear();

        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => return false,
            };
            if line.is_empty() {
                continue;
            }

            let mut parts = line.splitn(3, '|');
            let (Some(col_part), Some(row_part), Some(payload)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return false;
            };

            let label = format!("{col_part}{row_part}");
            let pos = match Pos::parse(&label) {
                Ok(pos) => pos,
                Err(_) => return false,
            };

            self.set(pos, payload);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(label: &str) -> Pos {
        Pos::parse(label).unwrap()
    }

    #[test]
    fn set_and_get_literal_values() {
        let mut sheet = Sheet::new();
        assert!(sheet.set(pos("A1"), "10"));
        assert_eq!(sheet.get(pos("A1")), Val::Number(10.0));

        assert!(sheet.set(pos("A2"), "hello"));
        assert_eq!(sheet.get(pos("A2")), Val::Text("hello".into()));

        assert!(sheet.set(pos("A3"), ""));
        assert_eq!(sheet.get(pos("A3")), Val::Empty);
    }

    #[test]
    fn missing_cell_is_empty() {
        let sheet = Sheet::new();
        assert_eq!(sheet.get(pos("Z99")), Val::Empty);
    }

    #[test]
    fn failed_formula_clears_the_cell() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "42");
        assert!(!sheet.set(pos("A1"), "=1+"));
        assert_eq!(sheet.get(pos("A1")), Val::Empty);
    }

    // S1 — arithmetic and references.
    #[test]
    fn scenario_arithmetic_and_references() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "10");
        sheet.set(pos("A2"), "20.5");
        sheet.set(pos("A3"), "3e1");
        sheet.set(pos("B1"), "=A1+A2*A3");
        assert_eq!(sheet.get(pos("B1")), Val::Number(625.0));

        sheet.set(pos("A1"), "12");
        assert_eq!(sheet.get(pos("B1")), Val::Number(627.0));
    }

    // S2 — absoluteness under copy. The spec's own illustration uses a
    // row-0 position ("D0"), which is not a valid Pos under §3.1 (rows are
    // >= 1); this reproduces the same relative shape one row up so every
    // position involved is valid.
    #[test]
    fn scenario_absoluteness_under_copy() {
        let mut sheet = Sheet::new();
        sheet.set(pos("D1"), "10");
        sheet.set(pos("F11"), "=D1+5");
        sheet.set(pos("F12"), "=$D1+5");
        sheet.set(pos("F13"), "=D$1+5");
        sheet.set(pos("F14"), "=$D$1+5");
        sheet.set(pos("E2"), "70");
        sheet.set(pos("D2"), "20");
        sheet.set(pos("E1"), "60");

        sheet.copy_rect(pos("G12"), pos("F11"), 1, 4);

        assert_eq!(sheet.get(pos("G12")), Val::Number(75.0)); // D1 -> E2 = 70, +5
        assert_eq!(sheet.get(pos("G13")), Val::Number(25.0)); // $D1 -> $D2 = 20, +5
        assert_eq!(sheet.get(pos("G14")), Val::Number(65.0)); // D$1 -> E$1 = 60, +5
        assert_eq!(sheet.get(pos("G15")), Val::Number(15.0)); // $D$1 -> $D$1 = 10, +5
    }

    // S3 — overlapping copy. Copying H13..H14 down into H14..H15 means the
    // destination at H14 aliases the source needed for the second row; a
    // naive forward loop without a staging buffer would read back its own
    // just-written value instead of the original H14 contents.
    #[test]
    fn scenario_overlapping_copy_uses_a_staging_buffer() {
        let mut sheet = Sheet::new();
        sheet.set(pos("H13"), "100");
        sheet.set(pos("H14"), "1");

        sheet.copy_rect(pos("H14"), pos("H13"), 1, 2);

        assert_eq!(sheet.get(pos("H14")), Val::Number(100.0)); // copy of original H13
        assert_eq!(sheet.get(pos("H15")), Val::Number(1.0)); // copy of original H14, not the overwritten one
    }

    // A copy whose rebase offset pushes a non-absolute reference past the
    // top-left corner must make that reference miss the sheet (Empty), not
    // alias row/col 1.
    #[test]
    fn copy_past_the_edge_makes_the_rebased_reference_empty() {
        let mut sheet = Sheet::new();
        sheet.set(pos("D1"), "999");
        sheet.set(pos("Z100"), "=D1+0");

        sheet.copy_rect(pos("A1"), pos("Z100"), 1, 1);

        assert_eq!(sheet.get(pos("A1")), Val::Empty);
    }

    // S4 — cycle tolerance.
    #[test]
    fn scenario_cycle_tolerance() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "=A2");
        sheet.set(pos("A2"), "=A1");
        sheet.set(pos("A3"), "=5");

        assert_eq!(sheet.get(pos("A1")), Val::Empty);
        assert_eq!(sheet.get(pos("A2")), Val::Empty);
        assert_eq!(sheet.get(pos("A3")), Val::Number(5.0));
    }

    // S5 — string concatenation via Add.
    #[test]
    fn scenario_string_concatenation_via_add() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "hello");
        sheet.set(pos("A2"), "3");
        sheet.set(pos("B1"), "=A1+A2");

        match sheet.get(pos("B1")) {
            Val::Text(s) => assert_eq!(s, format!("hello{}", Val::Number(3.0))),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    // S6 — save/load round-trip.
    #[test]
    fn scenario_save_load_round_trip() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "10");
        sheet.set(pos("A2"), "hello");
        sheet.set(pos("B1"), "=A1+5");
        sheet.set(pos("C1"), "=A2+A1");

        let mut buf = Vec::new();
        assert!(sheet.save(&mut buf));

        let mut reloaded = Sheet::new();
        assert!(reloaded.load(buf.as_slice()));

        for p in ["A1", "A2", "B1", "C1"] {
            assert_eq!(sheet.get(pos(p)), reloaded.get(pos(p)));
        }
    }

    // S7 — corrupted load.
    #[test]
    fn scenario_corrupted_load_fails() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "10");
        sheet.set(pos("B1"), "=A1+5");

        let mut buf = Vec::new();
        sheet.save(&mut buf);

        for byte in buf.iter_mut().take(10) {
            *byte ^= 0x5A;
        }

        let mut reloaded = Sheet::new();
        assert!(!reloaded.load(buf.as_slice()));
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut sheet = Sheet::new();
        sheet.set(pos("A1"), "1");
        sheet.set(pos("B1"), "=A1+1");

        let snapshot = sheet.clone();
        sheet.set(pos("A1"), "100");

        assert_eq!(snapshot.get(pos("B1")), Val::Number(2.0));
        assert_eq!(sheet.get(pos("B1")), Val::Number(101.0));
    }

    #[test]
    fn capabilities_advertise_only_cyclic_deps() {
        assert_eq!(Sheet::new().capabilities(), CAP_CYCLIC_DEPS);
    }
}
