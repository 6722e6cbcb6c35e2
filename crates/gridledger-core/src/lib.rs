//! Position, value and error primitives shared by the gridledger spreadsheet
//! engine. This crate has no notion of formulas or sheets — it only fixes
//! the coordinate system (`Pos`) and the value domain (`Val`) that the
//! `gridledger-formula` crate builds its expression tree and sheet on top
//! of.

mod error;
mod pos;
mod value;

pub use error::PosError;
pub use pos::{col_from_label, col_to_label, Pos};
pub use value::Val;
