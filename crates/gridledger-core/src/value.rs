use std::fmt;

/// The three-way tagged value a cell can hold or evaluate to.
///
/// There is deliberately no boolean and no error variant: type mismatches,
/// missing references, division by zero and cycles all collapse to
/// [`Val::Empty`] rather than being surfaced as a distinct kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Empty,
    Number(f64),
    Text(String),
}

impl Val {
    pub fn is_empty(&self) -> bool {
        matches!(self, Val::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Val::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Val::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders a `Number` the same way in every context that needs a
/// decimal-string rendering of a double: string concatenation via `Add`
/// (§4.2) and the save-file payload for a `Number` cell (§6.3) both call
/// through this single function, so the two stay byte-for-byte consistent
/// by construction rather than by convention.
impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Empty => Ok(()),
            Val::Number(n) => write!(f, "{n}"),
            Val::Text(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_display_is_shared_by_concat_and_save() {
        assert_eq!(Val::Number(3.0).to_string(), "3");
        assert_eq!(Val::Number(3.5).to_string(), "3.5");
        assert_eq!(Val::Empty.to_string(), "");
        assert_eq!(Val::Text("hi".into()).to_string(), "hi");
    }
}
