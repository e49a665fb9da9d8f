//! AND / OR trees of single-column predicates

use crate::data::Value;
use crate::query::predicate::Predicate;
use crate::ColumnId;

/// A pushed-down filter. A row is selected when the tree evaluates to TRUE;
/// UNKNOWN and FALSE both drop the row.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Predicate(Predicate),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn leaf(predicate: Predicate) -> Self {
        FilterExpr::Predicate(predicate)
    }

    /// AND node, flattening nested ANDs; a single child is returned as is
    pub fn and(children: Vec<FilterExpr>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                FilterExpr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.swap_remove(0)
        } else {
            FilterExpr::And(flat)
        }
    }

    /// OR node, flattening nested ORs; a single child is returned as is
    pub fn or(children: Vec<FilterExpr>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                FilterExpr::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.swap_remove(0)
        } else {
            FilterExpr::Or(flat)
        }
    }

    /// Distinct columns referenced anywhere in the tree, sorted
    pub fn column_ids(&self) -> Vec<ColumnId> {
        let mut ids = Vec::new();
        self.visit(&mut |p| ids.push(p.column_id()));
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn visit(&self, f: &mut impl FnMut(&Predicate)) {
        match self {
            FilterExpr::Predicate(p) => f(p),
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for c in children {
                    c.visit(f);
                }
            }
        }
    }

    /// Upper bound on per-row cost, used to order subtrees
    pub fn eval_cost(&self) -> u32 {
        match self {
            FilterExpr::Predicate(p) => p.eval_cost() as u32,
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                children.iter().map(|c| c.eval_cost()).sum()
            }
        }
    }

    /// Kleene evaluation of one row. `cell` returns the row's value for a
    /// column, `None` for NULL.
    pub fn eval_row<'v, F>(&self, cell: &F) -> Option<bool>
    where
        F: Fn(ColumnId) -> Option<&'v Value>,
    {
        match self {
            FilterExpr::Predicate(p) => p.eval_value(cell(p.column_id())),
            FilterExpr::And(children) => {
                let mut unknown = false;
                for c in children {
                    match c.eval_row(cell) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            FilterExpr::Or(children) => {
                let mut unknown = false;
                for c in children {
                    match c.eval_row(cell) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
        }
    }

    /// Row-at-a-time reference: whether the row is selected
    pub fn matches_row<'v, F>(&self, cell: &F) -> bool
    where
        F: Fn(ColumnId) -> Option<&'v Value>,
    {
        self.eval_row(cell) == Some(true)
    }
}

impl From<Predicate> for FilterExpr {
    fn from(p: Predicate) -> Self {
        FilterExpr::Predicate(p)
    }
}

impl std::fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (sep, children) = match self {
            FilterExpr::Predicate(p) => return write!(f, "{}", p),
            FilterExpr::And(c) => (" AND ", c),
            FilterExpr::Or(c) => (" OR ", c),
        };
        write!(f, "(")?;
        for (i, c) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(sep)?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}
