//! Index values: bit-vector integers of the fixed index width.

use std::fmt;

use tenval_smt::{Expr, Model, Sort, VarKind};

/// An index: the scalar used for dimensions, offsets and coordinates.
#[derive(Debug, Clone)]
pub struct Index(Expr);

impl Index {
    /// Width of every index bit-vector.
    pub const BITS: u32 = 64;

    pub fn sort() -> Sort {
        Sort::bv(Self::BITS)
    }

    pub fn new(value: u64) -> Index {
        Index(Expr::bv_u64(value, Self::BITS))
    }

    pub fn from_i64(value: i64) -> Index {
        Index(Expr::bv_i64(value, Self::BITS))
    }

    pub fn zero() -> Index {
        Index::new(0)
    }

    pub fn one() -> Index {
        Index::new(1)
    }

    pub fn var(name: &str, kind: VarKind) -> Index {
        let e = Expr::var(&Self::sort(), name, kind);
        assert!(e.is_var(), "Index::var must return a variable, got {e}");
        Index(e)
    }

    /// `n` distinct bound index variables, ready for a lambda or forall.
    pub fn bound_index_vars(n: usize) -> Vec<Expr> {
        (0..n).map(|_| Index::var("i", VarKind::Bound).into_expr()).collect()
    }

    pub fn expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }

    /// Index refinement is value equality.
    pub fn refines(&self, other: &Index) -> (Expr, Vec<Expr>) {
        (other.0.eq(&self.0), vec![])
    }

    pub fn eval(&self, m: &Model) -> Index {
        Index(m.eval_expr(&self.0))
    }
}

impl From<Expr> for Index {
    fn from(e: Expr) -> Index {
        Index(e)
    }
}

impl From<Index> for Expr {
    fn from(i: Index) -> Expr {
        i.0
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simplify())
    }
}
