//! Integer values: bit-vectors of arbitrary width up to 64.
//!
//! Sign is operation-dependent; comparisons pick `ult`/`slt` explicitly at
//! the call site.

use std::fmt;

use tenval_smt::{Expr, Model, Sort, VarKind};

#[derive(Debug, Clone)]
pub struct Integer(Expr);

impl Integer {
    pub fn sort(width: u32) -> Sort {
        Sort::bv(width)
    }

    pub fn new(value: i64, width: u32) -> Integer {
        Integer(Expr::bv_i64(value, width))
    }

    pub fn var(name: &str, width: u32, kind: VarKind) -> Integer {
        Integer(Expr::var(&Self::sort(width), name, kind))
    }

    /// The 1-bit encodings of true and false used by comparison results.
    pub fn bool_true() -> Integer {
        Integer::new(1, 1)
    }

    pub fn bool_false() -> Integer {
        Integer::new(0, 1)
    }

    pub fn bitwidth(&self) -> u32 {
        self.0.bv_width()
    }

    pub fn expr(&self) -> &Expr {
        &self.0
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }

    pub fn refines(&self, other: &Integer) -> (Expr, Vec<Expr>) {
        assert_eq!(
            self.bitwidth(),
            other.bitwidth(),
            "integer refinement requires equal bit-widths, got {} != {}",
            self.bitwidth(),
            other.bitwidth()
        );
        (other.0.eq(&self.0), vec![])
    }

    pub fn eval(&self, m: &Model) -> Integer {
        Integer(m.eval_expr(&self.0))
    }
}

impl From<Expr> for Integer {
    fn from(e: Expr) -> Integer {
        Integer(e)
    }
}

impl From<Integer> for Expr {
    fn from(i: Integer) -> Expr {
        i.0
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simplify())
    }
}
