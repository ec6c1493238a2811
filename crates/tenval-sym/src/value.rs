//! The tagged union of first-class value kinds and its exhaustive dispatch.

use std::fmt;

use tenval_ir::{Attr, ElemType};
use tenval_smt::{Expr, Model};

use crate::float::Float;
use crate::index::Index;
use crate::integer::Integer;
use crate::memref::MemRef;
use crate::tensor::Tensor;
use crate::{SymError, SymResult};

/// Any value an IR operation produces or consumes.
#[derive(Clone)]
pub enum ValueTy {
    Index(Index),
    Integer(Integer),
    Float(Float),
    Tensor(Tensor),
    MemRef(MemRef),
}

impl ValueTy {
    /// Refinement with the receiver as the source: the target may stand in
    /// for the source. Pairing values of different kinds is a bug in the
    /// VC generator.
    pub fn refines(&self, other: &ValueTy) -> (Expr, Vec<Expr>) {
        match (self, other) {
            (ValueTy::Index(a), ValueTy::Index(b)) => a.refines(b),
            (ValueTy::Integer(a), ValueTy::Integer(b)) => a.refines(b),
            (ValueTy::Float(a), ValueTy::Float(b)) => a.refines(b),
            (ValueTy::Tensor(a), ValueTy::Tensor(b)) => a.refines(b),
            (ValueTy::MemRef(a), ValueTy::MemRef(b)) => a.refines(b),
            _ => panic!("refinement between values of different kinds"),
        }
    }
}

/// Lift a scalar attribute into a value.
pub fn attr_to_value_ty(attr: &Attr) -> SymResult<ValueTy> {
    match attr {
        Attr::Float { ty, .. } => Ok(ValueTy::Float(Float::constant(attr, *ty))),
        Attr::Int { value, width } => {
            if *width > 64 {
                return Err(SymError::Unsupported("integer size is too large".into()));
            }
            Ok(ValueTy::Integer(Integer::new(*value, *width)))
        }
        Attr::Index(value) => {
            debug_assert!((-2147483648..=2147483647).contains(value));
            Ok(ValueTy::Index(Index::from_i64(*value)))
        }
    }
}

/// Rebuild a typed value around a raw term.
pub fn from_expr(e: Expr, ty: &ElemType) -> Option<ValueTy> {
    match ty {
        ElemType::Index => Some(ValueTy::Index(Index::from(e))),
        ElemType::Float(fty) => Some(ValueTy::Float(Float::from_expr(e, *fty))),
        ElemType::Int(w) if *w <= 64 => {
            debug_assert_eq!(e.bv_width(), *w);
            Some(ValueTy::Integer(Integer::from(e)))
        }
        ElemType::Int(_) => None,
    }
}

/// The underlying SMT term of a value (a tensor's array, a memref's bid).
pub fn get_expr(v: &ValueTy) -> Expr {
    match v {
        ValueTy::Index(i) => i.expr().clone(),
        ValueTy::Integer(i) => i.expr().clone(),
        ValueTy::Float(f) => f.expr().clone(),
        ValueTy::Tensor(t) => t.as_array().clone(),
        ValueTy::MemRef(m) => m.bid().clone(),
    }
}

/// Evaluate a value under a model.
pub fn eval_value(v: &ValueTy, m: &Model) -> ValueTy {
    match v {
        ValueTy::Index(i) => ValueTy::Index(i.eval(m)),
        ValueTy::Integer(i) => ValueTy::Integer(i.eval(m)),
        ValueTy::Float(f) => ValueTy::Float(f.eval(m)),
        ValueTy::Tensor(t) => ValueTy::Tensor(t.eval(m)),
        ValueTy::MemRef(mr) => ValueTy::MemRef(mr.eval(m)),
    }
}

/// The top-level refinement relation: every observable result of `tgt`
/// must be consistent with `src`. Returns the formula and its free
/// parameters.
pub fn refines(src: &ValueTy, tgt: &ValueTy) -> (Expr, Vec<Expr>) {
    src.refines(tgt)
}

impl fmt::Display for ValueTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueTy::Index(v) => write!(f, "{v}"),
            ValueTy::Integer(v) => write!(f, "{v}"),
            ValueTy::Float(v) => write!(f, "{v}"),
            ValueTy::Tensor(v) => write!(f, "{v}"),
            ValueTy::MemRef(v) => write!(f, "{v}"),
        }
    }
}
