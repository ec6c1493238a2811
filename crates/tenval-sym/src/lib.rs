//! Symbolic value algebra of the tenval translation validator.
//!
//! The value kinds tensor-IR operations manipulate (index and integer
//! bit-vectors, floats, symbolic tensors, and memory references), their
//! SMT encodings, and the refinement relation between two values.
//! The verification-condition generator builds values here, feeds their
//! terms into solver queries, and uses [`refines`] for the top-level
//! implication of each validation query.

use thiserror::Error;

pub mod float;
pub mod index;
pub mod integer;
pub mod memref;
pub mod session;
pub mod shaped;
pub mod tensor;
pub mod value;

pub use float::Float;
pub use index::Index;
pub use integer::Integer;
pub use memref::{Layout, MemRef};
pub use session::{max_const_size, reset_abstractly_encoded_attrs, set_max_const_size};
pub use shaped::{conv_kernel, dims_of, ConvLayout, ShapedValue, UnknownDims};
pub use tensor::Tensor;
pub use value::{attr_to_value_ty, eval_value, from_expr, get_expr, refines, ValueTy};

use tenval_ir::ElemType;
use tenval_smt::{Expr, Sort};

/// Errors the value layer reports to the surrounding tool.
///
/// `Unsupported` aborts the current query with a message for the user.
/// Internal invariant violations (rank or element-type mismatches between
/// values the VC generator pairs up) are panics, not errors.
#[derive(Debug, Error)]
pub enum SymError {
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type SymResult<T> = Result<T, SymError>;

/// The SMT sort of a primitive element type, if it has one.
pub fn prim_sort(ty: &ElemType) -> Option<Sort> {
    tenval_fp::scalar_sort(ty, Index::BITS)
}

/// The additive zero of a primitive element type.
pub fn get_zero(ty: &ElemType) -> Option<Expr> {
    prim_sort(ty)?;
    Some(match ty {
        ElemType::Float(fty) => tenval_fp::fp_encoding(*fty).zero(),
        ElemType::Int(w) => Expr::bv_u64(0, *w),
        ElemType::Index => Index::zero().into_expr(),
    })
}

/// The identity element reductions are seeded with.
pub fn get_identity(ty: &ElemType) -> Option<Expr> {
    prim_sort(ty)?;
    Some(match ty {
        ElemType::Float(fty) => tenval_fp::fp_encoding(*fty).identity(),
        ElemType::Int(w) => Expr::bv_u64(0, *w),
        ElemType::Index => Index::zero().into_expr(),
    })
}
