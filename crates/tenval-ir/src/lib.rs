//! Tensor-IR types and constant attributes.
//!
//! A deliberately small stand-in for the IR type system the validator runs
//! against: element types, ranked shaped types with dynamic-size sentinels,
//! strided memref layouts, and the three constant-attribute shapes
//! (splat / dense / sparse).

pub mod attr;
pub mod types;

pub use attr::{Attr, ElemsAttr};
pub use types::{ElemType, FloatTy, FpPred, MemRefLayout, MemRefType, TensorType, DYNAMIC};
