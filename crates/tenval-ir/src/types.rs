//! Element and shaped types.

use std::fmt;

/// Sentinel for a dimension, offset or stride whose size is unknown at
/// compile time.
pub const DYNAMIC: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatTy {
    F32,
    F64,
}

impl fmt::Display for FloatTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatTy::F32 => write!(f, "f32"),
            FloatTy::F64 => write!(f, "f64"),
        }
    }
}

/// A tensor or memref element type.
///
/// Integer widths above 64 are representable but rejected by the symbolic
/// layer's sort mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    Int(u32),
    Float(FloatTy),
    Index,
}

impl ElemType {
    pub const I1: ElemType = ElemType::Int(1);
    pub const I32: ElemType = ElemType::Int(32);
    pub const I64: ElemType = ElemType::Int(64);
    pub const F32: ElemType = ElemType::Float(FloatTy::F32);
    pub const F64: ElemType = ElemType::Float(FloatTy::F64);

    pub fn is_int(&self) -> bool {
        matches!(self, ElemType::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::Float(_))
    }

    pub fn is_index(&self) -> bool {
        matches!(self, ElemType::Index)
    }

    pub fn float_ty(&self) -> Option<FloatTy> {
        match self {
            ElemType::Float(ty) => Some(*ty),
            _ => None,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemType::Int(w) => write!(f, "i{w}"),
            ElemType::Float(ty) => write!(f, "{ty}"),
            ElemType::Index => write!(f, "index"),
        }
    }
}

/// Floating-point comparison predicate. `O*` predicates require both
/// operands ordered (non-NaN); `U*` predicates succeed when either is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpPred {
    AlwaysFalse,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    AlwaysTrue,
}

/// A ranked tensor type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub elem: ElemType,
    pub dims: Vec<i64>,
}

impl TensorType {
    pub fn new(elem: ElemType, dims: Vec<i64>) -> TensorType {
        TensorType { elem, dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim_size(&self, i: usize) -> i64 {
        self.dims[i]
    }

    pub fn has_static_shape(&self) -> bool {
        self.dims.iter().all(|&d| d != DYNAMIC)
    }

    /// Total element count; `None` if any dimension is dynamic.
    pub fn num_elements(&self) -> Option<i64> {
        if !self.has_static_shape() {
            return None;
        }
        Some(self.dims.iter().product::<i64>().max(1))
    }
}

/// Memref layouts: identity (row-major) or affine-strided.
///
/// Non-strided layouts are not representable; the validator only models
/// strided memrefs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemRefLayout {
    Identity,
    Strided { offset: i64, strides: Vec<i64> },
}

/// A ranked memref type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub elem: ElemType,
    pub dims: Vec<i64>,
    pub layout: MemRefLayout,
}

impl MemRefType {
    pub fn new(elem: ElemType, dims: Vec<i64>, layout: MemRefLayout) -> MemRefType {
        if let MemRefLayout::Strided { strides, .. } = &layout {
            assert_eq!(strides.len(), dims.len(), "one stride per dimension");
        }
        MemRefType { elem, dims, layout }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.layout, MemRefLayout::Identity)
    }
}
