//! Constant attributes.
//!
//! Floats are stored bit-exactly so attribute equality (the key of the
//! constant-abstraction cache) is a plain `Eq`.

use crate::types::{ElemType, FloatTy, TensorType};

/// A scalar constant attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Int { value: i64, width: u32 },
    Float { bits: u64, ty: FloatTy },
    Index(i64),
}

impl Attr {
    pub fn int(value: i64, width: u32) -> Attr {
        Attr::Int { value, width }
    }

    pub fn f32(value: f32) -> Attr {
        Attr::Float {
            bits: value.to_bits() as u64,
            ty: FloatTy::F32,
        }
    }

    pub fn f64(value: f64) -> Attr {
        Attr::Float {
            bits: value.to_bits(),
            ty: FloatTy::F64,
        }
    }

    pub fn index(value: i64) -> Attr {
        Attr::Index(value)
    }

    pub fn elem_type(&self) -> ElemType {
        match self {
            Attr::Int { width, .. } => ElemType::Int(*width),
            Attr::Float { ty, .. } => ElemType::Float(*ty),
            Attr::Index(_) => ElemType::Index,
        }
    }

    /// The float value, widened to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Attr::Float { bits, ty: FloatTy::F32 } => Some(f32::from_bits(*bits as u32) as f64),
            Attr::Float { bits, ty: FloatTy::F64 } => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// A tensor-shaped constant attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElemsAttr {
    /// Every element is the same value.
    Splat { ty: TensorType, value: Attr },
    /// Row-major element list.
    Dense { ty: TensorType, values: Vec<Attr> },
    /// Nonzero coordinates plus their values; everything else is zero.
    Sparse {
        ty: TensorType,
        indices: Vec<Vec<u64>>,
        values: Vec<Attr>,
    },
}

impl ElemsAttr {
    pub fn splat(ty: TensorType, value: Attr) -> ElemsAttr {
        ElemsAttr::Splat { ty, value }
    }

    pub fn dense(ty: TensorType, values: Vec<Attr>) -> ElemsAttr {
        let n = ty.num_elements().expect("constant types have static shapes");
        assert_eq!(values.len() as i64, n, "dense attribute element count");
        ElemsAttr::Dense { ty, values }
    }

    pub fn sparse(ty: TensorType, indices: Vec<Vec<u64>>, values: Vec<Attr>) -> ElemsAttr {
        assert_eq!(indices.len(), values.len());
        for idx in &indices {
            assert_eq!(idx.len(), ty.rank(), "sparse index rank");
        }
        ElemsAttr::Sparse { ty, indices, values }
    }

    pub fn tensor_ty(&self) -> &TensorType {
        match self {
            ElemsAttr::Splat { ty, .. } | ElemsAttr::Dense { ty, .. } | ElemsAttr::Sparse { ty, .. } => ty,
        }
    }

    pub fn elem_type(&self) -> ElemType {
        self.tensor_ty().elem
    }

    pub fn dims(&self) -> &[i64] {
        &self.tensor_ty().dims
    }

    pub fn rank(&self) -> usize {
        self.tensor_ty().rank()
    }

    pub fn total_size(&self) -> i64 {
        self.tensor_ty()
            .num_elements()
            .expect("constant types have static shapes")
    }

    pub fn is_splat(&self) -> bool {
        matches!(self, ElemsAttr::Splat { .. })
    }

    /// Element at an N-D coordinate (row-major for dense attributes).
    ///
    /// Only splat and dense attributes support point queries; the sparse
    /// ingestion path walks its coordinate list directly.
    pub fn value_at(&self, idx: &[u64]) -> Attr {
        match self {
            ElemsAttr::Splat { value, .. } => *value,
            ElemsAttr::Dense { ty, values } => {
                assert_eq!(idx.len(), ty.rank());
                let mut ofs = 0u64;
                for (i, &coord) in idx.iter().enumerate() {
                    let dim = ty.dim_size(i) as u64;
                    assert!(coord < dim, "coordinate out of range");
                    ofs = ofs * dim + coord;
                }
                values[ofs as usize]
            }
            ElemsAttr::Sparse { .. } => panic!("value_at on a sparse attribute"),
        }
    }
}
