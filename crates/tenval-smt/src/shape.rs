//! Row-major index arithmetic shared by tensors and memrefs.
//!
//! All functions operate on bit-vector terms of one fixed index width; the
//! width is carried by the terms themselves.

use crate::expr::Expr;

/// Linearize an N-D index into a 1-D offset (row-major Horner scheme).
pub fn to_1d_idx(idxs: &[Expr], dims: &[Expr]) -> Expr {
    assert_eq!(idxs.len(), dims.len(), "index rank must match dims rank");
    assert!(!idxs.is_empty());

    let mut idx = idxs[0].clone();
    for i in 1..idxs.len() {
        idx = idx.mul(&dims[i]).add(&idxs[i]);
    }
    idx
}

/// Split a 1-D offset back into N-D coordinates, peeling from the last axis.
pub fn from_1d_idx(idx: &Expr, dims: &[Expr]) -> Vec<Expr> {
    assert!(!dims.is_empty());

    let mut out = vec![Expr::from_bool(false); dims.len()];
    let mut rem = idx.clone();
    for i in (1..dims.len()).rev() {
        out[i] = rem.urem(&dims[i]);
        rem = rem.udiv(&dims[i]);
    }
    out[0] = rem;
    out
}

/// Total number of elements: the product of all dims.
pub fn get_1d_size(dims: &[Expr]) -> Expr {
    assert!(!dims.is_empty());

    let mut size = dims[0].clone();
    for d in &dims[1..] {
        size = size.mul(d);
    }
    size
}

/// `⋀_i idxs[i] < dims[i]`.
pub fn fits_in_dims(idxs: &[Expr], dims: &[Expr]) -> Expr {
    assert_eq!(idxs.len(), dims.len());

    let mut inbounds = Expr::from_bool(true);
    for (idx, dim) in idxs.iter().zip(dims.iter()) {
        inbounds = inbounds.and(&idx.ult(dim));
    }
    inbounds
}

pub fn simplify_list(exprs: &[Expr]) -> Vec<Expr> {
    exprs.iter().map(|e| e.simplify()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bv(v: u64) -> Expr {
        Expr::bv_u64(v, 64)
    }

    #[test]
    fn to_1d_is_row_major() {
        // (1, 2) in a 3x4 shape is offset 6.
        let idx = to_1d_idx(&[bv(1), bv(2)], &[bv(3), bv(4)]);
        assert_eq!(idx.as_u64(), Some(6));
    }

    #[test]
    fn from_1d_inverts_to_1d() {
        let dims = [bv(2), bv(3), bv(4)];
        for ofs in 0..24 {
            let nd = from_1d_idx(&bv(ofs), &dims);
            let back = to_1d_idx(&nd, &dims);
            assert_eq!(back.simplify().as_u64(), Some(ofs));
        }
    }

    #[test]
    fn size_of_static_shape_folds() {
        assert_eq!(get_1d_size(&[bv(2), bv(3), bv(4)]).as_u64(), Some(24));
    }

    #[test]
    fn fits_in_dims_folds_on_numerals() {
        assert!(fits_in_dims(&[bv(1), bv(2)], &[bv(2), bv(3)]).is_true());
        assert!(fits_in_dims(&[bv(1), bv(3)], &[bv(2), bv(3)]).is_false());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_arbitrary_shapes(
                dims in proptest::collection::vec(1u64..6, 1..4),
                raw_ofs in 0u64..10_000,
            ) {
                let total: u64 = dims.iter().product();
                let ofs = raw_ofs % total;
                let dim_exprs: Vec<Expr> = dims.iter().map(|&d| bv(d)).collect();
                let nd = from_1d_idx(&bv(ofs), &dim_exprs);
                let back = to_1d_idx(&nd, &dim_exprs).simplify();
                prop_assert_eq!(back.as_u64(), Some(ofs));
            }
        }
    }
}
