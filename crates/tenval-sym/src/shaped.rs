//! The shaped-value abstraction: anything with dims and element reads.
//!
//! Tensors and memrefs both implement [`ShapedValue`]; the generic
//! convolution kernel below works on either, reducing the filter cube with
//! the dot operation of the element type's encoding.

use tenval_fp::{fp_encoding, int_dot};
use tenval_ir::{ElemType, DYNAMIC};
use tenval_smt::{from_1d_idx, get_1d_size, Expr, VarKind};

use crate::index::Index;
use crate::{SymError, SymResult};

/// Axis orderings for convolution operands (N = batch, D = spatial axes,
/// C/IC = input channel, F/OC = output channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvLayout {
    /// input N,D,IC / filter D,IC,OC / output N,D',OC
    NhwcHwcf,
    /// input N,IC,D / filter OC,IC,D / output N,OC,D'
    NchwFchw,
    /// input N,D,IC / filter OC,D,IC / output N,D',OC
    NhwcFhwc,
}

/// An n-dimensional value addressed by index terms.
pub trait ShapedValue {
    fn elem_type(&self) -> ElemType;
    fn dims(&self) -> Vec<Expr>;

    /// The element at an N-D coordinate. Only well-defined together with
    /// the value's inbounds condition.
    fn get(&self, indices: &[Expr]) -> Expr;

    fn rank(&self) -> usize {
        self.dims().len()
    }

    fn dim(&self, i: usize) -> Expr {
        self.dims()[i].clone()
    }

    fn size_1d(&self) -> Expr {
        get_1d_size(&self.dims())
    }
}

/// How to fill dimensions an IR shaped type leaves dynamic.
pub enum UnknownDims {
    /// Mint a fresh index variable per unknown size.
    Fresh,
    /// Take sizes from this list, in order.
    Values(Vec<Expr>),
    /// Dynamic sizes are not acceptable here (constant types).
    Reject,
}

/// Derive dimension terms from an IR shaped type's sizes.
///
/// Rank-0 values are represented with a single unit dimension.
pub fn dims_of(sizes: &[i64], unknown: UnknownDims) -> SymResult<Vec<Expr>> {
    if sizes.is_empty() {
        return Ok(vec![Index::one().into_expr()]);
    }

    let (mint_fresh, mut supplied) = match unknown {
        UnknownDims::Fresh => (true, None),
        UnknownDims::Values(v) => (false, Some(v.into_iter())),
        UnknownDims::Reject => (false, None),
    };

    let mut dims = Vec::with_capacity(sizes.len());
    for &sz in sizes {
        if sz == DYNAMIC {
            if mint_fresh {
                dims.push(Index::var("dim", VarKind::Fresh).into_expr());
            } else if let Some(vals) = &mut supplied {
                let v = vals.next().ok_or_else(|| {
                    SymError::Unsupported("not enough values for dynamic dimensions".into())
                })?;
                dims.push(v);
            } else {
                return Err(SymError::Unsupported(
                    "dynamic dimension in a context requiring a static shape".into(),
                ));
            }
        } else {
            assert!(sz >= 0);
            dims.push(Index::new(sz as u64).into_expr());
        }
    }
    Ok(dims)
}

/// The convolution kernel shared by tensor and view-level convolutions.
///
/// Returns the output index variables and the element term at that index:
/// a dot product over the flattened `spatial × input-channel` cube,
/// optionally seeded by `get_init` (fused bias or output accumulator).
/// Output dimension sizes are the caller's concern.
pub fn conv_kernel(
    input: &dyn ShapedValue,
    filter: &dyn ShapedValue,
    strides: &[Expr],
    dilations: &[Expr],
    layout: ConvLayout,
    get_init: impl FnOnce(&[Expr]) -> Option<Expr>,
) -> (Vec<Expr>, Expr) {
    let rank = input.rank();
    assert_eq!(rank, filter.rank(), "input and filter rank must agree");
    assert!(rank > 2, "convolution needs batch, spatial and channel axes");
    let spatial = rank - 2;
    assert_eq!(strides.len(), spatial);
    assert_eq!(dilations.len(), spatial);

    let output_idxs = Index::bound_index_vars(rank);

    // cube = spatial filter dims followed by the input channel
    let mut cube_size = Vec::with_capacity(spatial + 1);
    match layout {
        ConvLayout::NhwcHwcf => {
            for i in 0..spatial {
                cube_size.push(filter.dim(i));
            }
            cube_size.push(filter.dim(spatial));
        }
        ConvLayout::NchwFchw => {
            for i in 0..spatial {
                cube_size.push(filter.dim(i + 2));
            }
            cube_size.push(filter.dim(1));
        }
        ConvLayout::NhwcFhwc => {
            for i in 0..spatial {
                cube_size.push(filter.dim(i + 1));
            }
            cube_size.push(filter.dim(spatial + 1));
        }
    }

    let cube_idx = Index::var("cubeIdx", VarKind::Bound).into_expr();
    let cube_idxs = from_1d_idx(&cube_idx, &cube_size);

    let mut filter_idxs = Vec::with_capacity(rank);
    let mut input_idxs = Vec::with_capacity(rank);
    match layout {
        ConvLayout::NhwcHwcf => {
            // filter: D..., IC, OC
            filter_idxs.extend(cube_idxs.iter().cloned());
            filter_idxs.push(output_idxs[rank - 1].clone());

            // input: N, D*stride + cube*dilation ..., IC
            input_idxs.push(output_idxs[0].clone());
            for i in 0..spatial {
                input_idxs.push(
                    output_idxs[i + 1]
                        .mul(&strides[i])
                        .add(&cube_idxs[i].mul(&dilations[i])),
                );
            }
            input_idxs.push(cube_idxs[spatial].clone());
        }
        ConvLayout::NchwFchw => {
            // filter: OC, IC, D...
            filter_idxs.push(output_idxs[1].clone());
            filter_idxs.push(cube_idxs[spatial].clone());
            filter_idxs.extend(cube_idxs[..spatial].iter().cloned());

            // input: N, IC, D*stride + cube*dilation ...
            input_idxs.push(output_idxs[0].clone());
            input_idxs.push(cube_idxs[spatial].clone());
            for i in 0..spatial {
                input_idxs.push(
                    output_idxs[i + 2]
                        .mul(&strides[i])
                        .add(&cube_idxs[i].mul(&dilations[i])),
                );
            }
        }
        ConvLayout::NhwcFhwc => {
            // filter: OC, D..., IC
            filter_idxs.push(output_idxs[rank - 1].clone());
            filter_idxs.extend(cube_idxs.iter().cloned());

            // input: N, D*stride + cube*dilation ..., IC
            input_idxs.push(output_idxs[0].clone());
            for i in 0..spatial {
                input_idxs.push(
                    output_idxs[i + 1]
                        .mul(&strides[i])
                        .add(&cube_idxs[i].mul(&dilations[i])),
                );
            }
            input_idxs.push(cube_idxs[spatial].clone());
        }
    }

    let input_lambda = Expr::lambda1(&cube_idx, &input.get(&input_idxs));
    let filter_lambda = Expr::lambda1(&cube_idx, &filter.get(&filter_idxs));
    let init = get_init(&output_idxs);

    let sz = get_1d_size(&cube_size);
    let output = match input.elem_type() {
        ElemType::Float(fty) => fp_encoding(fty).dot(&input_lambda, &filter_lambda, &sz, init),
        ElemType::Int(w) => int_dot(&input_lambda, &filter_lambda, &sz, init, w),
        ElemType::Index => int_dot(&input_lambda, &filter_lambda, &sz, init, Index::BITS),
    };

    (output_idxs, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_zero_gets_a_unit_dim() {
        let dims = dims_of(&[], UnknownDims::Reject).unwrap();
        assert_eq!(dims.len(), 1);
        assert_eq!(dims[0].as_u64(), Some(1));
    }

    #[test]
    fn reject_mode_errors_on_dynamic() {
        assert!(dims_of(&[2, DYNAMIC], UnknownDims::Reject).is_err());
    }

    #[test]
    fn fresh_mode_mints_variables() {
        let dims = dims_of(&[2, DYNAMIC], UnknownDims::Fresh).unwrap();
        assert_eq!(dims[0].as_u64(), Some(2));
        assert!(dims[1].is_var());
    }

    #[test]
    fn values_mode_consumes_in_order() {
        let dims = dims_of(
            &[DYNAMIC, 3, DYNAMIC],
            UnknownDims::Values(vec![Expr::bv_u64(7, 64), Expr::bv_u64(9, 64)]),
        )
        .unwrap();
        assert_eq!(dims[0].as_u64(), Some(7));
        assert_eq!(dims[1].as_u64(), Some(3));
        assert_eq!(dims[2].as_u64(), Some(9));
    }
}
