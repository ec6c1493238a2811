//! Symbolic tensors: a shape, an element array, and a companion
//! initialized array.
//!
//! Tensors are immutable; every operation returns a new tensor that shares
//! structure through the term graph. Reading an uninitialized element is
//! undefined behaviour, which refinement and the VC generator track through
//! the initialized array.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use tenval_fp::{fp_encoding, int_dot, int_sum, FpEncoding};
use tenval_ir::{ElemType, ElemsAttr, TensorType};
use tenval_smt::matchers::{match_const_splat, match_store};
use tenval_smt::{
    from_1d_idx, get_1d_size, simplify_list, to_1d_idx, Expr, Model, Sort, VarKind,
};

use crate::float::Float;
use crate::index::Index;
use crate::session;
use crate::shaped::{conv_kernel, dims_of, ConvLayout, ShapedValue, UnknownDims};
use crate::value::{attr_to_value_ty, from_expr, get_expr};
use crate::{get_zero, prim_sort, SymError, SymResult};

#[derive(Clone)]
pub struct Tensor {
    elem_type: ElemType,
    dims: Vec<Expr>,
    arr: Expr,
    initialized: Expr,
}

impl Tensor {
    pub const MAX_TENSOR_SIZE: u64 = 10000;
    pub const MAX_DIM_SIZE: u64 = 25;

    fn from_parts(elem_type: ElemType, dims: Vec<Expr>, arr: Expr, initialized: Expr) -> Tensor {
        assert!(!dims.is_empty(), "rank-0 tensors carry a unit dimension");
        Tensor {
            elem_type,
            dims,
            arr,
            initialized,
        }
    }

    fn elem_sort(elem_type: &ElemType) -> SymResult<Sort> {
        prim_sort(elem_type).ok_or_else(|| {
            SymError::Unsupported(format!("{elem_type} is not a valid tensor element type"))
        })
    }

    fn array_sort(elem: &Sort) -> Sort {
        Sort::array(&Index::sort(), elem)
    }

    fn splat_array(elem: &Expr) -> Expr {
        Expr::splat_array(&Index::sort(), elem)
    }

    // === Constructors ===

    /// Every element is `elem`; fully initialized.
    pub fn splat(elem_type: ElemType, elem: Expr, dims: Vec<Expr>) -> SymResult<Tensor> {
        Self::elem_sort(&elem_type)?;
        Ok(Self::from_parts(
            elem_type,
            dims,
            Self::splat_array(&elem),
            Self::splat_array(&Expr::from_bool(true)),
        ))
    }

    /// A 1-D tensor from an element list.
    pub fn dense_1d(elem_type: ElemType, elems: Vec<Expr>) -> SymResult<Tensor> {
        let sort = Self::elem_sort(&elem_type)?;
        assert!(!elems.is_empty());

        let mut arr = Expr::var(&Self::array_sort(&sort), "tensor_val", VarKind::Fresh);
        for (i, e) in elems.iter().enumerate() {
            arr = arr.store(&Expr::bv_u64(i as u64, Index::BITS), e);
        }
        let dims = vec![Index::new(elems.len() as u64).into_expr()];
        Ok(Self::from_parts(
            elem_type,
            dims,
            arr,
            Self::splat_array(&Expr::from_bool(true)),
        ))
    }

    /// A shaped dense tensor: the 1-D store loop plus explicit dims.
    pub fn dense(elem_type: ElemType, elems: Vec<Expr>, dims: &[u64]) -> SymResult<Tensor> {
        let n: u64 = dims.iter().product();
        assert_eq!(elems.len() as u64, n, "element count must match the shape");
        let dim_exprs: Vec<Expr> = dims.iter().map(|&d| Index::new(d).into_expr()).collect();
        Ok(Self::dense_1d(elem_type, elems)?.reshape(&dim_exprs))
    }

    /// Zero-filled except at the given coordinates; fully initialized.
    pub fn sparse(
        elem_type: ElemType,
        indices: &[Vec<u64>],
        elems: &[Expr],
        dims: &[u64],
        zero: &Expr,
    ) -> SymResult<Tensor> {
        Self::elem_sort(&elem_type)?;
        assert_eq!(indices.len(), elems.len());

        let mut arr = Self::splat_array(zero);
        for (idx, elem) in indices.iter().zip(elems) {
            assert_eq!(idx.len(), dims.len());
            let mut ofs = idx[0];
            for j in 1..dims.len() {
                ofs = ofs * dims[j] + idx[j];
            }
            arr = arr.store(&Expr::bv_u64(ofs, Index::BITS), elem);
        }

        let dim_exprs = dims.iter().map(|&d| Index::new(d).into_expr()).collect();
        Ok(Self::from_parts(
            elem_type,
            dim_exprs,
            arr,
            Self::splat_array(&Expr::from_bool(true)),
        ))
    }

    /// A fully symbolic tensor.
    pub fn var(
        elem_type: ElemType,
        name: &str,
        dims: &[Expr],
        initialized: bool,
    ) -> SymResult<Tensor> {
        let sort = Self::elem_sort(&elem_type)?;
        let arr = Expr::var(&Self::array_sort(&sort), name, VarKind::Unbound);
        Ok(Self::from_parts(
            elem_type,
            dims.to_vec(),
            arr,
            Self::splat_array(&Expr::from_bool(initialized)),
        ))
    }

    /// Wrap an existing element array; fully initialized.
    pub fn from_array(elem_type: ElemType, arr: Expr, dims: Vec<Expr>) -> Tensor {
        Self::from_parts(
            elem_type,
            dims,
            arr,
            Self::splat_array(&Expr::from_bool(true)),
        )
    }

    /// `λ indexvars. body`, with an analogous lambda for `initialized`.
    ///
    /// With no index variables the tensor has a single element.
    pub fn mk_lambda(
        elem_type: ElemType,
        mut newdims: Vec<Expr>,
        indexvars: Vec<Expr>,
        body: Expr,
        initialized: Expr,
    ) -> Tensor {
        if indexvars.is_empty() {
            if newdims.is_empty() {
                newdims.push(Index::one().into_expr());
            } else {
                debug_assert!(newdims.len() == 1 && newdims[0].as_u64() == Some(1));
            }
        } else {
            assert_eq!(newdims.len(), indexvars.len());
        }
        for iv in &indexvars {
            assert!(iv.is_var(), "not a variable: {iv}");
        }

        let idx = Index::var("idx", VarKind::Bound).into_expr();
        let idx_init = Index::var("idx_init", VarKind::Bound).into_expr();
        let body = if indexvars.is_empty() {
            body
        } else {
            body.substitute(&indexvars, &from_1d_idx(&idx, &newdims))
        };
        let initialized = if indexvars.is_empty() {
            initialized
        } else {
            initialized.substitute(&indexvars, &from_1d_idx(&idx_init, &newdims))
        };

        Self::from_parts(
            elem_type,
            newdims,
            Expr::lambda1(&idx, &body),
            Expr::lambda1(&idx_init, &initialized),
        )
    }

    /// A lambda whose body is already phrased over one raw 1-D index.
    pub fn mk_lambda_from_1d(
        elem_type: ElemType,
        newdims: Vec<Expr>,
        indexvar: &Expr,
        body: Expr,
        initialized: Expr,
    ) -> Tensor {
        Self::from_parts(
            elem_type,
            newdims,
            Expr::lambda1(indexvar, &body),
            Expr::lambda1(indexvar, &initialized),
        )
    }

    /// A lambda that is initialized everywhere; the caller certifies reads
    /// of uninitialized inputs were already ruled undefined.
    pub fn mk_initialized_lambda(
        elem_type: ElemType,
        newdims: Vec<Expr>,
        indexvars: Vec<Expr>,
        body: Expr,
    ) -> Tensor {
        Self::mk_lambda(elem_type, newdims, indexvars, body, Expr::from_bool(true))
    }

    /// `cond(idx) ? t[idx] : f[idx]`, elementwise.
    pub fn mk_ite(cond_fn: impl Fn(&[Expr]) -> Expr, t: &Tensor, f: &Tensor) -> Tensor {
        let true_dims = t.dims.clone();
        assert!(
            true_dims.len() == f.dims.len() && t.elem_type == f.elem_type,
            "mkIte operands must have compatible shape and element type"
        );

        let ind_vars = Index::bound_index_vars(true_dims.len());
        let is_true = cond_fn(&ind_vars).eq(crate::Integer::bool_true().expr());

        let ret = is_true.ite(&t.get(&ind_vars), &f.get(&ind_vars));
        let ret_init = is_true.ite(&t.is_initialized(&ind_vars), &f.is_initialized(&ind_vars));
        Self::mk_lambda(t.elem_type, true_dims, ind_vars, ret, ret_init)
    }

    // === Accessors ===

    pub fn elem_type(&self) -> ElemType {
        self.elem_type
    }

    pub fn dims(&self) -> &[Expr] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, i: usize) -> Expr {
        self.dims[i].clone()
    }

    pub fn size_1d(&self) -> Expr {
        get_1d_size(&self.dims)
    }

    pub fn as_array(&self) -> &Expr {
        &self.arr
    }

    /// Side conditions making a symbolic shape well-defined.
    pub fn well_defined(&self) -> Expr {
        let size = self.size_1d();
        if size.is_numeral() {
            return Expr::from_bool(true);
        }
        let mut e = size.ule(&Expr::bv_u64(Self::MAX_TENSOR_SIZE, Index::BITS));
        for dim in &self.dims {
            if dim.is_numeral() {
                continue;
            }
            e = e.and(&dim.ule(&Expr::bv_u64(Self::MAX_DIM_SIZE, Index::BITS)));
        }
        e.simplify()
    }

    pub fn is_in_bounds(&self, indices: &[Expr]) -> Expr {
        assert_eq!(indices.len(), self.dims.len());
        let mut inbounds = Expr::from_bool(true);
        for (idx, dim) in indices.iter().zip(&self.dims) {
            inbounds = inbounds.and(&idx.ult(dim));
        }
        inbounds.simplify()
    }

    // === Reads ===

    pub fn get(&self, indices: &[Expr]) -> Expr {
        self.get_raw(&to_1d_idx(indices, &self.dims))
    }

    /// Read by raw 1-D offset. The result is locked: use it through the
    /// wrapper matching the element type.
    pub fn get_raw(&self, index_raw: &Expr) -> Expr {
        self.arr.select(index_raw).lock()
    }

    pub fn is_initialized(&self, indices: &[Expr]) -> Expr {
        self.initialized.select(&to_1d_idx(indices, &self.dims))
    }

    pub fn is_fully_initialized(&self) -> Expr {
        let vars = Index::bound_index_vars(self.rank());
        let body = self.is_initialized(&vars);
        Expr::forall(&vars, &body)
    }

    // === Operations ===

    /// A new tensor with `value` written at `indices`; also returns the
    /// inbounds condition of the write.
    pub fn insert(&self, value: &Expr, indices: &[Expr]) -> (Tensor, Expr) {
        let idxvar = Index::var("idx", VarKind::Bound).into_expr();
        let cond = idxvar.eq(&to_1d_idx(indices, &self.dims));
        let origin = self.get(&from_1d_idx(&idxvar, &self.dims));
        let org_init = self.is_initialized(&from_1d_idx(&idxvar, &self.dims));

        let newarr = Expr::lambda1(&idxvar, &cond.ite(value, &origin));
        let newinit = Expr::lambda1(&idxvar, &cond.ite(&Expr::from_bool(true), &org_init));
        (
            Self::from_parts(self.elem_type, self.dims.clone(), newarr, newinit),
            self.is_in_bounds(indices),
        )
    }

    /// A new tensor `T2` with `T2[newidxvars] = self[srcidxs]`.
    ///
    /// E.g. `newidxvars = [x, y, z]`, `srcidxs = [x, y + z]` gives
    /// `T2[x][y][z] = self[x][y + z]`. The caller certifies the source
    /// reads are covered, so the result is fully initialized.
    pub fn affine(
        &self,
        new_idx_vars: &[Expr],
        src_idxs: &[Expr],
        new_sizes: Vec<Expr>,
    ) -> Tensor {
        let idxvar = Index::var("idx", VarKind::Bound).into_expr();
        let indices = from_1d_idx(&idxvar, &new_sizes);

        let mut src = src_idxs.to_vec();
        for s in &mut src {
            let mut v = s.clone();
            for (j, nv) in new_idx_vars.iter().enumerate() {
                if nv.is_var() {
                    v = v.substitute(std::slice::from_ref(nv), std::slice::from_ref(&indices[j]));
                }
            }
            *s = v.simplify();
        }
        let elem = self.get(&src);

        Self::from_parts(
            self.elem_type,
            new_sizes,
            Expr::lambda1(&idxvar, &elem),
            Self::splat_array(&Expr::from_bool(true)),
        )
    }

    /// Concatenate along `axis`.
    pub fn concat(&self, t2: &Tensor, axis: usize) -> Tensor {
        let r = self.rank();
        assert!(r == t2.rank() && self.elem_type == t2.elem_type && axis < r);

        let idx = Index::bound_index_vars(r);
        let mut idx_for_t2 = idx.clone();
        idx_for_t2[axis] = idx_for_t2[axis].sub(&self.dim(axis));

        let mut dim = self.dims.clone();
        dim[axis] = dim[axis].add(&t2.dim(axis));

        let elem = idx[axis]
            .ult(&self.dim(axis))
            .ite(&self.get(&idx), &t2.get(&idx_for_t2));

        Self::mk_initialized_lambda(self.elem_type, dim, idx, elem)
    }

    /// Convolution with `filter` under the given axis layout, optionally
    /// seeded by an output accumulator.
    ///
    /// Each spatial output dim is `(D - dil*F + s) udiv s`.
    pub fn conv(
        &self,
        filter: &Tensor,
        strides: &[Expr],
        dilations: &[Expr],
        layout: ConvLayout,
        output: Option<Tensor>,
    ) -> Tensor {
        let spatial = self.rank() - 2;
        let out_spatial = |orig: Expr, filt: Expr, i: usize| {
            orig.sub(&dilations[i].mul(&filt)).add(&strides[i]).udiv(&strides[i])
        };

        let mut output_dims = Vec::with_capacity(self.rank());
        match layout {
            ConvLayout::NhwcHwcf => {
                output_dims.push(self.dim(0));
                for i in 0..spatial {
                    output_dims.push(out_spatial(self.dim(i + 1), filter.dim(i), i));
                }
                output_dims.push(filter.dim(filter.rank() - 1));
            }
            ConvLayout::NchwFchw => {
                output_dims.push(self.dim(0));
                output_dims.push(filter.dim(0));
                for i in 0..spatial {
                    output_dims.push(out_spatial(self.dim(i + 2), filter.dim(i + 2), i));
                }
            }
            ConvLayout::NhwcFhwc => {
                output_dims.push(self.dim(0));
                for i in 0..spatial {
                    output_dims.push(out_spatial(self.dim(i + 1), filter.dim(i + 1), i));
                }
                output_dims.push(filter.dim(0));
            }
        }

        let (indices, res) = conv_kernel(self, filter, strides, dilations, layout, |idxs| {
            output.as_ref().map(|o| o.get(idxs))
        });

        Self::mk_initialized_lambda(self.elem_type, output_dims, indices, res)
    }

    /// Depthwise 2-D convolution, rewritten per `(c, m)` channel pair as a
    /// 1xHxWx1 by KHxKWx1x1 convolution. With a bias the channel axes fuse
    /// into `C*M`; without, they stay separate.
    pub fn depthwise_conv_2d(
        &self,
        filter: &Tensor,
        strides: &[Expr],
        dilations: &[Expr],
        bias: Option<Tensor>,
        output: Option<Tensor>,
    ) -> SymResult<Tensor> {
        assert_eq!(self.rank(), 4);
        assert_eq!(filter.rank(), 4);
        assert_eq!(strides.len(), 2);
        assert_eq!(dilations.len(), 2);

        let has_bias = bias.is_some();
        let fty = if has_bias {
            Some(self.elem_type.float_ty().ok_or_else(|| {
                SymError::Unsupported(format!(
                    "depthwise convolution bias on {} tensors",
                    self.elem_type
                ))
            })?)
        } else {
            None
        };

        let out_ind = Index::bound_index_vars(if has_bias { 4 } else { 5 });

        let w_dims = filter.dims.clone();
        let n_sz = self.dim(0);
        let c_sz = w_dims[2].clone();
        let m_sz = w_dims[3].clone();
        let n = out_ind[0].clone();
        let c = if has_bias {
            out_ind[3].udiv(&m_sz)
        } else {
            out_ind[3].clone()
        };
        let m = if has_bias {
            out_ind[3].urem(&m_sz)
        } else {
            out_ind[4].clone()
        };

        // input viewed as 1xHxWx1
        let input2d_dims = vec![
            Index::one().into_expr(),
            self.dim(1),
            self.dim(2),
            Index::one().into_expr(),
        ];
        let input2d_ind = Index::bound_index_vars(4);
        let input2d = Self::mk_initialized_lambda(
            self.elem_type,
            input2d_dims,
            input2d_ind.clone(),
            self.get(&[
                n.clone(),
                input2d_ind[1].clone(),
                input2d_ind[2].clone(),
                c.clone(),
            ]),
        );

        // weight viewed as KHxKWx1x1
        let weight2d_dims = vec![
            w_dims[0].clone(),
            w_dims[1].clone(),
            Index::one().into_expr(),
            Index::one().into_expr(),
        ];
        let weight2d_ind = Index::bound_index_vars(4);
        let weight2d = Self::mk_initialized_lambda(
            self.elem_type,
            weight2d_dims,
            weight2d_ind.clone(),
            filter.get(&[
                weight2d_ind[0].clone(),
                weight2d_ind[1].clone(),
                c.clone(),
                m.clone(),
            ]),
        );

        // output accumulator viewed as 1xOHxOWx1
        let output2d = output.as_ref().map(|o| {
            let output2d_dims = vec![
                Index::one().into_expr(),
                o.dim(1),
                o.dim(2),
                Index::one().into_expr(),
            ];
            let output2d_ind = Index::bound_index_vars(4);
            let body = if has_bias {
                o.get(&[
                    n.clone(),
                    output2d_ind[1].clone(),
                    output2d_ind[2].clone(),
                    out_ind[3].clone(),
                ])
            } else {
                o.get(&[
                    n.clone(),
                    output2d_ind[1].clone(),
                    output2d_ind[2].clone(),
                    c.clone(),
                    m.clone(),
                ])
            };
            Self::mk_initialized_lambda(self.elem_type, output2d_dims, output2d_ind, body)
        });

        let t2d = input2d.conv(&weight2d, strides, dilations, ConvLayout::NhwcHwcf, output2d);
        let t2d_dims = t2d.dims.clone();
        let acc = t2d.get(&[
            Index::zero().into_expr(),
            out_ind[1].clone(),
            out_ind[2].clone(),
            Index::zero().into_expr(),
        ]);

        if let Some(bias) = bias {
            // NxOHxOWx(C*M)
            let t_dims = vec![n_sz, t2d_dims[1].clone(), t2d_dims[2].clone(), c_sz.mul(&m_sz)];
            let fty = fty.unwrap();
            let tf = Float::from_expr(acc, fty);
            let biasf = Float::from_expr(bias.get(&[out_ind[3].clone()]), fty);
            Ok(Self::mk_initialized_lambda(
                self.elem_type,
                t_dims,
                out_ind,
                tf.add(&biasf).into_expr(),
            ))
        } else {
            // NxOHxOWxCxM
            let t_dims = vec![n_sz, t2d_dims[1].clone(), t2d_dims[2].clone(), c_sz, m_sz];
            Ok(Self::mk_initialized_lambda(self.elem_type, t_dims, out_ind, acc))
        }
    }

    /// Replace the shape, keeping the element and initialized arrays.
    /// Undefined if the total sizes disagree.
    pub fn reshape(&self, newdims: &[Expr]) -> Tensor {
        assert!(!newdims.is_empty());
        Self::from_parts(
            self.elem_type,
            simplify_list(newdims),
            self.arr.clone(),
            self.initialized.clone(),
        )
    }

    /// Reflect one axis: `t[.., i, ..] = self[.., dim-i-1, ..]`.
    pub fn reverse(&self, axis: usize) -> Tensor {
        assert!(axis < self.rank());
        let ind_vars = Index::bound_index_vars(self.rank());
        let mut access = ind_vars.clone();
        access[axis] = self.dims[axis]
            .sub(&access[axis])
            .sub(&Index::one().into_expr());

        Self::mk_initialized_lambda(self.elem_type, self.dims.clone(), ind_vars, self.get(&access))
    }

    /// Repeat the tensor `repeat[i]` times along each axis.
    pub fn tile(&self, repeat: &[u64]) -> Tensor {
        assert_eq!(repeat.len(), self.rank());
        let new_dims: Vec<Expr> = self
            .dims
            .iter()
            .zip(repeat)
            .map(|(d, &r)| d.mul(&Expr::bv_u64(r, Index::BITS)))
            .collect();

        let ind_vars = Index::bound_index_vars(self.rank());
        let access: Vec<Expr> = ind_vars
            .iter()
            .zip(&self.dims)
            .map(|(iv, d)| iv.urem(d))
            .collect();

        Self::mk_initialized_lambda(self.elem_type, new_dims, ind_vars, self.get(&access))
    }

    /// 2-D transpose.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.rank(), 2);
        let i = Index::var("i", VarKind::Bound).into_expr();
        let j = Index::var("j", VarKind::Bound).into_expr();
        let body = self.get(&[i.clone(), j.clone()]);

        Self::mk_initialized_lambda(
            self.elem_type,
            vec![self.dims[1].clone(), self.dims[0].clone()],
            vec![j, i],
            body,
        )
    }

    /// 2-D matrix multiply. `b` is taken row-major unless `b_transposed`;
    /// `init[i][j]` seeds each output element.
    pub fn matmul(&self, b: &Tensor, b_transposed: bool, init: Option<Tensor>) -> Tensor {
        assert_eq!(self.rank(), 2);
        assert_eq!(b.rank(), 2);
        assert_eq!(self.elem_type, b.elem_type);

        let bt = if b_transposed { b.clone() } else { b.transpose() };
        let i = Index::var("i", VarKind::Bound).into_expr();
        let j = Index::var("j", VarKind::Bound).into_expr();
        let a_row = self.to_1d_array_with_ofs(
            &[i.clone(), Index::zero().into_expr()],
            &[Index::one().into_expr(), self.dims[1].clone()],
        );
        let bt_row = bt.to_1d_array_with_ofs(
            &[j.clone(), Index::zero().into_expr()],
            &[Index::one().into_expr(), bt.dims[1].clone()],
        );

        let init_val = init.map(|t| t.get(&[i.clone(), j.clone()]));
        let res = self.reduce_dot(&a_row, &bt_row, &self.dims[1], init_val);

        Self::mk_initialized_lambda(
            self.elem_type,
            vec![self.dims[0].clone(), bt.dims[0].clone()],
            vec![i, j],
            res,
        )
    }

    /// Elementwise binary operation over raw elements; shapes are assumed
    /// equivalent.
    pub fn elementwise_bin_op(
        &self,
        b: &Tensor,
        result_elem_type: ElemType,
        f: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Tensor {
        assert_eq!(self.rank(), b.rank());
        assert_eq!(self.elem_type, b.elem_type);

        let idxvar = Index::var("idx_binop", VarKind::Bound).into_expr();
        let elem = f(self.get_raw(&idxvar), b.get_raw(&idxvar));

        Self::mk_lambda_from_1d(
            result_elem_type,
            self.dims.clone(),
            &idxvar,
            elem,
            Expr::from_bool(true),
        )
    }

    pub fn elementwise_unary_op(
        &self,
        result_elem_type: ElemType,
        f: impl FnOnce(Expr) -> Expr,
    ) -> Tensor {
        let idxvar = Index::var("idx_uop", VarKind::Bound).into_expr();
        let elem = f(self.get_raw(&idxvar));

        Self::mk_lambda_from_1d(
            result_elem_type,
            self.dims.clone(),
            &idxvar,
            elem,
            Expr::from_bool(true),
        )
    }

    fn reduce_dot(&self, a: &Expr, b: &Expr, len: &Expr, init: Option<Expr>) -> Expr {
        match self.elem_type {
            ElemType::Float(fty) => fp_encoding(fty).dot(a, b, len, init),
            ElemType::Int(w) => int_dot(a, b, len, init, w),
            ElemType::Index => int_dot(a, b, len, init, Index::BITS),
        }
    }

    fn reduce_sum(&self, a: &Expr, len: &Expr, init: Option<Expr>) -> Expr {
        match self.elem_type {
            ElemType::Float(fty) => fp_encoding(fty).sum(a, len, init),
            ElemType::Int(w) => int_sum(a, len, init, w),
            ElemType::Index => int_sum(a, len, init, Index::BITS),
        }
    }

    /// Dot product of both operands' full 1-D arrays.
    pub fn dot(&self, t2: &Tensor, init: Option<Expr>) -> Expr {
        let len = self.size_1d();
        self.reduce_dot(&self.arr, &t2.arr, &len, init)
    }

    /// Sum of all elements.
    pub fn sum(&self, init: Option<Expr>) -> Expr {
        let len = self.size_1d();
        self.reduce_sum(&self.arr, &len, init)
    }

    /// Sum along one axis; that axis collapses to size 1.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert!(axis < self.rank());
        let ind_vars = Index::bound_index_vars(self.rank());

        let mut ofs: Vec<Expr> = Vec::with_capacity(self.rank());
        ofs.extend(ind_vars[..axis].iter().cloned());
        ofs.push(Index::zero().into_expr());
        ofs.extend(ind_vars[axis + 1..].iter().cloned());

        let mut subtensor_sz = Vec::with_capacity(self.rank());
        let mut new_sizes = Vec::with_capacity(self.rank());
        for i in 0..self.rank() {
            subtensor_sz.push(if i == axis { self.dim(i) } else { Index::one().into_expr() });
            new_sizes.push(if i == axis { Index::one().into_expr() } else { self.dim(i) });
        }

        let row = self.to_1d_array_with_ofs(&ofs, &subtensor_sz);
        let summation = self.reduce_sum(&row, &self.dim(axis), None);

        Self::mk_initialized_lambda(self.elem_type, new_sizes, ind_vars, summation)
    }

    fn fp_enc(&self) -> SymResult<FpEncoding> {
        self.elem_type.float_ty().map(fp_encoding).ok_or_else(|| {
            SymError::Unsupported(format!("pooling on {} tensors is not supported", self.elem_type))
        })
    }

    /// Output frame shared by the pooling operations: NHWC input, 2-D
    /// kernel, stride-inclusive numerator and no dilation.
    fn pool_parts(
        &self,
        kernel_dims: &[Expr],
        strides: &[Expr],
    ) -> (Vec<Expr>, Vec<Expr>, Expr, Expr) {
        assert_eq!(self.rank(), 4, "pooling runs on NHWC tensors");
        assert_eq!(kernel_dims.len(), 2);
        assert_eq!(strides.len(), 2);

        let output_dims = vec![
            self.dim(0),
            self.dim(1).add(&strides[0]).sub(&kernel_dims[0]).udiv(&strides[0]),
            self.dim(2).add(&strides[1]).sub(&kernel_dims[1]).udiv(&strides[1]),
            self.dim(3),
        ];
        let output_idxs = Index::bound_index_vars(4);

        let kernel_idx = Index::var("kernelIdx", VarKind::Bound).into_expr();
        let kernel_idxs = from_1d_idx(&kernel_idx, kernel_dims);
        let input_idxs = vec![
            output_idxs[0].clone(),
            output_idxs[1].mul(&strides[0]).add(&kernel_idxs[0]),
            output_idxs[2].mul(&strides[1]).add(&kernel_idxs[1]),
            output_idxs[3].clone(),
        ];
        let kernel_lambda = Expr::lambda1(&kernel_idx, &self.get(&input_idxs));
        let kernel_size = kernel_dims[0].mul(&kernel_dims[1]);

        (output_dims, output_idxs, kernel_lambda, kernel_size)
    }

    pub fn sum_pool(
        &self,
        kernel_dims: &[Expr],
        strides: &[Expr],
        init: Option<Tensor>,
    ) -> SymResult<Tensor> {
        let enc = self.fp_enc()?;
        let (output_dims, output_idxs, kernel_lambda, kernel_size) =
            self.pool_parts(kernel_dims, strides);
        let init_val = init.map(|t| t.get(&output_idxs));
        let out = enc.sum(&kernel_lambda, &kernel_size, init_val);
        Ok(Self::mk_initialized_lambda(self.elem_type, output_dims, output_idxs, out))
    }

    pub fn avg_pool(
        &self,
        kernel_dims: &[Expr],
        strides: &[Expr],
        init: Option<Tensor>,
    ) -> SymResult<Tensor> {
        let enc = self.fp_enc()?;
        let (output_dims, output_idxs, kernel_lambda, kernel_size) =
            self.pool_parts(kernel_dims, strides);
        let init_val = init.map(|t| t.get(&output_idxs));
        let sum = enc.sum(&kernel_lambda, &kernel_size, init_val);
        let count = enc.cast_from_signed_int(&kernel_size);
        let out = enc.div(&sum, &count);
        Ok(Self::mk_initialized_lambda(self.elem_type, output_dims, output_idxs, out))
    }

    pub fn max_pool(
        &self,
        kernel_dims: &[Expr],
        strides: &[Expr],
        init: Option<Tensor>,
    ) -> SymResult<Tensor> {
        let enc = self.fp_enc()?;
        let (output_dims, output_idxs, kernel_lambda, kernel_size) =
            self.pool_parts(kernel_dims, strides);
        let init_val = init.map(|t| t.get(&output_idxs));
        let out = enc.max(&kernel_lambda, &kernel_size, init_val);
        Ok(Self::mk_initialized_lambda(self.elem_type, output_dims, output_idxs, out))
    }

    /// Refinement: the receiver is the source. Wherever the source has an
    /// initialized element, the target must be initialized and agree on it.
    /// Returns the formula plus the free index variable it quantifies over.
    pub fn refines(&self, other: &Tensor) -> (Expr, Vec<Expr>) {
        assert_eq!(self.elem_type, other.elem_type);

        let sz = self.dims.len();
        if other.dims.len() != sz {
            return (Expr::from_bool(false), vec![]);
        }

        let mut size_match = Expr::from_bool(true);
        for i in 0..sz {
            size_match = size_match.and(&other.dim(i).eq(&self.dim(i)));
        }
        let size_match = size_match.simplify();
        if size_match.is_false() {
            return (size_match, vec![]);
        }

        let i = Index::var("i", VarKind::Unbound).into_expr();
        let src_elem = from_expr(self.arr.select(&i), &self.elem_type)
            .expect("tensor elements are primitive");
        let tgt_elem = from_expr(other.arr.select(&i), &self.elem_type)
            .expect("tensor elements are primitive");
        let (elem_refines, elem_params) = src_elem.refines(&tgt_elem);
        debug_assert!(elem_params.is_empty());

        let formula = size_match.and(&i.ult(&get_1d_size(&self.dims)).implies(
            &self.initialized.select(&i).implies(
                &other.initialized.select(&i).and(&elem_refines),
            ),
        ));
        (formula, vec![i])
    }

    pub fn eval(&self, m: &Model) -> Tensor {
        Self::from_parts(
            self.elem_type,
            simplify_list(&m.eval_list(&self.dims)),
            m.eval_expr(&self.arr),
            m.eval_expr(&self.initialized),
        )
    }

    /// Lift a constant attribute into a tensor.
    ///
    /// Dense constants above the session's size bound are abstracted: the
    /// cache returns the previously minted symbolic tensor for an equal
    /// attribute, rewrites it through `affine` for a recognized transpose
    /// or trailing-axis reduction, and otherwise mints a fresh
    /// `unknown_const#k`.
    pub fn from_elems_attr(tensorty: &TensorType, attr: &ElemsAttr) -> SymResult<Tensor> {
        let elem_type = tensorty.elem;

        match attr {
            ElemsAttr::Splat { value, .. } => {
                let dims = dims_of(&tensorty.dims, UnknownDims::Reject)?;
                let v = attr_to_value_ty(value)?;
                Tensor::splat(elem_type, get_expr(&v), dims)
            }

            ElemsAttr::Dense { ty, .. } => {
                assert!(ty.has_static_shape(), "constant types have static shapes");
                let rank = ty.rank();
                let dim_exprs: Vec<Expr> = ty
                    .dims
                    .iter()
                    .map(|&d| Index::new(d as u64).into_expr())
                    .collect();
                let total = ty.num_elements().unwrap();

                let max = session::max_const_size();
                if max >= 0 && total > max {
                    debug!(total, max, "dense constant exceeds the abstraction bound");

                    let cached = session::with_abstract_attrs(|cache| {
                        for (a, t) in cache.iter() {
                            if a == attr {
                                debug!("reusing cached abstract tensor");
                                return Some(t.clone());
                            }
                            if is_transposed(attr, a) {
                                // Transposing a constant happens frequently.
                                debug!("rewriting cached abstract tensor as a transpose");
                                let t_dims = t.dims.clone();
                                let ind_vars = Index::bound_index_vars(t_dims.len());
                                let mut new_dims = Vec::with_capacity(t_dims.len());
                                let mut new_vars = Vec::with_capacity(t_dims.len());
                                for i in 1..t_dims.len() {
                                    new_dims.push(t_dims[i].clone());
                                    new_vars.push(ind_vars[i].clone());
                                }
                                new_dims.push(t_dims[0].clone());
                                new_vars.push(ind_vars[0].clone());
                                return Some(t.affine(&new_vars, &ind_vars, new_dims));
                            }
                            if is_simple_reduction(attr, a) {
                                debug!("rewriting cached abstract tensor as a reduction");
                                let idx = Index::var("idx", VarKind::Bound).into_expr();
                                let mut dims = t.dims.clone();
                                let mut new_vars = vec![idx.clone()];
                                for _ in 1..rank {
                                    new_vars.push(Index::zero().into_expr());
                                    dims.push(Index::one().into_expr());
                                }
                                return Some(t.affine(&new_vars, std::slice::from_ref(&idx), dims));
                            }
                        }
                        None
                    });
                    if let Some(t) = cached {
                        return Ok(t);
                    }

                    let name = session::next_unknown_const_name();
                    debug!(%name, "minting abstract tensor for dense constant");
                    let newt = Tensor::var(elem_type, &name, &dim_exprs, true)?;
                    session::with_abstract_attrs(|cache| cache.push((attr.clone(), newt.clone())));
                    return Ok(newt);
                }

                if rank == 0 {
                    let v = get_expr(&attr_to_value_ty(&attr.value_at(&[]))?);
                    return Tensor::dense_1d(elem_type, vec![v]);
                }

                // Row-major enumeration: the last axis increments fastest,
                // carries propagate to the preceding axes.
                assert!(total > 0, "empty constant tensor");
                let dims_u: Vec<u64> = ty.dims.iter().map(|&d| d as u64).collect();
                let mut idx_nd = vec![0u64; rank];
                let mut exprs = Vec::with_capacity(total as usize);
                loop {
                    if idx_nd[rank - 1] == dims_u[rank - 1] {
                        let mut focus = rank - 1;
                        while focus >= 1 && idx_nd[focus] == dims_u[focus] {
                            idx_nd[focus] = 0;
                            idx_nd[focus - 1] += 1;
                            focus -= 1;
                        }
                        if idx_nd[0] == dims_u[0] {
                            break;
                        }
                    }
                    exprs.push(get_expr(&attr_to_value_ty(&attr.value_at(&idx_nd))?));
                    idx_nd[rank - 1] += 1;
                }

                Ok(Tensor::dense_1d(elem_type, exprs)?.reshape(&dim_exprs))
            }

            ElemsAttr::Sparse { ty, indices, values } => {
                let total = attr.total_size();
                let dim_exprs: Vec<Expr> = ty
                    .dims
                    .iter()
                    .map(|&d| Index::new(d as u64).into_expr())
                    .collect();

                let max = session::max_const_size();
                if max >= 0 && total > max {
                    debug!(total, max, "sparse constant exceeds the abstraction bound");

                    let cached = session::with_abstract_attrs(|cache| {
                        cache.iter().find(|(a, _)| a == attr).map(|(_, t)| t.clone())
                    });
                    if let Some(t) = cached {
                        return Ok(t);
                    }

                    let name = session::next_unknown_const_name();
                    debug!(%name, "minting abstract tensor for sparse constant");
                    let newt = Tensor::var(elem_type, &name, &dim_exprs, true)?;
                    session::with_abstract_attrs(|cache| cache.push((attr.clone(), newt.clone())));
                    return Ok(newt);
                }

                // Unspecified locations are positive zero.
                let zero = get_zero(&elem_type)
                    .ok_or_else(|| SymError::Unsupported("unsupported element type".into()))?;
                let elems = values
                    .iter()
                    .map(|v| Ok(get_expr(&attr_to_value_ty(v)?)))
                    .collect::<SymResult<Vec<_>>>()?;
                let dims_u: Vec<u64> = ty.dims.iter().map(|&d| d as u64).collect();
                Tensor::sparse(elem_type, indices, &elems, &dims_u, &zero)
            }
        }
    }

    /// The subtensor at `offbegins` of shape `sizes`, flattened to 1-D.
    fn to_1d_array_with_ofs(&self, offbegins: &[Expr], sizes: &[Expr]) -> Expr {
        assert_eq!(offbegins.len(), sizes.len());

        let idxvar = Index::var("idx", VarKind::Bound).into_expr();
        let relidxs = from_1d_idx(&idxvar, sizes);
        let absidxs: Vec<Expr> = relidxs
            .iter()
            .zip(offbegins)
            .map(|(rel, ofs)| rel.add(ofs).simplify())
            .collect();
        Expr::lambda1(&idxvar, &self.get(&absidxs))
    }
}

impl ShapedValue for Tensor {
    fn elem_type(&self) -> ElemType {
        self.elem_type
    }

    fn dims(&self) -> Vec<Expr> {
        self.dims.clone()
    }

    fn get(&self, indices: &[Expr]) -> Expr {
        Tensor::get(self, indices)
    }
}

// attr1[i_1]..[i_N] == attr2[i_N][i_1]..[i_{N-1}], for ranks 2, 3, 4.
fn is_transposed(attr1: &ElemsAttr, attr2: &ElemsAttr) -> bool {
    if !matches!(attr1, ElemsAttr::Dense { .. }) || !matches!(attr2, ElemsAttr::Dense { .. }) {
        return false;
    }
    let t1 = attr1.tensor_ty();
    let t2 = attr2.tensor_ty();
    if t1.rank() != t2.rank() {
        return false;
    }

    let d1 = |i: usize| t1.dim_size(i) as u64;
    let d2 = |i: usize| t2.dim_size(i) as u64;
    match t1.rank() {
        2 => {
            if d1(0) != d2(1) || d1(1) != d2(0) {
                return false;
            }
            for i in 0..d1(0) {
                for j in 0..d1(1) {
                    if attr1.value_at(&[i, j]) != attr2.value_at(&[j, i]) {
                        return false;
                    }
                }
            }
            true
        }
        3 => {
            if d1(0) != d2(1) || d1(1) != d2(2) || d1(2) != d2(0) {
                return false;
            }
            for i in 0..d1(0) {
                for j in 0..d1(1) {
                    for k in 0..d1(2) {
                        if attr1.value_at(&[i, j, k]) != attr2.value_at(&[k, i, j]) {
                            return false;
                        }
                    }
                }
            }
            true
        }
        4 => {
            if d1(0) != d2(1) || d1(1) != d2(2) || d1(2) != d2(3) || d1(3) != d2(0) {
                return false;
            }
            for i in 0..d1(0) {
                for j in 0..d1(1) {
                    for k in 0..d1(2) {
                        for l in 0..d1(3) {
                            if attr1.value_at(&[i, j, k, l]) != attr2.value_at(&[l, i, j, k]) {
                                return false;
                            }
                        }
                    }
                }
            }
            true
        }
        _ => false,
    }
}

// attr1 is <dx1x1..x1>, attr2 is <d>, same leading values.
fn is_simple_reduction(attr1: &ElemsAttr, attr2: &ElemsAttr) -> bool {
    if !matches!(attr1, ElemsAttr::Dense { .. }) || !matches!(attr2, ElemsAttr::Dense { .. }) {
        return false;
    }
    let t1 = attr1.tensor_ty();
    let t2 = attr2.tensor_ty();
    if t1.rank() <= t2.rank() || t2.rank() != 1 {
        return false;
    }
    if t1.dim_size(0) != t2.dim_size(0) {
        return false;
    }
    for i in 1..t1.rank() {
        if t1.dim_size(i) != 1 {
            return false;
        }
    }

    for i in 0..t2.dim_size(0) as u64 {
        let mut idxs = vec![0u64; t1.rank()];
        idxs[0] = i;
        if attr1.value_at(&idxs) != attr2.value_at(&[i]) {
            return false;
        }
    }
    true
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        assert!(!self.dims.is_empty());

        write!(f, "(dim: {}", self.dims[0].simplify())?;
        for d in &self.dims[1..] {
            write!(f, ", {}", d.simplify())?;
        }
        write!(f, ") ")?;

        if let Some(v) = match_const_splat(&self.initialized) {
            if v.is_false() {
                return write!(f, "(uninitialized)");
            }
        }

        let fmt_coords = |idxs: &[Expr]| -> String {
            let parts: Vec<String> = idxs
                .iter()
                .map(|e| match e.as_u64() {
                    Some(c) => c.to_string(),
                    None => e.to_string(),
                })
                .collect();
            format!("({})", parts.join(", "))
        };
        let fmt_elem = |e: Expr| -> String {
            match from_expr(e, &self.elem_type) {
                Some(v) => v.to_string(),
                None => "(unknown)".to_string(),
            }
        };

        const MAX_SIZE_TO_PRINT: u64 = 16;
        let size = get_1d_size(&self.dims).simplify();
        if let Some(n) = size.as_u64().filter(|&n| n <= MAX_SIZE_TO_PRINT) {
            // Small and concrete: print element by element.
            for i in 0..n {
                let idx1d = simplify_list(&from_1d_idx(&Index::new(i).into_expr(), &self.dims));
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} -> ", fmt_coords(&idx1d))?;

                let init = self.is_initialized(&idx1d).simplify();
                if init.is_true() {
                    write!(f, "{}", fmt_elem(self.get(&idx1d).simplify()))?;
                } else if init.is_false() {
                    write!(f, "(uninit.)")?;
                } else {
                    write!(f, "(unknown)")?;
                }
            }
            return Ok(());
        }

        // Otherwise walk the store chain; the first write to an index wins.
        let mut arr = self.arr.clone();
        let mut has_store = false;
        let mut visited: HashSet<u64> = HashSet::new();
        loop {
            if let Some((inner, idx, val)) = match_store(&arr) {
                let mut duplicated = false;
                if let Some(c) = idx.as_u64() {
                    duplicated = !visited.insert(c);
                    if !duplicated {
                        let idx_nd = simplify_list(&from_1d_idx(&idx, &self.dims));
                        write!(f, "{}", fmt_coords(&idx_nd))?;
                    }
                } else {
                    write!(f, "{idx}")?;
                }
                if !duplicated {
                    write!(f, " -> {}, ", fmt_elem(val))?;
                }
                arr = inner;
                has_store = true;
            } else if let Some(v) = match_const_splat(&arr) {
                if has_store {
                    write!(f, "else {}", fmt_elem(v))?;
                } else {
                    write!(f, "a splat tensor of {}", fmt_elem(v))?;
                }
                break;
            } else {
                if has_store {
                    write!(f, "else ")?;
                }
                write!(f, "{arr}")?;
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splat_rejects_wide_elements() {
        let r = Tensor::splat(
            ElemType::Int(128),
            Expr::bv_u64(0, 64),
            vec![Index::new(2).into_expr()],
        );
        assert!(r.is_err());
    }

    #[test]
    fn static_shapes_are_unconditionally_well_defined() {
        let t = Tensor::splat(
            ElemType::I32,
            Expr::bv_u64(7, 32),
            vec![Index::new(2).into_expr(), Index::new(3).into_expr()],
        )
        .unwrap();
        assert!(t.well_defined().is_true());
        assert!(t.is_in_bounds(&[Index::new(1).into_expr(), Index::new(2).into_expr()]).is_true());
        assert!(t.is_in_bounds(&[Index::new(1).into_expr(), Index::new(3).into_expr()]).is_false());
    }

    #[test]
    fn symbolic_dims_get_size_bounds() {
        let d = Index::var("d", VarKind::Unbound).into_expr();
        let t = Tensor::var(ElemType::I32, "t", &[d, Index::new(2).into_expr()], true).unwrap();
        assert!(!t.well_defined().is_true());
    }

    #[test]
    fn splat_display_mentions_the_value() {
        let t = Tensor::splat(
            ElemType::I32,
            Expr::bv_u64(7, 32),
            vec![Index::new(100).into_expr()],
        )
        .unwrap();
        let s = t.to_string();
        assert!(s.contains("splat"), "got: {s}");
    }

    #[test]
    fn uninitialized_tensor_prints_as_such() {
        let t = Tensor::var(
            ElemType::I32,
            "t",
            &[Index::new(100).into_expr()],
            false,
        )
        .unwrap();
        assert!(t.to_string().contains("(uninitialized)"));
    }
}
