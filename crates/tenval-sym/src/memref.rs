//! Memory references: a handle into the block memory model plus an affine
//! layout mapping N-D coordinates to 1-D offsets inside the block.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tenval_ir::{ElemType, MemRefLayout, MemRefType, DYNAMIC};
use tenval_mem::{AccessInfo, Memory};
use tenval_smt::{
    fits_in_dims, fresh_name, from_1d_idx, get_1d_size, to_1d_idx, Expr, FnDecl, Model, Sort,
    VarKind,
};

use crate::index::Index;
use crate::integer::Integer;
use crate::shaped::ShapedValue;
use crate::{prim_sort, SymError, SymResult};

/// Shared handle to the memory a memref points into.
pub type MemoryRef = Rc<RefCell<Memory>>;

/// An affine layout, stored as a first-class record: the mapping and
/// inbounds terms are phrased over `ind_vars` and applied by substitution.
///
/// For identity layouts the inverse is the exact udiv/urem split. Otherwise
/// the inverse is a family of uninterpreted functions `inverse_fn_i`, given
/// meaning by `precondition`; the caller asserts the precondition only when
/// it actually uses the inverse.
#[derive(Clone)]
pub struct Layout {
    ind_vars: Vec<Expr>,
    inbounds: Expr,
    mapping: Expr,
    inverse_arg: Expr,
    inverse_mappings: Vec<Expr>,
    precondition: Expr,
    identity: bool,
}

impl Layout {
    /// Row-major layout over the given dims.
    pub fn identity(dims: &[Expr]) -> Layout {
        let ind_vars = Index::bound_index_vars(dims.len());
        let inbounds = fits_in_dims(&ind_vars, dims);
        let mapping = to_1d_idx(&ind_vars, dims);
        let inverse_arg = Index::var("inv", VarKind::Bound).into_expr();
        let inverse_mappings = from_1d_idx(&inverse_arg, dims);
        Layout {
            ind_vars,
            inbounds,
            mapping,
            inverse_arg,
            inverse_mappings,
            precondition: Expr::from_bool(true),
            identity: true,
        }
    }

    /// Layout from an arbitrary forward mapping.
    ///
    /// `mapping` and `inbounds` are terms over `ind_vars`. The inverse
    /// cannot be stated in closed form, so each coordinate gets a fresh
    /// uninterpreted inverse function and the precondition
    /// `∀ iv. inbounds(iv) → inverse_fn_i(mapping(iv)) = iv_i`.
    pub fn strided(ind_vars: Vec<Expr>, mapping: Expr, inbounds: Expr) -> Layout {
        let inverse_arg = Index::var("inv", VarKind::Bound).into_expr();
        let mut condition = Expr::from_bool(true);
        let mut inverse_mappings = Vec::with_capacity(ind_vars.len());
        for (i, iv) in ind_vars.iter().enumerate() {
            let f = FnDecl::new(
                fresh_name(&format!("inverse_fn{i}")),
                &[&Index::sort()],
                &Index::sort(),
            );
            condition = condition.and(&f.apply(std::slice::from_ref(&mapping)).eq(iv));
            inverse_mappings.push(f.apply(std::slice::from_ref(&inverse_arg)));
        }
        let precondition = Expr::forall(&ind_vars, &inbounds.implies(&condition));
        Layout {
            ind_vars,
            inbounds,
            mapping,
            inverse_arg,
            inverse_mappings,
            precondition,
            identity: false,
        }
    }

    pub fn ind_vars(&self) -> &[Expr] {
        &self.ind_vars
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn precondition(&self) -> &Expr {
        &self.precondition
    }

    /// Membership of a coordinate vector in the layout's hyper-rectangle.
    pub fn inbounds_at(&self, idxs: &[Expr]) -> Expr {
        assert_eq!(idxs.len(), self.ind_vars.len());
        self.inbounds.substitute(&self.ind_vars, idxs)
    }

    /// Forward linearization of a coordinate vector.
    pub fn mapping_at(&self, idxs: &[Expr]) -> Expr {
        assert_eq!(idxs.len(), self.ind_vars.len());
        self.mapping.substitute(&self.ind_vars, idxs)
    }

    /// Split a 1-D offset back into N-D coordinates. Users of the result
    /// must also assert [`Layout::precondition`].
    pub fn inverse_indices(&self, idx: &Expr) -> Vec<Expr> {
        self.inverse_mappings
            .iter()
            .map(|m| m.substitute(std::slice::from_ref(&self.inverse_arg), std::slice::from_ref(idx)))
            .collect()
    }
}

/// A reference to a region of a memory block.
#[derive(Clone)]
pub struct MemRef {
    memory: MemoryRef,
    elem_type: ElemType,
    bid: Expr,
    offset: Index,
    dims: Vec<Expr>,
    layout: Layout,
    is_view_ref: Expr,
}

impl MemRef {
    pub const MAX_MEMREF_SIZE: u64 = 1_000_000;
    pub const MAX_DIM_SIZE: u64 = 1000;

    fn check_elem(elem_type: &ElemType) -> SymResult<()> {
        prim_sort(elem_type).map(|_| ()).ok_or_else(|| {
            SymError::Unsupported(format!("{elem_type} is not a valid memref element type"))
        })
    }

    pub fn new(
        memory: MemoryRef,
        elem_type: ElemType,
        bid: Expr,
        offset: Index,
        dims: Vec<Expr>,
        layout: Layout,
        is_view_ref: Expr,
    ) -> SymResult<MemRef> {
        Self::check_elem(&elem_type)?;
        Ok(MemRef {
            memory,
            elem_type,
            bid,
            offset,
            dims,
            layout,
            is_view_ref,
        })
    }

    /// An unbound memref: symbolic block id, offset and view flag.
    pub fn var(
        memory: MemoryRef,
        elem_type: ElemType,
        name: &str,
        dims: &[Expr],
        layout: Layout,
    ) -> SymResult<MemRef> {
        Self::check_elem(&elem_type)?;
        let bid_bits = memory.borrow().bid_bits();
        let bid = Expr::var(&Sort::bv(bid_bits), &format!("{name}_bid"), VarKind::Unbound);
        let offset = Index::var(&format!("{name}_offset"), VarKind::Unbound);
        let is_view_ref = Expr::var(
            &Sort::bool_sort(),
            &format!("{name}_isviewref"),
            VarKind::Unbound,
        );
        Ok(MemRef {
            memory,
            elem_type,
            bid,
            offset,
            dims: dims.to_vec(),
            layout,
            is_view_ref,
        })
    }

    pub fn fresh(
        memory: MemoryRef,
        elem_type: ElemType,
        dims: &[Expr],
        layout: Layout,
    ) -> SymResult<MemRef> {
        let name = fresh_name("memref");
        Self::var(memory, elem_type, &name, dims, layout)
    }

    /// Derive the layout of an IR memref type.
    pub fn layout_of(memref_ty: &MemRefType, dims: &[Expr]) -> Layout {
        let const_or_fresh = |v: i64, name: &str| -> Expr {
            if v == DYNAMIC {
                Index::var(name, VarKind::Fresh).into_expr()
            } else {
                Index::from_i64(v).into_expr()
            }
        };

        match &memref_ty.layout {
            MemRefLayout::Identity => Layout::identity(dims),
            MemRefLayout::Strided { offset, strides } => {
                let offset_e = const_or_fresh(*offset, "offset");
                let strides_e: Vec<Expr> =
                    strides.iter().map(|&s| const_or_fresh(s, "strides")).collect();

                let ind_vars = Index::bound_index_vars(strides.len());
                let mut mapping = offset_e;
                for (iv, s) in ind_vars.iter().zip(&strides_e) {
                    mapping = mapping.add(&s.mul(iv));
                }
                let inbounds = fits_in_dims(&ind_vars, dims);
                Layout::strided(ind_vars, mapping, inbounds)
            }
        }
    }

    // === Accessors ===

    pub fn elem_type(&self) -> ElemType {
        self.elem_type
    }

    pub fn bid(&self) -> &Expr {
        &self.bid
    }

    pub fn offset(&self) -> &Index {
        &self.offset
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

    pub fn is_view_ref(&self) -> &Expr {
        &self.is_view_ref
    }

    pub fn is_identity_map(&self) -> bool {
        self.layout.is_identity()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Layout precondition to assert when inverse mappings are in play.
    pub fn precondition(&self) -> Expr {
        self.layout.precondition().clone()
    }

    pub fn well_defined(&self) -> Expr {
        let size = self.size_1d();
        if size.is_numeral() {
            return Expr::from_bool(true);
        }
        let mut e = size.ule(&Expr::bv_u64(Self::MAX_MEMREF_SIZE, Index::BITS));
        for dim in &self.dims {
            if dim.is_numeral() {
                continue;
            }
            e = e.and(&dim.ule(&Expr::bv_u64(Self::MAX_DIM_SIZE, Index::BITS)));
        }
        e.simplify()
    }

    // === Addressing ===

    fn to_1d_idx_with_layout(&self, idxs: &[Expr]) -> (Expr, Expr) {
        let idxs = if idxs.is_empty() {
            vec![Index::zero().into_expr()]
        } else {
            idxs.to_vec()
        };
        (self.layout.mapping_at(&idxs), self.layout.inbounds_at(&idxs))
    }

    pub fn get(&self, indices: &[Expr]) -> Expr {
        let (idx, _) = self.to_1d_idx_with_layout(indices);
        let (loaded, _) = self.memory.borrow().load(
            &self.elem_type,
            &self.bid,
            &self.offset.expr().add(&idx),
        );
        loaded.lock()
    }

    /// Read one element together with the access conditions; the layout
    /// inbounds is conjoined onto the memory's.
    pub fn get_with_access_info(&self, indices: &[Expr]) -> (Expr, AccessInfo) {
        let (idx, inbounds) = self.to_1d_idx_with_layout(indices);
        let (loaded, mut info) = self.memory.borrow().load(
            &self.elem_type,
            &self.bid,
            &self.offset.expr().add(&idx),
        );
        info.inbounds = info.inbounds.and(&inbounds);
        (loaded.lock(), info)
    }

    pub fn store(&self, value: &Expr, indices: &[Expr]) -> AccessInfo {
        let (idx, inbounds) = self.to_1d_idx_with_layout(indices);
        let mut info = self.memory.borrow_mut().store(
            &self.elem_type,
            value,
            &self.bid,
            &self.offset.expr().add(&idx),
        );
        info.inbounds = info.inbounds.and(&inbounds);
        info
    }

    /// Whether a raw 1-D offset lands inside this memref's footprint.
    /// Requires the layout precondition.
    pub fn is_valid_1d_offset(&self, ofs0: &Expr) -> Expr {
        let ofs = ofs0.sub(self.offset.expr());
        let (idx, inbounds) = self.to_1d_idx_with_layout(&self.layout.inverse_indices(&ofs));
        idx.eq(&ofs).and(&inbounds)
    }

    /// The backing block holds at least `offset + ∏dims` elements.
    pub fn is_in_bounds(&self) -> Expr {
        let numelem = self.memory.borrow().num_elems_of(&self.elem_type, &self.bid);
        let size = self.size_1d();
        numelem
            .uge(&size)
            .and(&self.offset.expr().ule(&numelem.sub(&size)))
    }

    pub fn is_global_block(&self) -> Expr {
        self.memory.borrow().is_global_block(&self.elem_type, &self.bid)
    }

    pub fn is_local_block(&self) -> Expr {
        self.memory.borrow().is_local_block(&self.elem_type, &self.bid)
    }

    pub fn get_liveness(&self) -> Expr {
        self.memory.borrow().liveness(&self.elem_type, &self.bid)
    }

    pub fn is_created_by_alloc(&self) -> Expr {
        self.memory.borrow().is_created_by_alloc(&self.elem_type, &self.bid)
    }

    pub fn set_writable(&self, writable: bool) {
        self.memory
            .borrow_mut()
            .set_writable(&self.elem_type, &self.bid, writable);
    }

    pub fn is_fully_initialized(&self) -> Expr {
        let idxs = Index::bound_index_vars(self.rank());
        let (_, info) = self.get_with_access_info(&idxs);
        Expr::forall(&idxs, &info.inbounds.implies(&info.initialized))
    }

    /// Disjointness of two identity-layout memrefs: different blocks, or
    /// non-overlapping offset intervals within a shared block.
    pub fn noalias(&self, other: &MemRef) -> SymResult<Expr> {
        if !self.is_identity_map() || !other.is_identity_map() {
            return Err(SymError::Unsupported(
                "noalias check with an arbitrary layout memref is not supported yet".into(),
            ));
        }

        let l1 = self.offset.expr().clone();
        let r1 = l1.add(&self.size_1d());
        let l2 = other.offset.expr().clone();
        let r2 = l2.add(&other.size_1d());

        let same_bid = self.bid.eq(&other.bid);
        Ok(same_bid
            .not()
            .or(&same_bid.and(&r2.ule(&l1).or(&r1.ule(&l2)))))
    }

    /// A view selecting `sizes[i]` elements starting at `offsets[i]` with
    /// step `strides[i]` per dim. Dims listed in `unused_dims` (statically
    /// known to be 1) are dropped from the result's rank, `rank_diff` of
    /// them.
    pub fn subview(
        &self,
        offsets: &[Expr],
        sizes: &[Expr],
        strides: &[Expr],
        unused_dims: &HashSet<usize>,
        rank_diff: usize,
    ) -> MemRef {
        if rank_diff > 0 {
            let mut ind_vars = Vec::with_capacity(sizes.len());
            let mut reduced_sizes = Vec::new();
            let mut remaining = rank_diff;
            for i in 0..sizes.len() {
                if remaining > 0 && unused_dims.contains(&i) {
                    ind_vars.push(Index::zero().into_expr());
                    remaining -= 1;
                } else {
                    ind_vars.push(self.layout.ind_vars()[i].clone());
                    reduced_sizes.push(sizes[i].clone());
                }
            }

            let layout = self.create_subview_layout(&ind_vars, offsets, strides, sizes);
            MemRef {
                memory: self.memory.clone(),
                elem_type: self.elem_type,
                bid: self.bid.clone(),
                offset: self.offset.clone(),
                dims: reduced_sizes,
                layout,
                is_view_ref: Expr::from_bool(true),
            }
        } else {
            let ind_vars = self.layout.ind_vars().to_vec();
            let layout = self.create_subview_layout(&ind_vars, offsets, strides, sizes);
            MemRef {
                memory: self.memory.clone(),
                elem_type: self.elem_type,
                bid: self.bid.clone(),
                offset: self.offset.clone(),
                dims: sizes.to_vec(),
                layout,
                is_view_ref: Expr::from_bool(true),
            }
        }
    }

    // Compose the parent layout with the subview's strides and offsets:
    //   mapping'(new) = mapping(strides * new + offsets)
    // re-inserting constant zeros for reduced dims.
    fn create_subview_layout(
        &self,
        ind_vars_or_zero: &[Expr],
        offsets: &[Expr],
        strides: &[Expr],
        sizes: &[Expr],
    ) -> Layout {
        let n = self.layout.ind_vars().len();
        assert_eq!(ind_vars_or_zero.len(), n);
        assert_eq!(offsets.len(), n);
        assert_eq!(strides.len(), n);
        assert_eq!(sizes.len(), n);

        let mut ind_vars = Vec::new();
        let mut zero_positions = Vec::new();
        for (i, iv) in ind_vars_or_zero.iter().enumerate() {
            if iv.is_var() {
                ind_vars.push(iv.clone());
            } else {
                assert_eq!(
                    iv.as_u64(),
                    Some(0),
                    "subview induction slots hold a variable or the constant 0"
                );
                zero_positions.push(i);
            }
        }

        let mut full = ind_vars.clone();
        for &pos in &zero_positions {
            full.insert(pos, Index::zero().into_expr());
        }
        let parent_idxs: Vec<Expr> = full
            .iter()
            .zip(strides)
            .zip(offsets)
            .map(|((iv, s), o)| iv.mul(s).add(o))
            .collect();

        let mapping = self.layout.mapping_at(&parent_idxs);
        let inbounds = self
            .layout
            .inbounds_at(&parent_idxs)
            .and(&fits_in_dims(&full, sizes));
        Layout::strided(ind_vars, mapping, inbounds)
    }

    /// Same block and offset, new shape. Only identity layouts.
    pub fn reshape(&self, new_dims: &[Expr]) -> SymResult<MemRef> {
        if !self.is_identity_map() {
            return Err(SymError::Unsupported(
                "reshape of a non-identity layout memref is not supported".into(),
            ));
        }
        Ok(MemRef {
            memory: self.memory.clone(),
            elem_type: self.elem_type,
            bid: self.bid.clone(),
            offset: self.offset.clone(),
            dims: new_dims.to_vec(),
            layout: Layout::identity(new_dims),
            is_view_ref: Expr::from_bool(true),
        })
    }

    /// `cond ? t : f` over the packed handle. The layouts and dims of both
    /// sides are assumed equivalent.
    pub fn mk_ite(cond: &Expr, t: &MemRef, f: &MemRef) -> MemRef {
        assert!(Rc::ptr_eq(&t.memory, &f.memory));
        assert!(t.dims.len() == f.dims.len() && t.elem_type == f.elem_type);

        let is_true = cond.eq(Integer::bool_true().expr());
        let bid = is_true.ite(&t.bid, &f.bid);
        let offset = Index::from(is_true.ite(t.offset.expr(), f.offset.expr()));
        let is_view_ref = is_true.ite(&t.is_view_ref, &f.is_view_ref);
        MemRef {
            memory: t.memory.clone(),
            elem_type: t.elem_type,
            bid,
            offset,
            dims: t.dims.clone(),
            layout: t.layout.clone(),
            is_view_ref,
        }
    }

    /// Refinement: equality of the packed handle (block id, offset, dims,
    /// and, for non-identity layouts, the mapping over the inbounds region).
    pub fn refines(&self, other: &MemRef) -> (Expr, Vec<Expr>) {
        if other.dims.len() != self.dims.len() {
            return (Expr::from_bool(false), vec![]);
        }

        let mut e = other
            .bid
            .eq(&self.bid)
            .and(&other.offset.expr().eq(self.offset.expr()));
        for i in 0..self.dims.len() {
            e = e.and(&other.dim(i).eq(&self.dim(i)));
        }

        if !(self.is_identity_map() && other.is_identity_map()) {
            let ivs = Index::bound_index_vars(self.rank());
            let m1 = self.layout.mapping_at(&ivs);
            let m2 = other.layout.mapping_at(&ivs);
            let inb = self.layout.inbounds_at(&ivs);
            e = e.and(&Expr::forall(&ivs, &inb.implies(&m1.eq(&m2))));
        }
        (e, vec![])
    }

    pub fn eval(&self, m: &Model) -> MemRef {
        let mut out = self.clone();
        out.dims = m.eval_list(&self.dims);
        out.bid = m.eval_expr(&self.bid);
        out.offset = Index::from(m.eval_expr(self.offset.expr()));
        out
    }
}

impl ShapedValue for MemRef {
    fn elem_type(&self) -> ElemType {
        self.elem_type
    }

    fn dims(&self) -> Vec<Expr> {
        self.dims.clone()
    }

    fn get(&self, indices: &[Expr]) -> Expr {
        MemRef::get(self, indices)
    }
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        assert!(!self.dims.is_empty());
        write!(
            f,
            "(bid: {}, offset: {}, dim: {}",
            self.bid.simplify(),
            self.offset,
            self.dims[0].simplify()
        )?;
        for d in &self.dims[1..] {
            write!(f, ", {}", d.simplify())?;
        }
        write!(f, ")")
    }
}
