//! Memref semantics against the block memory model.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tenval_ir::{ElemType, MemRefLayout, MemRefType};
use tenval_mem::{BlockKind, Memory};
use tenval_smt::Expr;
use tenval_sym::memref::MemoryRef;
use tenval_sym::{Index, Integer, Layout, MemRef};
use z3::{SatResult, Solver};

fn assert_valid(e: &Expr) {
    let solver = Solver::new();
    solver.assert(&e.dynamic().as_bool().unwrap().not());
    assert_eq!(solver.check(), SatResult::Unsat, "expected a valid formula: {e}");
}

fn idx(vals: &[u64]) -> Vec<Expr> {
    vals.iter().map(|&v| Index::new(v).into_expr()).collect()
}

fn new_memory() -> MemoryRef {
    Rc::new(RefCell::new(Memory::new(4, Index::BITS)))
}

/// A fully initialized identity-layout memref over a fresh block.
fn block_memref(memory: &MemoryRef, dims: &[u64]) -> MemRef {
    let n: u64 = dims.iter().product();
    let bid = memory.borrow_mut().new_block(
        ElemType::I32,
        Expr::bv_u64(n, Index::BITS),
        BlockKind::Global,
        false,
        true,
        true,
    );
    let dim_exprs = idx(dims);
    let layout = Layout::identity(&dim_exprs);
    MemRef::new(
        memory.clone(),
        ElemType::I32,
        bid,
        Index::zero(),
        dim_exprs,
        layout,
        Expr::from_bool(false),
    )
    .unwrap()
}

#[test]
fn store_then_get_roundtrip() {
    let memory = new_memory();
    let m = block_memref(&memory, &[4, 4]);

    let info = m.store(&Expr::bv_i64(42, 32), &idx(&[2, 1]));
    assert!(info.inbounds.simplify().is_true());
    assert_valid(&m.get(&idx(&[2, 1])).eq(&Expr::bv_i64(42, 32)));
}

#[test]
fn subview_reads_through_offsets() {
    let memory = new_memory();
    let parent = block_memref(&memory, &[4, 4]);
    let sub = parent.subview(&idx(&[1, 1]), &idx(&[2, 2]), &idx(&[1, 1]), &HashSet::new(), 0);

    assert_valid(&sub.get(&idx(&[0, 0])).eq(&parent.get(&idx(&[1, 1]))));
    assert_valid(&sub.get(&idx(&[1, 1])).eq(&parent.get(&idx(&[2, 2]))));
}

#[test]
fn subview_applies_strides() {
    let memory = new_memory();
    let parent = block_memref(&memory, &[8]);
    let sub = parent.subview(&idx(&[1]), &idx(&[3]), &idx(&[2]), &HashSet::new(), 0);

    // sub[i] = parent[1 + 2*i]
    assert_valid(&sub.get(&idx(&[0])).eq(&parent.get(&idx(&[1]))));
    assert_valid(&sub.get(&idx(&[2])).eq(&parent.get(&idx(&[5]))));
}

#[test]
fn rank_reducing_subview_drops_unit_dims() {
    let memory = new_memory();
    let parent = block_memref(&memory, &[4, 4]);
    let unused: HashSet<usize> = [0].into_iter().collect();
    let sub = parent.subview(&idx(&[2, 0]), &idx(&[1, 4]), &idx(&[1, 1]), &unused, 1);

    assert_eq!(sub.rank(), 1);
    assert_valid(&sub.get(&idx(&[3])).eq(&parent.get(&idx(&[2, 3]))));
}

#[test]
fn reshape_requires_identity_layout() {
    let memory = new_memory();
    let parent = block_memref(&memory, &[4, 4]);

    let flat = parent.reshape(&idx(&[16])).unwrap();
    assert_valid(&flat.get(&idx(&[6])).eq(&parent.get(&idx(&[1, 2]))));

    let strided_ty = MemRefType::new(
        ElemType::I32,
        vec![4, 4],
        MemRefLayout::Strided {
            offset: 0,
            strides: vec![8, 1],
        },
    );
    let dims = idx(&[4, 4]);
    let layout = MemRef::layout_of(&strided_ty, &dims);
    let strided = MemRef::var(memory.clone(), ElemType::I32, "s", &dims, layout).unwrap();
    assert!(strided.reshape(&idx(&[16])).is_err());
    assert!(!strided.is_identity_map());
}

#[test]
fn noalias_distinguishes_blocks_and_intervals() {
    let memory = new_memory();
    let a = block_memref(&memory, &[4]);
    let b = block_memref(&memory, &[4]);
    assert_valid(&a.noalias(&b).unwrap());

    // Same block, disjoint offset windows.
    let dims = idx(&[2]);
    let m1 = MemRef::new(
        memory.clone(),
        ElemType::I32,
        a.bid().clone(),
        Index::zero(),
        dims.clone(),
        Layout::identity(&dims),
        Expr::from_bool(false),
    )
    .unwrap();
    let m2 = MemRef::new(
        memory.clone(),
        ElemType::I32,
        a.bid().clone(),
        Index::new(2),
        dims.clone(),
        Layout::identity(&dims),
        Expr::from_bool(false),
    )
    .unwrap();
    assert_valid(&m1.noalias(&m2).unwrap());
}

#[test]
fn inbounds_checks_the_backing_block() {
    let memory = new_memory();
    let m = block_memref(&memory, &[4, 4]);
    assert_valid(&m.is_in_bounds());

    // A 5x4 view of a 16-element block does not fit.
    let dims = idx(&[5, 4]);
    let big = MemRef::new(
        memory.clone(),
        ElemType::I32,
        m.bid().clone(),
        Index::zero(),
        dims.clone(),
        Layout::identity(&dims),
        Expr::from_bool(false),
    )
    .unwrap();
    let solver = Solver::new();
    solver.assert(&big.is_in_bounds().dynamic().as_bool().unwrap());
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn block_metadata_flows_through_memrefs() {
    let memory = new_memory();
    let m = block_memref(&memory, &[4]);
    assert_valid(&m.is_global_block());
    assert_valid(&m.get_liveness());
    assert_valid(&m.is_created_by_alloc().not());
    assert_valid(&m.is_fully_initialized());
}

#[test]
fn valid_1d_offsets_of_identity_layouts() {
    let memory = new_memory();
    let m = block_memref(&memory, &[4, 4]);
    assert_valid(&m.is_valid_1d_offset(&Expr::bv_u64(5, Index::BITS)));
    let solver = Solver::new();
    solver.assert(
        &m.is_valid_1d_offset(&Expr::bv_u64(16, Index::BITS))
            .dynamic()
            .as_bool()
            .unwrap(),
    );
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn mk_ite_packs_the_handle() {
    let memory = new_memory();
    let t = block_memref(&memory, &[4]);
    let f = block_memref(&memory, &[4]);

    let picked = MemRef::mk_ite(Integer::bool_true().expr(), &t, &f);
    assert_valid(&picked.bid().eq(t.bid()));

    let picked = MemRef::mk_ite(Integer::bool_false().expr(), &t, &f);
    assert_valid(&picked.bid().eq(f.bid()));
}

#[test]
fn refinement_is_handle_equality() {
    let memory = new_memory();
    let m = block_memref(&memory, &[4, 4]);
    let (formula, _) = m.refines(&m);
    assert_valid(&formula);

    let other = block_memref(&memory, &[4, 4]);
    let (formula, _) = m.refines(&other);
    let solver = Solver::new();
    solver.assert(&formula.dynamic().as_bool().unwrap());
    assert_eq!(solver.check(), SatResult::Unsat);
}

#[test]
fn strided_layouts_carry_an_inverse_precondition() {
    let memory = new_memory();
    let strided_ty = MemRefType::new(
        ElemType::I32,
        vec![4, 4],
        MemRefLayout::Strided {
            offset: 0,
            strides: vec![4, 1],
        },
    );
    let dims = idx(&[4, 4]);
    let layout = MemRef::layout_of(&strided_ty, &dims);
    let m = MemRef::var(memory.clone(), ElemType::I32, "m", &dims, layout).unwrap();

    // The inverse is uninterpreted, so the precondition is a real side
    // condition rather than the identity layout's constant true.
    assert!(!m.is_identity_map());
    assert!(!m.precondition().is_true());

    // The strided mapping itself is exact: (2, 3) lands at offset 11.
    let identity = block_memref(&memory, &[4, 4]);
    assert!(identity.precondition().is_true());
    let mapped = m.layout().mapping_at(&idx(&[2, 3]));
    assert_valid(&mapped.eq(&Expr::bv_u64(11, Index::BITS)));
}
