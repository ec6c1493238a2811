//! Refinement properties, checked through solver outcomes: a property is
//! valid when the solver finds no counterexample to it.

use tenval_ir::{Attr, ElemType, ElemsAttr, FloatTy, TensorType};
use tenval_smt::{Expr, Model};
use tenval_sym::{
    refines, reset_abstractly_encoded_attrs, set_max_const_size, Float, Index, Integer, Tensor,
    ValueTy,
};
use z3::{SatResult, Solver};

fn assert_valid(e: &Expr) {
    let solver = Solver::new();
    solver.assert(&e.dynamic().as_bool().unwrap().not());
    assert_eq!(solver.check(), SatResult::Unsat, "expected a valid formula: {e}");
}

fn assert_invalid(e: &Expr) {
    let solver = Solver::new();
    solver.assert(&e.dynamic().as_bool().unwrap().not());
    assert_eq!(solver.check(), SatResult::Sat, "expected a refutable formula: {e}");
}

fn splat_f32(value: f32, dims: &[u64]) -> Tensor {
    let elem = Float::constant(&Attr::f32(value), FloatTy::F32).into_expr();
    let dim_exprs = dims.iter().map(|&d| Index::new(d).into_expr()).collect();
    Tensor::splat(ElemType::F32, elem, dim_exprs).unwrap()
}

#[test]
fn splat_tensor_refines_itself() {
    let t = splat_f32(1.0, &[2, 3]);
    let (formula, params) = t.refines(&t);
    assert_eq!(params.len(), 1);
    assert_valid(&formula);
}

#[test]
fn splat_tensor_does_not_refine_a_different_splat() {
    let t1 = splat_f32(1.0, &[2, 3]);
    let t2 = splat_f32(2.0, &[2, 3]);
    let (formula, params) = t1.refines(&t2);

    let solver = Solver::new();
    solver.assert(&formula.dynamic().as_bool().unwrap().not());
    assert_eq!(solver.check(), SatResult::Sat);

    // The counterexample picks some index inside the tensor.
    let model: Model = solver.get_model().unwrap().into();
    let cex = model.eval_expr(&params[0]);
    assert!(cex.as_u64().unwrap() < 6);
}

#[test]
fn rank_mismatch_refuses_without_parameters() {
    let t1 = splat_f32(1.0, &[6]);
    let t2 = splat_f32(1.0, &[2, 3]);
    let (formula, params) = t1.refines(&t2);
    assert!(formula.is_false());
    assert!(params.is_empty());
}

#[test]
fn symbolic_tensor_refines_itself() {
    let dims = [Index::new(4).into_expr(), Index::new(5).into_expr()];
    let t = Tensor::var(ElemType::F32, "t", &dims, true).unwrap();
    let (formula, _) = t.refines(&t);
    assert_valid(&formula);
}

#[test]
fn uninitialized_source_elements_are_free() {
    // The source is nowhere initialized, so any target of the same shape
    // refines it.
    let dims = [Index::new(3).into_expr()];
    let src = Tensor::var(ElemType::I32, "src", &dims, false).unwrap();
    let tgt = Tensor::var(ElemType::I32, "tgt", &dims, true).unwrap();
    let (formula, _) = src.refines(&tgt);
    assert_valid(&formula);

    // The reverse direction requires the target to be initialized.
    let (formula, _) = tgt.refines(&src);
    assert_invalid(&formula);
}

#[test]
fn float_nan_refinement() {
    let nan = Float::nan(FloatTy::F32);
    let zero = Float::constant(&Attr::f32(0.0), FloatTy::F32);

    let (formula, _) = nan.refines(&Float::nan(FloatTy::F32));
    assert_valid(&formula);
    let (formula, _) = nan.refines(&zero);
    assert_invalid(&formula);
    let (formula, _) = zero.refines(&zero);
    assert_valid(&formula);
}

#[test]
fn scalar_refinement_is_equality() {
    let (f, _) = Integer::new(7, 32).refines(&Integer::new(7, 32));
    assert_valid(&f);
    let (f, _) = Index::new(7).refines(&Index::new(8));
    assert_invalid(&f);
}

#[test]
fn value_level_dispatch() {
    let a = ValueTy::Tensor(splat_f32(1.0, &[2, 2]));
    let b = ValueTy::Tensor(splat_f32(1.0, &[2, 2]));
    let (formula, _) = refines(&a, &b);
    assert_valid(&formula);
}

#[test]
fn abstraction_cache_returns_stable_tensors() {
    reset_abstractly_encoded_attrs();
    set_max_const_size(100);

    // Small constants are enumerated.
    let small_ty = TensorType::new(ElemType::I32, vec![10, 10]);
    let small = ElemsAttr::dense(
        small_ty.clone(),
        (0..100).map(|v| Attr::int(v, 32)).collect(),
    );
    let t_small = Tensor::from_elems_attr(&small_ty, &small).unwrap();
    assert!(!t_small.as_array().is_var());
    assert_valid(
        &t_small
            .get(&[Index::new(0).into_expr(), Index::new(3).into_expr()])
            .eq(&Expr::bv_i64(3, 32)),
    );

    // Large constants are abstracted to a fresh symbolic tensor.
    let big_ty = TensorType::new(ElemType::I32, vec![20, 10]);
    let big = ElemsAttr::dense(big_ty.clone(), (0..200).map(|v| Attr::int(v, 32)).collect());
    let t_big = Tensor::from_elems_attr(&big_ty, &big).unwrap();
    assert!(t_big.as_array().is_var());

    // Re-ingesting the identical attribute hits the cache.
    let t_big2 = Tensor::from_elems_attr(&big_ty, &big).unwrap();
    assert_valid(&t_big.as_array().eq(t_big2.as_array()));

    // After a reset the attribute gets a fresh abstraction.
    reset_abstractly_encoded_attrs();
    let t_big3 = Tensor::from_elems_attr(&big_ty, &big).unwrap();
    assert_invalid(&t_big.as_array().eq(t_big3.as_array()));
}

#[test]
fn abstraction_cache_recognizes_transposes() {
    reset_abstractly_encoded_attrs();
    set_max_const_size(100);

    let a_ty = TensorType::new(ElemType::I32, vec![20, 10]);
    let a_vals: Vec<Attr> = (0..200).map(|v| Attr::int(v, 32)).collect();
    let a = ElemsAttr::dense(a_ty.clone(), a_vals.clone());
    let t_a = Tensor::from_elems_attr(&a_ty, &a).unwrap();

    // b[i][j] = a[j][i]
    let b_ty = TensorType::new(ElemType::I32, vec![10, 20]);
    let mut b_vals = vec![Attr::int(0, 32); 200];
    for i in 0..10 {
        for j in 0..20 {
            b_vals[i * 20 + j] = a_vals[j * 10 + i];
        }
    }
    let b = ElemsAttr::dense(b_ty.clone(), b_vals);
    let t_b = Tensor::from_elems_attr(&b_ty, &b).unwrap();

    assert_eq!(t_b.dims()[0].as_u64(), Some(10));
    assert_eq!(t_b.dims()[1].as_u64(), Some(20));
    // The rewritten tensor reads through the cached abstraction.
    let i = Index::new(2).into_expr();
    let j = Index::new(3).into_expr();
    assert_valid(&t_b.get(&[i.clone(), j.clone()]).eq(&t_a.get(&[j, i])));
}

#[test]
fn abstraction_cache_recognizes_simple_reductions() {
    reset_abstractly_encoded_attrs();
    set_max_const_size(100);

    let c_ty = TensorType::new(ElemType::I32, vec![200]);
    let c_vals: Vec<Attr> = (0..200).map(|v| Attr::int(v, 32)).collect();
    let c = ElemsAttr::dense(c_ty.clone(), c_vals.clone());
    let t_c = Tensor::from_elems_attr(&c_ty, &c).unwrap();

    let d_ty = TensorType::new(ElemType::I32, vec![200, 1, 1]);
    let d = ElemsAttr::dense(d_ty.clone(), c_vals);
    let t_d = Tensor::from_elems_attr(&d_ty, &d).unwrap();

    assert_eq!(t_d.dims().len(), 3);
    let i = Index::new(7).into_expr();
    let zero = Index::zero().into_expr();
    assert_valid(&t_d.get(&[i.clone(), zero.clone(), zero]).eq(&t_c.get(&[i])));
}
