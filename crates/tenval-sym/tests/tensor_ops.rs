//! Tensor operator semantics, checked through solver outcomes on concrete
//! shapes.

use tenval_ir::ElemType;
use tenval_smt::Expr;
use tenval_sym::{ConvLayout, Index, Integer, Tensor};
use z3::{SatResult, Solver};

fn assert_valid(e: &Expr) {
    let solver = Solver::new();
    solver.assert(&e.dynamic().as_bool().unwrap().not());
    assert_eq!(solver.check(), SatResult::Unsat, "expected a valid formula: {e}");
}

fn i32s(vals: &[i64]) -> Vec<Expr> {
    vals.iter().map(|&v| Expr::bv_i64(v, 32)).collect()
}

fn idx(vals: &[u64]) -> Vec<Expr> {
    vals.iter().map(|&v| Index::new(v).into_expr()).collect()
}

fn assert_elem(t: &Tensor, at: &[u64], expected: i64) {
    assert_valid(&t.get(&idx(at)).eq(&Expr::bv_i64(expected, 32)));
}

#[test]
fn dense_2x2_matmul() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3, 4]), &[2, 2]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[5, 6, 7, 8]), &[2, 2]).unwrap();
    let c = a.matmul(&b, false, None);

    assert_elem(&c, &[0, 0], 19);
    assert_elem(&c, &[0, 1], 22);
    assert_elem(&c, &[1, 0], 43);
    assert_elem(&c, &[1, 1], 50);
}

#[test]
fn matmul_with_init_adds_the_bias() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3, 4]), &[2, 2]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[5, 6, 7, 8]), &[2, 2]).unwrap();
    let init = Tensor::dense(ElemType::I32, i32s(&[100, 200, 300, 400]), &[2, 2]).unwrap();
    let c = a.matmul(&b, false, Some(init));

    assert_elem(&c, &[0, 0], 119);
    assert_elem(&c, &[1, 1], 450);
}

#[test]
fn matmul_accepts_pretransposed_operands() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3, 4]), &[2, 2]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[5, 6, 7, 8]), &[2, 2]).unwrap();
    let c = a.matmul(&b.transpose(), true, None);

    assert_elem(&c, &[0, 0], 19);
    assert_elem(&c, &[1, 0], 43);
}

#[test]
fn conv_output_shape_nhwc_hwcf() {
    let input = Tensor::var(ElemType::F32, "input", &idx(&[1, 4, 4, 1]), true).unwrap();
    let filter = Tensor::var(ElemType::F32, "filter", &idx(&[3, 3, 1, 1]), true).unwrap();
    let out = input.conv(&filter, &idx(&[1, 1]), &idx(&[1, 1]), ConvLayout::NhwcHwcf, None);

    let dims: Vec<u64> = out.dims().iter().map(|d| d.simplify().as_u64().unwrap()).collect();
    assert_eq!(dims, vec![1, 2, 2, 1]);
}

#[test]
fn conv_output_shape_follows_stride_and_dilation() {
    // D' = (D - dil*F + s) udiv s, per spatial axis.
    let input = Tensor::var(ElemType::F32, "input", &idx(&[1, 10, 9, 2]), true).unwrap();
    let filter = Tensor::var(ElemType::F32, "filter", &idx(&[3, 2, 2, 4]), true).unwrap();
    let out = input.conv(&filter, &idx(&[2, 3]), &idx(&[2, 1]), ConvLayout::NhwcHwcf, None);

    let dims: Vec<u64> = out.dims().iter().map(|d| d.simplify().as_u64().unwrap()).collect();
    // (10 - 2*3 + 2)/2 = 3, (9 - 1*2 + 3)/3 = 3
    assert_eq!(dims, vec![1, 3, 3, 4]);
}

#[test]
fn conv_computes_integer_dot_products() {
    // 1x3x3x1 input [1..9], 2x2x1x1 all-ones filter.
    let input = Tensor::dense(
        ElemType::I32,
        i32s(&[1, 2, 3, 4, 5, 6, 7, 8, 9]),
        &[1, 3, 3, 1],
    )
    .unwrap();
    let filter = Tensor::dense(ElemType::I32, i32s(&[1, 1, 1, 1]), &[2, 2, 1, 1]).unwrap();
    let out = input.conv(&filter, &idx(&[1, 1]), &idx(&[1, 1]), ConvLayout::NhwcHwcf, None);

    assert_elem(&out, &[0, 0, 0, 0], 12); // 1+2+4+5
    assert_elem(&out, &[0, 1, 1, 0], 28); // 5+6+8+9
}

#[test]
fn nchw_layout_places_channels_second() {
    let input = Tensor::var(ElemType::F32, "input", &idx(&[2, 3, 8, 8]), true).unwrap();
    let filter = Tensor::var(ElemType::F32, "filter", &idx(&[5, 3, 3, 3]), true).unwrap();
    let out = input.conv(&filter, &idx(&[1, 1]), &idx(&[1, 1]), ConvLayout::NchwFchw, None);

    let dims: Vec<u64> = out.dims().iter().map(|d| d.simplify().as_u64().unwrap()).collect();
    assert_eq!(dims, vec![2, 5, 6, 6]);
}

#[test]
fn reshape_preserves_raw_elements() {
    let t = Tensor::dense(ElemType::I32, i32s(&[0, 1, 2, 3, 4, 5]), &[2, 3]).unwrap();
    let r = t.reshape(&idx(&[3, 2]));
    for i in 0..6 {
        let at = Index::new(i).into_expr();
        assert_valid(&t.get_raw(&at).eq(&r.get_raw(&at)));
    }
}

#[test]
fn concat_splits_at_the_axis_boundary() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2]), &[2]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[3, 4, 5]), &[3]).unwrap();
    let c = a.concat(&b, 0);

    assert_eq!(c.dims()[0].simplify().as_u64(), Some(5));
    assert_elem(&c, &[0], 1);
    assert_elem(&c, &[1], 2);
    assert_elem(&c, &[2], 3);
    assert_elem(&c, &[4], 5);
}

#[test]
fn reverse_is_an_involution() {
    let t = Tensor::dense(ElemType::I32, i32s(&[10, 20, 30]), &[3]).unwrap();
    let rev = t.reverse(0);
    assert_elem(&rev, &[0], 30);
    assert_elem(&rev, &[2], 10);

    let back = rev.reverse(0);
    for i in 0..3 {
        assert_valid(&back.get(&idx(&[i])).eq(&t.get(&idx(&[i]))));
    }
}

#[test]
fn tile_reads_modulo_the_original_shape() {
    let t = Tensor::dense(ElemType::I32, i32s(&[1, 2]), &[2]).unwrap();
    let tiled = t.tile(&[3]);
    assert_eq!(tiled.dims()[0].simplify().as_u64(), Some(6));
    assert_elem(&tiled, &[0], 1);
    assert_elem(&tiled, &[3], 2);
    assert_elem(&tiled, &[4], 1);
}

#[test]
fn transpose_is_an_involution() {
    let t = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3, 4, 5, 6]), &[2, 3]).unwrap();
    let tr = t.transpose();
    assert_eq!(tr.dims()[0].simplify().as_u64(), Some(3));
    assert_elem(&tr, &[2, 1], 6);

    let back = tr.transpose();
    for i in 0..2 {
        for j in 0..3 {
            assert_valid(&back.get(&idx(&[i, j])).eq(&t.get(&idx(&[i, j]))));
        }
    }
}

#[test]
fn dot_and_sum_reduce_concrete_tensors() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3]), &[3]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[4, 5, 6]), &[3]).unwrap();
    assert_valid(&a.dot(&b, None).eq(&Expr::bv_i64(32, 32)));
    assert_valid(&a.sum(None).eq(&Expr::bv_i64(6, 32)));
    assert_valid(&a.sum(Some(Expr::bv_i64(10, 32))).eq(&Expr::bv_i64(16, 32)));
}

#[test]
fn axiswise_sum_collapses_one_axis() {
    let t = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3, 4, 5, 6]), &[2, 3]).unwrap();
    let s = t.sum_axis(1);
    let dims: Vec<u64> = s.dims().iter().map(|d| d.simplify().as_u64().unwrap()).collect();
    assert_eq!(dims, vec![2, 1]);
    assert_elem(&s, &[0, 0], 6);
    assert_elem(&s, &[1, 0], 15);
}

#[test]
fn insert_writes_one_cell() {
    let t = Tensor::splat(ElemType::I32, Expr::bv_i64(0, 32), idx(&[3])).unwrap();
    let (t2, inbounds) = t.insert(&Expr::bv_i64(5, 32), &idx(&[1]));
    assert!(inbounds.is_true());
    assert_elem(&t2, &[0], 0);
    assert_elem(&t2, &[1], 5);

    let (_, inbounds) = t.insert(&Expr::bv_i64(5, 32), &idx(&[3]));
    assert!(inbounds.is_false());
}

#[test]
fn mk_ite_selects_elementwise() {
    let t = Tensor::dense(ElemType::I32, i32s(&[1, 2]), &[2]).unwrap();
    let f = Tensor::dense(ElemType::I32, i32s(&[8, 9]), &[2]).unwrap();
    let picked = Tensor::mk_ite(
        |idxs| {
            idxs[0]
                .ult(&Index::one().into_expr())
                .ite(Integer::bool_true().expr(), Integer::bool_false().expr())
        },
        &t,
        &f,
    );
    assert_elem(&picked, &[0], 1);
    assert_elem(&picked, &[1], 9);
}

#[test]
fn elementwise_ops_apply_pointwise() {
    let a = Tensor::dense(ElemType::I32, i32s(&[1, 2, 3]), &[3]).unwrap();
    let b = Tensor::dense(ElemType::I32, i32s(&[10, 20, 30]), &[3]).unwrap();
    let sum = a.elementwise_bin_op(&b, ElemType::I32, |x, y| x.add(&y));
    assert_elem(&sum, &[1], 22);

    let doubled = a.elementwise_unary_op(ElemType::I32, |x| x.add(&x));
    assert_elem(&doubled, &[2], 6);
}

#[test]
fn pooling_output_shapes() {
    let input = Tensor::var(ElemType::F32, "input", &idx(&[1, 4, 4, 2]), true).unwrap();
    let out = input.sum_pool(&idx(&[2, 2]), &idx(&[2, 2]), None).unwrap();
    let dims: Vec<u64> = out.dims().iter().map(|d| d.simplify().as_u64().unwrap()).collect();
    assert_eq!(dims, vec![1, 2, 2, 2]);

    assert!(input.max_pool(&idx(&[2, 2]), &idx(&[2, 2]), None).is_ok());
    assert!(input.avg_pool(&idx(&[2, 2]), &idx(&[2, 2]), None).is_ok());
}

#[test]
fn pooling_rejects_integer_tensors() {
    let input = Tensor::var(ElemType::I32, "input", &idx(&[1, 4, 4, 2]), true).unwrap();
    assert!(input.avg_pool(&idx(&[2, 2]), &idx(&[2, 2]), None).is_err());
    assert!(input.max_pool(&idx(&[2, 2]), &idx(&[2, 2]), None).is_err());
}

#[test]
fn depthwise_conv_shapes() {
    let input = Tensor::var(ElemType::F32, "input", &idx(&[1, 4, 4, 2]), true).unwrap();
    let filter = Tensor::var(ElemType::F32, "filter", &idx(&[2, 2, 2, 3]), true).unwrap();

    let unbiased = input
        .depthwise_conv_2d(&filter, &idx(&[1, 1]), &idx(&[1, 1]), None, None)
        .unwrap();
    let dims: Vec<u64> = unbiased
        .dims()
        .iter()
        .map(|d| d.simplify().as_u64().unwrap())
        .collect();
    assert_eq!(dims, vec![1, 3, 3, 2, 3]);

    let bias = Tensor::var(ElemType::F32, "bias", &idx(&[6]), true).unwrap();
    let biased = input
        .depthwise_conv_2d(&filter, &idx(&[1, 1]), &idx(&[1, 1]), Some(bias), None)
        .unwrap();
    let dims: Vec<u64> = biased
        .dims()
        .iter()
        .map(|d| d.simplify().as_u64().unwrap())
        .collect();
    assert_eq!(dims, vec![1, 3, 3, 6]);
}

#[test]
fn fully_initialized_quantifies_over_the_shape() {
    let t = Tensor::var(ElemType::I32, "t", &idx(&[2, 2]), true).unwrap();
    assert_valid(&t.is_fully_initialized());

    let u = Tensor::var(ElemType::I32, "u", &idx(&[2, 2]), false).unwrap();
    let solver = Solver::new();
    solver.assert(&u.is_fully_initialized().dynamic().as_bool().unwrap());
    assert_eq!(solver.check(), SatResult::Unsat);
}
