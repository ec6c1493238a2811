//! Float values: a term paired with its float type.
//!
//! Every operation delegates to the encoding backend for that type, so the
//! same code serves f32 and f64 (and whatever encodings are added later).

use std::fmt;

use tenval_fp::{fp_encoding, FpEncoding};
use tenval_ir::{Attr, FloatTy, FpPred};
use tenval_smt::{Expr, Model, Sort, VarKind};

use crate::integer::Integer;

#[derive(Debug, Clone)]
pub struct Float {
    e: Expr,
    ty: FloatTy,
}

impl Float {
    pub fn sort(ty: FloatTy) -> Sort {
        fp_encoding(ty).sort()
    }

    pub fn from_expr(e: Expr, ty: FloatTy) -> Float {
        Float { e, ty }
    }

    pub fn var(name: &str, ty: FloatTy, kind: VarKind) -> Float {
        Float {
            e: Expr::var(&Self::sort(ty), name, kind),
            ty,
        }
    }

    /// Lift a float attribute; the attribute's type must match.
    pub fn constant(attr: &Attr, ty: FloatTy) -> Float {
        Float {
            e: fp_encoding(ty).constant(attr),
            ty,
        }
    }

    pub fn one(ty: FloatTy) -> Float {
        Float {
            e: fp_encoding(ty).one(),
            ty,
        }
    }

    pub fn nan(ty: FloatTy) -> Float {
        Float {
            e: fp_encoding(ty).nan(),
            ty,
        }
    }

    pub fn cast_from_signed_int(i: &Integer, ty: FloatTy) -> Float {
        Float {
            e: fp_encoding(ty).cast_from_signed_int(i.expr()),
            ty,
        }
    }

    pub fn exp(x: &Float) -> Float {
        Float {
            e: fp_encoding(x.ty).exp(&x.e),
            ty: x.ty,
        }
    }

    fn enc(&self) -> FpEncoding {
        fp_encoding(self.ty)
    }

    pub fn float_ty(&self) -> FloatTy {
        self.ty
    }

    pub fn expr(&self) -> &Expr {
        &self.e
    }

    pub fn into_expr(self) -> Expr {
        self.e
    }

    pub fn add(&self, b: &Float) -> Float {
        Float {
            e: self.enc().add(&self.e, &b.e),
            ty: self.ty,
        }
    }

    pub fn mul(&self, b: &Float) -> Float {
        Float {
            e: self.enc().mul(&self.e, &b.e),
            ty: self.ty,
        }
    }

    pub fn div(&self, b: &Float) -> Float {
        Float {
            e: self.enc().div(&self.e, &b.e),
            ty: self.ty,
        }
    }

    /// IEEE comparison; the result is the 1-bit integer encoding of the
    /// predicate outcome.
    pub fn cmp(&self, pred: FpPred, b: &Float) -> Integer {
        let cond = self.enc().cmp(pred, &self.e, &b.e);
        Integer::from(cond.ite(Integer::bool_true().expr(), Integer::bool_false().expr()))
    }

    pub fn abs(&self) -> Float {
        Float {
            e: self.enc().abs(&self.e),
            ty: self.ty,
        }
    }

    pub fn neg(&self) -> Float {
        Float {
            e: self.enc().neg(&self.e),
            ty: self.ty,
        }
    }

    pub fn extend(&self, tgt: FloatTy) -> Float {
        Float {
            e: self.enc().extend(&self.e, &fp_encoding(tgt)),
            ty: tgt,
        }
    }

    pub fn truncate(&self, tgt: FloatTy) -> Float {
        Float {
            e: self.enc().truncate(&self.e, &fp_encoding(tgt)),
            ty: tgt,
        }
    }

    /// NaN-aware refinement: the target may stand for the source iff both
    /// are NaN or both are equal bit-for-bit.
    pub fn refines(&self, other: &Float) -> (Expr, Vec<Expr>) {
        let nan1 = self.enc().is_nan(&self.e);
        let nan2 = self.enc().is_nan(&other.e);
        let formula = nan1
            .or(&nan2)
            .ite(&nan1.eq(&nan2), &other.e.eq(&self.e));
        (formula, vec![])
    }

    pub fn eval(&self, m: &Model) -> Float {
        Float {
            e: m.eval_expr(&self.e),
            ty: self.ty,
        }
    }
}

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.e.simplify();
        if let Some(fl) = e.dynamic().as_float() {
            if e.is_numeral() {
                return write!(f, "{}", fl.as_f64());
            }
        }
        write!(f, "unknown ({e})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::{SatResult, Solver};

    fn assert_valid(e: &Expr) {
        let solver = Solver::new();
        solver.assert(&e.dynamic().as_bool().unwrap().not());
        assert_eq!(solver.check(), SatResult::Unsat);
    }

    fn assert_invalid(e: &Expr) {
        let solver = Solver::new();
        solver.assert(&e.dynamic().as_bool().unwrap().not());
        assert_eq!(solver.check(), SatResult::Sat);
    }

    #[test]
    fn nan_refines_nan_but_not_zero() {
        let nan = Float::nan(FloatTy::F32);
        let (f, _) = nan.refines(&Float::nan(FloatTy::F32));
        assert_valid(&f);

        let zero = Float::constant(&Attr::f32(0.0), FloatTy::F32);
        let (f, _) = nan.refines(&zero);
        assert_invalid(&f);
        let (f, _) = zero.refines(&nan);
        assert_invalid(&f);
    }

    #[test]
    fn cmp_encodes_one_bit_results() {
        let one = Float::one(FloatTy::F64);
        let two = one.add(&one);
        let lt = one.cmp(FpPred::Olt, &two);
        assert_eq!(lt.bitwidth(), 1);
        assert_valid(&lt.expr().eq(Integer::bool_true().expr()));
    }

    #[test]
    fn preserves_type_across_arithmetic() {
        let a = Float::var("a", FloatTy::F32, VarKind::Unbound);
        let b = Float::var("b", FloatTy::F32, VarKind::Unbound);
        assert_eq!(a.add(&b).float_ty(), FloatTy::F32);
        assert_eq!(a.extend(FloatTy::F64).float_ty(), FloatTy::F64);
    }
}
