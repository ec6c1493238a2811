//! Arithmetic encodings for tensor reductions and scalar float ops.
//!
//! Floats are encoded with the solver's IEEE floating-point theory. The
//! operations the theory cannot express (`exp`, inter-format conversion,
//! int-to-float casts) and reductions over symbolic lengths become
//! uninterpreted functions with fixed names, so the source and target side
//! of a refinement query always see the same symbol. Reductions over a
//! concrete length within [`REDUCTION_UNROLL_MAX`] are unrolled instead.

use z3::ast::{Ast, Dynamic, Float, RoundingMode};

use tenval_ir::{Attr, ElemType, FloatTy, FpPred};
use tenval_smt::{Expr, FnDecl, Sort};

/// Largest concrete reduction length that is expanded term-by-term.
pub const REDUCTION_UNROLL_MAX: u64 = 256;

/// Map a primitive element type to its SMT sort.
///
/// `None` for integer widths above 64; callers turn that into their own
/// unsupported-type error.
pub fn scalar_sort(ty: &ElemType, index_bits: u32) -> Option<Sort> {
    match ty {
        ElemType::Int(w) if *w <= 64 && *w > 0 => Some(Sort::bv(*w)),
        ElemType::Int(_) => None,
        ElemType::Float(fty) => Some(fp_encoding(*fty).sort()),
        ElemType::Index => Some(Sort::bv(index_bits)),
    }
}

/// The float encoding for one element type.
#[derive(Debug, Clone, Copy)]
pub struct FpEncoding {
    ty: FloatTy,
}

/// Obtain the encoding for a float type.
pub fn fp_encoding(ty: FloatTy) -> FpEncoding {
    FpEncoding { ty }
}

impl FpEncoding {
    pub fn float_ty(&self) -> FloatTy {
        self.ty
    }

    pub fn sort(&self) -> Sort {
        match self.ty {
            FloatTy::F32 => Sort::float32(),
            FloatTy::F64 => Sort::float64(),
        }
    }

    fn wrap(&self, f: Float) -> Expr {
        Expr::from_dynamic(Dynamic::from_ast(&f))
    }

    fn float_of(&self, e: &Expr) -> Float {
        e.dynamic()
            .as_float()
            .unwrap_or_else(|| panic!("expected a float term, got {e}"))
    }

    fn rm() -> RoundingMode {
        RoundingMode::round_nearest_ties_to_even()
    }

    /// Lift a scalar float attribute into a term.
    pub fn constant(&self, attr: &Attr) -> Expr {
        match (attr, self.ty) {
            (Attr::Float { bits, ty: FloatTy::F32 }, FloatTy::F32) => {
                self.wrap(Float::from_f32(f32::from_bits(*bits as u32)))
            }
            (Attr::Float { bits, ty: FloatTy::F64 }, FloatTy::F64) => {
                self.wrap(Float::from_f64(f64::from_bits(*bits)))
            }
            _ => panic!("float constant {attr:?} does not match encoding {:?}", self.ty),
        }
    }

    /// Positive zero: the fill value of sparse constants.
    pub fn zero(&self) -> Expr {
        match self.ty {
            FloatTy::F32 => self.wrap(Float::from_f32(0.0)),
            FloatTy::F64 => self.wrap(Float::from_f64(0.0)),
        }
    }

    /// The additive identity handed to reductions as their seed.
    pub fn identity(&self) -> Expr {
        self.zero()
    }

    pub fn one(&self) -> Expr {
        match self.ty {
            FloatTy::F32 => self.wrap(Float::from_f32(1.0)),
            FloatTy::F64 => self.wrap(Float::from_f64(1.0)),
        }
    }

    /// A NaN term, built as 0/0 so only confirmed theory operations appear.
    pub fn nan(&self) -> Expr {
        let z = self.float_of(&self.zero());
        self.wrap(z.clone().div_with_rounding_mode(z, &Self::rm()))
    }

    pub fn add(&self, a: &Expr, b: &Expr) -> Expr {
        self.wrap(
            self.float_of(a)
                .add_with_rounding_mode(self.float_of(b), &Self::rm()),
        )
    }

    pub fn mul(&self, a: &Expr, b: &Expr) -> Expr {
        self.wrap(
            self.float_of(a)
                .mul_with_rounding_mode(self.float_of(b), &Self::rm()),
        )
    }

    pub fn div(&self, a: &Expr, b: &Expr) -> Expr {
        self.wrap(
            self.float_of(a)
                .div_with_rounding_mode(self.float_of(b), &Self::rm()),
        )
    }

    pub fn abs(&self, a: &Expr) -> Expr {
        self.wrap(self.float_of(a).unary_abs())
    }

    pub fn neg(&self, a: &Expr) -> Expr {
        self.wrap(self.float_of(a).unary_neg())
    }

    /// NaN test. IEEE `<=` is false on unordered operands, so a value is
    /// NaN exactly when it does not compare `<=` to itself.
    pub fn is_nan(&self, a: &Expr) -> Expr {
        let f = self.float_of(a);
        Expr::from_dynamic(Dynamic::from_ast(&f.le(&f).not()))
    }

    /// IEEE comparison; the result is a boolean term.
    pub fn cmp(&self, pred: FpPred, a: &Expr, b: &Expr) -> Expr {
        let (fa, fb) = (self.float_of(a), self.float_of(b));
        let wrap = |b: z3::ast::Bool| Expr::from_dynamic(Dynamic::from_ast(&b));

        // IEEE ordered comparisons are false on NaN operands already; the
        // unordered family is the ordered one plus the unordered test.
        let oeq = || wrap(z3::ast::Bool::and(&[fa.le(&fb), fa.ge(&fb)]));
        let unordered = || self.is_nan(a).or(&self.is_nan(b));

        match pred {
            FpPred::AlwaysFalse => Expr::from_bool(false),
            FpPred::AlwaysTrue => Expr::from_bool(true),
            FpPred::Oeq => oeq(),
            FpPred::Ogt => wrap(fa.gt(&fb)),
            FpPred::Oge => wrap(fa.ge(&fb)),
            FpPred::Olt => wrap(fa.lt(&fb)),
            FpPred::Ole => wrap(fa.le(&fb)),
            FpPred::One => wrap(fa.lt(&fb)).or(&wrap(fa.gt(&fb))),
            FpPred::Ord => unordered().not(),
            FpPred::Uno => unordered(),
            FpPred::Ueq => unordered().or(&oeq()),
            FpPred::Ugt => unordered().or(&wrap(fa.gt(&fb))),
            FpPred::Uge => unordered().or(&wrap(fa.ge(&fb))),
            FpPred::Ult => unordered().or(&wrap(fa.lt(&fb))),
            FpPred::Ule => unordered().or(&wrap(fa.le(&fb))),
            FpPred::Une => unordered().or(&wrap(fa.lt(&fb))).or(&wrap(fa.gt(&fb))),
        }
    }

    /// Widen to the target encoding (uninterpreted: exact conversion is not
    /// needed for refinement as long as both sides share the symbol).
    pub fn extend(&self, a: &Expr, tgt: &FpEncoding) -> Expr {
        if self.ty == tgt.ty {
            return a.clone();
        }
        let f = FnDecl::new(
            format!("fp.ext.{}.{}", self.ty, tgt.ty),
            &[&self.sort()],
            &tgt.sort(),
        );
        f.apply(std::slice::from_ref(a))
    }

    /// Narrow to the target encoding.
    pub fn truncate(&self, a: &Expr, tgt: &FpEncoding) -> Expr {
        if self.ty == tgt.ty {
            return a.clone();
        }
        let f = FnDecl::new(
            format!("fp.trunc.{}.{}", self.ty, tgt.ty),
            &[&self.sort()],
            &tgt.sort(),
        );
        f.apply(std::slice::from_ref(a))
    }

    /// Signed integer to float cast.
    pub fn cast_from_signed_int(&self, a: &Expr) -> Expr {
        let w = a.bv_width();
        let f = FnDecl::new(
            format!("fp.sitofp.{}.{}", self.ty, w),
            &[&Sort::bv(w)],
            &self.sort(),
        );
        f.apply(std::slice::from_ref(a))
    }

    pub fn exp(&self, a: &Expr) -> Expr {
        let f = FnDecl::new(format!("fp.exp.{}", self.ty), &[&self.sort()], &self.sort());
        f.apply(std::slice::from_ref(a))
    }

    /// Sum of `a[0..len]`, seeded with `init` when given.
    pub fn sum(&self, a: &Expr, len: &Expr, init: Option<Expr>) -> Expr {
        if let Some(n) = unrollable(len) {
            let mut acc = init.unwrap_or_else(|| self.identity());
            for i in 0..n {
                acc = self.add(&acc, &a.select(&Expr::bv_u64(i, len.bv_width())));
            }
            return acc;
        }
        let f = FnDecl::new(
            format!("fp.sum.{}", self.ty),
            &[&array_sort(len, &self.sort()), &Sort::bv(len.bv_width())],
            &self.sort(),
        );
        let app = f.apply(&[a.clone(), len.clone()]);
        match init {
            Some(init) => self.add(&app, &init),
            None => app,
        }
    }

    /// Dot product of `a[0..len]` and `b[0..len]`.
    pub fn dot(&self, a: &Expr, b: &Expr, len: &Expr, init: Option<Expr>) -> Expr {
        if let Some(n) = unrollable(len) {
            let mut acc = init.unwrap_or_else(|| self.identity());
            for i in 0..n {
                let idx = Expr::bv_u64(i, len.bv_width());
                acc = self.add(&acc, &self.mul(&a.select(&idx), &b.select(&idx)));
            }
            return acc;
        }
        let arr = array_sort(len, &self.sort());
        let f = FnDecl::new(
            format!("fp.dot.{}", self.ty),
            &[&arr, &arr, &Sort::bv(len.bv_width())],
            &self.sort(),
        );
        let app = f.apply(&[a.clone(), b.clone(), len.clone()]);
        match init {
            Some(init) => self.add(&app, &init),
            None => app,
        }
    }

    /// Maximum of `a[0..len]`; `init` joins as one more candidate.
    pub fn max(&self, a: &Expr, len: &Expr, init: Option<Expr>) -> Expr {
        let pick = |acc: &Expr, cand: &Expr| {
            let ge = self.cmp(FpPred::Oge, acc, cand);
            ge.ite(acc, cand)
        };
        if let Some(n) = unrollable(len) {
            assert!(n > 0 || init.is_some(), "max over an empty range");
            let mut candidates = Vec::new();
            if let Some(init) = init {
                candidates.push(init);
            }
            for i in 0..n {
                candidates.push(a.select(&Expr::bv_u64(i, len.bv_width())));
            }
            let mut acc = candidates[0].clone();
            for cand in &candidates[1..] {
                acc = pick(&acc, cand);
            }
            return acc;
        }
        let f = FnDecl::new(
            format!("fp.max.{}", self.ty),
            &[&array_sort(len, &self.sort()), &Sort::bv(len.bv_width())],
            &self.sort(),
        );
        let app = f.apply(&[a.clone(), len.clone()]);
        match init {
            Some(init) => pick(&app, &init),
            None => app,
        }
    }
}

fn unrollable(len: &Expr) -> Option<u64> {
    len.as_u64().filter(|&n| n <= REDUCTION_UNROLL_MAX)
}

fn array_sort(len: &Expr, elem: &Sort) -> Sort {
    Sort::array(&Sort::bv(len.bv_width()), elem)
}

/// Integer dot product over bit-vector elements of the given width.
pub fn int_dot(a: &Expr, b: &Expr, len: &Expr, init: Option<Expr>, elem_width: u32) -> Expr {
    if let Some(n) = unrollable(len) {
        let mut acc = init.unwrap_or_else(|| Expr::bv_u64(0, elem_width));
        for i in 0..n {
            let idx = Expr::bv_u64(i, len.bv_width());
            acc = acc.add(&a.select(&idx).mul(&b.select(&idx)));
        }
        return acc;
    }
    let arr = array_sort(len, &Sort::bv(elem_width));
    let f = FnDecl::new(
        format!("int.dot.{elem_width}"),
        &[&arr, &arr, &Sort::bv(len.bv_width())],
        &Sort::bv(elem_width),
    );
    let app = f.apply(&[a.clone(), b.clone(), len.clone()]);
    match init {
        Some(init) => app.add(&init),
        None => app,
    }
}

/// Integer sum over bit-vector elements of the given width.
pub fn int_sum(a: &Expr, len: &Expr, init: Option<Expr>, elem_width: u32) -> Expr {
    if let Some(n) = unrollable(len) {
        let mut acc = init.unwrap_or_else(|| Expr::bv_u64(0, elem_width));
        for i in 0..n {
            acc = acc.add(&a.select(&Expr::bv_u64(i, len.bv_width())));
        }
        return acc;
    }
    let f = FnDecl::new(
        format!("int.sum.{elem_width}"),
        &[&array_sort(len, &Sort::bv(elem_width)), &Sort::bv(len.bv_width())],
        &Sort::bv(elem_width),
    );
    let app = f.apply(&[a.clone(), len.clone()]);
    match init {
        Some(init) => app.add(&init),
        None => app,
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

    #[test]
    fn nan_is_nan() {
        let enc = fp_encoding(FloatTy::F32);
        assert_valid(&enc.is_nan(&enc.nan()));
        assert_valid(&enc.is_nan(&enc.one()).not());
    }

    #[test]
    fn ordered_eq_rejects_nan() {
        let enc = fp_encoding(FloatTy::F32);
        let nan = enc.nan();
        assert_valid(&enc.cmp(FpPred::Oeq, &nan, &nan).not());
        assert_valid(&enc.cmp(FpPred::Ueq, &nan, &enc.one()));
        assert_valid(&enc.cmp(FpPred::Oeq, &enc.one(), &enc.one()));
    }

    #[test]
    fn int_sum_unrolls_concrete_lengths() {
        let base = Expr::splat_array(&Sort::bv(64), &Expr::bv_u64(0, 32));
        let arr = base
            .store(&Expr::bv_u64(0, 64), &Expr::bv_u64(10, 32))
            .store(&Expr::bv_u64(1, 64), &Expr::bv_u64(20, 32));
        let sum = int_sum(&arr, &Expr::bv_u64(2, 64), None, 32);
        assert_valid(&sum.eq(&Expr::bv_u64(30, 32)));
    }

    #[test]
    fn symbolic_length_reductions_are_stable_symbols() {
        let a = Expr::var(
            &Sort::array(&Sort::bv(64), &Sort::bv(32)),
            "a",
            tenval_smt::VarKind::Unbound,
        );
        let n = Expr::var(&Sort::bv(64), "n", tenval_smt::VarKind::Unbound);
        let s1 = int_sum(&a, &n, None, 32);
        let s2 = int_sum(&a, &n, None, 32);
        assert_valid(&s1.eq(&s2));
    }
}
