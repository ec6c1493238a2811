//! Untyped expression handle over z3 ASTs.
//!
//! The value layer manipulates terms of many sorts (bit-vectors, booleans,
//! floats, arrays) through one [`Expr`] type. Operations panic on sort
//! confusion: that is an internal invariant violation, not a user error.

use std::fmt;

use z3::ast::{Array, Ast, Bool, Dynamic, BV};
use z3::{AstKind, DeclKind};

use crate::fresh_name;
use crate::sort::Sort;

/// How a variable is introduced.
///
/// Bound variables are destined for a quantifier or lambda binder and get a
/// unique `name#k` suffix so distinct binders never capture each other;
/// fresh variables get the same suffix. Unbound variables keep their exact
/// name (they are the free symbols a counterexample assigns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Bound,
    Unbound,
    Fresh,
}

/// An SMT term.
///
/// Cloning is cheap (z3 ASTs are reference counted and hash-consed). The
/// `locked` flag marks element terms read out of a tensor or memref whose
/// element type the reader does not know; locked terms are exempt from the
/// local constant folding the arithmetic helpers otherwise perform, and the
/// flag propagates through every operation.
#[derive(Debug, Clone)]
pub struct Expr {
    ast: Dynamic,
    locked: bool,
}

fn mask_to_width(v: u128, width: u32) -> u64 {
    if width >= 64 {
        v as u64
    } else {
        (v as u64) & ((1u64 << width) - 1)
    }
}

impl Expr {
    pub fn from_dynamic(ast: Dynamic) -> Expr {
        Expr { ast, locked: false }
    }

    pub fn dynamic(&self) -> &Dynamic {
        &self.ast
    }

    /// Bit-vector literal.
    pub fn bv_u64(value: u64, width: u32) -> Expr {
        Expr::from_dynamic(Dynamic::from_ast(&BV::from_u64(value, width)))
    }

    pub fn bv_i64(value: i64, width: u32) -> Expr {
        Expr::from_dynamic(Dynamic::from_ast(&BV::from_i64(value, width)))
    }

    pub fn from_bool(value: bool) -> Expr {
        Expr::from_dynamic(Dynamic::from_ast(&Bool::from_bool(value)))
    }

    /// A variable of the given sort.
    pub fn var(sort: &Sort, name: &str, kind: VarKind) -> Expr {
        let name = match kind {
            VarKind::Bound | VarKind::Fresh => fresh_name(name),
            VarKind::Unbound => name.to_string(),
        };
        let decl = z3::FuncDecl::new(name, &[], sort.z3());
        let e = Expr::from_dynamic(decl.apply(&[]));
        debug_assert!(e.is_var(), "Expr::var must produce a variable symbol");
        e
    }

    /// Mark this term as an element of unknown type; disables local folding.
    pub fn lock(mut self) -> Expr {
        self.locked = true;
        self
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    // === Queries ===

    pub fn is_var(&self) -> bool {
        self.ast.is_app()
            && self.ast.children().is_empty()
            && self.ast.decl().kind() == DeclKind::Uninterpreted
    }

    pub fn is_numeral(&self) -> bool {
        self.ast.kind() == AstKind::Numeral
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.ast.as_bv().and_then(|b| b.as_u64())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.ast.as_bv().and_then(|b| b.as_i64())
    }

    pub fn as_bool_lit(&self) -> Option<bool> {
        self.ast.as_bool().and_then(|b| b.as_bool())
    }

    pub fn is_true(&self) -> bool {
        self.as_bool_lit() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.as_bool_lit() == Some(false)
    }

    pub fn bv_width(&self) -> u32 {
        self.bv_ast().get_size()
    }

    // === Downcast helpers ===

    fn bv_ast(&self) -> BV {
        self.ast
            .as_bv()
            .unwrap_or_else(|| panic!("expected a bit-vector term, got {}", self.ast))
    }

    fn bool_ast(&self) -> Bool {
        self.ast
            .as_bool()
            .unwrap_or_else(|| panic!("expected a boolean term, got {}", self.ast))
    }

    fn array_ast(&self) -> Array {
        self.ast
            .as_array()
            .unwrap_or_else(|| panic!("expected an array term, got {}", self.ast))
    }

    fn wrap(&self, ast: Dynamic, other: &Expr) -> Expr {
        Expr {
            ast,
            locked: self.locked || other.locked,
        }
    }

    fn fold_numerals(&self, other: &Expr) -> Option<(u64, u64, u32)> {
        if self.locked || other.locked {
            return None;
        }
        let a = self.as_u64()?;
        let b = other.as_u64()?;
        Some((a, b, self.bv_width()))
    }

    // === Bit-vector arithmetic ===

    pub fn add(&self, other: &Expr) -> Expr {
        if let Some((a, b, w)) = self.fold_numerals(other) {
            return Expr::bv_u64(mask_to_width(a as u128 + b as u128, w), w);
        }
        if !self.locked && !other.locked {
            if other.as_u64() == Some(0) {
                return self.clone();
            }
            if self.as_u64() == Some(0) {
                return other.clone();
            }
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvadd(&other.bv_ast())), other)
    }

    pub fn sub(&self, other: &Expr) -> Expr {
        if let Some((a, b, w)) = self.fold_numerals(other) {
            return Expr::bv_u64(mask_to_width((a as u128).wrapping_sub(b as u128), w), w);
        }
        if !self.locked && !other.locked && other.as_u64() == Some(0) {
            return self.clone();
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvsub(&other.bv_ast())), other)
    }

    pub fn mul(&self, other: &Expr) -> Expr {
        if let Some((a, b, w)) = self.fold_numerals(other) {
            return Expr::bv_u64(mask_to_width(a as u128 * b as u128, w), w);
        }
        if !self.locked && !other.locked {
            if other.as_u64() == Some(1) {
                return self.clone();
            }
            if self.as_u64() == Some(1) {
                return other.clone();
            }
            if self.as_u64() == Some(0) || other.as_u64() == Some(0) {
                return Expr::bv_u64(0, self.bv_width());
            }
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvmul(&other.bv_ast())), other)
    }

    pub fn udiv(&self, other: &Expr) -> Expr {
        if let Some((a, b, w)) = self.fold_numerals(other) {
            if b != 0 {
                return Expr::bv_u64(a / b, w);
            }
        }
        if !self.locked && !other.locked && other.as_u64() == Some(1) {
            return self.clone();
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvudiv(&other.bv_ast())), other)
    }

    pub fn urem(&self, other: &Expr) -> Expr {
        if let Some((a, b, w)) = self.fold_numerals(other) {
            if b != 0 {
                return Expr::bv_u64(a % b, w);
            }
        }
        if !self.locked && !other.locked && other.as_u64() == Some(1) {
            return Expr::bv_u64(0, self.bv_width());
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvurem(&other.bv_ast())), other)
    }

    // === Comparisons ===

    pub fn ult(&self, other: &Expr) -> Expr {
        if let Some((a, b, _)) = self.fold_numerals(other) {
            return Expr::from_bool(a < b);
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvult(&other.bv_ast())), other)
    }

    pub fn ule(&self, other: &Expr) -> Expr {
        if let Some((a, b, _)) = self.fold_numerals(other) {
            return Expr::from_bool(a <= b);
        }
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvule(&other.bv_ast())), other)
    }

    pub fn ugt(&self, other: &Expr) -> Expr {
        other.ult(self)
    }

    pub fn uge(&self, other: &Expr) -> Expr {
        other.ule(self)
    }

    pub fn slt(&self, other: &Expr) -> Expr {
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvslt(&other.bv_ast())), other)
    }

    pub fn sle(&self, other: &Expr) -> Expr {
        self.wrap(Dynamic::from_ast(&self.bv_ast().bvsle(&other.bv_ast())), other)
    }

    /// Structural SMT equality (object equality for float sorts: NaN equals
    /// NaN, positive and negative zero differ).
    pub fn eq(&self, other: &Expr) -> Expr {
        if let Some((a, b, _)) = self.fold_numerals(other) {
            return Expr::from_bool(a == b);
        }
        let ast = if let (Some(a), Some(b)) = (self.ast.as_bv(), other.ast.as_bv()) {
            a.eq(&b)
        } else if let (Some(a), Some(b)) = (self.ast.as_bool(), other.ast.as_bool()) {
            a.eq(&b)
        } else if let (Some(a), Some(b)) = (self.ast.as_float(), other.ast.as_float()) {
            a.eq(&b)
        } else if let (Some(a), Some(b)) = (self.ast.as_array(), other.ast.as_array()) {
            a.eq(&b)
        } else {
            panic!("eq: operand sorts not comparable: {} vs {}", self.ast, other.ast)
        };
        self.wrap(Dynamic::from_ast(&ast), other)
    }

    pub fn ne(&self, other: &Expr) -> Expr {
        self.eq(other).not()
    }

    // === Booleans ===

    pub fn and(&self, other: &Expr) -> Expr {
        if self.is_true() {
            return other.clone();
        }
        if other.is_true() {
            return self.clone();
        }
        if self.is_false() || other.is_false() {
            return Expr::from_bool(false);
        }
        self.wrap(
            Dynamic::from_ast(&Bool::and(&[self.bool_ast(), other.bool_ast()])),
            other,
        )
    }

    pub fn or(&self, other: &Expr) -> Expr {
        if self.is_false() {
            return other.clone();
        }
        if other.is_false() {
            return self.clone();
        }
        if self.is_true() || other.is_true() {
            return Expr::from_bool(true);
        }
        self.wrap(
            Dynamic::from_ast(&Bool::or(&[self.bool_ast(), other.bool_ast()])),
            other,
        )
    }

    pub fn implies(&self, other: &Expr) -> Expr {
        if self.is_true() {
            return other.clone();
        }
        if self.is_false() || other.is_true() {
            return Expr::from_bool(true);
        }
        self.wrap(
            Dynamic::from_ast(&self.bool_ast().implies(&other.bool_ast())),
            other,
        )
    }

    pub fn not(&self) -> Expr {
        if let Some(b) = self.as_bool_lit() {
            return Expr::from_bool(!b);
        }
        Expr {
            ast: Dynamic::from_ast(&self.bool_ast().not()),
            locked: self.locked,
        }
    }

    /// `self ? t : f`; `self` must be boolean.
    pub fn ite(&self, t: &Expr, f: &Expr) -> Expr {
        if let Some(c) = self.as_bool_lit() {
            return if c { t.clone() } else { f.clone() };
        }
        Expr {
            ast: self.bool_ast().ite(&t.ast, &f.ast),
            locked: t.locked || f.locked,
        }
    }

    // === Arrays ===

    pub fn select(&self, index: &Expr) -> Expr {
        Expr {
            ast: self.array_ast().select(&index.ast),
            locked: self.locked,
        }
    }

    pub fn store(&self, index: &Expr, value: &Expr) -> Expr {
        Expr {
            ast: Dynamic::from_ast(&self.array_ast().store(&index.ast, &value.ast)),
            locked: self.locked,
        }
    }

    /// Constant array: every index maps to `elem`.
    pub fn splat_array(domain: &Sort, elem: &Expr) -> Expr {
        Expr::from_dynamic(Dynamic::from_ast(&Array::const_array(domain.z3(), &elem.ast)))
    }

    /// `lambda idx. body` as an array term.
    pub fn lambda1(idxvar: &Expr, body: &Expr) -> Expr {
        debug_assert!(idxvar.is_var(), "lambda binder must be a variable");
        let bounds: [&dyn Ast; 1] = [&idxvar.ast];
        Expr::from_dynamic(Dynamic::from_ast(&z3::ast::lambda_const(&bounds, &body.ast)))
    }

    pub fn forall(vars: &[Expr], body: &Expr) -> Expr {
        if vars.is_empty() {
            return body.clone();
        }
        let bounds: Vec<&dyn Ast> = vars.iter().map(|v| &v.ast as &dyn Ast).collect();
        Expr::from_dynamic(Dynamic::from_ast(&z3::ast::forall_const(
            &bounds,
            &[],
            &body.bool_ast(),
        )))
    }

    // === Rewriting ===

    pub fn substitute(&self, from: &[Expr], to: &[Expr]) -> Expr {
        assert_eq!(from.len(), to.len());
        let pairs: Vec<(&Dynamic, &Dynamic)> =
            from.iter().zip(to.iter()).map(|(a, b)| (&a.ast, &b.ast)).collect();
        Expr {
            ast: self.ast.substitute(&pairs),
            locked: self.locked,
        }
    }

    pub fn simplify(&self) -> Expr {
        Expr {
            ast: self.ast.simplify(),
            locked: self.locked,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ast)
    }
}

/// An uninterpreted function declaration.
pub struct FnDecl(z3::FuncDecl);

impl FnDecl {
    pub fn new(name: String, domain: &[&Sort], range: &Sort) -> FnDecl {
        let doms: Vec<&z3::Sort> = domain.iter().map(|s| s.z3()).collect();
        FnDecl(z3::FuncDecl::new(name, &doms, range.z3()))
    }

    pub fn apply(&self, args: &[Expr]) -> Expr {
        let args: Vec<&dyn Ast> = args.iter().map(|a| a.dynamic() as &dyn Ast).collect();
        Expr::from_dynamic(self.0.apply(&args))
    }
}

/// A satisfying assignment produced by the solver.
pub struct Model(z3::Model);

impl From<z3::Model> for Model {
    fn from(m: z3::Model) -> Model {
        Model(m)
    }
}

impl Model {
    /// Evaluate with model completion, then simplify.
    pub fn eval_expr(&self, e: &Expr) -> Expr {
        match self.0.eval(e.dynamic(), true) {
            Some(d) => Expr::from_dynamic(d.simplify()),
            None => e.simplify(),
        }
    }

    pub fn eval_list(&self, es: &[Expr]) -> Vec<Expr> {
        es.iter().map(|e| self.eval_expr(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeral_folding() {
        let a = Expr::bv_u64(3, 64);
        let b = Expr::bv_u64(4, 64);
        assert_eq!(a.add(&b).as_u64(), Some(7));
        assert_eq!(a.mul(&b).as_u64(), Some(12));
        assert_eq!(b.sub(&a).as_u64(), Some(1));
        assert!(a.ult(&b).is_true());
        assert!(b.ule(&a).is_false());
    }

    #[test]
    fn folding_respects_width() {
        let a = Expr::bv_u64(255, 8);
        let b = Expr::bv_u64(1, 8);
        assert_eq!(a.add(&b).as_u64(), Some(0));
    }

    #[test]
    fn locked_terms_are_not_folded() {
        let a = Expr::bv_u64(3, 64).lock();
        let b = Expr::bv_u64(4, 64);
        let sum = a.add(&b);
        assert!(sum.is_locked());
        // The term is built, not folded; simplification still reduces it.
        assert_eq!(sum.simplify().as_u64(), Some(7));
    }

    #[test]
    fn bool_identities() {
        let t = Expr::from_bool(true);
        let x = Expr::var(&Sort::bool_sort(), "x", VarKind::Unbound);
        assert!(t.and(&x).is_var());
        assert!(x.or(&t).is_true());
        assert!(t.implies(&x).is_var());
    }

    #[test]
    fn store_select_roundtrip() {
        let base = Expr::splat_array(&Sort::bv(64), &Expr::bv_u64(0, 32));
        let stored = base.store(&Expr::bv_u64(2, 64), &Expr::bv_u64(9, 32));
        let read = stored.select(&Expr::bv_u64(2, 64)).simplify();
        assert_eq!(read.as_u64(), Some(9));
    }

    #[test]
    fn substitute_replaces_vars() {
        let x = Expr::var(&Sort::bv(64), "x", VarKind::Unbound);
        let e = x.add(&Expr::bv_u64(1, 64));
        let r = e.substitute(&[x], &[Expr::bv_u64(41, 64)]).simplify();
        assert_eq!(r.as_u64(), Some(42));
    }
}
