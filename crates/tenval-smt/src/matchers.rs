//! Structural matchers over array terms.
//!
//! Used by the value layer to walk a model's array back into a readable
//! form: a chain of `store` nodes over a constant-splat base.

use z3::ast::Ast;
use z3::DeclKind;

use crate::expr::Expr;

/// Match `store(array, index, value)`.
pub fn match_store(e: &Expr) -> Option<(Expr, Expr, Expr)> {
    let ast = e.dynamic();
    if !ast.is_app() || ast.decl().kind() != DeclKind::Store {
        return None;
    }
    let children = ast.children();
    if children.len() != 3 {
        return None;
    }
    let mut it = children.into_iter().map(Expr::from_dynamic);
    Some((it.next().unwrap(), it.next().unwrap(), it.next().unwrap()))
}

/// Match a constant-splat array; returns the repeated element.
pub fn match_const_splat(e: &Expr) -> Option<Expr> {
    let ast = e.dynamic();
    if !ast.is_app() || ast.decl().kind() != DeclKind::ConstArray {
        return None;
    }
    let children = ast.children();
    if children.len() != 1 {
        return None;
    }
    Some(Expr::from_dynamic(children.into_iter().next().unwrap()))
}
