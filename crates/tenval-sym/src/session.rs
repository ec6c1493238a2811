//! Per-session state: the constant-abstraction cache and its knobs.
//!
//! One validation query runs per thread, matching the solver's own
//! thread-local context model; concurrent sessions on distinct threads are
//! independent. [`reset_abstractly_encoded_attrs`] must run at the start of
//! each query so abstract constants never leak across queries. Counters are
//! not reset: uniqueness, not monotonic restart, is the invariant.

use std::cell::{Cell, RefCell};

use tenval_ir::ElemsAttr;

use crate::tensor::Tensor;

thread_local! {
    static ABSTRACT_ATTRS: RefCell<Vec<(ElemsAttr, Tensor)>> = const { RefCell::new(Vec::new()) };
    static UNKNOWN_CONST_COUNTER: Cell<u64> = const { Cell::new(0) };
    static MAX_CONST_SIZE: Cell<i64> = const { Cell::new(100) };
}

/// Clear the abstraction cache. Call at the start of every query.
pub fn reset_abstractly_encoded_attrs() {
    ABSTRACT_ATTRS.with(|c| c.borrow_mut().clear());
}

/// Constants with more elements than this are abstracted to fresh symbolic
/// tensors. Negative disables abstraction entirely.
pub fn set_max_const_size(size: i64) {
    MAX_CONST_SIZE.with(|c| c.set(size));
}

pub fn max_const_size() -> i64 {
    MAX_CONST_SIZE.with(|c| c.get())
}

pub(crate) fn with_abstract_attrs<R>(f: impl FnOnce(&mut Vec<(ElemsAttr, Tensor)>) -> R) -> R {
    ABSTRACT_ATTRS.with(|c| f(&mut c.borrow_mut()))
}

pub(crate) fn next_unknown_const_name() -> String {
    UNKNOWN_CONST_COUNTER.with(|c| {
        let k = c.get();
        c.set(k + 1);
        format!("unknown_const#{k}")
    })
}
