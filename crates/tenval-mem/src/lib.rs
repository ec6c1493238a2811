//! Block memory model.
//!
//! Memory is a set of blocks, each an SMT array from 1-D offsets to
//! elements plus a companion initialized array. A block is named by a
//! bit-vector block id (BID). Because the BID of an access may be symbolic
//! (memref selects produce ITE'd handles), loads build an ITE chain over
//! all candidate blocks of the element type, and stores conditionally
//! update every candidate.

use tenval_fp::scalar_sort;
use tenval_ir::ElemType;
use tenval_smt::{Expr, Sort, VarKind};

/// Side information returned with every access.
#[derive(Debug, Clone)]
pub struct AccessInfo {
    pub inbounds: Expr,
    pub initialized: Expr,
    pub writable: Expr,
}

/// Whether a block is visible outside the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Global,
    Local,
}

#[derive(Debug, Clone)]
struct MemBlock {
    elem_type: ElemType,
    array: Expr,
    initialized: Expr,
    num_elems: Expr,
    writable: Expr,
    liveness: Expr,
    created_by_alloc: bool,
    kind: BlockKind,
}

/// The memory of one function under validation.
#[derive(Debug)]
pub struct Memory {
    bid_bits: u32,
    index_bits: u32,
    blocks: Vec<MemBlock>,
}

impl Memory {
    pub fn new(bid_bits: u32, index_bits: u32) -> Memory {
        Memory {
            bid_bits,
            index_bits,
            blocks: Vec::new(),
        }
    }

    pub fn bid_bits(&self) -> u32 {
        self.bid_bits
    }

    /// Register a block and return its BID (a numeral).
    ///
    /// The block's contents start as a fresh symbolic array; `initialized`
    /// seeds the companion array.
    pub fn new_block(
        &mut self,
        elem_type: ElemType,
        num_elems: Expr,
        kind: BlockKind,
        created_by_alloc: bool,
        writable: bool,
        initialized: bool,
    ) -> Expr {
        let elem_sort = scalar_sort(&elem_type, self.index_bits)
            .unwrap_or_else(|| panic!("cannot model blocks of {elem_type}"));
        let idx_sort = Sort::bv(self.index_bits);
        let array = Expr::var(&Sort::array(&idx_sort, &elem_sort), "mem_block", VarKind::Fresh);
        let init = Expr::splat_array(&idx_sort, &Expr::from_bool(initialized));

        let bid = Expr::bv_u64(self.blocks.len() as u64, self.bid_bits);
        self.blocks.push(MemBlock {
            elem_type,
            array,
            initialized: init,
            num_elems,
            writable: Expr::from_bool(writable),
            liveness: Expr::from_bool(true),
            created_by_alloc,
            kind,
        });
        bid
    }

    fn candidates<'a>(
        &'a self,
        elem_type: &'a ElemType,
    ) -> impl Iterator<Item = (u64, &'a MemBlock)> + 'a {
        self.blocks
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.elem_type == *elem_type)
            .map(|(k, b)| (k as u64, b))
    }

    fn bid_eq(&self, bid: &Expr, k: u64) -> Expr {
        bid.eq(&Expr::bv_u64(k, self.bid_bits))
    }

    /// Read one element. Unmatched BIDs read a fresh unconstrained value
    /// and are out of bounds.
    pub fn load(&self, elem_type: &ElemType, bid: &Expr, idx: &Expr) -> (Expr, AccessInfo) {
        let elem_sort = scalar_sort(elem_type, self.index_bits)
            .unwrap_or_else(|| panic!("cannot model blocks of {elem_type}"));
        let mut value = Expr::var(&elem_sort, "garbage", VarKind::Fresh);
        let mut inbounds = Expr::from_bool(false);
        let mut initialized = Expr::from_bool(false);
        let mut writable = Expr::from_bool(false);

        for (k, blk) in self.candidates(elem_type) {
            let is_k = self.bid_eq(bid, k);
            value = is_k.ite(&blk.array.select(idx), &value);
            inbounds = is_k.and(&idx.ult(&blk.num_elems)).or(&inbounds);
            initialized = is_k.ite(&blk.initialized.select(idx), &initialized);
            writable = is_k.ite(&blk.writable, &writable);
        }

        (
            value,
            AccessInfo {
                inbounds,
                initialized,
                writable,
            },
        )
    }

    /// Write one element; every candidate block is conditionally updated.
    pub fn store(&mut self, elem_type: &ElemType, value: &Expr, bid: &Expr, idx: &Expr) -> AccessInfo {
        let mut inbounds = Expr::from_bool(false);
        let mut writable = Expr::from_bool(false);
        let bid_bits = self.bid_bits;

        for (k, blk) in self
            .blocks
            .iter_mut()
            .enumerate()
            .filter(|(_, b)| b.elem_type == *elem_type)
        {
            let is_k = bid.eq(&Expr::bv_u64(k as u64, bid_bits));
            blk.array = is_k.ite(&blk.array.store(idx, value), &blk.array);
            blk.initialized = is_k.ite(&blk.initialized.store(idx, &Expr::from_bool(true)), &blk.initialized);
            inbounds = is_k.and(&idx.ult(&blk.num_elems)).or(&inbounds);
            writable = is_k.ite(&blk.writable, &writable);
        }

        AccessInfo {
            inbounds,
            initialized: Expr::from_bool(true),
            writable,
        }
    }

    pub fn num_elems_of(&self, elem_type: &ElemType, bid: &Expr) -> Expr {
        let mut n = Expr::bv_u64(0, self.index_bits);
        for (k, blk) in self.candidates(elem_type) {
            n = self.bid_eq(bid, k).ite(&blk.num_elems, &n);
        }
        n
    }

    pub fn is_global_block(&self, elem_type: &ElemType, bid: &Expr) -> Expr {
        let mut e = Expr::from_bool(false);
        for (k, blk) in self.candidates(elem_type) {
            if blk.kind == BlockKind::Global {
                e = e.or(&self.bid_eq(bid, k));
            }
        }
        e
    }

    pub fn is_local_block(&self, elem_type: &ElemType, bid: &Expr) -> Expr {
        let mut e = Expr::from_bool(false);
        for (k, blk) in self.candidates(elem_type) {
            if blk.kind == BlockKind::Local {
                e = e.or(&self.bid_eq(bid, k));
            }
        }
        e
    }

    pub fn liveness(&self, elem_type: &ElemType, bid: &Expr) -> Expr {
        let mut e = Expr::from_bool(false);
        for (k, blk) in self.candidates(elem_type) {
            e = self.bid_eq(bid, k).ite(&blk.liveness, &e);
        }
        e
    }

    pub fn is_created_by_alloc(&self, elem_type: &ElemType, bid: &Expr) -> Expr {
        let mut e = Expr::from_bool(false);
        for (k, blk) in self.candidates(elem_type) {
            if blk.created_by_alloc {
                e = e.or(&self.bid_eq(bid, k));
            }
        }
        e
    }

    pub fn set_writable(&mut self, elem_type: &ElemType, bid: &Expr, writable: bool) {
        let bid_bits = self.bid_bits;
        for (k, blk) in self
            .blocks
            .iter_mut()
            .enumerate()
            .filter(|(_, b)| b.elem_type == *elem_type)
        {
            let is_k = bid.eq(&Expr::bv_u64(k as u64, bid_bits));
            blk.writable = is_k.ite(&Expr::from_bool(writable), &blk.writable);
        }
    }
}
