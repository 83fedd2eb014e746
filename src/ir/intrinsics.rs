//! The dialect's known intrinsics.
//!
//! Intrinsic declarations are encoded with their pointer argument types
//! elided (the referenced element type stands in for the pointer). Once the
//! value symbol table reveals names, the reader rewrites matched signatures
//! through [`recover_pointer_params`]. The verifier consults the same table
//! for the atomic parameter shapes.

use num_enum::TryFromPrimitive;

use super::ty::{FnType, TypeStore};

/// Prefix every intrinsic name carries.
pub const INTRINSIC_PREFIX: &str = "llvm.";

#[must_use]
pub fn is_intrinsic_name(name: &str) -> bool {
    name.starts_with(INTRINSIC_PREFIX)
}

/// Memory intrinsics whose alignment argument (index 3) must be the
/// constant 1.
#[must_use]
pub fn is_mem_intrinsic(name: &str) -> bool {
    name.starts_with("llvm.memcpy.")
        || name.starts_with("llvm.memmove.")
        || name.starts_with("llvm.memset.")
}

/// Parameter roles of the atomic intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicParam {
    /// A pointer operand.
    Ptr,
    /// A plain value operand.
    Val,
    /// A constant read-modify-write operation selector.
    RmwOp,
    /// A constant memory-order argument.
    Mem,
    /// A constant byte size (1, 2, 4 or 8).
    ByteSize,
}

/// Parameter shape of an atomic intrinsic, or `None` for other names.
#[must_use]
pub fn atomic_params(name: &str) -> Option<&'static [AtomicParam]> {
    use AtomicParam::*;
    static LOAD: &[AtomicParam] = &[Ptr, Mem];
    static STORE: &[AtomicParam] = &[Val, Ptr, Mem];
    static RMW: &[AtomicParam] = &[RmwOp, Ptr, Val, Mem];
    static CMPXCHG: &[AtomicParam] = &[Ptr, Val, Val, Mem, Mem];
    static FENCE: &[AtomicParam] = &[Mem];
    static FENCE_ALL: &[AtomicParam] = &[];
    static IS_LOCK_FREE: &[AtomicParam] = &[ByteSize, Ptr];

    if name.starts_with("llvm.atomic.load.") {
        Some(LOAD)
    } else if name.starts_with("llvm.atomic.store.") {
        Some(STORE)
    } else if name.starts_with("llvm.atomic.rmw.") {
        Some(RMW)
    } else if name.starts_with("llvm.atomic.cmpxchg.") {
        Some(CMPXCHG)
    } else if name == "llvm.atomic.fence" {
        Some(FENCE)
    } else if name == "llvm.atomic.fence.all" {
        Some(FENCE_ALL)
    } else if name == "llvm.atomic.is.lock.free" {
        Some(IS_LOCK_FREE)
    } else {
        None
    }
}

/// Memory orderings of the atomic intrinsics. The dialect reserves the full
/// range but accepts only sequential consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum MemoryOrder {
    Relaxed = 1,
    Consume = 2,
    Acquire = 3,
    Release = 4,
    AcquireRelease = 5,
    SequentiallyConsistent = 6,
}

/// Read-modify-write operation selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum RmwOperation {
    Add = 1,
    Sub = 2,
    Or = 3,
    And = 4,
    Xor = 5,
    Exchange = 6,
}

/// Whether an intrinsic name belongs to the dialect at all.
#[must_use]
pub fn is_known_intrinsic(name: &str) -> bool {
    atomic_params(name).is_some()
        || is_mem_intrinsic(name)
        || matches!(
            name,
            "llvm.setjmp"
                | "llvm.longjmp"
                | "llvm.stacksave"
                | "llvm.stackrestore"
                | "llvm.thread.pointer"
                | "llvm.trap"
        )
        || name.starts_with("llvm.sqrt.")
}

/// Rebuild the signature of a named intrinsic, substituting the pointer
/// parameter (or return) types the encoding elided. Returns `None` when the
/// name needs no rewriting or the declared shape is too short to rewrite.
#[must_use]
pub fn recover_pointer_params(
    name: &str,
    fn_ty: &FnType,
    types: &mut TypeStore,
) -> Option<FnType> {
    let mut ret = fn_ty.ret;
    let mut params = fn_ty.params.clone();

    if name == "llvm.thread.pointer" || name == "llvm.stacksave" {
        let i8 = types.int(8);
        ret = types.pointer_to(i8);
    } else if name == "llvm.setjmp"
        || name == "llvm.longjmp"
        || name == "llvm.stackrestore"
        || name.starts_with("llvm.memset.")
    {
        let i8 = types.int(8);
        *params.first_mut()? = types.pointer_to(i8);
    } else if name.starts_with("llvm.memcpy.") || name.starts_with("llvm.memmove.") {
        if params.len() < 2 {
            return None;
        }
        let i8 = types.int(8);
        let p = types.pointer_to(i8);
        params[0] = p;
        params[1] = p;
    } else if name.starts_with("llvm.atomic.load.") || name.starts_with("llvm.atomic.cmpxchg.") {
        *params.first_mut()? = types.pointer_to(ret);
    } else if name.starts_with("llvm.atomic.store.") {
        if params.len() < 2 {
            return None;
        }
        params[1] = types.pointer_to(params[0]);
    } else if name.starts_with("llvm.atomic.rmw.") {
        if params.len() < 3 {
            return None;
        }
        params[1] = types.pointer_to(params[2]);
    } else if name == "llvm.atomic.is.lock.free" {
        if params.len() < 2 {
            return None;
        }
        let i8 = types.int(8);
        params[1] = types.pointer_to(i8);
    } else {
        return None;
    }

    Some(FnType {
        ret,
        params,
        vararg: fn_ty.vararg,
    })
}
