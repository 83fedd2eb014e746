use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use super::module::ValueId;
use super::ty::TypeId;

/// Binary opcodes. The wire encodes one code per arithmetic family; the
/// reader picks the integer or floating variant from the operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    URem,
    SRem,
    FRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Ops that may carry no-wrap flags.
    #[must_use]
    pub fn overflowable(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Shl)
    }

    /// Ops that may carry the exact flag.
    #[must_use]
    pub fn exactable(self) -> bool {
        matches!(self, Self::UDiv | Self::SDiv | Self::LShr | Self::AShr)
    }

    #[must_use]
    pub fn is_fp(self) -> bool {
        matches!(
            self,
            Self::FAdd | Self::FSub | Self::FMul | Self::FDiv | Self::FRem
        )
    }

    /// Integer ops of dubious usefulness on 1-bit values; the dialect
    /// forbids them on i1 so code generators need no corner cases.
    #[must_use]
    pub fn forbidden_on_i1(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::UDiv
                | Self::SDiv
                | Self::URem
                | Self::SRem
                | Self::Shl
                | Self::LShr
                | Self::AShr
        )
    }
}

/// Cast opcodes. The pointer casts never appear on the wire; the reader
/// synthesizes them when re-inserting elided pointer conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    BitCast,
    PtrToInt,
    IntToPtr,
}

/// Integer comparison predicates, in their frozen encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum IntPredicate {
    Eq = 32,
    Ne = 33,
    Ugt = 34,
    Uge = 35,
    Ult = 36,
    Ule = 37,
    Sgt = 38,
    Sge = 39,
    Slt = 40,
    Sle = 41,
}

/// Floating comparison predicates, in their frozen encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FloatPredicate {
    False = 0,
    Oeq = 1,
    Ogt = 2,
    Oge = 3,
    Olt = 4,
    Ole = 5,
    One = 6,
    Ord = 7,
    Uno = 8,
    Ueq = 9,
    Ugt = 10,
    Uge = 11,
    Ult = 12,
    Ule = 13,
    Une = 14,
    True = 15,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WrapFlags: u8 {
        const NO_UNSIGNED_WRAP = 1 << 0;
        const NO_SIGNED_WRAP = 1 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FastMathFlags: u8 {
        const UNSAFE_ALGEBRA = 1 << 0;
        const NO_NANS = 1 << 1;
        const NO_INFS = 1 << 2;
        const NO_SIGNED_ZEROS = 1 << 3;
        const ALLOW_RECIPROCAL = 1 << 4;
    }
}

/// Optional attributes of a binary operation. Which group applies depends
/// on the opcode; the others stay empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinopFlags {
    pub wrap: WrapFlags,
    pub exact: bool,
    pub fast: FastMathFlags,
}

/// The false edge of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrCond {
    pub value: ValueId,
    pub false_dest: u32,
}

/// A switch case value, sign-rotate decoded. Values wider than 64 bits are
/// chunked into little-endian 64-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseValue {
    pub words: Vec<u64>,
}

impl CaseValue {
    #[must_use]
    pub fn single(word: u64) -> Self {
        Self { words: vec![word] }
    }
}

/// One value or range of values covered by a switch case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRange {
    pub low: CaseValue,
    /// Present only for true ranges.
    pub high: Option<CaseValue>,
}

/// A switch case: one or more ranges steering to one destination block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub ranges: Vec<CaseRange>,
    pub dest: u32,
}

/// One instruction. Branch destinations are basic-block indices.
///
/// The trailing group of variants exists so the verifier can reject modules
/// produced by other front ends; the portable decoder never emits them.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Binop {
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        flags: BinopFlags,
    },
    Cast {
        op: CastOp,
        value: ValueId,
        dest_ty: TypeId,
    },
    Select {
        true_value: ValueId,
        false_value: ValueId,
        cond: ValueId,
    },
    ICmp {
        pred: IntPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Ret {
        value: Option<ValueId>,
    },
    Br {
        dest: u32,
        cond: Option<BrCond>,
    },
    Switch {
        cond_ty: TypeId,
        cond: ValueId,
        default_dest: u32,
        cases: Vec<SwitchCase>,
    },
    Unreachable,
    Phi {
        ty: TypeId,
        incoming: Vec<(ValueId, u32)>,
    },
    Alloca {
        size: ValueId,
        alignment: u32,
    },
    Load {
        ptr: ValueId,
        alignment: u32,
        ty: TypeId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        alignment: u32,
    },
    Call {
        callee: ValueId,
        args: Vec<ValueId>,
        ret_ty: TypeId,
        tail: bool,
    },

    GetElementPtr {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    VaArg {
        list: ValueId,
        ty: TypeId,
    },
    IndirectBr {
        addr: ValueId,
        dests: Vec<u32>,
    },
    ExtractElement {
        vec: ValueId,
        index: ValueId,
    },
    InsertElement {
        vec: ValueId,
        elem: ValueId,
        index: ValueId,
    },
    ShuffleVector {
        lhs: ValueId,
        rhs: ValueId,
        mask: ValueId,
    },
    ExtractValue {
        agg: ValueId,
        indices: Vec<u32>,
    },
    InsertValue {
        agg: ValueId,
        elem: ValueId,
        indices: Vec<u32>,
    },
    AtomicCmpXchg {
        ptr: ValueId,
        expected: ValueId,
        replacement: ValueId,
    },
    AtomicRmw {
        op: u32,
        ptr: ValueId,
        value: ValueId,
    },
    Fence,
    Invoke {
        callee: ValueId,
        args: Vec<ValueId>,
        normal_dest: u32,
        unwind_dest: u32,
    },
    LandingPad {
        ty: TypeId,
    },
    Resume {
        value: ValueId,
    },
}

impl Inst {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Ret { .. }
                | Self::Br { .. }
                | Self::Switch { .. }
                | Self::Unreachable
                | Self::IndirectBr { .. }
                | Self::Invoke { .. }
                | Self::Resume { .. }
        )
    }
}
