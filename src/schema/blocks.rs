use num_enum::TryFromPrimitive;

/// The standard BLOCKINFO block id. Block ids below 8 are reserved.
pub const BLOCKINFO_BLOCK_ID: u32 = 0;

/// Application block identifiers.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum BlockId {
    /// Top-level module block; exactly one per stream.
    Module = 8,
    /// Function-local constant pool.
    Constants = 11,
    /// A function body.
    Function = 12,
    /// Value (and, inside bodies, basic-block) names.
    ValueSymtab = 14,
    /// The module's type table.
    Type = 17,
    /// Global variables and their initializers.
    GlobalVar = 19,
}

/// Records directly inside the MODULE block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum ModuleCode {
    /// VERSION: `[version#]`; must be 1.
    Version = 1,
    /// FUNCTION: `[type-id, calling-conv, is-proto, linkage]`
    Function = 8,
}

/// Records inside the TYPE block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeCode {
    /// NUMENTRY: `[numentries]`; pre-sizes the type table.
    NumEntry = 1,
    Void = 2,
    Float = 3,
    Double = 4,
    /// INTEGER: `[width]`
    Integer = 7,
    /// FUNCTION: `[vararg, ret-ty, param-ty x N]`
    Function = 21,
}

/// Records inside the GLOBALVAR block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum GlobalVarCode {
    /// VAR: `[log2(align)+1, is-constant]`; begins a variable.
    Var = 0,
    /// COMPOUND: `[n]`; raises the initializer count to `n`.
    Compound = 1,
    /// ZEROFILL: `[size]`
    ZeroFill = 2,
    /// DATA: `[byte x N]`
    Data = 3,
    /// RELOC: `[value-id (, addend)]`
    Reloc = 4,
    /// COUNT: `[n]`; declared number of variables in the block.
    Count = 5,
}

/// Records inside a VALUE_SYMTAB block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum SymtabCode {
    /// ENTRY: `[value-id, namechar x N]`
    Entry = 1,
    /// BBENTRY: `[bb-id, namechar x N]`; function bodies only.
    BlockEntry = 2,
}

/// Records inside a CONSTANTS block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum ConstantCode {
    /// SETTYPE: `[type-id]`; type of subsequent constants.
    SetType = 1,
    Undef = 3,
    /// INTEGER: `[sign-rotated value]`
    Integer = 4,
    /// FLOAT: `[raw IEEE bits]`
    Float = 6,
}

/// Records inside a FUNCTION body block.
#[derive(Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    /// DECLAREBLOCKS: `[nblocks]`
    DeclareBlocks = 1,
    /// BINOP: `[lhs, rhs, opcode (, flags)]`
    Binop = 2,
    /// CAST: `[value, dest-ty, castopc]`
    Cast = 3,
    /// RET: `[(value)]`
    Ret = 10,
    /// BR: `[bb#]` or `[bb#, bb#, cond]`
    Br = 11,
    /// SWITCH: `[cond-ty, cond, default-bb, ncases, cases...]`
    Switch = 12,
    Unreachable = 15,
    /// PHI: `[ty, (signed-rel-value, bb#) x N]`
    Phi = 16,
    /// ALLOCA: `[size-value, log2(align)+1]`
    Alloca = 19,
    /// LOAD: `[ptr, log2(align)+1, ty]`
    Load = 20,
    /// STORE: `[ptr, value, log2(align)+1]`
    Store = 24,
    /// CMP2: `[lhs, rhs, predicate]`
    Cmp2 = 28,
    /// VSELECT: `[true-val, false-val, cond]`
    VSelect = 29,
    /// CALL: `[cc<<1|tail, callee, arg x N]`
    Call = 34,
    /// FORWARDTYPEREF: `[value-id, ty]`
    ForwardTypeRef = 43,
    /// CALL_INDIRECT: `[cc<<1|tail, callee, ret-ty, arg x N]`
    CallIndirect = 44,
}
