use num_enum::TryFromPrimitive;

/// Binary opcodes as stored in BINOP records. Whether an arithmetic code
/// means the integer or the floating-point operation depends on the
/// operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BinopCode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    UDiv = 3,
    SDiv = 4,
    URem = 5,
    SRem = 6,
    Shl = 7,
    LShr = 8,
    AShr = 9,
    And = 10,
    Or = 11,
    Xor = 12,
}

/// Cast opcodes as stored in CAST records. Exactly ten selectors are
/// defined; pointer casts are elided on the wire and re-inserted by the
/// reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CastCode {
    Trunc = 0,
    ZExt = 1,
    SExt = 2,
    FpToUi = 3,
    FpToSi = 4,
    UiToFp = 5,
    SiToFp = 6,
    FpTrunc = 7,
    FpExt = 8,
    BitCast = 11,
}

/// Flag bit positions for add/sub/mul/shl.
pub const FLAG_NO_UNSIGNED_WRAP: u64 = 1 << 0;
pub const FLAG_NO_SIGNED_WRAP: u64 = 1 << 1;

/// Flag bit position for sdiv/udiv/lshr/ashr.
pub const FLAG_EXACT: u64 = 1 << 0;

/// Flag bit positions for floating-point operations.
pub const FLAG_UNSAFE_ALGEBRA: u64 = 1 << 0;
pub const FLAG_NO_NANS: u64 = 1 << 1;
pub const FLAG_NO_INFS: u64 = 1 << 2;
pub const FLAG_NO_SIGNED_ZEROS: u64 = 1 << 3;
pub const FLAG_ALLOW_RECIPROCAL: u64 = 1 << 4;

/// The only calling convention the dialect defines.
pub const C_CALLING_CONV: u64 = 0;

/// Decode a linkage selector. Unknown or newer selectors map to external
/// linkage, which keeps old readers working when values are appended.
#[must_use]
pub fn decode_linkage(value: u64) -> crate::ir::Linkage {
    use crate::ir::Linkage;
    match value {
        1 => Linkage::Weak,
        2 => Linkage::Appending,
        3 => Linkage::Internal,
        4 => Linkage::LinkOnce,
        _ => Linkage::External,
    }
}

/// Decode a signed value stored with its sign in the low bit. A raw `1`
/// means the value with no positive counterpart.
#[must_use]
pub fn decode_sign_rotated(value: u64) -> u64 {
    if value & 1 == 0 {
        value >> 1
    } else if value != 1 {
        (value >> 1).wrapping_neg()
    } else {
        1u64 << 63
    }
}

/// Signed view of [`decode_sign_rotated`], used by PHI operand deltas.
#[must_use]
pub fn decode_sign_rotated_i64(value: u64) -> i64 {
    decode_sign_rotated(value) as i64
}

/// Decode an alignment stored as `log2(align) + 1`; zero means no
/// alignment was recorded. Shifts past 2^29 are rejected.
#[must_use]
pub fn decode_alignment(value: u64) -> Option<u32> {
    match value {
        0 => Some(0),
        1..=30 => Some(1u32 << (value - 1)),
        _ => None,
    }
}
