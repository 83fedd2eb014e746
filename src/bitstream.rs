use num_enum::TryFromPrimitive;

/// An `Abbreviation` is the encoding schema for a user-defined record and
/// the primary form of compression in a bitstream file.
///
/// The shape makes the format's structural rules unrepresentable: only the
/// final operand may be an array or a blob, and array elements are always
/// scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbreviation {
    pub fields: Vec<ScalarOperand>,
    pub payload: Option<PayloadOperand>,
}

/// Operand encodings that produce a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOperand {
    /// A fixed value contributed without reading any bits.
    Literal(u64),
    /// A fixed-width field.
    Fixed(u8),
    /// A VBR-encoded value with the given chunk width.
    Vbr(u8),
    /// A 6-bit field mapping to `[a-zA-Z0-9._]`.
    Char6,
}

/// Trailing operand encodings that produce a run of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOperand {
    /// A VBR6 count followed by that many elements of the inner encoding.
    Array(ScalarOperand),
    /// A VBR6 length, padding to a 32-bit boundary, then raw bytes.
    Blob,
}

/// The four selector values every block understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum BuiltinAbbreviationId {
    /// Marks the end of the current block.
    EndBlock = 0,
    /// Marks the beginning of a nested block.
    EnterSubBlock = 1,
    /// Defines an abbreviation for the current block.
    DefineAbbreviation = 2,
    /// A record in the fully-general VBR6 format.
    UnabbreviatedRecord = 3,
}

/// The first selector value available to application abbreviations.
pub const FIRST_APPLICATION_ABBREV_ID: u32 = 4;

/// Encoding discriminants used inside `DEFINE_ABBREV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AbbrevEncoding {
    Fixed = 1,
    Vbr = 2,
    Array = 3,
    Char6 = 4,
    Blob = 5,
}

/// Record codes of the standard BLOCKINFO block (id 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockInfoCode {
    /// Selects which block id subsequent records describe.
    SetBid = 1,
    /// Optional human-readable name for the selected block.
    BlockName = 2,
    /// Optional human-readable name for a record code of the selected block.
    SetRecordName = 3,
}

/// Decode one Char6 value to its ASCII byte.
pub fn decode_char6(value: u8) -> Option<u8> {
    Some(match value {
        0..=25 => value + b'a',
        26..=51 => value + (b'A' - 26),
        52..=61 => value - (52 - b'0'),
        62 => b'.',
        63 => b'_',
        _ => return None,
    })
}
