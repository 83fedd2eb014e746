//! Frozen wire values of the portable bitcode format.
//!
//! These values are permanent; new codes may only be added at the end of
//! their respective lists.

/// IDs of blocks and the record codes inside them.
pub mod blocks;
/// Operand-level codes: opcodes, predicates, flag bits, codecs.
pub mod values;
