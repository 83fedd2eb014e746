//! Portable bitcode reader and ABI verifier.
//!
//! The crate decodes the frozen portable-bitcode container into an
//! in-memory module, with lazy per-function materialization, and checks a
//! decoded module against the portable dialect's ABI rules so a code
//! generator downstream needs no defensive handling.

/// Bit-granular cursor
pub mod bits;
/// Abbreviation model
pub mod bitstream;
/// Frozen file header
pub mod header;
/// In-memory module representation
pub mod ir;
/// Module decoder and materializer
pub mod reader;
/// Frozen wire codes
pub mod schema;
/// Byte sources
pub mod source;
/// Block and record layer
pub mod stream;
/// ABI verifier
pub mod verify;

pub use self::bits::Cursor;
pub use self::reader::{ModuleReader, ReadError, parse_bitcode};
pub use self::source::ByteSource;
pub use self::stream::BitStream;
