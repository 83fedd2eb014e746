use std::io;

use crate::source::ByteSource;

/// Leading magic of a portable bitcode file.
pub const MAGIC: [u8; 4] = *b"PEXE";

/// Header field tag carrying the container version.
const FIELD_BITCODE_VERSION: u16 = 1;

/// The one container version this reader understands.
pub const SUPPORTED_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad file magic")]
    BadMagic,
    #[error("truncated file header")]
    Truncated,
    #[error("malformed header field area")]
    BadFields,
    #[error("header carries no bitcode version field")]
    MissingVersion,
    #[error("unsupported bitcode container version {0}")]
    UnsupportedVersion(u32),
    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// Fixed byte-oriented prefix of a bitcode file.
///
/// Layout: 4-byte magic, u16 field count, u16 field-area byte size, then
/// fields of (u16 tag, u16 data length, data zero-padded to 4 bytes).
/// Unknown tags are skipped; the version field is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    /// Total header size in bytes; bit 0 of the stream follows it.
    pub size: usize,
}

impl FileHeader {
    pub fn read(source: &mut ByteSource<'_>) -> Result<Self, Error> {
        if !source.ensure(8)? {
            return Err(Error::Truncated);
        }
        let magic = [
            source.byte(0),
            source.byte(1),
            source.byte(2),
            source.byte(3),
        ];
        if magic != MAGIC {
            return Err(Error::BadMagic);
        }
        let num_fields = u16::from_le_bytes([source.byte(4), source.byte(5)]) as usize;
        let field_bytes = u16::from_le_bytes([source.byte(6), source.byte(7)]) as usize;
        if field_bytes % 4 != 0 {
            return Err(Error::BadFields);
        }
        if !source.ensure(8 + field_bytes)? {
            return Err(Error::Truncated);
        }

        let mut version = None;
        let mut pos = 8;
        let end = 8 + field_bytes;
        for _ in 0..num_fields {
            if pos + 4 > end {
                return Err(Error::BadFields);
            }
            let tag = u16::from_le_bytes([source.byte(pos), source.byte(pos + 1)]);
            let len = u16::from_le_bytes([source.byte(pos + 2), source.byte(pos + 3)]) as usize;
            let data = pos + 4;
            let padded = (len + 3) & !3;
            if data + padded > end {
                return Err(Error::BadFields);
            }
            if tag == FIELD_BITCODE_VERSION {
                if len != 4 {
                    return Err(Error::BadFields);
                }
                version = Some(u32::from_le_bytes([
                    source.byte(data),
                    source.byte(data + 1),
                    source.byte(data + 2),
                    source.byte(data + 3),
                ]));
            }
            pos = data + padded;
        }
        if pos != end {
            return Err(Error::BadFields);
        }

        let version = version.ok_or(Error::MissingVersion)?;
        if version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self { version, size: end })
    }

    /// Serialized standard header, used by tests and tools that emit
    /// streams for this reader.
    #[must_use]
    pub fn standard_bytes() -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&FIELD_BITCODE_VERSION.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_header_round_trips() {
        let bytes = FileHeader::standard_bytes();
        assert_eq!(bytes.len() % 4, 0);
        let mut source = ByteSource::from_slice(&bytes);
        let header = FileHeader::read(&mut source).unwrap();
        assert_eq!(header.version, SUPPORTED_VERSION);
        assert_eq!(header.size, bytes.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = FileHeader::standard_bytes();
        bytes[0] = b'Q';
        let mut source = ByteSource::from_slice(&bytes);
        assert!(matches!(
            FileHeader::read(&mut source),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = FileHeader::standard_bytes();
        bytes[12] = 9;
        let mut source = ByteSource::from_slice(&bytes);
        assert!(matches!(
            FileHeader::read(&mut source),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn skips_unknown_fields() {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        // unknown tag 7, 2 data bytes padded to 4
        out.extend_from_slice(&7u16.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&[0xAA, 0xBB, 0, 0]);
        out.extend_from_slice(&FIELD_BITCODE_VERSION.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        let mut source = ByteSource::from_slice(&out);
        let header = FileHeader::read(&mut source).unwrap();
        assert_eq!(header.size, out.len());
    }
}
