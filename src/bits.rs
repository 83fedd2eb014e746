use std::{error, fmt, io};

use crate::source::ByteSource;

#[derive(Debug, Clone)]
pub enum Error {
    BufferOverflow,
    VbrOverflow,
    Alignment,
    Io(io::ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow => f.write_str("unexpected end of stream"),
            Self::VbrOverflow => f.write_str("vbr overflow"),
            Self::Alignment => f.write_str("unaligned read"),
            Self::Io(kind) => write!(f, "read error: {kind}"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

/// Bit-granular cursor over a byte source.
///
/// Bit positions are relative to `base`, the first byte after the file
/// header, so saved positions stay valid across seeks. Bit `k` of the
/// stream is bit `k % 8` of byte `k / 8`.
pub struct Cursor<'a> {
    source: ByteSource<'a>,
    base: usize,
    offset: u64,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(source: ByteSource<'a>, base: usize) -> Self {
        Self {
            source,
            base,
            offset: 0,
        }
    }

    /// Current bit position.
    #[must_use]
    pub fn bit_pos(&self) -> u64 {
        self.offset
    }

    /// Seek to a bit position previously obtained from [`Cursor::bit_pos`].
    pub fn jump_to_bit(&mut self, bit: u64) {
        self.offset = bit;
    }

    pub fn skip_bits(&mut self, bits: u64) {
        self.offset += bits;
    }

    /// True once no byte remains past the current position. May pull on a
    /// streaming source to find out.
    pub fn at_end(&mut self) -> Result<bool, Error> {
        let next_byte = self.base + (self.offset >> 3) as usize;
        Ok(!self.source.ensure(next_byte + 1)?)
    }

    #[inline]
    pub fn read(&mut self, bits: u8) -> Result<u64, Error> {
        if bits < 1 || bits > 64 {
            return Err(Error::VbrOverflow);
        }
        let start = self.offset;
        let first = self.base + (start >> 3) as usize;
        let last = self.base + ((start + u64::from(bits) + 7) >> 3) as usize;
        if !self.source.ensure(last)? {
            return Err(Error::BufferOverflow);
        }
        // At most nine bytes contribute; accumulate in 128 bits and shift
        // the low-order slack away.
        let mut acc: u128 = 0;
        for (k, i) in (first..last).enumerate() {
            acc |= u128::from(self.source.byte(i)) << (8 * k);
        }
        acc >>= (start & 7) as u32;
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        self.offset += u64::from(bits);
        Ok((acc as u64) & mask)
    }

    /// Read a VBR number in `width`-wide chunks.
    /// The number may be up to 64 bits long regardless of the `width`.
    #[inline]
    pub fn read_vbr(&mut self, width: u8) -> Result<u64, Error> {
        if width < 2 || width > 32 {
            return Err(Error::VbrOverflow);
        }
        let test_bit = 1u64 << (width - 1);
        let mask = test_bit - 1;
        let mut res = 0;
        let mut offset = 0u32;
        loop {
            let next = self.read(width)?;
            res |= (next & mask) << offset;
            offset += u32::from(width) - 1;
            // 64 may not be divisible by width - 1
            if offset > 63 + u32::from(width) {
                return Err(Error::VbrOverflow);
            }
            if next & test_bit == 0 {
                break;
            }
        }
        Ok(res)
    }

    /// Skip bits until the next 32-bit boundary (no-op if already aligned).
    pub fn align32(&mut self) {
        self.offset = (self.offset + 31) & !31;
    }

    /// Byte-aligned read of `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        if self.offset & 7 != 0 {
            return Err(Error::Alignment);
        }
        let start = self.base + (self.offset >> 3) as usize;
        let end = start + len;
        if !self.source.ensure(end)? {
            return Err(Error::BufferOverflow);
        }
        self.offset += (len as u64) << 3;
        Ok(self.source.copy_range(start, end))
    }

}

impl fmt::Debug for Cursor<'_> {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("base", &self.base)
            .field("bit", &self.offset)
            .field("source", &self.source)
            .finish()
    }
}

#[test]
fn test_cursor_bits() {
    let mut c = Cursor::new(ByteSource::from_slice(&[0b1000_0000]), 0);
    assert_eq!(0, c.read(6).unwrap());
    assert_eq!(0, c.read(1).unwrap());
    assert_eq!(1, c.read(1).unwrap());
    assert!(c.read(1).is_err());

    let mut c = Cursor::new(ByteSource::from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 8]), 0);
    assert!(c.read(0).is_err());
    assert_eq!(0, c.read(1).unwrap());
    assert_eq!(0, c.read(2).unwrap());
    assert_eq!(0, c.read(3).unwrap());
    assert_eq!(4, c.read(4).unwrap());
    assert_eq!(0, c.read(5).unwrap());
    assert_eq!(4, c.read(6).unwrap());
    assert_eq!(24, c.read(7).unwrap());
    assert_eq!(64, c.read(8).unwrap());
    assert_eq!(80, c.read(9).unwrap());
    c.align32();
    assert_eq!(64, c.bit_pos());
    assert_eq!(8, c.read(8).unwrap());
    assert!(c.read(8).is_err());
}

#[test]
fn test_unaligned_wide_read() {
    let data = [0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa, 0x99, 0x88, 0x77];
    let mut wide = [0u8; 16];
    wide[..9].copy_from_slice(&data);
    let all = u128::from_le_bytes(wide);

    let mut c = Cursor::new(ByteSource::from_slice(&data), 0);
    assert_eq!(0b111, c.read(3).unwrap());
    // 64 bits straddling nine bytes
    let expect = ((all >> 3) & u128::from(u64::MAX)) as u64;
    assert_eq!(expect, c.read(64).unwrap());
    assert_eq!(3 + 64, c.bit_pos() as usize);
}

#[test]
fn test_cursor_vbr() {
    // 100 in vbr6: chunk [100100 | continue], then chunk [000001]
    let lo = 0b100100u16 | 0b100000;
    let hi = 0b000001u16;
    let word = lo as u32 | (hi as u32) << 6;
    let bytes = word.to_le_bytes();
    let mut c = Cursor::new(ByteSource::from_slice(&bytes), 0);
    assert_eq!(100, c.read_vbr(6).unwrap());
    assert!(c.read_vbr(1).is_err());
    assert!(c.read_vbr(33).is_err());
}

#[test]
fn test_cursor_bytes() {
    let mut c = Cursor::new(ByteSource::from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]), 0);
    c.align32();
    assert_eq!(0x0100, c.read(16).unwrap());
    assert_eq!(0x02, c.read(8).unwrap());
    assert_eq!(vec![3, 4, 5, 6], c.read_bytes(4).unwrap());
    assert!(c.read_bytes(2).is_err());
    assert_eq!(vec![7], c.read_bytes(1).unwrap());
    assert!(c.at_end().unwrap());
}

#[test]
fn test_jump() {
    let mut c = Cursor::new(ByteSource::from_slice(&[0xAB, 0xCD, 0, 0]), 0);
    assert_eq!(0xB, c.read(4).unwrap());
    let here = c.bit_pos();
    assert_eq!(0xA, c.read(4).unwrap());
    c.jump_to_bit(here);
    assert_eq!(0xA, c.read(4).unwrap());
    assert_eq!(0xCD, c.read(8).unwrap());
}
