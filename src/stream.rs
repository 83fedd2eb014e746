use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::bits::{self, Cursor};
use crate::bitstream::{
    Abbreviation, AbbrevEncoding, BlockInfoCode, BuiltinAbbreviationId,
    FIRST_APPLICATION_ABBREV_ID, PayloadOperand, ScalarOperand, decode_char6,
};
use crate::header::{self, FileHeader};
use crate::source::ByteSource;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Bits(#[from] bits::Error),
    #[error("bad file header: {0}")]
    Header(#[from] header::Error),
    #[error("invalid abbreviation definition")]
    InvalidAbbrev,
    #[error("no abbreviation `{abbrev_id}` in block `{block_id}`")]
    NoSuchAbbrev { block_id: u32, abbrev_id: u32 },
    #[error("abbreviation id width `{0}` out of range")]
    BadAbbrevWidth(u64),
    #[error("block `{0}` does not end at its declared length")]
    BlockLengthMismatch(u32),
    #[error("end of block at top level")]
    UnbalancedEndBlock,
    #[error("nested block inside blockinfo")]
    NestedBlockInBlockInfo,
    #[error("blockinfo record without SETBID")]
    MissingSetBid,
    #[error("invalid blockinfo record `{0}`")]
    InvalidBlockInfoRecord(u64),
    #[error("char6 value out of range")]
    InvalidChar6,
    #[error("cursor is not positioned at a sub-block")]
    NotAtSubBlock,
}

/// The next thing in the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A nested block; enter it, skip it, or read the blockinfo block.
    SubBlock(u32),
    /// A record; the payload is the abbreviation id to read it with.
    Record(u64),
    /// The current block ended and its scope has been popped.
    EndBlock,
}

/// One decoded record: a code and its operand tuple. Array operands are
/// flattened into `fields` (Char6 elements as ASCII); a blob stays apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub code: u64,
    pub fields: Vec<u64>,
    pub blob: Option<Vec<u8>>,
}

impl Record {
    fn reset(&mut self) {
        self.code = 0;
        self.fields.clear();
        self.blob = None;
    }

    /// Interpret the fields starting at `from` as bytes of a name.
    #[must_use]
    pub fn string_from(&self, from: usize) -> String {
        self.fields[from.min(self.fields.len())..]
            .iter()
            .map(|&c| c as u8 as char)
            .collect()
    }
}

/// Abbreviations and names registered for a block id by BLOCKINFO.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    pub abbrevs: Vec<Arc<Abbreviation>>,
    pub name: Option<String>,
    pub record_names: HashMap<u64, String>,
}

struct Scope {
    block_id: Option<u32>,
    abbrev_width: u8,
    abbrevs: Vec<Arc<Abbreviation>>,
    block_end: Option<u64>,
}

const TOP_LEVEL_ABBREV_WIDTH: u8 = 2;

enum RawAbbrevOp {
    Scalar(ScalarOperand),
    Array,
    Blob,
}

/// Block- and record-level view of a bitstream.
///
/// Verifies the file header on open, then decodes blocks and records at bit
/// granularity. On any error the stream is left in an unspecified state and
/// parsing must be abandoned.
pub struct BitStream<'a> {
    cursor: Cursor<'a>,
    header: FileHeader,
    streaming: bool,
    abbrev_width: u8,
    block_id: Option<u32>,
    block_end: Option<u64>,
    abbrevs: Vec<Arc<Abbreviation>>,
    stack: Vec<Scope>,
    block_info: HashMap<u32, BlockInfo>,
    pending_block_id: Option<u32>,
}

impl<'a> BitStream<'a> {
    /// Verify the header prefix of `source` and position bit 0 after it.
    pub fn open(mut source: ByteSource<'a>) -> Result<Self, Error> {
        let header = FileHeader::read(&mut source)?;
        let streaming = source.is_streaming();
        Ok(Self {
            cursor: Cursor::new(source, header.size),
            header,
            streaming,
            abbrev_width: TOP_LEVEL_ABBREV_WIDTH,
            block_id: None,
            block_end: None,
            abbrevs: Vec::new(),
            stack: Vec::new(),
            block_info: HashMap::new(),
            pending_block_id: None,
        })
    }

    #[must_use]
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Whether the underlying source streams.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    #[must_use]
    pub fn bit_pos(&self) -> u64 {
        self.cursor.bit_pos()
    }

    /// True at the top level once the source is exhausted.
    pub fn at_end(&mut self) -> Result<bool, Error> {
        Ok(self.cursor.at_end()?)
    }

    /// Names registered by BLOCKINFO, if any.
    #[must_use]
    pub fn block_info(&self, block_id: u32) -> Option<&BlockInfo> {
        self.block_info.get(&block_id)
    }

    /// Return the next entry of the current block. `DEFINE_ABBREV` records
    /// are processed transparently.
    pub fn advance(&mut self) -> Result<Entry, Error> {
        loop {
            let abbrev_id = self.cursor.read(self.abbrev_width)? as u32;
            match BuiltinAbbreviationId::try_from(abbrev_id) {
                Ok(BuiltinAbbreviationId::EndBlock) => {
                    let Some(id) = self.block_id else {
                        return Err(Error::UnbalancedEndBlock);
                    };
                    self.cursor.align32();
                    if self.block_end != Some(self.cursor.bit_pos()) {
                        return Err(Error::BlockLengthMismatch(id));
                    }
                    let scope = self.stack.pop().expect("scope stack tracks block_id");
                    self.block_id = scope.block_id;
                    self.abbrev_width = scope.abbrev_width;
                    self.abbrevs = scope.abbrevs;
                    self.block_end = scope.block_end;
                    return Ok(Entry::EndBlock);
                }
                Ok(BuiltinAbbreviationId::EnterSubBlock) => {
                    let block_id = self.cursor.read_vbr(8)? as u32;
                    self.pending_block_id = Some(block_id);
                    return Ok(Entry::SubBlock(block_id));
                }
                Ok(BuiltinAbbreviationId::DefineAbbreviation) => {
                    let abbrev = Self::read_abbrev(&mut self.cursor)?;
                    self.abbrevs.push(Arc::new(abbrev));
                }
                Ok(BuiltinAbbreviationId::UnabbreviatedRecord) | Err(_) => {
                    return Ok(Entry::Record(u64::from(abbrev_id)));
                }
            }
        }
    }

    /// Like [`BitStream::advance`], but transparently skips nested blocks
    /// the caller does not want to inspect.
    pub fn advance_skipping_subblocks(&mut self) -> Result<Entry, Error> {
        loop {
            match self.advance()? {
                Entry::SubBlock(_) => self.skip_block()?,
                entry => return Ok(entry),
            }
        }
    }

    /// Enter the sub-block announced by the last `Entry::SubBlock`.
    pub fn enter_block(&mut self) -> Result<(), Error> {
        let id = self.pending_block_id.take().ok_or(Error::NotAtSubBlock)?;
        let width = self.cursor.read_vbr(4)?;
        if !(2..=32).contains(&width) {
            return Err(Error::BadAbbrevWidth(width));
        }
        self.cursor.align32();
        let words = self.cursor.read(32)?;
        self.stack.push(Scope {
            block_id: self.block_id,
            abbrev_width: self.abbrev_width,
            abbrevs: mem::take(&mut self.abbrevs),
            block_end: self.block_end,
        });
        self.block_id = Some(id);
        self.abbrev_width = width as u8;
        self.block_end = Some(self.cursor.bit_pos() + words * 32);
        Ok(())
    }

    /// Skip the sub-block announced by the last `Entry::SubBlock` using its
    /// declared length exclusively.
    pub fn skip_block(&mut self) -> Result<(), Error> {
        self.pending_block_id.take().ok_or(Error::NotAtSubBlock)?;
        let width = self.cursor.read_vbr(4)?;
        if !(2..=32).contains(&width) {
            return Err(Error::BadAbbrevWidth(width));
        }
        self.cursor.align32();
        let words = self.cursor.read(32)?;
        self.cursor.skip_bits(words * 32);
        Ok(())
    }

    /// Re-position the cursor at a remembered sub-block of `block_id` whose
    /// `ENTER_SUBBLOCK` prefix ended at `bit`, ready for
    /// [`BitStream::enter_block`].
    pub fn resume_sub_block(&mut self, bit: u64, block_id: u32) {
        self.cursor.jump_to_bit(bit);
        self.pending_block_id = Some(block_id);
    }

    pub fn jump_to_bit(&mut self, bit: u64) {
        self.pending_block_id = None;
        self.cursor.jump_to_bit(bit);
    }

    /// Materialize the record the last `Entry::Record(abbrev_id)` announced.
    pub fn read_record(&mut self, abbrev_id: u64, record: &mut Record) -> Result<(), Error> {
        record.reset();
        if abbrev_id == u64::from(BuiltinAbbreviationId::UnabbreviatedRecord as u32) {
            record.code = self.cursor.read_vbr(6)?;
            let num_ops = self.cursor.read_vbr(6)? as usize;
            record.fields.reserve(num_ops);
            for _ in 0..num_ops {
                record.fields.push(self.cursor.read_vbr(6)?);
            }
            return Ok(());
        }

        let abbrev = self.lookup_abbrev(abbrev_id)?;
        let mut fields = abbrev.fields.iter();
        let code_op = fields.next().ok_or(Error::InvalidAbbrev)?;
        record.code = Self::read_scalar(&mut self.cursor, *code_op)?;
        for op in fields {
            record.fields.push(Self::read_scalar(&mut self.cursor, *op)?);
        }
        match abbrev.payload {
            Some(PayloadOperand::Array(elem)) => {
                let len = self.cursor.read_vbr(6)? as usize;
                record.fields.reserve(len);
                for _ in 0..len {
                    record.fields.push(Self::read_scalar(&mut self.cursor, elem)?);
                }
            }
            Some(PayloadOperand::Blob) => {
                let len = self.cursor.read_vbr(6)? as usize;
                self.cursor.align32();
                record.blob = Some(self.cursor.read_bytes(len)?);
                self.cursor.align32();
            }
            None => {}
        }
        Ok(())
    }

    /// Process a standard BLOCKINFO block, registering abbreviations and
    /// names for application block ids before they occur.
    pub fn read_blockinfo_block(&mut self) -> Result<(), Error> {
        self.enter_block()?;
        let mut current: Option<u32> = None;
        let mut record = Record::default();
        loop {
            let abbrev_id = self.cursor.read(self.abbrev_width)? as u32;
            match BuiltinAbbreviationId::try_from(abbrev_id) {
                Ok(BuiltinAbbreviationId::EndBlock) => {
                    self.cursor.align32();
                    if self.block_end != Some(self.cursor.bit_pos()) {
                        return Err(Error::BlockLengthMismatch(0));
                    }
                    let scope = self.stack.pop().expect("blockinfo scope");
                    self.block_id = scope.block_id;
                    self.abbrev_width = scope.abbrev_width;
                    self.abbrevs = scope.abbrevs;
                    self.block_end = scope.block_end;
                    return Ok(());
                }
                Ok(BuiltinAbbreviationId::EnterSubBlock) => {
                    return Err(Error::NestedBlockInBlockInfo);
                }
                Ok(BuiltinAbbreviationId::DefineAbbreviation) => {
                    let target = current.ok_or(Error::MissingSetBid)?;
                    let abbrev = Self::read_abbrev(&mut self.cursor)?;
                    self.block_info
                        .entry(target)
                        .or_default()
                        .abbrevs
                        .push(Arc::new(abbrev));
                }
                Ok(BuiltinAbbreviationId::UnabbreviatedRecord) => {
                    self.read_record(u64::from(abbrev_id), &mut record)?;
                    let code = u8::try_from(record.code)
                        .ok()
                        .and_then(|c| BlockInfoCode::try_from(c).ok())
                        .ok_or(Error::InvalidBlockInfoRecord(record.code))?;
                    match code {
                        BlockInfoCode::SetBid => {
                            let id = record
                                .fields
                                .first()
                                .and_then(|&v| u32::try_from(v).ok())
                                .ok_or(Error::InvalidBlockInfoRecord(record.code))?;
                            current = Some(id);
                        }
                        BlockInfoCode::BlockName => {
                            let target = current.ok_or(Error::MissingSetBid)?;
                            let name = record.string_from(0);
                            self.block_info.entry(target).or_default().name = Some(name);
                        }
                        BlockInfoCode::SetRecordName => {
                            let target = current.ok_or(Error::MissingSetBid)?;
                            let record_code = *record
                                .fields
                                .first()
                                .ok_or(Error::InvalidBlockInfoRecord(record.code))?;
                            let name = record.string_from(1);
                            self.block_info
                                .entry(target)
                                .or_default()
                                .record_names
                                .insert(record_code, name);
                        }
                    }
                }
                Err(_) => {
                    return Err(Error::NoSuchAbbrev {
                        block_id: 0,
                        abbrev_id,
                    });
                }
            }
        }
    }

    fn lookup_abbrev(&self, abbrev_id: u64) -> Result<Arc<Abbreviation>, Error> {
        let missing = || Error::NoSuchAbbrev {
            block_id: self.block_id.unwrap_or(u32::MAX),
            abbrev_id: abbrev_id as u32,
        };
        let index = (abbrev_id as u32)
            .checked_sub(FIRST_APPLICATION_ABBREV_ID)
            .ok_or_else(missing)? as usize;
        // BLOCKINFO-registered abbreviations receive ids first, followed by
        // abbreviations defined within the block itself.
        let global = self
            .block_id
            .and_then(|id| self.block_info.get(&id))
            .map(|info| info.abbrevs.as_slice())
            .unwrap_or_default();
        let found = if let Some(local_index) = index.checked_sub(global.len()) {
            self.abbrevs.get(local_index)
        } else {
            global.get(index)
        };
        found.cloned().ok_or_else(missing)
    }

    fn read_scalar(cursor: &mut Cursor<'_>, op: ScalarOperand) -> Result<u64, Error> {
        match op {
            ScalarOperand::Literal(value) => Ok(value),
            ScalarOperand::Fixed(0) => Ok(0),
            ScalarOperand::Fixed(width) => Ok(cursor.read(width)?),
            ScalarOperand::Vbr(width) => Ok(cursor.read_vbr(width)?),
            ScalarOperand::Char6 => {
                let raw = cursor.read(6)? as u8;
                decode_char6(raw).map(u64::from).ok_or(Error::InvalidChar6)
            }
        }
    }

    /// Read one operand of a `DEFINE_ABBREV` record.
    fn read_abbrev_op(cursor: &mut Cursor<'_>) -> Result<RawAbbrevOp, Error> {
        if cursor.read(1)? == 1 {
            return Ok(RawAbbrevOp::Scalar(ScalarOperand::Literal(
                cursor.read_vbr(8)?,
            )));
        }
        let enc =
            AbbrevEncoding::try_from(cursor.read(3)? as u8).map_err(|_| Error::InvalidAbbrev)?;
        Ok(match enc {
            AbbrevEncoding::Fixed => {
                let width = cursor.read_vbr(5)?;
                if width > 64 {
                    return Err(Error::InvalidAbbrev);
                }
                RawAbbrevOp::Scalar(ScalarOperand::Fixed(width as u8))
            }
            AbbrevEncoding::Vbr => {
                let width = cursor.read_vbr(5)?;
                if !(2..=32).contains(&width) {
                    return Err(Error::InvalidAbbrev);
                }
                RawAbbrevOp::Scalar(ScalarOperand::Vbr(width as u8))
            }
            AbbrevEncoding::Char6 => RawAbbrevOp::Scalar(ScalarOperand::Char6),
            AbbrevEncoding::Array => RawAbbrevOp::Array,
            AbbrevEncoding::Blob => RawAbbrevOp::Blob,
        })
    }

    fn read_abbrev(cursor: &mut Cursor<'_>) -> Result<Abbreviation, Error> {
        let num_ops = cursor.read_vbr(5)? as usize;
        if num_ops == 0 {
            return Err(Error::InvalidAbbrev);
        }
        let mut fields = Vec::with_capacity(num_ops);
        let mut payload = None;
        let mut remaining = num_ops;
        while remaining > 0 {
            remaining -= 1;
            match Self::read_abbrev_op(cursor)? {
                RawAbbrevOp::Scalar(op) => fields.push(op),
                // An array consumes the following element operand and must
                // be the final value-producing operand.
                RawAbbrevOp::Array => {
                    if remaining != 1 {
                        return Err(Error::InvalidAbbrev);
                    }
                    remaining -= 1;
                    let RawAbbrevOp::Scalar(elem) = Self::read_abbrev_op(cursor)? else {
                        return Err(Error::InvalidAbbrev);
                    };
                    payload = Some(PayloadOperand::Array(elem));
                }
                RawAbbrevOp::Blob => {
                    if remaining != 0 {
                        return Err(Error::InvalidAbbrev);
                    }
                    payload = Some(PayloadOperand::Blob);
                }
            }
        }
        Ok(Abbreviation { fields, payload })
    }
}

impl std::fmt::Debug for BitStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitStream")
            .field("bit", &self.cursor.bit_pos())
            .field("block_id", &self.block_id)
            .field("abbrev_width", &self.abbrev_width)
            .field("depth", &self.stack.len())
            .finish()
    }
}
