//! Streaming, forward-reference-tolerant module decoder.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::ir::{
    CallingConv, Function, GlobalVariable, Initializer, Module, ModuleValue, Type, TypeId, ValueId,
    intrinsics,
};
use crate::schema::blocks::{
    BLOCKINFO_BLOCK_ID, BlockId, GlobalVarCode, ModuleCode, SymtabCode, TypeCode,
};
use crate::schema::values::{C_CALLING_CONV, decode_alignment, decode_linkage};
use crate::source::ByteSource;
use crate::stream::{self, BitStream, Entry, Record};

mod function;
mod values;

use self::function::BodyParser;

/// The format version every MODULE block must declare.
const SUPPORTED_MODULE_VERSION: u64 = 1;

/// Decoder errors. Non-recoverable: when a parse call fails, the
/// in-progress module must be discarded.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("malformed bitstream: {0}")]
    MalformedBitstream(String),
    #[error("unknown code: {0}")]
    UnknownCode(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("version mismatch: module version {0} is not supported")]
    VersionMismatch(u64),
}

impl From<stream::Error> for ReadError {
    fn from(err: stream::Error) -> Self {
        Self::MalformedBitstream(err.to_string())
    }
}

/// Decodes a bitstream into a [`Module`] and owns the module while bodies
/// are materialized. The reader is the module's materializer: it remembers
/// the bit offset of every function body and parses bodies on demand.
pub struct ModuleReader<'a> {
    stream: BitStream<'a>,
    module: Module,
    /// Wire type id -> interned type. Slots fill as records arrive; a `None`
    /// slot read early becomes an opaque placeholder.
    type_table: Vec<Option<TypeId>>,
    type_block_seen: bool,
    globals_seen: bool,
    seen_value_symtab: bool,
    seen_first_body: bool,
    module_seen: bool,
    module_done: bool,
    /// Module-level value ids handed out so far (placeholders excluded).
    defined_module_values: u32,
    /// Functions whose bodies are still expected, in source order.
    body_queue: VecDeque<u32>,
    /// Function index -> bit offset of its body block, once known.
    deferred: HashMap<u32, Option<u64>>,
    /// Where a suspended streaming module parse resumes.
    resume_bit: Option<u64>,
}

impl<'a> ModuleReader<'a> {
    /// Decode the skeleton of a module: types, globals, prototypes, symbol
    /// table. With a buffered source, function bodies are parsed in place;
    /// with a streaming source the parse suspends at the first body and
    /// bodies are read by [`ModuleReader::materialize`].
    pub fn parse_bitcode_into(
        source: ByteSource<'a>,
        target_triple: impl Into<String>,
    ) -> Result<Self, ReadError> {
        if let ByteSource::Buffer(data) = &source {
            if data.len() % 4 != 0 {
                return Err(ReadError::MalformedBitstream(
                    "bitcode buffer length is not a multiple of four bytes".into(),
                ));
            }
        }
        let stream = BitStream::open(source)?;
        let mut reader = Self {
            stream,
            module: Module::new(target_triple),
            type_table: Vec::new(),
            type_block_seen: false,
            globals_seen: false,
            seen_value_symtab: false,
            seen_first_body: false,
            module_seen: false,
            module_done: false,
            defined_module_values: 0,
            body_queue: VecDeque::new(),
            deferred: HashMap::new(),
            resume_bit: None,
        };
        reader.run_top_level()?;
        Ok(reader)
    }

    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    #[must_use]
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    #[must_use]
    pub fn into_module(self) -> Module {
        self.module
    }

    /// Whether `materialize` has a body (or a way to find one) for this
    /// function.
    #[must_use]
    pub fn is_materializable(&self, func_index: u32) -> bool {
        self.module
            .functions
            .get(func_index as usize)
            .is_some_and(|f| !f.is_proto && f.body.is_none())
            && self.deferred.contains_key(&func_index)
    }

    /// Parse the body of one function, seeking to its remembered bit
    /// offset. Streams the module forward first when the offset is not yet
    /// known. A no-op for prototypes and already-material functions.
    pub fn materialize(&mut self, func_index: u32) -> Result<(), ReadError> {
        let Some(function) = self.module.functions.get(func_index as usize) else {
            return Err(ReadError::InvalidRecord(format!(
                "no function with index {func_index}"
            )));
        };
        if function.is_proto || function.body.is_some() {
            return Ok(());
        }
        loop {
            match self.deferred.get(&func_index) {
                Some(Some(_)) => break,
                Some(None) if self.resume_bit.is_some() => self.parse_module(true)?,
                _ => {
                    return Err(ReadError::UnresolvedReference(format!(
                        "no body in stream for function `{}`",
                        self.module.functions[func_index as usize].name
                    )));
                }
            }
        }
        let bit = self.deferred[&func_index].expect("offset just checked");
        debug!(function = func_index, bit, "materializing function body");
        self.stream.resume_sub_block(bit, BlockId::Function as u32);
        BodyParser::parse(self, func_index)
    }

    /// Drop a function's body, keeping its bit offset so it can be
    /// materialized again.
    pub fn dematerialize(&mut self, func_index: u32) {
        if matches!(self.deferred.get(&func_index), Some(Some(_))) {
            if let Some(function) = self.module.functions.get_mut(func_index as usize) {
                function.body = None;
            }
        }
    }

    /// Materialize every function and finish any suspended module parse.
    pub fn materialize_all(&mut self) -> Result<(), ReadError> {
        for func_index in 0..self.module.functions.len() as u32 {
            if self.is_materializable(func_index) {
                self.materialize(func_index)?;
            }
        }
        self.finish_parse()
    }

    /// Finish a suspended streaming module parse without materializing
    /// anything further (trailing records after the last function body).
    pub fn finish_parse(&mut self) -> Result<(), ReadError> {
        while self.resume_bit.is_some() {
            self.parse_module(true)?;
        }
        Ok(())
    }

    fn run_top_level(&mut self) -> Result<(), ReadError> {
        loop {
            if self.stream.at_end()? {
                return Ok(());
            }
            match self.stream.advance()? {
                Entry::SubBlock(BLOCKINFO_BLOCK_ID) => self.stream.read_blockinfo_block()?,
                Entry::SubBlock(id) if id == BlockId::Module as u32 => {
                    if self.module_seen {
                        return Err(ReadError::MalformedBitstream(
                            "multiple MODULE blocks in one stream".into(),
                        ));
                    }
                    self.module_seen = true;
                    self.stream.enter_block()?;
                    self.parse_module(false)?;
                    if self.resume_bit.is_some() {
                        // Streaming: control returns to the driver; bodies
                        // are read on materialize calls.
                        return Ok(());
                    }
                }
                Entry::SubBlock(_) => self.stream.skip_block()?,
                Entry::Record(_) => {
                    return Err(ReadError::InvalidRecord("record at top level".into()));
                }
                Entry::EndBlock => {
                    return Err(ReadError::MalformedBitstream(
                        "end of block at top level".into(),
                    ));
                }
            }
        }
    }

    /// Parse MODULE block entries until the block ends or, in streaming
    /// mode, until the parse suspends at a function body.
    fn parse_module(&mut self, resume: bool) -> Result<(), ReadError> {
        if resume {
            let bit = self.resume_bit.take().expect("suspended parse position");
            self.stream.jump_to_bit(bit);
        }
        let mut record = Record::default();
        loop {
            match self.stream.advance()? {
                Entry::EndBlock => {
                    self.global_cleanup()?;
                    if let Some(&index) = self.body_queue.front() {
                        return Err(ReadError::UnresolvedReference(format!(
                            "no body in stream for function `{}`",
                            self.module.functions[index as usize].name
                        )));
                    }
                    self.module_done = true;
                    debug!("module block complete");
                    return Ok(());
                }
                Entry::SubBlock(id) => {
                    if self.parse_module_subblock(id)? {
                        return Ok(());
                    }
                }
                Entry::Record(abbrev_id) => {
                    self.stream.read_record(abbrev_id, &mut record)?;
                    self.parse_module_record(&record)?;
                }
            }
        }
    }

    /// Returns `true` when the parse suspended.
    fn parse_module_subblock(&mut self, id: u32) -> Result<bool, ReadError> {
        if id == BLOCKINFO_BLOCK_ID {
            self.stream.read_blockinfo_block()?;
            return Ok(false);
        }
        match BlockId::try_from(id) {
            Ok(BlockId::Type) => {
                if self.type_block_seen {
                    return Err(ReadError::InvalidRecord("multiple TYPE blocks".into()));
                }
                self.type_block_seen = true;
                self.parse_type_block()?;
            }
            Ok(BlockId::GlobalVar) => {
                if self.globals_seen {
                    return Err(ReadError::InvalidRecord("multiple GLOBALVAR blocks".into()));
                }
                self.globals_seen = true;
                self.parse_globals()?;
            }
            Ok(BlockId::ValueSymtab) => {
                self.parse_module_symtab()?;
                self.seen_value_symtab = true;
                // Names are known now, so intrinsic declarations can get
                // their elided pointer parameter types back.
                self.recover_intrinsic_signatures();
            }
            Ok(BlockId::Function) => {
                if !self.seen_first_body {
                    self.seen_first_body = true;
                    self.global_cleanup()?;
                }
                let Some(func_index) = self.body_queue.pop_front() else {
                    return Err(ReadError::InvalidRecord(
                        "function body without a matching prototype".into(),
                    ));
                };
                self.deferred.insert(func_index, Some(self.stream.bit_pos()));
                if self.stream.is_streaming() {
                    self.stream.skip_block()?;
                    if self.seen_value_symtab {
                        self.resume_bit = Some(self.stream.bit_pos());
                        debug!(
                            function = func_index,
                            "suspending module parse at function body"
                        );
                        return Ok(true);
                    }
                } else {
                    BodyParser::parse(self, func_index)?;
                }
            }
            Ok(BlockId::Module | BlockId::Constants) | Err(_) => {
                return Err(ReadError::UnknownCode(format!(
                    "block id {id} inside MODULE"
                )));
            }
        }
        Ok(false)
    }

    fn parse_module_record(&mut self, record: &Record) -> Result<(), ReadError> {
        let code = u8::try_from(record.code)
            .ok()
            .and_then(|c| ModuleCode::try_from(c).ok())
            .ok_or_else(|| ReadError::UnknownCode(format!("MODULE code {}", record.code)))?;
        match code {
            ModuleCode::Version => {
                let version = *record.fields.first().ok_or_else(|| {
                    ReadError::InvalidRecord("VERSION record without operand".into())
                })?;
                if version != SUPPORTED_MODULE_VERSION {
                    return Err(ReadError::VersionMismatch(version));
                }
            }
            ModuleCode::Function => {
                if record.fields.len() < 4 {
                    return Err(ReadError::InvalidRecord(
                        "FUNCTION record needs type, calling convention, proto flag and linkage"
                            .into(),
                    ));
                }
                let ty = self.get_type(record.fields[0])?;
                if self.module.types.as_function(ty).is_none() {
                    return Err(ReadError::InvalidRecord(
                        "function declared with a non-function type".into(),
                    ));
                }
                if record.fields[1] != C_CALLING_CONV {
                    return Err(ReadError::InvalidRecord(format!(
                        "calling convention {} is not supported",
                        record.fields[1]
                    )));
                }
                let is_proto = record.fields[2] != 0;
                let linkage = decode_linkage(record.fields[3]);
                let func_index = self.module.functions.len() as u32;
                self.module.functions.push(Function {
                    name: String::new(),
                    ty,
                    linkage,
                    calling_conv: CallingConv::C,
                    is_proto,
                    body: None,
                });
                self.define_module_value(ModuleValue::Function(func_index))?;
                if !is_proto {
                    self.body_queue.push_back(func_index);
                    if self.stream.is_streaming() {
                        self.deferred.insert(func_index, None);
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_type_block(&mut self) -> Result<(), ReadError> {
        self.stream.enter_block()?;
        debug!("parsing type table");
        let mut record = Record::default();
        let mut sized = false;
        let mut filled = 0usize;
        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => {
                    if filled != self.type_table.len() {
                        return Err(ReadError::UnresolvedReference(format!(
                            "type table declares {} entries but defines {filled}",
                            self.type_table.len()
                        )));
                    }
                    return Ok(());
                }
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    self.stream.read_record(abbrev_id, &mut record)?;
                    let code = u8::try_from(record.code)
                        .ok()
                        .and_then(|c| TypeCode::try_from(c).ok())
                        .ok_or_else(|| {
                            ReadError::UnknownCode(format!("type code {}", record.code))
                        })?;
                    if let TypeCode::NumEntry = code {
                        if sized {
                            return Err(ReadError::InvalidRecord(
                                "duplicate NUMENTRY in type table".into(),
                            ));
                        }
                        let count = *record.fields.first().ok_or_else(|| {
                            ReadError::InvalidRecord("NUMENTRY record without operand".into())
                        })?;
                        sized = true;
                        self.type_table = vec![None; count as usize];
                        continue;
                    }
                    if !sized || filled >= self.type_table.len() {
                        return Err(ReadError::InvalidRecord(
                            "type record outside the declared table size".into(),
                        ));
                    }
                    let ty = self.parse_type_record(code, &record)?;
                    // A forward-created placeholder may occupy the slot;
                    // the defining record replaces it in the table while
                    // captured uses keep the placeholder.
                    self.type_table[filled] = Some(ty);
                    filled += 1;
                }
            }
        }
    }

    fn parse_type_record(&mut self, code: TypeCode, record: &Record) -> Result<TypeId, ReadError> {
        Ok(match code {
            TypeCode::NumEntry => unreachable!("handled by caller"),
            TypeCode::Void => self.module.types.void(),
            TypeCode::Float => self.module.types.float(),
            TypeCode::Double => self.module.types.double(),
            TypeCode::Integer => {
                let width = *record.fields.first().ok_or_else(|| {
                    ReadError::InvalidRecord("INTEGER type record without width".into())
                })?;
                let width = u32::try_from(width).map_err(|_| {
                    ReadError::InvalidRecord("integer type width out of range".into())
                })?;
                if width == 0 {
                    return Err(ReadError::InvalidRecord("zero-width integer type".into()));
                }
                self.module.types.int(width)
            }
            TypeCode::Function => {
                if record.fields.len() < 2 {
                    return Err(ReadError::InvalidRecord(
                        "FUNCTION type record needs vararg flag and return type".into(),
                    ));
                }
                let vararg = record.fields[0] != 0;
                let ret = self.get_type(record.fields[1])?;
                let mut params = Vec::with_capacity(record.fields.len() - 2);
                for &param in &record.fields[2..] {
                    params.push(self.get_type(param)?);
                }
                self.module.types.function(ret, params, vararg)
            }
        })
    }

    /// Resolve a wire type id. The table size is authoritative; a reference
    /// to a not-yet-defined slot yields a distinct opaque placeholder.
    fn get_type(&mut self, id: u64) -> Result<TypeId, ReadError> {
        let index = usize::try_from(id)
            .ok()
            .filter(|&index| index < self.type_table.len())
            .ok_or_else(|| {
                ReadError::UnresolvedReference(format!("type id {id} is not defined"))
            })?;
        Ok(match self.type_table[index] {
            Some(ty) => ty,
            None => {
                let placeholder = self.module.types.fresh_opaque();
                self.type_table[index] = Some(placeholder);
                placeholder
            }
        })
    }

    fn parse_globals(&mut self) -> Result<(), ReadError> {
        self.stream.enter_block()?;
        debug!("parsing global variables");
        let mut record = Record::default();
        // Pending variable: alignment, constness, required fragment count.
        let mut processing: Option<(u32, bool, usize)> = None;
        let mut fragments: Vec<Initializer> = Vec::new();
        let mut expected: Option<u64> = None;
        let mut defined = 0u64;
        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => {
                    if processing.is_some() || expected.unwrap_or(0) != defined {
                        return Err(ReadError::InvalidRecord(
                            "global variable block ended mid-definition or with a count mismatch"
                                .into(),
                        ));
                    }
                    return Ok(());
                }
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    self.stream.read_record(abbrev_id, &mut record)?;
                    let code = u8::try_from(record.code)
                        .ok()
                        .and_then(|c| GlobalVarCode::try_from(c).ok())
                        .ok_or_else(|| {
                            ReadError::UnknownCode(format!("global variable code {}", record.code))
                        })?;
                    match code {
                        GlobalVarCode::Var => {
                            if processing.is_some() || record.fields.len() != 2 {
                                return Err(ReadError::InvalidRecord(
                                    "bad VAR record in global variable block".into(),
                                ));
                            }
                            let alignment =
                                decode_alignment(record.fields[0]).ok_or_else(|| {
                                    ReadError::InvalidRecord(
                                        "global variable alignment out of range".into(),
                                    )
                                })?;
                            // One initializer unless COMPOUND raises it.
                            processing = Some((alignment, record.fields[1] != 0, 1));
                        }
                        GlobalVarCode::Compound => {
                            let Some((_, _, needed)) = processing.as_mut() else {
                                return Err(ReadError::InvalidRecord(
                                    "COMPOUND record outside a variable definition".into(),
                                ));
                            };
                            if *needed != 1 || !fragments.is_empty() || record.fields.len() != 1 {
                                return Err(ReadError::InvalidRecord(
                                    "bad COMPOUND record in global variable block".into(),
                                ));
                            }
                            *needed = usize::try_from(record.fields[0]).map_err(|_| {
                                ReadError::InvalidRecord("compound count out of range".into())
                            })?;
                        }
                        GlobalVarCode::ZeroFill => {
                            if processing.is_none() || record.fields.len() != 1 {
                                return Err(ReadError::InvalidRecord(
                                    "bad ZEROFILL record in global variable block".into(),
                                ));
                            }
                            fragments.push(Initializer::ZeroFill(record.fields[0]));
                        }
                        GlobalVarCode::Data => {
                            if processing.is_none() || record.fields.is_empty() {
                                return Err(ReadError::InvalidRecord(
                                    "bad DATA record in global variable block".into(),
                                ));
                            }
                            let bytes = record.fields.iter().map(|&v| v as u8).collect();
                            fragments.push(Initializer::Data(bytes));
                        }
                        GlobalVarCode::Reloc => {
                            if processing.is_none()
                                || record.fields.is_empty()
                                || record.fields.len() > 2
                            {
                                return Err(ReadError::InvalidRecord(
                                    "bad RELOC record in global variable block".into(),
                                ));
                            }
                            let value = self.global_ref(record.fields[0])?;
                            let addend = record.fields.get(1).map(|&a| a as u32);
                            fragments.push(Initializer::Reloc { value, addend });
                        }
                        GlobalVarCode::Count => {
                            if record.fields.len() != 1 || expected.is_some() {
                                return Err(ReadError::InvalidRecord(
                                    "bad COUNT record in global variable block".into(),
                                ));
                            }
                            expected = Some(record.fields[0]);
                        }
                    }
                    if let Some((alignment, is_constant, needed)) = processing {
                        if fragments.len() > needed {
                            return Err(ReadError::InvalidRecord(
                                "global variable has more initializers than declared".into(),
                            ));
                        }
                        if fragments.len() == needed {
                            if needed == 0 {
                                return Err(ReadError::InvalidRecord(
                                    "global variable without initializer".into(),
                                ));
                            }
                            let global = GlobalVariable::new(
                                &mut self.module.types,
                                alignment,
                                is_constant,
                                std::mem::take(&mut fragments),
                            );
                            let global_index = self.module.globals.len() as u32;
                            self.module.globals.push(global);
                            self.define_module_value(ModuleValue::Global(global_index))?;
                            defined += 1;
                            processing = None;
                        }
                    }
                }
            }
        }
    }

    /// Module value referenced by a relocation; installs an untyped
    /// placeholder when the id is not defined yet.
    fn global_ref(&mut self, id: u64) -> Result<ValueId, ReadError> {
        let id = u32::try_from(id)
            .map_err(|_| ReadError::InvalidRecord("relocation value id out of range".into()))?;
        let index = id as usize;
        if index >= self.module.values.len() {
            self.module
                .values
                .resize(index + 1, ModuleValue::ForwardGlobal);
        }
        Ok(ValueId(id))
    }

    fn define_module_value(&mut self, value: ModuleValue) -> Result<ValueId, ReadError> {
        let next = self.defined_module_values as usize;
        if next < self.module.values.len() {
            if !matches!(self.module.values[next], ModuleValue::ForwardGlobal) {
                return Err(ReadError::InvalidRecord(format!(
                    "duplicate definition of module value {next}"
                )));
            }
            self.module.values[next] = value;
        } else {
            self.module.values.push(value);
        }
        self.defined_module_values += 1;
        Ok(ValueId(next as u32))
    }

    fn parse_module_symtab(&mut self) -> Result<(), ReadError> {
        self.stream.enter_block()?;
        debug!("parsing module value symbol table");
        let mut record = Record::default();
        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    self.stream.read_record(abbrev_id, &mut record)?;
                    let code = u8::try_from(record.code)
                        .ok()
                        .and_then(|c| SymtabCode::try_from(c).ok())
                        .ok_or_else(|| {
                            ReadError::UnknownCode(format!("symbol table code {}", record.code))
                        })?;
                    match code {
                        SymtabCode::Entry => {
                            let id = *record.fields.first().ok_or_else(|| {
                                ReadError::InvalidRecord("symbol table entry without id".into())
                            })?;
                            let name = record.string_from(1);
                            self.name_module_value(id, name)?;
                        }
                        SymtabCode::BlockEntry => {
                            return Err(ReadError::InvalidRecord(
                                "basic block name outside a function body".into(),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn name_module_value(&mut self, id: u64, name: String) -> Result<(), ReadError> {
        let value = usize::try_from(id)
            .ok()
            .and_then(|index| self.module.values.get(index))
            .copied()
            .ok_or_else(|| {
                ReadError::InvalidRecord(format!("symbol table names unknown value {id}"))
            })?;
        match value {
            ModuleValue::Function(index) => {
                self.module.functions[index as usize].name = name;
            }
            ModuleValue::Global(index) => {
                self.module.globals[index as usize].name = name;
            }
            ModuleValue::ForwardGlobal => {
                return Err(ReadError::InvalidRecord(format!(
                    "symbol table names undefined value {id}"
                )));
            }
        }
        Ok(())
    }

    fn recover_intrinsic_signatures(&mut self) {
        for function in &mut self.module.functions {
            if !function.is_intrinsic() {
                continue;
            }
            let Some(fn_ty) = self.module.types.as_function(function.ty).cloned() else {
                continue;
            };
            if let Some(fixed) =
                intrinsics::recover_pointer_params(&function.name, &fn_ty, &mut self.module.types)
            {
                debug!(name = %function.name, "recovered intrinsic pointer signature");
                function.ty = self.module.types.intern(Type::Function(fixed));
            }
        }
    }

    /// Every forward global reference must be resolved once the module
    /// skeleton is complete (first body block, or end of MODULE).
    fn global_cleanup(&mut self) -> Result<(), ReadError> {
        for (index, value) in self.module.values.iter().enumerate() {
            if matches!(value, ModuleValue::ForwardGlobal) {
                return Err(ReadError::UnresolvedReference(format!(
                    "global relocation references undefined value {index}"
                )));
            }
        }
        Ok(())
    }
}

/// Decode a complete module from `source`: parse the skeleton, materialize
/// every function body, and return the module.
pub fn parse_bitcode(
    source: ByteSource<'_>,
    target_triple: impl Into<String>,
) -> Result<Module, ReadError> {
    let mut reader = ModuleReader::parse_bitcode_into(source, target_triple)?;
    reader.materialize_all()?;
    Ok(reader.into_module())
}
