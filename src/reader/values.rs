use crate::ir::{LocalValue, TypeId, ValueId};

use super::ReadError;

/// The value space of one function body under decode.
///
/// Wire ids are dense and monotonically assigned: module-level values,
/// then arguments, constants and instruction results in stream order.
/// Casts the reader synthesizes get a value without a wire id, so the
/// wire numbering stays exactly what the encoder produced.
///
/// Forward references are handled slot-first: a FORWARDTYPEREF installs a
/// typed placeholder at its future wire id, uses reference the placeholder's
/// value id, and the defining record later fills the same slot, so no use
/// rewriting is needed.
pub(crate) struct FnValueSpace {
    module_len: u32,
    defs: Vec<LocalValue>,
    /// Wire slot table for ids `>= module_len`; `None` = not yet declared.
    wire: Vec<Option<ValueId>>,
    /// The next wire id to assign, and the base of relative operand ids.
    next_wire: u32,
}

impl FnValueSpace {
    pub fn new(module_len: u32) -> Self {
        Self {
            module_len,
            defs: Vec::new(),
            wire: Vec::new(),
            next_wire: module_len,
        }
    }

    /// Assign `value` (of type `ty`) to the next wire id. Fills a
    /// pre-declared forward slot when one exists.
    pub fn assign(&mut self, value: LocalValue, ty: TypeId) -> Result<ValueId, ReadError> {
        let idx = (self.next_wire - self.module_len) as usize;
        if let Some(Some(vid)) = self.wire.get(idx) {
            let vid = *vid;
            let LocalValue::Forward { ty: declared } = self.defs[(vid.0 - self.module_len) as usize]
            else {
                return Err(ReadError::InvalidRecord(format!(
                    "duplicate definition of value {}",
                    self.next_wire
                )));
            };
            if declared != ty {
                return Err(ReadError::InvalidRecord(format!(
                    "forward reference type mismatch for value {}",
                    self.next_wire
                )));
            }
            self.defs[(vid.0 - self.module_len) as usize] = value;
            self.next_wire += 1;
            return Ok(vid);
        }
        let vid = ValueId(self.module_len + self.defs.len() as u32);
        self.defs.push(value);
        if idx < self.wire.len() {
            self.wire[idx] = Some(vid);
        } else {
            debug_assert_eq!(idx, self.wire.len());
            self.wire.push(Some(vid));
        }
        self.next_wire += 1;
        Ok(vid)
    }

    /// Add a value with no wire id (a synthesized cast).
    pub fn push_synthetic(&mut self, value: LocalValue) -> ValueId {
        let vid = ValueId(self.module_len + self.defs.len() as u32);
        self.defs.push(value);
        vid
    }

    /// Pre-declare wire id `abs` with the given type.
    pub fn declare_forward(&mut self, abs: u64, ty: TypeId) -> Result<(), ReadError> {
        let abs = u32::try_from(abs)
            .map_err(|_| ReadError::InvalidRecord("forward reference id out of range".into()))?;
        if abs < self.next_wire {
            return Err(ReadError::InvalidRecord(format!(
                "forward reference to already defined value {abs}"
            )));
        }
        let idx = (abs - self.module_len) as usize;
        if self.wire.len() <= idx {
            self.wire.resize(idx + 1, None);
        }
        if self.wire[idx].is_some() {
            return Err(ReadError::InvalidRecord(format!(
                "duplicate forward reference for value {abs}"
            )));
        }
        let vid = self.push_synthetic(LocalValue::Forward { ty });
        self.wire[idx] = Some(vid);
        Ok(())
    }

    /// Whether the next wire id was pre-declared as a forward reference.
    pub fn next_is_forward(&self) -> bool {
        let idx = (self.next_wire - self.module_len) as usize;
        matches!(self.wire.get(idx), Some(Some(vid))
            if matches!(self.defs[(vid.0 - self.module_len) as usize], LocalValue::Forward { .. }))
    }

    /// Resolve an operand encoded relative to the current wire base.
    /// Forward distances wrap around the 32-bit id space.
    pub fn resolve_relative(&self, rel: u64) -> Result<ValueId, ReadError> {
        let rel = u32::try_from(rel)
            .map_err(|_| ReadError::InvalidRecord("relative value id out of range".into()))?;
        self.resolve_absolute(self.next_wire.wrapping_sub(rel))
    }

    /// Resolve a signed relative operand (PHI incoming values).
    pub fn resolve_signed_relative(&self, delta: i64) -> Result<ValueId, ReadError> {
        let abs = i64::from(self.next_wire) - delta;
        let abs = u32::try_from(abs)
            .map_err(|_| ReadError::InvalidRecord("relative value id out of range".into()))?;
        self.resolve_absolute(abs)
    }

    pub fn resolve_absolute(&self, abs: u32) -> Result<ValueId, ReadError> {
        if abs < self.module_len {
            return Ok(ValueId(abs));
        }
        let idx = (abs - self.module_len) as usize;
        match self.wire.get(idx) {
            Some(Some(vid)) => Ok(*vid),
            _ => Err(ReadError::UnresolvedReference(format!(
                "value id {abs} is not defined"
            ))),
        }
    }

    pub fn is_local(&self, vid: ValueId) -> bool {
        vid.0 >= self.module_len
    }

    pub fn local(&self, vid: ValueId) -> &LocalValue {
        &self.defs[(vid.0 - self.module_len) as usize]
    }

    pub fn local_mut(&mut self, vid: ValueId) -> &mut LocalValue {
        &mut self.defs[(vid.0 - self.module_len) as usize]
    }

    /// First wire id still bound to an unfilled forward placeholder.
    pub fn unresolved_forward(&self) -> Option<u32> {
        self.wire.iter().enumerate().find_map(|(idx, slot)| {
            slot.filter(|vid| {
                matches!(
                    self.defs[(vid.0 - self.module_len) as usize],
                    LocalValue::Forward { .. }
                )
            })
            .map(|_| self.module_len + idx as u32)
        })
    }

    pub fn into_defs(self) -> Vec<LocalValue> {
        self.defs
    }
}
