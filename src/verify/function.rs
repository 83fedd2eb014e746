use std::collections::HashMap;

use crate::ir::{
    Body, CastOp, Constant, Inst, InstRef, LocalValue, Module, ModuleValue, TypeId, ValueId,
    intrinsics,
};
use crate::ir::intrinsics::AtomicParam;

use super::types::{is_valid_function_type, is_valid_pointer, is_valid_scalar};
use super::{Diagnostic, ErrorReporter, MD_DBG, VerifierConfig};

/// Function-scope rules of the portable dialect.
///
/// `verify` walks every instruction of a materialized body and appends one
/// diagnostic per violation; a function with no body is vacuously valid.
pub struct FunctionVerifier<'m> {
    module: &'m Module,
    config: VerifierConfig,
}

impl<'m> FunctionVerifier<'m> {
    #[must_use]
    pub fn new(module: &'m Module, config: VerifierConfig) -> Self {
        Self { module, config }
    }

    pub fn verify(&self, func_index: u32, reporter: &mut ErrorReporter) {
        let Some(function) = self.module.functions.get(func_index as usize) else {
            return;
        };
        let Some(body) = &function.body else {
            return;
        };
        let view = FnView {
            module: self.module,
            body,
            module_len: self.module.value_count(),
        };

        // Result value of each instruction, for result-type checks.
        let mut results: HashMap<InstRef, ValueId> = HashMap::new();
        for (index, value) in body.values.iter().enumerate() {
            if let LocalValue::Inst { at, .. } = value {
                results.insert(*at, ValueId(view.module_len + index as u32));
            }
        }

        for (block, bb) in body.blocks.iter().enumerate() {
            for (pos, inst) in bb.insts.iter().enumerate() {
                let at = InstRef {
                    block: block as u32,
                    pos: pos as u32,
                };
                let mut rule = view.check_inst(inst);
                if rule.is_none() {
                    if let Some(&vid) = results.get(&at) {
                        let scalar_result = match view.local(vid) {
                            Some(LocalValue::Inst { ty, .. }) => {
                                is_valid_scalar(&self.module.types, *ty)
                            }
                            _ => false,
                        };
                        if !scalar_result
                            && !view.is_normalized_ptr(vid)
                            && !matches!(inst, Inst::Alloca { .. })
                        {
                            rule = Some("bad result type");
                        }
                    }
                }
                if let Some(rule) = rule {
                    reporter.add_error(Diagnostic {
                        function: Some(function.name.clone()),
                        rule,
                        detail: format!("{} in block {block}", mnemonic(inst)),
                    });
                }
            }
        }

        for &(at, kind) in &body.inst_metadata {
            if !(self.config.allow_debug_metadata && kind == MD_DBG) {
                reporter.add_error(Diagnostic {
                    function: Some(function.name.clone()),
                    rule: "disallowed instruction metadata",
                    detail: format!("metadata kind {kind} in block {}", at.block),
                });
            }
        }
    }
}

struct FnView<'m> {
    module: &'m Module,
    body: &'m Body,
    module_len: u32,
}

impl FnView<'_> {
    fn local(&self, vid: ValueId) -> Option<&LocalValue> {
        vid.0
            .checked_sub(self.module_len)
            .and_then(|index| self.body.values.get(index as usize))
    }

    fn module_value(&self, vid: ValueId) -> Option<ModuleValue> {
        if vid.0 < self.module_len {
            self.module.module_value(vid)
        } else {
            None
        }
    }

    /// The function a direct callee names, when it names one.
    fn as_function(&self, vid: ValueId) -> Option<&crate::ir::Function> {
        match self.module_value(vid)? {
            ModuleValue::Function(index) => self.module.functions.get(index as usize),
            _ => None,
        }
    }

    /// Inherent pointers: stack allocations, module globals, non-intrinsic
    /// function addresses, and intrinsic call results (some intrinsics
    /// return pointers).
    fn is_inherent_ptr(&self, vid: ValueId) -> bool {
        match self.module_value(vid) {
            Some(ModuleValue::Function(index)) => {
                !self.module.functions[index as usize].is_intrinsic()
            }
            Some(ModuleValue::Global(_)) => true,
            Some(ModuleValue::ForwardGlobal) => false,
            None => match self.local(vid) {
                Some(LocalValue::Inst { at, .. }) => match self.body.inst(*at) {
                    Inst::Alloca { .. } => true,
                    Inst::Call { callee, .. } => {
                        self.as_function(*callee).is_some_and(|f| f.is_intrinsic())
                    }
                    _ => false,
                },
                _ => false,
            },
        }
    }

    /// Whether the value's own type is a valid pointer type.
    fn has_valid_pointer_type(&self, vid: ValueId) -> bool {
        match self.module_value(vid) {
            Some(ModuleValue::Function(index)) => {
                let function = &self.module.functions[index as usize];
                self.module
                    .types
                    .as_function(function.ty)
                    .is_some_and(|fn_ty| is_valid_function_type(&self.module.types, fn_ty))
            }
            Some(ModuleValue::Global(index)) => {
                is_valid_pointer(&self.module.types, self.module.globals[index as usize].ty)
            }
            Some(ModuleValue::ForwardGlobal) => false,
            None => match self.local(vid) {
                Some(LocalValue::Arg { ty })
                | Some(LocalValue::Inst { ty, .. })
                | Some(LocalValue::Forward { ty }) => is_valid_pointer(&self.module.types, *ty),
                _ => false,
            },
        }
    }

    /// Normalized pointers may stand wherever a pointer is required:
    /// inherent pointers, `inttoptr` results, and `bitcast` results (the
    /// bitcast's own source restriction is checked at the bitcast).
    fn is_normalized_ptr(&self, vid: ValueId) -> bool {
        if !self.has_valid_pointer_type(vid) {
            return false;
        }
        if self.is_inherent_ptr(vid) {
            return true;
        }
        match self.local(vid) {
            Some(LocalValue::Inst { at, .. }) => matches!(
                self.body.inst(*at),
                Inst::Cast {
                    op: CastOp::IntToPtr | CastOp::BitCast,
                    ..
                }
            ),
            _ => false,
        }
    }

    /// Scalar positions accept instruction and argument values, and
    /// integer/floating/undef constants of valid scalar type.
    fn is_valid_scalar_operand(&self, vid: ValueId) -> bool {
        match self.local(vid) {
            Some(LocalValue::Arg { .. }) | Some(LocalValue::Inst { .. }) => true,
            Some(LocalValue::Const(constant)) => match constant {
                Constant::Integer { ty, .. } | Constant::Undef(ty) => {
                    is_valid_scalar(&self.module.types, *ty)
                }
                Constant::Float { .. } | Constant::Double { .. } => true,
            },
            Some(LocalValue::Forward { .. }) | None => false,
        }
    }

    fn int_width_of(&self, vid: ValueId) -> Option<u32> {
        match self.local(vid)? {
            LocalValue::Arg { ty } | LocalValue::Inst { ty, .. } | LocalValue::Forward { ty } => {
                self.module.types.int_width(*ty)
            }
            LocalValue::Const(Constant::Integer { ty, .. }) => self.module.types.int_width(*ty),
            LocalValue::Const(_) => None,
        }
    }

    fn const_int(&self, vid: ValueId) -> Option<u64> {
        match self.local(vid)? {
            LocalValue::Const(Constant::Integer { value, .. }) => Some(*value),
            _ => None,
        }
    }

    /// Allowed access widths: integers must use align 1 so misaligned
    /// pointers cannot fault non-portably; floats may use 1 or 4, doubles
    /// 1 or 8. Align 0 is never allowed.
    fn alignment_ok_for_type(&self, alignment: u32, ty: TypeId) -> bool {
        alignment == 1
            || (matches!(self.module.types.get(ty), crate::ir::Type::Double) && alignment == 8)
            || (matches!(self.module.types.get(ty), crate::ir::Type::Float) && alignment == 4)
    }

    fn alignment_ok_for_value(&self, alignment: u32, vid: ValueId) -> bool {
        match self.local(vid) {
            Some(LocalValue::Const(Constant::Float { .. })) => alignment == 1 || alignment == 4,
            Some(LocalValue::Const(Constant::Double { .. })) => alignment == 1 || alignment == 8,
            Some(LocalValue::Arg { ty })
            | Some(LocalValue::Inst { ty, .. })
            | Some(LocalValue::Forward { ty }) => self.alignment_ok_for_type(alignment, *ty),
            Some(LocalValue::Const(Constant::Integer { .. }))
            | Some(LocalValue::Const(Constant::Undef(_))) => alignment == 1,
            None => alignment == 1,
        }
    }

    /// Check one instruction's opcode and operands. Returns the violated
    /// rule, or `None` when the instruction is allowed.
    fn check_inst(&self, inst: &Inst) -> Option<&'static str> {
        use Inst::*;
        match inst {
            // Disallowed outright: address arithmetic is expanded before
            // encoding, aggregates and vectors have no portable layout,
            // exceptions and raw atomics take intrinsic form.
            GetElementPtr { .. }
            | VaArg { .. }
            | Invoke { .. }
            | LandingPad { .. }
            | Resume { .. }
            | IndirectBr { .. }
            | ExtractElement { .. }
            | InsertElement { .. }
            | ShuffleVector { .. }
            | ExtractValue { .. }
            | InsertValue { .. }
            | AtomicCmpXchg { .. }
            | AtomicRmw { .. }
            | Fence => Some("bad instruction opcode"),

            Unreachable => None,

            Ret { value } => match value {
                Some(v) if !self.is_valid_scalar_operand(*v) => Some("bad operand"),
                _ => None,
            },

            Br { cond, .. } => match cond {
                Some(c) if !self.is_valid_scalar_operand(c.value) => Some("bad operand"),
                _ => None,
            },

            Phi { incoming, .. } => incoming
                .iter()
                .any(|(v, _)| !self.is_valid_scalar_operand(*v))
                .then_some("bad operand"),

            Select {
                true_value,
                false_value,
                cond,
            } => [*true_value, *false_value, *cond]
                .iter()
                .any(|v| !self.is_valid_scalar_operand(*v))
                .then_some("bad operand"),

            FCmp { lhs, rhs, .. } => (!self.is_valid_scalar_operand(*lhs)
                || !self.is_valid_scalar_operand(*rhs))
            .then_some("bad operand"),

            ICmp { lhs, rhs, .. } => {
                if self.int_width_of(*lhs) == Some(1) {
                    return Some("arithmetic on i1");
                }
                (!self.is_valid_scalar_operand(*lhs) || !self.is_valid_scalar_operand(*rhs))
                    .then_some("bad operand")
            }

            Binop {
                op,
                lhs,
                rhs,
                flags,
            } => {
                if op.forbidden_on_i1() && self.int_width_of(*lhs) == Some(1) {
                    return Some("arithmetic on i1");
                }
                if !self.is_valid_scalar_operand(*lhs) || !self.is_valid_scalar_operand(*rhs) {
                    return Some("bad operand");
                }
                if flags.wrap.contains(crate::ir::WrapFlags::NO_UNSIGNED_WRAP) {
                    return Some("has \"nuw\" attribute");
                }
                if flags.wrap.contains(crate::ir::WrapFlags::NO_SIGNED_WRAP) {
                    return Some("has \"nsw\" attribute");
                }
                if flags.exact {
                    return Some("has \"exact\" attribute");
                }
                None
            }

            Cast { op, value, dest_ty } => match op {
                CastOp::BitCast => {
                    if self.module.types.is_pointer(*dest_ty) {
                        (!self.is_inherent_ptr(*value)).then_some("operand not InherentPtr")
                    } else {
                        (!self.is_valid_scalar_operand(*value)).then_some("bad operand")
                    }
                }
                CastOp::IntToPtr => {
                    if self.int_width_of(*value) != Some(32) {
                        return Some("non-i32 inttoptr");
                    }
                    (!self.is_valid_scalar_operand(*value)).then_some("bad operand")
                }
                CastOp::PtrToInt => {
                    if !self.is_inherent_ptr(*value) {
                        return Some("operand not InherentPtr");
                    }
                    (self.module.types.int_width(*dest_ty) != Some(32))
                        .then_some("non-i32 ptrtoint")
                }
                _ => (!self.is_valid_scalar_operand(*value)).then_some("bad operand"),
            },

            Load { ptr, alignment, ty } => {
                if !self.alignment_ok_for_type(*alignment, *ty) {
                    return Some("bad alignment");
                }
                (!self.is_normalized_ptr(*ptr)).then_some("bad pointer")
            }

            Store {
                ptr,
                value,
                alignment,
            } => {
                if !self.alignment_ok_for_value(*alignment, *value) {
                    return Some("bad alignment");
                }
                if !self.is_normalized_ptr(*ptr) {
                    return Some("bad pointer");
                }
                (!self.is_valid_scalar_operand(*value)).then_some("bad operand")
            }

            Alloca { size, .. } => {
                if self.int_width_of(*size) != Some(32) {
                    return Some("alloca array size is not i32");
                }
                (!self.is_valid_scalar_operand(*size)).then_some("bad operand")
            }

            Switch {
                cond_ty, cond, ..
            } => {
                if !self.is_valid_scalar_operand(*cond) {
                    return Some("bad switch condition");
                }
                if self.module.types.int_width(*cond_ty) == Some(1) {
                    return Some("switch on i1");
                }
                // Case values are integers of the condition type.
                (!is_valid_scalar(&self.module.types, *cond_ty)).then_some("bad switch case")
            }

            Call { callee, args, ret_ty, .. } => self.check_call(*callee, args, *ret_ty),
        }
    }

    fn check_call(
        &self,
        callee: ValueId,
        args: &[ValueId],
        ret_ty: TypeId,
    ) -> Option<&'static str> {
        // Intrinsic calls may take pointer arguments and carry constant
        // selector operands, so they are checked by shape.
        if let Some(function) = self.as_function(callee) {
            if function.is_intrinsic() {
                let name = function.name.as_str();
                for &arg in args {
                    if !self.is_valid_scalar_operand(arg) && !self.is_normalized_ptr(arg) {
                        return Some("bad intrinsic operand");
                    }
                }
                if intrinsics::is_mem_intrinsic(name)
                    && args.get(3).copied().and_then(|a| self.const_int(a)) != Some(1)
                {
                    return Some("bad alignment");
                }
                if let Some(params) = intrinsics::atomic_params(name) {
                    for (index, kind) in params.iter().enumerate() {
                        let arg = args.get(index).copied();
                        match kind {
                            AtomicParam::Mem => {
                                let order = arg.and_then(|a| self.const_int(a));
                                // The range is reserved; only sequential
                                // consistency is accepted today.
                                if order
                                    != Some(
                                        intrinsics::MemoryOrder::SequentiallyConsistent as u64,
                                    )
                                {
                                    return Some("invalid memory order");
                                }
                            }
                            AtomicParam::RmwOp => {
                                let op = arg.and_then(|a| self.const_int(a));
                                if !matches!(op, Some(1..=6)) {
                                    return Some("invalid atomicRMW operation");
                                }
                            }
                            AtomicParam::ByteSize => {
                                let size = arg.and_then(|a| self.const_int(a));
                                if !matches!(size, Some(1 | 2 | 4 | 8))
                                    || !self.module.types.is_integer(ret_ty)
                                {
                                    return Some("invalid atomic lock-free byte size");
                                }
                            }
                            AtomicParam::Ptr | AtomicParam::Val => {}
                        }
                    }
                }
                return None;
            }
        }
        if !self.is_normalized_ptr(callee) {
            return Some("bad function callee operand");
        }
        args.iter()
            .any(|&arg| !self.is_valid_scalar_operand(arg))
            .then_some("bad operand")
    }
}

fn mnemonic(inst: &Inst) -> &'static str {
    use Inst::*;
    match inst {
        Binop { .. } => "binary operation",
        Cast { op, .. } => match op {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpToUi => "fptoui",
            CastOp::FpToSi => "fptosi",
            CastOp::UiToFp => "uitofp",
            CastOp::SiToFp => "sitofp",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::BitCast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
        },
        Select { .. } => "select",
        ICmp { .. } => "icmp",
        FCmp { .. } => "fcmp",
        Ret { .. } => "ret",
        Br { .. } => "br",
        Switch { .. } => "switch",
        Unreachable => "unreachable",
        Phi { .. } => "phi",
        Alloca { .. } => "alloca",
        Load { .. } => "load",
        Store { .. } => "store",
        Call { .. } => "call",
        GetElementPtr { .. } => "getelementptr",
        VaArg { .. } => "va_arg",
        IndirectBr { .. } => "indirectbr",
        ExtractElement { .. } => "extractelement",
        InsertElement { .. } => "insertelement",
        ShuffleVector { .. } => "shufflevector",
        ExtractValue { .. } => "extractvalue",
        InsertValue { .. } => "insertvalue",
        AtomicCmpXchg { .. } => "cmpxchg",
        AtomicRmw { .. } => "atomicrmw",
        Fence => "fence",
        Invoke { .. } => "invoke",
        LandingPad { .. } => "landingpad",
        Resume { .. } => "resume",
    }
}
