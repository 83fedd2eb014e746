//! ABI verifier tests over hand-built modules.

use portable_bitcode::ir::{
    BasicBlock, BinopFlags, BinaryOp, Body, BrCond, CallingConv, CaseRange, CaseValue, CastOp,
    Constant, Function, GlobalVariable, Initializer, Inst, InstRef, IntPredicate, Linkage,
    LocalValue, Module, SwitchCase, TypeId, ValueId,
};
use portable_bitcode::verify::{
    ErrorReporter, FunctionVerifier, ModuleVerifier, VerifierConfig,
};

const TRIPLE: &str = "le32-unknown-unknown";

fn proto(module: &mut Module, name: &str, ty: TypeId) -> ValueId {
    module.push_function(Function {
        name: name.into(),
        ty,
        linkage: Linkage::External,
        calling_conv: CallingConv::C,
        is_proto: true,
        body: None,
    })
}

/// Builds the body of one subject function appended after any other module
/// values. Value ids follow the same layout the decoder produces.
struct Fb {
    module: Module,
    func: u32,
    body: Body,
    base: u32,
}

impl Fb {
    fn new(mut module: Module, fn_ty: TypeId) -> Self {
        let params = module
            .types
            .as_function(fn_ty)
            .expect("subject needs a function type")
            .params
            .clone();
        let func = module.functions.len() as u32;
        module.push_function(Function {
            name: "f".into(),
            ty: fn_ty,
            linkage: Linkage::External,
            calling_conv: CallingConv::C,
            is_proto: false,
            body: None,
        });
        let base = module.value_count();
        let mut body = Body::default();
        for ty in params {
            body.values.push(LocalValue::Arg { ty });
        }
        Self {
            module,
            func,
            body,
            base,
        }
    }

    fn arg(&self, index: u32) -> ValueId {
        ValueId(self.base + index)
    }

    fn constant(&mut self, constant: Constant) -> ValueId {
        let id = ValueId(self.base + self.body.values.len() as u32);
        self.body.values.push(LocalValue::Const(constant));
        id
    }

    fn block(&mut self, block: u32) -> &mut BasicBlock {
        while self.body.blocks.len() <= block as usize {
            self.body.blocks.push(BasicBlock::default());
        }
        &mut self.body.blocks[block as usize]
    }

    fn inst(&mut self, block: u32, inst: Inst) -> InstRef {
        let bb = self.block(block);
        let at = InstRef {
            block,
            pos: bb.insts.len() as u32,
        };
        bb.insts.push(inst);
        at
    }

    fn value_inst(&mut self, block: u32, inst: Inst, ty: TypeId) -> ValueId {
        let at = self.inst(block, inst);
        let id = ValueId(self.base + self.body.values.len() as u32);
        self.body.values.push(LocalValue::Inst { ty, at });
        id
    }

    fn finish(mut self) -> Module {
        self.module.functions[self.func as usize].body = Some(self.body);
        self.module
    }
}

fn function_rules(module: &Module) -> Vec<&'static str> {
    function_rules_with(module, VerifierConfig::default())
}

fn function_rules_with(module: &Module, config: VerifierConfig) -> Vec<&'static str> {
    let mut reporter = ErrorReporter::new();
    for index in 0..module.functions.len() as u32 {
        FunctionVerifier::new(module, config).verify(index, &mut reporter);
    }
    reporter.diagnostics().iter().map(|d| d.rule).collect()
}

fn module_rules(module: &Module) -> Vec<&'static str> {
    let mut reporter = ErrorReporter::new();
    ModuleVerifier::new(module, VerifierConfig::default()).verify(&mut reporter);
    reporter.diagnostics().iter().map(|d| d.rule).collect()
}

#[test]
fn well_formed_function_verifies_clean() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let i8t = module.types.int(8);
    let i1t = module.types.int(1);
    let p8 = module.types.pointer_to(i8t);
    let p32 = module.types.pointer_to(i32t);
    let fn_ty = module.types.function(i32t, vec![i32t, i32t], false);

    let mut fb = Fb::new(module, fn_ty);
    let size = fb.constant(Constant::Integer { ty: i32t, value: 4 });
    let slot = fb.value_inst(
        0,
        Inst::Alloca {
            size,
            alignment: 1,
        },
        p8,
    );
    let typed = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: slot,
            dest_ty: p32,
        },
        p32,
    );
    fb.inst(
        0,
        Inst::Store {
            ptr: typed,
            value: fb.arg(0),
            alignment: 1,
        },
    );
    let loaded = fb.value_inst(
        0,
        Inst::Load {
            ptr: typed,
            alignment: 1,
            ty: i32t,
        },
        i32t,
    );
    let cmp = fb.value_inst(
        0,
        Inst::ICmp {
            pred: IntPredicate::Slt,
            lhs: loaded,
            rhs: fb.arg(1),
        },
        i1t,
    );
    fb.inst(
        0,
        Inst::Br {
            dest: 1,
            cond: Some(BrCond {
                value: cmp,
                false_dest: 2,
            }),
        },
    );
    let sel = fb.value_inst(
        1,
        Inst::Select {
            true_value: loaded,
            false_value: fb.arg(0),
            cond: cmp,
        },
        i32t,
    );
    fb.inst(1, Inst::Br { dest: 2, cond: None });
    let phi = fb.value_inst(
        2,
        Inst::Phi {
            ty: i32t,
            incoming: vec![(sel, 1), (loaded, 0)],
        },
        i32t,
    );
    fb.inst(2, Inst::Ret { value: Some(phi) });

    let module = fb.finish();
    assert_eq!(function_rules(&module), Vec::<&str>::new());
    assert_eq!(module_rules(&module), Vec::<&str>::new());
}

/// S3: `getelementptr` is rejected by opcode.
#[test]
fn s3_getelementptr_is_a_bad_opcode() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let fn_ty = module.types.function(i32t, vec![i32t], false);
    let mut fb = Fb::new(module, fn_ty);
    let idx = fb.constant(Constant::Integer { ty: i32t, value: 1 });
    fb.value_inst(
        0,
        Inst::GetElementPtr {
            base: fb.arg(0),
            indices: vec![idx],
        },
        i32t,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(function_rules(&module), vec!["bad instruction opcode"]);
}

#[test]
fn raw_atomics_and_vectors_are_bad_opcodes() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let fn_ty = module.types.function(i32t, vec![i32t, i32t], false);
    let mut fb = Fb::new(module, fn_ty);
    fb.value_inst(
        0,
        Inst::AtomicRmw {
            op: 1,
            ptr: fb.arg(0),
            value: fb.arg(1),
        },
        i32t,
    );
    fb.inst(0, Inst::Fence);
    fb.value_inst(
        0,
        Inst::ExtractElement {
            vec: fb.arg(0),
            index: fb.arg(1),
        },
        i32t,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec![
            "bad instruction opcode",
            "bad instruction opcode",
            "bad instruction opcode"
        ]
    );
}

#[test]
fn arithmetic_on_i1_is_rejected_but_logic_is_not() {
    let mut module = Module::new(TRIPLE);
    let i1t = module.types.int(1);
    let fn_ty = module.types.function(i1t, vec![i1t, i1t], false);
    let mut fb = Fb::new(module, fn_ty);
    let added = fb.value_inst(
        0,
        Inst::Binop {
            op: BinaryOp::Add,
            lhs: fb.arg(0),
            rhs: fb.arg(1),
            flags: BinopFlags::default(),
        },
        i1t,
    );
    let anded = fb.value_inst(
        0,
        Inst::Binop {
            op: BinaryOp::And,
            lhs: fb.arg(0),
            rhs: fb.arg(1),
            flags: BinopFlags::default(),
        },
        i1t,
    );
    fb.value_inst(
        0,
        Inst::ICmp {
            pred: IntPredicate::Eq,
            lhs: fb.arg(0),
            rhs: fb.arg(1),
        },
        i1t,
    );
    let _ = (added, anded);
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec!["arithmetic on i1", "arithmetic on i1"]
    );
}

#[test]
fn memory_access_alignment_rules() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let i8t = module.types.int(8);
    let f32t = module.types.float();
    let f64t = module.types.double();
    let p8 = module.types.pointer_to(i8t);
    let p32 = module.types.pointer_to(i32t);
    let pf = module.types.pointer_to(f32t);
    let pd = module.types.pointer_to(f64t);
    let void = module.types.void();
    let fn_ty = module.types.function(void, vec![i32t], false);
    let mut fb = Fb::new(module, fn_ty);
    let size = fb.constant(Constant::Integer { ty: i32t, value: 8 });
    let slot = fb.value_inst(0, Inst::Alloca { size, alignment: 1 }, p8);
    let as_i32 = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: slot,
            dest_ty: p32,
        },
        p32,
    );
    let as_f32 = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: slot,
            dest_ty: pf,
        },
        pf,
    );
    let as_f64 = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: slot,
            dest_ty: pd,
        },
        pd,
    );
    // allowed
    fb.value_inst(0, Inst::Load { ptr: as_i32, alignment: 1, ty: i32t }, i32t);
    fb.value_inst(0, Inst::Load { ptr: as_f32, alignment: 4, ty: f32t }, f32t);
    fb.value_inst(0, Inst::Load { ptr: as_f64, alignment: 8, ty: f64t }, f64t);
    // rejected
    fb.value_inst(0, Inst::Load { ptr: as_i32, alignment: 4, ty: i32t }, i32t);
    fb.value_inst(0, Inst::Load { ptr: as_f32, alignment: 2, ty: f32t }, f32t);
    fb.value_inst(0, Inst::Load { ptr: as_f64, alignment: 0, ty: f64t }, f64t);
    fb.inst(
        0,
        Inst::Store {
            ptr: as_i32,
            value: fb.arg(0),
            alignment: 4,
        },
    );
    fb.inst(0, Inst::Ret { value: None });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec!["bad alignment", "bad alignment", "bad alignment", "bad alignment"]
    );
}

#[test]
fn pointer_provenance_rules() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let i64t = module.types.int(64);
    let i8t = module.types.int(8);
    let p8 = module.types.pointer_to(i8t);
    let p32 = module.types.pointer_to(i32t);
    let fn_ty = module.types.function(i32t, vec![i32t, i64t], false);
    let mut fb = Fb::new(module, fn_ty);
    let size = fb.constant(Constant::Integer { ty: i32t, value: 4 });
    let slot = fb.value_inst(0, Inst::Alloca { size, alignment: 1 }, p8);

    // inttoptr of i32 is a normalized pointer
    let from_int = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::IntToPtr,
            value: fb.arg(0),
            dest_ty: p32,
        },
        p32,
    );
    fb.value_inst(0, Inst::Load { ptr: from_int, alignment: 1, ty: i32t }, i32t);

    // loading through a plain scalar is not
    fb.value_inst(0, Inst::Load { ptr: fb.arg(0), alignment: 1, ty: i32t }, i32t);

    // bitcast must start from an inherent pointer
    fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: from_int,
            dest_ty: p32,
        },
        p32,
    );

    // ptrtoint: inherent source and i32 result required
    fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::PtrToInt,
            value: slot,
            dest_ty: i32t,
        },
        i32t,
    );
    fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::PtrToInt,
            value: from_int,
            dest_ty: i32t,
        },
        i32t,
    );
    fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::PtrToInt,
            value: slot,
            dest_ty: i64t,
        },
        i64t,
    );

    // inttoptr must consume i32
    fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::IntToPtr,
            value: fb.arg(1),
            dest_ty: p32,
        },
        p32,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec![
            "bad pointer",
            "operand not InherentPtr",
            "operand not InherentPtr",
            "non-i32 ptrtoint",
            "non-i32 inttoptr",
        ]
    );
}

#[test]
fn alloca_size_must_be_i32() {
    let mut module = Module::new(TRIPLE);
    let i64t = module.types.int(64);
    let i8t = module.types.int(8);
    let p8 = module.types.pointer_to(i8t);
    let void = module.types.void();
    let fn_ty = module.types.function(void, vec![], false);
    let mut fb = Fb::new(module, fn_ty);
    let size = fb.constant(Constant::Integer { ty: i64t, value: 8 });
    fb.value_inst(0, Inst::Alloca { size, alignment: 1 }, p8);
    fb.inst(0, Inst::Ret { value: None });
    let module = fb.finish();
    assert_eq!(function_rules(&module), vec!["alloca array size is not i32"]);
}

#[test]
fn call_rules() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let callee_ty = module.types.function(i32t, vec![i32t], false);
    let callee = proto(&mut module, "helper", callee_ty);
    let gv = GlobalVariable::new(&mut module.types, 1, false, vec![Initializer::ZeroFill(4)]);
    let global = module.push_global(gv);
    let fn_ty = module.types.function(i32t, vec![i32t], false);
    let mut fb = Fb::new(module, fn_ty);

    // direct call to a declared function: fine
    fb.value_inst(
        0,
        Inst::Call {
            callee,
            args: vec![fb.arg(0)],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    // calling through a plain scalar: bad callee
    fb.value_inst(
        0,
        Inst::Call {
            callee: fb.arg(0),
            args: vec![],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    // a raw global as an argument is not a scalar operand
    fb.value_inst(
        0,
        Inst::Call {
            callee,
            args: vec![global],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec!["bad function callee operand", "bad operand"]
    );
}

#[test]
fn atomic_intrinsic_rules() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let i8t = module.types.int(8);
    let i1t = module.types.int(1);
    let p8 = module.types.pointer_to(i8t);
    let p32 = module.types.pointer_to(i32t);
    let load_ty = module.types.function(i32t, vec![p32, i32t], false);
    let rmw_ty = module.types.function(i32t, vec![i32t, p32, i32t, i32t], false);
    let lock_free_ty = module.types.function(i1t, vec![i32t, p8], false);
    let atomic_load = proto(&mut module, "llvm.atomic.load.i32", load_ty);
    let atomic_rmw = proto(&mut module, "llvm.atomic.rmw.i32", rmw_ty);
    let lock_free = proto(&mut module, "llvm.atomic.is.lock.free", lock_free_ty);
    let fn_ty = module.types.function(i32t, vec![i32t], false);
    let mut fb = Fb::new(module, fn_ty);

    let size = fb.constant(Constant::Integer { ty: i32t, value: 4 });
    let seq_cst = fb.constant(Constant::Integer { ty: i32t, value: 6 });
    let acquire = fb.constant(Constant::Integer { ty: i32t, value: 3 });
    let rmw_add = fb.constant(Constant::Integer { ty: i32t, value: 1 });
    let rmw_bad = fb.constant(Constant::Integer { ty: i32t, value: 9 });
    let four = fb.constant(Constant::Integer { ty: i32t, value: 4 });
    let three = fb.constant(Constant::Integer { ty: i32t, value: 3 });
    let slot = fb.value_inst(0, Inst::Alloca { size, alignment: 1 }, p8);
    let typed = fb.value_inst(
        0,
        Inst::Cast {
            op: CastOp::BitCast,
            value: slot,
            dest_ty: p32,
        },
        p32,
    );

    // sequentially consistent load: allowed
    fb.value_inst(
        0,
        Inst::Call {
            callee: atomic_load,
            args: vec![typed, seq_cst],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    // acquire load: reserved but not accepted
    fb.value_inst(
        0,
        Inst::Call {
            callee: atomic_load,
            args: vec![typed, acquire],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    // rmw with a valid then an out-of-range operation selector
    fb.value_inst(
        0,
        Inst::Call {
            callee: atomic_rmw,
            args: vec![rmw_add, typed, fb.arg(0), seq_cst],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    fb.value_inst(
        0,
        Inst::Call {
            callee: atomic_rmw,
            args: vec![rmw_bad, typed, fb.arg(0), seq_cst],
            ret_ty: i32t,
            tail: false,
        },
        i32t,
    );
    // lock-free probe: byte size must be 1, 2, 4 or 8
    fb.value_inst(
        0,
        Inst::Call {
            callee: lock_free,
            args: vec![four, slot],
            ret_ty: i1t,
            tail: false,
        },
        i1t,
    );
    fb.value_inst(
        0,
        Inst::Call {
            callee: lock_free,
            args: vec![three, slot],
            ret_ty: i1t,
            tail: false,
        },
        i1t,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert_eq!(
        function_rules(&module),
        vec![
            "invalid memory order",
            "invalid atomicRMW operation",
            "invalid atomic lock-free byte size",
        ]
    );
}

#[test]
fn memcpy_alignment_must_be_one() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let i8t = module.types.int(8);
    let i1t = module.types.int(1);
    let p8 = module.types.pointer_to(i8t);
    let void = module.types.void();
    let memcpy_ty = module.types.function(void, vec![p8, p8, i32t, i32t, i1t], false);
    let memcpy = proto(&mut module, "llvm.memcpy.p0i8.p0i8.i32", memcpy_ty);
    let fn_ty = module.types.function(void, vec![i32t], false);
    let mut fb = Fb::new(module, fn_ty);
    let size = fb.constant(Constant::Integer { ty: i32t, value: 16 });
    let one = fb.constant(Constant::Integer { ty: i32t, value: 1 });
    let two = fb.constant(Constant::Integer { ty: i32t, value: 2 });
    let vol = fb.constant(Constant::Integer { ty: i1t, value: 0 });
    let slot = fb.value_inst(0, Inst::Alloca { size, alignment: 1 }, p8);

    fb.inst(
        0,
        Inst::Call {
            callee: memcpy,
            args: vec![slot, slot, fb.arg(0), one, vol],
            ret_ty: void,
            tail: false,
        },
    );
    fb.inst(
        0,
        Inst::Call {
            callee: memcpy,
            args: vec![slot, slot, fb.arg(0), two, vol],
            ret_ty: void,
            tail: false,
        },
    );
    fb.inst(0, Inst::Ret { value: None });
    let module = fb.finish();
    assert_eq!(function_rules(&module), vec!["bad alignment"]);
}

#[test]
fn switch_rules() {
    let mut module = Module::new(TRIPLE);
    let i1t = module.types.int(1);
    let i32t = module.types.int(32);
    let void = module.types.void();
    let fn_ty = module.types.function(void, vec![i1t, i32t], false);
    let mut fb = Fb::new(module, fn_ty);
    let case = SwitchCase {
        ranges: vec![CaseRange {
            low: CaseValue::single(0),
            high: None,
        }],
        dest: 1,
    };
    fb.inst(
        0,
        Inst::Switch {
            cond_ty: i1t,
            cond: fb.arg(0),
            default_dest: 1,
            cases: vec![case.clone()],
        },
    );
    fb.inst(
        1,
        Inst::Switch {
            cond_ty: i32t,
            cond: fb.arg(1),
            default_dest: 2,
            cases: vec![case],
        },
    );
    fb.inst(2, Inst::Ret { value: None });
    let module = fb.finish();
    assert_eq!(function_rules(&module), vec!["switch on i1"]);
}

#[test]
fn invalid_result_types_are_rejected() {
    let mut module = Module::new(TRIPLE);
    let i17 = module.types.int(17);
    let fn_ty = module.types.function(i17, vec![i17, i17], false);
    let mut fb = Fb::new(module, fn_ty);
    fb.value_inst(
        0,
        Inst::Binop {
            op: BinaryOp::Add,
            lhs: fb.arg(0),
            rhs: fb.arg(1),
            flags: BinopFlags::default(),
        },
        i17,
    );
    fb.inst(0, Inst::Ret { value: Some(fb.arg(0)) });
    let module = fb.finish();
    assert!(function_rules(&module).contains(&"bad result type"));
}

#[test]
fn metadata_whitelisting() {
    let mut module = Module::new(TRIPLE);
    let void = module.types.void();
    let fn_ty = module.types.function(void, vec![], false);
    let mut fb = Fb::new(module, fn_ty);
    let at = fb.inst(0, Inst::Ret { value: None });
    fb.body.inst_metadata.push((at, 0));
    fb.body.inst_metadata.push((at, 5));
    let module = fb.finish();

    // Default configuration rejects both attachments.
    assert_eq!(
        function_rules(&module),
        vec![
            "disallowed instruction metadata",
            "disallowed instruction metadata"
        ]
    );
    // Allowing debug metadata whitelists the dbg kind only.
    let permissive = VerifierConfig {
        allow_debug_metadata: true,
    };
    assert_eq!(
        function_rules_with(&module, permissive),
        vec!["disallowed instruction metadata"]
    );
}

#[test]
fn module_scope_rules() {
    let mut module = Module::new(TRIPLE);
    let i32t = module.types.int(32);
    let void = module.types.void();
    let ok_ty = module.types.function(void, vec![i32t], false);
    let vararg_ty = module.types.function(void, vec![i32t], true);

    proto(&mut module, "fine", ok_ty);
    proto(&mut module, "variadic", vararg_ty);
    let weak = proto(&mut module, "weakling", ok_ty);
    module.functions[weak.index()].linkage = Linkage::Weak;
    proto(&mut module, "llvm.frobnicate", ok_ty);

    let aligned = GlobalVariable::new(&mut module.types, 16, false, vec![Initializer::ZeroFill(4)]);
    module.push_global(aligned);
    let empty = GlobalVariable::new(&mut module.types, 1, true, vec![]);
    module.push_global(empty);

    let rules = module_rules(&module);
    assert!(rules.contains(&"bad function type"));
    assert!(rules.contains(&"bad linkage"));
    assert!(rules.contains(&"disallowed intrinsic"));
    assert!(rules.contains(&"bad alignment"));
    assert!(rules.contains(&"global variable without initializer"));
}
