//! Type rules of the portable dialect.

use crate::ir::{FnType, Type, TypeId, TypeStore};

/// Valid scalar types: i1, i8, i16, i32, i64, float, double.
#[must_use]
pub fn is_valid_scalar(types: &TypeStore, ty: TypeId) -> bool {
    match types.get(ty) {
        Type::Float | Type::Double => true,
        Type::Integer(width) => matches!(width, 1 | 8 | 16 | 32 | 64),
        _ => false,
    }
}

/// Valid pointers point at a valid scalar other than i1 (so loads and
/// stores move whole bytes), or at a valid function type.
#[must_use]
pub fn is_valid_pointer(types: &TypeStore, ty: TypeId) -> bool {
    let Type::Pointer(pointee) = types.get(ty) else {
        return false;
    };
    match types.get(*pointee) {
        Type::Function(fn_ty) => is_valid_function_type(types, fn_ty),
        _ => is_valid_scalar(types, *pointee) && types.int_width(*pointee) != Some(1),
    }
}

/// Valid function types return void or a valid scalar, take valid scalar
/// parameters, and are not variadic.
#[must_use]
pub fn is_valid_function_type(types: &TypeStore, fn_ty: &FnType) -> bool {
    if fn_ty.vararg {
        return false;
    }
    if !types.is_void(fn_ty.ret) && !is_valid_scalar(types, fn_ty.ret) {
        return false;
    }
    fn_ty.params.iter().all(|&p| is_valid_scalar(types, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_rules() {
        let mut types = TypeStore::new();
        for width in [1u32, 8, 16, 32, 64] {
            let ty = types.int(width);
            assert!(is_valid_scalar(&types, ty), "i{width}");
        }
        let f = types.float();
        let d = types.double();
        assert!(is_valid_scalar(&types, f));
        assert!(is_valid_scalar(&types, d));

        let i17 = types.int(17);
        let i128 = types.int(128);
        let void = types.void();
        assert!(!is_valid_scalar(&types, i17));
        assert!(!is_valid_scalar(&types, i128));
        assert!(!is_valid_scalar(&types, void));
        let p = types.pointer_to(f);
        assert!(!is_valid_scalar(&types, p));
    }

    #[test]
    fn pointer_rules() {
        let mut types = TypeStore::new();
        let i8 = types.int(8);
        let i1 = types.int(1);
        let i32 = types.int(32);
        let p8 = types.pointer_to(i8);
        let p1 = types.pointer_to(i1);
        assert!(is_valid_pointer(&types, p8));
        assert!(!is_valid_pointer(&types, p1), "i1 pointers are disallowed");
        assert!(!is_valid_pointer(&types, i32), "scalars are not pointers");

        let fn_ty = types.function(i32, vec![i32], false);
        let pfn = types.pointer_to(fn_ty);
        assert!(is_valid_pointer(&types, pfn));

        let vararg = types.function(i32, vec![i32], true);
        let pvararg = types.pointer_to(vararg);
        assert!(!is_valid_pointer(&types, pvararg));

        let pp = types.pointer_to(p8);
        assert!(!is_valid_pointer(&types, pp), "no pointer-to-pointer");

        let opaque = types.fresh_opaque();
        let popaque = types.pointer_to(opaque);
        assert!(!is_valid_pointer(&types, popaque));
    }

    #[test]
    fn function_type_rules() {
        let mut types = TypeStore::new();
        let void = types.void();
        let i32 = types.int(32);
        let i64 = types.int(64);
        let good = FnType {
            ret: void,
            params: vec![i32, i64],
            vararg: false,
        };
        assert!(is_valid_function_type(&types, &good));

        let vararg = FnType {
            ret: void,
            params: vec![i32],
            vararg: true,
        };
        assert!(!is_valid_function_type(&types, &vararg));

        let p = types.pointer_to(i32);
        let ptr_param = FnType {
            ret: void,
            params: vec![p],
            vararg: false,
        };
        assert!(!is_valid_function_type(&types, &ptr_param));

        let ptr_ret = FnType {
            ret: p,
            params: vec![],
            vararg: false,
        };
        assert!(!is_valid_function_type(&types, &ptr_ret));
    }
}
