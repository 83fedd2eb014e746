use crate::ir::{Linkage, Module, intrinsics};

use super::types::is_valid_function_type;
use super::{Diagnostic, ErrorReporter, VerifierConfig};

/// Module-scope rules: globals, declarations, linkage. Function bodies are
/// left to [`super::FunctionVerifier`] so streaming translation can verify
/// one body at a time.
pub struct ModuleVerifier<'m> {
    module: &'m Module,
}

impl<'m> ModuleVerifier<'m> {
    #[must_use]
    pub fn new(module: &'m Module, _config: VerifierConfig) -> Self {
        Self { module }
    }

    pub fn verify(&self, reporter: &mut ErrorReporter) {
        for global in &self.module.globals {
            if !matches!(global.alignment, 0 | 1 | 2 | 4 | 8) {
                reporter.add_error(Diagnostic {
                    function: None,
                    rule: "bad alignment",
                    detail: format!(
                        "global `{}` declares alignment {}",
                        global.name, global.alignment
                    ),
                });
            }
            if global.initializers.is_empty() {
                reporter.add_error(Diagnostic {
                    function: None,
                    rule: "global variable without initializer",
                    detail: format!("global `{}`", global.name),
                });
            }
        }

        for function in &self.module.functions {
            let types = &self.module.types;
            let fn_ty = types.as_function(function.ty);
            // Intrinsic signatures carry recovered pointer parameters and
            // are judged against the intrinsic table instead.
            if !function.is_intrinsic()
                && !fn_ty.is_some_and(|fn_ty| is_valid_function_type(types, fn_ty))
            {
                reporter.add_error(Diagnostic {
                    function: None,
                    rule: "bad function type",
                    detail: format!(
                        "function `{}` has type {}",
                        function.name,
                        types.display(function.ty)
                    ),
                });
            }
            if !matches!(function.linkage, Linkage::External | Linkage::Internal) {
                reporter.add_error(Diagnostic {
                    function: None,
                    rule: "bad linkage",
                    detail: format!("function `{}`", function.name),
                });
            }
            if function.is_intrinsic() {
                if !intrinsics::is_known_intrinsic(&function.name) {
                    reporter.add_error(Diagnostic {
                        function: None,
                        rule: "disallowed intrinsic",
                        detail: format!("`{}`", function.name),
                    });
                }
                if !function.is_proto {
                    reporter.add_error(Diagnostic {
                        function: None,
                        rule: "disallowed intrinsic",
                        detail: format!("`{}` has a body", function.name),
                    });
                }
            }
        }
    }
}
