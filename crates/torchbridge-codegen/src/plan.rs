//! Signature → wrapper plan lowering.
//!
//! All fallible work (name decomposition, collision checks) happens here so
//! that emission itself cannot fail halfway through a file.

use crate::error::{CodegenError, Result};
use crate::names::{c_print_name, extract_namespaces, type_to_c_type, USER_CONTEXT_NAME};
use crate::signature::{ArgKind, FunctionSignature};
use crate::strategy::BackendStrategy;
use std::collections::HashSet;
use torchbridge_core::ScalarType;

/// Local every wrapper declares for the kernel status code.
pub(crate) const STATUS_LOCAL: &str = "err";

/// Runtime entry point the flush step calls by its unqualified name.
pub(crate) const CACHE_CLEANUP_FN: &str = "halide_memoization_cache_cleanup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArg {
    /// Sanitised C++ name.
    pub name: String,
    pub kind: ArgKind,
    pub ty: ScalarType,
    pub user_context: bool,
}

impl PlannedArg {
    pub fn is_buffer(&self) -> bool {
        self.kind == ArgKind::Buffer
    }

    /// Local holding the non-owning runtime view of this buffer.
    pub fn view_name(&self) -> String {
        format!("{}_buffer", self.name)
    }

    /// Element type as a C++ template argument.
    pub fn element_c_type(&self) -> String {
        type_to_c_type(self.ty, false)
    }

    /// Parameter text in the public wrapper signature.
    pub fn wrapper_param(&self) -> String {
        match self.kind {
            ArgKind::Buffer => format!("at::Tensor &{}", self.name),
            ArgKind::Scalar => format!("{}{}", type_to_c_type(self.ty, true), self.name),
        }
    }

    /// Parameter text in the kernel entry point's forward declaration.
    pub fn extern_param(&self) -> String {
        if self.user_context {
            format!("void const *{}", self.name)
        } else if self.is_buffer() {
            format!("struct halide_buffer_t *{}", self.name)
        } else {
            self.wrapper_param()
        }
    }

    /// Expression passed to the kernel entry point for this argument.
    pub fn call_arg(&self) -> String {
        if self.user_context {
            USER_CONTEXT_NAME.to_string()
        } else if self.is_buffer() {
            self.view_name()
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperPlan {
    pub qualified_name: String,
    pub namespaces: Vec<String>,
    pub simple_name: String,
    /// All kernel arguments, in kernel order.
    pub args: Vec<PlannedArg>,
}

impl WrapperPlan {
    pub fn from_signature(signature: &FunctionSignature, strategy: &dyn BackendStrategy) -> Result<Self> {
        signature.validate()?;
        let (namespaces, simple_name) = extract_namespaces(&signature.name)?;

        let args: Vec<PlannedArg> = signature
            .args
            .iter()
            .map(|arg| PlannedArg {
                name: c_print_name(&arg.name),
                kind: arg.kind,
                ty: arg.ty,
                user_context: arg.is_user_context(),
            })
            .collect();

        let plan = Self {
            qualified_name: signature.name.clone(),
            namespaces,
            simple_name,
            args,
        };
        plan.check_collisions(strategy)?;
        Ok(plan)
    }

    fn check_collisions(&self, strategy: &dyn BackendStrategy) -> Result<()> {
        for arg in self.public_params() {
            if arg.name == self.simple_name {
                return Err(CodegenError::invalid_signature(
                    &self.qualified_name,
                    format!("argument `{}` hides the kernel it is passed to", arg.name),
                ));
            }
            if arg.name == CACHE_CLEANUP_FN || strategy.referenced_names().contains(&arg.name.as_str()) {
                return Err(CodegenError::invalid_signature(
                    &self.qualified_name,
                    format!("argument `{}` hides a name the {} wrapper calls", arg.name, strategy.backend()),
                ));
            }
        }

        let mut taken: HashSet<String> = strategy
            .reserved_locals()
            .iter()
            .chain([STATUS_LOCAL, USER_CONTEXT_NAME].iter())
            .map(|s| s.to_string())
            .collect();

        for arg in self.public_params() {
            if taken.contains(&arg.name) {
                return Err(CodegenError::invalid_signature(
                    &self.qualified_name,
                    format!("argument `{}` shadows a local of the {} wrapper", arg.name, strategy.backend()),
                ));
            }
        }

        taken.extend(self.args.iter().map(|a| a.name.clone()));
        for buffer in self.buffers() {
            if !taken.insert(buffer.view_name()) {
                return Err(CodegenError::invalid_signature(
                    &self.qualified_name,
                    format!("`{}` collides with the view of buffer `{}`", buffer.view_name(), buffer.name),
                ));
            }
        }
        Ok(())
    }

    pub fn wrapper_name(&self) -> String {
        format!("{}_th_", self.simple_name)
    }

    /// Parameters of the public wrapper: everything but the context, in order.
    pub fn public_params(&self) -> impl Iterator<Item = &PlannedArg> {
        self.args.iter().filter(|a| !a.user_context)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &PlannedArg> {
        self.args.iter().filter(|a| a.is_buffer())
    }

    pub fn has_user_context(&self) -> bool {
        self.args.iter().any(|a| a.user_context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::ArgumentDef;
    use crate::strategy::strategy_for;
    use torchbridge_core::Backend;

    fn vadd() -> FunctionSignature {
        FunctionSignature::new(
            "ops::vadd",
            vec![
                ArgumentDef::buffer("a", ScalarType::F32, 4),
                ArgumentDef::scalar("n", ScalarType::I32),
                ArgumentDef::user_context(),
            ],
        )
    }

    #[test]
    fn plans_public_params() {
        let plan = WrapperPlan::from_signature(&vadd(), strategy_for(Backend::Cpu)).unwrap();
        assert_eq!(plan.namespaces, vec!["ops"]);
        assert_eq!(plan.wrapper_name(), "vadd_th_");
        let params: Vec<String> = plan.public_params().map(PlannedArg::wrapper_param).collect();
        assert_eq!(params, vec!["at::Tensor &a", "int32_t n"]);
        let call: Vec<String> = plan.args.iter().map(PlannedArg::call_arg).collect();
        assert_eq!(call, vec!["a_buffer", "n", "__user_context"]);
    }

    #[test]
    fn extern_params_use_runtime_types() {
        let plan = WrapperPlan::from_signature(&vadd(), strategy_for(Backend::Cpu)).unwrap();
        let params: Vec<String> = plan.args.iter().map(PlannedArg::extern_param).collect();
        assert_eq!(
            params,
            vec!["struct halide_buffer_t *a", "int32_t n", "void const *__user_context"]
        );
    }

    #[test]
    fn rejects_shadowed_locals() {
        let sig = FunctionSignature::new("f", vec![ArgumentDef::scalar("stream", ScalarType::I32)]);
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).is_ok());
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cuda)).is_err());

        let sig = FunctionSignature::new("f", vec![ArgumentDef::scalar("err", ScalarType::I32)]);
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).is_err());
    }

    #[test]
    fn rejects_view_name_collision() {
        let sig = FunctionSignature::new(
            "f",
            vec![
                ArgumentDef::buffer("a", ScalarType::F32, 1),
                ArgumentDef::scalar("a_buffer", ScalarType::I32),
            ],
        );
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).is_err());
    }

    #[test]
    fn rejects_argument_named_after_kernel() {
        let sig = FunctionSignature::new(
            "blur",
            vec![
                ArgumentDef::buffer("input", ScalarType::F32, 2),
                ArgumentDef::scalar("blur", ScalarType::F32),
                ArgumentDef::user_context(),
            ],
        );
        let err = WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).unwrap_err();
        assert!(err.to_string().contains("blur"));

        // Only the simple name is visible inside the namespace.
        let sig = FunctionSignature::new("fx::blur", vec![ArgumentDef::scalar("fx", ScalarType::F32)]);
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).is_ok());
    }

    #[test]
    fn rejects_arguments_hiding_called_functions() {
        let sig = FunctionSignature::new(
            "f",
            vec![ArgumentDef::scalar(CACHE_CLEANUP_FN, ScalarType::I32)],
        );
        for backend in [Backend::Cpu, Backend::Cuda, Backend::Metal] {
            assert!(WrapperPlan::from_signature(&sig, strategy_for(backend)).is_err());
        }

        let sig = FunctionSignature::new(
            "f",
            vec![
                ArgumentDef::scalar("cuCtxGetCurrent", ScalarType::I32),
                ArgumentDef::user_context(),
            ],
        );
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cpu)).is_ok());
        assert!(WrapperPlan::from_signature(&sig, strategy_for(Backend::Cuda)).is_err());
    }
}
