//! Exported kernel signatures, as handed over by the kernel compiler.
//!
//! The compiler serialises the lowered argument list of every exported
//! function into a small versioned JSON document:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "functions": [
//!     {
//!       "name": "ops::vadd",
//!       "args": [
//!         {"name": "a", "kind": "buffer", "type": "f32", "dimensions": 4},
//!         {"name": "n", "kind": "scalar", "type": "i32"},
//!         {"name": "__user_context", "kind": "scalar", "type": "handle", "user_context": true}
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{CodegenError, Result};
use crate::names::{c_print_name, extract_namespaces, USER_CONTEXT_NAME};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use torchbridge_core::ScalarType;

pub const SCHEMA_VERSION: &str = "1.0";

/// Top-level signature document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub functions: Vec<FunctionSignature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Qualified name, `::`-separated.
    pub name: String,
    pub args: Vec<ArgumentDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    Scalar,
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    pub kind: ArgKind,
    /// Scalar type, or element type for buffers.
    #[serde(rename = "type")]
    pub ty: ScalarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// Marks the implicit context parameter that the wrapper fills in itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub user_context: bool,
}

impl ArgumentDef {
    pub fn buffer(name: impl Into<String>, ty: ScalarType, dimensions: u32) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Buffer,
            ty,
            dimensions: Some(dimensions),
            user_context: false,
        }
    }

    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Scalar,
            ty,
            dimensions: None,
            user_context: false,
        }
    }

    pub fn user_context() -> Self {
        Self {
            user_context: true,
            ..Self::scalar(USER_CONTEXT_NAME, ScalarType::Handle)
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.kind == ArgKind::Buffer
    }

    /// True for the implicit context parameter, whether flagged explicitly or
    /// recognised by the compiler's reserved name.
    pub fn is_user_context(&self) -> bool {
        self.user_context || self.name == USER_CONTEXT_NAME
    }
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, args: Vec<ArgumentDef>) -> Self {
        Self { name: name.into(), args }
    }

    pub fn user_context_arg(&self) -> Option<&ArgumentDef> {
        self.args.iter().find(|a| a.is_user_context())
    }

    pub fn buffer_args(&self) -> impl Iterator<Item = &ArgumentDef> {
        self.args.iter().filter(|a| a.is_buffer())
    }

    /// Arguments visible in the public wrapper signature, in original order.
    pub fn public_args(&self) -> impl Iterator<Item = &ArgumentDef> {
        self.args.iter().filter(|a| !a.is_user_context())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CodegenError::InvalidSchema("function name cannot be empty".to_string()));
        }
        extract_namespaces(&self.name)?;

        let mut seen = HashSet::new();
        let mut contexts = 0;
        for arg in &self.args {
            if arg.name.is_empty() {
                return Err(CodegenError::invalid_signature(&self.name, "argument with empty name"));
            }
            if !seen.insert(c_print_name(&arg.name)) {
                return Err(CodegenError::invalid_signature(
                    &self.name,
                    format!("duplicate argument `{}`", arg.name),
                ));
            }
            if arg.is_user_context() {
                contexts += 1;
                if arg.is_buffer() || !arg.ty.is_handle() {
                    return Err(CodegenError::invalid_signature(
                        &self.name,
                        format!("user-context argument `{}` must be a handle scalar", arg.name),
                    ));
                }
            } else if arg.is_buffer() && arg.ty.is_handle() {
                return Err(CodegenError::invalid_signature(
                    &self.name,
                    format!("buffer `{}` cannot have handle elements", arg.name),
                ));
            }
        }

        if contexts > 1 {
            return Err(CodegenError::invalid_signature(
                &self.name,
                "more than one user-context argument",
            ));
        }
        Ok(())
    }
}

impl SignatureSet {
    pub fn new(functions: Vec<FunctionSignature>) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            functions,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(CodegenError::InvalidSchema(format!(
                "Unsupported schema version: {}",
                self.version
            )));
        }

        let mut names = HashSet::new();
        for function in &self.functions {
            function.validate()?;
            if !names.insert(function.name.as_str()) {
                return Err(CodegenError::InvalidSchema(format!(
                    "function `{}` is declared twice",
                    function.name
                )));
            }
        }
        Ok(())
    }
}

/// Parse and validate a signature document.
pub fn parse(json: &str) -> Result<SignatureSet> {
    let set: SignatureSet = serde_json::from_str(json)?;
    set.validate()?;
    Ok(set)
}

pub fn load(path: impl AsRef<Path>) -> Result<SignatureSet> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}
