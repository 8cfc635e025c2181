//! Element and scalar types carried by kernel signatures

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scalar type variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Opaque pointer (`void *`), used for the user context.
    Handle,
}

/// Type class of a [`ScalarType`], in the kernel runtime's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    Int = 0,
    UInt = 1,
    Float = 2,
    Handle = 3,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Handle => "handle",
        }
    }

    /// Width in bits. Booleans are one bit wide, handles pointer-width.
    pub fn bits(self) -> u8 {
        match self {
            ScalarType::Bool => 1,
            ScalarType::U8 | ScalarType::I8 => 8,
            ScalarType::U16 | ScalarType::I16 => 16,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 32,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 => 64,
            ScalarType::Handle => (std::mem::size_of::<usize>() * 8) as u8,
        }
    }

    /// Storage size of one element in bytes.
    pub fn bytes(self) -> usize {
        (usize::from(self.bits()) + 7) / 8
    }

    pub fn code(self) -> TypeCode {
        match self {
            ScalarType::Bool | ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64 => TypeCode::UInt,
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64 => TypeCode::Int,
            ScalarType::F32 | ScalarType::F64 => TypeCode::Float,
            ScalarType::Handle => TypeCode::Handle,
        }
    }

    pub fn is_handle(self) -> bool {
        matches!(self, ScalarType::Handle)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s {
            "bool" => ScalarType::Bool,
            "u8" => ScalarType::U8,
            "u16" => ScalarType::U16,
            "u32" => ScalarType::U32,
            "u64" => ScalarType::U64,
            "i8" => ScalarType::I8,
            "i16" => ScalarType::I16,
            "i32" => ScalarType::I32,
            "i64" => ScalarType::I64,
            "f32" => ScalarType::F32,
            "f64" => ScalarType::F64,
            "handle" => ScalarType::Handle,
            other => return Err(CoreError::UnknownScalarType(other.to_string())),
        };
        Ok(ty)
    }
}
