//! C++ naming primitives used by the emitter.

use crate::error::{CodegenError, Result};
use torchbridge_core::ScalarType;

/// Argument name the kernel compiler gives the implicit context parameter.
pub const USER_CONTEXT_NAME: &str = "__user_context";

const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "asm", "auto", "bool", "break", "case", "catch", "char", "class", "const",
    "constexpr", "continue", "decltype", "default", "delete", "do", "double", "else", "enum", "explicit", "extern",
    "false", "float", "for", "friend", "goto", "if", "inline", "int", "long", "mutable", "namespace", "new",
    "noexcept", "not", "nullptr", "operator", "or", "private", "protected", "public", "register", "return",
    "short", "signed", "sizeof", "static", "struct", "switch", "template", "this", "throw", "true", "try",
    "typedef", "typename", "union", "unsigned", "using", "virtual", "void", "volatile", "while", "xor",
];

/// Turn an arbitrary argument name into a valid C++ identifier.
///
/// Characters outside `[A-Za-z0-9_]` become `_`; names that would start with
/// a digit or collide with a keyword get a leading `_`.
pub fn c_print_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let needs_prefix = out.chars().next().is_none_or(|c| c.is_ascii_digit()) || CPP_KEYWORDS.contains(&out.as_str());
    if needs_prefix {
        out.insert(0, '_');
    }
    out
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !CPP_KEYWORDS.contains(&name)
}

/// Split `a::b::f` into (`["a", "b"]`, `"f"`).
pub fn extract_namespaces(qualified: &str) -> Result<(Vec<String>, String)> {
    let mut parts: Vec<&str> = qualified.split("::").collect();
    let simple = parts.pop().unwrap_or_default();

    if let Some(bad) = parts.iter().chain(std::iter::once(&simple)).find(|p| !is_identifier(p)) {
        return Err(CodegenError::invalid_signature(
            qualified,
            format!("`{bad}` is not a valid C++ identifier"),
        ));
    }

    Ok((parts.into_iter().map(str::to_string).collect(), simple.to_string()))
}

/// C type name of a scalar, with a trailing space when `append_space` is set
/// (pointer types already end in `*` and get no space).
pub fn type_to_c_type(ty: ScalarType, append_space: bool) -> String {
    let base = match ty {
        ScalarType::Bool => "bool",
        ScalarType::U8 => "uint8_t",
        ScalarType::U16 => "uint16_t",
        ScalarType::U32 => "uint32_t",
        ScalarType::U64 => "uint64_t",
        ScalarType::I8 => "int8_t",
        ScalarType::I16 => "int16_t",
        ScalarType::I32 => "int32_t",
        ScalarType::I64 => "int64_t",
        ScalarType::F32 => "float",
        ScalarType::F64 => "double",
        ScalarType::Handle => return "void *".to_string(),
    };
    if append_space {
        format!("{base} ")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_name_sanitizes() {
        assert_eq!(c_print_name("input"), "input");
        assert_eq!(c_print_name("in.put-1"), "in_put_1");
        assert_eq!(c_print_name("0th"), "_0th");
        assert_eq!(c_print_name("float"), "_float");
        assert_eq!(c_print_name(USER_CONTEXT_NAME), USER_CONTEXT_NAME);
    }

    #[test]
    fn namespaces_are_split() {
        let (ns, name) = extract_namespaces("ops::grad::vadd").unwrap();
        assert_eq!(ns, vec!["ops", "grad"]);
        assert_eq!(name, "vadd");

        let (ns, name) = extract_namespaces("vadd").unwrap();
        assert!(ns.is_empty());
        assert_eq!(name, "vadd");
    }

    #[test]
    fn bad_namespaces_are_rejected() {
        assert!(extract_namespaces("ops::").is_err());
        assert!(extract_namespaces("::vadd").is_err());
        assert!(extract_namespaces("ops::class::f").is_err());
        assert!(extract_namespaces("").is_err());
    }

    #[test]
    fn c_types() {
        assert_eq!(type_to_c_type(ScalarType::F32, true), "float ");
        assert_eq!(type_to_c_type(ScalarType::I32, false), "int32_t");
        assert_eq!(type_to_c_type(ScalarType::Handle, true), "void *");
    }
}
