use serde::Serialize;
use std::fmt;

/// The type of a symbolic expression.
///
/// Mirrors the type lattice of the C-like GOTO front ends: fixed-width
/// bit-vector integers, booleans, pointers, arrays, structs, and code types
/// for function symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    /// Boolean (guard and condition) type.
    Bool,
    /// Two's-complement signed bit-vector of the given width.
    SignedBv { width: usize },
    /// Unsigned bit-vector of the given width.
    UnsignedBv { width: usize },
    /// Pointer to objects of the given subtype.
    Pointer { subtype: Box<Type> },
    /// Array of the given element type; `size` is `None` for incomplete arrays.
    Array {
        subtype: Box<Type>,
        size: Option<usize>,
    },
    /// Struct with a tag and named, typed components.
    Struct {
        tag: String,
        components: Vec<(String, Type)>,
    },
    /// Function type: parameter types and return type.
    Code {
        parameters: Vec<Type>,
        return_type: Box<Type>,
    },
    /// The empty (void) type.
    Empty,
}

impl Type {
    /// The default signed integer type used throughout tests and builtins.
    pub fn signed_int() -> Self {
        Type::SignedBv { width: 32 }
    }

    pub fn pointer_to(subtype: Type) -> Self {
        Type::Pointer {
            subtype: Box::new(subtype),
        }
    }

    pub fn array_of(subtype: Type, size: Option<usize>) -> Self {
        Type::Array {
            subtype: Box::new(subtype),
            size,
        }
    }

    pub fn code(parameters: Vec<Type>, return_type: Type) -> Self {
        Type::Code {
            parameters,
            return_type: Box::new(return_type),
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Bool)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Type::Code { .. })
    }

    /// The pointee type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer { subtype } => Some(subtype),
            _ => None,
        }
    }

    /// The element type, if this is an array.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array { subtype, .. } => Some(subtype),
            _ => None,
        }
    }

    /// Look up a struct component type by name.
    pub fn component(&self, name: &str) -> Option<&Type> {
        match self {
            Type::Struct { components, .. } => components
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, ty)| ty),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::SignedBv { width } => write!(f, "i{width}"),
            Type::UnsignedBv { width } => write!(f, "u{width}"),
            Type::Pointer { subtype } => write!(f, "*{subtype}"),
            Type::Array { subtype, size } => match size {
                Some(n) => write!(f, "[{subtype}; {n}]"),
                None => write!(f, "[{subtype}]"),
            },
            Type::Struct { tag, .. } => write!(f, "struct {tag}"),
            Type::Code { parameters, return_type } => {
                write!(f, "fn(")?;
                for (i, p) in parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {return_type}")
            }
            Type::Empty => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_and_array_constructors_nest() {
        let t = Type::pointer_to(Type::array_of(Type::signed_int(), Some(4)));
        assert!(t.is_pointer());
        assert_eq!(
            t.pointee(),
            Some(&Type::array_of(Type::signed_int(), Some(4)))
        );
        assert_eq!(t.pointee().unwrap().element(), Some(&Type::signed_int()));
    }

    #[test]
    fn struct_component_lookup() {
        let t = Type::Struct {
            tag: "pair".into(),
            components: vec![
                ("first".into(), Type::signed_int()),
                ("second".into(), Type::Bool),
            ],
        };
        assert_eq!(t.component("second"), Some(&Type::Bool));
        assert_eq!(t.component("third"), None);
    }

    #[test]
    fn display_renders_compactly() {
        assert_eq!(Type::signed_int().to_string(), "i32");
        assert_eq!(Type::pointer_to(Type::Bool).to_string(), "*bool");
        assert_eq!(
            Type::array_of(Type::UnsignedBv { width: 8 }, None).to_string(),
            "[u8]"
        );
        assert_eq!(
            Type::code(vec![Type::signed_int()], Type::Bool).to_string(),
            "fn(i32) -> bool"
        );
    }
}
