use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar types of the IR. Every value fits in 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F64,
    Ptr,
}

impl Type {
    /// Store size in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::F64 | Type::Ptr => 8,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Type::I1 => 1,
            other => other.bytes() * 8,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64
        )
    }

    pub fn is_ptr(self) -> bool {
        self == Type::Ptr
    }

    pub fn mask(self) -> u64 {
        match self.bits() {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Truncates `bits` to this type's width.
    pub fn normalize(self, bits: u64) -> u64 {
        bits & self.mask()
    }

    pub fn sign_extend(self, bits: u64) -> i64 {
        let width = self.bits();
        if width == 0 || width >= 64 {
            return bits as i64;
        }
        let shift = 64 - width;
        ((bits << shift) as i64) >> shift
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }

    pub fn variadic(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params,
            ret,
            variadic: true,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if self.variadic {
            params.push("...".to_string());
        }
        write!(f, "({}) -> {}", params.join(", "), self.ret)
    }
}
