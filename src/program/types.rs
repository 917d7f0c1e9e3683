//! Kernel scalar types and the runtime value representation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "bool" => ScalarType::Bool,
            "char" => ScalarType::Char,
            "uchar" => ScalarType::UChar,
            "short" => ScalarType::Short,
            "ushort" => ScalarType::UShort,
            "int" => ScalarType::Int,
            "uint" => ScalarType::UInt,
            "long" => ScalarType::Long,
            "ulong" | "size_t" => ScalarType::ULong,
            "ptrdiff_t" => ScalarType::Long,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Long => "long",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    /// Size in bytes as laid out in buffers.
    pub fn size(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::ULong | ScalarType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::Bool
                | ScalarType::UChar
                | ScalarType::UShort
                | ScalarType::UInt
                | ScalarType::ULong
        )
    }

    fn bits(self) -> u32 {
        (self.size() * 8) as u32
    }

    /// Integer promotion: anything narrower than `int` becomes `int`.
    pub fn promote(self) -> Self {
        match self {
            ScalarType::Bool
            | ScalarType::Char
            | ScalarType::UChar
            | ScalarType::Short
            | ScalarType::UShort => ScalarType::Int,
            other => other,
        }
    }

    /// Usual arithmetic conversions for a binary operator.
    pub fn common(a: Self, b: Self) -> Self {
        if a == ScalarType::Double || b == ScalarType::Double {
            return ScalarType::Double;
        }
        if a == ScalarType::Float || b == ScalarType::Float {
            return ScalarType::Float;
        }

        let (a, b) = (a.promote(), b.promote());
        if a == b {
            return a;
        }

        // Only int, uint, long and ulong remain.
        let rank = |t: ScalarType| t.size();
        match (a.is_unsigned(), b.is_unsigned()) {
            (false, false) | (true, true) => {
                if rank(a) >= rank(b) {
                    a
                } else {
                    b
                }
            }
            _ => {
                let (s, u) = if a.is_unsigned() { (b, a) } else { (a, b) };
                if rank(u) >= rank(s) {
                    u
                } else {
                    s
                }
            }
        }
    }

    /// Truncate and re-extend raw integer bits to this type's width.
    pub(crate) fn wrap(self, v: i64) -> i64 {
        match self {
            ScalarType::Bool => (v != 0) as i64,
            ScalarType::Char => v as i8 as i64,
            ScalarType::UChar => v as u8 as i64,
            ScalarType::Short => v as i16 as i64,
            ScalarType::UShort => v as u16 as i64,
            ScalarType::Int => v as i32 as i64,
            ScalarType::UInt => v as u32 as i64,
            ScalarType::Long | ScalarType::ULong => v,
            ScalarType::Float | ScalarType::Double => v,
        }
    }

    pub(crate) fn shift_mask(self) -> u32 {
        self.bits() - 1
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar at run time. Its static type lives with the node that
/// produced it; integers are kept normalized to that type's width
/// (unsigned 64-bit values are stored as their bit pattern).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn zero(ty: ScalarType) -> Self {
        if ty.is_float() {
            Value::Float(0.0)
        } else {
            Value::Int(0)
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::Int(v) => v != 0,
            Value::Float(v) => v != 0.0,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
        }
    }

    /// Convert a value of type `from` into type `to`.
    pub fn convert(self, from: ScalarType, to: ScalarType) -> Self {
        match (self, to.is_float()) {
            (Value::Int(v), false) => Value::Int(to.wrap(v)),
            (Value::Int(v), true) => {
                let f = if from == ScalarType::ULong {
                    v as u64 as f64
                } else {
                    v as f64
                };
                Value::Float(round_to(to, f))
            }
            (Value::Float(f), true) => Value::Float(round_to(to, f)),
            (Value::Float(f), false) => {
                if to == ScalarType::Bool {
                    Value::Int((f != 0.0) as i64)
                } else if to.is_unsigned() {
                    Value::Int(to.wrap(f as u64 as i64))
                } else {
                    Value::Int(to.wrap(f as i64))
                }
            }
        }
    }

    /// Decode one element from native-endian bytes.
    pub fn decode(ty: ScalarType, bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        match ty {
            ScalarType::Bool | ScalarType::UChar => Value::Int(bytes[0] as i64),
            ScalarType::Char => Value::Int(bytes[0] as i8 as i64),
            ScalarType::Short => Value::Int(i16::from_ne_bytes([raw[0], raw[1]]) as i64),
            ScalarType::UShort => Value::Int(u16::from_ne_bytes([raw[0], raw[1]]) as i64),
            ScalarType::Int => Value::Int(i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64),
            ScalarType::UInt => Value::Int(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64),
            ScalarType::Long | ScalarType::ULong => Value::Int(i64::from_ne_bytes(raw)),
            ScalarType::Float => Value::Float(f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64),
            ScalarType::Double => Value::Float(f64::from_ne_bytes(raw)),
        }
    }

    /// Encode as `ty` into `out`, which is exactly `ty.size()` bytes.
    pub fn encode(self, ty: ScalarType, out: &mut [u8]) {
        match (ty, self) {
            (ScalarType::Float, Value::Float(f)) => out.copy_from_slice(&(f as f32).to_ne_bytes()),
            (ScalarType::Double, Value::Float(f)) => out.copy_from_slice(&f.to_ne_bytes()),
            (_, Value::Int(v)) => match ty.size() {
                1 => out[0] = v as u8,
                2 => out.copy_from_slice(&(v as u16).to_ne_bytes()),
                4 => out.copy_from_slice(&(v as u32).to_ne_bytes()),
                _ => out.copy_from_slice(&v.to_ne_bytes()),
            },
            (_, other) => other.convert(ScalarType::Double, ty).encode(ty, out),
        }
    }
}

fn round_to(ty: ScalarType, f: f64) -> f64 {
    if ty == ScalarType::Float {
        f as f32 as f64
    } else {
        f
    }
}
