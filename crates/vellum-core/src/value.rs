//! The generic value union used for uniforms, state arguments, and tuple
//! composition, plus the buffer data-layout description.

use crate::{Buffer, Shader, Texture};

/// A generic tagged value.
///
/// Values carry resource handles (which they keep alive), plain scalars,
/// fixed-size numeric aggregates, named key/value pairs, and ordered tuples.
#[derive(Debug, Clone)]
pub enum Value {
    Shader(Shader),
    Buffer(Buffer),
    Texture(Texture),

    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    /// An opaque pointer-sized payload. Carried through, never interpreted.
    Pointer(usize),

    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
    /// x, y, width, height.
    Rect([i32; 4]),

    /// An owned name paired with an inner value.
    KeyVal(String, Box<Value>),

    Tuple2(Box<[Value; 2]>),
    Tuple3(Box<[Value; 3]>),
    Tuple4(Box<[Value; 4]>),
}

impl Value {
    pub fn keyval(name: impl Into<String>, value: Value) -> Self {
        Self::KeyVal(name.into(), Box::new(value))
    }

    pub fn rect(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::Rect([x, y, width, height])
    }

    pub fn tuple2(one: Value, two: Value) -> Self {
        Self::Tuple2(Box::new([one, two]))
    }

    pub fn tuple3(one: Value, two: Value, three: Value) -> Self {
        Self::Tuple3(Box::new([one, two, three]))
    }

    pub fn tuple4(one: Value, two: Value, three: Value, four: Value) -> Self {
        Self::Tuple4(Box::new([one, two, three, four]))
    }

    /// The value's type name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Shader(_) => "SHADER",
            Self::Buffer(_) => "BUFFER",
            Self::Texture(_) => "TEXTURE",
            Self::Bool(_) => "BOOL",
            Self::Int(_) => "INT",
            Self::UInt(_) => "UINT",
            Self::Float(_) => "FLOAT",
            Self::Pointer(_) => "POINTER",
            Self::Vec2(_) => "VEC2",
            Self::Vec3(_) => "VEC3",
            Self::Vec4(_) => "VEC4",
            Self::Mat4(_) => "MAT4",
            Self::Rect(_) => "RECT",
            Self::KeyVal(..) => "KEYVAL",
            Self::Tuple2(_) => "TUPLE2",
            Self::Tuple3(_) => "TUPLE3",
            Self::Tuple4(_) => "TUPLE4",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<[f32; 2]> for Value {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for Value {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for Value {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<[f32; 16]> for Value {
    fn from(v: [f32; 16]) -> Self {
        Self::Mat4(v)
    }
}

impl From<&Shader> for Value {
    fn from(v: &Shader) -> Self {
        Self::Shader(v.clone())
    }
}

impl From<&Buffer> for Value {
    fn from(v: &Buffer) -> Self {
        Self::Buffer(v.clone())
    }
}

impl From<&Texture> for Value {
    fn from(v: &Texture) -> Self {
        Self::Texture(v.clone())
    }
}

impl From<crate::BlendFactor> for Value {
    fn from(v: crate::BlendFactor) -> Self {
        Self::Int(v as i32)
    }
}

impl From<crate::TestFunc> for Value {
    fn from(v: crate::TestFunc) -> Self {
        Self::Int(v as i32)
    }
}

impl From<crate::WriteMask> for Value {
    fn from(v: crate::WriteMask) -> Self {
        Self::UInt(v.bits())
    }
}

/// The scalar element type of a [`DataSegment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Float,
    UByte,
}

impl ScalarType {
    /// Size of one scalar in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Float => std::mem::size_of::<f32>(),
            Self::UByte => 1,
        }
    }
}

/// One component of a buffer's contiguous, interleaved data layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    /// The attribute name this segment feeds.
    pub name: String,
    /// The scalar element type.
    pub ty: ScalarType,
    /// The number of scalars in this segment (1..4).
    pub count: u32,
    /// How the segment advances under instancing: 0 means once per vertex,
    /// `n >= 1` means advance every `n` instances.
    pub instance_rate: u32,
}

impl DataSegment {
    /// A per-vertex segment.
    pub fn new(name: impl Into<String>, ty: ScalarType, count: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            count,
            instance_rate: 0,
        }
    }

    /// A segment advanced every `rate` instances.
    pub fn per_instance(name: impl Into<String>, ty: ScalarType, count: u32, rate: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            count,
            instance_rate: rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::Int(3).type_name(), "INT");
        assert_eq!(Value::Float(1.0).type_name(), "FLOAT");
        assert_eq!(Value::Mat4([0.0; 16]).type_name(), "MAT4");
        assert_eq!(Value::keyval("k", Value::Bool(true)).type_name(), "KEYVAL");
        assert_eq!(
            Value::tuple3(Value::Int(1), Value::Int(2), Value::Int(3)).type_name(),
            "TUPLE3"
        );
    }

    #[test]
    fn keyval_owns_name_and_inner() {
        let kv = Value::keyval("mvp", Value::Mat4([0.0; 16]));
        match kv {
            Value::KeyVal(name, inner) => {
                assert_eq!(name, "mvp");
                assert!(matches!(*inner, Value::Mat4(_)));
            }
            _ => panic!("not a keyval"),
        }
    }

    #[test]
    fn scalar_sizes() {
        assert_eq!(ScalarType::Float.size(), 4);
        assert_eq!(ScalarType::UByte.size(), 1);
    }

    #[test]
    fn segment_instance_rate() {
        let per_vertex = DataSegment::new("vertexPosition", ScalarType::Float, 3);
        assert_eq!(per_vertex.instance_rate, 0);
        let per_instance = DataSegment::per_instance("instanceOffset", ScalarType::Float, 3, 1);
        assert_eq!(per_instance.instance_rate, 1);
    }
}
