//! Typed uniform values.
//!
//! A uniform's kind is resolved once, when it is registered on a program;
//! every later set is checked against that kind instead of re-parsing a tag.

use std::fmt;
use std::str::FromStr;

/// Declared type of a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    /// Texture unit index for a sampler.
    Sampler,
    Mat3,
    Mat4,
    FloatArray,
}

impl UniformKind {
    /// Whether `value` can be uploaded to a uniform of this kind.
    pub fn accepts(self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (Self::Float, UniformValue::Float(_))
                | (Self::Vec2, UniformValue::Vec2(_))
                | (Self::Vec3, UniformValue::Vec3(_))
                | (Self::Vec4, UniformValue::Vec4(_))
                | (Self::Int | Self::Sampler, UniformValue::Int(_))
                | (Self::Mat3, UniformValue::Mat3(_))
                | (Self::Mat4, UniformValue::Mat4(_))
                | (Self::FloatArray, UniformValue::FloatArray(_) | UniformValue::Float(_))
        )
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Int => "int",
            Self::Sampler => "sampler",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::FloatArray => "float[]",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown uniform setter `{0}`")]
pub struct ParseUniformKindError(pub String);

impl FromStr for UniformKind {
    type Err = ParseUniformKindError;

    /// Parses WebGL setter names (`uniform1f`, `uniformMatrix4fv`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform1f" => Ok(Self::Float),
            "uniform1fv" => Ok(Self::FloatArray),
            "uniform2f" | "uniform2fv" => Ok(Self::Vec2),
            "uniform3f" | "uniform3fv" => Ok(Self::Vec3),
            "uniform4f" | "uniform4fv" => Ok(Self::Vec4),
            "uniform1i" | "uniform1iv" => Ok(Self::Int),
            "sampler" | "sampler2D" => Ok(Self::Sampler),
            "uniformMatrix3fv" => Ok(Self::Mat3),
            "uniformMatrix4fv" => Ok(Self::Mat4),
            other => Err(ParseUniformKindError(other.to_string())),
        }
    }
}

/// A value ready for upload. Matrices are column-major.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    FloatArray(Vec<f32>),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Int(_) => UniformKind::Int,
            Self::Mat3(_) => UniformKind::Mat3,
            Self::Mat4(_) => UniformKind::Mat4,
            Self::FloatArray(_) => UniformKind::FloatArray,
        }
    }

    /// An empty array carries no data to upload.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::FloatArray(values) if values.is_empty())
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<[f32; 9]> for UniformValue {
    fn from(v: [f32; 9]) -> Self {
        Self::Mat3(v)
    }
}

impl From<[f32; 16]> for UniformValue {
    fn from(v: [f32; 16]) -> Self {
        Self::Mat4(v)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(v: Vec<f32>) -> Self {
        Self::FloatArray(v)
    }
}

impl From<&[f32]> for UniformValue {
    fn from(v: &[f32]) -> Self {
        Self::FloatArray(v.to_vec())
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(v: glam::Vec2) -> Self {
        Self::Vec2(v.to_array())
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(v: glam::Vec3) -> Self {
        Self::Vec3(v.to_array())
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(v: glam::Vec4) -> Self {
        Self::Vec4(v.to_array())
    }
}

impl From<glam::Mat3> for UniformValue {
    fn from(m: glam::Mat3) -> Self {
        Self::Mat3(m.to_cols_array())
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        Self::Mat4(m.to_cols_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webgl_setter_names() {
        assert_eq!("uniform1f".parse(), Ok(UniformKind::Float));
        assert_eq!("uniform2fv".parse(), Ok(UniformKind::Vec2));
        assert_eq!("uniformMatrix4fv".parse(), Ok(UniformKind::Mat4));
        assert_eq!("uniform1i".parse(), Ok(UniformKind::Int));
        assert!("uniform9q".parse::<UniformKind>().is_err());
    }

    #[test]
    fn test_sampler_accepts_unit_index() {
        assert!(UniformKind::Sampler.accepts(&UniformValue::Int(3)));
        assert!(!UniformKind::Sampler.accepts(&UniformValue::Float(3.0)));
        assert!(!UniformKind::Mat4.accepts(&UniformValue::Vec4([0.0; 4])));
    }

    #[test]
    fn test_glam_matrix_is_column_major() {
        let m = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let UniformValue::Mat4(cols) = UniformValue::from(m) else {
            panic!("expected mat4");
        };
        assert_eq!(&cols[12..15], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_array_is_null() {
        assert!(UniformValue::FloatArray(Vec::new()).is_null());
        assert!(!UniformValue::Float(0.0).is_null());
    }
}
