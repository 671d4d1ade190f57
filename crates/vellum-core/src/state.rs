//! Closed render-state enumerations shared between the frontend and the
//! backends.

use bitflags::bitflags;

bitflags! {
    /// Flags for [`Gpu`](crate::Gpu) creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitFlags: u32 {
        /// Select the OpenGL backend.
        const BACKEND_OPENGL = 1 << 0;
        /// Select the Vulkan backend. Reserved; not implemented.
        const BACKEND_VULKAN = 1 << 1;
        /// Install the driver's debug callback and log its messages.
        const USE_DEBUG_LAYERS = 1 << 2;
        /// Always pass thread-claim checks, even when doing so is unsound.
        const NO_THREAD_SAFETY = 1 << 3;
        /// Do not fall back to another backend. Reserved.
        const NO_FALLBACK = 1 << 4;
        /// Terminate the process on any recoverable error.
        const EXIT_ON_ERROR = 1 << 5;
        /// Log every error before it is returned.
        const LOG_ERRORS = 1 << 6;
    }

    /// Render-pass write mask. Enables or disables output components.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteMask: u32 {
        const COLOR_RED = 1 << 0;
        const COLOR_GREEN = 1 << 1;
        const COLOR_BLUE = 1 << 2;
        const COLOR_ALPHA = 1 << 3;
        const DEPTH = 1 << 4;

        /// Just rgb, no alpha or depth.
        const RGB = Self::COLOR_RED.bits() | Self::COLOR_GREEN.bits() | Self::COLOR_BLUE.bits();
        /// Just color, no depth.
        const COLOR = Self::RGB.bits() | Self::COLOR_ALPHA.bits();
        /// All components.
        const ALL = Self::COLOR.bits() | Self::DEPTH.bits();
    }
}

/// Basic numerical test functions, used where fragments must be either
/// included or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TestFunc {
    Never = 1,
    Always = 2,
    Less = 3,
    Lequal = 4,
    Greater = 5,
    Gequal = 6,
    Equal = 7,
    NotEqual = 8,
}

impl TestFunc {
    /// Look a function up by its wire index. Returns `None` outside the
    /// closed set.
    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            1 => Self::Never,
            2 => Self::Always,
            3 => Self::Less,
            4 => Self::Lequal,
            5 => Self::Greater,
            6 => Self::Gequal,
            7 => Self::Equal,
            8 => Self::NotEqual,
            _ => return None,
        })
    }
}

/// Blending factors, controlling how component writes merge with existing
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BlendFactor {
    Zero = 1,
    One = 2,
    SrcColor = 3,
    OneMinusSrcColor = 4,
    DstColor = 5,
    OneMinusDstColor = 6,
    SrcAlpha = 7,
    OneMinusSrcAlpha = 8,
    DstAlpha = 9,
    OneMinusDstAlpha = 10,
    ConstantColor = 11,
    OneMinusConstantColor = 12,
    ConstantAlpha = 13,
    OneMinusConstantAlpha = 14,
    SrcAlphaSaturate = 15,
    Src1Color = 16,
    OneMinusSrc1Color = 17,
    Src1Alpha = 18,
    OneMinusSrc1Alpha = 19,
}

impl BlendFactor {
    /// Look a factor up by its wire index. Returns `None` outside the
    /// closed set.
    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            1 => Self::Zero,
            2 => Self::One,
            3 => Self::SrcColor,
            4 => Self::OneMinusSrcColor,
            5 => Self::DstColor,
            6 => Self::OneMinusDstColor,
            7 => Self::SrcAlpha,
            8 => Self::OneMinusSrcAlpha,
            9 => Self::DstAlpha,
            10 => Self::OneMinusDstAlpha,
            11 => Self::ConstantColor,
            12 => Self::OneMinusConstantColor,
            13 => Self::ConstantAlpha,
            14 => Self::OneMinusConstantAlpha,
            15 => Self::SrcAlphaSaturate,
            16 => Self::Src1Color,
            17 => Self::OneMinusSrc1Color,
            18 => Self::Src1Alpha,
            19 => Self::OneMinusSrc1Alpha,
            _ => return None,
        })
    }
}

/// A pixel buffer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Format {
    /// Grayscale 8-bit.
    R8 = 1,
    /// 2-channel 8-bit.
    Ra8 = 2,
    /// 3-channel 8-bit.
    Rgb8 = 3,
    /// 4-channel 8-bit.
    Rgba8 = 4,
    /// Grayscale float.
    R32 = 5,
    /// 3-channel float.
    Rgb32 = 6,
    /// 4-channel float.
    Rgba32 = 7,
}

impl Format {
    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::R8 => 1,
            Self::Ra8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
            Self::R32 => 4,
            Self::Rgb32 => 12,
            Self::Rgba32 => 16,
        }
    }
}

/// State properties accepted by [`Plan::push_state`](crate::Plan::push_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StateKey {
    /// Add a render target; a [`Value::Texture`](crate::Value::Texture) or a
    /// `Tuple3` of texture, source blend index, destination blend index.
    Target = 1,
    /// Set the shader; a [`Value::Shader`](crate::Value::Shader).
    Shader = 2,
    /// Set a uniform; a [`Value::KeyVal`](crate::Value::KeyVal).
    Uniform = 3,
    /// Set the viewport; a [`Value::Rect`](crate::Value::Rect).
    Dest = 4,
    /// Set the write mask; a [`Value::UInt`](crate::Value::UInt).
    WriteMask = 5,
    /// Set the depth comparison function; a [`Value::Int`](crate::Value::Int).
    DepthFunc = 6,
    /// If true, front faces are determined with clockwise winding; a
    /// [`Value::Bool`](crate::Value::Bool).
    ClockwiseFaces = 7,
    /// Whether to cull back faces; a [`Value::Bool`](crate::Value::Bool).
    BackfaceCull = 8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mask_aliases() {
        assert_eq!(WriteMask::RGB.bits(), 7);
        assert_eq!(WriteMask::COLOR.bits(), 15);
        assert_eq!(WriteMask::ALL.bits(), 31);
    }

    #[test]
    fn init_flag_bits() {
        assert_eq!(InitFlags::BACKEND_OPENGL.bits(), 1);
        assert_eq!(InitFlags::BACKEND_VULKAN.bits(), 2);
        assert_eq!(InitFlags::LOG_ERRORS.bits(), 64);
    }

    #[test]
    fn blend_round_trip() {
        for index in 1..=19 {
            let factor = BlendFactor::from_index(index).unwrap();
            assert_eq!(factor as i32, index);
        }
        assert!(BlendFactor::from_index(0).is_none());
        assert!(BlendFactor::from_index(20).is_none());
    }

    #[test]
    fn test_func_round_trip() {
        for index in 1..=8 {
            let func = TestFunc::from_index(index).unwrap();
            assert_eq!(func as i32, index);
        }
        assert!(TestFunc::from_index(9).is_none());
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(Format::R8.bytes_per_pixel(), 1);
        assert_eq!(Format::Ra8.bytes_per_pixel(), 2);
        assert_eq!(Format::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(Format::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(Format::R32.bytes_per_pixel(), 4);
        assert_eq!(Format::Rgb32.bytes_per_pixel(), 12);
        assert_eq!(Format::Rgba32.bytes_per_pixel(), 16);
    }
}
