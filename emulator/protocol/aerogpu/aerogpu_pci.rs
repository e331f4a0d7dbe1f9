//! AeroGPU device ABI identity: command-stream ABI version and texture formats.
//!
//! The ABI version travels in every command stream header as a packed
//! `major << 16 | minor` word. Major bumps are breaking; minor bumps are
//! append-only (new opcodes, new trailing fields gated on `size_bytes`).

pub const AEROGPU_ABI_MAJOR: u16 = 1;
pub const AEROGPU_ABI_MINOR: u16 = 4;

pub const AEROGPU_ABI_VERSION_U32: u32 =
    ((AEROGPU_ABI_MAJOR as u32) << 16) | AEROGPU_ABI_MINOR as u32;

/// Minimum ABI minor at which `reserved0` in shader-stage-carrying packets is
/// interpreted as a `stage_ex` override (see `AerogpuShaderStageEx`).
pub const AEROGPU_STAGE_EX_MIN_ABI_MINOR: u16 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AerogpuAbiVersion {
    pub major: u16,
    pub minor: u16,
}

impl AerogpuAbiVersion {
    pub const fn to_u32(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }

    pub const fn from_u32(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: (v & 0xFFFF) as u16,
        }
    }

    pub const fn supports_stage_ex(self) -> bool {
        self.major == AEROGPU_ABI_MAJOR && self.minor >= AEROGPU_STAGE_EX_MIN_ABI_MINOR
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuAbiError {
    /// Major version mismatch; streams from a different major are unreadable.
    UnsupportedMajor { found: u16, supported: u16 },
}

/// Split a header `abi_version` word and check it against the major this
/// build understands. Newer minors are accepted (append-only contract).
pub fn parse_and_validate_abi_version_u32(v: u32) -> Result<AerogpuAbiVersion, AerogpuAbiError> {
    let version = AerogpuAbiVersion::from_u32(v);
    if version.major != AEROGPU_ABI_MAJOR {
        return Err(AerogpuAbiError::UnsupportedMajor {
            found: version.major,
            supported: AEROGPU_ABI_MAJOR,
        });
    }
    Ok(version)
}

/// Texture/surface formats referenced by `CREATE_TEXTURE2D` and
/// `CREATE_TEXTURE_VIEW`. Wire values are stable ABI.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuFormat {
    Invalid = 0,
    B8G8R8A8Unorm = 1,
    B8G8R8X8Unorm = 2,
    R8G8B8A8Unorm = 3,
    R8G8B8X8Unorm = 4,
    B5G6R5Unorm = 5,
    B5G5R5A1Unorm = 6,
    B8G8R8A8UnormSrgb = 7,
    B8G8R8X8UnormSrgb = 8,
    R8G8B8A8UnormSrgb = 9,
    R8G8B8X8UnormSrgb = 10,
    D24UnormS8Uint = 11,
    D32Float = 12,
    BC1RgbaUnorm = 13,
    BC1RgbaUnormSrgb = 14,
    BC2RgbaUnorm = 15,
    BC2RgbaUnormSrgb = 16,
    BC3RgbaUnorm = 17,
    BC3RgbaUnormSrgb = 18,
    BC7RgbaUnorm = 19,
    BC7RgbaUnormSrgb = 20,
}

impl AerogpuFormat {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Invalid,
            1 => Self::B8G8R8A8Unorm,
            2 => Self::B8G8R8X8Unorm,
            3 => Self::R8G8B8A8Unorm,
            4 => Self::R8G8B8X8Unorm,
            5 => Self::B5G6R5Unorm,
            6 => Self::B5G5R5A1Unorm,
            7 => Self::B8G8R8A8UnormSrgb,
            8 => Self::B8G8R8X8UnormSrgb,
            9 => Self::R8G8B8A8UnormSrgb,
            10 => Self::R8G8B8X8UnormSrgb,
            11 => Self::D24UnormS8Uint,
            12 => Self::D32Float,
            13 => Self::BC1RgbaUnorm,
            14 => Self::BC1RgbaUnormSrgb,
            15 => Self::BC2RgbaUnorm,
            16 => Self::BC2RgbaUnormSrgb,
            17 => Self::BC3RgbaUnorm,
            18 => Self::BC3RgbaUnormSrgb,
            19 => Self::BC7RgbaUnorm,
            20 => Self::BC7RgbaUnormSrgb,
            _ => return None,
        })
    }

    pub const fn is_block_compressed(self) -> bool {
        matches!(
            self,
            Self::BC1RgbaUnorm
                | Self::BC1RgbaUnormSrgb
                | Self::BC2RgbaUnorm
                | Self::BC2RgbaUnormSrgb
                | Self::BC3RgbaUnorm
                | Self::BC3RgbaUnormSrgb
                | Self::BC7RgbaUnorm
                | Self::BC7RgbaUnormSrgb
        )
    }

    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32Float)
    }

    /// (block_width, block_height, bytes_per_block). Uncompressed formats are
    /// 1x1 blocks, so this doubles as bytes-per-pixel.
    pub const fn block_layout(self) -> (u32, u32, u32) {
        match self {
            Self::B5G6R5Unorm | Self::B5G5R5A1Unorm => (1, 1, 2),
            Self::BC1RgbaUnorm | Self::BC1RgbaUnormSrgb => (4, 4, 8),
            Self::BC2RgbaUnorm
            | Self::BC2RgbaUnormSrgb
            | Self::BC3RgbaUnorm
            | Self::BC3RgbaUnormSrgb
            | Self::BC7RgbaUnorm
            | Self::BC7RgbaUnormSrgb => (4, 4, 16),
            _ => (1, 1, 4),
        }
    }
}
