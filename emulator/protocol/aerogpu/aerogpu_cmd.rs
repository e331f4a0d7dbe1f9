//! AeroGPU command stream layouts.
//!
//! Append-only little-endian wire contract between the guest driver and the
//! host device model. Every packet starts with an `AerogpuCmdHdr` whose
//! `size_bytes` covers the header, payload and trailing padding, so readers
//! can skip packets with opcodes they do not understand.

use super::aerogpu_pci::{parse_and_validate_abi_version_u32, AerogpuAbiError};

pub type AerogpuHandle = u32;

pub const AEROGPU_CMD_STREAM_MAGIC: u32 = 0x444D_4341; // "ACMD" LE

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCmdStreamFlags {
    None = 0,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdStreamHeader {
    pub magic: u32,
    pub abi_version: u32,
    pub size_bytes: u32,
    pub flags: u32,
    pub reserved0: u32,
    pub reserved1: u32,
}

impl AerogpuCmdStreamHeader {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdHdr {
    pub opcode: u32,
    pub size_bytes: u32,
}

impl AerogpuCmdHdr {
    pub const SIZE_BYTES: usize = 8;
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCmdOpcode {
    Nop = 0,
    /// UTF-8 marker bytes follow the header.
    DebugMarker = 1,

    CreateBuffer = 0x100,
    CreateTexture2d = 0x101,
    DestroyResource = 0x102,
    ResourceDirtyRange = 0x103,
    UploadResource = 0x104,
    CopyBuffer = 0x105,
    CopyTexture2d = 0x106,
    CreateTextureView = 0x107,
    DestroyTextureView = 0x108,

    CreateShaderDxbc = 0x200,
    DestroyShader = 0x201,
    BindShaders = 0x202,
    SetShaderConstantsF = 0x203,
    CreateInputLayout = 0x204,
    DestroyInputLayout = 0x205,
    SetInputLayout = 0x206,
    SetShaderConstantsI = 0x207,
    SetShaderConstantsB = 0x208,

    SetBlendState = 0x300,
    SetDepthStencilState = 0x301,
    SetRasterizerState = 0x302,

    SetRenderTargets = 0x400,
    SetViewport = 0x401,
    SetScissor = 0x402,

    SetVertexBuffers = 0x500,
    SetIndexBuffer = 0x501,
    SetPrimitiveTopology = 0x502,
    SetTexture = 0x510,
    SetSamplerState = 0x511,
    SetRenderState = 0x512,
    CreateSampler = 0x520,
    DestroySampler = 0x521,
    SetSamplers = 0x522,
    SetConstantBuffers = 0x523,
    SetShaderResourceBuffers = 0x524,
    SetUnorderedAccessBuffers = 0x525,

    Clear = 0x600,
    Draw = 0x601,
    DrawIndexed = 0x602,
    Dispatch = 0x603,

    Present = 0x700,
    PresentEx = 0x701,

    ExportSharedSurface = 0x710,
    ImportSharedSurface = 0x711,
    ReleaseSharedSurface = 0x712,

    Flush = 0x720,
}

impl AerogpuCmdOpcode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Nop),
            1 => Some(Self::DebugMarker),
            0x100 => Some(Self::CreateBuffer),
            0x101 => Some(Self::CreateTexture2d),
            0x102 => Some(Self::DestroyResource),
            0x103 => Some(Self::ResourceDirtyRange),
            0x104 => Some(Self::UploadResource),
            0x105 => Some(Self::CopyBuffer),
            0x106 => Some(Self::CopyTexture2d),
            0x107 => Some(Self::CreateTextureView),
            0x108 => Some(Self::DestroyTextureView),
            0x200 => Some(Self::CreateShaderDxbc),
            0x201 => Some(Self::DestroyShader),
            0x202 => Some(Self::BindShaders),
            0x203 => Some(Self::SetShaderConstantsF),
            0x204 => Some(Self::CreateInputLayout),
            0x205 => Some(Self::DestroyInputLayout),
            0x206 => Some(Self::SetInputLayout),
            0x207 => Some(Self::SetShaderConstantsI),
            0x208 => Some(Self::SetShaderConstantsB),
            0x300 => Some(Self::SetBlendState),
            0x301 => Some(Self::SetDepthStencilState),
            0x302 => Some(Self::SetRasterizerState),
            0x400 => Some(Self::SetRenderTargets),
            0x401 => Some(Self::SetViewport),
            0x402 => Some(Self::SetScissor),
            0x500 => Some(Self::SetVertexBuffers),
            0x501 => Some(Self::SetIndexBuffer),
            0x502 => Some(Self::SetPrimitiveTopology),
            0x510 => Some(Self::SetTexture),
            0x511 => Some(Self::SetSamplerState),
            0x512 => Some(Self::SetRenderState),
            0x520 => Some(Self::CreateSampler),
            0x521 => Some(Self::DestroySampler),
            0x522 => Some(Self::SetSamplers),
            0x523 => Some(Self::SetConstantBuffers),
            0x524 => Some(Self::SetShaderResourceBuffers),
            0x525 => Some(Self::SetUnorderedAccessBuffers),
            0x600 => Some(Self::Clear),
            0x601 => Some(Self::Draw),
            0x602 => Some(Self::DrawIndexed),
            0x603 => Some(Self::Dispatch),
            0x700 => Some(Self::Present),
            0x701 => Some(Self::PresentEx),
            0x710 => Some(Self::ExportSharedSurface),
            0x711 => Some(Self::ImportSharedSurface),
            0x712 => Some(Self::ReleaseSharedSurface),
            0x720 => Some(Self::Flush),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuShaderStage {
    Vertex = 0,
    Pixel = 1,
    Compute = 2,
    Geometry = 3,
}

impl AerogpuShaderStage {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Vertex),
            1 => Some(Self::Pixel),
            2 => Some(Self::Compute),
            3 => Some(Self::Geometry),
            _ => None,
        }
    }
}

/// DXBC program-type numbering used by the `stage_ex` extension.
///
/// Packets that carry a legacy `shader_stage` selector reuse their `reserved0`
/// field as a stage override when `shader_stage == Compute` and the stream ABI
/// minor is at least `AEROGPU_STAGE_EX_MIN_ABI_MINOR`. Value 0 means "no
/// override" (legacy compute); value 1 is reserved and invalid on the wire.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuShaderStageEx {
    None = 0,
    Geometry = 2,
    Hull = 3,
    Domain = 4,
    Compute = 5,
}

impl AerogpuShaderStageEx {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            2 => Some(Self::Geometry),
            3 => Some(Self::Hull),
            4 => Some(Self::Domain),
            5 => Some(Self::Compute),
            _ => None,
        }
    }
}

/// `(shader_stage, reserved0)` wire encoding for a stage_ex override.
pub const fn encode_stage_ex(stage_ex: AerogpuShaderStageEx) -> (u32, u32) {
    (AerogpuShaderStage::Compute as u32, stage_ex as u32)
}

/// Recover a stage_ex override from a packet's `(shader_stage, reserved0)`
/// pair. `None` when the packet does not carry one (non-compute stage, or an
/// invalid override value).
pub const fn decode_stage_ex(shader_stage: u32, reserved0: u32) -> Option<AerogpuShaderStageEx> {
    if shader_stage != AerogpuShaderStage::Compute as u32 {
        return None;
    }
    AerogpuShaderStageEx::from_u32(reserved0)
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuIndexFormat {
    Uint16 = 0,
    Uint32 = 1,
}

impl AerogpuIndexFormat {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint16),
            1 => Some(Self::Uint32),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuPrimitiveTopology {
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
    LineListAdj = 10,
    LineStripAdj = 11,
    TriangleListAdj = 12,
    TriangleStripAdj = 13,
}

/// Patchlist topologies occupy `33..=64` on the wire; the value encodes
/// `32 + control_point_count`.
pub const AEROGPU_TOPOLOGY_PATCHLIST_MIN: u32 = 33;
pub const AEROGPU_TOPOLOGY_PATCHLIST_MAX: u32 = 64;

pub const fn aerogpu_topology_patchlist(control_point_count: u32) -> Option<u32> {
    if control_point_count >= 1 && control_point_count <= 32 {
        Some(32 + control_point_count)
    } else {
        None
    }
}

pub const fn aerogpu_topology_is_valid(v: u32) -> bool {
    matches!(v, 1..=6 | 10..=13)
        || (v >= AEROGPU_TOPOLOGY_PATCHLIST_MIN && v <= AEROGPU_TOPOLOGY_PATCHLIST_MAX)
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuSamplerFilter {
    Nearest = 0,
    Linear = 1,
}

impl AerogpuSamplerFilter {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Nearest),
            1 => Some(Self::Linear),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuSamplerAddressMode {
    ClampToEdge = 0,
    Repeat = 1,
    MirrorRepeat = 2,
}

impl AerogpuSamplerAddressMode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::ClampToEdge),
            1 => Some(Self::Repeat),
            2 => Some(Self::MirrorRepeat),
            _ => None,
        }
    }
}

pub const AEROGPU_RESOURCE_USAGE_NONE: u32 = 0;
pub const AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER: u32 = 1u32 << 0;
pub const AEROGPU_RESOURCE_USAGE_INDEX_BUFFER: u32 = 1u32 << 1;
pub const AEROGPU_RESOURCE_USAGE_CONSTANT_BUFFER: u32 = 1u32 << 2;
pub const AEROGPU_RESOURCE_USAGE_TEXTURE: u32 = 1u32 << 3;
pub const AEROGPU_RESOURCE_USAGE_RENDER_TARGET: u32 = 1u32 << 4;
pub const AEROGPU_RESOURCE_USAGE_DEPTH_STENCIL: u32 = 1u32 << 5;
pub const AEROGPU_RESOURCE_USAGE_SCANOUT: u32 = 1u32 << 6;
pub const AEROGPU_RESOURCE_USAGE_STORAGE: u32 = 1u32 << 7;

pub const AEROGPU_COLOR_WRITE_ENABLE_RED: u8 = 1 << 0;
pub const AEROGPU_COLOR_WRITE_ENABLE_GREEN: u8 = 1 << 1;
pub const AEROGPU_COLOR_WRITE_ENABLE_BLUE: u8 = 1 << 2;
pub const AEROGPU_COLOR_WRITE_ENABLE_ALPHA: u8 = 1 << 3;
pub const AEROGPU_COLOR_WRITE_ENABLE_ALL: u8 = 0xF;

/* --------------------------- Resource management -------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateBuffer {
    pub hdr: AerogpuCmdHdr,
    pub buffer_handle: AerogpuHandle,
    pub usage_flags: u32,
    pub size_bytes: u64,
    /// 0 = host-owned backing; non-zero = guest allocation id.
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
    pub reserved0: u64,
}

impl AerogpuCmdCreateBuffer {
    pub const SIZE_BYTES: usize = 40;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateTexture2d {
    pub hdr: AerogpuCmdHdr,
    pub texture_handle: AerogpuHandle,
    pub usage_flags: u32,
    pub format: u32, // aerogpu_format
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,   // >= 1
    pub array_layers: u32, // >= 1
    /// Mip 0 row pitch. Required when guest-backed, advisory otherwise.
    pub row_pitch_bytes: u32,
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
    pub reserved0: u64,
}

impl AerogpuCmdCreateTexture2d {
    pub const SIZE_BYTES: usize = 56;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyResource {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdResourceDirtyRange {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

impl AerogpuCmdResourceDirtyRange {
    pub const SIZE_BYTES: usize = 32;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdUploadResource {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

impl AerogpuCmdUploadResource {
    pub const SIZE_BYTES: usize = 32;
}

pub const AEROGPU_COPY_FLAG_NONE: u32 = 0;
/// Host writes the destination range back to guest backing after the copy.
pub const AEROGPU_COPY_FLAG_WRITEBACK_DST: u32 = 1u32 << 0;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCopyBuffer {
    pub hdr: AerogpuCmdHdr,
    pub dst_buffer: AerogpuHandle,
    pub src_buffer: AerogpuHandle,
    pub dst_offset_bytes: u64,
    pub src_offset_bytes: u64,
    pub size_bytes: u64,
    pub flags: u32, // aerogpu_copy_flags
    pub reserved0: u32,
}

impl AerogpuCmdCopyBuffer {
    pub const SIZE_BYTES: usize = 48;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCopyTexture2d {
    pub hdr: AerogpuCmdHdr,
    pub dst_texture: AerogpuHandle,
    pub src_texture: AerogpuHandle,
    pub dst_mip_level: u32,
    pub dst_array_layer: u32,
    pub src_mip_level: u32,
    pub src_array_layer: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub flags: u32, // aerogpu_copy_flags
    pub reserved0: u32,
}

impl AerogpuCmdCopyTexture2d {
    pub const SIZE_BYTES: usize = 64;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateTextureView {
    pub hdr: AerogpuCmdHdr,
    pub view_handle: AerogpuHandle,
    pub texture_handle: AerogpuHandle,
    pub format: u32, // aerogpu_format; 0 = inherit
    pub base_mip_level: u32,
    pub mip_level_count: u32, // 0 = all remaining
    pub base_array_layer: u32,
    pub array_layer_count: u32, // 0 = all remaining
    pub reserved0: u64,
}

impl AerogpuCmdCreateTextureView {
    pub const SIZE_BYTES: usize = 44;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyTextureView {
    pub hdr: AerogpuCmdHdr,
    pub view_handle: AerogpuHandle,
    pub reserved0: u32,
}

impl AerogpuCmdDestroyTextureView {
    pub const SIZE_BYTES: usize = 16;
}

/* -------------------------------- Shaders -------------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateShaderDxbc {
    pub hdr: AerogpuCmdHdr,
    pub shader_handle: AerogpuHandle,
    pub stage: u32,
    pub dxbc_size_bytes: u32,
    /// stage_ex (`AerogpuShaderStageEx`) when `stage == Compute`; 0 otherwise.
    pub reserved0: u32,
}

impl AerogpuCmdCreateShaderDxbc {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyShader {
    pub hdr: AerogpuCmdHdr,
    pub shader_handle: AerogpuHandle,
    pub reserved0: u32,
}

/// Legacy 24-byte form binds `{vs, ps, cs}`. The append-only extension adds
/// `{gs, hs, ds}` handles after the struct (packet size >= 36); when present
/// those are authoritative. A 24-byte packet with non-zero `reserved0` treats
/// `reserved0` as the gs handle, and extended writers mirror gs there.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdBindShaders {
    pub hdr: AerogpuCmdHdr,
    pub vs: AerogpuHandle,
    pub ps: AerogpuHandle,
    pub cs: AerogpuHandle,
    pub reserved0: u32,
}

impl AerogpuCmdBindShaders {
    pub const SIZE_BYTES: usize = 24;
    pub const EXT_SIZE_BYTES: usize = 36;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsF {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub vec4_count: u32,
    /// stage_ex when `stage == Compute`; 0 = legacy compute.
    pub reserved0: u32,
}

impl AerogpuCmdSetShaderConstantsF {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsI {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub vec4_count: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetShaderConstantsI {
    pub const SIZE_BYTES: usize = 24;
}

/// Bool registers are encoded as `vec4<u32>` on the wire (16 bytes per
/// register, scalar replicated across lanes, non-zero = true).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsB {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub bool_count: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetShaderConstantsB {
    pub const SIZE_BYTES: usize = 24;
}

pub const AEROGPU_INPUT_LAYOUT_BLOB_MAGIC: u32 = 0x5941_4C49; // "ILAY" LE
pub const AEROGPU_INPUT_LAYOUT_BLOB_VERSION: u32 = 1;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuInputLayoutBlobHeader {
    pub magic: u32,
    pub version: u32,
    pub element_count: u32,
    pub reserved0: u32,
}

impl AerogpuInputLayoutBlobHeader {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuInputLayoutElementDxgi {
    /// FNV-1a hash of the uppercase ASCII semantic name.
    pub semantic_name_hash: u32,
    pub semantic_index: u32,
    pub dxgi_format: u32,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub input_slot_class: u32,
    pub instance_data_step_rate: u32,
}

impl AerogpuInputLayoutElementDxgi {
    pub const SIZE_BYTES: usize = 28;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub blob_size_bytes: u32,
    pub reserved0: u32,
}

impl AerogpuCmdCreateInputLayout {
    pub const SIZE_BYTES: usize = 20;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub reserved0: u32,
}

impl AerogpuCmdDestroyInputLayout {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub reserved0: u32,
}

impl AerogpuCmdSetInputLayout {
    pub const SIZE_BYTES: usize = 16;
}

/* ------------------------------ Pipeline state ---------------------------- */

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuBlendFactor {
    Zero = 0,
    One = 1,
    SrcAlpha = 2,
    InvSrcAlpha = 3,
    DestAlpha = 4,
    InvDestAlpha = 5,
    Constant = 6,
    InvConstant = 7,
}

impl AerogpuBlendFactor {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Zero),
            1 => Some(Self::One),
            2 => Some(Self::SrcAlpha),
            3 => Some(Self::InvSrcAlpha),
            4 => Some(Self::DestAlpha),
            5 => Some(Self::InvDestAlpha),
            6 => Some(Self::Constant),
            7 => Some(Self::InvConstant),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuBlendOp {
    Add = 0,
    Subtract = 1,
    RevSubtract = 2,
    Min = 3,
    Max = 4,
}

impl AerogpuBlendOp {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Add),
            1 => Some(Self::Subtract),
            2 => Some(Self::RevSubtract),
            3 => Some(Self::Min),
            4 => Some(Self::Max),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuBlendState {
    pub enable: u32,
    pub src_factor: u32,
    pub dst_factor: u32,
    pub blend_op: u32,
    pub color_write_mask: u8,
    pub reserved0: [u8; 3],
    pub src_factor_alpha: u32,
    pub dst_factor_alpha: u32,
    pub blend_op_alpha: u32,
    /// IEEE-754 bits of the constant blend color, RGBA order.
    pub blend_constant_rgba_f32: [u32; 4],
    pub sample_mask: u32,
}

impl AerogpuBlendState {
    pub const SIZE_BYTES: usize = 52;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetBlendState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuBlendState,
}

impl AerogpuCmdSetBlendState {
    pub const SIZE_BYTES: usize = 60;
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCompareFunc {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

impl AerogpuCompareFunc {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Never),
            1 => Some(Self::Less),
            2 => Some(Self::Equal),
            3 => Some(Self::LessEqual),
            4 => Some(Self::Greater),
            5 => Some(Self::NotEqual),
            6 => Some(Self::GreaterEqual),
            7 => Some(Self::Always),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuDepthStencilState {
    pub depth_enable: u32,
    pub depth_write_enable: u32,
    pub depth_func: u32,
    pub stencil_enable: u32,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub reserved0: [u8; 2],
}

impl AerogpuDepthStencilState {
    pub const SIZE_BYTES: usize = 20;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetDepthStencilState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuDepthStencilState,
}

impl AerogpuCmdSetDepthStencilState {
    pub const SIZE_BYTES: usize = 28;
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuFillMode {
    Solid = 0,
    Wireframe = 1,
}

impl AerogpuFillMode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Solid),
            1 => Some(Self::Wireframe),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCullMode {
    None = 0,
    Front = 1,
    Back = 2,
}

impl AerogpuCullMode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Front),
            2 => Some(Self::Back),
            _ => None,
        }
    }
}

pub const AEROGPU_RASTERIZER_FLAG_DEPTH_CLIP_DISABLE: u32 = 1u32 << 0;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuRasterizerState {
    pub fill_mode: u32,
    pub cull_mode: u32,
    pub front_ccw: u32,
    pub scissor_enable: u32,
    pub depth_bias: i32,
    pub flags: u32, // aerogpu_rasterizer_flags
}

impl AerogpuRasterizerState {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRasterizerState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuRasterizerState,
}

impl AerogpuCmdSetRasterizerState {
    pub const SIZE_BYTES: usize = 32;
}

/* ------------------------- Render targets / state ------------------------- */

pub const AEROGPU_MAX_RENDER_TARGETS: usize = 8;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRenderTargets {
    pub hdr: AerogpuCmdHdr,
    pub color_count: u32,                                    // 0..AEROGPU_MAX_RENDER_TARGETS
    pub depth_stencil: AerogpuHandle,                        // 0 = none
    pub colors: [AerogpuHandle; AEROGPU_MAX_RENDER_TARGETS], // unused entries = 0
}

impl AerogpuCmdSetRenderTargets {
    pub const SIZE_BYTES: usize = 48;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetViewport {
    pub hdr: AerogpuCmdHdr,
    pub x_f32: u32,
    pub y_f32: u32,
    pub width_f32: u32,
    pub height_f32: u32,
    pub min_depth_f32: u32,
    pub max_depth_f32: u32,
}

impl AerogpuCmdSetViewport {
    pub const SIZE_BYTES: usize = 32;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetScissor {
    pub hdr: AerogpuCmdHdr,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl AerogpuCmdSetScissor {
    pub const SIZE_BYTES: usize = 24;
}

/* ------------------------------ Input assembler --------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuVertexBufferBinding {
    pub buffer: AerogpuHandle,
    pub stride_bytes: u32,
    pub offset_bytes: u32,
    pub reserved0: u32,
}

impl AerogpuVertexBufferBinding {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetVertexBuffers {
    pub hdr: AerogpuCmdHdr,
    pub start_slot: u32,
    pub buffer_count: u32,
}

impl AerogpuCmdSetVertexBuffers {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetIndexBuffer {
    pub hdr: AerogpuCmdHdr,
    pub buffer: AerogpuHandle,
    pub format: u32, // aerogpu_index_format
    pub offset_bytes: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetIndexBuffer {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetPrimitiveTopology {
    pub hdr: AerogpuCmdHdr,
    pub topology: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetPrimitiveTopology {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetTexture {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub slot: u32,
    pub texture: AerogpuHandle, // texture or texture view; 0 = unbind
    /// stage_ex when `shader_stage == Compute`; 0 = legacy compute.
    pub reserved0: u32,
}

impl AerogpuCmdSetTexture {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetSamplerState {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub slot: u32,
    pub state: u32, // D3D9 sampler state ID
    pub value: u32,
}

impl AerogpuCmdSetSamplerState {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRenderState {
    pub hdr: AerogpuCmdHdr,
    pub state: u32, // D3D9 render state ID
    pub value: u32,
}

impl AerogpuCmdSetRenderState {
    pub const SIZE_BYTES: usize = 16;
}

/* ----------------------------- Sampler objects ---------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateSampler {
    pub hdr: AerogpuCmdHdr,
    pub sampler_handle: AerogpuHandle,
    pub filter: u32,    // aerogpu_sampler_filter
    pub address_u: u32, // aerogpu_sampler_address_mode
    pub address_v: u32,
    pub address_w: u32,
}

impl AerogpuCmdCreateSampler {
    pub const SIZE_BYTES: usize = 28;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroySampler {
    pub hdr: AerogpuCmdHdr,
    pub sampler_handle: AerogpuHandle,
    pub reserved0: u32,
}

impl AerogpuCmdDestroySampler {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetSamplers {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub start_slot: u32,
    pub sampler_count: u32,
    /// stage_ex when `shader_stage == Compute`; 0 = legacy compute.
    pub reserved0: u32,
}

impl AerogpuCmdSetSamplers {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuConstantBufferBinding {
    pub buffer: AerogpuHandle, // 0 = unbound
    pub offset_bytes: u32,
    /// 0 means "rest of the buffer from offset_bytes".
    pub size_bytes: u32,
    pub reserved0: u32,
}

impl AerogpuConstantBufferBinding {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetConstantBuffers {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub start_slot: u32,
    pub buffer_count: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetConstantBuffers {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuShaderResourceBufferBinding {
    pub buffer: AerogpuHandle, // 0 = unbound
    pub offset_bytes: u32,
    /// 0 means "rest of the buffer from offset_bytes".
    pub size_bytes: u32,
    pub reserved0: u32,
}

impl AerogpuShaderResourceBufferBinding {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderResourceBuffers {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub start_slot: u32,
    pub buffer_count: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetShaderResourceBuffers {
    pub const SIZE_BYTES: usize = 24;
}

/// `initial_count == 0xFFFFFFFF` keeps the current UAV counter value.
pub const AEROGPU_UAV_INITIAL_COUNT_KEEP: u32 = 0xFFFF_FFFF;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuUnorderedAccessBufferBinding {
    pub buffer: AerogpuHandle, // 0 = unbound
    pub offset_bytes: u32,
    pub size_bytes: u32,
    pub initial_count: u32,
}

impl AerogpuUnorderedAccessBufferBinding {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetUnorderedAccessBuffers {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub start_slot: u32,
    pub uav_count: u32,
    pub reserved0: u32,
}

impl AerogpuCmdSetUnorderedAccessBuffers {
    pub const SIZE_BYTES: usize = 24;
}

/* -------------------------------- Drawing -------------------------------- */

pub const AEROGPU_CLEAR_COLOR: u32 = 1u32 << 0;
pub const AEROGPU_CLEAR_DEPTH: u32 = 1u32 << 1;
pub const AEROGPU_CLEAR_STENCIL: u32 = 1u32 << 2;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdClear {
    pub hdr: AerogpuCmdHdr,
    pub flags: u32, // aerogpu_clear_flags
    pub color_rgba_f32: [u32; 4],
    pub depth_f32: u32,
    pub stencil: u32,
}

impl AerogpuCmdClear {
    pub const SIZE_BYTES: usize = 36;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDraw {
    pub hdr: AerogpuCmdHdr,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl AerogpuCmdDraw {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDrawIndexed {
    pub hdr: AerogpuCmdHdr,
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl AerogpuCmdDrawIndexed {
    pub const SIZE_BYTES: usize = 28;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDispatch {
    pub hdr: AerogpuCmdHdr,
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
    /// stage_ex; 0 = legacy/default compute.
    pub reserved0: u32,
}

impl AerogpuCmdDispatch {
    pub const SIZE_BYTES: usize = 24;
}

/* ------------------------------ Presentation ------------------------------ */

pub const AEROGPU_PRESENT_FLAG_NONE: u32 = 0;
pub const AEROGPU_PRESENT_FLAG_VSYNC: u32 = 1u32 << 0;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdPresent {
    pub hdr: AerogpuCmdHdr,
    pub scanout_id: u32,
    pub flags: u32, // aerogpu_present_flags
}

impl AerogpuCmdPresent {
    pub const SIZE_BYTES: usize = 16;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdPresentEx {
    pub hdr: AerogpuCmdHdr,
    pub scanout_id: u32,
    pub flags: u32,
    pub d3d9_present_flags: u32,
    pub reserved0: u32,
}

impl AerogpuCmdPresentEx {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdExportSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub share_token: u64,
}

impl AerogpuCmdExportSharedSurface {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdImportSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub out_resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub share_token: u64,
}

impl AerogpuCmdImportSharedSurface {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdReleaseSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub share_token: u64,
    pub reserved0: u64,
}

impl AerogpuCmdReleaseSharedSurface {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdFlush {
    pub hdr: AerogpuCmdHdr,
    pub reserved0: u32,
    pub reserved1: u32,
}

impl AerogpuCmdFlush {
    pub const SIZE_BYTES: usize = 16;
}

/* -------------------------------- Decoding -------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCmdDecodeError {
    BufferTooSmall,
    BadMagic {
        found: u32,
    },
    Abi(AerogpuAbiError),
    BadSizeBytes {
        found: u32,
    },
    SizeNotAligned {
        found: u32,
    },
    PacketOverrunsStream {
        offset: u32,
        packet_size_bytes: u32,
        stream_size_bytes: u32,
    },
    UnexpectedOpcode {
        found: u32,
        expected: AerogpuCmdOpcode,
    },
    PayloadSizeMismatch {
        expected: usize,
        found: usize,
    },
    CountOverflow,
}

impl From<AerogpuAbiError> for AerogpuCmdDecodeError {
    fn from(value: AerogpuAbiError) -> Self {
        Self::Abi(value)
    }
}

pub fn decode_cmd_stream_header_le(buf: &[u8]) -> Result<AerogpuCmdStreamHeader, AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdStreamHeader::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = AerogpuCmdStreamHeader {
        magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        abi_version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        size_bytes: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        flags: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        reserved0: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        reserved1: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
    };

    validate_cmd_stream_header(&hdr)?;
    Ok(hdr)
}

pub fn validate_cmd_stream_header(hdr: &AerogpuCmdStreamHeader) -> Result<(), AerogpuCmdDecodeError> {
    if hdr.magic != AEROGPU_CMD_STREAM_MAGIC {
        return Err(AerogpuCmdDecodeError::BadMagic { found: hdr.magic });
    }

    let _ = parse_and_validate_abi_version_u32(hdr.abi_version)?;

    if hdr.size_bytes < AerogpuCmdStreamHeader::SIZE_BYTES as u32 {
        return Err(AerogpuCmdDecodeError::BadSizeBytes {
            found: hdr.size_bytes,
        });
    }

    Ok(())
}

pub fn decode_cmd_hdr_le(buf: &[u8]) -> Result<AerogpuCmdHdr, AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdHdr::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let opcode = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let size_bytes = u32::from_le_bytes(buf[4..8].try_into().unwrap());

    if size_bytes < AerogpuCmdHdr::SIZE_BYTES as u32 {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: size_bytes });
    }
    if size_bytes % 4 != 0 {
        return Err(AerogpuCmdDecodeError::SizeNotAligned { found: size_bytes });
    }

    Ok(AerogpuCmdHdr { opcode, size_bytes })
}

fn validate_packet_len(buf: &[u8], hdr: AerogpuCmdHdr) -> Result<usize, AerogpuCmdDecodeError> {
    let packet_len = hdr.size_bytes as usize;
    if buf.len() < packet_len {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }
    Ok(packet_len)
}

/// Decode CREATE_SHADER_DXBC and return the DXBC byte payload (without padding).
pub fn decode_cmd_create_shader_dxbc_payload_le(
    buf: &[u8],
) -> Result<(AerogpuCmdCreateShaderDxbc, &[u8]), AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdCreateShaderDxbc::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = decode_cmd_hdr_le(buf)?;
    let packet_len = validate_packet_len(buf, hdr)?;

    let dxbc_size_bytes = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    let payload_start = AerogpuCmdCreateShaderDxbc::SIZE_BYTES;
    let payload_end = payload_start
        .checked_add(dxbc_size_bytes as usize)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    if payload_end > packet_len {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: hdr.size_bytes });
    }

    let cmd = AerogpuCmdCreateShaderDxbc {
        hdr,
        shader_handle: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        stage: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        dxbc_size_bytes,
        reserved0: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
    };

    Ok((cmd, &buf[payload_start..payload_end]))
}

/// Decode CREATE_INPUT_LAYOUT and return the blob payload (without padding).
pub fn decode_cmd_create_input_layout_blob_le(
    buf: &[u8],
) -> Result<(AerogpuCmdCreateInputLayout, &[u8]), AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdCreateInputLayout::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = decode_cmd_hdr_le(buf)?;
    let packet_len = validate_packet_len(buf, hdr)?;

    let blob_size_bytes = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let payload_start = AerogpuCmdCreateInputLayout::SIZE_BYTES;
    let payload_end = payload_start
        .checked_add(blob_size_bytes as usize)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    if payload_end > packet_len {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: hdr.size_bytes });
    }

    let cmd = AerogpuCmdCreateInputLayout {
        hdr,
        input_layout_handle: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        blob_size_bytes,
        reserved0: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
    };

    Ok((cmd, &buf[payload_start..payload_end]))
}

/// Decode SET_SHADER_CONSTANTS_F and return the float payload.
pub fn decode_cmd_set_shader_constants_f_payload_le(
    buf: &[u8],
) -> Result<(AerogpuCmdSetShaderConstantsF, Vec<f32>), AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdSetShaderConstantsF::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = decode_cmd_hdr_le(buf)?;
    let packet_len = validate_packet_len(buf, hdr)?;

    let vec4_count = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    let float_count = vec4_count
        .checked_mul(4)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)? as usize;
    let payload_size_bytes = float_count
        .checked_mul(4)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    let payload_start = AerogpuCmdSetShaderConstantsF::SIZE_BYTES;
    let payload_end = payload_start
        .checked_add(payload_size_bytes)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    if payload_end > packet_len {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: hdr.size_bytes });
    }

    let cmd = AerogpuCmdSetShaderConstantsF {
        hdr,
        stage: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        start_register: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        vec4_count,
        reserved0: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
    };

    let mut out = Vec::with_capacity(float_count);
    for i in 0..float_count {
        let off = payload_start + i * 4;
        let bits = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        out.push(f32::from_bits(bits));
    }

    Ok((cmd, out))
}

/// Decode UPLOAD_RESOURCE and return the raw payload bytes (without padding).
pub fn decode_cmd_upload_resource_payload_le(
    buf: &[u8],
) -> Result<(AerogpuCmdUploadResource, &[u8]), AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdUploadResource::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = decode_cmd_hdr_le(buf)?;
    let packet_len = validate_packet_len(buf, hdr)?;

    let size_bytes_u64 = u64::from_le_bytes(buf[24..32].try_into().unwrap());
    let data_len = usize::try_from(size_bytes_u64).map_err(|_| AerogpuCmdDecodeError::BadSizeBytes {
        found: hdr.size_bytes,
    })?;
    let payload_start = AerogpuCmdUploadResource::SIZE_BYTES;
    let payload_end = payload_start
        .checked_add(data_len)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    if payload_end > packet_len {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: hdr.size_bytes });
    }

    let cmd = AerogpuCmdUploadResource {
        hdr,
        resource_handle: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        reserved0: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        offset_bytes: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        size_bytes: size_bytes_u64,
    };

    Ok((cmd, &buf[payload_start..payload_end]))
}

/// Decode SET_VERTEX_BUFFERS and parse the trailing `aerogpu_vertex_buffer_binding[]`.
pub fn decode_cmd_set_vertex_buffers_bindings_le(
    buf: &[u8],
) -> Result<(AerogpuCmdSetVertexBuffers, Vec<AerogpuVertexBufferBinding>), AerogpuCmdDecodeError> {
    if buf.len() < AerogpuCmdSetVertexBuffers::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::BufferTooSmall);
    }

    let hdr = decode_cmd_hdr_le(buf)?;
    let packet_len = validate_packet_len(buf, hdr)?;

    let buffer_count = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let bindings_size_bytes = buffer_count
        .checked_mul(AerogpuVertexBufferBinding::SIZE_BYTES as u32)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)? as usize;
    let payload_start = AerogpuCmdSetVertexBuffers::SIZE_BYTES;
    let payload_end = payload_start
        .checked_add(bindings_size_bytes)
        .ok_or(AerogpuCmdDecodeError::BufferTooSmall)?;
    if payload_end > packet_len {
        return Err(AerogpuCmdDecodeError::BadSizeBytes { found: hdr.size_bytes });
    }

    let cmd = AerogpuCmdSetVertexBuffers {
        hdr,
        start_slot: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        buffer_count,
    };

    let mut bindings = Vec::with_capacity(buffer_count as usize);
    for i in 0..(buffer_count as usize) {
        let off = payload_start + i * AerogpuVertexBufferBinding::SIZE_BYTES;
        bindings.push(AerogpuVertexBufferBinding {
            buffer: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
            stride_bytes: u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap()),
            offset_bytes: u32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap()),
            reserved0: u32::from_le_bytes(buf[off + 12..off + 16].try_into().unwrap()),
        });
    }

    Ok((cmd, bindings))
}

#[derive(Clone, Copy)]
pub struct AerogpuCmdPacket<'a> {
    pub hdr: AerogpuCmdHdr,
    pub opcode: Option<AerogpuCmdOpcode>,
    pub payload: &'a [u8],
}

pub struct AerogpuCmdStreamIter<'a> {
    header: AerogpuCmdStreamHeader,
    buf: &'a [u8],
    offset: usize,
    end: usize,
    done: bool,
}

impl<'a> AerogpuCmdStreamIter<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, AerogpuCmdDecodeError> {
        let header = decode_cmd_stream_header_le(buf)?;
        let end = header.size_bytes as usize;
        if buf.len() < end {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        Ok(Self {
            header,
            buf,
            offset: AerogpuCmdStreamHeader::SIZE_BYTES,
            end,
            done: false,
        })
    }

    pub fn header(&self) -> &AerogpuCmdStreamHeader {
        &self.header
    }
}

impl<'a> Iterator for AerogpuCmdStreamIter<'a> {
    type Item = Result<AerogpuCmdPacket<'a>, AerogpuCmdDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }

        let hdr_end = match self.offset.checked_add(AerogpuCmdHdr::SIZE_BYTES) {
            Some(end) => end,
            None => {
                self.done = true;
                return Some(Err(AerogpuCmdDecodeError::CountOverflow));
            }
        };
        if hdr_end > self.end {
            self.done = true;
            return Some(Err(AerogpuCmdDecodeError::BufferTooSmall));
        }

        let hdr = match decode_cmd_hdr_le(&self.buf[self.offset..self.end]) {
            Ok(hdr) => hdr,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        let packet_size = hdr.size_bytes as usize;
        let packet_end = match self.offset.checked_add(packet_size) {
            Some(end) => end,
            None => {
                self.done = true;
                return Some(Err(AerogpuCmdDecodeError::CountOverflow));
            }
        };
        if packet_end > self.end {
            self.done = true;
            return Some(Err(AerogpuCmdDecodeError::PacketOverrunsStream {
                offset: self.offset as u32,
                packet_size_bytes: hdr.size_bytes,
                stream_size_bytes: self.header.size_bytes,
            }));
        }

        let payload = &self.buf[hdr_end..packet_end];
        let packet = AerogpuCmdPacket {
            hdr,
            opcode: AerogpuCmdOpcode::from_u32(hdr.opcode),
            payload,
        };

        self.offset = packet_end;
        Some(Ok(packet))
    }
}

pub struct AerogpuCmdStreamView<'a> {
    pub header: AerogpuCmdStreamHeader,
    pub packets: Vec<AerogpuCmdPacket<'a>>,
}

impl<'a> AerogpuCmdStreamView<'a> {
    pub fn decode_from_le_bytes(buf: &'a [u8]) -> Result<Self, AerogpuCmdDecodeError> {
        let iter = AerogpuCmdStreamIter::new(buf)?;
        let header = *iter.header();
        let packets = iter.collect::<Result<Vec<_>, _>>()?;
        Ok(Self { header, packets })
    }
}

fn align_up_4(size: usize) -> Result<usize, AerogpuCmdDecodeError> {
    size.checked_add(3)
        .map(|v| v & !3usize)
        .ok_or(AerogpuCmdDecodeError::CountOverflow)
}

fn validate_expected_payload_size(expected: usize, payload: &[u8]) -> Result<(), AerogpuCmdDecodeError> {
    if payload.len() != expected {
        return Err(AerogpuCmdDecodeError::PayloadSizeMismatch {
            expected,
            found: payload.len(),
        });
    }
    Ok(())
}

/// Reads a `[T]` binding table trailing a fixed packet prefix. `align_to`
/// is sound here: every wire binding struct is `repr(C, packed)` u32 fields.
fn decode_trailing_bindings<T: Copy>(
    payload: &[u8],
    prefix_size: usize,
    count: usize,
) -> Result<&[T], AerogpuCmdDecodeError> {
    let bindings_len = count
        .checked_mul(core::mem::size_of::<T>())
        .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
    let expected_payload_size = prefix_size
        .checked_add(bindings_len)
        .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
    validate_expected_payload_size(expected_payload_size, payload)?;

    let binding_bytes = &payload[prefix_size..];
    let (prefix, bindings, suffix) = unsafe { binding_bytes.align_to::<T>() };
    if !prefix.is_empty() || !suffix.is_empty() || bindings.len() != count {
        return Err(AerogpuCmdDecodeError::CountOverflow);
    }
    Ok(bindings)
}

impl<'a> AerogpuCmdPacket<'a> {
    fn expect_opcode(&self, expected: AerogpuCmdOpcode) -> Result<(), AerogpuCmdDecodeError> {
        if self.opcode != Some(expected) {
            return Err(AerogpuCmdDecodeError::UnexpectedOpcode {
                found: self.hdr.opcode,
                expected,
            });
        }
        Ok(())
    }

    fn payload_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.payload[offset..offset + 4].try_into().unwrap())
    }

    pub fn decode_create_shader_dxbc_payload_le(
        &self,
    ) -> Result<(AerogpuCmdCreateShaderDxbc, &'a [u8]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::CreateShaderDxbc)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let shader_handle = self.payload_u32(0);
        let stage = self.payload_u32(4);
        let dxbc_size_bytes = self.payload_u32(8);
        let reserved0 = self.payload_u32(12);

        let dxbc_size = dxbc_size_bytes as usize;
        let expected_payload_size = 16usize
            .checked_add(align_up_4(dxbc_size)?)
            .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
        validate_expected_payload_size(expected_payload_size, self.payload)?;

        let dxbc_bytes = &self.payload[16..16 + dxbc_size];
        Ok((
            AerogpuCmdCreateShaderDxbc {
                hdr: self.hdr,
                shader_handle,
                stage,
                dxbc_size_bytes,
                reserved0,
            },
            dxbc_bytes,
        ))
    }

    pub fn decode_upload_resource_payload_le(
        &self,
    ) -> Result<(AerogpuCmdUploadResource, &'a [u8]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::UploadResource)?;
        if self.payload.len() < 24 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let resource_handle = self.payload_u32(0);
        let reserved0 = self.payload_u32(4);
        let offset_bytes = u64::from_le_bytes(self.payload[8..16].try_into().unwrap());
        let size_bytes = u64::from_le_bytes(self.payload[16..24].try_into().unwrap());

        let data_size = usize::try_from(size_bytes).map_err(|_| AerogpuCmdDecodeError::BadSizeBytes {
            found: self.hdr.size_bytes,
        })?;
        let expected_payload_size = 24usize
            .checked_add(align_up_4(data_size)?)
            .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
        validate_expected_payload_size(expected_payload_size, self.payload)?;

        let data_bytes = &self.payload[24..24 + data_size];
        Ok((
            AerogpuCmdUploadResource {
                hdr: self.hdr,
                resource_handle,
                reserved0,
                offset_bytes,
                size_bytes,
            },
            data_bytes,
        ))
    }

    pub fn decode_create_input_layout_payload_le(
        &self,
    ) -> Result<(AerogpuCmdCreateInputLayout, &'a [u8]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::CreateInputLayout)?;
        if self.payload.len() < 12 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let input_layout_handle = self.payload_u32(0);
        let blob_size_bytes = self.payload_u32(4);
        let reserved0 = self.payload_u32(8);

        let blob_size = blob_size_bytes as usize;
        let expected_payload_size = 12usize
            .checked_add(align_up_4(blob_size)?)
            .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
        validate_expected_payload_size(expected_payload_size, self.payload)?;

        let blob_bytes = &self.payload[12..12 + blob_size];
        Ok((
            AerogpuCmdCreateInputLayout {
                hdr: self.hdr,
                input_layout_handle,
                blob_size_bytes,
                reserved0,
            },
            blob_bytes,
        ))
    }

    pub fn decode_set_vertex_buffers_payload_le(
        &self,
    ) -> Result<(AerogpuCmdSetVertexBuffers, &'a [AerogpuVertexBufferBinding]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::SetVertexBuffers)?;
        if self.payload.len() < 8 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let start_slot = self.payload_u32(0);
        let buffer_count = self.payload_u32(4);
        let bindings = decode_trailing_bindings::<AerogpuVertexBufferBinding>(self.payload, 8, buffer_count as usize)?;

        Ok((
            AerogpuCmdSetVertexBuffers {
                hdr: self.hdr,
                start_slot,
                buffer_count,
            },
            bindings,
        ))
    }

    /// Decode BIND_SHADERS in both the legacy 24-byte and extended >= 36-byte
    /// forms, returning `(cmd, gs, hs, ds)` with the legacy `reserved0` gs
    /// fallback already applied.
    pub fn decode_bind_shaders_payload_le(
        &self,
    ) -> Result<(AerogpuCmdBindShaders, AerogpuHandle, AerogpuHandle, AerogpuHandle), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::BindShaders)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let cmd = AerogpuCmdBindShaders {
            hdr: self.hdr,
            vs: self.payload_u32(0),
            ps: self.payload_u32(4),
            cs: self.payload_u32(8),
            reserved0: self.payload_u32(12),
        };

        let (gs, hs, ds) = if self.payload.len() >= 28 {
            (self.payload_u32(16), self.payload_u32(20), self.payload_u32(24))
        } else {
            (cmd.reserved0, 0, 0)
        };

        Ok((cmd, gs, hs, ds))
    }

    pub fn decode_set_samplers_payload_le(
        &self,
    ) -> Result<(AerogpuCmdSetSamplers, &'a [AerogpuHandle]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::SetSamplers)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let cmd = AerogpuCmdSetSamplers {
            hdr: self.hdr,
            shader_stage: self.payload_u32(0),
            start_slot: self.payload_u32(4),
            sampler_count: self.payload_u32(8),
            reserved0: self.payload_u32(12),
        };
        let handles = decode_trailing_bindings::<AerogpuHandle>(self.payload, 16, cmd.sampler_count as usize)?;

        Ok((cmd, handles))
    }

    pub fn decode_set_constant_buffers_payload_le(
        &self,
    ) -> Result<(AerogpuCmdSetConstantBuffers, &'a [AerogpuConstantBufferBinding]), AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::SetConstantBuffers)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let cmd = AerogpuCmdSetConstantBuffers {
            hdr: self.hdr,
            shader_stage: self.payload_u32(0),
            start_slot: self.payload_u32(4),
            buffer_count: self.payload_u32(8),
            reserved0: self.payload_u32(12),
        };
        let bindings =
            decode_trailing_bindings::<AerogpuConstantBufferBinding>(self.payload, 16, cmd.buffer_count as usize)?;

        Ok((cmd, bindings))
    }

    pub fn decode_set_shader_resource_buffers_payload_le(
        &self,
    ) -> Result<(AerogpuCmdSetShaderResourceBuffers, &'a [AerogpuShaderResourceBufferBinding]), AerogpuCmdDecodeError>
    {
        self.expect_opcode(AerogpuCmdOpcode::SetShaderResourceBuffers)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let cmd = AerogpuCmdSetShaderResourceBuffers {
            hdr: self.hdr,
            shader_stage: self.payload_u32(0),
            start_slot: self.payload_u32(4),
            buffer_count: self.payload_u32(8),
            reserved0: self.payload_u32(12),
        };
        let bindings = decode_trailing_bindings::<AerogpuShaderResourceBufferBinding>(
            self.payload,
            16,
            cmd.buffer_count as usize,
        )?;

        Ok((cmd, bindings))
    }

    pub fn decode_set_unordered_access_buffers_payload_le(
        &self,
    ) -> Result<(AerogpuCmdSetUnorderedAccessBuffers, &'a [AerogpuUnorderedAccessBufferBinding]), AerogpuCmdDecodeError>
    {
        self.expect_opcode(AerogpuCmdOpcode::SetUnorderedAccessBuffers)?;
        if self.payload.len() < 16 {
            return Err(AerogpuCmdDecodeError::BufferTooSmall);
        }

        let cmd = AerogpuCmdSetUnorderedAccessBuffers {
            hdr: self.hdr,
            shader_stage: self.payload_u32(0),
            start_slot: self.payload_u32(4),
            uav_count: self.payload_u32(8),
            reserved0: self.payload_u32(12),
        };
        let bindings = decode_trailing_bindings::<AerogpuUnorderedAccessBufferBinding>(
            self.payload,
            16,
            cmd.uav_count as usize,
        )?;

        Ok((cmd, bindings))
    }

    /// Decode DEBUG_MARKER; the payload is UTF-8 with trailing NUL padding.
    pub fn decode_debug_marker_payload_le(&self) -> Result<&'a str, AerogpuCmdDecodeError> {
        self.expect_opcode(AerogpuCmdOpcode::DebugMarker)?;
        let trimmed = match self.payload.iter().position(|&b| b == 0) {
            Some(end) => &self.payload[..end],
            None => self.payload,
        };
        core::str::from_utf8(trimmed).map_err(|_| AerogpuCmdDecodeError::PayloadSizeMismatch {
            expected: self.payload.len(),
            found: trimmed.len(),
        })
    }
}
