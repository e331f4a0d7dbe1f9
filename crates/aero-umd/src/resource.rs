//! Resource registry types: descriptors, records, backing classification and
//! linear layout math.
//!
//! Every resource is either host-owned (a CPU shadow `Vec<u8>`, pushed to the
//! host inline via `UPLOAD_RESOURCE`) or guest-backed (a [`GuestAllocator`]
//! allocation the CPU writes directly, signaled via `RESOURCE_DIRTY_RANGE`).
//! `backing_alloc_id == 0` on the wire means host-owned.
//!
//! [`GuestAllocator`]: crate::backend::GuestAllocator

use aero_protocol::aerogpu::aerogpu_cmd as cmd;
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use bitflags::bitflags;

use crate::error::{Result, UmdError};
use crate::slot::SlotKey;

/// Identifier for a device-owned buffer or texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceId(pub(crate) SlotKey);

/// Identifier for a render-target view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RtvId(pub(crate) SlotKey);

/// Identifier for a depth-stencil view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DsvId(pub(crate) SlotKey);

/// Identifier for a shader-resource view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SrvId(pub(crate) SlotKey);

bitflags! {
    /// Pipeline bind points a resource may be attached to.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        const UNORDERED_ACCESS = 1 << 6;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct CpuAccessFlags: u32 {
        const WRITE = 1 << 0;
        const READ = 1 << 1;
    }
}

bitflags! {
    /// Flags accepted by map calls. Unknown bits are rejected.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MapFlags: u32 {
        const DO_NOT_WAIT = 1 << 0;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Usage {
    Default,
    Immutable,
    Dynamic,
    Staging,
}

/// CPU access requested by a map call.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u32)]
pub enum MapType {
    Read = 1,
    Write = 2,
    ReadWrite = 3,
    WriteDiscard = 4,
    WriteNoOverwrite = 5,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub size_bytes: u64,
    pub usage: Usage,
    pub bind_flags: BindFlags,
    pub cpu_access: CpuAccessFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct Texture2dDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: AerogpuFormat,
    pub usage: Usage,
    pub bind_flags: BindFlags,
    pub cpu_access: CpuAccessFlags,
}

/// Initial contents for one subresource, rows packed at `row_pitch_bytes`
/// (ignored for buffers).
#[derive(Clone, Copy, Debug)]
pub struct SubresourceData<'a> {
    pub bytes: &'a [u8],
    pub row_pitch_bytes: u32,
}

/// Destination region for [`update_subresource`]. For buffers only
/// `left..right` is meaningful (a byte range); for textures the box selects
/// texels (block-aligned for compressed formats).
///
/// [`update_subresource`]: crate::Device::update_subresource
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResourceBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Subresource selection for a texture view. `format: None` inherits the
/// resource format.
#[derive(Clone, Copy, Debug)]
pub struct TextureViewDesc {
    pub format: Option<AerogpuFormat>,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

/// Host-computed rows are padded out to this pitch.
pub const HOST_ROW_PITCH_ALIGN: u32 = 256;

pub(crate) fn align_row_pitch(bytes_per_row: u32) -> u32 {
    let mask = HOST_ROW_PITCH_ALIGN - 1;
    bytes_per_row.saturating_add(mask) & !mask
}

/// Row pitch the host assumes when no guest backing negotiated one: width in
/// blocks times bytes per block, rounded up to [`HOST_ROW_PITCH_ALIGN`].
pub(crate) fn host_row_pitch(format: AerogpuFormat, width: u32) -> u32 {
    let (block_w, _block_h, bytes_per_block) = format.block_layout();
    let blocks = width.div_ceil(block_w);
    align_row_pitch(blocks.saturating_mul(bytes_per_block))
}

/// Rows of blocks in one mip level.
pub(crate) fn block_rows(format: AerogpuFormat, height: u32) -> u32 {
    let (_block_w, block_h, _bytes_per_block) = format.block_layout();
    height.div_ceil(block_h)
}

pub(crate) fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

/// Byte layout of one (mip, layer) slice within a linear texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct SubresourceLayout {
    pub(crate) offset_bytes: u64,
    pub(crate) row_pitch_bytes: u32,
    /// Rows of blocks in this mip.
    pub(crate) rows: u32,
    /// Meaningful bytes per row (pitch includes padding past this).
    pub(crate) row_bytes: u32,
    pub(crate) size_bytes: u64,
}

pub(crate) enum ResourceKind {
    Buffer {
        size_bytes: u64,
    },
    Texture2d {
        width: u32,
        height: u32,
        format: AerogpuFormat,
        mip_levels: u32,
        array_layers: u32,
        /// Mip 0 pitch; derived mips use the host rule on their own extents.
        row_pitch_bytes: u32,
    },
}

pub(crate) enum Backing {
    /// CPU shadow storage; not guest-visible.
    Host(Vec<u8>),
    /// Guest allocation the CPU writes through [`crate::backend::GuestAllocator`].
    Guest {
        alloc_id: u32,
        offset_bytes: u64,
        size_bytes: u64,
    },
}

pub(crate) struct ResourceRecord {
    pub(crate) wire_handle: u32,
    pub(crate) kind: ResourceKind,
    pub(crate) usage: Usage,
    pub(crate) bind_flags: BindFlags,
    pub(crate) cpu_access: CpuAccessFlags,
    pub(crate) backing: Backing,
    /// Nonzero once exported or imported; feeds the aliasing rule.
    pub(crate) share_token: u64,
    /// Subresources with an active map, keyed by subresource index.
    pub(crate) mapped: std::collections::BTreeMap<u32, MapType>,
}

impl ResourceRecord {
    pub(crate) fn alias_key(&self, id: ResourceId) -> AliasKey {
        AliasKey {
            id,
            share_token: self.share_token,
            guest: match self.backing {
                Backing::Host(_) => None,
                Backing::Guest {
                    alloc_id,
                    offset_bytes,
                    ..
                } => Some((alloc_id, offset_bytes)),
            },
        }
    }

    pub(crate) fn backing_alloc_id(&self) -> u32 {
        match self.backing {
            Backing::Host(_) => 0,
            Backing::Guest { alloc_id, .. } => alloc_id,
        }
    }

    pub(crate) fn is_buffer(&self) -> bool {
        matches!(self.kind, ResourceKind::Buffer { .. })
    }

    pub(crate) fn subresource_count(&self) -> u32 {
        match self.kind {
            ResourceKind::Buffer { .. } => 1,
            ResourceKind::Texture2d {
                mip_levels,
                array_layers,
                ..
            } => mip_levels * array_layers,
        }
    }

    /// Total linear extent of the resource in bytes.
    pub(crate) fn total_size_bytes(&self) -> u64 {
        match self.kind {
            ResourceKind::Buffer { size_bytes } => size_bytes,
            ResourceKind::Texture2d {
                mip_levels,
                array_layers,
                ..
            } => {
                let last = mip_levels * array_layers - 1;
                self.subresource_layout(last)
                    .map(|l| l.offset_bytes + l.size_bytes)
                    .unwrap_or(0)
            }
        }
    }

    /// Linear layout of `subresource` (`mip + layer * mip_levels`), or `None`
    /// when the index is out of range.
    pub(crate) fn subresource_layout(&self, subresource: u32) -> Option<SubresourceLayout> {
        match self.kind {
            ResourceKind::Buffer { size_bytes } => {
                if subresource != 0 {
                    return None;
                }
                Some(SubresourceLayout {
                    offset_bytes: 0,
                    row_pitch_bytes: 0,
                    rows: 1,
                    row_bytes: size_bytes.min(u64::from(u32::MAX)) as u32,
                    size_bytes,
                })
            }
            ResourceKind::Texture2d {
                width,
                height,
                format,
                mip_levels,
                array_layers,
                row_pitch_bytes,
            } => {
                if subresource >= mip_levels * array_layers {
                    return None;
                }
                let mip = subresource % mip_levels;
                let layer = subresource / mip_levels;

                let mip_layout = |m: u32| -> (u32, u32, u32) {
                    let pitch = if m == 0 {
                        row_pitch_bytes
                    } else {
                        host_row_pitch(format, mip_extent(width, m))
                    };
                    let rows = block_rows(format, mip_extent(height, m));
                    let (block_w, _block_h, bytes_per_block) = format.block_layout();
                    let row_bytes = mip_extent(width, m).div_ceil(block_w) * bytes_per_block;
                    (pitch, rows, row_bytes)
                };

                let mut layer_stride = 0u64;
                for m in 0..mip_levels {
                    let (pitch, rows, _) = mip_layout(m);
                    layer_stride += u64::from(pitch) * u64::from(rows);
                }

                let mut offset = u64::from(layer) * layer_stride;
                for m in 0..mip {
                    let (pitch, rows, _) = mip_layout(m);
                    offset += u64::from(pitch) * u64::from(rows);
                }

                let (pitch, rows, row_bytes) = mip_layout(mip);
                Some(SubresourceLayout {
                    offset_bytes: offset,
                    row_pitch_bytes: pitch,
                    rows,
                    row_bytes,
                    size_bytes: u64::from(pitch) * u64::from(rows),
                })
            }
        }
    }
}

/// Aliasing identity of a resource, detached from the registry borrow so
/// hazard scans can run while the registry is being mutated.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AliasKey {
    id: ResourceId,
    share_token: u64,
    guest: Option<(u32, u64)>,
}

pub(crate) fn keys_alias(a: &AliasKey, b: &AliasKey) -> bool {
    if a.id == b.id {
        return true;
    }
    if a.share_token != 0 && a.share_token == b.share_token {
        return true;
    }
    matches!((a.guest, b.guest), (Some(ga), Some(gb)) if ga == gb)
}

/// A view's wire identity plus the subresource window it covers.
pub(crate) struct ViewRecord {
    /// Own handle when the host negotiated texture views, otherwise the base
    /// texture's handle.
    pub(crate) wire_handle: u32,
    pub(crate) owns_wire_handle: bool,
    pub(crate) resource: ResourceId,
    pub(crate) format: AerogpuFormat,
    pub(crate) base_mip_level: u32,
    pub(crate) mip_level_count: u32,
    pub(crate) base_array_layer: u32,
    pub(crate) array_layer_count: u32,
}

/// Wire `usage_flags` for `CREATE_BUFFER`/`CREATE_TEXTURE2D`.
pub(crate) fn wire_usage_flags(bind_flags: BindFlags) -> u32 {
    let mut flags = cmd::AEROGPU_RESOURCE_USAGE_NONE;
    if bind_flags.contains(BindFlags::VERTEX_BUFFER) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER;
    }
    if bind_flags.contains(BindFlags::INDEX_BUFFER) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_INDEX_BUFFER;
    }
    if bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_CONSTANT_BUFFER;
    }
    if bind_flags.contains(BindFlags::SHADER_RESOURCE) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_TEXTURE;
    }
    if bind_flags.contains(BindFlags::RENDER_TARGET) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_RENDER_TARGET;
    }
    if bind_flags.contains(BindFlags::DEPTH_STENCIL) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_DEPTH_STENCIL;
    }
    if bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
        flags |= cmd::AEROGPU_RESOURCE_USAGE_STORAGE;
    }
    flags
}

/// Usage/CPU-access consistency rules shared by buffer and texture creation.
pub(crate) fn validate_usage(usage: Usage, cpu_access: CpuAccessFlags, has_initial_data: bool) -> Result<()> {
    match usage {
        Usage::Default | Usage::Immutable => {
            if !cpu_access.is_empty() {
                return Err(UmdError::InvalidArg("cpu access requires dynamic or staging usage"));
            }
            if usage == Usage::Immutable && !has_initial_data {
                return Err(UmdError::InvalidArg("immutable resources require initial data"));
            }
        }
        Usage::Dynamic => {
            if cpu_access != CpuAccessFlags::WRITE {
                return Err(UmdError::InvalidArg("dynamic usage requires write-only cpu access"));
            }
        }
        Usage::Staging => {
            if cpu_access.is_empty() {
                return Err(UmdError::InvalidArg("staging usage requires cpu access"));
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_buffer_desc(desc: &BufferDesc, has_initial_data: bool) -> Result<()> {
    if desc.size_bytes == 0 {
        return Err(UmdError::InvalidArg("zero-sized buffer"));
    }
    if desc.usage == Usage::Staging && !desc.bind_flags.is_empty() {
        return Err(UmdError::InvalidArg("staging resources cannot carry bind flags"));
    }
    validate_usage(desc.usage, desc.cpu_access, has_initial_data)
}

pub(crate) fn validate_texture2d_desc(desc: &Texture2dDesc, has_initial_data: bool) -> Result<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(UmdError::InvalidArg("zero-extent texture"));
    }
    if desc.mip_levels == 0 || desc.array_layers == 0 {
        return Err(UmdError::InvalidArg("texture needs at least one mip and layer"));
    }
    if desc.mip_levels > 16 || desc.array_layers > 2048 {
        return Err(UmdError::InvalidArg("mip or layer count out of range"));
    }
    if desc.format == AerogpuFormat::Invalid {
        return Err(UmdError::InvalidArg("invalid texture format"));
    }
    if desc.usage == Usage::Staging && !desc.bind_flags.is_empty() {
        return Err(UmdError::InvalidArg("staging resources cannot carry bind flags"));
    }
    if desc.bind_flags.contains(BindFlags::DEPTH_STENCIL) && !desc.format.is_depth() {
        return Err(UmdError::InvalidArg("depth-stencil binding requires a depth format"));
    }
    validate_usage(desc.usage, desc.cpu_access, has_initial_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_pitch_rounds_to_256() {
        assert_eq!(host_row_pitch(AerogpuFormat::B8G8R8A8Unorm, 1), 256);
        assert_eq!(host_row_pitch(AerogpuFormat::B8G8R8A8Unorm, 64), 256);
        assert_eq!(host_row_pitch(AerogpuFormat::B8G8R8A8Unorm, 65), 512);
        assert_eq!(host_row_pitch(AerogpuFormat::B5G6R5Unorm, 128), 256);
        // BC1: 4x4 blocks, 8 bytes per block.
        assert_eq!(host_row_pitch(AerogpuFormat::BC1RgbaUnorm, 256), 512);
    }

    fn texture_record(width: u32, height: u32, mips: u32, layers: u32) -> ResourceRecord {
        let format = AerogpuFormat::B8G8R8A8Unorm;
        ResourceRecord {
            wire_handle: 1,
            kind: ResourceKind::Texture2d {
                width,
                height,
                format,
                mip_levels: mips,
                array_layers: layers,
                row_pitch_bytes: host_row_pitch(format, width),
            },
            usage: Usage::Default,
            bind_flags: BindFlags::SHADER_RESOURCE,
            cpu_access: CpuAccessFlags::empty(),
            backing: Backing::Host(Vec::new()),
            share_token: 0,
            mapped: Default::default(),
        }
    }

    #[test]
    fn subresource_layout_walks_mips_then_layers() {
        // 128x64, 2 mips, 2 layers; pitch 512 at mip 0, 256 at mip 1.
        let record = texture_record(128, 64, 2, 2);
        let mip0 = record.subresource_layout(0).unwrap();
        assert_eq!(mip0.offset_bytes, 0);
        assert_eq!(mip0.row_pitch_bytes, 512);
        assert_eq!(mip0.rows, 64);
        assert_eq!(mip0.row_bytes, 512);

        let mip1 = record.subresource_layout(1).unwrap();
        assert_eq!(mip1.offset_bytes, 512 * 64);
        assert_eq!(mip1.row_pitch_bytes, 256);
        assert_eq!(mip1.rows, 32);
        assert_eq!(mip1.row_bytes, 256);

        let layer_stride = 512 * 64 + 256 * 32;
        let layer1_mip0 = record.subresource_layout(2).unwrap();
        assert_eq!(layer1_mip0.offset_bytes, layer_stride as u64);

        assert_eq!(record.total_size_bytes(), 2 * layer_stride as u64);
        assert!(record.subresource_layout(4).is_none());
    }

    #[test]
    fn alias_rule_matches_identity_token_and_backing() {
        let alias = |a_id, a: &ResourceRecord, b_id, b: &ResourceRecord| {
            keys_alias(&a.alias_key(a_id), &b.alias_key(b_id))
        };
        let mut a = texture_record(16, 16, 1, 1);
        let mut b = texture_record(16, 16, 1, 1);
        let mut keys = crate::slot::SlotMap::new();
        let id_a = ResourceId(keys.insert(()));
        let id_b = ResourceId(keys.insert(()));

        assert!(alias(id_a, &a, id_a, &a));
        assert!(!alias(id_a, &a, id_b, &b));

        a.share_token = 9;
        b.share_token = 9;
        assert!(alias(id_a, &a, id_b, &b));

        a.share_token = 0;
        b.share_token = 0;
        a.backing = Backing::Guest {
            alloc_id: 3,
            offset_bytes: 256,
            size_bytes: 1024,
        };
        b.backing = Backing::Guest {
            alloc_id: 3,
            offset_bytes: 256,
            size_bytes: 1024,
        };
        assert!(alias(id_a, &a, id_b, &b));

        b.backing = Backing::Guest {
            alloc_id: 3,
            offset_bytes: 512,
            size_bytes: 1024,
        };
        assert!(!alias(id_a, &a, id_b, &b));
    }

    #[test]
    fn usage_validation_rejects_inconsistent_cpu_access() {
        let desc = BufferDesc {
            size_bytes: 64,
            usage: Usage::Dynamic,
            bind_flags: BindFlags::VERTEX_BUFFER,
            cpu_access: CpuAccessFlags::READ,
        };
        assert!(matches!(
            validate_buffer_desc(&desc, false),
            Err(UmdError::InvalidArg(_))
        ));

        let desc = BufferDesc {
            size_bytes: 64,
            usage: Usage::Staging,
            bind_flags: BindFlags::VERTEX_BUFFER,
            cpu_access: CpuAccessFlags::READ,
        };
        assert!(matches!(
            validate_buffer_desc(&desc, false),
            Err(UmdError::InvalidArg(_))
        ));

        let desc = BufferDesc {
            size_bytes: 64,
            usage: Usage::Immutable,
            bind_flags: BindFlags::VERTEX_BUFFER,
            cpu_access: CpuAccessFlags::empty(),
        };
        assert!(matches!(
            validate_buffer_desc(&desc, false),
            Err(UmdError::InvalidArg(_))
        ));
        assert!(validate_buffer_desc(&desc, true).is_ok());
    }
}
