//! Adapter and device state on top of the AeroGPU command writer.
//!
//! The [`Device`] is the single stateful object of this crate. Every entry
//! point validates against the registries first, encodes packets second, and
//! only then updates caches and allocation references, so a failed call never
//! leaves a half-written packet or a cache that disagrees with the stream.

use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use aero_protocol::aerogpu::aerogpu_cmd::{
    self as cmd, AerogpuIndexFormat, AerogpuSamplerAddressMode, AerogpuSamplerFilter,
    AerogpuShaderStage, AerogpuShaderStageEx,
};
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use aero_protocol::aerogpu::cmd_writer::{AerogpuCmdWriter, AerogpuCmdWriterError};
use bitflags::bitflags;
use tracing::{debug, warn};

use crate::backend::{AllocationRef, BackingRequest, GuestAllocator, Submitter};
use crate::error::{Result, UmdError};
use crate::input_layout::{build_layout_blob, InputElementDesc};
use crate::pipeline::{
    convert_blend_desc, convert_depth_stencil_desc, convert_rasterizer_desc, default_blend_state,
    default_depth_stencil_state, default_rasterizer_state, validate_blend_desc,
    validate_depth_stencil_desc, validate_rasterizer_desc, BlendStateDesc, BlendStateId,
    DepthStencilStateDesc, DepthStencilStateId, RasterizerStateDesc, RasterizerStateId,
};
use crate::resource::{
    host_row_pitch, keys_alias, validate_buffer_desc, validate_texture2d_desc, wire_usage_flags,
    AliasKey, Backing, BindFlags, BufferDesc, CpuAccessFlags, DsvId, ResourceId, ResourceKind,
    ResourceRecord, RtvId, SrvId, SubresourceData, Texture2dDesc, TextureViewDesc, Usage,
    ViewRecord,
};
use crate::slot::{SlotKey, SlotMap};
use crate::viewport::{
    collapse_scissors, collapse_viewports, scissor_packet_params, Collapse, ScissorRect, Viewport,
};

/// Shader pipeline stage as seen by callers.
///
/// Hull and domain have no first-class wire value; they ride the extended
/// stage field of the packets that carry one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Stage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl Stage {
    pub(crate) fn to_wire(self) -> (AerogpuShaderStage, AerogpuShaderStageEx) {
        match self {
            Stage::Vertex => (AerogpuShaderStage::Vertex, AerogpuShaderStageEx::None),
            Stage::Pixel => (AerogpuShaderStage::Pixel, AerogpuShaderStageEx::None),
            Stage::Geometry => (AerogpuShaderStage::Geometry, AerogpuShaderStageEx::None),
            Stage::Hull => (AerogpuShaderStage::Compute, AerogpuShaderStageEx::Hull),
            Stage::Domain => (AerogpuShaderStage::Compute, AerogpuShaderStageEx::Domain),
            Stage::Compute => (AerogpuShaderStage::Compute, AerogpuShaderStageEx::None),
        }
    }
}

/// Opaque shader object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ShaderId(pub(crate) SlotKey);

/// Opaque input layout id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InputLayoutId(pub(crate) SlotKey);

/// Opaque sampler id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SamplerId(pub(crate) SlotKey);

bitflags! {
    /// Targets cleared by [`Device::clear`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ClearFlags: u32 {
        const COLOR = cmd::AEROGPU_CLEAR_COLOR;
        const DEPTH = cmd::AEROGPU_CLEAR_DEPTH;
        const STENCIL = cmd::AEROGPU_CLEAR_STENCIL;
    }
}

/// Sampler creation parameters, raw wire values.
#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: AerogpuSamplerFilter::Linear as u32,
            address_u: AerogpuSamplerAddressMode::ClampToEdge as u32,
            address_v: AerogpuSamplerAddressMode::ClampToEdge as u32,
            address_w: AerogpuSamplerAddressMode::ClampToEdge as u32,
        }
    }
}

/// One constant buffer table slot. `size_bytes == 0` binds the rest of the
/// buffer from `offset_bytes`.
#[derive(Clone, Copy, Default, Debug)]
pub struct ConstantBufferBinding {
    pub buffer: Option<ResourceId>,
    pub offset_bytes: u32,
    pub size_bytes: u32,
}

/// One shader resource buffer table slot.
#[derive(Clone, Copy, Default, Debug)]
pub struct ShaderResourceBufferBinding {
    pub buffer: Option<ResourceId>,
    pub offset_bytes: u32,
    pub size_bytes: u32,
}

/// One unordered access buffer table slot. `initial_count: None` keeps the
/// append counter the host already tracks.
#[derive(Clone, Copy, Default, Debug)]
pub struct UnorderedAccessBufferBinding {
    pub buffer: Option<ResourceId>,
    pub offset_bytes: u32,
    pub size_bytes: u32,
    pub initial_count: Option<u32>,
}

/// One vertex buffer slot.
#[derive(Clone, Copy, Default, Debug)]
pub struct VertexBufferBinding {
    pub buffer: Option<ResourceId>,
    pub stride_bytes: u32,
    pub offset_bytes: u32,
}

/// Per-device knobs, fixed at open time.
#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    /// Place dynamic and staging resources in guest memory when the adapter
    /// has an allocator. Off forces host shadow storage for everything.
    pub guest_backing: bool,
    /// Emit CREATE_TEXTURE_VIEW packets and give views their own wire
    /// handles. Off makes views borrow the texture handle, for hosts that
    /// predate the view opcodes.
    pub texture_views: bool,
    /// Sample mask encoded when the caller does not supply one.
    pub default_sample_mask: u32,
    /// Fixed command stream capacity. `Some` bounds the stream and flushes
    /// when a packet no longer fits; `None` grows without bound.
    pub stream_capacity_bytes: Option<usize>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            guest_backing: true,
            texture_views: true,
            default_sample_mask: u32::MAX,
            stream_capacity_bytes: None,
        }
    }
}

pub(crate) struct ShaderRecord {
    pub(crate) wire_handle: u32,
    pub(crate) stage: Stage,
}

/// Shared handle and token counters plus the backend endpoints. One adapter
/// can open any number of devices; wire handles stay unique across them.
pub struct Adapter {
    next_handle: AtomicU32,
    next_share_token: AtomicU64,
    pub(crate) allocator: Option<Arc<dyn GuestAllocator>>,
    pub(crate) submitter: Arc<dyn Submitter>,
}

impl Adapter {
    pub fn new(
        submitter: Arc<dyn Submitter>,
        allocator: Option<Arc<dyn GuestAllocator>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU32::new(1),
            next_share_token: AtomicU64::new(1),
            allocator,
            submitter,
        })
    }

    pub fn open_device(self: &Arc<Self>, options: DeviceOptions) -> Device {
        let writer = match options.stream_capacity_bytes {
            Some(capacity) => AerogpuCmdWriter::with_capacity(capacity),
            None => AerogpuCmdWriter::new(),
        };
        Device {
            adapter: Arc::clone(self),
            options,
            state: Mutex::new(DeviceState {
                writer,
                resources: SlotMap::default(),
                shaders: SlotMap::default(),
                input_layouts: SlotMap::default(),
                samplers: SlotMap::default(),
                rtvs: SlotMap::default(),
                dsvs: SlotMap::default(),
                srvs: SlotMap::default(),
                blend_states: SlotMap::default(),
                depth_stencil_states: SlotMap::default(),
                rasterizer_states: SlotMap::default(),
                bound_render_targets: [None; cmd::AEROGPU_MAX_RENDER_TARGETS],
                bound_color_count: 0,
                bound_depth_stencil: None,
                bound_srvs: BTreeMap::new(),
                alloc_refs: BTreeMap::new(),
                pending_frees: Vec::new(),
                last_submitted_fence: 0,
                last_seen_completed: 0,
            }),
        }
    }

    /// Wire handles are never zero and never reused while the counter has
    /// not wrapped.
    fn alloc_handle(&self) -> u32 {
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }

    fn alloc_share_token(&self) -> u64 {
        self.next_share_token.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) struct DeviceState {
    pub(crate) writer: AerogpuCmdWriter,
    pub(crate) resources: SlotMap<ResourceRecord>,
    pub(crate) shaders: SlotMap<ShaderRecord>,
    pub(crate) input_layouts: SlotMap<u32>,
    pub(crate) samplers: SlotMap<u32>,
    pub(crate) rtvs: SlotMap<ViewRecord>,
    pub(crate) dsvs: SlotMap<ViewRecord>,
    pub(crate) srvs: SlotMap<ViewRecord>,
    pub(crate) blend_states: SlotMap<BlendStateDesc>,
    pub(crate) depth_stencil_states: SlotMap<DepthStencilStateDesc>,
    pub(crate) rasterizer_states: SlotMap<RasterizerStateDesc>,
    pub(crate) bound_render_targets: [Option<RtvId>; cmd::AEROGPU_MAX_RENDER_TARGETS],
    pub(crate) bound_color_count: u32,
    pub(crate) bound_depth_stencil: Option<DsvId>,
    pub(crate) bound_srvs: BTreeMap<(Stage, u32), SrvId>,
    /// Allocations the current stream touches; value is the write flag.
    pub(crate) alloc_refs: BTreeMap<u32, bool>,
    /// Guest allocations whose resources were destroyed mid-stream. Freed
    /// after the next submit so the host never sees a dangling alloc id.
    pub(crate) pending_frees: Vec<u32>,
    pub(crate) last_submitted_fence: u64,
    pub(crate) last_seen_completed: u64,
}

/// A logical device: command stream, object registries, binding caches.
///
/// All methods take `&self`; an internal mutex serializes the state. Handles
/// from one device are meaningless on another.
pub struct Device {
    pub(crate) adapter: Arc<Adapter>,
    pub(crate) options: DeviceOptions,
    state: Mutex<DeviceState>,
}

pub(crate) fn note_alloc_ref(refs: &mut BTreeMap<u32, bool>, alloc_id: u32, write: bool) {
    let flag = refs.entry(alloc_id).or_insert(false);
    if write {
        *flag = true;
    }
}

fn shader_handle(state: &DeviceState, id: Option<ShaderId>, stage: Stage) -> Result<u32> {
    match id {
        None => Ok(0),
        Some(id) => {
            let record = state
                .shaders
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale shader id"))?;
            if record.stage != stage {
                return Err(UmdError::InvalidArg("shader bound to the wrong stage"));
            }
            Ok(record.wire_handle)
        }
    }
}

/// Resolves a buffer binding to `(wire handle, alloc id)`. `None` binds the
/// null handle.
fn buffer_binding_handle(
    state: &DeviceState,
    id: Option<ResourceId>,
    required: BindFlags,
    missing: &'static str,
) -> Result<(u32, u32)> {
    let Some(id) = id else {
        return Ok((0, 0));
    };
    let record = state
        .resources
        .get(id.0)
        .ok_or(UmdError::InvalidArg("stale resource id"))?;
    if !record.is_buffer() {
        return Err(UmdError::InvalidArg("binding requires a buffer resource"));
    }
    if !record.bind_flags.contains(required) {
        return Err(UmdError::InvalidArg(missing));
    }
    Ok((record.wire_handle, record.backing_alloc_id()))
}

fn rtv_identity(state: &DeviceState, id: RtvId) -> Option<(AliasKey, u32)> {
    let view = state.rtvs.get(id.0)?;
    let record = state.resources.get(view.resource.0)?;
    Some((record.alias_key(view.resource), record.backing_alloc_id()))
}

fn dsv_identity(state: &DeviceState, id: DsvId) -> Option<(AliasKey, u32)> {
    let view = state.dsvs.get(id.0)?;
    let record = state.resources.get(view.resource.0)?;
    Some((record.alias_key(view.resource), record.backing_alloc_id()))
}

/// Drops the write flag on `alloc_id` unless some still-bound render or
/// depth target uses the allocation. The entry itself stays; the stream
/// already carries packets that read it.
fn demote_alloc_ref_if_unwritten(state: &mut DeviceState, alloc_id: u32) {
    let written_by_color = state
        .bound_render_targets
        .iter()
        .flatten()
        .filter_map(|&rtv| rtv_identity(state, rtv))
        .any(|(_, alloc)| alloc == alloc_id);
    let written_by_depth = state
        .bound_depth_stencil
        .and_then(|dsv| dsv_identity(state, dsv))
        .is_some_and(|(_, alloc)| alloc == alloc_id);
    if written_by_color || written_by_depth {
        return;
    }
    if let Some(write) = state.alloc_refs.get_mut(&alloc_id) {
        *write = false;
    }
}

/// Resolved view window: format plus mip and layer ranges.
struct ViewWindow {
    format: AerogpuFormat,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
}

fn view_window(
    record: &ResourceRecord,
    desc: Option<&TextureViewDesc>,
    default_all_mips: bool,
) -> Result<ViewWindow> {
    let ResourceKind::Texture2d {
        format,
        mip_levels,
        array_layers,
        ..
    } = record.kind
    else {
        return Err(UmdError::InvalidArg("views require a 2d texture"));
    };
    let Some(desc) = desc else {
        return Ok(ViewWindow {
            format,
            base_mip: 0,
            mip_count: if default_all_mips { mip_levels } else { 1 },
            base_layer: 0,
            layer_count: array_layers,
        });
    };
    let format = desc.format.unwrap_or(format);
    if format == AerogpuFormat::Invalid {
        return Err(UmdError::InvalidArg("invalid view format"));
    }
    if desc.mip_level_count == 0 || desc.array_layer_count == 0 {
        return Err(UmdError::InvalidArg("empty view range"));
    }
    let mip_end = desc
        .base_mip_level
        .checked_add(desc.mip_level_count)
        .ok_or(UmdError::InvalidArg("view mip range overflow"))?;
    let layer_end = desc
        .base_array_layer
        .checked_add(desc.array_layer_count)
        .ok_or(UmdError::InvalidArg("view layer range overflow"))?;
    if mip_end > mip_levels || layer_end > array_layers {
        return Err(UmdError::InvalidArg("view range exceeds the resource"));
    }
    Ok(ViewWindow {
        format,
        base_mip: desc.base_mip_level,
        mip_count: desc.mip_level_count,
        base_layer: desc.base_array_layer,
        layer_count: desc.array_layer_count,
    })
}

struct TextureCopyPart {
    handle: u32,
    mip: u32,
    layer: u32,
    width: u32,
    height: u32,
    alloc_id: u32,
    readback: bool,
}

fn texture_copy_part(
    state: &DeviceState,
    id: ResourceId,
    subresource: u32,
    stale: &'static str,
) -> Result<TextureCopyPart> {
    let record = state
        .resources
        .get(id.0)
        .ok_or(UmdError::InvalidArg(stale))?;
    let ResourceKind::Texture2d {
        width,
        height,
        mip_levels,
        ..
    } = record.kind
    else {
        return Err(UmdError::InvalidArg("texture copy requires 2d textures"));
    };
    if subresource >= record.subresource_count() {
        return Err(UmdError::InvalidArg("subresource out of range"));
    }
    let mip = subresource % mip_levels;
    let layer = subresource / mip_levels;
    Ok(TextureCopyPart {
        handle: record.wire_handle,
        mip,
        layer,
        width: crate::resource::mip_extent(width, mip),
        height: crate::resource::mip_extent(height, mip),
        alloc_id: record.backing_alloc_id(),
        readback: record.backing_alloc_id() != 0
            && record.cpu_access.contains(CpuAccessFlags::READ),
    })
}

impl Device {
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn allocator(&self) -> Option<&Arc<dyn GuestAllocator>> {
        if !self.options.guest_backing {
            return None;
        }
        self.adapter.allocator.as_ref()
    }

    /// Encodes one packet. A full bounded stream is submitted and the packet
    /// retried once; a packet too large for the whole capacity still fails.
    pub(crate) fn emit<F>(&self, state: &mut DeviceState, f: F) -> Result<()>
    where
        F: Fn(&mut AerogpuCmdWriter) -> std::result::Result<(), AerogpuCmdWriterError>,
    {
        match f(&mut state.writer) {
            Ok(()) => Ok(()),
            Err(AerogpuCmdWriterError::StreamFull { .. }) => {
                self.submit_locked(state)?;
                f(&mut state.writer).map_err(UmdError::Encode)
            }
            Err(err) => Err(UmdError::Encode(err)),
        }
    }

    /// Submits the current stream. An empty stream is a no-op that returns
    /// the last fence. On success the writer is rearmed (reusing the bounded
    /// storage when the device has a fixed capacity), allocation references
    /// are reseeded from the still-bound targets and shader resources, and
    /// deferred guest frees are released.
    pub(crate) fn submit_locked(&self, state: &mut DeviceState) -> Result<u64> {
        if state.writer.is_empty() {
            return Ok(state.last_submitted_fence);
        }
        let writer = mem::replace(&mut state.writer, AerogpuCmdWriter::new());
        let stream = writer.finish();
        let stream_len = stream.len();
        let allocations: Vec<AllocationRef> = state
            .alloc_refs
            .iter()
            .map(|(&alloc_id, &write)| AllocationRef { alloc_id, write })
            .collect();
        let result = self.adapter.submitter.submit(&stream, &allocations);
        state.writer = match self.options.stream_capacity_bytes {
            Some(_) => AerogpuCmdWriter::bounded_in(stream),
            None => AerogpuCmdWriter::new(),
        };
        let fence = result?;
        state.last_submitted_fence = fence;
        state.alloc_refs.clear();
        self.reseed_bound_refs(state);
        for alloc_id in mem::take(&mut state.pending_frees) {
            if let Some(allocator) = self.adapter.allocator.as_ref() {
                allocator.free(alloc_id);
            }
        }
        debug!(
            fence,
            bytes = stream_len,
            allocations = allocations.len(),
            "submitted command stream"
        );
        Ok(fence)
    }

    /// A fresh stream implicitly references every allocation still bound:
    /// draws recorded into it touch bound targets and shader resources
    /// without another explicit packet.
    fn reseed_bound_refs(&self, state: &mut DeviceState) {
        let mut seeds: Vec<(u32, bool)> = Vec::new();
        for rtv in state.bound_render_targets.iter().flatten() {
            if let Some((_, alloc)) = rtv_identity(state, *rtv) {
                if alloc != 0 {
                    seeds.push((alloc, true));
                }
            }
        }
        if let Some(dsv) = state.bound_depth_stencil {
            if let Some((_, alloc)) = dsv_identity(state, dsv) {
                if alloc != 0 {
                    seeds.push((alloc, true));
                }
            }
        }
        for srv in state.bound_srvs.values() {
            if let Some(view) = state.srvs.get(srv.0) {
                if let Some(record) = state.resources.get(view.resource.0) {
                    let alloc = record.backing_alloc_id();
                    if alloc != 0 {
                        seeds.push((alloc, false));
                    }
                }
            }
        }
        for (alloc_id, write) in seeds {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, write);
        }
    }

    fn allocate_backing(
        &self,
        usage: Usage,
        size_bytes: u64,
        row_pitch_bytes: u32,
        cpu_access: CpuAccessFlags,
    ) -> Result<Backing> {
        if matches!(usage, Usage::Dynamic | Usage::Staging) {
            if let Some(allocator) = self.allocator() {
                match allocator.allocate(&BackingRequest {
                    size_bytes,
                    row_pitch_bytes,
                }) {
                    Ok(allocation) => {
                        return Ok(Backing::Guest {
                            alloc_id: allocation.alloc_id,
                            offset_bytes: 0,
                            size_bytes,
                        });
                    }
                    Err(err) => {
                        warn!(%err, size_bytes, "guest backing allocation failed, falling back to host storage");
                    }
                }
            }
        }
        let shadow = if cpu_access.is_empty() {
            Vec::new()
        } else {
            let len = usize::try_from(size_bytes)
                .map_err(|_| UmdError::OutOfMemory("resource exceeds the address space"))?;
            vec![0u8; len]
        };
        Ok(Backing::Host(shadow))
    }

    fn push_initial_buffer_data(
        &self,
        state: &mut DeviceState,
        record: &mut ResourceRecord,
        data: &[u8],
    ) -> Result<()> {
        let handle = record.wire_handle;
        match &mut record.backing {
            Backing::Guest {
                alloc_id,
                offset_bytes,
                ..
            } => {
                let alloc_id = *alloc_id;
                let base = *offset_bytes;
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                allocator.write(alloc_id, base, data)?;
                self.emit(state, |w| {
                    w.resource_dirty_range(handle, 0, data.len() as u64)
                })?;
                note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
            }
            Backing::Host(shadow) => {
                if shadow.len() == data.len() {
                    shadow.copy_from_slice(data);
                }
                self.emit(state, |w| w.upload_resource(handle, 0, data))?;
            }
        }
        Ok(())
    }

    fn push_initial_texture_data(
        &self,
        state: &mut DeviceState,
        record: &mut ResourceRecord,
        data: &[SubresourceData<'_>],
    ) -> Result<()> {
        let count = record.subresource_count();
        if data.len() != count as usize {
            return Err(UmdError::InvalidArg(
                "initial data must cover every subresource",
            ));
        }
        let mut layouts = Vec::with_capacity(data.len());
        for (index, sub) in data.iter().enumerate() {
            let layout = record
                .subresource_layout(index as u32)
                .ok_or(UmdError::InvalidArg("subresource out of range"))?;
            let src_pitch = if sub.row_pitch_bytes == 0 {
                layout.row_bytes
            } else {
                sub.row_pitch_bytes
            };
            if src_pitch < layout.row_bytes {
                return Err(UmdError::InvalidArg("initial data row pitch too small"));
            }
            let needed = (layout.rows as usize - 1) * src_pitch as usize + layout.row_bytes as usize;
            if sub.bytes.len() < needed {
                return Err(UmdError::InvalidArg("initial data too small"));
            }
            layouts.push(layout);
        }

        let handle = record.wire_handle;
        let total = record.total_size_bytes();
        match &mut record.backing {
            Backing::Guest {
                alloc_id,
                offset_bytes,
                ..
            } => {
                let alloc_id = *alloc_id;
                let base = *offset_bytes;
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                for (index, sub) in data.iter().enumerate() {
                    let layout = record
                        .subresource_layout(index as u32)
                        .ok_or(UmdError::InvalidArg("subresource out of range"))?;
                    let src_pitch = if sub.row_pitch_bytes == 0 {
                        layout.row_bytes as usize
                    } else {
                        sub.row_pitch_bytes as usize
                    };
                    for row in 0..layout.rows {
                        let src_start = row as usize * src_pitch;
                        let src = &sub.bytes[src_start..src_start + layout.row_bytes as usize];
                        let dst = base
                            + layout.offset_bytes
                            + u64::from(row) * u64::from(layout.row_pitch_bytes);
                        allocator.write(alloc_id, dst, src)?;
                    }
                }
                self.emit(state, |w| w.resource_dirty_range(handle, 0, total))?;
                note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
            }
            Backing::Host(shadow) => {
                for (index, sub) in data.iter().enumerate() {
                    let layout = layouts[index];
                    let src_pitch = if sub.row_pitch_bytes == 0 {
                        layout.row_bytes as usize
                    } else {
                        sub.row_pitch_bytes as usize
                    };
                    let mut staging = vec![
                        0u8;
                        usize::try_from(layout.size_bytes).map_err(|_| {
                            UmdError::OutOfMemory("subresource exceeds the address space")
                        })?
                    ];
                    for row in 0..layout.rows {
                        let src_start = row as usize * src_pitch;
                        let dst_start = row as usize * layout.row_pitch_bytes as usize;
                        staging[dst_start..dst_start + layout.row_bytes as usize]
                            .copy_from_slice(&sub.bytes[src_start..src_start + layout.row_bytes as usize]);
                    }
                    if !shadow.is_empty() {
                        let dst_start = layout.offset_bytes as usize;
                        shadow[dst_start..dst_start + staging.len()].copy_from_slice(&staging);
                    }
                    self.emit(state, |w| {
                        w.upload_resource(handle, layout.offset_bytes, &staging)
                    })?;
                }
            }
        }
        Ok(())
    }

    fn emit_current_render_targets(&self, state: &mut DeviceState) -> Result<()> {
        let count = state.bound_color_count as usize;
        let mut colors = [0u32; cmd::AEROGPU_MAX_RENDER_TARGETS];
        for (slot, bound) in state.bound_render_targets.iter().enumerate().take(count) {
            if let Some(rtv) = bound {
                if let Some(view) = state.rtvs.get(rtv.0) {
                    colors[slot] = view.wire_handle;
                }
            }
        }
        let depth = state
            .bound_depth_stencil
            .and_then(|dsv| state.dsvs.get(dsv.0))
            .map_or(0, |view| view.wire_handle);
        self.emit(state, |w| w.set_render_targets(&colors[..count], depth))
    }

    /// Unbinds every render or depth target whose memory aliases `key`,
    /// demotes the freed-up write references, and re-emits the target packet
    /// once so the host sees the eviction before the next read.
    fn evict_aliased_targets(&self, state: &mut DeviceState, key: &AliasKey) -> Result<()> {
        let mut evicted_allocs: Vec<u32> = Vec::new();
        let mut any = false;
        for slot in 0..cmd::AEROGPU_MAX_RENDER_TARGETS {
            let Some(rtv) = state.bound_render_targets[slot] else {
                continue;
            };
            let Some((target_key, alloc)) = rtv_identity(state, rtv) else {
                continue;
            };
            if keys_alias(key, &target_key) {
                state.bound_render_targets[slot] = None;
                if alloc != 0 {
                    evicted_allocs.push(alloc);
                }
                any = true;
                debug!(slot, "unbinding render target aliased by a shader resource");
            }
        }
        if let Some(dsv) = state.bound_depth_stencil {
            if let Some((target_key, alloc)) = dsv_identity(state, dsv) {
                if keys_alias(key, &target_key) {
                    state.bound_depth_stencil = None;
                    if alloc != 0 {
                        evicted_allocs.push(alloc);
                    }
                    any = true;
                    debug!("unbinding depth-stencil aliased by a shader resource");
                }
            }
        }
        if !any {
            return Ok(());
        }
        for alloc_id in evicted_allocs {
            demote_alloc_ref_if_unwritten(state, alloc_id);
        }
        self.emit_current_render_targets(state)
    }

    fn new_view(
        &self,
        state: &mut DeviceState,
        resource: ResourceId,
        texture_handle: u32,
        window: &ViewWindow,
    ) -> Result<ViewRecord> {
        let (wire_handle, owns_wire_handle) = if self.options.texture_views {
            let handle = self.adapter.alloc_handle();
            self.emit(state, |w| {
                w.create_texture_view(
                    handle,
                    texture_handle,
                    window.format as u32,
                    window.base_mip,
                    window.mip_count,
                    window.base_layer,
                    window.layer_count,
                )
            })?;
            (handle, true)
        } else {
            (texture_handle, false)
        };
        Ok(ViewRecord {
            wire_handle,
            owns_wire_handle,
            resource,
            format: window.format,
            base_mip_level: window.base_mip,
            mip_level_count: window.mip_count,
            base_array_layer: window.base_layer,
            array_layer_count: window.layer_count,
        })
    }

    fn destroy_view_handle(&self, state: &mut DeviceState, view: &ViewRecord) {
        if !view.owns_wire_handle {
            return;
        }
        if let Err(err) = self.emit(state, |w| w.destroy_texture_view(view.wire_handle)) {
            warn!(handle = view.wire_handle, %err, "destroy packet dropped");
        }
    }
}

impl Device {
    // Resources.

    pub fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<ResourceId> {
        validate_buffer_desc(desc, initial_data.is_some())?;
        if let Some(data) = initial_data {
            if data.len() as u64 != desc.size_bytes {
                return Err(UmdError::InvalidArg(
                    "initial data length does not match the buffer size",
                ));
            }
        }

        let mut state = self.lock();
        let wire_handle = self.adapter.alloc_handle();
        let backing = self.allocate_backing(desc.usage, desc.size_bytes, 0, desc.cpu_access)?;
        let (alloc_id, wire_offset) = match &backing {
            Backing::Guest {
                alloc_id,
                offset_bytes,
                ..
            } => (*alloc_id, *offset_bytes as u32),
            Backing::Host(_) => (0, 0),
        };
        let usage_flags = wire_usage_flags(desc.bind_flags);
        self.emit(&mut state, |w| {
            w.create_buffer(wire_handle, usage_flags, desc.size_bytes, alloc_id, wire_offset)
        })?;

        let mut record = ResourceRecord {
            wire_handle,
            kind: ResourceKind::Buffer {
                size_bytes: desc.size_bytes,
            },
            usage: desc.usage,
            bind_flags: desc.bind_flags,
            cpu_access: desc.cpu_access,
            backing,
            share_token: 0,
            mapped: BTreeMap::new(),
        };
        if let Some(data) = initial_data {
            self.push_initial_buffer_data(&mut state, &mut record, data)?;
        }
        debug!(
            handle = wire_handle,
            size = desc.size_bytes,
            guest_backed = alloc_id != 0,
            "created buffer"
        );
        Ok(ResourceId(state.resources.insert(record)))
    }

    pub fn create_texture2d(
        &self,
        desc: &Texture2dDesc,
        initial_data: &[SubresourceData<'_>],
    ) -> Result<ResourceId> {
        validate_texture2d_desc(desc, !initial_data.is_empty())?;
        let row_pitch = host_row_pitch(desc.format, desc.width);

        let mut state = self.lock();
        let wire_handle = self.adapter.alloc_handle();
        let mut record = ResourceRecord {
            wire_handle,
            kind: ResourceKind::Texture2d {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
                row_pitch_bytes: row_pitch,
            },
            usage: desc.usage,
            bind_flags: desc.bind_flags,
            cpu_access: desc.cpu_access,
            backing: Backing::Host(Vec::new()),
            share_token: 0,
            mapped: BTreeMap::new(),
        };
        let total = record.total_size_bytes();
        record.backing = self.allocate_backing(desc.usage, total, row_pitch, desc.cpu_access)?;
        let (alloc_id, wire_offset) = match &record.backing {
            Backing::Guest {
                alloc_id,
                offset_bytes,
                ..
            } => (*alloc_id, *offset_bytes as u32),
            Backing::Host(_) => (0, 0),
        };
        let usage_flags = wire_usage_flags(desc.bind_flags);
        self.emit(&mut state, |w| {
            w.create_texture2d(
                wire_handle,
                usage_flags,
                desc.format as u32,
                desc.width,
                desc.height,
                desc.mip_levels,
                desc.array_layers,
                row_pitch,
                alloc_id,
                wire_offset,
            )
        })?;
        if !initial_data.is_empty() {
            self.push_initial_texture_data(&mut state, &mut record, initial_data)?;
        }
        debug!(
            handle = wire_handle,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            guest_backed = alloc_id != 0,
            "created texture"
        );
        Ok(ResourceId(state.resources.insert(record)))
    }

    /// Destroying twice, or destroying a stale id, is a no-op.
    pub fn destroy_resource(&self, id: ResourceId) {
        let mut state = self.lock();
        let Some(record) = state.resources.remove(id.0) else {
            return;
        };
        if let Err(err) = self.emit(&mut state, |w| w.destroy_resource(record.wire_handle)) {
            warn!(handle = record.wire_handle, %err, "destroy packet dropped");
        }
        if let Backing::Guest { alloc_id, .. } = record.backing {
            state.pending_frees.push(alloc_id);
        }
    }

    // Copies.

    pub fn copy_buffer_region(
        &self,
        dst: ResourceId,
        src: ResourceId,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<()> {
        let mut state = self.lock();
        let (dst_handle, dst_alloc, writeback) = {
            let record = state
                .resources
                .get(dst.0)
                .ok_or(UmdError::InvalidArg("stale destination resource"))?;
            let ResourceKind::Buffer { size_bytes: total } = record.kind else {
                return Err(UmdError::InvalidArg("buffer copy requires buffers"));
            };
            let end = dst_offset_bytes
                .checked_add(size_bytes)
                .ok_or(UmdError::InvalidArg("copy range overflow"))?;
            if end > total {
                return Err(UmdError::InvalidArg("copy exceeds the destination buffer"));
            }
            let writeback = record.backing_alloc_id() != 0
                && record.cpu_access.contains(CpuAccessFlags::READ);
            (record.wire_handle, record.backing_alloc_id(), writeback)
        };
        let src_handle = {
            let record = state
                .resources
                .get(src.0)
                .ok_or(UmdError::InvalidArg("stale source resource"))?;
            let ResourceKind::Buffer { size_bytes: total } = record.kind else {
                return Err(UmdError::InvalidArg("buffer copy requires buffers"));
            };
            let end = src_offset_bytes
                .checked_add(size_bytes)
                .ok_or(UmdError::InvalidArg("copy range overflow"))?;
            if end > total {
                return Err(UmdError::InvalidArg("copy exceeds the source buffer"));
            }
            record.wire_handle
        };
        if size_bytes == 0 {
            return Ok(());
        }
        let flags = if writeback {
            cmd::AEROGPU_COPY_FLAG_WRITEBACK_DST
        } else {
            0
        };
        self.emit(&mut state, |w| {
            w.copy_buffer(
                dst_handle,
                src_handle,
                dst_offset_bytes,
                src_offset_bytes,
                size_bytes,
                flags,
            )
        })?;
        if writeback {
            note_alloc_ref(&mut state.alloc_refs, dst_alloc, true);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture_region(
        &self,
        dst: ResourceId,
        dst_subresource: u32,
        dst_x: u32,
        dst_y: u32,
        src: ResourceId,
        src_subresource: u32,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let dst_part = texture_copy_part(&state, dst, dst_subresource, "stale destination resource")?;
        let src_part = texture_copy_part(&state, src, src_subresource, "stale source resource")?;
        for (x, y, part) in [(dst_x, dst_y, &dst_part), (src_x, src_y, &src_part)] {
            let x_end = x
                .checked_add(width)
                .ok_or(UmdError::InvalidArg("copy region overflow"))?;
            let y_end = y
                .checked_add(height)
                .ok_or(UmdError::InvalidArg("copy region overflow"))?;
            if x_end > part.width || y_end > part.height {
                return Err(UmdError::InvalidArg("copy region exceeds the subresource"));
            }
        }
        if width == 0 || height == 0 {
            return Ok(());
        }
        let flags = if dst_part.readback {
            cmd::AEROGPU_COPY_FLAG_WRITEBACK_DST
        } else {
            0
        };
        self.emit(&mut state, |w| {
            w.copy_texture2d(
                dst_part.handle,
                src_part.handle,
                dst_part.mip,
                dst_part.layer,
                src_part.mip,
                src_part.layer,
                dst_x,
                dst_y,
                src_x,
                src_y,
                width,
                height,
                flags,
            )
        })?;
        if dst_part.readback {
            note_alloc_ref(&mut state.alloc_refs, dst_part.alloc_id, true);
        }
        Ok(())
    }

    /// Whole-resource copy between two resources of identical shape.
    pub fn copy_resource(&self, dst: ResourceId, src: ResourceId) -> Result<()> {
        let mut state = self.lock();
        enum Plan {
            Buffer { size_bytes: u64 },
            Texture { mip_levels: u32, array_layers: u32, width: u32, height: u32 },
        }
        let (dst_handle, dst_alloc, writeback, plan) = {
            let dst_record = state
                .resources
                .get(dst.0)
                .ok_or(UmdError::InvalidArg("stale destination resource"))?;
            let src_record = state
                .resources
                .get(src.0)
                .ok_or(UmdError::InvalidArg("stale source resource"))?;
            let plan = match (&dst_record.kind, &src_record.kind) {
                (
                    ResourceKind::Buffer { size_bytes: dst_size },
                    ResourceKind::Buffer { size_bytes: src_size },
                ) => {
                    if dst_size != src_size {
                        return Err(UmdError::InvalidArg("copy between differently sized buffers"));
                    }
                    Plan::Buffer { size_bytes: *dst_size }
                }
                (
                    ResourceKind::Texture2d {
                        width: dw,
                        height: dh,
                        format: df,
                        mip_levels: dm,
                        array_layers: da,
                        ..
                    },
                    ResourceKind::Texture2d {
                        width: sw,
                        height: sh,
                        format: sf,
                        mip_levels: sm,
                        array_layers: sa,
                        ..
                    },
                ) => {
                    if dw != sw || dh != sh || df != sf || dm != sm || da != sa {
                        return Err(UmdError::InvalidArg(
                            "copy between differently shaped textures",
                        ));
                    }
                    Plan::Texture {
                        mip_levels: *dm,
                        array_layers: *da,
                        width: *dw,
                        height: *dh,
                    }
                }
                _ => return Err(UmdError::InvalidArg("copy between unlike resource kinds")),
            };
            let writeback = dst_record.backing_alloc_id() != 0
                && dst_record.cpu_access.contains(CpuAccessFlags::READ);
            (
                dst_record.wire_handle,
                dst_record.backing_alloc_id(),
                writeback,
                plan,
            )
        };
        let src_handle = state
            .resources
            .get(src.0)
            .ok_or(UmdError::InvalidArg("stale source resource"))?
            .wire_handle;
        let flags = if writeback {
            cmd::AEROGPU_COPY_FLAG_WRITEBACK_DST
        } else {
            0
        };
        match plan {
            Plan::Buffer { size_bytes } => {
                if size_bytes > 0 {
                    self.emit(&mut state, |w| {
                        w.copy_buffer(dst_handle, src_handle, 0, 0, size_bytes, flags)
                    })?;
                }
            }
            Plan::Texture {
                mip_levels,
                array_layers,
                width,
                height,
            } => {
                for layer in 0..array_layers {
                    for mip in 0..mip_levels {
                        let mip_w = crate::resource::mip_extent(width, mip);
                        let mip_h = crate::resource::mip_extent(height, mip);
                        self.emit(&mut state, |w| {
                            w.copy_texture2d(
                                dst_handle, src_handle, mip, layer, mip, layer, 0, 0, 0, 0, mip_w,
                                mip_h, flags,
                            )
                        })?;
                    }
                }
            }
        }
        if writeback {
            note_alloc_ref(&mut state.alloc_refs, dst_alloc, true);
        }
        Ok(())
    }

    // Views.

    pub fn create_render_target_view(
        &self,
        resource: ResourceId,
        desc: Option<&TextureViewDesc>,
    ) -> Result<RtvId> {
        let mut state = self.lock();
        let (texture_handle, window) = {
            let record = state
                .resources
                .get(resource.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            if !record.bind_flags.contains(BindFlags::RENDER_TARGET) {
                return Err(UmdError::InvalidArg(
                    "resource lacks the render-target bind flag",
                ));
            }
            (record.wire_handle, view_window(record, desc, false)?)
        };
        let view = self.new_view(&mut state, resource, texture_handle, &window)?;
        Ok(RtvId(state.rtvs.insert(view)))
    }

    pub fn create_depth_stencil_view(
        &self,
        resource: ResourceId,
        desc: Option<&TextureViewDesc>,
    ) -> Result<DsvId> {
        let mut state = self.lock();
        let (texture_handle, window) = {
            let record = state
                .resources
                .get(resource.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            if !record.bind_flags.contains(BindFlags::DEPTH_STENCIL) {
                return Err(UmdError::InvalidArg(
                    "resource lacks the depth-stencil bind flag",
                ));
            }
            let window = view_window(record, desc, false)?;
            if !window.format.is_depth() {
                return Err(UmdError::InvalidArg(
                    "depth-stencil views require a depth format",
                ));
            }
            (record.wire_handle, window)
        };
        let view = self.new_view(&mut state, resource, texture_handle, &window)?;
        Ok(DsvId(state.dsvs.insert(view)))
    }

    pub fn create_shader_resource_view(
        &self,
        resource: ResourceId,
        desc: Option<&TextureViewDesc>,
    ) -> Result<SrvId> {
        let mut state = self.lock();
        let (texture_handle, window) = {
            let record = state
                .resources
                .get(resource.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            if !record.bind_flags.contains(BindFlags::SHADER_RESOURCE) {
                return Err(UmdError::InvalidArg(
                    "resource lacks the shader-resource bind flag",
                ));
            }
            (record.wire_handle, view_window(record, desc, true)?)
        };
        let view = self.new_view(&mut state, resource, texture_handle, &window)?;
        Ok(SrvId(state.srvs.insert(view)))
    }

    pub fn destroy_render_target_view(&self, id: RtvId) {
        let mut state = self.lock();
        let Some(view) = state.rtvs.remove(id.0) else {
            return;
        };
        for slot in state.bound_render_targets.iter_mut() {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        self.destroy_view_handle(&mut state, &view);
    }

    pub fn destroy_depth_stencil_view(&self, id: DsvId) {
        let mut state = self.lock();
        let Some(view) = state.dsvs.remove(id.0) else {
            return;
        };
        if state.bound_depth_stencil == Some(id) {
            state.bound_depth_stencil = None;
        }
        self.destroy_view_handle(&mut state, &view);
    }

    pub fn destroy_shader_resource_view(&self, id: SrvId) {
        let mut state = self.lock();
        let Some(view) = state.srvs.remove(id.0) else {
            return;
        };
        state.bound_srvs.retain(|_, bound| *bound != id);
        self.destroy_view_handle(&mut state, &view);
    }

    // Shaders and input layouts.

    pub fn create_shader(&self, stage: Stage, bytecode: &[u8]) -> Result<ShaderId> {
        if bytecode.is_empty() {
            return Err(UmdError::InvalidArg("empty shader bytecode"));
        }
        let mut state = self.lock();
        let handle = self.adapter.alloc_handle();
        let (wire_stage, stage_ex) = stage.to_wire();
        self.emit(&mut state, |w| {
            w.create_shader_dxbc(handle, wire_stage, stage_ex, bytecode)
        })?;
        debug!(handle, ?stage, bytes = bytecode.len(), "created shader");
        Ok(ShaderId(state.shaders.insert(ShaderRecord {
            wire_handle: handle,
            stage,
        })))
    }

    pub fn destroy_shader(&self, id: ShaderId) {
        let mut state = self.lock();
        let Some(record) = state.shaders.remove(id.0) else {
            return;
        };
        if let Err(err) = self.emit(&mut state, |w| w.destroy_shader(record.wire_handle)) {
            warn!(handle = record.wire_handle, %err, "destroy packet dropped");
        }
    }

    pub fn bind_shaders(
        &self,
        vs: Option<ShaderId>,
        ps: Option<ShaderId>,
        cs: Option<ShaderId>,
    ) -> Result<()> {
        let mut state = self.lock();
        let vs = shader_handle(&state, vs, Stage::Vertex)?;
        let ps = shader_handle(&state, ps, Stage::Pixel)?;
        let cs = shader_handle(&state, cs, Stage::Compute)?;
        self.emit(&mut state, |w| w.bind_shaders(vs, ps, cs))
    }

    /// Binds the full six-stage set. The writer falls back to the legacy
    /// packet when no geometry, hull, or domain shader is present.
    pub fn bind_shaders_ext(
        &self,
        vs: Option<ShaderId>,
        ps: Option<ShaderId>,
        cs: Option<ShaderId>,
        gs: Option<ShaderId>,
        hs: Option<ShaderId>,
        ds: Option<ShaderId>,
    ) -> Result<()> {
        let mut state = self.lock();
        let vs = shader_handle(&state, vs, Stage::Vertex)?;
        let ps = shader_handle(&state, ps, Stage::Pixel)?;
        let cs = shader_handle(&state, cs, Stage::Compute)?;
        let gs = shader_handle(&state, gs, Stage::Geometry)?;
        let hs = shader_handle(&state, hs, Stage::Hull)?;
        let ds = shader_handle(&state, ds, Stage::Domain)?;
        self.emit(&mut state, |w| w.bind_shaders_ext(vs, ps, cs, gs, hs, ds))
    }

    pub fn create_input_layout(&self, elements: &[InputElementDesc<'_>]) -> Result<InputLayoutId> {
        let blob = build_layout_blob(elements)?;
        let mut state = self.lock();
        let handle = self.adapter.alloc_handle();
        self.emit(&mut state, |w| w.create_input_layout(handle, &blob))?;
        Ok(InputLayoutId(state.input_layouts.insert(handle)))
    }

    pub fn destroy_input_layout(&self, id: InputLayoutId) {
        let mut state = self.lock();
        let Some(handle) = state.input_layouts.remove(id.0) else {
            return;
        };
        if let Err(err) = self.emit(&mut state, |w| w.destroy_input_layout(handle)) {
            warn!(handle, %err, "destroy packet dropped");
        }
    }

    pub fn set_input_layout(&self, layout: Option<InputLayoutId>) -> Result<()> {
        let mut state = self.lock();
        let handle = match layout {
            None => 0,
            Some(id) => *state
                .input_layouts
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale input layout id"))?,
        };
        self.emit(&mut state, |w| w.set_input_layout(handle))
    }

    // Samplers.

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId> {
        if AerogpuSamplerFilter::from_u32(desc.filter).is_none() {
            return Err(UmdError::InvalidArg("sampler filter out of range"));
        }
        for mode in [desc.address_u, desc.address_v, desc.address_w] {
            if AerogpuSamplerAddressMode::from_u32(mode).is_none() {
                return Err(UmdError::InvalidArg("sampler address mode out of range"));
            }
        }
        let mut state = self.lock();
        let handle = self.adapter.alloc_handle();
        self.emit(&mut state, |w| {
            w.create_sampler(handle, desc.filter, desc.address_u, desc.address_v, desc.address_w)
        })?;
        Ok(SamplerId(state.samplers.insert(handle)))
    }

    pub fn destroy_sampler(&self, id: SamplerId) {
        let mut state = self.lock();
        let Some(handle) = state.samplers.remove(id.0) else {
            return;
        };
        if let Err(err) = self.emit(&mut state, |w| w.destroy_sampler(handle)) {
            warn!(handle, %err, "destroy packet dropped");
        }
    }

    pub fn set_samplers(
        &self,
        stage: Stage,
        start_slot: u32,
        samplers: &[Option<SamplerId>],
    ) -> Result<()> {
        if samplers.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let mut handles = Vec::with_capacity(samplers.len());
        for sampler in samplers {
            handles.push(match sampler {
                None => 0,
                Some(id) => *state
                    .samplers
                    .get(id.0)
                    .ok_or(UmdError::InvalidArg("stale sampler id"))?,
            });
        }
        let (wire_stage, stage_ex) = stage.to_wire();
        self.emit(&mut state, |w| {
            w.set_samplers(wire_stage, stage_ex, start_slot, &handles)
        })
    }

    // Pipeline state objects.

    pub fn create_blend_state(&self, desc: &BlendStateDesc) -> Result<BlendStateId> {
        validate_blend_desc(desc)?;
        let mut state = self.lock();
        Ok(BlendStateId(state.blend_states.insert(*desc)))
    }

    pub fn destroy_blend_state(&self, id: BlendStateId) {
        self.lock().blend_states.remove(id.0);
    }

    /// Encodes the blend packet. `None` restores defaults; the constant and
    /// mask override the packet fields when given.
    pub fn set_blend_state(
        &self,
        id: Option<BlendStateId>,
        blend_constant: Option<[f32; 4]>,
        sample_mask: Option<u32>,
    ) -> Result<()> {
        let mut state = self.lock();
        let constant = blend_constant.unwrap_or([1.0, 1.0, 1.0, 1.0]);
        let mask = sample_mask.unwrap_or(self.options.default_sample_mask);
        let wire = match id {
            None => default_blend_state(constant, mask),
            Some(id) => {
                let desc = state
                    .blend_states
                    .get(id.0)
                    .ok_or(UmdError::InvalidArg("stale blend state id"))?;
                convert_blend_desc(desc, constant, mask)?
            }
        };
        self.emit(&mut state, |w| w.set_blend_state(&wire))
    }

    pub fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilStateDesc,
    ) -> Result<DepthStencilStateId> {
        validate_depth_stencil_desc(desc)?;
        let mut state = self.lock();
        Ok(DepthStencilStateId(state.depth_stencil_states.insert(*desc)))
    }

    pub fn destroy_depth_stencil_state(&self, id: DepthStencilStateId) {
        self.lock().depth_stencil_states.remove(id.0);
    }

    pub fn set_depth_stencil_state(&self, id: Option<DepthStencilStateId>) -> Result<()> {
        let mut state = self.lock();
        let wire = match id {
            None => default_depth_stencil_state(),
            Some(id) => {
                let desc = state
                    .depth_stencil_states
                    .get(id.0)
                    .ok_or(UmdError::InvalidArg("stale depth-stencil state id"))?;
                convert_depth_stencil_desc(desc)
            }
        };
        self.emit(&mut state, |w| w.set_depth_stencil_state(&wire))
    }

    pub fn create_rasterizer_state(&self, desc: &RasterizerStateDesc) -> Result<RasterizerStateId> {
        validate_rasterizer_desc(desc)?;
        let mut state = self.lock();
        Ok(RasterizerStateId(state.rasterizer_states.insert(*desc)))
    }

    pub fn destroy_rasterizer_state(&self, id: RasterizerStateId) {
        self.lock().rasterizer_states.remove(id.0);
    }

    pub fn set_rasterizer_state(&self, id: Option<RasterizerStateId>) -> Result<()> {
        let mut state = self.lock();
        let wire = match id {
            None => default_rasterizer_state(),
            Some(id) => {
                let desc = state
                    .rasterizer_states
                    .get(id.0)
                    .ok_or(UmdError::InvalidArg("stale rasterizer state id"))?;
                convert_rasterizer_desc(desc)
            }
        };
        self.emit(&mut state, |w| w.set_rasterizer_state(&wire))
    }

    // Output merger and shader resources.

    /// Binds color and depth targets. Slots past the wire limit are dropped.
    /// Any shader resource still bound over the same memory is unbound first
    /// so the host never samples an active target.
    pub fn set_render_targets(
        &self,
        colors: &[Option<RtvId>],
        depth_stencil: Option<DsvId>,
    ) -> Result<()> {
        let mut state = self.lock();
        let colors = if colors.len() > cmd::AEROGPU_MAX_RENDER_TARGETS {
            debug!(
                requested = colors.len(),
                "dropping render targets beyond the wire limit"
            );
            &colors[..cmd::AEROGPU_MAX_RENDER_TARGETS]
        } else {
            colors
        };

        let mut new_keys: Vec<AliasKey> = Vec::new();
        let mut wire_colors = [0u32; cmd::AEROGPU_MAX_RENDER_TARGETS];
        let mut write_allocs: Vec<u32> = Vec::new();
        for (slot, bound) in colors.iter().enumerate() {
            let Some(id) = bound else { continue };
            let view = state
                .rtvs
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale render target view"))?;
            let record = state
                .resources
                .get(view.resource.0)
                .ok_or(UmdError::InvalidArg("render target resource was destroyed"))?;
            new_keys.push(record.alias_key(view.resource));
            wire_colors[slot] = view.wire_handle;
            let alloc = record.backing_alloc_id();
            if alloc != 0 {
                write_allocs.push(alloc);
            }
        }
        let mut wire_depth = 0u32;
        if let Some(id) = depth_stencil {
            let view = state
                .dsvs
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale depth-stencil view"))?;
            let record = state
                .resources
                .get(view.resource.0)
                .ok_or(UmdError::InvalidArg("depth-stencil resource was destroyed"))?;
            new_keys.push(record.alias_key(view.resource));
            wire_depth = view.wire_handle;
            let alloc = record.backing_alloc_id();
            if alloc != 0 {
                write_allocs.push(alloc);
            }
        }

        let mut evictions: Vec<(Stage, u32)> = Vec::new();
        for (&(stage, slot), srv) in state.bound_srvs.iter() {
            let Some(view) = state.srvs.get(srv.0) else { continue };
            let Some(record) = state.resources.get(view.resource.0) else {
                continue;
            };
            let key = record.alias_key(view.resource);
            if new_keys.iter().any(|target| keys_alias(target, &key)) {
                evictions.push((stage, slot));
            }
        }
        for &(stage, slot) in &evictions {
            let (wire_stage, stage_ex) = stage.to_wire();
            debug!(?stage, slot, "unbinding shader resource aliased by a render target");
            self.emit(&mut state, |w| w.set_texture(wire_stage, stage_ex, slot, 0))?;
            state.bound_srvs.remove(&(stage, slot));
        }

        state.bound_render_targets = [None; cmd::AEROGPU_MAX_RENDER_TARGETS];
        for (slot, bound) in colors.iter().enumerate() {
            state.bound_render_targets[slot] = *bound;
        }
        state.bound_color_count = colors.len() as u32;
        state.bound_depth_stencil = depth_stencil;

        let count = colors.len();
        self.emit(&mut state, |w| {
            w.set_render_targets(&wire_colors[..count], wire_depth)
        })?;
        for alloc_id in write_allocs {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, true);
        }
        Ok(())
    }

    /// Binds texture shader resources starting at `start_slot`. Binding over
    /// memory a render or depth target still writes evicts that target first
    /// and re-encodes the target packet.
    pub fn set_shader_resources(
        &self,
        stage: Stage,
        start_slot: u32,
        views: &[Option<SrvId>],
    ) -> Result<()> {
        if views.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(views.len())
            .map_err(|_| UmdError::InvalidArg("too many shader resource slots"))?;
        start_slot
            .checked_add(len)
            .ok_or(UmdError::InvalidArg("shader resource slot range overflow"))?;

        let mut state = self.lock();
        let mut resolved: Vec<Option<(SrvId, u32, AliasKey, u32)>> =
            Vec::with_capacity(views.len());
        for bound in views {
            match bound {
                None => resolved.push(None),
                Some(id) => {
                    let view = state
                        .srvs
                        .get(id.0)
                        .ok_or(UmdError::InvalidArg("stale shader resource view"))?;
                    let record = state
                        .resources
                        .get(view.resource.0)
                        .ok_or(UmdError::InvalidArg("shader resource was destroyed"))?;
                    resolved.push(Some((
                        *id,
                        view.wire_handle,
                        record.alias_key(view.resource),
                        record.backing_alloc_id(),
                    )));
                }
            }
        }

        let (wire_stage, stage_ex) = stage.to_wire();
        for (offset, entry) in resolved.iter().enumerate() {
            let slot = start_slot + offset as u32;
            match entry {
                None => {
                    self.emit(&mut state, |w| w.set_texture(wire_stage, stage_ex, slot, 0))?;
                    state.bound_srvs.remove(&(stage, slot));
                }
                Some((id, wire_handle, key, alloc_id)) => {
                    self.evict_aliased_targets(&mut state, key)?;
                    let handle = *wire_handle;
                    self.emit(&mut state, |w| {
                        w.set_texture(wire_stage, stage_ex, slot, handle)
                    })?;
                    state.bound_srvs.insert((stage, slot), *id);
                    if *alloc_id != 0 {
                        note_alloc_ref(&mut state.alloc_refs, *alloc_id, false);
                    }
                }
            }
        }
        Ok(())
    }

    // Input assembler and buffer binding tables.

    pub fn set_vertex_buffers(
        &self,
        start_slot: u32,
        bindings: &[VertexBufferBinding],
    ) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let mut wire = Vec::with_capacity(bindings.len());
        let mut read_allocs: Vec<u32> = Vec::new();
        for binding in bindings {
            let (handle, alloc) = buffer_binding_handle(
                &state,
                binding.buffer,
                BindFlags::VERTEX_BUFFER,
                "vertex buffer binding requires the vertex-buffer bind flag",
            )?;
            if alloc != 0 {
                read_allocs.push(alloc);
            }
            wire.push(cmd::AerogpuVertexBufferBinding {
                buffer: handle,
                stride_bytes: binding.stride_bytes,
                offset_bytes: binding.offset_bytes,
                reserved0: 0,
            });
        }
        self.emit(&mut state, |w| w.set_vertex_buffers(start_slot, &wire))?;
        for alloc_id in read_allocs {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
        }
        Ok(())
    }

    pub fn set_index_buffer(
        &self,
        buffer: Option<ResourceId>,
        format: AerogpuIndexFormat,
        offset_bytes: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let (handle, alloc) = buffer_binding_handle(
            &state,
            buffer,
            BindFlags::INDEX_BUFFER,
            "index buffer binding requires the index-buffer bind flag",
        )?;
        self.emit(&mut state, |w| w.set_index_buffer(handle, format, offset_bytes))?;
        if alloc != 0 {
            note_alloc_ref(&mut state.alloc_refs, alloc, false);
        }
        Ok(())
    }

    pub fn set_constant_buffers(
        &self,
        stage: Stage,
        start_slot: u32,
        bindings: &[ConstantBufferBinding],
    ) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let mut wire = Vec::with_capacity(bindings.len());
        let mut read_allocs: Vec<u32> = Vec::new();
        for binding in bindings {
            let (handle, alloc) = buffer_binding_handle(
                &state,
                binding.buffer,
                BindFlags::CONSTANT_BUFFER,
                "constant buffer binding requires the constant-buffer bind flag",
            )?;
            if alloc != 0 {
                read_allocs.push(alloc);
            }
            wire.push(cmd::AerogpuConstantBufferBinding {
                buffer: handle,
                offset_bytes: binding.offset_bytes,
                size_bytes: binding.size_bytes,
                reserved0: 0,
            });
        }
        let (wire_stage, stage_ex) = stage.to_wire();
        self.emit(&mut state, |w| {
            w.set_constant_buffers(wire_stage, stage_ex, start_slot, &wire)
        })?;
        for alloc_id in read_allocs {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
        }
        Ok(())
    }

    pub fn set_shader_resource_buffers(
        &self,
        stage: Stage,
        start_slot: u32,
        bindings: &[ShaderResourceBufferBinding],
    ) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let mut wire = Vec::with_capacity(bindings.len());
        let mut read_allocs: Vec<u32> = Vec::new();
        for binding in bindings {
            let (handle, alloc) = buffer_binding_handle(
                &state,
                binding.buffer,
                BindFlags::SHADER_RESOURCE,
                "shader resource binding requires the shader-resource bind flag",
            )?;
            if alloc != 0 {
                read_allocs.push(alloc);
            }
            wire.push(cmd::AerogpuShaderResourceBufferBinding {
                buffer: handle,
                offset_bytes: binding.offset_bytes,
                size_bytes: binding.size_bytes,
                reserved0: 0,
            });
        }
        let (wire_stage, stage_ex) = stage.to_wire();
        self.emit(&mut state, |w| {
            w.set_shader_resource_buffers(wire_stage, stage_ex, start_slot, &wire)
        })?;
        for alloc_id in read_allocs {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
        }
        Ok(())
    }

    pub fn set_unordered_access_buffers(
        &self,
        stage: Stage,
        start_slot: u32,
        bindings: &[UnorderedAccessBufferBinding],
    ) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let mut wire = Vec::with_capacity(bindings.len());
        let mut write_allocs: Vec<u32> = Vec::new();
        for binding in bindings {
            let (handle, alloc) = buffer_binding_handle(
                &state,
                binding.buffer,
                BindFlags::UNORDERED_ACCESS,
                "unordered access binding requires the unordered-access bind flag",
            )?;
            if alloc != 0 {
                write_allocs.push(alloc);
            }
            wire.push(cmd::AerogpuUnorderedAccessBufferBinding {
                buffer: handle,
                offset_bytes: binding.offset_bytes,
                size_bytes: binding.size_bytes,
                initial_count: binding
                    .initial_count
                    .unwrap_or(cmd::AEROGPU_UAV_INITIAL_COUNT_KEEP),
            });
        }
        let (wire_stage, stage_ex) = stage.to_wire();
        self.emit(&mut state, |w| {
            w.set_unordered_access_buffers(wire_stage, stage_ex, start_slot, &wire)
        })?;
        for alloc_id in write_allocs {
            note_alloc_ref(&mut state.alloc_refs, alloc_id, true);
        }
        Ok(())
    }

    pub fn set_primitive_topology(&self, topology: u32) -> Result<()> {
        if !cmd::aerogpu_topology_is_valid(topology) {
            return Err(UmdError::InvalidArg("unknown primitive topology"));
        }
        let mut state = self.lock();
        self.emit(&mut state, |w| w.set_primitive_topology(topology))
    }

    // Viewport and scissor.

    /// Collapses the array to the single wire slot. Zero-extent entries are
    /// ignored; an all-disabled array encodes the disabled sentinel. With
    /// several distinct active viewports the first is encoded and the call
    /// reports the divergence after the packet is out.
    pub fn set_viewports(&self, viewports: &[Viewport]) -> Result<()> {
        let mut state = self.lock();
        match collapse_viewports(viewports) {
            Collapse::Disabled => self.emit_viewport(&mut state, &Viewport::DISABLED),
            Collapse::Single(vp) => self.emit_viewport(&mut state, &vp),
            Collapse::Divergent(vp) => {
                self.emit_viewport(&mut state, &vp)?;
                Err(UmdError::NotImpl("multiple distinct viewports"))
            }
        }
    }

    fn emit_viewport(&self, state: &mut DeviceState, vp: &Viewport) -> Result<()> {
        self.emit(state, |w| {
            w.set_viewport(vp.x, vp.y, vp.width, vp.height, vp.min_depth, vp.max_depth)
        })
    }

    pub fn set_scissors(&self, rects: &[ScissorRect]) -> Result<()> {
        let mut state = self.lock();
        match collapse_scissors(rects) {
            Collapse::Disabled => self.emit_scissor(&mut state, &ScissorRect::DISABLED),
            Collapse::Single(rect) => self.emit_scissor(&mut state, &rect),
            Collapse::Divergent(rect) => {
                self.emit_scissor(&mut state, &rect)?;
                Err(UmdError::NotImpl("multiple distinct scissor rects"))
            }
        }
    }

    fn emit_scissor(&self, state: &mut DeviceState, rect: &ScissorRect) -> Result<()> {
        let (x, y, width, height) = scissor_packet_params(rect);
        self.emit(state, |w| w.set_scissor(x, y, width, height))
    }

    // Draws, dispatch, clears.

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        self.emit(&mut state, |w| {
            w.draw(vertex_count, instance_count, first_vertex, first_instance)
        })
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        self.emit(&mut state, |w| {
            w.draw_indexed(index_count, instance_count, first_index, base_vertex, first_instance)
        })
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> Result<()> {
        let mut state = self.lock();
        self.emit(&mut state, |w| {
            w.dispatch(group_count_x, group_count_y, group_count_z, AerogpuShaderStageEx::None)
        })
    }

    /// Clears the bound targets. An empty flag set encodes nothing.
    pub fn clear(
        &self,
        flags: ClearFlags,
        color_rgba: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> Result<()> {
        if flags.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        self.emit(&mut state, |w| w.clear(flags.bits(), color_rgba, depth, stencil))
    }

    pub fn debug_marker(&self, marker: &str) -> Result<()> {
        let mut state = self.lock();
        self.emit(&mut state, |w| w.debug_marker(marker))
    }

    // Presentation and submission.

    pub fn present(&self, scanout_id: u32, flags: u32) -> Result<u64> {
        let mut state = self.lock();
        self.emit(&mut state, |w| w.present(scanout_id, flags))?;
        self.submit_locked(&mut state)
    }

    pub fn present_ex(
        &self,
        scanout_id: u32,
        flags: u32,
        d3d9_present_flags: u32,
    ) -> Result<u64> {
        let mut state = self.lock();
        self.emit(&mut state, |w| {
            w.present_ex(scanout_id, flags, d3d9_present_flags)
        })?;
        self.submit_locked(&mut state)
    }

    /// Submits whatever has been recorded. Returns the fence of the last
    /// submission when nothing is pending.
    pub fn flush(&self) -> Result<u64> {
        let mut state = self.lock();
        if state.writer.is_empty() {
            return Ok(state.last_submitted_fence);
        }
        self.emit(&mut state, |w| w.flush())?;
        self.submit_locked(&mut state)
    }

    pub fn last_submitted_fence(&self) -> u64 {
        self.lock().last_submitted_fence
    }

    pub fn last_seen_completed_fence(&self) -> u64 {
        self.lock().last_seen_completed
    }

    // Shared surfaces.

    /// Marks a texture shareable and returns its token. Repeated calls on
    /// the same resource return the same token.
    pub fn export_shared_surface(&self, id: ResourceId) -> Result<u64> {
        let mut state = self.lock();
        let (wire_handle, existing) = {
            let record = state
                .resources
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            if record.is_buffer() {
                return Err(UmdError::InvalidArg("only textures can be shared"));
            }
            (record.wire_handle, record.share_token)
        };
        if existing != 0 {
            return Ok(existing);
        }
        let token = self.adapter.alloc_share_token();
        self.emit(&mut state, |w| w.export_shared_surface(wire_handle, token))?;
        if let Some(record) = state.resources.get_mut(id.0) {
            record.share_token = token;
        }
        Ok(token)
    }

    /// Opens a surface another device exported. The descriptor must repeat
    /// the exporter's shape; the host validates it against the real surface.
    pub fn import_shared_surface(&self, share_token: u64, desc: &Texture2dDesc) -> Result<ResourceId> {
        if share_token == 0 {
            return Err(UmdError::InvalidArg("share token must be nonzero"));
        }
        if !desc.cpu_access.is_empty() {
            return Err(UmdError::InvalidArg("imported surfaces cannot be cpu mapped"));
        }
        validate_texture2d_desc(desc, false)?;
        let row_pitch = host_row_pitch(desc.format, desc.width);

        let mut state = self.lock();
        let wire_handle = self.adapter.alloc_handle();
        self.emit(&mut state, |w| w.import_shared_surface(wire_handle, share_token))?;
        let record = ResourceRecord {
            wire_handle,
            kind: ResourceKind::Texture2d {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
                row_pitch_bytes: row_pitch,
            },
            usage: desc.usage,
            bind_flags: desc.bind_flags,
            cpu_access: desc.cpu_access,
            backing: Backing::Host(Vec::new()),
            share_token,
            mapped: BTreeMap::new(),
        };
        debug!(handle = wire_handle, share_token, "imported shared surface");
        Ok(ResourceId(state.resources.insert(record)))
    }

    /// Drops the share token. Local records keep working; only the
    /// cross-device name dies.
    pub fn release_shared_surface(&self, share_token: u64) -> Result<()> {
        if share_token == 0 {
            return Err(UmdError::InvalidArg("share token must be nonzero"));
        }
        let mut state = self.lock();
        self.emit(&mut state, |w| w.release_shared_surface(share_token))?;
        for (_, record) in state.resources.iter_mut() {
            if record.share_token == share_token {
                record.share_token = 0;
            }
        }
        Ok(())
    }
}
