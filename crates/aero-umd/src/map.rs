//! CPU access to resource memory: map, mapped-range IO, unmap, and the
//! no-map update path.
//!
//! The policy follows the backing store picked at creation. Guest-backed
//! resources are written in place and flushed with one RESOURCE_DIRTY_RANGE
//! per unmap; host-backed resources buffer writes in the shadow copy and
//! flush with UPLOAD_RESOURCE. Read maps serialize against the GPU by
//! submitting the open stream and waiting on its fence first.

use crate::backend::FenceStatus;
use crate::device::{note_alloc_ref, Device, DeviceState};
use crate::error::{Result, UmdError};
use crate::resource::{
    mip_extent, Backing, CpuAccessFlags, MapFlags, MapType, ResourceBox, ResourceId, ResourceKind,
    ResourceRecord, Usage,
};

/// Geometry of a mapped subresource.
#[derive(Clone, Copy, Debug)]
pub struct MapInfo {
    /// Stride between mapped rows. Zero for buffers.
    pub row_pitch_bytes: u32,
    /// Mappable span of the subresource in bytes.
    pub size_bytes: u64,
}

fn check_map_access(record: &ResourceRecord, map_type: MapType) -> Result<()> {
    let access = record.cpu_access;
    match map_type {
        MapType::Read => {
            if !access.contains(CpuAccessFlags::READ) {
                return Err(UmdError::InvalidArg("resource is not cpu readable"));
            }
        }
        MapType::Write => {
            if !access.contains(CpuAccessFlags::WRITE) {
                return Err(UmdError::InvalidArg("resource is not cpu writable"));
            }
        }
        MapType::ReadWrite => {
            if !access.contains(CpuAccessFlags::READ | CpuAccessFlags::WRITE) {
                return Err(UmdError::InvalidArg(
                    "resource is not cpu readable and writable",
                ));
            }
        }
        MapType::WriteDiscard | MapType::WriteNoOverwrite => {
            if record.usage != Usage::Dynamic {
                return Err(UmdError::InvalidArg(
                    "discard and no-overwrite maps require dynamic usage",
                ));
            }
            if !access.contains(CpuAccessFlags::WRITE) {
                return Err(UmdError::InvalidArg("resource is not cpu writable"));
            }
        }
    }
    Ok(())
}

/// `(offset, size, row pitch)` of one subresource within the resource's
/// backing store.
fn subresource_span(record: &ResourceRecord, subresource: u32) -> Result<(u64, u64, u32)> {
    match record.kind {
        ResourceKind::Buffer { size_bytes } => {
            if subresource != 0 {
                return Err(UmdError::InvalidArg("buffers have a single subresource"));
            }
            Ok((0, size_bytes, 0))
        }
        ResourceKind::Texture2d { .. } => {
            let layout = record
                .subresource_layout(subresource)
                .ok_or(UmdError::InvalidArg("subresource out of range"))?;
            Ok((
                layout.offset_bytes,
                layout.size_bytes,
                layout.row_pitch_bytes,
            ))
        }
    }
}

impl Device {
    /// Opens a subresource for CPU access.
    ///
    /// Read-seeing map types (`Read`, `Write`, `ReadWrite`) submit the open
    /// stream and wait for its fence, so the bytes observed afterwards are
    /// post-GPU. `WriteDiscard` and `WriteNoOverwrite` skip the wait; the
    /// caller promises not to touch bytes the GPU may still read. With
    /// `DO_NOT_WAIT` a busy fence fails the call with [`UmdError::StillDrawing`]
    /// instead of blocking.
    pub fn map(
        &self,
        id: ResourceId,
        subresource: u32,
        map_type: MapType,
        flags: u32,
    ) -> Result<MapInfo> {
        let flags =
            MapFlags::from_bits(flags).ok_or(UmdError::InvalidArg("unknown map flags"))?;
        let mut state = self.lock();
        let (_, size_bytes, row_pitch_bytes) = {
            let record = state
                .resources
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            check_map_access(record, map_type)?;
            if record.mapped.contains_key(&subresource) {
                return Err(UmdError::InvalidArg("subresource is already mapped"));
            }
            subresource_span(record, subresource)?
        };

        if matches!(map_type, MapType::Read | MapType::Write | MapType::ReadWrite) {
            self.submit_locked(&mut state)?;
            let fence = state.last_submitted_fence;
            if state.last_seen_completed < fence {
                let timeout_ms = if flags.contains(MapFlags::DO_NOT_WAIT) {
                    0
                } else {
                    u32::MAX
                };
                match self.adapter.submitter.wait_fence(fence, timeout_ms) {
                    FenceStatus::Signaled => state.last_seen_completed = fence,
                    FenceStatus::Pending => {
                        return if flags.contains(MapFlags::DO_NOT_WAIT) {
                            Err(UmdError::StillDrawing)
                        } else {
                            Err(UmdError::Submission("fence wait timed out".into()))
                        };
                    }
                }
            }
        }

        let record = state
            .resources
            .get_mut(id.0)
            .ok_or(UmdError::InvalidArg("stale resource id"))?;
        record.mapped.insert(subresource, map_type);
        Ok(MapInfo {
            row_pitch_bytes,
            size_bytes,
        })
    }

    /// Writes into a mapped subresource at `offset_bytes` from its span.
    pub fn write_mapped(
        &self,
        id: ResourceId,
        subresource: u32,
        offset_bytes: u64,
        bytes: &[u8],
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let record = state
            .resources
            .get_mut(id.0)
            .ok_or(UmdError::InvalidArg("stale resource id"))?;
        let map_type = *record
            .mapped
            .get(&subresource)
            .ok_or(UmdError::InvalidArg("subresource is not mapped"))?;
        if map_type == MapType::Read {
            return Err(UmdError::InvalidArg("mapping is read-only"));
        }
        let (span_offset, span_size, _) = subresource_span(record, subresource)?;
        let end = offset_bytes
            .checked_add(bytes.len() as u64)
            .ok_or(UmdError::InvalidArg("write range overflow"))?;
        if end > span_size {
            return Err(UmdError::InvalidArg("write exceeds the mapped span"));
        }
        match &mut record.backing {
            Backing::Guest {
                alloc_id,
                offset_bytes: base,
                ..
            } => {
                let alloc_id = *alloc_id;
                let dst = *base + span_offset + offset_bytes;
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                allocator.write(alloc_id, dst, bytes)?;
            }
            Backing::Host(shadow) => {
                let start = usize::try_from(span_offset + offset_bytes)
                    .map_err(|_| UmdError::InvalidArg("write offset out of range"))?;
                let end = start
                    .checked_add(bytes.len())
                    .filter(|&e| e <= shadow.len())
                    .ok_or(UmdError::Backing("host shadow smaller than the write".into()))?;
                shadow[start..end].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Reads from a mapped subresource at `offset_bytes` from its span.
    pub fn read_mapped(
        &self,
        id: ResourceId,
        subresource: u32,
        offset_bytes: u64,
        out: &mut [u8],
    ) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let state = self.lock();
        let record = state
            .resources
            .get(id.0)
            .ok_or(UmdError::InvalidArg("stale resource id"))?;
        let map_type = *record
            .mapped
            .get(&subresource)
            .ok_or(UmdError::InvalidArg("subresource is not mapped"))?;
        if !matches!(map_type, MapType::Read | MapType::ReadWrite) {
            return Err(UmdError::InvalidArg("mapping is write-only"));
        }
        let (span_offset, span_size, _) = subresource_span(record, subresource)?;
        let end = offset_bytes
            .checked_add(out.len() as u64)
            .ok_or(UmdError::InvalidArg("read range overflow"))?;
        if end > span_size {
            return Err(UmdError::InvalidArg("read exceeds the mapped span"));
        }
        match &record.backing {
            Backing::Guest {
                alloc_id,
                offset_bytes: base,
                ..
            } => {
                let src = *base + span_offset + offset_bytes;
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                allocator.read(*alloc_id, src, out)?;
            }
            Backing::Host(shadow) => {
                let start = usize::try_from(span_offset + offset_bytes)
                    .map_err(|_| UmdError::InvalidArg("read offset out of range"))?;
                let end = start
                    .checked_add(out.len())
                    .filter(|&e| e <= shadow.len())
                    .ok_or(UmdError::Backing("host shadow smaller than the read".into()))?;
                out.copy_from_slice(&shadow[start..end]);
            }
        }
        Ok(())
    }

    /// Closes a mapping. Write-seeing maps flush the whole subresource span:
    /// one UPLOAD_RESOURCE for host-backed resources, one
    /// RESOURCE_DIRTY_RANGE for guest-backed ones. Read-only maps emit
    /// nothing. Unmapping something that is not mapped fails and changes no
    /// state.
    pub fn unmap(&self, id: ResourceId, subresource: u32) -> Result<()> {
        let mut state = self.lock();
        enum Flush {
            None,
            Upload { offset: u64, payload: Vec<u8> },
            Dirty { offset: u64, size: u64, alloc_id: u32 },
        }
        let (handle, flush) = {
            let record = state
                .resources
                .get_mut(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            let Some(map_type) = record.mapped.remove(&subresource) else {
                return Err(UmdError::InvalidArg("subresource is not mapped"));
            };
            if map_type == MapType::Read {
                (record.wire_handle, Flush::None)
            } else {
                let (span_offset, span_size, _) = subresource_span(record, subresource)?;
                match &record.backing {
                    Backing::Guest { alloc_id, .. } => (
                        record.wire_handle,
                        Flush::Dirty {
                            offset: span_offset,
                            size: span_size,
                            alloc_id: *alloc_id,
                        },
                    ),
                    Backing::Host(shadow) => {
                        let start = usize::try_from(span_offset)
                            .map_err(|_| UmdError::InvalidArg("subresource offset out of range"))?;
                        let len = usize::try_from(span_size)
                            .map_err(|_| UmdError::InvalidArg("subresource size out of range"))?;
                        let end = start
                            .checked_add(len)
                            .filter(|&e| e <= shadow.len())
                            .ok_or(UmdError::Backing(
                                "host shadow smaller than the subresource".into(),
                            ))?;
                        (
                            record.wire_handle,
                            Flush::Upload {
                                offset: span_offset,
                                payload: shadow[start..end].to_vec(),
                            },
                        )
                    }
                }
            }
        };
        match flush {
            Flush::None => Ok(()),
            Flush::Upload { offset, payload } => {
                self.emit(&mut state, |w| w.upload_resource(handle, offset, &payload))
            }
            Flush::Dirty {
                offset,
                size,
                alloc_id,
            } => {
                self.emit(&mut state, |w| w.resource_dirty_range(handle, offset, size))?;
                note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
                Ok(())
            }
        }
    }

    /// Pushes bytes into an unmapped subresource, optionally restricted to a
    /// box. For buffers the box is the `left..right` byte range; for textures
    /// it selects texels and must be block aligned for compressed formats.
    /// `src_row_pitch_bytes == 0` means rows are packed.
    pub fn update_subresource(
        &self,
        id: ResourceId,
        subresource: u32,
        dst_box: Option<&ResourceBox>,
        bytes: &[u8],
        src_row_pitch_bytes: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let is_buffer = {
            let record = state
                .resources
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            if record.usage == Usage::Immutable {
                return Err(UmdError::InvalidArg("immutable resources cannot be updated"));
            }
            if record.mapped.contains_key(&subresource) {
                return Err(UmdError::InvalidArg("subresource is mapped"));
            }
            record.is_buffer()
        };
        if is_buffer {
            self.update_buffer_bytes(&mut state, id, subresource, dst_box, bytes)
        } else {
            self.update_texture_rows(&mut state, id, subresource, dst_box, bytes, src_row_pitch_bytes)
        }
    }

    fn update_buffer_bytes(
        &self,
        state: &mut DeviceState,
        id: ResourceId,
        subresource: u32,
        dst_box: Option<&ResourceBox>,
        bytes: &[u8],
    ) -> Result<()> {
        let (handle, offset, guest) = {
            let record = state
                .resources
                .get_mut(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            let ResourceKind::Buffer { size_bytes } = record.kind else {
                return Err(UmdError::InvalidArg("not a buffer"));
            };
            if subresource != 0 {
                return Err(UmdError::InvalidArg("buffers have a single subresource"));
            }
            let (offset, len) = match dst_box {
                None => (0u64, size_bytes),
                Some(b) => {
                    if b.right < b.left || u64::from(b.right) > size_bytes {
                        return Err(UmdError::InvalidArg("update box exceeds the buffer"));
                    }
                    (u64::from(b.left), u64::from(b.right - b.left))
                }
            };
            if bytes.len() as u64 != len {
                return Err(UmdError::InvalidArg("update bytes must fill the box"));
            }
            if len == 0 {
                return Ok(());
            }
            let guest = match &mut record.backing {
                Backing::Guest {
                    alloc_id,
                    offset_bytes,
                    ..
                } => Some((*alloc_id, *offset_bytes)),
                Backing::Host(shadow) => {
                    if !shadow.is_empty() {
                        let start = usize::try_from(offset)
                            .map_err(|_| UmdError::InvalidArg("update offset out of range"))?;
                        let end = start
                            .checked_add(bytes.len())
                            .filter(|&e| e <= shadow.len())
                            .ok_or(UmdError::Backing(
                                "host shadow smaller than the update".into(),
                            ))?;
                        shadow[start..end].copy_from_slice(bytes);
                    }
                    None
                }
            };
            (record.wire_handle, offset, guest)
        };
        match guest {
            Some((alloc_id, base)) => {
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                allocator.write(alloc_id, base + offset, bytes)?;
                self.emit(state, |w| {
                    w.resource_dirty_range(handle, offset, bytes.len() as u64)
                })?;
                note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
            }
            None => {
                self.emit(state, |w| w.upload_resource(handle, offset, bytes))?;
            }
        }
        Ok(())
    }

    fn update_texture_rows(
        &self,
        state: &mut DeviceState,
        id: ResourceId,
        subresource: u32,
        dst_box: Option<&ResourceBox>,
        bytes: &[u8],
        src_row_pitch_bytes: u32,
    ) -> Result<()> {
        struct RowPlan {
            sub_offset: u64,
            pitch: u64,
            x_off: u64,
            y0: u64,
            rows: usize,
            row_bytes: usize,
            src_pitch: usize,
        }
        let (handle, guest, plan) = {
            let record = state
                .resources
                .get(id.0)
                .ok_or(UmdError::InvalidArg("stale resource id"))?;
            let ResourceKind::Texture2d {
                width,
                height,
                format,
                mip_levels,
                ..
            } = record.kind
            else {
                return Err(UmdError::InvalidArg("not a texture"));
            };
            let layout = record
                .subresource_layout(subresource)
                .ok_or(UmdError::InvalidArg("subresource out of range"))?;
            let mip = subresource % mip_levels;
            let mip_w = mip_extent(width, mip);
            let mip_h = mip_extent(height, mip);
            let (block_w, block_h, block_bytes) = format.block_layout();
            let boxed = match dst_box {
                None => ResourceBox {
                    left: 0,
                    top: 0,
                    right: mip_w,
                    bottom: mip_h,
                },
                Some(b) => *b,
            };
            if boxed.right < boxed.left
                || boxed.bottom < boxed.top
                || boxed.right > mip_w
                || boxed.bottom > mip_h
            {
                return Err(UmdError::InvalidArg("update box exceeds the subresource"));
            }
            if boxed.left % block_w != 0
                || boxed.top % block_h != 0
                || (boxed.right % block_w != 0 && boxed.right != mip_w)
                || (boxed.bottom % block_h != 0 && boxed.bottom != mip_h)
            {
                return Err(UmdError::InvalidArg("update box must be block aligned"));
            }
            if boxed.right == boxed.left || boxed.bottom == boxed.top {
                return Ok(());
            }
            let x0 = boxed.left / block_w;
            let x1 = (boxed.right + block_w - 1) / block_w;
            let y0 = boxed.top / block_h;
            let y1 = (boxed.bottom + block_h - 1) / block_h;
            let row_bytes = ((x1 - x0) * block_bytes) as usize;
            let rows = (y1 - y0) as usize;
            let src_pitch = if src_row_pitch_bytes == 0 {
                row_bytes
            } else {
                src_row_pitch_bytes as usize
            };
            if src_pitch < row_bytes {
                return Err(UmdError::InvalidArg("source row pitch too small"));
            }
            let needed = (rows - 1) * src_pitch + row_bytes;
            if bytes.len() < needed {
                return Err(UmdError::InvalidArg("update bytes too small for the box"));
            }
            let guest = match &record.backing {
                Backing::Guest {
                    alloc_id,
                    offset_bytes,
                    ..
                } => Some((*alloc_id, *offset_bytes)),
                Backing::Host(_) => None,
            };
            (
                record.wire_handle,
                guest,
                RowPlan {
                    sub_offset: layout.offset_bytes,
                    pitch: u64::from(layout.row_pitch_bytes),
                    x_off: u64::from(x0 * block_bytes),
                    y0: u64::from(y0),
                    rows,
                    row_bytes,
                    src_pitch,
                },
            )
        };

        match guest {
            Some((alloc_id, base)) => {
                let allocator = self
                    .allocator()
                    .ok_or(UmdError::Backing("guest backing without an allocator".into()))?;
                for r in 0..plan.rows {
                    let src_start = r * plan.src_pitch;
                    let row = &bytes[src_start..src_start + plan.row_bytes];
                    let dst = base + plan.sub_offset + (plan.y0 + r as u64) * plan.pitch + plan.x_off;
                    allocator.write(alloc_id, dst, row)?;
                }
                let dirty_start = plan.sub_offset + plan.y0 * plan.pitch + plan.x_off;
                let dirty_end = plan.sub_offset
                    + (plan.y0 + plan.rows as u64 - 1) * plan.pitch
                    + plan.x_off
                    + plan.row_bytes as u64;
                self.emit(state, |w| {
                    w.resource_dirty_range(handle, dirty_start, dirty_end - dirty_start)
                })?;
                note_alloc_ref(&mut state.alloc_refs, alloc_id, false);
            }
            None => {
                {
                    let record = state
                        .resources
                        .get_mut(id.0)
                        .ok_or(UmdError::InvalidArg("stale resource id"))?;
                    if let Backing::Host(shadow) = &mut record.backing {
                        if !shadow.is_empty() {
                            for r in 0..plan.rows {
                                let src_start = r * plan.src_pitch;
                                let dst = plan.sub_offset
                                    + (plan.y0 + r as u64) * plan.pitch
                                    + plan.x_off;
                                let dst_start = usize::try_from(dst).map_err(|_| {
                                    UmdError::InvalidArg("update offset out of range")
                                })?;
                                shadow[dst_start..dst_start + plan.row_bytes].copy_from_slice(
                                    &bytes[src_start..src_start + plan.row_bytes],
                                );
                            }
                        }
                    }
                }
                // Contiguous boxes collapse to one packet.
                if plan.x_off == 0
                    && plan.row_bytes as u64 == plan.pitch
                    && plan.src_pitch == plan.row_bytes
                {
                    let len = plan.rows * plan.row_bytes;
                    let offset = plan.sub_offset + plan.y0 * plan.pitch;
                    self.emit(state, |w| w.upload_resource(handle, offset, &bytes[..len]))?;
                } else {
                    for r in 0..plan.rows {
                        let src_start = r * plan.src_pitch;
                        let row = &bytes[src_start..src_start + plan.row_bytes];
                        let offset =
                            plan.sub_offset + (plan.y0 + r as u64) * plan.pitch + plan.x_off;
                        self.emit(state, |w| w.upload_resource(handle, offset, row))?;
                    }
                }
            }
        }
        Ok(())
    }
}
