//! Safe command stream builder for AeroGPU.
//!
//! Emits canonical command streams (correct packet `size_bytes`,
//! padding/alignment, stream header bookkeeping) for the guest driver's
//! encoding path as well as tests and host-side tooling.
//!
//! Two backing modes share one surface: a growable buffer that can always
//! accept another packet, and a capacity-bounded buffer that refuses appends
//! which would overflow a fixed transport window. Both produce byte-identical
//! streams for the same call sequence.

use core::mem::{offset_of, size_of};

use super::aerogpu_cmd::{
    AerogpuBlendState, AerogpuCmdBindShaders, AerogpuCmdClear, AerogpuCmdCopyBuffer, AerogpuCmdCopyTexture2d,
    AerogpuCmdCreateBuffer, AerogpuCmdCreateInputLayout, AerogpuCmdCreateSampler, AerogpuCmdCreateShaderDxbc,
    AerogpuCmdCreateTexture2d, AerogpuCmdCreateTextureView, AerogpuCmdDestroyInputLayout, AerogpuCmdDestroyResource,
    AerogpuCmdDestroySampler, AerogpuCmdDestroyShader, AerogpuCmdDestroyTextureView, AerogpuCmdDispatch,
    AerogpuCmdDraw, AerogpuCmdDrawIndexed, AerogpuCmdExportSharedSurface, AerogpuCmdFlush, AerogpuCmdHdr,
    AerogpuCmdImportSharedSurface, AerogpuCmdOpcode, AerogpuCmdPresent, AerogpuCmdPresentEx,
    AerogpuCmdReleaseSharedSurface, AerogpuCmdResourceDirtyRange, AerogpuCmdSetBlendState,
    AerogpuCmdSetConstantBuffers, AerogpuCmdSetDepthStencilState, AerogpuCmdSetIndexBuffer, AerogpuCmdSetInputLayout,
    AerogpuCmdSetPrimitiveTopology, AerogpuCmdSetRasterizerState, AerogpuCmdSetRenderState, AerogpuCmdSetRenderTargets,
    AerogpuCmdSetSamplerState, AerogpuCmdSetSamplers, AerogpuCmdSetScissor, AerogpuCmdSetShaderConstantsB,
    AerogpuCmdSetShaderConstantsF, AerogpuCmdSetShaderConstantsI, AerogpuCmdSetShaderResourceBuffers,
    AerogpuCmdSetTexture, AerogpuCmdSetUnorderedAccessBuffers, AerogpuCmdSetVertexBuffers, AerogpuCmdSetViewport,
    AerogpuCmdStreamFlags, AerogpuCmdStreamHeader, AerogpuCmdUploadResource, AerogpuConstantBufferBinding,
    AerogpuDepthStencilState, AerogpuHandle, AerogpuIndexFormat, AerogpuRasterizerState,
    AerogpuShaderResourceBufferBinding, AerogpuShaderStage, AerogpuShaderStageEx, AerogpuUnorderedAccessBufferBinding,
    AerogpuVertexBufferBinding, AEROGPU_CMD_STREAM_MAGIC, AEROGPU_MAX_RENDER_TARGETS,
};
use super::aerogpu_pci::AEROGPU_ABI_VERSION_U32;

fn align_up(v: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    (v + (a - 1)) & !(a - 1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCmdWriterError {
    /// Bounded-mode append would exceed the fixed capacity. Nothing was
    /// written; the stream remains valid as-is.
    StreamFull {
        needed_bytes: usize,
        capacity_bytes: usize,
    },
    /// Packet size arithmetic overflowed the wire's `u32` size field.
    PacketTooLarge { unpadded_size_bytes: usize },
}

impl core::fmt::Display for AerogpuCmdWriterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::StreamFull {
                needed_bytes,
                capacity_bytes,
            } => write!(
                f,
                "command stream full: need {needed_bytes} bytes, capacity {capacity_bytes}"
            ),
            Self::PacketTooLarge { unpadded_size_bytes } => {
                write!(f, "command packet too large for u32 size_bytes: {unpadded_size_bytes}")
            }
        }
    }
}

impl std::error::Error for AerogpuCmdWriterError {}

/// Backing storage for the stream bytes.
///
/// `Growable` reallocates as needed. `Bounded` owns a single allocation made
/// up front and never grows it, so encoding can target a fixed-size transport
/// window without copies; appends that do not fit fail with `StreamFull`.
#[derive(Debug, Clone)]
enum StreamBuf {
    Growable(Vec<u8>),
    Bounded { buf: Vec<u8>, capacity: usize },
}

impl StreamBuf {
    fn bytes(&self) -> &Vec<u8> {
        match self {
            Self::Growable(buf) => buf,
            Self::Bounded { buf, .. } => buf,
        }
    }

    fn bytes_mut(&mut self) -> &mut Vec<u8> {
        match self {
            Self::Growable(buf) => buf,
            Self::Bounded { buf, .. } => buf,
        }
    }
}

/// Safe command stream builder over the AeroGPU wire layouts.
#[derive(Debug, Clone)]
pub struct AerogpuCmdWriter {
    buf: StreamBuf,
}

impl Default for AerogpuCmdWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AerogpuCmdWriter {
    /// Growable-mode writer; appends never fail with `StreamFull`.
    pub fn new() -> Self {
        let mut w = Self {
            buf: StreamBuf::Growable(Vec::new()),
        };
        w.reset();
        w
    }

    /// Bounded-mode writer with a fixed byte capacity (stream header
    /// included). `capacity_bytes` must fit the header and the `u32` stream
    /// size field.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        assert!(
            capacity_bytes >= AerogpuCmdStreamHeader::SIZE_BYTES,
            "capacity {capacity_bytes} cannot hold the stream header"
        );
        assert!(capacity_bytes <= u32::MAX as usize);
        let mut w = Self {
            buf: StreamBuf::Bounded {
                buf: Vec::with_capacity(capacity_bytes),
                capacity: capacity_bytes,
            },
        };
        w.reset();
        w
    }

    /// Bounded-mode writer reusing a caller-provided allocation; the vector's
    /// capacity becomes the stream capacity and its contents are discarded.
    pub fn bounded_in(mut storage: Vec<u8>) -> Self {
        storage.clear();
        let capacity = storage.capacity();
        assert!(
            capacity >= AerogpuCmdStreamHeader::SIZE_BYTES,
            "capacity {capacity} cannot hold the stream header"
        );
        assert!(capacity <= u32::MAX as usize);
        let mut w = Self {
            buf: StreamBuf::Bounded { buf: storage, capacity },
        };
        w.reset();
        w
    }

    pub fn reset(&mut self) {
        let buf = self.buf.bytes_mut();
        buf.clear();
        buf.resize(AerogpuCmdStreamHeader::SIZE_BYTES, 0);

        self.write_u32_at(0, AEROGPU_CMD_STREAM_MAGIC);
        self.write_u32_at(4, AEROGPU_ABI_VERSION_U32);
        self.write_u32_at(8, AerogpuCmdStreamHeader::SIZE_BYTES as u32);
        self.write_u32_at(12, AerogpuCmdStreamFlags::None as u32);
    }

    /// Write the final stream `size_bytes` and hand the buffer off.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.bytes().len();
        assert!(len <= u32::MAX as usize, "command stream too large for u32 size_bytes");
        self.write_u32_at(8, len as u32);
        match self.buf {
            StreamBuf::Growable(buf) => buf,
            StreamBuf::Bounded { buf, .. } => buf,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.bytes().len() <= AerogpuCmdStreamHeader::SIZE_BYTES
    }

    pub fn len_bytes(&self) -> usize {
        self.buf.bytes().len()
    }

    /// Fixed capacity in bounded mode, `None` in growable mode.
    pub fn capacity_bytes(&self) -> Option<usize> {
        match &self.buf {
            StreamBuf::Growable(_) => None,
            StreamBuf::Bounded { capacity, .. } => Some(*capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.bytes()
    }

    fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.buf.bytes_mut()[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_i32_at(&mut self, offset: usize, v: i32) {
        self.write_u32_at(offset, v as u32);
    }

    fn write_u8_at(&mut self, offset: usize, v: u8) {
        self.buf.bytes_mut()[offset] = v;
    }

    fn write_u64_at(&mut self, offset: usize, v: u64) {
        self.buf.bytes_mut()[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn write_bytes_at(&mut self, offset: usize, data: &[u8]) {
        self.buf.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Reserve a zeroed, 4-aligned packet and write its header. Returns the
    /// packet's base offset. In bounded mode nothing is written on failure.
    fn append_raw(&mut self, opcode: AerogpuCmdOpcode, cmd_size_bytes: usize) -> Result<usize, AerogpuCmdWriterError> {
        let aligned_size = align_up(cmd_size_bytes, 4);
        if aligned_size > u32::MAX as usize {
            return Err(AerogpuCmdWriterError::PacketTooLarge {
                unpadded_size_bytes: cmd_size_bytes,
            });
        }

        let offset = self.buf.bytes().len();
        let needed = offset
            .checked_add(aligned_size)
            .ok_or(AerogpuCmdWriterError::PacketTooLarge {
                unpadded_size_bytes: cmd_size_bytes,
            })?;
        if let StreamBuf::Bounded { capacity, .. } = &self.buf {
            if needed > *capacity {
                return Err(AerogpuCmdWriterError::StreamFull {
                    needed_bytes: needed,
                    capacity_bytes: *capacity,
                });
            }
        }

        self.buf.bytes_mut().resize(needed, 0);
        self.write_u32_at(offset, opcode as u32);
        self.write_u32_at(offset + 4, aligned_size as u32);
        Ok(offset)
    }

    pub fn nop(&mut self) -> Result<(), AerogpuCmdWriterError> {
        self.append_raw(AerogpuCmdOpcode::Nop, AerogpuCmdHdr::SIZE_BYTES)?;
        Ok(())
    }

    /// Marker text rides directly after the header as raw UTF-8, zero-padded
    /// to 4 bytes.
    pub fn debug_marker(&mut self, marker: &str) -> Result<(), AerogpuCmdWriterError> {
        let bytes = marker.as_bytes();
        let base = self.append_raw(AerogpuCmdOpcode::DebugMarker, AerogpuCmdHdr::SIZE_BYTES + bytes.len())?;
        self.write_bytes_at(base + AerogpuCmdHdr::SIZE_BYTES, bytes);
        Ok(())
    }

    pub fn create_buffer(
        &mut self,
        buffer_handle: AerogpuHandle,
        usage_flags: u32,
        size_bytes: u64,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CreateBuffer, size_of::<AerogpuCmdCreateBuffer>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateBuffer, buffer_handle), buffer_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateBuffer, usage_flags), usage_flags);
        self.write_u64_at(base + offset_of!(AerogpuCmdCreateBuffer, size_bytes), size_bytes);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateBuffer, backing_alloc_id), backing_alloc_id);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateBuffer, backing_offset_bytes),
            backing_offset_bytes,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_texture2d(
        &mut self,
        texture_handle: AerogpuHandle,
        usage_flags: u32,
        format: u32,
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        row_pitch_bytes: u32,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CreateTexture2d, size_of::<AerogpuCmdCreateTexture2d>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, texture_handle), texture_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, usage_flags), usage_flags);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, format), format);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, width), width);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, height), height);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, mip_levels), mip_levels);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, array_layers), array_layers);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, row_pitch_bytes), row_pitch_bytes);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTexture2d, backing_alloc_id), backing_alloc_id);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateTexture2d, backing_offset_bytes),
            backing_offset_bytes,
        );
        Ok(())
    }

    pub fn destroy_resource(&mut self, resource_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::DestroyResource, size_of::<AerogpuCmdDestroyResource>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDestroyResource, resource_handle), resource_handle);
        Ok(())
    }

    pub fn resource_dirty_range(
        &mut self,
        resource_handle: AerogpuHandle,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::ResourceDirtyRange,
            size_of::<AerogpuCmdResourceDirtyRange>(),
        )?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdResourceDirtyRange, resource_handle),
            resource_handle,
        );
        self.write_u64_at(base + offset_of!(AerogpuCmdResourceDirtyRange, offset_bytes), offset_bytes);
        self.write_u64_at(base + offset_of!(AerogpuCmdResourceDirtyRange, size_bytes), size_bytes);
        Ok(())
    }

    pub fn upload_resource(
        &mut self,
        resource_handle: AerogpuHandle,
        offset_bytes: u64,
        data: &[u8],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdUploadResource>() + data.len();
        let base = self.append_raw(AerogpuCmdOpcode::UploadResource, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdUploadResource, resource_handle), resource_handle);
        self.write_u64_at(base + offset_of!(AerogpuCmdUploadResource, offset_bytes), offset_bytes);
        self.write_u64_at(base + offset_of!(AerogpuCmdUploadResource, size_bytes), data.len() as u64);
        self.write_bytes_at(base + size_of::<AerogpuCmdUploadResource>(), data);
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        dst_buffer: AerogpuHandle,
        src_buffer: AerogpuHandle,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
        flags: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CopyBuffer, size_of::<AerogpuCmdCopyBuffer>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyBuffer, dst_buffer), dst_buffer);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyBuffer, src_buffer), src_buffer);
        self.write_u64_at(base + offset_of!(AerogpuCmdCopyBuffer, dst_offset_bytes), dst_offset_bytes);
        self.write_u64_at(base + offset_of!(AerogpuCmdCopyBuffer, src_offset_bytes), src_offset_bytes);
        self.write_u64_at(base + offset_of!(AerogpuCmdCopyBuffer, size_bytes), size_bytes);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyBuffer, flags), flags);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture2d(
        &mut self,
        dst_texture: AerogpuHandle,
        src_texture: AerogpuHandle,
        dst_mip_level: u32,
        dst_array_layer: u32,
        src_mip_level: u32,
        src_array_layer: u32,
        dst_x: u32,
        dst_y: u32,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
        flags: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CopyTexture2d, size_of::<AerogpuCmdCopyTexture2d>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, dst_texture), dst_texture);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, src_texture), src_texture);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, dst_mip_level), dst_mip_level);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, dst_array_layer), dst_array_layer);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, src_mip_level), src_mip_level);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, src_array_layer), src_array_layer);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, dst_x), dst_x);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, dst_y), dst_y);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, src_x), src_x);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, src_y), src_y);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, width), width);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, height), height);
        self.write_u32_at(base + offset_of!(AerogpuCmdCopyTexture2d, flags), flags);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_texture_view(
        &mut self,
        view_handle: AerogpuHandle,
        texture_handle: AerogpuHandle,
        format: u32,
        base_mip_level: u32,
        mip_level_count: u32,
        base_array_layer: u32,
        array_layer_count: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CreateTextureView, size_of::<AerogpuCmdCreateTextureView>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, view_handle), view_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, texture_handle), texture_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, format), format);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, base_mip_level), base_mip_level);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, mip_level_count), mip_level_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateTextureView, base_array_layer), base_array_layer);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateTextureView, array_layer_count),
            array_layer_count,
        );
        Ok(())
    }

    pub fn destroy_texture_view(&mut self, view_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::DestroyTextureView,
            size_of::<AerogpuCmdDestroyTextureView>(),
        )?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDestroyTextureView, view_handle), view_handle);
        Ok(())
    }

    pub fn create_shader_dxbc(
        &mut self,
        shader_handle: AerogpuHandle,
        stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        dxbc_bytes: &[u8],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdCreateShaderDxbc>() + dxbc_bytes.len();
        let base = self.append_raw(AerogpuCmdOpcode::CreateShaderDxbc, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateShaderDxbc, shader_handle), shader_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateShaderDxbc, stage), stage as u32);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateShaderDxbc, dxbc_size_bytes),
            dxbc_bytes.len() as u32,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateShaderDxbc, reserved0), stage_ex as u32);
        self.write_bytes_at(base + size_of::<AerogpuCmdCreateShaderDxbc>(), dxbc_bytes);
        Ok(())
    }

    pub fn destroy_shader(&mut self, shader_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::DestroyShader, size_of::<AerogpuCmdDestroyShader>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDestroyShader, shader_handle), shader_handle);
        Ok(())
    }

    /// Legacy 24-byte BIND_SHADERS (vs/ps/cs only).
    pub fn bind_shaders(
        &mut self,
        vs: AerogpuHandle,
        ps: AerogpuHandle,
        cs: AerogpuHandle,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::BindShaders, size_of::<AerogpuCmdBindShaders>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, vs), vs);
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, ps), ps);
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, cs), cs);
        Ok(())
    }

    /// BIND_SHADERS covering all six stages. Falls back to the legacy
    /// 24-byte packet when gs/hs/ds are all unbound; otherwise emits the
    /// 36-byte extended form with gs mirrored into `reserved0`.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_shaders_ext(
        &mut self,
        vs: AerogpuHandle,
        ps: AerogpuHandle,
        cs: AerogpuHandle,
        gs: AerogpuHandle,
        hs: AerogpuHandle,
        ds: AerogpuHandle,
    ) -> Result<(), AerogpuCmdWriterError> {
        if gs == 0 && hs == 0 && ds == 0 {
            return self.bind_shaders(vs, ps, cs);
        }

        let base = self.append_raw(AerogpuCmdOpcode::BindShaders, AerogpuCmdBindShaders::EXT_SIZE_BYTES)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, vs), vs);
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, ps), ps);
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, cs), cs);
        self.write_u32_at(base + offset_of!(AerogpuCmdBindShaders, reserved0), gs);
        self.write_u32_at(base + AerogpuCmdBindShaders::SIZE_BYTES, gs);
        self.write_u32_at(base + AerogpuCmdBindShaders::SIZE_BYTES + 4, hs);
        self.write_u32_at(base + AerogpuCmdBindShaders::SIZE_BYTES + 8, ds);
        Ok(())
    }

    pub fn create_input_layout(
        &mut self,
        input_layout_handle: AerogpuHandle,
        blob: &[u8],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdCreateInputLayout>() + blob.len();
        let base = self.append_raw(AerogpuCmdOpcode::CreateInputLayout, unpadded_size)?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateInputLayout, input_layout_handle),
            input_layout_handle,
        );
        self.write_u32_at(
            base + offset_of!(AerogpuCmdCreateInputLayout, blob_size_bytes),
            blob.len() as u32,
        );
        self.write_bytes_at(base + size_of::<AerogpuCmdCreateInputLayout>(), blob);
        Ok(())
    }

    pub fn destroy_input_layout(&mut self, input_layout_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::DestroyInputLayout,
            size_of::<AerogpuCmdDestroyInputLayout>(),
        )?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdDestroyInputLayout, input_layout_handle),
            input_layout_handle,
        );
        Ok(())
    }

    pub fn set_input_layout(&mut self, input_layout_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetInputLayout, size_of::<AerogpuCmdSetInputLayout>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetInputLayout, input_layout_handle), input_layout_handle);
        Ok(())
    }

    pub fn set_shader_constants_f(
        &mut self,
        stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_register: u32,
        data: &[f32],
    ) -> Result<(), AerogpuCmdWriterError> {
        assert_eq!(
            data.len() % 4,
            0,
            "SET_SHADER_CONSTANTS_F data must be float4-aligned (got {} floats)",
            data.len()
        );

        let vec4_count = (data.len() / 4) as u32;
        let unpadded_size = size_of::<AerogpuCmdSetShaderConstantsF>() + data.len() * 4;
        let base = self.append_raw(AerogpuCmdOpcode::SetShaderConstantsF, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsF, stage), stage as u32);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderConstantsF, start_register),
            start_register,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsF, vec4_count), vec4_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsF, reserved0), stage_ex as u32);

        let payload_base = base + size_of::<AerogpuCmdSetShaderConstantsF>();
        for (i, &v) in data.iter().enumerate() {
            self.write_u32_at(payload_base + i * 4, v.to_bits());
        }
        Ok(())
    }

    pub fn set_shader_constants_i(
        &mut self,
        stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_register: u32,
        data: &[i32],
    ) -> Result<(), AerogpuCmdWriterError> {
        assert_eq!(
            data.len() % 4,
            0,
            "SET_SHADER_CONSTANTS_I data must be int4-aligned (got {} ints)",
            data.len()
        );

        let vec4_count = (data.len() / 4) as u32;
        let unpadded_size = size_of::<AerogpuCmdSetShaderConstantsI>() + data.len() * 4;
        let base = self.append_raw(AerogpuCmdOpcode::SetShaderConstantsI, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsI, stage), stage as u32);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderConstantsI, start_register),
            start_register,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsI, vec4_count), vec4_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsI, reserved0), stage_ex as u32);

        let payload_base = base + size_of::<AerogpuCmdSetShaderConstantsI>();
        for (i, &v) in data.iter().enumerate() {
            self.write_i32_at(payload_base + i * 4, v);
        }
        Ok(())
    }

    /// Each bool register becomes a `vec4<u32>` with the scalar replicated
    /// across all four lanes, normalized to 0/1.
    pub fn set_shader_constants_b(
        &mut self,
        stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_register: u32,
        data: &[bool],
    ) -> Result<(), AerogpuCmdWriterError> {
        let bool_count = data.len() as u32;
        let unpadded_size = size_of::<AerogpuCmdSetShaderConstantsB>() + data.len() * 16;
        let base = self.append_raw(AerogpuCmdOpcode::SetShaderConstantsB, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsB, stage), stage as u32);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderConstantsB, start_register),
            start_register,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsB, bool_count), bool_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderConstantsB, reserved0), stage_ex as u32);

        let payload_base = base + size_of::<AerogpuCmdSetShaderConstantsB>();
        for (i, &v) in data.iter().enumerate() {
            let lanes = v as u32;
            for lane in 0..4 {
                self.write_u32_at(payload_base + i * 16 + lane * 4, lanes);
            }
        }
        Ok(())
    }

    pub fn set_blend_state(&mut self, state: &AerogpuBlendState) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetBlendState, size_of::<AerogpuCmdSetBlendState>())?;
        let state_base = base + offset_of!(AerogpuCmdSetBlendState, state);
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, enable), state.enable);
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, src_factor), state.src_factor);
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, dst_factor), state.dst_factor);
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, blend_op), state.blend_op);
        self.write_u8_at(
            state_base + offset_of!(AerogpuBlendState, color_write_mask),
            state.color_write_mask,
        );
        self.write_u32_at(
            state_base + offset_of!(AerogpuBlendState, src_factor_alpha),
            state.src_factor_alpha,
        );
        self.write_u32_at(
            state_base + offset_of!(AerogpuBlendState, dst_factor_alpha),
            state.dst_factor_alpha,
        );
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, blend_op_alpha), state.blend_op_alpha);
        let constant_base = state_base + offset_of!(AerogpuBlendState, blend_constant_rgba_f32);
        let blend_constant_rgba_f32 = state.blend_constant_rgba_f32;
        for (i, &bits) in blend_constant_rgba_f32.iter().enumerate() {
            self.write_u32_at(constant_base + i * 4, bits);
        }
        self.write_u32_at(state_base + offset_of!(AerogpuBlendState, sample_mask), state.sample_mask);
        Ok(())
    }

    pub fn set_depth_stencil_state(&mut self, state: &AerogpuDepthStencilState) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::SetDepthStencilState,
            size_of::<AerogpuCmdSetDepthStencilState>(),
        )?;
        let state_base = base + offset_of!(AerogpuCmdSetDepthStencilState, state);
        self.write_u32_at(
            state_base + offset_of!(AerogpuDepthStencilState, depth_enable),
            state.depth_enable,
        );
        self.write_u32_at(
            state_base + offset_of!(AerogpuDepthStencilState, depth_write_enable),
            state.depth_write_enable,
        );
        self.write_u32_at(state_base + offset_of!(AerogpuDepthStencilState, depth_func), state.depth_func);
        self.write_u32_at(
            state_base + offset_of!(AerogpuDepthStencilState, stencil_enable),
            state.stencil_enable,
        );
        self.write_u8_at(
            state_base + offset_of!(AerogpuDepthStencilState, stencil_read_mask),
            state.stencil_read_mask,
        );
        self.write_u8_at(
            state_base + offset_of!(AerogpuDepthStencilState, stencil_write_mask),
            state.stencil_write_mask,
        );
        Ok(())
    }

    pub fn set_rasterizer_state(&mut self, state: &AerogpuRasterizerState) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::SetRasterizerState,
            size_of::<AerogpuCmdSetRasterizerState>(),
        )?;
        let state_base = base + offset_of!(AerogpuCmdSetRasterizerState, state);
        self.write_u32_at(state_base + offset_of!(AerogpuRasterizerState, fill_mode), state.fill_mode);
        self.write_u32_at(state_base + offset_of!(AerogpuRasterizerState, cull_mode), state.cull_mode);
        self.write_u32_at(state_base + offset_of!(AerogpuRasterizerState, front_ccw), state.front_ccw);
        self.write_u32_at(
            state_base + offset_of!(AerogpuRasterizerState, scissor_enable),
            state.scissor_enable,
        );
        self.write_i32_at(state_base + offset_of!(AerogpuRasterizerState, depth_bias), state.depth_bias);
        self.write_u32_at(state_base + offset_of!(AerogpuRasterizerState, flags), state.flags);
        Ok(())
    }

    pub fn set_render_targets(
        &mut self,
        colors: &[AerogpuHandle],
        depth_stencil: AerogpuHandle,
    ) -> Result<(), AerogpuCmdWriterError> {
        assert!(
            colors.len() <= AEROGPU_MAX_RENDER_TARGETS,
            "too many render targets ({} > {AEROGPU_MAX_RENDER_TARGETS})",
            colors.len()
        );
        let base = self.append_raw(AerogpuCmdOpcode::SetRenderTargets, size_of::<AerogpuCmdSetRenderTargets>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetRenderTargets, color_count), colors.len() as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetRenderTargets, depth_stencil), depth_stencil);

        let colors_base = base + offset_of!(AerogpuCmdSetRenderTargets, colors);
        for (i, &h) in colors.iter().enumerate() {
            self.write_u32_at(colors_base + i * size_of::<AerogpuHandle>(), h);
        }
        Ok(())
    }

    pub fn set_viewport(
        &mut self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetViewport, size_of::<AerogpuCmdSetViewport>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, x_f32), x.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, y_f32), y.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, width_f32), width.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, height_f32), height.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, min_depth_f32), min_depth.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdSetViewport, max_depth_f32), max_depth.to_bits());
        Ok(())
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetScissor, size_of::<AerogpuCmdSetScissor>())?;
        self.write_i32_at(base + offset_of!(AerogpuCmdSetScissor, x), x);
        self.write_i32_at(base + offset_of!(AerogpuCmdSetScissor, y), y);
        self.write_i32_at(base + offset_of!(AerogpuCmdSetScissor, width), width);
        self.write_i32_at(base + offset_of!(AerogpuCmdSetScissor, height), height);
        Ok(())
    }

    pub fn set_vertex_buffers(
        &mut self,
        start_slot: u32,
        bindings: &[AerogpuVertexBufferBinding],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdSetVertexBuffers>() + core::mem::size_of_val(bindings);
        let base = self.append_raw(AerogpuCmdOpcode::SetVertexBuffers, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetVertexBuffers, start_slot), start_slot);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetVertexBuffers, buffer_count),
            bindings.len() as u32,
        );

        let bindings_base = base + size_of::<AerogpuCmdSetVertexBuffers>();
        for (i, binding) in bindings.iter().enumerate() {
            let b = bindings_base + i * size_of::<AerogpuVertexBufferBinding>();
            self.write_u32_at(b + offset_of!(AerogpuVertexBufferBinding, buffer), binding.buffer);
            self.write_u32_at(b + offset_of!(AerogpuVertexBufferBinding, stride_bytes), binding.stride_bytes);
            self.write_u32_at(b + offset_of!(AerogpuVertexBufferBinding, offset_bytes), binding.offset_bytes);
        }
        Ok(())
    }

    pub fn set_index_buffer(
        &mut self,
        buffer: AerogpuHandle,
        format: AerogpuIndexFormat,
        offset_bytes: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetIndexBuffer, size_of::<AerogpuCmdSetIndexBuffer>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetIndexBuffer, buffer), buffer);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetIndexBuffer, format), format as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetIndexBuffer, offset_bytes), offset_bytes);
        Ok(())
    }

    /// `topology` is a raw wire value so patchlist encodings (33..=64) can be
    /// emitted alongside the named `AerogpuPrimitiveTopology` variants.
    pub fn set_primitive_topology(&mut self, topology: u32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::SetPrimitiveTopology,
            size_of::<AerogpuCmdSetPrimitiveTopology>(),
        )?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetPrimitiveTopology, topology), topology);
        Ok(())
    }

    pub fn set_texture(
        &mut self,
        shader_stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        slot: u32,
        texture: AerogpuHandle,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetTexture, size_of::<AerogpuCmdSetTexture>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetTexture, shader_stage), shader_stage as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetTexture, slot), slot);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetTexture, texture), texture);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetTexture, reserved0), stage_ex as u32);
        Ok(())
    }

    pub fn set_sampler_state(
        &mut self,
        shader_stage: AerogpuShaderStage,
        slot: u32,
        state: u32,
        value: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetSamplerState, size_of::<AerogpuCmdSetSamplerState>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplerState, shader_stage), shader_stage as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplerState, slot), slot);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplerState, state), state);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplerState, value), value);
        Ok(())
    }

    pub fn set_render_state(&mut self, state: u32, value: u32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::SetRenderState, size_of::<AerogpuCmdSetRenderState>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetRenderState, state), state);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetRenderState, value), value);
        Ok(())
    }

    pub fn create_sampler(
        &mut self,
        sampler_handle: AerogpuHandle,
        filter: u32,
        address_u: u32,
        address_v: u32,
        address_w: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::CreateSampler, size_of::<AerogpuCmdCreateSampler>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateSampler, sampler_handle), sampler_handle);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateSampler, filter), filter);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateSampler, address_u), address_u);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateSampler, address_v), address_v);
        self.write_u32_at(base + offset_of!(AerogpuCmdCreateSampler, address_w), address_w);
        Ok(())
    }

    pub fn destroy_sampler(&mut self, sampler_handle: AerogpuHandle) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::DestroySampler, size_of::<AerogpuCmdDestroySampler>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDestroySampler, sampler_handle), sampler_handle);
        Ok(())
    }

    pub fn set_samplers(
        &mut self,
        shader_stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_slot: u32,
        sampler_handles: &[AerogpuHandle],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdSetSamplers>() + core::mem::size_of_val(sampler_handles);
        let base = self.append_raw(AerogpuCmdOpcode::SetSamplers, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplers, shader_stage), shader_stage as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplers, start_slot), start_slot);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetSamplers, sampler_count),
            sampler_handles.len() as u32,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetSamplers, reserved0), stage_ex as u32);

        let handles_base = base + size_of::<AerogpuCmdSetSamplers>();
        for (i, &h) in sampler_handles.iter().enumerate() {
            self.write_u32_at(handles_base + i * 4, h);
        }
        Ok(())
    }

    pub fn set_constant_buffers(
        &mut self,
        shader_stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_slot: u32,
        bindings: &[AerogpuConstantBufferBinding],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdSetConstantBuffers>() + core::mem::size_of_val(bindings);
        let base = self.append_raw(AerogpuCmdOpcode::SetConstantBuffers, unpadded_size)?;
        self.write_u32_at(base + offset_of!(AerogpuCmdSetConstantBuffers, shader_stage), shader_stage as u32);
        self.write_u32_at(base + offset_of!(AerogpuCmdSetConstantBuffers, start_slot), start_slot);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetConstantBuffers, buffer_count),
            bindings.len() as u32,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetConstantBuffers, reserved0), stage_ex as u32);

        let bindings_base = base + size_of::<AerogpuCmdSetConstantBuffers>();
        for (i, binding) in bindings.iter().enumerate() {
            let b = bindings_base + i * size_of::<AerogpuConstantBufferBinding>();
            self.write_u32_at(b + offset_of!(AerogpuConstantBufferBinding, buffer), binding.buffer);
            self.write_u32_at(b + offset_of!(AerogpuConstantBufferBinding, offset_bytes), binding.offset_bytes);
            self.write_u32_at(b + offset_of!(AerogpuConstantBufferBinding, size_bytes), binding.size_bytes);
        }
        Ok(())
    }

    pub fn set_shader_resource_buffers(
        &mut self,
        shader_stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_slot: u32,
        bindings: &[AerogpuShaderResourceBufferBinding],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdSetShaderResourceBuffers>() + core::mem::size_of_val(bindings);
        let base = self.append_raw(AerogpuCmdOpcode::SetShaderResourceBuffers, unpadded_size)?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderResourceBuffers, shader_stage),
            shader_stage as u32,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetShaderResourceBuffers, start_slot), start_slot);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderResourceBuffers, buffer_count),
            bindings.len() as u32,
        );
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetShaderResourceBuffers, reserved0),
            stage_ex as u32,
        );

        let bindings_base = base + size_of::<AerogpuCmdSetShaderResourceBuffers>();
        for (i, binding) in bindings.iter().enumerate() {
            let b = bindings_base + i * size_of::<AerogpuShaderResourceBufferBinding>();
            self.write_u32_at(b + offset_of!(AerogpuShaderResourceBufferBinding, buffer), binding.buffer);
            self.write_u32_at(
                b + offset_of!(AerogpuShaderResourceBufferBinding, offset_bytes),
                binding.offset_bytes,
            );
            self.write_u32_at(
                b + offset_of!(AerogpuShaderResourceBufferBinding, size_bytes),
                binding.size_bytes,
            );
        }
        Ok(())
    }

    pub fn set_unordered_access_buffers(
        &mut self,
        shader_stage: AerogpuShaderStage,
        stage_ex: AerogpuShaderStageEx,
        start_slot: u32,
        bindings: &[AerogpuUnorderedAccessBufferBinding],
    ) -> Result<(), AerogpuCmdWriterError> {
        let unpadded_size = size_of::<AerogpuCmdSetUnorderedAccessBuffers>() + core::mem::size_of_val(bindings);
        let base = self.append_raw(AerogpuCmdOpcode::SetUnorderedAccessBuffers, unpadded_size)?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetUnorderedAccessBuffers, shader_stage),
            shader_stage as u32,
        );
        self.write_u32_at(base + offset_of!(AerogpuCmdSetUnorderedAccessBuffers, start_slot), start_slot);
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetUnorderedAccessBuffers, uav_count),
            bindings.len() as u32,
        );
        self.write_u32_at(
            base + offset_of!(AerogpuCmdSetUnorderedAccessBuffers, reserved0),
            stage_ex as u32,
        );

        let bindings_base = base + size_of::<AerogpuCmdSetUnorderedAccessBuffers>();
        for (i, binding) in bindings.iter().enumerate() {
            let b = bindings_base + i * size_of::<AerogpuUnorderedAccessBufferBinding>();
            self.write_u32_at(b + offset_of!(AerogpuUnorderedAccessBufferBinding, buffer), binding.buffer);
            self.write_u32_at(
                b + offset_of!(AerogpuUnorderedAccessBufferBinding, offset_bytes),
                binding.offset_bytes,
            );
            self.write_u32_at(
                b + offset_of!(AerogpuUnorderedAccessBufferBinding, size_bytes),
                binding.size_bytes,
            );
            self.write_u32_at(
                b + offset_of!(AerogpuUnorderedAccessBufferBinding, initial_count),
                binding.initial_count,
            );
        }
        Ok(())
    }

    pub fn clear(&mut self, flags: u32, color_rgba: [f32; 4], depth: f32, stencil: u32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::Clear, size_of::<AerogpuCmdClear>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdClear, flags), flags);

        let color_base = base + offset_of!(AerogpuCmdClear, color_rgba_f32);
        for (i, c) in color_rgba.iter().enumerate() {
            self.write_u32_at(color_base + i * 4, c.to_bits());
        }

        self.write_u32_at(base + offset_of!(AerogpuCmdClear, depth_f32), depth.to_bits());
        self.write_u32_at(base + offset_of!(AerogpuCmdClear, stencil), stencil);
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::Draw, size_of::<AerogpuCmdDraw>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDraw, vertex_count), vertex_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdDraw, instance_count), instance_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdDraw, first_vertex), first_vertex);
        self.write_u32_at(base + offset_of!(AerogpuCmdDraw, first_instance), first_instance);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::DrawIndexed, size_of::<AerogpuCmdDrawIndexed>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDrawIndexed, index_count), index_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdDrawIndexed, instance_count), instance_count);
        self.write_u32_at(base + offset_of!(AerogpuCmdDrawIndexed, first_index), first_index);
        self.write_i32_at(base + offset_of!(AerogpuCmdDrawIndexed, base_vertex), base_vertex);
        self.write_u32_at(base + offset_of!(AerogpuCmdDrawIndexed, first_instance), first_instance);
        Ok(())
    }

    pub fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
        stage_ex: AerogpuShaderStageEx,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::Dispatch, size_of::<AerogpuCmdDispatch>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdDispatch, group_count_x), group_count_x);
        self.write_u32_at(base + offset_of!(AerogpuCmdDispatch, group_count_y), group_count_y);
        self.write_u32_at(base + offset_of!(AerogpuCmdDispatch, group_count_z), group_count_z);
        self.write_u32_at(base + offset_of!(AerogpuCmdDispatch, reserved0), stage_ex as u32);
        Ok(())
    }

    pub fn present(&mut self, scanout_id: u32, flags: u32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::Present, size_of::<AerogpuCmdPresent>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdPresent, scanout_id), scanout_id);
        self.write_u32_at(base + offset_of!(AerogpuCmdPresent, flags), flags);
        Ok(())
    }

    pub fn present_ex(&mut self, scanout_id: u32, flags: u32, d3d9_present_flags: u32) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(AerogpuCmdOpcode::PresentEx, size_of::<AerogpuCmdPresentEx>())?;
        self.write_u32_at(base + offset_of!(AerogpuCmdPresentEx, scanout_id), scanout_id);
        self.write_u32_at(base + offset_of!(AerogpuCmdPresentEx, flags), flags);
        self.write_u32_at(base + offset_of!(AerogpuCmdPresentEx, d3d9_present_flags), d3d9_present_flags);
        Ok(())
    }

    pub fn export_shared_surface(
        &mut self,
        resource_handle: AerogpuHandle,
        share_token: u64,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::ExportSharedSurface,
            size_of::<AerogpuCmdExportSharedSurface>(),
        )?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdExportSharedSurface, resource_handle),
            resource_handle,
        );
        self.write_u64_at(base + offset_of!(AerogpuCmdExportSharedSurface, share_token), share_token);
        Ok(())
    }

    pub fn import_shared_surface(
        &mut self,
        out_resource_handle: AerogpuHandle,
        share_token: u64,
    ) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::ImportSharedSurface,
            size_of::<AerogpuCmdImportSharedSurface>(),
        )?;
        self.write_u32_at(
            base + offset_of!(AerogpuCmdImportSharedSurface, out_resource_handle),
            out_resource_handle,
        );
        self.write_u64_at(base + offset_of!(AerogpuCmdImportSharedSurface, share_token), share_token);
        Ok(())
    }

    pub fn release_shared_surface(&mut self, share_token: u64) -> Result<(), AerogpuCmdWriterError> {
        let base = self.append_raw(
            AerogpuCmdOpcode::ReleaseSharedSurface,
            size_of::<AerogpuCmdReleaseSharedSurface>(),
        )?;
        self.write_u64_at(base + offset_of!(AerogpuCmdReleaseSharedSurface, share_token), share_token);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), AerogpuCmdWriterError> {
        self.append_raw(AerogpuCmdOpcode::Flush, size_of::<AerogpuCmdFlush>())?;
        Ok(())
    }
}
