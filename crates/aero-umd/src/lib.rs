//! `aero-umd` is the guest-side user-mode driver core for the AeroGPU
//! paravirtual adapter: it turns typed device calls into the AeroGPU command
//! stream the host executes.
//!
//! The crate provides:
//! - A [`Device`] that validates arguments, tracks resources, views, shaders,
//!   samplers and pipeline state objects, and encodes packets with the shared
//!   `aero-protocol` command writer.
//! - A map/unmap path that flushes CPU writes as `UPLOAD_RESOURCE` or
//!   `RESOURCE_DIRTY_RANGE` depending on where the resource is backed (see
//!   [`Device::map`]).
//! - Backend seams ([`backend::Submitter`] and [`backend::GuestAllocator`])
//!   that connect the encoder to a submission transport, plus in-memory
//!   fakes for tests.

mod device;
mod error;
mod input_layout;
mod map;
mod pipeline;
mod resource;
mod slot;
mod viewport;

pub mod backend;

pub use device::{
    Adapter, ClearFlags, ConstantBufferBinding, Device, DeviceOptions, InputLayoutId, SamplerDesc,
    SamplerId, ShaderId, ShaderResourceBufferBinding, Stage, UnorderedAccessBufferBinding,
    VertexBufferBinding,
};
pub use error::{Result, UmdError};
pub use input_layout::{semantic_name_hash, InputElementDesc};
pub use map::MapInfo;
pub use pipeline::{
    BlendFactor, BlendStateDesc, BlendStateId, DepthStencilStateDesc, DepthStencilStateId,
    RasterizerStateDesc, RasterizerStateId, RenderTargetBlendDesc,
};
pub use resource::{
    BindFlags, BufferDesc, CpuAccessFlags, DsvId, MapFlags, MapType, ResourceBox, ResourceId,
    RtvId, SrvId, SubresourceData, Texture2dDesc, TextureViewDesc, Usage, HOST_ROW_PITCH_ALIGN,
};
pub use viewport::{ScissorRect, Viewport};
