//! Pipeline-state descriptors and their wire translation.
//!
//! The guest API accepts a superset of what the protocol encodes. Create-time
//! validation rejects values outside the API's own ranges (invalid-argument);
//! bind-time conversion rejects configurations that are valid API but have no
//! wire encoding (not-implemented): alpha-to-coverage, per-render-target
//! divergence while blending, and the color/dual-source blend factor variants.

use aero_protocol::aerogpu::aerogpu_cmd::{
    self as cmd, AerogpuBlendFactor, AerogpuBlendOp, AerogpuBlendState, AerogpuCompareFunc,
    AerogpuCullMode, AerogpuDepthStencilState, AerogpuFillMode, AerogpuRasterizerState,
};

use crate::error::{Result, UmdError};
use crate::slot::SlotKey;

/// Identifier for a validated blend state object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlendStateId(pub(crate) SlotKey);

/// Identifier for a validated depth-stencil state object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DepthStencilStateId(pub(crate) SlotKey);

/// Identifier for a validated rasterizer state object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RasterizerStateId(pub(crate) SlotKey);

/// Blend factors accepted at the API boundary. Values 0..=7 are the wire
/// factors; the color and dual-source variants (8..=16) exist in the guest
/// API but cannot be encoded while blending is enabled.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlendFactor {
    Zero = 0,
    One = 1,
    SrcAlpha = 2,
    InvSrcAlpha = 3,
    DestAlpha = 4,
    InvDestAlpha = 5,
    Constant = 6,
    InvConstant = 7,
    SrcColor = 8,
    InvSrcColor = 9,
    DestColor = 10,
    InvDestColor = 11,
    SrcAlphaSat = 12,
    Src1Color = 13,
    InvSrc1Color = 14,
    Src1Alpha = 15,
    InvSrc1Alpha = 16,
}

pub(crate) const BLEND_FACTOR_MAX: u32 = BlendFactor::InvSrc1Alpha as u32;

/// Per-render-target blend controls.
///
/// Fields carry raw `u32` encodings ([`BlendFactor`], [`AerogpuBlendOp`]
/// discriminants) so out-of-range input can be rejected rather than being
/// unrepresentable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: u32,
    pub src_blend: u32,
    pub dest_blend: u32,
    pub blend_op: u32,
    pub src_blend_alpha: u32,
    pub dest_blend_alpha: u32,
    pub blend_op_alpha: u32,
    pub render_target_write_mask: u32,
}

impl Default for RenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            blend_enable: 0,
            src_blend: BlendFactor::One as u32,
            dest_blend: BlendFactor::Zero as u32,
            blend_op: AerogpuBlendOp::Add as u32,
            src_blend_alpha: BlendFactor::One as u32,
            dest_blend_alpha: BlendFactor::Zero as u32,
            blend_op_alpha: AerogpuBlendOp::Add as u32,
            render_target_write_mask: u32::from(cmd::AEROGPU_COLOR_WRITE_ENABLE_ALL),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlendStateDesc {
    pub alpha_to_coverage_enable: u32,
    pub independent_blend_enable: u32,
    pub render_target: [RenderTargetBlendDesc; cmd::AEROGPU_MAX_RENDER_TARGETS],
}

impl Default for BlendStateDesc {
    fn default() -> Self {
        Self {
            alpha_to_coverage_enable: 0,
            independent_blend_enable: 0,
            render_target: [RenderTargetBlendDesc::default(); cmd::AEROGPU_MAX_RENDER_TARGETS],
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DepthStencilStateDesc {
    pub depth_enable: u32,
    pub depth_write_enable: u32,
    /// [`AerogpuCompareFunc`] discriminant.
    pub depth_func: u32,
    pub stencil_enable: u32,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_enable: 1,
            depth_write_enable: 1,
            depth_func: AerogpuCompareFunc::Less as u32,
            stencil_enable: 0,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RasterizerStateDesc {
    /// [`AerogpuFillMode`] discriminant.
    pub fill_mode: u32,
    /// [`AerogpuCullMode`] discriminant.
    pub cull_mode: u32,
    pub front_counter_clockwise: u32,
    pub scissor_enable: u32,
    pub depth_bias: i32,
    pub depth_clip_enable: u32,
}

impl Default for RasterizerStateDesc {
    fn default() -> Self {
        Self {
            fill_mode: AerogpuFillMode::Solid as u32,
            cull_mode: AerogpuCullMode::Back as u32,
            front_counter_clockwise: 0,
            scissor_enable: 0,
            depth_bias: 0,
            depth_clip_enable: 1,
        }
    }
}

fn check_bool(v: u32, what: &'static str) -> Result<()> {
    if v > 1 {
        return Err(UmdError::InvalidArg(what));
    }
    Ok(())
}

/// Create-time range validation for [`BlendStateDesc`].
pub(crate) fn validate_blend_desc(desc: &BlendStateDesc) -> Result<()> {
    check_bool(desc.alpha_to_coverage_enable, "alpha_to_coverage_enable out of range")?;
    check_bool(desc.independent_blend_enable, "independent_blend_enable out of range")?;
    for rt in &desc.render_target {
        check_bool(rt.blend_enable, "blend_enable out of range")?;
        for factor in [rt.src_blend, rt.dest_blend, rt.src_blend_alpha, rt.dest_blend_alpha] {
            if factor > BLEND_FACTOR_MAX {
                return Err(UmdError::InvalidArg("blend factor out of range"));
            }
        }
        for op in [rt.blend_op, rt.blend_op_alpha] {
            if AerogpuBlendOp::from_u32(op).is_none() {
                return Err(UmdError::InvalidArg("blend op out of range"));
            }
        }
        if rt.render_target_write_mask & !u32::from(cmd::AEROGPU_COLOR_WRITE_ENABLE_ALL) != 0 {
            return Err(UmdError::InvalidArg("color write mask has bits above bit 3"));
        }
    }
    Ok(())
}

fn convert_factor(raw: u32, enabled: bool, inert: AerogpuBlendFactor) -> Result<u32> {
    match AerogpuBlendFactor::from_u32(raw) {
        Some(factor) => Ok(factor as u32),
        None if raw > BLEND_FACTOR_MAX => Err(UmdError::InvalidArg("blend factor out of range")),
        // Color/dual-source variants have no wire encoding; while blending is
        // off they collapse to an inert default.
        None if enabled => Err(UmdError::NotImpl("blend factor has no wire encoding")),
        None => Ok(inert as u32),
    }
}

/// Bind-time conversion of a validated blend descriptor into the wire state.
///
/// `blend_constant` and `sample_mask` ride along unchanged; the descriptor
/// itself never carries them.
pub(crate) fn convert_blend_desc(
    desc: &BlendStateDesc,
    blend_constant: [f32; 4],
    sample_mask: u32,
) -> Result<AerogpuBlendState> {
    if desc.alpha_to_coverage_enable != 0 {
        return Err(UmdError::NotImpl("alpha-to-coverage"));
    }
    let rt0 = &desc.render_target[0];
    if desc.independent_blend_enable != 0 {
        for rt in &desc.render_target[1..] {
            if rt != rt0 && (rt0.blend_enable != 0 || rt.blend_enable != 0) {
                return Err(UmdError::NotImpl("per-render-target blend divergence"));
            }
        }
    }
    if rt0.render_target_write_mask & !u32::from(cmd::AEROGPU_COLOR_WRITE_ENABLE_ALL) != 0 {
        return Err(UmdError::InvalidArg("color write mask has bits above bit 3"));
    }

    let enabled = rt0.blend_enable != 0;
    let blend_op = AerogpuBlendOp::from_u32(rt0.blend_op)
        .ok_or(UmdError::InvalidArg("blend op out of range"))?;
    let blend_op_alpha = AerogpuBlendOp::from_u32(rt0.blend_op_alpha)
        .ok_or(UmdError::InvalidArg("blend op out of range"))?;

    Ok(AerogpuBlendState {
        enable: u32::from(enabled),
        src_factor: convert_factor(rt0.src_blend, enabled, AerogpuBlendFactor::One)?,
        dst_factor: convert_factor(rt0.dest_blend, enabled, AerogpuBlendFactor::Zero)?,
        blend_op: blend_op as u32,
        color_write_mask: rt0.render_target_write_mask as u8,
        reserved0: [0; 3],
        src_factor_alpha: convert_factor(rt0.src_blend_alpha, enabled, AerogpuBlendFactor::One)?,
        dst_factor_alpha: convert_factor(rt0.dest_blend_alpha, enabled, AerogpuBlendFactor::Zero)?,
        blend_op_alpha: blend_op_alpha as u32,
        blend_constant_rgba_f32: blend_constant.map(f32::to_bits),
        sample_mask,
    })
}

/// Wire state for a null blend bind: blending off, ONE/ZERO pass-through,
/// full write mask. Constant and mask still honor the caller.
pub(crate) fn default_blend_state(blend_constant: [f32; 4], sample_mask: u32) -> AerogpuBlendState {
    AerogpuBlendState {
        enable: 0,
        src_factor: AerogpuBlendFactor::One as u32,
        dst_factor: AerogpuBlendFactor::Zero as u32,
        blend_op: AerogpuBlendOp::Add as u32,
        color_write_mask: cmd::AEROGPU_COLOR_WRITE_ENABLE_ALL,
        reserved0: [0; 3],
        src_factor_alpha: AerogpuBlendFactor::One as u32,
        dst_factor_alpha: AerogpuBlendFactor::Zero as u32,
        blend_op_alpha: AerogpuBlendOp::Add as u32,
        blend_constant_rgba_f32: blend_constant.map(f32::to_bits),
        sample_mask,
    }
}

pub(crate) fn validate_depth_stencil_desc(desc: &DepthStencilStateDesc) -> Result<()> {
    check_bool(desc.depth_enable, "depth_enable out of range")?;
    check_bool(desc.depth_write_enable, "depth_write_enable out of range")?;
    check_bool(desc.stencil_enable, "stencil_enable out of range")?;
    if AerogpuCompareFunc::from_u32(desc.depth_func).is_none() {
        return Err(UmdError::InvalidArg("depth compare func out of range"));
    }
    if desc.stencil_read_mask > 0xFF || desc.stencil_write_mask > 0xFF {
        return Err(UmdError::InvalidArg("stencil mask out of range"));
    }
    Ok(())
}

/// Depth writes are meaningless without depth testing; the encoded state
/// forces them off whenever testing is disabled.
pub(crate) fn convert_depth_stencil_desc(desc: &DepthStencilStateDesc) -> AerogpuDepthStencilState {
    let depth_write_enable = if desc.depth_enable == 0 {
        0
    } else {
        desc.depth_write_enable
    };
    AerogpuDepthStencilState {
        depth_enable: desc.depth_enable,
        depth_write_enable,
        depth_func: desc.depth_func,
        stencil_enable: desc.stencil_enable,
        stencil_read_mask: desc.stencil_read_mask as u8,
        stencil_write_mask: desc.stencil_write_mask as u8,
        reserved0: [0; 2],
    }
}

pub(crate) fn default_depth_stencil_state() -> AerogpuDepthStencilState {
    convert_depth_stencil_desc(&DepthStencilStateDesc::default())
}

pub(crate) fn validate_rasterizer_desc(desc: &RasterizerStateDesc) -> Result<()> {
    if AerogpuFillMode::from_u32(desc.fill_mode).is_none() {
        return Err(UmdError::InvalidArg("fill mode out of range"));
    }
    if AerogpuCullMode::from_u32(desc.cull_mode).is_none() {
        return Err(UmdError::InvalidArg("cull mode out of range"));
    }
    check_bool(desc.front_counter_clockwise, "front_counter_clockwise out of range")?;
    check_bool(desc.scissor_enable, "scissor_enable out of range")?;
    check_bool(desc.depth_clip_enable, "depth_clip_enable out of range")?;
    Ok(())
}

pub(crate) fn convert_rasterizer_desc(desc: &RasterizerStateDesc) -> AerogpuRasterizerState {
    let mut flags = 0;
    if desc.depth_clip_enable == 0 {
        flags |= cmd::AEROGPU_RASTERIZER_FLAG_DEPTH_CLIP_DISABLE;
    }
    AerogpuRasterizerState {
        fill_mode: desc.fill_mode,
        cull_mode: desc.cull_mode,
        front_ccw: desc.front_counter_clockwise,
        scissor_enable: desc.scissor_enable,
        depth_bias: desc.depth_bias,
        flags,
    }
}

pub(crate) fn default_rasterizer_state() -> AerogpuRasterizerState {
    convert_rasterizer_desc(&RasterizerStateDesc::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validation_rejects_out_of_range_fields() {
        let mut desc = BlendStateDesc::default();
        desc.render_target[0].blend_enable = 2;
        assert!(matches!(validate_blend_desc(&desc), Err(UmdError::InvalidArg(_))));

        let mut desc = BlendStateDesc::default();
        desc.render_target[3].src_blend = BLEND_FACTOR_MAX + 1;
        assert!(matches!(validate_blend_desc(&desc), Err(UmdError::InvalidArg(_))));

        let mut desc = BlendStateDesc::default();
        desc.render_target[0].blend_op = 5;
        assert!(matches!(validate_blend_desc(&desc), Err(UmdError::InvalidArg(_))));

        let mut desc = BlendStateDesc::default();
        desc.render_target[0].render_target_write_mask = 0x10;
        assert!(matches!(validate_blend_desc(&desc), Err(UmdError::InvalidArg(_))));

        assert!(validate_blend_desc(&BlendStateDesc::default()).is_ok());
    }

    #[test]
    fn dual_source_factor_rejected_only_while_enabled() {
        let mut desc = BlendStateDesc::default();
        desc.render_target[0].src_blend = BlendFactor::Src1Alpha as u32;

        // Disabled: collapses to the inert default.
        let state = convert_blend_desc(&desc, [1.0; 4], u32::MAX).unwrap();
        let src_factor = state.src_factor;
        assert_eq!(src_factor, AerogpuBlendFactor::One as u32);

        desc.render_target[0].blend_enable = 1;
        assert!(matches!(
            convert_blend_desc(&desc, [1.0; 4], u32::MAX),
            Err(UmdError::NotImpl(_))
        ));
    }

    #[test]
    fn per_target_divergence_rejected_while_enabled() {
        let mut desc = BlendStateDesc::default();
        desc.independent_blend_enable = 1;
        desc.render_target[0].blend_enable = 1;
        desc.render_target[1] = desc.render_target[0];
        desc.render_target[1].dest_blend = BlendFactor::SrcAlpha as u32;
        assert!(matches!(
            convert_blend_desc(&desc, [1.0; 4], u32::MAX),
            Err(UmdError::NotImpl(_))
        ));

        // Identical descriptors across targets are fine.
        desc.render_target[1] = desc.render_target[0];
        assert!(convert_blend_desc(&desc, [1.0; 4], u32::MAX).is_ok());
    }

    #[test]
    fn depth_write_forced_off_without_depth_test() {
        let desc = DepthStencilStateDesc {
            depth_enable: 0,
            depth_write_enable: 1,
            ..DepthStencilStateDesc::default()
        };
        let state = convert_depth_stencil_desc(&desc);
        let write = state.depth_write_enable;
        assert_eq!(write, 0);
    }

    #[test]
    fn depth_clip_disable_becomes_flag_bit() {
        let desc = RasterizerStateDesc {
            depth_clip_enable: 0,
            ..RasterizerStateDesc::default()
        };
        let state = convert_rasterizer_desc(&desc);
        let flags = state.flags;
        assert_eq!(flags, cmd::AEROGPU_RASTERIZER_FLAG_DEPTH_CLIP_DISABLE);

        let state = default_rasterizer_state();
        let flags = state.flags;
        assert_eq!(flags, 0);
    }
}
