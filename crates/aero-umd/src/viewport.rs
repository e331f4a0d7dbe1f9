//! Viewport and scissor collapsing.
//!
//! The wire protocol carries exactly one viewport and one scissor rect. The
//! guest API accepts arrays; entries that are disabled (zero-extent viewport,
//! empty scissor rect) are ignored, and the remaining entries must agree
//! bit-for-bit or the call is reported as not-implemented. The first active
//! entry is always encoded before that report so the stream stays usable.

#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A zero-extent viewport. Encoded when the guest disables the viewport
    /// outright; also the form a disabled array entry takes.
    pub const DISABLED: Viewport = Viewport {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    /// Disabled means zero extent by value comparison, so -0.0 counts.
    pub fn is_disabled(&self) -> bool {
        self.width == 0.0 && self.height == 0.0
    }

    /// Equality on encodings. Distinguishes -0.0 from 0.0 and is total over
    /// NaN, unlike `==` on the float fields.
    fn bits_eq(&self, other: &Viewport) -> bool {
        self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
            && self.width.to_bits() == other.width.to_bits()
            && self.height.to_bits() == other.height.to_bits()
            && self.min_depth.to_bits() == other.min_depth.to_bits()
            && self.max_depth.to_bits() == other.max_depth.to_bits()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub const DISABLED: ScissorRect = ScissorRect {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Outcome of collapsing an array onto the protocol's single slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Collapse<T> {
    /// Nothing active; encode the disabled sentinel.
    Disabled,
    /// All active entries agree; encode this one.
    Single(T),
    /// Active entries diverge; encode this one, then report the loss.
    Divergent(T),
}

pub(crate) fn collapse_viewports(viewports: &[Viewport]) -> Collapse<Viewport> {
    let mut active = viewports.iter().filter(|vp| !vp.is_disabled());
    let Some(first) = active.next() else {
        return Collapse::Disabled;
    };
    if active.all(|vp| vp.bits_eq(first)) {
        Collapse::Single(*first)
    } else {
        Collapse::Divergent(*first)
    }
}

pub(crate) fn collapse_scissors(rects: &[ScissorRect]) -> Collapse<ScissorRect> {
    let mut active = rects.iter().filter(|r| !r.is_empty());
    let Some(first) = active.next() else {
        return Collapse::Disabled;
    };
    if active.all(|r| r == first) {
        Collapse::Single(*first)
    } else {
        Collapse::Divergent(*first)
    }
}

/// Converts a scissor rect to the packet's origin-plus-extent form. Extents
/// are computed in i64 so inverted or extreme rects clamp instead of
/// overflowing; the wire carries them back as i32.
pub(crate) fn scissor_packet_params(rect: &ScissorRect) -> (i32, i32, i32, i32) {
    let width = (i64::from(rect.right) - i64::from(rect.left)).clamp(0, i64::from(i32::MAX));
    let height = (i64::from(rect.bottom) - i64::from(rect.top)).clamp(0, i64::from(i32::MAX));
    (rect.left, rect.top, width as i32, height as i32)
}
