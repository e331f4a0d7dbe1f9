//! The wire carries one viewport and one scissor slot. Arrays collapse to
//! that slot: duplicates and zero-extent entries are tolerated, an
//! all-disabled array encodes the disabled sentinel, and genuinely divergent
//! arrays encode the first entry before the call reports the limitation.

use core::mem::offset_of;
use std::sync::Arc;

use aero_protocol::aerogpu::aerogpu_cmd::{
    self as cmd, AerogpuCmdOpcode, AerogpuCmdPacket, AerogpuCmdStreamIter,
};
use aero_umd::backend::{RecordingSubmitter, Submission};
use aero_umd::{Adapter, Device, DeviceOptions, ScissorRect, UmdError, Viewport};

fn host_device() -> (Arc<RecordingSubmitter>, Device) {
    let submitter = Arc::new(RecordingSubmitter::new());
    let adapter = Adapter::new(submitter.clone(), None);
    let device = adapter.open_device(DeviceOptions::default());
    (submitter, device)
}

fn decode(stream: &[u8]) -> Vec<AerogpuCmdPacket<'_>> {
    AerogpuCmdStreamIter::new(stream)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn only_submission(submitter: &RecordingSubmitter) -> Submission {
    let mut subs = submitter.take_submissions();
    assert_eq!(subs.len(), 1, "expected exactly one submission");
    subs.remove(0)
}

fn pl_u32(packet: &AerogpuCmdPacket<'_>, struct_offset: usize) -> u32 {
    let off = struct_offset - cmd::AerogpuCmdHdr::SIZE_BYTES;
    u32::from_le_bytes(packet.payload[off..off + 4].try_into().unwrap())
}

fn pl_i32(packet: &AerogpuCmdPacket<'_>, struct_offset: usize) -> i32 {
    pl_u32(packet, struct_offset) as i32
}

fn assert_viewport_packet(packet: &AerogpuCmdPacket<'_>, expect: &Viewport) {
    assert_eq!(packet.opcode, Some(AerogpuCmdOpcode::SetViewport));
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, x_f32)),
        expect.x.to_bits()
    );
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, y_f32)),
        expect.y.to_bits()
    );
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, width_f32)),
        expect.width.to_bits()
    );
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, height_f32)),
        expect.height.to_bits()
    );
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, min_depth_f32)),
        expect.min_depth.to_bits()
    );
    assert_eq!(
        pl_u32(packet, offset_of!(cmd::AerogpuCmdSetViewport, max_depth_f32)),
        expect.max_depth.to_bits()
    );
}

fn assert_scissor_packet(packet: &AerogpuCmdPacket<'_>, x: i32, y: i32, width: i32, height: i32) {
    assert_eq!(packet.opcode, Some(AerogpuCmdOpcode::SetScissor));
    assert_eq!(pl_i32(packet, offset_of!(cmd::AerogpuCmdSetScissor, x)), x);
    assert_eq!(pl_i32(packet, offset_of!(cmd::AerogpuCmdSetScissor, y)), y);
    assert_eq!(pl_i32(packet, offset_of!(cmd::AerogpuCmdSetScissor, width)), width);
    assert_eq!(pl_i32(packet, offset_of!(cmd::AerogpuCmdSetScissor, height)), height);
}

const VP: Viewport = Viewport {
    x: 8.5,
    y: 16.0,
    width: 640.0,
    height: 480.0,
    min_depth: 0.0,
    max_depth: 1.0,
};

#[test]
fn equivalent_viewport_arrays_collapse_to_one_packet() {
    let (submitter, device) = host_device();
    device.set_viewports(&[VP]).unwrap();
    device.set_viewports(&[VP, VP, VP]).unwrap();
    // Zero-extent entries do not count against the collapse.
    device
        .set_viewports(&[
            Viewport {
                width: 0.0,
                height: 0.0,
                ..VP
            },
            VP,
        ])
        .unwrap();
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 4); // three viewports plus the flush
    for packet in &packets[..3] {
        assert_viewport_packet(packet, &VP);
    }
}

#[test]
fn disabled_viewports_encode_the_sentinel() {
    let (submitter, device) = host_device();
    device.set_viewports(&[]).unwrap();
    // A zero-extent entry with a nonzero origin is still disabled; the
    // sentinel wins over its other fields.
    device
        .set_viewports(&[Viewport {
            x: 5.0,
            width: 0.0,
            height: 0.0,
            ..VP
        }])
        .unwrap();
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 3);
    assert_viewport_packet(&packets[0], &Viewport::DISABLED);
    assert_viewport_packet(&packets[1], &Viewport::DISABLED);
}

#[test]
fn divergent_viewports_encode_the_first_then_fail() {
    let (submitter, device) = host_device();
    let other = Viewport { x: 0.0, ..VP };
    assert!(matches!(
        device.set_viewports(&[VP, other]),
        Err(UmdError::NotImpl(_))
    ));
    device.flush().unwrap();

    // The first viewport made it onto the wire before the error.
    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 2);
    assert_viewport_packet(&packets[0], &VP);
}

#[test]
fn equivalent_scissor_arrays_collapse_to_one_packet() {
    let (submitter, device) = host_device();
    let rect = ScissorRect {
        left: 10,
        top: 20,
        right: 110,
        bottom: 220,
    };
    device.set_scissors(&[rect]).unwrap();
    // Empty rects are skipped, including inverted ones.
    device
        .set_scissors(&[
            ScissorRect {
                left: 50,
                top: 50,
                right: 50,
                bottom: 60,
            },
            rect,
            ScissorRect {
                left: 9,
                top: 9,
                right: 3,
                bottom: 3,
            },
            rect,
        ])
        .unwrap();
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 3);
    assert_scissor_packet(&packets[0], 10, 20, 100, 200);
    assert_scissor_packet(&packets[1], 10, 20, 100, 200);
}

#[test]
fn empty_scissor_arrays_encode_the_sentinel() {
    let (submitter, device) = host_device();
    device.set_scissors(&[]).unwrap();
    device
        .set_scissors(&[ScissorRect {
            left: 40,
            top: 40,
            right: 10,
            bottom: 10,
        }])
        .unwrap();
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 3);
    assert_scissor_packet(&packets[0], 0, 0, 0, 0);
    assert_scissor_packet(&packets[1], 0, 0, 0, 0);
}

#[test]
fn divergent_scissors_encode_the_first_then_fail() {
    let (submitter, device) = host_device();
    let a = ScissorRect {
        left: 0,
        top: 0,
        right: 64,
        bottom: 64,
    };
    let b = ScissorRect {
        left: 0,
        top: 0,
        right: 32,
        bottom: 32,
    };
    assert!(matches!(
        device.set_scissors(&[a, b]),
        Err(UmdError::NotImpl(_))
    ));
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 2);
    assert_scissor_packet(&packets[0], 0, 0, 64, 64);
}

#[test]
fn scissor_extents_saturate_at_i32_max() {
    let (submitter, device) = host_device();
    device
        .set_scissors(&[ScissorRect {
            left: i32::MIN,
            top: -1,
            right: i32::MAX,
            bottom: i32::MAX,
        }])
        .unwrap();
    device.flush().unwrap();

    let sub = only_submission(&submitter);
    let packets = decode(&sub.stream);
    assert_eq!(packets.len(), 2);
    assert_scissor_packet(&packets[0], i32::MIN, -1, i32::MAX, i32::MAX);
}
