//! Input layout blob construction.
//!
//! Vertex declarations travel as an opaque blob: a fixed header followed by
//! one 28-byte record per element. Semantic names are carried as FNV-1a
//! hashes of their uppercase ASCII spelling so the host never parses strings.

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuInputLayoutBlobHeader, AerogpuInputLayoutElementDxgi,
    AEROGPU_INPUT_LAYOUT_BLOB_MAGIC, AEROGPU_INPUT_LAYOUT_BLOB_VERSION,
};

use crate::error::{Result, UmdError};

/// One vertex declaration element, DXGI-shaped.
#[derive(Clone, Copy, Debug)]
pub struct InputElementDesc<'a> {
    pub semantic_name: &'a str,
    pub semantic_index: u32,
    pub dxgi_format: u32,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    /// 0 = per-vertex, 1 = per-instance.
    pub input_slot_class: u32,
    pub instance_data_step_rate: u32,
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the uppercase ASCII bytes of `name`. Case-insensitive by
/// construction; callers validate that the name is ASCII first.
pub fn semantic_name_hash(name: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.bytes() {
        hash ^= u32::from(byte.to_ascii_uppercase());
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Serializes a vertex declaration into the wire blob.
pub fn build_layout_blob(elements: &[InputElementDesc<'_>]) -> Result<Vec<u8>> {
    if elements.is_empty() {
        return Err(UmdError::InvalidArg("input layout has no elements"));
    }
    let element_count = u32::try_from(elements.len())
        .map_err(|_| UmdError::InvalidArg("input layout element count exceeds u32"))?;
    for element in elements {
        if element.semantic_name.is_empty() || !element.semantic_name.is_ascii() {
            return Err(UmdError::InvalidArg("semantic name must be non-empty ASCII"));
        }
        if element.input_slot_class > 1 {
            return Err(UmdError::InvalidArg("input slot class out of range"));
        }
    }

    let mut blob = Vec::with_capacity(
        AerogpuInputLayoutBlobHeader::SIZE_BYTES
            + elements.len() * AerogpuInputLayoutElementDxgi::SIZE_BYTES,
    );
    push_u32(&mut blob, AEROGPU_INPUT_LAYOUT_BLOB_MAGIC);
    push_u32(&mut blob, AEROGPU_INPUT_LAYOUT_BLOB_VERSION);
    push_u32(&mut blob, element_count);
    push_u32(&mut blob, 0); // reserved0
    for element in elements {
        push_u32(&mut blob, semantic_name_hash(element.semantic_name));
        push_u32(&mut blob, element.semantic_index);
        push_u32(&mut blob, element.dxgi_format);
        push_u32(&mut blob, element.input_slot);
        push_u32(&mut blob, element.aligned_byte_offset);
        push_u32(&mut blob, element.input_slot_class);
        push_u32(&mut blob, element.instance_data_step_rate);
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str) -> InputElementDesc<'_> {
        InputElementDesc {
            semantic_name: name,
            semantic_index: 0,
            dxgi_format: 6, // DXGI_FORMAT_R32G32B32_FLOAT
            input_slot: 0,
            aligned_byte_offset: 0,
            input_slot_class: 0,
            instance_data_step_rate: 0,
        }
    }

    #[test]
    fn hash_uppercases_before_mixing() {
        // FNV-1a of the single byte 'A'.
        assert_eq!(semantic_name_hash("a"), 0xC40B_F6CC);
        assert_eq!(semantic_name_hash("A"), 0xC40B_F6CC);
        assert_eq!(
            semantic_name_hash("Position"),
            semantic_name_hash("POSITION")
        );
        assert_ne!(
            semantic_name_hash("POSITION"),
            semantic_name_hash("TEXCOORD")
        );
    }

    #[test]
    fn blob_is_header_then_packed_elements() {
        let mut second = element("TEXCOORD");
        second.semantic_index = 1;
        second.aligned_byte_offset = 12;
        second.input_slot_class = 1;
        second.instance_data_step_rate = 2;
        let blob = build_layout_blob(&[element("POSITION"), second]).unwrap();

        assert_eq!(blob.len(), 16 + 2 * 28);
        let u32_at = |off: usize| u32::from_le_bytes(blob[off..off + 4].try_into().unwrap());
        assert_eq!(u32_at(0), AEROGPU_INPUT_LAYOUT_BLOB_MAGIC);
        assert_eq!(u32_at(4), AEROGPU_INPUT_LAYOUT_BLOB_VERSION);
        assert_eq!(u32_at(8), 2);
        assert_eq!(u32_at(12), 0);
        assert_eq!(u32_at(16), semantic_name_hash("POSITION"));
        assert_eq!(u32_at(16 + 28), semantic_name_hash("TEXCOORD"));
        assert_eq!(u32_at(16 + 28 + 4), 1); // semantic_index
        assert_eq!(u32_at(16 + 28 + 16), 12); // aligned_byte_offset
        assert_eq!(u32_at(16 + 28 + 20), 1); // input_slot_class
        assert_eq!(u32_at(16 + 28 + 24), 2); // instance_data_step_rate
    }

    #[test]
    fn rejects_empty_list_and_bad_names() {
        assert!(matches!(
            build_layout_blob(&[]),
            Err(UmdError::InvalidArg(_))
        ));
        assert!(matches!(
            build_layout_blob(&[element("POSITIÖN")]),
            Err(UmdError::InvalidArg(_))
        ));
        let mut bad = element("POSITION");
        bad.input_slot_class = 2;
        assert!(matches!(
            build_layout_blob(&[bad]),
            Err(UmdError::InvalidArg(_))
        ));
    }
}
