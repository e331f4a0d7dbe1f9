//! Collaborator interfaces: guest backing allocations and command submission.
//!
//! The transport layer that owns the virtqueue/DMA plumbing implements these
//! traits; the encoder only ever talks to guest-visible memory and the GPU
//! scheduler through them. Vec-backed implementations are provided for tests
//! and bring-up.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, UmdError};

/// Request for a guest-visible backing allocation.
#[derive(Clone, Copy, Debug)]
pub struct BackingRequest {
    pub size_bytes: u64,
    /// Minimum row pitch the encoder can live with; 0 for buffers.
    pub row_pitch_bytes: u32,
}

/// A granted backing allocation. `alloc_id` is opaque and nonzero;
/// `row_pitch_bytes` may be wider than requested.
#[derive(Clone, Copy, Debug)]
pub struct BackingAllocation {
    pub alloc_id: u32,
    pub size_bytes: u64,
    pub row_pitch_bytes: u32,
}

/// One guest allocation referenced by a submission, with its access class.
///
/// `write` is set while the allocation backs a bound render/depth target and
/// demoted back to a read reference when that binding is evicted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllocationRef {
    pub alloc_id: u32,
    pub write: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FenceStatus {
    Signaled,
    Pending,
}

/// Guest-visible backing memory, handed out as opaque nonzero allocation ids.
///
/// Access is read/write based rather than pointer based so implementations can
/// live behind an emulated DMA path.
pub trait GuestAllocator: Send + Sync {
    fn allocate(&self, request: &BackingRequest) -> Result<BackingAllocation>;
    fn write(&self, alloc_id: u32, offset_bytes: u64, bytes: &[u8]) -> Result<()>;
    fn read(&self, alloc_id: u32, offset_bytes: u64, out: &mut [u8]) -> Result<()>;
    fn free(&self, alloc_id: u32);
}

/// Hands finalized command buffers to the GPU scheduler.
pub trait Submitter: Send + Sync {
    /// Queues `stream` for execution. `allocations` lists every guest
    /// allocation the stream references. Returns the fence that retires when
    /// the submission completes.
    fn submit(&self, stream: &[u8], allocations: &[AllocationRef]) -> Result<u64>;

    /// Waits for `fence`. A `timeout_ms` of 0 polls; `u32::MAX` blocks until
    /// the fence signals.
    fn wait_fence(&self, fence: u64, timeout_ms: u32) -> FenceStatus;
}

/// Bump allocator over one contiguous arena, for tests and bring-up.
///
/// Freed ranges are not reclaimed; allocation ids start at 1.
pub struct VecGuestAllocator {
    inner: Mutex<VecArena>,
}

struct VecArena {
    mem: Vec<u8>,
    /// alloc_id -> (arena offset, size).
    allocations: BTreeMap<u32, (u64, u64)>,
    next_id: u32,
    next_offset: u64,
}

impl VecGuestAllocator {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(VecArena {
                mem: vec![0u8; capacity_bytes],
                allocations: BTreeMap::new(),
                next_id: 1,
                next_offset: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecArena> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of live (not yet freed) allocations.
    pub fn live_allocations(&self) -> usize {
        self.lock().allocations.len()
    }

    /// Copies `len` bytes out of an allocation, panicking on a bad id/range.
    /// Test convenience around [`GuestAllocator::read`].
    pub fn snapshot(&self, alloc_id: u32, offset_bytes: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read(alloc_id, offset_bytes, &mut out)
            .unwrap_or_else(|err| panic!("snapshot of allocation {alloc_id} failed: {err}"));
        out
    }
}

impl VecArena {
    fn span(&self, alloc_id: u32, offset_bytes: u64, len: usize) -> Result<(usize, usize)> {
        let &(base, size) = self
            .allocations
            .get(&alloc_id)
            .ok_or(UmdError::InvalidArg("unknown allocation id"))?;
        let end = offset_bytes
            .checked_add(len as u64)
            .ok_or(UmdError::InvalidArg("allocation offset overflow"))?;
        if end > size {
            return Err(UmdError::Backing(format!(
                "access out of bounds: alloc={alloc_id} offset={offset_bytes} len={len} size={size}"
            )));
        }
        let start = base
            .checked_add(offset_bytes)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(UmdError::InvalidArg("allocation offset overflow"))?;
        Ok((start, start + len))
    }
}

impl GuestAllocator for VecGuestAllocator {
    fn allocate(&self, request: &BackingRequest) -> Result<BackingAllocation> {
        let mut arena = self.lock();
        // 256-byte aligned placement keeps texture rows naturally aligned.
        let offset = (arena.next_offset + 255) & !255;
        let end = offset
            .checked_add(request.size_bytes)
            .ok_or(UmdError::OutOfMemory("guest arena offset overflow"))?;
        if end > arena.mem.len() as u64 {
            return Err(UmdError::OutOfMemory("guest arena exhausted"));
        }
        let alloc_id = arena.next_id;
        arena.next_id += 1;
        arena.next_offset = end;
        arena.allocations.insert(alloc_id, (offset, request.size_bytes));
        Ok(BackingAllocation {
            alloc_id,
            size_bytes: request.size_bytes,
            row_pitch_bytes: request.row_pitch_bytes,
        })
    }

    fn write(&self, alloc_id: u32, offset_bytes: u64, bytes: &[u8]) -> Result<()> {
        let mut arena = self.lock();
        let (start, end) = arena.span(alloc_id, offset_bytes, bytes.len())?;
        arena.mem[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, alloc_id: u32, offset_bytes: u64, out: &mut [u8]) -> Result<()> {
        let arena = self.lock();
        let (start, end) = arena.span(alloc_id, offset_bytes, out.len())?;
        out.copy_from_slice(&arena.mem[start..end]);
        Ok(())
    }

    fn free(&self, alloc_id: u32) {
        self.lock().allocations.remove(&alloc_id);
    }
}

/// One recorded submission: the finalized stream plus its allocation refs.
#[derive(Clone, Debug)]
pub struct Submission {
    pub fence: u64,
    pub stream: Vec<u8>,
    pub allocations: Vec<AllocationRef>,
}

/// [`Submitter`] that records every submission for inspection.
///
/// Fences retire immediately by default; [`RecordingSubmitter::hold_fences`]
/// keeps them pending so wait paths can be exercised. A blocking wait
/// (`timeout_ms == u32::MAX`) on a held fence completes it, standing in for
/// the GPU eventually finishing.
pub struct RecordingSubmitter {
    inner: Mutex<SubmitterState>,
}

struct SubmitterState {
    submissions: Vec<Submission>,
    waits: Vec<(u64, u32)>,
    next_fence: u64,
    completed_fence: u64,
    hold_fences: bool,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SubmitterState {
                submissions: Vec::new(),
                waits: Vec::new(),
                next_fence: 1,
                completed_fence: 0,
                hold_fences: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubmitterState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stops fences from retiring on submit.
    pub fn hold_fences(&self) {
        self.lock().hold_fences = true;
    }

    /// Retires every fence up to and including `fence`.
    pub fn complete_through(&self, fence: u64) {
        let mut state = self.lock();
        state.completed_fence = state.completed_fence.max(fence);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn take_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut self.lock().submissions)
    }

    /// Every `(fence, timeout_ms)` pair passed to [`Submitter::wait_fence`].
    pub fn waits(&self) -> Vec<(u64, u32)> {
        self.lock().waits.clone()
    }
}

impl Default for RecordingSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit(&self, stream: &[u8], allocations: &[AllocationRef]) -> Result<u64> {
        let mut state = self.lock();
        let fence = state.next_fence;
        state.next_fence += 1;
        if !state.hold_fences {
            state.completed_fence = fence;
        }
        state.submissions.push(Submission {
            fence,
            stream: stream.to_vec(),
            allocations: allocations.to_vec(),
        });
        Ok(fence)
    }

    fn wait_fence(&self, fence: u64, timeout_ms: u32) -> FenceStatus {
        let mut state = self.lock();
        state.waits.push((fence, timeout_ms));
        if state.completed_fence >= fence {
            return FenceStatus::Signaled;
        }
        if timeout_ms == u32::MAX {
            state.completed_fence = fence;
            return FenceStatus::Signaled;
        }
        FenceStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_round_trips_bytes() {
        let allocator = VecGuestAllocator::new(4096);
        let a = allocator
            .allocate(&BackingRequest {
                size_bytes: 64,
                row_pitch_bytes: 0,
            })
            .unwrap();
        assert_ne!(a.alloc_id, 0);

        allocator.write(a.alloc_id, 8, b"hello").unwrap();
        let mut out = [0u8; 5];
        allocator.read(a.alloc_id, 8, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn arena_rejects_out_of_bounds_access() {
        let allocator = VecGuestAllocator::new(4096);
        let a = allocator
            .allocate(&BackingRequest {
                size_bytes: 16,
                row_pitch_bytes: 0,
            })
            .unwrap();
        let err = allocator.write(a.alloc_id, 12, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, UmdError::Backing(_)));

        allocator.free(a.alloc_id);
        let err = allocator.write(a.alloc_id, 0, &[0u8; 1]).unwrap_err();
        assert!(matches!(err, UmdError::InvalidArg(_)));
    }

    #[test]
    fn arena_exhaustion_is_out_of_memory() {
        let allocator = VecGuestAllocator::new(256);
        let err = allocator
            .allocate(&BackingRequest {
                size_bytes: 512,
                row_pitch_bytes: 0,
            })
            .unwrap_err();
        assert!(matches!(err, UmdError::OutOfMemory(_)));
    }

    #[test]
    fn held_fences_stay_pending_until_completed() {
        let submitter = RecordingSubmitter::new();
        submitter.hold_fences();
        let fence = submitter.submit(&[1, 2, 3], &[]).unwrap();

        assert_eq!(submitter.wait_fence(fence, 0), FenceStatus::Pending);
        submitter.complete_through(fence);
        assert_eq!(submitter.wait_fence(fence, 0), FenceStatus::Signaled);
        assert_eq!(submitter.waits(), vec![(fence, 0), (fence, 0)]);
    }

    #[test]
    fn blocking_wait_retires_a_held_fence() {
        let submitter = RecordingSubmitter::new();
        submitter.hold_fences();
        let fence = submitter.submit(&[], &[]).unwrap();
        assert_eq!(submitter.wait_fence(fence, u32::MAX), FenceStatus::Signaled);
    }
}
