//! Guest-visible AeroGPU ABI definitions shared by the emulator, the guest
//! drivers and tests. Pure data contract; no runtime dependencies.

pub mod aerogpu;
