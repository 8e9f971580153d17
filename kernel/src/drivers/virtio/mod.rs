//! Virtio-mmio transport and the block driver built on it (spec §4.5).

pub mod blk;
pub mod mmio;
