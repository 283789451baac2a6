//! Upload payload generation
//!
//! Every upload stream carries the same buffer: a Park–Miller (MINSTD)
//! sequence seeded at 1, one output byte per step. The buffer is built once
//! and shared read-only across tasks as a [`Bytes`] handle.

use bytes::Bytes;

const MULTIPLIER: u64 = 48271;
const MODULUS: u64 = 2_147_483_647;

/// Generate `size` bytes of deterministic pseudo-random data.
///
/// Each step computes `seed = seed * 48271 mod (2^31 - 1)` and keeps the
/// low-order byte of the new seed.
pub fn generate(size: usize) -> Bytes {
    let mut seed: u64 = 1;
    let data: Vec<u8> = (0..size)
        .map(|_| {
            seed = seed * MULTIPLIER % MODULUS;
            seed as u8
        })
        .collect();
    Bytes::from(data)
}
