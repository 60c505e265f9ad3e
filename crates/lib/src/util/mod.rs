//! Digest helpers and shared test fixtures.

pub mod hash;

#[cfg(test)]
pub mod testutil;
