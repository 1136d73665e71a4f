//! Public identifiers for stored objects.
//!
//! Ids are 10 symbols drawn from a 64-symbol URL-safe alphabet (60 bits)
//! using the thread-local CSPRNG, so adjacent uploads share no structure.

use rand::Rng;

pub const ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

pub const DEFAULT_ID_LEN: usize = 10;

#[derive(Clone, Copy, Debug)]
pub struct IdGenerator {
    len: usize,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LEN)
    }
}

impl IdGenerator {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }

    /// Draw a fresh identifier.
    pub fn next_id(&self) -> String {
        let mut rng = rand::rng();
        (0..self.len)
            .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
            .collect()
    }

    /// True if `candidate` could have been produced by this generator.
    pub fn is_well_formed(&self, candidate: &str) -> bool {
        candidate.len() == self.len && candidate.bytes().all(|b| ID_ALPHABET.contains(&b))
    }
}
