//! Coordination-free, time-ordered key generation.
//!
//! An id is a 64-bit value laid out as
//!
//! ```text
//! | 30 bits: seconds since EPOCH_OFFSET | 17 bits: node | 17 bits: sequence |
//! ```
//!
//! The low 34 bits are run through a keyed Feistel permutation before encoding, so ids from the
//! same second are not guessable while ids from later seconds still sort after earlier ones. The
//! encoded form is 13 characters of lowercase base32hex, which preserves numeric order.
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const EPOCH_OFFSET: u64 = 1_730_000_000;
pub const SECRET_LEN: usize = 16;
pub const ID_LEN: usize = 13;

const TIMESTAMP_BITS: u32 = 30;
const NODE_BITS: u32 = 17;
const SEQUENCE_BITS: u32 = 17;
const HALF_BITS: u32 = 17;
const SEALED_BITS: u32 = NODE_BITS + SEQUENCE_BITS;

const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;
pub const MAX_NODE: u32 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u32 = (1 << SEQUENCE_BITS) - 1;
const HALF_MASK: u64 = (1 << HALF_BITS) - 1;
const SEALED_MASK: u64 = (1 << SEALED_BITS) - 1;

const ROUNDS: u8 = 6;
const KEY_CONTEXT: &str = "sqlbench 2024-11 identifier feistel round key";
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

const DEFAULT_SECRET: &[u8; SECRET_LEN] = b"sqlbench-idgen-k";
const DEFAULT_LEASE_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("Secret must be {SECRET_LEN} bytes, got {len}")]
    InvalidSecret { len: usize },

    #[error("Node {0} does not fit in {NODE_BITS} bits")]
    InvalidNode(u32),

    #[error("Invalid lease window {start}..{end}")]
    InvalidLease { start: u64, end: u64 },

    #[error("Lease expired at {end}, now {now}")]
    LeaseExpired { end: u64, now: u64 },

    #[error("Lease starts at {start}, now {now}")]
    LeaseNotStarted { start: u64, now: u64 },

    #[error("Sequence exhausted for second {0}")]
    SequenceExhausted(u64),

    #[error("Malformed id {0:?}")]
    Malformed(String),
}

/// The fields recovered from an id by [`IdGenerator::inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Unix seconds.
    pub timestamp: u64,
    pub node: u32,
    pub sequence: u32,
}

/// Per-worker generator. Never shared, so generation takes `&mut self` and needs no locking.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    node: u32,
    lease_start: u64,
    lease_end: u64,
    key: [u8; 32],
    last_ts: u64,
    next_seq: u32,
}

impl IdGenerator {
    pub fn new(node: u32, lease_start: u64, lease_end: u64, secret: &[u8]) -> Result<Self, IdError> {
        if secret.len() != SECRET_LEN {
            return Err(IdError::InvalidSecret { len: secret.len() });
        }
        if node > MAX_NODE {
            return Err(IdError::InvalidNode(node));
        }
        if lease_start < EPOCH_OFFSET || lease_end < lease_start || lease_end > EPOCH_OFFSET + MAX_TIMESTAMP {
            return Err(IdError::InvalidLease {
                start: lease_start,
                end: lease_end,
            });
        }

        Ok(Self {
            node,
            lease_start,
            lease_end,
            key: blake3::derive_key(KEY_CONTEXT, secret),
            last_ts: 0,
            next_seq: 0,
        })
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn generate(&mut self) -> Result<String, IdError> {
        self.generate_at(unix_now())
    }

    pub(crate) fn generate_at(&mut self, now: u64) -> Result<String, IdError> {
        if now > self.lease_end {
            return Err(IdError::LeaseExpired {
                end: self.lease_end,
                now,
            });
        }
        if now < self.lease_start {
            return Err(IdError::LeaseNotStarted {
                start: self.lease_start,
                now,
            });
        }

        // A clock stepping backwards keeps the last second so ids never repeat.
        let ts = now.max(self.last_ts);
        if ts != self.last_ts {
            self.last_ts = ts;
            self.next_seq = 0;
        }
        if self.next_seq > MAX_SEQUENCE {
            return Err(IdError::SequenceExhausted(ts));
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let low = ((self.node as u64) << SEQUENCE_BITS) | seq as u64;
        let id = ((ts - EPOCH_OFFSET) << SEALED_BITS) | self.seal(low);
        Ok(encode(id))
    }

    pub fn inspect(&self, id: &str) -> Result<IdParts, IdError> {
        let raw = decode(id).ok_or_else(|| IdError::Malformed(id.to_string()))?;
        let low = self.unseal(raw & SEALED_MASK);
        Ok(IdParts {
            timestamp: (raw >> SEALED_BITS) + EPOCH_OFFSET,
            node: (low >> SEQUENCE_BITS) as u32,
            sequence: (low & MAX_SEQUENCE as u64) as u32,
        })
    }

    fn round(&self, round: u8, half: u64) -> u64 {
        let mut input = [0u8; 5];
        input[0] = round;
        input[1..].copy_from_slice(&(half as u32).to_le_bytes());
        let hash = blake3::keyed_hash(&self.key, &input);

        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word) & HALF_MASK
    }

    fn seal(&self, value: u64) -> u64 {
        let (mut left, mut right) = (value >> HALF_BITS, value & HALF_MASK);
        for r in 0..ROUNDS {
            (left, right) = (right, left ^ self.round(r, right));
        }
        (left << HALF_BITS) | right
    }

    fn unseal(&self, value: u64) -> u64 {
        let (mut left, mut right) = (value >> HALF_BITS, value & HALF_MASK);
        for r in (0..ROUNDS).rev() {
            (left, right) = (right ^ self.round(r, left), left);
        }
        (left << HALF_BITS) | right
    }
}

/// A generator for one benchmark worker: node `worker`, valid for the next hour.
pub fn generator_for_worker(worker: u32) -> Result<IdGenerator, IdError> {
    let now = unix_now();
    IdGenerator::new(worker, now, now + DEFAULT_LEASE_SECS, DEFAULT_SECRET)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn encode(mut id: u64) -> String {
    let mut out = [b'0'; ID_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(id & 31) as usize];
        id >>= 5;
    }
    out.iter().map(|b| *b as char).collect()
}

fn decode(id: &str) -> Option<u64> {
    if id.len() != ID_LEN {
        return None;
    }
    let mut value: u64 = 0;
    for (i, c) in id.bytes().enumerate() {
        let digit = ALPHABET.iter().position(|a| *a == c)? as u64;
        // The leading character only carries the top four bits.
        if i == 0 && digit > 15 {
            return None;
        }
        value = (value << 5) | digit;
    }
    Some(value)
}
