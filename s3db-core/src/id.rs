//! Document id generation.
//!
//! Per `spec.md` §3, ids are opaque strings; the default generator is
//! collision-resistant (≥122 bits of entropy) and URL-safe. Alternative
//! generators may be plugged in via the [`IdGenerator`] trait.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates opaque document ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Produce a new id. Implementations must be safe to call concurrently.
    fn generate(&self) -> String;
}

/// Default generator: a URL-safe, unpadded base64 encoding of a random
/// UUIDv4 (128 bits, of which 122 are entropy), matching the spec's
/// minimum-entropy requirement.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        let uuid = uuid::Uuid::new_v4();
        URL_SAFE_NO_PAD.encode(uuid.as_bytes())
    }
}

/// ULID-style generator: 48-bit millisecond timestamp followed by 80 bits
/// of randomness, base32-Crockford encoded so ids sort lexicographically
/// by creation time.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidGenerator;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut rng = rand::rng();
        let entropy: u128 = {
            use rand::RngCore;
            let mut buf = [0u8; 16];
            rng.fill_bytes(&mut buf);
            u128::from_be_bytes(buf)
        };
        let mut value: u128 = (u128::from(millis) << 80) | (entropy & ((1u128 << 80) - 1));
        let mut chars = [0u8; 26];
        for slot in chars.iter_mut().rev() {
            *slot = CROCKFORD[(value & 0x1f) as usize];
            value >>= 5;
        }
        String::from_utf8(chars.to_vec()).expect("crockford alphabet is ascii")
    }
}

/// Monotonically incrementing generator, useful for deterministic tests
/// and for resources that want dense, ordered ids within one process.
#[derive(Debug)]
pub struct IncrementingGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl IncrementingGenerator {
    /// Create a new generator with the given prefix, starting at 0.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for IncrementingGenerator {
    fn generate(&self) -> String {
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{next:020}", self.prefix)
    }
}

/// Wraps a user-supplied closure as an [`IdGenerator`], for fully custom
/// id schemes.
pub struct CustomGenerator {
    f: Box<dyn Fn() -> String + Send + Sync>,
}

impl CustomGenerator {
    /// Build a generator from a closure.
    pub fn new(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for CustomGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomGenerator").finish_non_exhaustive()
    }
}

impl IdGenerator for CustomGenerator {
    fn generate(&self) -> String {
        (self.f)()
    }
}
