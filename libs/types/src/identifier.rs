//! Model addressing
//!
//! Every model in a process is addressed by a [`ModelId`]: a 64-bit value
//! whose byte representation is always a printable 8-character form. The id
//! is the address *and* its display form, so no registry lookup is needed to
//! print one, and two processes that agree on the 8 bytes agree on the id.
//!
//! Auto-generated ids push a process-wide counter through an avalanching
//! mixer so consecutive allocations land far apart in the id space, then
//! keep 42 bits of the result as seven 6-bit symbols behind a `_` prefix.
//! Explicit ids are the caller's string, space-padded or truncated to
//! exactly 8 bytes.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Length of the printable form in bytes.
pub const ID_LEN: usize = 8;

/// Prefix byte marking an auto-generated id.
const AUTO_PREFIX: u8 = b'_';

/// Bits of mixer output kept for the seven encoded symbols.
const ENCODED_BITS: u32 = 42;

/// 64-symbol alphabet for the encoded portion of an auto-generated id.
const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-+";

/// Monotonic seed for auto-generated ids. Gaps are fine; density is not
/// required, only process-wide uniqueness.
static NEXT_SEED: AtomicU64 = AtomicU64::new(1);

/// Finalizer of the splitmix64 generator. Full-avalanche: every input bit
/// affects every output bit, so masking to the low 42 bits still yields a
/// well-distributed value.
#[inline]
fn avalanche(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Compact 64-bit model address with a printable 8-character form.
///
/// Equality and hashing are on the 64-bit value. The value round-trips
/// through [`ModelId::to_bytes`] / [`ModelId::from_bytes`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    /// Allocate a fresh process-unique id.
    ///
    /// The 42-bit space holds ~4.4e12 ids; the counter is never recycled,
    /// so collisions within one process are impossible until the counter
    /// wraps the mixer's input space.
    pub fn generate() -> Self {
        let seed = NEXT_SEED.fetch_add(1, Ordering::Relaxed);
        let hash = avalanche(seed) & ((1u64 << ENCODED_BITS) - 1);

        let mut bytes = [0u8; ID_LEN];
        bytes[0] = AUTO_PREFIX;
        for (i, slot) in bytes[1..].iter_mut().enumerate() {
            let shift = ENCODED_BITS - 6 * (i as u32 + 1);
            *slot = ALPHABET[((hash >> shift) & 0x3f) as usize];
        }
        Self(u64::from_le_bytes(bytes))
    }

    /// Build an id from a caller-supplied name.
    ///
    /// Shorter names are right-padded with spaces to 8 bytes; longer names
    /// keep their **last** 8 bytes, so hierarchical names ("lobby/player3")
    /// stay distinct in their most specific part.
    pub fn named(name: &str) -> Self {
        let raw = name.as_bytes();
        let mut bytes = [b' '; ID_LEN];
        if raw.len() >= ID_LEN {
            bytes.copy_from_slice(&raw[raw.len() - ID_LEN..]);
        } else {
            bytes[..raw.len()].copy_from_slice(raw);
        }
        Self(u64::from_le_bytes(bytes))
    }

    /// Reconstruct an id from its 8-byte representation.
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// The 8-byte representation. `from_bytes(id.to_bytes()) == id`.
    pub fn to_bytes(self) -> [u8; ID_LEN] {
        self.0.to_le_bytes()
    }

    /// The raw 64-bit value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Whether this id came from [`ModelId::generate`].
    pub fn is_generated(self) -> bool {
        self.to_bytes()[0] == AUTO_PREFIX
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        // Explicit ids may carry arbitrary bytes; render lossy rather than fail.
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

// Debug prints the printable form, not the opaque u64.
impl fmt::Debug for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelId({})", self)
    }
}

impl Serialize for ModelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct ModelIdVisitor;

impl<'de> Visitor<'de> for ModelIdVisitor {
    type Value = ModelId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an 8-character model id string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ModelId, E> {
        if v.len() == ID_LEN && v.is_ascii() {
            let mut bytes = [0u8; ID_LEN];
            bytes.copy_from_slice(v.as_bytes());
            Ok(ModelId::from_bytes(bytes))
        } else {
            Ok(ModelId::named(v))
        }
    }
}

impl<'de> Deserialize<'de> for ModelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ModelIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(ModelId::generate()));
        }
    }

    #[test]
    fn generated_ids_are_printable() {
        let id = ModelId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), ID_LEN);
        assert!(text.starts_with('_'));
        assert!(text.bytes().all(|b| b.is_ascii_graphic()));
        assert!(id.is_generated());
    }

    #[test]
    fn round_trips_through_bytes() {
        for id in [ModelId::generate(), ModelId::named("lobby"), ModelId::named("x")] {
            assert_eq!(ModelId::from_bytes(id.to_bytes()), id);
        }
    }

    #[test]
    fn short_names_pad_with_spaces() {
        let id = ModelId::named("core");
        assert_eq!(id.to_string(), "core    ");
        assert!(!id.is_generated());
    }

    #[test]
    fn long_names_keep_the_tail() {
        let id = ModelId::named("game/lobby/player3");
        assert_eq!(id.to_string(), "/player3");
    }

    #[test]
    fn exact_length_names_are_verbatim() {
        let id = ModelId::named("exactly8");
        assert_eq!(id.to_string(), "exactly8");
    }

    #[test]
    fn equality_is_on_the_value() {
        assert_eq!(ModelId::named("a"), ModelId::named("a"));
        assert_ne!(ModelId::named("a"), ModelId::named("b"));
    }

    #[test]
    fn serde_round_trip() {
        let id = ModelId::named("player_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"player_1\"");
        let back: ModelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
