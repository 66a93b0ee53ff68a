//! Canonical key normalization and hashing
//!
//! Every component that needs key identity consumes the opaque normalized
//! string produced here; nothing else inspects key shape at runtime.

use super::{ItemKey, LocKey};
use serde_json::{Map, Value, json};

/// Produce the canonical string form of a key.
///
/// Scalar identifiers are coerced to their decimal string form, `loc` array
/// positions are preserved, and object key order is fixed, so any two
/// logically equal keys map to byte-identical strings.
pub fn normalize(key: &ItemKey) -> String {
    // serde_json's default Map is a BTreeMap, which fixes object key order.
    let mut obj = Map::new();
    obj.insert("kt".to_string(), Value::String(key.kt().to_string()));
    obj.insert("pk".to_string(), Value::String(key.pk().canonical()));
    if let ItemKey::Composite(com) = key {
        let loc: Vec<Value> = com
            .loc
            .iter()
            .map(|l| json!({"kt": l.kt, "lk": l.lk.canonical()}))
            .collect();
        obj.insert("loc".to_string(), Value::Array(loc));
    }
    Value::Object(obj).to_string()
}

/// Canonical form of a location prefix, used in query hashes
pub fn normalize_loc(locations: &[LocKey]) -> Vec<Value> {
    locations
        .iter()
        .map(|l| json!({"kt": l.kt, "lk": l.lk.canonical()}))
        .collect()
}

/// Positional equality of two location prefixes, type-insensitive on ids
pub fn loc_equals(a: &[LocKey], b: &[LocKey]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.kt == y.kt && x.lk == y.lk)
}

const FNV_OFFSET_32: u32 = 0x811c_9dc5;
const FNV_PRIME_32: u32 = 0x0100_0193;
const FNV_OFFSET_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME_64: u64 = 0x0000_0100_0000_01b3;

/// Seeded 32-bit FNV-1a. All arithmetic stays in unsigned 32-bit space.
pub fn fnv1a_32(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = FNV_OFFSET_32 ^ seed;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_64;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME_64);
    }
    hash
}

/// Avalanche-style finalizer improving bit dispersion of an FNV hash
pub fn mix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// 64-bit storage hash of a key, as 16 hex characters.
///
/// Serialized stores key their entries by this value; it is filesystem- and
/// prefix-safe.
pub fn key_hash(key: &ItemKey) -> String {
    format!("{:016x}", fnv1a_64(normalize(key).as_bytes()))
}

/// Independent 32-bit verification hash over a normalized key string.
///
/// Stored alongside serialized entries so a storage-hash collision between
/// two different logical keys is detectable and resolves to a miss.
pub fn verification_hash(normalized: &str) -> u32 {
    mix32(fnv1a_32(normalized.as_bytes(), 0x9e37_79b9))
}
