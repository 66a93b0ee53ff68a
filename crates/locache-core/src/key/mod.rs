//! Primary and composite key types

mod normalize;

pub use normalize::{
    fnv1a_32, key_hash, loc_equals, mix32, normalize, normalize_loc, verification_hash,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of location levels a composite key may carry
pub const MAX_LOCATION_DEPTH: usize = 5;

/// Scalar identifier for keys: a string or an integer.
///
/// The remote API and the serialised stores round-trip identifiers in
/// heterogeneous scalar types; two identifiers are equal when their decimal
/// string forms are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyId {
    Num(i64),
    Str(String),
}

impl KeyId {
    /// Canonical decimal string form used for equality and normalization
    pub fn canonical(&self) -> String {
        match self {
            KeyId::Num(n) => n.to_string(),
            KeyId::Str(s) => s.clone(),
        }
    }

    /// True when the identifier carries no usable value
    pub fn is_empty(&self) -> bool {
        matches!(self, KeyId::Str(s) if s.is_empty())
    }
}

impl PartialEq for KeyId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for KeyId {}

impl std::hash::Hash for KeyId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for KeyId {
    fn from(n: i64) -> Self {
        KeyId::Num(n)
    }
}

impl From<i32> for KeyId {
    fn from(n: i32) -> Self {
        KeyId::Num(n as i64)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        KeyId::Str(s.to_string())
    }
}

impl From<String> for KeyId {
    fn from(s: String) -> Self {
        KeyId::Str(s)
    }
}

/// Primary key: a type tag plus a scalar identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriKey {
    pub kt: String,
    pub pk: KeyId,
}

/// One containment level of a composite key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocKey {
    pub kt: String,
    pub lk: KeyId,
}

impl LocKey {
    pub fn new(kt: impl Into<String>, lk: impl Into<KeyId>) -> Self {
        Self {
            kt: kt.into(),
            lk: lk.into(),
        }
    }
}

/// Composite key: a primary identifier plus its containing scopes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComKey {
    pub kt: String,
    pub pk: KeyId,
    pub loc: Vec<LocKey>,
}

/// A key identifying an item: either top-level or scoped by locations.
///
/// Untagged on the wire; a key object carrying `loc` parses as composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemKey {
    Composite(ComKey),
    Primary(PriKey),
}

impl ItemKey {
    /// Build a primary key
    pub fn primary(kt: impl Into<String>, pk: impl Into<KeyId>) -> Self {
        ItemKey::Primary(PriKey {
            kt: kt.into(),
            pk: pk.into(),
        })
    }

    /// Build a composite key
    pub fn composite(kt: impl Into<String>, pk: impl Into<KeyId>, loc: Vec<LocKey>) -> Self {
        ItemKey::Composite(ComKey {
            kt: kt.into(),
            pk: pk.into(),
            loc,
        })
    }

    /// The key's type tag
    pub fn kt(&self) -> &str {
        match self {
            ItemKey::Primary(k) => &k.kt,
            ItemKey::Composite(k) => &k.kt,
        }
    }

    /// The key's scalar identifier
    pub fn pk(&self) -> &KeyId {
        match self {
            ItemKey::Primary(k) => &k.pk,
            ItemKey::Composite(k) => &k.pk,
        }
    }

    /// Location levels; empty for a primary key
    pub fn loc(&self) -> &[LocKey] {
        match self {
            ItemKey::Primary(_) => &[],
            ItemKey::Composite(k) => &k.loc,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ItemKey::Composite(_))
    }

    /// Structural validity check: non-empty tags and identifiers, and for
    /// composite keys a location depth of 1..=MAX_LOCATION_DEPTH.
    pub fn is_valid(&self) -> bool {
        if self.kt().is_empty() || self.pk().is_empty() {
            return false;
        }
        match self {
            ItemKey::Primary(_) => true,
            ItemKey::Composite(k) => {
                !k.loc.is_empty()
                    && k.loc.len() <= MAX_LOCATION_DEPTH
                    && k.loc.iter().all(|l| !l.kt.is_empty() && !l.lk.is_empty())
            }
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&normalize(self))
    }
}

impl From<PriKey> for ItemKey {
    fn from(k: PriKey) -> Self {
        ItemKey::Primary(k)
    }
}

impl From<ComKey> for ItemKey {
    fn from(k: ComKey) -> Self {
        ItemKey::Composite(k)
    }
}
