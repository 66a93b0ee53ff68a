//! Coordinates: the key-type hierarchy a cache is bound to

use crate::error::{CacheError, Result};

/// The type-tag hierarchy one cache serves: the primary type tag followed
/// by its ancestor location tags, outermost last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    kta: Vec<String>,
}

impl Coordinate {
    pub fn new<I, S>(kta: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kta: Vec<String> = kta.into_iter().map(Into::into).collect();
        if kta.is_empty() || kta.iter().any(|t| t.is_empty()) {
            return Err(CacheError::ConfigInvalid(
                "coordinate requires at least one non-empty type tag".to_string(),
            ));
        }
        Ok(Self { kta })
    }

    /// Coordinate for a top-level entity type
    pub fn primary(kt: impl Into<String>) -> Result<Self> {
        Self::new([kt.into()])
    }

    /// The primary key type this cache stores
    pub fn pk_type(&self) -> &str {
        &self.kta[0]
    }

    /// Full tag hierarchy
    pub fn kta(&self) -> &[String] {
        &self.kta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_coordinate() {
        let coord = Coordinate::primary("user").unwrap();
        assert_eq!(coord.pk_type(), "user");
        assert_eq!(coord.kta(), &["user".to_string()]);
    }

    #[test]
    fn test_hierarchical_coordinate() {
        let coord = Coordinate::new(["task", "project", "org"]).unwrap();
        assert_eq!(coord.pk_type(), "task");
        assert_eq!(coord.kta().len(), 3);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Coordinate::new(Vec::<String>::new()).is_err());
        assert!(Coordinate::new(["task", ""]).is_err());
    }
}
