//! Feature schema and feature vectors.
//!
//! The schema is the ordered list of feature names a model was trained on.
//! It is fingerprinted (CRC32 over version and names) so mismatches are cheap
//! to detect, but equality always compares the names themselves.

use crate::error::{PipelineError, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bump when the meaning or order of generated features changes.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: u32,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self::with_version(FEATURE_SCHEMA_VERSION, names)
    }

    pub fn with_version(version: u32, names: Vec<String>) -> Self {
        let fingerprint = compute_fingerprint(version, &names);
        Self {
            version,
            fingerprint,
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Fail with `SchemaMismatch` unless `other` has the same names in the same order.
    pub fn ensure_matches(&self, other: &FeatureSchema) -> Result<()> {
        if self.fingerprint == other.fingerprint && self == other {
            return Ok(());
        }
        Err(PipelineError::schema_mismatch(&self.names, &other.names))
    }

    /// Recompute the fingerprint and compare with the stored one.
    pub fn verify_fingerprint(&self) -> Result<()> {
        let expected = compute_fingerprint(self.version, &self.names);
        if expected == self.fingerprint {
            Ok(())
        } else {
            Err(PipelineError::InvalidArtifact(format!(
                "schema fingerprint {:08x} does not match its names ({expected:08x})",
                self.fingerprint
            )))
        }
    }
}

fn compute_fingerprint(version: u32, names: &[String]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&version.to_le_bytes());
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

/// Values for one transaction, tied to the schema that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Pair values with a schema; lengths must agree.
    pub fn new(schema: Arc<FeatureSchema>, values: Vec<f64>) -> Result<Self> {
        if values.len() != schema.len() {
            let actual: Vec<String> = (0..values.len()).map(|i| format!("#{i}")).collect();
            return Err(PipelineError::schema_mismatch(&schema.names, &actual));
        }
        Ok(Self { schema, values })
    }

    /// Build from named values; the order of `pairs` becomes the schema order.
    pub fn from_pairs(pairs: Vec<(String, f64)>) -> Self {
        let (names, values): (Vec<String>, Vec<f64>) = pairs.into_iter().unzip();
        Self {
            schema: Arc::new(FeatureSchema::new(names)),
            values,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_changes_fingerprint() {
        let a = FeatureSchema::new(names(&["amount", "hour"]));
        let b = FeatureSchema::new(names(&["hour", "amount"]));
        assert_ne!(a.fingerprint, b.fingerprint);
        assert!(a.ensure_matches(&b).is_err());
        assert!(a.ensure_matches(&a.clone()).is_ok());
    }

    #[test]
    fn test_version_changes_fingerprint() {
        let a = FeatureSchema::with_version(1, names(&["amount"]));
        let b = FeatureSchema::with_version(2, names(&["amount"]));
        assert!(a.ensure_matches(&b).is_err());
    }

    #[test]
    fn test_tampered_fingerprint_detected() {
        let mut schema = FeatureSchema::new(names(&["amount"]));
        assert!(schema.verify_fingerprint().is_ok());
        schema.names.push("extra".into());
        assert!(schema.verify_fingerprint().is_err());
    }

    #[test]
    fn test_vector_length_checked() {
        let schema = Arc::new(FeatureSchema::new(names(&["a", "b"])));
        assert!(FeatureVector::new(schema.clone(), vec![1.0]).is_err());

        let v = FeatureVector::new(schema, vec![1.0, 2.0]).unwrap();
        assert_eq!(v.get("b"), Some(2.0));
        assert_eq!(v.get("c"), None);
    }

    #[test]
    fn test_from_pairs_keeps_order() {
        let v = FeatureVector::from_pairs(vec![("z".into(), 1.0), ("a".into(), 2.0)]);
        let collected: Vec<_> = v.iter().collect();
        assert_eq!(collected, vec![("z", 1.0), ("a", 2.0)]);
    }
}
