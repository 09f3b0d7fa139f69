//! Region registry
//!
//! Region ids are case-folded and restricted to `[a-z0-9_-]{1,64}`.
//! Requests for ids outside the registry are rejected before any source is
//! contacted.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum length of a region id
pub const MAX_REGION_ID_LEN: usize = 64;

/// Validate and case-fold a region id
pub fn normalize_region_id(raw: &str) -> IndexResult<String> {
    let id = raw.trim().to_ascii_lowercase();
    if id.is_empty() || id.len() > MAX_REGION_ID_LEN {
        return Err(IndexError::InvalidRegion(format!(
            "region id must be 1-{} characters: {:?}",
            MAX_REGION_ID_LEN, raw
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
    {
        return Err(IndexError::InvalidRegion(format!(
            "region id {:?} contains invalid character {:?}",
            raw, c
        )));
    }
    Ok(id)
}

/// Set of regions the engine will serve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionRegistry {
    regions: BTreeSet<String>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting any invalid id
    pub fn from_ids<I, S>(ids: I) -> IndexResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for id in ids {
            registry.register(id.as_ref())?;
        }
        Ok(registry)
    }

    /// Register a region and return its normalized id
    pub fn register(&mut self, raw: &str) -> IndexResult<String> {
        let id = normalize_region_id(raw)?;
        self.regions.insert(id.clone());
        Ok(id)
    }

    /// Normalize `raw` and confirm it is registered
    pub fn resolve(&self, raw: &str) -> IndexResult<String> {
        let id = normalize_region_id(raw)?;
        if self.regions.contains(&id) {
            Ok(id)
        } else {
            Err(IndexError::InvalidRegion(format!("unknown region: {}", id)))
        }
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.resolve(raw).is_ok()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.as_str())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
