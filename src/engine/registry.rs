//! Engine registry
//!
//! Engines are looked up by name and operator version. Without an explicit
//! version the newest registered one is used.

use super::{EngineRef, PsmdbConfig, PsmdbEngine, PxcConfig, PxcEngine};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, BTreeMap<String, EngineRef>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in engines
    pub fn with_defaults(pxc: PxcConfig, psmdb: PsmdbConfig, namespace: &str) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PxcEngine::new(pxc, namespace)?))?;
        registry.register(Arc::new(PsmdbEngine::new(psmdb, namespace)?))?;
        Ok(registry)
    }

    pub fn register(&mut self, engine: EngineRef) -> Result<()> {
        let versions = self.engines.entry(engine.name().to_string()).or_default();
        if versions.contains_key(engine.version()) {
            return Err(Error::Configuration(format!(
                "engine {} {} is registered twice",
                engine.name(),
                engine.version()
            )));
        }
        debug!("Registered engine {} {}", engine.name(), engine.version());
        versions.insert(engine.version().to_string(), engine);
        Ok(())
    }

    /// Engine `name` at `version`, or at its newest version
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<EngineRef> {
        let unknown = || Error::UnknownEngine {
            engine: match version {
                Some(v) => format!("{} {}", name, v),
                None => name.to_string(),
            },
        };
        let versions = self.engines.get(name).ok_or_else(unknown)?;
        let engine = match version {
            Some(v) => versions.get(v),
            None => versions
                .iter()
                .max_by(|(a, _), (b, _)| compare_versions(a, b))
                .map(|(_, engine)| engine),
        };
        engine.cloned().ok_or_else(unknown)
    }

    /// `(name, version)` of every registered engine
    pub fn list(&self) -> Vec<(String, String)> {
        self.engines
            .iter()
            .flat_map(|(name, versions)| {
                versions
                    .keys()
                    .map(move |version| (name.clone(), version.clone()))
            })
            .collect()
    }
}

/// Compare dotted versions numerically, falling back to text per component
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}
