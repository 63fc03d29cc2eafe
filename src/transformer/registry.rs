//! Lookup of transformers by configuration identifier.

use super::{HeaderTransformer, JsonTransformer, TransformerRef};
use crate::config::TransformerSpec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Transformers available to routes, keyed by id.
#[derive(Default, Clone)]
pub struct TransformerRegistry {
    transformers: HashMap<String, TransformerRef>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured transformers.
    pub fn from_specs(specs: &BTreeMap<String, TransformerSpec>) -> Self {
        let mut registry = Self::new();
        for (id, spec) in specs {
            let transformer: TransformerRef = match spec {
                TransformerSpec::Header(config) => Arc::new(HeaderTransformer::new(id.clone(), config)),
                TransformerSpec::Json(config) => Arc::new(JsonTransformer::new(id.clone(), config)),
            };
            registry.register(id.clone(), transformer);
        }
        registry
    }

    /// Add or replace a transformer.
    pub fn register(&mut self, id: impl Into<String>, transformer: TransformerRef) {
        self.transformers.insert(id.into(), transformer);
    }

    pub fn get(&self, id: &str) -> Option<&TransformerRef> {
        self.transformers.get(id)
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Resolve an ordered list of ids into a chain.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<TransformerRef>, RegistryError> {
        ids.iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownTransformer(id.clone()))
            })
            .collect()
    }
}

/// Errors resolving transformer references.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaderTransform, JsonTransform};

    fn specs() -> BTreeMap<String, TransformerSpec> {
        let mut specs = BTreeMap::new();
        specs.insert(
            "headers".to_string(),
            TransformerSpec::Header(HeaderTransform::default()),
        );
        specs.insert(
            "fields".to_string(),
            TransformerSpec::Json(JsonTransform { operations: vec![] }),
        );
        specs
    }

    #[test]
    fn test_from_specs() {
        let registry = TransformerRegistry::from_specs(&specs());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("headers").unwrap().name(), "headers");
        assert_eq!(registry.get("fields").unwrap().name(), "fields");
    }

    #[test]
    fn test_resolve_keeps_order() {
        let registry = TransformerRegistry::from_specs(&specs());
        let chain = registry
            .resolve(&["fields".to_string(), "headers".to_string()])
            .unwrap();
        let names: Vec<_> = chain.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["fields", "headers"]);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = TransformerRegistry::from_specs(&specs());
        let err = registry
            .resolve(&["headers".to_string(), "tokenizer".to_string()])
            .err().unwrap();
        assert!(matches!(err, RegistryError::UnknownTransformer(id) if id == "tokenizer"));
    }
}
