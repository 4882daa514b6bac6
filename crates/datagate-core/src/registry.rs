//! Kind → decoder registry.
//!
//! The registry is an explicit value: build it once during bootstrap, then
//! share `&SourceRegistry` with anything that decodes. Registration needs
//! `&mut self`, so the write phase is over before the registry can be shared.

use std::collections::HashMap;
use std::sync::Arc;

use serde_yaml::Value;

use crate::backends;
use crate::config::{document_kind, DecodeContext};
use crate::error::{DecodeError, RegistryError};
use crate::source::SourceConfig;

/// Decoder registered for one kind.
pub type DecodeFn = fn(&DecodeContext, Value) -> Result<Arc<dyn SourceConfig>, DecodeError>;

/// Table of source kinds known to one process.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in backend kind.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        backends::register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// Inserts `decoder` under `kind`.
    ///
    /// Returns `false` and keeps the existing decoder if `kind` is already
    /// registered (or empty). Callers must treat `false` as fatal.
    #[must_use = "a rejected registration is a startup error"]
    pub fn register(&mut self, kind: impl Into<String>, decoder: DecodeFn) -> bool {
        self.try_register(kind, decoder).is_ok()
    }

    pub fn try_register(
        &mut self,
        kind: impl Into<String>,
        decoder: DecodeFn,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if self.decoders.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind { kind });
        }
        self.decoders.insert(kind, decoder);
        Ok(())
    }

    pub fn lookup(&self, kind: &str) -> Option<DecodeFn> {
        self.decoders.get(kind).copied()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.decoders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decodes one named document through the decoder of its `kind`.
    pub fn decode(&self, name: &str, raw: Value) -> Result<Arc<dyn SourceConfig>, DecodeError> {
        let ctx = DecodeContext::new(name)?;
        let kind = document_kind(&ctx, &raw)?.to_owned();
        let decoder = self
            .lookup(&kind)
            .ok_or_else(|| DecodeError::UnknownKind {
                source_name: name.to_owned(),
                kind: kind.clone(),
            })?;

        let config = decoder(&ctx, raw)?;
        if config.kind() != kind {
            return Err(DecodeError::KindMismatch {
                source_name: name.to_owned(),
                expected: kind,
                actual: config.kind().to_owned(),
            });
        }
        Ok(config)
    }
}
