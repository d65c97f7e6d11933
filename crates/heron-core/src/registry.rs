use std::collections::BTreeMap;

use crate::{CodecDescriptor, Error};

/// The kind of a keyed state.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_more::Display,
)]
pub enum StateKind {
    #[display(fmt = "value")]
    Value,
    #[display(fmt = "list")]
    List,
    #[display(fmt = "map")]
    Map,
}

/// Metadata describing one named keyed state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateMetaInfo {
    pub name: String,
    pub kind: StateKind,
    pub value_codec: CodecDescriptor,
    pub namespace_codec: CodecDescriptor,
}

impl StateMetaInfo {
    /// Metadata for a value state without a namespace.
    pub fn value(name: impl Into<String>, value_codec: CodecDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: StateKind::Value,
            value_codec,
            namespace_codec: CodecDescriptor::Void,
        }
    }
}

/// The keyed state metadata of an operator.
///
/// The registry is immutable: declaring a state or fixing the key codec
/// produces a new registry and leaves the original untouched. The written
/// blobs embed the registry as their header, and identify states by their
/// position in the name-ordered registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StateRegistry {
    key_codec: Option<CodecDescriptor>,
    states: BTreeMap<String, StateMetaInfo>,
    compression: bool,
}

impl StateRegistry {
    pub fn new(key_codec: Option<CodecDescriptor>, compression: bool) -> Self {
        Self {
            key_codec,
            states: BTreeMap::new(),
            compression,
        }
    }

    /// The key codec, if it has been fixed.
    pub fn key_codec(&self) -> Option<&CodecDescriptor> {
        self.key_codec.as_ref()
    }

    /// Whether key group payloads are compressed.
    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn get(&self, name: &str) -> Option<&StateMetaInfo> {
        self.states.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States in name order.
    pub fn states(&self) -> impl Iterator<Item = &StateMetaInfo> + '_ {
        self.states.values()
    }

    /// State names in name order. The position of a name is its state id.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.states.keys().map(String::as_str)
    }

    pub fn state_id(&self, name: &str) -> Option<u16> {
        self.states
            .keys()
            .position(|candidate| candidate == name)
            .map(|id| id as u16)
    }

    pub fn state_name(&self, id: u16) -> Option<&str> {
        self.states.keys().nth(id as usize).map(String::as_str)
    }

    /// Return a registry with the key codec fixed to `codec`.
    ///
    /// Fails if a different key codec was already fixed.
    pub fn with_key_codec(&self, codec: CodecDescriptor) -> error_stack::Result<Self, Error> {
        match &self.key_codec {
            Some(registered) if registered != &codec => {
                error_stack::bail!(Error::KeyCodecMismatch {
                    registered: registered.clone(),
                    requested: codec,
                })
            }
            Some(_) => Ok(self.clone()),
            None => Ok(Self {
                key_codec: Some(codec),
                ..self.clone()
            }),
        }
    }

    /// Return a registry that also contains `state`.
    pub fn with_state(&self, state: StateMetaInfo) -> error_stack::Result<Self, Error> {
        error_stack::ensure!(
            !self.states.contains_key(&state.name),
            Error::DuplicateState(state.name)
        );
        error_stack::ensure!(
            self.states.len() < u16::MAX as usize,
            Error::TooManyStates(self.states.len() + 1)
        );

        let mut states = self.states.clone();
        states.insert(state.name.clone(), state);
        Ok(Self {
            states,
            ..self.clone()
        })
    }

    pub fn with_compression(&self, compression: bool) -> Self {
        Self {
            compression,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_returns_new_registry() {
        let empty = StateRegistry::default();
        let one = empty
            .with_state(StateMetaInfo::value("counter", CodecDescriptor::I64))
            .unwrap();

        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert_eq!(one.get("counter").unwrap().kind, StateKind::Value);
        assert_eq!(
            one.get("counter").unwrap().namespace_codec,
            CodecDescriptor::Void
        );
    }

    #[test]
    fn test_state_ids_follow_name_order() {
        let registry = StateRegistry::default()
            .with_state(StateMetaInfo::value("b", CodecDescriptor::I64))
            .unwrap()
            .with_state(StateMetaInfo::value("a", CodecDescriptor::Utf8))
            .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.state_id("a"), Some(0));
        assert_eq!(registry.state_id("b"), Some(1));
        assert_eq!(registry.state_id("c"), None);
        assert_eq!(registry.state_name(1), Some("b"));
        assert_eq!(registry.state_name(2), None);
    }

    #[test]
    fn test_duplicate_state_rejected() {
        let registry = StateRegistry::default()
            .with_state(StateMetaInfo::value("a", CodecDescriptor::I64))
            .unwrap();
        let err = registry
            .with_state(StateMetaInfo::value("a", CodecDescriptor::I32))
            .unwrap_err();
        assert!(matches!(err.current_context(), Error::DuplicateState(name) if name == "a"));
    }

    #[test]
    fn test_key_codec_fixed_once() {
        let registry = StateRegistry::default()
            .with_key_codec(CodecDescriptor::I32)
            .unwrap();
        assert_eq!(registry.key_codec(), Some(&CodecDescriptor::I32));
        assert!(registry.with_key_codec(CodecDescriptor::I32).is_ok());

        let err = registry.with_key_codec(CodecDescriptor::Utf8).unwrap_err();
        assert!(matches!(
            err.current_context(),
            Error::KeyCodecMismatch { .. }
        ));
    }
}
