use std::collections::BTreeMap;
use std::marker::PhantomData;

use error_stack::ResultExt;
use heron_core::TypeCodec;

use crate::Error;

/// Typed access to a broadcast (map) state of an [crate::OperatorStateBackend].
///
/// Entries are ordered by their serialized key.
pub struct BroadcastState<'a, K, V, KC, VC> {
    name: String,
    entries: &'a mut BTreeMap<Vec<u8>, Vec<u8>>,
    modified: &'a mut bool,
    key_codec: KC,
    value_codec: VC,
    _phantom: PhantomData<fn(K, V) -> (K, V)>,
}

impl<'a, K, V, KC, VC> std::fmt::Debug for BroadcastState<'a, K, V, KC, VC> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastState")
            .field("name", &self.name)
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<'a, K, V, KC, VC> BroadcastState<'a, K, V, KC, VC>
where
    KC: TypeCodec<K>,
    VC: TypeCodec<V>,
{
    pub(crate) fn new(
        name: &str,
        entries: &'a mut BTreeMap<Vec<u8>, Vec<u8>>,
        modified: &'a mut bool,
        key_codec: KC,
        value_codec: VC,
    ) -> Self {
        Self {
            name: name.to_owned(),
            entries,
            modified,
            key_codec,
            value_codec,
            _phantom: PhantomData,
        }
    }

    pub fn get(&self, key: &K) -> error_stack::Result<Option<V>, Error> {
        let key = self.encode_key(key)?;
        self.entries
            .get(&key)
            .map(|value| self.decode_value(value))
            .transpose()
    }

    pub fn contains(&self, key: &K) -> error_stack::Result<bool, Error> {
        let key = self.encode_key(key)?;
        Ok(self.entries.contains_key(&key))
    }

    /// Insert or replace the value for `key`.
    pub fn put(&mut self, key: &K, value: &V) -> error_stack::Result<(), Error> {
        let key = self.encode_key(key)?;
        let value = self
            .value_codec
            .encode_to_vec(value)
            .change_context_lazy(|| Error::Codec(self.name.clone()))?;
        self.entries.insert(key, value);
        *self.modified = true;
        Ok(())
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&mut self, key: &K) -> error_stack::Result<Option<V>, Error> {
        let key = self.encode_key(key)?;
        match self.entries.remove(&key) {
            Some(value) => {
                *self.modified = true;
                self.decode_value(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Decode all entries, in key byte order.
    pub fn entries(&self) -> error_stack::Result<Vec<(K, V)>, Error> {
        self.entries
            .iter()
            .map(|(key, value)| -> error_stack::Result<(K, V), Error> {
                let key = self
                    .key_codec
                    .decode(key)
                    .change_context_lazy(|| Error::Codec(self.name.clone()))?;
                Ok((key, self.decode_value(value)?))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            *self.modified = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode_key(&self, key: &K) -> error_stack::Result<Vec<u8>, Error> {
        self.key_codec
            .encode_to_vec(key)
            .change_context_lazy(|| Error::Codec(self.name.clone()))
    }

    fn decode_value(&self, value: &[u8]) -> error_stack::Result<V, Error> {
        self.value_codec
            .decode(value)
            .change_context_lazy(|| Error::Codec(self.name.clone()))
    }
}
