use std::marker::PhantomData;

use error_stack::ResultExt;
use heron_core::TypeCodec;

use crate::Error;

/// Typed access to a list state of an [crate::OperatorStateBackend].
pub struct ListState<'a, T, C> {
    name: String,
    elements: &'a mut Vec<Vec<u8>>,
    modified: &'a mut bool,
    codec: C,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<'a, T, C> std::fmt::Debug for ListState<'a, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListState")
            .field("name", &self.name)
            .field("len", &self.elements.len())
            .finish_non_exhaustive()
    }
}

impl<'a, T, C: TypeCodec<T>> ListState<'a, T, C> {
    pub(crate) fn new(
        name: &str,
        elements: &'a mut Vec<Vec<u8>>,
        modified: &'a mut bool,
        codec: C,
    ) -> Self {
        Self {
            name: name.to_owned(),
            elements,
            modified,
            codec,
            _phantom: PhantomData,
        }
    }

    /// Decode all elements.
    pub fn get(&self) -> error_stack::Result<Vec<T>, Error> {
        self.elements
            .iter()
            .map(|bytes| self.codec.decode(bytes))
            .collect::<error_stack::Result<Vec<_>, _>>()
            .change_context_lazy(|| Error::Codec(self.name.clone()))
    }

    pub fn add(&mut self, value: &T) -> error_stack::Result<(), Error> {
        let bytes = self.encode(value)?;
        self.elements.push(bytes);
        *self.modified = true;
        Ok(())
    }

    pub fn add_all<'v>(
        &mut self,
        values: impl IntoIterator<Item = &'v T>,
    ) -> error_stack::Result<(), Error>
    where
        T: 'v,
    {
        for value in values {
            self.add(value)?;
        }
        Ok(())
    }

    /// Replace all elements with `values`.
    pub fn update(&mut self, values: &[T]) -> error_stack::Result<(), Error> {
        let encoded = values
            .iter()
            .map(|value| self.encode(value))
            .collect::<error_stack::Result<Vec<_>, _>>()?;
        *self.elements = encoded;
        *self.modified = true;
        Ok(())
    }

    /// Remove all elements equal to `value`. Returns the number removed.
    pub fn remove(&mut self, value: &T) -> error_stack::Result<usize, Error> {
        let bytes = self.encode(value)?;
        let before = self.elements.len();
        self.elements.retain(|element| element != &bytes);
        let removed = before - self.elements.len();
        if removed > 0 {
            *self.modified = true;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) {
        if !self.elements.is_empty() {
            self.elements.clear();
            *self.modified = true;
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn encode(&self, value: &T) -> error_stack::Result<Vec<u8>, Error> {
        self.codec
            .encode_to_vec(value)
            .change_context_lazy(|| Error::Codec(self.name.clone()))
    }
}
