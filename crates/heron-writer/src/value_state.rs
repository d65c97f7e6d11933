use std::marker::PhantomData;

use error_stack::ResultExt;
use heron_core::{key_groups, StateRow, TypeCodec};
use heron_dataset::Dataset;

use crate::Error;

/// Converts typed key/value pairs of a value state into [StateRow]s.
///
/// Value states have no namespace, so rows have an empty namespace. The key
/// group is assigned from the serialized key.
pub struct ValueStateToRow<K, V, KC, VC> {
    state_name: String,
    key_codec: KC,
    value_codec: VC,
    max_parallelism: u32,
    _phantom: PhantomData<fn(K, V)>,
}

impl<K, V, KC, VC> ValueStateToRow<K, V, KC, VC>
where
    KC: TypeCodec<K>,
    VC: TypeCodec<V>,
{
    pub fn new(
        state_name: impl Into<String>,
        key_codec: KC,
        value_codec: VC,
        max_parallelism: u32,
    ) -> Self {
        Self {
            state_name: state_name.into(),
            key_codec,
            value_codec,
            max_parallelism,
            _phantom: PhantomData,
        }
    }

    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    pub fn map(&self, key: &K, value: &V) -> error_stack::Result<StateRow, Error> {
        let convert = || Error::ConvertState(self.state_name.clone());
        let key = self.key_codec.encode_to_vec(key).change_context_lazy(convert)?;
        let value = self
            .value_codec
            .encode_to_vec(value)
            .change_context_lazy(convert)?;
        let key_group = key_groups::assign_to_key_group(&key, self.max_parallelism);
        Ok(StateRow::new(
            self.state_name.clone(),
            key_group,
            key,
            Vec::new(),
            value,
        ))
    }

    pub fn convert(&self, data: Dataset<(K, V)>) -> error_stack::Result<Dataset<StateRow>, Error> {
        data.try_map(|(key, value)| self.map(&key, &value))
    }
}

#[cfg(test)]
mod tests {
    use heron_core::codec::{I32Codec, StringCodec};

    use super::*;

    #[test]
    fn test_map_assigns_key_group() {
        let to_row = ValueStateToRow::new("counter", I32Codec, StringCodec, 128);
        let row = to_row.map(&7, &"seven".to_owned()).unwrap();

        assert_eq!(row.state_name, "counter");
        assert_eq!(row.key, 7i32.to_be_bytes());
        assert_eq!(row.value, b"seven");
        assert!(row.namespace.is_empty());
        assert_eq!(
            row.key_group,
            key_groups::assign_to_key_group(&7i32.to_be_bytes(), 128)
        );
    }

    #[test]
    fn test_convert_dataset() {
        let to_row = ValueStateToRow::new("counter", I32Codec, I32Codec, 4);
        let rows = to_row
            .convert(Dataset::from_vec(vec![(1, 10), (3, 20)]))
            .unwrap()
            .into_vec();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.key_group < 4));
        assert_eq!(I32Codec.decode(&rows[1].value).unwrap(), 20);
    }
}
