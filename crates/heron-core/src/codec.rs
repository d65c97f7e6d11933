//! Codecs for keys, namespaces and values.
//!
//! Codecs must produce deterministic bytes: the key bytes decide the key group
//! and the written blobs are expected to be reproducible.

use std::marker::PhantomData;

use error_stack::{IntoReport, ResultExt};

use crate::Error;

/// Serializable identity of a codec, recorded in the state metadata.
///
/// Two codecs with equal descriptors must read each other's bytes.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_more::Display,
)]
pub enum CodecDescriptor {
    /// The empty namespace.
    #[display(fmt = "void")]
    Void,
    #[display(fmt = "i32")]
    I32,
    #[display(fmt = "i64")]
    I64,
    #[display(fmt = "u64")]
    U64,
    #[display(fmt = "string")]
    Utf8,
    #[display(fmt = "bytes")]
    Bytes,
    /// Bincode encoding of the named Rust type.
    #[display(fmt = "bincode<{_0}>")]
    Bincode(String),
}

pub trait TypeCodec<T>: Send + Sync {
    fn descriptor(&self) -> CodecDescriptor;

    fn encode(&self, value: &T, out: &mut Vec<u8>) -> error_stack::Result<(), Error>;

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<T, Error>;

    fn encode_to_vec(&self, value: &T) -> error_stack::Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        self.encode(value, &mut out)?;
        Ok(out)
    }
}

/// Associates a Rust type with the codec used for it by default.
pub trait DefaultCodec: Sized + Send + 'static {
    type Codec: TypeCodec<Self> + Default + Clone + 'static;

    fn codec() -> Self::Codec {
        Self::Codec::default()
    }
}

fn fixed<const N: usize>(
    bytes: &[u8],
    descriptor: CodecDescriptor,
) -> error_stack::Result<[u8; N], Error> {
    bytes.try_into().map_err(|_| {
        error_stack::report!(Error::Decode(descriptor))
            .attach_printable(format!("expected {N} bytes but got {}", bytes.len()))
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct I32Codec;

impl TypeCodec<i32> for I32Codec {
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::I32
    }

    fn encode(&self, value: &i32, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        out.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<i32, Error> {
        Ok(i32::from_be_bytes(fixed(bytes, self.descriptor())?))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct I64Codec;

impl TypeCodec<i64> for I64Codec {
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::I64
    }

    fn encode(&self, value: &i64, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        out.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<i64, Error> {
        Ok(i64::from_be_bytes(fixed(bytes, self.descriptor())?))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct U64Codec;

impl TypeCodec<u64> for U64Codec {
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::U64
    }

    fn encode(&self, value: &u64, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        out.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<u64, Error> {
        Ok(u64::from_be_bytes(fixed(bytes, self.descriptor())?))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StringCodec;

impl TypeCodec<String> for StringCodec {
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::Utf8
    }

    fn encode(&self, value: &String, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<String, Error> {
        String::from_utf8(bytes.to_vec())
            .into_report()
            .change_context(Error::Decode(self.descriptor()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl TypeCodec<Vec<u8>> for BytesCodec {
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::Bytes
    }

    fn encode(&self, value: &Vec<u8>, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        out.extend_from_slice(value);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }
}

/// Codec for any serde type, using bincode.
///
/// The descriptor records the Rust type name, so renaming the type changes
/// the codec identity.
pub struct BincodeCodec<T> {
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<T> std::fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BincodeCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> TypeCodec<T> for BincodeCodec<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::Bincode(std::any::type_name::<T>().to_owned())
    }

    fn encode(&self, value: &T, out: &mut Vec<u8>) -> error_stack::Result<(), Error> {
        bincode::serialize_into(out, value)
            .into_report()
            .change_context_lazy(|| Error::Encode(self.descriptor()))
    }

    fn decode(&self, bytes: &[u8]) -> error_stack::Result<T, Error> {
        bincode::deserialize(bytes)
            .into_report()
            .change_context_lazy(|| Error::Decode(self.descriptor()))
    }
}

impl DefaultCodec for i32 {
    type Codec = I32Codec;
}

impl DefaultCodec for i64 {
    type Codec = I64Codec;
}

impl DefaultCodec for u64 {
    type Codec = U64Codec;
}

impl DefaultCodec for String {
    type Codec = StringCodec;
}

impl DefaultCodec for Vec<u8> {
    type Codec = BytesCodec;
}
