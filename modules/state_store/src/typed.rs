//! Codec-typed access to state values

use crate::StateAccess;
use tessera_codec::{decode, CodecError, Value};

/// Read and write [`Value`]s through any [`StateAccess`].
/// Stored bytes that fail to decode surface as an error, never as data.
pub trait TypedStateAccess: StateAccess {
    fn get_value(&self, key: &str) -> Result<Option<Value>, CodecError> {
        self.get(key).map(|bytes| decode(&bytes)).transpose()
    }

    fn put_value(&mut self, key: &str, value: &Value) {
        self.put(key, value.encode());
    }
}

impl<T: StateAccess + ?Sized> TypedStateAccess for T {}
