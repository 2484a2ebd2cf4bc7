//! Parameter coercion
//!
//! Incoming arguments are loosely typed JSON values. Each one is reconciled
//! against the declared type of the parameter at the same position:
//!
//! 1. a value already in the canonical shape of the declared type passes
//!    through untouched;
//! 2. otherwise it is round-tripped through the wire encoding (encode, decode
//!    as the declared type, re-encode);
//! 3. a string whose text is itself an encoding of the declared type
//!    (`"5"` for an integer) is accepted as a last resort.
//!
//! This is structural, not validating: any value that fits the declared shape
//! is accepted. Arguments are matched by position only.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{RpcError, RpcResult};

/// Runtime description of a declared parameter type
#[derive(Clone, Copy)]
pub struct ParamType {
    type_name: &'static str,
    canonical: fn(&Value) -> serde_json::Result<Value>,
    round_trip: fn(&[u8]) -> serde_json::Result<Value>,
}

impl ParamType {
    /// Describe parameter type `T`
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            canonical: canonical_form::<T>,
            round_trip: decode_as::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether `value` already is in the canonical shape of this type
    pub fn matches(&self, value: &Value) -> bool {
        matches!((self.canonical)(value), Ok(ref canonical) if canonical == value)
    }

    /// Re-encode `value` and decode it against this type
    pub fn round_trip(&self, value: &Value) -> serde_json::Result<Value> {
        let encoded = serde_json::to_vec(value)?;
        (self.round_trip)(&encoded)
    }

    /// Coerce one argument at position `index`
    pub fn coerce(&self, index: usize, value: Value) -> RpcResult<Value> {
        if self.matches(&value) {
            return Ok(value);
        }

        let err = match self.round_trip(&value) {
            Ok(coerced) => return Ok(coerced),
            Err(err) => err,
        };

        if let Value::String(text) = &value {
            if let Ok(coerced) = (self.round_trip)(text.as_bytes()) {
                return Ok(coerced);
            }
        }

        Err(RpcError::Coercion {
            index,
            expected: self.type_name,
            reason: err.to_string(),
        })
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParamType").field(&self.type_name).finish()
    }
}

fn canonical_form<T>(value: &Value) -> serde_json::Result<Value>
where
    T: Serialize + DeserializeOwned,
{
    let typed = T::deserialize(value)?;
    serde_json::to_value(typed)
}

fn decode_as<T>(encoded: &[u8]) -> serde_json::Result<Value>
where
    T: Serialize + DeserializeOwned,
{
    let typed: T = serde_json::from_slice(encoded)?;
    serde_json::to_value(typed)
}

/// Reconcile `arguments` against `parameters` position by position
///
/// Fails with [`RpcError::ArityMismatch`] when the counts differ and with
/// [`RpcError::Coercion`] for the first argument that cannot be converted.
pub fn coerce_arguments(
    method: &str,
    parameters: &[ParamType],
    arguments: Vec<Value>,
) -> RpcResult<Vec<Value>> {
    if arguments.len() != parameters.len() {
        return Err(RpcError::ArityMismatch {
            method: method.to_string(),
            expected: parameters.len(),
            actual: arguments.len(),
        });
    }

    arguments
        .into_iter()
        .zip(parameters)
        .enumerate()
        .map(|(index, (value, parameter))| parameter.coerce(index, value))
        .collect()
}
