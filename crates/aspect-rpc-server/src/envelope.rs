//! Wire envelopes
//!
//! The field names are part of the wire contract, including the historical
//! `Paramters` spelling. `Parameters` is accepted as an alias.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{RpcError, RpcResult};
use crate::status_codes;

/// A decoded RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Registered service identifier
    #[serde(rename = "TypeFullName")]
    pub service_id: String,
    /// Method to call on the service
    #[serde(rename = "MethodName")]
    pub method_name: String,
    /// Positional arguments
    #[serde(
        rename = "Paramters",
        alias = "Parameters",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub arguments: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl RequestEnvelope {
    pub fn new(
        service_id: impl Into<String>,
        method_name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            method_name: method_name.into(),
            arguments,
        }
    }

    /// Decode a request body
    ///
    /// An empty (or whitespace-only) body is rejected before any parsing is
    /// attempted. A body that parses to JSON `null` is malformed.
    pub fn from_slice(body: &[u8]) -> RpcResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RpcError::EmptyRequest);
        }

        match serde_json::from_slice::<Option<Self>>(body) {
            Ok(Some(request)) => Ok(request),
            Ok(None) => Err(RpcError::MalformedRequest(
                "request body decoded to null".to_string(),
            )),
            Err(err) => Err(RpcError::MalformedRequest(err.to_string())),
        }
    }
}

/// The single response produced for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "Code")]
    pub code: i32,
    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseEnvelope {
    /// Successful response; `null` is kept so void methods still carry `Data`
    pub fn success(data: Value) -> Self {
        Self {
            code: status_codes::SUCCESS,
            message: None,
            data: Some(data),
        }
    }

    /// Failure response carrying a human readable message and no data
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: status_codes::FAILURE,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == status_codes::SUCCESS
    }

    /// Encode the envelope for the wire
    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|err| {
            serde_json::json!({
                "Code": status_codes::FAILURE,
                "Message": format!("failed to encode response: {}", err),
            })
            .to_string()
            .into_bytes()
        })
    }
}
