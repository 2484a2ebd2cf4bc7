//! Per-request invocation context

use serde_json::Value;
use std::sync::Arc;

use crate::envelope::ResponseEnvelope;
use crate::method::MethodDescriptor;
use crate::scope::RequestScope;

/// Mutable state of one invocation, owned by the dispatcher for the request
///
/// Filters read and may rewrite the arguments and the return value. A filter
/// that wants to answer the request itself (for example to deny it) sets an
/// explicit response with [`InvocationContext::respond`].
#[derive(Debug)]
pub struct InvocationContext {
    scope: RequestScope,
    service_id: String,
    method: Arc<MethodDescriptor>,
    arguments: Vec<Value>,
    return_value: Option<Value>,
    response: Option<ResponseEnvelope>,
}

impl InvocationContext {
    pub fn new(
        scope: RequestScope,
        service_id: impl Into<String>,
        method: Arc<MethodDescriptor>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            scope,
            service_id: service_id.into(),
            method,
            arguments,
            return_value: None,
            response: None,
        }
    }

    /// The transport/request scope
    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Service id as sent by the client
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Resolved implementation type
    pub fn target_type(&self) -> &'static str {
        self.method.declaring_type()
    }

    pub fn method(&self) -> &Arc<MethodDescriptor> {
        &self.method
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    /// Reconciled arguments, in declared parameter order
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Vec<Value> {
        &mut self.arguments
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = Some(value);
    }

    pub fn take_return_value(&mut self) -> Option<Value> {
        self.return_value.take()
    }

    /// Answer the request with `response`, replacing the default envelope
    pub fn respond(&mut self, response: ResponseEnvelope) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&ResponseEnvelope> {
        self.response.as_ref()
    }

    pub(crate) fn take_response(&mut self) -> Option<ResponseEnvelope> {
        self.response.take()
    }
}
