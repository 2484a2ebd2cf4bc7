//! Request scope: transport metadata and request-scoped dependencies

use http::Extensions;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Per-request resolution scope
///
/// Carries what the transport knows about the request (metadata such as
/// headers) and a typed extension map that plays the role of the request's
/// dependency scope. Service and filter factories receive it when they build
/// request-scoped instances.
///
/// # Examples
///
/// ```rust
/// use aspect_rpc_server::RequestScope;
/// use serde_json::json;
///
/// #[derive(Clone)]
/// struct CurrentUser(String);
///
/// let mut scope = RequestScope::new();
/// scope.add_metadata("x-api-key", json!("secret"));
/// scope.insert(CurrentUser("alice".to_string()));
///
/// assert_eq!(scope.metadata_str("x-api-key"), Some("secret"));
/// assert_eq!(scope.get::<CurrentUser>().map(|u| u.0.as_str()), Some("alice"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestScope {
    request_id: Uuid,
    metadata: Map<String, Value>,
    extensions: Extensions,
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            metadata: Map::new(),
            extensions: Extensions::new(),
        }
    }

    /// Unique id of this request (UUID v7, time ordered)
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Transport metadata (read-only)
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Metadata entry as a string, if present and a string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Builder-style variant of [`RequestScope::add_metadata`]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.add_metadata(key, value);
        self
    }

    /// Register a request-scoped dependency, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value)
    }

    /// Look up a request-scoped dependency by type
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}
