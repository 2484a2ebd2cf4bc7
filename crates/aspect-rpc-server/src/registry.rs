//! Service registry
//!
//! Services are described once at startup with a [`ServiceBuilder`]: the
//! service id clients use, how instances are obtained, the callable methods
//! and the class-tier and method-tier filters. The resulting
//! [`ServiceRegistry`] is immutable and read without locking.

use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RegistryError, RpcError, RpcResult};
use crate::filter::{FilterEntry, FilterFactory, FilterTier, RpcFilter};
use crate::method::{AsyncMethod, MethodArgs, MethodDescriptor, ServiceInstance, SyncMethod};
use crate::scope::RequestScope;

/// Provides the service instance for a request
pub trait ServiceFactory: Send + Sync {
    fn create(&self, scope: &RequestScope) -> RpcResult<ServiceInstance>;
}

/// One instance shared by every request
struct Singleton(ServiceInstance);

impl ServiceFactory for Singleton {
    fn create(&self, _scope: &RequestScope) -> RpcResult<ServiceInstance> {
        Ok(Arc::clone(&self.0))
    }
}

/// A fresh instance per request
struct Scoped<F>(F);

impl<S, F> ServiceFactory for Scoped<F>
where
    S: Send + Sync + 'static,
    F: Fn(&RequestScope) -> RpcResult<S> + Send + Sync,
{
    fn create(&self, scope: &RequestScope) -> RpcResult<ServiceInstance> {
        Ok(Arc::new((self.0)(scope)?))
    }
}

/// Declares a service, its methods and its filters
///
/// Method-tier filters attach to the most recently declared method.
///
/// ```rust
/// use aspect_rpc_server::prelude::*;
/// use aspect_rpc_server::filter::builtins::TracingFilter;
/// use std::sync::Arc;
///
/// struct Calc;
///
/// impl Calc {
///     fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
///         Ok(a + b)
///     }
///
///     async fn add_async(self: Arc<Self>, a: i64, b: i64) -> RpcResult<i64> {
///         Ok(a + b)
///     }
/// }
///
/// let service = ServiceBuilder::singleton("Calc", Calc)
///     .filter(TracingFilter::new())
///     .method("Add", Calc::add)
///     .method_async("AddAsync", Calc::add_async)
///     .into_descriptor()
///     .unwrap();
///
/// assert_eq!(service.method_names(), vec!["Add", "AddAsync"]);
/// ```
pub struct ServiceBuilder<S> {
    service_id: String,
    factory: Arc<dyn ServiceFactory>,
    methods: Vec<MethodDescriptor>,
    filters: Vec<FilterEntry>,
    /// Validation errors collected during registration
    validation_errors: Vec<RegistryError>,
    _service: std::marker::PhantomData<fn() -> S>,
}

impl<S> ServiceBuilder<S>
where
    S: Send + Sync + 'static,
{
    fn with_factory(service_id: impl Into<String>, factory: Arc<dyn ServiceFactory>) -> Self {
        Self {
            service_id: service_id.into(),
            factory,
            methods: Vec::new(),
            filters: Vec::new(),
            validation_errors: Vec::new(),
            _service: std::marker::PhantomData,
        }
    }

    /// Register `instance` as the single instance serving every request
    pub fn singleton(service_id: impl Into<String>, instance: S) -> Self {
        Self::shared(service_id, Arc::new(instance))
    }

    /// Register an already shared instance
    pub fn shared(service_id: impl Into<String>, instance: Arc<S>) -> Self {
        Self::with_factory(service_id, Arc::new(Singleton(instance)))
    }

    /// Build a new instance for every request from the request scope
    pub fn scoped<F>(service_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RequestScope) -> RpcResult<S> + Send + Sync + 'static,
    {
        Self::with_factory(service_id, Arc::new(Scoped(factory)))
    }

    /// Register a synchronous method
    pub fn method<Args, T, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        Args: MethodArgs,
        T: Serialize + 'static,
        H: SyncMethod<S, Args, T>,
    {
        self.push_method(MethodDescriptor::sync::<S, Args, T, H>(name, handler));
        self
    }

    /// Register an asynchronous method
    pub fn method_async<Args, T, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        Args: MethodArgs,
        T: Serialize + Send + 'static,
        H: AsyncMethod<S, Args, T>,
    {
        self.push_method(MethodDescriptor::asynchronous::<S, Args, T, H>(
            name, handler,
        ));
        self
    }

    /// Class-tier filter applied to every method of this service
    pub fn filter(mut self, filter: impl RpcFilter + 'static) -> Self {
        self.filters
            .push(FilterEntry::shared(FilterTier::Class, Arc::new(filter)));
        self
    }

    /// Class-tier filter instantiated per request
    pub fn scoped_filter(mut self, factory: impl FilterFactory + 'static) -> Self {
        self.filters
            .push(FilterEntry::scoped(FilterTier::Class, Arc::new(factory)));
        self
    }

    /// Method-tier filter on the most recently declared method
    pub fn method_filter(self, filter: impl RpcFilter + 'static) -> Self {
        self.attach(FilterEntry::shared(FilterTier::Method, Arc::new(filter)))
    }

    /// Method-tier filter instantiated per request
    pub fn method_scoped_filter(self, factory: impl FilterFactory + 'static) -> Self {
        self.attach(FilterEntry::scoped(FilterTier::Method, Arc::new(factory)))
    }

    fn push_method(&mut self, method: MethodDescriptor) {
        if self.methods.iter().any(|m| m.name() == method.name()) {
            self.validation_errors.push(RegistryError::DuplicateMethod {
                service: self.service_id.clone(),
                method: method.name().to_string(),
            });
            return;
        }
        self.methods.push(method);
    }

    fn attach(mut self, entry: FilterEntry) -> Self {
        match self.methods.last_mut() {
            Some(method) => method.push_filter(entry),
            None => self
                .validation_errors
                .push(RegistryError::UnknownFilterTarget {
                    service: self.service_id.clone(),
                    method: entry.name().to_string(),
                }),
        }
        self
    }

    /// Finish the declaration
    ///
    /// Returns the first validation error collected during registration.
    pub fn into_descriptor(self) -> Result<ServiceDescriptor, RegistryError> {
        if let Some(err) = self.validation_errors.into_iter().next() {
            return Err(err);
        }

        let mut index = HashMap::with_capacity(self.methods.len());
        let methods: Vec<Arc<MethodDescriptor>> =
            self.methods.into_iter().map(Arc::new).collect();
        for (position, method) in methods.iter().enumerate() {
            index.insert(method.name().to_string(), position);
        }

        Ok(ServiceDescriptor {
            service_id: self.service_id,
            type_name: std::any::type_name::<S>(),
            factory: self.factory,
            methods,
            index,
            filters: self.filters,
        })
    }
}

/// A registered service
pub struct ServiceDescriptor {
    service_id: String,
    type_name: &'static str,
    factory: Arc<dyn ServiceFactory>,
    methods: Vec<Arc<MethodDescriptor>>,
    index: HashMap<String, usize>,
    filters: Vec<FilterEntry>,
}

impl ServiceDescriptor {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Implementation type behind the service id
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.index.get(name).map(|&position| &self.methods[position])
    }

    /// Methods in declaration order
    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.iter()
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Class-tier filters in declaration order
    pub fn filters(&self) -> &[FilterEntry] {
        &self.filters
    }

    /// Obtain the instance serving the request owning `scope`
    pub fn resolve_instance(&self, scope: &RequestScope) -> RpcResult<ServiceInstance> {
        self.factory.create(scope)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("service_id", &self.service_id)
            .field("type_name", &self.type_name)
            .field("methods", &self.method_names())
            .field("filters", &self.filters)
            .finish()
    }
}

/// Immutable `serviceId -> service` table
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceRegistry {
    /// Build the table, rejecting duplicate ids and duplicate implementation types
    ///
    /// Filters are cached per `declaringType#method`, so one implementation
    /// type may back only one service id.
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self, RegistryError> {
        let mut table: HashMap<String, Arc<ServiceDescriptor>> = HashMap::new();
        let mut types: HashMap<&'static str, String> = HashMap::new();

        for service in services {
            if let Some(existing) = types.get(service.type_name) {
                return Err(RegistryError::DuplicateType {
                    type_name: service.type_name,
                    existing: existing.clone(),
                });
            }
            match table.entry(service.service_id.clone()) {
                Entry::Occupied(entry) => {
                    return Err(RegistryError::DuplicateService(entry.key().clone()));
                }
                Entry::Vacant(entry) => {
                    debug!(
                        service = %service.service_id,
                        type_name = service.type_name,
                        methods = service.methods.len(),
                        "registered service"
                    );
                    types.insert(service.type_name, service.service_id.clone());
                    entry.insert(Arc::new(service));
                }
            }
        }

        Ok(Self { services: table })
    }

    pub fn lookup(&self, service_id: &str) -> RpcResult<&Arc<ServiceDescriptor>> {
        self.services
            .get(service_id)
            .ok_or_else(|| RpcError::UnregisteredService(service_id.to_string()))
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    /// Registered service ids, sorted
    pub fn service_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
