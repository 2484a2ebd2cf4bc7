//! Typed method thunks
//!
//! Services register plain Rust functions. A synchronous method takes `&S`, an
//! asynchronous one takes `Arc<S>` so its future can outlive the call:
//!
//! ```rust
//! use aspect_rpc_server::RpcResult;
//! use std::sync::Arc;
//!
//! struct Calc;
//!
//! impl Calc {
//!     fn add(&self, a: i64, b: i64) -> RpcResult<i64> {
//!         Ok(a + b)
//!     }
//!
//!     async fn add_later(self: Arc<Self>, a: i64, b: i64) -> RpcResult<i64> {
//!         Ok(a + b)
//!     }
//! }
//! ```
//!
//! Both are erased into a [`MethodInvoker`] whose single entry point returns an
//! [`Invocation`], so the terminal pipeline stage never needs to know which
//! kind of method it is calling.

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::coerce::ParamType;
use crate::error::{RpcError, RpcResult};
use crate::filter::{FilterEntry, MethodKey};

/// Type-erased service instance handed to method thunks
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Outcome of calling a method thunk
///
/// Synchronous methods complete immediately; asynchronous ones hand back
/// their future. Either way [`Invocation::resolve`] yields the same value.
pub enum Invocation {
    Ready(RpcResult<Value>),
    Pending(BoxFuture<'static, RpcResult<Value>>),
}

impl Invocation {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Await the result, whichever way it was produced
    pub async fn resolve(self) -> RpcResult<Value> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Tuple of positional method arguments
pub trait MethodArgs: Sized + Send + 'static {
    /// Declared parameter types, in order
    fn parameters() -> Vec<ParamType>;

    /// Decode already-coerced arguments into the typed tuple
    fn from_arguments(method: &str, arguments: Vec<Value>) -> RpcResult<Self>;
}

impl MethodArgs for () {
    fn parameters() -> Vec<ParamType> {
        Vec::new()
    }

    fn from_arguments(method: &str, arguments: Vec<Value>) -> RpcResult<Self> {
        if arguments.is_empty() {
            Ok(())
        } else {
            Err(RpcError::ArityMismatch {
                method: method.to_string(),
                expected: 0,
                actual: arguments.len(),
            })
        }
    }
}

fn decode_argument<T: DeserializeOwned>(index: usize, value: Value) -> RpcResult<T> {
    serde_json::from_value(value).map_err(|err| RpcError::Coercion {
        index,
        expected: std::any::type_name::<T>(),
        reason: err.to_string(),
    })
}

/// A synchronous method of service `S`
pub trait SyncMethod<S, Args, T>: Send + Sync + 'static {
    fn call(&self, service: &S, args: Args) -> RpcResult<T>;
}

/// An asynchronous method of service `S`
pub trait AsyncMethod<S, Args, T>: Send + Sync + 'static {
    fn call(&self, service: Arc<S>, args: Args) -> BoxFuture<'static, RpcResult<T>>;
}

macro_rules! impl_method_arity {
    ($count:expr; $(($arg:ident, $value:ident)),+) => {
        impl<$($arg),+> MethodArgs for ($($arg,)+)
        where
            $($arg: Serialize + DeserializeOwned + Send + 'static),+
        {
            fn parameters() -> Vec<ParamType> {
                vec![$(ParamType::of::<$arg>()),+]
            }

            fn from_arguments(method: &str, arguments: Vec<Value>) -> RpcResult<Self> {
                if arguments.len() != $count {
                    return Err(RpcError::ArityMismatch {
                        method: method.to_string(),
                        expected: $count,
                        actual: arguments.len(),
                    });
                }
                let mut values = arguments.into_iter().enumerate();
                $(
                    let $value: $arg = match values.next() {
                        Some((index, value)) => decode_argument(index, value)?,
                        None => return Err(RpcError::fault("argument list ended early")),
                    };
                )+
                Ok(($($value,)+))
            }
        }

        impl<S, F, T, $($arg),+> SyncMethod<S, ($($arg,)+), T> for F
        where
            F: Fn(&S, $($arg),+) -> RpcResult<T> + Send + Sync + 'static,
        {
            fn call(&self, service: &S, ($($value,)+): ($($arg,)+)) -> RpcResult<T> {
                (self)(service, $($value),+)
            }
        }

        impl<S, F, Fut, T, $($arg),+> AsyncMethod<S, ($($arg,)+), T> for F
        where
            F: Fn(Arc<S>, $($arg),+) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = RpcResult<T>> + Send + 'static,
        {
            fn call(&self, service: Arc<S>, ($($value,)+): ($($arg,)+)) -> BoxFuture<'static, RpcResult<T>> {
                Box::pin((self)(service, $($value),+))
            }
        }
    };
}

impl<S, F, T> SyncMethod<S, (), T> for F
where
    F: Fn(&S) -> RpcResult<T> + Send + Sync + 'static,
{
    fn call(&self, service: &S, _args: ()) -> RpcResult<T> {
        (self)(service)
    }
}

impl<S, F, Fut, T> AsyncMethod<S, (), T> for F
where
    F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<T>> + Send + 'static,
{
    fn call(&self, service: Arc<S>, _args: ()) -> BoxFuture<'static, RpcResult<T>> {
        Box::pin((self)(service))
    }
}

impl_method_arity!(1; (A1, a1));
impl_method_arity!(2; (A1, a1), (A2, a2));
impl_method_arity!(3; (A1, a1), (A2, a2), (A3, a3));
impl_method_arity!(4; (A1, a1), (A2, a2), (A3, a3), (A4, a4));
impl_method_arity!(5; (A1, a1), (A2, a2), (A3, a3), (A4, a4), (A5, a5));
impl_method_arity!(6; (A1, a1), (A2, a2), (A3, a3), (A4, a4), (A5, a5), (A6, a6));

/// Type-erased entry point of a registered method
pub trait MethodInvoker: Send + Sync {
    fn invoke(&self, instance: ServiceInstance, arguments: Vec<Value>) -> Invocation;
}

fn downcast_service<S: Send + Sync + 'static>(instance: ServiceInstance) -> RpcResult<Arc<S>> {
    instance.downcast::<S>().map_err(|_| {
        RpcError::fault(format!(
            "service instance is not a {}",
            std::any::type_name::<S>()
        ))
    })
}

struct SyncInvoker<S, Args, T, H> {
    method: String,
    handler: H,
    _marker: PhantomData<fn() -> (S, Args, T)>,
}

impl<S, Args, T, H> MethodInvoker for SyncInvoker<S, Args, T, H>
where
    S: Send + Sync + 'static,
    Args: MethodArgs,
    T: Serialize,
    H: SyncMethod<S, Args, T>,
{
    fn invoke(&self, instance: ServiceInstance, arguments: Vec<Value>) -> Invocation {
        Invocation::Ready(self.call(instance, arguments))
    }
}

impl<S, Args, T, H> SyncInvoker<S, Args, T, H>
where
    S: Send + Sync + 'static,
    Args: MethodArgs,
    T: Serialize,
    H: SyncMethod<S, Args, T>,
{
    fn call(&self, instance: ServiceInstance, arguments: Vec<Value>) -> RpcResult<Value> {
        let service = downcast_service::<S>(instance)?;
        let args = Args::from_arguments(&self.method, arguments)?;
        let value = SyncMethod::call(&self.handler, &*service, args)?;
        Ok(serde_json::to_value(value)?)
    }
}

struct AsyncInvoker<S, Args, T, H> {
    method: String,
    handler: H,
    _marker: PhantomData<fn() -> (S, Args, T)>,
}

impl<S, Args, T, H> MethodInvoker for AsyncInvoker<S, Args, T, H>
where
    S: Send + Sync + 'static,
    Args: MethodArgs,
    T: Serialize + Send + 'static,
    H: AsyncMethod<S, Args, T>,
{
    fn invoke(&self, instance: ServiceInstance, arguments: Vec<Value>) -> Invocation {
        let prepared = downcast_service::<S>(instance).and_then(|service| {
            Args::from_arguments(&self.method, arguments).map(|args| (service, args))
        });
        let (service, args) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Invocation::Ready(Err(err)),
        };

        let future = AsyncMethod::call(&self.handler, service, args);
        Invocation::Pending(Box::pin(async move {
            let value = future.await?;
            Ok(serde_json::to_value(value)?)
        }))
    }
}

/// A registered method: its name, declaring type, parameters, method-tier
/// filters and type-erased invoker
pub struct MethodDescriptor {
    name: String,
    declaring_type: &'static str,
    parameters: Vec<ParamType>,
    asynchronous: bool,
    filters: Vec<FilterEntry>,
    invoker: Arc<dyn MethodInvoker>,
}

impl MethodDescriptor {
    pub(crate) fn sync<S, Args, T, H>(name: impl Into<String>, handler: H) -> Self
    where
        S: Send + Sync + 'static,
        Args: MethodArgs,
        T: Serialize + 'static,
        H: SyncMethod<S, Args, T>,
    {
        let name = name.into();
        let invoker = SyncInvoker::<S, Args, T, H> {
            method: name.clone(),
            handler,
            _marker: PhantomData,
        };
        Self {
            name,
            declaring_type: std::any::type_name::<S>(),
            parameters: Args::parameters(),
            asynchronous: false,
            filters: Vec::new(),
            invoker: Arc::new(invoker),
        }
    }

    pub(crate) fn asynchronous<S, Args, T, H>(name: impl Into<String>, handler: H) -> Self
    where
        S: Send + Sync + 'static,
        Args: MethodArgs,
        T: Serialize + Send + 'static,
        H: AsyncMethod<S, Args, T>,
    {
        let name = name.into();
        let invoker = AsyncInvoker::<S, Args, T, H> {
            method: name.clone(),
            handler,
            _marker: PhantomData,
        };
        Self {
            name,
            declaring_type: std::any::type_name::<S>(),
            parameters: Args::parameters(),
            asynchronous: true,
            filters: Vec::new(),
            invoker: Arc::new(invoker),
        }
    }

    pub(crate) fn push_filter(&mut self, entry: FilterEntry) {
        self.filters.push(entry);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }

    /// Filter cache key, `declaringType#methodName`
    pub fn key(&self) -> MethodKey {
        MethodKey::new(self.declaring_type, &self.name)
    }

    pub fn parameters(&self) -> &[ParamType] {
        &self.parameters
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Method-tier filters in declaration order
    pub fn filters(&self) -> &[FilterEntry] {
        &self.filters
    }

    pub fn invoker(&self) -> &Arc<dyn MethodInvoker> {
        &self.invoker
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("declaring_type", &self.declaring_type)
            .field("parameters", &self.parameters)
            .field("asynchronous", &self.asynchronous)
            .field("filters", &self.filters.len())
            .finish()
    }
}
