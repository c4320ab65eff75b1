//! Reflective-by-name, typed-by-generics method registration and dispatch.
//!
//! Go enumerates a receiver's exported methods by runtime reflection and
//! admits only those matching `fn(receiver, *Arg, *Reply) -> error`. Rust has
//! no such reflection, so admission happens at registration time through the
//! type system instead: [`ServiceBuilder::method`] only accepts a function
//! pointer whose argument/reply types satisfy the same serialize/deserialize
//! bounds the wire codec needs, and the compiler rejects anything else.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};

use crate::codec::CodecKind;
use crate::error::{Error, Result};

/// Type-erased entry point for a single registered method.
///
/// Decodes the argument, invokes the user's handler, and encodes the reply,
/// all behind one object-safe method so a [`Service`] can hold a
/// heterogeneous map of methods with different argument/reply types.
trait MethodHandler: Send + Sync {
    fn invoke(&self, codec: CodecKind, arg_bytes: &[u8]) -> Result<Vec<u8>>;
}

struct TypedMethod<R, Arg, Reply> {
    receiver: Arc<R>,
    func: fn(&R, Arg) -> Result<Reply>,
    _marker: PhantomData<fn(Arg) -> Reply>,
}

impl<R, Arg, Reply> MethodHandler for TypedMethod<R, Arg, Reply>
where
    R: Send + Sync + 'static,
    Arg: DeserializeOwned + Send + 'static,
    Reply: Serialize + Send + 'static,
{
    fn invoke(&self, codec: CodecKind, arg_bytes: &[u8]) -> Result<Vec<u8>> {
        let arg: Arg = codec.decode(arg_bytes)?;
        let reply = (self.func)(&self.receiver, arg).map_err(|e| Error::Invocation(e.to_string()))?;
        codec.encode(&reply)
    }
}

/// A registered receiver plus its admitted methods.
pub struct Service {
    name: String,
    methods: HashMap<String, Box<dyn MethodHandler>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, method: &str, codec: CodecKind, arg_bytes: &[u8]) -> Result<Vec<u8>> {
        self.methods
            .get(method)
            .expect("caller must look up the method before invoking")
            .invoke(codec, arg_bytes)
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}

/// Builds a [`Service`] out of a receiver value and named methods.
///
/// ```
/// use geerpc::service::ServiceBuilder;
/// use geerpc::Result;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default)]
/// struct Arith;
///
/// #[derive(Deserialize)]
/// struct Args { x: i64, y: i64 }
///
/// #[derive(Serialize, Default, Clone)]
/// struct Sum(i64);
///
/// impl Arith {
///     fn sum(&self, args: Args) -> Result<Sum> {
///         Ok(Sum(args.x + args.y))
///     }
/// }
///
/// let service = ServiceBuilder::new("Arith", Arith::default())
///     .method("Sum", Arith::sum)
///     .build();
/// ```
pub struct ServiceBuilder<R> {
    name: String,
    receiver: Arc<R>,
    methods: HashMap<String, Box<dyn MethodHandler>>,
}

impl<R> ServiceBuilder<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, receiver: R) -> Self {
        ServiceBuilder {
            name: name.into(),
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// Admit a method. `Arg` and `Reply` must each round-trip through the
    /// negotiated codec — the compile-time admission check that stands in
    /// for requiring an exported, (de)serializable method signature.
    pub fn method<Arg, Reply>(
        mut self,
        name: impl Into<String>,
        func: fn(&R, Arg) -> Result<Reply>,
    ) -> Self
    where
        Arg: DeserializeOwned + Send + 'static,
        Reply: Serialize + Send + 'static,
    {
        self.methods.insert(
            name.into(),
            Box::new(TypedMethod {
                receiver: self.receiver.clone(),
                func,
                _marker: PhantomData,
            }),
        );
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// Write-once-per-name map from service name to [`Service`].
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Fails if a service with this name already exists.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(&service.name) {
            return Err(Error::lifecycle(format!(
                "rpc: service already defined: {}",
                service.name
            )));
        }
        services.insert(service.name.clone(), Arc::new(service));
        Ok(())
    }

    /// Resolve `"Service.Method"` by splitting on the *last* dot, returning
    /// the service and the bare method name. Unknown service and unknown
    /// method are distinct [`Error::Routing`] messages.
    pub fn find(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| Error::routing(format!("service/method request ill-formed: {service_method}")))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let services = self.services.read().unwrap();
        let service = services
            .get(service_name)
            .cloned()
            .ok_or_else(|| Error::routing(format!("can't find service {service_name}")))?;

        if !service.has_method(method_name) {
            return Err(Error::routing(format!("can't find method {method_name}")));
        }

        Ok((service, method_name.to_string()))
    }
}
