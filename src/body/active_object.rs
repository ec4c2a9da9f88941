// src/body/active_object.rs
//! User-facing active object trait and the class registry
//!
//! An active object is plain serde-serializable state plus a `serve`
//! method dispatching on the request's method name. The runtime only ever
//! touches it from the owning body's serving thread.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, Default)]
//! struct Counter { count: i64 }
//!
//! impl ActiveObject for Counter {
//!     const CLASS: &'static str = "Counter";
//!
//!     fn create(_args: &[Value]) -> Result<Self, InvocationError> {
//!         Ok(Counter::default())
//!     }
//!
//!     fn serve(&mut self, call: &Request, _ctx: &mut ServiceContext<'_>)
//!         -> Result<Value, InvocationError>
//!     {
//!         match call.method() {
//!             "increment" => { self.count += 1; Ok(Value::Null) }
//!             "get" => Ok(json!(self.count)),
//!             other => Err(no_such_method(Self::CLASS, other)),
//!         }
//!     }
//! }
//! ```

use crate::body::context::ServiceContext;
use crate::messaging::Request;
use crate::utils::errors::{CodecError, InvocationError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use tracing::debug;

/// State and behaviour of an active object
pub trait ActiveObject: Serialize + DeserializeOwned + Send + 'static {
    /// Class name used to re-instantiate the object after migration or crash
    const CLASS: &'static str;

    /// Build a new instance from creation arguments.
    fn create(args: &[Value]) -> Result<Self, InvocationError>;

    /// Execute one request. Errors become a failed reply; they never stop
    /// the body.
    fn serve(&mut self, call: &Request, ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError>;

    /// Methods served out of turn by default.
    fn immediate_services() -> Vec<String> {
        Vec::new()
    }

    /// Called on the old location right before state is captured for migration.
    fn on_departure(&mut self) {}

    /// Called at the new location once state is restored.
    fn on_arrival(&mut self) {}
}

/// Standard error for an unknown method name.
pub fn no_such_method(class: &str, method: &str) -> InvocationError {
    InvocationError::NoSuchMethod {
        class: class.to_string(),
        method: method.to_string(),
    }
}

/// Object-safe view of an [`ActiveObject`] used by the body.
pub(crate) trait ErasedObject: Send {
    fn class_name(&self) -> &'static str;
    fn serve_erased(&mut self, call: &Request, ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError>;
    fn capture(&self) -> Result<Value, CodecError>;
    fn depart(&mut self);
    fn arrive(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ActiveObject> ErasedObject for T {
    fn class_name(&self) -> &'static str {
        T::CLASS
    }

    fn serve_erased(&mut self, call: &Request, ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
        <T as ActiveObject>::serve(self, call, ctx)
    }

    fn capture(&self) -> Result<Value, CodecError> {
        serde_json::to_value(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn depart(&mut self) {
        self.on_departure()
    }

    fn arrive(&mut self) {
        self.on_arrival()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type ConstructFn = fn(&[Value]) -> Result<Box<dyn ErasedObject>, InvocationError>;
type RestoreFn = fn(Value) -> Result<Box<dyn ErasedObject>, CodecError>;

fn construct<T: ActiveObject>(args: &[Value]) -> Result<Box<dyn ErasedObject>, InvocationError> {
    let object = T::create(args)?;
    Ok(Box::new(object))
}

fn restore<T: ActiveObject>(state: Value) -> Result<Box<dyn ErasedObject>, CodecError> {
    let object: T = serde_json::from_value(state).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(Box::new(object))
}

#[derive(Clone)]
struct ClassEntry {
    construct: ConstructFn,
    restore: RestoreFn,
    immediate: Vec<String>,
}

/// Known active object classes, by name
#[derive(Default)]
pub struct ClassRegistry {
    classes: DashMap<String, ClassEntry>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `T` instantiable by name. Re-registering is harmless.
    pub fn register<T: ActiveObject>(&self) {
        self.classes.insert(
            T::CLASS.to_string(),
            ClassEntry {
                construct: construct::<T>,
                restore: restore::<T>,
                immediate: T::immediate_services(),
            },
        );
        debug!("Registered active object class {}", T::CLASS);
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    fn entry(&self, class: &str) -> Option<ClassEntry> {
        self.classes.get(class).map(|e| e.clone())
    }

    /// Default immediate services of `class`.
    pub fn immediate_services(&self, class: &str) -> Vec<String> {
        self.entry(class).map(|e| e.immediate).unwrap_or_default()
    }

    /// `None` if the class is unknown.
    pub(crate) fn construct(
        &self,
        class: &str,
        args: &[Value],
    ) -> Option<Result<Box<dyn ErasedObject>, InvocationError>> {
        self.entry(class).map(|e| (e.construct)(args))
    }

    /// `None` if the class is unknown.
    pub(crate) fn restore(&self, class: &str, state: Value) -> Option<Result<Box<dyn ErasedObject>, CodecError>> {
        self.entry(class).map(|e| (e.restore)(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Cell {
        value: i64,
    }

    impl ActiveObject for Cell {
        const CLASS: &'static str = "Cell";

        fn create(args: &[Value]) -> Result<Self, InvocationError> {
            let value = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Cell { value })
        }

        fn serve(&mut self, call: &Request, _ctx: &mut ServiceContext<'_>) -> Result<Value, InvocationError> {
            Err(no_such_method(Self::CLASS, call.method()))
        }

        fn immediate_services() -> Vec<String> {
            vec!["peek".to_string()]
        }
    }

    #[test]
    fn test_construct_and_capture() {
        let classes = ClassRegistry::new();
        classes.register::<Cell>();

        let object = classes.construct("Cell", &[json!(9)]).unwrap().unwrap();
        assert_eq!(object.class_name(), "Cell");
        assert_eq!(object.capture().unwrap(), json!({"value": 9}));
        assert_eq!(classes.immediate_services("Cell"), vec!["peek".to_string()]);
    }

    #[test]
    fn test_restore_from_state() {
        let classes = ClassRegistry::new();
        classes.register::<Cell>();

        let mut object = classes.restore("Cell", json!({"value": 5})).unwrap().unwrap();
        let cell = object.as_any_mut().downcast_mut::<Cell>().unwrap();
        assert_eq!(cell.value, 5);

        assert!(matches!(
            classes.restore("Cell", json!({"wrong": true})),
            Some(Err(CodecError::Decode(_)))
        ));
        assert!(classes.restore("Missing", json!({})).is_none());
    }
}
