use crate::attribute::{AttributeHandle, Registration};
use crate::error::{Result, SyncError};
use crate::object::Object;
use crate::protocol::ComponentInfo;
use crate::sync::SyncContext;
use crate::value::Value;
use ahash::AHashMap;

/// A pluggable capability bound to an object, such as a text field or a
/// color picker. It learns about the object only through the attributes it
/// registers while binding.
pub trait BehaviorUnit {
    fn bind(&mut self, binder: &mut Binder<'_, '_>) -> Result<()>;
}

pub type BehaviorFactory = Box<dyn Fn(&ComponentInfo) -> Box<dyn BehaviorUnit>>;

/// The view of an object a behavior unit gets while binding.
pub struct Binder<'a, 'c> {
    object: &'a mut Object,
    ctx: &'a mut SyncContext<'c>,
    component: &'a ComponentInfo,
}

impl<'a, 'c> Binder<'a, 'c> {
    pub(crate) fn new(
        object: &'a mut Object,
        ctx: &'a mut SyncContext<'c>,
        component: &'a ComponentInfo,
    ) -> Self {
        Self {
            object,
            ctx,
            component,
        }
    }

    pub fn register(&mut self, registration: Registration) -> Result<AttributeHandle> {
        self.object.register(registration, self.ctx)
    }

    pub fn object_id(&self) -> &str {
        self.object.id()
    }

    pub fn object_type(&self) -> &str {
        self.object.object_type()
    }

    pub fn component(&self) -> &ComponentInfo {
        self.component
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.object.attribute(name).map(|a| a.get())
    }
}

/// Behavior-unit factories keyed by component type name.
///
/// Exact names win over prefixes; among prefixes the longest match wins, so
/// `Dropdown` can serve `DropdownFloat` and `DropdownString` alike.
#[derive(Default)]
pub struct BehaviorRegistry {
    exact: AHashMap<String, BehaviorFactory>,
    prefixes: Vec<(String, BehaviorFactory)>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&ComponentInfo) -> Box<dyn BehaviorUnit> + 'static,
    {
        self.exact.insert(type_name.to_string(), Box::new(factory));
    }

    pub fn register_prefix<F>(&mut self, prefix: &str, factory: F)
    where
        F: Fn(&ComponentInfo) -> Box<dyn BehaviorUnit> + 'static,
    {
        self.prefixes.retain(|(p, _)| p != prefix);
        self.prefixes.push((prefix.to_string(), Box::new(factory)));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn with<F>(mut self, type_name: &str, factory: F) -> Self
    where
        F: Fn(&ComponentInfo) -> Box<dyn BehaviorUnit> + 'static,
    {
        self.register(type_name, factory);
        self
    }

    fn factory(&self, type_name: &str) -> Option<&BehaviorFactory> {
        self.exact.get(type_name).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| type_name.starts_with(prefix.as_str()))
                .map(|(_, factory)| factory)
        })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factory(type_name).is_some()
    }

    pub fn create(&self, component: &ComponentInfo) -> Result<Box<dyn BehaviorUnit>> {
        self.factory(&component.component_type)
            .map(|factory| factory(component))
            .ok_or_else(|| {
                SyncError::UnknownComponentType(format!(
                    "behavior unit '{}'",
                    component.component_type
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
