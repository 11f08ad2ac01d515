use crate::attribute::{AttributeHandle, Propagation, Registration};
use crate::behavior::BehaviorRegistry;
use crate::error::{Result, SyncError};
use crate::history::HistoryConfig;
use crate::object::{Lifecycle, Object};
use crate::protocol::{Command, ComponentInfo, ObjectDescriptor, ObjectId};
use crate::sync::SyncContext;
use crate::value::Value;
use ahash::AHashMap;
use tracing::debug;

/// What happened when a descriptor was loaded.
#[derive(Debug)]
pub struct LoadReport {
    pub id: ObjectId,
    /// True when the descriptor confirmed a pending local object instead of
    /// creating a new one.
    pub confirmed: bool,
    pub skipped: Vec<SyncError>,
}

/// Every live object, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    objects: AHashMap<ObjectId, Object>,
    history: HistoryConfig,
}

impl Registry {
    pub fn new(history: HistoryConfig) -> Self {
        Self {
            objects: AHashMap::new(),
            history,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<&Object> {
        self.objects
            .get(id)
            .ok_or_else(|| SyncError::not_found_object(id))
    }

    pub fn lookup_mut(&mut self, id: &str) -> Result<&mut Object> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found_object(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(|k| k.as_str())
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Materialises a descriptor received from the server. A descriptor for a
    /// pending local object confirms it; a descriptor for an id already
    /// confirmed is re-applied to the existing object as inbound state.
    pub fn construct_from_descriptor(
        &mut self,
        descriptor: ObjectDescriptor,
        behaviors: &BehaviorRegistry,
        ctx: &mut SyncContext<'_>,
    ) -> LoadReport {
        if let Some(existing) = self.objects.get_mut(&descriptor.id) {
            let confirmed = existing.lifecycle() == Lifecycle::PendingLocal;
            existing.confirm();

            let ObjectDescriptor {
                id,
                attributes,
                components,
                ports,
                ..
            } = descriptor;

            let mut skipped = Vec::new();
            for info in &attributes {
                if let Err(err) = existing.register_info(info, ctx) {
                    skipped.push(err);
                }
            }
            skipped.extend(existing.attach_components(components, behaviors, ctx));
            existing.adopt_ports(ports);
            debug!(object = %id, confirmed, skipped = skipped.len(), "descriptor matched existing object");

            return LoadReport { id, confirmed, skipped };
        }

        let (object, skipped) = Object::from_descriptor(descriptor, behaviors, self.history, ctx);
        let id = object.id().to_string();
        self.objects.insert(id.clone(), object);

        LoadReport {
            id,
            confirmed: false,
            skipped,
        }
    }

    /// Creates an object for a local user action with its initial attributes
    /// and behavior units, and announces it.
    pub fn construct_local(
        &mut self,
        object_type: &str,
        initial: Vec<Registration>,
        components: Vec<ComponentInfo>,
        behaviors: &BehaviorRegistry,
        ctx: &mut SyncContext<'_>,
    ) -> Result<LoadReport> {
        let (object, skipped) = Object::local(object_type, initial, components, behaviors, self.history, ctx)?;
        let id = object.id().to_string();
        self.objects.insert(id.clone(), object);

        Ok(LoadReport {
            id,
            confirmed: false,
            skipped,
        })
    }

    /// Removes the object and drops all of its attributes and subscribers
    /// before returning. Only a locally initiated delete is sent out.
    pub fn destroy(&mut self, id: &str, outbound: bool, ctx: &mut SyncContext<'_>) -> Result<()> {
        let mut object = self
            .objects
            .remove(id)
            .ok_or_else(|| SyncError::not_found_object(id))?;
        object.teardown();
        drop(object);

        ctx.environment.forget_object(id);
        if outbound {
            ctx.emit(Command::delete_object(id));
        }
        debug!(object = %id, outbound, "destroyed object");
        Ok(())
    }

    pub fn register(
        &mut self,
        id: &str,
        registration: Registration,
        ctx: &mut SyncContext<'_>,
    ) -> Result<AttributeHandle> {
        self.lookup_mut(id)?.register(registration, ctx)
    }

    pub fn set(
        &mut self,
        handle: &AttributeHandle,
        value: Value,
        propagation: Propagation,
        ctx: &mut SyncContext<'_>,
    ) -> Result<()> {
        self.lookup_mut(&handle.object_id)?
            .apply(&handle.name, value, propagation, ctx)
    }

    pub fn get(&self, handle: &AttributeHandle) -> Result<&Value> {
        self.lookup(&handle.object_id)?.get(&handle.name)
    }
}
