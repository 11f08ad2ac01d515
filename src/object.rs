use crate::attribute::{Attribute, AttributeHandle, Propagation, Registration};
use crate::behavior::{Binder, BehaviorRegistry, BehaviorUnit};
use crate::error::{Result, SyncError};
use crate::history::{History, HistoryConfig};
use crate::protocol::{AttributeInfo, AttributeName, Command, ComponentInfo, ObjectDescriptor, ObjectId, PortInfo};
use crate::sync::SyncContext;
use crate::value::{Value, ValueType};
use ahash::AHashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Placed in this editor; announces itself and its attributes.
    Local,
    /// Received from the server.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    PendingLocal,
    Confirmed,
}

pub struct Object {
    id: ObjectId,
    object_type: String,
    provenance: Provenance,
    lifecycle: Lifecycle,
    attributes: AHashMap<AttributeName, Attribute>,
    behaviors: Vec<Box<dyn BehaviorUnit>>,
    components: Vec<ComponentInfo>,
    ports: Vec<PortInfo>,
    history: History,
    /// Whether new attributes are announced to the server. Only true for a
    /// local object once its "new object" command has gone out.
    announce: bool,
}

impl Object {
    fn new(id: ObjectId, object_type: String, provenance: Provenance, history: HistoryConfig) -> Self {
        let lifecycle = match provenance {
            Provenance::Local => Lifecycle::PendingLocal,
            Provenance::Remote => Lifecycle::Confirmed,
        };

        Self {
            id,
            object_type,
            provenance,
            lifecycle,
            attributes: AHashMap::new(),
            behaviors: Vec::new(),
            components: Vec::new(),
            ports: Vec::new(),
            history: History::new(history),
            announce: false,
        }
    }

    /// Builds an object from a server descriptor.
    ///
    /// Parts that cannot be materialised (unknown attribute or behavior types,
    /// undecodable values) are logged and returned next to the object; the rest
    /// of the descriptor is still applied.
    pub fn from_descriptor(
        descriptor: ObjectDescriptor,
        behaviors: &BehaviorRegistry,
        history: HistoryConfig,
        ctx: &mut SyncContext<'_>,
    ) -> (Self, Vec<SyncError>) {
        let ObjectDescriptor {
            id,
            object_type,
            attributes,
            components,
            ports,
        } = descriptor;

        let mut object = Object::new(id, object_type, Provenance::Remote, history);
        let mut skipped = Vec::new();

        for info in &attributes {
            if let Err(err) = object.register_info(info, ctx) {
                warn!(object = %object.id, attribute = %info.name, error = %err, "skipping descriptor attribute");
                skipped.push(err);
            }
        }

        skipped.extend(object.attach_components(components, behaviors, ctx));
        object.ports = ports;

        debug!(
            object = %object.id,
            object_type = %object.object_type,
            attributes = object.attributes.len(),
            behaviors = object.behaviors.len(),
            skipped = skipped.len(),
            "constructed object from descriptor"
        );

        (object, skipped)
    }

    /// Creates an object for a local user action and announces it with one
    /// "new object" command carrying the initial attributes.
    ///
    /// Behavior units are bound before the announcement, so the attributes
    /// they register travel inside the descriptor. Unknown component types are
    /// skipped and returned next to the object.
    pub fn local(
        object_type: &str,
        initial: Vec<Registration>,
        components: Vec<ComponentInfo>,
        behaviors: &BehaviorRegistry,
        history: HistoryConfig,
        ctx: &mut SyncContext<'_>,
    ) -> Result<(Self, Vec<SyncError>)> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut object = Object::new(id, object_type.to_string(), Provenance::Local, history);

        for registration in initial {
            object.register_with(registration, false, ctx)?;
        }
        let skipped = object.attach_components(components, behaviors, ctx);

        ctx.emit(Command::new_object(object.descriptor()));
        object.announce = true;
        Ok((object, skipped))
    }

    /// Creates the attribute or joins an existing one. New attributes on a
    /// local object are announced to the server.
    pub fn register(&mut self, registration: Registration, ctx: &mut SyncContext<'_>) -> Result<AttributeHandle> {
        let announce = self.provenance == Provenance::Local && self.announce;
        self.register_with(registration, announce, ctx)
    }

    pub(crate) fn register_with(
        &mut self,
        registration: Registration,
        announce: bool,
        ctx: &mut SyncContext<'_>,
    ) -> Result<AttributeHandle> {
        let Registration {
            name,
            value_type,
            on_change,
            puller,
            initial,
            history,
        } = registration;

        if let Some(attr) = self.attributes.get_mut(&name) {
            if attr.value_type() != value_type {
                return Err(SyncError::TypeMismatch {
                    attribute: name,
                    expected: attr.value_type().to_string(),
                    actual: value_type.to_string(),
                });
            }
            if let Some(puller) = puller {
                attr.adopt_puller(puller);
            }
            if let Some(subscriber) = on_change {
                attr.subscribe(subscriber);
            }
            return Ok(attr.handle());
        }

        let mut attr = Attribute::new(&self.id, &name, value_type, initial, history)?;
        if announce {
            ctx.emit(Command::new_attribute(&self.id, &name, value_type, history, attr.get()));
        }
        if let Some(puller) = puller {
            attr.adopt_puller(puller);
        }
        if let Some(subscriber) = on_change {
            attr.subscribe(subscriber);
        }

        let handle = attr.handle();
        self.attributes.insert(name, attr);
        Ok(handle)
    }

    /// Registers an attribute described on the wire without announcing it.
    /// If the attribute already exists its value is brought in line with the
    /// wire value as an inbound set.
    pub(crate) fn register_info(&mut self, info: &AttributeInfo, ctx: &mut SyncContext<'_>) -> Result<AttributeHandle> {
        let value_type = ValueType::from_wire_name(&info.value_type)?;
        let initial = if info.value.is_null() {
            None
        } else {
            Some(Value::decode(&info.value, value_type).map_err(|e| e.for_attribute(&info.name))?)
        };

        let existed = self.attributes.contains_key(&info.name);
        let mut registration = Registration::new(info.name.clone(), value_type)
            .history(info.history.unwrap_or_default());
        if let Some(value) = initial.clone() {
            registration = registration.initial(value);
        }
        let handle = self.register_with(registration, false, ctx)?;

        if let (true, Some(value)) = (existed, initial) {
            self.apply(&info.name, value, Propagation::Inbound, ctx)?;
        }
        Ok(handle)
    }

    fn attach(
        &mut self,
        mut unit: Box<dyn BehaviorUnit>,
        component: ComponentInfo,
        ctx: &mut SyncContext<'_>,
    ) -> Result<()> {
        unit.bind(&mut Binder::new(self, ctx, &component))?;
        self.behaviors.push(unit);
        self.components.push(component);
        Ok(())
    }

    /// Binds every component the object does not carry yet. Attributes these
    /// units register are not announced: the components came from the server
    /// or travel inside this object's own "new object" command.
    pub(crate) fn attach_components(
        &mut self,
        components: Vec<ComponentInfo>,
        behaviors: &BehaviorRegistry,
        ctx: &mut SyncContext<'_>,
    ) -> Vec<SyncError> {
        let announce = std::mem::replace(&mut self.announce, false);
        let mut skipped = Vec::new();

        for component in components {
            if self.components.contains(&component) {
                continue;
            }
            let attached = behaviors
                .create(&component)
                .and_then(|unit| self.attach(unit, component.clone(), ctx));
            if let Err(err) = attached {
                warn!(object = %self.id, component = %component.component_type, error = %err, "skipping behavior unit");
                skipped.push(err);
            }
        }

        self.announce = announce;
        skipped
    }

    /// Takes the server's port list when this object has none yet.
    pub(crate) fn adopt_ports(&mut self, ports: Vec<PortInfo>) {
        if self.ports.is_empty() {
            self.ports = ports;
        }
    }

    pub fn set(&mut self, name: &str, value: Value, outbound: bool, ctx: &mut SyncContext<'_>) -> Result<()> {
        self.apply(name, value, Propagation::from_outbound(outbound), ctx)
    }

    pub(crate) fn apply(
        &mut self,
        name: &str,
        value: Value,
        propagation: Propagation,
        ctx: &mut SyncContext<'_>,
    ) -> Result<()> {
        let attr = self
            .attributes
            .get_mut(name)
            .ok_or_else(|| SyncError::not_found_attribute(&self.id, name))?;
        attr.set(value, propagation, &mut self.history, ctx)
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.attribute(name)
            .map(|a| a.get())
            .ok_or_else(|| SyncError::not_found_attribute(&self.id, name))
    }

    /// Pulls the authoritative input and sends it as a local edit. When the
    /// input holds no usable value, subscribers are re-synchronised with the
    /// stored value instead and `false` is returned.
    pub fn commit(&mut self, name: &str, ctx: &mut SyncContext<'_>) -> Result<bool> {
        let pulled = self
            .attribute(name)
            .ok_or_else(|| SyncError::not_found_attribute(&self.id, name))?
            .pull();

        match pulled {
            Some(value) => {
                self.apply(name, value, Propagation::Local, ctx)?;
                Ok(true)
            }
            None => {
                if let Some(attr) = self.attributes.get_mut(name) {
                    attr.refresh();
                }
                Ok(false)
            }
        }
    }

    pub fn undo(&mut self, ctx: &mut SyncContext<'_>) -> Result<bool> {
        match self.history.undo() {
            Some(record) => {
                self.apply(&record.attribute, record.old, Propagation::Replay, ctx)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self, ctx: &mut SyncContext<'_>) -> Result<bool> {
        match self.history.redo() {
            Some(record) => {
                self.apply(&record.attribute, record.new, Propagation::Replay, ctx)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn confirm(&mut self) {
        self.lifecycle = Lifecycle::Confirmed;
    }

    /// Drops every attribute, subscriber and behavior unit.
    pub(crate) fn teardown(&mut self) {
        self.attributes.clear();
        self.behaviors.clear();
        self.history.clear();
    }

    pub fn descriptor(&self) -> ObjectDescriptor {
        let mut attributes: Vec<AttributeInfo> = self.attributes.values().map(|a| a.info()).collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));

        ObjectDescriptor {
            id: self.id.clone(),
            object_type: self.object_type.clone(),
            attributes,
            components: self.components.clone(),
            ports: self.ports.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|k| k.as_str())
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    pub fn components(&self) -> &[ComponentInfo] {
        &self.components
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("object_type", &self.object_type)
            .field("provenance", &self.provenance)
            .field("lifecycle", &self.lifecycle)
            .field("attributes", &self.attributes)
            .field("behaviors", &self.behaviors.len())
            .field("ports", &self.ports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryScope;
    use crate::serialization::WireFormat;
    use crate::sync::SyncStats;
    use crate::transport::MemoryChannel;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        channel: MemoryChannel,
        environment: History,
        stats: SyncStats,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                channel: MemoryChannel::new(WireFormat::Json),
                environment: History::default(),
                stats: SyncStats::default(),
            }
        }

        fn ctx(&mut self) -> SyncContext<'_> {
            SyncContext::new(&mut self.channel, &mut self.environment, &mut self.stats)
        }
    }

    /// Binds a text field to `target_attr` the way an editor widget would.
    struct TextField {
        shown: Rc<RefCell<String>>,
    }

    impl BehaviorUnit for TextField {
        fn bind(&mut self, binder: &mut Binder<'_, '_>) -> Result<()> {
            let target = binder
                .component()
                .target_attr
                .clone()
                .unwrap_or_else(|| "text".to_string());
            let shown = Rc::clone(&self.shown);
            let input = Rc::clone(&self.shown);
            binder.register(
                Registration::new(target, ValueType::Text)
                    .on_change(move |v: &Value| *shown.borrow_mut() = v.to_string())
                    .puller(move || Some(Value::Text(input.borrow().clone()))),
            )?;
            Ok(())
        }
    }

    fn behaviors(shown: Rc<RefCell<String>>) -> BehaviorRegistry {
        BehaviorRegistry::new().with("TextEditor", move |_| {
            Box::new(TextField {
                shown: Rc::clone(&shown),
            })
        })
    }

    #[test]
    fn test_descriptor_partial_failure() {
        let mut fixture = Fixture::new();
        let shown = Rc::new(RefCell::new(String::new()));
        let descriptor = ObjectDescriptor::new("n1", "CodeNode")
            .with_attribute(AttributeInfo::new("code", &Value::from("x = 1"), HistoryScope::ObjectLocal))
            .with_attribute(AttributeInfo {
                name: "tint".to_string(),
                value_type: "Color".to_string(),
                value: serde_json::json!("#fff"),
                history: None,
            })
            .with_component(ComponentInfo::new("TextEditor").with_target("code"))
            .with_component(ComponentInfo::new("Slider").with_target("speed"));

        let (object, skipped) =
            Object::from_descriptor(descriptor, &behaviors(Rc::clone(&shown)), HistoryConfig::default(), &mut fixture.ctx());

        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|e| matches!(e, SyncError::UnknownComponentType(_))));
        assert_eq!(object.get("code").unwrap(), &Value::from("x = 1"));
        assert_eq!(object.behavior_count(), 1);
        assert_eq!(*shown.borrow(), "x = 1");
        assert!(fixture.channel.is_empty());
    }

    #[test]
    fn test_local_object_announces_once() {
        let mut fixture = Fixture::new();
        let (object, skipped) = Object::local(
            "SimpleNode",
            vec![Registration::new("speed", ValueType::Number).initial(1.5)],
            Vec::new(),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        )
        .unwrap();
        assert!(skipped.is_empty());

        assert_eq!(object.lifecycle(), Lifecycle::PendingLocal);
        let sent = fixture.channel.sent_commands().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Command::NewObject(descriptor) => {
                assert_eq!(descriptor.id, object.id());
                assert_eq!(descriptor.attributes[0].name, "speed");
                assert_eq!(descriptor.attributes[0].value, serde_json::json!(1.5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_register_on_local_object_announces_new_attribute() {
        let mut fixture = Fixture::new();
        let (mut object, _) = Object::local(
            "SimpleNode",
            Vec::new(),
            Vec::new(),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        )
        .unwrap();
        fixture.channel.clear_sent();

        object
            .register(
                Registration::new("transform/pos", ValueType::Vector3).history(HistoryScope::EnvironmentGlobal),
                &mut fixture.ctx(),
            )
            .unwrap();
        object
            .register(Registration::new("transform/pos", ValueType::Vector3), &mut fixture.ctx())
            .unwrap();

        let sent = fixture.channel.sent_commands().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            Command::NewAttribute { history: HistoryScope::EnvironmentGlobal, .. }
        ));
        assert_eq!(object.attribute("transform/pos").unwrap().history_scope(), HistoryScope::EnvironmentGlobal);
    }

    #[test]
    fn test_reregister_with_other_type_fails() {
        let mut fixture = Fixture::new();
        let (mut object, _) = Object::from_descriptor(
            ObjectDescriptor::new("n1", "SimpleNode"),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        );
        object.register(Registration::new("speed", ValueType::Number), &mut fixture.ctx()).unwrap();

        let err = object
            .register(Registration::new("speed", ValueType::Text), &mut fixture.ctx())
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { .. }));
    }

    #[test]
    fn test_commit_pulls_and_sends() {
        let mut fixture = Fixture::new();
        let shown = Rc::new(RefCell::new(String::new()));
        let descriptor = ObjectDescriptor::new("n1", "CodeNode")
            .with_component(ComponentInfo::new("TextEditor").with_target("code"));
        let (mut object, _) =
            Object::from_descriptor(descriptor, &behaviors(Rc::clone(&shown)), HistoryConfig::default(), &mut fixture.ctx());

        *shown.borrow_mut() = "print(1)".to_string();
        assert!(object.commit("code", &mut fixture.ctx()).unwrap());

        assert_eq!(object.get("code").unwrap(), &Value::from("print(1)"));
        assert_eq!(fixture.channel.sent_count(), 1);
        assert_eq!(object.history().len(), 1);
    }

    #[test]
    fn test_failed_pull_resyncs_subscribers() {
        let mut fixture = Fixture::new();
        let (mut object, _) = Object::from_descriptor(
            ObjectDescriptor::new("n1", "SimpleNode"),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        object
            .register(
                Registration::new("speed", ValueType::Number)
                    .initial(2.0)
                    .on_change(move |v: &Value| sink.borrow_mut().push(v.clone()))
                    .puller(|| None),
                &mut fixture.ctx(),
            )
            .unwrap();

        assert!(!object.commit("speed", &mut fixture.ctx()).unwrap());

        assert_eq!(*seen.borrow(), vec![Value::Number(2.0), Value::Number(2.0)]);
        assert!(fixture.channel.is_empty());
    }

    #[test]
    fn test_undo_redo_object_scope() {
        let mut fixture = Fixture::new();
        let (mut object, _) = Object::from_descriptor(
            ObjectDescriptor::new("n1", "SimpleNode")
                .with_attribute(AttributeInfo::new("speed", &Value::Number(0.0), HistoryScope::ObjectLocal)),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        );

        object.set("speed", Value::Number(3.0), true, &mut fixture.ctx()).unwrap();
        assert!(object.undo(&mut fixture.ctx()).unwrap());
        assert_eq!(object.get("speed").unwrap(), &Value::Number(0.0));
        assert!(object.redo(&mut fixture.ctx()).unwrap());
        assert_eq!(object.get("speed").unwrap(), &Value::Number(3.0));

        assert_eq!(object.history().len(), 1);
        assert_eq!(fixture.channel.sent_count(), 3);
        assert!(!object.redo(&mut fixture.ctx()).unwrap());
    }

    #[test]
    fn test_descriptor_export_roundtrip() {
        let mut fixture = Fixture::new();
        let descriptor = ObjectDescriptor::new("n1", "SimpleNode")
            .with_attribute(AttributeInfo::new("a", &Value::Flag(true), HistoryScope::None))
            .with_attribute(AttributeInfo::new("b", &Value::Vector3(1.0, 2.0, 3.0), HistoryScope::EnvironmentGlobal));

        let (object, skipped) = Object::from_descriptor(
            descriptor.clone(),
            &BehaviorRegistry::new(),
            HistoryConfig::default(),
            &mut fixture.ctx(),
        );

        assert!(skipped.is_empty());
        assert_eq!(object.descriptor(), descriptor);
    }
}
