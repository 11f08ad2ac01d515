use crate::error::{Result, SyncError};
use crate::history::{History, HistoryRecord, HistoryScope};
use crate::protocol::{AttributeInfo, AttributeName, Command, ObjectId};
use crate::sync::SyncContext;
use crate::value::{Value, ValueType};
use std::fmt;

/// Receives every new value of an attribute, e.g. to redraw a widget.
pub trait Subscriber {
    fn on_change(&mut self, value: &Value);
}

impl<F> Subscriber for F
where
    F: FnMut(&Value),
{
    fn on_change(&mut self, value: &Value) {
        self(value)
    }
}

/// Reads the authoritative input for an attribute, e.g. parses a text field.
/// Returns `None` when the input does not hold a usable value.
pub trait Puller {
    fn pull(&self) -> Option<Value>;
}

impl<F> Puller for F
where
    F: Fn() -> Option<Value>,
{
    fn pull(&self) -> Option<Value> {
        self()
    }
}

/// How a `set` travels once the value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Applied from the server: notify subscribers only.
    Inbound,
    /// A local edit: notify, send once, journal once.
    Local,
    /// Undo or redo: notify and send, but the journal already holds the change.
    Replay,
}

impl Propagation {
    pub fn from_outbound(outbound: bool) -> Self {
        if outbound {
            Propagation::Local
        } else {
            Propagation::Inbound
        }
    }

    pub fn sends(&self) -> bool {
        !matches!(self, Propagation::Inbound)
    }

    pub fn journals(&self) -> bool {
        matches!(self, Propagation::Local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeHandle {
    pub object_id: ObjectId,
    pub name: AttributeName,
}

impl AttributeHandle {
    pub fn new(object_id: impl Into<ObjectId>, name: impl Into<AttributeName>) -> Self {
        Self {
            object_id: object_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_id, self.name)
    }
}

/// One `register` call: the slot to create or join, plus what the caller
/// brings to it.
pub struct Registration {
    pub(crate) name: AttributeName,
    pub(crate) value_type: ValueType,
    pub(crate) on_change: Option<Box<dyn Subscriber>>,
    pub(crate) puller: Option<Box<dyn Puller>>,
    pub(crate) initial: Option<Value>,
    pub(crate) history: HistoryScope,
}

impl Registration {
    pub fn new(name: impl Into<AttributeName>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            on_change: None,
            puller: None,
            initial: None,
            history: HistoryScope::default(),
        }
    }

    pub fn on_change<S: Subscriber + 'static>(mut self, subscriber: S) -> Self {
        self.on_change = Some(Box::new(subscriber));
        self
    }

    pub fn puller<P: Puller + 'static>(mut self, puller: P) -> Self {
        self.puller = Some(Box::new(puller));
        self
    }

    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    pub fn history(mut self, scope: HistoryScope) -> Self {
        self.history = scope;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct Attribute {
    owner: ObjectId,
    name: AttributeName,
    value_type: ValueType,
    value: Value,
    subscribers: Vec<Box<dyn Subscriber>>,
    puller: Option<Box<dyn Puller>>,
    history: HistoryScope,
}

impl Attribute {
    pub(crate) fn new(
        owner: &str,
        name: &str,
        value_type: ValueType,
        initial: Option<Value>,
        history: HistoryScope,
    ) -> Result<Self> {
        let value = match initial {
            Some(value) => {
                check_type(name, value_type, &value)?;
                value
            }
            None => value_type.default_value(),
        };

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            value_type,
            value,
            subscribers: Vec::new(),
            puller: None,
            history,
        })
    }

    /// Appends a subscriber and synchronises it with the current value.
    pub(crate) fn subscribe(&mut self, mut subscriber: Box<dyn Subscriber>) {
        subscriber.on_change(&self.value);
        self.subscribers.push(subscriber);
    }

    /// First puller wins; returns whether this one was adopted.
    pub(crate) fn adopt_puller(&mut self, puller: Box<dyn Puller>) -> bool {
        if self.puller.is_some() {
            return false;
        }
        self.puller = Some(puller);
        true
    }

    pub(crate) fn set(
        &mut self,
        value: Value,
        propagation: Propagation,
        object_history: &mut History,
        ctx: &mut SyncContext<'_>,
    ) -> Result<()> {
        check_type(&self.name, self.value_type, &value)?;

        let old = std::mem::replace(&mut self.value, value);
        self.notify();

        if propagation.sends() {
            ctx.emit(Command::set_attribute(&self.owner, &self.name, &self.value));
        }

        if propagation.journals() {
            let record = HistoryRecord::new(&self.owner, &self.name, old, self.value.clone());
            match self.history {
                HistoryScope::None => {}
                HistoryScope::ObjectLocal => object_history.record(record),
                HistoryScope::EnvironmentGlobal => ctx.environment.record(record),
            }
        }

        Ok(())
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    pub fn pull(&self) -> Option<Value> {
        self.puller.as_ref().and_then(|p| p.pull())
    }

    /// Re-sends the current value to every subscriber without changing it.
    pub(crate) fn refresh(&mut self) {
        self.notify();
    }

    fn notify(&mut self) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber.on_change(&self.value);
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn history_scope(&self) -> HistoryScope {
        self.history
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn has_puller(&self) -> bool {
        self.puller.is_some()
    }

    pub fn handle(&self) -> AttributeHandle {
        AttributeHandle::new(self.owner.clone(), self.name.clone())
    }

    pub fn info(&self) -> AttributeInfo {
        AttributeInfo::new(&self.name, &self.value, self.history)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("value", &self.value)
            .field("subscribers", &self.subscribers.len())
            .field("puller", &self.puller.is_some())
            .field("history", &self.history)
            .finish()
    }
}

/// Checks the variant against the attribute's fixed type. Non-finite numbers
/// are rejected too: the wire cannot carry them, so peers would drop the update.
pub(crate) fn check_type(name: &str, expected: ValueType, value: &Value) -> Result<()> {
    let actual = if value.value_type() != expected {
        value.value_type().to_string()
    } else if !value.is_finite() {
        format!("non-finite {}", value)
    } else {
        return Ok(());
    };

    Err(SyncError::TypeMismatch {
        attribute: name.to_string(),
        expected: expected.to_string(),
        actual,
    })
}
