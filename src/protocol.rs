use crate::history::HistoryScope;
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};

pub type ObjectId = String;
pub type AttributeName = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    #[serde(rename = "new object")]
    NewObject(ObjectDescriptor),

    #[serde(rename = "new attribute")]
    NewAttribute {
        id: ObjectId,
        name: AttributeName,
        #[serde(rename = "type")]
        value_type: String,
        #[serde(rename = "h", default)]
        history: HistoryScope,
        #[serde(default)]
        value: serde_json::Value,
    },

    #[serde(rename = "set attribute")]
    SetAttribute {
        id: ObjectId,
        name: AttributeName,
        value: serde_json::Value,
    },

    #[serde(rename = "delete object")]
    DeleteObject { id: ObjectId },

    /// Any command string this side does not understand.
    #[serde(other)]
    Unknown,
}

impl Command {
    pub fn new_object(descriptor: ObjectDescriptor) -> Self {
        Command::NewObject(descriptor)
    }

    pub fn new_attribute(
        id: &str,
        name: &str,
        value_type: ValueType,
        history: HistoryScope,
        value: &Value,
    ) -> Self {
        Command::NewAttribute {
            id: id.to_string(),
            name: name.to_string(),
            value_type: value_type.wire_name().to_string(),
            history,
            value: value.encode(),
        }
    }

    pub fn set_attribute(id: &str, name: &str, value: &Value) -> Self {
        Command::SetAttribute {
            id: id.to_string(),
            name: name.to_string(),
            value: value.encode(),
        }
    }

    pub fn delete_object(id: &str) -> Self {
        Command::DeleteObject { id: id.to_string() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::NewObject(_) => "new object",
            Command::NewAttribute { .. } => "new attribute",
            Command::SetAttribute { .. } => "set attribute",
            Command::DeleteObject { .. } => "delete object",
            Command::Unknown => "unknown",
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        match self {
            Command::NewObject(descriptor) => Some(&descriptor.id),
            Command::NewAttribute { id, .. }
            | Command::SetAttribute { id, .. }
            | Command::DeleteObject { id } => Some(id),
            Command::Unknown => None,
        }
    }
}

/// Everything needed to materialise an object: sent with "new object" and
/// consumed when a graph is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(rename = "attrs", alias = "attr", default)]
    pub attributes: Vec<AttributeInfo>,
    #[serde(rename = "comp", default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentInfo>,
    #[serde(rename = "portInfos", default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortInfo>,
}

impl ObjectDescriptor {
    pub fn new(id: impl Into<ObjectId>, object_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            attributes: Vec::new(),
            components: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeInfo) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_component(mut self, component: ComponentInfo) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_port(mut self, port: PortInfo) -> Self {
        self.ports.push(port);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: AttributeName,
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryScope>,
}

impl AttributeInfo {
    pub fn new(name: &str, value: &Value, history: HistoryScope) -> Self {
        Self {
            name: name.to_string(),
            value_type: value.value_type().wire_name().to_string(),
            value: value.encode(),
            history: Some(history),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_attr: Option<AttributeName>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ComponentInfo {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            name: None,
            target_attr: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_target(mut self, target_attr: impl Into<AttributeName>) -> Self {
        self.target_attr = Some(target_attr.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub port_type: String,
    #[serde(rename = "isInput", default)]
    pub is_input: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub with_order: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
