use serde::{Deserialize, Serialize};

/// A selectable value together with the resource key of its label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueText {
    pub value: String,
    pub text: String,
}

impl ValueText {
    pub fn new(value: &str, text: &str) -> Self {
        ValueText { value: value.to_string(), text: text.to_string() }
    }
}

/// Describes a command a meter supports, published so front ends can offer it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Provider family, e.g. "Peacefair"
    pub provider: String,
    /// Resource key of the command label
    pub label: String,
    pub options: Vec<ValueText>,
    pub id: u32,
}

impl CommandDescriptor {
    /// Command identifiers a caller may send for this command
    pub fn values(&self) -> Vec<&str> {
        self.options.iter().map(|o| o.value.as_str()).collect()
    }
}
