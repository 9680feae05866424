use crate::errors::AirgapError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A nested configuration document: blueprint inputs, resource lists and the
/// like. Mapping entries keep their insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value", into = "Value")]
pub enum ResourceTree {
    Mapping(Vec<(String, ResourceTree)>),
    Sequence(Vec<ResourceTree>),
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl ResourceTree {
    pub fn empty_mapping() -> Self {
        ResourceTree::Mapping(Vec::new())
    }

    pub fn string(value: impl Into<String>) -> Self {
        ResourceTree::Scalar(Scalar::String(value.into()))
    }

    pub fn from_json_str(text: &str) -> Result<Self, AirgapError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }

    /// YAML is a superset of JSON, so this also accepts JSON documents.
    /// Scalar keys are stringified and tags are dropped. Non-finite floats
    /// have no JSON form and are rejected.
    pub fn from_yaml_str(text: &str) -> Result<Self, AirgapError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        Self::try_from(value)
    }

    pub fn to_json_string(&self) -> Result<String, AirgapError> {
        Ok(serde_json::to_string(&Value::from(self.clone()))?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, AirgapError> {
        Ok(serde_json::to_string_pretty(&Value::from(self.clone()))?)
    }

    pub fn get(&self, key: &str) -> Option<&ResourceTree> {
        match self {
            ResourceTree::Mapping(entries) => entries
                .iter()
                .find(|(candidate, _)| candidate == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Replaces the value under `key`, or appends it when the key is new.
    /// No-op on anything but a mapping.
    pub fn insert(&mut self, key: impl Into<String>, value: ResourceTree) {
        let ResourceTree::Mapping(entries) = self else {
            return;
        };
        let key = key.into();
        match entries.iter_mut().find(|(candidate, _)| *candidate == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> &[(String, ResourceTree)] {
        match self {
            ResourceTree::Mapping(entries) => entries,
            _ => &[],
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResourceTree::Scalar(Scalar::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, ResourceTree::Mapping(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResourceTree::Mapping(entries) => entries.is_empty(),
            ResourceTree::Sequence(items) => items.is_empty(),
            ResourceTree::Scalar(Scalar::Null) => true,
            ResourceTree::Scalar(_) => false,
        }
    }
}

impl From<Value> for ResourceTree {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => ResourceTree::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, ResourceTree::from(value)))
                    .collect(),
            ),
            Value::Array(items) => {
                ResourceTree::Sequence(items.into_iter().map(ResourceTree::from).collect())
            }
            Value::String(text) => ResourceTree::Scalar(Scalar::String(text)),
            Value::Number(number) => ResourceTree::Scalar(Scalar::Number(number)),
            Value::Bool(flag) => ResourceTree::Scalar(Scalar::Bool(flag)),
            Value::Null => ResourceTree::Scalar(Scalar::Null),
        }
    }
}

impl TryFrom<serde_yaml::Value> for ResourceTree {
    type Error = AirgapError;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        tree_from_yaml(value)
    }
}

impl From<ResourceTree> for Value {
    fn from(tree: ResourceTree) -> Self {
        match tree {
            ResourceTree::Mapping(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
            ResourceTree::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            ResourceTree::Scalar(Scalar::String(text)) => Value::String(text),
            ResourceTree::Scalar(Scalar::Number(number)) => Value::Number(number),
            ResourceTree::Scalar(Scalar::Bool(flag)) => Value::Bool(flag),
            ResourceTree::Scalar(Scalar::Null) => Value::Null,
        }
    }
}

fn tree_from_yaml(value: serde_yaml::Value) -> Result<ResourceTree, AirgapError> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => ResourceTree::Scalar(Scalar::Null),
        Yaml::Bool(flag) => ResourceTree::Scalar(Scalar::Bool(flag)),
        Yaml::Number(number) => ResourceTree::Scalar(Scalar::Number(json_number(&number)?)),
        Yaml::String(text) => ResourceTree::Scalar(Scalar::String(text)),
        Yaml::Sequence(items) => ResourceTree::Sequence(
            items
                .into_iter()
                .map(tree_from_yaml)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut entries: Vec<(String, ResourceTree)> = Vec::with_capacity(map.len());
            for (key, value) in map {
                let key = yaml_key(key)?;
                if entries.iter().any(|(existing, _)| *existing == key) {
                    return Err(AirgapError::invalid_params(format!(
                        "Duplicate mapping key '{}' in YAML document",
                        key
                    )));
                }
                entries.push((key, tree_from_yaml(value)?));
            }
            ResourceTree::Mapping(entries)
        }
        Yaml::Tagged(tagged) => tree_from_yaml(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, AirgapError> {
    use serde_yaml::Value as Yaml;
    match key {
        Yaml::String(text) => Ok(text),
        Yaml::Number(number) => Ok(number.to_string()),
        Yaml::Bool(flag) => Ok(flag.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => yaml_key(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(AirgapError::invalid_params(
            "YAML mapping keys must be scalars",
        )),
    }
}

fn json_number(number: &serde_yaml::Number) -> Result<serde_json::Number, AirgapError> {
    if let Some(int) = number.as_i64() {
        return Ok(int.into());
    }
    if let Some(uint) = number.as_u64() {
        return Ok(uint.into());
    }
    number
        .as_f64()
        .and_then(serde_json::Number::from_f64)
        .ok_or_else(|| {
            AirgapError::invalid_params(format!("YAML number {} has no JSON form", number))
        })
}
