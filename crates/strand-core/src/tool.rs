use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Type tag of a tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Enum { values: Vec<String> },
    List { items: Box<ToolParameterType> },
    Object { properties: Vec<ToolParameterDescriptor> },
}

impl ToolParameterType {
    pub fn list_of(items: ToolParameterType) -> Self {
        Self::List {
            items: Box::new(items),
        }
    }

    fn schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Float => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Enum { values } => json!({ "type": "string", "enum": values }),
            Self::List { items } => json!({ "type": "array", "items": items.schema() }),
            Self::Object { properties } => object_schema(properties, &[]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameterDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ToolParameterType,
}

impl ToolParameterDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ToolParameterType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
        }
    }
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_parameters: Vec<ToolParameterDescriptor>,
    #[serde(default)]
    pub optional_parameters: Vec<ToolParameterDescriptor>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_parameters: vec![],
            optional_parameters: vec![],
        }
    }

    pub fn with_required(mut self, param: ToolParameterDescriptor) -> Self {
        self.required_parameters.push(param);
        self
    }

    pub fn with_optional(mut self, param: ToolParameterDescriptor) -> Self {
        self.optional_parameters.push(param);
        self
    }

    /// JSON Schema for the tool input, for providers that take one.
    pub fn input_schema(&self) -> Value {
        let mut all = self.required_parameters.clone();
        all.extend(self.optional_parameters.iter().cloned());
        object_schema(&all, &self.required_parameters)
    }
}

fn object_schema(
    properties: &[ToolParameterDescriptor],
    required: &[ToolParameterDescriptor],
) -> Value {
    let mut props = Map::new();
    for p in properties {
        let mut schema = p.kind.schema();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("description".into(), Value::String(p.description.clone()));
        }
        props.insert(p.name.clone(), schema);
    }
    let required: Vec<&str> = required.iter().map(|p| p.name.as_str()).collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_marks_required_only() {
        let desc = ToolDescriptor::new("search", "Search the web")
            .with_required(ToolParameterDescriptor::new(
                "query",
                "Search terms",
                ToolParameterType::String,
            ))
            .with_optional(ToolParameterDescriptor::new(
                "limit",
                "Max hits",
                ToolParameterType::Integer,
            ));

        let schema = desc.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["properties"]["query"]["description"], "Search terms");
    }

    #[test]
    fn nested_types() {
        let kind = ToolParameterType::list_of(ToolParameterType::Enum {
            values: vec!["a".into(), "b".into()],
        });
        let schema = kind.schema();
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["enum"], json!(["a", "b"]));

        let obj = ToolParameterType::Object {
            properties: vec![ToolParameterDescriptor::new(
                "x",
                "coordinate",
                ToolParameterType::Float,
            )],
        };
        assert_eq!(obj.schema()["properties"]["x"]["type"], "number");
    }
}
