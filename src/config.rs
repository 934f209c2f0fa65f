use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

/// A submitted parameter value. Request parameters arrive as a single string
/// or as a list (multi-select inputs, checkbox groups); fields that were not
/// present in the request at all resolve to `Empty` rather than being absent
/// from the data map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Items(Vec<String>),
}

impl FieldValue {
    /// An empty value, an empty string, and an empty list all count as
    /// "no value" for the purposes of the required check.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Items(items) => items.is_empty(),
        }
    }

    /// Flatten to text. Lists are joined with a comma and a space, matching
    /// the message body format.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Empty => Cow::Borrowed(""),
            FieldValue::Text(s) => Cow::Borrowed(s),
            FieldValue::Items(items) => Cow::Owned(items.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::Items(items)
    }
}

/// Submitted values keyed by registered field name.
pub type SubmissionData = HashMap<String, FieldValue>;

/// Final error messages keyed by field name. Non-empty means rejected.
pub type ErrorMap = HashMap<String, String>;

/// Value types accepted by the `Type` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeRule {
    Email,
    Number,
    Tel,
    Url,
}

/// A single validation constraint. Rules are evaluated in declaration order
/// and each failing rule contributes its name to the failure list; the last
/// failing rule selects the error message shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule")]
pub enum Rule {
    Type { kind: TypeRule },
    MaxLength { limit: usize },
    MinLength { limit: usize },
    Max { limit: f64 },
    Min { limit: f64 },
    Pattern { pattern: String },
    Match { field: String },
    Function { name: String },
}

impl Rule {
    /// Canonical rule name, used to key rule-specific error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Type { .. } => "type",
            Rule::MaxLength { .. } => "maxlength",
            Rule::MinLength { .. } => "minlength",
            Rule::Max { .. } => "max",
            Rule::Min { .. } => "min",
            Rule::Pattern { .. } => "pattern",
            Rule::Match { .. } => "match",
            Rule::Function { .. } => "function",
        }
    }
}

/// Per-field error message configuration: either one message for every
/// failure, or a map from rule name (plus the literal key `required`) to a
/// specific message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorMessage {
    Single(String),
    PerRule(HashMap<String, String>),
}

impl ErrorMessage {
    /// Look up the message for a rule name. A single-string configuration
    /// answers every key; a map falls back to its `required` entry.
    pub fn message_for(&self, rule: &str) -> Option<&str> {
        match self {
            ErrorMessage::Single(message) => Some(message),
            ErrorMessage::PerRule(map) => map
                .get(rule)
                .or_else(|| map.get("required"))
                .map(String::as_str),
        }
    }
}

/// One registered form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validate: Vec<Rule>,
    #[serde(default)]
    pub error: Option<ErrorMessage>,
    #[serde(default)]
    pub exclude: bool,
    /// Resolved request value, filled in during submission handling. Before
    /// a submission this holds any caller-set default.
    #[serde(default)]
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            label: None,
            required: false,
            validate: Vec::new(),
            error: None,
            exclude: false,
            value: FieldValue::Empty,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.validate.push(rule);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(ErrorMessage::Single(message.into()));
        self
    }

    pub fn rule_error(mut self, rule: impl Into<String>, message: impl Into<String>) -> Self {
        match &mut self.error {
            Some(ErrorMessage::PerRule(map)) => {
                map.insert(rule.into(), message.into());
            }
            Some(ErrorMessage::Single(single)) => {
                let mut map = HashMap::new();
                map.insert("required".to_string(), single.clone());
                map.insert(rule.into(), message.into());
                self.error = Some(ErrorMessage::PerRule(map));
            }
            None => {
                let mut map = HashMap::new();
                map.insert(rule.into(), message.into());
                self.error = Some(ErrorMessage::PerRule(map));
            }
        }
        self
    }

    /// Display label for messages and logs, defaulting to the field name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Request method a form reads its parameters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    #[default]
    Post,
}

/// Declarative form definition, loadable from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub id: String,
    #[serde(default)]
    pub method: Method,
    /// Form-wide default error message.
    #[serde(default)]
    pub error: Option<String>,
    pub fields: Vec<Field>,
}

impl FormSchema {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let schema: FormSchema = serde_yaml::from_str(&content)?;
        Ok(schema)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A small contact-form schema, used by the CLI generator.
    pub fn sample() -> Self {
        FormSchema {
            id: "contact".to_string(),
            method: Method::Post,
            error: None,
            fields: vec![
                Field::new("name").label("Name").required(),
                Field::new("email")
                    .label("Email")
                    .required()
                    .rule(Rule::Type {
                        kind: TypeRule::Email,
                    })
                    .rule_error("type", "Please enter a valid email address"),
                Field::new("message").label("Message").required(),
                Field::new("submit").exclude(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_falsiness() {
        assert!(FieldValue::Empty.is_empty());
        assert!(FieldValue::Text(String::new()).is_empty());
        assert!(FieldValue::Items(vec![]).is_empty());
        assert!(!FieldValue::Text("x".to_string()).is_empty());
        assert!(!FieldValue::Items(vec!["a".to_string()]).is_empty());
    }

    #[test]
    fn test_field_value_to_text_joins_items() {
        let value = FieldValue::Items(vec!["red".to_string(), "blue".to_string()]);
        assert_eq!(value.to_text(), "red, blue");
    }

    #[test]
    fn test_schema_yaml_round_trip() {
        let schema = FormSchema::sample();
        let yaml = serde_yaml::to_string(&schema).unwrap();
        let parsed: FormSchema = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.id, "contact");
        assert_eq!(parsed.method, Method::Post);
        assert_eq!(parsed.fields.len(), 4);
        assert_eq!(
            parsed.fields[1].validate,
            vec![Rule::Type {
                kind: TypeRule::Email
            }]
        );
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let yaml = r#"
id: contact
fields:
  - name: email
    validate:
      - rule: Shouty
"#;
        assert!(serde_yaml::from_str::<FormSchema>(yaml).is_err());
    }

    #[test]
    fn test_error_message_fallbacks() {
        let single = ErrorMessage::Single("Invalid".to_string());
        assert_eq!(single.message_for("maxlength"), Some("Invalid"));

        let mut map = HashMap::new();
        map.insert("required".to_string(), "Required".to_string());
        map.insert("type".to_string(), "Bad type".to_string());
        let per_rule = ErrorMessage::PerRule(map);

        assert_eq!(per_rule.message_for("type"), Some("Bad type"));
        assert_eq!(per_rule.message_for("maxlength"), Some("Required"));
    }
}
