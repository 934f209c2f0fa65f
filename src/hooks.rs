use crate::config::{ErrorMap, Field, FieldValue, SubmissionData};
use crate::log::SubmissionRecord;
use std::collections::HashMap;

type DataFilter = Box<dyn Fn(SubmissionData, &str) -> SubmissionData + Send + Sync>;
type ErrorFilter = Box<dyn Fn(ErrorMap, &SubmissionData, &str) -> ErrorMap + Send + Sync>;
type FieldsFilter = Box<dyn Fn(Vec<Field>, &str) -> Vec<Field> + Send + Sync>;
type TextFilter = Box<dyn Fn(String, &str) -> String + Send + Sync>;
type ValueFilter = Box<dyn Fn(FieldValue, &str) -> FieldValue + Send + Sync>;
type RecordFilter = Box<dyn Fn(SubmissionRecord, &str) -> SubmissionRecord + Send + Sync>;

/// Ordered, multi-subscriber mutation points fired at fixed pipeline stages.
///
/// Every subscriber receives the current value plus the form id and returns a
/// possibly-modified value of the same shape. Subscribers run in registration
/// order. None of them can abort the pipeline directly, but a subscriber on
/// the error stage may reject a submission by making the error map non-empty.
#[derive(Default)]
pub struct Hooks {
    pre_validate: Vec<DataFilter>,
    post_validate: Vec<DataFilter>,
    data: Vec<DataFilter>,
    errors: Vec<ErrorFilter>,
    fields: Vec<FieldsFilter>,
    message: Vec<TextFilter>,
    log_record: Vec<RecordFilter>,
    mail_to: Vec<TextFilter>,
    mail_from: Vec<TextFilter>,
    mail_subject: Vec<TextFilter>,
    values: HashMap<String, Vec<ValueFilter>>,
    error_messages: HashMap<String, Vec<TextFilter>>,
}

impl Hooks {
    pub fn new() -> Self {
        Hooks::default()
    }

    /// Collected data, before rule evaluation.
    pub fn on_pre_validate<F>(&mut self, f: F)
    where
        F: Fn(SubmissionData, &str) -> SubmissionData + Send + Sync + 'static,
    {
        self.pre_validate.push(Box::new(f));
    }

    /// Validated data, before the send decision.
    pub fn on_post_validate<F>(&mut self, f: F)
    where
        F: Fn(SubmissionData, &str) -> SubmissionData + Send + Sync + 'static,
    {
        self.post_validate.push(Box::new(f));
    }

    /// Final data map of a clean submission, before message assembly.
    pub fn on_data<F>(&mut self, f: F)
    where
        F: Fn(SubmissionData, &str) -> SubmissionData + Send + Sync + 'static,
    {
        self.data.push(Box::new(f));
    }

    /// Final error map.
    pub fn on_errors<F>(&mut self, f: F)
    where
        F: Fn(ErrorMap, &SubmissionData, &str) -> ErrorMap + Send + Sync + 'static,
    {
        self.errors.push(Box::new(f));
    }

    /// Assembled field map of a clean submission.
    pub fn on_fields<F>(&mut self, f: F)
    where
        F: Fn(Vec<Field>, &str) -> Vec<Field> + Send + Sync + 'static,
    {
        self.fields.push(Box::new(f));
    }

    /// Assembled message content.
    pub fn on_message<F>(&mut self, f: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.message.push(Box::new(f));
    }

    /// Log record, before it is appended to the store.
    pub fn on_log_record<F>(&mut self, f: F)
    where
        F: Fn(SubmissionRecord, &str) -> SubmissionRecord + Send + Sync + 'static,
    {
        self.log_record.push(Box::new(f));
    }

    pub fn on_mail_to<F>(&mut self, f: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.mail_to.push(Box::new(f));
    }

    pub fn on_mail_from<F>(&mut self, f: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.mail_from.push(Box::new(f));
    }

    pub fn on_mail_subject<F>(&mut self, f: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.mail_subject.push(Box::new(f));
    }

    /// Value returned by the per-field value accessor.
    pub fn on_value<F>(&mut self, field: impl Into<String>, f: F)
    where
        F: Fn(FieldValue, &str) -> FieldValue + Send + Sync + 'static,
    {
        self.values.entry(field.into()).or_default().push(Box::new(f));
    }

    /// Message returned by the per-field error accessor.
    pub fn on_error_message<F>(&mut self, field: impl Into<String>, f: F)
    where
        F: Fn(String, &str) -> String + Send + Sync + 'static,
    {
        self.error_messages
            .entry(field.into())
            .or_default()
            .push(Box::new(f));
    }

    pub fn apply_pre_validate(&self, data: SubmissionData, id: &str) -> SubmissionData {
        self.pre_validate.iter().fold(data, |d, f| f(d, id))
    }

    pub fn apply_post_validate(&self, data: SubmissionData, id: &str) -> SubmissionData {
        self.post_validate.iter().fold(data, |d, f| f(d, id))
    }

    pub fn apply_data(&self, data: SubmissionData, id: &str) -> SubmissionData {
        self.data.iter().fold(data, |d, f| f(d, id))
    }

    pub fn apply_errors(&self, errors: ErrorMap, data: &SubmissionData, id: &str) -> ErrorMap {
        self.errors.iter().fold(errors, |e, f| f(e, data, id))
    }

    pub fn apply_fields(&self, fields: Vec<Field>, id: &str) -> Vec<Field> {
        self.fields.iter().fold(fields, |fs, f| f(fs, id))
    }

    pub fn apply_message(&self, message: String, id: &str) -> String {
        self.message.iter().fold(message, |m, f| f(m, id))
    }

    pub fn apply_log_record(&self, record: SubmissionRecord, id: &str) -> SubmissionRecord {
        self.log_record.iter().fold(record, |r, f| f(r, id))
    }

    pub fn apply_mail_to(&self, to: String, id: &str) -> String {
        self.mail_to.iter().fold(to, |t, f| f(t, id))
    }

    pub fn apply_mail_from(&self, from: String, id: &str) -> String {
        self.mail_from.iter().fold(from, |v, f| f(v, id))
    }

    pub fn apply_mail_subject(&self, subject: String, id: &str) -> String {
        self.mail_subject.iter().fold(subject, |s, f| f(s, id))
    }

    pub fn apply_value(&self, field: &str, value: FieldValue, id: &str) -> FieldValue {
        match self.values.get(field) {
            Some(filters) => filters.iter().fold(value, |v, f| f(v, id)),
            None => value,
        }
    }

    pub fn apply_error_message(&self, field: &str, message: String, id: &str) -> String {
        match self.error_messages.get(field) {
            Some(filters) => filters.iter().fold(message, |m, f| f(m, id)),
            None => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let mut hooks = Hooks::new();
        hooks.on_message(|m, _| format!("{m}!"));
        hooks.on_message(|m, _| format!("{m}?"));

        assert_eq!(hooks.apply_message("hello".to_string(), "contact"), "hello!?");
    }

    #[test]
    fn test_error_hook_can_reject_submission() {
        let mut hooks = Hooks::new();
        hooks.on_errors(|mut errors, data, _| {
            if data.get("honeypot").map(|v| !v.is_empty()).unwrap_or(false) {
                errors.insert("honeypot".to_string(), "Rejected".to_string());
            }
            errors
        });

        let mut data = SubmissionData::new();
        data.insert("honeypot".to_string(), FieldValue::Text("bot".to_string()));

        let errors = hooks.apply_errors(ErrorMap::new(), &data, "contact");
        assert_eq!(errors.get("honeypot").map(String::as_str), Some("Rejected"));
    }

    #[test]
    fn test_per_field_value_hook() {
        let mut hooks = Hooks::new();
        hooks.on_value("name", |value, _| match value {
            FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
            other => other,
        });

        let value = hooks.apply_value("name", FieldValue::Text("  Ada  ".to_string()), "contact");
        assert_eq!(value, FieldValue::Text("Ada".to_string()));

        let untouched = hooks.apply_value("other", FieldValue::Text("  x ".to_string()), "contact");
        assert_eq!(untouched, FieldValue::Text("  x ".to_string()));
    }
}
