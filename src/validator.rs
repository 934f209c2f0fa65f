use crate::config::{Field, FieldValue, Rule, SubmissionData, TypeRule};
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use url::Url;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static TEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9,\.]+$").unwrap());

/// Future returned by a caller-registered rule predicate.
pub type PredicateFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// A caller-registered predicate for `function` rules. Receives the field
/// value and the full submitted-data map.
pub type Predicate = Arc<dyn Fn(FieldValue, SubmissionData) -> PredicateFuture + Send + Sync>;

/// Compile the `pattern` rules of a field set into a reusable regex cache.
///
/// A pattern that does not compile is a configuration error: it is reported
/// loudly and left out of the cache, which makes its rule fail rather than
/// silently pass.
pub fn compile_patterns(fields: &[Field]) -> HashMap<String, Regex> {
    let mut compiled = HashMap::new();

    for field in fields {
        for rule in &field.validate {
            if let Rule::Pattern { pattern } = rule {
                if compiled.contains_key(pattern) {
                    continue;
                }

                match Regex::new(pattern) {
                    Ok(regex) => {
                        compiled.insert(pattern.clone(), regex);
                    }
                    Err(e) => {
                        log::error!(
                            "Invalid pattern for field '{}': {pattern}: {e}",
                            field.name
                        );
                    }
                }
            }
        }
    }

    compiled
}

/// Evaluates one value against a named set of declarative constraints.
///
/// Rules run in declaration order and every failing rule appends its name to
/// the result, so a value can fail several rules at once; the caller picks
/// the last entry as the representative error key.
pub struct Validator<'a> {
    patterns: &'a HashMap<String, Regex>,
    functions: &'a HashMap<String, Predicate>,
    check_dns: bool,
    dns_timeout_seconds: u64,
}

impl<'a> Validator<'a> {
    pub fn new(
        patterns: &'a HashMap<String, Regex>,
        functions: &'a HashMap<String, Predicate>,
    ) -> Self {
        Validator {
            patterns,
            functions,
            check_dns: true,
            dns_timeout_seconds: 5,
        }
    }

    pub fn check_dns(mut self, check_dns: bool) -> Self {
        self.check_dns = check_dns;
        self
    }

    pub async fn evaluate(
        &self,
        value: &FieldValue,
        rules: &[Rule],
        data: &SubmissionData,
    ) -> Vec<&'static str> {
        let mut failed = Vec::new();
        let text = value.to_text();

        for rule in rules {
            let passed = match rule {
                Rule::Type { kind } => self.check_type(&text, *kind).await,
                Rule::MaxLength { limit } => text.chars().count() <= *limit,
                Rule::MinLength { limit } => text.chars().count() >= *limit,
                Rule::Max { limit } => matches!(text.parse::<f64>(), Ok(n) if n <= *limit),
                Rule::Min { limit } => matches!(text.parse::<f64>(), Ok(n) if n >= *limit),
                Rule::Pattern { pattern } => self.check_pattern(&text, pattern),
                Rule::Match { field } => match data.get(field) {
                    Some(other) => loose_eq(value, other),
                    None => false,
                },
                Rule::Function { name } => self.check_function(name, value, data).await,
            };

            if !passed {
                failed.push(rule.name());
            }
        }

        failed
    }

    async fn check_type(&self, text: &str, kind: TypeRule) -> bool {
        match kind {
            TypeRule::Email => self.check_email(text).await,
            TypeRule::Number => text.parse::<f64>().is_ok(),
            TypeRule::Tel => TEL_PATTERN.is_match(text),
            TypeRule::Url => matches!(Url::parse(text), Ok(url) if url.has_host()),
        }
    }

    /// Syntax check plus a domain-resolvability check: the address domain
    /// must have a mail-exchange record or, failing that, an address record.
    /// A DNS lookup failure counts as invalid.
    async fn check_email(&self, text: &str) -> bool {
        if !EMAIL_PATTERN.is_match(text) {
            return false;
        }

        if !self.check_dns {
            return true;
        }

        let domain = match text.rsplit('@').next() {
            Some(domain) => domain,
            None => return false,
        };

        self.resolve_mail_domain(domain).await
    }

    async fn resolve_mail_domain(&self, domain: &str) -> bool {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                log::warn!("Failed to create DNS resolver for {domain}: {e}");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.dns_timeout_seconds);

        match tokio::time::timeout(timeout, resolver.mx_lookup(domain)).await {
            Ok(Ok(mx_response)) => {
                if mx_response.iter().next().is_some() {
                    log::debug!("MX lookup successful for {domain}");
                    return true;
                }
                log::debug!("No MX records for {domain}, falling back to address lookup");
            }
            Ok(Err(e)) => {
                log::debug!("MX lookup failed for {domain}: {e}, falling back to address lookup");
            }
            Err(_) => {
                log::debug!("MX lookup timed out for {domain}");
                return false;
            }
        }

        match tokio::time::timeout(timeout, resolver.lookup_ip(domain)).await {
            Ok(Ok(response)) => response.iter().next().is_some(),
            Ok(Err(e)) => {
                log::debug!("Address lookup failed for {domain}: {e}");
                false
            }
            Err(_) => {
                log::debug!("Address lookup timed out for {domain}");
                false
            }
        }
    }

    fn check_pattern(&self, text: &str, pattern: &str) -> bool {
        match self.patterns.get(pattern) {
            Some(regex) => regex.is_match(text),
            None => {
                log::error!("Pattern not compiled: {pattern}");
                false
            }
        }
    }

    async fn check_function(
        &self,
        name: &str,
        value: &FieldValue,
        data: &SubmissionData,
    ) -> bool {
        match self.functions.get(name) {
            Some(predicate) => predicate(value.clone(), data.clone()).await,
            None => {
                log::error!("Validation function not registered: {name}");
                false
            }
        }
    }
}

/// Loose equality for the `match` rule: values are equal if they compare
/// equal structurally, or if both flatten to numeric strings with the same
/// numeric value.
fn loose_eq(a: &FieldValue, b: &FieldValue) -> bool {
    if a == b {
        return true;
    }

    match (a.to_text().parse::<f64>(), b.to_text().parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_functions() -> HashMap<String, Predicate> {
        HashMap::new()
    }

    fn data(pairs: &[(&str, &str)]) -> SubmissionData {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), FieldValue::from(*value)))
            .collect()
    }

    #[tokio::test]
    async fn test_email_syntax() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);
        let rules = vec![Rule::Type {
            kind: TypeRule::Email,
        }];

        let failed = validator
            .evaluate(&FieldValue::from("user@example.com"), &rules, &data(&[]))
            .await;
        assert!(failed.is_empty());

        let failed = validator
            .evaluate(&FieldValue::from("not-an-address"), &rules, &data(&[]))
            .await;
        assert_eq!(failed, vec!["type"]);

        let failed = validator
            .evaluate(&FieldValue::from("two@@example.com"), &rules, &data(&[]))
            .await;
        assert_eq!(failed, vec!["type"]);
    }

    #[tokio::test]
    async fn test_number_tel_url_types() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);

        let number = vec![Rule::Type {
            kind: TypeRule::Number,
        }];
        assert!(validator
            .evaluate(&FieldValue::from("12.5"), &number, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("12x"), &number, &data(&[]))
                .await,
            vec!["type"]
        );

        let tel = vec![Rule::Type {
            kind: TypeRule::Tel,
        }];
        assert!(validator
            .evaluate(&FieldValue::from("01632.960,123"), &tel, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("+44 1632"), &tel, &data(&[]))
                .await,
            vec!["type"]
        );

        let url = vec![Rule::Type {
            kind: TypeRule::Url,
        }];
        assert!(validator
            .evaluate(&FieldValue::from("https://example.com/path"), &url, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("not a url"), &url, &data(&[]))
                .await,
            vec!["type"]
        );
    }

    #[tokio::test]
    async fn test_length_bounds_use_character_count() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);

        // Five characters, more than five bytes.
        let value = FieldValue::from("héllö");
        let rules = vec![Rule::MaxLength { limit: 5 }, Rule::MinLength { limit: 5 }];
        assert!(validator.evaluate(&value, &rules, &data(&[])).await.is_empty());

        let rules = vec![Rule::MaxLength { limit: 4 }];
        assert_eq!(
            validator.evaluate(&value, &rules, &data(&[])).await,
            vec!["maxlength"]
        );
    }

    #[tokio::test]
    async fn test_min_max_fail_on_non_numeric_values() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);

        let rules = vec![Rule::Min { limit: 1.0 }, Rule::Max { limit: 10.0 }];

        assert!(validator
            .evaluate(&FieldValue::from("5"), &rules, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("11"), &rules, &data(&[]))
                .await,
            vec!["max"]
        );
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("five"), &rules, &data(&[]))
                .await,
            vec!["min", "max"]
        );
    }

    #[tokio::test]
    async fn test_pattern_rule() {
        let fields = vec![Field::new("code").rule(Rule::Pattern {
            pattern: r"^[A-Z]{3}-\d+$".to_string(),
        })];
        let patterns = compile_patterns(&fields);
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);

        let rules = fields[0].validate.clone();
        assert!(validator
            .evaluate(&FieldValue::from("ABC-42"), &rules, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("abc-42"), &rules, &data(&[]))
                .await,
            vec!["pattern"]
        );
    }

    #[test]
    fn test_invalid_pattern_left_out_of_cache() {
        let fields = vec![Field::new("broken").rule(Rule::Pattern {
            pattern: "[unclosed".to_string(),
        })];
        assert!(compile_patterns(&fields).is_empty());
    }

    #[tokio::test]
    async fn test_match_rule_uses_loose_equality() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);
        let rules = vec![Rule::Match {
            field: "password".to_string(),
        }];

        let submission = data(&[("password", "hunter2")]);
        assert!(validator
            .evaluate(&FieldValue::from("hunter2"), &rules, &submission)
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("hunter3"), &rules, &submission)
                .await,
            vec!["match"]
        );

        // Numeric strings compare by value.
        let submission = data(&[("quantity", "1")]);
        let rules = vec![Rule::Match {
            field: "quantity".to_string(),
        }];
        assert!(validator
            .evaluate(&FieldValue::from("1.0"), &rules, &submission)
            .await
            .is_empty());

        // Missing comparison field fails.
        let rules = vec![Rule::Match {
            field: "missing".to_string(),
        }];
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("x"), &rules, &data(&[]))
                .await,
            vec!["match"]
        );
    }

    #[tokio::test]
    async fn test_function_rule() {
        let patterns = HashMap::new();
        let mut functions: HashMap<String, Predicate> = HashMap::new();
        functions.insert(
            "is_even".to_string(),
            Arc::new(|value, _| {
                Box::pin(async move {
                    value
                        .to_text()
                        .parse::<i64>()
                        .map(|n| n % 2 == 0)
                        .unwrap_or(false)
                })
            }),
        );

        let validator = Validator::new(&patterns, &functions).check_dns(false);
        let rules = vec![Rule::Function {
            name: "is_even".to_string(),
        }];

        assert!(validator
            .evaluate(&FieldValue::from("4"), &rules, &data(&[]))
            .await
            .is_empty());
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("3"), &rules, &data(&[]))
                .await,
            vec!["function"]
        );

        // An unregistered predicate is a configuration error and fails.
        let rules = vec![Rule::Function {
            name: "no_such_function".to_string(),
        }];
        assert_eq!(
            validator
                .evaluate(&FieldValue::from("4"), &rules, &data(&[]))
                .await,
            vec!["function"]
        );
    }

    #[tokio::test]
    async fn test_failures_keep_declaration_order() {
        let patterns = HashMap::new();
        let functions = no_functions();
        let validator = Validator::new(&patterns, &functions).check_dns(false);

        // Fails both rules; the caller relies on the last entry winning.
        let rules = vec![
            Rule::MinLength { limit: 10 },
            Rule::Type {
                kind: TypeRule::Number,
            },
        ];
        let failed = validator
            .evaluate(&FieldValue::from("abc"), &rules, &data(&[]))
            .await;
        assert_eq!(failed, vec!["minlength", "type"]);
    }
}
