use crate::config::{ErrorMap, Field, FieldValue, FormSchema, Method, Rule, SubmissionData};
use crate::hooks::Hooks;
use crate::log::{SubmissionLog, SubmissionRecord};
use crate::mailer::{DumpTransport, MailMessage, MailSettings, MailTransport};
use crate::message;
use crate::request::Request;
use crate::reserved;
use crate::site::SiteContext;
use crate::validator::{compile_patterns, Predicate, Validator};
use crate::verifier::{
    Akismet, Captcha, CaptchaRegistry, CommentCheck, Provider, Screening, SpamScreen,
    TokenVerifier,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Request parameter naming the form a submission belongs to. A request is
/// only treated as a submission of this form when this parameter equals the
/// form's id.
pub const FORM_MARKER: &str = "postbox_form_id";

/// Registry name for the inline challenge-verification predicate.
const CHALLENGE_PREDICATE: &str = "postbox_challenge";

/// Error-map key for a spam-screening rejection.
const SPAM_ERROR_KEY: &str = "spam";

const DEFAULT_ERROR_MESSAGE: &str = "Invalid input";
const DEFAULT_SPAM_MESSAGE: &str =
    "Your message appears to be spam. Please check it and try again.";

/// Screener parameters that may be mapped to form fields.
const SCREENER_PARAMS: &[&str] = &[
    "comment_author",
    "comment_author_email",
    "comment_author_url",
    "comment_content",
];

/// Contact-form submission orchestrator.
///
/// Calling code registers fields and verifiers once per form setup, then
/// hands each inbound request to `submit()`. A request is ignored unless it
/// carries the marker parameter with this form's id; a matching request is
/// collected, validated, optionally screened, and on success assembled into
/// a message, delivered, and logged.
pub struct Form {
    id: String,
    method: Method,
    error_message: String,
    error_template: Option<String>,
    mail: MailSettings,
    site: SiteContext,
    logs_enabled: bool,
    check_dns: bool,
    fields: Vec<Field>,
    data: SubmissionData,
    errors: ErrorMap,
    sent: bool,
    attempted: bool,
    hooks: Hooks,
    functions: HashMap<String, Predicate>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    registry: Option<Arc<CaptchaRegistry>>,
    screener: Option<Arc<dyn SpamScreen>>,
    spam_type: Option<String>,
    spam_fields: Vec<(String, Vec<String>)>,
    spam_error_message: String,
    transport: Arc<dyn MailTransport>,
    store: Option<Arc<dyn SubmissionLog>>,
}

impl Form {
    pub fn new(id: impl Into<String>, site: SiteContext) -> Self {
        let mail = MailSettings {
            to: site.admin_email.clone(),
            from: format!("no-reply@{}", site.mail_domain()),
            subject: format!("[{}] Website Enquiry", site.name),
            cc: None,
            bcc: None,
            headers: Vec::new(),
        };

        Form {
            id: id.into(),
            method: Method::Post,
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
            error_template: None,
            mail,
            site,
            logs_enabled: true,
            check_dns: true,
            fields: Vec::new(),
            data: SubmissionData::new(),
            errors: ErrorMap::new(),
            sent: false,
            attempted: false,
            hooks: Hooks::new(),
            functions: HashMap::new(),
            verifier: None,
            registry: None,
            screener: None,
            spam_type: None,
            spam_fields: Vec::new(),
            spam_error_message: DEFAULT_SPAM_MESSAGE.to_string(),
            transport: Arc::new(DumpTransport),
            store: None,
        }
    }

    /// Build a form from a declarative schema.
    pub fn from_schema(schema: FormSchema, site: SiteContext) -> Self {
        let mut form = Form::new(schema.id, site);
        form.method = schema.method;

        if let Some(message) = schema.error {
            form.error_message = message;
        }

        for field in schema.fields {
            form.field(field);
        }

        form
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a field, replacing any existing definition with the same
    /// name. Reserved names clash with the host's own parameter namespace and
    /// are refused with a warning; the registration is skipped, not fatal.
    pub fn field(&mut self, field: Field) {
        if reserved::is_reserved(&field.name) {
            log::warn!("Cannot use reserved field name \"{}\"", field.name);
            return;
        }

        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.field(field);
        }
    }

    pub fn method(&mut self, method: Method) {
        self.method = method;
    }

    /// Form-wide default error message.
    pub fn error_message(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    /// Template applied to error messages by the `error` accessor; a `%s`
    /// placeholder is replaced with the message.
    pub fn error_template(&mut self, template: impl Into<String>) {
        self.error_template = Some(template.into());
    }

    pub fn mail_to(&mut self, to: impl Into<String>) {
        self.mail.to = to.into();
    }

    pub fn mail_from(&mut self, from: impl Into<String>) {
        self.mail.from = from.into();
    }

    pub fn mail_subject(&mut self, subject: impl Into<String>) {
        self.mail.subject = subject.into();
    }

    pub fn mail_cc(&mut self, cc: impl Into<String>) {
        self.mail.cc = Some(cc.into());
    }

    pub fn mail_bcc(&mut self, bcc: impl Into<String>) {
        self.mail.bcc = Some(bcc.into());
    }

    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.mail.header(key, value);
    }

    pub fn enable_logs(&mut self) {
        self.logs_enabled = true;
    }

    pub fn disable_logs(&mut self) {
        self.logs_enabled = false;
    }

    /// Toggle the email rule's domain-resolvability check.
    pub fn dns_checks(&mut self, check_dns: bool) {
        self.check_dns = check_dns;
    }

    /// Register a named predicate for `function` rules.
    pub fn function(&mut self, name: impl Into<String>, predicate: Predicate) {
        self.functions.insert(name.into(), predicate);
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Inject the delivery capability. Defaults to the dump transport.
    pub fn transport(&mut self, transport: Arc<dyn MailTransport>) {
        self.transport = transport;
    }

    /// Inject the submission store. Without one, nothing is persisted.
    pub fn store(&mut self, store: Arc<dyn SubmissionLog>) {
        self.store = Some(store);
    }

    /// Inject a spam-screening capability, replacing the default.
    pub fn screener(&mut self, screener: Arc<dyn SpamScreen>) {
        self.screener = Some(screener);
    }

    /// Inject a challenge-response capability directly, in place of the
    /// provider-specific enablers below.
    pub fn token_verifier(&mut self, verifier: Arc<dyn TokenVerifier>) {
        if self.verifier.is_some() {
            log::error!("Challenge verification already enabled");
            return;
        }

        self.verifier = Some(verifier);
    }

    /// Attach the shared per-render registry used by the background-scripted
    /// challenge provider.
    pub fn captcha_registry(&mut self, registry: Arc<CaptchaRegistry>) {
        self.registry = Some(registry);
    }

    pub fn enable_recaptcha_v2(&mut self, site_key: Option<String>, secret_key: Option<String>) {
        self.enable_captcha(Provider::RecaptchaV2, site_key, secret_key);
    }

    pub fn enable_recaptcha_v3(&mut self, site_key: Option<String>, secret_key: Option<String>) {
        self.enable_captcha(Provider::RecaptchaV3, site_key, secret_key);
    }

    pub fn enable_turnstile(&mut self, site_key: Option<String>, secret_key: Option<String>) {
        self.enable_captcha(Provider::Turnstile, site_key, secret_key);
    }

    #[deprecated(note = "use enable_recaptcha_v2")]
    pub fn enable_recaptcha(&mut self, site_key: Option<String>, secret_key: Option<String>) {
        self.enable_recaptcha_v2(site_key, secret_key);
    }

    fn enable_captcha(
        &mut self,
        provider: Provider,
        site_key: Option<String>,
        secret_key: Option<String>,
    ) {
        if self.verifier.is_some() {
            log::error!("Challenge verification already enabled");
            return;
        }

        let captcha = Captcha::new(provider, site_key, secret_key);

        if provider == Provider::RecaptchaV3 {
            if let (Some(registry), Some(site_key)) = (&self.registry, captcha.site_key()) {
                registry.register(site_key, &self.id);
            }
        }

        self.verifier = Some(Arc::new(captcha));
    }

    pub fn has_captcha(&self) -> bool {
        self.verifier
            .as_ref()
            .map(|verifier| verifier.active())
            .unwrap_or(false)
    }

    /// Enable spam screening. `comment_type` names the submission category;
    /// `fields` maps screener parameters (`comment_author`,
    /// `comment_author_email`, `comment_author_url`, `comment_content`) to
    /// one or more form fields, whose values are joined with spaces.
    ///
    /// Uses the default reputation screener unless one has been injected.
    pub fn enable_spam_check(&mut self, comment_type: impl Into<String>, fields: &[(&str, &[&str])]) {
        self.spam_type = Some(comment_type.into());
        self.spam_fields = fields
            .iter()
            .map(|(param, names)| {
                if !SCREENER_PARAMS.contains(param) {
                    log::warn!("Unknown screener parameter \"{param}\"");
                }

                (
                    param.to_string(),
                    names.iter().map(|name| name.to_string()).collect(),
                )
            })
            .collect();

        if self.screener.is_none() {
            self.screener = Some(Arc::new(Akismet::new(None, self.site.home_url.clone())));
        }
    }

    pub fn has_spam_check(&self) -> bool {
        self.screener.is_some()
    }

    /// Spam-rejection message shown to the user.
    pub fn spam_error_message(&mut self, message: impl Into<String>) {
        self.spam_error_message = message.into();
    }

    /// Whether the message was delivered.
    pub fn sent(&self) -> bool {
        self.sent
    }

    /// Delivery was attempted and failed. Distinct from a validation
    /// rejection, where no attempt is made.
    pub fn failed(&self) -> bool {
        self.attempted && !self.sent
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_map(&self) -> &ErrorMap {
        &self.errors
    }

    /// Current value of a field: the submitted value if present, otherwise
    /// any caller-set default. Escaped for safe embedding, then passed
    /// through the per-field value hook.
    pub fn value(&self, name: &str) -> FieldValue {
        let value = self
            .data
            .get(name)
            .cloned()
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|field| field.name == name)
                    .map(|field| field.value.clone())
            })
            .unwrap_or_default();

        self.hooks.apply_value(name, escape_value(value), &self.id)
    }

    /// Error message for a field, if any. `"recaptcha"` is accepted as an
    /// alias for the versioned challenge field name.
    pub fn error(&self, name: &str) -> Option<String> {
        self.error_wrapped(name, "", "")
    }

    /// Error message for a field wrapped in a prefix and suffix, with the
    /// error template applied.
    pub fn error_wrapped(&self, name: &str, before: &str, after: &str) -> Option<String> {
        let name = self.resolve_field_alias(name);
        let error = self.errors.get(name)?;

        let mut error = format!("{before}{error}{after}");

        if let Some(template) = &self.error_template {
            if template.contains("%s") {
                error = template.replace("%s", &error);
            }
        }

        Some(self.hooks.apply_error_message(name, error, &self.id))
    }

    /// Compatibility shim: the unversioned challenge alias resolves to the
    /// current verifier's field name.
    fn resolve_field_alias<'a>(&'a self, name: &'a str) -> &'a str {
        if name == "recaptcha" {
            return self
                .verifier
                .as_ref()
                .map(|verifier| verifier.field_name())
                .unwrap_or(Provider::RecaptchaV2.field_name());
        }

        name
    }

    /// Process an inbound request. Returns true only when the request matched
    /// this form, validated cleanly, and the message was delivered.
    pub async fn submit(&mut self, request: &Request) -> bool {
        self.validate_screener_conf().await;
        self.validate_captcha_conf();

        if !self.submitted(request) {
            return false;
        }

        self.install_challenge(request);
        self.update_data(request);

        // Let subscribers transform the collected data before any rule runs.
        self.data = self
            .hooks
            .apply_pre_validate(std::mem::take(&mut self.data), &self.id);

        self.validate_form(request).await;

        self.errors = self
            .hooks
            .apply_errors(std::mem::take(&mut self.errors), &self.data, &self.id);

        self.data = self
            .hooks
            .apply_post_validate(std::mem::take(&mut self.data), &self.id);

        if !self.errors.is_empty() {
            return false;
        }

        self.data = self.hooks.apply_data(std::mem::take(&mut self.data), &self.id);
        self.fields = self
            .hooks
            .apply_fields(std::mem::take(&mut self.fields), &self.id);

        self.send(request).await
    }

    /// The request carries this form's marker parameter.
    fn submitted(&self, request: &Request) -> bool {
        matches!(
            request.param(self.method, FORM_MARKER),
            Some(FieldValue::Text(id)) if *id == self.id
        )
    }

    /// Resolve each registered field from the request bucket, recording the
    /// value in the data map and mirroring it into the field definition.
    fn update_data(&mut self, request: &Request) {
        for field in &mut self.fields {
            let value = request
                .param(self.method, &field.name)
                .cloned()
                .unwrap_or_default();

            self.data.insert(field.name.clone(), value.clone());
            field.value = value;
        }
    }

    /// When an active challenge verifier is attached, wire it in as a
    /// synthetic required field that is excluded from the message body and
    /// validated inline through a `function` rule.
    fn install_challenge(&mut self, request: &Request) {
        let verifier = match &self.verifier {
            Some(verifier) if verifier.active() => verifier.clone(),
            _ => return,
        };

        let field_name = verifier.field_name().to_string();
        let error_message = verifier.error_message().to_string();
        let remote_ip = request.client_ip().map(str::to_string);

        self.functions.insert(
            CHALLENGE_PREDICATE.to_string(),
            Arc::new(move |value, _| {
                let verifier = verifier.clone();
                let remote_ip = remote_ip.clone();
                Box::pin(async move {
                    let token = value.to_text().into_owned();
                    verifier.verify(&token, remote_ip.as_deref()).await == Some(true)
                })
            }),
        );

        let field = Field::new(field_name)
            .required()
            .exclude()
            .rule(Rule::Function {
                name: CHALLENGE_PREDICATE.to_string(),
            })
            .error(error_message);

        self.field(field);
    }

    async fn validate_form(&mut self, request: &Request) {
        let patterns = compile_patterns(&self.fields);
        let validator = Validator::new(&patterns, &self.functions).check_dns(self.check_dns);

        let fields = self.fields.clone();
        for field in &fields {
            let value = self.data.get(&field.name).cloned().unwrap_or_default();

            if field.required && value.is_empty() {
                self.errors
                    .insert(field.name.clone(), self.required_message(field));
                continue;
            }

            if !value.is_empty() && !field.validate.is_empty() {
                let failed = validator.evaluate(&value, &field.validate, &self.data).await;

                // The last failing rule selects the message: callers may
                // register different messages per rule and rely on this.
                if let Some(last) = failed.last() {
                    self.errors
                        .insert(field.name.clone(), self.rule_message(field, last));
                }
            }
        }

        // Screen for spam only when the submission is otherwise valid, to
        // avoid a remote call for submissions that will be rejected anyway.
        if self.errors.is_empty() {
            self.validate_spam(request).await;
        }
    }

    async fn validate_spam(&mut self, request: &Request) {
        let screener = match &self.screener {
            Some(screener) => screener.clone(),
            None => return,
        };

        let comment = self.comment_check(request);

        match screener.check(&comment).await {
            Screening::Spam => {
                self.errors
                    .insert(SPAM_ERROR_KEY.to_string(), self.spam_error_message.clone());
            }
            Screening::Ham => {}
            Screening::Indeterminate => {
                log::debug!("Spam screening indeterminate for form {}, passing", self.id);
            }
        }
    }

    /// Assemble the screener request from the mapped form fields, the site
    /// context, and the request metadata.
    fn comment_check(&self, request: &Request) -> CommentCheck {
        let mut comment = CommentCheck {
            comment_type: self.spam_type.clone(),
            user_ip: request.client_ip().map(str::to_string),
            user_agent: Some(request.user_agent().to_string()),
            blog_lang: self.site.language.clone(),
            blog_charset: self.site.charset.clone(),
            permalink: self.site.permalink.clone(),
            ..Default::default()
        };

        for (param, names) in &self.spam_fields {
            let value = self.flat_value(names);

            match param.as_str() {
                "comment_author" => comment.comment_author = value,
                "comment_author_email" => comment.comment_author_email = value,
                "comment_author_url" => comment.comment_author_url = value,
                "comment_content" => comment.comment_content = value,
                _ => {}
            }
        }

        comment
    }

    /// Concatenate the values of one or more named fields. Unknown fields
    /// are a configuration notice and contribute nothing.
    fn flat_value(&self, names: &[String]) -> Option<String> {
        let mut values = Vec::new();

        for name in names {
            if !self.fields.iter().any(|field| field.name == *name) {
                log::warn!("Unknown form field \"{name}\" in screener mapping");
                continue;
            }

            values.push(
                self.data
                    .get(name)
                    .map(|value| value.to_text().into_owned())
                    .unwrap_or_default(),
            );
        }

        if values.is_empty() {
            return None;
        }

        Some(values.join(" "))
    }

    fn required_message(&self, field: &Field) -> String {
        field
            .error
            .as_ref()
            .and_then(|error| error.message_for("required"))
            .unwrap_or(&self.error_message)
            .to_string()
    }

    fn rule_message(&self, field: &Field, rule: &str) -> String {
        field
            .error
            .as_ref()
            .and_then(|error| error.message_for(rule))
            .unwrap_or(&self.error_message)
            .to_string()
    }

    /// Assemble and deliver the message, persisting a log entry regardless of
    /// the delivery outcome.
    async fn send(&mut self, request: &Request) -> bool {
        let content = self
            .hooks
            .apply_message(message::build_message(&self.fields, &self.data), &self.id);

        let to = self.hooks.apply_mail_to(self.mail.to.clone(), &self.id);
        let from = self.hooks.apply_mail_from(self.mail.from.clone(), &self.id);
        let subject = self
            .hooks
            .apply_mail_subject(self.mail.subject.clone(), &self.id);
        let headers = self.mail.full_headers(&from);

        let mail = MailMessage {
            to,
            subject,
            // The sanitized content is escaped for logs; the outbound body
            // gets the entities decoded back into plain text.
            body: message::unescape(&content),
            headers,
        };

        self.log_submission(request, &mail, &from, &content).await;

        self.attempted = true;
        self.sent = self.transport.send(&mail).await;
        self.sent
    }

    async fn log_submission(
        &self,
        request: &Request,
        mail: &MailMessage,
        from: &str,
        content: &str,
    ) {
        if !self.logs_enabled {
            return;
        }

        let store = match &self.store {
            Some(store) => store,
            None => {
                log::debug!("No submission store attached to form {}", self.id);
                return;
            }
        };

        let field_data = match serde_json::to_string(&self.fields) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize field data for form {}: {e}", self.id);
                "[]".to_string()
            }
        };

        let record = SubmissionRecord {
            date: Utc::now(),
            form_id: self.id.clone(),
            blog_id: self.site.blog_id,
            post_id: self.site.post_id,
            ip: request.client_ip().unwrap_or_default().to_string(),
            user_agent: request.user_agent().to_string(),
            user_id: self.site.user_id,
            mail_to: mail.to.clone(),
            mail_from: from.to_string(),
            mail_subject: mail.subject.clone(),
            mail_body: content.to_string(),
            mail_headers: message::flatten_headers(&mail.headers),
            field_data,
        };

        let record = self.hooks.apply_log_record(record, &self.id);

        if let Err(e) = store.append(&record).await {
            log::error!("Failed to log submission for form {}: {e}", self.id);
        }
    }

    async fn validate_screener_conf(&self) {
        let screener = match &self.screener {
            Some(screener) => screener,
            None => return,
        };

        if !screener.active() {
            log::error!("Spam screening enabled but API key missing.");
            return;
        }

        match screener.verify_key().await {
            Some(true) => {}
            Some(false) => log::error!("Spam screening enabled but API key invalid."),
            None => log::warn!("Spam screening key verification unreachable."),
        }
    }

    fn validate_captcha_conf(&self) {
        if let Some(verifier) = &self.verifier {
            if verifier.misconfigured() {
                log::error!("Challenge verification enabled but a key is missing.");
            }
        }
    }
}

fn escape_value(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Empty => FieldValue::Empty,
        FieldValue::Text(s) => FieldValue::Text(message::escape(&s)),
        FieldValue::Items(items) => {
            FieldValue::Items(items.iter().map(|item| message::escape(item)).collect())
        }
    }
}
