use super::TokenVerifier;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

const USER_AGENT: &str = concat!("postbox/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Challenge-response providers: two widget generations of the same service
/// plus an invisible-token alternative. All three share the same verification
/// wire contract (form-encoded POST, JSON response with a `success` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    RecaptchaV2,
    RecaptchaV3,
    Turnstile,
}

impl Provider {
    /// Request parameter the client widget stores its token in.
    pub fn field_name(&self) -> &'static str {
        match self {
            Provider::RecaptchaV2 | Provider::RecaptchaV3 => "g-recaptcha-response",
            Provider::Turnstile => "cf-turnstile-response",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Provider::RecaptchaV2 | Provider::RecaptchaV3 => {
                "https://www.google.com/recaptcha/api/siteverify"
            }
            Provider::Turnstile => "https://challenges.cloudflare.com/turnstile/v0/siteverify",
        }
    }

    /// Default user-facing failure message. The interactive widget prompts
    /// the user directly; the background variants can only report a failed
    /// validation pass.
    pub fn error_message(&self) -> &'static str {
        match self {
            Provider::RecaptchaV2 => "Please confirm you are not a robot",
            Provider::RecaptchaV3 | Provider::Turnstile => {
                "An issue occurred during the validation process. Please try again."
            }
        }
    }

    fn site_key_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::RecaptchaV2 => &["RECAPTCHA_2_SITE_KEY", "RECAPTCHA_SITE_KEY"],
            Provider::RecaptchaV3 => &["RECAPTCHA_3_SITE_KEY", "RECAPTCHA_SITE_KEY"],
            Provider::Turnstile => &["TURNSTILE_SITE_KEY"],
        }
    }

    fn secret_key_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::RecaptchaV2 => &["RECAPTCHA_2_SECRET_KEY", "RECAPTCHA_SECRET_KEY"],
            Provider::RecaptchaV3 => &["RECAPTCHA_3_SECRET_KEY", "RECAPTCHA_SECRET_KEY"],
            Provider::Turnstile => &["TURNSTILE_SECRET_KEY"],
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Concrete challenge-response adapter. Keys come from explicit configuration
/// or from environment variables; both must be present for the adapter to be
/// active.
pub struct Captcha {
    provider: Provider,
    site_key: Option<String>,
    secret_key: Option<String>,
    client: Client,
}

impl Captcha {
    pub fn new(
        provider: Provider,
        site_key: Option<String>,
        secret_key: Option<String>,
    ) -> Self {
        let site_key = resolve_key(site_key, provider.site_key_vars());
        let secret_key = resolve_key(secret_key, provider.secret_key_vars());

        if site_key.is_none() {
            log::warn!("Missing site key for {provider:?}");
        }

        if secret_key.is_none() {
            log::warn!("Missing secret key for {provider:?}");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Captcha {
            provider,
            site_key,
            secret_key,
            client,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn site_key(&self) -> Option<&str> {
        self.site_key.as_deref()
    }
}

fn resolve_key(explicit: Option<String>, vars: &[&str]) -> Option<String> {
    if let Some(key) = explicit.filter(|key| !key.is_empty()) {
        return Some(key);
    }

    for var in vars {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }

    None
}

#[async_trait]
impl TokenVerifier for Captcha {
    fn active(&self) -> bool {
        self.site_key.is_some() && self.secret_key.is_some()
    }

    fn misconfigured(&self) -> bool {
        self.site_key.is_some() != self.secret_key.is_some()
    }

    fn field_name(&self) -> &str {
        self.provider.field_name()
    }

    fn error_message(&self) -> &str {
        self.provider.error_message()
    }

    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Option<bool> {
        if !self.active() {
            log::warn!("{:?} verification requested but not active", self.provider);
            return None;
        }

        let secret = self.secret_key.as_deref().unwrap_or_default();
        let mut params = vec![("secret", secret), ("response", token)];

        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }

        let response = match self
            .client
            .post(self.provider.endpoint())
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Fail closed: an unreachable verifier must not let
                // unverified traffic through.
                log::warn!("{:?} verification request failed: {e}", self.provider);
                return Some(false);
            }
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("{:?} verification response unreadable: {e}", self.provider);
                return Some(false);
            }
        };

        match serde_json::from_str::<VerifyResponse>(&body) {
            Ok(result) => {
                if !result.success && !result.error_codes.is_empty() {
                    log::debug!(
                        "{:?} verification rejected: {}",
                        self.provider,
                        result.error_codes.join(", ")
                    );
                }
                Some(result.success)
            }
            Err(e) => {
                log::warn!("{:?} verification response malformed: {e}", self.provider);
                Some(false)
            }
        }
    }
}

/// Per-render registry of forms validated in the background by the
/// script-based provider generation. The host embeds the exported list once
/// per page render so the client script knows which forms to token-tag.
///
/// Shared across all form instances created during one render; registration
/// is idempotent on duplicate form ids.
#[derive(Debug, Default)]
pub struct CaptchaRegistry {
    forms: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl CaptchaRegistry {
    pub fn new() -> Self {
        CaptchaRegistry::default()
    }

    pub fn register(&self, site_key: &str, form_id: &str) {
        let mut forms = self.forms.lock().unwrap();
        forms
            .entry(site_key.to_string())
            .or_default()
            .insert(form_id.to_string());
    }

    /// Site key to sorted form id list, for the host to embed client-side.
    pub fn export(&self) -> String {
        let forms = self.forms.lock().unwrap();
        serde_json::to_string(&*forms).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.forms.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_both_keys() {
        let both = Captcha::new(
            Provider::Turnstile,
            Some("site".to_string()),
            Some("secret".to_string()),
        );
        assert!(both.active());
        assert!(!both.misconfigured());

        let neither = Captcha::new(Provider::Turnstile, Some(String::new()), None);
        assert!(!neither.active());
    }

    #[test]
    fn test_single_key_is_misconfigured() {
        let captcha = Captcha::new(Provider::RecaptchaV2, Some("site".to_string()), None);
        assert!(!captcha.active());
        assert!(captcha.misconfigured());
    }

    #[test]
    fn test_provider_field_names() {
        assert_eq!(Provider::RecaptchaV2.field_name(), "g-recaptcha-response");
        assert_eq!(Provider::RecaptchaV3.field_name(), "g-recaptcha-response");
        assert_eq!(Provider::Turnstile.field_name(), "cf-turnstile-response");
    }

    #[test]
    fn test_registry_merge_is_idempotent() {
        let registry = CaptchaRegistry::new();
        registry.register("key-a", "contact");
        registry.register("key-a", "contact");
        registry.register("key-a", "signup");
        registry.register("key-b", "contact");

        assert_eq!(
            registry.export(),
            r#"{"key-a":["contact","signup"],"key-b":["contact"]}"#
        );
    }
}
