pub mod captcha;
pub mod spam;

pub use captcha::{Captcha, CaptchaRegistry, Provider};
pub use spam::{Akismet, CommentCheck};

use async_trait::async_trait;

/// Outcome of a spam screening. `Indeterminate` covers both an inactive
/// screener and a transport failure; the caller treats it as a pass, because
/// an unavailable reputation service must never block legitimate submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    Ham,
    Spam,
    Indeterminate,
}

/// Challenge-response verification capability (human/bot check).
///
/// This family fails closed: a transport failure during verification counts
/// as "not validated". An inactive verifier returns `None`, which callers
/// must not treat as a pass without checking `active()` first.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Both keys configured and non-empty?
    fn active(&self) -> bool;

    /// Exactly one of the two keys configured? Surfaced loudly at submission
    /// time rather than silently treated as inactive.
    fn misconfigured(&self) -> bool;

    /// Request parameter carrying the client token.
    fn field_name(&self) -> &str;

    /// User-facing message shown when verification fails.
    fn error_message(&self) -> &str;

    /// Verify a client token against the provider. `Some(true)` means the
    /// provider confirmed the token; `Some(false)` means rejected or
    /// unreachable; `None` means the verifier is inactive.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Option<bool>;
}

/// Binary-reputation spam screening capability.
///
/// This family fails open: inactive or unreachable screeners return
/// `Indeterminate`, which the caller treats as "not spam".
#[async_trait]
pub trait SpamScreen: Send + Sync {
    /// API key configured and non-empty?
    fn active(&self) -> bool;

    /// Confirm the configured key is accepted by the provider. `None` when
    /// inactive or unreachable.
    async fn verify_key(&self) -> Option<bool>;

    /// Screen submission content.
    async fn check(&self, comment: &CommentCheck) -> Screening;
}
