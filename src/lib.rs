pub mod config;
pub mod form;
pub mod hooks;
pub mod log;
pub mod mailer;
pub mod message;
pub mod request;
pub mod reserved;
pub mod site;
pub mod validator;
pub mod verifier;

pub use config::{ErrorMap, ErrorMessage, Field, FieldValue, FormSchema, Method, Rule, SubmissionData, TypeRule};
pub use form::{Form, FORM_MARKER};
pub use hooks::Hooks;
pub use log::{MemoryLog, Retention, SqliteLog, SubmissionLog, SubmissionRecord};
pub use mailer::{DumpTransport, MailMessage, MailSettings, MailTransport};
pub use request::Request;
pub use site::SiteContext;
pub use validator::{Predicate, PredicateFuture, Validator};
pub use verifier::{Akismet, Captcha, CaptchaRegistry, CommentCheck, Provider, Screening, SpamScreen, TokenVerifier};
