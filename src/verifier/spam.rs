use super::{Screening, SpamScreen};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("postbox/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECONDS: u64 = 10;
const KEY_VERIFY_URL: &str = "https://rest.akismet.com/1.1/verify-key";

/// Submission metadata sent to the reputation service. Empty entries are
/// omitted from the request.
#[derive(Debug, Clone, Default)]
pub struct CommentCheck {
    pub comment_type: Option<String>,
    pub comment_author: Option<String>,
    pub comment_author_email: Option<String>,
    pub comment_author_url: Option<String>,
    pub comment_content: Option<String>,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
    pub blog_lang: Option<String>,
    pub blog_charset: Option<String>,
    pub permalink: Option<String>,
}

impl CommentCheck {
    fn params<'a>(&'a self, blog: &'a str) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![("blog", blog)];

        let optional = [
            ("comment_type", &self.comment_type),
            ("comment_author", &self.comment_author),
            ("comment_author_email", &self.comment_author_email),
            ("comment_author_url", &self.comment_author_url),
            ("comment_content", &self.comment_content),
            ("user_ip", &self.user_ip),
            ("user_agent", &self.user_agent),
            ("blog_lang", &self.blog_lang),
            ("blog_charset", &self.blog_charset),
            ("permalink", &self.permalink),
        ];

        for (key, value) in optional {
            if let Some(value) = value {
                if !value.is_empty() {
                    params.push((key, value.as_str()));
                }
            }
        }

        params
    }
}

/// Reputation-screening adapter for the Akismet comment-check API.
///
/// The key comes from explicit configuration or the `AKISMET_API_KEY`
/// environment variable. The adapter fails open throughout: an inactive or
/// unreachable screener never blocks a submission.
pub struct Akismet {
    api_key: Option<String>,
    home_url: String,
    client: Client,
}

impl Akismet {
    pub fn new(api_key: Option<String>, home_url: impl Into<String>) -> Self {
        let api_key = api_key
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("AKISMET_API_KEY").ok().filter(|key| !key.is_empty()));

        if api_key.is_none() {
            log::debug!("Spam screening key not configured");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Akismet {
            api_key,
            home_url: home_url.into(),
            client,
        }
    }

    async fn post(&self, url: &str, params: &[(&str, &str)]) -> Option<String> {
        let response = match self.client.post(url).form(params).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Spam screening request failed: {e}");
                return None;
            }
        };

        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                log::warn!("Spam screening response unreadable: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl SpamScreen for Akismet {
    fn active(&self) -> bool {
        self.api_key.is_some()
    }

    async fn verify_key(&self) -> Option<bool> {
        let key = self.api_key.as_deref()?;

        let body = self
            .post(KEY_VERIFY_URL, &[("key", key), ("blog", &self.home_url)])
            .await?;

        Some(body.trim() == "valid")
    }

    async fn check(&self, comment: &CommentCheck) -> Screening {
        let key = match self.api_key.as_deref() {
            Some(key) => key,
            None => {
                log::debug!("Spam screening skipped: no API key");
                return Screening::Indeterminate;
            }
        };

        let url = format!("https://{key}.rest.akismet.com/1.1/comment-check");
        let params = comment.params(&self.home_url);

        match self.post(&url, &params).await {
            // The provider answers a literal "true" for spam.
            Some(body) if body.trim() == "true" => Screening::Spam,
            Some(_) => Screening::Ham,
            None => Screening::Indeterminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_non_empty_key() {
        assert!(Akismet::new(Some("abc123".to_string()), "https://example.com").active());
    }

    #[test]
    fn test_params_skip_empty_entries() {
        let comment = CommentCheck {
            comment_type: Some("contact-form".to_string()),
            comment_author: Some("Ada".to_string()),
            comment_author_email: Some(String::new()),
            comment_content: Some("hello".to_string()),
            ..Default::default()
        };

        let params = comment.params("https://example.com");

        assert!(params.contains(&("blog", "https://example.com")));
        assert!(params.contains(&("comment_author", "Ada")));
        assert!(params.contains(&("comment_content", "hello")));
        assert!(!params.iter().any(|(key, _)| *key == "comment_author_email"));
        assert!(!params.iter().any(|(key, _)| *key == "user_ip"));
    }
}
