/// Site metadata supplied by the host environment. Forms derive their default
/// mail settings from this, and the spam screener reports it alongside
/// submission content.
#[derive(Debug, Clone)]
pub struct SiteContext {
    /// Site display name, used in the default mail subject.
    pub name: String,
    /// Site domain, used for the default sender address.
    pub domain: String,
    /// Default notification recipient.
    pub admin_email: String,
    /// Site home URL, reported to the spam screener.
    pub home_url: String,
    pub language: Option<String>,
    pub charset: Option<String>,
    /// Identifier of the site within a multi-site install, 0 for standalone.
    pub blog_id: i64,
    /// Identifier of the page hosting the form, 0 if none.
    pub post_id: i64,
    /// Acting user id, 0 if anonymous.
    pub user_id: i64,
    /// Permalink of the page hosting the form, when viewing a single item.
    pub permalink: Option<String>,
}

impl Default for SiteContext {
    fn default() -> Self {
        SiteContext {
            name: "Website".to_string(),
            domain: "example.com".to_string(),
            admin_email: "admin@example.com".to_string(),
            home_url: "https://example.com".to_string(),
            language: None,
            charset: None,
            blog_id: 0,
            post_id: 0,
            user_id: 0,
            permalink: None,
        }
    }
}

impl SiteContext {
    /// Sender domain with any leading `www.` stripped.
    pub fn mail_domain(&self) -> &str {
        self.domain.strip_prefix("www.").unwrap_or(&self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_domain_strips_www() {
        let site = SiteContext {
            domain: "www.example.org".to_string(),
            ..Default::default()
        };
        assert_eq!(site.mail_domain(), "example.org");

        let site = SiteContext::default();
        assert_eq!(site.mail_domain(), "example.com");
    }
}
