use async_trait::async_trait;

/// Mail settings attached to a form: recipients, sender, subject, and any
/// additional headers. Defaults are derived from the site context at form
/// construction time.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl MailSettings {
    /// Set or replace a header, preserving the position of an existing key.
    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();

        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
    }

    /// Full header list for an outbound message: the custom headers plus
    /// From, Cc, and Bcc.
    pub fn full_headers(&self, from: &str) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        upsert(&mut headers, "From", from);

        if let Some(cc) = &self.cc {
            upsert(&mut headers, "Cc", cc);
        }

        if let Some(bcc) = &self.bcc {
            upsert(&mut headers, "Bcc", bcc);
        }

        headers
    }
}

fn upsert(headers: &mut Vec<(String, String)>, key: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => headers.push((key.to_string(), value.to_string())),
    }
}

/// One assembled outbound message.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// Delivery capability. The host environment supplies the real transport;
/// the default implementation dumps messages to the log for debugging.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempt delivery. Returns whether the transport accepted the message.
    async fn send(&self, message: &MailMessage) -> bool;
}

/// Debug transport: logs the message instead of sending it and reports
/// success. Useful when no real transport is available or wanted.
#[derive(Debug, Default)]
pub struct DumpTransport;

#[async_trait]
impl MailTransport for DumpTransport {
    async fn send(&self, message: &MailMessage) -> bool {
        let headers = crate::message::flatten_headers(&message.headers);
        log::info!(
            "Mail dump\nTo: {}\nSubject: {}\nHeaders: {}\nContent:\n\n{}",
            message.to,
            message.subject,
            headers,
            message.body
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_headers_include_from_cc_bcc() {
        let mut settings = MailSettings {
            to: "admin@example.com".to_string(),
            from: "no-reply@example.com".to_string(),
            subject: "Enquiry".to_string(),
            cc: Some("copy@example.com".to_string()),
            bcc: None,
            headers: vec![("Reply-To".to_string(), "user@example.com".to_string())],
        };
        settings.header("Reply-To", "other@example.com");

        let headers = settings.full_headers(&settings.from);

        assert_eq!(
            headers,
            vec![
                ("Reply-To".to_string(), "other@example.com".to_string()),
                ("From".to_string(), "no-reply@example.com".to_string()),
                ("Cc".to_string(), "copy@example.com".to_string()),
            ]
        );
    }
}
