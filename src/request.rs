use crate::config::{FieldValue, Method};
use std::collections::HashMap;

/// Inbound request data as supplied by the host environment: both parameter
/// buckets, the request headers, and the raw connection address. One form
/// reads only the bucket matching its configured method.
#[derive(Debug, Default, Clone)]
pub struct Request {
    get: HashMap<String, FieldValue>,
    post: HashMap<String, FieldValue>,
    headers: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    pub fn get_param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.get.insert(name.into(), value.into());
        self
    }

    pub fn post_param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.post.insert(name.into(), value.into());
        self
    }

    /// Headers are stored lowercased so lookups are case-insensitive.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// The parameter bucket for the given method.
    pub fn params(&self, method: Method) -> &HashMap<String, FieldValue> {
        match method {
            Method::Get => &self.get,
            Method::Post => &self.post,
        }
    }

    pub fn param(&self, method: Method, name: &str) -> Option<&FieldValue> {
        self.params(method).get(name)
    }

    pub fn user_agent(&self) -> &str {
        self.headers.get("user-agent").map(String::as_str).unwrap_or("")
    }

    /// Resolve the client IP: a client-supplied IP header first, then a
    /// forwarded-for header, then the raw connection address. First non-empty
    /// wins. Spoofable, and therefore informational only.
    pub fn client_ip(&self) -> Option<&str> {
        for key in ["client-ip", "x-forwarded-for"] {
            if let Some(value) = self.headers.get(key) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }

        self.remote_addr.as_deref().filter(|addr| !addr.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_precedence() {
        let request = Request::new()
            .header("X-Forwarded-For", "10.0.0.2")
            .remote_addr("10.0.0.3");
        assert_eq!(request.client_ip(), Some("10.0.0.2"));

        let request = Request::new()
            .header("Client-IP", "10.0.0.1")
            .header("X-Forwarded-For", "10.0.0.2")
            .remote_addr("10.0.0.3");
        assert_eq!(request.client_ip(), Some("10.0.0.1"));

        let request = Request::new().remote_addr("10.0.0.3");
        assert_eq!(request.client_ip(), Some("10.0.0.3"));

        assert_eq!(Request::new().client_ip(), None);
    }

    #[test]
    fn test_method_buckets_are_separate() {
        let request = Request::new()
            .get_param("q", "search")
            .post_param("email", "a@example.com");

        assert!(request.param(Method::Post, "q").is_none());
        assert_eq!(
            request.param(Method::Post, "email"),
            Some(&FieldValue::Text("a@example.com".to_string()))
        );
    }
}
