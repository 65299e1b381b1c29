use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Per-request view handed to every inspection stage.
///
/// Built once at request entry and dropped after the decision.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub ip_address: IpAddr,
    pub user_agent: String,
    pub method: String,
    pub path: String,
    /// Headers as (name, value) pairs in the order they arrived.
    pub headers: Vec<(String, String)>,
    /// Query string as decoded key/value pairs, in order.
    pub query: Vec<(String, String)>,
    pub raw_query: String,
    pub body: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl SecurityContext {
    pub fn new(ip_address: IpAddr, method: &str, path: &str) -> Self {
        Self {
            ip_address,
            user_agent: String::new(),
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            raw_query: String::new(),
            body: Bytes::new(),
            timestamp: Utc::now(),
        }
    }

    /// Append a header, tracking the User-Agent as it goes by.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if name.eq_ignore_ascii_case("user-agent") {
            self.user_agent = value.to_string();
        }
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_query(mut self, raw_query: &str) -> Self {
        self.raw_query = raw_query.to_string();
        self.query = url::form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// First value of the named header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Value of a cookie from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}
