use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique, monotonically increasing task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An HTTP-shaped request as handed to the engine.
///
/// `target` is the path plus optional query string (`/index.php?name=Ada`),
/// `headers` is a `;`-separated list of `Name: value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    #[serde(alias = "query")]
    pub target: String,
    #[serde(default, alias = "payload")]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: String,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            body: None,
            headers: String::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("POST", target).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Upper-cased method, `GET` when empty.
    pub fn normalized_method(&self) -> String {
        let method = self.method.trim();
        if method.is_empty() {
            "GET".to_string()
        } else {
            method.to_ascii_uppercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_caller_field_names() {
        let request: RequestDescriptor = serde_json::from_str(
            r#"{"method":"post","query":"/form.php","payload":"a=1","headers":"Accept: */*"}"#,
        )
        .unwrap();
        assert_eq!(request.target, "/form.php");
        assert_eq!(request.body.as_deref(), Some("a=1"));
        assert_eq!(request.normalized_method(), "POST");
    }

    #[test]
    fn empty_method_defaults_to_get() {
        assert_eq!(RequestDescriptor::new("", "/").normalized_method(), "GET");
    }
}
