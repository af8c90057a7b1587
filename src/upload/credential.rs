use std::fmt;

/// API key for the annotation platform.
///
/// `Debug` and `Display` never print the key; use [`ApiKey::expose`] when
/// building the request header.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, rejecting empty or whitespace-only input.
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err("API key is empty".to_string());
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Key {}", self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
