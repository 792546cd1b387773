use http::HeaderMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The configured key source was absent or blank.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing idempotency key: {0}")]
pub struct MissingKey(pub String);

/// Read-only view of an inbound request used to derive its key.
#[derive(Debug, Clone, Copy)]
pub struct KeySource<'a> {
    pub headers: &'a HeaderMap,
    pub body: Option<&'a serde_json::Value>,
}

impl<'a> KeySource<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self {
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: &'a serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Derives the raw idempotency key of a request. Implementations are pure.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, source: &KeySource<'_>) -> Result<String, MissingKey>;
}

/// Reads the key from a request header.
#[derive(Debug, Clone)]
pub struct HeaderKeyExtractor {
    header_name: String,
}

impl HeaderKeyExtractor {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }
}

impl Default for HeaderKeyExtractor {
    fn default() -> Self {
        Self::new("Idempotent-Key")
    }
}

impl KeyExtractor for HeaderKeyExtractor {
    fn extract(&self, source: &KeySource<'_>) -> Result<String, MissingKey> {
        let value = source
            .headers
            .get(self.header_name.as_str())
            .ok_or_else(|| MissingKey(format!("header '{}' is required", self.header_name)))?;

        let value = value
            .to_str()
            .map_err(|_| MissingKey(format!("header '{}' is not valid text", self.header_name)))?
            .trim();

        if value.is_empty() {
            return Err(MissingKey(format!("header '{}' is blank", self.header_name)));
        }

        Ok(value.to_string())
    }
}

/// Builds a business key from JSON body fields, e.g. `{voucherCode}_{userId}`.
#[derive(Debug, Clone)]
pub struct BodyFieldsKeyExtractor {
    fields: Vec<String>,
    separator: String,
}

impl BodyFieldsKeyExtractor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            separator: "_".to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl KeyExtractor for BodyFieldsKeyExtractor {
    fn extract(&self, source: &KeySource<'_>) -> Result<String, MissingKey> {
        let body = source
            .body
            .ok_or_else(|| MissingKey("request body is required".to_string()))?;

        if self.fields.is_empty() {
            return Err(MissingKey("no key fields configured".to_string()));
        }

        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let part = match body.get(field) {
                Some(serde_json::Value::String(s)) => s.trim().to_string(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::Bool(b)) => b.to_string(),
                _ => String::new(),
            };
            if part.is_empty() {
                return Err(MissingKey(format!("body field '{}' is required", field)));
            }
            parts.push(part);
        }

        Ok(parts.join(&self.separator))
    }
}

/// Tries each extractor in order and returns the first key found.
pub struct FirstOfKeyExtractor {
    extractors: Vec<Box<dyn KeyExtractor>>,
}

impl FirstOfKeyExtractor {
    pub fn new(extractors: Vec<Box<dyn KeyExtractor>>) -> Self {
        Self { extractors }
    }
}

impl KeyExtractor for FirstOfKeyExtractor {
    fn extract(&self, source: &KeySource<'_>) -> Result<String, MissingKey> {
        let mut reasons = Vec::new();
        for extractor in &self.extractors {
            match extractor.extract(source) {
                Ok(key) => return Ok(key),
                Err(MissingKey(reason)) => reasons.push(reason),
            }
        }
        Err(MissingKey(reasons.join("; ")))
    }
}

/// Maps raw client keys to canonical store keys scoped by operation.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    prefix: String,
}

impl KeyNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `{prefix}:{scope}:{sha256(raw)}`; the hash bounds key length and keeps
    /// client bytes out of the store's key space.
    pub fn normalize(&self, scope: &str, raw_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_key.as_bytes());
        let hash_hex = hex::encode(hasher.finalize());

        format!("{}:{}:{}", self.prefix, scope, hash_hex)
    }
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new("idem")
    }
}
