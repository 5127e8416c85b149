use std::fmt;

/// Prefix shared by every bucket key in the store.
const KEY_PREFIX: &str = "rate_limit";

/// Key segment used when no authenticated caller is attached to a request.
const ANONYMOUS: &str = "anonymous";

/// Who is making a request, as far as rate limiting is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caller {
    /// An authenticated user, identified by its id.
    User(String),
    /// No authenticated identity.
    Anonymous,
}

impl Caller {
    /// The segment this caller contributes to a bucket key.
    pub fn key_segment(&self) -> &str {
        match self {
            Caller::User(id) => id,
            Caller::Anonymous => ANONYMOUS,
        }
    }
}

/// Name of one independent token bucket: one (operation, caller) pair.
///
/// Format: `rate_limit:{method}:{path}:{caller}`. The rendering is pure, so
/// the same pair maps to the same bucket from every process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey(String);

impl BucketKey {
    pub fn new(method: &str, path: &str, caller: &Caller) -> Self {
        Self(format!(
            "{KEY_PREFIX}:{method}:{path}:{}",
            caller.key_segment()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
