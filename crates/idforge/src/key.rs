use core::fmt;

use crate::{Error, Result};

/// Joins the parts of a [`CompositeKey`].
pub const KEY_SEPARATOR: &str = ":";

/// A namespaced counter or sequence key: `prefix:name:key`.
///
/// Distinct `(prefix, name, key)` triples map to distinct composite keys as
/// long as no part contains the separator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(String);

impl CompositeKey {
    /// # Errors
    ///
    /// Returns [`Error::EmptyKey`] naming the first empty part.
    ///
    /// # Example
    /// ```
    /// use idforge::CompositeKey;
    ///
    /// let key = CompositeKey::new("idforge", "order", "k1").unwrap();
    /// assert_eq!(key.as_str(), "idforge:order:k1");
    /// ```
    pub fn new(prefix: &str, name: &str, key: &str) -> Result<Self> {
        for (part, value) in [("prefix", prefix), ("name", name), ("key", key)] {
            if value.is_empty() {
                return Err(Error::EmptyKey(part));
            }
        }
        Ok(Self([prefix, name, key].join(KEY_SEPARATOR)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CompositeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CompositeKey> for String {
    fn from(key: CompositeKey) -> Self {
        key.0
    }
}

/// Rejects an empty caller-supplied composite key.
pub(crate) fn check_composite(composite_key: &str) -> Result<()> {
    if composite_key.is_empty() {
        return Err(Error::EmptyKey("composite key"));
    }
    Ok(())
}
