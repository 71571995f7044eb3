//! Validated notification channel names.

use super::{NotifyError, NotifyResult};
use std::borrow::Cow;
use std::fmt;

const MAX_CHANNEL_NAME_LEN: usize = 63;

/// Name of a change notification channel.
///
/// Names are restricted to lowercase ASCII letters, digits, and underscores,
/// start with a letter, and fit in a PostgreSQL identifier, so they can be
/// quoted into `LISTEN` without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(Cow<'static, str>);

impl ChannelName {
    /// Validates and wraps a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::InvalidChannelName`] when the name is empty,
    /// too long, or uses characters outside `[a-z0-9_]`.
    pub fn new(name: impl Into<String>) -> NotifyResult<Self> {
        let value = name.into();
        let starts_with_letter = value
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_lowercase());
        let valid_chars = value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !starts_with_letter || !valid_chars || value.len() > MAX_CHANNEL_NAME_LEN {
            return Err(NotifyError::InvalidChannelName(value));
        }
        Ok(Self(Cow::Owned(value)))
    }

    /// Wraps a compile-time channel name. Callers keep such names covered
    /// by a test that runs them through [`ChannelName::new`].
    pub(crate) const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
