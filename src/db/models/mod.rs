//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` keep working.

/// Canonical form of an enumeration token: upper-case, with `-` and spaces
/// folded into `_` so `session-reminder` and `SESSION_REMINDER` compare equal.
pub(crate) fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Error returned when a string is not a member of a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: '{value}' (expected one of: {expected})")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str, expected: &[&str]) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected: expected.join(", "),
        }
    }
}

impl From<UnknownVariant> for crate::error::AppError {
    fn from(e: UnknownVariant) -> Self {
        crate::error::AppError::Validation(e.to_string())
    }
}

/// Implements `as_str`, `ALL` and case-insensitive `FromStr` for a unit enum
/// stored as SCREAMING_SNAKE_CASE text.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::db::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let token = $crate::db::models::normalize_token(s);
                match token.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err($crate::db::models::UnknownVariant::new(
                        $kind,
                        s,
                        &[$($text),+],
                    )),
                }
            }
        }
    };
}

pub mod document;
pub mod notification;
pub mod progress;
pub mod training_session;
pub mod user;
pub mod video;

pub use self::document::*;
pub use self::notification::*;
pub use self::progress::*;
pub use self::training_session::*;
pub use self::user::*;
pub use self::video::*;
