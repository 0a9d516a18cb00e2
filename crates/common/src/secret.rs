//! Secret values that must not reach logs.
//!
//! [`SecretString`] from [`secrecy`] redacts itself in `Debug`, so config
//! structs holding the database URL or the group service token can derive
//! `Debug` safely. Reading the value takes an explicit `expose_secret()`.
//!
//! ```rust
//! use common::secret::{redacted_dsn, ExposeSecret, SecretString};
//!
//! let url = SecretString::from("postgres://huddle:pw@db:5432/huddle");
//! assert!(!format!("{url:?}").contains("pw@"));
//! assert_eq!(redacted_dsn(&url), "postgres://***@db:5432/huddle");
//! assert!(url.expose_secret().starts_with("postgres://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Connection string with its credentials masked, for log lines.
///
/// Everything between the scheme and the last `@` of the authority is
/// replaced with `***`. Strings without credentials are returned as-is.
#[must_use]
pub fn redacted_dsn(url: &SecretString) -> String {
    let raw = url.expose_secret();
    let Some(scheme_end) = raw.find("://") else {
        return "***".to_string();
    };
    let (scheme, rest) = raw.split_at(scheme_end + 3);
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    match authority.rfind('@') {
        Some(at) => {
            let host = authority.get(at + 1..).unwrap_or_default();
            format!("{scheme}***@{host}{path}")
        }
        None => raw.to_string(),
    }
}
