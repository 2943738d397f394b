//! Shared Key Lite request signing for the table service.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::error;

use crate::errors::TransportError;

/// Account credentials used to sign requests.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SharedKeyCredential {
    /// # Errors
    ///
    /// Returns a config error if `key` is not valid base64.
    pub fn new(account: impl Into<String>, key: &str) -> Result<Self, TransportError> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| TransportError::Config(format!("account key is not valid base64: {e}")))?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Signature over `date` and `canonical_resource`, base64 encoded.
    #[must_use]
    pub fn sign(&self, date: &str, canonical_resource: &str) -> String {
        let string_to_sign = format!("{date}\n{canonical_resource}");
        let mut mac = match Hmac::<Sha256>::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(e) => {
                error!("Failed to create HMAC: {}", e);
                return String::new();
            }
        };
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn authorization(&self, date: &str, canonical_resource: &str) -> String {
        format!(
            "SharedKeyLite {}:{}",
            self.account,
            self.sign(date, canonical_resource)
        )
    }
}

/// RFC 1123 date as required by `x-ms-date`.
#[must_use]
pub fn format_ms_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `/{account}{path}`, where `path` is the URL path without the query string.
/// The `comp` query parameter is not used by any of the table operations here.
#[must_use]
pub fn canonical_resource(account: &str, path: &str) -> String {
    format!("/{account}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ms_date_format() {
        let date = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(format_ms_date(date), "Thu, 07 Mar 2024 09:05:01 GMT");
    }

    #[test]
    fn test_canonical_resource() {
        assert_eq!(canonical_resource("acct", "/Tables"), "/acct/Tables");
        assert_eq!(
            canonical_resource("devstoreaccount1", "/devstoreaccount1/logs()"),
            "/devstoreaccount1/devstoreaccount1/logs()"
        );
    }

    #[test]
    fn test_sign_matches_reference_hmac() {
        let credential = SharedKeyCredential::new("acct", &STANDARD.encode(b"secret")).unwrap();
        let date = "Thu, 07 Mar 2024 09:05:01 GMT";
        let resource = "/acct/Tables";

        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(format!("{date}\n{resource}").as_bytes());
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(credential.sign(date, resource), expected);
        assert_eq!(
            credential.authorization(date, resource),
            format!("SharedKeyLite acct:{expected}")
        );
    }

    #[test]
    fn test_invalid_key_is_a_config_error() {
        let err = SharedKeyCredential::new("acct", "not base64!").unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let credential = SharedKeyCredential::new("acct", &STANDARD.encode(b"secret")).unwrap();
        assert!(!format!("{credential:?}").contains("c2VjcmV0"));
    }
}
