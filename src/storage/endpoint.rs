//! Resolves where table requests go and which credential signs them.

use url::Url;

use super::auth::{SharedKeyCredential, canonical_resource};
use crate::core::config::TransportConfig;
use crate::errors::TransportError;

/// Well-known account of the local storage emulator.
pub const DEV_STORAGE_ACCOUNT: &str = "devstoreaccount1";
/// Well-known key of the local storage emulator.
pub const DEV_STORAGE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
pub const DEV_STORAGE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

#[derive(Debug, Clone)]
pub struct TableEndpoint {
    base: Url,
    credential: SharedKeyCredential,
}

impl TableEndpoint {
    /// # Errors
    ///
    /// Returns a config error if credentials are missing or the endpoint URL is invalid.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let (credential, default_base) = if config.use_dev_storage {
            (
                SharedKeyCredential::new(DEV_STORAGE_ACCOUNT, DEV_STORAGE_KEY)?,
                DEV_STORAGE_ENDPOINT.to_string(),
            )
        } else {
            let account = config.account.as_deref().unwrap_or_default().trim();
            let key = config.key.as_deref().unwrap_or_default();
            if account.is_empty() {
                return Err(TransportError::Config(
                    "azure storage account name required.".to_string(),
                ));
            }
            (
                SharedKeyCredential::new(account, key)?,
                format!("https://{account}.table.core.windows.net"),
            )
        };

        let raw = config.endpoint.clone().unwrap_or(default_base);
        Self::new(&raw, credential)
    }

    /// # Errors
    ///
    /// Returns a config error if `base` is not an absolute http(s) URL.
    pub fn new(base: &str, credential: SharedKeyCredential) -> Result<Self, TransportError> {
        let mut base = Url::parse(base)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TransportError::Config(format!(
                "unsupported endpoint scheme '{}'",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        Ok(Self { base, credential })
    }

    #[must_use]
    pub fn credential(&self) -> &SharedKeyCredential {
        &self.credential
    }

    /// URL for a resource relative to the account root, e.g. `Tables` or `logs()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource does not form a valid URL.
    pub fn url(&self, resource: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(resource)?)
    }

    /// Canonicalized resource string for signing a request to `url`.
    #[must_use]
    pub fn canonical_resource(&self, url: &Url) -> String {
        canonical_resource(self.credential.account(), url.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_endpoint() {
        let config = TransportConfig::for_account("acct", "a2V5");
        let endpoint = TableEndpoint::from_config(&config).unwrap();
        let url = endpoint.url("Tables").unwrap();
        assert_eq!(url.as_str(), "https://acct.table.core.windows.net/Tables");
        assert_eq!(endpoint.canonical_resource(&url), "/acct/Tables");
    }

    #[test]
    fn test_dev_storage_endpoint_is_path_style() {
        let endpoint = TableEndpoint::from_config(&TransportConfig::dev_storage()).unwrap();
        let url = endpoint.url("logs()").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:10002/devstoreaccount1/logs()");
        assert_eq!(
            endpoint.canonical_resource(&url),
            "/devstoreaccount1/devstoreaccount1/logs()"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let mut config = TransportConfig::for_account("acct", "a2V5");
        config.endpoint = Some("http://localhost:8902/acct".to_string());
        let endpoint = TableEndpoint::from_config(&config).unwrap();
        assert_eq!(
            endpoint.url("Tables").unwrap().as_str(),
            "http://localhost:8902/acct/Tables"
        );
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = TransportConfig::dev_storage();
        config.endpoint = Some("ftp://example.com".to_string());
        assert!(matches!(
            TableEndpoint::from_config(&config),
            Err(TransportError::Config(_))
        ));
    }
}
