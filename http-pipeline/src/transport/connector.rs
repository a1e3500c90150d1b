//! TLS connector setup for [`HyperTransport`](super::HyperTransport).
//!
//! TLS needs both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!   - neither: a process-wide provider installed with
//!     `CryptoProvider::install_default()`
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! Missing pieces are reported as a configuration error when the transport
//! is built, never as a panic.

#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

use crate::PipelineError;

/// Returns true if both a crypto provider AND root certificates are
/// compiled in.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

/// Get a config builder for the available crypto provider.
///
/// Priority:
/// 1. Feature-gated provider (tls-ring, then tls-aws-lc)
/// 2. User-installed global default provider
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn crypto_provider_builder() -> Option<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = rustls::crypto::CryptoProvider::get_default().cloned();

    ClientConfig::builder_with_provider(provider?)
        .with_safe_default_protocol_versions()
        .ok()
}

/// Build the default TLS configuration.
///
/// Returns `None` if no crypto provider is available.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub fn default_tls_config() -> Option<ClientConfig> {
    let builder = crypto_provider_builder()?;
    Some(
        builder
            .with_root_certificates(build_root_store())
            .with_no_client_auth(),
    )
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn build_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    // Native roots win when both root features are on
    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // Some certs may still have loaded
            #[cfg(feature = "tracing")]
            tracing::debug!(errors = ?native_certs.errors, "errors loading native certs");
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Pick the caller's TLS config or fall back to the default one.
pub(crate) fn resolve_tls_config(custom: Option<ClientConfig>) -> Result<ClientConfig, PipelineError> {
    if let Some(config) = custom {
        return Ok(config);
    }

    #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
    {
        default_tls_config().ok_or_else(|| {
            PipelineError::configuration(
                "HTTPS requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, \
                 or install one with `CryptoProvider::install_default()`",
            )
        })
    }

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    {
        Err(PipelineError::configuration(
            "HTTPS requires root certificates: enable `tls-native-roots` or \
             `tls-webpki-roots`, or pass a TLS config",
        ))
    }
}

/// Wrap a TCP connector with TLS. Plain `http://` URIs are still accepted.
///
/// The TCP connector must not enforce the `http` scheme.
pub fn build_https_connector(
    config: ClientConfig,
    http: HttpConnector,
) -> HttpsConnector<HttpConnector> {
    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_all_versions()
        .wrap_connector(http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "tls")]
    #[test]
    fn test_tls_feature_enables_support() {
        assert!(has_tls_support());
    }

    #[test]
    fn test_custom_config_wins() {
        if let Some(config) = default_config_for_test() {
            assert!(resolve_tls_config(Some(config)).is_ok());
        }
    }

    fn default_config_for_test() -> Option<ClientConfig> {
        #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
        return default_tls_config();

        #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
        None
    }

    #[cfg(all(feature = "tls-ring", feature = "tls-native-roots"))]
    #[test]
    fn test_resolve_default_config() {
        let config = resolve_tls_config(None).unwrap();
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let _connector = build_https_connector(config, http);
    }
}
