//! Configuration validation.

use crate::config::Config;

/// Validate the configuration.
///
/// Checks for:
/// - A bare hostname without scheme or path (empty, `+` or `*` bind every interface)
/// - A path without query or fragment characters
/// - TLS files whenever https is requested
/// - A non-zero drain timeout
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();
    let server = &config.server;

    if server.hostname.contains("://") || server.hostname.contains('/') {
        errors.push(format!(
            "server hostname '{}' must be a bare host name or address",
            server.hostname
        ));
    }

    if server.path.contains(['?', '#']) || server.path.chars().any(char::is_whitespace) {
        errors.push(format!(
            "server path '{}' cannot contain whitespace, '?' or '#'",
            server.path
        ));
    }

    if server.use_https && server.tls.is_none() {
        errors.push("use_https requires a tls section with cert_path and key_path".to_string());
    }

    if let Some(tls) = &server.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push("tls cert_path cannot be empty".to_string());
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push("tls key_path cannot be empty".to_string());
        }
    }

    if server.drain_timeout.is_zero() {
        errors.push("server drain_timeout must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
