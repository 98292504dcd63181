//! Process configuration from `WINDLEDGER_*` environment variables.
//!
//! Unset variables take their defaults. Invalid values are logged and replaced
//! by the default; the server always starts.

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::warn;

use windledger_infra::ServiceConfig;
use windledger_infra::services::DEFAULT_MAX_COMMIT_RETRIES;
use windledger_numbering::{DocumentType, NumberFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["sta", "mt940", "940", "txt", "xml"];
pub const DEFAULT_NUMBER_DIGITS: u8 = 4;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// Lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub services: ServiceConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            services: ServiceConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let bind_addr = parse_or(&lookup, "WINDLEDGER_BIND_ADDR", defaults.bind_addr);
        let max_upload_bytes = match parse_or(&lookup, "WINDLEDGER_MAX_UPLOAD_BYTES", defaults.max_upload_bytes) {
            0 => {
                warn!(variable = "WINDLEDGER_MAX_UPLOAD_BYTES", "must be positive, using default");
                DEFAULT_MAX_UPLOAD_BYTES
            }
            n => n,
        };
        let allowed_extensions = lookup("WINDLEDGER_ALLOWED_EXTENSIONS")
            .map(|raw| parse_extensions(&raw))
            .filter(|list| {
                if list.is_empty() {
                    warn!(variable = "WINDLEDGER_ALLOWED_EXTENSIONS", "empty list, using default");
                }
                !list.is_empty()
            })
            .unwrap_or(defaults.allowed_extensions);
        let max_commit_retries = match parse_or(&lookup, "WINDLEDGER_MAX_COMMIT_RETRIES", DEFAULT_MAX_COMMIT_RETRIES) {
            0 => {
                warn!(variable = "WINDLEDGER_MAX_COMMIT_RETRIES", "must be at least 1, using default");
                DEFAULT_MAX_COMMIT_RETRIES
            }
            n => n,
        };
        let digits = parse_or(&lookup, "WINDLEDGER_NUMBER_DIGITS", DEFAULT_NUMBER_DIGITS);

        let services = ServiceConfig {
            max_commit_retries,
            invoice_format: number_format(&lookup, "WINDLEDGER_INVOICE_FORMAT", DocumentType::Invoice, digits),
            credit_note_format: number_format(
                &lookup,
                "WINDLEDGER_CREDIT_NOTE_FORMAT",
                DocumentType::CreditNote,
                digits,
            ),
            ..ServiceConfig::default()
        };

        Self {
            bind_addr,
            max_upload_bytes,
            allowed_extensions,
            services,
        }
    }

    pub fn extension_allowed(&self, file_name: &str) -> bool {
        file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = key, value = %raw, "invalid value, using default");
                default
            }
        },
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn number_format(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    document_type: DocumentType,
    digits: u8,
) -> NumberFormat {
    let builtin = document_type.default_format();
    let template = lookup(key).unwrap_or_else(|| builtin.template().to_string());
    match NumberFormat::new(template.clone(), digits) {
        Ok(format) => format,
        Err(e) => {
            warn!(variable = key, template = %template, digits, error = %e, "invalid number format, using default");
            builtin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]);
        assert_eq!(c.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(c.max_upload_bytes, 5_242_880);
        assert_eq!(c.services.max_commit_retries, 5);
        assert_eq!(c.services.invoice_format.template(), "RG-{YYYY}-{NUMBER}");
        assert_eq!(c.services.credit_note_format.digits(), 4);
        assert!(c.extension_allowed("auszug.STA"));
        assert!(!c.extension_allowed("auszug.pdf"));
        assert!(!c.extension_allowed("auszug"));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let c = config(&[
            ("WINDLEDGER_BIND_ADDR", "not-an-addr"),
            ("WINDLEDGER_MAX_UPLOAD_BYTES", "-1"),
            ("WINDLEDGER_MAX_COMMIT_RETRIES", "0"),
            ("WINDLEDGER_INVOICE_FORMAT", "RG-{YYYY}"),
            ("WINDLEDGER_ALLOWED_EXTENSIONS", " , "),
        ]);
        assert_eq!(c.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(c.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(c.services.max_commit_retries, DEFAULT_MAX_COMMIT_RETRIES);
        assert_eq!(c.services.invoice_format.template(), "RG-{YYYY}-{NUMBER}");
        assert_eq!(c.allowed_extensions.len(), DEFAULT_ALLOWED_EXTENSIONS.len());
    }

    #[test]
    fn custom_values_are_used() {
        let c = config(&[
            ("WINDLEDGER_BIND_ADDR", "127.0.0.1:9000"),
            ("WINDLEDGER_ALLOWED_EXTENSIONS", ".XML, sta"),
            ("WINDLEDGER_CREDIT_NOTE_FORMAT", "GS/{YY}/{NUMBER}"),
            ("WINDLEDGER_NUMBER_DIGITS", "6"),
        ]);
        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.allowed_extensions, vec!["xml", "sta"]);
        assert_eq!(c.services.credit_note_format.template(), "GS/{YY}/{NUMBER}");
        assert_eq!(c.services.invoice_format.digits(), 6);
    }
}
