//! Administrative settings endpoint, independent of any HTTP server.
//!
//! The host routes `POST /settings/{type}/{key}` with a JSON body
//! `{"enabled": "true" | "false" | "INHERIT"}` to [`SettingsEndpoint::save_settings`]
//! and `GET` on the same path to [`SettingsEndpoint::read_settings`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Error;
use crate::settings::{Scope, SettingsResolver};

#[derive(Debug, Deserialize)]
struct SettingsBody {
    enabled: Option<Value>,
}

/// Status code plus JSON body, ready for the host to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminResponse {
    pub status: u16,
    pub body: Value,
}

impl AdminResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn client_error(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message.into() }),
        }
    }

    fn from_error(err: &Error) -> Self {
        match err {
            Error::InvalidSettingValue(_) | Error::InvalidScope(_) => {
                Self::client_error(err.to_string())
            }
            Error::SettingsStoreUnavailable(_) => Self {
                status: 503,
                body: json!({ "error": err.to_string() }),
            },
            _ => Self {
                status: 500,
                body: json!({ "error": err.to_string() }),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct SettingsEndpoint {
    resolver: SettingsResolver,
}

impl SettingsEndpoint {
    pub fn new(resolver: SettingsResolver) -> Self {
        Self { resolver }
    }

    /// Validate and store one scope's value. Nothing is written unless the
    /// scope and value are both valid.
    pub fn save_settings(&self, scope_type: &str, key: &str, body: &str) -> AdminResponse {
        let scope = match Scope::parse(scope_type, key) {
            Ok(scope) => scope,
            Err(e) => return AdminResponse::from_error(&e),
        };
        let parsed: SettingsBody = match serde_json::from_str(body) {
            Ok(b) => b,
            Err(e) => return AdminResponse::client_error(format!("malformed JSON body: {e}")),
        };
        let value = match parsed.enabled {
            Some(Value::String(s)) => s,
            Some(other) => {
                return AdminResponse::client_error(format!(
                    "'enabled' must be a string (\"true\", \"false\" or \"INHERIT\"), got {other}"
                ));
            }
            None => return AdminResponse::client_error("missing 'enabled' field"),
        };
        match self.resolver.set_raw(&scope, &value) {
            Ok(()) => AdminResponse::ok(json!({
                "scope": scope.level(),
                "key": scope.store_key(),
                "enabled": value,
            })),
            Err(e) => AdminResponse::from_error(&e),
        }
    }

    /// Display value for a settings page: raw value or `INHERIT`.
    pub fn read_settings(&self, scope_type: &str, key: &str) -> AdminResponse {
        let result = Scope::parse(scope_type, key)
            .and_then(|scope| self.resolver.display_value(&scope).map(|v| (scope, v)));
        match result {
            Ok((scope, value)) => AdminResponse::ok(json!({
                "scope": scope.level(),
                "key": scope.store_key(),
                "enabled": value,
            })),
            Err(e) => AdminResponse::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemoryStore, RepositoryRef, SettingsStore};
    use std::sync::Arc;

    fn endpoint() -> (SettingsEndpoint, SettingsResolver) {
        let resolver = SettingsResolver::new(Arc::new(MemoryStore::new()), false);
        (SettingsEndpoint::new(resolver.clone()), resolver)
    }

    #[test]
    fn saves_valid_value() {
        let (ep, resolver) = endpoint();
        let resp = ep.save_settings("repository", "42", r#"{"enabled": "true"}"#);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["enabled"], "true");
        assert!(
            resolver
                .is_enabled(&RepositoryRef::new("42", "P"))
                .unwrap()
        );
    }

    #[test]
    fn inherit_falls_through_to_project() {
        let (ep, resolver) = endpoint();
        ep.save_settings("project", "P", r#"{"enabled": "true"}"#);
        ep.save_settings("repository", "42", r#"{"enabled": "false"}"#);
        let repo = RepositoryRef::new("42", "P");
        assert!(!resolver.is_enabled(&repo).unwrap());

        let resp = ep.save_settings("repository", "42", r#"{"enabled": "INHERIT"}"#);
        assert!(resp.is_success());
        assert!(resolver.is_enabled(&repo).unwrap());
    }

    #[test]
    fn invalid_value_is_client_error_and_not_persisted() {
        let (ep, resolver) = endpoint();
        ep.save_settings("global", "", r#"{"enabled": "true"}"#);
        let resp = ep.save_settings("global", "", r#"{"enabled": "maybe"}"#);
        assert_eq!(resp.status, 400);
        assert!(resp.body["error"].as_str().unwrap().contains("maybe"));
        assert_eq!(resolver.get_raw(&Scope::Global).unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn missing_field_is_client_error() {
        let (ep, _) = endpoint();
        let resp = ep.save_settings("global", "", "{}");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "missing 'enabled' field");
    }

    #[test]
    fn non_string_value_is_client_error() {
        let (ep, resolver) = endpoint();
        let resp = ep.save_settings("global", "", r#"{"enabled": true}"#);
        assert_eq!(resp.status, 400);
        assert_eq!(resolver.get_raw(&Scope::Global).unwrap(), None);
    }

    #[test]
    fn malformed_body_is_client_error() {
        let (ep, _) = endpoint();
        assert_eq!(ep.save_settings("global", "", "enabled=true").status, 400);
    }

    #[test]
    fn unknown_scope_is_client_error() {
        let (ep, _) = endpoint();
        assert_eq!(
            ep.save_settings("team", "x", r#"{"enabled": "true"}"#).status,
            400
        );
    }

    #[test]
    fn store_outage_is_service_unavailable() {
        struct Down;
        impl SettingsStore for Down {
            fn get(&self, _key: &str) -> crate::error::Result<Option<String>> {
                Err(Error::SettingsStoreUnavailable("down".into()))
            }
            fn put(&self, _key: &str, _value: &str) -> crate::error::Result<()> {
                Err(Error::SettingsStoreUnavailable("down".into()))
            }
        }
        let ep = SettingsEndpoint::new(SettingsResolver::new(Arc::new(Down), false));
        assert_eq!(
            ep.save_settings("global", "", r#"{"enabled": "true"}"#).status,
            503
        );
        assert_eq!(ep.read_settings("global", "").status, 503);
    }

    #[test]
    fn read_shows_inherit_when_unset() {
        let (ep, _) = endpoint();
        let resp = ep.read_settings("repository", "42");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["enabled"], "INHERIT");
    }
}
