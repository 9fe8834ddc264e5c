//! Kubernetes `Status` response bodies
//!
//! Every error the cache handler emits is a `Status` object with
//! `apiVersion: v1`, `kind: Status` and the HTTP code embedded, matching
//! what a real API server returns.

use serde::{Deserialize, Serialize};

/// A `meta/v1` Status object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
    pub code: u16,
}

/// Extended failure information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Status {
    fn failure(code: u16, reason: &str, message: String) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Status".to_string(),
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            details: None,
            code,
        }
    }

    /// 404 for a missing object; `resource` is the lowercase URL noun
    pub fn not_found(group: &str, resource: &str, name: &str) -> Self {
        let qualified = if group.is_empty() {
            resource.to_string()
        } else {
            format!("{resource}.{group}")
        };
        let mut status = Self::failure(
            404,
            "NotFound",
            format!("{qualified} \"{name}\" not found"),
        );
        status.details = Some(StatusDetails {
            name: name.to_string(),
            group: group.to_string(),
            kind: resource.to_string(),
        });
        status
    }

    /// 405 for verbs and subresources the cache does not serve
    pub fn method_not_supported(group: &str, resource: &str, verb: &str) -> Self {
        let qualified = if group.is_empty() {
            resource.to_string()
        } else {
            format!("{resource}.{group}")
        };
        let mut status = Self::failure(
            405,
            "MethodNotAllowed",
            format!("{verb} is not supported on resources of kind \"{qualified}\""),
        );
        status.details = Some(StatusDetails {
            name: String::new(),
            group: group.to_string(),
            kind: resource.to_string(),
        });
        status
    }

    /// 400 for malformed request parameters (selector parse failures)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::failure(400, "BadRequest", message.into())
    }

    /// 500 wrapping an unexpected internal failure
    pub fn internal_error(message: impl std::fmt::Display) -> Self {
        Self::failure(
            500,
            "InternalError",
            format!("Internal error occurred: {message}"),
        )
    }
}
