//! Shared envelope types: problem errors, pagination, datasets and regions

use super::{field_path, index_path, Validate, Violations};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured error body returned for every rejected request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemError {
    /// Problem type URI
    #[serde(rename = "type", default = "about_blank")]
    pub kind: String,
    /// Short human-readable summary
    pub title: String,
    /// HTTP status code
    pub status: u16,
    /// Longer explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// URI of the failing request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Trace id to quote to support
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    /// Machine-readable error code, e.g. `http.404`
    pub code: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Per-field error detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Map<String, serde_json::Value>>,
}

fn about_blank() -> String {
    "about:blank".to_string()
}

impl ProblemError {
    /// Build a problem locally, e.g. when the server body is not a problem
    pub fn new(code: impl Into<String>, title: impl Into<String>, status: u16) -> Self {
        Self {
            kind: about_blank(),
            title: title.into(),
            status,
            detail: None,
            instance: None,
            correlation_id: String::new(),
            code: code.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            errors: None,
        }
    }

    /// Problem for a bare HTTP status with an unparseable body
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("HTTP Error");
        let mut problem = Self::new(format!("http.{}", status), reason, status);
        let body = body.trim();
        if !body.is_empty() {
            problem.detail = Some(body.chars().take(512).collect());
        }
        problem
    }

    /// Set the detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Text suitable for showing to a user
    pub fn user_message(&self) -> String {
        match &self.detail {
            Some(detail) if detail != &self.title => {
                format!("{}: {} ({})", self.title, detail, self.code)
            }
            _ => format!("{} ({})", self.title, self.code),
        }
    }
}

impl Validate for ProblemError {
    fn check(&self, path: &str, v: &mut Violations) {
        v.uri(field_path(path, "type"), &self.kind);
    }
}

/// Cursor-paginated list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Cursor for the next page, absent on the last page
    #[serde(rename = "nextCursor", alias = "next_cursor", default)]
    pub next_cursor: Option<String>,
}

impl<T> PaginatedResponse<T> {
    /// Whether another page exists
    pub fn has_more(&self) -> bool {
        self.next_cursor.as_deref().map_or(false, |c| !c.is_empty())
    }
}

impl<T: Validate> Validate for PaginatedResponse<T> {
    fn check(&self, path: &str, v: &mut Violations) {
        let items_path = field_path(path, "items");
        for (i, item) in self.items.iter().enumerate() {
            item.check(&index_path(&items_path, i), v);
        }
    }
}

/// Input dataset registered by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset id
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Dataset kind, e.g. `regions` or `mobility`
    #[serde(rename = "type")]
    pub kind: String,
    /// Storage location
    pub uri: String,
    /// Dataset version
    pub version: String,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Validate for Dataset {
    fn check(&self, path: &str, v: &mut Violations) {
        v.min_len(field_path(path, "name"), &self.name, 1);
    }
}

/// Geographic region within a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region id, matches `TimeSeriesPoint::region_id`
    pub id: Uuid,
    /// Dataset the region belongs to
    pub dataset_id: Uuid,
    /// Display name
    pub name: String,
    /// GeoJSON geometry
    pub geom: serde_json::Map<String, serde_json::Value>,
    /// Resident population
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub population: u64,
}

impl Validate for Region {
    fn check(&self, _path: &str, _v: &mut Violations) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse;

    #[test]
    fn test_parse_problem() {
        let raw = r#"{
            "type": "about:blank",
            "title": "Run not found",
            "status": 404,
            "detail": "Run not found",
            "correlationId": "abc123",
            "code": "http.404",
            "timestamp": "2024-01-01T00:00:00+00:00",
            "errors": null
        }"#;
        let problem: ProblemError = parse(raw).unwrap();
        assert_eq!(problem.status, 404);
        assert_eq!(problem.correlation_id, "abc123");
        assert_eq!(problem.user_message(), "Run not found (http.404)");
    }

    #[test]
    fn test_problem_type_must_be_uri() {
        let mut problem = ProblemError::new("x", "X", 400);
        problem.kind = "not a uri".to_string();
        assert!(problem.validate().unwrap_err().has_path("type"));
    }

    #[test]
    fn test_problem_from_status() {
        let problem = ProblemError::from_status(502, "<html>bad gateway</html>");
        assert_eq!(problem.code, "http.502");
        assert_eq!(problem.title, "Bad Gateway");
        assert_eq!(problem.detail.as_deref(), Some("<html>bad gateway</html>"));
        assert_eq!(
            problem.user_message(),
            "Bad Gateway: <html>bad gateway</html> (http.502)"
        );
    }

    #[test]
    fn test_paginated_datasets() {
        let raw = format!(
            r#"{{"items":[{{"id":"{}","owner_id":"u","name":"Regions","type":"regions","uri":"s3://x","version":"1"}}],"nextCursor":null}}"#,
            Uuid::new_v4()
        );
        let page: PaginatedResponse<Dataset> = parse(&raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more());

        let bad = raw.replace(r#""name":"Regions""#, r#""name":"""#);
        let err = parse::<PaginatedResponse<Dataset>>(&bad).unwrap_err();
        assert_eq!(err.paths(), vec!["items[0].name"]);
    }
}
