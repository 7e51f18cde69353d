//! Shared types for the unsubscribe engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

// ── Input metadata ──────────────────────────────────────────────────

/// Unsubscribe-related metadata of one inbound message.
///
/// Provided by the ingestion side; the engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Raw `List-Unsubscribe` header value.
    pub list_unsubscribe: Option<String>,
    /// Raw `List-Unsubscribe-Post` header value.
    pub list_unsubscribe_post: Option<String>,
    /// Rendered HTML body.
    pub html_body: Option<String>,
}

// ── Mechanisms ──────────────────────────────────────────────────────

/// Kind of unsubscribe mechanism, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    OneClick,
    HeaderLink,
    BodyLink,
    HtmlForm,
}

impl MechanismKind {
    /// The method recorded in the outcome when this kind was attempted.
    pub fn method(self) -> UnsubscribeMethod {
        match self {
            Self::OneClick => UnsubscribeMethod::OneClick,
            Self::HeaderLink => UnsubscribeMethod::HeaderLink,
            Self::BodyLink => UnsubscribeMethod::BodyLink,
            Self::HtmlForm => UnsubscribeMethod::HtmlForm,
        }
    }
}

/// How a located form is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    Get,
    Post,
}

/// A decoded unsubscribe form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlForm {
    /// Page the form was found on.
    pub page_url: String,
    /// Absolute submission URL.
    pub action: String,
    pub method: FormMethod,
    /// Field name/value pairs in document order, seeded with declared defaults.
    pub fields: Vec<(String, String)>,
}

/// A candidate way to unsubscribe, carrying what its executor needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mechanism {
    /// RFC 8058 POST with `List-Unsubscribe=One-Click`.
    OneClick { url: String },
    /// GET an `https:` URI from the `List-Unsubscribe` header.
    HeaderLink { url: String },
    /// GET the first unsubscribe anchor of the body.
    BodyLink { url: String },
    /// Submit a form discovered on a fetched page.
    HtmlForm(HtmlForm),
}

impl Mechanism {
    pub fn kind(&self) -> MechanismKind {
        match self {
            Self::OneClick { .. } => MechanismKind::OneClick,
            Self::HeaderLink { .. } => MechanismKind::HeaderLink,
            Self::BodyLink { .. } => MechanismKind::BodyLink,
            Self::HtmlForm(_) => MechanismKind::HtmlForm,
        }
    }

    /// The URL a human would open to finish this mechanism by hand.
    pub fn target_url(&self) -> &str {
        match self {
            Self::OneClick { url } | Self::HeaderLink { url } | Self::BodyLink { url } => url,
            Self::HtmlForm(form) => &form.page_url,
        }
    }
}

// ── Transport result ────────────────────────────────────────────────

/// A completed HTTP exchange, whatever its status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after any redirects the transport followed.
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    /// 2xx or 3xx.
    pub fn is_success_or_redirect(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => ct.to_ascii_lowercase().contains("html"),
            None => {
                let head = self.body.trim_start().get(..256).unwrap_or(self.body.trim_start());
                let head = head.to_ascii_lowercase();
                head.starts_with("<!doctype html") || head.starts_with("<html")
            }
        }
    }
}

/// Outcome of one request: a response, or a failure captured as data.
pub type TransportResult = Result<HttpResponse, TransportError>;

// ── Outcomes ────────────────────────────────────────────────────────

/// Persisted unsubscribe status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeStatus {
    NotAttempted,
    Success,
    Attempted,
    ManualRequired,
    Failed,
}

impl UnsubscribeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::Success => "success",
            Self::Attempted => "attempted",
            Self::ManualRequired => "manual_required",
            Self::Failed => "failed",
        }
    }

    /// Parse a DB string. Unknown values read as `not_attempted`.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "attempted" => Self::Attempted,
            "manual_required" => Self::ManualRequired,
            "failed" => Self::Failed,
            _ => Self::NotAttempted,
        }
    }
}

impl std::fmt::Display for UnsubscribeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the recorded outcome was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeMethod {
    OneClick,
    HeaderLink,
    BodyLink,
    HtmlForm,
    Manual,
    None,
}

impl UnsubscribeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneClick => "one_click",
            Self::HeaderLink => "header_link",
            Self::BodyLink => "body_link",
            Self::HtmlForm => "html_form",
            Self::Manual => "manual",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "one_click" => Self::OneClick,
            "header_link" => Self::HeaderLink,
            "body_link" => Self::BodyLink,
            "html_form" => Self::HtmlForm,
            "manual" => Self::Manual,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for UnsubscribeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of one mechanism attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A request went through but success could not be confirmed.
    Attempted,
    /// A human has to finish the job.
    ManualRequired,
    Failed { error: String },
}

impl Outcome {
    pub fn status(&self) -> UnsubscribeStatus {
        match self {
            Self::Success => UnsubscribeStatus::Success,
            Self::Attempted => UnsubscribeStatus::Attempted,
            Self::ManualRequired => UnsubscribeStatus::ManualRequired,
            Self::Failed { .. } => UnsubscribeStatus::Failed,
        }
    }

    /// Decisive outcomes end a run immediately.
    pub fn is_decisive(&self) -> bool {
        matches!(self, Self::Success | Self::ManualRequired)
    }
}

// ── Outcome record ──────────────────────────────────────────────────

/// The persisted per-message unsubscribe record.
///
/// `completed_at` is set iff `status == Success`; `error` is non-empty iff
/// `status == Failed`. Build records through the constructors to keep that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub message_id: String,
    pub status: UnsubscribeStatus,
    pub method: UnsubscribeMethod,
    pub url: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of runs started for this message.
    #[serde(default)]
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// The record reported for a message no run has touched yet.
    pub fn not_attempted(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            status: UnsubscribeStatus::NotAttempted,
            method: UnsubscribeMethod::None,
            url: None,
            error: None,
            completed_at: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    /// The terminal record for a finished run. `attempts` starts at zero;
    /// callers copy in the count from `begin_attempt`.
    pub fn finished(
        message_id: &str,
        outcome: &Outcome,
        method: UnsubscribeMethod,
        url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let error = match outcome {
            Outcome::Failed { error } if error.trim().is_empty() => Some("unknown error".to_string()),
            Outcome::Failed { error } => Some(error.clone()),
            _ => None,
        };
        Self {
            message_id: message_id.to_string(),
            status: outcome.status(),
            method,
            url: url.filter(|u| !u.is_empty()),
            error,
            completed_at: (*outcome == Outcome::Success).then_some(now),
            attempts: 0,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != UnsubscribeStatus::NotAttempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_success_sets_completed_at_only() {
        let rec = OutcomeRecord::finished(
            "m1",
            &Outcome::Success,
            UnsubscribeMethod::OneClick,
            Some("https://x.example/u".into()),
        );
        assert_eq!(rec.status, UnsubscribeStatus::Success);
        assert!(rec.completed_at.is_some());
        assert!(rec.error.is_none());
    }

    #[test]
    fn finished_failure_always_carries_error() {
        let rec = OutcomeRecord::finished(
            "m1",
            &Outcome::Failed { error: "  ".into() },
            UnsubscribeMethod::HeaderLink,
            None,
        );
        assert_eq!(rec.status, UnsubscribeStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("unknown error"));
        assert!(rec.completed_at.is_none());
    }

    #[test]
    fn status_strings_round_trip_through_db_form() {
        for status in [
            UnsubscribeStatus::NotAttempted,
            UnsubscribeStatus::Success,
            UnsubscribeStatus::Attempted,
            UnsubscribeStatus::ManualRequired,
            UnsubscribeStatus::Failed,
        ] {
            assert_eq!(UnsubscribeStatus::parse(status.as_str()), status);
        }
        assert_eq!(UnsubscribeMethod::parse("html_form"), UnsubscribeMethod::HtmlForm);
        assert_eq!(UnsubscribeMethod::parse("bogus"), UnsubscribeMethod::None);
    }

    #[test]
    fn html_detection_falls_back_to_body_sniffing() {
        let resp = HttpResponse {
            status: 200,
            final_url: "https://x.example/".into(),
            content_type: None,
            body: "  <!DOCTYPE html><html></html>".into(),
        };
        assert!(resp.is_html());

        let json = HttpResponse {
            content_type: Some("application/json".into()),
            body: "{}".into(),
            ..resp
        };
        assert!(!json.is_html());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&UnsubscribeStatus::ManualRequired).unwrap();
        assert_eq!(json, "\"manual_required\"");
        let json = serde_json::to_string(&UnsubscribeMethod::None).unwrap();
        assert_eq!(json, "\"none\"");
    }
}
