//! Outcome classifier.
//!
//! Maps a transport result to one of the canonical outcomes. Success and
//! challenge detection are heuristic, driven by a configurable `Vocabulary`.
//!
//! Rules, first match wins:
//! 1. transport failure, or a 4xx/5xx without challenge markers → `Failed`
//! 2. one-click / form submission answered 2xx/3xx, no challenge → `Success`
//! 3. link GET whose page reads as a confirmation, no challenge or error
//!    terms → `Success`
//! 4. challenge markers anywhere in the response → `ManualRequired`
//! 5. any other 2xx/3xx → `Attempted`

use serde::{Deserialize, Serialize};

use super::form::visible_text;
use super::types::{HttpResponse, MechanismKind, Outcome, TransportResult};

/// Phrase lists the classifier matches against, case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Terms that mark a confirmation page.
    pub success: Vec<String>,
    /// Terms that mark a captcha or human-verification wall.
    pub challenge: Vec<String>,
    /// Terms that veto a success match on a link page.
    pub error: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(
            ["unsubscribed", "removed", "success"],
            ["captcha", "verify you are human"],
            ["failed", "invalid", "not found"],
        )
    }
}

impl Vocabulary {
    pub fn new<S, C, E>(success: S, challenge: C, error: E) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            success: normalize(success),
            challenge: normalize(challenge),
            error: normalize(error),
        }
    }

    /// Whether `text` reads like an unsubscribe confirmation.
    pub fn is_confirmation(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        contains_any(&text, &self.success) && !contains_any(&text, &self.error)
    }

    /// Whether `text` carries a challenge marker.
    pub fn is_challenge(&self, text: &str) -> bool {
        contains_any(&text.to_lowercase(), &self.challenge)
    }
}

fn normalize<I>(terms: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    terms
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn contains_any(haystack: &str, terms: &[String]) -> bool {
    terms.iter().any(|t| haystack.contains(t.as_str()))
}

/// Text used for confirmation matching: visible text for HTML, raw otherwise.
pub fn response_text(resp: &HttpResponse) -> String {
    if resp.is_html() {
        visible_text(&resp.body)
    } else {
        resp.body.clone()
    }
}

/// Classify one attempt of a mechanism of `kind`.
pub fn classify(kind: MechanismKind, result: &TransportResult, vocabulary: &Vocabulary) -> Outcome {
    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            return Outcome::Failed {
                error: e.to_string(),
            };
        }
    };

    // Challenge markers often live in markup (widget classes, script URLs),
    // so they are matched against the raw body.
    let challenged = vocabulary.is_challenge(&resp.body);

    if !resp.is_success_or_redirect() {
        if challenged {
            return Outcome::ManualRequired;
        }
        return Outcome::Failed {
            error: describe_status(resp),
        };
    }

    match kind {
        MechanismKind::OneClick | MechanismKind::HtmlForm if !challenged => Outcome::Success,
        MechanismKind::HeaderLink | MechanismKind::BodyLink
            if vocabulary.is_confirmation(&response_text(resp)) =>
        {
            Outcome::Success
        }
        _ if challenged => Outcome::ManualRequired,
        _ => Outcome::Attempted,
    }
}

/// Human-readable description of an unsuccessful HTTP status.
pub fn describe_status(resp: &HttpResponse) -> String {
    let reason = reqwest::StatusCode::from_u16(resp.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status");
    format!("HTTP {} {} from {}", resp.status, reason, resp.final_url)
}
