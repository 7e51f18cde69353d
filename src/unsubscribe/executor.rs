//! Strategy executors, one per mechanism kind, dispatched on the variant.

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::classifier::{Vocabulary, response_text};
use super::extractor::ONE_CLICK_POST_VALUE;
use super::form;
use super::transport::HttpTransport;
use super::types::{FormMethod, HtmlForm, Mechanism, MechanismKind, TransportResult};

/// What an executor actually did.
///
/// A link executor that recursed into a discovered form reports the form:
/// `kind` is `HtmlForm` and `url` is the page the form was found on.
#[derive(Debug, Clone)]
pub struct Execution {
    pub kind: MechanismKind,
    pub url: String,
    pub result: TransportResult,
}

/// Runs mechanisms against an `HttpTransport`.
#[derive(Clone)]
pub struct StrategyExecutor {
    transport: Arc<dyn HttpTransport>,
    vocabulary: Arc<Vocabulary>,
}

impl StrategyExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            transport,
            vocabulary,
        }
    }

    /// Execute one mechanism. Never fails: transport errors are in the result.
    pub async fn execute(&self, mechanism: &Mechanism) -> Execution {
        match mechanism {
            Mechanism::OneClick { url } => self.one_click(url).await,
            Mechanism::HeaderLink { url } => self.follow_link(MechanismKind::HeaderLink, url).await,
            Mechanism::BodyLink { url } => self.follow_link(MechanismKind::BodyLink, url).await,
            Mechanism::HtmlForm(form) => self.submit_form(form).await,
        }
    }

    async fn one_click(&self, url: &str) -> Execution {
        info!(url = %url, "Sending one-click unsubscribe POST");
        let (name, value) = ONE_CLICK_POST_VALUE
            .split_once('=')
            .unwrap_or((ONE_CLICK_POST_VALUE, ""));
        let fields = [(name.to_string(), value.to_string())];
        let result = self.transport.post_form(url, &fields).await;
        Execution {
            kind: MechanismKind::OneClick,
            url: url.to_string(),
            result,
        }
    }

    /// GET the link; if the page is an interstitial with an unsubscribe
    /// form, submit that form instead of stopping at the GET.
    ///
    /// A form naming the keyword is always submitted. The first-form
    /// fallback is skipped on pages that already read as a confirmation or
    /// show a challenge.
    async fn follow_link(&self, kind: MechanismKind, url: &str) -> Execution {
        info!(url = %url, kind = ?kind, "Following unsubscribe link");
        let result = self.transport.get(url, &[]).await;

        if let Ok(resp) = &result
            && resp.is_success_or_redirect()
            && resp.is_html()
        {
            let found = form::locate(&resp.body, &resp.final_url).or_else(|| {
                let settled = self.vocabulary.is_challenge(&resp.body)
                    || self.vocabulary.is_confirmation(&response_text(resp));
                if settled {
                    None
                } else {
                    form::locate_with_intent(&resp.body, &resp.final_url, true)
                }
            });
            if let Some(Mechanism::HtmlForm(found)) = found {
                debug!(action = %found.action, method = ?found.method, "Link page carries a form, submitting it");
                return self.submit_form(&found).await;
            }
        }

        Execution {
            kind,
            url: url.to_string(),
            result,
        }
    }

    async fn submit_form(&self, form: &HtmlForm) -> Execution {
        info!(
            action = %form.action,
            method = ?form.method,
            fields = form.fields.len(),
            "Submitting unsubscribe form"
        );
        let result = match form.method {
            FormMethod::Post => self.transport.post_form(&form.action, &form.fields).await,
            FormMethod::Get => {
                // Like a browser, a GET form replaces the action's query string.
                let action = match Url::parse(&form.action) {
                    Ok(mut u) => {
                        u.set_query(None);
                        u.to_string()
                    }
                    Err(_) => form.action.clone(),
                };
                self.transport.get(&action, &form.fields).await
            }
        };
        Execution {
            kind: MechanismKind::HtmlForm,
            url: form.page_url.clone(),
            result,
        }
    }
}
