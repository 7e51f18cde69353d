//! HTML form locator.
//!
//! Finds a plausible unsubscribe form on a fetched page and decodes it into
//! an `HtmlForm` mechanism: absolute action URL, method, and every field
//! with its declared default (hidden tokens included, echoed back as-is).

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::extractor::resolve_http_url;
use super::types::{FormMethod, HtmlForm, Mechanism};

const KEYWORD: &str = "unsubscribe";

/// Input types that never contribute a field.
const SKIPPED_INPUT_TYPES: &[&str] = &["submit", "button", "image", "reset", "file"];

/// Locate a qualifying unsubscribe form in `html` fetched from `page_url`.
pub fn locate(html: &str, page_url: &str) -> Option<Mechanism> {
    locate_with_intent(html, page_url, false)
}

/// Like [`locate`], but when `intent` is set (the page was reached through an
/// unsubscribe link) the first usable form is accepted if none mentions the
/// keyword.
pub fn locate_with_intent(html: &str, page_url: &str, intent: bool) -> Option<Mechanism> {
    let doc = Html::parse_document(html);
    let form_sel = Selector::parse("form").ok()?;
    let page = Url::parse(page_url).ok();

    let mut fallback = None;
    for (i, form) in doc.select(&form_sel).enumerate() {
        let Some(decoded) = decode_form(form, page_url, page.as_ref()) else {
            debug!(form = i, "Form has an unusable action, skipping");
            continue;
        };
        if qualifies(form) {
            debug!(form = i, action = %decoded.action, "Selected unsubscribe form");
            return Some(Mechanism::HtmlForm(decoded));
        }
        if intent && fallback.is_none() {
            fallback = Some(decoded);
        }
    }

    if let Some(form) = &fallback {
        debug!(action = %form.action, "No keyword form, falling back to first form");
    }
    fallback.map(Mechanism::HtmlForm)
}

/// A form qualifies when its action or a submit control's label mentions the keyword.
fn qualifies(form: ElementRef<'_>) -> bool {
    let action = form.value().attr("action").unwrap_or_default();
    if action.to_lowercase().contains(KEYWORD) {
        return true;
    }
    submit_controls(form).any(|(_, label)| label.to_lowercase().contains(KEYWORD))
}

/// Submit controls and their visible labels.
fn submit_controls(form: ElementRef<'_>) -> impl Iterator<Item = (ElementRef<'_>, String)> {
    let selector = Selector::parse("input, button").ok();
    selector
        .map(|sel| form.select(&sel).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|el| {
            let ty = el.value().attr("type").unwrap_or_default().to_ascii_lowercase();
            match el.value().name() {
                "input" if ty == "submit" || ty == "image" => {
                    let label = el
                        .value()
                        .attr("value")
                        .or_else(|| el.value().attr("alt"))
                        .unwrap_or_default();
                    Some((el, label.to_string()))
                }
                "button" if ty.is_empty() || ty == "submit" => {
                    let mut label = el.text().collect::<String>();
                    if let Some(value) = el.value().attr("value") {
                        label.push(' ');
                        label.push_str(value);
                    }
                    Some((el, label))
                }
                _ => None,
            }
        })
}

fn decode_form(form: ElementRef<'_>, page_url: &str, page: Option<&Url>) -> Option<HtmlForm> {
    let action = form.value().attr("action").map(str::trim).unwrap_or_default();
    let action = if action.is_empty() {
        resolve_http_url(page_url, None)?
    } else {
        resolve_http_url(action, page)?
    };

    let method = match form.value().attr("method") {
        Some(m) if m.trim().eq_ignore_ascii_case("post") => FormMethod::Post,
        _ => FormMethod::Get,
    };

    let mut fields = collect_fields(form);

    // A named submit control that mentions the keyword is what a user would click.
    if let Some((el, _)) = submit_controls(form).find(|(_, l)| l.to_lowercase().contains(KEYWORD))
        && let Some(name) = el.value().attr("name").filter(|n| !n.is_empty())
    {
        let value = el.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    Some(HtmlForm {
        page_url: page_url.to_string(),
        action,
        method,
        fields,
    })
}

/// Every named input-like field, in document order, with its default value.
fn collect_fields(form: ElementRef<'_>) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("input, select, textarea") else {
        return Vec::new();
    };
    let option_sel = Selector::parse("option").ok();

    let mut fields = Vec::new();
    for el in form.select(&selector) {
        let attrs = el.value();
        let Some(name) = attrs.attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if attrs.attr("disabled").is_some() {
            continue;
        }
        let value = match attrs.name() {
            "input" => {
                let ty = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
                if SKIPPED_INPUT_TYPES.contains(&ty.as_str()) {
                    continue;
                }
                if (ty == "checkbox" || ty == "radio") && attrs.attr("checked").is_none() {
                    continue;
                }
                let default = if ty == "checkbox" || ty == "radio" { "on" } else { "" };
                attrs.attr("value").unwrap_or(default).to_string()
            }
            "select" => {
                let options: Vec<ElementRef<'_>> = option_sel
                    .as_ref()
                    .map(|s| el.select(s).collect())
                    .unwrap_or_default();
                let chosen = options
                    .iter()
                    .find(|o| o.value().attr("selected").is_some())
                    .or(options.first());
                match chosen {
                    Some(o) => o
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| o.text().collect::<String>().trim().to_string()),
                    None => continue,
                }
            }
            "textarea" => el.text().collect::<String>(),
            _ => continue,
        };
        fields.push((name.to_string(), value));
    }
    fields
}

/// Visible text of an HTML document (title included, script and style dropped).
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}
