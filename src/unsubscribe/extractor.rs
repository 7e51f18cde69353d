//! Mechanism extraction from message headers and body.
//!
//! Pure parsing over already-fetched content; no network access happens
//! here. Malformed input degrades to "no mechanism", never to an error.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::types::{Mechanism, MessageMetadata};

/// The only `List-Unsubscribe-Post` value that enables RFC 8058 one-click.
pub const ONE_CLICK_POST_VALUE: &str = "List-Unsubscribe=One-Click";

static ANGLE_URI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\s*([^<>]+?)\s*>").unwrap());

/// All URIs in a `List-Unsubscribe` value, in header order.
pub fn list_unsubscribe_uris(header: &str) -> Vec<String> {
    ANGLE_URI
        .captures_iter(header)
        .map(|c| c[1].split_whitespace().collect::<String>())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Whether `List-Unsubscribe-Post` signals one-click support.
pub fn signals_one_click(post_header: Option<&str>) -> bool {
    post_header.is_some_and(|v| v.trim().eq_ignore_ascii_case(ONE_CLICK_POST_VALUE))
}

fn is_https(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|u| u.scheme() == "https" && u.host_str().is_some())
}

/// Ordered candidate mechanisms for a message, highest priority first.
///
/// Relative body links are resolved against `base_url`.
pub fn extract(metadata: &MessageMetadata, base_url: Option<&str>) -> Vec<Mechanism> {
    let mut mechanisms = Vec::new();

    let header_uris: Vec<String> = metadata
        .list_unsubscribe
        .as_deref()
        .map(list_unsubscribe_uris)
        .unwrap_or_default()
        .into_iter()
        .filter(|u| is_https(u))
        .collect();

    if let Some(first) = header_uris.first()
        && signals_one_click(metadata.list_unsubscribe_post.as_deref())
    {
        mechanisms.push(Mechanism::OneClick { url: first.clone() });
    }

    for url in &header_uris {
        mechanisms.push(Mechanism::HeaderLink { url: url.clone() });
    }

    if let Some(html) = metadata.html_body.as_deref()
        && let Some(url) = find_body_link(html, base_url)
    {
        if header_uris.contains(&url) {
            debug!(url = %url, "Body link duplicates a header link, skipping");
        } else {
            mechanisms.push(Mechanism::BodyLink { url });
        }
    }

    debug!(count = mechanisms.len(), "Extracted unsubscribe mechanisms");
    mechanisms
}

/// First `mailto:` target in `List-Unsubscribe`, for manual follow-up.
pub fn first_mailto(metadata: &MessageMetadata) -> Option<String> {
    metadata
        .list_unsubscribe
        .as_deref()
        .map(list_unsubscribe_uris)?
        .into_iter()
        .find(|u| u.to_ascii_lowercase().starts_with("mailto:"))
}

/// The first anchor mentioning "unsubscribe" that resolves to an absolute
/// http(s) URL. Anchors with other schemes (mailto, javascript) are passed over.
pub fn find_body_link(html: &str, base_url: Option<&str>) -> Option<String> {
    let base = base_url.and_then(|b| Url::parse(b).ok());
    unsubscribe_hrefs(html)
        .into_iter()
        .find_map(|href| resolve_http_url(&href, base.as_ref()))
}

/// Raw `href` of the first anchor whose text or href mentions "unsubscribe".
pub fn first_unsubscribe_href(html: &str) -> Option<String> {
    unsubscribe_hrefs(html).into_iter().next()
}

/// Raw `href`s of every anchor whose text or href mentions "unsubscribe", in document order.
fn unsubscribe_hrefs(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    doc.select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            let text = anchor.text().collect::<String>().to_lowercase();
            (href.to_lowercase().contains("unsubscribe") || text.contains("unsubscribe"))
                .then(|| href.to_string())
        })
        .collect()
}

/// Resolve `href` to an absolute http(s) URL, optionally against `base`.
pub(crate) fn resolve_http_url(href: &str, base: Option<&Url>) -> Option<String> {
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unsubscribe::types::MechanismKind;

    fn meta(list: Option<&str>, post: Option<&str>, html: Option<&str>) -> MessageMetadata {
        MessageMetadata {
            list_unsubscribe: list.map(str::to_string),
            list_unsubscribe_post: post.map(str::to_string),
            html_body: html.map(str::to_string),
        }
    }

    fn kinds(m: &[Mechanism]) -> Vec<MechanismKind> {
        m.iter().map(Mechanism::kind).collect()
    }

    #[test]
    fn one_click_comes_first_when_both_signals_present() {
        let m = extract(
            &meta(
                Some("<mailto:u@x.example>, <https://x.example/u?id=1>"),
                Some("List-Unsubscribe=One-Click"),
                None,
            ),
            None,
        );
        assert_eq!(kinds(&m), vec![MechanismKind::OneClick, MechanismKind::HeaderLink]);
        assert_eq!(m[0].target_url(), "https://x.example/u?id=1");
    }

    #[test]
    fn post_header_alone_does_not_emit_one_click() {
        let m = extract(
            &meta(Some("<mailto:u@x.example>"), Some("List-Unsubscribe=One-Click"), None),
            None,
        );
        assert!(m.is_empty());
    }

    #[test]
    fn header_links_keep_header_order_and_skip_non_https() {
        let m = extract(
            &meta(
                Some("<https://a.example/1>, <http://b.example/2>,\r\n <https://c.example/3>"),
                None,
                None,
            ),
            None,
        );
        let urls: Vec<&str> = m.iter().map(Mechanism::target_url).collect();
        assert_eq!(urls, vec!["https://a.example/1", "https://c.example/3"]);
        assert!(m.iter().all(|x| x.kind() == MechanismKind::HeaderLink));
    }

    #[test]
    fn wrong_post_value_is_not_one_click() {
        assert!(!signals_one_click(Some("List-Unsubscribe=Yes")));
        assert!(signals_one_click(Some("  list-unsubscribe=one-click ")));
        assert!(!signals_one_click(None));
    }

    #[test]
    fn body_link_matches_text_or_href() {
        let html = r#"<p><a href="https://x.example/home">Home</a>
            <a href="https://x.example/prefs">Unsubscribe here</a>
            <a href="https://x.example/unsubscribe">later</a></p>"#;
        let m = extract(&meta(None, None, Some(html)), None);
        assert_eq!(m, vec![Mechanism::BodyLink { url: "https://x.example/prefs".into() }]);

        let html = r#"<a href="https://x.example/UNSUBSCRIBE?u=9">opt out</a>"#;
        assert_eq!(
            find_body_link(html, None).as_deref(),
            Some("https://x.example/UNSUBSCRIBE?u=9")
        );
    }

    #[test]
    fn relative_body_link_resolves_against_base() {
        let html = r#"<a href="/unsub?id=3">unsubscribe</a>"#;
        assert_eq!(
            find_body_link(html, Some("https://news.example/mail/")).as_deref(),
            Some("https://news.example/unsub?id=3")
        );
        assert_eq!(find_body_link(html, None), None);
    }

    #[test]
    fn mailto_body_links_are_ignored() {
        let html = r#"<a href="mailto:leave@x.example">unsubscribe</a>"#;
        assert_eq!(find_body_link(html, None), None);
    }

    #[test]
    fn https_anchor_after_mailto_anchor_is_used() {
        let html = r#"<p><a href="mailto:leave@x.example">Unsubscribe by email</a>
            or <a href="https://x.example/unsubscribe?u=4">unsubscribe online</a></p>"#;
        let m = extract(&meta(None, None, Some(html)), None);
        assert_eq!(
            m,
            vec![Mechanism::BodyLink {
                url: "https://x.example/unsubscribe?u=4".into()
            }]
        );
        assert_eq!(first_unsubscribe_href(html).as_deref(), Some("mailto:leave@x.example"));
    }

    #[test]
    fn malformed_html_degrades_to_nothing() {
        let m = extract(&meta(Some("garbage without brackets"), None, Some("<a <<< href")), None);
        assert!(m.is_empty());
    }

    #[test]
    fn body_link_duplicating_header_is_dropped() {
        let html = r#"<a href="https://x.example/u?id=1">unsubscribe</a>"#;
        let m = extract(&meta(Some("<https://x.example/u?id=1>"), None, Some(html)), None);
        assert_eq!(kinds(&m), vec![MechanismKind::HeaderLink]);
    }

    #[test]
    fn first_mailto_is_found() {
        let md = meta(Some("<mailto:leave@x.example?subject=unsub>, <https://x.example/u>"), None, None);
        assert_eq!(first_mailto(&md).as_deref(), Some("mailto:leave@x.example?subject=unsub"));
    }
}
