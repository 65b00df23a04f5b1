/// URL comparison helpers for pinned slots
use url::Url;

/// Lowercased hostname of a URL, without port.
pub fn hostname(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.to_lowercase()))
        .filter(|h| !h.is_empty())
}

/// The URL with its query string and fragment removed.
///
/// Falls back to plain string splitting for values the parser rejects
/// (e.g. bare `about:` style strings that still carry `?` or `#`).
pub fn strip_query_and_fragment(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url
            .trim()
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Two URLs point at the same page when scheme, host, port and path agree.
/// Query and fragment are ignored, as is a single trailing slash on the path.
pub fn same_origin_and_path(a: &str, b: &str) -> bool {
    match (Url::parse(a.trim()), Url::parse(b.trim())) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str().map(str::to_lowercase) == b.host_str().map(str::to_lowercase)
                && a.port_or_known_default() == b.port_or_known_default()
                && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        }
        _ => strip_query_and_fragment(a) == strip_query_and_fragment(b),
    }
}

/// True when a pinned tab's live URL no longer matches its anchor.
pub fn has_navigated_away(current_url: &str, pinned_url: &str) -> bool {
    !current_url.is_empty() && !same_origin_and_path(current_url, pinned_url)
}

/// Subtitle shown under a pinned row that left its anchor: the live host,
/// only when it differs from the pinned host.
pub fn domain_subtitle(current_url: &str, pinned_url: &str) -> Option<String> {
    if !has_navigated_away(current_url, pinned_url) {
        return None;
    }
    let current = hostname(current_url)?;
    match hostname(pinned_url) {
        Some(pinned) if pinned == current => None,
        _ => Some(current),
    }
}
