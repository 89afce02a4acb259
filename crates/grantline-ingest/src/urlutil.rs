//! URL canonicalization and domain extraction.

use url::Url;

/// Query parameters removed exactly by name during canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_cid", "mc_eid", "mkt_tok", "ref", "session", "s_cid",
];

/// Canonicalize a URL for identity purposes: lowercase host, drop the
/// fragment, and remove tracking query parameters (`utm_*` prefixes plus an
/// exact-name list). Unparseable input is returned unchanged.
///
/// Idempotent: `canonicalize_url(canonicalize_url(u)) == canonicalize_url(u)`.
pub fn canonicalize_url(raw_url: &str) -> String {
    let Ok(mut u) = Url::parse(raw_url) else {
        return raw_url.to_string();
    };

    u.set_fragment(None);

    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        u.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        u.set_query(Some(&serializer.finish()));
    }

    u.to_string()
}

/// Extract the host of a URL, or empty when unparseable.
pub fn extract_domain(raw_url: &str) -> String {
    Url::parse(raw_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Resolve a possibly-relative href against a base URL.
pub fn resolve_reference(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params_and_fragment() {
        let out = canonicalize_url(
            "https://Example.com/call?utm_source=x&utm_medium=y&id=7&fbclid=abc#section",
        );
        assert_eq!(out, "https://example.com/call?id=7");
    }

    #[test]
    fn lowercases_host() {
        assert_eq!(
            canonicalize_url("https://GOB.PE/convocatoria"),
            "https://gob.pe/convocatoria"
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize_url("https://example.com/a?ref=z&q=grants#frag");
        assert_eq!(canonicalize_url(&once), once);
    }

    #[test]
    fn unparseable_input_passes_through() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn extracts_domain() {
        assert_eq!(extract_domain("https://www.grants.gov/x/y"), "www.grants.gov");
        assert_eq!(extract_domain("nope"), "");
    }

    #[test]
    fn resolves_relative_hrefs() {
        assert_eq!(
            resolve_reference("https://example.com/list/page1", "../docs/bases.pdf").as_deref(),
            Some("https://example.com/docs/bases.pdf")
        );
    }
}
