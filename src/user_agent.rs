//! Default User-Agent for segment requests.
//!
//! Video CDNs commonly reject non-browser agents, so transfers default to a
//! desktop browser string. Callers can override it per engine or per request.

/// Desktop browser User-Agent sent when the caller supplies none.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";

/// Default User-Agent for transfer requests.
#[must_use]
pub(crate) fn default_user_agent() -> &'static str {
    BROWSER_USER_AGENT
}
