//! Shared User-Agent string for export API traffic.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/export-tally";

/// Default User-Agent for discovery and stream requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("export-tally/{version} (+{PROJECT_UA_URL})")
}
