//! Default User-Agent string for download and cache-probe traffic.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/segfetch";

/// Default User-Agent for download requests (identifies the tool).
///
/// A `User-Agent` present in a task's header set takes precedence.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("segfetch/{version} (segmented-downloader; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_download_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("segfetch/")
                .and_then(|s| s.split(' ').next())
                .expect("UA has version"),
        );
    }
}
