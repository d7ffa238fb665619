pub mod unraid;
pub mod wecom;

/// Joins an API base URL and a relative path with exactly one slash.
pub(crate) fn build_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
