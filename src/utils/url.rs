//! Joining configured base URLs with endpoint paths.
//!
//! Base URLs come from config files and environment variables, so they may
//! or may not carry a trailing slash.

/// Strip trailing slashes from a base URL.
///
/// ```
/// use askdocs::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/"), "http://localhost:8000");
/// assert_eq!(normalize_base_url("https://x.supabase.co///"), "https://x.supabase.co");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join `endpoint` onto `base_url` with exactly one slash between them.
///
/// ```
/// use askdocs::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000/", "/api/v1/query/stream"),
///     "http://localhost:8000/api/v1/query/stream"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("http://localhost:8000"),
            "http://localhost:8000"
        );
        assert_eq!(
            normalize_base_url("https://generativelanguage.googleapis.com/v1beta/"),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn test_construct_api_url() {
        assert_eq!(
            construct_api_url("http://localhost:8000", "api/v1/query"),
            "http://localhost:8000/api/v1/query"
        );
        assert_eq!(
            construct_api_url("https://x.supabase.co/", "///rest/v1/chats"),
            "https://x.supabase.co/rest/v1/chats"
        );
        assert_eq!(
            construct_api_url("https://api.openai.com/v1//", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
