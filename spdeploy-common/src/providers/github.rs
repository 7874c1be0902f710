//! GitHub URL rules.

use crate::urls;

pub(crate) const API_URL: &str = "https://api.github.com";

/// `https://<token>@<host>/<path>`; SSH URLs are rewritten to that HTTPS
/// form when a token is in play.
pub(crate) fn authenticated_url(repo_url: &str, token: &str) -> String {
    if let Some((host, path)) = urls::scp_like(repo_url) {
        return format!("https://{token}@{host}/{path}");
    }
    super::insert_userinfo(repo_url, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_url_gets_bare_token() {
        assert_eq!(
            authenticated_url("https://github.com/acme/private", "T"),
            "https://T@github.com/acme/private"
        );
    }

    #[test]
    fn test_ssh_url_converted_to_https() {
        assert_eq!(
            authenticated_url("git@github.com:acme/private.git", "T"),
            "https://T@github.com/acme/private.git"
        );
    }

    #[test]
    fn test_existing_credentials_replaced() {
        assert_eq!(
            authenticated_url("https://old@github.com/acme/private", "T"),
            "https://T@github.com/acme/private"
        );
    }
}
