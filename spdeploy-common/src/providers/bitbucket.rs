//! Bitbucket URL rules.

use url::Url;

use crate::urls;

pub(crate) const API_URL: &str = "https://api.bitbucket.org/2.0";

/// `https://x-token-auth:<token>@<host>/<path>`, or
/// `https://<user>:<token>@<host>/<path>` when the configured URL
/// already carried a user component.
pub(crate) fn authenticated_url(repo_url: &str, token: &str) -> String {
    if let Some((host, path)) = urls::scp_like(repo_url) {
        return format!("https://x-token-auth:{token}@{host}/{path}");
    }
    let user = Url::parse(repo_url)
        .ok()
        .map(|u| u.username().to_string())
        .filter(|u| !u.is_empty());
    let userinfo = match user {
        Some(user) => format!("{user}:{token}"),
        None => format!("x-token-auth:{token}"),
    };
    super::insert_userinfo(repo_url, &userinfo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_url_uses_x_token_auth() {
        assert_eq!(
            authenticated_url("https://bitbucket.org/acme/site", "T"),
            "https://x-token-auth:T@bitbucket.org/acme/site"
        );
    }

    #[test]
    fn test_user_component_is_preserved() {
        assert_eq!(
            authenticated_url("https://alice@bitbucket.org/acme/site", "T"),
            "https://alice:T@bitbucket.org/acme/site"
        );
    }

    #[test]
    fn test_ssh_url_converted() {
        assert_eq!(
            authenticated_url("git@bitbucket.org:acme/site.git", "T"),
            "https://x-token-auth:T@bitbucket.org/acme/site.git"
        );
    }
}
