//! GitLab URL rules.

use crate::urls;

pub(crate) const API_URL: &str = "https://gitlab.com/api/v4";

/// `https://oauth2:<token>@<host>/<path>` for any GitLab host.
pub(crate) fn authenticated_url(repo_url: &str, token: &str) -> String {
    if let Some((host, path)) = urls::scp_like(repo_url) {
        return format!("https://oauth2:{token}@{host}/{path}");
    }
    super::insert_userinfo(repo_url, &format!("oauth2:{token}"))
}
