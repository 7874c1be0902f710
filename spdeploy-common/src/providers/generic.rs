//! Rules for generic git endpoints, Gitea, and Gogs.

use crate::urls;

/// `https://token:<token>@<host>/<path>`. SSH URLs are returned
/// unchanged; authentication there is the SSH agent's job.
pub(crate) fn authenticated_url(repo_url: &str, token: &str) -> String {
    if urls::scp_like(repo_url).is_some() || repo_url.starts_with("ssh://") {
        return repo_url.to_string();
    }
    super::insert_userinfo(repo_url, &format!("token:{token}"))
}
