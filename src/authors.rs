use std::collections::HashMap;

use crate::error::BridgeError;
use crate::forum::{ForumApi, Session};
use crate::models::{Author, AuthorId, ForumUser, Role};
use crate::store::{alias_partition, KvStore};

/// Per-course knobs for turning forum identities into display names.
#[derive(Debug, Clone, Default)]
pub struct DisplayPolicy {
    /// Suffix such as `@mit.edu` removed from identities.
    pub strip_domain: Option<String>,
    /// Base URL student names link to (`base + name`).
    pub profile_base_url: Option<String>,
}

impl DisplayPolicy {
    fn display_name(&self, identity: &str, alias: Option<&String>) -> String {
        let name = alias.map(String::as_str).unwrap_or(identity);
        match &self.strip_domain {
            Some(suffix) if !suffix.is_empty() => name.strip_suffix(suffix.as_str()).unwrap_or(name).to_string(),
            _ => name.to_string(),
        }
    }

    fn link(&self, role: Role, display: &str) -> Option<String> {
        let base = self.profile_base_url.as_deref().filter(|b| !b.is_empty())?;
        let linkable = role == Role::Student && !display.is_empty() && display.chars().all(char::is_alphanumeric);
        linkable.then(|| format!("{base}{display}"))
    }

    /// Resolve batch results: aliases are keyed by forum identity (email).
    pub fn resolve(
        &self,
        ids: &[AuthorId],
        users: Vec<ForumUser>,
        aliases: &HashMap<String, String>,
    ) -> HashMap<AuthorId, Author> {
        let mut by_id: HashMap<AuthorId, ForumUser> = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        ids.iter()
            .map(|id| {
                let author = match by_id.remove(id) {
                    Some(user) => {
                        let role = Role::from_forum(&user.role);
                        let display = self.display_name(&user.email, aliases.get(&user.email));
                        let link = self.link(role, &display);
                        Author::Known { id: id.clone(), display, role, link }
                    }
                    None => Author::Unknown,
                };
                (id.clone(), author)
            })
            .collect()
    }
}

/// Resolve every id with one `network.get_users` call and one batched alias
/// lookup. Ids the forum does not return map to [`Author::Unknown`].
pub async fn resolve_authors(
    forum: &dyn ForumApi,
    store: &dyn KvStore,
    session: &Session,
    course: &str,
    nid: &str,
    ids: &[AuthorId],
    policy: &DisplayPolicy,
) -> Result<HashMap<AuthorId, Author>, BridgeError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users = forum.get_users(session, nid, ids).await.map_err(BridgeError::Authors)?;
    let mut identities: Vec<String> = users.iter().map(|u| u.email.clone()).filter(|e| !e.is_empty()).collect();
    identities.sort();
    identities.dedup();
    let aliases = store.batch_get(&alias_partition(course), &identities).await?;
    tracing::debug!(course, requested = ids.len(), found = users.len(), aliases = aliases.len(), "resolved authors");
    Ok(policy.resolve(ids, users, &aliases))
}
