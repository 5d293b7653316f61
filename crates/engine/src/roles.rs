//! Role resolution.
//!
//! A step's role is resolved per workflow item into the set of eligible
//! principals. Static groups and container-scoped roles come from an
//! external [`RoleSource`]; assignee lists and the submitter resolve locally.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::definition::Role;
use crate::error::{AppError, AppResult};
use crate::model::{ContentItem, PrincipalId};

/// External directory of groups and container roles.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Members of a named group.
    async fn group_members(&self, group: &str) -> AppResult<BTreeSet<PrincipalId>>;

    /// Members holding `role` on a container.
    async fn container_role_members(
        &self,
        container_id: &str,
        role: &str,
        content: &ContentItem,
    ) -> AppResult<BTreeSet<PrincipalId>>;
}

/// Role source backed by a YAML file.
///
/// ```yaml
/// groups:
///   administrators: [admin]
///   editors: [bob, carol]
/// containers:
///   "123456789/4":
///     reviewer: [dave]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticRoleSource {
    #[serde(default)]
    pub groups: HashMap<String, BTreeSet<PrincipalId>>,

    #[serde(default)]
    pub containers: HashMap<String, HashMap<String, BTreeSet<PrincipalId>>>,
}

impl StaticRoleSource {
    pub fn from_yaml(content: &str) -> AppResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::Configuration(format!("invalid roles file: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("cannot read roles file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn with_group<I, S>(mut self, group: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(group.to_string(), members.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_container_role<I, S>(mut self, container_id: &str, role: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.containers
            .entry(container_id.to_string())
            .or_default()
            .insert(role.to_string(), members.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl RoleSource for StaticRoleSource {
    async fn group_members(&self, group: &str) -> AppResult<BTreeSet<PrincipalId>> {
        Ok(self.groups.get(group).cloned().unwrap_or_default())
    }

    async fn container_role_members(
        &self,
        container_id: &str,
        role: &str,
        _content: &ContentItem,
    ) -> AppResult<BTreeSet<PrincipalId>> {
        Ok(self
            .containers
            .get(container_id)
            .and_then(|roles| roles.get(role))
            .cloned()
            .unwrap_or_default())
    }
}

/// Resolves step roles and administrator rights.
#[derive(Clone)]
pub struct RoleResolver {
    source: Arc<dyn RoleSource>,
    admin_group: String,
}

impl RoleResolver {
    pub fn new(source: Arc<dyn RoleSource>, admin_group: impl Into<String>) -> Self {
        Self {
            source,
            admin_group: admin_group.into(),
        }
    }

    /// Eligible principals for a role on one item. Never cached.
    pub async fn resolve(
        &self,
        role: &Role,
        container_id: &str,
        content: &ContentItem,
    ) -> AppResult<BTreeSet<PrincipalId>> {
        let members = match role {
            Role::Group { group } => self.source.group_members(group).await?,
            Role::Container { role } => {
                self.source
                    .container_role_members(container_id, role, content)
                    .await?
            }
            Role::Assignees { principals } => principals.iter().cloned().collect(),
            Role::Submitter => BTreeSet::from([content.submitter.clone()]),
        };

        tracing::debug!(
            role = role.kind(),
            container_id = %container_id,
            members = members.len(),
            "Role resolved"
        );

        Ok(members)
    }

    pub async fn is_admin(&self, principal: &str) -> AppResult<bool> {
        Ok(self
            .source
            .group_members(&self.admin_group)
            .await?
            .contains(principal))
    }

    /// Fail with `Forbidden` unless the principal is an administrator.
    pub async fn authorize_admin(&self, principal: &str) -> AppResult<()> {
        if self.is_admin(principal).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "'{}' is not a member of '{}'",
                principal, self.admin_group
            )))
        }
    }
}

impl std::fmt::Debug for RoleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleResolver")
            .field("admin_group", &self.admin_group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RoleResolver {
        let source = StaticRoleSource::default()
            .with_group("administrators", ["admin"])
            .with_group("editors", ["bob", "carol"])
            .with_container_role("c1", "reviewer", ["dave"]);
        RoleResolver::new(Arc::new(source), "administrators")
    }

    #[tokio::test]
    async fn test_resolve_each_variant() {
        let resolver = resolver();
        let content = ContentItem::new("alice", None);

        let editors = resolver
            .resolve(&Role::Group { group: "editors".into() }, "c1", &content)
            .await
            .unwrap();
        assert_eq!(editors.len(), 2);

        let reviewers = resolver
            .resolve(&Role::Container { role: "reviewer".into() }, "c1", &content)
            .await
            .unwrap();
        assert!(reviewers.contains("dave"));

        let none = resolver
            .resolve(&Role::Container { role: "reviewer".into() }, "c2", &content)
            .await
            .unwrap();
        assert!(none.is_empty());

        let submitter = resolver.resolve(&Role::Submitter, "c1", &content).await.unwrap();
        assert_eq!(submitter, BTreeSet::from(["alice".to_string()]));

        let assignees = resolver
            .resolve(
                &Role::Assignees {
                    principals: vec!["erin".into(), "erin".into()],
                },
                "c1",
                &content,
            )
            .await
            .unwrap();
        assert_eq!(assignees.len(), 1);
    }

    #[tokio::test]
    async fn test_authorize_admin() {
        let resolver = resolver();
        assert!(resolver.authorize_admin("admin").await.is_ok());
        assert!(matches!(
            resolver.authorize_admin("bob").await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_static_source_from_yaml() {
        let source = StaticRoleSource::from_yaml(
            r#"
groups:
  editors: [bob]
containers:
  "123456789/4":
    reviewer: [dave, erin]
"#,
        )
        .unwrap();
        assert_eq!(source.containers["123456789/4"]["reviewer"].len(), 2);
        assert!(StaticRoleSource::from_yaml("groups: 12").is_err());
    }
}
