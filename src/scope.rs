//! Ownership scope and the tag convention that encodes it on servers.
//!
//! Every server this provider creates carries `garm-controller-id=<id>` and
//! `garm-pool-id=<id>` tags. Lookups only ever see servers whose controller
//! tag equals the scope's controller identity.

/// Tag key recording the owning controller.
pub const CONTROLLER_TAG_KEY: &str = "garm-controller-id";

/// Tag key recording the owning pool.
pub const POOL_TAG_KEY: &str = "garm-pool-id";

/// Formats a controller-identity tag.
#[must_use]
pub fn controller_tag(controller_id: &str) -> String {
    format!("{CONTROLLER_TAG_KEY}={controller_id}")
}

/// Formats a pool-identity tag.
#[must_use]
pub fn pool_tag(pool_id: &str) -> String {
    format!("{POOL_TAG_KEY}={pool_id}")
}

/// Controller and optional pool identity used to scope lookups.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnershipScope {
    controller_id: String,
    pool_id: Option<String>,
}

impl OwnershipScope {
    /// Scope covering every server owned by the controller.
    #[must_use]
    pub fn controller(controller_id: impl Into<String>) -> Self {
        Self {
            controller_id: controller_id.into(),
            pool_id: None,
        }
    }

    /// Narrows the scope to a single pool. An empty pool identity leaves the
    /// scope controller-wide.
    #[must_use]
    pub fn with_pool(mut self, pool_id: impl Into<String>) -> Self {
        let pool = pool_id.into();
        self.pool_id = (!pool.is_empty()).then_some(pool);
        self
    }

    /// Controller identity.
    #[must_use]
    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    /// Pool identity, when the scope is pool-wide.
    #[must_use]
    pub fn pool_id(&self) -> Option<&str> {
        self.pool_id.as_deref()
    }

    /// Tags a listing must be filtered by to stay inside this scope.
    #[must_use]
    pub fn filter_tags(&self) -> Vec<String> {
        let mut tags = vec![controller_tag(&self.controller_id)];
        if let Some(pool) = &self.pool_id {
            tags.push(pool_tag(pool));
        }
        tags
    }

    /// Returns true when `tags` carries this scope's controller tag.
    #[must_use]
    pub fn owns(&self, tags: &[String]) -> bool {
        let expected = controller_tag(&self.controller_id);
        tags.iter().any(|tag| *tag == expected)
    }

    /// Returns true when `tags` satisfies both the controller and, if set,
    /// the pool constraint.
    #[must_use]
    pub fn contains(&self, tags: &[String]) -> bool {
        if !self.owns(tags) {
            return false;
        }
        self.pool_id.as_deref().is_none_or(|pool| {
            let expected = pool_tag(pool);
            tags.iter().any(|tag| *tag == expected)
        })
    }
}
