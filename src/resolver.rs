//! Identity resolution for servers, flavors, images and networks.
//!
//! Server lookups are always scoped by ownership: a server without the
//! caller's controller tag is indistinguishable from a missing one. Flavor,
//! image and network lookups accept a name or an identifier and return the
//! first match when several resources share a name.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::openstack::{
    ApiError, ComputeApi, Flavor, Image, ImageFilter, ManagedServer, Network,
};
use crate::scope::OwnershipScope;

/// Errors raised when a lookup does not yield exactly one resource.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// Nothing matched.
    #[error("failed to find {resource} with name or id {name_or_id}")]
    NotFound {
        /// Resource kind.
        resource: &'static str,
        /// Name or identifier that was looked up.
        name_or_id: String,
    },
    /// More than one server matched where one was required.
    #[error("multiple servers ({count}) with name or id {name_or_id}; manual intervention required")]
    Ambiguous {
        /// Name or identifier that was looked up.
        name_or_id: String,
        /// Number of matches.
        count: usize,
    },
    /// The remote API failed.
    #[error("failed to look up {resource} {name_or_id}: {source}")]
    Api {
        /// Resource kind.
        resource: &'static str,
        /// Name or identifier that was looked up.
        name_or_id: String,
        /// Underlying failure.
        source: ApiError,
    },
}

impl ResolveError {
    fn api(resource: &'static str, name_or_id: &str, source: ApiError) -> Self {
        Self::Api {
            resource,
            name_or_id: name_or_id.to_owned(),
            source,
        }
    }

    fn not_found(resource: &'static str, name_or_id: &str) -> Self {
        Self::NotFound {
            resource,
            name_or_id: name_or_id.to_owned(),
        }
    }
}

/// Returns true when `value` is a hyphenated UUID.
#[must_use]
pub fn is_canonical_id(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// Fetches a server by identifier, hiding it unless the scope's controller
/// owns it. A 404 yields `None`.
///
/// # Errors
///
/// Returns [`ApiError`] for any failure other than a 404.
pub async fn lookup_owned<C: ComputeApi + ?Sized>(
    api: &C,
    id: &str,
    scope: &OwnershipScope,
) -> Result<Option<ManagedServer>, ApiError> {
    match api.get_server(id).await {
        Ok(server) if scope.owns(&server.tags) => Ok(Some(server)),
        Ok(_) => {
            debug!(server_id = id, "server exists but is owned by another controller");
            Ok(None)
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Lists every server inside `scope`.
///
/// # Errors
///
/// Returns [`ApiError`] when the listing fails.
pub async fn list_scoped<C: ComputeApi + ?Sized>(
    api: &C,
    scope: &OwnershipScope,
) -> Result<Vec<ManagedServer>, ApiError> {
    let servers = api.list_servers(&scope.filter_tags()).await?;
    Ok(servers
        .into_iter()
        .filter(|server| scope.contains(&server.tags))
        .collect())
}

/// Resolves a name or identifier to every matching server inside `scope`.
///
/// Identifiers are looked up directly and checked against the controller
/// tag. Names are matched exactly against a scoped listing and may match
/// several servers.
///
/// # Errors
///
/// Returns [`ResolveError::Api`] when the remote API fails.
pub async fn resolve<C: ComputeApi + ?Sized>(
    api: &C,
    name_or_id: &str,
    scope: &OwnershipScope,
) -> Result<Vec<ManagedServer>, ResolveError> {
    if is_canonical_id(name_or_id) {
        return lookup_owned(api, name_or_id, scope)
            .await
            .map(|found| found.into_iter().collect())
            .map_err(|err| ResolveError::api("server", name_or_id, err));
    }
    let servers = list_scoped(api, scope)
        .await
        .map_err(|err| ResolveError::api("server", name_or_id, err))?;
    Ok(servers
        .into_iter()
        .filter(|server| server.name == name_or_id)
        .collect())
}

/// Resolves to exactly one server.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] when nothing matches,
/// [`ResolveError::Ambiguous`] when several servers match and
/// [`ResolveError::Api`] when the remote API fails.
pub async fn resolve_one<C: ComputeApi + ?Sized>(
    api: &C,
    name_or_id: &str,
    scope: &OwnershipScope,
) -> Result<ManagedServer, ResolveError> {
    let mut matches = resolve(api, name_or_id, scope).await?;
    match matches.len() {
        0 => Err(ResolveError::not_found("server", name_or_id)),
        1 => matches
            .pop()
            .ok_or_else(|| ResolveError::not_found("server", name_or_id)),
        count => Err(ResolveError::Ambiguous {
            name_or_id: name_or_id.to_owned(),
            count,
        }),
    }
}

/// Resolves a flavor by identifier, falling back to the first listed flavor
/// whose identifier or name matches.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] when nothing matches and
/// [`ResolveError::Api`] when the remote API fails.
pub async fn resolve_flavor<C: ComputeApi + ?Sized>(
    api: &C,
    name_or_id: &str,
) -> Result<Flavor, ResolveError> {
    match api.get_flavor(name_or_id).await {
        Ok(flavor) => return Ok(flavor),
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(ResolveError::api("flavor", name_or_id, err)),
    }
    api.list_flavors()
        .await
        .map_err(|err| ResolveError::api("flavor", name_or_id, err))?
        .into_iter()
        .find(|flavor| flavor.id == name_or_id || flavor.name == name_or_id)
        .ok_or_else(|| ResolveError::not_found("flavor", name_or_id))
}

/// Resolves an image. Identifiers are fetched directly; names are listed
/// with the visibility filter and the first match wins.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] when nothing matches and
/// [`ResolveError::Api`] when the remote API fails.
pub async fn resolve_image<C: ComputeApi + ?Sized>(
    api: &C,
    name_or_id: &str,
    visibility: Option<&str>,
) -> Result<Image, ResolveError> {
    if is_canonical_id(name_or_id) {
        return api.get_image(name_or_id).await.map_err(|err| {
            if err.is_not_found() {
                ResolveError::not_found("image", name_or_id)
            } else {
                ResolveError::api("image", name_or_id, err)
            }
        });
    }
    let filter = ImageFilter {
        name: Some(name_or_id.to_owned()),
        visibility: visibility.map(str::to_owned),
    };
    api.list_images(&filter)
        .await
        .map_err(|err| ResolveError::api("image", name_or_id, err))?
        .into_iter()
        .find(|image| image.id == name_or_id || image.name == name_or_id)
        .ok_or_else(|| ResolveError::not_found("image", name_or_id))
}

/// Resolves a network. Identifiers are fetched directly; otherwise the first
/// listed network whose identifier or name matches wins.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] when nothing matches and
/// [`ResolveError::Api`] when the remote API fails.
pub async fn resolve_network<C: ComputeApi + ?Sized>(
    api: &C,
    name_or_id: &str,
) -> Result<Network, ResolveError> {
    if is_canonical_id(name_or_id) {
        return api.get_network(name_or_id).await.map_err(|err| {
            if err.is_not_found() {
                ResolveError::not_found("network", name_or_id)
            } else {
                ResolveError::api("network", name_or_id, err)
            }
        });
    }
    api.list_networks(Some(name_or_id))
        .await
        .map_err(|err| ResolveError::api("network", name_or_id, err))?
        .into_iter()
        .find(|network| network.id == name_or_id || network.name == name_or_id)
        .ok_or_else(|| ResolveError::not_found("network", name_or_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openstack::ServerStatus;
    use crate::test_support::{Call, FakeCompute, owned_server};
    use rstest::{fixture, rstest};

    const ID_A: &str = "11111111-1111-4111-8111-111111111111";
    const ID_B: &str = "22222222-2222-4222-8222-222222222222";
    const ID_C: &str = "33333333-3333-4333-8333-333333333333";

    #[fixture]
    fn scope() -> OwnershipScope {
        OwnershipScope::controller("ctrl")
    }

    #[rstest]
    #[case(ID_A, true)]
    #[case("runner-1", false)]
    #[case("11111111111141118111111111111111", false)]
    #[case("11111111-1111-4111-8111-11111111111", false)]
    fn recognises_canonical_identifiers(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(is_canonical_id(value), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn identifier_uses_point_lookup(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.insert(owned_server(ID_A, "runner-1", "ctrl", "p1", ServerStatus::Active));
        let found = resolve(&fake, ID_A, &scope)
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(found.len(), 1);
        assert!(fake.calls().contains(&Call::GetServer(ID_A.to_owned())));
        assert!(!fake.calls().iter().any(|call| matches!(call, Call::ListServers(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn name_uses_scoped_listing(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.insert(owned_server(ID_A, "runner-1", "ctrl", "p1", ServerStatus::Active));
        fake.insert(owned_server(ID_B, "runner-2", "ctrl", "p1", ServerStatus::Active));
        let found = resolve(&fake, "runner-1", &scope)
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(found.len(), 1);
        assert_eq!(
            fake.calls(),
            vec![Call::ListServers(vec!["garm-controller-id=ctrl".to_owned()])]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn foreign_server_is_invisible_by_id(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.insert(owned_server(ID_A, "runner-1", "other", "p1", ServerStatus::Active));
        let found = resolve(&fake, ID_A, &scope)
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(found.is_empty());
        assert_eq!(
            resolve_one(&fake, ID_A, &scope).await,
            Err(ResolveError::NotFound {
                resource: "server",
                name_or_id: ID_A.to_owned(),
            })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn foreign_server_is_invisible_by_name(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.insert(owned_server(ID_A, "runner-1", "other", "p1", ServerStatus::Active));
        let found = resolve(&fake, "runner-1", &scope)
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(found.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn shared_names_are_ambiguous_without_pool(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.insert(owned_server(ID_A, "runner", "ctrl", "p1", ServerStatus::Active));
        fake.insert(owned_server(ID_B, "runner", "ctrl", "p2", ServerStatus::Active));

        let pooled = scope.clone().with_pool("p1");
        let one = resolve_one(&fake, "runner", &pooled)
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(one.id, ID_A);

        assert_eq!(
            resolve_one(&fake, "runner", &scope).await,
            Err(ResolveError::Ambiguous {
                name_or_id: "runner".to_owned(),
                count: 2,
            })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn listing_failure_is_wrapped(scope: OwnershipScope) {
        let fake = FakeCompute::new();
        fake.fail_listing(ApiError::Transport {
            operation: "list servers".to_owned(),
            message: "connection reset".to_owned(),
        });
        let err = resolve(&fake, "runner", &scope).await.err();
        assert!(matches!(err, Some(ResolveError::Api { resource: "server", .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn flavor_falls_back_to_first_name_match() {
        let fake = FakeCompute::new();
        fake.add_flavor(Flavor {
            id: "f-1".to_owned(),
            name: "m1.small".to_owned(),
        });
        fake.add_flavor(Flavor {
            id: "f-2".to_owned(),
            name: "m1.small".to_owned(),
        });
        let flavor = resolve_flavor(&fake, "m1.small")
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(flavor.id, "f-1");
        let direct = resolve_flavor(&fake, "f-2")
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(direct.id, "f-2");
    }

    #[rstest]
    #[tokio::test]
    async fn image_listing_carries_visibility() {
        let fake = FakeCompute::new();
        fake.add_image(Image {
            id: ID_C.to_owned(),
            name: "ubuntu".to_owned(),
            ..Image::default()
        });
        let image = resolve_image(&fake, "ubuntu", Some("public"))
            .await
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(image.id, ID_C);
        assert!(fake.calls().contains(&Call::ListImages(ImageFilter {
            name: Some("ubuntu".to_owned()),
            visibility: Some("public".to_owned()),
        })));
    }

    #[rstest]
    #[tokio::test]
    async fn missing_network_is_not_found() {
        let fake = FakeCompute::new();
        assert_eq!(
            resolve_network(&fake, "tenant-net").await,
            Err(ResolveError::NotFound {
                resource: "network",
                name_or_id: "tenant-net".to_owned(),
            })
        );
    }
}
