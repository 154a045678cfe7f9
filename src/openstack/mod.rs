//! Remote OpenStack API surface consumed by the provider.
//!
//! [`ComputeApi`] is the seam between the orchestration logic and the cloud:
//! the reqwest-backed [`OpenStackClient`] implements it for real clouds and
//! [`crate::test_support::FakeCompute`] implements it in tests.

mod client;
mod error;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use client::{OpenStackClient, ServiceEndpoints, NOVA_MICROVERSION};
pub use error::ApiError;
pub use types::{
    BlockDevice, Flavor, Image, ImageFilter, ManagedServer, Network, ServerCreateRequest,
    ServerStatus,
};

/// Future returned by remote API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Compute, image and network operations the provider relies on.
///
/// Implementations must be safe to share between concurrent calls; they keep
/// no per-server state between invocations.
pub trait ComputeApi: Send + Sync {
    /// Fetches a single server by identifier. A missing server yields
    /// [`ApiError::NotFound`].
    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ManagedServer>;

    /// Lists servers carrying every tag in `tags`.
    fn list_servers<'a>(&'a self, tags: &'a [String]) -> ApiFuture<'a, Vec<ManagedServer>>;

    /// Submits a server build and returns the identifier the cloud assigned.
    ///
    /// When the cloud acknowledged the build but the call still failed,
    /// implementations report [`ApiError::Incomplete`] so the caller can
    /// clean up the partial server.
    fn create_server<'a>(&'a self, request: &'a ServerCreateRequest) -> ApiFuture<'a, String>;

    /// Force-deletes a server.
    fn force_delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Powers a server on.
    fn start_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Powers a server off.
    fn stop_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()>;

    /// Fetches a flavor by identifier.
    fn get_flavor<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Flavor>;

    /// Lists every flavor visible to the project.
    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>>;

    /// Fetches an image by identifier.
    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Image>;

    /// Lists images matching `filter`.
    fn list_images<'a>(&'a self, filter: &'a ImageFilter) -> ApiFuture<'a, Vec<Image>>;

    /// Fetches a network by identifier.
    fn get_network<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Network>;

    /// Lists networks, optionally filtered by exact name.
    fn list_networks<'a>(&'a self, name: Option<&'a str>) -> ApiFuture<'a, Vec<Network>>;
}
