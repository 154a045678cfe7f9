//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::openstack::{
    ApiError, ApiFuture, ComputeApi, Flavor, Image, ImageFilter, ManagedServer, Network,
    ServerCreateRequest, ServerStatus,
};
use crate::params::{RunnerApplicationDownload, UserDataOptions};
use crate::scope::{controller_tag, pool_tag};
use crate::userdata::{CloudConfigRenderer, ToolFetcher, UserDataError, UserDataRequest};

/// Records a single call made through [`FakeCompute`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// `get_server(id)`
    GetServer(String),
    /// `list_servers(tags)`
    ListServers(Vec<String>),
    /// `create_server` for the named server.
    CreateServer(String),
    /// `force_delete_server(id)`
    ForceDelete(String),
    /// `start_server(id)`
    Start(String),
    /// `stop_server(id)`
    Stop(String),
    /// `get_flavor(id)`
    GetFlavor(String),
    /// `list_flavors()`
    ListFlavors,
    /// `get_image(id)`
    GetImage(String),
    /// `list_images(filter)`
    ListImages(ImageFilter),
    /// `get_network(id)`
    GetNetwork(String),
    /// `list_networks(name)`
    ListNetworks(Option<String>),
}

/// How the next `create_server` call behaves.
#[derive(Clone, Debug)]
enum CreatePlan {
    Succeed,
    Fail(ApiError),
    FailLeavingServer(ApiError),
}

#[derive(Debug)]
struct FakeState {
    servers: Vec<ManagedServer>,
    scripts: BTreeMap<String, VecDeque<Option<ServerStatus>>>,
    created_script: Vec<Option<ServerStatus>>,
    create_plan: CreatePlan,
    created: Vec<ServerCreateRequest>,
    next_id: u64,
    listing_failure: Option<ApiError>,
    delete_failure: Option<ApiError>,
    flavors: Vec<Flavor>,
    images: Vec<Image>,
    networks: Vec<Network>,
    calls: Vec<Call>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            scripts: BTreeMap::new(),
            created_script: Vec::new(),
            create_plan: CreatePlan::Succeed,
            created: Vec::new(),
            next_id: 1,
            listing_failure: None,
            delete_failure: None,
            flavors: Vec::new(),
            images: Vec::new(),
            networks: Vec::new(),
            calls: Vec::new(),
        }
    }
}

impl FakeState {
    fn position(&self, id: &str) -> Option<usize> {
        self.servers.iter().position(|server| server.id == id)
    }

    fn advance(&mut self, id: &str) {
        let Some(step) = self.scripts.get_mut(id).and_then(VecDeque::pop_front) else {
            return;
        };
        match step {
            Some(status) => {
                if let Some(server) = self.servers.iter_mut().find(|server| server.id == id) {
                    server.status = status;
                }
            }
            None => self.servers.retain(|server| server.id != id),
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("00000000-0000-4000-8000-{:012}", self.next_id);
        self.next_id += 1;
        id
    }

    fn server_from_request(&mut self, request: &ServerCreateRequest) -> ManagedServer {
        let id = self.allocate_id();
        let status = if self.created_script.is_empty() {
            ServerStatus::Active
        } else {
            ServerStatus::Build
        };
        if !self.created_script.is_empty() {
            self.scripts
                .insert(id.clone(), self.created_script.iter().copied().collect());
        }
        ManagedServer {
            id,
            name: request.name.clone(),
            status,
            tags: request.tags.clone(),
            metadata: request.metadata.clone(),
            ..ManagedServer::default()
        }
    }
}

/// In-memory [`ComputeApi`] that honours tag filters and records every call.
///
/// Status transitions are scripted per server: each `get_server` call pops
/// the next step, where `None` removes the server. A forced delete removes
/// the server at once unless scripted steps remain, in which case it moves
/// to `DELETING` and the script decides when it disappears.
#[derive(Clone, Debug, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCompute {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a server.
    pub fn insert(&self, server: ManagedServer) {
        self.state().servers.push(server);
    }

    /// Scripts the statuses observed by successive `get_server` calls.
    pub fn script(&self, id: &str, steps: impl IntoIterator<Item = Option<ServerStatus>>) {
        self.state()
            .scripts
            .insert(id.to_owned(), steps.into_iter().collect());
    }

    /// Scripts the statuses observed for servers created from now on. Created
    /// servers start in `BUILD` when a script is set and `ACTIVE` otherwise.
    pub fn script_created(&self, steps: impl IntoIterator<Item = Option<ServerStatus>>) {
        self.state().created_script = steps.into_iter().collect();
    }

    /// Makes `create_server` fail without leaving a server behind.
    pub fn fail_create(&self, err: ApiError) {
        self.state().create_plan = CreatePlan::Fail(err);
    }

    /// Makes `create_server` fail after the server was recorded.
    ///
    /// An [`ApiError::Incomplete`] carrying an empty identifier is rewritten
    /// to carry the fabricated server's identifier.
    pub fn fail_create_leaving_server(&self, err: ApiError) {
        self.state().create_plan = CreatePlan::FailLeavingServer(err);
    }

    /// Makes every listing fail.
    pub fn fail_listing(&self, err: ApiError) {
        self.state().listing_failure = Some(err);
    }

    /// Makes `force_delete_server` fail.
    pub fn fail_delete(&self, err: ApiError) {
        self.state().delete_failure = Some(err);
    }

    /// Adds a flavor.
    pub fn add_flavor(&self, flavor: Flavor) {
        self.state().flavors.push(flavor);
    }

    /// Adds an image.
    pub fn add_image(&self, image: Image) {
        self.state().images.push(image);
    }

    /// Adds a network.
    pub fn add_network(&self, network: Network) {
        self.state().networks.push(network);
    }

    /// Snapshot of every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Build requests received so far.
    #[must_use]
    pub fn created(&self) -> Vec<ServerCreateRequest> {
        self.state().created.clone()
    }

    /// Snapshot of the servers currently present.
    #[must_use]
    pub fn servers(&self) -> Vec<ManagedServer> {
        self.state().servers.clone()
    }

    /// Current status of a server, if it exists.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<ServerStatus> {
        self.state()
            .servers
            .iter()
            .find(|server| server.id == id)
            .map(|server| server.status)
    }

    fn record(&self, call: Call) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    fn power(&self, call: Call, id: &str, status: ServerStatus) -> Result<(), ApiError> {
        let mut state = self.record(call);
        let server = state
            .servers
            .iter_mut()
            .find(|server| server.id == id)
            .ok_or_else(|| ApiError::not_found("server", id))?;
        server.status = status;
        Ok(())
    }
}

impl ComputeApi for FakeCompute {
    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ManagedServer> {
        Box::pin(async move {
            let mut state = self.record(Call::GetServer(id.to_owned()));
            state.advance(id);
            state
                .servers
                .iter()
                .find(|server| server.id == id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("server", id))
        })
    }

    fn list_servers<'a>(&'a self, tags: &'a [String]) -> ApiFuture<'a, Vec<ManagedServer>> {
        Box::pin(async move {
            let state = self.record(Call::ListServers(tags.to_vec()));
            if let Some(err) = &state.listing_failure {
                return Err(err.clone());
            }
            Ok(state
                .servers
                .iter()
                .filter(|server| tags.iter().all(|tag| server.tags.contains(tag)))
                .cloned()
                .collect())
        })
    }

    fn create_server<'a>(&'a self, request: &'a ServerCreateRequest) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.record(Call::CreateServer(request.name.clone()));
            state.created.push(request.clone());
            match state.create_plan.clone() {
                CreatePlan::Succeed => {
                    let server = state.server_from_request(request);
                    let id = server.id.clone();
                    state.servers.push(server);
                    Ok(id)
                }
                CreatePlan::Fail(err) => Err(err),
                CreatePlan::FailLeavingServer(err) => {
                    let server = state.server_from_request(request);
                    let id = server.id.clone();
                    state.servers.push(server);
                    Err(match err {
                        ApiError::Incomplete { id: partial, message } if partial.is_empty() => {
                            ApiError::Incomplete { id, message }
                        }
                        other => other,
                    })
                }
            }
        })
    }

    fn force_delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record(Call::ForceDelete(id.to_owned()));
            if let Some(err) = &state.delete_failure {
                return Err(err.clone());
            }
            let Some(index) = state.position(id) else {
                return Err(ApiError::not_found("server", id));
            };
            if state.scripts.get(id).is_some_and(|steps| !steps.is_empty()) {
                if let Some(server) = state.servers.get_mut(index) {
                    server.status = ServerStatus::Deleting;
                }
            } else {
                state.servers.remove(index);
            }
            Ok(())
        })
    }

    fn start_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move { self.power(Call::Start(id.to_owned()), id, ServerStatus::Active) })
    }

    fn stop_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move { self.power(Call::Stop(id.to_owned()), id, ServerStatus::Shutoff) })
    }

    fn get_flavor<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Flavor> {
        Box::pin(async move {
            let state = self.record(Call::GetFlavor(id.to_owned()));
            state
                .flavors
                .iter()
                .find(|flavor| flavor.id == id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("flavor", id))
        })
    }

    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>> {
        Box::pin(async move { Ok(self.record(Call::ListFlavors).flavors.clone()) })
    }

    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Image> {
        Box::pin(async move {
            let state = self.record(Call::GetImage(id.to_owned()));
            state
                .images
                .iter()
                .find(|image| image.id == id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("image", id))
        })
    }

    fn list_images<'a>(&'a self, filter: &'a ImageFilter) -> ApiFuture<'a, Vec<Image>> {
        Box::pin(async move {
            let state = self.record(Call::ListImages(filter.clone()));
            Ok(state
                .images
                .iter()
                .filter(|image| filter.name.as_ref().is_none_or(|name| image.name == *name))
                .cloned()
                .collect())
        })
    }

    fn get_network<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Network> {
        Box::pin(async move {
            let state = self.record(Call::GetNetwork(id.to_owned()));
            state
                .networks
                .iter()
                .find(|network| network.id == id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("network", id))
        })
    }

    fn list_networks<'a>(&'a self, name: Option<&'a str>) -> ApiFuture<'a, Vec<Network>> {
        Box::pin(async move {
            let state = self.record(Call::ListNetworks(name.map(str::to_owned)));
            Ok(state
                .networks
                .iter()
                .filter(|network| name.is_none_or(|wanted| network.name == wanted))
                .cloned()
                .collect())
        })
    }
}

/// Builds a server tagged for `controller` and `pool`.
#[must_use]
pub fn owned_server(
    id: &str,
    name: &str,
    controller: &str,
    pool: &str,
    status: ServerStatus,
) -> ManagedServer {
    ManagedServer {
        id: id.to_owned(),
        name: name.to_owned(),
        status,
        tags: vec![pool_tag(pool), controller_tag(controller)],
        ..ManagedServer::default()
    }
}

/// [`ToolFetcher`] that always returns the same archive.
#[derive(Clone, Debug)]
pub struct StaticToolFetcher {
    tools: RunnerApplicationDownload,
}

impl StaticToolFetcher {
    /// Wraps `tools`.
    #[must_use]
    pub const fn new(tools: RunnerApplicationDownload) -> Self {
        Self { tools }
    }
}

impl ToolFetcher for StaticToolFetcher {
    fn fetch(
        &self,
        _os: crate::params::OsType,
        _arch: crate::params::OsArch,
        _tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload, UserDataError> {
        Ok(self.tools.clone())
    }
}

/// [`CloudConfigRenderer`] returning a fixed payload and recording the
/// options it was asked to render.
#[derive(Clone, Debug)]
pub struct RecordingRenderer {
    payload: String,
    seen: Arc<Mutex<Vec<UserDataOptions>>>,
}

impl CloudConfigRenderer for RecordingRenderer {
    fn render(&self, request: &UserDataRequest<'_>) -> Result<String, UserDataError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.bootstrap.user_data_options.clone());
        Ok(self.payload.clone())
    }
}

/// Returns a [`RecordingRenderer`] and the log it writes to.
#[must_use]
pub fn recording_renderer(
    payload: &str,
) -> (RecordingRenderer, Arc<Mutex<Vec<UserDataOptions>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (
        RecordingRenderer {
            payload: payload.to_owned(),
            seen: Arc::clone(&seen),
        },
        seen,
    )
}
