//! reqwest-backed implementation of [`ComputeApi`].

use std::collections::BTreeMap;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    ApiError, ApiFuture, ComputeApi, Flavor, Image, ImageFilter, ManagedServer, Network,
    ServerCreateRequest,
};
use crate::credentials::CloudEntry;

/// Compute API microversion requested on every Nova call. 2.67 is the first
/// release supporting tag filters together with volume types in block device
/// mappings.
pub const NOVA_MICROVERSION: &str = "2.67";

const TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Base URLs of the services the provider talks to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceEndpoints {
    /// Nova endpoint, including the version segment (`.../v2.1`).
    pub compute: String,
    /// Glance endpoint root.
    pub image: String,
    /// Neutron endpoint root.
    pub network: String,
}

/// Authenticated OpenStack REST client.
#[derive(Clone, Debug)]
pub struct OpenStackClient {
    http: reqwest::Client,
    token: String,
    endpoints: ServiceEndpoints,
}

#[derive(Deserialize)]
struct TokenBody {
    token: TokenDetails,
}

#[derive(Deserialize)]
struct TokenDetails {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct ServerEnvelope<T> {
    server: T,
}

#[derive(Deserialize)]
struct ServersEnvelope {
    servers: Vec<ManagedServer>,
}

#[derive(Deserialize)]
struct CreatedServer {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct FlavorEnvelope {
    flavor: Flavor,
}

#[derive(Deserialize)]
struct FlavorsEnvelope {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct ImagesEnvelope {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct NetworkEnvelope {
    network: Network,
}

#[derive(Deserialize)]
struct NetworksEnvelope {
    networks: Vec<Network>,
}

#[derive(Serialize)]
struct CreateServerBody<'a> {
    server: CreateServer<'a>,
}

#[derive(Serialize)]
struct CreateServer<'a> {
    name: &'a str,
    #[serde(rename = "flavorRef")]
    flavor_ref: &'a str,
    #[serde(rename = "imageRef", skip_serializing_if = "str::is_empty")]
    image_ref: &'a str,
    networks: Vec<NetworkRef<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<SecurityGroupRef<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    user_data: &'a str,
    config_drive: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    metadata: &'a BTreeMap<String, String>,
    #[serde(
        rename = "block_device_mapping_v2",
        skip_serializing_if = "Vec::is_empty"
    )]
    block_device_mapping: Vec<BlockDeviceMapping<'a>>,
}

#[derive(Serialize)]
struct NetworkRef<'a> {
    uuid: &'a str,
}

#[derive(Serialize)]
struct SecurityGroupRef<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct BlockDeviceMapping<'a> {
    uuid: &'a str,
    source_type: &'static str,
    destination_type: &'static str,
    boot_index: u32,
    delete_on_termination: bool,
    volume_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<&'a str>,
}

impl<'a> From<&'a ServerCreateRequest> for CreateServerBody<'a> {
    fn from(request: &'a ServerCreateRequest) -> Self {
        let block_device_mapping = request
            .block_device
            .iter()
            .map(|device| BlockDeviceMapping {
                uuid: &device.image_id,
                source_type: "image",
                destination_type: "volume",
                boot_index: 0,
                delete_on_termination: true,
                volume_size: device.volume_size,
                volume_type: device.volume_type.as_deref(),
            })
            .collect::<Vec<_>>();
        let image_ref = if request.block_device.is_some() {
            ""
        } else {
            request.image_id.as_str()
        };
        Self {
            server: CreateServer {
                name: &request.name,
                flavor_ref: &request.flavor_id,
                image_ref,
                networks: vec![NetworkRef {
                    uuid: &request.network_id,
                }],
                security_groups: request
                    .security_groups
                    .iter()
                    .map(|name| SecurityGroupRef { name })
                    .collect(),
                user_data: &request.user_data,
                config_drive: request.config_drive,
                tags: &request.tags,
                metadata: &request.metadata,
                block_device_mapping,
            },
        }
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn identity_url(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        format!("{trimmed}/auth/tokens")
    } else {
        format!("{trimmed}/v3/auth/tokens")
    }
}

fn identity_body(cloud: &CloudEntry) -> Result<serde_json::Value, ApiError> {
    let auth = &cloud.auth;
    if let (Some(id), Some(secret)) = (
        auth.application_credential_id.as_deref(),
        auth.application_credential_secret.as_deref(),
    ) {
        return Ok(json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": {"id": id, "secret": secret}
                }
            }
        }));
    }

    let password = auth
        .password
        .as_deref()
        .ok_or_else(|| ApiError::Auth("cloud entry has no password".to_owned()))?;
    let user_domain = auth
        .user_domain_name
        .as_deref()
        .or(auth.domain_name.as_deref())
        .unwrap_or("Default");
    let user = match (auth.user_id.as_deref(), auth.username.as_deref()) {
        (Some(id), _) => json!({"id": id, "password": password, "domain": {"name": user_domain}}),
        (None, Some(name)) => {
            json!({"name": name, "password": password, "domain": {"name": user_domain}})
        }
        (None, None) => {
            return Err(ApiError::Auth(
                "cloud entry has neither username nor user_id".to_owned(),
            ));
        }
    };

    let project_domain = auth
        .project_domain_name
        .as_deref()
        .or(auth.domain_name.as_deref())
        .unwrap_or("Default");
    let identity = json!({"methods": ["password"], "password": {"user": user}});
    let body = match (auth.project_id.as_deref(), auth.project_name.as_deref()) {
        (Some(id), _) => json!({"auth": {"identity": identity, "scope": {"project": {"id": id}}}}),
        (None, Some(name)) => json!({
            "auth": {
                "identity": identity,
                "scope": {"project": {"name": name, "domain": {"name": project_domain}}}
            }
        }),
        (None, None) => json!({"auth": {"identity": identity}}),
    };
    Ok(body)
}

fn select_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Result<String, ApiError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == interface
                && region.is_none_or(|wanted| {
                    endpoint.region_id.as_deref() == Some(wanted)
                        || endpoint.region.as_deref() == Some(wanted)
                })
        })
        .map(|endpoint| endpoint.url.clone())
        .ok_or_else(|| {
            ApiError::Auth(format!(
                "no {interface} {service_type} endpoint in the service catalog"
            ))
        })
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T, ApiError> {
    response.json::<T>().await.map_err(|err| ApiError::Decode {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}

impl OpenStackClient {
    /// Builds a client from an already issued token and known endpoints.
    #[must_use]
    pub fn with_endpoints(token: impl Into<String>, endpoints: ServiceEndpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            endpoints,
        }
    }

    /// Authenticates against Keystone v3 and discovers service endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`] when the credentials are incomplete, the
    /// identity service rejects them or the catalog lacks a required service.
    pub async fn connect(cloud: &CloudEntry) -> Result<Self, ApiError> {
        let auth_url = cloud
            .auth
            .auth_url
            .as_deref()
            .ok_or_else(|| ApiError::Auth("cloud entry has no auth_url".to_owned()))?;
        let http = reqwest::Client::new();
        let response = http
            .post(identity_url(auth_url))
            .json(&identity_body(cloud)?)
            .send()
            .await
            .map_err(|err| ApiError::Auth(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Auth(format!(
                "identity service answered HTTP {}",
                response.status().as_u16()
            )));
        }
        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| ApiError::Auth("identity response carried no token".to_owned()))?;
        let body: TokenBody = decode(response, "authenticate").await?;

        let interface = cloud.interface.as_deref().unwrap_or("public");
        let region = cloud.region_name.as_deref();
        let catalog = &body.token.catalog;
        let endpoints = ServiceEndpoints {
            compute: select_endpoint(catalog, "compute", interface, region)?,
            image: select_endpoint(catalog, "image", interface, region)?,
            network: select_endpoint(catalog, "network", interface, region)?,
        };
        debug!(compute = %endpoints.compute, "authenticated against identity service");
        Ok(Self {
            http,
            token,
            endpoints,
        })
    }

    fn compute(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, join(&self.endpoints.compute, path))
            .header("X-OpenStack-Nova-API-Version", NOVA_MICROVERSION)
            .header(
                "OpenStack-API-Version",
                format!("compute {NOVA_MICROVERSION}"),
            )
    }

    fn image(&self, path: &str) -> RequestBuilder {
        self.http.get(join(&self.endpoints.image, path))
    }

    fn network(&self, path: &str) -> RequestBuilder {
        self.http.get(join(&self.endpoints.network, path))
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        operation: &str,
        target: Option<(&str, &str)>,
    ) -> Result<Response, ApiError> {
        let response = request
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|err| ApiError::Transport {
                operation: operation.to_owned(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND
            && let Some((resource, id)) = target
        {
            return Err(ApiError::not_found(resource, id));
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Http {
            operation: operation.to_owned(),
            status: status.as_u16(),
            message,
        })
    }

    async fn server_action(&self, id: &str, action: serde_json::Value) -> Result<(), ApiError> {
        let request = self
            .compute(Method::POST, &format!("servers/{id}/action"))
            .json(&action);
        self.execute(request, "server action", Some(("server", id)))
            .await
            .map(drop)
    }
}

impl ComputeApi for OpenStackClient {
    fn get_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ManagedServer> {
        Box::pin(async move {
            let request = self.compute(Method::GET, &format!("servers/{id}"));
            let response = self
                .execute(request, "get server", Some(("server", id)))
                .await?;
            let envelope: ServerEnvelope<ManagedServer> = decode(response, "get server").await?;
            Ok(envelope.server)
        })
    }

    fn list_servers<'a>(&'a self, tags: &'a [String]) -> ApiFuture<'a, Vec<ManagedServer>> {
        Box::pin(async move {
            let mut request = self.compute(Method::GET, "servers/detail");
            if !tags.is_empty() {
                request = request.query(&[("tags", tags.join(","))]);
            }
            let response = self.execute(request, "list servers", None).await?;
            let envelope: ServersEnvelope = decode(response, "list servers").await?;
            Ok(envelope.servers)
        })
    }

    fn create_server<'a>(&'a self, request: &'a ServerCreateRequest) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let body = CreateServerBody::from(request);
            let response = self
                .compute(Method::POST, "servers")
                .json(&body)
                .header(TOKEN_HEADER, &self.token)
                .send()
                .await
                .map_err(|err| ApiError::Transport {
                    operation: "create server".to_owned(),
                    message: err.to_string(),
                })?;
            let status = response.status();
            let text = response.text().await.map_err(|err| ApiError::Decode {
                operation: "create server".to_owned(),
                message: err.to_string(),
            })?;
            let created = serde_json::from_str::<ServerEnvelope<CreatedServer>>(&text)
                .map(|envelope| envelope.server.id);
            match (status.is_success(), created) {
                (true, Ok(id)) if !id.is_empty() => Ok(id),
                (true, Ok(_)) => Err(ApiError::Decode {
                    operation: "create server".to_owned(),
                    message: "response carried no server id".to_owned(),
                }),
                (true, Err(err)) => Err(ApiError::Decode {
                    operation: "create server".to_owned(),
                    message: err.to_string(),
                }),
                (false, Ok(id)) if !id.is_empty() => Err(ApiError::Incomplete {
                    id,
                    message: format!("HTTP {}: {text}", status.as_u16()),
                }),
                (false, _) => Err(ApiError::Http {
                    operation: "create server".to_owned(),
                    status: status.as_u16(),
                    message: text,
                }),
            }
        })
    }

    fn force_delete_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.server_action(id, json!({"forceDelete": null})))
    }

    fn start_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.server_action(id, json!({"os-start": null})))
    }

    fn stop_server<'a>(&'a self, id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.server_action(id, json!({"os-stop": null})))
    }

    fn get_flavor<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Flavor> {
        Box::pin(async move {
            let request = self.compute(Method::GET, &format!("flavors/{id}"));
            let response = self
                .execute(request, "get flavor", Some(("flavor", id)))
                .await?;
            let envelope: FlavorEnvelope = decode(response, "get flavor").await?;
            Ok(envelope.flavor)
        })
    }

    fn list_flavors(&self) -> ApiFuture<'_, Vec<Flavor>> {
        Box::pin(async move {
            let request = self.compute(Method::GET, "flavors/detail");
            let response = self.execute(request, "list flavors", None).await?;
            let envelope: FlavorsEnvelope = decode(response, "list flavors").await?;
            Ok(envelope.flavors)
        })
    }

    fn get_image<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Image> {
        Box::pin(async move {
            let request = self.image(&format!("v2/images/{id}"));
            let response = self
                .execute(request, "get image", Some(("image", id)))
                .await?;
            decode(response, "get image").await
        })
    }

    fn list_images<'a>(&'a self, filter: &'a ImageFilter) -> ApiFuture<'a, Vec<Image>> {
        Box::pin(async move {
            let mut query = Vec::new();
            if let Some(name) = &filter.name {
                query.push(("name", name.as_str()));
            }
            if let Some(visibility) = &filter.visibility {
                query.push(("visibility", visibility.as_str()));
            }
            let request = self.image("v2/images").query(&query);
            let response = self.execute(request, "list images", None).await?;
            let envelope: ImagesEnvelope = decode(response, "list images").await?;
            Ok(envelope.images)
        })
    }

    fn get_network<'a>(&'a self, id: &'a str) -> ApiFuture<'a, Network> {
        Box::pin(async move {
            let request = self.network(&format!("v2.0/networks/{id}"));
            let response = self
                .execute(request, "get network", Some(("network", id)))
                .await?;
            let envelope: NetworkEnvelope = decode(response, "get network").await?;
            Ok(envelope.network)
        })
    }

    fn list_networks<'a>(&'a self, name: Option<&'a str>) -> ApiFuture<'a, Vec<Network>> {
        Box::pin(async move {
            let mut request = self.network("v2.0/networks");
            if let Some(wanted) = name {
                request = request.query(&[("name", wanted)]);
            }
            let response = self.execute(request, "list networks", None).await?;
            let envelope: NetworksEnvelope = decode(response, "list networks").await?;
            Ok(envelope.networks)
        })
    }
}
