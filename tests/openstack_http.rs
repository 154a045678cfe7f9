//! HTTP-level tests for the OpenStack REST client.

use garm_provider_openstack::credentials::{CloudAuth, CloudEntry};
use garm_provider_openstack::openstack::{
    ImageFilter, NOVA_MICROVERSION, ServerCreateRequest, ServiceEndpoints,
};
use garm_provider_openstack::scope::{controller_tag, pool_tag};
use garm_provider_openstack::{ApiError, ComputeApi, OpenStackClient, ServerStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "token-123";

fn client(server: &MockServer) -> OpenStackClient {
    let base = server.uri();
    OpenStackClient::with_endpoints(
        TOKEN,
        ServiceEndpoints {
            compute: format!("{base}/compute/v2.1"),
            image: format!("{base}/image"),
            network: format!("{base}/network"),
        },
    )
}

#[tokio::test]
async fn list_servers_filters_by_tags_and_sends_microversion() {
    let server = MockServer::start().await;
    let tags = vec![controller_tag("ctrl"), pool_tag("p1")];
    Mock::given(method("GET"))
        .and(path("/compute/v2.1/servers/detail"))
        .and(query_param("tags", tags.join(",").as_str()))
        .and(header("X-Auth-Token", TOKEN))
        .and(header("X-OpenStack-Nova-API-Version", NOVA_MICROVERSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": [{
                "id": "srv-1",
                "name": "runner-1",
                "status": "SHUTOFF",
                "tags": tags,
                "addresses": null,
                "metadata": {"os_type": "linux"}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let servers = client(&server)
        .list_servers(&tags)
        .await
        .unwrap_or_else(|err| panic!("list servers: {err}"));

    assert_eq!(servers.len(), 1);
    let Some(listed) = servers.first() else {
        panic!("no server decoded");
    };
    assert_eq!(listed.status, ServerStatus::Shutoff);
    assert!(listed.addresses.is_empty());
    assert_eq!(listed.metadata.get("os_type").map(String::as_str), Some("linux"));
}

#[tokio::test]
async fn missing_server_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/compute/v2.1/servers/srv-9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let result = client(&server).get_server("srv-9").await;

    assert!(
        matches!(&result, Err(ApiError::NotFound { resource, id }) if resource == "server" && id == "srv-9"),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn failed_create_reports_partially_created_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/compute/v2.1/servers"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"server": {"id": "srv-half"}})),
        )
        .mount(&server)
        .await;
    let request = ServerCreateRequest {
        name: "runner-1".to_owned(),
        flavor_id: "f-1".to_owned(),
        image_id: "img-1".to_owned(),
        network_id: "net-1".to_owned(),
        ..ServerCreateRequest::default()
    };

    let result = client(&server).create_server(&request).await;

    assert!(
        matches!(&result, Err(ApiError::Incomplete { id, .. }) if id == "srv-half"),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn force_delete_posts_server_action() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/compute/v2.1/servers/srv-1/action"))
        .and(body_json(json!({"forceDelete": null})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .force_delete_server("srv-1")
        .await
        .unwrap_or_else(|err| panic!("force delete: {err}"));
}

#[tokio::test]
async fn conflicting_stop_surfaces_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/compute/v2.1/servers/srv-1/action"))
        .respond_with(ResponseTemplate::new(409).set_body_string("locked"))
        .mount(&server)
        .await;

    let result = client(&server).stop_server("srv-1").await;

    assert!(
        matches!(&result, Err(ApiError::Http { status: 409, message, .. }) if message == "locked"),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn image_listing_passes_name_and_visibility() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image/v2/images"))
        .and(query_param("name", "ubuntu"))
        .and(query_param("visibility", "community"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{"id": "img-1", "name": "ubuntu", "owner": "project-a"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let filter = ImageFilter {
        name: Some("ubuntu".to_owned()),
        visibility: Some("community".to_owned()),
    };

    let images = client(&server)
        .list_images(&filter)
        .await
        .unwrap_or_else(|err| panic!("list images: {err}"));

    assert_eq!(images.len(), 1);
    assert_eq!(
        images.first().and_then(|image| image.owner.as_deref()),
        Some("project-a")
    );
}

#[tokio::test]
async fn connect_discovers_endpoints_from_catalog() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("POST"))
        .and(path("/identity/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", TOKEN)
                .set_body_json(json!({
                    "token": {
                        "catalog": [
                            {"type": "compute", "endpoints": [
                                {"interface": "internal", "region_id": "RegionOne", "url": "http://internal.invalid"},
                                {"interface": "public", "region_id": "RegionOne", "url": format!("{base}/compute/v2.1")}
                            ]},
                            {"type": "image", "endpoints": [
                                {"interface": "public", "region_id": "RegionOne", "url": format!("{base}/image")}
                            ]},
                            {"type": "network", "endpoints": [
                                {"interface": "public", "region_id": "RegionOne", "url": format!("{base}/network")}
                            ]}
                        ]
                    }
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/compute/v2.1/flavors/detail"))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "flavors": [{"id": "f-1", "name": "m1.small"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let cloud = CloudEntry {
        auth: CloudAuth {
            auth_url: Some(format!("{base}/identity")),
            username: Some("garm".to_owned()),
            password: Some("secret".to_owned()),
            project_name: Some("runners".to_owned()),
            ..CloudAuth::default()
        },
        region_name: Some("RegionOne".to_owned()),
        ..CloudEntry::default()
    };

    let connected = OpenStackClient::connect(&cloud)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let flavors = connected
        .list_flavors()
        .await
        .unwrap_or_else(|err| panic!("list flavors: {err}"));

    assert_eq!(
        flavors.first().map(|flavor| flavor.name.as_str()),
        Some("m1.small")
    );
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/v3/auth/tokens"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let cloud = CloudEntry {
        auth: CloudAuth {
            auth_url: Some(format!("{}/identity/v3", server.uri())),
            application_credential_id: Some("app".to_owned()),
            application_credential_secret: Some("secret".to_owned()),
            ..CloudAuth::default()
        },
        ..CloudEntry::default()
    };

    let result = OpenStackClient::connect(&cloud).await;

    assert!(
        matches!(result, Err(ApiError::Auth(_))),
        "unexpected result: {result:?}"
    );
}
