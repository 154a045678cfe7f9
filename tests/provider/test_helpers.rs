//! Shared fixtures for provider behavioural scenarios.

use std::time::Duration;

use garm_provider_openstack::openstack::{Flavor, Image, Network};
use garm_provider_openstack::params::{OsArch, OsType, RunnerApplicationDownload};
use garm_provider_openstack::test_support::FakeCompute;
use garm_provider_openstack::{
    BootstrapInstance, ExternalProvider, OpenStackProvider, ProviderConfig, ProviderError,
    ProviderInstance,
};
use rstest::fixture;
use tokio::runtime::Runtime;

pub const CONTROLLER_ID: &str = "ctrl";
pub const IMAGE_ID: &str = "33333333-3333-4333-8333-333333333333";

#[derive(Clone, Debug)]
pub enum Outcome {
    Created(ProviderInstance),
    Listed(Vec<ProviderInstance>),
    Done,
    Failed { code: i32, message: String },
}

impl Outcome {
    fn from_result<T>(
        result: Result<T, ProviderError>,
        success: impl FnOnce(T) -> Self,
    ) -> Self {
        match result {
            Ok(value) => success(value),
            Err(err) => Self::Failed {
                code: err.exit_code(),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProviderContext {
    pub cloud: FakeCompute,
    pub network: String,
    pub extra_specs: Option<serde_json::Value>,
    pub outcome: Option<Outcome>,
}

#[fixture]
pub fn provider_context() -> ProviderContext {
    ProviderContext {
        cloud: FakeCompute::new(),
        network: String::from("tenant-net"),
        extra_specs: None,
        outcome: None,
    }
}

impl ProviderContext {
    pub fn stock(&self, flavor: &str, image: &str, network: &str) {
        self.cloud.add_flavor(Flavor {
            id: String::from("f-1"),
            name: flavor.to_owned(),
        });
        self.cloud.add_image(Image {
            id: IMAGE_ID.to_owned(),
            name: image.to_owned(),
            os_distro: Some(String::from("ubuntu")),
            os_version: Some(String::from("22.04")),
            ..Image::default()
        });
        self.cloud.add_network(Network {
            id: String::from("net-1"),
            name: network.to_owned(),
        });
    }

    pub fn config(&self) -> ProviderConfig {
        ProviderConfig {
            cloud: String::from("openstack"),
            clouds_file: String::from("/etc/garm/clouds.yaml"),
            public_clouds_file: None,
            secure_clouds_file: None,
            credentials: None,
            network_id: self.network.clone(),
            default_storage_backend: None,
            default_security_groups: Vec::new(),
            boot_from_volume: false,
            root_disk_size: None,
            use_config_drive: false,
            allowed_image_owners: Vec::new(),
            image_visibility: None,
            disable_updates_on_boot: false,
            enable_boot_debug: false,
            wait_timeout_secs: 120,
            poll_interval_secs: 2,
        }
    }

    pub fn provider(&self) -> OpenStackProvider<FakeCompute> {
        OpenStackProvider::new(self.cloud.clone(), &self.config(), CONTROLLER_ID)
            .with_timing(Duration::from_millis(50), Duration::from_millis(1))
    }

    pub fn bootstrap(&self, name: &str, pool: &str) -> BootstrapInstance {
        BootstrapInstance {
            name: name.to_owned(),
            flavor: String::from("m1.small"),
            image: String::from("ubuntu"),
            pool_id: pool.to_owned(),
            os_type: OsType::Linux,
            arch: OsArch::Amd64,
            repo_url: String::from("https://github.com/example/repo"),
            tools: vec![RunnerApplicationDownload {
                os: Some(String::from("linux")),
                architecture: Some(String::from("x64")),
                download_url: Some(String::from("https://example.com/runner.tgz")),
                filename: Some(String::from("runner.tgz")),
                ..RunnerApplicationDownload::default()
            }],
            extra_specs: self.extra_specs.clone(),
            ..BootstrapInstance::default()
        }
    }

    pub fn create(&mut self, name: &str, pool: &str) {
        let provider = self.provider();
        let bootstrap = self.bootstrap(name, pool);
        let result = runtime().block_on(provider.create_instance(bootstrap));
        self.outcome = Some(Outcome::from_result(result, Outcome::Created));
    }

    pub fn delete(&mut self, instance: &str) {
        let provider = self.provider();
        let result = runtime().block_on(provider.delete_instance(instance));
        self.outcome = Some(Outcome::from_result(result, |()| Outcome::Done));
    }

    pub fn get(&mut self, instance: &str) {
        let provider = self.provider();
        let result = runtime().block_on(provider.get_instance(instance));
        self.outcome = Some(Outcome::from_result(result, |_| Outcome::Done));
    }

    pub fn list(&mut self, pool: &str) {
        let provider = self.provider();
        let result = runtime().block_on(provider.list_instances(pool));
        self.outcome = Some(Outcome::from_result(result, Outcome::Listed));
    }
}

fn runtime() -> Runtime {
    Runtime::new().unwrap_or_else(|err| panic!("failed to start tokio runtime: {err}"))
}
