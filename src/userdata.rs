//! Runner tool selection and first-boot user-data rendering.
//!
//! Both concerns are strategies injected into the provider so tests can
//! replace them: [`ToolFetcher`] picks the runner archive matching the
//! requested platform and [`CloudConfigRenderer`] turns a bootstrap request
//! into the user-data payload the instance boots with.

use std::collections::BTreeMap;

use minijinja::Environment;
use serde::Serialize;
use thiserror::Error;

use crate::params::{BootstrapInstance, OsArch, OsType, RunnerApplicationDownload};

/// Directory pre-install scripts are written to on Linux guests.
pub const PRE_INSTALL_DIR: &str = "/garm-pre-install";

const INSTALL_SCRIPT_PATH: &str = "/install_runner.sh";

const INSTALL_TEMPLATE_NAME: &str = "install_runner";

const LINUX_INSTALL_TEMPLATE: &str = r#"#!/bin/bash
set -e
set -o pipefail
{{ debug }}
CALLBACK_URL="{{ callback_url }}"
METADATA_URL="{{ metadata_url }}"
BEARER_TOKEN="{{ callback_token }}"

call() {
    curl --retry 5 --retry-delay 5 --retry-connrefused --fail -s -X POST \
        -d "{\"status\": \"$1\", \"message\": \"$2\"}" \
        -H 'Accept: application/json' -H "Authorization: Bearer ${BEARER_TOKEN}" \
        "${CALLBACK_URL}" || echo "failed to call home"
}

fail() {
    call failed "$1"
    exit 1
}

call installing "downloading tools from {{ download_url }}"
mkdir -p /home/runner/actions-runner || fail "failed to create runner directory"
TEMP_TOKEN="{{ temp_download_token }}"
if [ -n "$TEMP_TOKEN" ]; then
    curl --retry 5 --fail -L -H "Authorization: Bearer $TEMP_TOKEN" -o "/home/runner/{{ filename }}" "{{ download_url }}" || fail "failed to download tools"
else
    curl --retry 5 --fail -L -o "/home/runner/{{ filename }}" "{{ download_url }}" || fail "failed to download tools"
fi
tar xf "/home/runner/{{ filename }}" -C /home/runner/actions-runner/ || fail "failed to extract tools"
chown -R runner:runner /home/runner/actions-runner

call installing "fetching registration token"
TOKEN=$(curl --retry 5 --fail -s -H "Authorization: Bearer ${BEARER_TOKEN}" "${METADATA_URL}/runner-registration-token/") || fail "failed to get registration token"

cd /home/runner/actions-runner
sudo -u runner -- ./config.sh --unattended --url "{{ repo_url }}" --token "$TOKEN" \
    --name "{{ runner_name }}" --labels "{{ labels }}" {{ runner_group_flag }}--ephemeral || fail "failed to configure runner"
./svc.sh install runner || fail "failed to install service"
./svc.sh start || fail "failed to start service"
call idle "runner successfully installed"
"#;

const WINDOWS_INSTALL_TEMPLATE: &str = r#"$ErrorActionPreference = "Stop"
{{ debug }}
$callbackUrl = "{{ callback_url }}"
$metadataUrl = "{{ metadata_url }}"
$headers = @{ Authorization = "Bearer {{ callback_token }}" }

function Send-Status($status, $message) {
    $body = @{ status = $status; message = $message } | ConvertTo-Json
    Invoke-RestMethod -Method Post -Uri $callbackUrl -Headers $headers -Body $body -ContentType "application/json"
}

Send-Status "installing" "downloading tools from {{ download_url }}"
$runnerDir = "C:\actions-runner"
New-Item -ItemType Directory -Force -Path $runnerDir | Out-Null
$archive = Join-Path $env:TEMP "{{ filename }}"
Invoke-WebRequest -UseBasicParsing -Uri "{{ download_url }}" -OutFile $archive
Expand-Archive -Path $archive -DestinationPath $runnerDir -Force

$token = Invoke-RestMethod -Uri "$metadataUrl/runner-registration-token/" -Headers $headers
Set-Location $runnerDir
./config.cmd --unattended --url "{{ repo_url }}" --token $token --name "{{ runner_name }}" --labels "{{ labels }}" {{ runner_group_flag }}--ephemeral --runasservice
Send-Status "idle" "runner successfully installed"
"#;

/// Errors raised while selecting tools or rendering user data.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UserDataError {
    /// No advertised runner archive matches the requested platform.
    #[error("failed to find tools for OS {os} and arch {arch}")]
    NoMatchingTools {
        /// Requested OS family.
        os: String,
        /// Requested architecture.
        arch: String,
    },
    /// The OS family cannot be bootstrapped.
    #[error("unsupported OS type for cloud config: {0}")]
    UnsupportedOs(String),
    /// The cloud-config document could not be serialised.
    #[error("failed to render cloud config: {0}")]
    Render(String),
    /// The install-script template is malformed or failed to render.
    #[error("failed to render install script template: {0}")]
    Template(String),
}

/// Decoded cloud-init augmentation supplied with a request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CloudInitOverrides {
    /// Replacement for the built-in install script.
    pub install_template: Option<String>,
    /// Scripts run before the runner is installed, keyed by file name.
    pub pre_install_scripts: BTreeMap<String, String>,
    /// Additional template context.
    pub extra_context: BTreeMap<String, String>,
}

/// Inputs to a [`CloudConfigRenderer`].
#[derive(Clone, Copy, Debug)]
pub struct UserDataRequest<'a> {
    /// Bootstrap request with the merged user-data toggles applied.
    pub bootstrap: &'a BootstrapInstance,
    /// Selected runner archive.
    pub tools: &'a RunnerApplicationDownload,
    /// Name the runner registers under.
    pub runner_name: &'a str,
    /// Cloud-init augmentation.
    pub overrides: &'a CloudInitOverrides,
}

/// Selects the runner archive for a platform.
pub trait ToolFetcher: Send + Sync {
    /// Returns the archive matching `os` and `arch`.
    ///
    /// # Errors
    ///
    /// Returns [`UserDataError::NoMatchingTools`] when nothing matches.
    fn fetch(
        &self,
        os: OsType,
        arch: OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload, UserDataError>;
}

/// Renders the user-data payload for a request.
pub trait CloudConfigRenderer: Send + Sync {
    /// Produces the plain-text payload.
    ///
    /// # Errors
    ///
    /// Returns [`UserDataError`] when the OS family is unsupported or the
    /// payload cannot be produced.
    fn render(&self, request: &UserDataRequest<'_>) -> Result<String, UserDataError>;
}

/// Matches archives by the forge's platform vocabulary.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForgeToolFetcher;

const fn forge_os(os: OsType) -> Option<&'static str> {
    match os {
        OsType::Linux => Some("linux"),
        OsType::Windows => Some("win"),
        OsType::Unknown => None,
    }
}

const fn forge_arch(arch: OsArch) -> Option<&'static str> {
    match arch {
        OsArch::Amd64 => Some("x64"),
        OsArch::Arm64 => Some("arm64"),
        OsArch::Arm => Some("arm"),
        OsArch::I386 | OsArch::Unknown => None,
    }
}

impl ToolFetcher for ForgeToolFetcher {
    fn fetch(
        &self,
        os: OsType,
        arch: OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> Result<RunnerApplicationDownload, UserDataError> {
        let no_match = || UserDataError::NoMatchingTools {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let (Some(wanted_os), Some(wanted_arch)) = (forge_os(os), forge_arch(arch)) else {
            return Err(no_match());
        };
        tools
            .iter()
            .find(|tool| {
                tool.os.as_deref() == Some(wanted_os)
                    && tool.architecture.as_deref() == Some(wanted_arch)
            })
            .cloned()
            .ok_or_else(no_match)
    }
}

/// Renders `#cloud-config` for Linux and a PowerShell script for Windows.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCloudConfigRenderer;

#[derive(Serialize)]
struct CloudConfig {
    package_upgrade: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
}

#[derive(Serialize)]
struct WriteFile {
    path: String,
    content: String,
    owner: &'static str,
    permissions: &'static str,
}

fn template_context(request: &UserDataRequest<'_>) -> BTreeMap<String, String> {
    let bootstrap = request.bootstrap;
    let tools = request.tools;
    let debug = match (bootstrap.user_data_options.enable_boot_debug, bootstrap.os_type) {
        (true, OsType::Windows) => "Set-PSDebug -Trace 1",
        (true, _) => "set -x",
        (false, _) => "",
    };
    let runner_group_flag = if bootstrap.github_runner_group.is_empty() {
        String::new()
    } else {
        format!("--runnergroup \"{}\" ", bootstrap.github_runner_group)
    };
    let mut context = BTreeMap::from([
        ("runner_name".to_owned(), request.runner_name.to_owned()),
        ("repo_url".to_owned(), bootstrap.repo_url.clone()),
        ("callback_url".to_owned(), bootstrap.callback_url.clone()),
        ("metadata_url".to_owned(), bootstrap.metadata_url.clone()),
        ("callback_token".to_owned(), bootstrap.instance_token.clone()),
        ("labels".to_owned(), bootstrap.labels.join(",")),
        ("runner_group_flag".to_owned(), runner_group_flag),
        ("debug".to_owned(), debug.to_owned()),
        (
            "download_url".to_owned(),
            tools.download_url.clone().unwrap_or_default(),
        ),
        ("filename".to_owned(), tools.filename.clone().unwrap_or_default()),
        (
            "temp_download_token".to_owned(),
            tools.temp_download_token.clone().unwrap_or_default(),
        ),
    ]);
    for (key, value) in &request.overrides.extra_context {
        context.insert(key.clone(), value.clone());
    }
    context
}

/// Renders an install-script template against `context` in a single pass.
///
/// Values are inserted verbatim, so placeholders inside a value are never
/// expanded. Placeholders missing from `context` render empty.
///
/// # Errors
///
/// Returns [`UserDataError::Template`] when the template does not parse or
/// fails to render.
pub fn render_install_script(
    template: &str,
    context: &BTreeMap<String, String>,
) -> Result<String, UserDataError> {
    let template_error = |err: minijinja::Error| UserDataError::Template(err.to_string());
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template(INSTALL_TEMPLATE_NAME, template)
        .map_err(template_error)?;
    env.get_template(INSTALL_TEMPLATE_NAME)
        .and_then(|compiled| compiled.render(context))
        .map_err(template_error)
}

impl DefaultCloudConfigRenderer {
    fn render_linux(
        request: &UserDataRequest<'_>,
        install_script: String,
    ) -> Result<String, UserDataError> {
        let options = &request.bootstrap.user_data_options;
        let mut packages = if options.disable_updates_on_boot {
            Vec::new()
        } else {
            vec!["curl".to_owned(), "tar".to_owned()]
        };
        for package in &options.extra_packages {
            if !packages.contains(package) {
                packages.push(package.clone());
            }
        }

        let mut write_files = Vec::new();
        let mut runcmd = Vec::new();
        for (name, script) in &request.overrides.pre_install_scripts {
            let path = format!("{PRE_INSTALL_DIR}/{name}");
            runcmd.push(path.clone());
            write_files.push(WriteFile {
                path,
                content: script.clone(),
                owner: "root:root",
                permissions: "0755",
            });
        }
        write_files.push(WriteFile {
            path: INSTALL_SCRIPT_PATH.to_owned(),
            content: install_script,
            owner: "root:root",
            permissions: "0755",
        });
        runcmd.push(INSTALL_SCRIPT_PATH.to_owned());
        runcmd.push(format!("rm -f {INSTALL_SCRIPT_PATH}"));

        let document = CloudConfig {
            package_upgrade: !options.disable_updates_on_boot,
            packages,
            ssh_authorized_keys: request.bootstrap.ssh_keys.clone(),
            write_files,
            runcmd,
        };
        let body =
            serde_yaml::to_string(&document).map_err(|err| UserDataError::Render(err.to_string()))?;
        Ok(format!("#cloud-config\n{body}"))
    }
}

impl CloudConfigRenderer for DefaultCloudConfigRenderer {
    fn render(&self, request: &UserDataRequest<'_>) -> Result<String, UserDataError> {
        let os_type = request.bootstrap.os_type;
        let default_template = match os_type {
            OsType::Linux => LINUX_INSTALL_TEMPLATE,
            OsType::Windows => WINDOWS_INSTALL_TEMPLATE,
            OsType::Unknown => return Err(UserDataError::UnsupportedOs(os_type.to_string())),
        };
        let template = request
            .overrides
            .install_template
            .as_deref()
            .unwrap_or(default_template);
        let script = render_install_script(template, &template_context(request))?;
        match os_type {
            OsType::Windows => Ok(format!("#ps1_sysnative\n{script}")),
            _ => Self::render_linux(request, script),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::UserDataOptions;
    use rstest::{fixture, rstest};

    fn tool(os: &str, arch: &str) -> RunnerApplicationDownload {
        RunnerApplicationDownload {
            os: Some(os.to_owned()),
            architecture: Some(arch.to_owned()),
            download_url: Some(format!("https://example.com/{os}-{arch}.tgz")),
            filename: Some(format!("{os}-{arch}.tgz")),
            ..RunnerApplicationDownload::default()
        }
    }

    #[fixture]
    fn bootstrap() -> BootstrapInstance {
        BootstrapInstance {
            name: "runner-1".to_owned(),
            repo_url: "https://github.com/example/repo".to_owned(),
            callback_url: "https://garm/api/v1/callbacks".to_owned(),
            metadata_url: "https://garm/api/v1/metadata".to_owned(),
            instance_token: "token".to_owned(),
            os_type: OsType::Linux,
            arch: OsArch::Amd64,
            labels: vec!["self-hosted".to_owned(), "linux".to_owned()],
            ..BootstrapInstance::default()
        }
    }

    #[rstest]
    #[case(OsType::Linux, OsArch::Amd64, "linux", "x64")]
    #[case(OsType::Linux, OsArch::Arm64, "linux", "arm64")]
    #[case(OsType::Windows, OsArch::Amd64, "win", "x64")]
    fn picks_archive_for_platform(
        #[case] os: OsType,
        #[case] arch: OsArch,
        #[case] forge_os_name: &str,
        #[case] forge_arch_name: &str,
    ) {
        let tools = vec![
            tool("linux", "x64"),
            tool("linux", "arm64"),
            tool("win", "x64"),
        ];
        let picked = ForgeToolFetcher
            .fetch(os, arch, &tools)
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(picked.os.as_deref(), Some(forge_os_name));
        assert_eq!(picked.architecture.as_deref(), Some(forge_arch_name));
    }

    #[rstest]
    fn reports_missing_platform() {
        let err = ForgeToolFetcher
            .fetch(OsType::Linux, OsArch::Arm, &[tool("linux", "x64")])
            .err();
        assert_eq!(
            err,
            Some(UserDataError::NoMatchingTools {
                os: "linux".to_owned(),
                arch: "arm".to_owned(),
            })
        );
    }

    #[rstest]
    fn linux_payload_is_cloud_config(bootstrap: BootstrapInstance) {
        let tools = tool("linux", "x64");
        let overrides = CloudInitOverrides::default();
        let payload = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(payload.starts_with("#cloud-config\n"));
        assert!(payload.contains("package_upgrade: true"));
        assert!(payload.contains("https://example.com/linux-x64.tgz"));
        assert!(!payload.contains("set -x"));
    }

    #[rstest]
    fn linux_payload_honours_toggles_and_pre_install_scripts(mut bootstrap: BootstrapInstance) {
        bootstrap.user_data_options = UserDataOptions {
            disable_updates_on_boot: true,
            extra_packages: vec!["jq".to_owned()],
            enable_boot_debug: true,
        };
        let tools = tool("linux", "x64");
        let overrides = CloudInitOverrides {
            pre_install_scripts: BTreeMap::from([(
                "01-setup.sh".to_owned(),
                "#!/bin/sh\necho hi".to_owned(),
            )]),
            ..CloudInitOverrides::default()
        };
        let payload = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(payload.contains("package_upgrade: false"));
        assert!(payload.contains("- jq"));
        assert!(!payload.contains("- curl"));
        assert!(payload.contains("set -x"));
        assert!(payload.contains("/garm-pre-install/01-setup.sh"));
    }

    #[rstest]
    fn custom_template_uses_extra_context(bootstrap: BootstrapInstance) {
        let tools = tool("linux", "x64");
        let overrides = CloudInitOverrides {
            install_template: Some("echo {{ runner_name }} {{greeting}}".to_owned()),
            extra_context: BTreeMap::from([("greeting".to_owned(), "hello".to_owned())]),
            ..CloudInitOverrides::default()
        };
        let payload = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(payload.contains("echo runner-1 hello"));
    }

    #[rstest]
    fn context_values_are_inserted_literally() {
        let context = BTreeMap::from([
            ("labels".to_owned(), "{{ temp_download_token }}".to_owned()),
            ("temp_download_token".to_owned(), "DLTOKEN".to_owned()),
        ]);
        let script = render_install_script("labels={{ labels }}", &context)
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(script, "labels={{ temp_download_token }}");
    }

    #[rstest]
    fn extra_context_cannot_smuggle_the_download_token(mut bootstrap: BootstrapInstance) {
        bootstrap.labels = vec!["{{ temp_download_token }}".to_owned()];
        let tools = RunnerApplicationDownload {
            temp_download_token: Some("DLTOKEN".to_owned()),
            ..tool("linux", "x64")
        };
        let overrides = CloudInitOverrides {
            install_template: Some("{{ labels }}|{{ note }}".to_owned()),
            extra_context: BTreeMap::from([(
                "note".to_owned(),
                "{{ callback_token }}".to_owned(),
            )]),
            ..CloudInitOverrides::default()
        };
        let payload = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(!payload.contains("DLTOKEN"));
        assert!(payload.contains("{{ temp_download_token }}|{{ callback_token }}"));
    }

    #[rstest]
    #[case("{{ runner_name }}\n", "runner-1\n")]
    #[case("{{ missing }}end", "end")]
    fn template_rendering_edges(#[case] template: &str, #[case] expected: &str) {
        let context = BTreeMap::from([("runner_name".to_owned(), "runner-1".to_owned())]);
        let script =
            render_install_script(template, &context).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(script, expected);
    }

    #[rstest]
    fn malformed_template_is_reported() {
        let err = render_install_script("{{ unclosed", &BTreeMap::new()).err();
        assert!(
            matches!(err, Some(UserDataError::Template(_))),
            "unexpected result: {err:?}"
        );
    }

    #[rstest]
    fn windows_payload_is_powershell(mut bootstrap: BootstrapInstance) {
        bootstrap.os_type = OsType::Windows;
        let tools = tool("win", "x64");
        let overrides = CloudInitOverrides::default();
        let payload = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .unwrap_or_else(|err| panic!("{err}"));
        assert!(payload.starts_with("#ps1_sysnative\n"));
        assert!(payload.contains("https://example.com/win-x64.tgz"));
    }

    #[rstest]
    fn unknown_os_is_rejected(mut bootstrap: BootstrapInstance) {
        bootstrap.os_type = OsType::Unknown;
        let tools = tool("linux", "x64");
        let overrides = CloudInitOverrides::default();
        let err = DefaultCloudConfigRenderer
            .render(&UserDataRequest {
                bootstrap: &bootstrap,
                tools: &tools,
                runner_name: "runner-1",
                overrides: &overrides,
            })
            .err();
        assert_eq!(err, Some(UserDataError::UnsupportedOs("unknown".to_owned())));
    }
}
