//! `clouds.yaml` credential loading.
//!
//! The named cloud is read from `clouds.yaml`. Secrets from `secure.yaml`
//! take precedence over it, and a `profile` key pulls missing values from
//! `clouds-public.yaml`.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Authentication block of a cloud entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CloudAuth {
    /// Identity service URL.
    pub auth_url: Option<String>,
    /// User name for password authentication.
    pub username: Option<String>,
    /// User identifier for password authentication.
    pub user_id: Option<String>,
    /// User password.
    pub password: Option<String>,
    /// Project name to scope the token to.
    pub project_name: Option<String>,
    /// Project identifier to scope the token to.
    pub project_id: Option<String>,
    /// Domain of the user.
    pub user_domain_name: Option<String>,
    /// Domain of the project.
    pub project_domain_name: Option<String>,
    /// Domain used for both user and project when the specific ones are unset.
    pub domain_name: Option<String>,
    /// Application credential identifier.
    pub application_credential_id: Option<String>,
    /// Application credential secret.
    pub application_credential_secret: Option<String>,
}

/// One named cloud entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct CloudEntry {
    /// Authentication parameters.
    #[serde(default)]
    pub auth: CloudAuth,
    /// Region whose endpoints should be used.
    pub region_name: Option<String>,
    /// Endpoint interface (`public`, `internal`, `admin`).
    pub interface: Option<String>,
    /// Entry in `clouds-public.yaml` providing defaults.
    pub profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: BTreeMap<String, CloudEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicCloudsFile {
    #[serde(default, rename = "public-clouds")]
    public_clouds: BTreeMap<String, CloudEntry>,
}

/// Errors raised while loading credentials.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// A credentials file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File being read.
        path: Utf8PathBuf,
        /// Underlying error.
        message: String,
    },
    /// A credentials file is not valid YAML of the expected shape.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File being parsed.
        path: Utf8PathBuf,
        /// Parser error.
        message: String,
    },
    /// The configured cloud is not defined in `clouds.yaml`.
    #[error("cloud {cloud} not found in {path}")]
    UnknownCloud {
        /// Cloud name from the provider configuration.
        cloud: String,
        /// `clouds.yaml` path.
        path: Utf8PathBuf,
    },
    /// The entry references a profile missing from `clouds-public.yaml`.
    #[error("profile {profile} not found in {path}")]
    UnknownProfile {
        /// Profile name.
        profile: String,
        /// `clouds-public.yaml` path.
        path: Utf8PathBuf,
    },
}

/// Locations of the credential files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialFiles {
    /// `clouds.yaml`.
    pub clouds: Utf8PathBuf,
    /// `secure.yaml`, if any.
    pub secure: Option<Utf8PathBuf>,
    /// `clouds-public.yaml`, if any.
    pub public: Option<Utf8PathBuf>,
}

fn pick(primary: &mut Option<String>, fallback: &Option<String>) {
    if primary.is_none() {
        primary.clone_from(fallback);
    }
}

impl CloudAuth {
    /// Fills every unset field from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        pick(&mut self.auth_url, &other.auth_url);
        pick(&mut self.username, &other.username);
        pick(&mut self.user_id, &other.user_id);
        pick(&mut self.password, &other.password);
        pick(&mut self.project_name, &other.project_name);
        pick(&mut self.project_id, &other.project_id);
        pick(&mut self.user_domain_name, &other.user_domain_name);
        pick(&mut self.project_domain_name, &other.project_domain_name);
        pick(&mut self.domain_name, &other.domain_name);
        pick(
            &mut self.application_credential_id,
            &other.application_credential_id,
        );
        pick(
            &mut self.application_credential_secret,
            &other.application_credential_secret,
        );
    }
}

impl CloudEntry {
    /// Fills every unset field from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        self.auth.fill_from(&other.auth);
        pick(&mut self.region_name, &other.region_name);
        pick(&mut self.interface, &other.interface);
        pick(&mut self.profile, &other.profile);
    }
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, CredentialsError> {
    let io_error = |message: String| CredentialsError::Io {
        path: path.to_path_buf(),
        message,
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| io_error("path has no file name".to_owned()))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(err.to_string()))
}

fn parse_yaml<T: for<'de> Deserialize<'de> + Default>(
    path: &Utf8Path,
) -> Result<T, CredentialsError> {
    let contents = read_to_string_ambient(path)?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&contents).map_err(|err| CredentialsError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Loads the named cloud entry, applying `secure.yaml` and the public
/// profile when configured.
///
/// # Errors
///
/// Returns [`CredentialsError`] when a file cannot be read or parsed, the
/// cloud is missing from `clouds.yaml`, or its profile cannot be found.
pub fn load_cloud(files: &CredentialFiles, cloud: &str) -> Result<CloudEntry, CredentialsError> {
    let clouds: CloudsFile = parse_yaml(&files.clouds)?;
    let mut entry =
        clouds
            .clouds
            .get(cloud)
            .cloned()
            .ok_or_else(|| CredentialsError::UnknownCloud {
                cloud: cloud.to_owned(),
                path: files.clouds.clone(),
            })?;

    if let Some(secure_path) = &files.secure {
        let secure: CloudsFile = parse_yaml(secure_path)?;
        if let Some(mut secrets) = secure.clouds.get(cloud).cloned() {
            secrets.fill_from(&entry);
            entry = secrets;
        }
    }

    if let (Some(profile), Some(public_path)) = (entry.profile.clone(), &files.public) {
        let public: PublicCloudsFile = parse_yaml(public_path)?;
        let defaults =
            public
                .public_clouds
                .get(&profile)
                .ok_or_else(|| CredentialsError::UnknownProfile {
                    profile: profile.clone(),
                    path: public_path.clone(),
                })?;
        entry.fill_from(defaults);
    }

    Ok(entry)
}
