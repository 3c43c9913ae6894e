//! Image resolution: use the locally cached image or pull it, attaching
//! private registry credentials when the image's registry has any.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info};

use super::{Engine, EngineError};
use crate::config::{PrivateRegistry, DEFAULT_REGISTRY};
use crate::error::{Error, Result};

/// Username/password handed to the engine for one pull.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

impl RegistryAuth {
    fn for_registry(registry: &PrivateRegistry, domain: &str) -> Self {
        Self {
            username: registry.user.clone(),
            password: registry.password.clone(),
            server_address: domain.to_string(),
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

/// Private registry credentials keyed by registry domain.
///
/// Built from configuration right before a pull and dropped afterwards.
#[derive(Debug, Default, Clone)]
pub struct RegistryCredentials {
    by_domain: HashMap<String, PrivateRegistry>,
}

impl RegistryCredentials {
    /// Entries without a URL are credentials for the default registry.
    pub fn from_registries(registries: &[PrivateRegistry]) -> Self {
        let by_domain = registries
            .iter()
            .map(|r| {
                let domain = if r.url.is_empty() {
                    DEFAULT_REGISTRY.to_string()
                } else {
                    r.url.clone()
                };
                (domain, r.clone())
            })
            .collect();
        Self { by_domain }
    }

    /// Exact domain match. An empty domain never matches.
    pub fn lookup(&self, domain: &str) -> Option<&PrivateRegistry> {
        if domain.is_empty() {
            return None;
        }
        self.by_domain.get(domain)
    }
}

/// A parsed, normalised image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub domain: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses `image` the way the Docker CLI normalises names: the first
    /// path component is a registry only if it looks like a host.
    pub fn parse(image: &str) -> Result<Self> {
        let invalid = || Error::InvalidReference(image.to_string());
        if image.is_empty() || image.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid()),
            None => (image, None),
        };

        let (domain, remainder) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest)
            }
            _ => (DEFAULT_REGISTRY, name),
        };
        let domain = if domain == "index.docker.io" {
            DEFAULT_REGISTRY
        } else {
            domain
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => {
                if tag.is_empty() {
                    return Err(invalid());
                }
                (repo, Some(tag.to_string()))
            }
            _ => (remainder, None),
        };

        if repository.is_empty()
            || repository.split('/').any(str::is_empty)
            || repository.chars().any(|c| c.is_ascii_uppercase())
        {
            return Err(invalid());
        }

        let repository = if domain == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        Ok(Self {
            domain: domain.to_string(),
            repository,
            tag,
            digest,
        })
    }

    /// Fully qualified name to pull; untagged references get `latest`.
    pub fn pull_name(&self) -> String {
        let mut name = format!("{}/{}", self.domain, self.repository);
        match (&self.tag, &self.digest) {
            (Some(tag), _) => {
                name.push(':');
                name.push_str(tag);
            }
            (None, None) => name.push_str(":latest"),
            (None, Some(_)) => {}
        }
        if let Some(digest) = &self.digest {
            name.push('@');
            name.push_str(digest);
        }
        name
    }
}

/// Makes sure `image` is available on the engine, pulling it if the
/// engine does not have it cached.
pub async fn ensure_image<E: Engine + ?Sized>(
    engine: &E,
    host: &str,
    image: &str,
    credentials: &RegistryCredentials,
) -> Result<()> {
    if image.trim().is_empty() {
        return Err(Error::Config("container image reference is empty".into()));
    }

    debug!("Checking image [{}] on host [{}]", image, host);
    match engine.inspect_image(image).await {
        Ok(()) => {
            debug!("No pull necessary, image [{}] exists on host [{}]", image, host);
            return Ok(());
        }
        Err(e) if e.is_not_found() => {
            debug!("Image [{}] does not exist on host [{}]", image, host);
        }
        Err(e) => {
            return Err(Error::engine(
                format!("error checking if image [{}] exists on host [{}]", image, host),
                e,
            ));
        }
    }

    let reference = ImageReference::parse(image)?;
    info!("Pulling image [{}] on host [{}]", image, host);
    pull_image(engine, &reference, credentials)
        .await
        .map_err(|e| {
            Error::engine(
                format!("can't pull image [{}] for host [{}]", image, host),
                e,
            )
        })?;
    info!("Successfully pulled image [{}] on host [{}]", image, host);
    Ok(())
}

async fn pull_image<E: Engine + ?Sized>(
    engine: &E,
    reference: &ImageReference,
    credentials: &RegistryCredentials,
) -> std::result::Result<(), EngineError> {
    let name = reference.pull_name();
    match credentials.lookup(&reference.domain) {
        None => engine.pull_image(&name, None).await,
        Some(registry) if reference.domain == DEFAULT_REGISTRY => {
            pull_with_privilege(engine, &name, || {
                RegistryAuth::for_registry(registry, &reference.domain)
            })
            .await
        }
        Some(registry) => {
            debug!("Using credentials for registry [{}]", reference.domain);
            let auth = RegistryAuth::for_registry(registry, &reference.domain);
            engine.pull_image(&name, Some(&auth)).await
        }
    }
}

/// Pulls anonymously and, if the registry asks for credentials, asks
/// `privilege` for them and retries exactly once.
async fn pull_with_privilege<E, F>(
    engine: &E,
    name: &str,
    privilege: F,
) -> std::result::Result<(), EngineError>
where
    E: Engine + ?Sized,
    F: FnOnce() -> RegistryAuth,
{
    match engine.pull_image(name, None).await {
        Err(EngineError::Unauthorized(message)) => {
            debug!(
                "Registry requested credentials for [{}] ({}), retrying with auth",
                name, message
            );
            let auth = privilege();
            engine.pull_image(name, Some(&auth)).await
        }
        other => other,
    }
}
