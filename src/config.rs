use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default public registry domain.
pub const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub engine: EngineSettings,
    pub apiserver: ApiServerSettings,
    pub roster: RosterSettings,
    #[serde(default)]
    pub registries: Vec<PrivateRegistry>,
    #[serde(default)]
    pub provision: ProvisionSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// `unix:///path/to.sock`, `tcp://host:port` or `http://host:port`.
    pub endpoint: String,
    /// Supported engine versions in `major.minor.x` form.
    pub supported_versions: Vec<String>,
    pub client_timeout_secs: u64,
    /// Grace period handed to the engine on stop and restart.
    pub container_timeout_secs: u64,
}

impl EngineSettings {
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            endpoint: "unix:///var/run/system-docker.sock".into(),
            supported_versions: ["1.11.x", "1.12.x", "1.13.x", "17.03.x", "17.12.x", "18.03.x"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
            client_timeout_secs: 120,
            container_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiServerSettings {
    pub image: String,
    pub container_name: String,
    pub port: String,
    pub kube_config: PathBuf,
}

impl Default for ApiServerSettings {
    fn default() -> Self {
        Self {
            image: "cnrancher/cube-apiserver".into(),
            container_name: "cube-apiserver".into(),
            port: "9600".into(),
            kube_config: "/var/lib/rancher/cube/kube-config.yml".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RosterSettings {
    pub path: PathBuf,
    /// Template read when `path` does not exist yet.
    pub base_path: PathBuf,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            path: "/var/lib/rancher/cube/node_config.yml".into(),
            base_path: "/var/lib/rancher/cube/rke_base.yml".into(),
        }
    }
}

/// Credentials for one image registry.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct PrivateRegistry {
    /// Registry domain. Empty means [`DEFAULT_REGISTRY`].
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

impl std::fmt::Debug for PrivateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateRegistry")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvisionSettings {
    /// Cluster engine invocation; the roster path is appended as the last
    /// argument. Provisioning is skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("cube.toml"))
                .merge(Json::file("cube.json"))
                .merge(Env::prefixed("CUBE_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        for registry in &mut config.registries {
            if let Some(ref file) = registry.password_file {
                registry.password = std::fs::read_to_string(file)?.trim().to_string();
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_stock_install() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default())))
            .unwrap();
        assert_eq!(config.engine.endpoint, "unix:///var/run/system-docker.sock");
        assert_eq!(config.engine.container_timeout(), Duration::from_secs(10));
        assert_eq!(config.apiserver.container_name, "cube-apiserver");
        assert!(config.registries.is_empty());
        assert!(config.provision.command.is_none());
    }

    #[test]
    fn toml_overrides_and_password_file() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret");
        std::fs::File::create(&secret)
            .unwrap()
            .write_all(b"s3cret\n")
            .unwrap();

        let toml = format!(
            r#"
            [engine]
            endpoint = "tcp://10.0.0.1:2375"

            [[registries]]
            url = "registry.example.com"
            user = "bob"
            password_file = "{}"
            "#,
            secret.display()
        );

        let config = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(&toml)),
        )
        .unwrap();

        assert_eq!(config.engine.endpoint, "tcp://10.0.0.1:2375");
        assert_eq!(config.engine.container_timeout_secs, 10);
        assert_eq!(config.registries.len(), 1);
        assert_eq!(config.registries[0].user, "bob");
        assert_eq!(config.registries[0].password, "s3cret");
    }
}
