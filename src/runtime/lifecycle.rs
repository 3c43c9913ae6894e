use std::time::Duration;

use log::{debug, info, warn};

use super::image::{ensure_image, RegistryCredentials};
use super::Engine;
use crate::error::{Error, Result};
use crate::types::{ContainerDescriptor, ContainerRecord};

/// Keeps a single named container in its desired state.
///
/// Containers are found by exact name, ignoring the leading `/` the engine
/// puts in front of every name. Only existence matters: a stopped and a
/// running container are both "present".
pub struct ContainerManager<E> {
    engine: E,
    host: String,
    timeout: Duration,
    credentials: RegistryCredentials,
}

impl<E: Engine> ContainerManager<E> {
    pub fn new(engine: E, host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            host: host.into(),
            timeout,
            credentials: RegistryCredentials::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Restarts `name` if it exists, otherwise pulls its image if needed,
    /// creates it and starts it.
    ///
    /// A container that was created but failed to start is left in place;
    /// the next call finds it and restarts it.
    pub async fn ensure_running(&self, descriptor: &ContainerDescriptor, name: &str) -> Result<()> {
        require_name(name)?;
        if let Some(existing) = self.find(name).await? {
            info!("Restarting container {} ({})", name, existing.id);
            return self
                .engine
                .restart_container(&existing.id, self.timeout)
                .await
                .map_err(|e| Error::engine(format!("restart container {}", name), e));
        }

        ensure_image(&self.engine, &self.host, &descriptor.image, &self.credentials).await?;

        let id = self
            .engine
            .create_container(name, descriptor)
            .await
            .map_err(|e| Error::engine(format!("create container {}", name), e))?;
        self.engine
            .start_container(&id)
            .await
            .map_err(|e| Error::engine(format!("start container {} ({})", name, id), e))?;
        info!("Started container {} ({})", name, id);
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        require_name(name)?;
        match self.find(name).await? {
            Some(existing) => self
                .engine
                .stop_container(&existing.id, self.timeout)
                .await
                .map_err(|e| Error::engine(format!("stop container {}", name), e)),
            None => {
                warn!("Container {} not found, nothing to stop", name);
                Ok(())
            }
        }
    }

    /// Force-removes `name`, running or not.
    pub async fn remove(&self, name: &str) -> Result<()> {
        require_name(name)?;
        match self.find(name).await? {
            Some(existing) => self
                .engine
                .remove_container(&existing.id, true)
                .await
                .map_err(|e| Error::engine(format!("remove container {}", name), e)),
            None => {
                warn!("Container {} not found, nothing to remove", name);
                Ok(())
            }
        }
    }

    /// `None` when no container is called `name`.
    pub async fn status(&self, name: &str) -> Result<Option<ContainerRecord>> {
        require_name(name)?;
        self.find(name).await
    }

    async fn find(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let containers = self
            .engine
            .list_containers()
            .await
            .map_err(|e| Error::engine("list containers", e))?;
        let found = containers
            .into_iter()
            .find(|c| c.names.iter().any(|n| name_matches(n, name)));
        debug!(
            "Container {} is {}",
            name,
            if found.is_some() { "present" } else { "absent" }
        );
        Ok(found)
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("container name is empty".into()));
    }
    Ok(())
}

fn name_matches(candidate: &str, name: &str) -> bool {
    candidate.trim_start_matches('/') == name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateRegistry;
    use crate::runtime::fake::{Call, FakeEngine};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn manager(engine: FakeEngine) -> ContainerManager<FakeEngine> {
        ContainerManager::new(engine, "test-host", TIMEOUT)
    }

    fn descriptor() -> ContainerDescriptor {
        ContainerDescriptor {
            image: "cnrancher/cube-apiserver".into(),
            cmd: vec!["serve".into(), "--listen-addr=0.0.0.0:9600".into()],
            exposed_ports: vec!["9600/tcp".into()],
            ..Default::default()
        }
    }

    fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
        calls.iter().filter(|c| pred(c)).count()
    }

    #[tokio::test]
    async fn absent_container_is_pulled_created_and_started() {
        let m = manager(FakeEngine::new());
        m.ensure_running(&descriptor(), "cube-apiserver").await.unwrap();

        let calls = m.engine().calls();
        assert_eq!(
            calls,
            vec![
                Call::List,
                Call::InspectImage("cnrancher/cube-apiserver".into()),
                Call::Pull {
                    image: "docker.io/cnrancher/cube-apiserver:latest".into(),
                    user: None,
                },
                Call::Create {
                    name: "cube-apiserver".into(),
                    image: "cnrancher/cube-apiserver".into(),
                },
                Call::Start("created-1".into()),
            ]
        );
        assert_eq!(m.engine().containers()[0].status, "Up");
    }

    #[tokio::test]
    async fn ensure_running_twice_creates_once() {
        let m = manager(FakeEngine::new());
        m.ensure_running(&descriptor(), "cube-apiserver").await.unwrap();
        m.ensure_running(&descriptor(), "cube-apiserver").await.unwrap();

        let calls = m.engine().calls();
        assert_eq!(count(&calls, |c| matches!(c, Call::Create { .. })), 1);
        assert_eq!(calls.last(), Some(&Call::Restart("created-1".into(), TIMEOUT)));
        assert_eq!(m.engine().containers().len(), 1);
    }

    #[tokio::test]
    async fn stopped_container_is_restarted_without_pull_or_create() {
        let m = manager(FakeEngine::new().with_container("cube-apiserver", "Exited (0)"));
        m.ensure_running(&descriptor(), "cube-apiserver").await.unwrap();

        assert_eq!(
            m.engine().calls(),
            vec![Call::List, Call::Restart("existing-1".into(), TIMEOUT)]
        );
    }

    #[tokio::test]
    async fn failed_start_converges_on_retry() {
        let m = manager(FakeEngine::new().fail_start());
        assert!(m.ensure_running(&descriptor(), "cube-apiserver").await.is_err());
        assert_eq!(m.engine().containers()[0].status, "Created");

        m.engine().set_fail_start(false);
        m.ensure_running(&descriptor(), "cube-apiserver").await.unwrap();
        let calls = m.engine().calls();
        assert_eq!(count(&calls, |c| matches!(c, Call::Create { .. })), 1);
        assert_eq!(calls.last(), Some(&Call::Restart("created-1".into(), TIMEOUT)));
    }

    #[tokio::test]
    async fn similar_names_do_not_match() {
        let m = manager(
            FakeEngine::new()
                .with_container("cube-apiserver-old", "Up")
                .with_container("cube", "Up"),
        );
        assert!(m.status("cube-apiserver").await.unwrap().is_none());
        assert_eq!(
            m.status("cube").await.unwrap().unwrap().names,
            vec!["/cube".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_image_is_rejected_before_any_pull() {
        let m = manager(FakeEngine::new());
        let err = m
            .ensure_running(&ContainerDescriptor::default(), "cube-apiserver")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(m.engine().calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn configured_credentials_reach_the_pull() {
        let creds = RegistryCredentials::from_registries(&[PrivateRegistry {
            url: "registry.example.com".into(),
            user: "alice".into(),
            password: "pw".into(),
            password_file: None,
        }]);
        let m = manager(FakeEngine::new()).with_credentials(creds);
        let desc = ContainerDescriptor {
            image: "registry.example.com/cube/apiserver:1".into(),
            ..Default::default()
        };
        m.ensure_running(&desc, "cube-apiserver").await.unwrap();
        assert!(m.engine().calls().contains(&Call::Pull {
            image: "registry.example.com/cube/apiserver:1".into(),
            user: Some("alice".into()),
        }));
    }

    #[tokio::test]
    async fn stop_and_remove_absent_container_are_noops() {
        let m = manager(FakeEngine::new());
        m.stop("cube-apiserver").await.unwrap();
        m.remove("cube-apiserver").await.unwrap();
        assert_eq!(m.engine().calls(), vec![Call::List, Call::List]);
    }

    #[tokio::test]
    async fn stop_and_remove_present_container() {
        let m = manager(FakeEngine::new().with_container("cube-apiserver", "Up"));
        m.stop("cube-apiserver").await.unwrap();
        assert_eq!(
            m.status("cube-apiserver").await.unwrap().unwrap().status,
            "Exited (0)"
        );

        m.remove("cube-apiserver").await.unwrap();
        assert!(m.engine().calls().contains(&Call::Remove("existing-1".into(), true)));
        assert!(m.status("cube-apiserver").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_of_absent_container_is_not_an_error() {
        let m = manager(FakeEngine::new());
        assert_eq!(m.status("cube-apiserver").await.unwrap(), None);
    }
}
