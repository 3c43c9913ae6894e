//! In-memory engine that records every call, for tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Engine, EngineError, EngineInfo, RegistryAuth};
use crate::types::{ContainerDescriptor, ContainerRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Info,
    List,
    InspectImage(String),
    Pull { image: String, user: Option<String> },
    Create { name: String, image: String },
    Start(String),
    Restart(String, Duration),
    Stop(String, Duration),
    Remove(String, bool),
}

#[derive(Default)]
struct State {
    version: String,
    containers: Vec<ContainerRecord>,
    images: HashSet<String>,
    calls: Vec<Call>,
    next_id: u32,
    require_auth: bool,
    fail_inspect: bool,
    fail_start: bool,
}

pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_version("18.03.1-ce")
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            state: Mutex::new(State {
                version: version.to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn with_container(mut self, name: &str, status: &str) -> Self {
        let state = self.state.get_mut().unwrap();
        state.next_id += 1;
        state.containers.push(ContainerRecord {
            id: format!("existing-{}", state.next_id),
            names: vec![format!("/{}", name)],
            image: "busybox".into(),
            status: status.into(),
            ..Default::default()
        });
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.state.get_mut().unwrap().images.insert(image.to_string());
        self
    }

    /// Anonymous pulls fail with `Unauthorized`.
    pub fn require_auth(mut self) -> Self {
        self.state.get_mut().unwrap().require_auth = true;
        self
    }

    pub fn fail_inspect(mut self) -> Self {
        self.state.get_mut().unwrap().fail_inspect = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.state.get_mut().unwrap().fail_start = true;
        self
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn containers(&self) -> Vec<ContainerRecord> {
        self.state.lock().unwrap().containers.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn info(&self) -> Result<EngineInfo, EngineError> {
        self.record(Call::Info);
        Ok(EngineInfo {
            server_version: self.state.lock().unwrap().version.clone(),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        self.record(Call::List);
        Ok(self.containers())
    }

    async fn inspect_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(Call::InspectImage(image.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_inspect {
            return Err(EngineError::Api {
                status: 500,
                message: "inspect failed".into(),
            });
        }
        if state.images.contains(image) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("No such image: {}", image)))
        }
    }

    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), EngineError> {
        self.record(Call::Pull {
            image: image.to_string(),
            user: auth.map(|a| a.username.clone()),
        });
        let mut state = self.state.lock().unwrap();
        if state.require_auth && auth.is_none() {
            return Err(EngineError::Unauthorized("authentication required".into()));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        descriptor: &ContainerDescriptor,
    ) -> Result<String, EngineError> {
        self.record(Call::Create {
            name: name.to_string(),
            image: descriptor.image.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("created-{}", state.next_id);
        state.containers.push(ContainerRecord {
            id: id.clone(),
            names: vec![format!("/{}", name)],
            image: descriptor.image.clone(),
            command: descriptor.cmd.join(" "),
            status: "Created".into(),
            ..Default::default()
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Start(id.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(EngineError::Api {
                status: 500,
                message: "port is already allocated".into(),
            });
        }
        set_status(&mut state, id, "Up");
        Ok(())
    }

    async fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        self.record(Call::Restart(id.to_string(), timeout));
        set_status(&mut self.state.lock().unwrap(), id, "Up");
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        self.record(Call::Stop(id.to_string(), timeout));
        set_status(&mut self.state.lock().unwrap(), id, "Exited (0)");
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.record(Call::Remove(id.to_string(), force));
        self.state.lock().unwrap().containers.retain(|c| c.id != id);
        Ok(())
    }
}

fn set_status(state: &mut State, id: &str, status: &str) {
    if let Some(c) = state.containers.iter_mut().find(|c| c.id == id) {
        c.status = status.to_string();
    }
}
