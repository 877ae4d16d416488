//! Test doubles shared by the lifecycle integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deskpool_common::types::{ContainerRecord, ContainerStatus, PortRange, RecordId, RuntimeId};
use deskpool_runtime::client::{
    InstanceSpec, InstanceState, RestartPolicy, RuntimeClient, RuntimeError,
};
use deskpool_runtime::lifecycle::{LifecycleManager, LifecycleSettings};
use deskpool_runtime::store::{MemoryStore, NewRecord, RecordStore, StoreError};

/// Runtime operations the fake can fail or hang on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Inspect,
    Remove,
}

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: RuntimeOp,
    pub target: String,
    pub force: bool,
}

#[derive(Debug, Default)]
struct FakeRuntimeState {
    next_id: u32,
    instances: BTreeMap<String, bool>,
    failing: HashSet<RuntimeOp>,
    hanging: HashSet<RuntimeOp>,
    calls: Vec<Call>,
    specs: Vec<InstanceSpec>,
}

/// In-memory container runtime that records every call.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeRuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent `op` fail with a command error.
    pub fn fail(&self, op: RuntimeOp) {
        let _ = self.state.lock().unwrap().failing.insert(op);
    }

    /// Makes every subsequent `op` hang far beyond any test deadline.
    pub fn hang(&self, op: RuntimeOp) {
        let _ = self.state.lock().unwrap().hanging.insert(op);
    }

    /// Deletes an instance behind the manager's back.
    pub fn vanish(&self, id: &RuntimeId) {
        let _ = self.state.lock().unwrap().instances.remove(id.as_str());
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().unwrap().instances.len()
    }

    pub fn is_running(&self, id: &RuntimeId) -> Option<bool> {
        self.state.lock().unwrap().instances.get(id.as_str()).copied()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, op: RuntimeOp) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn specs(&self) -> Vec<InstanceSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    /// Records the call and reports whether it should fail or hang.
    fn begin(&self, op: RuntimeOp, target: &str, force: bool) -> (bool, bool) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            target: target.to_string(),
            force,
        });
        (state.failing.contains(&op), state.hanging.contains(&op))
    }

    async fn enter(&self, op: RuntimeOp, target: &str, force: bool) -> Result<(), RuntimeError> {
        let (fail, hang) = self.begin(op, target, force);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if fail {
            return Err(RuntimeError::CommandFailed {
                command: format!("fake {op:?} {target}"),
                stderr: "injected failure".into(),
                exit_code: Some(1),
            });
        }
        Ok(())
    }

    fn not_found(id: &RuntimeId) -> RuntimeError {
        RuntimeError::NotFound {
            runtime_id: id.to_string(),
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn create(&self, spec: &InstanceSpec) -> Result<RuntimeId, RuntimeError> {
        self.enter(RuntimeOp::Create, &spec.image, false).await?;
        // Give concurrent creates a chance to interleave with this one.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake{:012}", state.next_id);
        let _ = state.instances.insert(id.clone(), false);
        state.specs.push(spec.clone());
        Ok(RuntimeId::new(id))
    }

    async fn start(&self, id: &RuntimeId) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Start, id.as_str(), false).await?;
        let mut state = self.state.lock().unwrap();
        let running = state.instances.get_mut(id.as_str()).ok_or_else(|| Self::not_found(id))?;
        *running = true;
        Ok(())
    }

    async fn stop(&self, id: &RuntimeId) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Stop, id.as_str(), false).await?;
        let mut state = self.state.lock().unwrap();
        let running = state.instances.get_mut(id.as_str()).ok_or_else(|| Self::not_found(id))?;
        *running = false;
        Ok(())
    }

    async fn inspect(&self, id: &RuntimeId) -> Result<InstanceState, RuntimeError> {
        self.enter(RuntimeOp::Inspect, id.as_str(), false).await?;
        let state = self.state.lock().unwrap();
        let running = state.instances.get(id.as_str()).copied().ok_or_else(|| Self::not_found(id))?;
        Ok(InstanceState { running })
    }

    async fn remove(&self, id: &RuntimeId, force: bool) -> Result<(), RuntimeError> {
        self.enter(RuntimeOp::Remove, id.as_str(), force).await?;
        let mut state = self.state.lock().unwrap();
        match state.instances.get(id.as_str()).copied() {
            None => Err(Self::not_found(id)),
            Some(true) if !force => Err(RuntimeError::CommandFailed {
                command: format!("fake rm {id}"),
                stderr: "cannot remove a running container".into(),
                exit_code: Some(1),
            }),
            Some(_) => {
                let _ = state.instances.remove(id.as_str());
                Ok(())
            }
        }
    }
}

/// Store operations [`FlakyStore`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Insert,
    Get,
    UpdateStatus,
    Delete,
    ListHostPorts,
    ListAll,
}

/// Memory store with failure injection.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<StoreOp>>,
    hanging: Mutex<HashSet<StoreOp>>,
    insert_status: Mutex<Option<ContainerStatus>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: StoreOp) {
        let _ = self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        let _ = self.failing.lock().unwrap().remove(&op);
    }

    /// Makes every subsequent `op` hang far beyond any test deadline.
    pub fn hang(&self, op: StoreOp) {
        let _ = self.hanging.lock().unwrap().insert(op);
    }

    /// Stores every subsequent insert with `status`, whatever was requested.
    pub fn insert_as(&self, status: ContainerStatus) {
        *self.insert_status.lock().unwrap() = Some(status);
    }

    /// Inserts a record directly, bypassing the manager.
    pub async fn seed(
        &self,
        runtime_id: &str,
        host_port: u16,
        status: ContainerStatus,
    ) -> ContainerRecord {
        self.inner
            .insert(NewRecord {
                runtime_id: RuntimeId::new(runtime_id),
                internal_port: 6080,
                host_port,
                status,
            })
            .await
            .unwrap()
    }

    pub async fn records(&self) -> Vec<ContainerRecord> {
        self.inner.list_all().await.unwrap()
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        let hang = self.hanging.lock().unwrap().contains(&op);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.lock().unwrap().contains(&op) {
            return Err(StoreError::Unavailable {
                message: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert(&self, mut record: NewRecord) -> Result<ContainerRecord, StoreError> {
        self.enter(StoreOp::Insert).await?;
        let forced = *self.insert_status.lock().unwrap();
        if let Some(status) = forced {
            record.status = status;
        }
        self.inner.insert(record).await
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<ContainerRecord>, StoreError> {
        self.enter(StoreOp::Get).await?;
        self.inner.get_by_id(id).await
    }

    async fn update_status(&self, id: RecordId, status: ContainerStatus) -> Result<(), StoreError> {
        self.enter(StoreOp::UpdateStatus).await?;
        self.inner.update_status(id, status).await
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete).await?;
        self.inner.delete(id).await
    }

    async fn list_host_ports(&self) -> Result<BTreeSet<u16>, StoreError> {
        self.enter(StoreOp::ListHostPorts).await?;
        self.inner.list_host_ports().await
    }

    async fn list_all(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        self.enter(StoreOp::ListAll).await?;
        self.inner.list_all().await
    }
}

pub fn settings(range: PortRange) -> LifecycleSettings {
    LifecycleSettings {
        image: "desktop-image:latest".into(),
        network: "deskpool_app_network".into(),
        internal_port: 6080,
        port_range: range,
        restart_policy: RestartPolicy::OnFailure { max_retries: 5 },
        operation_timeout: Duration::from_secs(5),
        allocation_attempts: 3,
        public_host: "localhost".into(),
    }
}

pub fn manager_with(
    runtime: &Arc<FakeRuntime>,
    store: &Arc<FlakyStore>,
    settings: LifecycleSettings,
) -> LifecycleManager {
    LifecycleManager::new(Arc::clone(runtime) as _, Arc::clone(store) as _, settings)
}

pub fn manager(runtime: &Arc<FakeRuntime>, store: &Arc<FlakyStore>) -> LifecycleManager {
    manager_with(runtime, store, settings(PortRange::new(7000, 8000)))
}
