//! In-memory doubles for the management cluster and the evroc API
//!
//! Both keep objects as JSON so any statically typed kind can be stored, and
//! both reproduce the API server behaviour the reconcilers rely on:
//! resourceVersion checks, merge patches, finalizer-gated deletion and
//! 404 on missing objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};

use super::store::ObjectStore;
use crate::cloud::types::{PublicIP, VirtualMachine};
use crate::cloud::{CloudApi, CloudConnector, NamespacedResource};
use crate::crd::capi::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};
use crate::crd::{
    BootDiskSpec, Bootstrap, Cluster, ClusterSpec, ClusterStatus, Condition, EvrocCluster,
    EvrocClusterSpec, EvrocMachine, EvrocMachineSpec, EvrocNetworkSpec, EvrocSubnetSpec, Machine,
    MachineSpec, ObjectReference,
};
use crate::error::{Error, Result};

pub const NAMESPACE: &str = "default";
pub const PROJECT: &str = "demo-project";

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}

fn kind_of<K: NamespacedResource>() -> String {
    K::kind(&()).to_string()
}

/// RFC 7386 merge of `patch` into `target`
fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let Value::Object(target) = target else {
        return;
    };
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

// ---------------------------------------------------------------------------
// Management cluster
// ---------------------------------------------------------------------------

type StoreKey = (String, String, String);

#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<BTreeMap<StoreKey, Value>>,
    next_version: AtomicUsize,
    patches: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            next_version: AtomicUsize::new(1),
            ..Default::default()
        }
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn insert<K: NamespacedResource>(&self, obj: K) {
        let mut value = serde_json::to_value(&obj).unwrap();
        value["metadata"]["resourceVersion"] = json!(self.bump());
        let key = (kind_of::<K>(), obj.namespace().unwrap(), obj.name_any());
        self.objects.lock().unwrap().insert(key, value);
    }

    pub fn read<K: NamespacedResource>(&self, name: &str) -> Option<K> {
        let key = (kind_of::<K>(), NAMESPACE.to_string(), name.to_string());
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Number of patches (main and status) applied so far
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    fn apply<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        status_only: bool,
    ) -> Result<K> {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound"));
        };

        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected) {
                return Err(api_error(409, "Conflict"));
            }
        }

        if status_only {
            apply_merge_patch(&mut current["status"], &patch["status"]);
        } else {
            let mut body = patch.clone();
            if let Some(meta) = body["metadata"].as_object_mut() {
                meta.remove("resourceVersion");
            }
            apply_merge_patch(current, &body);
        }
        current["metadata"]["resourceVersion"] = json!(self.bump());
        self.patches.fetch_add(1, Ordering::SeqCst);

        let updated: K = serde_json::from_value(current.clone())?;
        let deleting = current["metadata"]["deletionTimestamp"].is_string();
        let no_finalizers = current["metadata"]["finalizers"]
            .as_array()
            .map_or(true, |f| f.is_empty());
        if deleting && no_finalizers {
            objects.remove(&key);
        }
        Ok(updated)
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get<K: NamespacedResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        let value = self.objects.lock().unwrap().get(&key).cloned();
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    async fn patch<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        self.apply(namespace, name, patch, false)
    }

    async fn patch_status<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        self.apply(namespace, name, patch, true)
    }
}

// ---------------------------------------------------------------------------
// evroc API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CloudState {
    objects: BTreeMap<(String, String), Value>,
    calls: Vec<String>,
    failures: HashMap<(String, String), (u16, String)>,
    auto_provision: bool,
    next_address: u8,
}

impl CloudState {
    fn next_address(&mut self) -> String {
        self.next_address += 1;
        format!("203.0.113.{}", self.next_address)
    }
}

/// Fake evroc project; clones share state
#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// PublicIPs get an address and VMs start Running as soon as they are created
    pub fn auto_provisioning() -> Self {
        let cloud = Self::default();
        cloud.state.lock().unwrap().auto_provision = true;
        cloud
    }

    /// Make every `op` ("get", "list", "create", "delete") on `K` fail
    pub fn fail<K: NamespacedResource>(&self, op: &str, code: u16, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op.to_string(), kind_of::<K>()), (code, reason.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Calls in order, formatted as "<op> <Kind> <name>"
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn seed<K: NamespacedResource>(&self, obj: K) {
        let value = serde_json::to_value(&obj).unwrap();
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((kind_of::<K>(), obj.name_any()), value);
    }

    pub fn read<K: NamespacedResource>(&self, name: &str) -> Option<K> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind_of::<K>(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn allocate_public_ip(&self, name: &str, address: &str) {
        let mut state = self.state.lock().unwrap();
        let ip = state
            .objects
            .get_mut(&(kind_of::<PublicIP>(), name.to_string()))
            .unwrap();
        ip["status"] = json!({ "publicIPv4Address": address });
    }

    pub fn set_vm_state(&self, name: &str, state: &str, private_ip: &str, public_ip: &str) {
        let mut cloud = self.state.lock().unwrap();
        let vm = cloud
            .objects
            .get_mut(&(kind_of::<VirtualMachine>(), name.to_string()))
            .unwrap();
        vm["status"] = json!({
            "virtualMachineStatus": state,
            "networking": {
                "privateIPv4Address": private_ip,
                "publicIPv4Address": public_ip,
            },
        });
    }

    fn record(&self, op: &str, kind: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {} {}", op, kind, name));
        match state.failures.get(&(op.to_string(), kind.to_string())) {
            Some((code, reason)) => Err(api_error(*code, reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn get<K: NamespacedResource>(&self, name: &str) -> Result<Option<K>> {
        let kind = kind_of::<K>();
        self.record("get", &kind, name)?;
        let value = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(kind, name.to_string()))
            .cloned();
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    async fn list<K: NamespacedResource>(&self) -> Result<Vec<K>> {
        let kind = kind_of::<K>();
        self.record("list", &kind, "")?;
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn create<K: NamespacedResource>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let name = obj.name_any();
        self.record("create", &kind, &name)?;

        let mut state = self.state.lock().unwrap();
        if state.objects.contains_key(&(kind.clone(), name.clone())) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut value = serde_json::to_value(obj)?;
        if state.auto_provision {
            if kind == kind_of::<PublicIP>() {
                value["status"] = json!({ "publicIPv4Address": state.next_address() });
            } else if kind == kind_of::<VirtualMachine>() {
                let public = state.next_address();
                value["status"] = json!({
                    "virtualMachineStatus": "Running",
                    "networking": {
                        "privateIPv4Address": "10.0.0.10",
                        "publicIPv4Address": public,
                    },
                });
            }
        }
        state.objects.insert((kind, name), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: NamespacedResource>(&self, name: &str) -> Result<()> {
        let kind = kind_of::<K>();
        self.record("delete", &kind, name)?;
        match self
            .state
            .lock()
            .unwrap()
            .objects
            .remove(&(kind, name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }
}

/// Hands out clients to a single [`FakeCloud`]
pub struct FakeConnector {
    pub cloud: FakeCloud,
    pub secret_missing: bool,
}

impl FakeConnector {
    pub fn new(cloud: FakeCloud) -> Self {
        Self {
            cloud,
            secret_missing: false,
        }
    }
}

#[async_trait]
impl CloudConnector for FakeConnector {
    type Api = FakeCloud;

    async fn connect(&self, _evroc_cluster: &EvrocCluster) -> Result<FakeCloud> {
        if self.secret_missing {
            return Err(api_error(404, "NotFound").context("failed to get secret"));
        }
        Ok(self.cloud.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("{}-uid", name)),
        ..Default::default()
    }
}

fn capi_owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "cluster.x-k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        ..Default::default()
    }
}

fn cluster_label(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())])
}

/// EvrocCluster with one subnet, owned by the Cluster of the same name
pub fn evroc_cluster(name: &str) -> EvrocCluster {
    let mut metadata = meta(name);
    metadata.owner_references = Some(vec![capi_owner("Cluster", name)]);
    metadata.labels = Some(cluster_label(name));
    EvrocCluster {
        metadata,
        spec: EvrocClusterSpec {
            region: "se-sto".to_string(),
            project: PROJECT.to_string(),
            identity_secret_name: format!("{}-identity", name),
            control_plane_endpoint: Default::default(),
            network: EvrocNetworkSpec {
                vpc: Default::default(),
                subnets: vec![EvrocSubnetSpec {
                    name: format!("{}-subnet-0", name),
                    cidr_block: "10.0.0.0/24".to_string(),
                }],
            },
        },
        status: None,
    }
}

pub fn cluster(name: &str, infrastructure_ready: bool) -> Cluster {
    Cluster {
        metadata: meta(name),
        spec: ClusterSpec {
            paused: false,
            control_plane_endpoint: Default::default(),
            infrastructure_ref: Some(ObjectReference {
                api_version: Some("infrastructure.evroc.com/v1beta1".to_string()),
                kind: Some("EvrocCluster".to_string()),
                name: name.to_string(),
                namespace: Some(NAMESPACE.to_string()),
            }),
        },
        status: Some(ClusterStatus {
            infrastructure_ready,
            conditions: vec![],
        }),
    }
}

pub fn with_control_plane_initialized(mut cluster: Cluster) -> Cluster {
    cluster.status.get_or_insert_with(Default::default).conditions = vec![Condition {
        type_: "ControlPlaneInitialized".to_string(),
        status: "True".to_string(),
        ..Default::default()
    }];
    cluster
}

pub fn machine(
    name: &str,
    cluster: &str,
    control_plane: bool,
    data_secret_name: Option<&str>,
) -> Machine {
    let mut metadata = meta(name);
    let mut labels = cluster_label(cluster);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    metadata.labels = Some(labels);
    Machine {
        metadata,
        spec: MachineSpec {
            cluster_name: cluster.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: data_secret_name.map(str::to_string),
            },
            infrastructure_ref: Some(ObjectReference {
                api_version: Some("infrastructure.evroc.com/v1beta1".to_string()),
                kind: Some("EvrocMachine".to_string()),
                name: name.to_string(),
                namespace: Some(NAMESPACE.to_string()),
            }),
        },
    }
}

/// EvrocMachine owned by the Machine of the same name, asking for a public IP
pub fn evroc_machine(name: &str, cluster: &str) -> EvrocMachine {
    let mut metadata = meta(name);
    metadata.owner_references = Some(vec![capi_owner("Machine", name)]);
    metadata.labels = Some(cluster_label(cluster));
    EvrocMachine {
        metadata,
        spec: EvrocMachineSpec {
            provider_id: None,
            virtual_resources_ref: "c1a.s".to_string(),
            boot_disk: BootDiskSpec {
                image_name: "ubuntu-24.04".to_string(),
                storage_class: "persistent".to_string(),
                size_gb: 20,
            },
            ssh_key: "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDemo demo@example".to_string(),
            subnet_name: format!("{}-subnet-0", cluster),
            security_groups: vec!["default".to_string()],
            public_ip: true,
        },
        status: None,
    }
}

pub fn bootstrap_secret(name: &str, data: &str) -> Secret {
    Secret {
        metadata: meta(name),
        data: Some(BTreeMap::from([(
            "value".to_string(),
            ByteString(data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Mark an object as deleted while keeping its finalizers
pub fn deleted<K: NamespacedResource>(mut obj: K, finalizer: &str) -> K {
    let meta = obj.meta_mut();
    meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
    meta.finalizers = Some(vec![finalizer.to_string()]);
    obj
}

/// Add a finalizer so the first pass goes past finalizer registration
pub fn finalized<K: NamespacedResource>(mut obj: K, finalizer: &str) -> K {
    obj.meta_mut().finalizers = Some(vec![finalizer.to_string()]);
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_merge_patch_nested() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        apply_merge_patch(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [2, 3]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [2, 3]}));
    }

    #[tokio::test]
    async fn test_store_rejects_stale_resource_version() {
        let store = FakeStore::new();
        store.insert(evroc_cluster("demo"));
        let patch = json!({"metadata": {"resourceVersion": "stale"}, "spec": {"region": "x"}});
        let err = store
            .patch::<EvrocCluster>(NAMESPACE, "demo", &patch)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_cloud_delete_missing_is_not_found() {
        let cloud = FakeCloud::new();
        let err = cloud.delete::<PublicIP>("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
