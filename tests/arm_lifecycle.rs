//! Integration tests against a fake Resource Manager endpoint
//!
//! An axum server on localhost stands in for management.azure.com and the
//! token endpoint. Deployments it accepts report `Running` for a couple of
//! polls before succeeding; VM power actions update the stored instance
//! view.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use dashmap::DashMap;
use serde_json::{json, Value};

use azvm::client::{
    ArmClient, ClientError, ClientSecretCredential, Credential, ResourceGroupRef, ResourceManager,
};
use azvm::cluster::{ActionOutcome, ClusterState, PowerState, VmCluster, WaitPolicy};
use azvm::config::DeploymentSpec;
use azvm::context::Context;
use azvm::deploy::{Deployer, SubmitOptions};
use azvm::template::TemplateStore;

const TOKEN: &str = "static-token";
const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHk azureuser@host";

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    api_version: Option<String>,
    authorization: Option<String>,
    request_id: Option<String>,
    body: Option<Value>,
}

#[derive(Default)]
struct FakeArm {
    resources: DashMap<String, Value>,
    pending_polls: DashMap<String, usize>,
    requests: Mutex<Vec<Recorded>>,
    tokens_issued: AtomicUsize,
}

impl FakeArm {
    fn insert(&self, path: &str, value: Value) {
        self.resources.insert(path.to_ascii_lowercase(), value);
    }

    fn contains(&self, path: &str) -> bool {
        self.resources.contains_key(&path.to_ascii_lowercase())
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn arm_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/subscriptions/"))
            .collect()
    }

    fn set_power_state(&self, vm_path: &str, state: &str) {
        self.insert(
            &format!("{}/instanceView", vm_path),
            json!({"statuses": [
                {"code": "ProvisioningState/succeeded"},
                {"code": format!("PowerState/{}", state)}
            ]}),
        );
    }

    fn seed_deployment(&self, group: &ResourceGroupRef, name: &str, body: Value) {
        self.insert(&group.deployment_path(name), body);
    }

    fn seed_vm(&self, group: &ResourceGroupRef, name: &str) {
        let vm_path = group.vm_path(name);
        let nic_id = group.resource_path("Microsoft.Network/networkInterfaces", &format!("{}-nic", name));
        let pip_id = group.resource_path("Microsoft.Network/publicIPAddresses", &format!("{}-ip", name));
        let os_disk = group.resource_path("Microsoft.Compute/disks", &format!("{}_osdisk", name));

        self.insert(
            &vm_path,
            json!({
                "id": vm_path,
                "name": name,
                "location": "australiaeast",
                "properties": {
                    "provisioningState": "Succeeded",
                    "hardwareProfile": {"vmSize": "Standard_DS3_v2"},
                    "storageProfile": {
                        "osDisk": {"osType": "Linux", "name": format!("{}_osdisk", name), "managedDisk": {"id": os_disk}},
                        "dataDisks": []
                    },
                    "networkProfile": {"networkInterfaces": [{"id": nic_id}]}
                }
            }),
        );
        self.set_power_state(&vm_path, "running");
        self.insert(&os_disk, json!({"name": format!("{}_osdisk", name)}));
        self.insert(
            &nic_id,
            json!({"properties": {"ipConfigurations": [{"properties": {
                "privateIPAddress": "10.0.0.4",
                "publicIPAddress": {"id": pip_id}
            }}]}}),
        );
        self.insert(
            &pip_id,
            json!({"properties": {
                "ipAddress": "20.70.1.2",
                "dnsSettings": {"fqdn": format!("{}.australiaeast.cloudapp.azure.com", name)}
            }}),
        );
    }
}

fn arm_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": code, "message": message}})),
    )
        .into_response()
}

async fn handle(
    State(arm): State<Arc<FakeArm>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();

    if path.ends_with("/oauth2/v2.0/token") {
        let form = String::from_utf8_lossy(&body);
        if !form.contains("grant_type=client_credentials") || !form.contains("client_secret=s3cret") {
            return (StatusCode::UNAUTHORIZED, "invalid_client").into_response();
        }
        let n = arm.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        return Json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": format!("issued-{}", n)
        }))
        .into_response();
    }

    let api_version = uri.query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("api-version="))
            .map(String::from)
    });
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let authorization = header_str(header::AUTHORIZATION.as_str());
    arm.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        api_version: api_version.clone(),
        authorization: authorization.clone(),
        request_id: header_str("x-ms-client-request-id"),
        body: serde_json::from_slice(&body).ok(),
    });

    if api_version.is_none() {
        return arm_error(
            StatusCode::BAD_REQUEST,
            "MissingApiVersionParameter",
            "The api-version query parameter is required",
        );
    }
    if !authorization.is_some_and(|a| a.starts_with("Bearer ")) {
        return arm_error(StatusCode::UNAUTHORIZED, "AuthenticationFailed", "No bearer token");
    }

    let key = path.to_ascii_lowercase();
    let is_deployment = key.contains("/providers/microsoft.resources/deployments/");

    if method == Method::GET {
        let remaining = arm.pending_polls.get_mut(&key).map(|mut left| {
            *left = left.saturating_sub(1);
            *left
        });
        let Some(mut stored) = arm.resources.get_mut(&key) else {
            return arm_error(StatusCode::NOT_FOUND, "ResourceNotFound", &format!("{} not found", path));
        };
        if remaining == Some(0) {
            stored["properties"]["provisioningState"] = json!("Succeeded");
        }
        return Json(stored.clone()).into_response();
    }

    if method == Method::PUT {
        let mut stored: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        if is_deployment {
            stored["properties"]["provisioningState"] = json!("Running");
            arm.pending_polls.insert(key.clone(), 2);
        }
        arm.resources.insert(key, stored.clone());
        return (StatusCode::CREATED, Json(stored)).into_response();
    }

    if method == Method::PATCH {
        let patch: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let Some(mut stored) = arm.resources.get_mut(&key) else {
            return arm_error(StatusCode::NOT_FOUND, "ResourceNotFound", &format!("{} not found", path));
        };
        if let Some(size) = patch["properties"]["hardwareProfile"]["vmSize"].as_str() {
            stored["properties"]["hardwareProfile"]["vmSize"] = json!(size);
        }
        return Json(stored.clone()).into_response();
    }

    if method == Method::POST {
        let Some((vm_path, action)) = path.rsplit_once('/') else {
            return arm_error(StatusCode::BAD_REQUEST, "InvalidRequest", "bad path");
        };
        if !arm.contains(vm_path) {
            return arm_error(StatusCode::NOT_FOUND, "ResourceNotFound", vm_path);
        }
        match action {
            "start" | "restart" => arm.set_power_state(vm_path, "running"),
            "deallocate" => arm.set_power_state(vm_path, "deallocated"),
            "powerOff" => arm.set_power_state(vm_path, "stopped"),
            "runCommand" => {}
            other => {
                return arm_error(StatusCode::BAD_REQUEST, "InvalidAction", other);
            }
        }
        return StatusCode::ACCEPTED.into_response();
    }

    if method == Method::DELETE {
        return match arm.resources.remove(&key) {
            Some(_) => StatusCode::OK.into_response(),
            None => arm_error(StatusCode::NOT_FOUND, "ResourceNotFound", &format!("{} not found", path)),
        };
    }

    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn spawn_fake(arm: Arc<FakeArm>) -> String {
    let app = Router::new().fallback(handle).with_state(arm);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake ARM endpoint");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn group() -> ResourceGroupRef {
    ResourceGroupRef::new("00000000-0000-0000-0000-000000000001", "rg-test")
}

fn static_client(base: &str) -> Arc<dyn ResourceManager> {
    Arc::new(ArmClient::with_base_url(base, Credential::token_static(TOKEN)))
}

#[tokio::test]
async fn test_deploy_waits_and_starts_stopped_vm() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;
    arm.seed_vm(&group(), "web");

    let context = Context::new("test", group().subscription_id)
        .with_resource_group("rg-test")
        .with_location("australiaeast");
    let deployer = Deployer::new(static_client(&base), context, TemplateStore::builtin())
        .with_wait_policy(WaitPolicy::immediate(5));

    let spec = DeploymentSpec::from_str(&format!(
        r#"{{
            // single Ubuntu VM with one data disk
            "name": "web",
            "os": "ubuntu",
            "user": {{"username": "azureuser", "sshkey": "{}"}},
            "datadisks": [{{"size": 64}}]
        }}"#,
        KEY
    ))
    .unwrap();

    let plan = deployer.plan(&spec).await.unwrap();
    assert_eq!(plan.kind.file_name(), "ubuntu_vm_key.json");

    let options = SubmitOptions {
        create_resource_group: true,
        wait: true,
    };
    let mut cluster = deployer.submit(&plan, options).await.unwrap();
    assert_eq!(cluster.state(), &ClusterState::Ready);
    assert_eq!(cluster.instances().len(), 1);
    let vm = &cluster.instances()[0];
    assert_eq!(vm.public_ip.as_deref(), Some("20.70.1.2"));
    assert_eq!(vm.fqdn.as_deref(), Some("web.australiaeast.cloudapp.azure.com"));

    let requests = arm.arm_requests();
    assert!(requests.iter().all(|r| r.api_version.is_some()));
    assert!(requests
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Bearer static-token")));
    assert!(requests.iter().all(|r| r.request_id.is_some()));

    let puts: Vec<&Recorded> = requests.iter().filter(|r| r.method == Method::PUT).collect();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].path, group().path());
    assert_eq!(puts[0].body.as_ref().unwrap()["location"], "australiaeast");
    let deployment = puts[1].body.as_ref().unwrap();
    assert_eq!(deployment["properties"]["mode"], "Incremental");
    assert_eq!(deployment["properties"]["parameters"]["sshKeyData"]["value"], KEY);

    // the deployment reported Running before it succeeded
    let deployment_gets = requests
        .iter()
        .filter(|r| r.method == Method::GET && r.path == group().deployment_path("web"))
        .count();
    assert!(deployment_gets >= 2);

    let outcome = cluster.stop(true, true).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Applied(1));
    assert_eq!(cluster.instances()[0].power_state, PowerState::Deallocated);

    let outcome = cluster.start(false).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Applied(1));
    assert!(cluster.instances()[0].is_running());
}

#[tokio::test]
async fn test_in_progress_deployment_is_informational() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;
    let path = group().deployment_path("slow");
    arm.seed_deployment(
        &group(),
        "slow",
        json!({"properties": {
            "provisioningState": "Running",
            "parameters": {"vmName": {"value": "slow"}}
        }}),
    );
    arm.pending_polls.insert(path.to_ascii_lowercase(), 100);

    let mut cluster =
        VmCluster::lookup_with_policy(static_client(&base), group(), "slow", WaitPolicy::immediate(1))
            .await
            .unwrap();
    assert_eq!(cluster.state(), &ClusterState::DeploymentInProgress);
    assert!(cluster.instances().is_empty());

    let outcome = cluster.start(false).await.unwrap();
    assert_eq!(outcome, ActionOutcome::DeploymentInProgress);
    assert!(arm
        .arm_requests()
        .iter()
        .all(|r| r.method == Method::GET));
}

#[tokio::test]
async fn test_error_body_maps_to_api_error() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;
    let client = static_client(&base);

    let err = client
        .get(&group().vm_path("missing"), "2023-09-01")
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, code, .. } => {
            assert_eq!(status, 404);
            assert_eq!(code.as_deref(), Some("ResourceNotFound"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }

    // deleting something that is already gone succeeds
    client
        .delete(&group().vm_path("missing"), "2023-09-01")
        .await
        .unwrap();

    let err = VmCluster::lookup(client, group(), "nope").await.err().unwrap();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_delete_frees_resources_in_dependency_order() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;
    let g = group();
    arm.seed_vm(&g, "db");

    let vnet = g.resource_path("Microsoft.Network/virtualNetworks", "db-vnet");
    let nsg = g.resource_path("Microsoft.Network/networkSecurityGroups", "db-nsg");
    let nic = g.resource_path("Microsoft.Network/networkInterfaces", "db-nic");
    let pip = g.resource_path("Microsoft.Network/publicIPAddresses", "db-ip");
    let data = g.resource_path("Microsoft.Compute/disks", "db_data1");
    arm.insert(&vnet, json!({}));
    arm.insert(&nsg, json!({}));
    arm.insert(&data, json!({}));
    arm.seed_deployment(
        &g,
        "db",
        json!({"properties": {
            "provisioningState": "Succeeded",
            "parameters": {"vmName": {"value": "db"}},
            "outputResources": [
                {"id": vnet}, {"id": nsg}, {"id": pip}, {"id": nic}, {"id": data}, {"id": g.vm_path("db")}
            ]
        }}),
    );

    let cluster = VmCluster::lookup_with_policy(static_client(&base), g.clone(), "db", WaitPolicy::immediate(3))
        .await
        .unwrap();
    cluster.delete(true).await.unwrap();

    let deletes: Vec<String> = arm
        .arm_requests()
        .into_iter()
        .filter(|r| r.method == Method::DELETE)
        .map(|r| r.path.to_ascii_lowercase())
        .collect();
    let position = |needle: &str| {
        deletes
            .iter()
            .position(|p| p.contains(&needle.to_ascii_lowercase()))
            .unwrap_or_else(|| panic!("{} was not deleted", needle))
    };

    let vm = position("/virtualMachines/db");
    let os_disk = position("/disks/db_osdisk");
    let data_disk = position("/disks/db_data1");
    let nic_pos = position("/networkInterfaces/db-nic");
    let pip_pos = position("/publicIPAddresses/db-ip");
    let nsg_pos = position("/networkSecurityGroups/db-nsg");
    let vnet_pos = position("/virtualNetworks/db-vnet");
    let deployment = position("/deployments/db");

    assert!(vm < os_disk && vm < data_disk);
    assert!(os_disk < nic_pos && data_disk < nic_pos);
    assert!(nic_pos < pip_pos);
    assert!(pip_pos < nsg_pos);
    assert!(nsg_pos < vnet_pos);
    assert_eq!(deployment, deletes.len() - 1);

    assert!(!arm.contains(&g.vm_path("db")));
    assert!(!arm.contains(&vnet));
    assert!(!arm.contains(&g.deployment_path("db")));
}

#[tokio::test]
async fn test_client_secret_token_is_cached() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;
    arm.seed_vm(&group(), "app");

    let credential = ClientSecretCredential::new("tenant-1", "app-id", "s3cret", &base)
        .with_authority(&base);
    let client = ArmClient::with_base_url(&base, Credential::ClientSecret(credential));

    client.get(&group().vm_path("app"), "2023-09-01").await.unwrap();
    client.get(&group().vm_path("app"), "2023-09-01").await.unwrap();

    assert_eq!(arm.tokens_issued.load(Ordering::SeqCst), 1);
    assert_eq!(arm.arm_requests().len(), 2);
    assert!(arm
        .arm_requests()
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Bearer issued-1")));
}

#[tokio::test]
async fn test_bad_secret_is_auth_error() {
    let arm = Arc::new(FakeArm::default());
    let base = spawn_fake(arm.clone()).await;

    let credential = ClientSecretCredential::new("tenant-1", "app-id", "wrong", &base)
        .with_authority(&base);
    let client = ArmClient::with_base_url(&base, Credential::ClientSecret(credential));

    let err = client.get(&group().path(), "2022-09-01").await.unwrap_err();
    assert!(matches!(err, ClientError::Auth(_)));
    assert!(arm.arm_requests().is_empty());
}
