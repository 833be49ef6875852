//! Test utilities for unit testing the reconciler
//!
//! This module provides resource builders and a canned Kubernetes API server
//! that a `kube::Client` can talk to without a cluster.

use axum::http::{Request, Response, StatusCode};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::client::Body;
use kube::Client;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

pub const VM_PATH: &str = "/apis/vmoperator.vmware.com/v1alpha1/namespaces/team-a/virtualmachines/web";
pub const CLASS_PATH: &str = "/apis/vmoperator.vmware.com/v1alpha1/virtualmachineclasses/small";

/// Helper to create a test VirtualMachine
pub fn create_test_vm(namespace: &str, name: &str) -> VirtualMachine {
    VirtualMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: VirtualMachineSpec {
            image_name: "ubuntu".to_string(),
            class_name: "small".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test VirtualMachineClass
pub fn create_test_class(name: &str) -> VirtualMachineClass {
    let mut class = VirtualMachineClass::new(
        name,
        VirtualMachineClassSpec {
            hardware: VirtualMachineClassHardware {
                cpus: 2,
                memory: "4Gi".to_string(),
            },
            ..Default::default()
        },
    );
    class.metadata.resource_version = Some("1".to_string());
    class
}

/// Kubernetes API answering from a fixed set of objects.
///
/// GET and PATCH return the stored object unchanged (a trailing `/status`
/// addresses the same object); unknown paths answer 404. Every request is
/// recorded as `(method, path)`.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    objects: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, object: &impl serde::Serialize) {
        let value = serde_json::to_value(object).unwrap();
        self.objects.lock().unwrap().insert(path.to_string(), value);
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether a request with `method` was made to `path`.
    pub fn received(&self, method: &str, path: &str) -> bool {
        self.requests().iter().any(|(m, p)| m == method && p == path)
    }

    pub fn client(&self) -> Client {
        let server = self.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let server = server.clone();
            async move { Ok::<_, Infallible>(server.respond(request.method().as_str(), request.uri().path())) }
        });
        Client::new(service, "default")
    }

    fn respond(&self, method: &str, path: &str) -> Response<Body> {
        self.requests.lock().unwrap().push((method.to_string(), path.to_string()));

        let object_path = path.strip_suffix("/status").unwrap_or(path);
        let object = self.objects.lock().unwrap().get(object_path).cloned();
        let (status, body) = match object {
            Some(object) => (StatusCode::OK, object),
            None => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "kind": "Status",
                    "apiVersion": "v1",
                    "metadata": {},
                    "status": "Failure",
                    "message": format!("{} not found", path),
                    "reason": "NotFound",
                    "code": 404,
                }),
            ),
        };
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }
}
