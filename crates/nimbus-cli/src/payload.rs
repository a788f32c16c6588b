use serde::Serialize;

use nimbus_common::{EnvVar, FunctionVariant, ModelRef};

/// Registry host recognized in image references. Images naming any other
/// host are composed from org/team/image instead.
pub const REGISTRY_HOST: &str = "nvcr.io";

/// Function-registration request body. Optional fields absent from the
/// manifest are omitted from the wire entirely, never sent as null.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub name: String,
    pub inference_url: String,
    pub inference_port: u16,
    pub health_uri: String,
    pub container_image: String,
    pub api_body_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_environment: Option<Vec<EnvVar>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm_chart_service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelPayload>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPayload {
    pub name: String,
    pub version: String,
    pub uri: String,
}

/// Deployment-specification request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
    pub deployment_specifications: Vec<DeploymentSpecification>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpecification {
    pub gpu: String,
    pub instance_type: String,
    pub backend: String,
    pub max_instances: u32,
    pub min_instances: u32,
    pub max_request_concurrency: u32,
}

/// Build the registration payload for a variant. Pure; no network.
pub fn registration(variant: &FunctionVariant) -> RegistrationPayload {
    RegistrationPayload {
        name: variant.qualified(&variant.name),
        inference_url: variant.inference_url.clone(),
        inference_port: variant.inference_port,
        health_uri: variant.health_uri.clone(),
        container_image: container_image(variant),
        api_body_format: variant.api_body_format.clone(),
        container_environment: variant.container_environment.clone(),
        container_args: variant.container_args.clone(),
        helm_chart: variant.helm_chart.clone(),
        helm_chart_service_name: variant.helm_chart_service_name.clone(),
        resources: variant.resources.clone(),
        models: variant
            .models
            .as_ref()
            .map(|models| models.iter().map(|m| model_payload(variant, m)).collect()),
    }
}

/// Build the deployment specification for a variant. Pure; no network.
pub fn deployment(variant: &FunctionVariant) -> DeployPayload {
    DeployPayload {
        deployment_specifications: vec![DeploymentSpecification {
            gpu: variant.gpu.clone(),
            instance_type: variant.instance_type.clone(),
            backend: variant.backend.clone(),
            max_instances: variant.max_instances,
            min_instances: variant.min_instances,
            max_request_concurrency: variant.max_request_concurrency.unwrap_or(1),
        }],
    }
}

fn container_image(variant: &FunctionVariant) -> String {
    if variant.image.contains(REGISTRY_HOST) {
        variant.image.clone()
    } else {
        format!(
            "{REGISTRY_HOST}/{}/{}/{}",
            variant.org, variant.team, variant.image
        )
    }
}

/// Model storage URIs are rewritten into the canonical
/// org/team/model/version/files path.
fn model_payload(variant: &FunctionVariant, model: &ModelRef) -> ModelPayload {
    ModelPayload {
        name: model.name.clone(),
        version: model.version.clone(),
        uri: format!(
            "/v2/org/{}/team/{}/models/{}/{}/files",
            variant.org, variant.team, model.uri, model.version
        ),
    }
}
