use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the control plane for function versions and
/// deployments. Statuses introduced after this enum was written deserialize
/// as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionStatus {
    Active,
    Deploying,
    Error,
    Inactive,
    #[serde(other)]
    Unknown,
}

impl FunctionStatus {
    /// A version in a settled state can be selected as the update target.
    /// A version mid-deployment (or in an unrecognized state) cannot.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            FunctionStatus::Active | FunctionStatus::Error | FunctionStatus::Inactive
        )
    }
}

/// One registered function version, as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFunction {
    pub id: String,
    pub name: String,
    pub version_id: String,
    pub status: FunctionStatus,
}

/// Identifiers of the version produced by a registration call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredFunction {
    pub id: String,
    pub version_id: String,
}

/// Deployment state reported by the runtime host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub function_status: FunctionStatus,
}
