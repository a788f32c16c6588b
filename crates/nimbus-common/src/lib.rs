pub mod error;
pub mod function;
pub mod manifest;
pub mod telemetry;

pub use error::Error;
pub use function::{DeploymentInfo, FunctionStatus, RegisteredFunction, RemoteFunction};
pub use manifest::{EnvVar, FunctionVariant, Manifest, ModelRef};
