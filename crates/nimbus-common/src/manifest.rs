use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Declarative manifest: one named deployment with one or more function
/// variants, each tagged with the environment it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Canonical function name. Every variant is registered under this name
    /// (environment-prefixed on the wire).
    pub name: String,

    /// Previous name this function was registered under. Remote versions
    /// carrying the alias (or its prefixed form) are still matched for update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_alias: Option<String>,

    /// Operator override: when set, reconciliation is skipped entirely and
    /// the run exits cleanly.
    #[serde(default)]
    pub manual_deploy: bool,

    #[serde(default)]
    pub functions: Vec<FunctionVariant>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ManifestIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| Error::ManifestParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Keep only variants whose declared name is in `names`.
    /// A `*` entry keeps everything.
    pub fn retain_named(&mut self, names: &[String]) {
        if names.iter().any(|n| n == "*") {
            return;
        }
        self.functions.retain(|f| names.iter().any(|n| n == &f.name));
    }
}

/// One environment-tagged deployment target within a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionVariant {
    /// Declared name, used for `--function-name` selection. Normalized to the
    /// manifest's canonical name during reconciliation.
    #[serde(default)]
    pub name: String,

    /// Target environment tag; variants of other environments are ignored.
    #[serde(rename = "type")]
    pub deploy_type: String,

    /// Container image reference. Passed through when it already names the
    /// registry host, otherwise composed from org/team/image.
    pub image: String,

    pub inference_url: String,
    pub inference_port: u16,
    pub health_uri: String,
    pub api_body_format: String,

    /// Registry org and team the image and model artifacts live under.
    pub org: String,
    pub team: String,

    pub gpu: String,
    pub instance_type: String,
    pub backend: String,
    pub min_instances: u32,
    pub max_instances: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_concurrency: Option<u32>,

    /// Authorizes deletion of superseded versions after a successful update.
    #[serde(default)]
    pub auto_clean: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_environment: Option<Vec<EnvVar>>,

    /// Launch arguments handed to the container entrypoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart_service_name: Option<String>,

    /// Non-model resource blocks, passed through to the wire exactly as
    /// declared; the control plane owns their schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelRef>>,
}

impl FunctionVariant {
    /// Environment tag prefixed to function names on the wire:
    /// `qa` for test deployments, `ai` for everything else.
    pub fn env_prefix(&self) -> &'static str {
        if self.deploy_type == "test" {
            "qa"
        } else {
            "ai"
        }
    }

    /// Environment-qualified form of `name`, e.g. `qa-echo`.
    pub fn qualified(&self, name: &str) -> String {
        format!("{}-{}", self.env_prefix(), name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// A model attached to a function. `uri` holds the model's storage path
/// component; the payload builder rewrites it into the canonical
/// org/team/model/version/files form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub version: String,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: echo
functions:
  - name: echo
    type: test
    image: myteam/echo:1.0
    inference_url: /v1/infer
    inference_port: 8000
    health_uri: /health
    api_body_format: CUSTOM
    org: myorg
    team: myteam
    gpu: L40
    instance_type: gl40_1.br20_2xlarge
    backend: GFN
    min_instances: 1
    max_instances: 2
"#;

    #[test]
    fn test_parse_minimal() {
        let m: Manifest = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(m.name, "echo");
        assert!(!m.manual_deploy);
        assert!(m.function_alias.is_none());
        assert_eq!(m.functions.len(), 1);

        let f = &m.functions[0];
        assert_eq!(f.deploy_type, "test");
        assert!(!f.auto_clean);
        assert!(f.container_environment.is_none());
        assert!(f.models.is_none());
        assert_eq!(f.max_request_concurrency, None);
    }

    #[test]
    fn test_parse_optionals() {
        let doc = format!(
            "{}{}",
            MINIMAL,
            r#"    auto_clean: true
    max_request_concurrency: 4
    container_environment:
      - key: MODE
        value: fast
    container_args: ["--workers", "2"]
    resources:
      - type: cpu
        amount: 4
    models:
      - name: echo-model
        version: "2"
        uri: echo-model
"#
        );
        let m: Manifest = serde_yaml::from_str(&doc).unwrap();
        let f = &m.functions[0];
        assert!(f.auto_clean);
        assert_eq!(f.max_request_concurrency, Some(4));
        assert_eq!(
            f.container_environment.as_deref(),
            Some(
                &[EnvVar {
                    key: "MODE".into(),
                    value: "fast".into()
                }][..]
            )
        );
        assert_eq!(
            f.container_args.as_deref(),
            Some(&["--workers".to_string(), "2".to_string()][..])
        );
        let resources = f.resources.as_ref().unwrap();
        assert_eq!(resources[0]["type"], "cpu");
        assert_eq!(resources[0]["amount"], 4);
        assert_eq!(f.models.as_ref().unwrap()[0].version, "2");
    }

    #[test]
    fn test_env_prefix() {
        let mut m: Manifest = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(m.functions[0].env_prefix(), "qa");
        assert_eq!(m.functions[0].qualified("echo"), "qa-echo");

        m.functions[0].deploy_type = "production".into();
        assert_eq!(m.functions[0].env_prefix(), "ai");
        assert_eq!(m.functions[0].qualified("echo"), "ai-echo");
    }

    #[test]
    fn test_retain_named() {
        let mut m: Manifest = serde_yaml::from_str(MINIMAL).unwrap();
        m.functions.push(FunctionVariant {
            name: "other".into(),
            ..m.functions[0].clone()
        });

        let mut all = m.clone();
        all.retain_named(&["*".to_string()]);
        assert_eq!(all.functions.len(), 2);

        m.retain_named(&["other".to_string()]);
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.functions[0].name, "other");
    }

    #[test]
    fn test_manual_deploy_flag() {
        let doc = MINIMAL.replace("name: echo\n", "name: echo\nmanual_deploy: true\n");
        let m: Manifest = serde_yaml::from_str(&doc).unwrap();
        assert!(m.manual_deploy);
    }
}
