use tracing::info;

use nimbus_common::{FunctionStatus, FunctionVariant, Manifest, RemoteFunction};

/// A manifest variant matched to its latest settled remote version.
#[derive(Debug, Clone)]
pub struct MatchedVariant {
    pub variant: FunctionVariant,
    pub current_id: String,
    pub current_version_id: String,
    pub current_status: FunctionStatus,
    /// Version ids of every candidate match, including the selected one.
    /// These are the cleanup targets after a successful update.
    pub old_version_ids: Vec<String>,
}

/// Classification of every in-scope manifest variant: each appears in exactly
/// one of the two lists.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub creates: Vec<FunctionVariant>,
    pub updates: Vec<MatchedVariant>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty()
    }
}

/// Match manifest variants against the remote function index.
///
/// Variants whose `type` does not equal `environment` are ignored entirely.
/// A remote record is a candidate when its name is one of the variant's
/// accepted aliases and its status is settled; among candidates the highest
/// version id becomes the update target. Variants with no candidate are
/// creates. Either way the variant's name is normalized to the manifest's
/// canonical name.
pub fn plan(manifest: &Manifest, index: &[RemoteFunction], environment: &str) -> Plan {
    let mut plan = Plan::default();

    for variant in manifest
        .functions
        .iter()
        .filter(|f| f.deploy_type == environment)
    {
        let aliases = alias_set(manifest, variant);
        let candidates: Vec<&RemoteFunction> = index
            .iter()
            .filter(|f| f.status.is_settled() && aliases.iter().any(|a| a == &f.name))
            .collect();

        let mut variant = variant.clone();
        variant.name = manifest.name.clone();

        match candidates
            .iter()
            .max_by(|a, b| a.version_id.cmp(&b.version_id))
        {
            Some(latest) => {
                info!(
                    name = %variant.name,
                    current_version_id = %latest.version_id,
                    current_status = ?latest.status,
                    versions = ?candidates.iter().map(|f| f.version_id.as_str()).collect::<Vec<_>>(),
                    "matched remote function versions"
                );
                plan.updates.push(MatchedVariant {
                    current_id: latest.id.clone(),
                    current_version_id: latest.version_id.clone(),
                    current_status: latest.status,
                    old_version_ids: candidates.iter().map(|f| f.version_id.clone()).collect(),
                    variant,
                });
            }
            None => plan.creates.push(variant),
        }
    }

    info!(
        updates = ?plan
            .updates
            .iter()
            .map(|m| format!("{} (ID: {})", m.variant.name, m.current_id))
            .collect::<Vec<_>>(),
        creates = ?plan.creates.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        "reconciliation plan"
    );

    plan
}

/// Remote names accepted as matches for a variant: the canonical manifest
/// name, its environment-qualified form, and the declared alias in both forms.
fn alias_set(manifest: &Manifest, variant: &FunctionVariant) -> Vec<String> {
    let mut aliases = vec![manifest.name.clone(), variant.qualified(&manifest.name)];
    if let Some(alias) = &manifest.function_alias {
        aliases.push(alias.clone());
        aliases.push(variant.qualified(alias));
    }
    aliases
}
