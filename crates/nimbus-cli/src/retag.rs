use std::path::Path;

use tracing::info;

use nimbus_common::Error;

/// Rewrite the tag component of the manifest's `fn_image` field in place.
/// Used by CI to point the launch list at a freshly built image.
pub fn set_image_tag(path: &Path, tag: &str) -> Result<(), Error> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::ManifestIo {
        path: path.display().to_string(),
        source,
    })?;
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|source| Error::ManifestParse {
            path: path.display().to_string(),
            source,
        })?;

    retag(&mut doc, tag).map_err(|detail| Error::ManifestInvalid {
        path: path.display().to_string(),
        detail,
    })?;

    let out = serde_yaml::to_string(&doc).map_err(|source| Error::ManifestParse {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, out).map_err(|source| Error::ManifestIo {
        path: path.display().to_string(),
        source,
    })?;

    info!(path = %path.display(), tag, "updated fn_image tag");
    Ok(())
}

fn retag(doc: &mut serde_yaml::Value, tag: &str) -> Result<(), String> {
    let image = doc
        .get("fn_image")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "fn_image field not found".to_string())?;
    let (repository, _) = image
        .rsplit_once(':')
        .ok_or_else(|| format!("fn_image has no tag: {image}"))?;
    let updated = format!("{repository}:{tag}");
    doc["fn_image"] = serde_yaml::Value::String(updated);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retag_replaces_only_the_tag() {
        let mut doc: serde_yaml::Value =
            serde_yaml::from_str("fn_image: nvcr.io/myorg/myteam/echo:1.0\nother: kept\n").unwrap();
        retag(&mut doc, "2.0").unwrap();
        assert_eq!(
            doc["fn_image"].as_str(),
            Some("nvcr.io/myorg/myteam/echo:2.0")
        );
        assert_eq!(doc["other"].as_str(), Some("kept"));
    }

    #[test]
    fn test_retag_missing_field() {
        let mut doc: serde_yaml::Value = serde_yaml::from_str("name: echo\n").unwrap();
        let err = retag(&mut doc, "2.0").unwrap_err();
        assert!(err.contains("fn_image"));
    }

    #[test]
    fn test_retag_untagged_image() {
        let mut doc: serde_yaml::Value = serde_yaml::from_str("fn_image: echo\n").unwrap();
        assert!(retag(&mut doc, "2.0").is_err());
    }
}
