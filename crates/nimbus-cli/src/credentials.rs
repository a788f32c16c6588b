use nimbus_common::Error;

/// Source of the bearer token used for every control-plane call.
///
/// `reauthenticate` is the only recovery action in the system: it is invoked
/// once after an HTTP 401 and must yield the replacement token used for all
/// subsequent calls in the run.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, Error>;

    fn reauthenticate(&self) -> Result<String, Error>;
}

/// Reads the API key from the environment: `PRD_NVCF_API_KEY` when targeting
/// production, `NVCF_API_KEY` otherwise. Re-authentication re-reads the
/// variable, picking up a key rotated by the surrounding CI job.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn for_environment(environment: &str) -> Self {
        let prefix = if environment == "production" {
            "PRD_"
        } else {
            ""
        };
        Self {
            var: format!("{prefix}NVCF_API_KEY"),
        }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn token(&self) -> Result<String, Error> {
        match std::env::var(&self.var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::MissingCredentials {
                var: self.var.clone(),
            }),
        }
    }

    fn reauthenticate(&self) -> Result<String, Error> {
        tracing::info!(var = %self.var, "re-reading API key");
        self.token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name_per_environment() {
        assert_eq!(EnvTokenProvider::for_environment("test").var, "NVCF_API_KEY");
        assert_eq!(
            EnvTokenProvider::for_environment("production").var,
            "PRD_NVCF_API_KEY"
        );
    }
}
