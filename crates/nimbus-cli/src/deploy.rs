use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use nimbus_common::{Error, FunctionStatus, FunctionVariant, RegisteredFunction};

use crate::client::{with_reauth, ControlPlane};
use crate::credentials::TokenProvider;
use crate::payload;
use crate::reconcile::{MatchedVariant, Plan};

/// Tuning for the deployment driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Delay between deployment status polls.
    pub poll_interval: Duration,
    /// Wall-clock deadline for a deployment to reach ACTIVE, measured from
    /// poll-loop entry.
    pub poll_timeout: Duration,
    /// Grace between the deploy request and the first status poll, letting
    /// the control plane register its own state transition.
    pub pre_poll_delay: Duration,
    /// Fetch and print the deployment log delta each poll cycle.
    pub tail_log: bool,
    /// Print the built payloads and perform no control-plane mutation.
    pub debug: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(45),
            poll_timeout: Duration::from_secs(3600),
            pre_poll_delay: Duration::from_secs(2),
            tail_log: true,
            debug: false,
        }
    }
}

/// Drives every planned function to an ACTIVE deployment, strictly
/// sequentially: the create list first, then the update list, each function
/// fully registered, deployed and polled before the next begins. Any
/// unrecovered error aborts the whole run; remaining functions are not
/// attempted.
pub struct Driver<'a> {
    api: &'a dyn ControlPlane,
    credentials: &'a dyn TokenProvider,
    config: DriverConfig,
}

impl<'a> Driver<'a> {
    pub fn new(
        api: &'a dyn ControlPlane,
        credentials: &'a dyn TokenProvider,
        config: DriverConfig,
    ) -> Self {
        Self {
            api,
            credentials,
            config,
        }
    }

    pub async fn run(&self, plan: &Plan) -> Result<(), Error> {
        if !plan.creates.is_empty() {
            info!(count = plan.creates.len(), "processing function registrations: create");
            for variant in &plan.creates {
                self.deploy_one(variant, None).await?;
            }
        }
        if !plan.updates.is_empty() {
            info!(count = plan.updates.len(), "processing function registrations: update");
            for matched in &plan.updates {
                self.deploy_one(&matched.variant, Some(matched)).await?;
            }
        }
        Ok(())
    }

    /// Register, deploy and poll one function; clean superseded versions on
    /// the update path when the manifest opts in.
    async fn deploy_one(
        &self,
        variant: &FunctionVariant,
        update: Option<&MatchedVariant>,
    ) -> Result<(), Error> {
        let registration = payload::registration(variant);
        let spec = payload::deployment(variant);

        if self.config.debug {
            info!(
                registration = %serde_json::to_string_pretty(&registration).unwrap_or_default(),
                deployment = %serde_json::to_string_pretty(&spec).unwrap_or_default(),
                "debug mode: skipping control-plane calls"
            );
            return Ok(());
        }

        let registration = &registration;
        let registered = match update {
            Some(matched) => {
                info!(
                    id = %matched.current_id,
                    current_version_id = %matched.current_version_id,
                    current_status = ?matched.current_status,
                    "updating existing function"
                );
                let id = matched.current_id.as_str();
                with_reauth(self.credentials, |token| async move {
                    self.api.create_version(&token, id, registration).await
                })
                .await?
            }
            None => {
                with_reauth(self.credentials, |token| async move {
                    self.api.create_function(&token, registration).await
                })
                .await?
            }
        };
        info!(
            id = %registered.id,
            version_id = %registered.version_id,
            "function registered, initializing deployment"
        );

        let spec = &spec;
        let registered_ref = &registered;
        with_reauth(self.credentials, |token| async move {
            self.api
                .request_deployment(&token, &registered_ref.id, &registered_ref.version_id, spec)
                .await
        })
        .await?;

        tokio::time::sleep(self.config.pre_poll_delay).await;
        self.poll_until_active(&registered).await?;

        if let Some(matched) = update {
            if variant.auto_clean {
                self.clean_old_versions(matched).await?;
            }
        }
        Ok(())
    }

    /// Poll deployment status until ACTIVE or the deadline elapses.
    ///
    /// A 401 re-authenticates and continues the loop without counting as a
    /// poll; the deadline keeps running. Any other error is fatal.
    async fn poll_until_active(&self, function: &RegisteredFunction) -> Result<(), Error> {
        let start = Instant::now();
        let mut tail = self.config.tail_log.then(LogTail::default);

        loop {
            if start.elapsed() >= self.config.poll_timeout {
                warn!(
                    id = %function.id,
                    version_id = %function.version_id,
                    "deployment did not meet success condition before the deadline"
                );
                return Err(Error::DeployTimeout {
                    elapsed_secs: start.elapsed().as_secs(),
                });
            }

            let token = self.credentials.token()?;
            match self
                .api
                .deployment_status(&token, &function.id, &function.version_id)
                .await
            {
                Ok(deployment) => {
                    if let Some(tail) = tail.as_mut() {
                        tail.report(self.api, &token, function).await;
                    }
                    if deployment.function_status == FunctionStatus::Active {
                        info!(
                            id = %function.id,
                            elapsed_secs = start.elapsed().as_secs(),
                            "deployment met success condition"
                        );
                        return Ok(());
                    }
                    info!(
                        id = %function.id,
                        status = ?deployment.function_status,
                        "waiting for function deployment"
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(Error::AuthExpired) => {
                    info!("401 encountered during status poll, re-authenticating");
                    self.credentials.reauthenticate()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn clean_old_versions(&self, matched: &MatchedVariant) -> Result<(), Error> {
        info!(
            name = %matched.variant.name,
            versions = ?matched.old_version_ids,
            "deleting superseded function versions"
        );
        let id = matched.current_id.as_str();
        for version_id in &matched.old_version_ids {
            with_reauth(self.credentials, |token| async move {
                self.api.delete_version(&token, id, version_id).await
            })
            .await?;
        }
        Ok(())
    }
}

/// Best-effort deployment log tailing. Reports only content appended since
/// the previous cycle; failures are swallowed so they cannot affect the
/// deployment outcome.
#[derive(Default)]
struct LogTail {
    previous: String,
}

impl LogTail {
    async fn report(&mut self, api: &dyn ControlPlane, token: &str, function: &RegisteredFunction) {
        match api
            .deployment_log(token, &function.id, &function.version_id)
            .await
        {
            Ok(current) => {
                let fresh = current
                    .strip_prefix(self.previous.as_str())
                    .unwrap_or(current.as_str());
                if !fresh.trim().is_empty() {
                    info!("deployment log:\n{fresh}");
                }
                self.previous = current;
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch deployment log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use nimbus_common::{DeploymentInfo, Manifest, RemoteFunction};

    use crate::payload::{DeployPayload, RegistrationPayload};
    use crate::reconcile;

    #[derive(Default)]
    struct MockControlPlane {
        statuses: Mutex<VecDeque<Result<DeploymentInfo, Error>>>,
        polls: AtomicUsize,
        creates: AtomicUsize,
        versions: AtomicUsize,
        deploys: AtomicUsize,
        deletes: Mutex<Vec<(String, String)>>,
    }

    impl MockControlPlane {
        fn with_statuses(statuses: Vec<Result<DeploymentInfo, Error>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }
    }

    fn status(s: FunctionStatus) -> Result<DeploymentInfo, Error> {
        Ok(DeploymentInfo { function_status: s })
    }

    #[async_trait]
    impl ControlPlane for MockControlPlane {
        async fn list_functions(&self, _token: &str) -> Result<Vec<RemoteFunction>, Error> {
            Ok(Vec::new())
        }

        async fn create_function(
            &self,
            _token: &str,
            _payload: &RegistrationPayload,
        ) -> Result<RegisteredFunction, Error> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(RegisteredFunction {
                id: "fn-1".to_string(),
                version_id: "9".to_string(),
            })
        }

        async fn create_version(
            &self,
            _token: &str,
            function_id: &str,
            _payload: &RegistrationPayload,
        ) -> Result<RegisteredFunction, Error> {
            self.versions.fetch_add(1, Ordering::SeqCst);
            Ok(RegisteredFunction {
                id: function_id.to_string(),
                version_id: "9".to_string(),
            })
        }

        async fn request_deployment(
            &self,
            _token: &str,
            _function_id: &str,
            _version_id: &str,
            _spec: &DeployPayload,
        ) -> Result<DeploymentInfo, Error> {
            self.deploys.fetch_add(1, Ordering::SeqCst);
            Ok(DeploymentInfo {
                function_status: FunctionStatus::Deploying,
            })
        }

        async fn deployment_status(
            &self,
            _token: &str,
            _function_id: &str,
            _version_id: &str,
        ) -> Result<DeploymentInfo, Error> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| status(FunctionStatus::Deploying))
        }

        async fn deployment_log(
            &self,
            _token: &str,
            _function_id: &str,
            _version_id: &str,
        ) -> Result<String, Error> {
            Ok(String::new())
        }

        async fn delete_version(
            &self,
            _token: &str,
            function_id: &str,
            version_id: &str,
        ) -> Result<(), Error> {
            self.deletes
                .lock()
                .unwrap()
                .push((function_id.to_string(), version_id.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTokens {
        reauths: AtomicUsize,
    }

    impl TokenProvider for MockTokens {
        fn token(&self) -> Result<String, Error> {
            Ok("token-1".to_string())
        }

        fn reauthenticate(&self) -> Result<String, Error> {
            self.reauths.fetch_add(1, Ordering::SeqCst);
            Ok("token-2".to_string())
        }
    }

    fn test_config() -> DriverConfig {
        DriverConfig {
            tail_log: false,
            ..DriverConfig::default()
        }
    }

    fn registered() -> RegisteredFunction {
        RegisteredFunction {
            id: "fn-1".to_string(),
            version_id: "9".to_string(),
        }
    }

    fn variant(name: &str, deploy_type: &str) -> FunctionVariant {
        FunctionVariant {
            name: name.to_string(),
            deploy_type: deploy_type.to_string(),
            image: "myteam/echo:1.0".to_string(),
            inference_url: "/v1/infer".to_string(),
            inference_port: 8000,
            health_uri: "/health".to_string(),
            api_body_format: "CUSTOM".to_string(),
            org: "myorg".to_string(),
            team: "myteam".to_string(),
            gpu: "L40".to_string(),
            instance_type: "gl40_1.br20_2xlarge".to_string(),
            backend: "GFN".to_string(),
            min_instances: 1,
            max_instances: 2,
            max_request_concurrency: None,
            auto_clean: false,
            container_environment: None,
            container_args: None,
            helm_chart: None,
            helm_chart_service_name: None,
            resources: None,
            models: None,
        }
    }

    fn manifest(variants: Vec<FunctionVariant>) -> Manifest {
        Manifest {
            name: "echo".to_string(),
            function_alias: None,
            manual_deploy: false,
            functions: variants,
        }
    }

    fn remote(id: &str, name: &str, version_id: &str, status: FunctionStatus) -> RemoteFunction {
        RemoteFunction {
            id: id.to_string(),
            name: name.to_string(),
            version_id: version_id.to_string(),
            status,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_after_exact_poll_count() {
        let api = MockControlPlane::with_statuses(vec![
            status(FunctionStatus::Deploying),
            status(FunctionStatus::Deploying),
            status(FunctionStatus::Active),
        ]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        driver.poll_until_active(&registered()).await.unwrap();

        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
        assert_eq!(tokens.reauths.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_deadline_exceeded() {
        // Two intervals outrun the deadline before a third poll happens.
        let api = MockControlPlane::default();
        let tokens = MockTokens::default();
        let config = DriverConfig {
            poll_interval: Duration::from_secs(45),
            poll_timeout: Duration::from_secs(60),
            ..test_config()
        };
        let driver = Driver::new(&api, &tokens, config);

        let err = driver.poll_until_active(&registered()).await.unwrap_err();

        assert!(matches!(err, Error::DeployTimeout { .. }));
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_recovers_from_single_401() {
        let api = MockControlPlane::with_statuses(vec![
            Err(Error::AuthExpired),
            status(FunctionStatus::Deploying),
            status(FunctionStatus::Active),
        ]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        driver.poll_until_active(&registered()).await.unwrap();

        assert_eq!(api.polls.load(Ordering::SeqCst), 3);
        assert_eq!(tokens.reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_other_http_error_is_fatal() {
        let api = MockControlPlane::with_statuses(vec![Err(Error::Http {
            status: 500,
            url: "https://runtime.example".to_string(),
            body: String::new(),
        })]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        let err = driver.poll_until_active(&registered()).await.unwrap_err();

        assert!(matches!(err, Error::Http { status: 500, .. }));
        assert_eq!(api.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_flow_from_empty_index() {
        let m = manifest(vec![variant("echo", "test")]);
        let plan = reconcile::plan(&m, &[], "test");
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());

        let api = MockControlPlane::with_statuses(vec![
            status(FunctionStatus::Deploying),
            status(FunctionStatus::Active),
        ]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        driver.run(&plan).await.unwrap();

        assert_eq!(api.creates.load(Ordering::SeqCst), 1);
        assert_eq!(api.versions.load(Ordering::SeqCst), 0);
        assert_eq!(api.deploys.load(Ordering::SeqCst), 1);
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
        assert!(api.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_flow_cleans_all_matched_versions() {
        let mut v = variant("echo", "test");
        v.auto_clean = true;
        let m = manifest(vec![v]);
        let index = [
            remote("fn-1", "qa-echo", "3", FunctionStatus::Active),
            remote("fn-1", "qa-echo", "5", FunctionStatus::Active),
        ];
        let plan = reconcile::plan(&m, &index, "test");
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].current_version_id, "5");
        assert_eq!(plan.updates[0].old_version_ids, vec!["3", "5"]);

        let api = MockControlPlane::with_statuses(vec![status(FunctionStatus::Active)]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        driver.run(&plan).await.unwrap();

        assert_eq!(api.versions.load(Ordering::SeqCst), 1);
        assert_eq!(api.creates.load(Ordering::SeqCst), 0);
        assert_eq!(
            *api.deletes.lock().unwrap(),
            vec![
                ("fn-1".to_string(), "3".to_string()),
                ("fn-1".to_string(), "5".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_auto_clean_deletes_nothing() {
        let m = manifest(vec![variant("echo", "test")]);
        let index = [remote("fn-1", "qa-echo", "3", FunctionStatus::Active)];
        let plan = reconcile::plan(&m, &index, "test");

        let api = MockControlPlane::with_statuses(vec![status(FunctionStatus::Active)]);
        let tokens = MockTokens::default();
        let driver = Driver::new(&api, &tokens, test_config());

        driver.run(&plan).await.unwrap();

        assert!(api.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debug_mode_performs_no_calls() {
        let m = manifest(vec![variant("echo", "test")]);
        let plan = reconcile::plan(&m, &[], "test");

        let api = MockControlPlane::default();
        let tokens = MockTokens::default();
        let config = DriverConfig {
            debug: true,
            ..test_config()
        };
        let driver = Driver::new(&api, &tokens, config);

        driver.run(&plan).await.unwrap();

        assert_eq!(api.creates.load(Ordering::SeqCst), 0);
        assert_eq!(api.deploys.load(Ordering::SeqCst), 0);
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    }
}
