//! Service containers: creation, network aliases, and TCP health checks.
//!
//! Each declared service starts before the build container does. On a
//! user-defined network the service is reachable under its aliases and a
//! short-lived helper container probes its exposed TCP ports; without one
//! the build container gets legacy links instead.

use std::time::Duration;

use bollard::models::{ContainerCreateBody, ContainerInspectResponse};
use tokio::time::timeout;
use tracing::debug;

use crate::config::DockerSettings;
use crate::error::ExecutorError;
use crate::job::{expand_value, expand_variables, ImageDefinition, JobSpec};
use crate::pull::verify_allowed_image;

use super::containers::{
    self, health_check_host_config, networking_config, overwrite_entrypoint, service_host_config,
};
use super::{remove_container, DockerExecutor, ExecutorStage};

/// Probing every port of a port-heavy image would stall the job start.
const MAX_HEALTH_CHECK_PORTS: usize = 20;
/// Upper bound on service log capture for health-check diagnostics.
const HEALTH_CHECK_LOG_LIMIT: usize = 64 * 1024;

impl DockerExecutor {
    /// Start every declared service and wait for each to accept TCP
    /// connections.
    pub(super) async fn create_services(&mut self) -> Result<(), ExecutorError> {
        self.stage = ExecutorStage::CreatingServices;

        let settings = self.settings()?.clone();
        let services = self.job.services.clone();

        for (index, definition) in services.iter().enumerate() {
            let expanded = expand_value(&definition.name, &self.job.variables);
            let (service, version) =
                ImageDefinition::named(&expanded).service_name_and_version();
            if service.is_empty() {
                return Err(ExecutorError::InvalidServiceName(definition.name.clone()));
            }

            verify_allowed_image(&expanded, "services", &settings.allowed_services, &[])?;

            let mut resolved = definition.clone();
            resolved.name = expanded;
            let (id, name) = self
                .create_service(index, &service, &version, &resolved, &settings)
                .await?;

            if self.network_mode.user_defined().is_none() {
                for alias in service_aliases(&service, definition) {
                    self.links.push(format!("{}:{}", name, alias));
                }
            }

            self.wait_for_service(index, &service, &id, &name, &settings)
                .await?;
        }
        Ok(())
    }

    async fn create_service(
        &mut self,
        index: usize,
        service: &str,
        version: &str,
        definition: &ImageDefinition,
        settings: &DockerSettings,
    ) -> Result<(String, String), ExecutorError> {
        self.trace
            .println(&format!("Starting service {}:{} ...", service, version));

        let inspect = self
            .pull()?
            .resolve(&definition.name, &definition.pull_policies)
            .await?;
        let image_id = inspect.id.unwrap_or_else(|| definition.name.clone());

        let container_name =
            containers::service_container_name(&self.unique_name(), service, index);
        if let Ok(client) = self.client() {
            remove_container(&client.clone(), &container_name).await;
        }

        let labels = self.prepare_labels(&[
            ("type", "service"),
            ("service", service),
            ("service.version", version),
        ])?;

        let privileged = settings.services_privileged()
            && containers::privileged_allowed(
                &definition.name,
                &settings.allowed_privileged_services,
            );

        let mut body = ContainerCreateBody {
            image: Some(image_id),
            labels: Some(labels),
            env: Some(service_variables(&self.job, definition)),
            cmd: (!definition.command.is_empty()).then(|| definition.command.clone()),
            entrypoint: overwrite_entrypoint(definition, settings),
            ..Default::default()
        };
        body.host_config = Some(service_host_config(
            settings,
            self.binds()?,
            &self.network_mode,
            privileged,
            self.job.flags.use_init_process,
        ));
        body.networking_config =
            networking_config(&self.network_mode, service_aliases(service, definition));

        let platform = (!definition.platform.is_empty()).then(|| definition.platform.clone());

        debug!(container = %container_name, service, "creating service container");
        let client = self.client()?.clone();
        let id = client
            .create_container(&container_name, platform, body)
            .await?;
        self.temporary.push(id.clone());
        client.start_container(&id).await?;

        Ok((id, container_name))
    }

    /// Probe the service's TCP ports with a helper container. Failure
    /// carries the service's own logs; that is where the cause lives.
    async fn wait_for_service(
        &mut self,
        index: usize,
        service: &str,
        service_id: &str,
        service_name: &str,
        settings: &DockerSettings,
    ) -> Result<(), ExecutorError> {
        if settings.wait_for_services_timeout == 0 {
            return Ok(());
        }
        self.trace.println(&format!(
            "Waiting for {} to be up and running (timeout {} seconds) ...",
            service, settings.wait_for_services_timeout
        ));

        let mut env = Vec::new();
        if self.network_mode.user_defined().is_some() {
            let inspect = self.client()?.inspect_container(service_id).await?;
            env = service_health_check_environment(service, service_id, &inspect)?;
        }

        let image_id = self.helper_image_id().await?;
        let wait_name = format!("{}-wait-for-service-{}", self.unique_name(), index);
        let labels = self.prepare_labels(&[("type", "wait-for-service")])?;

        let body = ContainerCreateBody {
            image: Some(image_id),
            cmd: Some(vec![
                "forgerunner-helper".to_string(),
                "health-check".to_string(),
            ]),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(health_check_host_config(service_name, &self.network_mode)),
            ..Default::default()
        };

        let client = self.client()?.clone();
        let id = client.create_container(&wait_name, None, body).await?;
        self.temporary.push(id.clone());
        client.start_container(&id).await?;

        let waited = timeout(
            Duration::from_secs(settings.wait_for_services_timeout),
            client.wait_container(&id),
        )
        .await;

        match waited {
            Ok(Ok(0)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(code)) => {
                debug!(service, code, "service health check failed");
                Err(self.health_check_failure(service, service_id).await)
            }
            Err(_) => {
                debug!(service, "service health check timed out");
                Err(self.health_check_failure(service, service_id).await)
            }
        }
    }

    async fn health_check_failure(&self, service: &str, service_id: &str) -> ExecutorError {
        let diagnostics = match self.client() {
            Ok(client) => {
                client
                    .container_logs_tail(service_id, HEALTH_CHECK_LOG_LIMIT)
                    .await
            }
            Err(e) => e.to_string(),
        };
        self.trace.warning(&format!(
            "Service {} probably didn't start properly.",
            service
        ));
        ExecutorError::HealthCheckFailed {
            service: service.to_string(),
            diagnostics,
        }
    }
}

/// Variables a service container sees: the job's public and runner-internal
/// variables plus the service's own, expanded against the combined set.
pub(crate) fn service_variables(job: &JobSpec, definition: &ImageDefinition) -> Vec<String> {
    let mut vars = job.public_or_internal_variables();
    vars.extend(definition.variables.iter().cloned());
    expand_variables(&vars, &vars)
}

/// Network names a service answers to: its slugged name, the dashed
/// variant for registry paths, and any explicit alias.
pub(crate) fn service_aliases(service: &str, definition: &ImageDefinition) -> Vec<String> {
    let mut aliases = vec![containers::service_slug(service)];

    let dashed = service.replace('/', "-");
    if !aliases.contains(&dashed) {
        aliases.push(dashed);
    }
    if let Some(alias) = &definition.alias {
        if !alias.is_empty() && !aliases.contains(alias) {
            aliases.push(alias.clone());
        }
    }
    aliases
}

/// Decide the health-check environment for a service on a user-defined
/// network. A service with nothing to probe cannot be waited on; that is a
/// hard error naming the service.
pub(crate) fn service_health_check_environment(
    service: &str,
    container_id: &str,
    inspect: &ContainerInspectResponse,
) -> Result<Vec<String>, ExecutorError> {
    let ports = exposed_tcp_ports(inspect)?;
    if ports.is_empty() {
        return Err(ExecutorError::NoExposedPorts(service.to_string()));
    }
    Ok(health_check_environment(container_id, &ports))
}

/// Environment handed to the health-check container: the service address
/// and one variable per port to probe.
pub(crate) fn health_check_environment(container_id: &str, ports: &[u16]) -> Vec<String> {
    let addr = &container_id[..container_id.len().min(12)];
    let mut env = vec![format!("WAIT_FOR_SERVICE_TCP_ADDR={}", addr)];
    for port in ports {
        env.push(format!("WAIT_FOR_SERVICE_{}_TCP_PORT={}", port, port));
    }
    env
}

/// The TCP ports to probe on a service. A `HEALTHCHECK_TCP_PORT` variable
/// in the image wins outright; otherwise every exposed tcp port counts,
/// ranges included, capped at [`MAX_HEALTH_CHECK_PORTS`].
pub(crate) fn exposed_tcp_ports(
    inspect: &ContainerInspectResponse,
) -> Result<Vec<u16>, ExecutorError> {
    let config = inspect.config.as_ref();

    let declared = config
        .and_then(|c| c.env.as_ref())
        .and_then(|env| {
            env.iter().find_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                key.eq_ignore_ascii_case("HEALTHCHECK_TCP_PORT")
                    .then(|| value.to_string())
            })
        });
    if let Some(value) = declared {
        let port = value
            .parse::<u16>()
            .map_err(|_| ExecutorError::InvalidHealthCheckPort(value.clone()))?;
        return Ok(vec![port]);
    }

    let mut ports = Vec::new();
    if let Some(exposed) = config.and_then(|c| c.exposed_ports.as_ref()) {
        for key in exposed.keys() {
            let Some((spec, proto)) = key.rsplit_once('/') else {
                continue;
            };
            if proto != "tcp" {
                continue;
            }
            match spec.split_once('-') {
                Some((start, end)) => {
                    if let (Ok(start), Ok(end)) = (start.parse::<u16>(), end.parse::<u16>()) {
                        ports.extend(start..=end.max(start));
                    }
                }
                None => {
                    if let Ok(port) = spec.parse::<u16>() {
                        ports.push(port);
                    }
                }
            }
        }
    }

    ports.sort_unstable();
    ports.dedup();
    ports.truncate(MAX_HEALTH_CHECK_PORTS);
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Variable;
    use bollard::models::ContainerConfig;
    use std::collections::HashMap;

    fn inspect_with(env: Vec<&str>, exposed: Vec<&str>) -> ContainerInspectResponse {
        let exposed_ports = (!exposed.is_empty()).then(|| {
            exposed
                .into_iter()
                .map(|p| (p.to_string(), HashMap::new()))
                .collect()
        });
        ContainerInspectResponse {
            config: Some(ContainerConfig {
                env: Some(env.into_iter().map(String::from).collect()),
                exposed_ports,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // ── Port discovery ──────────────────────────────────────────

    #[test]
    fn test_healthcheck_variable_wins_over_exposed_ports() {
        let inspect = inspect_with(
            vec!["HEALTHCHECK_TCP_PORT=5432"],
            vec!["80/tcp", "443/tcp"],
        );
        assert_eq!(exposed_tcp_ports(&inspect).unwrap(), vec![5432]);
    }

    #[test]
    fn test_healthcheck_variable_is_case_insensitive() {
        let inspect = inspect_with(vec!["healthcheck_tcp_port=6379"], vec![]);
        assert_eq!(exposed_tcp_ports(&inspect).unwrap(), vec![6379]);
    }

    #[test]
    fn test_invalid_healthcheck_variable_is_an_error() {
        let inspect = inspect_with(vec!["HEALTHCHECK_TCP_PORT=not-a-port"], vec![]);
        assert!(matches!(
            exposed_tcp_ports(&inspect).unwrap_err(),
            ExecutorError::InvalidHealthCheckPort(v) if v == "not-a-port"
        ));
    }

    #[test]
    fn test_exposed_tcp_ports_are_sorted_and_udp_skipped() {
        let inspect = inspect_with(vec![], vec!["9000/tcp", "53/udp", "80/tcp"]);
        assert_eq!(exposed_tcp_ports(&inspect).unwrap(), vec![80, 9000]);
    }

    #[test]
    fn test_port_ranges_expand_and_cap() {
        let inspect = inspect_with(vec![], vec!["8000-8099/tcp"]);
        let ports = exposed_tcp_ports(&inspect).unwrap();
        assert_eq!(ports.len(), MAX_HEALTH_CHECK_PORTS);
        assert_eq!(ports.first(), Some(&8000));
        assert_eq!(ports.last(), Some(&8019));
    }

    #[test]
    fn test_portless_service_on_user_defined_network_is_an_error() {
        let inspect = inspect_with(vec![], vec![]);
        let err = service_health_check_environment("postgres", "abc123", &inspect).unwrap_err();
        assert!(matches!(
            &err,
            ExecutorError::NoExposedPorts(service) if service == "postgres"
        ));
        assert!(err.to_string().contains("postgres"));
        assert!(!err.is_system_failure());
    }

    #[test]
    fn test_service_health_check_environment_end_to_end() {
        let inspect = inspect_with(vec!["HEALTHCHECK_TCP_PORT=8080"], vec!["443/tcp"]);
        let env = service_health_check_environment(
            "registry",
            "0123456789abcdef0123456789abcdef",
            &inspect,
        )
        .unwrap();
        assert_eq!(
            env,
            vec![
                "WAIT_FOR_SERVICE_TCP_ADDR=0123456789ab",
                "WAIT_FOR_SERVICE_8080_TCP_PORT=8080",
            ]
        );
    }

    #[test]
    fn test_no_ports_yields_empty_list() {
        let inspect = inspect_with(vec![], vec![]);
        assert!(exposed_tcp_ports(&inspect).unwrap().is_empty());
        assert!(exposed_tcp_ports(&ContainerInspectResponse::default())
            .unwrap()
            .is_empty());
    }

    // ── Health-check environment ────────────────────────────────

    #[test]
    fn test_health_check_environment_truncates_container_id() {
        let env = health_check_environment(
            "0123456789abcdef0123456789abcdef",
            &[5432, 5433],
        );
        assert_eq!(
            env,
            vec![
                "WAIT_FOR_SERVICE_TCP_ADDR=0123456789ab",
                "WAIT_FOR_SERVICE_5432_TCP_PORT=5432",
                "WAIT_FOR_SERVICE_5433_TCP_PORT=5433",
            ]
        );
    }

    // ── Service variables ───────────────────────────────────────

    #[test]
    fn test_service_variables_exclude_secrets_and_expand() {
        let job = JobSpec {
            variables: vec![
                Variable::new("POSTGRES_DB", "app"),
                Variable::secret("TOKEN", "hunter2"),
            ],
            ..Default::default()
        };
        let mut definition = ImageDefinition::named("postgres:14");
        definition.variables = vec![Variable::new("PGDATA", "/data/${POSTGRES_DB}")];

        let env = service_variables(&job, &definition);
        assert!(env.contains(&"POSTGRES_DB=app".to_string()));
        assert!(env.contains(&"PGDATA=/data/app".to_string()));
        assert!(!env.iter().any(|v| v.starts_with("TOKEN=")));
    }

    // ── Aliases ─────────────────────────────────────────────────

    #[test]
    fn test_aliases_for_registry_path_service() {
        let definition = ImageDefinition::named("tutum/wordpress:latest");
        assert_eq!(
            service_aliases("tutum/wordpress", &definition),
            vec!["tutum__wordpress", "tutum-wordpress"]
        );
    }

    #[test]
    fn test_plain_service_alias_deduplicates() {
        let mut definition = ImageDefinition::named("postgres:14");
        definition.alias = Some("db".to_string());
        assert_eq!(
            service_aliases("postgres", &definition),
            vec!["postgres", "db"]
        );
    }
}
