//! Container configuration builders: names, device bindings, privileged
//! gating, and the create-request bodies for build, predefined and service
//! containers.

use std::collections::HashMap;

use bollard::models::{
    ContainerCreateBody, DeviceMapping, DeviceRequest, EndpointSettings, HostConfig,
    HostConfigIsolationEnum, HostConfigLogConfig, NetworkingConfig, RestartPolicy,
    RestartPolicyNameEnum,
};

use crate::config::DockerSettings;
use crate::error::ExecutorError;
use crate::glob::pattern_matches;
use crate::job::ImageDefinition;
use crate::networks::NetworkMode;

pub const BUILD_CONTAINER_TYPE: &str = "build";
pub const PREDEFINED_CONTAINER_TYPE: &str = "predefined";

/// `<job-scoped-prefix>-<8-hex-random>-<type>` for build and predefined
/// containers.
pub fn container_name(unique_name: &str, container_type: &str) -> String {
    format!("{}-{}", unique_name, container_type)
}

/// `<job-scoped-prefix>-<8-hex-random>-<service-slug>-<index>` for services.
pub fn service_container_name(unique_name: &str, service: &str, index: usize) -> String {
    format!("{}-{}-{}", unique_name, service_slug(service), index)
}

/// Service names may carry registry paths; slashes are not valid in
/// container names.
pub fn service_slug(service: &str) -> String {
    service.replace('/', "__")
}

/// Privileged mode needs both the global switch and an allow-list match.
/// An empty allow-list permits every image.
pub fn privileged_allowed(image: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|pattern| pattern_matches(pattern, image))
}

/// `PathOnHost[:PathInContainer[:CgroupPermissions]]`, defaulting to the
/// same in-container path and `rwm`, like `docker run`.
pub fn parse_device_string(spec: &str) -> Result<DeviceMapping, ExecutorError> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() > 3 {
        return Err(ExecutorError::MalformedDevice {
            spec: spec.to_string(),
            reason: "too many colons",
        });
    }
    if parts[0].is_empty() {
        return Err(ExecutorError::MalformedDevice {
            spec: spec.to_string(),
            reason: "empty host path",
        });
    }

    Ok(DeviceMapping {
        path_on_host: Some(parts[0].to_string()),
        path_in_container: Some(parts.get(1).copied().unwrap_or(parts[0]).to_string()),
        cgroup_permissions: Some(parts.get(2).copied().unwrap_or("rwm").to_string()),
    })
}

/// GPU request in docker-CLI style: `all`, a bare count, or comma-separated
/// `count=N` / `driver=name` / `device=id` fields. Bare values after a
/// `device=` field extend the device list, so `device=0,1` works unquoted.
pub fn parse_gpus(spec: &str) -> Result<Vec<DeviceRequest>, ExecutorError> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let malformed = |reason: &'static str| ExecutorError::MalformedDeviceRequest {
        spec: spec.to_string(),
        reason,
    };

    let mut count: Option<i64> = None;
    let mut driver: Option<String> = None;
    let mut device_ids: Vec<String> = Vec::new();
    let mut capabilities: Vec<String> = Vec::new();
    let mut in_devices = false;

    for field in spec.split(',') {
        let field = field.trim();
        match field.split_once('=') {
            Some(("count", value)) => {
                count = Some(value.parse().map_err(|_| malformed("invalid count"))?);
                in_devices = false;
            }
            Some(("driver", value)) => {
                driver = Some(value.to_string());
                in_devices = false;
            }
            Some(("device", value)) => {
                device_ids.push(value.to_string());
                in_devices = true;
            }
            Some(("capabilities", value)) => {
                capabilities.push(value.to_string());
                in_devices = false;
            }
            Some(_) => return Err(malformed("unknown field")),
            None if field == "all" => {
                count = Some(-1);
                in_devices = false;
            }
            None => {
                if let Ok(n) = field.parse::<i64>() {
                    if in_devices {
                        device_ids.push(field.to_string());
                    } else {
                        count = Some(n);
                    }
                } else if in_devices {
                    device_ids.push(field.to_string());
                } else {
                    return Err(malformed("expected count, `all` or key=value"));
                }
            }
        }
    }

    if capabilities.is_empty() {
        capabilities.push("gpu".to_string());
    }

    Ok(vec![DeviceRequest {
        driver,
        // docker-CLI default: one GPU when neither count nor devices given
        count: if device_ids.is_empty() { count.or(Some(1)) } else { None },
        device_ids: if device_ids.is_empty() {
            None
        } else {
            Some(device_ids)
        },
        capabilities: Some(vec![capabilities]),
        options: None,
    }])
}

/// Entrypoint override from the image definition, unless the deployment
/// disabled overrides.
pub fn overwrite_entrypoint(
    definition: &ImageDefinition,
    settings: &DockerSettings,
) -> Option<Vec<String>> {
    if settings.disable_entrypoint_overwrite || definition.entrypoint.is_empty() {
        return None;
    }
    Some(definition.entrypoint.clone())
}

/// Attach services and the build container to the user-defined network
/// under their aliases. Daemon-mode networks need no endpoint config.
pub fn networking_config(
    network_mode: &NetworkMode,
    aliases: Vec<String>,
) -> Option<NetworkingConfig> {
    let name = network_mode.user_defined()?;
    let mut endpoints = HashMap::new();
    endpoints.insert(
        name.to_string(),
        EndpointSettings {
            aliases: Some(aliases),
            ..Default::default()
        },
    );
    Some(NetworkingConfig {
        endpoints_config: Some(endpoints),
    })
}

/// The create-request body shared by build and predefined containers:
/// stdin-driven, attached on all streams, never a TTY.
#[allow(clippy::too_many_arguments)]
pub fn build_container_body(
    container_type: &str,
    settings: &DockerSettings,
    image_id: &str,
    hostname: &str,
    cmd: Vec<String>,
    env: Vec<String>,
    labels: HashMap<String, String>,
    entrypoint: Option<Vec<String>>,
) -> ContainerCreateBody {
    ContainerCreateBody {
        image: Some(image_id.to_string()),
        hostname: Some(hostname.to_string()),
        cmd: Some(cmd),
        labels: Some(labels),
        tty: Some(false),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        stdin_once: Some(true),
        env: Some(env),
        entrypoint,
        // the configured user applies to the build container only
        user: (container_type == BUILD_CONTAINER_TYPE && !settings.user.is_empty())
            .then(|| settings.user.clone()),
        ..Default::default()
    }
}

/// The full host config for build and predefined containers.
pub fn build_host_config(
    settings: &DockerSettings,
    devices: Vec<DeviceMapping>,
    device_requests: Vec<DeviceRequest>,
    binds: Vec<String>,
    links: Vec<String>,
    network_mode: &NetworkMode,
    init: bool,
) -> HostConfig {
    HostConfig {
        memory: settings.memory,
        memory_swap: settings.memory_swap,
        memory_reservation: settings.memory_reservation,
        cpuset_cpus: non_empty(&settings.cpuset_cpus),
        cpu_shares: settings.cpu_shares,
        nano_cpus: settings.nano_cpus,
        devices: Some(devices),
        device_requests: Some(device_requests),
        device_cgroup_rules: Some(settings.device_cgroup_rules.clone()),
        oom_kill_disable: Some(settings.oom_kill_disable),
        oom_score_adj: settings.oom_score_adjust,
        dns: Some(settings.dns.clone()),
        dns_search: Some(settings.dns_search.clone()),
        runtime: non_empty(&settings.runtime),
        privileged: Some(settings.privileged),
        group_add: Some(settings.group_add.clone()),
        userns_mode: non_empty(&settings.userns_mode),
        cap_add: Some(settings.cap_add.clone()),
        cap_drop: Some(settings.cap_drop.clone()),
        security_opt: Some(settings.security_opt.clone()),
        restart_policy: Some(never_restart()),
        extra_hosts: Some(settings.extra_hosts.clone()),
        network_mode: non_empty(&network_mode.name),
        ipc_mode: non_empty(&settings.ipc_mode),
        links: Some([settings.links.clone(), links].concat()),
        binds: Some(binds),
        shm_size: settings.shm_size,
        isolation: isolation_enum(&settings.isolation),
        volume_driver: non_empty(&settings.volume_driver),
        volumes_from: Some(settings.volumes_from.clone()),
        log_config: Some(json_file_logging()),
        tmpfs: Some(settings.tmpfs.clone()),
        sysctls: Some(settings.sysctls.clone()),
        init: init.then_some(true),
        ..Default::default()
    }
}

/// Services get a reduced host config: no resource limits or device
/// bindings, their own privileged/security settings.
pub fn service_host_config(
    settings: &DockerSettings,
    binds: Vec<String>,
    network_mode: &NetworkMode,
    privileged: bool,
    init: bool,
) -> HostConfig {
    HostConfig {
        dns: Some(settings.dns.clone()),
        dns_search: Some(settings.dns_search.clone()),
        restart_policy: Some(never_restart()),
        extra_hosts: Some(settings.extra_hosts.clone()),
        privileged: Some(privileged),
        security_opt: Some(settings.services_security_opt.clone()),
        runtime: non_empty(&settings.runtime),
        userns_mode: non_empty(&settings.userns_mode),
        network_mode: non_empty(&network_mode.name),
        binds: Some(binds),
        shm_size: settings.shm_size,
        tmpfs: Some(settings.services_tmpfs.clone()),
        log_config: Some(json_file_logging()),
        init: init.then_some(true),
        ..Default::default()
    }
}

/// Host config for the short-lived service health-check container. Without
/// a user-defined network it reaches the service over a legacy link.
pub fn health_check_host_config(
    service_container_name: &str,
    network_mode: &NetworkMode,
) -> HostConfig {
    let links = if network_mode.user_defined().is_none() {
        vec![format!("{}:service", service_container_name)]
    } else {
        Vec::new()
    };

    HostConfig {
        restart_policy: Some(never_restart()),
        links: Some(links),
        network_mode: non_empty(&network_mode.name),
        log_config: Some(json_file_logging()),
        ..Default::default()
    }
}

fn never_restart() -> RestartPolicy {
    RestartPolicy {
        name: Some(RestartPolicyNameEnum::NO),
        ..Default::default()
    }
}

fn json_file_logging() -> HostConfigLogConfig {
    HostConfigLogConfig {
        typ: Some("json-file".to_string()),
        config: None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn isolation_enum(value: &str) -> Option<HostConfigIsolationEnum> {
    match value {
        "" => None,
        "default" => Some(HostConfigIsolationEnum::DEFAULT),
        "process" => Some(HostConfigIsolationEnum::PROCESS),
        "hyperv" => Some(HostConfigIsolationEnum::HYPERV),
        // config validation rejects anything else before we get here
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Naming ──────────────────────────────────────────────────

    #[test]
    fn test_container_names() {
        let unique = "runner-x-project-7-concurrent-0-0a1b2c3d";
        assert_eq!(
            container_name(unique, BUILD_CONTAINER_TYPE),
            "runner-x-project-7-concurrent-0-0a1b2c3d-build"
        );
        assert_eq!(
            service_container_name(unique, "tutum/wordpress", 0),
            "runner-x-project-7-concurrent-0-0a1b2c3d-tutum__wordpress-0"
        );
    }

    // ── Privileged gating ───────────────────────────────────────

    #[test]
    fn test_privileged_allow_list_globs() {
        let allowed = vec!["registry.example/*".to_string()];
        assert!(privileged_allowed("registry.example/foo", &allowed));
        assert!(!privileged_allowed("other/bar", &allowed));
    }

    #[test]
    fn test_empty_privileged_allow_list_permits_all() {
        assert!(privileged_allowed("registry.example/foo", &[]));
        assert!(privileged_allowed("other/bar", &[]));
    }

    // ── Devices ─────────────────────────────────────────────────

    #[test]
    fn test_device_defaults() {
        let device = parse_device_string("/dev/kvm").unwrap();
        assert_eq!(device.path_on_host.as_deref(), Some("/dev/kvm"));
        assert_eq!(device.path_in_container.as_deref(), Some("/dev/kvm"));
        assert_eq!(device.cgroup_permissions.as_deref(), Some("rwm"));
    }

    #[test]
    fn test_device_full_spec() {
        let device = parse_device_string("/dev/sda:/dev/xvda:r").unwrap();
        assert_eq!(device.path_in_container.as_deref(), Some("/dev/xvda"));
        assert_eq!(device.cgroup_permissions.as_deref(), Some("r"));
    }

    #[test]
    fn test_device_too_many_colons() {
        let err = parse_device_string("/a:/b:rwm:extra").unwrap_err();
        assert!(matches!(err, ExecutorError::MalformedDevice { .. }));
    }

    // ── GPUs ────────────────────────────────────────────────────

    #[test]
    fn test_gpus_all() {
        let requests = parse_gpus("all").unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].count, Some(-1));
        assert_eq!(
            requests[0].capabilities,
            Some(vec![vec!["gpu".to_string()]])
        );
    }

    #[test]
    fn test_gpus_count_and_driver() {
        let requests = parse_gpus("count=2,driver=nvidia").unwrap();
        assert_eq!(requests[0].count, Some(2));
        assert_eq!(requests[0].driver.as_deref(), Some("nvidia"));
    }

    #[test]
    fn test_gpus_device_list() {
        let requests = parse_gpus("device=0,1").unwrap();
        assert_eq!(
            requests[0].device_ids,
            Some(vec!["0".to_string(), "1".to_string()])
        );
        assert_eq!(requests[0].count, None);
    }

    #[test]
    fn test_gpus_empty_and_invalid() {
        assert!(parse_gpus("").unwrap().is_empty());
        assert!(parse_gpus("bogus").is_err());
        assert!(parse_gpus("count=abc").is_err());
    }

    // ── Config builders ─────────────────────────────────────────

    #[test]
    fn test_build_body_wires_stdin() {
        let settings = DockerSettings {
            user: "builder".into(),
            ..Default::default()
        };
        let body = build_container_body(
            BUILD_CONTAINER_TYPE,
            &settings,
            "sha256:abc",
            "runner-host",
            vec!["bash".into()],
            vec!["CI=true".into()],
            HashMap::new(),
            None,
        );
        assert_eq!(body.open_stdin, Some(true));
        assert_eq!(body.stdin_once, Some(true));
        assert_eq!(body.tty, Some(false));
        assert_eq!(body.user.as_deref(), Some("builder"));
    }

    #[test]
    fn test_user_is_build_container_only() {
        let settings = DockerSettings {
            user: "builder".into(),
            ..Default::default()
        };
        let body = build_container_body(
            PREDEFINED_CONTAINER_TYPE,
            &settings,
            "sha256:abc",
            "h",
            vec![],
            vec![],
            HashMap::new(),
            None,
        );
        assert_eq!(body.user, None);
    }

    #[test]
    fn test_host_config_never_restarts_and_logs_json() {
        let config = build_host_config(
            &DockerSettings::default(),
            vec![],
            vec![],
            vec![],
            vec![],
            &NetworkMode::default(),
            false,
        );
        assert_eq!(
            config.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::NO)
        );
        assert_eq!(config.log_config.unwrap().typ.as_deref(), Some("json-file"));
        assert_eq!(config.init, None);
    }

    #[test]
    fn test_health_check_links_only_on_legacy_network() {
        let legacy = health_check_host_config("svc-0", &NetworkMode::default());
        assert_eq!(legacy.links, Some(vec!["svc-0:service".to_string()]));

        let per_build = NetworkMode {
            name: "runner-net".into(),
            per_build: true,
        };
        let modern = health_check_host_config("svc-0", &per_build);
        assert_eq!(modern.links, Some(vec![]));
        assert_eq!(modern.network_mode.as_deref(), Some("runner-net"));
    }

    #[test]
    fn test_networking_config_only_for_user_defined() {
        assert!(networking_config(&NetworkMode::default(), vec!["build".into()]).is_none());

        let mode = NetworkMode {
            name: "runner-net".into(),
            per_build: true,
        };
        let config = networking_config(&mode, vec!["build".into()]).unwrap();
        let endpoints = config.endpoints_config.unwrap();
        assert_eq!(
            endpoints["runner-net"].aliases,
            Some(vec!["build".to_string()])
        );
    }

    #[test]
    fn test_entrypoint_override_respects_kill_switch() {
        let mut definition = ImageDefinition::named("alpine");
        definition.entrypoint = vec!["/bin/sh".into()];

        let settings = DockerSettings::default();
        assert_eq!(
            overwrite_entrypoint(&definition, &settings),
            Some(vec!["/bin/sh".to_string()])
        );

        let disabled = DockerSettings {
            disable_entrypoint_overwrite: true,
            ..Default::default()
        };
        assert_eq!(overwrite_entrypoint(&definition, &disabled), None);
    }
}
