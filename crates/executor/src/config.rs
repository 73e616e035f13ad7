//! Runner configuration — the `[docker]` section drives this executor.
//!
//! Loaded from TOML with `#[serde(default)]` everywhere so partial files
//! work; environment variables override the connection-critical values.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pull::PullPolicy;
use crate::shell::Shell;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Overrides the per-OS default builds directory.
    pub builds_dir: Option<String>,
    /// Overrides the per-OS default cache directory.
    pub cache_dir: Option<String>,
    /// Overrides the per-OS default shell.
    pub shell: Option<Shell>,
    pub docker: Option<DockerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Daemon endpoint. Empty means the platform default socket.
    pub host: String,
    /// Default build image when the job declares none.
    pub image: String,
    /// Explicit helper image; overrides resolution from daemon info.
    pub helper_image: String,
    /// Helper image flavor (e.g. `alpine`, `ubuntu`).
    pub helper_image_flavor: String,
    pub hostname: String,
    /// User the build container runs as.
    pub user: String,

    pub privileged: bool,
    /// Overrides `privileged` for service containers when set.
    pub services_privileged: Option<bool>,
    pub allowed_images: Vec<String>,
    pub allowed_services: Vec<String>,
    pub allowed_privileged_images: Vec<String>,
    pub allowed_privileged_services: Vec<String>,

    /// Pull policies applied when the job image declares none.
    pub pull_policy: Vec<PullPolicy>,
    /// Restricts which policies a job may request. Empty allows all.
    pub allowed_pull_policies: Vec<PullPolicy>,
    /// Registry credentials keyed by registry host.
    pub registry_auth: HashMap<String, RegistryAuth>,

    /// Volume declarations: `src:dst[:mode]` binds or bare cache paths.
    pub volumes: Vec<String>,
    pub volume_driver: String,
    pub volumes_from: Vec<String>,
    pub disable_cache: bool,

    /// Device strings: `PathOnHost[:PathInContainer[:CgroupPermissions]]`.
    pub devices: Vec<String>,
    pub device_cgroup_rules: Vec<String>,
    /// GPU request, docker-CLI style: `all`, `count=2`, `device=0,1`.
    pub gpus: String,

    /// Existing network to attach to; disables the per-job network.
    pub network_mode: String,
    pub enable_ipv6: bool,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub links: Vec<String>,

    pub disable_entrypoint_overwrite: bool,
    /// Windows isolation technology: `process`, `hyperv`, `default` or empty.
    pub isolation: String,
    pub userns_mode: String,
    pub ipc_mode: String,
    pub group_add: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub services_security_opt: Vec<String>,
    pub runtime: String,

    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub memory_reservation: Option<i64>,
    pub cpuset_cpus: String,
    pub cpu_shares: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub oom_kill_disable: bool,
    pub oom_score_adjust: Option<i64>,
    pub shm_size: Option<i64>,
    pub tmpfs: HashMap<String, String>,
    pub services_tmpfs: HashMap<String, String>,
    pub sysctls: HashMap<String, String>,

    /// Extra labels stamped on every created container; values are expanded
    /// against the job variables.
    pub container_labels: HashMap<String, String>,

    /// Seconds to wait for each service health check. Zero disables it.
    pub wait_for_services_timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            image: String::new(),
            helper_image: String::new(),
            helper_image_flavor: String::new(),
            hostname: String::new(),
            user: String::new(),
            privileged: false,
            services_privileged: None,
            allowed_images: Vec::new(),
            allowed_services: Vec::new(),
            allowed_privileged_images: Vec::new(),
            allowed_privileged_services: Vec::new(),
            pull_policy: Vec::new(),
            allowed_pull_policies: Vec::new(),
            registry_auth: HashMap::new(),
            volumes: Vec::new(),
            volume_driver: String::new(),
            volumes_from: Vec::new(),
            disable_cache: false,
            devices: Vec::new(),
            device_cgroup_rules: Vec::new(),
            gpus: String::new(),
            network_mode: String::new(),
            enable_ipv6: false,
            dns: Vec::new(),
            dns_search: Vec::new(),
            extra_hosts: Vec::new(),
            links: Vec::new(),
            disable_entrypoint_overwrite: false,
            isolation: String::new(),
            userns_mode: String::new(),
            ipc_mode: String::new(),
            group_add: Vec::new(),
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            security_opt: Vec::new(),
            services_security_opt: Vec::new(),
            runtime: String::new(),
            memory: None,
            memory_swap: None,
            memory_reservation: None,
            cpuset_cpus: String::new(),
            cpu_shares: None,
            nano_cpus: None,
            oom_kill_disable: false,
            oom_score_adjust: None,
            shm_size: None,
            tmpfs: HashMap::new(),
            services_tmpfs: HashMap::new(),
            sysctls: HashMap::new(),
            container_labels: HashMap::new(),
            wait_for_services_timeout: 30,
        }
    }
}

impl RunnerConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(path.as_ref().display().to_string(), e))?;
        let mut config: RunnerConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `DOCKER_HOST` wins over the configured daemon endpoint, matching the
    /// Docker CLI convention.
    pub fn apply_env_overrides(&mut self) {
        if let Some(docker) = self.docker.as_mut() {
            if let Ok(host) = std::env::var("DOCKER_HOST") {
                docker.host = host;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let docker = self
            .docker
            .as_ref()
            .ok_or(ConfigError::MissingDockerSection)?;
        docker.validate()
    }
}

impl DockerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.isolation.as_str() {
            "" | "default" | "process" | "hyperv" => {}
            other => return Err(ConfigError::InvalidIsolation(other.to_string())),
        }
        if self.nano_cpus.is_some_and(|n| n <= 0) {
            return Err(ConfigError::InvalidValue("nano_cpus must be positive"));
        }
        Ok(())
    }

    pub fn services_privileged(&self) -> bool {
        self.services_privileged.unwrap_or(self.privileged)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing [docker] configuration section")]
    MissingDockerSection,
    #[error("reading config file {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(
        "the isolation value {0:?} is not valid; \
         the valid values are: 'process', 'hyperv', 'default' and an empty string"
    )]
    InvalidIsolation(String),
    #[error("{0}")]
    InvalidValue(&'static str),
}
