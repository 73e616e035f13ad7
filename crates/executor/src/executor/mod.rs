//! The Docker executor orchestrator.
//!
//! One `DockerExecutor` runs one job: `prepare` connects to the daemon and
//! builds the job's resources in dependency order, `run` executes scripts
//! in the build or predefined container, `cleanup` tears everything down.

pub mod containers;
pub mod services;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::models::{DeviceMapping, DeviceRequest, Network};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{DockerSettings, RunnerConfig};
use crate::docker::client::{DockerClient, DockerError, Tunnel};
use crate::error::ExecutorError;
use crate::helper_image::{self, HelperImageInfo};
use crate::job::{expand_value, GitStrategy, ImageDefinition, JobSpec};
use crate::labels::Labeler;
use crate::networks::{self, NetworkMode};
use crate::pull::{self, verify_allowed_image, ImageClient};
use crate::shell::Shell;
use crate::trace::TraceSink;
use crate::volumes::parser::{LinuxParser, VolumeParser, WindowsParser};
use crate::volumes::{self, VolumesError};
use crate::wait;

use containers::{BUILD_CONTAINER_TYPE, PREDEFINED_CONTAINER_TYPE};

/// Overall deadline for removing the job's containers, volumes and network.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStage {
    Prepare,
    CreatingBuildVolumes,
    CreatingServices,
    CreatingUserVolumes,
    PullingImage,
    Run,
    Cleanup,
}

impl ExecutorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorStage::Prepare => "prepare",
            ExecutorStage::CreatingBuildVolumes => "creating-build-volumes",
            ExecutorStage::CreatingServices => "creating-services",
            ExecutorStage::CreatingUserVolumes => "creating-user-volumes",
            ExecutorStage::PullingImage => "pulling-image",
            ExecutorStage::Run => "run",
            ExecutorStage::Cleanup => "cleanup",
        }
    }
}

/// The two long-lived job containers. Each is created once per job and
/// reused across `run` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Runs the user's scripts in the job image.
    Build,
    /// Runs runner-internal scripts in the helper image.
    Predefined,
}

impl ContainerKind {
    fn type_name(&self) -> &'static str {
        match self {
            ContainerKind::Build => BUILD_CONTAINER_TYPE,
            ContainerKind::Predefined => PREDEFINED_CONTAINER_TYPE,
        }
    }
}

/// Per-OS capability bundle, selected once from the daemon's OS type.
struct OsDefaults {
    builds_dir: String,
    cache_dir: String,
    shell: Shell,
    parser: Arc<dyn VolumeParser>,
}

impl OsDefaults {
    fn for_os(os_type: &str, config: &RunnerConfig) -> Self {
        let (builds_dir, cache_dir, shell, parser): (_, _, _, Arc<dyn VolumeParser>) =
            if os_type == "windows" {
                (r"C:\builds", r"C:\cache", Shell::Powershell, Arc::new(WindowsParser))
            } else {
                ("/builds", "/cache", Shell::Bash, Arc::new(LinuxParser))
            };

        Self {
            builds_dir: config.builds_dir.clone().unwrap_or_else(|| builds_dir.to_string()),
            cache_dir: config.cache_dir.clone().unwrap_or_else(|| cache_dir.to_string()),
            shell: config.shell.unwrap_or(shell),
            parser,
        }
    }
}

impl Default for OsDefaults {
    fn default() -> Self {
        Self::for_os("linux", &RunnerConfig::default())
    }
}

/// Resource construction order for Prepare. Each step assumes every prior
/// step succeeded.
#[derive(Debug, Clone, Copy)]
enum PrepareStep {
    Labeler,
    NetworksManager,
    BuildNetwork,
    PullManager,
    BindDevices,
    BindDeviceRequests,
    VolumesManager,
    UserVolumes,
    BuildVolume,
    Services,
}

const PREPARE_STEPS: &[PrepareStep] = &[
    PrepareStep::Labeler,
    PrepareStep::NetworksManager,
    PrepareStep::BuildNetwork,
    PrepareStep::PullManager,
    PrepareStep::BindDevices,
    PrepareStep::BindDeviceRequests,
    PrepareStep::VolumesManager,
    PrepareStep::UserVolumes,
    PrepareStep::BuildVolume,
    PrepareStep::Services,
];

pub struct DockerExecutor {
    config: RunnerConfig,
    job: JobSpec,
    trace: Arc<dyn TraceSink>,
    cancel: CancellationToken,

    stage: ExecutorStage,
    client: Option<DockerClient>,
    tunnel: Option<Box<dyn Tunnel>>,
    os: OsDefaults,
    settings: Option<DockerSettings>,

    helper_info: Option<HelperImageInfo>,
    helper_image_id: Option<String>,
    prebuilt_paths: Vec<PathBuf>,

    labeler: Option<Labeler>,
    pull: Option<pull::Manager>,
    volumes: Option<volumes::Manager>,
    networks: Option<networks::Manager>,
    network_mode: NetworkMode,

    devices: Vec<DeviceMapping>,
    device_requests: Vec<DeviceRequest>,

    unique_name: Option<String>,
    containers: HashMap<&'static str, String>,
    build_container_id: Option<String>,
    /// Container IDs removed during cleanup.
    temporary: Vec<String>,
    /// Legacy links handed to the build container when no user-defined
    /// network exists.
    links: Vec<String>,
    build_dir_mounted: bool,
}

impl DockerExecutor {
    pub fn new(config: RunnerConfig, job: JobSpec, trace: Arc<dyn TraceSink>) -> Self {
        Self {
            config,
            job,
            trace,
            cancel: CancellationToken::new(),
            stage: ExecutorStage::Prepare,
            client: None,
            tunnel: None,
            os: OsDefaults::default(),
            settings: None,
            helper_info: None,
            helper_image_id: None,
            prebuilt_paths: helper_image::PREBUILT_IMAGE_PATHS
                .iter()
                .map(PathBuf::from)
                .collect(),
            labeler: None,
            pull: None,
            volumes: None,
            networks: None,
            network_mode: NetworkMode::default(),
            devices: Vec::new(),
            device_requests: Vec::new(),
            unique_name: None,
            containers: HashMap::new(),
            build_container_id: None,
            temporary: Vec::new(),
            links: Vec::new(),
            build_dir_mounted: false,
        }
    }

    /// Route the daemon connection through a caller-supplied tunnel instead
    /// of the configured host.
    pub fn with_tunnel(mut self, tunnel: Box<dyn Tunnel>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn current_stage(&self) -> ExecutorStage {
        self.stage
    }

    /// Token that aborts a running `run` call; the build container gets a
    /// graceful termination first.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect to the daemon and build every job resource, in order:
    /// network, pull manager, device bindings, volumes, then services.
    pub async fn prepare(&mut self) -> Result<(), ExecutorError> {
        self.stage = ExecutorStage::Prepare;

        let settings = self
            .config
            .docker
            .clone()
            .ok_or(ExecutorError::MissingDockerConfig)?;
        settings.validate()?;

        self.connect(&settings)?;
        let info = self.client()?.info().await?;
        let os_type = info.os_type.clone().unwrap_or_default();

        self.os = OsDefaults::for_os(&os_type, &self.config);
        let identity = helper_image::IdentityConfig {
            os_type,
            architecture: info.architecture.clone().unwrap_or_default(),
            kernel_version: info.kernel_version.clone().unwrap_or_default(),
            shell: self.os.shell,
            flavor: settings.helper_image_flavor.clone(),
        };
        self.helper_info = Some(helper_image::get(env!("CARGO_PKG_VERSION"), &identity)?);

        self.build_dir_mounted = volumes::is_host_mounted(
            self.os.parser.as_ref(),
            &self.job.root_dir,
            &settings.volumes,
        )?;

        let image_name = self.build_image_name(&settings)?;
        self.trace
            .println(&format!("Using Docker executor with image {} ...", image_name));

        self.settings = Some(settings);
        for step in PREPARE_STEPS {
            self.run_prepare_step(*step).await?;
        }
        Ok(())
    }

    /// Execute `script` inside the given container kind, creating the
    /// container on first use. Blocks until the script exits; non-zero exit
    /// is a build failure, cancellation reports `Aborted`.
    pub async fn run(&mut self, kind: ContainerKind, script: &str) -> Result<(), ExecutorError> {
        let container_id = match self.containers.get(kind.type_name()) {
            Some(id) => id.clone(),
            None => self.create_container(kind).await?,
        };

        self.stage = ExecutorStage::Run;

        let client = self.client()?.clone();
        let termination = matches!(kind, ContainerKind::Build)
            .then(|| termination_command(self.os.shell));

        let trace = self.trace.clone();
        let mut stdout = wait::TraceLineSink::stdout(trace.as_ref());
        let mut stderr = wait::TraceLineSink::stderr(trace.as_ref());
        let result = wait::run_container(
            &client,
            &container_id,
            Some(script),
            &mut stdout,
            &mut stderr,
            &self.cancel,
            termination,
        )
        .await;
        stdout.flush();
        stderr.flush();
        result
    }

    /// Tear down everything the job created. Safe to call repeatedly and
    /// with no daemon connection; every sub-step is best-effort and the
    /// whole pass runs under one deadline.
    pub async fn cleanup(&mut self) {
        if self.config.docker.is_none() {
            // Prepare() never got anywhere; there is nothing to clean up.
            return;
        }
        self.stage = ExecutorStage::Cleanup;

        let deadline = Instant::now() + CLEANUP_TIMEOUT;

        if let Some(client) = self.client.clone() {
            let mut removals = JoinSet::new();
            for id in std::mem::take(&mut self.temporary) {
                let client = client.clone();
                removals.spawn(async move {
                    remove_container(&client, &id).await;
                });
            }

            let joined = timeout_at(deadline, async {
                while removals.join_next().await.is_some() {}
            })
            .await;
            if joined.is_err() {
                // Abandoned tasks are not retried.
                warn!("container cleanup deadline exceeded");
            }

            if let Some(networks) = self.networks.as_mut() {
                if timeout_at(deadline, networks.cleanup()).await.is_err() {
                    warn!(network = %self.network_mode.name, "failed to remove network for build");
                }
            }

            if let Some(volumes) = self.volumes.as_mut() {
                match timeout_at(deadline, volumes.remove_temporary()).await {
                    Ok(Err(e)) => error!(error = %e, "failed to cleanup volumes"),
                    Err(_) => warn!("volume cleanup deadline exceeded"),
                    Ok(Ok(())) => {}
                }
            }
        }

        self.containers.clear();
        self.build_container_id = None;
        self.client = None;
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close();
        }
    }

    // ── Prepare steps ───────────────────────────────────────────

    async fn run_prepare_step(&mut self, step: PrepareStep) -> Result<(), ExecutorError> {
        debug!(step = ?step, "running prepare step");
        match step {
            PrepareStep::Labeler => {
                self.labeler = Some(Labeler::new(&self.job));
                Ok(())
            }
            PrepareStep::NetworksManager => {
                let client = self.client()?.clone();
                self.networks = Some(networks::Manager::new(Arc::new(client)));
                Ok(())
            }
            PrepareStep::BuildNetwork => self.create_build_network().await,
            PrepareStep::PullManager => self.create_pull_manager(),
            PrepareStep::BindDevices => self.bind_devices(),
            PrepareStep::BindDeviceRequests => self.bind_device_requests(),
            PrepareStep::VolumesManager => self.create_volumes_manager(),
            PrepareStep::UserVolumes => self.create_user_volumes().await,
            PrepareStep::BuildVolume => self.create_build_volume_step().await,
            PrepareStep::Services => self.create_services().await,
        }
    }

    async fn create_build_network(&mut self) -> Result<(), ExecutorError> {
        let settings = self.settings()?.clone();
        let network_name = format!("{}-network", self.unique_name());
        let labels = self.labeler()?.labels(&[("type", "network")]);

        let networks = self
            .networks
            .as_mut()
            .ok_or(ExecutorError::NotInitialized("networks manager"))?;
        self.network_mode = networks
            .create(
                &settings.network_mode,
                self.job.flags.network_per_build,
                &network_name,
                settings.enable_ipv6,
                labels,
            )
            .await?;
        Ok(())
    }

    fn create_pull_manager(&mut self) -> Result<(), ExecutorError> {
        let settings = self.settings()?;
        let config = pull::ManagerConfig {
            default_policies: settings.pull_policy.clone(),
            allowed_policies: settings.allowed_pull_policies.clone(),
            registry_auth: settings.registry_auth.clone(),
            platform: (!self.job.image.platform.is_empty())
                .then(|| self.job.image.platform.clone()),
        };
        let client = self.client()?.clone();
        self.pull = Some(pull::Manager::new(
            Arc::new(client),
            config,
            self.trace.clone(),
        ));
        Ok(())
    }

    fn bind_devices(&mut self) -> Result<(), ExecutorError> {
        let settings = self.settings()?;
        self.devices = settings
            .devices
            .iter()
            .map(|spec| containers::parse_device_string(spec))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn bind_device_requests(&mut self) -> Result<(), ExecutorError> {
        let settings = self.settings()?;
        self.device_requests = containers::parse_gpus(&settings.gpus)?;
        Ok(())
    }

    fn create_volumes_manager(&mut self) -> Result<(), ExecutorError> {
        let settings = self.settings()?;
        let config = volumes::ManagerConfig {
            disable_cache: settings.disable_cache,
            volume_driver: (!settings.volume_driver.is_empty())
                .then(|| settings.volume_driver.clone()),
            cache_base_name: self.job.project_unique_name.clone(),
            unique_name: self.unique_name(),
            labels: self.labeler()?.labels(&[("type", "volume")]),
        };
        let client = self.client()?.clone();
        self.volumes = Some(volumes::Manager::new(
            Arc::new(client),
            self.os.parser.clone(),
            config,
        ));
        Ok(())
    }

    async fn create_user_volumes(&mut self) -> Result<(), ExecutorError> {
        self.stage = ExecutorStage::CreatingUserVolumes;
        debug!("creating user-defined volumes");

        let specs = self.settings()?.volumes.clone();
        let trace = self.trace.clone();
        let volumes = self
            .volumes
            .as_mut()
            .ok_or(ExecutorError::NotInitialized("volumes manager"))?;

        for spec in &specs {
            match volumes.create(spec).await {
                Ok(()) => {}
                Err(VolumesError::CacheVolumesDisabled) => {
                    trace.warning(&format!(
                        "Container based cache volumes creation is disabled. \
                         Will not create volume for {:?}",
                        spec
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn create_build_volume_step(&mut self) -> Result<(), ExecutorError> {
        self.stage = ExecutorStage::CreatingBuildVolumes;
        debug!("creating build volume");

        if self.build_dir_mounted {
            debug!(dir = %self.job.root_dir, "build directory is host-mounted");
            return Ok(());
        }

        let strategy = self.job.git_strategy;
        let root_dir = self.job.root_dir.clone();
        let trace = self.trace.clone();
        let volumes = self
            .volumes
            .as_mut()
            .ok_or(ExecutorError::NotInitialized("volumes manager"))?;
        create_build_volume(volumes, trace.as_ref(), strategy, &root_dir).await
    }

    // ── Containers ──────────────────────────────────────────────

    async fn create_container(&mut self, kind: ContainerKind) -> Result<String, ExecutorError> {
        self.stage = ExecutorStage::PullingImage;
        let settings = self.settings()?.clone();

        let (definition, image_id) = match kind {
            ContainerKind::Build => {
                let name = self.build_image_name(&settings)?;
                let mut definition = self.job.image.clone();
                definition.name = name.clone();
                let inspect = self.pull()?.resolve(&name, &definition.pull_policies).await?;
                (definition, inspect.id.unwrap_or(name))
            }
            ContainerKind::Predefined => {
                let image_id = self.helper_image_id().await?;
                let reference = self
                    .helper_info
                    .as_ref()
                    .ok_or(ExecutorError::NotInitialized("helper image"))?
                    .to_string();
                (ImageDefinition::named(&reference), image_id)
            }
        };

        let hostname = if settings.hostname.is_empty() {
            self.job.project_unique_name.clone()
        } else {
            settings.hostname.clone()
        };
        let container_name = containers::container_name(&self.unique_name(), kind.type_name());

        // A leftover container with the same name would fail the create.
        if let Ok(client) = self.client() {
            remove_container(&client.clone(), &container_name).await;
        }

        let env = self.job.variable_strings();
        let labels = self.prepare_labels(&[("type", kind.type_name())])?;
        let entrypoint = containers::overwrite_entrypoint(&definition, &settings);
        let mut body = containers::build_container_body(
            kind.type_name(),
            &settings,
            &image_id,
            &hostname,
            self.os.shell.docker_command(),
            env,
            labels,
            entrypoint,
        );

        let privileged = settings.privileged
            && containers::privileged_allowed(&definition.name, &settings.allowed_privileged_images);
        let init = matches!(kind, ContainerKind::Build) && self.job.flags.use_init_process;
        let mut host_config = containers::build_host_config(
            &settings,
            self.devices.clone(),
            self.device_requests.clone(),
            self.binds()?,
            self.links.clone(),
            &self.network_mode,
            init,
        );
        host_config.privileged = Some(privileged);
        body.host_config = Some(host_config);
        body.networking_config = containers::networking_config(
            &self.network_mode,
            vec!["build".to_string(), container_name.clone()],
        );

        let platform = (!definition.platform.is_empty()).then(|| definition.platform.clone());

        debug!(container = %container_name, "creating container");
        let id = self
            .client()?
            .create_container(&container_name, platform, body)
            .await?;
        self.temporary.push(id.clone());
        if matches!(kind, ContainerKind::Build) {
            self.build_container_id = Some(id.clone());
        }
        self.containers.insert(kind.type_name(), id.clone());
        Ok(id)
    }

    /// Resolve the helper image once per job and cache its ID.
    pub(super) async fn helper_image_id(&mut self) -> Result<String, ExecutorError> {
        if let Some(id) = &self.helper_image_id {
            return Ok(id.clone());
        }

        let settings = self.settings()?.clone();
        let info = self
            .helper_info
            .clone()
            .ok_or(ExecutorError::NotInitialized("helper image"))?;
        let client: Arc<dyn ImageClient> = Arc::new(self.client()?.clone());
        let inspect = helper_image::resolve(
            client,
            self.pull()?,
            self.trace.as_ref(),
            &info,
            &settings,
            self.os.shell,
            &self.prebuilt_paths,
        )
        .await?;

        let id = inspect.id.unwrap_or_else(|| info.to_string());
        self.helper_image_id = Some(id.clone());
        Ok(id)
    }

    // ── Shared lookups ──────────────────────────────────────────

    fn connect(&mut self, settings: &DockerSettings) -> Result<(), ExecutorError> {
        let endpoint = match &self.tunnel {
            Some(tunnel) => tunnel.endpoint(),
            None => settings.host.clone(),
        };
        debug!(endpoint = %endpoint, "connecting to docker daemon");
        self.client = Some(DockerClient::connect(&endpoint)?);
        Ok(())
    }

    /// The effective build image: the job's, falling back to the configured
    /// default, expanded against job variables and checked against the
    /// image allow-list.
    fn build_image_name(&self, settings: &DockerSettings) -> Result<String, ExecutorError> {
        let raw = if !self.job.image.name.is_empty() {
            &self.job.image.name
        } else if !settings.image.is_empty() {
            &settings.image
        } else {
            return Err(ExecutorError::NoImageSpecified);
        };

        let name = expand_value(raw, &self.job.variables);
        let internal = vec![expand_value(&settings.image, &self.job.variables)];
        verify_allowed_image(&name, "images", &settings.allowed_images, &internal)?;
        Ok(name)
    }

    /// Job-scoped resource name prefix, with a randomized suffix generated
    /// once per job.
    pub(super) fn unique_name(&mut self) -> String {
        if let Some(name) = &self.unique_name {
            return name.clone();
        }
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", self.job.project_unique_name, &suffix[..8]);
        self.unique_name = Some(name.clone());
        name
    }

    /// Generated labels merged with the deployment's extra container labels,
    /// values expanded against job variables.
    pub(super) fn prepare_labels(
        &self,
        extras: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, ExecutorError> {
        let mut labels = self.labeler()?.labels(extras);
        for (key, value) in &self.settings()?.container_labels {
            labels.insert(key.clone(), expand_value(value, &self.job.variables));
        }
        Ok(labels)
    }

    pub(super) fn client(&self) -> Result<&DockerClient, ExecutorError> {
        self.client.as_ref().ok_or(ExecutorError::Docker(
            DockerError::ConnectionFailed("docker client is not connected".to_string()),
        ))
    }

    pub(super) fn settings(&self) -> Result<&DockerSettings, ExecutorError> {
        self.settings
            .as_ref()
            .ok_or(ExecutorError::MissingDockerConfig)
    }

    pub(super) fn pull(&self) -> Result<&pull::Manager, ExecutorError> {
        self.pull
            .as_ref()
            .ok_or(ExecutorError::NotInitialized("pull manager"))
    }

    fn labeler(&self) -> Result<&Labeler, ExecutorError> {
        self.labeler
            .as_ref()
            .ok_or(ExecutorError::NotInitialized("labeler"))
    }

    pub(super) fn binds(&self) -> Result<Vec<String>, ExecutorError> {
        Ok(self
            .volumes
            .as_ref()
            .ok_or(ExecutorError::NotInitialized("volumes manager"))?
            .binds())
    }
}

/// The build-directory volume. Persistent for fetch jobs so the working
/// tree survives between runs; temporary otherwise. "Already defined" and
/// "cache disabled" degrade to a temporary volume instead of failing.
pub(crate) async fn create_build_volume(
    volumes: &mut volumes::Manager,
    trace: &dyn TraceSink,
    strategy: GitStrategy,
    root_dir: &str,
) -> Result<(), ExecutorError> {
    let result = match strategy {
        GitStrategy::Fetch => match volumes.create(root_dir).await {
            Ok(()) => return Ok(()),
            Err(VolumesError::CacheVolumesDisabled) | Err(VolumesError::AlreadyDefined(_)) => {
                trace.warning(&format!(
                    "Falling back to a temporary build volume for {:?}",
                    root_dir
                ));
                volumes.create_temporary(root_dir).await
            }
            Err(e) => return Err(e.into()),
        },
        GitStrategy::Clone => volumes.create_temporary(root_dir).await,
    };

    match result {
        // Another declaration already covers the path.
        Ok(()) | Err(VolumesError::AlreadyDefined(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove a container after disconnecting it from any network that still
/// lists it. Best-effort: cleanup and name-collision paths both tolerate
/// failure.
async fn remove_container(client: &DockerClient, id: &str) {
    debug!(container = %id, "removing container");
    disconnect_container_networks(client, id).await;
    if let Err(e) = client.remove_container(id, true, true).await {
        debug!(container = %id, error = %e, "container removal failed");
    }
}

async fn disconnect_container_networks(client: &DockerClient, id: &str) {
    let networks = match client.list_networks().await {
        Ok(networks) => networks,
        Err(e) => {
            debug!(error = %e, "cannot list networks for disconnect");
            return;
        }
    };

    for network in networks {
        let Some(network_id) = network.id.as_deref() else {
            continue;
        };
        if !network_lists_container(&network, id) {
            continue;
        }

        match client.disconnect_network(network_id, id, true).await {
            Ok(()) => warn!(
                container = %id,
                network = ?network.name,
                "possibly zombie container disconnected from network"
            ),
            Err(e) => warn!(
                container = %id,
                network = ?network.name,
                error = %e,
                "cannot disconnect possibly zombie container from network"
            ),
        }
    }
}

/// True when a network-inspect entry lists the container, by ID or by name.
/// The daemon reports container names with a leading slash.
fn network_lists_container(network: &Network, id: &str) -> bool {
    network.containers.as_ref().is_some_and(|containers| {
        containers.iter().any(|(container_id, container)| {
            container_id == id
                || container
                    .name
                    .as_deref()
                    .is_some_and(|name| name.trim_start_matches('/') == id)
        })
    })
}

fn termination_command(shell: Shell) -> Vec<String> {
    if shell.is_posix() {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            shell.termination_script().to_string(),
        ]
    } else {
        let interpreter = if matches!(shell, Shell::Pwsh) {
            "pwsh"
        } else {
            "powershell"
        };
        vec![
            interpreter.to_string(),
            "-Command".to_string(),
            shell.termination_script().to_string(),
        ]
    }
}
