//! Helper-image identity and resolution.
//!
//! The helper image runs the predefined and service-wait containers. Its
//! identity is computed from the daemon's OS, architecture and kernel plus
//! the configured shell and flavor; resolution prefers a configured
//! override, then a local copy, then a bundled prebuilt archive, then the
//! registry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bollard::models::ImageInspect;
use tracing::debug;

use crate::config::DockerSettings;
use crate::error::ExecutorError;
use crate::pull::{self, ImageClient};
use crate::shell::Shell;
use crate::trace::TraceSink;

const HELPER_IMAGE_NAME: &str = "registry.forgerunner.io/forgerunner/runner-helper";
const DEFAULT_LINUX_FLAVOR: &str = "alpine";
const DEFAULT_WINDOWS_FLAVOR: &str = "servercore";
const PREBUILT_EXTENSION: &str = ".tar.xz";

/// Exported archives lose their ENTRYPOINT; reapplied on import.
const IMPORT_CHANGES: &[&str] = &[r#"ENTRYPOINT ["/usr/bin/dumb-init", "/entrypoint"]"#];

/// Where bundled prebuilt archives are installed.
pub const PREBUILT_IMAGE_PATHS: &[&str] = &[
    "/usr/local/lib/forgerunner/helper-images",
    "/usr/lib/forgerunner/helper-images",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperImageInfo {
    pub os_type: String,
    pub architecture: String,
    pub name: String,
    pub tag: String,
    /// Windows daemons cannot import the linux-built archives.
    pub supports_local_import: bool,
}

impl fmt::Display for HelperImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Daemon facts and configuration the identity is computed from.
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub os_type: String,
    pub architecture: String,
    pub kernel_version: String,
    pub shell: Shell,
    pub flavor: String,
}

/// Compute the helper image identity for this runner revision.
pub fn get(revision: &str, config: &IdentityConfig) -> Result<HelperImageInfo, ExecutorError> {
    let architecture = normalize_architecture(&config.architecture);

    match config.os_type.as_str() {
        "linux" => {
            let flavor = default_flavor(&config.flavor, DEFAULT_LINUX_FLAVOR);
            let mut tag = format!("{}-{}-v{}", flavor, architecture, revision);
            if matches!(config.shell, Shell::Pwsh) {
                tag.push_str("-pwsh");
            }
            Ok(HelperImageInfo {
                os_type: "linux".to_string(),
                architecture,
                name: HELPER_IMAGE_NAME.to_string(),
                tag,
                supports_local_import: true,
            })
        }
        "windows" => {
            let version = windows_version(&config.kernel_version)?;
            let flavor = default_flavor(&config.flavor, DEFAULT_WINDOWS_FLAVOR);
            Ok(HelperImageInfo {
                os_type: "windows".to_string(),
                architecture: architecture.clone(),
                name: HELPER_IMAGE_NAME.to_string(),
                tag: format!("{}-{}-v{}-{}", flavor, architecture, revision, version),
                supports_local_import: false,
            })
        }
        other => Err(ExecutorError::UnsupportedOsType(other.to_string())),
    }
}

/// The archive file name bundled installs carry for this identity.
pub fn prebuilt_file_name(architecture: &str, flavor: &str, shell: Shell) -> String {
    let flavor = default_flavor(flavor, DEFAULT_LINUX_FLAVOR);
    if matches!(shell, Shell::Pwsh) {
        format!("prebuilt-{}-{}-pwsh{}", flavor, architecture, PREBUILT_EXTENSION)
    } else {
        format!("prebuilt-{}-{}{}", flavor, architecture, PREBUILT_EXTENSION)
    }
}

/// Resolve the helper image: configured override (always pulled), local
/// image, prebuilt archive import, then registry pull.
pub async fn resolve(
    client: Arc<dyn ImageClient>,
    pull: &pull::Manager,
    trace: &dyn TraceSink,
    info: &HelperImageInfo,
    settings: &DockerSettings,
    shell: Shell,
    candidate_paths: &[PathBuf],
) -> Result<ImageInspect, ExecutorError> {
    if !settings.helper_image.is_empty() {
        trace.println(&format!(
            "Using helper image: {} (overridden, default would be {})",
            settings.helper_image, info
        ));
        return Ok(pull.resolve(&settings.helper_image, &[]).await?);
    }

    let reference = info.to_string();
    debug!(image = %reference, "looking for helper image locally");
    if let Ok(inspect) = client.inspect_image(&reference).await {
        return Ok(inspect);
    }

    if info.supports_local_import {
        let file_name =
            prebuilt_file_name(&info.architecture, &settings.helper_image_flavor, shell);
        if let Some(inspect) =
            import_prebuilt(client.as_ref(), info, candidate_paths, &file_name).await
        {
            return Ok(inspect);
        }
    }

    trace.println(&format!("Using helper image: {}", reference));
    Ok(pull.resolve(&reference, &[]).await?)
}

async fn import_prebuilt(
    client: &dyn ImageClient,
    info: &HelperImageInfo,
    candidate_paths: &[PathBuf],
    file_name: &str,
) -> Option<ImageInspect> {
    for dir in candidate_paths {
        let archive = dir.join(file_name);
        if !archive.exists() {
            debug!(path = %archive.display(), "no prebuilt helper archive");
            continue;
        }

        debug!(path = %archive.display(), "importing prebuilt helper image");
        let changes = IMPORT_CHANGES.iter().map(|c| c.to_string()).collect();
        match import_and_inspect(client, info, &archive, changes).await {
            Ok(inspect) => return Some(inspect),
            Err(e) => {
                debug!(path = %archive.display(), error = %e, "prebuilt import failed");
            }
        }
    }
    None
}

async fn import_and_inspect(
    client: &dyn ImageClient,
    info: &HelperImageInfo,
    archive: &Path,
    changes: Vec<String>,
) -> Result<ImageInspect, crate::docker::client::DockerError> {
    client
        .import_image(archive, &info.name, &info.tag, changes)
        .await?;
    client.inspect_image(&info.to_string()).await
}

fn default_flavor<'a>(configured: &'a str, fallback: &'a str) -> &'a str {
    if configured.is_empty() {
        fallback
    } else {
        configured
    }
}

fn normalize_architecture(architecture: &str) -> String {
    match architecture {
        "amd64" | "x86_64" => "x86_64".to_string(),
        "armv6l" | "armv7l" => "arm".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Map the daemon's kernel version to a Windows servicing channel. Only
/// builds with published helper images are supported.
fn windows_version(kernel_version: &str) -> Result<&'static str, ExecutorError> {
    const KNOWN: &[(&str, &str)] = &[
        ("17763", "ltsc2019"),
        ("20348", "ltsc2022"),
        ("26100", "ltsc2025"),
    ];

    for (build, channel) in KNOWN {
        if kernel_version.contains(build) {
            return Ok(channel);
        }
    }
    Err(ExecutorError::UnsupportedWindowsVersion(
        kernel_version.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::client::DockerError;
    use crate::pull::MockImageClient;
    use crate::trace::BufferedTrace;

    fn linux_identity() -> IdentityConfig {
        IdentityConfig {
            os_type: "linux".to_string(),
            architecture: "amd64".to_string(),
            kernel_version: "6.1.0".to_string(),
            shell: Shell::Bash,
            flavor: String::new(),
        }
    }

    // ── Identity ────────────────────────────────────────────────

    #[test]
    fn test_linux_identity_defaults() {
        let info = get("1.2.3", &linux_identity()).unwrap();
        assert_eq!(info.architecture, "x86_64");
        assert_eq!(info.tag, "alpine-x86_64-v1.2.3");
        assert!(info.supports_local_import);
        assert_eq!(info.to_string(), format!("{}:alpine-x86_64-v1.2.3", HELPER_IMAGE_NAME));
    }

    #[test]
    fn test_pwsh_gets_its_own_tag() {
        let mut config = linux_identity();
        config.shell = Shell::Pwsh;
        let info = get("1.2.3", &config).unwrap();
        assert_eq!(info.tag, "alpine-x86_64-v1.2.3-pwsh");
    }

    #[test]
    fn test_windows_identity_maps_kernel_to_channel() {
        let config = IdentityConfig {
            os_type: "windows".to_string(),
            architecture: "amd64".to_string(),
            kernel_version: "10.0 20348 (20348.1.amd64fre.fe_release.210507-1500)".to_string(),
            shell: Shell::Powershell,
            flavor: String::new(),
        };
        let info = get("1.2.3", &config).unwrap();
        assert_eq!(info.tag, "servercore-x86_64-v1.2.3-ltsc2022");
        assert!(!info.supports_local_import);
    }

    #[test]
    fn test_unknown_windows_build_is_rejected() {
        let config = IdentityConfig {
            os_type: "windows".to_string(),
            kernel_version: "10.0 12345".to_string(),
            ..linux_identity()
        };
        assert!(matches!(
            get("1.2.3", &config),
            Err(ExecutorError::UnsupportedWindowsVersion(_))
        ));
    }

    #[test]
    fn test_unsupported_os_type() {
        let config = IdentityConfig {
            os_type: "freebsd".to_string(),
            ..linux_identity()
        };
        assert!(matches!(
            get("1.2.3", &config),
            Err(ExecutorError::UnsupportedOsType(os)) if os == "freebsd"
        ));
    }

    #[test]
    fn test_prebuilt_file_name() {
        assert_eq!(
            prebuilt_file_name("x86_64", "", Shell::Bash),
            "prebuilt-alpine-x86_64.tar.xz"
        );
        assert_eq!(
            prebuilt_file_name("arm64", "ubuntu", Shell::Pwsh),
            "prebuilt-ubuntu-arm64-pwsh.tar.xz"
        );
    }

    // ── Resolution ──────────────────────────────────────────────

    fn pull_manager(client: Arc<dyn ImageClient>) -> pull::Manager {
        pull::Manager::new(
            client,
            pull::ManagerConfig::default(),
            Arc::new(BufferedTrace::new()),
        )
    }

    #[tokio::test]
    async fn test_local_image_wins_without_pull() {
        let mut client = MockImageClient::new();
        client.expect_inspect_image().times(1).returning(|_| {
            Ok(ImageInspect {
                id: Some("sha256:local".to_string()),
                ..Default::default()
            })
        });
        client.expect_pull_image().times(0);
        client.expect_import_image().times(0);

        let client: Arc<dyn ImageClient> = Arc::new(client);
        let pull = pull_manager(client.clone());
        let info = get("1.2.3", &linux_identity()).unwrap();

        let inspect = resolve(
            client,
            &pull,
            &BufferedTrace::new(),
            &info,
            &DockerSettings::default(),
            Shell::Bash,
            &[],
        )
        .await
        .unwrap();
        assert_eq!(inspect.id.as_deref(), Some("sha256:local"));
    }

    #[tokio::test]
    async fn test_prebuilt_archive_fallback_issues_no_pull() {
        // Three candidate directories; only the second holds the archive.
        let tmp = tempfile::tempdir().unwrap();
        let info = get("1.2.3", &linux_identity()).unwrap();
        let file_name = prebuilt_file_name("x86_64", "", Shell::Bash);
        std::fs::write(tmp.path().join(&file_name), b"archive").unwrap();

        let candidates = vec![
            PathBuf::from("/nonexistent/one"),
            tmp.path().to_path_buf(),
            PathBuf::from("/nonexistent/three"),
        ];

        let mut client = MockImageClient::new();
        let mut imported = false;
        client.expect_inspect_image().times(2).returning(move |r| {
            if std::mem::replace(&mut imported, true) {
                Ok(ImageInspect {
                    id: Some("sha256:imported".to_string()),
                    ..Default::default()
                })
            } else {
                Err(DockerError::NotFound(r.to_string()))
            }
        });
        {
            let expected = tmp.path().join(&file_name);
            client
                .expect_import_image()
                .withf(move |archive, _, _, changes| {
                    archive == expected && changes[0].starts_with("ENTRYPOINT")
                })
                .times(1)
                .returning(|_, _, _, _| Ok(()));
        }
        client.expect_pull_image().times(0);

        let client: Arc<dyn ImageClient> = Arc::new(client);
        let pull = pull_manager(client.clone());

        let inspect = resolve(
            client,
            &pull,
            &BufferedTrace::new(),
            &info,
            &DockerSettings::default(),
            Shell::Bash,
            &candidates,
        )
        .await
        .unwrap();
        assert_eq!(inspect.id.as_deref(), Some("sha256:imported"));
    }

    #[tokio::test]
    async fn test_configured_helper_image_is_always_pulled() {
        let mut client = MockImageClient::new();
        client
            .expect_pull_image()
            .withf(|r, _, _| r == "registry.example/custom-helper:1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_inspect_image()
            .times(1)
            .returning(|_| Ok(ImageInspect::default()));
        client.expect_import_image().times(0);

        let client: Arc<dyn ImageClient> = Arc::new(client);
        let pull = pull_manager(client.clone());
        let info = get("1.2.3", &linux_identity()).unwrap();

        let settings = DockerSettings {
            helper_image: "registry.example/custom-helper:1".to_string(),
            ..Default::default()
        };
        let trace = BufferedTrace::new();
        resolve(client, &pull, &trace, &info, &settings, Shell::Bash, &[])
            .await
            .unwrap();
        assert!(trace.contains("overridden"));
    }

    #[tokio::test]
    async fn test_registry_fallback_when_nothing_local() {
        let mut client = MockImageClient::new();
        let mut pulled = false;
        client.expect_inspect_image().times(2).returning(move |r| {
            if std::mem::replace(&mut pulled, true) {
                Ok(ImageInspect::default())
            } else {
                Err(DockerError::NotFound(r.to_string()))
            }
        });
        client.expect_pull_image().times(1).returning(|_, _, _| Ok(()));
        client.expect_import_image().times(0);

        let client: Arc<dyn ImageClient> = Arc::new(client);
        let pull = pull_manager(client.clone());
        let info = get("1.2.3", &linux_identity()).unwrap();

        resolve(
            client,
            &pull,
            &BufferedTrace::new(),
            &info,
            &DockerSettings::default(),
            Shell::Bash,
            &[PathBuf::from("/nonexistent")],
        )
        .await
        .unwrap();
    }
}
