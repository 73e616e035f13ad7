//! Shell profiles — the command a job container runs, and the
//! termination script used for graceful shutdown of the build container.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    #[default]
    Bash,
    Sh,
    Powershell,
    Pwsh,
}

impl Shell {
    /// The command a build/predefined container is started with. The job
    /// script is fed over stdin.
    pub fn docker_command(&self) -> Vec<String> {
        match self {
            Shell::Bash => vec!["bash".into()],
            Shell::Sh => vec!["sh".into()],
            Shell::Powershell => vec![
                "powershell".into(),
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
                "-".into(),
            ],
            Shell::Pwsh => vec![
                "pwsh".into(),
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
                "-".into(),
            ],
        }
    }

    /// Script exec'd inside the build container on cancellation to deliver a
    /// terminate signal to every process, giving them a chance to exit
    /// before the container is removed.
    pub fn termination_script(&self) -> &'static str {
        match self {
            // -1 addresses every process the shell may signal.
            Shell::Bash | Shell::Sh => "kill -TERM -1",
            Shell::Powershell | Shell::Pwsh => {
                "Get-Process | Where-Object { $_.Id -ne $PID } | Stop-Process"
            }
        }
    }

    pub fn is_posix(&self) -> bool {
        matches!(self, Shell::Bash | Shell::Sh)
    }
}
