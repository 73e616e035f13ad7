//! Exec domain — one-shot command execution inside a running container.

use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::ExecConfig;
use futures_util::stream::StreamExt;

use super::client::{DockerClient, DockerError};

impl DockerClient {
    /// Run `cmd` inside a running container, draining any output. Used for
    /// the graceful-termination script, where the output is rarely
    /// interesting but must be consumed for the exec to finish.
    pub async fn exec_in_container(
        &self,
        container_id: &str,
        cmd: Vec<String>,
    ) -> Result<(), DockerError> {
        let config = ExecConfig {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            cmd: Some(cmd),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, config)
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))?;

        let options = Some(StartExecOptions {
            detach: false,
            ..Default::default()
        });

        match self
            .client
            .start_exec(&exec.id, options)
            .await
            .map_err(DockerError::from)?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    if let Err(e) = chunk {
                        return Err(DockerError::from(e));
                    }
                }
                Ok(())
            }
            StartExecResults::Detached => Ok(()),
        }
    }
}
