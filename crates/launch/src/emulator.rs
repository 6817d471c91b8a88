use std::{future::Future, process::Stdio};

use eyre::WrapErr;

/// Starts an emulator when no device is attached
pub trait EmulatorLauncher: Send + Sync {
    fn start(&self) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// Runs a configured command (for example `em-cli launch -n <name>`) and returns
/// without waiting for the emulator to boot
#[derive(Debug, Clone, Default)]
pub struct CommandEmulator {
    command: Vec<String>,
}

impl CommandEmulator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl EmulatorLauncher for CommandEmulator {
    async fn start(&self) -> eyre::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            eyre::bail!("no device connected and no emulator command configured");
        };
        tracing::info!(%program, ?args, "starting emulator");
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .wrap_err_with(|| format!("spawning emulator command {program}"))?;
        Ok(())
    }
}
