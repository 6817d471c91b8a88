//! Installing application packages and the on-demand debug server.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bridge::{BridgeError, CommandOutput, DeviceBridge};
use devices::{CpuArch, Protocol};
use eyre::WrapErr;

/// A built application package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub package_id: String,
    pub version: Option<String>,
    pub path: PathBuf,
}

/// Outcome of an install attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallResult {
    Ok,
    /// The same version is already installed and reinstall was not forced
    Skipped,
    PackageNotFound(PathBuf),
    NoDevice,
    BridgeUnavailable,
    /// The device refused the package; carries the first error line
    Rejected(String),
    Timeout,
}

impl InstallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallResult::Ok | InstallResult::Skipped)
    }

    pub fn user_message(&self) -> String {
        match self {
            InstallResult::Ok => "package installed".to_string(),
            InstallResult::Skipped => "package already installed, skipping".to_string(),
            InstallResult::PackageNotFound(path) => {
                format!("package file {} not found; build the project first", path.display())
            }
            InstallResult::NoDevice => "no target device is connected".to_string(),
            InstallResult::BridgeUnavailable => {
                "sdb could not be run; check the Tizen SDK installation".to_string()
            }
            InstallResult::Rejected(reason) => format!("the device rejected the package: {reason}"),
            InstallResult::Timeout => "installing the package timed out".to_string(),
        }
    }
}

/// Map the output of `sdb install` to an [`InstallResult`]
pub fn classify_install_output(output: &CommandOutput) -> InstallResult {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let error_line = combined.lines().map(str::trim).find(|line| {
        let lower = line.to_ascii_lowercase();
        lower.contains("val[fail]") || lower.starts_with("error") || lower.contains("failed")
    });

    match (output.success(), error_line) {
        (true, None) => InstallResult::Ok,
        (_, Some(line)) => InstallResult::Rejected(line.to_string()),
        (false, None) => InstallResult::Rejected(format!(
            "sdb install exited with code {}",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )),
    }
}

fn bridge_failure(error: &BridgeError) -> InstallResult {
    match error {
        BridgeError::Timeout { .. } => InstallResult::Timeout,
        BridgeError::MissingSerial => InstallResult::NoDevice,
        BridgeError::NotFound { .. } | BridgeError::Spawn { .. } => {
            InstallResult::BridgeUnavailable
        }
        BridgeError::Failed { output, .. } => InstallResult::Rejected(output.clone()),
    }
}

/// Extract one `key : value` field from `pkginfo --pkg` output
fn pkginfo_field(output: &str, field: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(field)
            .then(|| value.trim().to_string())
    })
}

/// Packages built for an app id that may not be on the device yet
#[derive(Debug, Default)]
pub struct PendingPackages {
    packages: Mutex<HashMap<String, PackageRef>>,
}

impl PendingPackages {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PackageRef>> {
        self.packages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self, app_id: &str, package: PackageRef) {
        self.lock().insert(app_id.to_string(), package);
    }

    pub fn get(&self, app_id: &str) -> Option<PackageRef> {
        self.lock().get(app_id).cloned()
    }

    pub fn clear(&self, app_id: &str) -> Option<PackageRef> {
        self.lock().remove(app_id)
    }

    /// The tracked package for `app_id`, if its file is still on disk
    pub fn candidate(&self, app_id: &str) -> Option<PackageRef> {
        self.get(app_id).filter(|pending| pending.path.is_file())
    }
}

/// Receives user-facing progress messages
pub trait Progress: Send + Sync {
    fn report(&self, message: &str);
}

pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _message: &str) {}
}

/// Forwards progress to the log
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn report(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Where and what to install
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub serial: String,
    pub protocol: Protocol,
    pub app_id: String,
    pub package: PackageRef,
}

/// Where the debug server has to go
#[derive(Debug, Clone)]
pub struct DebugServerTarget<'a> {
    pub serial: &'a str,
    pub protocol: Protocol,
    pub arch: CpuArch,
    pub tool_path: &'a str,
    pub sdk_root: &'a Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugServerStatus {
    AlreadyInstalled,
    Installed,
}

pub struct PackageInstaller<B> {
    bridge: Arc<B>,
    pending: Arc<PendingPackages>,
    debug_servers: Mutex<HashSet<String>>,
}

impl<B: DeviceBridge> PackageInstaller<B> {
    pub fn new(bridge: Arc<B>, pending: Arc<PendingPackages>) -> Self {
        Self {
            bridge,
            pending,
            debug_servers: Mutex::new(HashSet::new()),
        }
    }

    pub fn pending(&self) -> &Arc<PendingPackages> {
        &self.pending
    }

    /// Stop any running instance of the app; "not running" is not an error
    pub async fn terminate(&self, serial: &str, protocol: Protocol, app_id: &str) {
        let result = match protocol {
            Protocol::Plain => {
                self.bridge
                    .shell(serial, &format!("app_launcher -t {app_id}"))
                    .await
            }
            Protocol::Secured => self.bridge.shell_raw(serial, &format!("0 kill {app_id}")).await,
        };
        match result {
            Ok(output) if output.success() => {
                tracing::debug!(app_id, "terminated running instance")
            }
            Ok(output) => {
                tracing::debug!(app_id, output = %output.stdout.trim(), "app was not running")
            }
            Err(e) => tracing::warn!(error = %e, app_id, "could not terminate app"),
        }
    }

    #[tracing::instrument(
        skip(self, target, progress),
        fields(serial = %target.serial, app_id = %target.app_id)
    )]
    pub async fn install(
        &self,
        target: &InstallTarget,
        progress: &dyn Progress,
        force_reinstall: bool,
    ) -> InstallResult {
        let result = self.try_install(target, progress, force_reinstall).await;
        if result.is_success() {
            tracing::info!(result = ?result, "install finished");
        } else {
            let message = result.user_message();
            tracing::error!(%message, "install failed");
            progress.report(&message);
        }
        // installed, skipped or failed: either way nothing is pending any more
        if self.pending.clear(&target.app_id).is_some() {
            tracing::debug!("cleared pending package");
        }
        result
    }

    /// Pick the package to install for `app_id`.
    ///
    /// A tracked package wins over `fresh` only while its file exists and the
    /// device reports its package id as installed. Secured devices cannot be
    /// queried, so they always get `fresh`.
    pub async fn resolve_package(
        &self,
        serial: &str,
        protocol: Protocol,
        app_id: &str,
        fresh: &PackageRef,
    ) -> PackageRef {
        let Some(pending) = self.pending.candidate(app_id) else {
            return fresh.clone();
        };
        if protocol == Protocol::Plain {
            let installed = self
                .query_package(serial, &pending.package_id)
                .await
                .and_then(|info| pkginfo_field(&info, "pkgid"));
            if installed.as_deref() == Some(pending.package_id.as_str()) {
                tracing::debug!(path = %pending.path.display(), "using pending package");
                return pending;
            }
        }
        tracing::debug!(
            pending = %pending.path.display(),
            "pending package not on device, using fresh package"
        );
        fresh.clone()
    }

    async fn try_install(
        &self,
        target: &InstallTarget,
        progress: &dyn Progress,
        force_reinstall: bool,
    ) -> InstallResult {
        let package = &target.package;
        if !package.path.is_file() {
            return InstallResult::PackageNotFound(package.path.clone());
        }
        if target.serial.trim().is_empty() {
            return InstallResult::NoDevice;
        }
        self.pending.track(&target.app_id, package.clone());

        progress.report(&format!("terminating {}", target.app_id));
        self.terminate(&target.serial, target.protocol, &target.app_id).await;

        if !force_reinstall && target.protocol == Protocol::Plain {
            if let Some(version) = &package.version {
                if self.installed_version(&target.serial, &package.package_id).await.as_ref()
                    == Some(version)
                {
                    progress.report(&format!(
                        "{} {version} is already installed",
                        package.package_id
                    ));
                    return InstallResult::Skipped;
                }
            }
        }

        progress.report(&format!("installing {}", package.path.display()));
        let args = vec!["install".to_string(), package.path.display().to_string()];
        match self.bridge.run(&target.serial, &args).await {
            Ok(output) => classify_install_output(&output),
            Err(e) => {
                tracing::warn!(error = %e, "running sdb install");
                bridge_failure(&e)
            }
        }
    }

    /// `pkginfo --pkg` output for a package the device knows about
    async fn query_package(&self, serial: &str, package_id: &str) -> Option<String> {
        let output = self
            .bridge
            .shell(serial, &format!("pkginfo --pkg {package_id}"))
            .await
            .ok()?;
        output.success().then_some(output.stdout)
    }

    async fn installed_version(&self, serial: &str, package_id: &str) -> Option<String> {
        let info = self.query_package(serial, package_id).await?;
        pkginfo_field(&info, "version")
    }

    /// Make sure lldb-server is present on the device.
    ///
    /// Plain devices get the server binaries pushed directly; secured devices
    /// receive an archive that the device-side installer unpacks. Repeated calls
    /// for the same device are no-ops.
    #[tracing::instrument(
        skip(self, target),
        fields(serial = %target.serial, protocol = ?target.protocol)
    )]
    pub async fn ensure_debug_server(
        &self,
        target: &DebugServerTarget<'_>,
    ) -> eyre::Result<DebugServerStatus> {
        let serial = target.serial;
        let installed = self
            .debug_servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(serial);
        if installed {
            return Ok(DebugServerStatus::AlreadyInstalled);
        }

        let tool_path = target.tool_path.trim_end_matches('/');
        let status = match target.protocol {
            Protocol::Plain => self.push_debug_server(target, tool_path).await?,
            Protocol::Secured => self.install_debug_server_archive(target, tool_path).await?,
        };

        self.debug_servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(serial.to_string());
        Ok(status)
    }

    async fn push_debug_server(
        &self,
        target: &DebugServerTarget<'_>,
        tool_path: &str,
    ) -> eyre::Result<DebugServerStatus> {
        let server = format!("{tool_path}/lldb/bin/lldb-server");
        let listing = self
            .bridge
            .shell(target.serial, &format!("ls {server}"))
            .await
            .wrap_err("checking for lldb-server")?;
        if listing.success() && listing.stdout.contains("lldb-server") {
            tracing::debug!(%server, "debug server present");
            return Ok(DebugServerStatus::AlreadyInstalled);
        }

        let local = target
            .sdk_root
            .join("tools")
            .join("lldb")
            .join(target.arch.package_name())
            .join("bin");
        if !local.is_dir() {
            eyre::bail!("debug server binaries not found at {}", local.display());
        }

        let device_dir = format!("{tool_path}/lldb/bin");
        self.bridge
            .push(target.serial, &local, &device_dir)
            .await
            .wrap_err("pushing lldb binaries")?;
        let chmod = self
            .bridge
            .shell(target.serial, &format!("chmod +x {device_dir}/*"))
            .await
            .wrap_err("marking lldb binaries executable")?;
        if !chmod.success() {
            eyre::bail!("chmod of lldb binaries failed: {}", chmod.stdout.trim());
        }
        tracing::info!("debug server pushed");
        Ok(DebugServerStatus::Installed)
    }

    async fn install_debug_server_archive(
        &self,
        target: &DebugServerTarget<'_>,
        tool_path: &str,
    ) -> eyre::Result<DebugServerStatus> {
        let archive_name = format!("lldb-{}.tar.gz", target.arch.package_name());
        let archive = target.sdk_root.join("on-demand").join(&archive_name);
        if !archive.is_file() {
            eyre::bail!("debug server archive not found at {}", archive.display());
        }

        let device_dir = format!("{tool_path}/on-demand");
        self.bridge
            .push(target.serial, &archive, &device_dir)
            .await
            .wrap_err("pushing lldb archive")?;
        let output = self
            .bridge
            .shell_raw(
                target.serial,
                &format!("0 ondemand_install {device_dir}/{archive_name}"),
            )
            .await
            .wrap_err("installing lldb archive")?;
        if !output.success() || output.stdout.to_ascii_lowercase().contains("fail") {
            eyre::bail!("on-demand install of lldb failed: {}", output.stdout.trim());
        }
        tracing::info!("debug server installed from archive");
        Ok(DebugServerStatus::Installed)
    }
}
