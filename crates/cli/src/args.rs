use std::path::PathBuf;

use clap::{Parser, Subcommand};
use launch::AppType;

#[derive(Debug, Parser)]
#[clap(name = "tizen-debug", version, about = "Run, debug and hot reload Tizen applications")]
pub struct Args {
    /// Path to the config file
    #[clap(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,

    #[clap(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List attached devices and emulators
    Devices {
        /// Print as JSON
        #[clap(long)]
        json: bool,
    },

    /// Install a package and start the application, optionally under the debugger
    Launch(LaunchArgs),

    /// Hot reload project changes into a running application
    Watch(WatchArgs),
}

#[derive(Debug, clap::Args)]
pub struct LaunchArgs {
    /// Project directory or project file
    #[clap(long)]
    pub(crate) project: PathBuf,

    #[clap(long)]
    pub(crate) app_id: String,

    /// Built `.tpk` to install
    #[clap(long)]
    pub(crate) package: PathBuf,

    /// Package id, defaults to the app id
    #[clap(long)]
    pub(crate) package_id: Option<String>,

    /// Version of the built package; an identical installed version is not reinstalled
    #[clap(long = "version")]
    pub(crate) package_version: Option<String>,

    #[clap(long, default_value = "ui-application")]
    pub(crate) app_type: AppType,

    /// Build output holding the managed assemblies, defaults to the package directory
    #[clap(long)]
    pub(crate) output_dir: Option<PathBuf>,

    /// Main assembly, defaults to `<project name>.dll`
    #[clap(long)]
    pub(crate) exe: Option<String>,

    /// Attach the native debugger
    #[clap(long)]
    pub(crate) debug: bool,

    /// Reinstall even if the same version is present
    #[clap(long)]
    pub(crate) force: bool,

    /// Target device, defaults to the first online device
    #[clap(short, long)]
    pub(crate) serial: Option<String>,

    /// Arguments passed to the application
    #[clap(last = true)]
    pub(crate) app_args: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    /// Project directory or project file
    #[clap(long)]
    pub(crate) project: PathBuf,

    #[clap(long)]
    pub(crate) app_id: String,

    /// Target device, defaults to the first online device
    #[clap(short, long)]
    pub(crate) serial: Option<String>,
}
