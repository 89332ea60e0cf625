//! Command-line interface for bootstrapping and destroying corral
//! environments.
//!
//! Configuration flags (see [`CONFIG_CLI_FLAGS`]) come first and are layered
//! by `ortho_config` over the configuration file and `CORRAL_*` environment
//! variables. The first remaining token selects the subcommand. IO streams
//! are injected so tests can drive [`run`] without a terminal.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use corral_provider::DEFAULT_ADMIN_USER;

mod commands;
mod config;
mod errors;
pub mod telemetry;

use config::{ConfigArgumentSplit, ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::{AppError, render_chain};

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `corral_config::Config`.
pub const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--name",
    "--provider",
    "--home",
    "--root-dir",
    "--namespace",
    "--log-dir",
    "--state-port",
    "--api-port",
    "--admin-secret",
    "--mongod-path",
    "--mongo-path",
    "--db-startup-timeout-secs",
    "--service-dir",
    "--log-filter",
    "--log-format",
];

/// Boolean configuration flags, which never take a separate value.
pub const CONFIG_SWITCHES: &[&str] = &["--enable-os-refresh-update", "--enable-os-upgrade"];

/// Series provisioned on the bootstrap machine unless overridden.
pub const DEFAULT_SERIES: &str = "noble";

pub(crate) const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

#[derive(Debug, Parser)]
#[command(
    name = "corral",
    version,
    about = "Bootstrap and tear down corral environments"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Bootstrap the configured environment and provision machine 0.
    Bootstrap(BootstrapArgs),
    /// Destroy an environment and remove its record.
    DestroyEnvironment(DestroyArgs),
    /// List the instances running the state server.
    StateServers,
    /// Check constraints against the configured provider.
    ValidateConstraints {
        /// Whitespace-separated `key=value` pairs.
        constraints: String,
    },
    /// Seed the state database of a freshly bootstrapped environment.
    InitState(InitStateArgs),
}

#[derive(Debug, Args)]
pub(crate) struct BootstrapArgs {
    /// Constraints on the state server instance.
    #[arg(long, default_value = "")]
    pub(crate) constraints: String,
    /// Administrative principal created in the state database.
    #[arg(long, default_value = DEFAULT_ADMIN_USER)]
    pub(crate) admin_user: String,
    /// OS series of the bootstrap machine.
    #[arg(long, default_value = DEFAULT_SERIES)]
    pub(crate) series: String,
}

#[derive(Debug, Args)]
pub(crate) struct DestroyArgs {
    /// Skip the confirmation prompt.
    #[arg(short = 'y', long = "yes")]
    pub(crate) yes: bool,
    /// Remove the record even when tearing down the environment fails.
    #[arg(long)]
    pub(crate) force: bool,
    /// Environment to destroy.
    pub(crate) name: String,
}

#[derive(Debug, Args)]
pub(crate) struct InitStateArgs {
    /// Comma-separated state server addresses.
    #[arg(long, value_delimiter = ',')]
    pub(crate) state_servers: Option<Vec<String>>,
    /// Provider instance backing machine 0.
    #[arg(long)]
    pub(crate) instance_id: Option<String>,
    /// Provider type of the environment.
    #[arg(long)]
    pub(crate) env_type: Option<String>,
}

/// Runs the CLI with the provided arguments and IO handles.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    run_with_loader(args, &OrthoConfigLoader, stdin, stdout, stderr)
}

fn run_with_loader<I, L, R, W, E>(
    args: I,
    loader: &L,
    stdin: &mut R,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    L: ConfigLoader,
    R: BufRead,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(prepare_cli_arguments(&args, &split)) {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{error}");
            return ExitCode::FAILURE;
        }
    };

    let result = loader.load(&split.config_arguments).and_then(|config| {
        telemetry::initialise(&config.log_settings())?;
        match cli.command {
            CliCommand::Bootstrap(args) => commands::bootstrap(&config, &args, stdout),
            CliCommand::DestroyEnvironment(args) => {
                commands::destroy_environment(&config, &args, stdin, stdout, stderr)
            }
            CliCommand::StateServers => commands::state_servers(&config, stdout),
            CliCommand::ValidateConstraints { constraints } => {
                commands::validate_constraints(&config, &constraints, stdout)
            }
            CliCommand::InitState(args) => commands::init_state(&config, args, stdout),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "{}", render_chain(&error));
            ExitCode::FAILURE
        }
    }
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    args.first()
        .into_iter()
        .chain(args.iter().skip(split.command_start))
        .cloned()
        .collect()
}
