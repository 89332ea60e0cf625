//! Subcommand implementations.
//!
//! Every command resolves the environment's configuration the same way: the
//! bootstrap configuration stored in its record wins, and the CLI
//! configuration is used only when the record is absent or still empty.

use std::io::{BufRead, Write};
use std::sync::Arc;

use corral_config::Config;
use corral_provider::{
    BootstrapOrchestrator, BootstrapParams, Constraints, DEFAULT_ADMIN_USER, FinalizeParams,
    InstanceProvider, LocalRuntime, StructuredReporter, open_provider,
};
use corral_statedb::{DialInfo, MongoShell, ShellSession, StateDbError, StateSeed, seed_state};
use corral_store::{DiskStore, EnvironInfo, EnvironInfoStore, StoreError};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::{BootstrapArgs, CLI_TARGET, DestroyArgs, InitStateArgs};

/// Configuration of `name` plus its record, when one exists.
struct Resolved {
    config: Config,
    record: Option<EnvironInfo>,
}

fn resolve(config: &Config, name: &str) -> Result<Resolved, AppError> {
    let cli_config = Config {
        name: name.to_owned(),
        ..config.clone()
    };
    let store = DiskStore::from_config(&cli_config)?;
    let record = match store.read_info(name) {
        Ok(info) => Some(info),
        Err(StoreError::NotFound { .. }) => None,
        Err(error) => return Err(error.into()),
    };
    let config = match record.as_ref().filter(|info| !info.bootstrap_config().is_empty()) {
        Some(info) => Config::from_bootstrap_attrs(info.bootstrap_config())?,
        None => cli_config,
    };
    Ok(Resolved { config, record })
}

fn provider_for(config: &Config) -> Result<Arc<dyn InstanceProvider>, AppError> {
    Ok(open_provider(config.provider, LocalRuntime::system(config)?))
}

pub(crate) fn bootstrap(
    config: &Config,
    args: &BootstrapArgs,
    stdout: &mut impl Write,
) -> Result<(), AppError> {
    let constraints: Constraints = args.constraints.parse()?;
    let store = Arc::new(DiskStore::from_config(config)?);
    let provider = provider_for(config)?;
    let orchestrator = BootstrapOrchestrator::new(
        store,
        Arc::clone(&provider),
        Arc::new(StructuredReporter::new()),
    );

    let prepared = orchestrator.prepare(config)?;
    let params = BootstrapParams {
        admin_user: args.admin_user.clone(),
        constraints,
    };
    let bootstrapped = orchestrator.bootstrap(prepared, &params)?;

    let tools_url = provider
        .open(config)?
        .tools_sources()?
        .into_iter()
        .next()
        .unwrap_or_default();
    let machine = bootstrapped.finalizer.finalize(&FinalizeParams {
        series: args.series.clone(),
        tools_url,
    })?;
    writeln!(
        stdout,
        "environment '{}' bootstrapped on {} ({}), machine {}",
        config.name, bootstrapped.instance_id, bootstrapped.hardware, machine.machine_id
    )
    .map_err(AppError::Output)
}

pub(crate) fn destroy_environment(
    config: &Config,
    args: &DestroyArgs,
    stdin: &mut impl BufRead,
    stdout: &mut impl Write,
    stderr: &mut impl Write,
) -> Result<(), AppError> {
    if !args.yes && !confirm(&args.name, stdin, stderr)? {
        return Err(AppError::DestroyAborted {
            name: args.name.clone(),
        });
    }
    let Resolved { config, record } = resolve(config, &args.name)?;
    let destroyed = provider_for(&config)?
        .open(&config)
        .and_then(|environ| environ.destroy());
    match destroyed {
        Ok(outcome) => info!(
            target: CLI_TARGET,
            environment = %config.name,
            ?outcome,
            "environment destroy finished"
        ),
        Err(error) if args.force => {
            warn!(
                target: CLI_TARGET,
                environment = %config.name,
                error = %error,
                "ignoring destroy failure"
            );
        }
        Err(error) => return Err(error.into()),
    }
    if let Some(info) = record {
        match info.destroy() {
            Ok(()) | Err(StoreError::AlreadyRemoved { .. }) => {}
            Err(error) => return Err(error.into()),
        }
    }
    writeln!(stdout, "environment '{}' destroyed", args.name).map_err(AppError::Output)
}

fn confirm(
    name: &str,
    stdin: &mut impl BufRead,
    prompt: &mut impl Write,
) -> Result<bool, AppError> {
    write!(
        prompt,
        "WARNING: this command will destroy the \"{name}\" environment\nContinue [y/N]? "
    )
    .and_then(|()| prompt.flush())
    .map_err(AppError::Output)?;
    let mut answer = String::new();
    stdin.read_line(&mut answer).map_err(AppError::Prompt)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub(crate) fn state_servers(config: &Config, stdout: &mut impl Write) -> Result<(), AppError> {
    let Resolved { config, .. } = resolve(config, &config.name)?;
    let environ = provider_for(&config)?.open(&config)?;
    for id in environ.state_server_instances()? {
        writeln!(stdout, "{id}").map_err(AppError::Output)?;
    }
    Ok(())
}

pub(crate) fn validate_constraints(
    config: &Config,
    text: &str,
    stdout: &mut impl Write,
) -> Result<(), AppError> {
    let constraints: Constraints = text.parse()?;
    let environ = provider_for(config)?.open(config)?;
    let unsupported = environ.constraints_validator()?.validate(&constraints)?;
    let line = if unsupported.is_empty() {
        "constraints are valid".to_owned()
    } else {
        let keys: Vec<String> = unsupported.iter().map(ToString::to_string).collect();
        format!("unsupported constraints: {}", keys.join(","))
    };
    writeln!(stdout, "{line}").map_err(AppError::Output)
}

pub(crate) fn init_state(
    config: &Config,
    args: InitStateArgs,
    stdout: &mut impl Write,
) -> Result<(), AppError> {
    let seed = StateSeed::from_flags(args.state_servers, args.instance_id, args.env_type)?;
    let Some(address) = seed.state_servers.first() else {
        return Err(StateDbError::MissingFlag {
            flag: "state-servers",
        }
        .into());
    };
    let Resolved { config, record } = resolve(config, &config.name)?;
    let (user, password) = match record.filter(EnvironInfo::initialized) {
        Some(info) => (
            info.credentials().user.clone(),
            info.credentials().password.clone(),
        ),
        None => (
            DEFAULT_ADMIN_USER.to_owned(),
            config
                .admin_secret
                .clone()
                .ok_or(AppError::MissingSetting { key: "admin_secret" })?,
        ),
    };

    let shell = MongoShell::new(config.mongo_path.clone());
    let mut session =
        ShellSession::new(shell, DialInfo::tls(address.clone())).with_credentials(&user, &password);
    let machine = seed_state(&mut session, &seed)?;
    writeln!(stdout, "machine {machine} initialised").map_err(AppError::Output)
}
