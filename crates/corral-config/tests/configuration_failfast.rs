use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use corral_config::{Config, ConfigError};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = std::env::var_os(key);
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

#[test]
fn malformed_configs_return_aggregated_error() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let cli_path = temp_dir.path().join("cli_corral.toml");
    let env_path = temp_dir.path().join("env_corral.toml");

    fs::write(&cli_path, "state_port = = 1").expect("write malformed cli config");
    fs::write(&env_path, "api_port = not_a_number").expect("write malformed env config");

    let _env = EnvOverride::set_var("CORRAL_CONFIG_PATH", env_path.as_os_str());

    let args = vec![
        OsString::from("corral"),
        OsString::from("--config-path"),
        cli_path.clone().into_os_string(),
    ];

    let error = Config::load_from_iter(args).expect_err("loading must fail");
    match error.as_ref() {
        OrthoError::Aggregate(aggregate) => {
            let mentioned_paths = aggregate
                .iter()
                .filter_map(|err| match err {
                    OrthoError::File { path, .. } => Some(path.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>();
            assert!(
                mentioned_paths.contains(&cli_path),
                "missing CLI path in aggregate: {mentioned_paths:?}"
            );
            assert!(
                mentioned_paths.contains(&env_path),
                "missing env path in aggregate: {mentioned_paths:?}"
            );
        }
        other => panic!("expected aggregated error, got {other:?}"),
    }
}

#[test]
fn loaded_config_with_conflicting_ports_fails_validation() {
    let _lock = ENV_MUTEX
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("corral.toml");
    fs::write(&path, "state_port = 5000\napi_port = 5000\n").expect("write config");

    let config = Config::load_from_iter(vec![
        OsString::from("corral"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ])
    .expect("config loads");

    assert!(matches!(
        config.validate(),
        Err(ConfigError::PortConflict { port: 5000 })
    ));
}
