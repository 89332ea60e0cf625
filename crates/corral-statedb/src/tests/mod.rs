//! Protocol tests for the admin bootstrap using in-memory collaborators.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8Path;
use mockall::mock;

use crate::error::{SessionError, StateDbError};
use crate::process::{ProcessLauncher, TransientProcess};
use crate::service::{ServiceController, ServiceDefinition};
use crate::session::{ADMIN_ROLES, AdminSession, DialInfo, SessionDialer};
use crate::{AdminBootstrapParams, AdminBootstrapper, set_admin_password, transient_args};


mock! {
    Services {}
    impl ServiceController for Services {
        fn installed(&self, name: &str) -> Result<bool, StateDbError>;
        fn install(&self, definition: &ServiceDefinition) -> Result<(), StateDbError>;
        fn start(&self, name: &str) -> Result<(), StateDbError>;
        fn stop(&self, name: &str) -> Result<(), StateDbError>;
        fn remove(&self, name: &str) -> Result<(), StateDbError>;
    }
}

/// Shared state behind the fake server, launcher and sessions.
#[derive(Debug, Default)]
struct FakeServer {
    users: Vec<(String, String, Vec<String>)>,
    launches: Vec<Vec<String>>,
    terminated: usize,
    killed: usize,
    ignores_sigterm: bool,
    unreachable_dials: usize,
    always_unreachable: bool,
    exits_early: bool,
    refuse_inserts: bool,
}

#[derive(Clone, Default)]
struct FakeHandle(Arc<Mutex<FakeServer>>);

impl FakeHandle {
    fn lock(&self) -> MutexGuard<'_, FakeServer> {
        self.0.lock().expect("fake server lock")
    }
}

struct FakeProcess {
    server: FakeHandle,
    running: bool,
}

impl TransientProcess for FakeProcess {
    fn pid(&self) -> u32 {
        4242
    }

    fn try_wait(&mut self) -> Result<Option<String>, StateDbError> {
        if self.server.lock().exits_early {
            return Ok(Some("exit status: 100".to_owned()));
        }
        Ok((!self.running).then(|| "signal: 15 (SIGTERM)".to_owned()))
    }

    fn terminate(&mut self) -> Result<(), StateDbError> {
        let mut server = self.server.lock();
        server.terminated += 1;
        if !server.ignores_sigterm {
            self.running = false;
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<String, StateDbError> {
        self.running = false;
        self.server.lock().killed += 1;
        Ok("signal: 9 (SIGKILL)".to_owned())
    }
}

struct FakeLauncher(FakeHandle);

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        _program: &Utf8Path,
        args: &[String],
    ) -> Result<Box<dyn TransientProcess>, StateDbError> {
        self.0.lock().launches.push(args.to_vec());
        Ok(Box::new(FakeProcess {
            server: self.0.clone(),
            running: true,
        }))
    }
}

struct FakeDialer(FakeHandle);

impl SessionDialer for FakeDialer {
    fn dial(&self, info: &DialInfo) -> Result<Box<dyn AdminSession>, SessionError> {
        let mut server = self.0.lock();
        if server.always_unreachable || server.unreachable_dials > 0 {
            server.unreachable_dials = server.unreachable_dials.saturating_sub(1);
            return Err(SessionError::Unreachable {
                address: info.primary_address().to_owned(),
                message: "connection refused".to_owned(),
            });
        }
        Ok(Box::new(FakeSession(self.0.clone())))
    }
}

struct FakeSession(FakeHandle);

impl AdminSession for FakeSession {
    fn user_count(&mut self) -> Result<usize, SessionError> {
        let server = self.0.lock();
        if server.refuse_inserts {
            return Ok(0);
        }
        Ok(server.users.len())
    }

    fn upsert_user(
        &mut self,
        _database: &str,
        user: &str,
        password: &str,
        roles: &[&str],
    ) -> Result<(), SessionError> {
        let mut server = self.0.lock();
        if server.refuse_inserts {
            return Err(SessionError::Unauthorized {
                message: format!(
                    "not authorized on admin to execute command {{ createUser: \"{user}\" }}"
                ),
            });
        }
        server.users.retain(|(name, _, _)| name != user);
        server.users.push((
            user.to_owned(),
            password.to_owned(),
            roles.iter().map(|role| (*role).to_owned()).collect(),
        ));
        Ok(())
    }
}

fn bootstrapper(services: MockServices, server: &FakeHandle) -> AdminBootstrapper {
    AdminBootstrapper::new(
        Arc::new(services),
        Arc::new(FakeLauncher(server.clone())),
        Arc::new(FakeDialer(server.clone())),
    )
}

fn params(user: &str, password: &str) -> AdminBootstrapParams {
    let mut params = AdminBootstrapParams::new(
        "alice-test",
        Utf8Path::new("/usr/bin/mongod"),
        Utf8Path::new("/srv/corral/db"),
        37017,
        user,
        password,
    );
    params.startup_timeout = Duration::from_millis(500);
    params.exit_timeout = Duration::from_millis(500);
    params
}

/// A controller expecting exactly `cycles` stop/install/start cycles.
fn cycling_services(cycles: usize) -> MockServices {
    let mut services = MockServices::new();
    services.expect_installed().returning(|_| Ok(true));
    services.expect_stop().times(cycles).returning(|_| Ok(()));
    services.expect_install().times(cycles).returning(|_| Ok(()));
    services.expect_start().times(cycles).returning(|_| Ok(()));
    services.expect_remove().never();
    services
}

/// A controller that stops once and must never restart the service.
fn stop_only_services() -> MockServices {
    let mut services = MockServices::new();
    services.expect_installed().returning(|_| Ok(true));
    services.expect_stop().times(1).returning(|_| Ok(()));
    services.expect_install().never();
    services.expect_start().never();
    services.expect_remove().never();
    services
}

#[test]
fn second_bootstrap_finds_existing_admin() {
    let server = FakeHandle::default();
    let admin = bootstrapper(cycling_services(2), &server);

    let added = admin
        .ensure_admin_user(&params("whomever", "whatever"))
        .expect("first bootstrap");
    assert!(added);
    let added = admin
        .ensure_admin_user(&params("whomever", "whatever"))
        .expect("second bootstrap");
    assert!(!added);

    let state = server.lock();
    assert_eq!(state.users.len(), 1);
    assert_eq!(state.terminated, 2);
    let expected = transient_args(Utf8Path::new("/srv/corral/db"), "127.0.0.1", 37017);
    assert_eq!(state.launches, vec![expected.clone(), expected]);
}

#[test]
fn admin_user_receives_admin_roles() {
    let server = FakeHandle::default();
    bootstrapper(cycling_services(1), &server)
        .ensure_admin_user(&params("admin", "sekrit"))
        .expect("bootstrap");
    let state = server.lock();
    let (user, password, roles) = state.users.first().expect("admin user");
    assert_eq!(user, "admin");
    assert_eq!(password, "sekrit");
    assert_eq!(roles, &ADMIN_ROLES);
}

#[test]
fn uninstalled_service_is_not_stopped() {
    let server = FakeHandle::default();
    let mut services = MockServices::new();
    services.expect_installed().returning(|_| Ok(false));
    services.expect_stop().never();
    services.expect_install().times(1).returning(|_| Ok(()));
    services.expect_start().times(1).returning(|_| Ok(()));
    let added = bootstrapper(services, &server)
        .ensure_admin_user(&params("admin", "pw"))
        .expect("bootstrap");
    assert!(added);
}

#[test]
fn refused_insert_reports_unauthorized() {
    let server = FakeHandle::default();
    server.lock().refuse_inserts = true;
    let error = bootstrapper(stop_only_services(), &server)
        .ensure_admin_user(&params("whomeverelse", "whateverelse"))
        .expect_err("insert refused");

    let message = error.to_string();
    assert!(
        message.starts_with(
            "failed to add \"whomeverelse\" to admin database: cannot set admin password: not authorized "
        ),
        "unexpected message: {message}"
    );
    assert!(matches!(error, StateDbError::Unauthorized { .. }));
    assert_eq!(server.lock().terminated, 1, "transient process must be signalled");
}

#[test]
fn early_exit_is_reported_without_restart() {
    let server = FakeHandle::default();
    server.lock().exits_early = true;
    let error = bootstrapper(stop_only_services(), &server)
        .ensure_admin_user(&params("admin", "pw"))
        .expect_err("early exit");
    match error {
        StateDbError::EarlyExit { status } => assert_eq!(status, "exit status: 100"),
        other => panic!("expected EarlyExit, got {other:?}"),
    }
}

#[test]
fn unreachable_server_times_out_and_is_signalled() {
    let server = FakeHandle::default();
    server.lock().always_unreachable = true;
    let error = bootstrapper(stop_only_services(), &server)
        .ensure_admin_user(&params("admin", "pw"))
        .expect_err("timeout");
    match error {
        StateDbError::StartupTimeout { address, timeout } => {
            assert_eq!(address, "127.0.0.1:37017");
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected StartupTimeout, got {other:?}"),
    }
    assert_eq!(server.lock().terminated, 1);
}

#[test]
fn server_ignoring_sigterm_is_killed_and_service_stays_stopped() {
    let server = FakeHandle::default();
    server.lock().ignores_sigterm = true;
    let error = bootstrapper(stop_only_services(), &server)
        .ensure_admin_user(&params("admin", "pw"))
        .expect_err("exit timeout");
    match error {
        StateDbError::ExitTimeout { pid, timeout } => {
            assert_eq!(pid, 4242);
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("expected ExitTimeout, got {other:?}"),
    }
    let state = server.lock();
    assert_eq!(state.terminated, 1);
    assert_eq!(state.killed, 1, "transient server must be killed");
    assert_eq!(state.users.len(), 1, "admin was added before the timeout");
}

#[test]
fn dial_is_retried_until_server_accepts() {
    let server = FakeHandle::default();
    server.lock().unreachable_dials = 1;
    let added = bootstrapper(cycling_services(1), &server)
        .ensure_admin_user(&params("admin", "pw"))
        .expect("bootstrap after retry");
    assert!(added);
}

#[test]
fn set_admin_password_forwards_empty_password() {
    let server = FakeHandle::default();
    let mut session = FakeSession(server.clone());
    set_admin_password(&mut session, "auser", "").expect("empty password");
    set_admin_password(&mut session, "auser", "foo").expect("new password");
    let state = server.lock();
    assert_eq!(state.users.len(), 1);
    let (_, password, roles) = state.users.first().expect("user");
    assert_eq!(password, "foo");
    assert_eq!(roles.len(), ADMIN_ROLES.len());
}
