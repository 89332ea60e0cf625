//! Local provider and orchestrator tests over in-memory host adapters.

use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use corral_config::{Config, EnvironPaths, ProviderKind};
use corral_statedb::{
    AdminSession, DialInfo, ProcessLauncher, ServiceController, ServiceDefinition, SessionDialer,
    SessionError, StateDbError, TransientProcess,
};
use corral_store::{ApiEndpoint, DiskStore, EnvironInfoStore, StoreError};
use mockall::mock;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::{
    BootstrapOrchestrator, BootstrapParams, BootstrapPhase, BootstrapReporter, CloudConfig,
    CloudConfigExecutor, ConstraintKey, Constraints, ConstraintsValidator, ContainerManager,
    DestroyOutcome, Environ, FinalizeParams, Finalizer, Instance, InstanceProvider, KNOWN_ARCHES,
    LaunchedInstance, LocalCloudConfigExecutor, LocalProvider, LocalRuntime, MachineConfig,
    MachineJob, PrivilegeEscalator, ProviderError, Storage, host_arch, open_provider,
};


mock! {
    pub(crate) Services {}
    impl ServiceController for Services {
        fn installed(&self, name: &str) -> Result<bool, StateDbError>;
        fn install(&self, definition: &ServiceDefinition) -> Result<(), StateDbError>;
        fn start(&self, name: &str) -> Result<(), StateDbError>;
        fn stop(&self, name: &str) -> Result<(), StateDbError>;
        fn remove(&self, name: &str) -> Result<(), StateDbError>;
    }
}

const EXECUTABLE: &str = "/usr/bin/corral";

/// State shared by the fake database, its launcher and sessions.
#[derive(Debug, Default)]
struct FakeDatabase {
    users: Vec<(String, String)>,
    launches: usize,
    refuse_inserts: bool,
}

#[derive(Clone, Default)]
struct DatabaseHandle(Arc<Mutex<FakeDatabase>>);

impl DatabaseHandle {
    fn lock(&self) -> MutexGuard<'_, FakeDatabase> {
        self.0.lock().expect("fake database lock")
    }
}

struct FakeProcess {
    running: bool,
}

impl TransientProcess for FakeProcess {
    fn pid(&self) -> u32 {
        4242
    }

    fn try_wait(&mut self) -> Result<Option<String>, StateDbError> {
        Ok((!self.running).then(|| "signal: 15 (SIGTERM)".to_owned()))
    }

    fn terminate(&mut self) -> Result<(), StateDbError> {
        self.running = false;
        Ok(())
    }

    fn kill(&mut self) -> Result<String, StateDbError> {
        self.running = false;
        Ok("signal: 9 (SIGKILL)".to_owned())
    }
}

struct FakeLauncher(DatabaseHandle);

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        _program: &Utf8Path,
        _args: &[String],
    ) -> Result<Box<dyn TransientProcess>, StateDbError> {
        self.0.lock().launches += 1;
        Ok(Box::new(FakeProcess { running: true }))
    }
}

struct FakeDialer(DatabaseHandle);

impl SessionDialer for FakeDialer {
    fn dial(&self, _info: &DialInfo) -> Result<Box<dyn AdminSession>, SessionError> {
        Ok(Box::new(FakeSession(self.0.clone())))
    }
}

struct FakeSession(DatabaseHandle);

impl AdminSession for FakeSession {
    fn user_count(&mut self) -> Result<usize, SessionError> {
        Ok(self.0.lock().users.len())
    }

    fn upsert_user(
        &mut self,
        _database: &str,
        user: &str,
        password: &str,
        _roles: &[&str],
    ) -> Result<(), SessionError> {
        let mut database = self.0.lock();
        if database.refuse_inserts {
            return Err(SessionError::Unauthorized {
                message: format!(
                    "not authorized on admin to execute command {{ createUser: \"{user}\" }}"
                ),
            });
        }
        database.users.push((user.to_owned(), password.to_owned()));
        Ok(())
    }
}

/// Records what the finalizer hands over instead of provisioning.
#[derive(Default)]
struct RecordingExecutor {
    executed: Mutex<Vec<(MachineConfig, CloudConfig)>>,
}

impl RecordingExecutor {
    fn executed(&self) -> Vec<(MachineConfig, CloudConfig)> {
        self.executed.lock().expect("executor lock").clone()
    }
}

impl CloudConfigExecutor for RecordingExecutor {
    fn execute(&self, machine: &MachineConfig, cloud: &CloudConfig) -> Result<(), ProviderError> {
        self.executed
            .lock()
            .expect("executor lock")
            .push((machine.clone(), cloud.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeContainers {
    existing: Vec<String>,
    destroyed: Mutex<Vec<String>>,
}

impl FakeContainers {
    fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().expect("containers lock").clone()
    }
}

impl ContainerManager for FakeContainers {
    fn list(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .existing
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn destroy(&self, name: &str) -> Result<(), ProviderError> {
        self.destroyed
            .lock()
            .expect("containers lock")
            .push(name.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct FakeEscalator {
    root: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeEscalator {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("escalator lock").clone()
    }
}

impl PrivilegeEscalator for FakeEscalator {
    fn is_root(&self) -> bool {
        self.root
    }

    fn run_privileged(&self, args: &[String]) -> Result<(), ProviderError> {
        self.calls.lock().expect("escalator lock").push(args.to_vec());
        Ok(())
    }
}

/// Records every lifecycle event.
#[derive(Default)]
struct RecordingReporter {
    transitions: Mutex<Vec<(BootstrapPhase, BootstrapPhase)>>,
    failures: Mutex<Vec<BootstrapPhase>>,
    cleanup_failures: Mutex<Vec<&'static str>>,
}

impl RecordingReporter {
    fn targets(&self) -> Vec<BootstrapPhase> {
        self.transitions
            .lock()
            .expect("reporter lock")
            .iter()
            .map(|(_, to)| *to)
            .collect()
    }

    fn failures(&self) -> Vec<BootstrapPhase> {
        self.failures.lock().expect("reporter lock").clone()
    }

    fn cleanup_failures(&self) -> Vec<&'static str> {
        self.cleanup_failures.lock().expect("reporter lock").clone()
    }
}

impl BootstrapReporter for RecordingReporter {
    fn phase_changed(&self, _environment: &str, from: BootstrapPhase, to: BootstrapPhase) {
        self.transitions.lock().expect("reporter lock").push((from, to));
    }

    fn bootstrap_failed(&self, _environment: &str, phase: BootstrapPhase, _error: &ProviderError) {
        self.failures.lock().expect("reporter lock").push(phase);
    }

    fn cleanup_failed(&self, _environment: &str, step: &'static str, _error: &ProviderError) {
        self.cleanup_failures.lock().expect("reporter lock").push(step);
    }
}

/// A permissive service controller for bootstrap runs.
fn bootstrap_services() -> MockServices {
    let mut services = MockServices::new();
    services.expect_installed().returning(|_| Ok(false));
    services.expect_stop().returning(|_| Ok(()));
    services.expect_install().returning(|_| Ok(()));
    services.expect_start().returning(|_| Ok(()));
    services.expect_remove().never();
    services
}

/// Temporary home, fake host adapters and a configuration pointing at them.
struct Harness {
    _temp: TempDir,
    config: Config,
    database: DatabaseHandle,
    executor: Arc<RecordingExecutor>,
    containers: Arc<FakeContainers>,
    escalator: Arc<FakeEscalator>,
    reporter: Arc<RecordingReporter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_adapters(FakeContainers::default(), FakeEscalator::default())
    }

    fn with_adapters(containers: FakeContainers, escalator: FakeEscalator) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 temp dir");
        let home = base.join("home");
        fs::create_dir_all(&home).expect("create home");
        let config = Config {
            name: "test".into(),
            home,
            namespace: Some("alice-test".into()),
            log_dir: Some(base.join("syslog")),
            admin_secret: Some("sekrit".into()),
            db_startup_timeout_secs: 5,
            ..Config::default()
        };
        Self {
            _temp: temp,
            config,
            database: DatabaseHandle::default(),
            executor: Arc::new(RecordingExecutor::default()),
            containers: Arc::new(containers),
            escalator: Arc::new(escalator),
            reporter: Arc::new(RecordingReporter::default()),
        }
    }

    fn paths(&self) -> EnvironPaths {
        EnvironPaths::from_config(&self.config)
    }

    fn runtime(&self, services: MockServices) -> LocalRuntime {
        LocalRuntime {
            services: Arc::new(services),
            launcher: Arc::new(FakeLauncher(self.database.clone())),
            dialer: Arc::new(FakeDialer(self.database.clone())),
            executor: Arc::clone(&self.executor) as Arc<dyn CloudConfigExecutor>,
            containers: Arc::clone(&self.containers) as Arc<dyn ContainerManager>,
            escalator: Arc::clone(&self.escalator) as Arc<dyn PrivilegeEscalator>,
            executable: Utf8PathBuf::from(EXECUTABLE),
        }
    }

    fn environ(&self, services: MockServices) -> Box<dyn Environ> {
        LocalProvider::new(self.runtime(services))
            .open(&self.config)
            .expect("open local environment")
    }

    fn store(&self) -> Arc<DiskStore> {
        Arc::new(DiskStore::new(self.config.home.clone()).expect("store"))
    }

    fn orchestrator(&self, services: MockServices) -> BootstrapOrchestrator {
        BootstrapOrchestrator::new(
            self.store(),
            Arc::new(LocalProvider::new(self.runtime(services))),
            Arc::clone(&self.reporter) as Arc<dyn BootstrapReporter>,
        )
    }

    fn make_agents_dir(&self) {
        fs::create_dir_all(self.paths().agents_dir()).expect("create agents dir");
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

fn finalize_params() -> FinalizeParams {
    FinalizeParams {
        series: "noble".into(),
        tools_url: "file:///srv/tools".into(),
    }
}

#[rstest]
fn bootstrap_writes_the_record_last(harness: Harness) {
    let orchestrator = harness.orchestrator(bootstrap_services());
    let prepared = orchestrator.prepare(&harness.config).expect("prepare");
    assert_eq!(prepared.phase(), BootstrapPhase::Prepared);
    assert!(!prepared.info().initialized());

    let bootstrapped = orchestrator
        .bootstrap(prepared, &BootstrapParams::default())
        .expect("bootstrap");
    assert_eq!(bootstrapped.instance_id, "localhost");
    assert_eq!(bootstrapped.hardware.arch.as_deref(), Some(host_arch()));

    let info = harness.store().read_info("test").expect("read record");
    assert!(info.initialized());
    assert_eq!(info.credentials().user, "admin");
    assert_eq!(info.credentials().password, "sekrit");
    assert_eq!(info.endpoint().addresses, vec!["localhost:17070"]);
    assert!(info.endpoint().ca_cert.starts_with("-----BEGIN CERTIFICATE-----"));
    let recorded = Config::from_bootstrap_attrs(info.bootstrap_config()).expect("bootstrap config");
    assert_eq!(recorded, harness.config.resolved());

    assert_eq!(
        harness.database.lock().users,
        vec![("admin".to_owned(), "sekrit".to_owned())]
    );
    assert_eq!(
        harness.reporter.targets(),
        vec![
            BootstrapPhase::Prepared,
            BootstrapPhase::InstanceLaunching,
            BootstrapPhase::DatabaseBootstrapping,
            BootstrapPhase::RecordWriting,
            BootstrapPhase::Bootstrapped,
        ]
    );
}

#[rstest]
fn finalizer_runs_only_when_invoked(harness: Harness) {
    let orchestrator = harness.orchestrator(bootstrap_services());
    let prepared = orchestrator.prepare(&harness.config).expect("prepare");
    let bootstrapped = orchestrator
        .bootstrap(prepared, &BootstrapParams::default())
        .expect("bootstrap");
    assert!(harness.executor.executed().is_empty());

    let machine = bootstrapped.finalizer.finalize(&finalize_params()).expect("finalize");
    let executed = harness.executor.executed();
    let [(recorded, cloud)] = executed.as_slice() else {
        panic!("expected one execution, got {}", executed.len());
    };
    assert_eq!(recorded, &machine);
    assert_eq!(machine.jobs, vec![MachineJob::ManageEnviron]);
    assert_eq!(machine.machine_id, "0");
    assert_eq!(machine.instance_id, "localhost");
    assert_eq!(machine.agent_environment.get("NAMESPACE").map(String::as_str), Some("alice-test"));
    assert_eq!(cloud, &CloudConfig::default());
}

#[rstest]
fn failed_database_bootstrap_leaves_no_record(harness: Harness) {
    harness.database.lock().refuse_inserts = true;
    let mut services = MockServices::new();
    services.expect_installed().returning(|_| Ok(false));
    services.expect_install().never();
    services.expect_start().never();
    let orchestrator = harness.orchestrator(services);

    let prepared = orchestrator.prepare(&harness.config).expect("prepare");
    let error = orchestrator
        .bootstrap(prepared, &BootstrapParams::default())
        .expect_err("bootstrap fails");
    assert!(matches!(
        error,
        ProviderError::StateDb(StateDbError::Unauthorized { ref user, .. }) if user == "admin"
    ));

    let store = harness.store();
    assert!(matches!(store.read_info("test"), Err(StoreError::NotFound { .. })));
    assert_eq!(harness.reporter.failures(), vec![BootstrapPhase::DatabaseBootstrapping]);
    assert!(harness.reporter.cleanup_failures().is_empty());
    let targets = harness.reporter.targets();
    assert_eq!(
        targets.get(targets.len().saturating_sub(2)..),
        Some([BootstrapPhase::Aborting, BootstrapPhase::Destroyed].as_slice())
    );
    assert!(harness.escalator.calls().is_empty());

    store.create_info("test").expect("name is free again");
}

#[rstest]
#[case("/usr/lib/corral", "/usr")]
#[case("/home/../etc/corral", "/etc")]
fn protected_root_fails_before_anything_is_created(
    mut harness: Harness,
    #[case] root: &str,
    #[case] expected: &str,
) {
    harness.config.root_dir = Some(root.into());
    let orchestrator = harness.orchestrator(MockServices::new());

    let error = orchestrator.prepare(&harness.config).expect_err("protected root");
    match error {
        ProviderError::ProtectedRoot { protected, .. } => assert_eq!(protected, expected),
        other => panic!("expected ProtectedRoot, got {other:?}"),
    }
    assert!(matches!(
        harness.store().read_info("test"),
        Err(StoreError::NotFound { .. })
    ));
    assert!(harness.reporter.targets().is_empty());
}

#[rstest]
fn taken_name_is_rejected_before_preparing(harness: Harness) {
    harness.store().create_info("test").expect("reserve");
    let orchestrator = harness.orchestrator(MockServices::new());

    let error = orchestrator.prepare(&harness.config).expect_err("name taken");
    assert!(matches!(error, ProviderError::AlreadyExists { ref name } if name == "test"));
    assert!(!harness.paths().root_dir().as_std_path().exists());
}

#[rstest]
fn missing_admin_secret_releases_the_reservation(mut harness: Harness) {
    harness.config.admin_secret = None;
    let orchestrator = harness.orchestrator(MockServices::new());

    let error = orchestrator.prepare(&harness.config).expect_err("no secret");
    assert!(matches!(error, ProviderError::MissingSetting { key: "admin_secret" }));
    assert!(matches!(
        harness.store().read_info("test"),
        Err(StoreError::NotFound { .. })
    ));
    assert_eq!(
        harness.reporter.targets(),
        vec![BootstrapPhase::Aborting, BootstrapPhase::Destroyed]
    );
}

/// Opens local environments but reports a configuration without the admin
/// secret, as a backend that never checks it would.
struct SecretlessProvider(LocalProvider);

impl InstanceProvider for SecretlessProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn open(&self, config: &Config) -> Result<Box<dyn Environ>, ProviderError> {
        let inner = self.0.open(config)?;
        let config = Config {
            admin_secret: None,
            ..inner.config().clone()
        };
        Ok(Box::new(SecretlessEnviron { inner, config }))
    }
}

struct SecretlessEnviron {
    inner: Box<dyn Environ>,
    config: Config,
}

impl Environ for SecretlessEnviron {
    fn config(&self) -> &Config {
        &self.config
    }

    fn prepare(&self) -> Result<(), ProviderError> {
        self.inner.prepare()
    }

    fn launch_instance(&self, params: &BootstrapParams) -> Result<LaunchedInstance, ProviderError> {
        self.inner.launch_instance(params)
    }

    fn bootstrap_database(
        &self,
        instance: &LaunchedInstance,
        params: &BootstrapParams,
    ) -> Result<ApiEndpoint, ProviderError> {
        self.inner.bootstrap_database(instance, params)
    }

    fn finalizer(&self, instance: &LaunchedInstance) -> Result<Finalizer, ProviderError> {
        self.inner.finalizer(instance)
    }

    fn instances(&self, ids: &[String]) -> Result<Vec<Box<dyn Instance>>, ProviderError> {
        self.inner.instances(ids)
    }

    fn state_server_instances(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.state_server_instances()
    }

    fn constraints_validator(&self) -> Result<ConstraintsValidator, ProviderError> {
        self.inner.constraints_validator()
    }

    fn supported_architectures(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.supported_architectures()
    }

    fn supports_networks(&self) -> bool {
        self.inner.supports_networks()
    }

    fn tools_sources(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.tools_sources()
    }

    fn storage(&self) -> Result<Box<dyn Storage>, ProviderError> {
        self.inner.storage()
    }

    fn destroy(&self) -> Result<DestroyOutcome, ProviderError> {
        self.inner.destroy()
    }
}

#[rstest]
fn record_is_never_written_without_an_admin_secret(harness: Harness) {
    let provider = SecretlessProvider(LocalProvider::new(harness.runtime(bootstrap_services())));
    let orchestrator = BootstrapOrchestrator::new(
        harness.store(),
        Arc::new(provider),
        Arc::clone(&harness.reporter) as Arc<dyn BootstrapReporter>,
    );

    let prepared = orchestrator.prepare(&harness.config).expect("prepare");
    let error = orchestrator
        .bootstrap(prepared, &BootstrapParams::default())
        .expect_err("no admin secret");
    assert!(matches!(error, ProviderError::MissingSetting { key: "admin_secret" }));
    assert_eq!(harness.reporter.failures(), vec![BootstrapPhase::RecordWriting]);
    assert!(matches!(
        harness.store().read_info("test"),
        Err(StoreError::NotFound { .. })
    ));
}

#[rstest]
fn destroy_before_bootstrap_does_nothing(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    assert_eq!(environ.destroy().expect("destroy"), DestroyOutcome::NotBootstrapped);
    assert!(harness.escalator.calls().is_empty());
}

#[rstest]
fn unprivileged_destroy_reinvokes_through_sudo(harness: Harness) {
    harness.make_agents_dir();
    let environ = harness.environ(MockServices::new());

    assert_eq!(environ.destroy().expect("destroy"), DestroyOutcome::Escalated);
    let expected = vec![
        "env".to_owned(),
        format!("CORRAL_HOME={}", harness.config.home),
        EXECUTABLE.to_owned(),
        "destroy-environment".to_owned(),
        "-y".to_owned(),
        "--force".to_owned(),
        "test".to_owned(),
    ];
    assert_eq!(harness.escalator.calls(), vec![expected]);
    assert!(harness.paths().agents_dir().as_std_path().exists());
}

#[test]
fn privileged_destroy_removes_services_containers_and_root() {
    let containers = FakeContainers {
        existing: vec![
            "alice-test-0".to_owned(),
            "bob-test-0".to_owned(),
            "alice-test-1".to_owned(),
        ],
        ..FakeContainers::default()
    };
    let escalator = FakeEscalator {
        root: true,
        ..FakeEscalator::default()
    };
    let harness = Harness::with_adapters(containers, escalator);
    harness.make_agents_dir();

    let mut services = MockServices::new();
    services
        .expect_remove()
        .withf(|name| name == "corral-db-alice-test")
        .times(1)
        .returning(|_| Ok(()));
    services
        .expect_remove()
        .withf(|name| name == "corral-agent-alice-test")
        .times(1)
        .returning(|_| Ok(()));
    let environ = harness.environ(services);

    assert_eq!(environ.destroy().expect("destroy"), DestroyOutcome::Destroyed);
    assert_eq!(harness.containers.destroyed(), vec!["alice-test-0", "alice-test-1"]);
    assert!(!harness.paths().root_dir().as_std_path().exists());
    assert!(harness.escalator.calls().is_empty());
}

#[rstest]
fn launch_replaces_leftover_logs(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    environ.prepare().expect("prepare");
    let paths = harness.paths();
    fs::create_dir_all(paths.log_link()).expect("create log dir");
    fs::write(paths.log_link().join("things"), "leftover").expect("write leftover");
    fs::write(paths.cloud_init_output_log(), "leftover").expect("write output log");

    environ
        .launch_instance(&BootstrapParams::default())
        .expect("launch");

    assert!(!paths.cloud_init_output_log().as_std_path().exists());
    let metadata = fs::symlink_metadata(paths.log_link()).expect("log link");
    assert!(metadata.file_type().is_symlink());
    assert_eq!(
        fs::read_link(paths.log_link()).expect("read link"),
        paths.system_log_dir().as_std_path()
    );
}

#[rstest]
fn unsupported_constraints_are_reported(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    let constraints: Constraints = format!(
        "arch={} instance-type=foo tags=bar cpu-power=10 cpu-cores=2",
        host_arch()
    )
    .parse()
    .expect("constraints");

    let unsupported = environ
        .constraints_validator()
        .expect("validator")
        .validate(&constraints)
        .expect("validate");
    assert_eq!(
        unsupported,
        vec![
            ConstraintKey::CpuCores,
            ConstraintKey::CpuPower,
            ConstraintKey::InstanceType,
            ConstraintKey::Tags,
        ]
    );
}

#[rstest]
fn foreign_architecture_is_rejected(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    let foreign = KNOWN_ARCHES
        .iter()
        .find(|arch| **arch != host_arch())
        .expect("another architecture");
    let constraints: Constraints = format!("arch={foreign}").parse().expect("constraints");

    let error = environ
        .constraints_validator()
        .expect("validator")
        .validate(&constraints)
        .expect_err("foreign arch");
    assert_eq!(
        error.to_string(),
        format!(
            "invalid constraint value: arch={foreign}\nvalid values are: [{}]",
            host_arch()
        )
    );
}

#[rstest]
fn state_servers_require_the_agents_directory(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    assert!(matches!(
        environ.state_server_instances(),
        Err(ProviderError::NotBootstrapped)
    ));
    harness.make_agents_dir();
    assert_eq!(
        environ.state_server_instances().expect("state servers"),
        vec!["localhost"]
    );
}

#[rstest]
fn local_environment_capabilities(harness: Harness) {
    let environ = harness.environ(MockServices::new());
    assert_eq!(environ.supported_architectures().expect("arches"), vec![host_arch()]);
    assert!(!environ.supports_networks());

    let sources = environ.tools_sources().expect("tools sources");
    let [source] = sources.as_slice() else {
        panic!("expected one tools source, got {sources:?}");
    };
    assert!(source.contains("/tools"), "{source}");

    let storage = environ.storage().expect("storage");
    storage.put("tools/agent.tgz", b"payload").expect("put");
    assert_eq!(storage.get("tools/agent.tgz").expect("get"), b"payload");

    let instances = environ.instances(&["localhost".to_owned()]).expect("instances");
    assert_eq!(instances.len(), 1);
    assert!(matches!(
        environ.instances(&["i-123".to_owned()]),
        Err(ProviderError::UnknownInstance { .. })
    ));
}

#[rstest]
#[case(ProviderKind::Azure)]
#[case(ProviderKind::Ec2)]
fn stub_providers_refuse_to_prepare(harness: Harness, #[case] kind: ProviderKind) {
    let provider = open_provider(kind, harness.runtime(MockServices::new()));
    assert_eq!(provider.kind(), kind);
    let environ = provider.open(&harness.config).expect("open");
    assert!(matches!(
        environ.prepare(),
        Err(ProviderError::NotImplemented { provider, .. }) if provider == kind
    ));
}

#[rstest]
fn local_executor_installs_the_agent(harness: Harness) {
    let mut services = MockServices::new();
    services
        .expect_install()
        .withf(|definition| definition.name == "corral-agent-alice-test")
        .times(1)
        .returning(|_| Ok(()));
    services
        .expect_start()
        .withf(|name| name == "corral-agent-alice-test")
        .times(1)
        .returning(|_| Ok(()));
    let executor = LocalCloudConfigExecutor::new(Arc::new(services));
    let finalizer = Finalizer::new(harness.config.resolved(), "localhost", Arc::new(executor));

    let machine = finalizer.finalize(&finalize_params()).expect("finalize");
    let conf = fs::read_to_string(machine.agent_dir.join("agent.conf")).expect("agent.conf");
    assert!(conf.contains("manage-environ"), "{conf}");
    assert!(harness.paths().agents_dir().as_std_path().exists());
}
