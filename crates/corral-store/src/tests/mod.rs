//! Crate-level tests exercising the store against a temporary directory.

use std::fs;

use camino::Utf8PathBuf;
use corral_config::BootstrapAttrs;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::{ApiCredentials, ApiEndpoint, DiskStore, EnvironInfoStore, StoreError};


pub(super) struct StoreFixture {
    _dir: TempDir,
    root: Utf8PathBuf,
    store: DiskStore,
}

impl StoreFixture {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
        let store = DiskStore::new(root.clone()).expect("store");
        Self {
            _dir: dir,
            root,
            store,
        }
    }

    pub(super) const fn store(&self) -> &DiskStore {
        &self.store
    }
}

#[fixture]
fn fixture() -> StoreFixture {
    StoreFixture::new()
}

pub(super) fn sample_attrs() -> BootstrapAttrs {
    let mut attrs = BootstrapAttrs::new();
    attrs.insert("name".into(), serde_json::json!("test"));
    attrs.insert("state_port".into(), serde_json::json!(37017));
    attrs.insert("enable_os_upgrade".into(), serde_json::json!(false));
    attrs
}

pub(super) fn populate(info: &mut crate::EnvironInfo) {
    info.set_credentials(ApiCredentials {
        user: "admin".into(),
        password: "sekrit".into(),
    });
    info.set_endpoint(ApiEndpoint {
        addresses: vec!["localhost:17070".into(), "10.0.3.1:17070".into()],
        ca_cert: "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".into(),
    });
}

#[rstest]
fn new_requires_existing_directory(fixture: StoreFixture) {
    let missing = fixture.root.join("absent");
    assert!(matches!(
        DiskStore::new(missing),
        Err(StoreError::MissingDirectory { .. })
    ));
}

#[rstest]
fn create_reserves_empty_private_placeholder(fixture: StoreFixture) {
    let info = fixture.store().create_info("test").expect("create");
    assert!(info.created());
    assert!(!info.initialized());

    let contents = fs::read_to_string(info.path()).expect("placeholder");
    assert!(contents.is_empty());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let file_mode = fs::metadata(info.path()).expect("meta").permissions().mode();
        let dir_mode = fs::metadata(fixture.store().environments_dir())
            .expect("meta")
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}

#[rstest]
fn second_create_reports_already_exists(fixture: StoreFixture) {
    fixture.store().create_info("test").expect("first create");
    let error = fixture
        .store()
        .create_info("test")
        .expect_err("second create must fail");
    assert!(matches!(error, StoreError::AlreadyExists { ref name } if name == "test"));
}

#[rstest]
fn reading_placeholder_yields_uninitialised_record(fixture: StoreFixture) {
    fixture.store().create_info("test").expect("create");
    let info = fixture.store().read_info("test").expect("read");
    assert!(!info.initialized());
    assert!(!info.created());
    assert_eq!(info.credentials(), &ApiCredentials::default());
    assert_eq!(info.endpoint(), &ApiEndpoint::default());
    assert!(info.bootstrap_config().is_empty());
}

#[rstest]
fn reading_missing_record_reports_not_found(fixture: StoreFixture) {
    assert!(matches!(
        fixture.store().read_info("nope"),
        Err(StoreError::NotFound { .. })
    ));
}

#[rstest]
fn written_record_reads_back(fixture: StoreFixture) {
    let mut info = fixture.store().create_info("test").expect("create");
    info.set_bootstrap_config(sample_attrs());
    populate(&mut info);
    info.write().expect("write");
    assert!(info.initialized());

    let read = fixture.store().read_info("test").expect("read");
    assert!(read.initialized());
    assert_eq!(read.credentials(), info.credentials());
    assert_eq!(read.endpoint(), info.endpoint());
    assert_eq!(read.bootstrap_config(), &sample_attrs());
}

#[rstest]
fn persisted_keys_use_record_format(fixture: StoreFixture) {
    let mut info = fixture.store().create_info("test").expect("create");
    populate(&mut info);
    info.write().expect("write");

    let contents = fs::read_to_string(info.path()).expect("record");
    for key in ["user:", "password:", "state-servers:", "ca-cert:"] {
        assert!(contents.contains(key), "missing {key} in {contents}");
    }
    assert!(
        !contents.contains("bootstrap-config"),
        "empty bootstrap config should be omitted: {contents}"
    );
}

#[rstest]
#[should_panic(expected = "has not just been created")]
fn setting_bootstrap_config_on_read_handle_panics(fixture: StoreFixture) {
    fixture.store().create_info("test").expect("create");
    let mut info = fixture.store().read_info("test").expect("read");
    info.set_bootstrap_config(sample_attrs());
}

#[rstest]
fn interrupted_write_leaves_previous_contents(fixture: StoreFixture) {
    let mut info = fixture.store().create_info("test").expect("create");
    populate(&mut info);
    info.write().expect("write");

    // A crash between writing the temporary file and renaming it leaves a
    // stray sibling behind while the artefact keeps its previous contents.
    let stray = fixture.store().environments_dir().join(".tmpCRASH");
    fs::write(&stray, "user: intruder\npassword: half-writ").expect("stray temp");

    let read = fixture.store().read_info("test").expect("read");
    assert_eq!(read.credentials().user, "admin");
    assert_eq!(read.credentials().password, "sekrit");
}

#[rstest]
fn interrupted_first_write_leaves_record_uninitialised(fixture: StoreFixture) {
    fixture.store().create_info("test").expect("create");
    let stray = fixture.store().environments_dir().join(".tmpCRASH");
    fs::write(&stray, "user: admin\n").expect("stray temp");

    let read = fixture.store().read_info("test").expect("read");
    assert!(!read.initialized());
}

#[rstest]
fn write_leaves_no_temporary_files(fixture: StoreFixture) {
    let mut info = fixture.store().create_info("test").expect("create");
    populate(&mut info);
    info.write().expect("write");
    info.write().expect("rewrite");

    let entries: Vec<_> = fs::read_dir(fixture.store().environments_dir())
        .expect("list")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("test.yaml")]);
}

#[rstest]
fn malformed_record_names_its_path(fixture: StoreFixture) {
    let info = fixture.store().create_info("test").expect("create");
    fs::write(info.path(), "user: [unterminated").expect("corrupt");

    let error = fixture.store().read_info("test").expect_err("parse fails");
    match error {
        StoreError::Parse { path, .. } => assert_eq!(path, info.path()),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[rstest]
fn destroy_twice_reports_already_removed(fixture: StoreFixture) {
    let info = fixture.store().create_info("test").expect("create");
    info.destroy().expect("first destroy");
    assert!(matches!(
        info.destroy(),
        Err(StoreError::AlreadyRemoved { .. })
    ));
    assert!(matches!(
        fixture.store().read_info("test"),
        Err(StoreError::NotFound { .. })
    ));
    fixture
        .store()
        .create_info("test")
        .expect("name is free again");
}
