//! Black-box exercises against the public [`Holder`]/[`Dispatcher`] API,
//! as opposed to the white-box unit tests living next to each module.

use nodecage::capability::fakes::{FakeCgroups, FakeNetwork};
use nodecage::cred::fakes::FakeIdentityDirectory;
use nodecage::cred::OwnerCred;
use nodecage::{CoreConfig, CoreError, Holder};
use std::io::Write;

fn holder() -> Holder {
    Holder::new(
        CoreConfig::default(),
        Box::new(FakeIdentityDirectory::default()),
        Box::new(FakeCgroups::new()),
        Box::new(FakeCgroups::new()),
        Box::new(FakeCgroups::new()),
        Box::new(FakeCgroups::new()),
        Box::new(FakeNetwork::new()),
    )
}

#[test]
fn container_tree_configures_and_reads_back_through_dispatcher() {
    let _ = pretty_env_logger::try_init();

    let mut h = holder();
    h.create_container("db", None).unwrap();
    h.create_container("db/replica", Some("db".into())).unwrap();

    let client = OwnerCred::root();
    let mut d = h.dispatcher();
    d.set(&client, "db", "command", "/usr/bin/postgres").unwrap();
    d.set(&client, "db", "memory_guarantee", "128MiB").unwrap();
    d.set(&client, "db", "cpu_policy", "idle").unwrap();

    assert_eq!(d.get(&client, "db/replica", "cpu_policy").unwrap(), "idle");
    assert_eq!(d.get(&client, "db", "state").unwrap(), "stopped");
}

#[test]
fn isolated_child_keeps_its_own_network_shares() {
    let _ = pretty_env_logger::try_init();

    let mut h = holder();
    h.create_container("pod", None).unwrap();
    h.create_container("pod/sidecar", Some("pod".into())).unwrap();

    let client = OwnerCred::root();
    let mut d = h.dispatcher();
    d.set(&client, "pod/sidecar", "isolate", "true").unwrap();
    d.set(&client, "pod", "net_limit", "default: 1000").unwrap();

    assert!(d.get_indexed(&client, "pod/sidecar", "net_limit", "default").is_err());
}

#[test]
fn stdout_reads_the_backing_file_from_its_recorded_offset() {
    let _ = pretty_env_logger::try_init();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "first line").unwrap();
    writeln!(file, "second line").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let mut h = holder();
    h.create_container("job", None).unwrap();
    h.container_mut("job").unwrap().stdout_path = path;

    let client = OwnerCred::root();
    let out = h.dispatcher().get(&client, "job", "stdout").unwrap();
    assert!(out.contains("first line"));
    assert!(out.contains("second line"));
}

#[test]
fn destroying_a_running_container_is_rejected() {
    let _ = pretty_env_logger::try_init();

    let mut h = holder();
    h.create_container("job", None).unwrap();
    h.container_mut("job").unwrap().state = nodecage::State::Running;
    let result = h.destroy_container("job");
    assert!(matches!(result, Err(CoreError::InvalidState(_))));
}
