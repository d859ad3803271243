//! Integration tests for connections, domains and secrets against the
//! in-memory daemon.

use std::sync::Arc;

use limiquantix_virt::{
    AccessMode, Connection, Connector, DomainCreateFlags, DomainDestroyFlags, DomainListFlags,
    DomainUndefineFlags, ErrorKind, MockDriver, SecretListFlags, SecretUsageType, VirtError,
    MOCK_DEFAULT_URI,
};

const TEST_URI: &str = MOCK_DEFAULT_URI;

struct TestDomain {
    name: String,
    uuid: String,
}

impl TestDomain {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn xml(&self) -> String {
        format!(
            "<domain type='test'>\n  <name>{}</name>\n  <uuid>{}</uuid>\n  <memory unit='KiB'>65536</memory>\n  <os><type>hvm</type></os>\n</domain>",
            self.name, self.uuid
        )
    }
}

struct TestSecret {
    uuid: String,
    usage_name: String,
}

impl TestSecret {
    fn new(usage_name: &str) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            usage_name: usage_name.to_string(),
        }
    }

    fn xml(&self) -> String {
        format!(
            "<secret ephemeral='no' private='no'>\n  <uuid>{}</uuid>\n  <usage type='tls'>\n    <name>{}</name>\n  </usage>\n</secret>",
            self.uuid, self.usage_name
        )
    }
}

fn open(driver: &MockDriver) -> Connection {
    Connector::new(Arc::new(driver.clone()))
        .open(TEST_URI, AccessMode::ReadWrite)
        .unwrap()
}

/// Test opening a bad URI and closing a good one
#[test]
fn test_open_close() {
    let connector = Connector::new(Arc::new(MockDriver::new()));

    let err = connector.open("no-such-driver:///x", AccessMode::ReadWrite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUri);

    let conn = connector.open(TEST_URI, AccessMode::ReadWrite).unwrap();
    assert_eq!(conn.close().unwrap(), 0);
}

/// Test opening the driver's default URI
#[test]
fn test_open_default() {
    let connector = Connector::new(Arc::new(MockDriver::new()));
    let conn = connector.open_default().unwrap();
    assert_eq!(conn.close().unwrap(), 0);
}

/// Test that an extra reference keeps the connection open
#[test]
fn test_ref() {
    let conn = open(&MockDriver::new());
    conn.add_ref().unwrap();

    assert_eq!(conn.close().unwrap(), 1);
    assert!(conn.is_alive().unwrap());
    assert_eq!(conn.close().unwrap(), 0);
}

/// Test that each extra reference needs its own close
#[test]
fn test_ref_count_decreases_to_zero() {
    const EXTRA_REFS: u32 = 5;
    let conn = open(&MockDriver::new());

    for _ in 0..EXTRA_REFS {
        conn.add_ref().unwrap();
    }

    for expected in (0..EXTRA_REFS).rev() {
        assert_eq!(conn.close().unwrap(), expected);
    }

    let err = conn.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(conn.add_ref().is_err());
}

/// Test that read-only connections refuse mutations without touching the daemon
#[test]
fn test_read_only() {
    let driver = MockDriver::new();
    let conn = Connector::new(Arc::new(driver.clone()))
        .open_read_only(TEST_URI)
        .unwrap();
    let domain = TestDomain::new("ro-domain");
    let secret = TestSecret::new("ro-secret");

    let err = conn.define_domain(&domain.xml()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = conn
        .create_domain(&domain.xml(), DomainCreateFlags::DEFAULT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = conn.define_secret(&secret.xml()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert_eq!(driver.domain_count().unwrap(), 0);
    assert_eq!(driver.secret_count().unwrap(), 0);

    // Queries still work.
    assert!(conn.list_domains(DomainListFlags::ALL).unwrap().is_empty());
    conn.close().unwrap();
}

/// Test session health and host metadata
#[test]
fn test_init() {
    let conn = open(&MockDriver::new());

    assert!(conn.is_alive().unwrap());
    assert!(!conn.is_encrypted().unwrap());
    assert!(conn.is_secure().unwrap());

    assert!(conn.version().unwrap().raw() > 0);
    assert!(conn.lib_version().unwrap().major() > 0);
    assert!(!conn.capabilities().unwrap().is_empty());
    assert!(!conn.hostname().unwrap().is_empty());
    assert!(conn.sysinfo().is_ok());
    assert_eq!(conn.hypervisor_type().unwrap(), "TEST");
    assert_eq!(conn.uri().unwrap(), TEST_URI);

    let err = conn.cpu_model_names("not-an-arch").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!conn.cpu_model_names("x86_64").unwrap().is_empty());

    let err = conn.max_vcpus("not-a-type").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(conn.max_vcpus("kvm").unwrap() > 0);

    conn.close().unwrap();
}

/// Test that sysinfo is refused for per-user sessions
#[test]
fn test_sysinfo_unsupported_for_session_scope() {
    let conn = Connector::new(Arc::new(MockDriver::new()))
        .open("qemu:///session", AccessMode::ReadWrite)
        .unwrap();

    let err = conn.sysinfo().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(conn.hypervisor_type().unwrap(), "QEMU");

    conn.close().unwrap();
}

/// Test listing domains and freeing every handle
#[test]
fn test_list_domains() {
    let conn = open(&MockDriver::new());
    let defined = TestDomain::new("listed");
    conn.define_domain(&defined.xml()).unwrap();

    let mut domains = conn.list_domains(DomainListFlags::ALL).unwrap();
    assert_eq!(domains.len(), 1);
    for domain in domains.iter_mut() {
        domain.free().unwrap();
    }

    let err = conn.list_domains(DomainListFlags::from_bits_retain(1 << 20)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    conn.close().unwrap();
}

/// Test creating and destroying a transient domain
#[test]
fn test_create_destroy_domain() {
    let driver = MockDriver::new();
    let conn = open(&driver);
    let data = TestDomain::new("transient");

    let err = conn.create_domain("", DomainCreateFlags::DEFAULT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = conn
        .create_domain(&data.xml(), DomainCreateFlags::from_bits_retain(99))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(driver.domain_count().unwrap(), 0);

    let mut dom = conn.create_domain(&data.xml(), DomainCreateFlags::DEFAULT).unwrap();
    assert!(dom.is_active().unwrap());
    assert!(!dom.is_persistent().unwrap());
    assert!(dom.id().unwrap().is_some());

    let err = dom.destroy(DomainDestroyFlags::from_bits_retain(99)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(dom.is_active().unwrap());

    dom.destroy(DomainDestroyFlags::DEFAULT).unwrap();
    assert_eq!(driver.domain_count().unwrap(), 0);

    dom.free().unwrap();
    conn.close().unwrap();
}

/// Test the define, start, stop, undefine sequence
#[test]
fn test_define_undefine_domain() {
    let driver = MockDriver::new();
    let conn = open(&driver);
    let data = TestDomain::new("persistent");

    let err = conn.define_domain("").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let dom = conn.define_domain(&data.xml()).unwrap();
    assert!(!dom.is_active().unwrap());
    assert!(dom.is_persistent().unwrap());
    assert_eq!(dom.id().unwrap(), None);

    dom.create(DomainCreateFlags::DEFAULT).unwrap();
    assert!(dom.is_active().unwrap());
    assert!(dom.is_persistent().unwrap());
    assert!(dom.id().unwrap().is_some());

    let err = dom.create(DomainCreateFlags::DEFAULT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    dom.destroy(DomainDestroyFlags::DEFAULT).unwrap();
    assert!(!dom.is_active().unwrap());
    assert!(dom.is_persistent().unwrap());

    let err = dom.undefine(DomainUndefineFlags::from_bits_retain(99)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(driver.domain_count().unwrap(), 1);

    dom.undefine(DomainUndefineFlags::DEFAULT).unwrap();
    assert_eq!(driver.domain_count().unwrap(), 0);

    let err = dom.name().unwrap_err();
    assert!(err.is_not_found());

    conn.close().unwrap();
}

/// Test domain lookups by ID, name and UUID
#[test]
fn test_lookup_domain() {
    let conn = open(&MockDriver::new());
    let data = TestDomain::new("lookup-me");

    let dom = conn
        .create_domain(&data.xml(), DomainCreateFlags::START_AUTODESTROY)
        .unwrap();

    // By ID
    let err = conn.lookup_domain_by_id(99).unwrap_err();
    assert!(err.is_not_found());

    let expected_id = dom.id().unwrap().unwrap();
    let found = conn.lookup_domain_by_id(expected_id).unwrap();
    assert_eq!(found.id().unwrap(), Some(expected_id));

    // By name
    let err = conn.lookup_domain_by_name("no-such-domain").unwrap_err();
    assert!(err.is_not_found());

    let found = conn.lookup_domain_by_name(&data.name).unwrap();
    assert_eq!(found.name().unwrap(), data.name);

    // By UUID
    let err = conn.lookup_domain_by_uuid("not-a-uuid").unwrap_err();
    assert!(err.is_not_found());

    let found = conn.lookup_domain_by_uuid(&data.uuid).unwrap();
    assert_eq!(found.uuid().unwrap(), data.uuid);

    // Empty keys never reach the daemon
    let err = conn.lookup_domain_by_name("").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    conn.close().unwrap();
}

/// Test that UUID lookups ignore case and report the canonical form
#[test]
fn test_uuid_lookup_is_case_insensitive() {
    let conn = open(&MockDriver::new());
    let data = TestDomain::new("mixed-case");
    conn.define_domain(&data.xml()).unwrap();

    let found = conn.lookup_domain_by_uuid(&data.uuid.to_uppercase()).unwrap();
    assert_eq!(found.name().unwrap(), data.name);
    assert_eq!(found.uuid().unwrap(), data.uuid.to_lowercase());

    conn.close().unwrap();
}

/// Test define, lookup by UUID, undefine, then lookup again
#[test]
fn test_domain_round_trip_by_uuid() {
    let driver = MockDriver::new();
    let conn = open(&driver);
    let data = TestDomain::new("round-trip");

    let mut defined = conn.define_domain(&data.xml()).unwrap();
    defined.free().unwrap();

    let found = conn.lookup_domain_by_uuid(&data.uuid).unwrap();
    assert_eq!(found.name().unwrap(), data.name);
    assert_eq!(found.uuid().unwrap(), data.uuid);

    found.undefine(DomainUndefineFlags::DEFAULT).unwrap();
    assert_eq!(driver.domain_count().unwrap(), 0);

    let err = conn.lookup_domain_by_uuid(&data.uuid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    conn.close().unwrap();
}

/// Test that a read-only handle cannot stop or remove a domain
#[test]
fn test_read_only_handle_rejects_destroy_and_undefine() {
    let driver = MockDriver::new();
    let writer = open(&driver);
    let reader = Connector::new(Arc::new(driver.clone()))
        .open_read_only(TEST_URI)
        .unwrap();
    let data = TestDomain::new("guarded");

    let dom = writer.define_domain(&data.xml()).unwrap();
    dom.create(DomainCreateFlags::DEFAULT).unwrap();

    let seen = reader.lookup_domain_by_uuid(&data.uuid).unwrap();

    let err = seen.destroy(DomainDestroyFlags::DEFAULT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = seen.undefine(DomainUndefineFlags::DEFAULT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert!(seen.is_active().unwrap());
    assert!(seen.is_persistent().unwrap());
    assert_eq!(driver.domain_count().unwrap(), 1);

    dom.destroy(DomainDestroyFlags::DEFAULT).unwrap();
    writer.close().unwrap();
    reader.close().unwrap();
}

/// Test that autodestroy domains vanish with their connection
#[test]
fn test_autodestroy_domain_stops_on_close() {
    let driver = MockDriver::new();
    let conn = open(&driver);
    let data = TestDomain::new("ephemeral");

    conn.create_domain(&data.xml(), DomainCreateFlags::START_AUTODESTROY)
        .unwrap();
    assert_eq!(driver.domain_count().unwrap(), 1);

    conn.close().unwrap();
    assert_eq!(driver.domain_count().unwrap(), 0);
    assert_eq!(driver.open_sessions(), 0);
}

/// Test listing secrets with valid and invalid filters
#[test]
fn test_list_secrets() {
    let conn = open(&MockDriver::new());
    conn.define_secret(&TestSecret::new("listed").xml()).unwrap();

    let err = conn.list_secrets(SecretListFlags::from_bits_retain(99)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mut secrets = conn.list_secrets(SecretListFlags::ALL).unwrap();
    assert_eq!(secrets.len(), 1);
    for secret in secrets.iter_mut() {
        secret.free().unwrap();
    }

    assert_eq!(conn.list_secrets(SecretListFlags::EPHEMERAL).unwrap().len(), 0);
    assert_eq!(conn.list_secrets(SecretListFlags::NO_EPHEMERAL).unwrap().len(), 1);

    conn.close().unwrap();
}

/// Test defining and undefining a secret
#[test]
fn test_define_undefine_secret() {
    let driver = MockDriver::new();
    let conn = open(&driver);

    let err = conn.define_secret("").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let sec = conn.define_secret(&TestSecret::new("web-tls").xml()).unwrap();
    assert_eq!(driver.secret_count().unwrap(), 1);

    sec.set_value(b"s3cr3t").unwrap();
    assert_eq!(sec.value().unwrap(), b"s3cr3t".to_vec());

    sec.undefine().unwrap();
    assert_eq!(driver.secret_count().unwrap(), 0);

    conn.close().unwrap();
}

/// Test secret lookups by UUID and usage
#[test]
fn test_lookup_secret() {
    let conn = open(&MockDriver::new());
    let data = TestSecret::new("backup-tls");
    conn.define_secret(&data.xml()).unwrap();

    let err = conn.lookup_secret_by_uuid("not-a-uuid").unwrap_err();
    assert!(err.is_not_found());

    let err = conn
        .lookup_secret_by_usage(SecretUsageType::from_raw(99), "anything")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = conn
        .lookup_secret_by_usage(SecretUsageType::NONE, "")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let sec = conn.lookup_secret_by_uuid(&data.uuid).unwrap();
    assert_eq!(sec.uuid().unwrap(), data.uuid);

    let sec = conn
        .lookup_secret_by_usage(SecretUsageType::TLS, &data.usage_name)
        .unwrap();
    assert_eq!(sec.usage_type().unwrap(), SecretUsageType::TLS);
    assert_eq!(sec.usage_id().unwrap(), data.usage_name);

    conn.close().unwrap();
}

/// Test define, lookup by UUID, undefine, then lookup again for secrets
#[test]
fn test_secret_round_trip_by_uuid() {
    let driver = MockDriver::new();
    let conn = open(&driver);
    let data = TestSecret::new("round-trip-tls");

    let mut defined = conn.define_secret(&data.xml()).unwrap();
    defined.free().unwrap();

    let found = conn.lookup_secret_by_uuid(&data.uuid).unwrap();
    assert_eq!(found.uuid().unwrap(), data.uuid);
    assert_eq!(found.usage_id().unwrap(), data.usage_name);

    found.undefine().unwrap();
    assert_eq!(driver.secret_count().unwrap(), 0);

    let err = conn.lookup_secret_by_uuid(&data.uuid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    conn.close().unwrap();
}

/// Test that a remote URI reports its host, including IPv6 literals
#[test]
fn test_hostname_from_remote_uri() {
    let connector = Connector::new(Arc::new(MockDriver::new()));

    let conn = connector
        .open("qemu+ssh://root@[::1]:22/system", AccessMode::ReadWrite)
        .unwrap();
    assert_eq!(conn.hostname().unwrap(), "::1");
    assert!(conn.is_encrypted().unwrap());
    conn.close().unwrap();

    let conn = connector
        .open("qemu+tcp://node-1/system", AccessMode::ReadOnly)
        .unwrap();
    assert_eq!(conn.hostname().unwrap(), "node-1");
    assert!(!conn.is_secure().unwrap());
    conn.close().unwrap();
}

/// Test that a defined domain is visible through a second connection
#[test]
fn test_round_trip_across_connections() {
    let driver = MockDriver::new();
    let writer = open(&driver);
    let reader = Connector::new(Arc::new(driver.clone()))
        .open_read_only(TEST_URI)
        .unwrap();
    let data = TestDomain::new("shared");

    writer.define_domain(&data.xml()).unwrap();

    let seen = reader.lookup_domain_by_uuid(&data.uuid).unwrap();
    assert_eq!(seen.name().unwrap(), data.name);
    assert!(seen.xml_desc().unwrap().contains(&data.name));

    let err = seen.create(DomainCreateFlags::DEFAULT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    writer.close().unwrap();
    reader.close().unwrap();
}

/// Test that handles fail after their connection closes but can still be freed
#[test]
fn test_use_after_close() {
    let conn = open(&MockDriver::new());
    let mut dom = conn
        .define_domain(&TestDomain::new("orphan").xml())
        .unwrap();
    let mut sec = conn.define_secret(&TestSecret::new("orphan").xml()).unwrap();

    conn.close().unwrap();

    assert!(matches!(dom.name(), Err(VirtError::InvalidState(_))));
    assert!(matches!(sec.uuid(), Err(VirtError::InvalidState(_))));
    assert!(matches!(
        conn.list_domains(DomainListFlags::ALL),
        Err(VirtError::InvalidState(_))
    ));

    dom.free().unwrap();
    sec.free().unwrap();
}

/// Test that freeing a handle twice is an error
#[test]
fn test_double_free() {
    let conn = open(&MockDriver::new());
    let mut dom = conn.define_domain(&TestDomain::new("twice").xml()).unwrap();

    dom.free().unwrap();
    assert!(dom.is_freed());
    assert_eq!(dom.free().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(dom.name().unwrap_err().kind(), ErrorKind::InvalidState);

    conn.close().unwrap();
}
