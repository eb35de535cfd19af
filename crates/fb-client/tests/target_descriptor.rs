//! Target descriptor identity and configuration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use fb_client::TargetDescriptor;
use proptest::prelude::*;

// =============================================================================
// Deserialization
// =============================================================================

#[test]
fn test_deserialize_from_json() {
    let target: TargetDescriptor = serde_json::from_str(
        r#"{
            "host": "db.internal",
            "database": "/data/sales.fdb",
            "user": "REPORTS",
            "password": "secret",
            "client_library": "/opt/firebird/lib/libfbclient.so"
        }"#,
    )
    .unwrap();

    assert_eq!(target.port(), 3050);
    assert_eq!(target.connection_uri(), "db.internal/3050:/data/sales.fdb");
    assert_eq!(target.credentials().password, "secret");
}

#[test]
fn test_serialize_omits_password() {
    let target = TargetDescriptor::new("sales").with_password("hunter2");
    let json = serde_json::to_string(&target).unwrap();
    assert!(!json.contains("hunter2"));
    assert!(!json.contains("password"));
}

#[test]
fn test_empty_optional_fields_match_absent_ones() {
    let from_json: TargetDescriptor =
        serde_json::from_str(r#"{ "host": "", "role": "", "database": "sales" }"#).unwrap();
    let built = TargetDescriptor::new("sales");

    assert!(from_json.is_equivalent(&built));
    assert_eq!(from_json.connection_uri(), "sales");
}

// =============================================================================
// Pool key properties
// =============================================================================

fn field() -> impl Strategy<Value = String> {
    // Separators and escapes are deliberately over-represented.
    "[a-c|\\\\]{0,4}"
}

fn descriptor() -> impl Strategy<Value = TargetDescriptor> {
    (
        field(),
        any::<u16>(),
        "[a-c|\\\\]{1,4}",
        field(),
        field(),
        field(),
        field(),
    )
        .prop_map(|(host, port, database, user, password, role, library)| {
            TargetDescriptor::new(database)
                .with_host(host)
                .with_port(port)
                .with_user(user)
                .with_password(password)
                .with_role(role)
                .with_client_library(library)
        })
}

fn identity(t: &TargetDescriptor) -> impl PartialEq + std::fmt::Debug {
    (
        t.host().map(str::to_string),
        t.port(),
        t.database().to_string(),
        t.user().to_string(),
        t.role().map(str::to_string),
        t.client_library().map(|p| p.to_path_buf()),
    )
}

proptest! {
    #[test]
    fn pool_key_is_injective(a in descriptor(), b in descriptor()) {
        prop_assert_eq!(a.pool_key() == b.pool_key(), identity(&a) == identity(&b));
    }

    #[test]
    fn pool_key_is_stable_across_clones(a in descriptor()) {
        prop_assert_eq!(a.pool_key(), a.clone().pool_key());
        prop_assert!(a.is_equivalent(&a.clone().with_password("other")));
    }
}
