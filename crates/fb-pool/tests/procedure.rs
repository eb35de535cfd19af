//! Stored-procedure probing through the read-only executor.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use fb_client::{Error, Row, SqlValue, TargetDescriptor};
use fb_driver_pool::{PoolConfig, PoolError, PoolManager, ProcedureCall, ProcedureStyle};
use fb_testing::{Event, MockLibrary};

fn manager_with(library: &MockLibrary) -> PoolManager {
    PoolManager::new(Arc::new(library.clone()), PoolConfig::default()).unwrap()
}

fn target() -> TargetDescriptor {
    TargetDescriptor::new("employee").with_host("fb")
}

fn executed(library: &MockLibrary) -> Vec<String> {
    library
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Execute { sql, .. } => Some(sql),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_falls_back_through_parameter_sets() {
    let library = MockLibrary::new();
    library.on_query(|_, params| {
        if params.is_empty() {
            Ok(vec![Row::from_pairs([("REGION", SqlValue::from("EMEA"))])])
        } else {
            Err(Error::database(-170, "Input parameter mismatch for procedure SP_REGIONS"))
        }
    });
    let manager = manager_with(&library);

    let call = ProcedureCall::new("SP_REGIONS")
        .params(vec![SqlValue::from("EMEA"), SqlValue::Integer(2024)])
        .params(vec![SqlValue::from("EMEA")])
        .params(vec![]);

    let rows = manager.call_procedure(&target(), &call).await.unwrap();
    assert_eq!(rows[0].get_by_name::<String>("region").unwrap(), "EMEA");

    assert_eq!(
        executed(&library),
        vec![
            "SELECT * FROM SP_REGIONS(?, ?)",
            "SELECT * FROM SP_REGIONS(?)",
            "SELECT * FROM SP_REGIONS",
        ]
    );
    // Each rejected attempt discarded its connection.
    assert_eq!(library.connects(), 3);
    assert_eq!(library.open_connections().len(), 1);
}

#[tokio::test]
async fn test_falls_back_to_legacy_name() {
    let library = MockLibrary::new();
    library.on_query(|sql, _| {
        if sql.contains("SP_SUMMARY_V2") {
            Err(Error::database(-804, "Count of read-write columns does not equal count of values"))
        } else {
            Ok(vec![Row::from_pairs([("TOTAL", SqlValue::BigInt(7))])])
        }
    });
    let manager = manager_with(&library);

    let call = ProcedureCall::new("SP_SUMMARY_V2")
        .or_name("SP_SUMMARY")
        .params(vec![SqlValue::Integer(1)])
        .style(ProcedureStyle::Executable);

    let rows = manager.call_procedure(&target(), &call).await.unwrap();
    assert_eq!(rows[0].get_by_name::<i64>("total").unwrap(), 7);
    assert_eq!(
        executed(&library),
        vec![
            "EXECUTE PROCEDURE SP_SUMMARY_V2 ?",
            "EXECUTE PROCEDURE SP_SUMMARY ?",
        ]
    );
}

#[tokio::test]
async fn test_other_errors_end_the_probe() {
    let library = MockLibrary::new();
    library.on_query(|_, _| Err(Error::database(-551, "no permission for EXECUTE access")));
    let manager = manager_with(&library);

    let call = ProcedureCall::new("SP_REGIONS")
        .params(vec![SqlValue::Integer(1)])
        .params(vec![]);

    let err = manager.call_procedure(&target(), &call).await.unwrap_err();
    assert_eq!(err.client_error().and_then(Error::sqlcode), Some(-551));
    assert_eq!(executed(&library).len(), 1);
}

#[tokio::test]
async fn test_exhausted_candidates_return_last_rejection() {
    let library = MockLibrary::new();
    library.on_query(|_, params| {
        Err(Error::database(
            -170,
            format!("parameter mismatch: {} supplied", params.len()),
        ))
    });
    let manager = manager_with(&library);

    let call = ProcedureCall::new("SP_REGIONS")
        .params(vec![SqlValue::Integer(1), SqlValue::Integer(2)])
        .params(vec![SqlValue::Integer(1)]);

    let err = manager.call_procedure(&target(), &call).await.unwrap_err();
    assert!(err.is_parameter_mismatch());
    assert!(err.to_string().contains("1 supplied"));
    assert_eq!(executed(&library).len(), 2);
}

#[tokio::test]
async fn test_rejects_unsafe_names_before_connecting() {
    let library = MockLibrary::new();
    let manager = manager_with(&library);

    let call = ProcedureCall::new("SP_OK")
        .or_name("X\"; DROP TABLE SALES; --")
        .params(vec![]);

    let err = manager.call_procedure(&target(), &call).await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::Client(Error::InvalidIdentifier(_))
    ));
    assert_eq!(library.connects(), 0);
}
