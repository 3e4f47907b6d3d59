//! Tests for the OData transport helpers and session handling.

use crmsync_client::odata::{status_error, unwrap_entity, unwrap_results};
use crmsync_client::{ClientConfig, ClientError, ListParams, ODataClient, Session, SessionToken};
use crmsync_engine::RemoteError;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn config() -> ClientConfig {
    ClientConfig::from_lookup(|key| match key {
        "CRM_BASE_URL" => Some("https://crm.example.com".to_string()),
        "CRM_PAGE_SIZE" => Some("25".to_string()),
        _ => None,
    })
    .unwrap()
}

// ============================================================================
// Envelopes
// ============================================================================

#[test]
fn unwraps_single_entity() {
    let body = json!({"d": {"AccountId": "guid-1", "Name": "Acme"}});
    let entity = unwrap_entity(body).unwrap();
    assert_eq!(entity["Name"], json!("Acme"));
}

#[test]
fn bare_entity_passes_through() {
    let entity = unwrap_entity(json!({"AccountId": "guid-1"})).unwrap();
    assert_eq!(entity["AccountId"], json!("guid-1"));
}

#[test]
fn rejects_non_object_entity() {
    assert!(matches!(
        unwrap_entity(json!([1, 2])),
        Err(RemoteError::InvalidResponse(_))
    ));
    assert!(matches!(
        unwrap_entity(json!({"d": "x"})),
        Err(RemoteError::InvalidResponse(_))
    ));
}

#[test]
fn unwraps_results() {
    let body = json!({"d": {"results": [{"ContactId": "c1"}, {"ContactId": "c2"}], "__next": null}});
    let items = unwrap_results(body).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["ContactId"], json!("c2"));

    let bare = unwrap_results(json!({"d": [{"ContactId": "c1"}]})).unwrap();
    assert_eq!(bare.len(), 1);
}

#[test]
fn rejects_malformed_results() {
    assert!(unwrap_results(json!({"d": {}})).is_err());
    assert!(unwrap_results(json!({"d": {"results": [1]}})).is_err());
    assert!(unwrap_results(json!(null)).is_err());
}

// ============================================================================
// Requests
// ============================================================================

#[test]
fn list_params_join_filters() {
    let params = ListParams::page(50, 100)
        .with_filters(&["Name eq 'a'".to_string(), "IntField ge 3".to_string()]);

    assert_eq!(
        params.query_pairs(),
        vec![
            ("$top", "50".to_string()),
            ("$skip", "100".to_string()),
            ("$filter", "Name eq 'a' and IntField ge 3".to_string()),
        ]
    );
}

#[test]
fn list_params_optional_parts() {
    let params = ListParams {
        select: vec!["Name".into(), "ModifiedOn".into()],
        orderby: Some("Name desc".into()),
        ..ListParams::page(10, 0)
    };
    let pairs = params.query_pairs();
    assert!(pairs.contains(&("$select", "Name,ModifiedOn".to_string())));
    assert!(pairs.contains(&("$orderby", "Name desc".to_string())));
    assert!(!pairs.iter().any(|(k, _)| *k == "$filter"));
}

#[test]
fn urls() {
    let client = ODataClient::from_config(&config()).unwrap();
    let root = "https://crm.example.com/XRMServices/2011/OrganizationData.svc";

    assert_eq!(client.collection_url("Account"), format!("{root}/AccountSet"));
    assert_eq!(
        client.entity_url("Account", "guid-1"),
        format!("{root}/AccountSet(guid'guid-1')")
    );

    let url = client
        .list_url("Contact", &ListParams::page(25, 0).with_filters(&["FirstName eq 'Jane'".into()]))
        .unwrap();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(url.path(), "/XRMServices/2011/OrganizationData.svc/ContactSet");
    assert!(pairs.contains(&("$filter".to_string(), "FirstName eq 'Jane'".to_string())));
    assert!(pairs.contains(&("$top".to_string(), "25".to_string())));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn status_mapping() {
    assert_eq!(
        status_error(StatusCode::NOT_FOUND, "", "Account", Some("guid-1")),
        RemoteError::NotFound {
            service: "Account".into(),
            id: "guid-1".into()
        }
    );
    assert_eq!(
        status_error(StatusCode::NOT_FOUND, "", "Account", None).status(),
        Some(404)
    );
    assert_eq!(
        status_error(StatusCode::BAD_REQUEST, "bad filter", "Account", None),
        RemoteError::Status {
            code: 400,
            message: "bad filter".into()
        }
    );
}

#[test]
fn client_errors_become_remote_errors() {
    let auth: RemoteError = ClientError::Auth("expired".into()).into();
    assert_eq!(auth.status(), Some(401));

    let passthrough: RemoteError = ClientError::Remote(RemoteError::Transport("reset".into())).into();
    assert_eq!(passthrough, RemoteError::Transport("reset".into()));
}

// ============================================================================
// Session
// ============================================================================

#[test]
fn session_acquires_lazily_and_reuses_token() {
    let acquired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&acquired);
    let session = Session::new(move || -> crmsync_client::Result<SessionToken> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken::Cookie("ReqClientId=abc".into()))
    });

    assert!(!session.is_active());
    session.acquire().unwrap();
    session.acquire().unwrap();
    assert!(session.is_active());
    assert_eq!(acquired.load(Ordering::SeqCst), 1);

    session.release();
    assert!(!session.is_active());
    session.acquire().unwrap();
    assert_eq!(acquired.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_acquire_leaves_session_inactive() {
    let session = Session::new(|| -> crmsync_client::Result<SessionToken> {
        Err(ClientError::Auth("login form changed".into()))
    });
    assert!(matches!(session.acquire(), Err(ClientError::Auth(_))));
    assert!(!session.is_active());
}

#[test]
fn token_debug_hides_secrets() {
    let basic = SessionToken::Basic {
        username: "svc".into(),
        password: "hunter2".into(),
    };
    let cookie = SessionToken::Cookie("MSISAuth=secret".into());

    assert!(!format!("{basic:?}").contains("hunter2"));
    assert!(format!("{basic:?}").contains("svc"));
    assert!(!format!("{cookie:?}").contains("secret"));
}
