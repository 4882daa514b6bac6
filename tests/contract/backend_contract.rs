use std::sync::Arc;

use datagate_core::{
    InitContext, ScriptedHttpClient, Source, SourceErrorKind, SourceRegistry,
};

#[derive(Clone, Copy)]
struct BackendCase {
    kind: &'static str,
    document: &'static str,
    verify_url: &'static str,
    verify_body: &'static str,
}

fn backend_cases() -> Vec<BackendCase> {
    vec![
        BackendCase {
            kind: "http",
            document: "kind: http\nbase_url: https://api.example.test/\nverify_path: /status",
            verify_url: "https://api.example.test/status",
            verify_body: "ok",
        },
        BackendCase {
            kind: "honeycomb",
            document: "kind: honeycomb\napi_key: k",
            verify_url: "https://api.honeycomb.io/1/auth",
            verify_body: r#"{"team":{"slug":"ops"}}"#,
        },
        BackendCase {
            kind: "splunk",
            document: "kind: splunk\nhost: splunk.internal\ntoken: t",
            verify_url: "https://splunk.internal:8089/services/server/info?output_mode=json",
            verify_body: r#"{"entry":[]}"#,
        },
        BackendCase {
            kind: "influxdb",
            document: "kind: influxdb\nhost: influx.local\norg: ops\ntoken: t",
            verify_url: "http://influx.local:8086/api/v2/buckets?org=ops&limit=1",
            verify_body: r#"{"buckets":[]}"#,
        },
    ]
}

async fn initialize(
    case: BackendCase,
    client: Arc<ScriptedHttpClient>,
) -> Result<Arc<dyn Source>, datagate_core::SourceError> {
    let registry = SourceRegistry::builtin().expect("registry");
    let raw = serde_yaml::from_str(case.document).expect("yaml");
    let config = registry
        .decode(case.kind, raw)
        .unwrap_or_else(|error| panic!("backend '{}' failed to decode: {error}", case.kind));
    config.initialize(&InitContext::new(client)).await
}

#[test]
fn every_builtin_kind_has_a_contract_case() {
    let registry = SourceRegistry::builtin().expect("registry");
    let mut kinds: Vec<_> = backend_cases().iter().map(|case| case.kind).collect();
    kinds.sort_unstable();

    assert_eq!(kinds, registry.kinds());
}

#[tokio::test]
async fn verification_is_a_single_get_for_all_backends() {
    for case in backend_cases() {
        let client = Arc::new(ScriptedHttpClient::new().respond(200, case.verify_body));
        let source = initialize(case, client.clone())
            .await
            .unwrap_or_else(|error| panic!("backend '{}' failed to verify: {error}", case.kind));

        let requests = client.requests();
        assert_eq!(requests.len(), 1, "backend '{}': verification calls", case.kind);
        assert_eq!(requests[0].method.as_str(), "GET", "backend '{}'", case.kind);
        assert_eq!(requests[0].url, case.verify_url, "backend '{}'", case.kind);
        assert!(requests[0].body.is_none(), "backend '{}': probe has no body", case.kind);
        assert_eq!(source.kind(), case.kind);
        assert_eq!(source.name(), case.kind);
    }
}

#[tokio::test]
async fn rejected_verification_returns_no_source_for_all_backends() {
    for case in backend_cases() {
        let client = Arc::new(ScriptedHttpClient::new().respond(403, "forbidden"));

        let error = match initialize(case, client).await {
            Ok(_) => panic!("backend '{}' must not construct after a 403", case.kind),
            Err(error) => error,
        };

        assert_eq!(error.kind(), SourceErrorKind::Connection, "backend '{}'", case.kind);
        assert_eq!(error.source_kind(), case.kind);
        assert_eq!(error.operation(), "verify");
    }
}

#[tokio::test]
async fn close_is_idempotent_for_all_backends() {
    for case in backend_cases() {
        let client = Arc::new(ScriptedHttpClient::new().respond(200, case.verify_body));
        let source = initialize(case, client)
            .await
            .unwrap_or_else(|error| panic!("backend '{}' failed to verify: {error}", case.kind));

        assert!(!source.is_closed(), "backend '{}'", case.kind);
        source.close().expect("first close");
        source.close().expect("second close");
        assert!(source.is_closed(), "backend '{}'", case.kind);
    }
}

#[tokio::test]
async fn to_config_round_trips_for_all_backends() {
    let registry = SourceRegistry::builtin().expect("registry");

    for case in backend_cases() {
        let client = Arc::new(ScriptedHttpClient::new().respond(200, case.verify_body));
        let source = initialize(case, client)
            .await
            .unwrap_or_else(|error| panic!("backend '{}' failed to verify: {error}", case.kind));

        let document = source.to_config().to_document();
        let again = registry
            .decode(case.kind, serde_yaml::to_value(&document).expect("json to yaml"))
            .unwrap_or_else(|error| panic!("backend '{}' round trip: {error}", case.kind));

        assert_eq!(again.to_document(), document, "backend '{}'", case.kind);
        assert_eq!(again.kind(), case.kind);
    }
}
