//! Tests for the HTTP stack client.

use super::*;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stack_config(server: &MockServer) -> StackConfig {
    StackConfig {
        api_key: "blt_key".to_string(),
        management_token: Some("cs_token".to_string()),
        auth_token: None,
        host: format!("{}/v3", server.uri()),
        marketplace_host: format!("{}/marketplace", server.uri()),
        personalize_host: format!("{}/personalize", server.uri()),
        organization_uid: None,
        timeout_secs: 5,
    }
}

async fn client(server: &MockServer) -> HttpStackClient {
    HttpStackClient::new(&stack_config(server)).unwrap()
}

#[test]
fn test_new_requires_a_token() {
    let config = StackConfig {
        api_key: "k".to_string(),
        management_token: None,
        auth_token: None,
        host: "http://localhost".to_string(),
        marketplace_host: "http://localhost".to_string(),
        personalize_host: "http://localhost".to_string(),
        organization_uid: None,
        timeout_secs: 5,
    };
    assert!(matches!(HttpStackClient::new(&config), Err(Error::Config(_))));
}

#[test]
fn test_handle_http_error_mapping() {
    assert!(matches!(handle_http_error(429, "", "x"), Error::RateLimit(60)));
    assert!(matches!(handle_http_error(401, "", "x"), Error::Authentication(_)));
    assert!(matches!(handle_http_error(403, "", "x"), Error::Authentication(_)));
    assert!(matches!(handle_http_error(404, "", "x"), Error::NotFound(_)));
    assert!(matches!(handle_http_error(409, "", "x"), Error::Conflict(_)));
    assert!(matches!(
        handle_http_error(422, r#"{"error_message":"Title already exists."}"#, "x"),
        Error::Conflict(_)
    ));
    assert!(matches!(
        handle_http_error(422, r#"{"error_message":"Invalid schema"}"#, "x"),
        Error::Api { status: 422, .. }
    ));
    assert!(matches!(
        handle_http_error(500, "", "x"),
        Error::Api { status: 500, .. }
    ));
}

#[tokio::test]
async fn test_find_sends_auth_headers_and_unwraps_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/environments"))
        .and(header("api_key", "blt_key"))
        .and(header("authorization", "cs_token"))
        .and(query_param("skip", "100"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "environments": [{"uid": "e1", "name": "dev"}, {"uid": "e2", "name": "prod"}]
        })))
        .mount(&server)
        .await;

    let items = client(&server)
        .await
        .find(&Resource::Environment, &Query::page(100, 50))
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["name"], "prod");
}

#[tokio::test]
async fn test_find_forwards_extra_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/content_types/blog/entries"))
        .and(query_param("locale", "en-us"))
        .and(query_param("include_publish_details", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{"uid": "e1", "publish_details": [{"environment": "dev"}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resource = Resource::Entry {
        content_type: "blog".to_string(),
        locale: "en-us".to_string(),
    };
    let query = Query::page(0, 10).param("include_publish_details", "true");
    let items = client(&server).await.find(&resource, &query).await.unwrap();

    assert_eq!(items[0]["publish_details"][0]["environment"], "dev");
}

#[tokio::test]
async fn test_count_reads_include_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/content_types/blog/entries"))
        .and(query_param("include_count", "true"))
        .and(query_param("locale", "fr-fr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{"uid": "e1"}],
            "count": 42
        })))
        .mount(&server)
        .await;

    let resource = Resource::Entry {
        content_type: "blog".to_string(),
        locale: "fr-fr".to_string(),
    };
    let count = client(&server)
        .await
        .count(&resource, &Query::default())
        .await
        .unwrap();
    assert_eq!(count, 42);
}

#[tokio::test]
async fn test_create_wraps_singular_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/labels"))
        .and(body_partial_json(json!({"label": {"name": "News"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "notice": "Label created successfully.",
            "label": {"uid": "blt_new", "name": "News"}
        })))
        .mount(&server)
        .await;

    let created = client(&server)
        .await
        .create(&Resource::Label, json!({"name": "News"}))
        .await
        .unwrap();
    assert_eq!(created["uid"], "blt_new");
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let server = MockServer::start().await;
    let routes = [
        (Resource::Label, 429u16),
        (Resource::Environment, 401),
        (Resource::Extension, 404),
        (Resource::Webhook, 409),
        (Resource::Role, 500),
    ];
    for (resource, status) in &routes {
        Mock::given(method("GET"))
            .and(path(format!("/v3/{}", resource.path())))
            .respond_with(ResponseTemplate::new(*status).set_body_string("{}"))
            .mount(&server)
            .await;
    }
    let client = client(&server).await;
    let find = |resource: Resource| {
        let client = client.clone();
        async move { client.find(&resource, &Query::default()).await.unwrap_err() }
    };

    assert!(matches!(find(Resource::Label).await, Error::RateLimit(_)));
    assert!(matches!(find(Resource::Environment).await, Error::Authentication(_)));
    assert!(matches!(find(Resource::Extension).await, Error::NotFound(_)));
    assert!(matches!(find(Resource::Webhook).await, Error::Conflict(_)));
    let down = find(Resource::Role).await;
    assert!(matches!(down, Error::Api { status: 500, .. }));
    assert!(down.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/labels"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .find(&Resource::Label, &Query::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimit(7)));
}

#[tokio::test]
async fn test_scoped_client_sends_branch_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/webhooks"))
        .and(header("branch", "develop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"webhooks": [{"uid": "w1"}]})))
        .mount(&server)
        .await;

    let scoped = client(&server).await.scoped(Some("develop"));
    let items = scoped.find(&Resource::Webhook, &Query::default()).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_branches_unsupported_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/stacks/branches"))
        .respond_with(ResponseTemplate::new(412).set_body_string("{}"))
        .mount(&server)
        .await;

    assert!(client(&server).await.branches().await.unwrap().is_none());
}

#[tokio::test]
async fn test_branches_listed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/stacks/branches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "branches": [{"uid": "main"}, {"uid": "develop", "source": "main"}]
        })))
        .mount(&server)
        .await;

    let branches = client(&server).await.branches().await.unwrap().unwrap();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[1].source.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_add_settings_posts_stack_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/stacks/settings"))
        .and(body_partial_json(json!({"stack_settings": {"live_preview": {"enabled": true}}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "stack_settings": {"live_preview": {"enabled": true}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .await
        .add_settings(json!({"live_preview": {"enabled": true}}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_installations_use_marketplace_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/marketplace/installations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"uid": "i1"}]})))
        .mount(&server)
        .await;

    let items = client(&server)
        .await
        .find(&Resource::AppInstallation, &Query::default())
        .await
        .unwrap();
    assert_eq!(items[0]["uid"], "i1");
}
