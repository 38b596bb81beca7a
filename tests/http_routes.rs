use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use fractic_iap_sync::{
    config::IapSyncConfig,
    http::router,
    storage::{plan_catalog_seed, Storage},
    util::IapSyncUtil,
};
use openssl::{
    asn1::Asn1Time,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    x509::{X509Builder, X509NameBuilder},
};
use serde_json::{json, Value};
use tower::ServiceExt;

const CATALOG: &str = r#"{
    "entitlements": [
        { "id": 1, "name": "Exports", "slug": "exports", "isMetered": true,
          "defaultLimit": 10, "resetPeriod": "month" }
    ],
    "plans": [
        { "id": 1, "name": "Free Plan", "order": 0, "role": "free",
          "features": [{ "id": 1, "name": "Editor", "order": 1 }],
          "entitlements": [{ "entitlementId": 1 }] },
        { "id": 2, "name": "Pro", "productId": "plan.pro.monthly", "order": 1,
          "role": "pro", "inheritFrom": 1,
          "features": [{ "id": 2, "name": "Cloud sync", "order": 2 }],
          "entitlements": [{ "entitlementId": 1, "limitOverride": 500 }] }
    ]
}"#;

fn self_signed_root_pem() -> Vec<u8> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Integration Root").unwrap();
    let name = name.build();
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build().to_pem().unwrap()
}

async fn app() -> Router {
    let root = std::env::temp_dir().join(format!("iap-sync-routes-{}.pem", std::process::id()));
    std::fs::write(&root, self_signed_root_pem()).unwrap();
    let root = root.to_string_lossy().into_owned();
    let config = IapSyncConfig::from_lookup(|key| match key {
        "APPLE_BUNDLE_ID" => Some("com.example.app".to_owned()),
        "APPLE_CONNECT_MOCK" => Some("true".to_owned()),
        "APPLE_ROOT_CA_PATH" => Some(root.clone()),
        _ => None,
    })
    .unwrap();

    let storage = Storage::in_memory();
    plan_catalog_seed::seed_from_json(&storage, CATALOG)
        .await
        .unwrap();
    router(Arc::new(IapSyncUtil::new(&config, storage).unwrap()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn plans_are_listed_with_inherited_features() {
    let app = app().await;

    let (status, plans) = call(&app, "GET", "/v1/all-plans", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = plans
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, ["Free Plan", "Pro"]);

    let pro_id = plans[1]["id"].as_u64().unwrap();
    let (status, pro) = call(&app, "GET", &format!("/v1/plans/{pro_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let features: Vec<_> = pro["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(features, ["Editor", "Cloud sync"]);
    assert_eq!(pro["entitlements"][0]["slug"], "exports");
    assert_eq!(pro["entitlements"][0]["limit"], 500);
}

#[tokio::test]
async fn free_then_paid_plan_leaves_one_active_subscription() {
    let app = app().await;

    let (status, free) = call(
        &app,
        "POST",
        "/subscriptions/subscribe-free-plan",
        Some(json!({ "userId": "7" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(free["expiresDate"], Value::Null);

    let (_, plans) = call(&app, "GET", "/v1/all-plans", None).await;
    let pro_id = plans[1]["id"].clone();
    let (status, paid) = call(
        &app,
        "POST",
        "/subscriptions/subscribe-to-plan",
        Some(json!({ "userId": 7, "planId": pro_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(paid["expiresDate"].is_string());

    let (status, active) = call(&app, "GET", "/subscriptions/user/7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["id"], paid["id"]);
    assert_eq!(active["plan"]["name"], "Pro");
    assert_eq!(active["plan"]["entitlements"][0]["limit"], 500);
}

#[tokio::test]
async fn client_errors_map_to_4xx() {
    let app = app().await;

    let (status, _) = call(
        &app,
        "POST",
        "/subscriptions/subscribe-to-plan",
        Some(json!({ "userId": 7, "planId": 999 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/subscriptions/verify-apple-purchase",
        Some(json!({ "receipt": "not-a-jws", "userId": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/subscriptions/user/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", "/subscriptions/user/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unverifiable_webhook_asks_for_redelivery() {
    let app = app().await;
    let (status, body) = call(
        &app,
        "POST",
        "/apple-notifications",
        Some(json!({ "signedPayload": "a.b.c" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to process notification");
}
