mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

// Validation happens before any database access, so these hold with or without a database.

#[tokio::test]
async fn register_requires_every_field() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/register"))
        .json(&json!({ "name": "Budi", "email": "budi@example.com" }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["data"].is_null());
    Ok(())
}

#[tokio::test]
async fn login_requires_email_and_password() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "email": "budi@example.com" }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test]
async fn register_then_login_round_trip() -> Result<()> {
    let server = common::ensure_server().await?;
    if !common::database_available(server).await {
        eprintln!("skipping: database unavailable");
        return Ok(());
    }
    let client = reqwest::Client::new();
    let email = format!("tech-{}@example.com", server.port);

    let account = json!({
        "name": "Sari",
        "email": email,
        "password": "s3cret",
        "role": "technician",
        "phone": "0812"
    });

    let res = client.post(server.url("/auth/register")).json(&account).send().await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client.post(server.url("/auth/register")).json(&account).send().await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "email": email, "password": "wrong" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "email": email, "password": "s3cret" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["data"]["email"], email);
    assert!(body["data"].get("password").is_none());
    Ok(())
}
