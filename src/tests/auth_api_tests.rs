#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, StatusCode},
    };
    use serde_json::{json, Value};

    use crate::tests::support::{db_app, random_client_ip, random_wallet, request_from, unique_email, PASSWORD};

    #[tokio::test]
    async fn test_register_returns_token_and_tier_1() {
        let Some(app) = db_app().await else { return };
        let email = unique_email("Reporter");

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": email, "password": PASSWORD, "full_name": "  Ada Reporter " })),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(!body["token"].as_str().unwrap().is_empty());
        assert_eq!(body["user"]["email"], email.to_lowercase());
        assert_eq!(body["user"]["full_name"], "Ada Reporter");
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["user"]["tier"], "tier_1");
        assert!(body["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("dup").await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": user.email.to_uppercase(), "password": PASSWORD, "full_name": "Again" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["message"], "Email is already registered");
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("login").await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": user.email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, me) = app.json(Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], user.id.to_string());
        assert_eq!(me["tier"], "tier_1");
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("wrongpw").await;

        let (status, wrong_pw) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": user.email, "password": "not-the-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, unknown) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": unique_email("nobody"), "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_pw["error"]["message"], unknown["error"]["message"]);
        assert!(app.state.metrics.get_snapshot().failed_logins >= 2);
    }

    #[tokio::test]
    async fn test_login_attempts_limited_per_client() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("throttled").await;
        let ip = random_client_ip();
        let attempt = |password: &str| {
            request_from(&ip, Method::POST, "/api/auth/login", None)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "email": user.email, "password": password }).to_string()))
                .unwrap()
        };

        for _ in 0..10 {
            let (status, _, _) = app.send(attempt("not-the-password")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _, bytes) = app.send(attempt(PASSWORD)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert!(body["error"]["details"]["retry_after_seconds"].as_u64().unwrap() >= 1);

        // Another client address is unaffected.
        let (status, _) = app
            .json(Method::POST, "/api/auth/login", None, Some(json!({ "email": user.email, "password": PASSWORD })))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_wallet() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("wallet").await;
        let wallet = random_wallet().to_uppercase().replacen("0X", "0x", 1);

        let (status, body) = app
            .json(Method::PUT, "/api/auth/wallet", Some(&user.token), Some(json!({ "wallet_address": wallet })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wallet_address"], wallet.to_lowercase());

        let (status, body) = app
            .json(Method::PUT, "/api/auth/wallet", Some(&user.token), Some(json!({ "wallet_address": "0xnothex" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "wallet_address");
    }

    #[tokio::test]
    async fn test_change_password() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("pwchange").await;

        let (status, body) = app
            .json(
                Method::PUT,
                "/api/auth/password",
                Some(&user.token),
                Some(json!({ "current_password": "wrong-current", "new_password": "brand-new-secret" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "current_password");

        let (status, _) = app
            .json(
                Method::PUT,
                "/api/auth/password",
                Some(&user.token),
                Some(json!({ "current_password": PASSWORD, "new_password": "brand-new-secret" })),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": user.email, "password": "brand-new-secret" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_promoted_admin_logs_in_as_admin() {
        let Some(app) = db_app().await else { return };
        let user = app.register_user("promote").await;
        crate::routes::auth::grant_admin(&app.state.db, &user.email).await.unwrap();

        let (status, body) = app
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": user.email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "admin");

        let token = body["token"].as_str().unwrap();
        let (status, _) = app.json(Method::GET, "/api/secure-entry", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
