#[cfg(test)]
mod tests {
    use crate::error::{validation, AppError, AppResult, OptionExt};
    use crate::tiers::{Feature, Tier};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::io;

    async fn envelope(error: AppError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn field_of(result: AppResult<impl std::fmt::Debug>) -> String {
        match result.unwrap_err() {
            AppError::ValidationError { field, .. } => field,
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::BadRequest("Invalid input".to_string());
        assert_eq!(format!("{}", error), "Bad request: Invalid input");

        let error = AppError::RateLimited { retry_after_seconds: 60 };
        assert_eq!(format!("{}", error), "Rate limited. Retry after 60 seconds");

        let error = AppError::TierRestricted {
            feature: Feature::ShareDocument,
            current: Tier::Tier1,
            required: Some(Tier::Tier3),
            limit: None,
        };
        assert_eq!(format!("{}", error), "Feature 'share_document' is not available for tier_1");
    }

    #[test]
    fn test_app_error_status_codes() {
        let cases = [
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (AppError::Blockchain("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::RateLimited { retry_after_seconds: 30 }, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let (status, body) = envelope(AppError::NotFound("Case not found".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Case not found");
        assert_eq!(body["status"], 404);
        assert!(body["timestamp"].is_string());
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let (status, body) = envelope(AppError::Internal(anyhow::anyhow!("secret connection string"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "An internal server error occurred");
        assert!(body["error"]["details"]["error_id"].is_string());
        assert!(!body.to_string().contains("secret connection string"));
    }

    #[tokio::test]
    async fn test_tier_restricted_details() {
        let (status, body) = envelope(AppError::TierRestricted {
            feature: Feature::GenerateDocument,
            current: Tier::Tier1,
            required: Some(Tier::Tier2),
            limit: None,
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "TIER_RESTRICTED");
        assert_eq!(body["error"]["details"]["feature"], "generate_document");
        assert_eq!(body["error"]["details"]["current_tier"], "tier_1");
        assert_eq!(body["error"]["details"]["required_tier"], "tier_2");
        assert!(body["error"]["message"].as_str().unwrap().contains("Tier 2 or higher"));
    }

    #[tokio::test]
    async fn test_tier_quota_details() {
        let (_, body) = envelope(AppError::TierRestricted {
            feature: Feature::CreateCase,
            current: Tier::Tier1,
            required: None,
            limit: Some(3),
        })
        .await;
        assert_eq!(body["error"]["details"]["limit"], 3);
        assert!(body["error"]["details"]["required_tier"].is_null());
        assert!(body["error"]["message"].as_str().unwrap().contains("at most 3 active cases"));
    }

    #[tokio::test]
    async fn test_rate_limited_details() {
        let (_, body) = envelope(AppError::RateLimited { retry_after_seconds: 42 }).await;
        assert_eq!(body["error"]["details"]["retry_after_seconds"], 42);
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let app_error: AppError = io_error.into();

        match app_error {
            AppError::IoError(msg) => {
                assert!(msg.contains("not found"));
                assert!(msg.contains("File not found"));
            }
            _ => panic!("Expected IoError variant"),
        }
    }

    #[test]
    fn test_from_jwt_error() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let expired: AppError = Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(expired, AppError::Unauthorized(ref m) if m == "Token expired"));

        let invalid: AppError = Error::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(invalid, AppError::Unauthorized(ref m) if m == "Invalid token"));
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let app_error: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(app_error, AppError::NotFound(_)));

        let app_error: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(app_error, AppError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_option_ext() {
        let some_value: Option<i32> = Some(42);
        assert_eq!(some_value.ok_or_not_found("Case").unwrap(), 42);

        let none_value: Option<i32> = None;
        match none_value.ok_or_not_found("Case").unwrap_err() {
            AppError::NotFound(msg) => assert_eq!(msg, "Case not found"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_validate_length() {
        assert_eq!(validation::validate_length("  Bribery at the port  ", "title", 3, 200).unwrap(), "Bribery at the port");
        assert_eq!(field_of(validation::validate_length("ab", "title", 3, 200)), "title");
        assert_eq!(field_of(validation::validate_length("   ", "full_name", 1, 10)), "full_name");
        assert_eq!(field_of(validation::validate_length(&"x".repeat(11), "full_name", 1, 10)), "full_name");
        // Counted in characters, not bytes.
        assert!(validation::validate_length("äöü", "title", 3, 3).is_ok());
    }

    #[test]
    fn test_validate_optional() {
        assert_eq!(validation::validate_optional(None, "location", 10).unwrap(), None);
        assert_eq!(validation::validate_optional(Some("   "), "location", 10).unwrap(), None);
        assert_eq!(validation::validate_optional(Some(" Berlin "), "location", 10).unwrap(), Some("Berlin".into()));
        assert!(validation::validate_optional(Some("a very long location"), "location", 10).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validation::validate_email("  Reporter@Example.ORG ").unwrap(), "reporter@example.org");
        for bad in ["", "no-at-sign", "a@b@c.org", "@example.org", "a@localhost", "a@.example.org", "a@example..org", "a b@example.org"] {
            assert_eq!(field_of(validation::validate_email(bad)), "email", "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_validate_password() {
        assert!(validation::validate_password("eightchr", 8).is_ok());
        assert_eq!(field_of(validation::validate_password("seven77", 8)), "password");
        let too_long = "x".repeat(validation::MAX_PASSWORD_LEN + 1);
        assert!(validation::validate_password(&too_long, 8).is_err());
    }

    #[test]
    fn test_validate_wallet_address() {
        assert_eq!(
            validation::validate_wallet_address("0x52908400098527886E0F7030069857D2E4169EE7").unwrap(),
            "0x52908400098527886e0f7030069857d2e4169ee7"
        );
        assert_eq!(field_of(validation::validate_wallet_address("0x1234")), "wallet_address");
        assert!(validation::validate_wallet_address("52908400098527886E0F7030069857D2E4169EE7").is_err());
    }

    #[test]
    fn test_validate_pagination() {
        assert_eq!(validation::validate_pagination(None, None).unwrap(), (1, 20));
        assert_eq!(validation::validate_pagination(Some(3), Some(100)).unwrap(), (3, 100));
        assert_eq!(field_of(validation::validate_pagination(Some(0), None)), "page");
        assert_eq!(field_of(validation::validate_pagination(None, Some(101))), "limit");
    }
}
