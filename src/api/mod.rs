// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    blockchain::FinalityOutcome,
    error::ErrorBody,
    models::{
        AccountResponse, BalanceResponse, CompleteTaskRequest, CompleteTaskResponse,
        DailyTaskView, DailyTasksResponse, DailyTotal, HistoryResponse, ReconcileResponse,
        TokenAmount, UserId,
    },
    state::AppState,
    storage::{AuditEvent, AuditEventType, CompletionStatus, ProvisioningState, TaskCompletion},
    tasks::ProofVerdict,
};

pub mod admin;
pub mod health;
pub mod tasks;
pub mod user;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/tasks/complete", post(tasks::complete_task))
        .route("/tasks/daily", get(tasks::daily_tasks))
        .route("/tasks/history", get(tasks::completion_history))
        .route("/user/balance", get(user::get_balance))
        .route("/user/account", get(user::get_account))
        .route("/admin/reconcile", post(admin::reconcile))
        .route("/admin/stats", get(admin::get_system_stats))
        .route("/admin/accounts/{user_id}", get(admin::get_user_account))
        .route("/admin/audit/events", get(admin::query_audit_logs));

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        tasks::complete_task,
        tasks::daily_tasks,
        tasks::completion_history,
        user::get_balance,
        user::get_account,
        admin::reconcile,
        admin::get_system_stats,
        admin::get_user_account,
        admin::query_audit_logs,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            UserId,
            TokenAmount,
            ProofVerdict,
            CompleteTaskRequest,
            CompleteTaskResponse,
            DailyTaskView,
            DailyTasksResponse,
            DailyTotal,
            HistoryResponse,
            TaskCompletion,
            CompletionStatus,
            BalanceResponse,
            AccountResponse,
            ProvisioningState,
            ReconcileResponse,
            FinalityOutcome,
            AuditEvent,
            AuditEventType,
            ErrorBody,
            admin::SystemStatsResponse,
            admin::AuditLogResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Tasks", description = "Daily tasks and reward settlement"),
        (name = "User", description = "Custodial account and balance"),
        (name = "Admin", description = "Reconciliation, statistics and audit log"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::extractor::test_tokens;
    use crate::state::test_support::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn completion(task_id: &str, confidence: f64) -> Value {
        json!({
            "task_id": task_id,
            "proof": { "reference": "upload-42", "confidence": confidence }
        })
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (state, _ledger, _dir) = test_state();
        let _ = router(state).into_make_service();
    }

    #[tokio::test]
    async fn openapi_lists_reward_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/tasks/complete"));
        assert!(doc.paths.paths.contains_key("/v1/admin/reconcile"));
        assert!(doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer_auth")));
    }

    #[test]
    fn token_amounts_are_documented_as_strings() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schema = &doc["components"]["schemas"]["TokenAmount"];
        assert_eq!(schema["type"], "string");
        assert_eq!(schema["example"], "10000000000000000000");
    }

    #[tokio::test]
    async fn health_needs_no_token_and_sets_request_id() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);

        let response = app
            .oneshot(request(Method::GET, "/health/live", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);

        let (status, body) = send(&app, request(Method::GET, "/v1/tasks/daily", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "missing_auth_header");
    }

    #[tokio::test]
    async fn complete_task_rewards_once_per_day() {
        let (state, ledger, _dir) = test_state();
        let app = router(state);
        let token = test_tokens::unsigned("user_api", "client");

        let (status, body) = send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("medium-blog", 0.9))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task_id"], "medium-blog");
        assert_eq!(body["reward_formatted"], "60");
        assert_eq!(body["new_balance_formatted"], "60");
        assert!(body["explorer_url"].as_str().unwrap().ends_with(body["transaction_id"].as_str().unwrap()));

        let (status, body) = send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("medium-blog", 0.9))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "already_completed");
        assert_eq!(ledger.confirmed_mints(), 1);

        let (status, body) = send(&app, request(Method::GET, "/v1/user/balance", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance_formatted"], "60");
        assert_eq!(body["currency"], "TASK");
        assert_eq!(body["has_account"], true);

        let (status, body) = send(&app, request(Method::GET, "/v1/user/account", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vault_initialized"], true);
        assert!(body.get("key_material").is_none());
    }

    #[tokio::test]
    async fn rejected_proof_and_unknown_task() {
        let (state, ledger, _dir) = test_state();
        let app = router(state);
        let token = test_tokens::unsigned("user_api", "client");

        let (status, body) = send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("medium-blog", 0.2))),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error_code"], "proof_rejected");

        let (status, _) = send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("no-such-task", 0.9))),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("  ", 0.9))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(ledger.confirmed_mints(), 0);
    }

    #[tokio::test]
    async fn new_user_has_zero_balance_and_no_account() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);
        let token = test_tokens::unsigned("user_fresh", "client");

        let (status, body) = send(&app, request(Method::GET, "/v1/user/balance", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], "0");
        assert_eq!(body["has_account"], false);

        let (status, _) = send(&app, request(Method::GET, "/v1/user/account", Some(&token), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn daily_board_and_history_reflect_completion() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);
        let token = test_tokens::unsigned("user_board", "client");

        send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&token), Some(completion("medium-blog", 0.9))),
        )
        .await;

        let (status, body) = send(&app, request(Method::GET, "/v1/tasks/daily", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 22);
        let blog = tasks.iter().find(|t| t["task_id"] == "medium-blog").unwrap();
        assert_eq!(blog["completed"], true);
        assert_eq!(body["earned_today_formatted"], "60");

        let (status, body) = send(&app, request(Method::GET, "/v1/tasks/history", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completions"].as_array().unwrap().len(), 1);
        assert_eq!(body["daily_totals"][0]["total_formatted"], "60");
    }

    #[tokio::test]
    async fn admin_routes_require_admin_role() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);
        let client = test_tokens::unsigned("user_1", "client");
        let admin = test_tokens::unsigned("ops_1", "admin");

        let (status, _) = send(&app, request(Method::POST, "/v1/admin/reconcile", Some(&client), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, request(Method::POST, "/v1/admin/reconcile", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["swept_reservations"], 0);
        assert_eq!(body["still_pending"], 0);
    }

    #[tokio::test]
    async fn admin_can_inspect_accounts_and_audit_log() {
        let (state, _ledger, _dir) = test_state();
        let app = router(state);
        let user = test_tokens::unsigned("user_audited", "client");
        let admin = test_tokens::unsigned("ops_1", "admin");

        send(
            &app,
            request(Method::POST, "/v1/tasks/complete", Some(&user), Some(completion("medium-blog", 0.9))),
        )
        .await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/v1/admin/accounts/user_audited", Some(&admin), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "user_audited");

        let (status, body) = send(
            &app,
            request(
                Method::GET,
                "/v1/admin/audit/events?user_id=user_audited&event_type=reward_confirmed",
                Some(&admin),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, _) = send(
            &app,
            request(Method::GET, "/v1/admin/audit/events?event_type=bogus", Some(&admin), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, request(Method::GET, "/v1/admin/stats", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_accounts"], 1);
        assert_eq!(body["pending_completions"], 0);
    }
}
