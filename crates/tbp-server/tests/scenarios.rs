// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios over the wired HTTP app.
//!
//! Each test drives the plane exactly the way an MCP client would: JSON-RPC
//! `tools/call` requests against `POST /mcp/` with a bearer token, asserting
//! on the shaped envelopes that come back.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tbp_app::EnforcementLevel;
use tbp_auth::{AuthInfo, StaticTokenValidator};
use tbp_server::{build_app, AppState, Backplane};
use tbp_storage::EnvironmentConfig;
use tower::ServiceExt;
use uuid::Uuid;

const TOKEN_A: &str = "token-user-a";
const TOKEN_B: &str = "token-user-b";

struct Harness {
    app: Router,
    backplane: Arc<Backplane>,
}

fn harness(level: EnforcementLevel) -> Harness {
    harness_with_auth(level, true)
}

fn harness_with_auth(level: EnforcementLevel, auth_enabled: bool) -> Harness {
    let backplane = Arc::new(Backplane::new(
        EnvironmentConfig::for_tests(),
        level,
        auth_enabled,
        None,
    ));
    let validator = StaticTokenValidator::new()
        .insert(TOKEN_A, AuthInfo::for_user("user-a"))
        .insert(TOKEN_B, AuthInfo::for_user("user-b"));
    let state = Arc::new(AppState {
        backplane: backplane.clone(),
        validator: Arc::new(validator),
        auth_enabled,
    });
    Harness {
        app: build_app(state),
        backplane,
    }
}

async fn post_rpc(harness: &Harness, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/mcp/")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = harness
        .app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Invoke one tool and return the (already shaped) envelope.
async fn call_tool(harness: &Harness, token: &str, tool: &str, arguments: Value) -> Value {
    let (status, response) = post_rpc(
        harness,
        Some(token),
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{response}");
    response["result"].clone()
}

/// Seed a project and branch for a user, returning `(project_id, branch_id)`.
async fn seed_branch(harness: &Harness, user: &str, branch_name: &str) -> (Uuid, Uuid) {
    let repos = &harness.backplane.repos;
    let projects = repos.project_repository(user);
    let project = match projects.list().await.unwrap().into_iter().next() {
        Some(existing) => existing,
        None => projects
            .create(tbp_core::Project::new(user, format!("proj-{user}")))
            .await
            .unwrap(),
    };
    let branch = repos
        .branch_repository(user)
        .create(tbp_core::GitBranch::new(project.id, user, branch_name))
        .await
        .unwrap();
    (project.id, branch.id)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_unauthenticated() {
    let harness = harness(EnforcementLevel::Warning);
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["database"]["status"], json!("connected"));
    assert_eq!(body["mcp_tools"], json!(true));
}

#[tokio::test]
async fn tool_endpoint_requires_bearer_token() {
    let harness = harness(EnforcementLevel::Warning);
    let (status, _) = post_rpc(
        &harness,
        None,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_rpc(
        &harness,
        Some("wrong-token"),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disabled_auth_rejects_tools_but_not_health() {
    let harness = harness_with_auth(EnforcementLevel::Warning, false);
    let (status, _) = post_rpc(
        &harness,
        Some(TOKEN_A),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_method_is_32601() {
    let harness = harness(EnforcementLevel::Warning);
    let (status, response) = post_rpc(
        &harness,
        Some(TOKEN_A),
        json!({"jsonrpc": "2.0", "id": 9, "method": "frobnicate"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(response["id"], json!(9));
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let harness = harness(EnforcementLevel::Warning);
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN_A}"))
        .body(Body::from("{this is not json"))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn initialize_and_tools_list_work() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, init) = post_rpc(
        &harness,
        Some(TOKEN_A),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(init["result"]["serverInfo"]["name"], json!("task-backplane"));

    let (_, tools) = post_rpc(
        &harness,
        Some(TOKEN_A),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"manage_task"));
    assert!(names.contains(&"manage_subtask"));
    assert!(names.contains(&"manage_context"));
    assert!(names.contains(&"manage_connection"));
}

// ---------------------------------------------------------------------------
// S1 — subtask inheritance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_subtask_inherits_parent_assignees() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;

    let created = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({
            "action": "create",
            "git_branch_id": branch.to_string(),
            "title": "Parent",
            "assignees": ["@coding-agent", "@test-orchestrator-agent"],
        }),
    )
    .await;
    assert_eq!(created["success"], json!(true), "{created}");
    let task_id = created["data"]["task"]["id"].as_str().unwrap().to_string();

    let subtask = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "create", "task_id": task_id, "title": "Child"}),
    )
    .await;
    assert_eq!(subtask["success"], json!(true), "{subtask}");
    assert_eq!(
        subtask["data"]["subtask"]["assignees"],
        json!(["@coding-agent", "@test-orchestrator-agent"])
    );
}

// ---------------------------------------------------------------------------
// S2 — strict enforcement blocks completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_strict_enforcement_blocks_completion() {
    let harness = harness(EnforcementLevel::Strict);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;

    let created = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch.to_string(), "title": "T"}),
    )
    .await;
    let task_id = created["data"]["task"]["id"].as_str().unwrap().to_string();

    let blocked = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "complete", "task_id": task_id}),
    )
    .await;
    assert_eq!(blocked["success"], json!(false));
    assert_eq!(blocked["error"]["code"], json!("ENFORCEMENT_BLOCKED"));
    assert_eq!(
        blocked["error"]["context"]["missing_required"],
        json!("completion_summary")
    );

    // The facade never ran: status unchanged.
    let fetched = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "get", "task_id": task_id}),
    )
    .await;
    assert_eq!(fetched["data"]["task"]["status"], json!("todo"));
}

// ---------------------------------------------------------------------------
// S3 — parameter coercion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_limit_coercion_on_search() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;
    for n in 0..5 {
        call_tool(
            &harness,
            TOKEN_A,
            "manage_task",
            json!({
                "action": "create",
                "git_branch_id": branch.to_string(),
                "title": format!("test item {n}"),
            }),
        )
        .await;
    }

    let capped = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "search", "query": "test", "limit": "3"}),
    )
    .await;
    assert_eq!(capped["success"], json!(true));
    assert!(capped["data"]["tasks"].as_array().unwrap().len() <= 3);

    let rejected = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "search", "query": "test", "limit": "abc"}),
    )
    .await;
    assert_eq!(rejected["success"], json!(false));
    assert_eq!(rejected["error"]["code"], json!("INVALID_PARAMETER_FORMAT"));
}

// ---------------------------------------------------------------------------
// S4 — user isolation of the "global" context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_global_context_is_per_user() {
    let harness = harness(EnforcementLevel::Warning);

    let a_created = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "global",
            "data": {"organization_name": "ACME"},
        }),
    )
    .await;
    assert_eq!(a_created["success"], json!(true), "{a_created}");
    let a_id = a_created["data"]["context"]["id"].as_str().unwrap().to_string();

    // B has no global context yet — and cannot see A's.
    let b_read = call_tool(
        &harness,
        TOKEN_B,
        "manage_context",
        json!({"action": "get", "level": "global"}),
    )
    .await;
    assert_eq!(b_read["success"], json!(false));
    assert_eq!(b_read["error"]["code"], json!("NOT_FOUND"));

    let b_created = call_tool(
        &harness,
        TOKEN_B,
        "manage_context",
        json!({"action": "create", "level": "global", "data": {}}),
    )
    .await;
    assert_eq!(b_created["success"], json!(true));
    let b_view = &b_created["data"]["context"];
    assert_ne!(b_view["id"].as_str().unwrap(), a_id);
    assert!(b_view
        .get("settings")
        .map_or(true, |s| s.get("organization_name").is_none()));
    assert!(!b_created.to_string().contains("ACME"));

    // Deterministic ids: the same user always sees the same id, and the
    // legacy shared singleton row never appears.
    let a_again = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({"action": "get", "level": "global", "context_id": "global_singleton"}),
    )
    .await;
    assert_eq!(a_again["data"]["context"]["id"].as_str().unwrap(), a_id);
    assert_ne!(a_id, "00000000-0000-0000-0000-000000000001");
}

// ---------------------------------------------------------------------------
// S5 — branch-scoped listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_list_is_branch_scoped() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, b1) = seed_branch(&harness, "user-a", "main").await;
    let (_, b2) = seed_branch(&harness, "user-a", "feature").await;

    for branch in [b1, b1, b2, b2] {
        call_tool(
            &harness,
            TOKEN_A,
            "manage_task",
            json!({"action": "create", "git_branch_id": branch.to_string(), "title": "t"}),
        )
        .await;
    }

    let scoped = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "list", "git_branch_id": b1.to_string()}),
    )
    .await;
    let tasks = scoped["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    for task in tasks {
        assert_eq!(task["git_branch_id"], json!(b1.to_string()));
    }

    let all = call_tool(&harness, TOKEN_A, "manage_task", json!({"action": "list"})).await;
    assert_eq!(all["data"]["tasks"].as_array().unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// S6 — hierarchical auto-creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_branch_context_auto_creates_ancestors() {
    let harness = harness(EnforcementLevel::Warning);
    let project_id = Uuid::new_v4();
    let branch_id = Uuid::new_v4();

    let created = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "branch",
            "context_id": branch_id.to_string(),
            "data": {"project_id": project_id.to_string()},
        }),
    )
    .await;
    assert_eq!(created["success"], json!(true), "{created}");

    // Global, project, and branch contexts all exist now, all owned by the
    // caller, all flagged auto-created.
    for (level, context_id) in [
        ("global", None),
        ("project", Some(project_id.to_string())),
        ("branch", Some(branch_id.to_string())),
    ] {
        let mut args = json!({"action": "get", "level": level});
        if let Some(id) = context_id {
            args["context_id"] = json!(id);
        }
        let fetched = call_tool(&harness, TOKEN_A, "manage_context", args).await;
        assert_eq!(fetched["success"], json!(true), "{level}: {fetched}");
        let view = &fetched["data"]["context"];
        assert_eq!(view["user_id"], json!("user-a"), "{level}");
        assert_eq!(view["metadata"]["auto_created"], json!(true), "{level}");
    }
}

// ---------------------------------------------------------------------------
// Cross-user isolation sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lists_never_leak_across_users() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch_a) = seed_branch(&harness, "user-a", "main").await;
    let (_, branch_b) = seed_branch(&harness, "user-b", "main").await;

    call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch_a.to_string(), "title": "a-secret"}),
    )
    .await;
    call_tool(
        &harness,
        TOKEN_B,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch_b.to_string(), "title": "b-stuff"}),
    )
    .await;

    let b_list = call_tool(&harness, TOKEN_B, "manage_task", json!({"action": "list"})).await;
    let tasks = b_list["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(!b_list.to_string().contains("a-secret"));

    let b_search = call_tool(
        &harness,
        TOKEN_B,
        "manage_task",
        json!({"action": "search", "query": "secret"}),
    )
    .await;
    assert_eq!(b_search["data"].get("tasks"), None, "{b_search}");
}

// ---------------------------------------------------------------------------
// Round-trip context payloads (invariant 5)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn context_payload_roundtrips_custom_keys() {
    let harness = harness(EnforcementLevel::Warning);
    let project_id = Uuid::new_v4();

    call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "project",
            "context_id": project_id.to_string(),
            "data": {
                "team_preferences": {"standup": "9am"},
                "a_custom_key": {"nested": [1, 2, 3]},
            },
        }),
    )
    .await;

    let fetched = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({"action": "get", "level": "project", "context_id": project_id.to_string()}),
    )
    .await;
    let settings = &fetched["data"]["context"]["settings"];
    assert_eq!(settings["team_preferences"]["standup"], json!("9am"));
    assert_eq!(settings["a_custom_key"]["nested"], json!([1, 2, 3]));
}

// ---------------------------------------------------------------------------
// Force-complete with subtasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_with_incomplete_subtasks_requires_force() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;

    let created = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch.to_string(), "title": "Parent"}),
    )
    .await;
    let task_id = created["data"]["task"]["id"].as_str().unwrap().to_string();

    call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "create", "task_id": task_id, "title": "child"}),
    )
    .await;

    let refused = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "complete", "task_id": task_id, "completion_summary": "done"}),
    )
    .await;
    assert_eq!(refused["success"], json!(false));
    assert_eq!(refused["error"]["code"], json!("VALIDATION_ERROR"));

    let forced = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({
            "action": "complete",
            "task_id": task_id,
            "completion_summary": "done",
            "force": "true",
        }),
    )
    .await;
    assert_eq!(forced["success"], json!(true), "{forced}");
    assert_eq!(forced["data"]["task"]["status"], json!("done"));

    let children = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "list", "task_id": task_id}),
    )
    .await;
    // A single child flattens to a scalar object in the shaped envelope.
    let child = &children["data"]["subtasks"];
    assert_eq!(child["status"], json!("done"), "{children}");
}

// ---------------------------------------------------------------------------
// Subtask lifecycle: update, get, complete, delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subtask_lifecycle_update_complete_and_delete() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;

    let created = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "create", "git_branch_id": branch.to_string(), "title": "Parent"}),
    )
    .await;
    let task_id = created["data"]["task"]["id"].as_str().unwrap().to_string();

    let subtask = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "create", "task_id": task_id, "title": "Child"}),
    )
    .await;
    let subtask_id = subtask["data"]["subtask"]["id"].as_str().unwrap().to_string();

    // String progress coerces and maps onto the status.
    let updated = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({
            "action": "update",
            "task_id": task_id,
            "subtask_id": subtask_id,
            "progress_percentage": "60",
        }),
    )
    .await;
    assert_eq!(updated["success"], json!(true), "{updated}");
    assert_eq!(updated["data"]["subtask"]["status"], json!("in_progress"));
    assert_eq!(updated["data"]["subtask"]["progress_percentage"], json!(60));

    let fetched = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "get", "task_id": task_id, "subtask_id": subtask_id}),
    )
    .await;
    assert_eq!(fetched["data"]["subtask"]["status"], json!("in_progress"));

    let completed = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({
            "action": "complete",
            "task_id": task_id,
            "subtask_id": subtask_id,
            "completion_summary": "wired and tested",
            "insights_found": ["helper already existed"],
        }),
    )
    .await;
    assert_eq!(completed["success"], json!(true), "{completed}");
    assert_eq!(completed["data"]["subtask"]["status"], json!("done"));
    assert_eq!(
        completed["data"]["subtask"]["completion_summary"],
        json!("wired and tested")
    );

    // With the only subtask done, the parent completes without force.
    let parent_done = call_tool(
        &harness,
        TOKEN_A,
        "manage_task",
        json!({"action": "complete", "task_id": task_id, "completion_summary": "all done"}),
    )
    .await;
    assert_eq!(parent_done["success"], json!(true), "{parent_done}");

    let deleted = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "delete", "task_id": task_id, "subtask_id": subtask_id}),
    )
    .await;
    assert_eq!(deleted["data"]["deleted"], json!(true));

    let gone = call_tool(
        &harness,
        TOKEN_A,
        "manage_subtask",
        json!({"action": "get", "task_id": task_id, "subtask_id": subtask_id}),
    )
    .await;
    assert_eq!(gone["error"]["code"], json!("NOT_FOUND"));
}

// ---------------------------------------------------------------------------
// Context update, insight, and delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn context_update_insight_and_delete_flow() {
    let harness = harness(EnforcementLevel::Warning);
    let (_, branch) = seed_branch(&harness, "user-a", "main").await;

    call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "global",
            "data": {"coding_standards": {"max_line": 100}},
        }),
    )
    .await;

    // Update deep-merges and bumps the version; propagation coerces from a
    // string.
    let updated = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "update",
            "level": "global",
            "data": {"coding_standards": {"tabs": false}},
            "propagate_changes": "true",
        }),
    )
    .await;
    assert_eq!(updated["success"], json!(true), "{updated}");
    assert_eq!(updated["data"]["context"]["version"], json!(1));
    assert_eq!(
        updated["data"]["context"]["settings"]["coding_standards"],
        json!({"max_line": 100, "tabs": false})
    );

    // Task context with an insight, then delete it.
    let task_id = Uuid::new_v4();
    call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "task",
            "context_id": task_id.to_string(),
            "data": {"branch_id": branch.to_string()},
        }),
    )
    .await;

    let insight = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "add_insight",
            "level": "task",
            "context_id": task_id.to_string(),
            "content": "index needed on user_id",
            "category": "performance",
        }),
    )
    .await;
    assert_eq!(insight["success"], json!(true), "{insight}");
    // A single insight flattens to its scalar in the shaped envelope.
    assert_eq!(
        insight["data"]["context"]["progress"]["insights"]["content"],
        json!("index needed on user_id")
    );

    let deleted = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "delete",
            "level": "task",
            "context_id": task_id.to_string(),
        }),
    )
    .await;
    assert_eq!(deleted["success"], json!(true), "{deleted}");

    let gone = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({"action": "get", "level": "task", "context_id": task_id.to_string()}),
    )
    .await;
    assert_eq!(gone["error"]["code"], json!("NOT_FOUND"));
}

// ---------------------------------------------------------------------------
// Context delegation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn context_delegate_promotes_fields_to_project() {
    let harness = harness(EnforcementLevel::Warning);
    let (project, branch) = seed_branch(&harness, "user-a", "main").await;

    call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "create",
            "level": "branch",
            "context_id": branch.to_string(),
            "data": {
                "project_id": project.to_string(),
                "naming_rules": {"case": "snake"},
            },
        }),
    )
    .await;

    let delegated = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "delegate",
            "level": "branch",
            "context_id": branch.to_string(),
            "delegate_to": "project",
            "delegate_fields": ["naming_rules"],
        }),
    )
    .await;
    assert_eq!(delegated["success"], json!(true), "{delegated}");
    assert!(delegated["data"]["source"]["settings"]
        .get("naming_rules")
        .is_none());
    assert_eq!(
        delegated["data"]["target"]["settings"]["naming_rules"]["case"],
        json!("snake")
    );

    // The promoted decision now lives on the project context.
    let project_ctx = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({"action": "get", "level": "project", "context_id": project.to_string()}),
    )
    .await;
    assert_eq!(
        project_ctx["data"]["context"]["settings"]["naming_rules"]["case"],
        json!("snake")
    );

    // And branches underneath inherit it back through the merged view.
    let merged = call_tool(
        &harness,
        TOKEN_A,
        "manage_context",
        json!({
            "action": "get",
            "level": "branch",
            "context_id": branch.to_string(),
            "include_inherited": "yes",
        }),
    )
    .await;
    assert_eq!(
        merged["data"]["context"]["settings"]["naming_rules"]["case"],
        json!("snake")
    );
}
