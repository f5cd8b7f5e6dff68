mod e2e_harness;

use axum::http::{Method, StatusCode};
use serde_json::json;

use agentloom::core::agent::{LogStatus, Repeat, RunRequest};
use agentloom::core::scheduler::{self, JobQueue, RecurringJob};
use agentloom::core::supervisor::RunOutcome;
use e2e_harness::{Harness, MockReply, TestResult};

macro_rules! harness {
    ($replies:expr) => {
        match Harness::start($replies).await? {
            Some(h) => h,
            None => return Ok(()),
        }
    };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_email_run_forces_exactly_one_send() -> TestResult<()> {
    let h = harness!(vec![]);
    h.llm
        .set_fallback(r#"{"type": "tool", "target": "github_issues", "args": {"state": "open"}}"#);
    let id = h
        .create_agent(
            "u1",
            json!({
                "name": "digest",
                "systemPrompt": "Collect open issues and email a digest to lead@example.com."
            }),
        )
        .await?;

    let result = h.runtime.supervisor.run(RunRequest::new(&id, "u1")).await;

    assert!(matches!(result.outcome, RunOutcome::Reply { acted: false, .. }));
    assert_eq!(h.issues.calls().len(), 8);
    let sends = h.mailer.calls();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["to"], "lead@example.com");
    assert!(sends[0]["body"].as_str().unwrap().contains("Crash on start"));

    let agent = h.agent(&id).await?;
    assert_eq!(agent.log.len(), 1);
    assert_eq!(agent.log[0].steps.len(), 9);
    assert!(agent.last_run_at.is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webhook_reaches_only_the_owning_agent() -> TestResult<()> {
    let h = harness!(vec![]);
    let owner = h
        .create_agent("u1", json!({ "name": "payments", "systemPrompt": "Reconcile payments." }))
        .await?;
    let other = h
        .create_agent("u2", json!({ "name": "spy", "systemPrompt": "Watch everything." }))
        .await?;

    let (status, _) = h
        .request(
            Method::POST,
            &format!("/api/agents/{}/triggers", owner),
            Some("u1"),
            Some(json!({
                "type": "webhook",
                "config": { "webhookPath": "abc123" },
                "condition": { "amount": { "$gte": 10 } }
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = h
        .request(
            Method::POST,
            &format!("/api/agents/{}/triggers", other),
            Some("u2"),
            Some(json!({ "type": "integration_event", "config": { "pattern": "*" } })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = h
        .request(Method::POST, "/api/webhooks/abc123", None, Some(json!({ "amount": 42 })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let matched = body["matched"].as_array().unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0]["agent_id"], owner.as_str());

    let agent = h.wait_for_log(&owner, 1).await?;
    assert_eq!(agent.log[0].status, LogStatus::Completed);
    assert!(h.agent(&other).await?.log.is_empty());

    let first_call = &h.llm.requests()[0];
    assert!(first_call.iter().any(|m| m.content.contains("abc123")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webhook_condition_failure_starts_nothing() -> TestResult<()> {
    let h = harness!(vec![]);
    let id = h
        .create_agent("u1", json!({ "name": "payments", "systemPrompt": "Reconcile payments." }))
        .await?;
    h.request(
        Method::POST,
        &format!("/api/agents/{}/triggers", id),
        Some("u1"),
        Some(json!({
            "type": "webhook",
            "config": { "webhookPath": "small" },
            "condition": { "amount": { "$gte": 100 } }
        })),
    )
    .await?;

    let (_, body) = h
        .request(Method::POST, "/api/webhooks/small", None, Some(json!({ "amount": 5 })))
        .await?;
    assert!(body["matched"].as_array().unwrap().is_empty());
    assert_eq!(h.llm.request_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleting_an_agent_removes_every_recurring_entry() -> TestResult<()> {
    let h = harness!(vec![]);
    let id = h
        .create_agent(
            "u1",
            json!({
                "name": "nightly",
                "systemPrompt": "Check the backups.",
                "schedule": { "enabled": true, "interval_minutes": 60 }
            }),
        )
        .await?;
    // A stale entry left behind by an earlier re-schedule.
    let agent = h.agent(&id).await?;
    h.queue
        .add_recurring(RecurringJob::for_agent(&agent, Repeat::Cron("0 0 * * *".to_string())))
        .await?;
    assert_eq!(scheduler::entries_for_agent(h.queue.as_ref(), &id).await?.len(), 2);

    let (status, body) = h
        .request(Method::DELETE, &format!("/api/agents/{}", id), Some("u1"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["recurring_entries_removed"], 2);
    assert!(scheduler::entries_for_agent(h.queue.as_ref(), &id).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limited_model_is_retried_then_succeeds() -> TestResult<()> {
    let h = harness!(vec![
        MockReply::Status(429),
        MockReply::Status(503),
        MockReply::text("Backups look healthy."),
    ]);
    let id = h
        .create_agent("u1", json!({ "name": "nightly", "systemPrompt": "Check the backups." }))
        .await?;

    let (status, body) = h
        .request(Method::POST, &format!("/api/agents/{}/run", id), Some("u1"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["attempts"], 3);
    assert_eq!(body["result"]["outcome"]["text"], "Backups look healthy.");
    assert_eq!(h.llm.request_count(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_caller_is_refused_without_a_model_call() -> TestResult<()> {
    let h = harness!(vec![]);
    let id = h
        .create_agent("u1", json!({ "name": "private", "systemPrompt": "Do private things." }))
        .await?;

    let (_, body) = h
        .request(Method::POST, &format!("/api/agents/{}/run", id), Some("u2"), None)
        .await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["result"]["outcome"]["error_kind"], "unauthorized");
    assert_eq!(h.llm.request_count(), 0);
    assert!(h.agent(&id).await?.log.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delegation_reports_partial_when_one_candidate_is_unknown() -> TestResult<()> {
    let h = harness!(vec![]);
    let a = h
        .create_agent("u1", json!({ "name": "alpha", "systemPrompt": "Answer questions." }))
        .await?;
    let b = h
        .create_agent("u1", json!({ "name": "beta", "systemPrompt": "Answer questions." }))
        .await?;

    let (status, body) = h
        .request(
            Method::POST,
            "/api/delegate",
            Some("u1"),
            Some(json!({ "instruction": "Summarize the week" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let (_, body) = h
        .request(
            Method::POST,
            "/api/delegate",
            Some("u1"),
            Some(json!({
                "instruction": "Summarize the week",
                "preferredAgents": [a, "missing", b],
                "timeout": 5000
            })),
        )
        .await?;
    assert_eq!(body["status"], "partial");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[1]["agentId"], "missing");
    assert_eq!(results[1]["status"], "failed");
    assert!(body["totalTime"].is_u64());
    Ok(())
}
