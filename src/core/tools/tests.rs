use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Echo;

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the arguments back"
    }
    fn parameter_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(json!({"args": args, "user": ctx.user_id}))
    }
}

/// Fails with context, succeeds without it.
struct ContextShy;

#[async_trait]
impl Tool for ContextShy {
    fn name(&self) -> &str {
        "context_shy"
    }
    fn description(&self) -> &str {
        "Only works with the simplified call shape"
    }
    async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Err(anyhow!("primary shape rejected"))
    }
    async fn invoke_without_context(&self, args: Value) -> Result<Value> {
        Ok(json!({"fallback": args}))
    }
}

struct AlwaysFails {
    fallback_calls: AtomicUsize,
}

#[async_trait]
impl Tool for AlwaysFails {
    fn name(&self) -> &str {
        "always_fails"
    }
    fn description(&self) -> &str {
        "Fails both ways"
    }
    async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Err(anyhow!("original failure"))
    }
    async fn invoke_without_context(&self, _args: Value) -> Result<Value> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("secondary failure"))
    }
}

struct GmailSend;

#[async_trait]
impl Tool for GmailSend {
    fn name(&self) -> &str {
        "gmail_send"
    }
    fn description(&self) -> &str {
        "Send an email"
    }
    fn integration(&self) -> Option<&str> {
        Some("gmail")
    }
    async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(json!({"success": false, "message": "quota exceeded"}))
    }
}

fn dispatcher() -> (ToolDispatcher, Arc<AlwaysFails>) {
    let failing = Arc::new(AlwaysFails {
        fallback_calls: AtomicUsize::new(0),
    });
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo));
    registry.register(Arc::new(ContextShy));
    registry.register(failing.clone());
    registry.register(Arc::new(GmailSend));
    (ToolDispatcher::new(Arc::new(registry)), failing)
}

fn ctx() -> ToolContext {
    ToolContext {
        agent_id: "a1".to_string(),
        user_id: "u1".to_string(),
    }
}

fn call(target: &str, args: Value) -> ToolDecision {
    ToolDecision {
        target: target.to_string(),
        args,
    }
}

#[tokio::test]
async fn unknown_tool_lists_available_names() {
    let (dispatcher, _) = dispatcher();
    let err = dispatcher
        .dispatch(&call("nope", json!({})), &ToolFilter::allow_all(), &ctx())
        .await
        .unwrap_err();
    match err {
        DispatchError::NotFound { name, available } => {
            assert_eq!(name, "nope");
            assert_eq!(
                available,
                vec!["echo", "context_shy", "always_fails", "gmail_send"]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn filter_rejects_tools_outside_permitted_set() {
    let (dispatcher, _) = dispatcher();
    let filter = ToolFilter::new(&["echo".to_string()], &[]);
    let err = dispatcher
        .dispatch(&call("context_shy", json!({})), &filter, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotPermitted { .. }));
}

#[tokio::test]
async fn missing_integration_is_reported() {
    let (dispatcher, _) = dispatcher();
    let err = dispatcher
        .dispatch(
            &call("gmail_send", json!({})),
            &ToolFilter::new(&[], &[]),
            &ctx(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingIntegration { ref integration, .. } if integration == "gmail"));
}

#[tokio::test]
async fn args_are_cleaned_and_context_passed() {
    let (dispatcher, _) = dispatcher();
    let out = dispatcher
        .dispatch(
            &call("echo", json!({"text": "hi", "skip": null, "nested": {"gone": null, "kept": 1}})),
            &ToolFilter::allow_all(),
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(out["args"], json!({"text": "hi", "nested": {"kept": 1}}));
    assert_eq!(out["user"], "u1");
}

#[tokio::test]
async fn falls_back_to_simplified_call_shape() {
    let (dispatcher, _) = dispatcher();
    let out = dispatcher
        .dispatch(&call("context_shy", json!({"x": 1})), &ToolFilter::allow_all(), &ctx())
        .await
        .unwrap();
    assert_eq!(out, json!({"fallback": {"x": 1}}));
}

#[tokio::test]
async fn original_error_surfaces_when_fallback_also_fails() {
    let (dispatcher, failing) = dispatcher();
    let err = dispatcher
        .dispatch(&call("always_fails", json!({})), &ToolFilter::allow_all(), &ctx())
        .await
        .unwrap_err();
    assert_eq!(failing.fallback_calls.load(Ordering::SeqCst), 1);
    assert!(err.to_string().contains("original failure"));
    assert!(!err.to_string().contains("secondary"));
}

#[tokio::test]
async fn in_band_failure_is_an_error() {
    let (dispatcher, _) = dispatcher();
    let err = dispatcher
        .dispatch(&call("gmail_send", json!({})), &ToolFilter::allow_all(), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InBand { ref message, .. } if message == "quota exceeded"));
}

#[test]
fn in_band_error_detection() {
    assert_eq!(
        in_band_error(&json!("Error: upstream 500")),
        Some("Error: upstream 500".to_string())
    );
    assert_eq!(in_band_error(&json!({"error": "boom"})), Some("boom".to_string()));
    assert_eq!(in_band_error(&json!({"error": null, "data": 1})), None);
    assert_eq!(in_band_error(&json!({"error": false})), None);
    assert!(in_band_error(&json!({"success": false})).is_some());
    assert_eq!(in_band_error(&json!({"success": true, "items": []})), None);
    assert_eq!(in_band_error(&json!("all good")), None);
}

#[test]
fn catalog_respects_filter_and_lists_parameters() {
    let (dispatcher, _) = dispatcher();
    let filter = ToolFilter::new(&["echo".to_string(), "gmail_send".to_string()], &[]);
    let catalog = dispatcher.registry().catalog(&filter);
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].name, "echo");
    assert_eq!(catalog[0].parameters, vec!["text"]);
    assert!(render_catalog(&catalog).contains("- echo: Echo the arguments back (args: text)"));
}

#[test]
fn registering_same_name_replaces_in_place() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo));
    registry.register(Arc::new(ContextShy));
    registry.register(Arc::new(Echo));
    assert_eq!(registry.names(), vec!["echo", "context_shy"]);
}
