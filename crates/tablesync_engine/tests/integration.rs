//! End-to-end tests of the sync context against the fake table service.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tablesync_engine::{
    Method, OperationErrorAction, PushScope, PushStatus, Query, SyncError, SyncHandler,
    SyncState, TableOperationError, TableOperationKind, TransportError,
};
use tablesync_protocol::system;
use tablesync_store::{LocalStore, MemoryStore, StoreError, StoreResult};
use tablesync_testkit::prelude::*;
use tokio::sync::Notify;

fn body_id(request: &tablesync_engine::RemoteRequest) -> Value {
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    body["id"].clone()
}

fn push_errors(error: &SyncError) -> Vec<TableOperationError> {
    error.push_result().unwrap().operation_errors.clone()
}

// ------------------------------------------------------------------
// Push
// ------------------------------------------------------------------

#[tokio::test]
async fn push_replays_in_queue_order_with_feature_marker() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("abc", "first")).await.unwrap();
    context.insert("todo", todo("def", "second")).await.unwrap();

    let result = context.push().await.unwrap();
    assert_eq!(result.status, PushStatus::Complete);
    assert_eq!(result.pushed, 2);

    let requests = context.transport().requests();
    assert_eq!(request_summary(&requests), ["POST todo", "POST todo"]);
    assert_eq!(body_id(&requests[0]), json!("abc"));
    assert_eq!(body_id(&requests[1]), json!("def"));
    for request in &requests {
        assert_eq!(request.header("X-ZUMO-FEATURES"), Some("OL"));
    }

    assert_eq!(context.pending_count(None).await, 0);
    let local = context.lookup("todo", "abc").await.unwrap().unwrap();
    assert_eq!(local[system::VERSION], json!("1"));
    assert_eq!(context.state(), SyncState::Synced);
    assert_eq!(context.stats().operations_pushed, 2);
}

#[tokio::test]
async fn insert_then_delete_sends_nothing() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "gone soon")).await.unwrap();
    context.delete("todo", "a").await.unwrap();

    assert_eq!(context.pending_count(None).await, 0);
    assert!(context.lookup("todo", "a").await.unwrap().is_none());

    let result = context.push().await.unwrap();
    assert_eq!(result.pushed, 0);
    assert_eq!(context.transport().request_count(), 0);
}

#[tokio::test]
async fn insert_then_update_sends_one_insert_with_latest_item() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "draft")).await.unwrap();
    context.update("todo", todo("a", "final")).await.unwrap();

    let pending = context.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, TableOperationKind::Insert);

    context.push().await.unwrap();
    assert_eq!(request_summary(&context.transport().requests()), ["POST todo"]);
    assert_eq!(context.transport().item("todo", "a").unwrap()["text"], json!("final"));
}

#[tokio::test]
async fn update_then_delete_sends_one_delete() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "server")]);
    let context = memory_context(service).await;
    context.pull(&Query::new("todo")).await.unwrap();
    context.transport().clear_requests();

    let mut item = context.lookup("todo", "a").await.unwrap().unwrap();
    item.insert("text".into(), json!("edited"));
    context.update("todo", item).await.unwrap();
    context.delete("todo", "a").await.unwrap();

    context.push().await.unwrap();
    assert_eq!(request_summary(&context.transport().requests()), ["DELETE todo/a"]);
    assert!(context.transport().item("todo", "a").is_none());
}

#[tokio::test]
async fn update_sends_if_match_from_local_version() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "server")]);
    let context = memory_context(service).await;
    context.pull(&Query::new("todo")).await.unwrap();
    context.transport().clear_requests();

    let mut item = context.lookup("todo", "a").await.unwrap().unwrap();
    item.insert("text".into(), json!("edited"));
    context.update("todo", item).await.unwrap();
    context.push().await.unwrap();

    let requests = context.transport().requests();
    assert_eq!(requests[0].method, Method::Patch);
    assert_eq!(requests[0].header("If-Match"), Some("\"1\""));
    let local = context.lookup("todo", "a").await.unwrap().unwrap();
    assert_eq!(local[system::VERSION], json!("2"));
}

#[tokio::test]
async fn conflict_is_recorded_and_cycle_continues() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let context = memory_context(service).await;
    for id in ["a", "b", "c"] {
        context.insert("todo", todo(id, "local")).await.unwrap();
    }

    let error = context.push().await.unwrap_err();
    assert!(matches!(error, SyncError::PushCompletedWithErrors(_)));
    let result = error.push_result().unwrap();
    assert_eq!(result.status, PushStatus::Complete);
    assert_eq!(result.pushed, 2);

    let errors = push_errors(&error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].item_id, "b");
    assert_eq!(errors[0].status, Some(409));
    assert!(errors[0].is_conflict());
    assert_eq!(
        errors[0].server_item.as_ref().unwrap()["text"],
        json!("server copy")
    );

    assert_eq!(context.pending_count(None).await, 1);
    let recorded = context.operation_errors().await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].id, errors[0].id);
    assert_eq!(recorded[0].server_item, errors[0].server_item);
    assert!(context.transport().item("todo", "c").is_some());
    assert_eq!(context.state(), SyncState::Error);
}

#[tokio::test]
async fn cancel_and_update_resolves_conflict() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let context = memory_context(service).await;
    context.insert("todo", todo("b", "local")).await.unwrap();

    let error = context.push().await.unwrap_err();
    let recorded = push_errors(&error).remove(0);
    let server_item = recorded.server_item.clone().unwrap();

    context.cancel_and_update(&recorded, server_item).await.unwrap();
    assert_eq!(context.pending_count(None).await, 0);
    assert!(context.operation_errors().await.unwrap().is_empty());
    let local = context.lookup("todo", "b").await.unwrap().unwrap();
    assert_eq!(local["text"], json!("server copy"));

    assert!(context.push().await.is_ok());
}

#[tokio::test]
async fn cancel_and_discard_drops_local_item() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "v1")]);
    let context = memory_context(service).await;
    context.pull(&Query::new("todo")).await.unwrap();
    context.transport().seed("todo", [todo("a", "v2 from elsewhere")]);

    let mut item = context.lookup("todo", "a").await.unwrap().unwrap();
    item.insert("text".into(), json!("mine"));
    context.update("todo", item).await.unwrap();

    let error = context.push().await.unwrap_err();
    let recorded = push_errors(&error).remove(0);
    assert_eq!(recorded.status, Some(412));

    context.cancel_and_discard(&recorded).await.unwrap();
    assert_eq!(context.pending_count(None).await, 0);
    assert!(context.lookup("todo", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn stale_error_cannot_cancel_collapsed_operation() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let context = memory_context(service).await;
    context.insert("todo", todo("b", "local")).await.unwrap();

    let error = context.push().await.unwrap_err();
    let recorded = push_errors(&error).remove(0);

    context.update("todo", todo("b", "edited again")).await.unwrap();
    assert!(context.operation_errors().await.unwrap().is_empty());

    let outcome = context.cancel_and_discard(&recorded).await;
    assert!(matches!(outcome, Err(SyncError::OperationChanged)));
    assert_eq!(context.pending_count(None).await, 1);
}

#[tokio::test]
async fn network_failure_aborts_and_retry_resumes() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "one")).await.unwrap();
    context.insert("todo", todo("b", "two")).await.unwrap();
    context
        .transport()
        .fail_next(Fault::Transport(TransportError::Connection("offline".into())));

    let error = context.push().await.unwrap_err();
    assert!(matches!(error, SyncError::PushAborted { .. }));
    assert!(error.is_retryable());
    let result = error.push_result().unwrap();
    assert_eq!(result.status, PushStatus::CancelledByNetworkError);
    assert_eq!(result.pushed, 0);
    assert!(result.operation_errors.is_empty());
    assert_eq!(context.pending_count(None).await, 2);
    assert_eq!(context.transport().request_count(), 1);

    let result = context.push().await.unwrap();
    assert_eq!(result.pushed, 2);
    let ids: Vec<Value> = context.transport().requests()[1..].iter().map(body_id).collect();
    assert_eq!(ids, [json!("a"), json!("b")]);
}

#[tokio::test]
async fn authentication_failure_stops_at_failing_operation() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "one")).await.unwrap();
    context.delete("todo", "z").await.unwrap();
    context.insert("todo", todo("c", "three")).await.unwrap();
    context
        .transport()
        .fail_next_on(Method::Delete, Fault::Status(401));

    let error = context.push().await.unwrap_err();
    let result = error.push_result().unwrap();
    assert_eq!(result.status, PushStatus::CancelledByAuthenticationError);
    assert_eq!(result.pushed, 1);
    assert_eq!(context.transport().request_count(), 2);
    assert_eq!(context.pending_count(None).await, 2);
    assert!(context.operation_errors().await.unwrap().is_empty());

    // The retried delete finds nothing on the service, which counts as done.
    let result = context.push().await.unwrap();
    assert_eq!(result.pushed, 2);
    assert_eq!(context.pending_count(None).await, 0);
}

#[tokio::test]
async fn push_tables_leaves_other_tables_queued() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "todo")).await.unwrap();
    context.insert("notes", todo("b", "note")).await.unwrap();

    let result = context.push_tables(&["notes"]).await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(context.pending_count(Some("todo")).await, 1);
    assert_eq!(context.pending_count(Some("notes")).await, 0);
    assert_eq!(request_summary(&context.transport().requests()), ["POST notes"]);
}

// ------------------------------------------------------------------
// Handlers
// ------------------------------------------------------------------

#[derive(Default)]
struct DiscardingHandler {
    completions: AtomicUsize,
}

#[async_trait::async_trait]
impl SyncHandler for DiscardingHandler {
    fn on_operation_error(&self, _error: &TableOperationError) -> OperationErrorAction {
        OperationErrorAction::Discard
    }

    async fn on_push_complete(&self, _result: &tablesync_engine::PushCompletionResult) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn discarding_handler_drops_refused_operations() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let handler = Arc::new(DiscardingHandler::default());
    let context = memory_context_with(test_config(), service, handler.clone()).await;
    context.insert("todo", todo("b", "local")).await.unwrap();

    let error = context.push().await.unwrap_err();
    assert_eq!(push_errors(&error).len(), 1);
    assert_eq!(context.pending_count(None).await, 0);
    assert!(context.operation_errors().await.unwrap().is_empty());
    // The local copy is left as it was.
    let local = context.lookup("todo", "b").await.unwrap().unwrap();
    assert_eq!(local["text"], json!("local"));
    assert_eq!(handler.completions.load(Ordering::SeqCst), 1);
}

struct StampingHandler;

#[async_trait::async_trait]
impl SyncHandler for StampingHandler {
    async fn execute_table_operation(
        &self,
        executor: &dyn tablesync_engine::OperationExecutor,
    ) -> tablesync_engine::RemoteResult<Option<tablesync_engine::Record>> {
        match executor.operation().item.clone() {
            Some(mut item) => {
                item.insert("stamped".into(), json!(true));
                executor.execute_with(item).await
            }
            None => executor.execute().await,
        }
    }
}

#[tokio::test]
async fn handler_can_replace_the_pushed_item() {
    let context =
        memory_context_with(test_config(), FakeTableService::new(), Arc::new(StampingHandler)).await;
    context.insert("todo", todo("a", "plain")).await.unwrap();
    context.push().await.unwrap();

    assert_eq!(context.transport().item("todo", "a").unwrap()["stamped"], json!(true));
    let local = context.lookup("todo", "a").await.unwrap().unwrap();
    assert_eq!(local["stamped"], json!(true));
}

// ------------------------------------------------------------------
// Local mutations
// ------------------------------------------------------------------

#[tokio::test]
async fn queue_conflicts_are_rejected_without_local_effect() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "one")).await.unwrap();

    let duplicate = context.insert("todo", todo("a", "again")).await;
    assert!(matches!(
        duplicate,
        Err(SyncError::QueueConflict {
            existing: TableOperationKind::Insert,
            incoming: TableOperationKind::Insert,
            ..
        })
    ));
    let local = context.lookup("todo", "a").await.unwrap().unwrap();
    assert_eq!(local["text"], json!("one"));

    context.push().await.unwrap();
    context.delete("todo", "a").await.unwrap();
    let update = context.update("todo", todo("a", "zombie")).await;
    assert!(matches!(update, Err(SyncError::QueueConflict { .. })));
    assert!(context.lookup("todo", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn insert_of_existing_local_item_is_rejected() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "server")]);
    let context = memory_context(service).await;
    context.pull(&Query::new("todo")).await.unwrap();

    let outcome = context.insert("todo", todo("a", "local")).await;
    assert!(matches!(outcome, Err(SyncError::ItemAlreadyExists { .. })));
    assert_eq!(context.pending_count(None).await, 0);
}

#[tokio::test]
async fn insert_assigns_missing_id() {
    let context = memory_context(FakeTableService::new()).await;
    let stored = context
        .insert("todo", record(json!({ "text": "anonymous" })))
        .await
        .unwrap();
    let id = stored["id"].as_str().unwrap();
    assert_eq!(id.len(), 36);
    assert!(context.lookup("todo", id).await.unwrap().is_some());
}

#[tokio::test]
async fn reserved_tables_are_not_writable() {
    let context = memory_context(FakeTableService::new()).await;
    let outcome = context.insert(system::OPERATIONS_TABLE, todo("a", "x")).await;
    assert!(matches!(outcome, Err(SyncError::InvalidItem(_))));
    let outcome = context.update("todo", record(json!({ "text": "no id" }))).await;
    assert!(matches!(outcome, Err(SyncError::InvalidItem(_))));
}

#[tokio::test]
async fn queue_survives_reopening_the_store() {
    let temp = TempStore::new();
    {
        let context = temp.context(FakeTableService::new()).await;
        context.insert("todo", todo("a", "draft")).await.unwrap();
        context.update("todo", todo("a", "final")).await.unwrap();
        context.insert("todo", todo("b", "second")).await.unwrap();
    }

    let context = temp.context(FakeTableService::new()).await;
    let pending = context.pending_operations().await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].item_id, "a");
    assert_eq!(pending[0].kind, TableOperationKind::Insert);

    context.push().await.unwrap();
    assert_eq!(context.transport().item("todo", "a").unwrap()["text"], json!("final"));
    assert_eq!(context.store().count(&Query::new(system::OPERATIONS_TABLE)).await.unwrap(), 0);
}

// ------------------------------------------------------------------
// Pull
// ------------------------------------------------------------------

#[tokio::test]
async fn pull_pushes_pending_operations_once_first() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("s1", "server")]);
    let context = memory_context(service).await;
    context.insert("todo", todo("l1", "local")).await.unwrap();

    let result = context.pull(&Query::new("todo")).await.unwrap();
    assert!(result.pushed_before);
    assert_eq!(context.transport().request_count_for(Method::Post), 1);
    assert_eq!(request_summary(&context.transport().requests())[0], "POST todo");

    let local = context.read(&Query::new("todo")).await.unwrap();
    assert_eq!(local.len(), 2);
}

#[tokio::test]
async fn clean_pull_does_not_push() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "x"), todo("b", "y")]);
    let context = memory_context(service).await;

    let result = context.pull(&Query::new("todo")).await.unwrap();
    assert!(!result.pushed_before);
    assert_eq!(result.upserted, 2);
    assert_eq!(context.transport().request_count_for(Method::Post), 0);
    assert_eq!(context.transport().request_count_for(Method::Get), result.pages);
}

#[tokio::test]
async fn pull_fails_when_preceding_push_fails() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "x")).await.unwrap();
    context
        .transport()
        .fail_next(Fault::Transport(TransportError::Timeout));

    let outcome = context.pull(&Query::new("todo")).await;
    assert!(matches!(outcome, Err(SyncError::PullFailedDueToPush(_))));
    assert_eq!(context.transport().request_count_for(Method::Get), 0);
    assert_eq!(context.pending_count(None).await, 1);
}

#[tokio::test]
async fn pull_pages_through_results() {
    let service = FakeTableService::new();
    let records: Vec<_> = (0..7).map(|i| todo(&format!("item{i}"), "x")).collect();
    service.seed("todo", records);
    let context = SyncContextBuilder::pages_of(3, service).await;

    let result = context.pull(&Query::new("todo")).await.unwrap();
    assert_eq!(result.upserted, 7);
    // Three full or partial pages, then an empty one.
    assert_eq!(result.pages, 4);
    for request in context.transport().requests() {
        assert!(request.url.contains("$top=3"));
    }
}

#[tokio::test]
async fn pull_applies_remote_deletes_and_keeps_unmatched_rows() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "x"), todo("b", "y"), todo("c", "x")]);
    let context = memory_context(service).await;
    context.pull(&Query::new("todo")).await.unwrap();

    context.transport().delete_on_service("todo", "c");
    let result = context
        .pull(&Query::new("todo").where_eq("text", "x"))
        .await
        .unwrap();
    assert_eq!(result.deleted, 1);
    assert!(context.lookup("todo", "c").await.unwrap().is_none());
    assert!(context.lookup("todo", "b").await.unwrap().is_some());
}

#[tokio::test]
async fn pull_rejects_select() {
    let context = memory_context(FakeTableService::new()).await;
    let outcome = context.pull(&Query::new("todo").select(["text"])).await;
    assert!(matches!(outcome, Err(SyncError::InvalidQuery(_))));
    assert_eq!(context.transport().request_count(), 0);
}

#[tokio::test]
async fn table_scope_pull_leaves_other_tables_queued() {
    let config = test_config().with_pull_push_scope(PushScope::Table);
    let context = memory_context_with(
        config,
        FakeTableService::new(),
        Arc::new(tablesync_engine::PassthroughHandler),
    )
    .await;
    context.insert("notes", todo("n", "note")).await.unwrap();

    let result = context.pull(&Query::new("todo")).await.unwrap();
    assert!(!result.pushed_before);
    assert_eq!(context.pending_count(Some("notes")).await, 1);
}

#[tokio::test]
async fn incremental_pull_resumes_from_saved_token() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "x"), todo("b", "y")]);
    let context = memory_context(service).await;

    let first = context
        .pull_incremental("everything", &Query::new("todo"))
        .await
        .unwrap();
    assert_eq!(first.upserted, 2);
    let token = context
        .store()
        .lookup(system::INCREMENTAL_PULL_TABLE, "todo_everything")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token["maxupdateddate"], json!("2024-01-01T00:00:00.002Z"));

    context.transport().seed("todo", [todo("c", "z")]);
    context.transport().delete_on_service("todo", "a");
    context.transport().clear_requests();

    context
        .pull_incremental("everything", &Query::new("todo"))
        .await
        .unwrap();
    let first_url = &context.transport().requests()[0].url;
    assert!(first_url.contains(&*urlencoding::encode(
        "(__updatedAt ge datetimeoffset'2024-01-01T00:00:00.002Z')"
    )));
    assert!(context.lookup("todo", "c").await.unwrap().is_some());
    assert!(context.lookup("todo", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn incremental_pull_validates_arguments() {
    let context = memory_context(FakeTableService::new()).await;
    let bad_id = context.pull_incremental("1bad", &Query::new("todo")).await;
    assert!(matches!(bad_id, Err(SyncError::InvalidQueryId(_))));

    let paged = context
        .pull_incremental("ok", &Query::new("todo").top(5))
        .await;
    assert!(matches!(paged, Err(SyncError::InvalidQuery(_))));
}

// ------------------------------------------------------------------
// Purge
// ------------------------------------------------------------------

#[tokio::test]
async fn purge_refuses_tables_with_pending_operations() {
    let context = memory_context(FakeTableService::new()).await;
    context.insert("todo", todo("a", "x")).await.unwrap();

    let outcome = context.purge(&Query::new("todo"), None).await;
    assert!(matches!(outcome, Err(SyncError::PendingOperations { .. })));
    assert!(context.lookup("todo", "a").await.unwrap().is_some());
    assert_eq!(context.transport().request_count(), 0);
}

#[tokio::test]
async fn purge_removes_rows_and_tokens_without_network() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "x"), todo("b", "y")]);
    let context = memory_context(service).await;
    context.pull_incremental("all", &Query::new("todo")).await.unwrap();
    context.transport().clear_requests();

    let deleted = context.purge(&Query::new("todo"), None).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(context.transport().request_count(), 0);
    assert!(context
        .store()
        .lookup(system::INCREMENTAL_PULL_TABLE, "todo_all")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn force_purge_clears_queue_and_errors() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let context = memory_context(service).await;
    context.insert("todo", todo("b", "local")).await.unwrap();
    context.push().await.unwrap_err();
    assert_eq!(context.operation_errors().await.unwrap().len(), 1);
    let requests_before = context.transport().request_count();

    context.force_purge(&Query::new("todo"), None).await.unwrap();
    assert_eq!(context.pending_count(None).await, 0);
    assert!(context.operation_errors().await.unwrap().is_empty());
    assert!(context.read(&Query::new("todo")).await.unwrap().is_empty());
    assert_eq!(context.transport().request_count(), requests_before);
}

#[tokio::test]
async fn table_handle_scopes_queries() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("a", "x"), todo("b", "y")]);
    let context = memory_context(service).await;
    let table = context.table("todo");

    table.pull(None).await.unwrap();
    let rows = table
        .read(Some(Query::new("ignored").where_eq("text", "y")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    table.insert(todo("c", "z")).await.unwrap();
    assert_eq!(table.pending_count().await, 1);
    table.push().await.unwrap();
    assert_eq!(table.purge(None, None).await.unwrap(), 3);
}

#[tokio::test]
async fn clearing_errors_keeps_the_queue() {
    let service = FakeTableService::new();
    service.seed("todo", [todo("b", "server copy")]);
    let context = memory_context(service).await;
    context.insert("todo", todo("b", "local")).await.unwrap();
    context.push().await.unwrap_err();
    assert_eq!(context.operation_errors().await.unwrap().len(), 1);

    context.clear_operation_errors().await.unwrap();
    assert!(context.operation_errors().await.unwrap().is_empty());
    assert!(context
        .store()
        .read(&Query::new(system::ERRORS_TABLE))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(context.pending_count(Some("todo")).await, 1);
}

// ------------------------------------------------------------------
// Local store failures
// ------------------------------------------------------------------

/// A memory store whose writes to one table fail on demand.
#[derive(Default)]
struct FailingStore {
    inner: MemoryStore,
    failing: parking_lot::Mutex<Option<String>>,
}

impl FailingStore {
    fn fail_writes_to(&self, table: &str) {
        *self.failing.lock() = Some(table.to_string());
    }

    fn recover(&self) {
        *self.failing.lock() = None;
    }

    fn check(&self, table: &str) -> StoreResult<()> {
        match self.failing.lock().as_deref() {
            Some(failing) if failing == table => Err(StoreError::Io(std::io::Error::other("disk full"))),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl LocalStore for FailingStore {
    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<tablesync_engine::Record>> {
        self.inner.lookup(table, id).await
    }

    async fn read(&self, query: &Query) -> StoreResult<Vec<tablesync_engine::Record>> {
        self.inner.read(query).await
    }

    async fn count(&self, query: &Query) -> StoreResult<u64> {
        self.inner.count(query).await
    }

    async fn upsert(&self, table: &str, records: &[tablesync_engine::Record]) -> StoreResult<()> {
        self.check(table)?;
        self.inner.upsert(table, records).await
    }

    async fn delete(&self, table: &str, ids: &[String]) -> StoreResult<()> {
        self.check(table)?;
        self.inner.delete(table, ids).await
    }

    async fn delete_query(&self, query: &Query) -> StoreResult<u64> {
        self.check(&query.table)?;
        self.inner.delete_query(query).await
    }

    async fn tables(&self) -> StoreResult<Vec<String>> {
        self.inner.tables().await
    }
}

async fn failing_context() -> tablesync_engine::SyncContext<FakeTableService, FailingStore> {
    tablesync_engine::SyncContext::new(test_config(), FakeTableService::new(), FailingStore::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn insert_leaves_no_local_row_when_queue_write_fails() {
    let context = failing_context().await;
    context.store().fail_writes_to(system::OPERATIONS_TABLE);

    let error = context.insert("todo", todo("a", "x")).await.unwrap_err();
    assert!(matches!(error, SyncError::Store(StoreError::Io(_))));
    assert!(context.lookup("todo", "a").await.unwrap().is_none());
    assert_eq!(context.pending_count(None).await, 0);

    context.store().recover();
    context.insert("todo", todo("a", "x")).await.unwrap();
    let result = context.push().await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(request_summary(&context.transport().requests()), ["POST todo"]);
}

#[tokio::test]
async fn failed_local_write_restores_queued_operation() {
    let context = failing_context().await;
    context.insert("todo", todo("a", "draft")).await.unwrap();
    context.store().fail_writes_to("todo");

    let error = context.update("todo", todo("a", "final")).await.unwrap_err();
    assert!(matches!(error, SyncError::Store(_)));
    let pending = context.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version, 1);
    let rows = context
        .store()
        .read(&Query::new(system::OPERATIONS_TABLE))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["version"], json!(1));

    let error = context.delete("todo", "a").await.unwrap_err();
    assert!(matches!(error, SyncError::Store(_)));
    assert_eq!(context.pending_count(None).await, 1);
    assert_eq!(
        context
            .store()
            .read(&Query::new(system::OPERATIONS_TABLE))
            .await
            .unwrap()
            .len(),
        1
    );

    context.store().recover();
    context.push().await.unwrap();
    assert_eq!(context.transport().item("todo", "a").unwrap()["text"], json!("draft"));
}

// ------------------------------------------------------------------
// Concurrency
// ------------------------------------------------------------------

/// Holds the first push of one item until the test lets it go.
struct GatedHandler {
    item_id: String,
    armed: AtomicBool,
    entered: Notify,
    resume: Notify,
}

impl GatedHandler {
    fn new(item_id: &str) -> Arc<Self> {
        Arc::new(Self {
            item_id: item_id.to_string(),
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            resume: Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl SyncHandler for GatedHandler {
    async fn execute_table_operation(
        &self,
        executor: &dyn tablesync_engine::OperationExecutor,
    ) -> tablesync_engine::RemoteResult<Option<tablesync_engine::Record>> {
        if executor.operation().item_id == self.item_id && self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.resume.notified().await;
        }
        executor.execute().await
    }
}

async fn gated_context(handler: &Arc<GatedHandler>) -> Arc<MemoryContext> {
    Arc::new(memory_context_with(test_config(), FakeTableService::new(), handler.clone()).await)
}

#[tokio::test]
async fn operations_queued_during_push_wait_for_next_push() {
    let handler = GatedHandler::new("a");
    let context = gated_context(&handler).await;
    context.insert("todo", todo("a", "first")).await.unwrap();

    let pushing = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.push().await }
    });
    handler.entered.notified().await;
    context.insert("todo", todo("b", "late")).await.unwrap();
    handler.resume.notify_one();

    let result = pushing.await.unwrap().unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(context.transport().request_count(), 1);
    assert!(context.transport().item("todo", "b").is_none());
    assert_eq!(context.pending_count(None).await, 1);

    let result = context.push().await.unwrap();
    assert_eq!(result.pushed, 1);
    let requests = context.transport().requests();
    assert_eq!(body_id(&requests[0]), json!("a"));
    assert_eq!(body_id(&requests[1]), json!("b"));
}

#[tokio::test]
async fn mutation_of_in_flight_item_waits_for_remote_call() {
    let handler = GatedHandler::new("a");
    let context = gated_context(&handler).await;
    context.insert("todo", todo("a", "first")).await.unwrap();

    let pushing = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.push().await }
    });
    handler.entered.notified().await;
    let updating = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.update("todo", todo("a", "edited")).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!updating.is_finished());
    assert_eq!(context.lookup("todo", "a").await.unwrap().unwrap()["text"], json!("first"));

    handler.resume.notify_one();
    assert_eq!(pushing.await.unwrap().unwrap().pushed, 1);
    updating.await.unwrap().unwrap();

    // The insert completed, so the edit is queued as a fresh update.
    let pending = context.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, TableOperationKind::Update);
    assert_eq!(context.lookup("todo", "a").await.unwrap().unwrap()["text"], json!("edited"));

    context.push().await.unwrap();
    assert_eq!(
        request_summary(&context.transport().requests()),
        ["POST todo", "PATCH todo/a"]
    );
    assert_eq!(context.transport().item("todo", "a").unwrap()["text"], json!("edited"));
}

#[tokio::test]
async fn concurrent_pushes_run_one_after_another() {
    let handler = GatedHandler::new("a");
    let context = gated_context(&handler).await;
    context.insert("todo", todo("a", "first")).await.unwrap();
    context.insert("todo", todo("b", "second")).await.unwrap();

    let first = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.push().await }
    });
    handler.entered.notified().await;
    let second = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.push().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished());
    assert_eq!(context.transport().request_count(), 0);

    handler.resume.notify_one();
    assert_eq!(first.await.unwrap().unwrap().pushed, 2);
    assert_eq!(second.await.unwrap().unwrap().pushed, 0);
    assert_eq!(
        request_summary(&context.transport().requests()),
        ["POST todo", "POST todo"]
    );
    assert_eq!(context.stats().pushes, 2);
}

/// Builds contexts with non-default configuration.
struct SyncContextBuilder;

impl SyncContextBuilder {
    async fn pages_of(size: u64, service: FakeTableService) -> MemoryContext {
        memory_context_with(
            test_config().with_pull_page_size(size),
            service,
            Arc::new(tablesync_engine::PassthroughHandler),
        )
        .await
    }
}
