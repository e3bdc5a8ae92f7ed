//! Tests for background delegation: completion, failure, timeout and
//! cancellation, and the single-delivery guarantee.

use super::*;
use crate::stream::StreamConfig;
use crate::test_utils::{collect_text, RecordingHandler};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_completion_is_recorded_and_delivered_once() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(
        async { Ok::<_, String>(json!({"rows": 3})) },
        "fetch peers",
        handler.clone(),
        None,
    );
    handler.wait_for(1).await;

    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.description, "fetch peers");
    assert_eq!(task.result, Some(json!({"rows": 3})));
    assert_eq!(handler.calls(), vec![(id, Ok(json!({"rows": 3})))]);
}

#[tokio::test]
async fn test_start_does_not_wait_for_work() {
    let manager = DelegationManager::new();
    let (release, gate) = oneshot::channel::<()>();

    let id = manager.start(
        async move {
            let _ = gate.await;
            Ok::<_, String>(json!("released"))
        },
        "gated",
        IgnoreOutcome,
        None,
    );
    assert!(!manager.status(&id).unwrap().is_terminal());

    release.send(()).unwrap();
    let task = manager.await_completion(&id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_closure_handler() {
    let manager = DelegationManager::new();
    let (tx, rx) = oneshot::channel();

    let id = manager.start(
        async { Ok::<_, String>(json!(7)) },
        "closure",
        move |id: TaskId, outcome: TaskOutcome| {
            let _ = tx.send((id, outcome));
        },
        None,
    );

    assert_eq!(rx.await.unwrap(), (id, Ok(json!(7))));
}

#[tokio::test]
async fn test_failure_is_recorded_and_delivered() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(
        async { Err::<Value, _>("upstream returned 502") },
        "flaky",
        handler.clone(),
        None,
    );
    handler.wait_for(1).await;

    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("upstream returned 502"));
    assert!(task.result.is_none());
    assert_eq!(
        handler.calls(),
        vec![(id, Err(TaskError::Failed("upstream returned 502".into())))]
    );
}

#[tokio::test]
async fn test_panicking_work_fails_the_task() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(
        async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, String>(Value::Null)
        },
        "explodes",
        handler.clone(),
        None,
    );
    handler.wait_for(1).await;

    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("task panicked: kaboom"));
}

#[tokio::test(start_paused = true)]
async fn test_work_finishing_before_timeout_completes() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(
        async {
            tokio::time::sleep(Duration::from_millis(90)).await;
            Ok::<_, String>(json!("in time"))
        },
        "fast enough",
        handler.clone(),
        Some(Duration::from_millis(100)),
    );
    handler.wait_for(1).await;

    assert_eq!(manager.status(&id).unwrap().status, TaskStatus::Completed);
    assert_eq!(handler.calls(), vec![(id, Ok(json!("in time")))]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_wins_and_late_result_is_only_recorded() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(
        async {
            tokio::time::sleep(Duration::from_millis(110)).await;
            Ok::<_, String>(json!("too late"))
        },
        "slow",
        handler.clone(),
        Some(Duration::from_millis(100)),
    );
    handler.wait_for(1).await;

    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::TimedOut);
    assert_eq!(task.error.as_deref(), Some("timed out after 100ms"));
    assert!(task.result.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::TimedOut);
    assert_eq!(task.result, Some(json!("too late")));
    assert_eq!(
        handler.calls(),
        vec![(id, Err(TaskError::TimedOut(Duration::from_millis(100))))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_work_finishing_at_the_deadline_completes() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let ids: Vec<_> = (0..20)
        .map(|i| {
            manager.start(
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(json!(i))
                },
                "on the deadline",
                handler.clone(),
                Some(Duration::from_millis(100)),
            )
        })
        .collect();
    handler.wait_for(ids.len()).await;

    let calls = handler.calls();
    assert_eq!(calls.len(), ids.len());
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(manager.status(id).unwrap().status, TaskStatus::Completed);
        let (_, outcome) = calls.iter().find(|(seen, _)| seen == id).unwrap();
        assert_eq!(outcome, &Ok(json!(i)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_cooperative_work() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();
    let (stopped_tx, stopped_rx) = oneshot::channel();

    let id = manager.start_with(
        move |ctx: TaskContext| async move {
            ctx.cancelled().await;
            let _ = stopped_tx.send(());
            Ok::<_, String>(json!("stopped"))
        },
        "cooperative",
        handler.clone(),
        Some(Duration::from_millis(100)),
    );
    handler.wait_for(1).await;
    tokio::time::timeout(WAIT, stopped_rx).await.unwrap().unwrap();

    let task = manager.await_completion(&id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::TimedOut);
    tokio::time::timeout(WAIT, async {
        while manager.status(&id).unwrap().result.is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(manager.status(&id).unwrap().result, Some(json!("stopped")));
    assert_eq!(
        handler.calls(),
        vec![(id, Err(TaskError::TimedOut(Duration::from_millis(100))))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_applies_when_none_given() {
    let config = DelegationConfig::new().default_timeout(Duration::from_secs(1));
    let manager = DelegationManager::with_config(config);
    let handler = RecordingHandler::new();

    let id = manager.start(
        std::future::pending::<Result<Value, String>>(),
        "never finishes",
        handler.clone(),
        None,
    );
    handler.wait_for(1).await;

    assert_eq!(manager.status(&id).unwrap().status, TaskStatus::TimedOut);
    assert_eq!(
        handler.calls()[0].1,
        Err(TaskError::TimedOut(Duration::from_secs(1)))
    );
}

#[tokio::test]
async fn test_cancel_running_task() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();
    let (started_tx, started_rx) = oneshot::channel();

    let id = manager.start_with(
        move |ctx: TaskContext| async move {
            let _ = started_tx.send(());
            ctx.cancelled().await;
            Ok::<_, String>(json!("stopped early"))
        },
        "cooperative",
        handler.clone(),
        None,
    );
    started_rx.await.unwrap();

    assert_eq!(manager.cancel(&id), Ok(true));
    assert_eq!(manager.cancel(&id), Ok(false));
    handler.wait_for(1).await;

    assert_eq!(handler.calls(), vec![(id.clone(), Err(TaskError::Cancelled))]);
    let task = manager.await_completion(&id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_before_ready_result_is_polled_wins() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();
    let (started_tx, started_rx) = oneshot::channel();
    let (result_tx, result_rx) = oneshot::channel::<Value>();

    let id = manager.start(
        async move {
            let _ = started_tx.send(());
            result_rx.await.map_err(|e| e.to_string())
        },
        "ready but unseen",
        handler.clone(),
        None,
    );
    started_rx.await.unwrap();

    // The supervisor is woken by the result but not polled before the cancel.
    result_tx.send(json!("ready")).unwrap();
    assert_eq!(manager.cancel(&id), Ok(true));
    handler.wait_for(1).await;

    assert_eq!(handler.calls(), vec![(id.clone(), Err(TaskError::Cancelled))]);
    let task = manager.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.result, Some(json!("ready")));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_racing_elapsed_timeout_delivers_once() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let ids: Vec<_> = (0..10)
        .map(|_| {
            manager.start(
                std::future::pending::<Result<Value, String>>(),
                "racing",
                handler.clone(),
                Some(Duration::from_millis(100)),
            )
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancelled: Vec<bool> = ids.iter().map(|id| manager.cancel(id).unwrap()).collect();
    handler.wait_for(ids.len()).await;

    let calls = handler.calls();
    assert_eq!(calls.len(), ids.len());
    for (id, cancelled) in ids.iter().zip(cancelled) {
        let outcomes: Vec<_> = calls.iter().filter(|(seen, _)| seen == id).collect();
        assert_eq!(outcomes.len(), 1);

        let status = manager.status(id).unwrap().status;
        if cancelled {
            assert_eq!(status, TaskStatus::Cancelled);
            assert_eq!(outcomes[0].1, Err(TaskError::Cancelled));
        } else {
            assert_eq!(status, TaskStatus::TimedOut);
            assert_eq!(
                outcomes[0].1,
                Err(TaskError::TimedOut(Duration::from_millis(100)))
            );
        }
    }
}

#[tokio::test]
async fn test_cancel_pending_task_never_runs_work() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();
    let ran = Arc::new(AtomicBool::new(false));

    let id = {
        let ran = ran.clone();
        manager.start(
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, String>(Value::Null)
            },
            "cancelled before scheduling",
            handler.clone(),
            None,
        )
    };
    // The current-thread runtime has not polled the supervisor yet.
    assert_eq!(manager.status(&id).unwrap().status, TaskStatus::Pending);
    assert_eq!(manager.cancel(&id), Ok(true));
    handler.wait_for(1).await;

    assert_eq!(handler.calls(), vec![(id, Err(TaskError::Cancelled))]);
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancel_finished_or_unknown_task() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let id = manager.start(async { Ok::<_, String>(json!(1)) }, "done", handler.clone(), None);
    handler.wait_for(1).await;

    assert_eq!(manager.cancel(&id), Ok(false));
    assert_eq!(manager.status(&id).unwrap().status, TaskStatus::Completed);
    assert_eq!(handler.calls().len(), 1);

    let unknown = TaskId::new();
    assert_eq!(
        manager.cancel(&unknown),
        Err(RegistryError::TaskNotFound(unknown))
    );
}

#[tokio::test]
async fn test_acknowledge_evicts_finished_task() {
    let manager = DelegationManager::new();
    let id = manager.start(async { Ok::<_, String>(json!(1)) }, "done", IgnoreOutcome, None);
    manager.await_completion(&id, WAIT).await.unwrap();

    assert_eq!(manager.acknowledge(&id), Ok(true));
    assert!(manager.status(&id).is_err());
}

#[tokio::test]
async fn test_many_concurrent_delegations_each_deliver_once() {
    let manager = DelegationManager::new();
    let handler = RecordingHandler::new();

    let ids: Vec<_> = (0..20)
        .map(|i| {
            manager.start(
                async move {
                    tokio::task::yield_now().await;
                    Ok::<_, String>(json!(i))
                },
                format!("task {}", i),
                handler.clone(),
                None,
            )
        })
        .collect();
    handler.wait_for(ids.len()).await;

    let calls = handler.calls();
    assert_eq!(calls.len(), ids.len());
    for id in &ids {
        assert_eq!(calls.iter().filter(|(seen, _)| seen == id).count(), 1);
        assert_eq!(manager.status(id).unwrap().status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_delegate_tool_call_answers_on_stream() {
    let manager = DelegationManager::new();
    let (stream, body) = StreamMultiplexer::channel(&StreamConfig::default());
    let fallback = RecordingHandler::new();

    let id = manager
        .delegate_tool_call(
            &stream,
            ToolCall::new("c1", "lookup", Map::new()),
            async { Ok::<_, String>(json!({"ok": true})) },
            fallback.clone(),
            None,
        )
        .await;
    // The status turns terminal just before the tool result is written.
    tokio::time::timeout(WAIT, async {
        while stream.frames_written() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    stream.close().await;

    assert_eq!(
        collect_text(body).await,
        concat!(
            "9:{\"toolCallId\":\"c1\",\"toolName\":\"lookup\",\"args\":{}}\n",
            "a:{\"toolCallId\":\"c1\",\"result\":{\"ok\":true}}\n",
        )
    );
    assert_eq!(manager.status(&id).unwrap().description, "lookup");
    assert!(fallback.calls().is_empty());
}

#[tokio::test]
async fn test_delegate_tool_call_on_closed_stream_runs_detached() {
    let manager = DelegationManager::new();
    let (stream, _body) = StreamMultiplexer::channel(&StreamConfig::default());
    stream.close().await;
    let fallback = RecordingHandler::new();

    let id = manager
        .delegate_tool_call(
            &stream,
            ToolCall::new("c9", "lookup", Map::new()),
            async { Ok::<_, String>(json!("still ran")) },
            fallback.clone(),
            None,
        )
        .await;
    fallback.wait_for(1).await;

    assert_eq!(fallback.calls(), vec![(id, Ok(json!("still ran")))]);
}
