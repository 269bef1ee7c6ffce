use async_trait::async_trait;
use batchline::transaction::{
    ErrorClass, Op, ScriptedError, ScriptedStore, ScriptedTx, Value,
};
use batchline::{
    expect_affected, CallContext, RetryConfig, Statement, Transaction, TrackingSleeper,
    TransactionExecutor, TxError, UnitOfWork, WorkError,
};
use std::sync::Arc;
use std::time::Duration;

/// Marks a task done and reads back its title.
struct CompleteTask {
    user_id: i64,
    task_id: i64,
}

#[async_trait]
impl UnitOfWork<ScriptedTx> for CompleteTask {
    type Output = String;

    async fn run(&self, tx: &mut ScriptedTx) -> Result<String, WorkError<ScriptedError>> {
        let rows = tx
            .execute(
                &Statement::new("UPDATE tasks SET status = true WHERE user_id = $1 AND id = $2")
                    .bind(self.user_id)
                    .bind(self.task_id),
            )
            .await?;
        expect_affected::<ScriptedError>(rows, format!("task {}", self.task_id))?;
        let mut found = tx
            .query(&Statement::new("SELECT title FROM tasks WHERE id = $1").bind(self.task_id))
            .await?;
        match found.pop().and_then(|row| row.into_iter().next()) {
            Some(Value::Text(title)) => Ok(title),
            _ => Err(WorkError::NotFound(format!("title of task {}", self.task_id))),
        }
    }
}

fn work() -> CompleteTask {
    CompleteTask { user_id: 1, task_id: 9 }
}

fn title_row(title: &str) -> Vec<Vec<Value>> {
    vec![vec![Value::from(title)]]
}

#[tokio::test]
async fn retries_deadlock_and_returns_the_committed_result() {
    let store = ScriptedStore::new();
    store
        .push_execute(Err(ScriptedError::deadlock()))
        .push_execute(Ok(1))
        .push_query(Ok(title_row("write report")));
    let sleeper = TrackingSleeper::new();
    let executor = TransactionExecutor::builder(store.clone())
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();

    let title = executor.execute(&CallContext::new(), &work()).await.unwrap();

    assert_eq!(title, "write report");
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(100)]);
    assert_eq!(
        store.journal(),
        vec![
            Op::Begin,
            Op::Execute("UPDATE tasks SET status = true WHERE user_id = $1 AND id = $2".into()),
            Op::Rollback,
            Op::Begin,
            Op::Execute("UPDATE tasks SET status = true WHERE user_id = $1 AND id = $2".into()),
            Op::Query("SELECT title FROM tasks WHERE id = $1".into()),
            Op::Commit,
        ]
    );
}

#[tokio::test]
async fn missing_row_short_circuits_before_any_query() {
    let store = ScriptedStore::new();
    store.push_execute(Ok(0));
    let executor = TransactionExecutor::builder(store.clone())
        .with_sleeper(TrackingSleeper::new())
        .build()
        .unwrap();

    let err = executor.execute(&CallContext::new(), &work()).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(store.journal().len(), 3);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn config_driven_executor_uses_its_schedule() {
    let retry: RetryConfig =
        serde_json::from_str(r#"{ "max_attempts": 4, "backoff_base_ms": 50, "backoff_max_ms": 120 }"#)
            .unwrap();
    let store = ScriptedStore::new();
    for _ in 0..4 {
        store.push_execute(Err(ScriptedError::serialization_failure()));
    }
    let sleeper = TrackingSleeper::new();
    let executor =
        retry.executor_builder(store.clone()).unwrap().with_sleeper(sleeper.clone()).build().unwrap();

    let err = executor.execute(&CallContext::new(), &work()).await.unwrap_err();

    assert!(matches!(err, TxError::Exhausted { attempts: 4, .. }));
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(50), Duration::from_millis(100), Duration::from_millis(120)]
    );
    assert_eq!(store.begins(), 4);
}

#[tokio::test]
async fn single_attempt_executor_never_sleeps() {
    let store = ScriptedStore::new();
    store.push_execute(Err(ScriptedError::lock_not_available()));
    let sleeper = TrackingSleeper::new();
    let executor = TransactionExecutor::builder(store.clone())
        .max_attempts(1)
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();

    let err = executor.execute(&CallContext::new(), &work()).await.unwrap_err();

    assert!(err.is_retry_exhausted());
    assert_eq!(sleeper.calls(), 0);
}

#[tokio::test]
async fn classifier_can_demote_retryable_codes() {
    let store = ScriptedStore::new();
    store.push_execute(Err(ScriptedError::deadlock()));
    let executor = TransactionExecutor::builder(store.clone())
        .with_sleeper(TrackingSleeper::new())
        .classify(|_: &ScriptedError| ErrorClass::Fatal)
        .build()
        .unwrap();

    let err = executor.execute(&CallContext::new(), &work()).await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.store_error().map(ToString::to_string).as_deref(), Some("deadlock detected"));
}

#[tokio::test]
async fn cancellation_between_attempts_stops_the_loop() {
    let store = ScriptedStore::new();
    store.push_execute(Err(ScriptedError::serialization_failure()));
    let ctx = CallContext::new();

    struct CancelOnSleep(CallContext);

    impl std::fmt::Debug for CancelOnSleep {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("CancelOnSleep")
        }
    }

    impl batchline::Sleeper for CancelOnSleep {
        fn sleep(
            &self,
            _duration: Duration,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
            self.0.cancel();
            Box::pin(async {})
        }
    }

    let executor = TransactionExecutor::builder(store.clone())
        .with_sleeper(CancelOnSleep(ctx.clone()))
        .build()
        .unwrap();

    let err = executor.execute(&ctx, &work()).await.unwrap_err();

    assert!(matches!(err, TxError::Cancelled { attempt: 2 }));
    assert!(err.is_cancelled());
    assert_eq!(store.begins(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn executor_is_shareable_across_tasks() {
    let store = ScriptedStore::new();
    let executor = Arc::new(
        TransactionExecutor::builder(store.clone())
            .with_sleeper(TrackingSleeper::new())
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|task_id| {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor.execute(&CallContext::new(), &CompleteTask { user_id: 1, task_id }).await
            })
        })
        .collect();

    for handle in handles {
        // unscripted queries return no rows
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_not_found());
    }
    assert_eq!(store.begins(), 8);
    assert_eq!(store.rollbacks(), 8);
}
