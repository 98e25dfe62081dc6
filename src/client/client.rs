//! M10.8: Graph Client
//!
//! 공유 드라이버 위에서 동작하는 논리 클라이언트
//!
//! - 관리 트랜잭션: 성공하면 커밋, 실패하면 롤백, 세션은 항상 닫음
//! - 스트리밍 쿼리: 읽기 트랜잭션을 [`RecordStream`]에 넘김
//! - 자동 재시도 없음

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::Context;
use super::cursor::{CursorAdapter, CursorOutcome, CursorTerminal};
use super::driver::{AccessMode, DriverFactory, GraphDriver, GraphSession, GraphTransaction};
use super::error::{ClientError, ClientResult};
use super::options::ClientOptions;
use super::query::{Counters, Query, ResultSummary};
use super::record::Record;
use super::shared::{SharedDriverRegistry, SharedHandle, DEFAULT_POOL_NAME};
use super::stream::{RecordStream, StreamConfig};
use super::transaction::ClientTransaction;

static NEXT_NON_SHARED_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// GraphClient - 그래프 클라이언트
// ============================================================================

/// 그래프 클라이언트
///
/// 같은 레지스트리와 이름으로 만든 클라이언트들은 드라이버 하나를 공유합니다.
/// `close()` 없이 드롭하면 공유 참조는 백그라운드에서 해제됩니다.
#[derive(Debug)]
pub struct GraphClient {
    context: Context,
    handle: SharedHandle,
    stream_config: StreamConfig,
}

impl GraphClient {
    /// 기본 이름(`DEFAULT_POOL`)으로 공유 클라이언트 생성
    pub fn create_shared(
        registry: &SharedDriverRegistry,
        options: ClientOptions,
        factory: Arc<dyn DriverFactory>,
    ) -> ClientResult<Self> {
        Self::create_shared_named(registry, options, DEFAULT_POOL_NAME, factory)
    }

    /// 이름으로 공유 클라이언트 생성
    ///
    /// 이름이 이미 등록되어 있으면 기존 드라이버를 공유하고 `options`는
    /// 무시됩니다.
    ///
    /// 생성 시점의 컨텍스트를 잡아 두며, 이 클라이언트의 스트림 콜백은
    /// 어느 태스크에서 호출하든 항상 그 컨텍스트에서 실행됩니다.
    pub fn create_shared_named(
        registry: &SharedDriverRegistry,
        options: ClientOptions,
        name: &str,
        factory: Arc<dyn DriverFactory>,
    ) -> ClientResult<Self> {
        options.validate()?;
        let context = Context::get_or_create()?;
        let stream_config = StreamConfig::new().with_high_water_mark(options.stream_high_water_mark);
        let handle = registry.lookup_or_create(name, options, factory);

        tracing::debug!("Graph client created on '{}' (context {})", name, context.id());
        Ok(Self {
            context,
            handle,
            stream_config,
        })
    }

    /// 공유하지 않는 클라이언트 생성
    pub fn create_non_shared(options: ClientOptions, factory: Arc<dyn DriverFactory>) -> ClientResult<Self> {
        let name = format!("__non_shared-{}", NEXT_NON_SHARED_ID.fetch_add(1, Ordering::Relaxed));
        Self::create_shared_named(&SharedDriverRegistry::new(), options, &name, factory)
    }

    /// 공유 이름
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// 콜백이 실행되는 컨텍스트
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// 스트림 설정
    pub fn stream_config(&self) -> StreamConfig {
        self.stream_config
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    /// 드라이버 (첫 호출 시 생성 및 연결 확인)
    pub async fn driver(&self) -> ClientResult<Arc<dyn GraphDriver>> {
        self.handle.driver().await
    }

    // ========================================================================
    // One-shot operations
    // ========================================================================

    /// 쓰기 쿼리 실행 후 요약 반환
    pub async fn execute(&self, query: impl Into<Query>) -> ClientResult<ResultSummary> {
        self.managed_one(AccessMode::Write, query.into(), CursorTerminal::ConsumeAll)
            .await?
            .into_summary()
    }

    /// 삭제 쿼리 실행 후 반환된 레코드
    pub async fn delete(&self, query: impl Into<Query>) -> ClientResult<Vec<Record>> {
        self.managed_one(AccessMode::Write, query.into(), CursorTerminal::CollectAll)
            .await?
            .into_records()
    }

    /// 읽기 쿼리의 모든 레코드
    pub async fn find(&self, query: impl Into<Query>) -> ClientResult<Vec<Record>> {
        self.managed_one(AccessMode::Read, query.into(), CursorTerminal::CollectAll)
            .await?
            .into_records()
    }

    /// 읽기 쿼리의 단일 레코드 (없거나 둘 이상이면 에러)
    pub async fn find_one(&self, query: impl Into<Query>) -> ClientResult<Record> {
        self.managed_one(AccessMode::Read, query.into(), CursorTerminal::SingleOrError)
            .await?
            .into_record()
    }

    /// 여러 쓰기 쿼리를 한 트랜잭션에서 실행하고 카운터 합산
    pub async fn bulk_write(&self, queries: Vec<Query>) -> ClientResult<Counters> {
        let outcomes = self.managed(AccessMode::Write, queries, CursorTerminal::ConsumeAll).await?;

        let mut counters = Counters::default();
        for outcome in outcomes {
            counters += outcome.into_summary()?.counters;
        }
        Ok(counters)
    }

    // ========================================================================
    // Streaming & explicit transactions
    // ========================================================================

    /// 스트리밍 쿼리
    ///
    /// 읽기 트랜잭션을 열어 쿼리를 실행하고 레코드 스트림을 돌려줍니다.
    /// 스트림이 트랜잭션과 세션을 소유하며 종료 시 커밋하고 닫습니다.
    pub async fn query_stream(&self, query: impl Into<Query>) -> ClientResult<RecordStream> {
        let driver = self.driver().await?;
        let mut session = driver.session(AccessMode::Read).map_err(ClientError::into_root_cause)?;

        let mut tx = match session.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                close_session(session).await;
                return Err(e.into_root_cause());
            }
        };

        match tx.run(query.into()).await {
            Ok(cursor) => Ok(RecordStream::new(
                self.context.clone(),
                CursorAdapter::new(cursor),
                tx,
                session,
                self.stream_config,
            )),
            Err(e) => {
                rollback_quietly(tx.as_mut()).await;
                close_session(session).await;
                Err(e.into_root_cause())
            }
        }
    }

    /// 명시적 쓰기 트랜잭션 시작
    pub async fn begin(&self) -> ClientResult<ClientTransaction> {
        let driver = self.driver().await?;
        let mut session = driver.session(AccessMode::Write).map_err(ClientError::into_root_cause)?;

        match session.begin_transaction().await {
            Ok(tx) => Ok(ClientTransaction::new(tx, session)),
            Err(e) => {
                close_session(session).await;
                Err(e.into_root_cause())
            }
        }
    }

    /// 클라이언트 닫기 (공유 참조 해제, 여러 번 호출 가능)
    pub async fn close(&self) -> ClientResult<()> {
        self.handle.release().await
    }

    // ========================================================================
    // Managed transactions
    // ========================================================================

    async fn managed_one(
        &self,
        mode: AccessMode,
        query: Query,
        terminal: CursorTerminal,
    ) -> ClientResult<CursorOutcome> {
        self.managed(mode, vec![query], terminal)
            .await?
            .pop()
            .ok_or_else(|| ClientError::internal("Managed transaction produced no outcome"))
    }

    /// 관리 트랜잭션: 쿼리마다 `terminal` 적용, 세션은 항상 닫음
    async fn managed(
        &self,
        mode: AccessMode,
        queries: Vec<Query>,
        terminal: CursorTerminal,
    ) -> ClientResult<Vec<CursorOutcome>> {
        let driver = self.driver().await?;
        let mut session = driver.session(mode).map_err(ClientError::into_root_cause)?;

        let result = run_in_transaction(session.as_mut(), queries, terminal).await;
        close_session(session).await;
        result
    }
}

async fn run_in_transaction(
    session: &mut dyn GraphSession,
    queries: Vec<Query>,
    terminal: CursorTerminal,
) -> ClientResult<Vec<CursorOutcome>> {
    let mut tx = session.begin_transaction().await.map_err(ClientError::into_root_cause)?;

    let mut outcomes = Vec::with_capacity(queries.len());
    for query in queries {
        match apply(tx.as_mut(), query, terminal).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                rollback_quietly(tx.as_mut()).await;
                return Err(e);
            }
        }
    }

    tx.commit().await.map_err(ClientError::into_root_cause)?;
    Ok(outcomes)
}

async fn apply(tx: &mut dyn GraphTransaction, query: Query, terminal: CursorTerminal) -> ClientResult<CursorOutcome> {
    let cursor = tx.run(query).await.map_err(ClientError::into_root_cause)?;
    CursorAdapter::new(cursor).apply(terminal).await
}

async fn rollback_quietly(tx: &mut dyn GraphTransaction) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Failed to roll back transaction: {}", e);
    }
}

async fn close_session(mut session: Box<dyn GraphSession>) {
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close session: {}", e);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use crate::client::memory::{MemoryDriver, ScriptedResult};
    use crate::client::types::Value;

    const STREAM_QUERY: &str = "UNWIND range(1, 5) AS n RETURN n";

    fn shared(registry: &SharedDriverRegistry, driver: &MemoryDriver) -> GraphClient {
        GraphClient::create_shared(registry, ClientOptions::new(), driver.factory()).unwrap()
    }

    fn created(n: i64) -> Counters {
        Counters {
            nodes_created: n,
            properties_set: n,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_two_clients_share_driver() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let first = shared(&registry, &memory);
        let second = shared(&registry, &memory);
        assert_eq!(first.name(), DEFAULT_POOL_NAME);
        assert_eq!(registry.ref_count(DEFAULT_POOL_NAME), 2);

        let a = first.driver().await.unwrap();
        let b = second.driver().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memory.stats().drivers_created, 1);

        first.close().await.unwrap();
        assert!(!memory.is_closed());
        assert_eq!(registry.ref_count(DEFAULT_POOL_NAME), 1);

        second.close().await.unwrap();
        assert!(memory.is_closed());
        assert_eq!(memory.stats().driver_closes, 1);
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_non_shared_clients_get_own_driver() {
        let memory = MemoryDriver::new();
        let first = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();
        let second = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();
        assert_ne!(first.name(), second.name());
        assert!(first.name().starts_with("__non_shared-"));

        first.driver().await.unwrap();
        second.driver().await.unwrap();
        assert_eq!(memory.stats().drivers_created, 2);

        first.close().await.unwrap();
        second.close().await.unwrap();
        assert_eq!(memory.stats().driver_closes, 2);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let registry = SharedDriverRegistry::new();
        let options = ClientOptions::new().with_cluster_node_uri("not a uri");

        let err = GraphClient::create_shared(&registry, options, MemoryDriver::new().factory()).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_stream_config_follows_options() {
        let options = ClientOptions::new().with_stream_high_water_mark(4);
        let client = GraphClient::create_non_shared(options, MemoryDriver::new().factory()).unwrap();
        assert_eq!(client.stream_config().high_water_mark, 4);
    }

    #[tokio::test]
    async fn test_execute_commits_and_closes() {
        let memory = MemoryDriver::new()
            .with_result("CREATE (n:Person)", ScriptedResult::empty().with_counters(created(1)));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let summary = client.execute("CREATE (n:Person)").await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);

        let stats = memory.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_find_and_delete() {
        let memory = MemoryDriver::new()
            .with_result("MATCH (n) RETURN n", ScriptedResult::sequence("n", 1..=3))
            .with_result("MATCH (n) DELETE n RETURN n", ScriptedResult::sequence("n", 1..=2));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let found = client.find("MATCH (n) RETURN n").await.unwrap();
        assert_eq!(found.len(), 3);
        let deleted = client.delete("MATCH (n) DELETE n RETURN n").await.unwrap();
        assert_eq!(deleted.len(), 2);

        let stats = memory.stats();
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.sessions_closed, 2);
    }

    #[tokio::test]
    async fn test_find_one() {
        let memory = MemoryDriver::new()
            .with_result(
                "MATCH (n {name: $name}) RETURN n.name AS name",
                ScriptedResult::new(["name"]).with_row(vec![Value::from("Alice")]),
            )
            .with_result("MATCH (n) RETURN n", ScriptedResult::sequence("n", 1..=2));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let query = Query::new("MATCH (n {name: $name}) RETURN n.name AS name").with_param("name", "Alice");
        let record = client.find_one(query).await.unwrap();
        assert_eq!(record.get_string("name").unwrap(), "Alice");

        let err = client.find_one("MATCH (n) RETURN n").await.unwrap_err();
        assert!(matches!(err, ClientError::NoSuchRecord(_)));
        let err = client.find_one("MATCH (n:Missing) RETURN n").await.unwrap_err();
        assert!(matches!(err, ClientError::NoSuchRecord(_)));

        let stats = memory.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 2);
        assert_eq!(stats.sessions_closed, 3);
    }

    #[tokio::test]
    async fn test_bulk_write_sums_counters() {
        let memory = MemoryDriver::new()
            .with_result("CREATE (a)", ScriptedResult::empty().with_counters(created(1)))
            .with_result("CREATE (b), (c)", ScriptedResult::empty().with_counters(created(2)));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let counters = client
            .bulk_write(vec![Query::new("CREATE (a)"), Query::new("CREATE (b), (c)")])
            .await
            .unwrap();
        assert_eq!(counters, created(3));
        assert_eq!(memory.executed_queries(), vec!["CREATE (a)", "CREATE (b), (c)"]);

        let stats = memory.stats();
        assert_eq!(stats.transactions_begun, 1);
        assert_eq!(stats.commits, 1);
    }

    #[tokio::test]
    async fn test_bulk_write_failure_rolls_back() {
        let memory = MemoryDriver::new()
            .with_result("CREATE (a)", ScriptedResult::empty().with_counters(created(1)))
            .with_result(
                "CREATE (a:Unique)",
                ScriptedResult::empty().fail_on_run("Neo.ClientError.Schema.ConstraintValidationFailed", "exists"),
            );
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let err = client
            .bulk_write(vec![
                Query::new("CREATE (a)"),
                Query::new("CREATE (a:Unique)"),
                Query::new("CREATE (never)"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Query { .. }));
        assert_eq!(memory.executed_queries().len(), 2);

        let stats = memory.stats();
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_query_stream_delivers_and_commits() {
        let memory = MemoryDriver::new().with_result(STREAM_QUERY, ScriptedResult::sequence("n", 1..=5));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let stream = client.query_stream(STREAM_QUERY).await.unwrap();
        assert_eq!(stream.keys().to_vec(), vec!["n".to_string()]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let sink = seen.clone();
        stream
            .end_handler(move || {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            })
            .handler(move |record: Record| sink.lock().push(record.get_int("n").unwrap()));

        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);

        let stats = memory.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 0);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_callbacks_run_on_client_context() {
        let memory = MemoryDriver::new().with_result(STREAM_QUERY, ScriptedResult::sequence("n", 1..=3));
        let client = Arc::new(GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap());

        let on_context = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let sink = on_context.clone();
        let context = client.context().clone();
        let end_context = context.clone();

        let caller = client.clone();
        tokio::spawn(async move {
            let stream = caller.query_stream(STREAM_QUERY).await.unwrap();
            stream
                .end_handler(move || {
                    assert!(end_context.is_current());
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                })
                .handler(move |_record: Record| sink.lock().push(context.is_current()));
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(*on_context.lock(), vec![true, true, true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_stream_pause_delays_end() {
        let memory = MemoryDriver::new().with_result(STREAM_QUERY, ScriptedResult::sequence("n", 1..=5));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();
        let stream = client.query_stream(STREAM_QUERY).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let sink = seen.clone();
        let controller = stream.clone();
        let start = Instant::now();
        stream
            .end_handler(move || {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            })
            .handler(move |record: Record| {
                let n = record.get_int("n").unwrap();
                sink.lock().push(n);
                if n == 2 {
                    controller.pause();
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        controller.resume();
                    });
                }
            });

        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_query_stream_run_failure() {
        let memory = MemoryDriver::new().with_result(
            "RETURN $missing",
            ScriptedResult::empty().fail_on_run("Neo.ClientError.Statement.ParameterMissing", "Expected parameter"),
        );
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let err = client.query_stream("RETURN $missing").await.unwrap_err();
        match err {
            ClientError::Query { code, .. } => assert_eq!(code, "Neo.ClientError.Statement.ParameterMissing"),
            other => panic!("Expected Query error, got {:?}", other),
        }
        let stats = memory.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_connectivity_failure_surfaces_to_caller() {
        let memory = MemoryDriver::new().with_connectivity_failure("Unable to connect to localhost:7687");
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let err = client.find("MATCH (n) RETURN n").await.unwrap_err();
        assert!(matches!(err, ClientError::ServiceUnavailable(_)));
        assert!(memory.is_closed());
        assert_eq!(memory.stats().sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_queries() {
        let client = GraphClient::create_non_shared(ClientOptions::new(), MemoryDriver::new().factory()).unwrap();
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());

        let err = client.execute("CREATE (n)").await.unwrap_err();
        assert!(matches!(err, ClientError::Closed(_)));
    }

    #[tokio::test]
    async fn test_begin_explicit_transaction() {
        let memory = MemoryDriver::new()
            .with_result("CREATE (n)", ScriptedResult::empty().with_counters(created(1)));
        let client = GraphClient::create_non_shared(ClientOptions::new(), memory.factory()).unwrap();

        let mut tx = client.begin().await.unwrap();
        let summary = tx.query(Query::new("CREATE (n)")).await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);
        tx.commit().await.unwrap();

        let stats = memory.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.sessions_closed, 1);
    }
}
