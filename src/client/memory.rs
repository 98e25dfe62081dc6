//! In-Memory Driver
//!
//! 테스트용 인메모리 드라이버
//!
//! 쿼리 텍스트별로 미리 정한 결과를 돌려주고, 지정한 fetch 위치에서 실패를
//! 주입하며, 세션/트랜잭션/드라이버 호출 횟수를 기록합니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::driver::{
    AccessMode, DriverFactory, DriverTarget, GraphDriver, GraphSession, GraphTransaction, ResultCursor,
};
use super::error::{ClientError, ClientResult};
use super::options::ClientOptions;
use super::query::{Counters, Query, QueryType, ResultSummary};
use super::record::Record;
use super::types::Value;

// ============================================================================
// ScriptedResult - 미리 정한 결과
// ============================================================================

#[derive(Debug, Clone)]
struct ScriptedFailure {
    /// None이면 run 시점에 실패
    at: Option<usize>,
    code: String,
    message: String,
}

impl ScriptedFailure {
    fn to_error(&self) -> ClientError {
        ClientError::completion(ClientError::query(self.code.clone(), self.message.clone()))
    }
}

/// 쿼리 하나의 결과 스크립트
#[derive(Debug, Clone, Default)]
pub struct ScriptedResult {
    keys: Vec<String>,
    rows: Vec<Vec<Value>>,
    counters: Counters,
    failure: Option<ScriptedFailure>,
}

impl ScriptedResult {
    /// 키 목록으로 생성
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// 레코드 없는 결과
    pub fn empty() -> Self {
        Self::default()
    }

    /// 정수 시퀀스 결과 (컬럼 하나)
    pub fn sequence(key: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        let mut result = Self::new([key.into()]);
        result.rows = values.into_iter().map(|v| vec![Value::Integer(v)]).collect();
        result
    }

    /// 행 추가
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    /// 변경 카운터 설정
    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    /// `index`번째 fetch에서 실패
    pub fn fail_at(mut self, index: usize, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.failure = Some(ScriptedFailure {
            at: Some(index),
            code: code.into(),
            message: message.into(),
        });
        self
    }

    /// run 시점에 실패
    pub fn fail_on_run(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.failure = Some(ScriptedFailure {
            at: None,
            code: code.into(),
            message: message.into(),
        });
        self
    }
}

// ============================================================================
// MemoryStats - 호출 통계
// ============================================================================

/// 호출 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// 팩토리로 생성된 드라이버 수
    pub drivers_created: usize,
    /// 연결 확인 횟수
    pub connectivity_checks: usize,
    /// 열린 세션 수
    pub sessions_opened: usize,
    /// 세션 close 호출 수
    pub sessions_closed: usize,
    /// 시작된 트랜잭션 수
    pub transactions_begun: usize,
    /// 커밋 호출 수
    pub commits: usize,
    /// 롤백 호출 수
    pub rollbacks: usize,
    /// 커서 fetch 횟수
    pub fetches: usize,
    /// 드라이버 close 호출 수
    pub driver_closes: usize,
}

// ============================================================================
// MemoryDriver - 인메모리 드라이버
// ============================================================================

#[derive(Default)]
struct MemoryState {
    results: Mutex<HashMap<String, ScriptedResult>>,
    fetch_latency: Mutex<Option<Duration>>,
    connectivity_latency: Mutex<Option<Duration>>,
    connectivity_failure: Mutex<Option<String>>,
    commit_failure: Mutex<Option<String>>,
    executed: Mutex<Vec<Query>>,
    stats: Mutex<MemoryStats>,
    closed: AtomicBool,
}

/// 인메모리 드라이버
///
/// 복제본은 같은 상태와 통계를 공유합니다. 등록되지 않은 쿼리는 빈 결과를
/// 돌려줍니다.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<MemoryState>,
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryDriver {
    /// 새 드라이버 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 쿼리 결과 등록
    pub fn with_result(self, query: impl Into<String>, result: ScriptedResult) -> Self {
        self.state.results.lock().insert(query.into(), result);
        self
    }

    /// fetch마다 지연 추가
    pub fn with_fetch_latency(self, latency: Duration) -> Self {
        *self.state.fetch_latency.lock() = Some(latency);
        self
    }

    /// 연결 확인에 지연 추가
    pub fn with_connectivity_latency(self, latency: Duration) -> Self {
        *self.state.connectivity_latency.lock() = Some(latency);
        self
    }

    /// 연결 확인 실패 주입
    pub fn with_connectivity_failure(self, message: impl Into<String>) -> Self {
        *self.state.connectivity_failure.lock() = Some(message.into());
        self
    }

    /// 커밋 실패 주입
    pub fn with_commit_failure(self, message: impl Into<String>) -> Self {
        *self.state.commit_failure.lock() = Some(message.into());
        self
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> MemoryStats {
        *self.state.stats.lock()
    }

    /// 실행된 쿼리 텍스트
    pub fn executed_queries(&self) -> Vec<String> {
        self.state.executed.lock().iter().map(|q| q.text.clone()).collect()
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// 이 드라이버의 복제본을 돌려주는 팩토리
    pub fn factory(&self) -> Arc<dyn DriverFactory> {
        let driver = self.clone();
        Arc::new(move |_: &DriverTarget, _: &ClientOptions| -> ClientResult<Arc<dyn GraphDriver>> {
            driver.state.stats.lock().drivers_created += 1;
            driver.state.closed.store(false, Ordering::SeqCst);
            Ok(Arc::new(driver.clone()) as Arc<dyn GraphDriver>)
        })
    }

    fn record(&self, update: impl FnOnce(&mut MemoryStats)) {
        update(&mut self.state.stats.lock());
    }
}

#[async_trait]
impl GraphDriver for MemoryDriver {
    fn session(&self, mode: AccessMode) -> ClientResult<Box<dyn GraphSession>> {
        if self.is_closed() {
            return Err(ClientError::closed("Driver is closed"));
        }
        self.record(|s| s.sessions_opened += 1);
        Ok(Box::new(MemorySession {
            driver: self.clone(),
            mode,
            open: true,
        }))
    }

    async fn verify_connectivity(&self) -> ClientResult<()> {
        self.record(|s| s.connectivity_checks += 1);
        let latency = *self.state.connectivity_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.state.connectivity_failure.lock().clone();
        match failure {
            Some(message) => Err(ClientError::completion(ClientError::service_unavailable(message))),
            None => Ok(()),
        }
    }

    async fn close(&self) -> ClientResult<()> {
        self.record(|s| s.driver_closes += 1);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySession {
    driver: MemoryDriver,
    mode: AccessMode,
    open: bool,
}

#[async_trait]
impl GraphSession for MemorySession {
    async fn begin_transaction(&mut self) -> ClientResult<Box<dyn GraphTransaction>> {
        if !self.open {
            return Err(ClientError::session("Session is closed"));
        }
        self.driver.record(|s| s.transactions_begun += 1);
        Ok(Box::new(MemoryTransaction {
            driver: self.driver.clone(),
            mode: self.mode,
            open: true,
        }))
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.open = false;
        self.driver.record(|s| s.sessions_closed += 1);
        Ok(())
    }
}

struct MemoryTransaction {
    driver: MemoryDriver,
    mode: AccessMode,
    open: bool,
}

#[async_trait]
impl GraphTransaction for MemoryTransaction {
    async fn run(&mut self, query: Query) -> ClientResult<Box<dyn ResultCursor>> {
        if !self.open {
            return Err(ClientError::transaction("Transaction is closed"));
        }
        let state = &self.driver.state;
        state.executed.lock().push(query.clone());

        let script = state.results.lock().get(&query.text).cloned().unwrap_or_default();
        let latency = *state.fetch_latency.lock();
        if let Some(failure) = script.failure.as_ref().filter(|f| f.at.is_none()) {
            return Err(failure.to_error());
        }

        let query_type = match self.mode {
            AccessMode::Read => QueryType::ReadOnly,
            AccessMode::Write => QueryType::ReadWrite,
        };
        Ok(Box::new(MemoryCursor {
            driver: self.driver.clone(),
            keys: script.keys.into(),
            rows: script.rows.into(),
            position: 0,
            failure: script.failure,
            latency,
            summary: ResultSummary {
                query: Some(query),
                query_type,
                counters: script.counters,
                database: None,
            },
        }))
    }

    async fn commit(&mut self) -> ClientResult<()> {
        self.open = false;
        self.driver.record(|s| s.commits += 1);
        let failure = self.driver.state.commit_failure.lock().clone();
        match failure {
            Some(message) => Err(ClientError::completion(ClientError::transaction(message))),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> ClientResult<()> {
        self.open = false;
        self.driver.record(|s| s.rollbacks += 1);
        Ok(())
    }
}

struct MemoryCursor {
    driver: MemoryDriver,
    keys: Arc<[String]>,
    rows: VecDeque<Vec<Value>>,
    position: usize,
    failure: Option<ScriptedFailure>,
    latency: Option<Duration>,
    summary: ResultSummary,
}

#[async_trait]
impl ResultCursor for MemoryCursor {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn next(&mut self) -> ClientResult<Option<Record>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.driver.record(|s| s.fetches += 1);

        if let Some(failure) = &self.failure {
            if failure.at == Some(self.position) {
                return Err(failure.to_error());
            }
        }

        Ok(self.rows.pop_front().map(|row| {
            self.position += 1;
            Record::new(self.keys.clone(), row)
        }))
    }

    async fn consume(&mut self) -> ClientResult<ResultSummary> {
        self.rows.clear();
        Ok(self.summary.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rows() {
        let driver = MemoryDriver::new().with_result(
            "MATCH (n) RETURN n.name AS name",
            ScriptedResult::new(["name"])
                .with_row(vec![Value::from("Alice")])
                .with_row(vec![Value::from("Bob")]),
        );

        let mut session = driver.session(AccessMode::Read).unwrap();
        let mut tx = session.begin_transaction().await.unwrap();
        let mut cursor = tx.run(Query::new("MATCH (n) RETURN n.name AS name")).await.unwrap();

        assert_eq!(cursor.next().await.unwrap().unwrap().get_string("name").unwrap(), "Alice");
        assert_eq!(cursor.next().await.unwrap().unwrap().get_string("name").unwrap(), "Bob");
        assert!(cursor.next().await.unwrap().is_none());

        tx.commit().await.unwrap();
        session.close().await.unwrap();

        let stats = driver.stats();
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.sessions_closed, 1);
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.fetches, 3);
        assert_eq!(driver.executed_queries(), vec!["MATCH (n) RETURN n.name AS name"]);
    }

    #[tokio::test]
    async fn test_run_failure_is_wrapped() {
        let driver = MemoryDriver::new().with_result(
            "BAD",
            ScriptedResult::empty().fail_on_run("Neo.ClientError.Statement.SyntaxError", "bad syntax"),
        );

        let mut session = driver.session(AccessMode::Write).unwrap();
        let mut tx = session.begin_transaction().await.unwrap();
        let err = tx.run(Query::new("BAD")).await.err().unwrap();

        assert!(matches!(err, ClientError::Completion(_)));
        assert!(matches!(err.into_root_cause(), ClientError::Query { .. }));
    }

    #[tokio::test]
    async fn test_closed_driver_refuses_sessions() {
        let driver = MemoryDriver::new();
        GraphDriver::close(&driver).await.unwrap();

        assert!(driver.is_closed());
        assert!(matches!(driver.session(AccessMode::Read), Err(ClientError::Closed(_))));

        driver.factory().create(&DriverTarget::Single { uri: "bolt://x:1".into() }, &ClientOptions::new()).unwrap();
        assert!(!driver.is_closed());
        assert_eq!(driver.stats().drivers_created, 1);
    }

    #[tokio::test]
    async fn test_transaction_closed_after_commit() {
        let driver = MemoryDriver::new();
        let mut session = driver.session(AccessMode::Write).unwrap();
        let mut tx = session.begin_transaction().await.unwrap();
        tx.rollback().await.unwrap();

        assert!(matches!(tx.run(Query::new("RETURN 1")).await, Err(ClientError::Transaction(_))));
        assert_eq!(driver.stats().rollbacks, 1);
    }
}
