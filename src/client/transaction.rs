//! M10.9: Explicit Transaction
//!
//! 호출자가 직접 커밋/롤백하는 쓰기 트랜잭션

use super::cursor::{CursorAdapter, CursorOutcome, CursorTerminal};
use super::driver::{GraphSession, GraphTransaction};
use super::error::{ClientError, ClientResult};
use super::query::{Query, ResultSummary};
use super::record::Record;

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 커밋됨
    Committed,
    /// 롤백됨
    RolledBack,
    /// 실패
    Failed,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// ClientTransaction - 명시적 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
///
/// `commit()`이나 `rollback()` 후에는 결과와 관계없이 세션이 닫힙니다.
/// 끝내지 않고 드롭하면 백그라운드에서 롤백하고 세션을 닫습니다.
pub struct ClientTransaction {
    /// 트랜잭션 (Option으로 래핑하여 Drop에서 이동 가능)
    transaction: Option<Box<dyn GraphTransaction>>,
    session: Option<Box<dyn GraphSession>>,
    state: TransactionState,
}

impl std::fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("state", &self.state)
            .finish()
    }
}

impl ClientTransaction {
    pub(crate) fn new(transaction: Box<dyn GraphTransaction>, session: Box<dyn GraphSession>) -> Self {
        Self {
            transaction: Some(transaction),
            session: Some(session),
            state: TransactionState::Active,
        }
    }

    /// 현재 상태
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// 쿼리 실행 후 요약 반환
    pub async fn query(&mut self, query: Query) -> ClientResult<ResultSummary> {
        self.run(query, CursorTerminal::ConsumeAll).await?.into_summary()
    }

    /// 쿼리 실행 후 모든 레코드 반환
    pub async fn read_query(&mut self, query: Query) -> ClientResult<Vec<Record>> {
        self.run(query, CursorTerminal::CollectAll).await?.into_records()
    }

    async fn run(&mut self, query: Query, terminal: CursorTerminal) -> ClientResult<CursorOutcome> {
        let tx = self.active()?;
        let cursor = tx.run(query).await.map_err(ClientError::into_root_cause)?;
        CursorAdapter::new(cursor).apply(terminal).await
    }

    /// 커밋 (세션은 항상 닫힘)
    pub async fn commit(mut self) -> ClientResult<()> {
        let mut tx = self.take_active()?;
        let result = tx.commit().await.map_err(ClientError::into_root_cause);
        self.state = if result.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::Failed
        };
        self.finish(result).await
    }

    /// 롤백 (세션은 항상 닫힘)
    pub async fn rollback(mut self) -> ClientResult<()> {
        let mut tx = self.take_active()?;
        let result = tx.rollback().await.map_err(ClientError::into_root_cause);
        self.state = if result.is_ok() {
            TransactionState::RolledBack
        } else {
            TransactionState::Failed
        };
        self.finish(result).await
    }

    fn active(&mut self) -> ClientResult<&mut Box<dyn GraphTransaction>> {
        let state = self.state;
        self.transaction
            .as_mut()
            .ok_or_else(|| ClientError::transaction(format!("Transaction is not active: {:?}", state)))
    }

    fn take_active(&mut self) -> ClientResult<Box<dyn GraphTransaction>> {
        let state = self.state;
        self.transaction
            .take()
            .ok_or_else(|| ClientError::transaction(format!("Transaction is not active: {:?}", state)))
    }

    /// 세션 닫기, 완료 결과가 실패면 그 에러를 우선
    async fn finish(&mut self, result: ClientResult<()>) -> ClientResult<()> {
        let closed = match self.session.take() {
            Some(mut session) => session.close().await.map_err(ClientError::into_root_cause),
            None => Ok(()),
        };
        if let Err(e) = &closed {
            tracing::warn!("Failed to close session after {:?}: {}", self.state, e);
        }
        result.and(closed)
    }
}

impl Drop for ClientTransaction {
    fn drop(&mut self) {
        let (Some(mut tx), Some(mut session)) = (self.transaction.take(), self.session.take()) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Unfinished transaction dropped, rolling back");
                handle.spawn(async move {
                    if let Err(e) = tx.rollback().await {
                        tracing::warn!("Failed to roll back dropped transaction: {}", e);
                    }
                    if let Err(e) = session.close().await {
                        tracing::warn!("Failed to close session of dropped transaction: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Transaction dropped outside a runtime, not rolled back");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::driver::{AccessMode, GraphDriver};
    use crate::client::memory::{MemoryDriver, ScriptedResult};
    use crate::client::query::Counters;

    async fn begin(driver: &MemoryDriver) -> ClientTransaction {
        let mut session = driver.session(AccessMode::Write).unwrap();
        let tx = session.begin_transaction().await.unwrap();
        ClientTransaction::new(tx, session)
    }

    #[tokio::test]
    async fn test_query_and_commit() {
        let counters = Counters {
            nodes_created: 1,
            ..Default::default()
        };
        let driver = MemoryDriver::new()
            .with_result("CREATE (n)", ScriptedResult::empty().with_counters(counters))
            .with_result("MATCH (n) RETURN n", ScriptedResult::sequence("n", 1..=3));

        let mut tx = begin(&driver).await;
        let summary = tx.query(Query::new("CREATE (n)")).await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);

        let records = tx.read_query(Query::new("MATCH (n) RETURN n")).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(tx.state(), TransactionState::Active);

        tx.commit().await.unwrap();
        let stats = driver.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 0);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_rollback_closes_session() {
        let driver = MemoryDriver::new();
        let tx = begin(&driver).await;

        tx.rollback().await.unwrap();
        let stats = driver.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_still_closes_session() {
        let driver = MemoryDriver::new().with_commit_failure("deadlock detected");
        let tx = begin(&driver).await;

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, ClientError::Transaction(_)));
        assert_eq!(driver.stats().sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_query_error_is_unwrapped() {
        let driver = MemoryDriver::new().with_result(
            "RETURN 1/0",
            ScriptedResult::empty().fail_on_run("Neo.ClientError.Statement.ArithmeticError", "/ by zero"),
        );
        let mut tx = begin(&driver).await;

        let err = tx.query(Query::new("RETURN 1/0")).await.unwrap_err();
        match err {
            ClientError::Query { code, .. } => assert_eq!(code, "Neo.ClientError.Statement.ArithmeticError"),
            other => panic!("Expected Query error, got {:?}", other),
        }
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let driver = MemoryDriver::new();
        let tx = begin(&driver).await;
        drop(tx);

        for _ in 0..100 {
            if driver.stats().sessions_closed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = driver.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[test]
    fn test_state_is_terminated() {
        assert!(!TransactionState::Active.is_terminated());
        assert!(TransactionState::Committed.is_terminated());
        assert!(TransactionState::RolledBack.is_terminated());
        assert!(TransactionState::Failed.is_terminated());
    }
}
