//! Cursor Adapter
//!
//! 드라이버 커서를 "다음 레코드 또는 끝" 단일 연산으로 감쌉니다.

use super::driver::ResultCursor;
use super::error::{ClientError, ClientResult};
use super::query::ResultSummary;
use super::record::Record;

// ============================================================================
// CursorAdapter - 커서 어댑터
// ============================================================================

/// 커서 어댑터
///
/// `&mut self`를 요구하므로 한 번에 하나의 fetch만 진행될 수 있습니다.
/// 재시도는 하지 않습니다.
pub struct CursorAdapter {
    cursor: Box<dyn ResultCursor>,
}

impl std::fmt::Debug for CursorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorAdapter")
            .field("keys", &self.cursor.keys())
            .finish()
    }
}

impl CursorAdapter {
    /// 새 어댑터 생성
    pub fn new(cursor: Box<dyn ResultCursor>) -> Self {
        Self { cursor }
    }

    /// 컬럼 키
    pub fn keys(&self) -> &[String] {
        self.cursor.keys()
    }

    /// 다음 레코드 가져오기
    ///
    /// `Ok(None)`은 정상적인 결과 끝입니다. 드라이버의 완료 래퍼는 벗겨집니다.
    pub async fn fetch_one(&mut self) -> ClientResult<Option<Record>> {
        self.cursor.next().await.map_err(ClientError::into_root_cause)
    }

    /// 남은 레코드를 버리고 요약 반환
    pub async fn consume(&mut self) -> ClientResult<ResultSummary> {
        self.cursor.consume().await.map_err(ClientError::into_root_cause)
    }

    /// 종결 전략 적용
    pub async fn apply(&mut self, terminal: CursorTerminal) -> ClientResult<CursorOutcome> {
        match terminal {
            CursorTerminal::ConsumeAll => self.consume().await.map(CursorOutcome::Summary),
            CursorTerminal::CollectAll => {
                let mut records = Vec::new();
                while let Some(record) = self.fetch_one().await? {
                    records.push(record);
                }
                Ok(CursorOutcome::Records(records))
            }
            CursorTerminal::SingleOrError => {
                let first = self.fetch_one().await?.ok_or_else(|| {
                    ClientError::no_such_record(
                        "Cannot retrieve a single record, because this result is empty.",
                    )
                })?;
                if self.fetch_one().await?.is_some() {
                    return Err(ClientError::no_such_record(
                        "Expected a result with a single record, but this result contains at least one more.",
                    ));
                }
                Ok(CursorOutcome::Record(first))
            }
        }
    }
}

// ============================================================================
// CursorTerminal - 종결 전략
// ============================================================================

/// 커서 종결 연산
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorTerminal {
    /// 레코드를 버리고 요약만
    ConsumeAll,
    /// 모든 레코드 수집
    CollectAll,
    /// 정확히 하나의 레코드
    SingleOrError,
}

/// 종결 연산 결과
#[derive(Debug, Clone)]
pub enum CursorOutcome {
    /// 결과 요약
    Summary(ResultSummary),
    /// 레코드 목록
    Records(Vec<Record>),
    /// 단일 레코드
    Record(Record),
}

impl CursorOutcome {
    /// 요약으로 변환
    pub fn into_summary(self) -> ClientResult<ResultSummary> {
        match self {
            Self::Summary(summary) => Ok(summary),
            other => Err(mismatch("summary", &other)),
        }
    }

    /// 레코드 목록으로 변환
    pub fn into_records(self) -> ClientResult<Vec<Record>> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Record(record) => Ok(vec![record]),
            other => Err(mismatch("records", &other)),
        }
    }

    /// 단일 레코드로 변환
    pub fn into_record(self) -> ClientResult<Record> {
        match self {
            Self::Record(record) => Ok(record),
            other => Err(mismatch("record", &other)),
        }
    }
}

fn mismatch(expected: &str, outcome: &CursorOutcome) -> ClientError {
    let actual = match outcome {
        CursorOutcome::Summary(_) => "summary",
        CursorOutcome::Records(_) => "records",
        CursorOutcome::Record(_) => "record",
    };
    ClientError::internal(format!("Expected {} outcome, got {}", expected, actual))
}

// ============================================================================
// Tests
// ============================================================================
