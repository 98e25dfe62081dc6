//! M10.4: Driver Collaborator
//!
//! 그래프 데이터베이스 드라이버 경계 (세션/트랜잭션/커서)
//!
//! 이 계층은 프로토콜이나 연결 풀을 구현하지 않습니다. 실제 드라이버는
//! 아래 트레이트를 구현하고 [`DriverFactory`]로 주입됩니다.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::{ClientError, ClientResult};
use super::options::ClientOptions;
use super::query::{Query, ResultSummary};
use super::record::Record;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 세션 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// 읽기
    #[default]
    Read,
    /// 쓰기
    Write,
}

// ============================================================================
// Driver traits - 드라이버 트레이트
// ============================================================================

/// 물리 드라이버 (연결 풀 소유)
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// 세션 열기
    fn session(&self, mode: AccessMode) -> ClientResult<Box<dyn GraphSession>>;

    /// 연결 확인
    async fn verify_connectivity(&self) -> ClientResult<()>;

    /// 드라이버 닫기
    async fn close(&self) -> ClientResult<()>;
}

/// 드라이버 세션
#[async_trait]
pub trait GraphSession: Send {
    /// 트랜잭션 시작
    async fn begin_transaction(&mut self) -> ClientResult<Box<dyn GraphTransaction>>;

    /// 세션 닫기
    async fn close(&mut self) -> ClientResult<()>;
}

/// 명시적 트랜잭션
#[async_trait]
pub trait GraphTransaction: Send {
    /// 쿼리 실행
    async fn run(&mut self, query: Query) -> ClientResult<Box<dyn ResultCursor>>;

    /// 커밋
    async fn commit(&mut self) -> ClientResult<()>;

    /// 롤백
    async fn rollback(&mut self) -> ClientResult<()>;
}

/// 전진 전용 결과 커서
#[async_trait]
pub trait ResultCursor: Send {
    /// 컬럼 키
    fn keys(&self) -> &[String];

    /// 다음 레코드 (None이면 결과 끝)
    async fn next(&mut self) -> ClientResult<Option<Record>>;

    /// 남은 레코드를 버리고 요약 반환
    async fn consume(&mut self) -> ClientResult<ResultSummary>;
}

// ============================================================================
// DriverTarget - 드라이버 대상
// ============================================================================

/// 드라이버 연결 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverTarget {
    /// 단일 서버
    Single {
        /// 서버 URI
        uri: String,
    },
    /// 클러스터 (라우팅 드라이버)
    Cluster {
        /// 클러스터 노드 URI
        uris: Vec<String>,
    },
}

impl DriverTarget {
    /// 설정에서 대상 결정
    ///
    /// 클러스터 URI가 없으면 `bolt://{host}:{port}` 단일 서버입니다.
    pub fn from_options(options: &ClientOptions) -> Self {
        if options.is_cluster_mode() {
            Self::Cluster {
                uris: options.cluster_node_uris.iter().cloned().collect(),
            }
        } else {
            Self::Single {
                uri: options.single_node_uri(),
            }
        }
    }

    /// 클러스터 여부
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster { .. })
    }

    /// 대상 URI 목록
    pub fn uris(&self) -> Vec<&str> {
        match self {
            Self::Single { uri } => vec![uri.as_str()],
            Self::Cluster { uris } => uris.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for DriverTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { uri } => write!(f, "single node {}", uri),
            Self::Cluster { uris } => write!(f, "cluster [{}]", uris.join(", ")),
        }
    }
}

// ============================================================================
// DriverFactory - 드라이버 팩토리
// ============================================================================

/// 드라이버 생성기
///
/// 설정값은 해석 없이 그대로 전달됩니다.
pub trait DriverFactory: Send + Sync {
    /// 드라이버 생성
    fn create(&self, target: &DriverTarget, options: &ClientOptions) -> ClientResult<Arc<dyn GraphDriver>>;
}

impl<F> DriverFactory for F
where
    F: Fn(&DriverTarget, &ClientOptions) -> ClientResult<Arc<dyn GraphDriver>> + Send + Sync,
{
    fn create(&self, target: &DriverTarget, options: &ClientOptions) -> ClientResult<Arc<dyn GraphDriver>> {
        self(target, options)
    }
}

// ============================================================================
// DriverSupplier - 드라이버 공급자
// ============================================================================

/// 검증된 드라이버 공급자
#[derive(Clone)]
pub struct DriverSupplier {
    options: Arc<ClientOptions>,
    factory: Arc<dyn DriverFactory>,
}

impl fmt::Debug for DriverSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSupplier")
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl DriverSupplier {
    /// 새 공급자 생성
    pub fn new(options: ClientOptions, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            options: Arc::new(options),
            factory,
        }
    }

    /// 설정
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// 연결 대상
    pub fn target(&self) -> DriverTarget {
        DriverTarget::from_options(&self.options)
    }

    /// 드라이버 생성 후 연결 확인
    ///
    /// 연결 확인에 실패하면 드라이버를 닫고 원인 에러를 반환합니다.
    pub async fn supply(&self) -> ClientResult<Arc<dyn GraphDriver>> {
        let target = self.target();
        match &target {
            DriverTarget::Single { uri } => {
                tracing::info!("Creating driver in single node mode: {}", uri);
            }
            DriverTarget::Cluster { uris } => {
                tracing::info!("Creating driver in cluster mode: {:?}", uris);
            }
        }

        let driver = self
            .factory
            .create(&target, &self.options)
            .map_err(ClientError::into_root_cause)?;

        if let Err(e) = driver.verify_connectivity().await {
            if let Err(close_err) = driver.close().await {
                tracing::warn!("Failed to close unverified driver: {}", close_err);
            }
            return Err(e.into_root_cause());
        }

        Ok(driver)
    }
}

// ============================================================================
// Tests
// ============================================================================
