//! Client Error Types
//!
//! 클라이언트 에러 정의

use std::io;
use thiserror::Error;

// ============================================================================
// ClientError - 클라이언트 에러
// ============================================================================

/// 클라이언트 에러
#[derive(Error, Debug)]
pub enum ClientError {
    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 세션 에러
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 에러
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 쿼리 에러
    #[error("Query error: {code} - {message}")]
    Query {
        /// 서버 에러 코드
        code: String,
        /// 에러 메시지
        message: String,
    },

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 서비스 불가
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 타입 변환 에러
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// 단일 레코드 조건 위반
    #[error("No such record: {0}")]
    NoSuchRecord(String),

    /// 전달 큐 내부 에러 (핸들러 패닉 등)
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// 이미 닫힌 리소스
    #[error("Closed: {0}")]
    Closed(String),

    /// 드라이버 완료 래퍼 (원인 에러를 감쌈)
    #[error("Completion failed: {0}")]
    Completion(#[source] Box<ClientError>),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 쿼리 에러 생성
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 단일 레코드 에러 생성
    pub fn no_such_record(msg: impl Into<String>) -> Self {
        Self::NoSuchRecord(msg.into())
    }

    /// 전달 에러 생성
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// 닫힘 에러 생성
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// 완료 래퍼 생성
    pub fn completion(cause: ClientError) -> Self {
        Self::Completion(Box::new(cause))
    }

    /// 내부 에러 생성
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 완료 래퍼를 벗겨 원인 에러 반환
    ///
    /// 드라이버가 비동기 완료 실패를 `Completion`으로 감싸 보내더라도
    /// 애플리케이션은 원래 에러 타입을 보게 됩니다.
    pub fn into_root_cause(self) -> Self {
        let mut err = self;
        while let Self::Completion(inner) = err {
            err = *inner;
        }
        err
    }

    /// 재시도 가능 여부
    ///
    /// 이 계층은 자동 재시도를 하지 않습니다. 호출자가 자체 재시도 정책을
    /// 구현할 때 사용합니다.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::ServiceUnavailable(_) => true,
            Self::Query { code, .. } => is_retryable_code(code),
            Self::Completion(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Authentication(_)
            | Self::Configuration(_)
            | Self::NoSuchRecord(_)
            | Self::TypeConversion(_)
            | Self::Query { .. } => true,
            Self::Completion(inner) => inner.is_client_error(),
            _ => false,
        }
    }
}

/// 재시도 가능한 에러 코드 확인
fn is_retryable_code(code: &str) -> bool {
    code.starts_with("Neo.TransientError")
        || code == "Neo.ClientError.Cluster.NotALeader"
        || code == "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
}

// ============================================================================
// Result Type
// ============================================================================

/// 클라이언트 결과 타입
pub type ClientResult<T> = Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
