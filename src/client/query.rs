//! Query & Summary
//!
//! 쿼리와 결과 요약

use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use super::types::Value;

// ============================================================================
// Query - 쿼리
// ============================================================================

/// 쿼리
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// 쿼리 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: HashMap<String, Value>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<S: Into<String>> From<(S, HashMap<String, Value>)> for Query {
    fn from((text, params): (S, HashMap<String, Value>)) -> Self {
        Self::new(text).with_params(params)
    }
}

// ============================================================================
// Counters - 변경 카운터
// ============================================================================

/// 변경 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    /// 생성된 노드 수
    pub nodes_created: i64,
    /// 삭제된 노드 수
    pub nodes_deleted: i64,
    /// 생성된 관계 수
    pub relationships_created: i64,
    /// 삭제된 관계 수
    pub relationships_deleted: i64,
    /// 설정된 속성 수
    pub properties_set: i64,
    /// 추가된 레이블 수
    pub labels_added: i64,
    /// 제거된 레이블 수
    pub labels_removed: i64,
    /// 생성된 인덱스 수
    pub indexes_added: i64,
    /// 제거된 인덱스 수
    pub indexes_removed: i64,
    /// 추가된 제약조건 수
    pub constraints_added: i64,
    /// 제거된 제약조건 수
    pub constraints_removed: i64,
    /// 시스템 변경 수
    pub system_updates: i64,
}

impl Counters {
    /// 변경 사항 존재 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
            || self.contains_schema_updates()
    }

    /// 스키마 변경 존재 여부
    pub fn contains_schema_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

impl Add for Counters {
    type Output = Counters;

    fn add(self, other: Counters) -> Counters {
        Counters {
            nodes_created: self.nodes_created + other.nodes_created,
            nodes_deleted: self.nodes_deleted + other.nodes_deleted,
            relationships_created: self.relationships_created + other.relationships_created,
            relationships_deleted: self.relationships_deleted + other.relationships_deleted,
            properties_set: self.properties_set + other.properties_set,
            labels_added: self.labels_added + other.labels_added,
            labels_removed: self.labels_removed + other.labels_removed,
            indexes_added: self.indexes_added + other.indexes_added,
            indexes_removed: self.indexes_removed + other.indexes_removed,
            constraints_added: self.constraints_added + other.constraints_added,
            constraints_removed: self.constraints_removed + other.constraints_removed,
            system_updates: self.system_updates + other.system_updates,
        }
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Counters) {
        *self = *self + other;
    }
}

// ============================================================================
// ResultSummary - 결과 요약
// ============================================================================

/// 쿼리 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// 읽기 전용
    #[default]
    ReadOnly,
    /// 읽기/쓰기
    ReadWrite,
    /// 쓰기 전용
    WriteOnly,
    /// 스키마 변경
    SchemaWrite,
}

/// 결과 요약
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// 쿼리
    pub query: Option<Query>,
    /// 쿼리 타입
    pub query_type: QueryType,
    /// 카운터
    pub counters: Counters,
    /// 데이터베이스 이름
    pub database: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
