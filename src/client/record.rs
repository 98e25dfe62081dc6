//! Record - 쿼리 결과 레코드
//!
//! 커서가 한 번에 하나씩 내보내는 결과 행

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use super::error::{ClientError, ClientResult};
use super::types::{Node, Value};

// ============================================================================
// Record - 단일 레코드
// ============================================================================

/// 쿼리 결과 레코드
///
/// 같은 결과 집합의 레코드들은 키 목록을 공유합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 컬럼 키
    keys: Arc<[String]>,
    /// 값들
    values: Vec<Value>,
}

impl Record {
    /// 새 레코드 생성
    pub fn new(keys: impl Into<Arc<[String]>>, values: Vec<Value>) -> Self {
        Self {
            keys: keys.into(),
            values,
        }
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 레코드 길이
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 빈 레코드 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
    }

    /// 인덱스로 값 가져오기
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T>(&self, key: &str) -> ClientResult<T>
    where
        T: TryFrom<Value, Error = ClientError>,
    {
        self.get(key)
            .cloned()
            .ok_or_else(|| ClientError::type_conversion(format!("Key '{}' not found", key)))
            .and_then(T::try_from)
    }

    /// Integer 값 가져오기
    pub fn get_int(&self, key: &str) -> ClientResult<i64> {
        self.get_as::<i64>(key)
    }

    /// String 값 가져오기
    pub fn get_string(&self, key: &str) -> ClientResult<String> {
        self.get_as::<String>(key)
    }

    /// DateTime 값 가져오기
    pub fn get_date_time(&self, key: &str) -> ClientResult<DateTime<FixedOffset>> {
        self.get_as::<DateTime<FixedOffset>>(key)
    }

    /// Node 값 가져오기
    pub fn get_node(&self, key: &str) -> ClientResult<Node> {
        self.get_as::<Node>(key)
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

// ============================================================================
// Tests
// ============================================================================
