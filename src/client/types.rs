//! Value Types
//!
//! 레코드 셀과 쿼리 파라미터에 쓰이는 값

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult};

// ============================================================================
// Value - 그래프 값
// ============================================================================

/// 레코드/파라미터 값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// 시간대 포함 일시
    DateTime(DateTime<FixedOffset>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
    /// Node
    Node(Node),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
        }
    }

    fn mismatch(&self, target: &str) -> ClientError {
        ClientError::type_conversion(format!("Cannot convert {} to {}", self.kind(), target))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Node(n) => write!(f, "{}", n),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from! {
    bool => Boolean,
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    String => String,
    &str => String,
    DateTime<FixedOffset> => DateTime,
    Node => Node,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<Value> for i64 {
    type Error = ClientError;

    fn try_from(value: Value) -> ClientResult<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(other.mismatch("i64")),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ClientError;

    fn try_from(value: Value) -> ClientResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("String")),
        }
    }
}

impl TryFrom<Value> for DateTime<FixedOffset> {
    type Error = ClientError;

    fn try_from(value: Value) -> ClientResult<Self> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            other => Err(other.mismatch("DateTime")),
        }
    }
}

impl TryFrom<Value> for Node {
    type Error = ClientError;

    fn try_from(value: Value) -> ClientResult<Self> {
        match value {
            Value::Node(n) => Ok(n),
            other => Err(other.mismatch("Node")),
        }
    }
}

// ============================================================================
// Node - 그래프 노드
// ============================================================================

/// 그래프 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 노드 ID
    pub id: i64,
    /// 레이블
    pub labels: Vec<String>,
    /// 속성
    pub properties: HashMap<String, Value>,
}

impl Node {
    /// 새 노드 생성
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, Value>) -> Self {
        Self {
            id,
            labels,
            properties,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.id)?;
        for label in &self.labels {
            write!(f, ":{}", label)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Tests
// ============================================================================
