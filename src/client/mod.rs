//! Client Module
//!
//! Step 10: 리액티브 클라이언트 (스트리밍 브리지)
//!
//! # Milestones
//!
//! - M10.1: 클라이언트 설정 (ClientOptions, AuthOptions, EncryptionOptions)
//! - M10.2: 실행 컨텍스트 (Context)
//! - M10.3: 전달 큐 (DeliveryQueue, Demand)
//! - M10.4: 드라이버 경계 (GraphDriver, DriverSupplier)
//! - M10.5: 레코드 스트림 (RecordStream, StreamState)
//! - M10.6: 리액티브 스트림 (tokio-stream 기반)
//! - M10.7: 공유 드라이버 레지스트리 (SharedDriverRegistry)
//! - M10.8: 클라이언트 (GraphClient)
//! - M10.9: 명시적 트랜잭션 (ClientTransaction)
//!
//! # Example
//!
//! ```ignore
//! use zeta4g_reactive::client::{ClientOptions, GraphClient, SharedDriverRegistry};
//!
//! let registry = SharedDriverRegistry::new();
//! let client = GraphClient::create_shared(&registry, ClientOptions::new(), factory)?;
//!
//! // 관리 트랜잭션
//! let summary = client.execute("CREATE (n:Person {name: 'Alice'})").await?;
//! let people = client.find("MATCH (n:Person) RETURN n").await?;
//!
//! // 스트리밍
//! let stream = client.query_stream("MATCH (n) RETURN n").await?;
//! stream
//!     .exception_handler(|err| eprintln!("failed: {}", err))
//!     .end_handler(|| println!("done"))
//!     .handler(|record| println!("{:?}", record));
//!
//! // 공유 참조 해제 (마지막 참조면 드라이버 닫힘)
//! client.close().await?;
//! ```

mod client;
mod context;
mod cursor;
mod driver;
mod error;
mod memory;
mod options;
mod query;
mod queue;
mod reactive;
mod record;
mod shared;
mod stream;
mod transaction;
mod types;

// Re-exports
pub use client::GraphClient;
pub use context::Context;
pub use cursor::{CursorAdapter, CursorOutcome, CursorTerminal};
pub use driver::{
    AccessMode, DriverFactory, DriverSupplier, DriverTarget, GraphDriver, GraphSession,
    GraphTransaction, ResultCursor,
};
pub use error::{ClientError, ClientResult};
pub use memory::{MemoryDriver, MemoryStats, ScriptedResult};
pub use options::{
    AuthOptions, AuthScheme, AuthToken, ClientOptions, EncryptionOptions, ServerAddress, Trust,
    TrustStrategy, DEFAULT_HOST, DEFAULT_PASSWORD, DEFAULT_PORT, DEFAULT_STREAM_HIGH_WATER_MARK,
    DEFAULT_USERNAME,
};
pub use query::{Counters, Query, QueryType, ResultSummary};
pub use queue::{DeliveryQueue, Demand, ErrorHandler, ItemHandler, VoidHandler, DEFAULT_HIGH_WATER_MARK};
pub use reactive::ReactiveRecordStream;
pub use record::Record;
pub use shared::{SharedDriverRegistry, SharedHandle, DEFAULT_POOL_NAME};
pub use stream::{RecordHandler, RecordStream, StreamConfig, StreamState};
pub use transaction::{ClientTransaction, TransactionState};
pub use types::{Node, Value};

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::client::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::client::Value>::new();
        $(
            map.insert($key.into(), $crate::client::Value::from($value));
        )+
        map
    }};
}
