//! M10.6: Reactive Streams
//!
//! tokio-stream 기반 pull 방식 레코드 스트림
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let stream = client.query_stream("MATCH (n) RETURN n").await?.into_stream(32);
//!
//! let names: Vec<String> = stream
//!     .filter_map(|r| async move { r.ok() })
//!     .map(|r| r.get_string("name").unwrap_or_default())
//!     .collect()
//!     .await;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::error::{ClientError, ClientResult};
use super::record::Record;

// ============================================================================
// ReactiveRecordStream - 비동기 레코드 스트림
// ============================================================================

/// 비동기 레코드 스트림
///
/// `futures::Stream`을 구현하므로 `StreamExt` 조합자를 그대로 쓸 수 있습니다.
pub struct ReactiveRecordStream {
    inner: Pin<Box<dyn Stream<Item = ClientResult<Record>> + Send>>,
    keys: Vec<String>,
}

impl std::fmt::Debug for ReactiveRecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveRecordStream")
            .field("keys", &self.keys)
            .finish()
    }
}

impl ReactiveRecordStream {
    /// mpsc 채널에서 생성
    pub fn from_channel(rx: mpsc::Receiver<ClientResult<Record>>, keys: Vec<String>) -> Self {
        Self {
            inner: Box::pin(ReceiverStream::new(rx)),
            keys,
        }
    }

    /// 레코드 벡터에서 생성
    pub fn from_records(records: Vec<Record>) -> Self {
        let keys = records.first().map(|r| r.keys().to_vec()).unwrap_or_default();
        Self {
            inner: Box::pin(tokio_stream::iter(records.into_iter().map(Ok))),
            keys,
        }
    }

    /// 에러 하나로 끝나는 스트림
    pub fn error(err: ClientError) -> Self {
        Self {
            inner: Box::pin(tokio_stream::once(Err(err))),
            keys: Vec::new(),
        }
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 모든 레코드 수집 (성공한 것만)
    pub async fn collect(self) -> Vec<Record> {
        use tokio_stream::StreamExt;

        self.inner.filter_map(|r| r.ok()).collect().await
    }

    /// 모든 레코드 수집 (첫 에러에서 중단)
    pub async fn try_collect(self) -> ClientResult<Vec<Record>> {
        use tokio_stream::StreamExt;

        let mut results = Vec::new();
        let mut stream = self.inner;

        while let Some(result) = stream.next().await {
            results.push(result?);
        }

        Ok(results)
    }

    /// 첫 번째 레코드
    pub async fn first(self) -> ClientResult<Option<Record>> {
        use tokio_stream::StreamExt;

        let mut stream = self.inner;
        stream.next().await.transpose()
    }

    /// 레코드 수 (에러 제외)
    pub async fn count(self) -> usize {
        use tokio_stream::StreamExt;

        let mut count = 0;
        let mut stream = self.inner;
        while let Some(result) = stream.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }
}

impl Stream for ReactiveRecordStream {
    type Item = ClientResult<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
