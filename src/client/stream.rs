//! M10.5: Record Stream
//!
//! 커서를 push 방식의 일시정지/재개/취소 가능한 스트림으로 변환하는 상태 기계
//!
//! ```text
//! Idle ──handler──▶ Started ──end of data──▶ Exhausted ──in-flight 0──▶ Stopped
//!   │                  │                         │
//!   └──unsubscribe─────┴──────error/unsubscribe──┴────────────────────▶ Stopped
//! ```
//!
//! 스트림은 트랜잭션과 세션을 소유하며, `Stopped`에 진입할 때 정확히 한 번
//! 커밋(롤백 아님)하고 닫습니다. 상태 변경은 스트림 잠금 안에서 계산하고,
//! 사용자 콜백은 잠금 밖에서 스트림 컨텍스트를 통해 호출합니다.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::context::Context;
use super::cursor::CursorAdapter;
use super::driver::{GraphSession, GraphTransaction};
use super::error::{ClientError, ClientResult};
use super::queue::{DeliveryQueue, ErrorHandler, ItemHandler, VoidHandler, DEFAULT_HIGH_WATER_MARK};
use super::reactive::ReactiveRecordStream;
use super::record::Record;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// 레코드 핸들러
pub type RecordHandler = ItemHandler<Record>;

// ============================================================================
// StreamConfig - 스트림 설정
// ============================================================================

/// 스트림 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// 전달 큐 high-water mark (파이프라이닝 깊이, 1이면 한 번에 하나씩)
    pub high_water_mark: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl StreamConfig {
    /// 기본 설정
    pub fn new() -> Self {
        Self::default()
    }

    /// high-water mark 설정
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark.max(1);
        self
    }
}

// ============================================================================
// StreamState - 스트림 상태
// ============================================================================

/// 스트림 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// 핸들러 없음, fetch 안 함
    Idle,
    /// fetch 진행 중
    Started,
    /// 커서 끝, 남은 항목 전달 중
    Exhausted,
    /// 종료 (자원 해제됨)
    Stopped,
}

// ============================================================================
// Internal state
// ============================================================================

struct Resources {
    transaction: Box<dyn GraphTransaction>,
    session: Box<dyn GraphSession>,
}

impl Resources {
    /// 커밋 후 세션 닫기 (실패는 로그만)
    async fn release(mut self, stream_id: u64) {
        if let Err(e) = self.transaction.commit().await {
            tracing::warn!("Record stream {} commit failed: {}", stream_id, e.into_root_cause());
        }
        if let Err(e) = self.session.close().await {
            tracing::warn!("Record stream {} session close failed: {}", stream_id, e.into_root_cause());
        }
        tracing::debug!("Record stream {} released its transaction", stream_id);
    }
}

enum Terminal {
    End,
    Failed(ClientError),
}

enum Signal {
    End(Option<VoidHandler>),
    Failed(Option<ErrorHandler>, ClientError),
}

impl Signal {
    fn fire(self, stream_id: u64) {
        match self {
            Signal::End(Some(h)) => h(),
            Signal::End(None) => {}
            Signal::Failed(Some(h), e) => h(e),
            Signal::Failed(None, e) => {
                tracing::warn!("Record stream {} failed without an exception handler: {}", stream_id, e);
            }
        }
    }
}

struct Teardown {
    resources: Option<Resources>,
    signal: Signal,
    retained: Option<Arc<Shared>>,
}

enum Step {
    Wait,
    FetchNext,
    Finish(Teardown),
}

struct StreamInner {
    state: StreamState,
    in_flight: usize,
    /// fetch 진행 중에는 None
    cursor: Option<CursorAdapter>,
    resources: Option<Resources>,
    end_handler: Option<VoidHandler>,
    exception_handler: Option<ErrorHandler>,
    /// Started 동안 스트림 자신을 유지
    retained: Option<Arc<Shared>>,
}

struct Shared {
    id: u64,
    context: Context,
    keys: Vec<String>,
    queue: DeliveryQueue<Record>,
    inner: Mutex<StreamInner>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let Some(resources) = self.inner.get_mut().resources.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(resources.release(self.id));
            }
            Err(_) => {
                tracing::warn!("Record stream {} dropped outside a runtime, transaction left open", self.id);
            }
        }
    }
}

// ============================================================================
// RecordStream - 레코드 스트림
// ============================================================================

/// 레코드 스트림
///
/// 복제본은 같은 스트림을 가리킵니다. 모든 메서드는 어느 스레드에서 호출해도
/// 안전하며 `Stopped` 이후에는 아무 일도 하지 않습니다.
#[derive(Clone)]
pub struct RecordStream {
    shared: Arc<Shared>,
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RecordStream")
            .field("id", &self.shared.id)
            .field("state", &inner.state)
            .field("in_flight", &inner.in_flight)
            .field("keys", &self.shared.keys)
            .finish()
    }
}

fn upgrade(weak: &Weak<Shared>) -> Option<RecordStream> {
    weak.upgrade().map(|shared| RecordStream { shared })
}

impl RecordStream {
    /// 새 스트림 생성
    ///
    /// 트랜잭션과 세션의 소유권을 가져갑니다.
    pub fn new(
        context: Context,
        cursor: CursorAdapter,
        transaction: Box<dyn GraphTransaction>,
        session: Box<dyn GraphSession>,
        config: StreamConfig,
    ) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let keys = cursor.keys().to_vec();
        let queue = DeliveryQueue::with_high_water_mark(context.clone(), config.high_water_mark);

        let shared = Arc::new(Shared {
            id,
            context,
            keys,
            queue,
            inner: Mutex::new(StreamInner {
                state: StreamState::Idle,
                in_flight: 0,
                cursor: Some(cursor),
                resources: Some(Resources { transaction, session }),
                end_handler: None,
                exception_handler: None,
                retained: None,
            }),
        });

        let weak = Arc::downgrade(&shared);
        shared.queue.set_exception_handler(Some(Arc::new(move |err: ClientError| {
            if let Some(stream) = upgrade(&weak) {
                stream.handle_exception(err);
            }
        })));
        let weak = Arc::downgrade(&shared);
        shared.queue.set_drain_handler(Some(Arc::new(move || {
            if let Some(stream) = upgrade(&weak) {
                stream.fetch_record();
            }
        })));

        tracing::debug!("Record stream {} created (high-water mark {})", id, config.high_water_mark);
        Self { shared }
    }

    /// 스트림 ID
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// 현재 상태
    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().state
    }

    /// fetch 되었지만 아직 전달되지 않은 항목 수
    pub fn in_flight(&self) -> usize {
        self.shared.inner.lock().in_flight
    }

    /// 전달 큐에 쌓인 항목 수
    pub fn buffered(&self) -> usize {
        self.shared.queue.len()
    }

    /// 컬럼 키
    pub fn keys(&self) -> &[String] {
        &self.shared.keys
    }

    /// 에러 핸들러 등록
    pub fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(ClientError) + Send + Sync + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state != StreamState::Stopped {
            inner.exception_handler = Some(Arc::new(handler));
        }
        self
    }

    /// 종료 핸들러 등록
    pub fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state != StreamState::Stopped {
            inner.end_handler = Some(Arc::new(handler));
        }
        self
    }

    /// 레코드 핸들러 등록 (소비 시작)
    pub fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.set_handler(Some(Arc::new(handler)))
    }

    /// 구독 해제 (커밋 후 종료, 종료 핸들러 호출)
    pub fn unsubscribe(&self) -> &Self {
        self.set_handler(None)
    }

    /// 레코드 핸들러 설정 (None이면 구독 해제)
    pub fn set_handler(&self, handler: Option<RecordHandler>) -> &Self {
        let Some(handler) = handler else {
            let teardown = {
                let mut inner = self.shared.inner.lock();
                self.stop_locked(&mut inner, Terminal::End)
            };
            if let Some(teardown) = teardown {
                self.finish(teardown);
            }
            return self;
        };

        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.state == StreamState::Stopped {
                return self;
            }
            let weak = Arc::downgrade(&self.shared);
            self.shared.queue.set_handler(Some(Arc::new(move |record: Record| {
                if let Some(stream) = upgrade(&weak) {
                    stream.handle_record(&handler, record);
                }
            })));
            if inner.state == StreamState::Idle {
                inner.state = StreamState::Started;
                inner.retained = Some(self.shared.clone());
                true
            } else {
                false
            }
        };

        if start {
            tracing::debug!("Record stream {} started", self.shared.id);
            let stream = self.clone();
            self.shared.context.dispatch(move || stream.fetch_record());
        }
        self
    }

    /// 전달 일시정지 (버퍼 유지)
    pub fn pause(&self) -> &Self {
        let inner = self.shared.inner.lock();
        if inner.state != StreamState::Stopped {
            self.shared.queue.pause();
        }
        self
    }

    /// 전달 재개
    pub fn resume(&self) -> &Self {
        let inner = self.shared.inner.lock();
        if inner.state != StreamState::Stopped {
            self.shared.queue.resume();
        }
        self
    }

    /// `amount`개 추가 전달 허용
    pub fn fetch(&self, amount: u64) -> &Self {
        let inner = self.shared.inner.lock();
        if inner.state != StreamState::Stopped {
            self.shared.queue.fetch(amount);
        }
        self
    }

    /// pull 방식 스트림으로 변환
    ///
    /// 채널이 가득 차면 레코드 스트림을 일시정지하고, 자리가 나면 재개합니다.
    /// 수신 측이 드롭되면 구독을 해제합니다.
    pub fn into_stream(self, buffer: usize) -> ReactiveRecordStream {
        let (tx, rx) = mpsc::channel::<ClientResult<Record>>(buffer.max(1));
        let keys = self.keys().to_vec();
        let pending: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

        let error_tx = tx.clone();
        let error_pending = pending.clone();
        self.exception_handler(move |err| {
            let tx = error_tx.clone();
            let previous = error_pending.lock().take();
            tokio::spawn(async move {
                // 대기 중인 레코드를 먼저 보냄
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                let _ = tx.send(Err(err)).await;
            });
        });

        let weak = Arc::downgrade(&self.shared);
        self.handler(move |record| match tx.try_send(Ok(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                let Some(stream) = upgrade(&weak) else {
                    return;
                };
                stream.pause();
                let tx = tx.clone();
                let handle = tokio::spawn(async move {
                    if tx.send(item).await.is_ok() {
                        stream.resume();
                    } else {
                        stream.unsubscribe();
                    }
                });
                *pending.lock() = Some(handle);
            }
            Err(TrySendError::Closed(_)) => {
                if let Some(stream) = upgrade(&weak) {
                    stream.unsubscribe();
                }
            }
        });

        ReactiveRecordStream::from_channel(rx, keys)
    }

    fn fetch_record(&self) {
        let cursor = {
            let mut inner = self.shared.inner.lock();
            if inner.state != StreamState::Started {
                return;
            }
            // None이면 이미 fetch 진행 중
            match inner.cursor.take() {
                Some(cursor) => cursor,
                None => return,
            }
        };

        let stream = self.clone();
        tokio::spawn(async move {
            let mut cursor = cursor;
            let result = cursor.fetch_one().await;
            let context = stream.shared.context.clone();
            context.run_on_context(move || stream.handle_fetched(cursor, result));
        });
    }

    fn handle_fetched(&self, cursor: CursorAdapter, result: ClientResult<Option<Record>>) {
        let step = {
            let mut inner = self.shared.inner.lock();
            if inner.state == StreamState::Stopped {
                return;
            }
            match result {
                Ok(Some(record)) => {
                    inner.cursor = Some(cursor);
                    inner.in_flight += 1;
                    if self.shared.queue.write(record) {
                        Step::FetchNext
                    } else {
                        Step::Wait
                    }
                }
                Ok(None) => {
                    inner.state = StreamState::Exhausted;
                    tracing::debug!(
                        "Record stream {} exhausted, {} in flight",
                        self.shared.id,
                        inner.in_flight
                    );
                    if inner.in_flight == 0 {
                        self.stop_step(&mut inner, Terminal::End)
                    } else {
                        Step::Wait
                    }
                }
                Err(e) => self.stop_step(&mut inner, Terminal::Failed(e)),
            }
        };

        match step {
            Step::Wait => {}
            Step::FetchNext => self.fetch_record(),
            Step::Finish(teardown) => self.finish(teardown),
        }
    }

    fn handle_record(&self, handler: &RecordHandler, record: Record) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == StreamState::Stopped {
                return;
            }
            debug_assert!(inner.in_flight > 0, "record delivered without an outstanding fetch");
            inner.in_flight -= 1;
        }

        handler(record);

        let teardown = {
            let mut inner = self.shared.inner.lock();
            if inner.state == StreamState::Exhausted && inner.in_flight == 0 {
                self.stop_locked(&mut inner, Terminal::End)
            } else {
                None
            }
        };
        if let Some(teardown) = teardown {
            self.finish(teardown);
        }
    }

    fn handle_exception(&self, err: ClientError) {
        let teardown = {
            let mut inner = self.shared.inner.lock();
            self.stop_locked(&mut inner, Terminal::Failed(err))
        };
        if let Some(teardown) = teardown {
            self.finish(teardown);
        }
    }

    fn stop_step(&self, inner: &mut StreamInner, terminal: Terminal) -> Step {
        self.stop_locked(inner, terminal).map_or(Step::Wait, Step::Finish)
    }

    /// `Stopped`로 전이 (이미 Stopped면 None)
    fn stop_locked(&self, inner: &mut StreamInner, terminal: Terminal) -> Option<Teardown> {
        if inner.state == StreamState::Stopped {
            return None;
        }
        let previous = std::mem::replace(&mut inner.state, StreamState::Stopped);

        let queue = &self.shared.queue;
        queue.set_handler(None);
        queue.set_drain_handler(None);
        queue.set_exception_handler(None);
        queue.clear();
        inner.cursor = None;

        let end_handler = inner.end_handler.take();
        let exception_handler = inner.exception_handler.take();
        let signal = match terminal {
            Terminal::End => Signal::End(end_handler),
            Terminal::Failed(e) => Signal::Failed(exception_handler, e),
        };

        tracing::debug!("Record stream {} stopped (was {:?})", self.shared.id, previous);
        Some(Teardown {
            resources: inner.resources.take(),
            signal,
            retained: inner.retained.take(),
        })
    }

    /// 커밋/닫기 후 컨텍스트에서 종료 신호 전달
    fn finish(&self, teardown: Teardown) {
        let Teardown {
            resources,
            signal,
            retained,
        } = teardown;
        drop(retained);

        let id = self.shared.id;
        let context = self.shared.context.clone();
        let release = async move {
            if let Some(resources) = resources {
                resources.release(id).await;
            }
            context.run_on_context(move || signal.fire(id));
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release);
            }
            Err(_) => {
                tracing::warn!("Record stream {} stopped outside a runtime, transaction left open", id);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
