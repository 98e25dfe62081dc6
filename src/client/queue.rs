//! M10.3: Bounded Delivery Queue
//!
//! 생산자/소비자 버퍼 (high-water mark, pause/resume, demand)
//!
//! `write`의 반환값은 "계속 생산해도 되는지"를 뜻합니다. `false`를 받은
//! 생산자는 drain 핸들러가 호출될 때까지 멈춰야 합니다.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::{panic_message, Context};
use super::error::ClientError;

/// 기본 high-water mark
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// 항목 핸들러
pub type ItemHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
/// 인자 없는 핸들러
pub type VoidHandler = Arc<dyn Fn() + Send + Sync>;
/// 에러 핸들러
pub type ErrorHandler = Arc<dyn Fn(ClientError) + Send + Sync>;

// ============================================================================
// Demand - 소비자 요구량
// ============================================================================

/// 소비자 요구량
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// 제한 없음 (push)
    Unbounded,
    /// 남은 허용 개수 (pull)
    Bounded(u64),
}

impl Demand {
    fn has_demand(self) -> bool {
        !matches!(self, Demand::Bounded(0))
    }

    fn decrement(&mut self) {
        if let Demand::Bounded(n) = self {
            *n = n.saturating_sub(1);
        }
    }

    fn add(&mut self, amount: u64) {
        if let Demand::Bounded(n) = self {
            *n = n.saturating_add(amount);
        }
    }
}

// ============================================================================
// DeliveryQueue - 전달 큐
// ============================================================================

struct QueueInner<T> {
    pending: VecDeque<T>,
    demand: Demand,
    high_water_mark: usize,
    overflow: bool,
    draining: bool,
    handler: Option<ItemHandler<T>>,
    drain_handler: Option<VoidHandler>,
    exception_handler: Option<ErrorHandler>,
}

impl<T> QueueInner<T> {
    fn can_deliver(&self) -> bool {
        self.handler.is_some() && self.demand.has_demand() && !self.pending.is_empty()
    }
}

/// 전달 큐
///
/// 항목은 FIFO 순서로, 큐에 연결된 컨텍스트에서, 내부 잠금 밖에서 전달됩니다.
pub struct DeliveryQueue<T> {
    context: Context,
    inner: Arc<Mutex<QueueInner<T>>>,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for DeliveryQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DeliveryQueue")
            .field("pending", &inner.pending.len())
            .field("demand", &inner.demand)
            .field("high_water_mark", &inner.high_water_mark)
            .field("overflow", &inner.overflow)
            .finish()
    }
}

impl<T: Send + 'static> DeliveryQueue<T> {
    /// 기본 high-water mark로 생성
    pub fn new(context: Context) -> Self {
        Self::with_high_water_mark(context, DEFAULT_HIGH_WATER_MARK)
    }

    /// high-water mark 지정 생성 (최소 1)
    pub fn with_high_water_mark(context: Context, high_water_mark: usize) -> Self {
        Self {
            context,
            inner: Arc::new(Mutex::new(QueueInner {
                pending: VecDeque::new(),
                demand: Demand::Unbounded,
                high_water_mark: high_water_mark.max(1),
                overflow: false,
                draining: false,
                handler: None,
                drain_handler: None,
                exception_handler: None,
            })),
        }
    }

    /// 항목 추가
    ///
    /// 버퍼가 high-water mark 미만이면 `true`를 반환합니다.
    pub fn write(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        inner.pending.push_back(item);
        let writable = inner.pending.len() < inner.high_water_mark;
        if !writable {
            inner.overflow = true;
        }
        self.schedule_drain(&mut inner);
        writable
    }

    /// 항목 핸들러 설정 (None이면 제거)
    ///
    /// 이미 쌓인 항목이 있으면 도착 순서대로 전달됩니다.
    pub fn set_handler(&self, handler: Option<ItemHandler<T>>) {
        let mut inner = self.inner.lock();
        inner.handler = handler;
        self.schedule_drain(&mut inner);
    }

    /// drain 핸들러 설정
    pub fn set_drain_handler(&self, handler: Option<VoidHandler>) {
        self.inner.lock().drain_handler = handler;
    }

    /// 에러 핸들러 설정
    pub fn set_exception_handler(&self, handler: Option<ErrorHandler>) {
        self.inner.lock().exception_handler = handler;
    }

    /// 전달 중지 (버퍼 유지)
    pub fn pause(&self) {
        self.inner.lock().demand = Demand::Bounded(0);
    }

    /// 전달 재개 (제한 없음)
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.demand = Demand::Unbounded;
        self.schedule_drain(&mut inner);
    }

    /// 요구량 추가
    pub fn fetch(&self, amount: u64) {
        let mut inner = self.inner.lock();
        inner.demand.add(amount);
        self.schedule_drain(&mut inner);
    }

    /// 버퍼 비우기
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.overflow = false;
    }

    /// 버퍼 길이
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// 버퍼가 비었는지
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// high-water mark 미만인지
    pub fn is_writable(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.len() < inner.high_water_mark
    }

    /// 일시정지 여부
    pub fn is_paused(&self) -> bool {
        !self.inner.lock().demand.has_demand()
    }

    /// 현재 요구량
    pub fn demand(&self) -> Demand {
        self.inner.lock().demand
    }

    /// high-water mark
    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().high_water_mark
    }

    fn schedule_drain(&self, inner: &mut QueueInner<T>) {
        if inner.draining || !inner.can_deliver() {
            return;
        }
        inner.draining = true;
        let queue = self.clone();
        self.context.run_on_context(move || queue.drain());
    }

    fn drain(&self) {
        loop {
            let (handler, item) = {
                let mut inner = self.inner.lock();
                if !inner.can_deliver() {
                    inner.draining = false;
                    break;
                }
                let (Some(handler), Some(item)) = (inner.handler.clone(), inner.pending.pop_front()) else {
                    inner.draining = false;
                    break;
                };
                inner.demand.decrement();
                (handler, item)
            };

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(item))) {
                let message = panic_message(panic.as_ref());
                tracing::error!("Delivery handler panicked: {}", message);
                let exception_handler = self.inner.lock().exception_handler.clone();
                if let Some(h) = exception_handler {
                    h(ClientError::delivery(format!("Handler panicked: {}", message)));
                }
            }
        }

        let drain_handler = {
            let mut inner = self.inner.lock();
            if inner.overflow && inner.pending.is_empty() {
                inner.overflow = false;
                inner.drain_handler.clone()
            } else {
                None
            }
        };
        if let Some(h) = drain_handler {
            h();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
