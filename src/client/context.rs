//! M10.2: Execution Context
//!
//! 단일 태스크 디스패처
//!
//! 컨텍스트에 제출된 작업은 하나의 tokio 태스크에서 제출 순서대로 하나씩
//! 실행됩니다. 사용자 콜백은 항상 자신이 등록된 컨텍스트에서 호출됩니다.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::error::{ClientError, ClientResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT: ContextRef;
}

/// 디스패처 태스크 안에서 보이는 약한 참조
#[derive(Clone)]
struct ContextRef {
    id: u64,
    sender: mpsc::WeakUnboundedSender<Task>,
}

impl ContextRef {
    fn upgrade(&self) -> Option<Context> {
        self.sender.upgrade().map(|sender| Context { id: self.id, sender })
    }
}

// ============================================================================
// Context - 실행 컨텍스트
// ============================================================================

/// 실행 컨텍스트
///
/// 모든 핸들이 드롭되면 디스패처 태스크도 종료됩니다.
#[derive(Clone)]
pub struct Context {
    id: u64,
    sender: mpsc::UnboundedSender<Task>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Context {}

impl Context {
    /// 새 컨텍스트 생성 (tokio 런타임 필요)
    pub fn new() -> ClientResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::internal("No tokio runtime available to host a context"))?;

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let current = ContextRef {
            id,
            sender: sender.downgrade(),
        };

        handle.spawn(CURRENT.scope(current, async move {
            while let Some(task) = receiver.recv().await {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    tracing::error!("Task panicked on context {}: {}", id, panic_message(panic.as_ref()));
                }
            }
            tracing::debug!("Context {} dispatcher stopped", id);
        }));

        tracing::debug!("Context {} created", id);
        Ok(Self { id, sender })
    }

    /// 현재 실행 중인 컨텍스트
    pub fn current() -> Option<Self> {
        CURRENT.try_with(ContextRef::upgrade).ok().flatten()
    }

    /// 현재 컨텍스트 또는 새 컨텍스트
    pub fn get_or_create() -> ClientResult<Self> {
        match Self::current() {
            Some(context) => Ok(context),
            None => Self::new(),
        }
    }

    /// 컨텍스트 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 호출자가 이 컨텍스트에서 실행 중인지
    pub fn is_current(&self) -> bool {
        CURRENT.try_with(|current| current.id == self.id).unwrap_or(false)
    }

    /// 작업을 큐에 넣음 (FIFO)
    pub fn run_on_context<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            tracing::debug!("Context {} is gone, task dropped", self.id);
        }
    }

    /// 이미 이 컨텍스트라면 즉시 실행, 아니면 큐에 넣음
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            task();
        } else {
            self.run_on_context(task);
        }
    }
}

/// 패닉 페이로드에서 메시지 추출
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(Context::new(), Err(ClientError::Internal(_))));
    }

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let context = Context::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            context.run_on_context(move || seen.lock().push(i));
        }

        let (tx, rx) = oneshot::channel();
        context.run_on_context(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_current_context() {
        assert!(Context::current().is_none());

        let context = Context::new().unwrap();
        let expected = context.id();
        let (tx, rx) = oneshot::channel();
        context.run_on_context(move || {
            let current = Context::current().map(|c| c.id());
            let created = Context::get_or_create().map(|c| c.id()).ok();
            let _ = tx.send((current, created));
        });

        let (current, created) = rx.await.unwrap();
        assert_eq!(current, Some(expected));
        assert_eq!(created, Some(expected));
    }

    #[tokio::test]
    async fn test_get_or_create_outside_context() {
        let a = Context::get_or_create().unwrap();
        let b = Context::get_or_create().unwrap();
        assert_ne!(a, b);
        assert!(!a.is_current());
    }

    #[tokio::test]
    async fn test_panic_does_not_stop_dispatcher() {
        let context = Context::new().unwrap();
        context.run_on_context(|| panic!("handler failure"));

        let (tx, rx) = oneshot::channel();
        context.run_on_context(move || {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_dispatch_runs_inline_on_same_context() {
        let context = Context::new().unwrap();
        let inner = context.clone();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let recorded = order.clone();
        context.run_on_context(move || {
            let nested = recorded.clone();
            inner.dispatch(move || nested.lock().push("dispatched"));
            recorded.lock().push("after");
            let _ = tx.send(());
        });
        rx.await.unwrap();

        assert_eq!(*order.lock(), vec!["dispatched", "after"]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
    }
}
