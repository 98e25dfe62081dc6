//! M10.7: Shared Driver Registry
//!
//! 이름 기반, 참조 카운트 방식의 드라이버 공유
//!
//! 같은 이름으로 조회한 클라이언트들은 하나의 물리 드라이버(연결 풀)를
//! 공유합니다. 드라이버는 처음 사용할 때 생성되고, 마지막 핸들이 해제될 때
//! 닫힙니다. 레지스트리는 전역이 아니라 클라이언트 생성 시 주입됩니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use super::driver::{DriverFactory, DriverSupplier, GraphDriver};
use super::error::{ClientError, ClientResult};
use super::options::ClientOptions;

/// 기본 공유 이름
pub const DEFAULT_POOL_NAME: &str = "DEFAULT_POOL";

// ============================================================================
// DriverHolder - 드라이버 보관자
// ============================================================================

struct DriverHolder {
    name: String,
    supplier: DriverSupplier,
    /// 생성과 해제가 같은 잠금을 거치므로 생성 중인 드라이버도 해제가 기다림
    slot: AsyncMutex<DriverSlot>,
}

#[derive(Default)]
struct DriverSlot {
    driver: Option<Arc<dyn GraphDriver>>,
    closed: bool,
}

impl DriverHolder {
    fn new(name: &str, options: ClientOptions, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            name: name.to_string(),
            supplier: DriverSupplier::new(options, factory),
            slot: AsyncMutex::new(DriverSlot::default()),
        }
    }

    /// 드라이버 (최초 호출자만 생성, 동시 호출자는 같은 결과를 기다림)
    async fn driver(&self) -> ClientResult<Arc<dyn GraphDriver>> {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Err(ClientError::closed(format!("Shared driver '{}' is closed", self.name)));
        }
        if let Some(driver) = &slot.driver {
            return Ok(driver.clone());
        }

        tracing::debug!("Creating shared driver '{}'", self.name);
        let driver = self.supplier.supply().await?;
        slot.driver = Some(driver.clone());
        Ok(driver)
    }

    /// 드라이버 닫기 (생성 중이면 끝날 때까지 대기, 이후 생성 거부)
    async fn close(&self) -> ClientResult<()> {
        let driver = {
            let mut slot = self.slot.lock().await;
            slot.closed = true;
            slot.driver.take()
        };
        match driver {
            Some(driver) => {
                tracing::debug!("Closing shared driver '{}'", self.name);
                driver.close().await.map_err(ClientError::into_root_cause)
            }
            None => Ok(()),
        }
    }
}

struct HolderEntry {
    holder: Arc<DriverHolder>,
    ref_count: usize,
}

// ============================================================================
// SharedDriverRegistry - 공유 레지스트리
// ============================================================================

/// 공유 드라이버 레지스트리
///
/// 내부 맵은 첫 조회 시 만들어지고 마지막 항목이 제거되면 폐기됩니다.
#[derive(Clone, Default)]
pub struct SharedDriverRegistry {
    holders: Arc<Mutex<Option<HashMap<String, HolderEntry>>>>,
}

impl fmt::Debug for SharedDriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holders = self.holders.lock();
        let counts: HashMap<&str, usize> = holders
            .iter()
            .flat_map(|map| map.iter())
            .map(|(name, entry)| (name.as_str(), entry.ref_count))
            .collect();
        f.debug_struct("SharedDriverRegistry").field("holders", &counts).finish()
    }
}

impl SharedDriverRegistry {
    /// 새 레지스트리 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 이름으로 조회하거나 생성
    ///
    /// 이미 있으면 참조 카운트만 증가하고 `options`와 `factory`는 무시됩니다.
    pub fn lookup_or_create(
        &self,
        name: &str,
        options: ClientOptions,
        factory: Arc<dyn DriverFactory>,
    ) -> SharedHandle {
        let mut holders = self.holders.lock();
        let map = holders.get_or_insert_with(HashMap::new);

        let entry = map.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!("Registering shared driver holder '{}'", name);
            HolderEntry {
                holder: Arc::new(DriverHolder::new(name, options, factory)),
                ref_count: 0,
            }
        });
        entry.ref_count += 1;

        SharedHandle {
            registry: self.clone(),
            holder: entry.holder.clone(),
            released: AtomicBool::new(false),
        }
    }

    /// 참조 카운트 (없으면 0)
    pub fn ref_count(&self, name: &str) -> usize {
        self.holders
            .lock()
            .as_ref()
            .and_then(|map| map.get(name))
            .map_or(0, |entry| entry.ref_count)
    }

    /// 이름 등록 여부
    pub fn contains(&self, name: &str) -> bool {
        self.ref_count(name) > 0
    }

    /// 등록된 이름 수
    pub fn len(&self) -> usize {
        self.holders.lock().as_ref().map_or(0, HashMap::len)
    }

    /// 비었는지
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 내부 맵이 할당되어 있는지
    pub fn is_initialized(&self) -> bool {
        self.holders.lock().is_some()
    }

    /// 참조 카운트 감소, 0이 되면 제거된 보관자 반환
    fn release_holder(&self, holder: &Arc<DriverHolder>) -> Option<Arc<DriverHolder>> {
        let mut holders = self.holders.lock();
        let map = holders.as_mut()?;

        let entry = map.get_mut(&holder.name)?;
        if !Arc::ptr_eq(&entry.holder, holder) {
            return None;
        }
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            tracing::debug!("Shared driver '{}' still has {} handles", holder.name, entry.ref_count);
            return None;
        }

        let removed = map.remove(&holder.name).map(|entry| entry.holder);
        if map.is_empty() {
            *holders = None;
            tracing::debug!("Shared driver registry is empty, disposed");
        }
        removed
    }
}

// ============================================================================
// SharedHandle - 공유 핸들
// ============================================================================

/// 공유 드라이버에 대한 참조 하나
///
/// 해제하지 않고 드롭하면 백그라운드에서 해제됩니다.
pub struct SharedHandle {
    registry: SharedDriverRegistry,
    holder: Arc<DriverHolder>,
    released: AtomicBool,
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("name", &self.holder.name)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SharedHandle {
    /// 공유 이름
    pub fn name(&self) -> &str {
        &self.holder.name
    }

    /// 해제 여부
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// 드라이버 (필요하면 생성 후 연결 확인)
    pub async fn driver(&self) -> ClientResult<Arc<dyn GraphDriver>> {
        if self.is_released() {
            return Err(ClientError::closed(format!("Client '{}' is closed", self.holder.name)));
        }
        let driver = self.holder.driver().await?;
        // 생성 중에 해제된 경우
        if self.is_released() {
            return Err(ClientError::closed(format!("Client '{}' is closed", self.holder.name)));
        }
        Ok(driver)
    }

    /// 참조 해제 (여러 번 호출해도 한 번만 적용)
    ///
    /// 마지막 참조였다면 드라이버를 닫습니다.
    pub async fn release(&self) -> ClientResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.registry.release_holder(&self.holder) {
            Some(holder) => holder.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SharedHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(holder) = self.registry.release_holder(&self.holder) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = holder.close().await {
                        tracing::warn!("Failed to close shared driver '{}': {}", holder.name, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Shared driver '{}' dropped outside a runtime, not closed", holder.name);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::memory::MemoryDriver;

    fn lookup(registry: &SharedDriverRegistry, name: &str, driver: &MemoryDriver) -> SharedHandle {
        registry.lookup_or_create(name, ClientOptions::new(), driver.factory())
    }

    #[tokio::test]
    async fn test_same_name_shares_driver() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let a = lookup(&registry, DEFAULT_POOL_NAME, &memory);
        let b = lookup(&registry, DEFAULT_POOL_NAME, &memory);
        assert_eq!(registry.ref_count(DEFAULT_POOL_NAME), 2);

        let da = a.driver().await.unwrap();
        let db = b.driver().await.unwrap();
        assert!(Arc::ptr_eq(&da, &db));
        assert_eq!(memory.stats().drivers_created, 1);
        assert_eq!(memory.stats().connectivity_checks, 1);
    }

    #[tokio::test]
    async fn test_driver_is_lazy() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let handle = lookup(&registry, "lazy", &memory);
        assert_eq!(memory.stats().drivers_created, 0);

        handle.release().await.unwrap();
        assert_eq!(memory.stats().drivers_created, 0);
        assert_eq!(memory.stats().driver_closes, 0);
    }

    #[tokio::test]
    async fn test_close_only_on_last_release() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let handles: Vec<_> = (0..3).map(|_| lookup(&registry, "pool", &memory)).collect();
        handles[0].driver().await.unwrap();

        handles[0].release().await.unwrap();
        handles[1].release().await.unwrap();
        assert_eq!(memory.stats().driver_closes, 0);
        assert_eq!(registry.ref_count("pool"), 1);

        handles[2].release().await.unwrap();
        assert_eq!(memory.stats().driver_closes, 1);
        assert!(!registry.contains("pool"));
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let a = lookup(&registry, "pool", &memory);
        let b = lookup(&registry, "pool", &memory);
        a.driver().await.unwrap();

        a.release().await.unwrap();
        a.release().await.unwrap();
        assert_eq!(registry.ref_count("pool"), 1);
        assert_eq!(memory.stats().driver_closes, 0);

        drop(a);
        assert_eq!(registry.ref_count("pool"), 1);

        b.release().await.unwrap();
        assert_eq!(memory.stats().driver_closes, 1);
    }

    #[tokio::test]
    async fn test_released_handle_refuses_driver() {
        let registry = SharedDriverRegistry::new();
        let handle = lookup(&registry, "pool", &MemoryDriver::new());
        handle.release().await.unwrap();

        assert!(matches!(handle.driver().await, Err(ClientError::Closed(_))));
    }

    #[tokio::test]
    async fn test_construction_failure_reaches_first_caller() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new().with_connectivity_failure("connection refused");
        let handle = lookup(&registry, "pool", &memory);

        let err = handle.driver().await.err().unwrap();
        assert!(matches!(err, ClientError::ServiceUnavailable(_)));
        assert_eq!(registry.ref_count("pool"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_constructs_once() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();
        let handles: Vec<_> = (0..8).map(|_| Arc::new(lookup(&registry, "pool", &memory))).collect();

        let tasks: Vec<_> = handles
            .iter()
            .cloned()
            .map(|h| tokio::spawn(async move { h.driver().await.map(|_| ()) }))
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(memory.stats().drivers_created, 1);
        assert_eq!(registry.ref_count("pool"), 8);
    }

    #[tokio::test]
    async fn test_names_are_independent() {
        let registry = SharedDriverRegistry::new();
        let first = MemoryDriver::new();
        let second = MemoryDriver::new();

        let a = lookup(&registry, "first", &first);
        let b = lookup(&registry, "second", &second);
        a.driver().await.unwrap();
        b.driver().await.unwrap();
        assert_eq!(registry.len(), 2);

        a.release().await.unwrap();
        assert_eq!(first.stats().driver_closes, 1);
        assert_eq!(second.stats().driver_closes, 0);
        assert!(registry.is_initialized());
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_in_background() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let handle = lookup(&registry, "pool", &memory);
        handle.driver().await.unwrap();
        drop(handle);

        assert!(registry.is_empty());
        for _ in 0..100 {
            if memory.stats().driver_closes == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(memory.stats().driver_closes, 1);
    }

    #[tokio::test]
    async fn test_lookup_after_teardown_creates_new_driver() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new();

        let first = lookup(&registry, "pool", &memory);
        first.driver().await.unwrap();
        first.release().await.unwrap();

        let second = lookup(&registry, "pool", &memory);
        second.driver().await.unwrap();
        assert_eq!(memory.stats().drivers_created, 2);
        assert_eq!(registry.ref_count("pool"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_release_during_construction_closes_driver() {
        let registry = SharedDriverRegistry::new();
        let memory = MemoryDriver::new().with_connectivity_latency(Duration::from_millis(100));

        let handle = Arc::new(lookup(&registry, "slow", &memory));
        let pending = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.driver().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.release().await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::Closed(_))));
        assert_eq!(memory.stats().drivers_created, 1);
        assert_eq!(memory.stats().driver_closes, 1);
        assert!(registry.is_empty());
        assert!(!registry.is_initialized());
    }
}
