//! 字符串 id 的服务容器
//!
//! - 单例与工厂两种生命周期
//! - 扩展按注册顺序装饰解析结果
//! - 自身未注册的 id 交给服务来源（连接的包）解析
//! - 同一线程内的循环依赖检测

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

use super::{Service, ServiceLifetime, ServiceSource};
use crate::error::{share, ContainerError};
use crate::infrastructure::module::{ExtensionFactory, ServiceFactory};

/// 服务注册信息
#[derive(Clone)]
struct Definition {
    factory: ServiceFactory,
    lifetime: ServiceLifetime,
}

/// 内部容器统计信息（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

struct Inner {
    definitions: DashMap<String, Definition>,
    extensions: DashMap<String, Vec<ExtensionFactory>>,
    /// 通过 `set` 直接写入的实例
    values: DashMap<String, Service>,
    /// 单例实例缓存
    singletons: DashMap<String, Service>,
    sources: RwLock<Vec<Arc<dyn ServiceSource>>>,
    frozen: AtomicBool,
    /// 正在解析的 id，按线程区分
    resolving: Mutex<Vec<(ThreadId, String)>>,
    /// 正在查询服务来源的线程；互相连接的包经由来源回到本容器时不再继续查询
    visiting_sources: Mutex<Vec<ThreadId>>,
    stats: InnerStats,
}

/// 服务容器
///
/// 克隆得到的是同一个容器的句柄。
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<Inner>,
}

impl ServiceContainer {
    /// 创建新的容器实例
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                definitions: DashMap::new(),
                extensions: DashMap::new(),
                values: DashMap::new(),
                singletons: DashMap::new(),
                sources: RwLock::new(Vec::new()),
                frozen: AtomicBool::new(false),
                resolving: Mutex::new(Vec::new()),
                visiting_sources: Mutex::new(Vec::new()),
                stats: InnerStats::default(),
            }),
        }
    }

    /// 注册单例服务
    pub fn register_service(
        &self,
        id: impl Into<String>,
        factory: ServiceFactory,
    ) -> Result<(), ContainerError> {
        self.register(id.into(), factory, ServiceLifetime::Singleton)
    }

    /// 注册工厂，每次解析都会重新调用
    pub fn register_factory(
        &self,
        id: impl Into<String>,
        factory: ServiceFactory,
    ) -> Result<(), ContainerError> {
        self.register(id.into(), factory, ServiceLifetime::Transient)
    }

    fn register(
        &self,
        id: String,
        factory: ServiceFactory,
        lifetime: ServiceLifetime,
    ) -> Result<(), ContainerError> {
        self.ensure_not_frozen(&id)?;
        trace!(service = %id, ?lifetime, "registering service");
        self.inner.singletons.remove(&id);
        self.inner
            .definitions
            .insert(id, Definition { factory, lifetime });
        Ok(())
    }

    /// 追加扩展；扩展与服务注册的先后无关，解析时按追加顺序执行
    pub fn register_extension(
        &self,
        id: impl Into<String>,
        extension: ExtensionFactory,
    ) -> Result<(), ContainerError> {
        let id = id.into();
        self.ensure_not_frozen(&id)?;
        self.inner.extensions.entry(id).or_default().push(extension);
        Ok(())
    }

    /// 直接写入一个已解析的实例，冻结后依然允许
    pub fn set(&self, id: impl Into<String>, service: Service) {
        self.inner.values.insert(id.into(), service);
    }

    pub(crate) fn add_source(&self, source: Arc<dyn ServiceSource>) {
        debug!(source = source.name(), "adding service source");
        self.inner.sources.write().push(source);
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::SeqCst)
    }

    fn ensure_not_frozen(&self, id: &str) -> Result<(), ContainerError> {
        if self.is_frozen() {
            return Err(ContainerError::Frozen { id: id.to_string() });
        }
        Ok(())
    }

    /// 检查服务是否存在，不会触发解析
    pub fn has(&self, id: &str) -> bool {
        if self.has_own(id) {
            return true;
        }
        let Some(_visit) = self.visit_sources() else {
            return false;
        };
        let sources = self.inner.sources.read().clone();
        sources.iter().any(|source| source.has(id))
    }

    /// 仅检查本容器的注册，不查询服务来源
    fn has_own(&self, id: &str) -> bool {
        self.inner.values.contains_key(id)
            || self.inner.singletons.contains_key(id)
            || self.inner.definitions.contains_key(id)
    }

    /// 解析服务 - 主要API
    pub fn get(&self, id: &str) -> Result<Service, ContainerError> {
        self.inner
            .stats
            .total_resolutions
            .fetch_add(1, Ordering::Relaxed);

        if let Some(service) = self.resolve_own(id)? {
            return Ok(service);
        }

        match self.get_from_sources(id)? {
            Some(service) => self.apply_extensions(id, service),
            None => Err(ContainerError::not_found(id)),
        }
    }

    /// 按添加顺序查询服务来源；本线程已经在查询时直接视为未找到
    fn get_from_sources(&self, id: &str) -> Result<Option<Service>, ContainerError> {
        let Some(_visit) = self.visit_sources() else {
            return Ok(None);
        };
        let sources = self.inner.sources.read().clone();
        for source in sources.iter().filter(|source| source.has(id)) {
            match source.get(id) {
                Ok(service) => return Ok(Some(service)),
                Err(error) if error.is_not_found() => {
                    debug!(service = id, source = source.name(), "service source could not provide service");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(None)
    }

    /// 解析并向下转型
    pub fn get_as<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, ContainerError> {
        self.get(id)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeCastFailed {
                id: id.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    fn resolve_own(&self, id: &str) -> Result<Option<Service>, ContainerError> {
        if let Some(service) = self.inner.values.get(id) {
            return Ok(Some(service.value().clone()));
        }

        if let Some(service) = self.inner.singletons.get(id) {
            self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(service.value().clone()));
        }

        let definition = match self.inner.definitions.get(id) {
            Some(definition) => definition.value().clone(),
            None => return Ok(None),
        };

        let service = {
            let _guard = self.enter(id)?;
            let service = (definition.factory)(self).map_err(|source| {
                ContainerError::ResolutionFailed {
                    id: id.to_string(),
                    source: share(source),
                }
            })?;
            self.apply_extensions(id, service)?
        };

        match definition.lifetime {
            ServiceLifetime::Singleton => {
                self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                let cached = self
                    .inner
                    .singletons
                    .entry(id.to_string())
                    .or_insert(service)
                    .value()
                    .clone();
                Ok(Some(cached))
            }
            ServiceLifetime::Transient => Ok(Some(service)),
        }
    }

    fn apply_extensions(&self, id: &str, mut service: Service) -> Result<Service, ContainerError> {
        let extensions = match self.inner.extensions.get(id) {
            Some(extensions) => extensions.value().clone(),
            None => return Ok(service),
        };

        for extension in extensions {
            service = extension(service, self).map_err(|source| {
                ContainerError::ResolutionFailed {
                    id: id.to_string(),
                    source: share(source),
                }
            })?;
        }
        Ok(service)
    }

    fn enter(&self, id: &str) -> Result<ResolvingGuard<'_>, ContainerError> {
        let current = thread::current().id();
        let mut resolving = self.inner.resolving.lock();

        if resolving
            .iter()
            .any(|(thread, pending)| *thread == current && pending == id)
        {
            let mut chain: Vec<String> = resolving
                .iter()
                .filter(|(thread, _)| *thread == current)
                .map(|(_, pending)| pending.clone())
                .collect();
            chain.push(id.to_string());
            return Err(ContainerError::CircularDependency { chain });
        }

        resolving.push((current, id.to_string()));
        Ok(ResolvingGuard {
            resolving: &self.inner.resolving,
            thread: current,
        })
    }

    /// 标记本线程正在查询服务来源；已经在查询时返回 `None`
    fn visit_sources(&self) -> Option<VisitGuard<'_>> {
        let current = thread::current().id();
        let mut visiting = self.inner.visiting_sources.lock();
        if visiting.contains(&current) {
            return None;
        }
        visiting.push(current);
        Some(VisitGuard {
            visiting: &self.inner.visiting_sources,
            thread: current,
        })
    }

    /// 获取容器统计信息
    pub fn get_stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.inner.stats.total_resolutions.load(Ordering::Relaxed),
            cache_hits: self.inner.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.stats.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("definitions", &self.inner.definitions.len())
            .field("values", &self.inner.values.len())
            .field("sources", &self.inner.sources.read().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// 解析结束时弹出本线程最近一次压入的 id
struct ResolvingGuard<'a> {
    resolving: &'a Mutex<Vec<(ThreadId, String)>>,
    thread: ThreadId,
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        let mut resolving = self.resolving.lock();
        if let Some(position) = resolving.iter().rposition(|(thread, _)| *thread == self.thread) {
            resolving.remove(position);
        }
    }
}

struct VisitGuard<'a> {
    visiting: &'a Mutex<Vec<ThreadId>>,
    thread: ThreadId,
}

impl Drop for VisitGuard<'_> {
    fn drop(&mut self) {
        self.visiting.lock().retain(|thread| *thread != self.thread);
    }
}

/// 容器统计信息
#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

impl ContainerStats {
    /// 获取总解析次数
    pub fn total(&self) -> usize {
        self.total_resolutions
    }

    /// 单例缓存命中率
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct TestService {
        id: usize,
    }

    fn counting_factory(counter: Arc<AtomicUsize>) -> ServiceFactory {
        Arc::new(move |_: &ServiceContainer| {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TestService { id }) as Service)
        })
    }

    #[test]
    fn test_singleton_service() {
        let container = ServiceContainer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        container
            .register_service("service", counting_factory(counter.clone()))
            .unwrap();

        let service1 = container.get_as::<TestService>("service").unwrap();
        let service2 = container.get_as::<TestService>("service").unwrap();

        assert!(Arc::ptr_eq(&service1, &service2));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // 只创建一次
    }

    #[test]
    fn test_transient_service() {
        let container = ServiceContainer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        container
            .register_factory("factory", counting_factory(counter.clone()))
            .unwrap();

        let service1 = container.get_as::<TestService>("factory").unwrap();
        let service2 = container.get_as::<TestService>("factory").unwrap();

        assert!(!Arc::ptr_eq(&service1, &service2));
        assert_eq!((service1.id, service2.id), (0, 1));
    }

    #[test]
    fn test_service_not_registered() {
        let container = ServiceContainer::new();

        let result = container.get("missing");

        assert!(matches!(result, Err(ContainerError::NotFound { ref id }) if id == "missing"));
        assert!(!container.has("missing"));
    }

    #[test]
    fn test_type_cast_error() {
        let container = ServiceContainer::new();
        container.set("text", Arc::new("wrong type"));

        let result = container.get_as::<TestService>("text");

        assert!(matches!(result, Err(ContainerError::TypeCastFailed { .. })));
    }

    #[test]
    fn test_extensions_apply_in_registration_order() {
        let container = ServiceContainer::new();
        let append = |suffix: &'static str| -> ExtensionFactory {
            Arc::new(move |previous: Service, _: &ServiceContainer| {
                let previous = previous.downcast::<String>().map_err(|_| "not a string")?;
                Ok(Arc::new(format!("{previous}{suffix}")) as Service)
            })
        };

        container.register_extension("greeting", append("-a")).unwrap();
        container
            .register_service(
                "greeting",
                Arc::new(|_: &ServiceContainer| Ok(Arc::new("hello".to_string()) as Service)),
            )
            .unwrap();
        container.register_extension("greeting", append("-b")).unwrap();

        let greeting = container.get_as::<String>("greeting").unwrap();
        assert_eq!(greeting.as_str(), "hello-a-b");
    }

    #[test]
    fn test_extension_without_service_is_not_registered() {
        let container = ServiceContainer::new();
        container
            .register_extension(
                "ghost",
                Arc::new(|previous: Service, _: &ServiceContainer| Ok(previous)),
            )
            .unwrap();

        assert!(!container.has("ghost"));
        assert!(container.get("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn test_circular_dependency_is_detected() {
        let container = ServiceContainer::new();
        container
            .register_service(
                "a",
                Arc::new(|c: &ServiceContainer| c.get("b").map_err(BoxError::from)),
            )
            .unwrap();
        container
            .register_service(
                "b",
                Arc::new(|c: &ServiceContainer| c.get("a").map_err(BoxError::from)),
            )
            .unwrap();

        let error = container.get("a").unwrap_err();
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&error);
        let mut found = false;
        while let Some(current) = source {
            if current.to_string().contains("a -> b -> a") {
                found = true;
            }
            source = current.source();
        }
        assert!(found, "unexpected error: {error}");
        // 失败后解析栈被清空，再次解析依然报告同样的循环
        assert!(container.get("a").is_err());
        assert!(container.inner.resolving.lock().is_empty());
    }

    #[test]
    fn test_frozen_container_rejects_registration() {
        let container = ServiceContainer::new();
        container.freeze();

        let result = container.register_factory(
            "late",
            Arc::new(|_: &ServiceContainer| Ok(Arc::new(1_u8) as Service)),
        );

        assert!(matches!(result, Err(ContainerError::Frozen { .. })));
        container.set("late", Arc::new(2_u8));
        assert_eq!(*container.get_as::<u8>("late").unwrap(), 2);
    }

    /// 把另一个容器整体作为服务来源
    struct ContainerSource {
        name: String,
        container: ServiceContainer,
    }

    impl ServiceSource for ContainerSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn has(&self, id: &str) -> bool {
            self.container.has(id)
        }

        fn get(&self, id: &str) -> Result<Service, ContainerError> {
            self.container.get(id)
        }
    }

    fn source(name: &str, container: &ServiceContainer) -> Arc<dyn ServiceSource> {
        Arc::new(ContainerSource {
            name: name.to_string(),
            container: container.clone(),
        })
    }

    #[test]
    fn test_sources_resolve_transitively() {
        let first = ServiceContainer::new();
        let second = ServiceContainer::new();
        let third = ServiceContainer::new();
        third.set("deep", Arc::new(7_u32));
        second.add_source(source("third", &third));
        first.add_source(source("second", &second));

        assert!(first.has("deep"));
        assert_eq!(*first.get_as::<u32>("deep").unwrap(), 7);
    }

    #[test]
    fn test_mutual_sources_do_not_recurse() {
        let left = ServiceContainer::new();
        let right = ServiceContainer::new();
        left.set("left", Arc::new(1_u8));
        right.set("right", Arc::new(2_u8));
        left.add_source(source("right", &right));
        right.add_source(source("left", &left));

        assert_eq!(*left.get_as::<u8>("right").unwrap(), 2);
        assert_eq!(*right.get_as::<u8>("left").unwrap(), 1);
        assert!(!left.has("missing"));
        assert!(left.get("missing").unwrap_err().is_not_found());
        assert!(left.inner.visiting_sources.lock().is_empty());
        assert!(right.inner.visiting_sources.lock().is_empty());
    }

    #[test]
    fn test_container_stats() {
        let container = ServiceContainer::new();
        container
            .register_service("service", counting_factory(Arc::new(AtomicUsize::new(0))))
            .unwrap();

        for _ in 0..10 {
            container.get("service").unwrap();
        }

        let stats = container.get_stats();
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.cache_hits, 9); // 第一次miss，后面都是hit
        assert_eq!(stats.cache_misses, 1);
        assert!(stats.hit_rate() > 0.8);
    }
}
