//! 集成测试的公共桩模块与事件记录器

#![allow(dead_code)]

use modularity::{
    BoxError, EventEmitter, ExecutableModule, ExtendingModule, ExtensionDefinitions,
    FactoryModule, LifecycleEvent, Module, Package, Properties, ServiceContainer,
    ServiceDefinitions, ServiceModule,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type DefinitionsFn<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;
type RunFn = Box<dyn Fn(&ServiceContainer) -> Result<bool, BoxError> + Send + Sync>;

/// 按需组合能力的测试模块
pub struct StubModule {
    id: String,
    services: Option<DefinitionsFn<ServiceDefinitions>>,
    factories: Option<DefinitionsFn<ServiceDefinitions>>,
    extensions: Option<DefinitionsFn<ExtensionDefinitions>>,
    run: Option<RunFn>,
    runs: AtomicUsize,
}

impl StubModule {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            services: None,
            factories: None,
            extensions: None,
            run: None,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn services<F>(mut self, services: F) -> Self
    where
        F: Fn() -> Result<ServiceDefinitions, BoxError> + Send + Sync + 'static,
    {
        self.services = Some(Box::new(services));
        self
    }

    pub fn factories<F>(mut self, factories: F) -> Self
    where
        F: Fn() -> Result<ServiceDefinitions, BoxError> + Send + Sync + 'static,
    {
        self.factories = Some(Box::new(factories));
        self
    }

    pub fn extensions<F>(mut self, extensions: F) -> Self
    where
        F: Fn() -> Result<ExtensionDefinitions, BoxError> + Send + Sync + 'static,
    {
        self.extensions = Some(Box::new(extensions));
        self
    }

    pub fn executable<F>(mut self, run: F) -> Self
    where
        F: Fn(&ServiceContainer) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.run = Some(Box::new(run));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// `run()` 被调用的次数
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Module for StubModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_service_module(&self) -> Option<&dyn ServiceModule> {
        self.services.as_ref().map(|_| self as &dyn ServiceModule)
    }

    fn as_factory_module(&self) -> Option<&dyn FactoryModule> {
        self.factories.as_ref().map(|_| self as &dyn FactoryModule)
    }

    fn as_extending_module(&self) -> Option<&dyn ExtendingModule> {
        self.extensions.as_ref().map(|_| self as &dyn ExtendingModule)
    }

    fn as_executable_module(&self) -> Option<&dyn ExecutableModule> {
        self.run.as_ref().map(|_| self as &dyn ExecutableModule)
    }
}

impl ServiceModule for StubModule {
    fn services(&self) -> Result<ServiceDefinitions, BoxError> {
        self.services
            .as_ref()
            .map_or_else(|| Ok(ServiceDefinitions::new()), |services| services())
    }
}

impl FactoryModule for StubModule {
    fn factories(&self) -> Result<ServiceDefinitions, BoxError> {
        self.factories
            .as_ref()
            .map_or_else(|| Ok(ServiceDefinitions::new()), |factories| factories())
    }
}

impl ExtendingModule for StubModule {
    fn extensions(&self) -> Result<ExtensionDefinitions, BoxError> {
        self.extensions
            .as_ref()
            .map_or_else(|| Ok(ExtensionDefinitions::new()), |extensions| extensions())
    }
}

impl ExecutableModule for StubModule {
    fn run(&self, container: &ServiceContainer) -> Result<bool, BoxError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.run {
            Some(run) => run(container),
            None => Ok(false),
        }
    }
}

/// 记录所有发射的事件，可以让指定钩子的监听器失败
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<(String, LifecycleEvent)>>,
    failing_hook: Mutex<Option<String>>,
}

impl RecordingEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, hook: &str) {
        *self.failing_hook.lock() = Some(hook.to_string());
    }

    pub fn hooks(&self) -> Vec<String> {
        self.events.lock().iter().map(|(hook, _)| hook.clone()).collect()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    /// 指定后缀的事件数量
    pub fn count(&self, suffix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event.suffix() == suffix)
            .count()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, hook: &str, event: &LifecycleEvent) -> Result<(), BoxError> {
        self.events.lock().push((hook.to_string(), event.clone()));
        match self.failing_hook.lock().as_deref() {
            Some(failing) if failing == hook => Err(format!("listener for {hook} failed").into()),
            _ => Ok(()),
        }
    }
}

/// 创建带事件记录器的包
pub fn package(name: &str, debug: bool) -> (Arc<Package>, Arc<RecordingEmitter>) {
    let emitter = RecordingEmitter::new();
    let package = Package::builder(Properties::new(name).with_debug(debug))
        .emitter(emitter.clone())
        .build();
    (package, emitter)
}

/// 只提供服务的模块
pub fn service_module(
    id: &str,
    service_id: impl Into<String>,
    value: impl Into<String>,
) -> Arc<StubModule> {
    let service_id = service_id.into();
    let value = value.into();
    StubModule::new(id)
        .services(move || {
            let value = value.clone();
            Ok(ServiceDefinitions::new().add(service_id.clone(), move |_| Ok(value.clone())))
        })
        .shared()
}
