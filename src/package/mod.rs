//! 包
//!
//! 包持有模块队列、状态账本与合成后的容器，驱动两阶段协议：
//! `build` 把模块声明注册进容器，`boot` 执行可执行模块。
//! 非调试模式下生命周期错误被捕获并记录，调用方通过状态或返回值感知失败；
//! 调试模式下错误返回给调用方。

pub mod connection;
pub mod ledger;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{share, BoxError, ConnectionRejection, ModularityError};
use crate::events::{EventEmitter, HookRegistry, LifecycleEvent};
use crate::infrastructure::container::{ContainerCompositor, Service, ServiceContainer};
use crate::infrastructure::module::Module;
use crate::logging::OperationTimer;
use crate::properties::Properties;

pub use ledger::{ModuleLedger, ModuleStage, ModulesStatus, MODULES_ALL};

/// 包状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageStatus {
    /// 可以添加模块
    Idle,
    /// 容器已构建
    Initialized,
    /// 正在执行可执行模块
    Booting,
    Booted,
    /// 终态
    Failed,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            PackageStatus::Idle => "idle",
            PackageStatus::Initialized => "initialized",
            PackageStatus::Booting => "booting",
            PackageStatus::Booted => "booted",
            PackageStatus::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// 容器扩展钩子，在所有模块合并之后、容器冻结之前调用一次
pub trait ContainerExtension: Send + Sync {
    fn extend(&self, container: &ServiceContainer) -> Result<(), BoxError>;
}

impl<F> ContainerExtension for F
where
    F: Fn(&ServiceContainer) -> Result<(), BoxError> + Send + Sync,
{
    fn extend(&self, container: &ServiceContainer) -> Result<(), BoxError> {
        self(container)
    }
}

struct PackageState {
    status: PackageStatus,
    /// 构建进行中，此时状态仍为 Idle
    building: bool,
    boot_attempted: bool,
    queue: Vec<Arc<dyn Module>>,
    executables: Vec<Arc<dyn Module>>,
    container: Option<ServiceContainer>,
    connections: BTreeMap<String, bool>,
    /// 构建前请求的连接
    pending_connections: Vec<Arc<Package>>,
    failure: Option<ModularityError>,
}

/// 包
pub struct Package {
    properties: Arc<Properties>,
    emitter: Arc<dyn EventEmitter>,
    container_extension: Option<Arc<dyn ContainerExtension>>,
    ledger: ModuleLedger,
    state: Mutex<PackageState>,
}

/// 包构建器
pub struct PackageBuilder {
    properties: Properties,
    emitter: Option<Arc<dyn EventEmitter>>,
    container_extension: Option<Arc<dyn ContainerExtension>>,
}

impl PackageBuilder {
    /// 替换默认的 [`HookRegistry`]
    pub fn emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn container_extension<E: ContainerExtension + 'static>(mut self, extension: E) -> Self {
        self.container_extension = Some(Arc::new(extension));
        self
    }

    pub fn build(self) -> Arc<Package> {
        let debug = self.properties.is_debug();
        Arc::new(Package {
            properties: Arc::new(self.properties),
            emitter: self
                .emitter
                .unwrap_or_else(|| Arc::new(HookRegistry::new()) as Arc<dyn EventEmitter>),
            container_extension: self.container_extension,
            ledger: ModuleLedger::new(debug),
            state: Mutex::new(PackageState {
                status: PackageStatus::Idle,
                building: false,
                boot_attempted: false,
                queue: Vec::new(),
                executables: Vec::new(),
                container: None,
                connections: BTreeMap::new(),
                pending_connections: Vec::new(),
                failure: None,
            }),
        })
    }
}

impl Package {
    /// 自身元数据在容器中的 id；连接的包使用 `<name>.properties`
    pub const PROPERTIES: &'static str = "properties";

    /// 钩子名称前缀
    pub const HOOK_PREFIX: &'static str = "modularity";

    pub fn new(properties: Properties) -> Arc<Self> {
        Self::builder(properties).build()
    }

    pub fn builder(properties: Properties) -> PackageBuilder {
        PackageBuilder {
            properties,
            emitter: None,
            container_extension: None,
        }
    }

    pub fn name(&self) -> &str {
        self.properties.base_name()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn is_debug(&self) -> bool {
        self.properties.is_debug()
    }

    /// `modularity.<name>`，后缀非空时追加 `.<suffix>`
    pub fn hook_name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}.{}", Self::HOOK_PREFIX, self.name())
        } else {
            format!("{}.{}.{}", Self::HOOK_PREFIX, self.name(), suffix)
        }
    }

    pub fn status(&self) -> PackageStatus {
        self.state.lock().status
    }

    pub fn status_is(&self, status: PackageStatus) -> bool {
        self.status() == status
    }

    /// 最近一次记录的失败
    pub fn last_error(&self) -> Option<ModularityError> {
        self.state.lock().failure.clone()
    }

    pub fn module_is(&self, module_id: &str, stage: ModuleStage) -> bool {
        self.ledger.is(module_id, stage)
    }

    pub fn modules_status(&self) -> ModulesStatus {
        self.ledger.status()
    }

    /// 连接过的包及连接是否成功
    pub fn connected_packages(&self) -> BTreeMap<String, bool> {
        self.state.lock().connections.clone()
    }

    pub fn is_package_connected(&self, name: &str) -> bool {
        self.state
            .lock()
            .connections
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// 构建完成后的容器
    pub fn container(&self) -> Result<ServiceContainer, ModularityError> {
        let state = self.state.lock();
        state
            .container
            .clone()
            .ok_or_else(|| ModularityError::ContainerUnavailable {
                package: self.name().to_string(),
                status: state.status,
            })
    }

    pub(crate) fn built_container(&self) -> Option<ServiceContainer> {
        self.state.lock().container.clone()
    }

    pub(crate) fn shared_properties(&self) -> Arc<Properties> {
        self.properties.clone()
    }

    /// 添加模块；构建开始后总是失败，与调试模式无关
    pub fn add_module(&self, module: Arc<dyn Module>) -> Result<&Self, ModularityError> {
        let mut state = self.state.lock();
        let module_id = module.id().to_string();

        let reason = if state.building {
            Some(format!("package {} is building", self.name()))
        } else if state.status != PackageStatus::Idle {
            Some(format!("package {} is {}", self.name(), state.status))
        } else if state.queue.iter().any(|queued| queued.id() == module_id) {
            Some("a module with the same id was already added".to_string())
        } else {
            None
        };

        if let Some(reason) = reason {
            warn!(package = self.name(), module = %module_id, %reason, "module rejected");
            return Err(ModularityError::ModuleRejected { module_id, reason });
        }

        debug!(package = self.name(), module = %module_id, "module queued");
        state.queue.push(module);
        Ok(self)
    }

    /// 构建容器
    ///
    /// 只执行一次。失败时包进入 `Failed`，调试模式下返回错误，
    /// 否则返回 `Ok(self)`；失败之后再次调用会重新报告同一个错误。
    pub fn build(&self) -> Result<&Self, ModularityError> {
        {
            let state = self.state.lock();
            match state.status {
                PackageStatus::Idle if !state.building => {}
                PackageStatus::Failed => {
                    return match state.failure.clone() {
                        Some(failure) if self.is_debug() => Err(failure),
                        _ => Ok(self),
                    };
                }
                _ => return Ok(self),
            }
        }

        self.run_build()?;
        Ok(self)
    }

    fn run_build(&self) -> Result<(), ModularityError> {
        let timer = OperationTimer::new("build").with_metadata("package", self.name());
        match self.compose() {
            Ok(()) => {
                timer.finish(true);
                info!(package = self.name(), "package built");
                Ok(())
            }
            Err(error) => {
                timer.finish(false);
                self.fail_build(error)
            }
        }
    }

    fn compose(&self) -> Result<(), ModularityError> {
        let (queue, pending) = {
            let mut state = self.state.lock();
            state.building = true;
            (
                mem::take(&mut state.queue),
                mem::take(&mut state.pending_connections),
            )
        };

        let result = self.compose_container(queue, pending);

        let mut state = self.state.lock();
        state.building = false;
        let (container, executables) = result?;

        // 构建期间（例如 init 监听器中）请求的连接
        for target in mem::take(&mut state.pending_connections) {
            connection::install(&container, &target);
        }

        container.freeze();
        state.container = Some(container);
        state.executables = executables;
        state.status = PackageStatus::Initialized;
        Ok(())
    }

    fn compose_container(
        &self,
        queue: Vec<Arc<dyn Module>>,
        pending: Vec<Arc<Package>>,
    ) -> Result<(ServiceContainer, Vec<Arc<dyn Module>>), ModularityError> {
        self.emit(LifecycleEvent::Init {
            package: self.name().to_string(),
        })?;

        let container = ServiceContainer::new();
        container.set(Self::PROPERTIES, self.properties.clone() as Service);

        for target in &pending {
            connection::install(&container, target);
        }

        let compositor = ContainerCompositor::new(&container, &self.ledger);
        let mut executables = Vec::new();
        for module in queue {
            if compositor.add_module(module.as_ref())? {
                executables.push(module);
            }
        }

        if let Some(extension) = &self.container_extension {
            extension
                .extend(&container)
                .map_err(|source| ModularityError::ContainerExtensionFailed {
                    package: self.name().to_string(),
                    source: share(source),
                })?;
        }

        Ok((container, executables))
    }

    fn fail_build(&self, cause: ModularityError) -> Result<(), ModularityError> {
        error!(package = self.name(), error = %cause, "package build failed");
        let failure = ModularityError::BuildFailed {
            package: self.name().to_string(),
            source: Box::new(cause.clone()),
        };
        self.mark_failed(failure.clone());
        self.notify(LifecycleEvent::FailedBuild {
            package: self.name().to_string(),
            error: cause,
        });

        if self.is_debug() {
            Err(failure)
        } else {
            Ok(())
        }
    }

    /// 启动包
    ///
    /// 处于 `Idle` 时先构建。首次成功返回 `true`，之后的调用返回 `false`
    /// 且不会再执行任何模块。
    pub fn boot(&self) -> Result<bool, ModularityError> {
        self.boot_modules(Vec::new())
    }

    /// 传入模块并启动
    ///
    /// `Idle` 时等同于逐个 `add_module` 后 `boot`。容器构建之后（包括已经启动），
    /// 传入尚未处理过的模块会导致启动失败：包进入 `Failed` 并发出 `failed-boot`。
    /// 启动过程中的重入调用直接返回 `false`。
    #[deprecated(note = "add modules with `add_module` before calling `boot`")]
    pub fn boot_with_modules(
        &self,
        modules: Vec<Arc<dyn Module>>,
    ) -> Result<bool, ModularityError> {
        warn!(
            package = self.name(),
            "passing modules to boot() is deprecated, use add_module() instead"
        );
        self.boot_modules(modules)
    }

    fn boot_modules(&self, modules: Vec<Arc<dyn Module>>) -> Result<bool, ModularityError> {
        {
            let mut state = self.state.lock();
            let status = state.status;
            match status {
                PackageStatus::Booted => {
                    drop(state);
                    return match self.reject_late_modules(&modules) {
                        Err(error) => self.fail_boot(error),
                        Ok(()) => Ok(false),
                    };
                }
                // 可执行模块在启动过程中再次调用
                PackageStatus::Booting => return Ok(false),
                PackageStatus::Failed if state.boot_attempted => {
                    return match state.failure.clone() {
                        Some(failure) if self.is_debug() => Err(failure),
                        _ => Ok(false),
                    };
                }
                _ if state.building => return Ok(false),
                _ => {}
            }
            state.boot_attempted = true;
        }

        let timer = OperationTimer::new("boot").with_metadata("package", self.name());
        let result = self
            .register_late_modules(modules)
            .and_then(|()| self.run_boot());
        timer.finish(result.is_ok());

        match result {
            Ok(()) => Ok(true),
            Err(cause) => self.fail_boot(cause),
        }
    }

    fn register_late_modules(&self, modules: Vec<Arc<dyn Module>>) -> Result<(), ModularityError> {
        for module in modules {
            let already_queued = {
                let state = self.state.lock();
                state.status == PackageStatus::Idle
                    && state.queue.iter().any(|queued| queued.id() == module.id())
            };
            if already_queued {
                continue;
            }
            if self.status_is(PackageStatus::Idle) {
                self.add_module(module)?;
            } else {
                self.reject_late_modules(std::slice::from_ref(&module))?;
            }
        }
        Ok(())
    }

    fn reject_late_modules(&self, modules: &[Arc<dyn Module>]) -> Result<(), ModularityError> {
        match modules
            .iter()
            .find(|module| !self.ledger.is_settled(module.id()))
        {
            Some(module) => Err(ModularityError::ModuleRejected {
                module_id: module.id().to_string(),
                reason: "container already built".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn run_boot(&self) -> Result<(), ModularityError> {
        if self.status_is(PackageStatus::Idle) {
            // 失败已记录在状态中，下面统一处理
            let _ = self.run_build();
        }

        let (container, executables) = {
            let mut state = self.state.lock();
            match (state.status, state.container.clone()) {
                (PackageStatus::Initialized, Some(container)) => {
                    state.status = PackageStatus::Booting;
                    (container, state.executables.clone())
                }
                // 构建失败时带出已记录的错误
                (status, _) => {
                    return Err(state.failure.clone().unwrap_or_else(|| {
                        ModularityError::ContainerUnavailable {
                            package: self.name().to_string(),
                            status,
                        }
                    }));
                }
            }
        };

        for module in executables {
            let Some(executable) = module.as_executable_module() else {
                continue;
            };
            let module_id = module.id();
            match executable.run(&container) {
                Ok(true) => {
                    self.ledger
                        .record(module_id, ModuleStage::Executed, Vec::new());
                }
                Ok(false) => {
                    warn!(package = self.name(), module = module_id, "module execution failed");
                    self.ledger
                        .record(module_id, ModuleStage::ExecutionFailed, Vec::new());
                }
                Err(source) => {
                    self.ledger
                        .record(module_id, ModuleStage::ExecutionFailed, Vec::new());
                    return Err(ModularityError::ModuleExecutionFailed {
                        module_id: module_id.to_string(),
                        source: share(source),
                    });
                }
            }
        }

        self.state.lock().status = PackageStatus::Booted;
        info!(package = self.name(), "package booted");
        self.notify(LifecycleEvent::Ready {
            package: self.name().to_string(),
        });
        Ok(())
    }

    fn fail_boot(&self, cause: ModularityError) -> Result<bool, ModularityError> {
        error!(package = self.name(), error = %cause, "package boot failed");
        let failure = ModularityError::BootFailed {
            package: self.name().to_string(),
            source: Box::new(cause),
        };
        self.mark_failed(failure.clone());
        self.notify(LifecycleEvent::FailedBoot {
            package: self.name().to_string(),
            error: failure.clone(),
        });

        if self.is_debug() {
            Err(failure)
        } else {
            Ok(false)
        }
    }

    /// 连接另一个包，使其服务可以从本包的容器中解析
    ///
    /// 连接自身直接返回 `false`，不记录也不发事件。
    pub fn connect(&self, other: &Arc<Package>) -> Result<bool, ModularityError> {
        if std::ptr::eq(self, Arc::as_ptr(other)) {
            warn!(package = self.name(), "package can't be connected to itself");
            return Ok(false);
        }

        let target = other.name().to_string();
        let (rejection, live_container) = {
            let mut state = self.state.lock();
            let rejection = if state.connections.contains_key(&target) {
                Some(ConnectionRejection::AlreadyConnected)
            } else if state.status == PackageStatus::Booted {
                Some(ConnectionRejection::AlreadyBooted)
            } else if state.status == PackageStatus::Failed {
                Some(ConnectionRejection::Errored)
            } else {
                None
            };

            match rejection {
                Some(_) => {
                    state.connections.entry(target.clone()).or_insert(false);
                    (rejection, None)
                }
                None => {
                    state.connections.insert(target.clone(), true);
                    let live = state.container.clone();
                    if live.is_none() {
                        state.pending_connections.push(other.clone());
                    }
                    (None, live)
                }
            }
        };

        if let Some(reason) = rejection {
            return self.fail_connection(target, reason);
        }

        if let Some(container) = live_container {
            connection::install(&container, other);
        }

        let target_status = other.status();
        info!(package = self.name(), target = %target, %target_status, "package connected");
        self.notify(LifecycleEvent::PackageConnected {
            package: self.name().to_string(),
            target,
            target_status,
            target_booted: target_status == PackageStatus::Booted,
        });
        Ok(true)
    }

    fn fail_connection(
        &self,
        target: String,
        reason: ConnectionRejection,
    ) -> Result<bool, ModularityError> {
        let error = ModularityError::ConnectionRejected {
            target: target.clone(),
            reason,
        };
        warn!(package = self.name(), error = %error, "package connection failed");
        self.notify(LifecycleEvent::FailedConnection {
            package: self.name().to_string(),
            target,
            error: error.clone(),
        });

        // 已失败的包保留原来的失败原因
        if reason != ConnectionRejection::Errored {
            self.mark_failed(ModularityError::BuildFailed {
                package: self.name().to_string(),
                source: Box::new(error.clone()),
            });
            self.notify(LifecycleEvent::FailedBuild {
                package: self.name().to_string(),
                error: error.clone(),
            });
        }

        if self.is_debug() {
            Err(error)
        } else {
            Ok(false)
        }
    }

    fn mark_failed(&self, failure: ModularityError) {
        let mut state = self.state.lock();
        state.status = PackageStatus::Failed;
        state.failure = Some(failure);
    }

    /// 发射事件，监听器的错误中止当前操作
    fn emit(&self, event: LifecycleEvent) -> Result<(), ModularityError> {
        let hook = self.hook_name(event.suffix());
        self.emitter
            .emit(&hook, &event)
            .map_err(|source| ModularityError::ListenerFailed {
                hook,
                source: share(source),
            })
    }

    /// 发射事件，监听器的错误只记录日志
    fn notify(&self, event: LifecycleEvent) {
        let hook = self.hook_name(event.suffix());
        if let Err(error) = self.emitter.emit(&hook, &event) {
            warn!(package = self.name(), %hook, %error, "lifecycle listener failed");
        }
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Package")
            .field("name", &self.name())
            .field("status", &state.status)
            .field("queued_modules", &state.queue.len())
            .field("connections", &state.connections)
            .finish()
    }
}
