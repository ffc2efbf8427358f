//! 模块化包引擎
//!
//! 包（[`Package`]）收集模块，模块通过能力接口声明服务、工厂、扩展与启动逻辑；
//! 包把这些声明合成为一个依赖注入容器，再执行可执行模块。
//! 多个包之间可以互相连接，共享彼此的服务。

pub mod error;
pub mod events;
pub mod infrastructure;
pub mod logging;
pub mod package;
pub mod properties;

// Re-export commonly used items for convenience
pub use error::{BoxError, ConnectionRejection, ContainerError, ModularityError};
pub use events::{EventEmitter, HookRegistry, LifecycleEvent};
pub use infrastructure::{
    ExecutableModule, ExtendingModule, ExtensionDefinitions, FactoryModule, Module, Service,
    ServiceContainer, ServiceDefinitions, ServiceModule,
};
pub use package::{ContainerExtension, ModuleStage, ModulesStatus, Package, PackageStatus};
pub use properties::Properties;
