//! 基础设施层
//!
//! - 依赖注入容器
//! - 模块能力契约

pub mod container;
pub mod module;

pub use container::{ContainerStats, Service, ServiceContainer, ServiceLifetime, ServiceSource};
pub use module::{
    ExecutableModule, ExtendingModule, ExtensionDefinitions, ExtensionFactory, FactoryModule,
    Module, ServiceDefinitions, ServiceFactory, ServiceModule,
};
