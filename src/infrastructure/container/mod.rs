//! 服务容器
//!
//! `ServiceContainer` 负责按字符串 id 注册与解析服务，
//! `compositor` 负责把模块声明合并进容器。

pub(crate) mod compositor;
pub mod service;

use std::any::Any;
use std::sync::Arc;

use crate::error::ContainerError;

pub(crate) use compositor::ContainerCompositor;
pub use service::{ContainerStats, ServiceContainer};

/// 类型擦除的服务实例
pub type Service = Arc<dyn Any + Send + Sync>;

/// 服务生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// 首次解析后缓存，之后始终返回同一实例
    Singleton,
    /// 每次解析都重新创建
    Transient,
}

/// 容器之外的服务来源，例如连接的其他包
///
/// 容器在自身没有注册某个 id 时，按添加顺序查询这些来源。
pub trait ServiceSource: Send + Sync {
    /// 来源名称，仅用于日志
    fn name(&self) -> &str;

    /// 是否声明了该 id；不得触发解析
    fn has(&self, id: &str) -> bool;

    fn get(&self, id: &str) -> Result<Service, ContainerError>;
}
