//! 错误类型
//!
//! 生命周期、容器解析与包连接三类错误。所有错误均可 `Clone`，
//! 以便包在失败后保存诊断信息，并在事件载荷中原样传递。

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::package::PackageStatus;

/// 模块回调与服务闭包使用的类型擦除错误
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// 可共享的类型擦除错误
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// 将回调返回的错误转为可共享形式
pub(crate) fn share(error: BoxError) -> SharedError {
    Arc::from(error)
}

/// 容器解析错误
#[derive(Debug, Clone, Error)]
pub enum ContainerError {
    /// 服务未注册，或所在的连接包尚未启动
    #[error("service '{id}' not found")]
    NotFound { id: String },

    /// 服务闭包或扩展闭包执行失败
    #[error("failed to resolve service '{id}'")]
    ResolutionFailed {
        id: String,
        #[source]
        source: SharedError,
    },

    /// 类型转换失败
    #[error("type cast failed for service '{id}': expected '{expected}'")]
    TypeCastFailed { id: String, expected: &'static str },

    /// 循环依赖
    #[error("circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// 容器已冻结，不再接受注册
    #[error("can't register '{id}': container is frozen")]
    Frozen { id: String },
}

impl ContainerError {
    pub fn not_found(id: impl Into<String>) -> Self {
        ContainerError::NotFound { id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound { .. })
    }
}

/// 连接被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRejection {
    /// 当前包已启动
    AlreadyBooted,
    /// 目标包已连接过
    AlreadyConnected,
    /// 当前包处于失败状态
    Errored,
}

impl fmt::Display for ConnectionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRejection::AlreadyBooted => write!(f, "current package is already booted"),
            ConnectionRejection::AlreadyConnected => write!(f, "package is already connected"),
            ConnectionRejection::Errored => write!(f, "current package is errored"),
        }
    }
}

/// 包生命周期错误
#[derive(Debug, Clone, Error)]
pub enum ModularityError {
    /// 模块 id 重复，或在容器构建后添加模块
    #[error("can't add module {module_id}: {reason}")]
    ModuleRejected { module_id: String, reason: String },

    /// `services()` / `factories()` / `extensions()` 回调失败
    #[error("failed to add module {module_id}")]
    ModuleCallbackFailed {
        module_id: String,
        #[source]
        source: SharedError,
    },

    /// 可执行模块的 `run()` 返回错误
    #[error("failed to execute module {module_id}")]
    ModuleExecutionFailed {
        module_id: String,
        #[source]
        source: SharedError,
    },

    #[error("failed connect package {target}: {reason}")]
    ConnectionRejected {
        target: String,
        reason: ConnectionRejection,
    },

    /// 生命周期事件的监听器失败
    #[error("listener for '{hook}' failed")]
    ListenerFailed {
        hook: String,
        #[source]
        source: SharedError,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// 容器扩展钩子失败
    #[error("failed to extend container of package {package}")]
    ContainerExtensionFailed {
        package: String,
        #[source]
        source: SharedError,
    },

    /// 容器尚未构建
    #[error("can't access container of package {package}: package is {status}")]
    ContainerUnavailable {
        package: String,
        status: PackageStatus,
    },

    #[error("failed to build package {package}")]
    BuildFailed {
        package: String,
        #[source]
        source: Box<ModularityError>,
    },

    #[error("failed to boot application {package}")]
    BootFailed {
        package: String,
        #[source]
        source: Box<ModularityError>,
    },
}

impl ModularityError {
    pub(crate) fn callback_failed(module_id: &str, source: BoxError) -> Self {
        ModularityError::ModuleCallbackFailed {
            module_id: module_id.to_string(),
            source: share(source),
        }
    }

    /// 自身及其全部 `source()` 组成的错误链
    pub fn chain(&self) -> Chain<'_> {
        Chain {
            next: Some(self as &(dyn StdError + 'static)),
        }
    }
}

/// 错误链迭代器
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source();
        Some(current)
    }
}
