//! 生命周期事件
//!
//! 包在固定的生命周期节点调用 [`EventEmitter`]。默认实现 [`HookRegistry`]
//! 按钩子名称同步分发给监听器，监听器的错误原样返回给包。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BoxError, ModularityError};
use crate::package::PackageStatus;

/// 生命周期事件
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// 构建开始；监听器出错会中止构建
    Init { package: String },
    /// 启动完成
    Ready { package: String },
    FailedBuild {
        package: String,
        error: ModularityError,
    },
    FailedBoot {
        package: String,
        error: ModularityError,
    },
    FailedConnection {
        package: String,
        target: String,
        error: ModularityError,
    },
    PackageConnected {
        package: String,
        target: String,
        /// 连接时目标包的状态
        target_status: PackageStatus,
        target_booted: bool,
    },
}

impl LifecycleEvent {
    pub const INIT: &'static str = "init";
    pub const READY: &'static str = "ready";
    pub const FAILED_BUILD: &'static str = "failed-build";
    pub const FAILED_BOOT: &'static str = "failed-boot";
    pub const FAILED_CONNECTION: &'static str = "failed-connection";
    pub const PACKAGE_CONNECTED: &'static str = "package-connected";

    /// 钩子名称后缀
    pub fn suffix(&self) -> &'static str {
        match self {
            LifecycleEvent::Init { .. } => Self::INIT,
            LifecycleEvent::Ready { .. } => Self::READY,
            LifecycleEvent::FailedBuild { .. } => Self::FAILED_BUILD,
            LifecycleEvent::FailedBoot { .. } => Self::FAILED_BOOT,
            LifecycleEvent::FailedConnection { .. } => Self::FAILED_CONNECTION,
            LifecycleEvent::PackageConnected { .. } => Self::PACKAGE_CONNECTED,
        }
    }

    /// 触发事件的包
    pub fn package(&self) -> &str {
        match self {
            LifecycleEvent::Init { package }
            | LifecycleEvent::Ready { package }
            | LifecycleEvent::FailedBuild { package, .. }
            | LifecycleEvent::FailedBoot { package, .. }
            | LifecycleEvent::FailedConnection { package, .. }
            | LifecycleEvent::PackageConnected { package, .. } => package,
        }
    }

    pub fn error(&self) -> Option<&ModularityError> {
        match self {
            LifecycleEvent::FailedBuild { error, .. }
            | LifecycleEvent::FailedBoot { error, .. }
            | LifecycleEvent::FailedConnection { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// 事件发射器
pub trait EventEmitter: Send + Sync {
    /// 同步发射事件；返回的错误由包决定如何处理
    fn emit(&self, hook: &str, event: &LifecycleEvent) -> Result<(), BoxError>;
}

/// 监听器
pub type Listener = Arc<dyn Fn(&LifecycleEvent) -> Result<(), BoxError> + Send + Sync>;

/// 按钩子名称注册监听器的发射器
#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器，同一钩子按注册顺序调用
    pub fn listen<F>(&self, hook: impl Into<String>, listener: F)
    where
        F: Fn(&LifecycleEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(hook.into())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        self.listeners.read().get(hook).map_or(0, Vec::len)
    }
}

impl EventEmitter for HookRegistry {
    fn emit(&self, hook: &str, event: &LifecycleEvent) -> Result<(), BoxError> {
        // 监听器可能再注册监听器，先复制再调用
        let listeners = self.listeners.read().get(hook).cloned().unwrap_or_default();
        debug!(hook, listeners = listeners.len(), "emitting lifecycle event");
        for listener in listeners {
            listener(event)?;
        }
        Ok(())
    }
}
