//! 模块抽象层
//!
//! 模块按声明的能力分类：服务、工厂、扩展、可执行。
//! 一个模块可以同时具备多种能力，包只检查能力是否存在，不关心具体类型。

use super::container::{Service, ServiceContainer};
use crate::error::{BoxError, ContainerError};
use std::sync::Arc;

/// 服务闭包：接收容器，返回服务实例
pub type ServiceFactory = Arc<dyn Fn(&ServiceContainer) -> Result<Service, BoxError> + Send + Sync>;

/// 扩展闭包：接收上一次解析的结果与容器，返回装饰后的实例
pub type ExtensionFactory =
    Arc<dyn Fn(Service, &ServiceContainer) -> Result<Service, BoxError> + Send + Sync>;

/// 模块接口
///
/// `as_*` 方法返回模块具备的能力，默认均为 `None`。
pub trait Module: Send + Sync {
    /// 模块 id，在一个包内唯一
    fn id(&self) -> &str;

    fn as_service_module(&self) -> Option<&dyn ServiceModule> {
        None
    }

    fn as_factory_module(&self) -> Option<&dyn FactoryModule> {
        None
    }

    fn as_extending_module(&self) -> Option<&dyn ExtendingModule> {
        None
    }

    fn as_executable_module(&self) -> Option<&dyn ExecutableModule> {
        None
    }
}

/// 提供单例服务的模块
pub trait ServiceModule {
    fn services(&self) -> Result<ServiceDefinitions, BoxError>;
}

/// 提供工厂（每次解析都重新创建）的模块
pub trait FactoryModule {
    fn factories(&self) -> Result<ServiceDefinitions, BoxError>;
}

/// 装饰已有服务的模块
pub trait ExtendingModule {
    fn extensions(&self) -> Result<ExtensionDefinitions, BoxError>;
}

/// 在启动阶段执行一次的模块
pub trait ExecutableModule {
    /// 返回 `false` 表示执行失败，但不会导致启动失败
    fn run(&self, container: &ServiceContainer) -> Result<bool, BoxError>;
}

/// 按声明顺序保存的定义表
pub struct Definitions<F> {
    entries: Vec<(String, F)>,
}

/// 服务或工厂定义
pub type ServiceDefinitions = Definitions<ServiceFactory>;

/// 扩展定义
pub type ExtensionDefinitions = Definitions<ExtensionFactory>;

impl<F> Definitions<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 插入定义；同一 id 重复插入时替换旧值，保留原位置
    pub fn insert(&mut self, id: impl Into<String>, factory: F) {
        let id = id.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((id, factory)),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F> Default for Definitions<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> IntoIterator for Definitions<F> {
    type Item = (String, F);
    type IntoIter = std::vec::IntoIter<(String, F)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Definitions<ServiceFactory> {
    /// 注册类型化的服务闭包
    pub fn add<T, F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.insert(
            id,
            Arc::new(move |container: &ServiceContainer| {
                factory(container).map(|service| Arc::new(service) as Service)
            }) as ServiceFactory,
        );
        self
    }

    /// 注册直接返回 [`Service`] 的闭包
    pub fn add_raw<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ServiceContainer) -> Result<Service, BoxError> + Send + Sync + 'static,
    {
        self.insert(id, Arc::new(factory) as ServiceFactory);
        self
    }
}

impl Definitions<ExtensionFactory> {
    /// 注册类型化的扩展闭包，上一次的结果会被向下转型为 `T`
    pub fn add<T, U, F>(mut self, id: impl Into<String>, extension: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(Arc<T>, &ServiceContainer) -> Result<U, BoxError> + Send + Sync + 'static,
    {
        let id = id.into();
        let service_id = id.clone();
        self.insert(
            id,
            Arc::new(move |previous: Service, container: &ServiceContainer| {
                let previous = downcast::<T>(&service_id, previous)?;
                extension(previous, container).map(|service| Arc::new(service) as Service)
            }) as ExtensionFactory,
        );
        self
    }

    pub fn add_raw<F>(mut self, id: impl Into<String>, extension: F) -> Self
    where
        F: Fn(Service, &ServiceContainer) -> Result<Service, BoxError> + Send + Sync + 'static,
    {
        self.insert(id, Arc::new(extension) as ExtensionFactory);
        self
    }
}

fn downcast<T: Send + Sync + 'static>(id: &str, service: Service) -> Result<Arc<T>, BoxError> {
    service.downcast::<T>().map_err(|_| {
        Box::new(ContainerError::TypeCastFailed {
            id: id.to_string(),
            expected: std::any::type_name::<T>(),
        }) as BoxError
    })
}
