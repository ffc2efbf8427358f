//! 包连接
//!
//! 被连接包的服务通过 [`PackageProxy`] 暴露给当前包的容器。
//! 代理经由目标包的完整容器解析，因此目标包自己连接的包也可以被访问。
//! 目标包启动之前，代理对 `has` 如实回答，但 `get` 一律视为未找到。

use std::sync::Arc;
use tracing::debug;

use super::{Package, PackageStatus};
use crate::error::ContainerError;
use crate::infrastructure::container::{Service, ServiceContainer, ServiceSource};

/// 指向另一个包容器的只读代理
pub struct PackageProxy {
    package: Arc<Package>,
}

impl PackageProxy {
    pub fn new(package: Arc<Package>) -> Self {
        Self { package }
    }
}

impl ServiceSource for PackageProxy {
    fn name(&self) -> &str {
        self.package.name()
    }

    fn has(&self, id: &str) -> bool {
        self.package
            .built_container()
            .is_some_and(|container| container.has(id))
    }

    fn get(&self, id: &str) -> Result<Service, ContainerError> {
        if !self.package.status_is(PackageStatus::Booted) {
            debug!(
                package = self.package.name(),
                service = id,
                "connected package is not booted yet"
            );
            return Err(ContainerError::not_found(id));
        }
        match self.package.built_container() {
            Some(container) => container.get(id),
            None => Err(ContainerError::not_found(id)),
        }
    }
}

/// 把目标包挂到容器上，并以 `<name>.properties` 暴露其元数据
pub(crate) fn install(container: &ServiceContainer, target: &Arc<Package>) {
    let properties_id = format!("{}.{}", target.name(), Package::PROPERTIES);
    container.set(properties_id, target.shared_properties() as Service);
    container.add_source(Arc::new(PackageProxy::new(target.clone())));
}
