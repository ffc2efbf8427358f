//! 容器合成器
//!
//! 按添加顺序把模块的服务、工厂与扩展注册进容器，并在账本中记录阶段。

use tracing::debug;

use super::ServiceContainer;
use crate::error::ModularityError;
use crate::infrastructure::module::Module;
use crate::package::ledger::{ModuleLedger, ModuleStage};

pub(crate) struct ContainerCompositor<'a> {
    container: &'a ServiceContainer,
    ledger: &'a ModuleLedger,
}

impl<'a> ContainerCompositor<'a> {
    pub(crate) fn new(container: &'a ServiceContainer, ledger: &'a ModuleLedger) -> Self {
        Self { container, ledger }
    }

    /// 合并一个模块的声明，返回模块是否可执行
    ///
    /// 回调出错时立即返回，已经记录的阶段保留在账本中。
    pub(crate) fn add_module(&self, module: &dyn Module) -> Result<bool, ModularityError> {
        let module_id = module.id();
        if self.ledger.is_settled(module_id) {
            return Err(ModularityError::ModuleRejected {
                module_id: module_id.to_string(),
                reason: "module was already processed".to_string(),
            });
        }

        let mut added = false;

        if let Some(provider) = module.as_service_module() {
            let services = provider
                .services()
                .map_err(|e| ModularityError::callback_failed(module_id, e))?;
            if !services.is_empty() {
                let ids = services.ids();
                for (id, factory) in services {
                    self.container.register_service(id, factory)?;
                }
                self.ledger.record(module_id, ModuleStage::Registered, ids);
                added = true;
            }
        }

        if let Some(provider) = module.as_factory_module() {
            let factories = provider
                .factories()
                .map_err(|e| ModularityError::callback_failed(module_id, e))?;
            if !factories.is_empty() {
                let ids = factories.ids();
                for (id, factory) in factories {
                    self.container.register_factory(id, factory)?;
                }
                self.ledger
                    .record(module_id, ModuleStage::RegisteredFactories, ids);
                added = true;
            }
        }

        if let Some(provider) = module.as_extending_module() {
            let extensions = provider
                .extensions()
                .map_err(|e| ModularityError::callback_failed(module_id, e))?;
            if !extensions.is_empty() {
                let ids = extensions.ids();
                for (id, extension) in extensions {
                    self.container.register_extension(id, extension)?;
                }
                self.ledger.record(module_id, ModuleStage::Extended, ids);
                added = true;
            }
        }

        let executable = module.as_executable_module().is_some();
        added |= executable;

        let stage = if added {
            ModuleStage::Added
        } else {
            ModuleStage::NotAdded
        };
        self.ledger.record(module_id, stage, Vec::new());
        debug!(module = module_id, executable, "module composed");

        Ok(executable)
    }
}
