//! 模块状态账本
//!
//! 只追加的日志，记录每个模块经过的阶段；查询视图在读取时计算，
//! 因此构建中途失败后依然可以看到已经处理过的模块。

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// 所有模块日志在 [`ModulesStatus::get`] 中使用的键
pub const MODULES_ALL: &str = "*";

/// 模块阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleStage {
    /// 模块没有声明任何内容
    NotAdded,
    /// 注册了单例服务
    Registered,
    /// 注册了工厂
    RegisteredFactories,
    /// 注册了扩展
    Extended,
    /// 至少具备一种能力
    Added,
    /// `run()` 返回 `true`
    Executed,
    /// `run()` 返回 `false` 或错误
    ExecutionFailed,
}

impl ModuleStage {
    pub const ALL: [ModuleStage; 7] = [
        ModuleStage::NotAdded,
        ModuleStage::Registered,
        ModuleStage::RegisteredFactories,
        ModuleStage::Extended,
        ModuleStage::Added,
        ModuleStage::Executed,
        ModuleStage::ExecutionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStage::NotAdded => "not-added",
            ModuleStage::Registered => "registered",
            ModuleStage::RegisteredFactories => "registered-factories",
            ModuleStage::Extended => "extended",
            ModuleStage::Added => "added",
            ModuleStage::Executed => "executed",
            ModuleStage::ExecutionFailed => "executed-failed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == tag)
    }
}

impl fmt::Display for ModuleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    module_id: String,
    stage: ModuleStage,
    service_ids: Vec<String>,
}

impl LedgerEntry {
    fn describe(&self, debug: bool) -> String {
        if debug && !self.service_ids.is_empty() {
            format!(
                "{} {} ({})",
                self.module_id,
                self.stage,
                self.service_ids.join(", ")
            )
        } else {
            format!("{} {}", self.module_id, self.stage)
        }
    }
}

/// 模块状态账本
#[derive(Debug)]
pub struct ModuleLedger {
    debug: bool,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl ModuleLedger {
    pub(crate) fn new(debug: bool) -> Self {
        Self {
            debug,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, module_id: &str, stage: ModuleStage, service_ids: Vec<String>) {
        tracing::debug!(module = module_id, stage = %stage, services = ?service_ids, "module stage");
        self.entries.lock().push(LedgerEntry {
            module_id: module_id.to_string(),
            stage,
            service_ids,
        });
    }

    pub fn is(&self, module_id: &str, stage: ModuleStage) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.module_id == module_id && entry.stage == stage)
    }

    /// 模块是否已经处理完毕（added 或 not-added）
    pub fn is_settled(&self, module_id: &str) -> bool {
        self.is(module_id, ModuleStage::Added) || self.is(module_id, ModuleStage::NotAdded)
    }

    pub fn status(&self) -> ModulesStatus {
        let entries = self.entries.lock();
        let mut status = ModulesStatus::default();
        for entry in entries.iter() {
            status.all.push(entry.describe(self.debug));
            let ids = status.stages.entry(entry.stage).or_default();
            if !ids.contains(&entry.module_id) {
                ids.push(entry.module_id.clone());
            }
        }
        status
    }
}

/// 账本的只读视图
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulesStatus {
    all: Vec<String>,
    stages: BTreeMap<ModuleStage, Vec<String>>,
}

impl ModulesStatus {
    /// 按时间顺序的全部阶段描述，例如 `"service registered"`
    pub fn all(&self) -> &[String] {
        &self.all
    }

    /// 经过某个阶段的模块 id，按首次出现顺序
    pub fn stage(&self, stage: ModuleStage) -> &[String] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 按字符串键查询：[`MODULES_ALL`] 或阶段标签
    pub fn get(&self, key: &str) -> Option<&[String]> {
        if key == MODULES_ALL {
            return Some(&self.all);
        }
        let stage = ModuleStage::from_tag(key)?;
        self.stages.get(&stage).map(Vec::as_slice)
    }

    /// 出现过的阶段
    pub fn stages(&self) -> impl Iterator<Item = ModuleStage> + '_ {
        self.stages.keys().copied()
    }
}
