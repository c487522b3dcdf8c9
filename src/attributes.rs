//! 实例属性
//!
//! 属性以扁平的字符串键值对形式存放在实例键下的子键中
//! （`<prefix>/<service>/<id>/<key> = <value>`）。
//! 负载均衡识别两个键：`balancerWeight` 与 `balancerPriority`，其余键原样透传。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::IntErrorKind;
use tracing::warn;

/// 权重属性键
pub const WEIGHT_KEY: &str = "balancerWeight";

/// 优先级属性键
pub const PRIORITY_KEY: &str = "balancerPriority";

/// 默认权重
pub const DEFAULT_WEIGHT: i64 = 1;

/// 权重上限，更大的值按上限处理
pub const MAX_WEIGHT: i64 = u16::MAX as i64;

/// 实例属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// 同一优先级内的相对流量份额，<= 0 表示不接收流量，上限为 [`MAX_WEIGHT`]
    pub weight: i64,

    /// 优先级，数值越大越优先
    pub priority: i64,

    /// 未识别的自定义属性
    pub extra: BTreeMap<String, String>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            weight: DEFAULT_WEIGHT,
            priority: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// 添加自定义属性
    ///
    /// 识别的键会被解析到对应字段上。
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.load(&key.into(), &value.into());
        self
    }

    /// 获取自定义属性
    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    /// 装载一个从存储读取的属性子键
    ///
    /// 无法解析的权重/优先级保留默认值，超过上限的权重按 [`MAX_WEIGHT`] 处理。
    pub fn load(&mut self, key: &str, value: &str) {
        match key {
            WEIGHT_KEY => match value.trim().parse::<i64>() {
                Ok(weight) if weight > MAX_WEIGHT => {
                    warn!(key, value, max = MAX_WEIGHT, "Clamping oversized balancer weight");
                    self.weight = MAX_WEIGHT;
                }
                Ok(weight) => self.weight = weight,
                Err(e) if *e.kind() == IntErrorKind::PosOverflow => {
                    warn!(key, value, max = MAX_WEIGHT, "Clamping oversized balancer weight");
                    self.weight = MAX_WEIGHT;
                }
                Err(e) => {
                    warn!(key, value, error = %e, "Ignoring malformed balancer weight");
                    self.weight = DEFAULT_WEIGHT;
                }
            },
            PRIORITY_KEY => match value.trim().parse() {
                Ok(priority) => self.priority = priority,
                Err(e) => {
                    warn!(key, value, error = %e, "Ignoring malformed balancer priority");
                    self.priority = 0;
                }
            },
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// 从属性子键集合构建
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut attributes = Self::default();
        for (key, value) in pairs {
            attributes.load(key, value);
        }
        attributes
    }

    /// 展开为属性子键（相对实例键），识别字段总是写出
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.extra.len() + 2);
        pairs.push((WEIGHT_KEY.to_string(), self.weight.to_string()));
        pairs.push((PRIORITY_KEY.to_string(), self.priority.to_string()));
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}
