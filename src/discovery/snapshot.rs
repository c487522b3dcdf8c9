//! 成员快照
//!
//! 存储中的扁平键空间（相对 `<prefix>/<service>/`）：
//! - `<instance_id>` -> 地址
//! - `<instance_id>/<attr_key>` -> 属性值
//!
//! [`FlatMembership`] 保存扁平视图并应用 watch 事件，
//! [`MembershipSnapshot`] 是按实例分组后的不可变视图。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::attributes::Attributes;
use crate::store::{EventKind, WatchEvent};

/// 一个存活的服务实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub address: String,
    pub attributes: Attributes,
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>, address: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            instance_id: instance_id.into(),
            address: address.into(),
            attributes,
        }
    }

    /// 展开为扁平键值（相对服务前缀）
    pub fn flatten_into(&self, flat: &mut BTreeMap<String, String>) {
        flat.insert(self.instance_id.clone(), self.address.clone());
        for (key, value) in self.attributes.to_pairs() {
            flat.insert(format!("{}/{}", self.instance_id, key), value);
        }
    }
}

/// 某个服务在某一时刻的完整成员视图，按实例 ID 排序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    instances: BTreeMap<String, InstanceRecord>,
}

impl MembershipSnapshot {
    /// 将扁平键值分组为快照
    ///
    /// 只有属性键、没有地址键的实例不会出现在快照中：
    /// 它们要么是尚未看到地址键的半发布实例，要么是地址键已被删除的残留属性。
    pub fn group<'a, I>(flat: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut addresses: BTreeMap<&str, &str> = BTreeMap::new();
        let mut attributes: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();

        for (key, value) in flat {
            match key.split_once('/') {
                None => {
                    addresses.insert(key.as_str(), value.as_str());
                }
                Some((instance_id, attr_key)) => {
                    attributes
                        .entry(instance_id)
                        .or_default()
                        .push((attr_key, value.as_str()));
                }
            }
        }

        let partial = attributes
            .keys()
            .filter(|id| !addresses.contains_key(*id))
            .count();
        if partial > 0 {
            debug!(partial, "Skipping instances without an address key");
        }

        let instances = addresses
            .into_iter()
            .map(|(instance_id, address)| {
                let attrs = attributes
                    .remove(instance_id)
                    .map(Attributes::from_pairs)
                    .unwrap_or_default();
                (
                    instance_id.to_string(),
                    InstanceRecord::new(instance_id, address, attrs),
                )
            })
            .collect();

        Self { instances }
    }

    /// 展开为扁平键值，`group` 的逆操作
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        for record in self.instances.values() {
            record.flatten_into(&mut flat);
        }
        flat
    }

    pub fn get(&self, instance_id: &str) -> Option<&InstanceRecord> {
        self.instances.get(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.instances.values()
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }
}

impl FromIterator<InstanceRecord> for MembershipSnapshot {
    fn from_iter<T: IntoIterator<Item = InstanceRecord>>(iter: T) -> Self {
        Self {
            instances: iter
                .into_iter()
                .map(|record| (record.instance_id.clone(), record))
                .collect(),
        }
    }
}

impl IntoIterator for MembershipSnapshot {
    type Item = InstanceRecord;
    type IntoIter = std::collections::btree_map::IntoValues<String, InstanceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.into_values()
    }
}

/// 解析器独占的扁平成员视图
#[derive(Debug, Clone, Default)]
pub struct FlatMembership {
    prefix: String,
    entries: BTreeMap<String, String>,
}

impl FlatMembership {
    /// `prefix` 为服务目录，形如 `/rpcplatform/echo/`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: BTreeMap::new(),
        }
    }

    /// 从一次前缀读取的结果构建
    pub fn from_kvs(prefix: impl Into<String>, kvs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut flat = Self::new(prefix);
        for (key, value) in kvs {
            if let Some(relative) = flat.relative(&key) {
                let relative = relative.to_string();
                flat.entries.insert(relative, value);
            }
        }
        flat
    }

    fn relative<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.prefix.as_str())
            .filter(|relative| !relative.is_empty())
    }

    /// 按顺序应用一个 watch 事件
    pub fn apply(&mut self, event: &WatchEvent) {
        let Some(relative) = self.relative(&event.key) else {
            return;
        };
        let relative = relative.to_string();
        match event.kind {
            EventKind::Put => {
                self.entries.insert(relative, event.value.clone());
            }
            EventKind::Delete => {
                self.entries.remove(&relative);
            }
        }
    }

    /// 重新分组整个扁平视图
    pub fn snapshot(&self) -> MembershipSnapshot {
        MembershipSnapshot::group(&self.entries)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
