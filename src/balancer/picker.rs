//! 加权优先级 picker
//!
//! 每次子连接集合或状态变化时整体重建：按优先级从高到低稳定排序，
//! 截断到活跃实例上限，再把各实例按权重交错展开成一个循环序列。
//! 起始位置随机，之后每次选择前进一格。

use rand::Rng;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use super::state::{ChildState, ConnectivityState};
use crate::attributes::MAX_WEIGHT;

/// 选择连接失败
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PickError {
    /// 暂无就绪连接，但有连接正在建立，稍后重试
    #[error("no subchannel available yet")]
    NoSubchannelAvailable,

    /// 没有可用的服务实例
    #[error("no server available for pick")]
    NoServerAvailable,
}

impl PickError {
    /// 是否应等待下一个 picker 后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, PickError::NoSubchannelAvailable)
    }
}

/// 参与构建序列的就绪实例
#[derive(Debug, Clone)]
pub struct WeightedEndpoint<C> {
    pub connection: C,
    pub priority: i64,
    pub weight: i64,
}

struct Slot<C> {
    connection: C,
    weight: u64,
    factor: u64,
    count: u64,
}

/// 构建加权循环序列
///
/// 权重 <= 0 的实例被忽略，超过 [`MAX_WEIGHT`] 的权重按上限计算。
/// 序列长度等于保留实例的权重之和，
/// 每个实例按 `ceil(weight / 保留数量)` 一轮一轮地交错出现。
pub fn weighted_sequence<C: Clone>(endpoints: Vec<WeightedEndpoint<C>>, max_active: usize) -> Vec<C> {
    let mut endpoints: Vec<WeightedEndpoint<C>> = endpoints.into_iter().filter(|e| e.weight > 0).collect();

    // sort_by 是稳定排序，同优先级保持输入顺序
    endpoints.sort_by(|a, b| b.priority.cmp(&a.priority));
    if max_active > 0 && max_active < endpoints.len() {
        endpoints.truncate(max_active);
    }

    if endpoints.is_empty() {
        return Vec::new();
    }

    let kept = endpoints.len() as u64;
    let mut total = 0usize;
    let mut slots: Vec<Slot<C>> = endpoints
        .into_iter()
        .map(|endpoint| {
            let weight = endpoint.weight.min(MAX_WEIGHT) as u64;
            total = total.saturating_add(weight as usize);
            Slot {
                factor: weight.div_ceil(kept),
                weight,
                count: 0,
                connection: endpoint.connection,
            }
        })
        .collect();

    let mut sequence = Vec::with_capacity(total);
    while sequence.len() < total {
        let before = sequence.len();

        for slot in slots.iter_mut() {
            if slot.count < slot.factor && slot.weight > 0 {
                sequence.push(slot.connection.clone());
                slot.weight -= 1;
                slot.count += 1;
            }
        }

        if sequence.len() == before {
            for slot in slots.iter_mut() {
                slot.count = 0;
            }
        }
    }

    sequence
}

/// 一次构建得到的 picker
pub struct Picker<C> {
    inner: Result<Sequence<C>, PickError>,
}

struct Sequence<C> {
    connections: Vec<C>,
    next: Mutex<usize>,
}

impl<C: Clone> Picker<C> {
    /// 总是返回错误的 picker
    pub fn error(error: PickError) -> Self {
        Self { inner: Err(error) }
    }

    /// 从已展开的序列创建，`start` 为首次选择的位置
    ///
    /// 空序列得到 [`PickError::NoServerAvailable`]。
    pub fn from_sequence(connections: Vec<C>, start: usize) -> Self {
        if connections.is_empty() {
            return Self::error(PickError::NoServerAvailable);
        }
        let start = start % connections.len();
        Self {
            inner: Ok(Sequence {
                connections,
                next: Mutex::new(start),
            }),
        }
    }

    /// 选择下一个连接
    pub fn pick(&self) -> Result<C, PickError> {
        let sequence = self.inner.as_ref().map_err(|e| *e)?;
        let mut next = sequence.next.lock().unwrap_or_else(PoisonError::into_inner);
        let connection = sequence.connections[*next].clone();
        *next = (*next + 1) % sequence.connections.len();
        Ok(connection)
    }

    /// 构建失败时的错误
    pub fn err(&self) -> Option<PickError> {
        self.inner.as_ref().err().copied()
    }

    /// 展开后的序列，出错的 picker 为空
    pub fn sequence(&self) -> &[C] {
        match &self.inner {
            Ok(sequence) => &sequence.connections,
            Err(_) => &[],
        }
    }

    /// 下一次选择的位置
    pub fn cursor(&self) -> Option<usize> {
        let sequence = self.inner.as_ref().ok()?;
        let next = sequence.next.lock().unwrap_or_else(PoisonError::into_inner);
        Some(*next)
    }

    pub fn len(&self) -> usize {
        self.sequence().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence().is_empty()
    }
}

impl<C> std::fmt::Debug for Picker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Ok(sequence) => f
                .debug_struct("Picker")
                .field("len", &sequence.connections.len())
                .finish(),
            Err(e) => f.debug_struct("Picker").field("error", e).finish(),
        }
    }
}

/// picker 构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct PickerBuilder {
    max_active: usize,
}

impl PickerBuilder {
    /// `max_active` 为同时接收流量的实例上限，0 表示不限制
    pub fn new(max_active: usize) -> Self {
        Self { max_active }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// 根据子连接状态构建 picker，起始位置随机
    pub fn build<C: Clone>(&self, children: &[ChildState<C>]) -> Picker<C> {
        if children.is_empty() {
            return Picker::error(PickError::NoServerAvailable);
        }

        let mut connecting = false;
        let mut endpoints = Vec::with_capacity(children.len());

        for child in children {
            if child.attributes.weight <= 0 {
                continue;
            }

            if child.state == ConnectivityState::Connecting {
                connecting = true;
            }

            let (ConnectivityState::Ready, Some(connection)) = (child.state, child.connection.as_ref()) else {
                continue;
            };

            endpoints.push(WeightedEndpoint {
                connection: connection.clone(),
                priority: child.attributes.priority,
                weight: child.attributes.weight,
            });
        }

        if endpoints.is_empty() {
            return Picker::error(if connecting {
                PickError::NoSubchannelAvailable
            } else {
                PickError::NoServerAvailable
            });
        }

        let sequence = weighted_sequence(endpoints, self.max_active);
        let start = rand::thread_rng().gen_range(0..sequence.len());
        Picker::from_sequence(sequence, start)
    }
}
