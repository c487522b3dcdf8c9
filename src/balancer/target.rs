//! 解析结果的投递目标

use std::sync::OnceLock;
use tokio::sync::{mpsc, watch};

use super::state::ConnectivityState;
use crate::discovery::MembershipSnapshot;

/// 负载均衡器事件循环处理的事件
#[derive(Debug)]
pub enum BalancerEvent<C> {
    /// 新的成员快照
    Membership(MembershipSnapshot),

    /// 某个实例的连接状态变化
    ///
    /// `generation` 标识发出事件的连接任务，过期任务的事件会被忽略。
    Connectivity {
        instance_id: String,
        generation: u64,
        state: ConnectivityState,
        connection: Option<C>,
    },
}

/// 解析器与负载均衡器之间的交接点
///
/// 负载均衡器启动后调用 [`attach`](Self::attach)，此前 [`push`](Self::push) 会失败；
/// 负载均衡器通过 [`set_state`](Self::set_state) 发布聚合连接状态，等待方订阅状态变化。
pub struct ResolverTarget<C> {
    events: OnceLock<mpsc::UnboundedSender<BalancerEvent<C>>>,
    state: watch::Sender<ConnectivityState>,
}

impl<C> Default for ResolverTarget<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ResolverTarget<C> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectivityState::Idle);
        Self {
            events: OnceLock::new(),
            state,
        }
    }

    /// 接入负载均衡器，只能接入一次
    pub fn attach(&self, events: mpsc::UnboundedSender<BalancerEvent<C>>) -> bool {
        let attached = self.events.set(events).is_ok();
        if attached {
            // 唤醒等待接入的一方
            self.state.send_modify(|_| {});
        }
        attached
    }

    pub fn is_attached(&self) -> bool {
        self.events.get().is_some()
    }

    /// 把快照交给负载均衡器
    ///
    /// 尚未接入或负载均衡器已退出时返回 false。
    pub fn push(&self, snapshot: &MembershipSnapshot) -> bool {
        match self.events.get() {
            Some(events) => events.send(BalancerEvent::Membership(snapshot.clone())).is_ok(),
            None => false,
        }
    }

    /// 订阅聚合连接状态
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// 更新聚合连接状态，只有状态真正变化时才通知订阅方
    pub fn set_state(&self, state: ConnectivityState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
