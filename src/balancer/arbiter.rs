//! 成员更新仲裁
//!
//! 解析器可能在负载均衡器接入之前就拿到了新快照。此时起一个等待任务，
//! 在每次状态变化时重试投递；新快照到来时先取消并等待旧的等待任务退出，
//! 因此同一时刻最多只有一个等待任务，快照按提交顺序生效。

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::ConnectivityState;
use super::target::ResolverTarget;
use crate::discovery::MembershipSnapshot;

/// 成员更新仲裁器
pub struct UpdateArbiter<C> {
    target: Arc<ResolverTarget<C>>,
    waiter: Option<Waiter>,
}

struct Waiter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<C: Send + Sync + 'static> UpdateArbiter<C> {
    pub fn new(target: Arc<ResolverTarget<C>>) -> Self {
        Self { target, waiter: None }
    }

    /// 提交一个快照
    pub async fn submit(&mut self, snapshot: MembershipSnapshot) {
        if let Some(waiter) = self.waiter.take() {
            waiter.cancel.cancel();
            let _ = waiter.handle.await;
        }

        if self.target.push(&snapshot) {
            return;
        }

        debug!(instances = snapshot.len(), "Balancer not attached yet, deferring membership update");

        let target = self.target.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut state = target.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                // 先标记已读再投递，投递失败之后的任何变化都会唤醒下面的等待
                let current = *state.borrow_and_update();
                if target.push(&snapshot) {
                    debug!(instances = snapshot.len(), "Deferred membership update applied");
                    return;
                }
                if current == ConnectivityState::Shutdown {
                    return;
                }

                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        self.waiter = Some(Waiter { cancel, handle });
    }

    /// 是否有尚未完成的等待任务
    pub fn has_pending(&self) -> bool {
        self.waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.handle.is_finished())
    }
}

impl<C> Drop for UpdateArbiter<C> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.cancel.cancel();
        }
    }
}
