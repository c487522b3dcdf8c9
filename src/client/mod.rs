//! 负载均衡客户端通道
//!
//! [`BalancedChannel`] 每次调用都从最新的 picker 选择一个连接。
//! 对 tonic 生成的客户端，`BalancedChannel<Channel>` 可以直接替代 `Channel` 使用。

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_util::sync::DropGuard;
use tower::{BoxError, Service, ServiceExt};

use crate::balancer::{ConnectivityState, Picker};
use crate::error::{PlatformError, Result};

/// 负载均衡客户端通道
///
/// 可以廉价克隆；最后一个克隆被丢弃时，后台的成员 watch 与负载均衡器随之停止。
pub struct BalancedChannel<C> {
    target: Arc<str>,
    pickers: watch::Receiver<Arc<Picker<C>>>,
    state: watch::Receiver<ConnectivityState>,
    _guard: Arc<DropGuard>,
}

impl<C> Clone for BalancedChannel<C> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            pickers: self.pickers.clone(),
            state: self.state.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<C: Clone> BalancedChannel<C> {
    pub fn new(
        target: impl Into<Arc<str>>,
        pickers: watch::Receiver<Arc<Picker<C>>>,
        state: watch::Receiver<ConnectivityState>,
        guard: DropGuard,
    ) -> Self {
        Self {
            target: target.into(),
            pickers,
            state,
            _guard: Arc::new(guard),
        }
    }

    /// 目标服务名
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 当前聚合连接状态
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// 等待聚合状态离开 `current`，返回新状态
    pub async fn wait_for_state_change(&self, current: ConnectivityState) -> Result<ConnectivityState> {
        let mut state = self.state.clone();
        let changed = state
            .wait_for(|state| *state != current)
            .await
            .map_err(|_| PlatformError::BalancerClosed(self.target.to_string()))?;
        Ok(*changed)
    }

    /// 用当前 picker 选择一个连接，不等待
    pub fn try_pick(&self) -> Result<C> {
        let picker = self.pickers.borrow().clone();
        Ok(picker.pick()?)
    }

    /// 选择一个连接
    ///
    /// 暂时没有就绪连接时等待下一个 picker；没有可用实例时返回错误。
    pub async fn pick(&self) -> Result<C> {
        let mut pickers = self.pickers.clone();
        loop {
            let picker = pickers.borrow_and_update().clone();
            match picker.pick() {
                Ok(connection) => return Ok(connection),
                Err(e) if e.is_retryable() => {
                    if pickers.changed().await.is_err() {
                        return Err(PlatformError::BalancerClosed(self.target.to_string()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<C, Req> Service<Req> for BalancedChannel<C>
where
    C: Service<Req> + Clone + Send + Sync + 'static,
    C::Response: Send + 'static,
    C::Future: Send,
    C::Error: Into<BoxError>,
    Req: Send + 'static,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, std::result::Result<C::Response, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        // 连接在 call 中选择，就绪检查交给被选中的连接
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let channel = self.clone();
        Box::pin(async move {
            let connection = channel.pick().await?;
            connection.oneshot(req).await.map_err(Into::into)
        })
    }
}
