//! 连接状态

use std::fmt;

use crate::attributes::Attributes;

/// 单个连接或整个负载均衡通道的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectivityState {
    #[default]
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectivityState::Ready)
    }

    /// 根据各连接的状态计算聚合状态
    ///
    /// 任一连接就绪则为 Ready；否则任一连接空闲或连接中则为 Connecting；
    /// 其余情况（包括没有连接）为 TransientFailure。
    pub fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = ConnectivityState>,
    {
        let mut connecting = false;
        for state in states {
            match state {
                ConnectivityState::Ready => return ConnectivityState::Ready,
                ConnectivityState::Idle | ConnectivityState::Connecting => connecting = true,
                ConnectivityState::TransientFailure | ConnectivityState::Shutdown => {}
            }
        }

        if connecting {
            ConnectivityState::Connecting
        } else {
            ConnectivityState::TransientFailure
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Idle => write!(f, "IDLE"),
            ConnectivityState::Connecting => write!(f, "CONNECTING"),
            ConnectivityState::Ready => write!(f, "READY"),
            ConnectivityState::TransientFailure => write!(f, "TRANSIENT_FAILURE"),
            ConnectivityState::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// 构建 picker 时的一个子连接
#[derive(Debug, Clone)]
pub struct ChildState<C> {
    pub state: ConnectivityState,
    /// 仅在 Ready 时存在
    pub connection: Option<C>,
    pub attributes: Attributes,
}

impl<C> ChildState<C> {
    /// 就绪的子连接
    pub fn ready(connection: C, attributes: Attributes) -> Self {
        Self {
            state: ConnectivityState::Ready,
            connection: Some(connection),
            attributes,
        }
    }

    /// 未就绪的子连接
    pub fn pending(state: ConnectivityState, attributes: Attributes) -> Self {
        Self {
            state,
            connection: None,
            attributes,
        }
    }
}
