//! 负载均衡模块
//!
//! - [`PickerBuilder`] / [`Picker`]：按权重与优先级构建的循环选择序列
//! - [`Balancer`]：维护每个实例的连接，状态变化时重建 picker
//! - [`ResolverTarget`] / [`UpdateArbiter`]：把成员快照有序地交给负载均衡器
//! - [`Connector`]：为实例地址建立连接，默认实现为 [`TonicConnector`]

pub mod arbiter;
pub mod connector;
pub mod picker;
pub mod shell;
pub mod state;
pub mod target;

pub use arbiter::UpdateArbiter;
pub use connector::{Connector, TonicConnector};
pub use picker::{PickError, Picker, PickerBuilder, WeightedEndpoint, weighted_sequence};
pub use shell::Balancer;
pub use state::{ChildState, ConnectivityState};
pub use target::{BalancerEvent, ResolverTarget};
