//! 服务发现模块
//!
//! 从协调存储加载某个服务的成员列表，并通过长期 watch 保持最新，
//! 每次成员发生有意义的变化时产出一个完整快照。

pub mod resolver;
pub mod snapshot;

pub use resolver::{MembershipStream, Resolver};
pub use snapshot::{FlatMembership, InstanceRecord, MembershipSnapshot};
