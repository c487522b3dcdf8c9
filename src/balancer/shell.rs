//! 负载均衡器
//!
//! 一个事件循环任务独占实例表：成员快照决定为哪些实例建立连接，
//! 每个实例一个连接任务，失败后指数退避重连。任何事件处理完之后都重建 picker
//! 并通过 `watch` 通道发布，同时更新聚合连接状态。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connector::Connector;
use super::picker::{PickError, Picker, PickerBuilder};
use super::state::{ChildState, ConnectivityState};
use super::target::{BalancerEvent, ResolverTarget};
use crate::attributes::Attributes;
use crate::config::ClientConfig;
use crate::discovery::MembershipSnapshot;
use crate::error::PlatformError;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};

/// 负载均衡器
pub struct Balancer<K: Connector> {
    target_name: String,
    connector: Arc<K>,
    builder: PickerBuilder,
    connect_timeout: Duration,
    backoff: ExponentialBackoffPolicy,
    target: Arc<ResolverTarget<K::Connection>>,
    pickers: watch::Sender<Arc<Picker<K::Connection>>>,
    events_tx: mpsc::UnboundedSender<BalancerEvent<K::Connection>>,
    events_rx: mpsc::UnboundedReceiver<BalancerEvent<K::Connection>>,
    endpoints: BTreeMap<String, Endpoint<K::Connection>>,
    next_generation: u64,
}

struct Endpoint<C> {
    address: String,
    attributes: Attributes,
    state: ConnectivityState,
    connection: Option<C>,
    generation: u64,
    cancel: CancellationToken,
}

impl<K: Connector> Balancer<K> {
    /// 创建负载均衡器，返回 picker 的订阅端
    ///
    /// 首个 picker 返回 [`PickError::NoSubchannelAvailable`]，直到收到成员快照。
    pub fn new(
        target_name: impl Into<String>,
        connector: Arc<K>,
        target: Arc<ResolverTarget<K::Connection>>,
        config: &ClientConfig,
    ) -> (Self, watch::Receiver<Arc<Picker<K::Connection>>>) {
        let (pickers, picker_rx) = watch::channel(Arc::new(Picker::error(PickError::NoSubchannelAvailable)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let balancer = Self {
            target_name: target_name.into(),
            connector,
            builder: PickerBuilder::new(config.max_active_servers),
            connect_timeout: config.connect_timeout(),
            backoff: ExponentialBackoffPolicy::new(config.reconnect_base_delay(), config.reconnect_max_delay()),
            target,
            pickers,
            events_tx,
            events_rx,
            endpoints: BTreeMap::new(),
            next_generation: 0,
        };

        (balancer, picker_rx)
    }

    /// 在后台任务中运行
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// 接入解析目标并处理事件，直到 `shutdown` 被取消
    pub async fn run(mut self, shutdown: CancellationToken) {
        if !self.target.attach(self.events_tx.clone()) {
            warn!(target = %self.target_name, "Resolver target already has a balancer attached");
            return;
        }
        debug!(target = %self.target_name, "Balancer attached");

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.events_rx.recv() => event,
            };

            let Some(event) = event else { break };
            match event {
                BalancerEvent::Membership(snapshot) => self.apply_membership(snapshot),
                BalancerEvent::Connectivity {
                    instance_id,
                    generation,
                    state,
                    connection,
                } => {
                    if !self.apply_connectivity(&instance_id, generation, state, connection) {
                        continue;
                    }
                }
            }

            self.rebuild();
        }

        for endpoint in self.endpoints.values() {
            endpoint.cancel.cancel();
        }
        self.endpoints.clear();
        self.pickers
            .send_replace(Arc::new(Picker::error(PickError::NoServerAvailable)));
        self.target.set_state(ConnectivityState::Shutdown);
        info!(target = %self.target_name, "Balancer stopped");
    }

    fn apply_membership(&mut self, snapshot: MembershipSnapshot) {
        let removed: Vec<String> = self
            .endpoints
            .keys()
            .filter(|id| !snapshot.contains(id))
            .cloned()
            .collect();
        for instance_id in removed {
            if let Some(endpoint) = self.endpoints.remove(&instance_id) {
                endpoint.cancel.cancel();
                debug!(target = %self.target_name, instance_id = %instance_id, "Instance removed");
            }
        }

        for record in snapshot {
            if let Some(endpoint) = self.endpoints.get_mut(&record.instance_id) {
                if endpoint.address == record.address {
                    endpoint.attributes = record.attributes;
                    continue;
                }
                endpoint.cancel.cancel();
                debug!(
                    target = %self.target_name,
                    instance_id = %record.instance_id,
                    address = %record.address,
                    "Instance address changed"
                );
            } else {
                debug!(
                    target = %self.target_name,
                    instance_id = %record.instance_id,
                    address = %record.address,
                    "Instance added"
                );
            }

            self.next_generation += 1;
            let endpoint = Endpoint {
                address: record.address,
                attributes: record.attributes,
                state: ConnectivityState::Idle,
                connection: None,
                generation: self.next_generation,
                cancel: CancellationToken::new(),
            };
            self.spawn_connect(&record.instance_id, &endpoint);
            self.endpoints.insert(record.instance_id, endpoint);
        }
    }

    /// 返回状态是否被采纳
    fn apply_connectivity(
        &mut self,
        instance_id: &str,
        generation: u64,
        state: ConnectivityState,
        connection: Option<K::Connection>,
    ) -> bool {
        let Some(endpoint) = self.endpoints.get_mut(instance_id) else {
            return false;
        };
        if endpoint.generation != generation {
            return false;
        }

        debug!(
            target = %self.target_name,
            instance_id,
            address = %endpoint.address,
            from = %endpoint.state,
            to = %state,
            "Connectivity changed"
        );
        endpoint.state = state;
        endpoint.connection = if state.is_ready() { connection } else { None };
        true
    }

    fn rebuild(&mut self) {
        let children: Vec<ChildState<K::Connection>> = self
            .endpoints
            .values()
            .map(|endpoint| ChildState {
                state: endpoint.state,
                connection: endpoint.connection.clone(),
                attributes: endpoint.attributes.clone(),
            })
            .collect();

        let picker = self.builder.build(&children);
        self.pickers.send_replace(Arc::new(picker));

        let state = ConnectivityState::aggregate(self.endpoints.values().map(|e| e.state));
        self.target.set_state(state);
    }

    fn spawn_connect(&self, instance_id: &str, endpoint: &Endpoint<K::Connection>) {
        let task = ConnectTask {
            target_name: self.target_name.clone(),
            instance_id: instance_id.to_string(),
            address: endpoint.address.clone(),
            generation: endpoint.generation,
            connector: self.connector.clone(),
            connect_timeout: self.connect_timeout,
            backoff: self.backoff.clone(),
            events: self.events_tx.clone(),
        };
        tokio::spawn(task.run(endpoint.cancel.clone()));
    }
}

/// 单个实例的连接任务
struct ConnectTask<K: Connector> {
    target_name: String,
    instance_id: String,
    address: String,
    generation: u64,
    connector: Arc<K>,
    connect_timeout: Duration,
    backoff: ExponentialBackoffPolicy,
    events: mpsc::UnboundedSender<BalancerEvent<K::Connection>>,
}

impl<K: Connector> ConnectTask<K> {
    fn report(&self, state: ConnectivityState, connection: Option<K::Connection>) -> bool {
        self.events
            .send(BalancerEvent::Connectivity {
                instance_id: self.instance_id.clone(),
                generation: self.generation,
                state,
                connection,
            })
            .is_ok()
    }

    async fn run(self, cancel: CancellationToken) {
        let mut failures = 0usize;

        loop {
            if !self.report(ConnectivityState::Connecting, None) {
                return;
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.address)) => attempt,
            };
            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(PlatformError::timeout("connect", self.connect_timeout)),
            };

            match result {
                Ok(connection) => {
                    failures = 0;
                    if !self.report(ConnectivityState::Ready, Some(connection.clone())) {
                        return;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.connector.disconnected(&self.address, &connection) => {}
                    }
                    info!(
                        target = %self.target_name,
                        instance_id = %self.instance_id,
                        address = %self.address,
                        "Connection lost, reconnecting"
                    );
                    if !self.report(ConnectivityState::TransientFailure, None) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(
                        target = %self.target_name,
                        instance_id = %self.instance_id,
                        address = %self.address,
                        error = %e,
                        "Failed to connect"
                    );
                    if !self.report(ConnectivityState::TransientFailure, None) {
                        return;
                    }
                    if !self.backoff.should_retry(failures, &e) {
                        return;
                    }

                    let delay = self.backoff.backoff_duration(failures);
                    failures = failures.saturating_add(1);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
