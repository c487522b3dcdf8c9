//! 平台入口、配置与端到端测试

mod common;

use common::FakeConnector;
use flare_rpc_platform::store::MemoryStore;
use flare_rpc_platform::{
    Attributes, ConnectivityState, ErrorCode, Platform, PlatformConfig, PlatformError, normalize_prefix,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// 测试：前缀规范化
#[test]
fn test_normalize_prefix() {
    let cases = [
        ("", ""),
        ("/", ""),
        ("rpcplatform", "/rpcplatform"),
        ("/rpcplatform", "/rpcplatform"),
        ("rpcplatform/", "/rpcplatform"),
        ("/a/b/", "/a/b"),
        ("a/b", "/a/b"),
    ];
    for (input, expected) in cases {
        assert_eq!(normalize_prefix(input).expect("valid prefix"), expected, "input {input:?}");
    }

    for invalid in ["//", "a//b", "/a//", "//a"] {
        let err = normalize_prefix(invalid).err().expect("prefix should be rejected");
        assert!(matches!(err, PlatformError::InvalidPrefix(_)), "input {invalid:?}");
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }
}

/// 测试：服务名校验与键布局
#[tokio::test]
async fn test_names_and_paths() {
    let platform = Platform::new("rpc/", Arc::new(MemoryStore::new())).expect("valid prefix");
    assert_eq!(platform.prefix(), "/rpc");
    assert_eq!(platform.service_path("echo"), "/rpc/echo/");

    for bad in ["", "a/b", "/"] {
        assert!(matches!(
            platform.registrar(bad, "h:1", Attributes::new()),
            Err(PlatformError::InvalidServerName(_))
        ));
        assert!(matches!(
            platform.lookup(bad, false, CancellationToken::new()).await,
            Err(PlatformError::InvalidTargetName(_))
        ));
        assert!(matches!(
            platform.balanced_channel(bad, FakeConnector::default()).await,
            Err(PlatformError::InvalidTargetName(_))
        ));
    }

    let registrar = platform
        .registrar("echo", "h:1", Attributes::new())
        .expect("valid name")
        .with_instance_id("x");
    assert_eq!(registrar.instance_key(), "/rpc/echo/x");

    let empty = Platform::new("", Arc::new(MemoryStore::new())).expect("valid prefix");
    assert_eq!(empty.service_path("echo"), "/echo/");
}

/// 测试：配置默认值
#[test]
fn test_config_defaults() {
    let config = PlatformConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config.etcd.endpoints, vec!["http://127.0.0.1:2379".to_string()]);
    assert_eq!(config.etcd.prefix, "rpcplatform");
    assert_eq!(config.registrar.lease_ttl, 4);
    assert_eq!(config.registrar.request_timeout(), Duration::from_secs(4));
    assert_eq!(config.registrar.retry_delay(), Duration::from_secs(1));
    assert!(!config.registrar.revoke_on_shutdown);
    assert_eq!(config.client.max_active_servers, 0);
    assert_eq!(config.client.lookup_timeout(), Duration::from_secs(4));
    assert_eq!(config.client.reconnect_base_delay(), Duration::from_millis(100));
    assert_eq!(config.client.reconnect_max_delay(), Duration::from_secs(5));
    assert_eq!(config.client.health_check_interval(), Duration::from_secs(1));
}

/// 测试：TOML 覆盖与校验
#[test]
fn test_config_from_toml() {
    let config = PlatformConfig::from_toml_str(
        r#"
        [etcd]
        endpoints = ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
        prefix = "prod"

        [registrar]
        lease_ttl = 10
        revoke_on_shutdown = true

        [client]
        max_active_servers = 3
        connect_timeout = 1
        "#,
    )
    .expect("valid config");

    assert_eq!(config.etcd.endpoints.len(), 2);
    assert_eq!(config.etcd.prefix, "prod");
    assert_eq!(config.registrar.lease_ttl, 10);
    assert_eq!(config.registrar.retry_delay_ms, 1000);
    assert!(config.registrar.revoke_on_shutdown);
    assert_eq!(config.client.max_active_servers, 3);
    assert_eq!(config.client.connect_timeout(), Duration::from_secs(1));

    let err = PlatformConfig::from_toml_str("[registrar]\nlease_ttl = 0").err().expect("zero ttl");
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    let err = PlatformConfig::from_toml_str("[etcd]\nendpoints = []").err().expect("no endpoints");
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    let err = PlatformConfig::from_toml_str("[client]\nmax_active_servers = \"many\"")
        .err()
        .expect("bad type");
    assert!(matches!(err, PlatformError::Config(_)));
}

/// 测试：环境变量覆盖
#[test]
fn test_config_env_overrides() {
    // 只有这个测试读写这些环境变量
    unsafe {
        std::env::set_var("ETCD_ENDPOINTS", "http://a:2379, http://b:2379,");
        std::env::set_var("ETCD_PREFIX", "staging");
        std::env::set_var("ETCD_TTL_SECONDS", "7");
    }

    let config = PlatformConfig::default().apply_env().expect("valid environment");
    assert_eq!(
        config.etcd.endpoints,
        vec!["http://a:2379".to_string(), "http://b:2379".to_string()]
    );
    assert_eq!(config.etcd.prefix, "staging");
    assert_eq!(config.registrar.lease_ttl, 7);

    unsafe {
        std::env::set_var("ETCD_TTL_SECONDS", "soon");
    }
    let err = PlatformConfig::default().apply_env().err().expect("bad ttl");
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    unsafe {
        std::env::remove_var("ETCD_ENDPOINTS");
        std::env::remove_var("ETCD_PREFIX");
        std::env::remove_var("ETCD_TTL_SECONDS");
    }
}

/// 测试：注册、发现与加权负载均衡端到端
#[tokio::test(start_paused = true)]
async fn test_end_to_end_with_memory_store() {
    let store = MemoryStore::new();
    let platform = Platform::new("rpc", Arc::new(store.clone())).expect("valid prefix");

    let one_token = CancellationToken::new();
    let two_token = CancellationToken::new();
    platform
        .registrar("echo", "10.0.0.1:80", Attributes::new().with_weight(2))
        .expect("valid name")
        .with_instance_id("one")
        .spawn(one_token.clone());
    platform
        .registrar("echo", "10.0.0.2:80", Attributes::new())
        .expect("valid name")
        .with_instance_id("two")
        .spawn(two_token.clone());

    sleep(Duration::from_millis(100)).await;
    assert!(store.get("/rpc/echo/one").is_some());
    assert!(store.get("/rpc/echo/two").is_some());

    let channel = platform
        .balanced_channel("echo", FakeConnector::default())
        .await
        .expect("failed to create channel");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(channel.state(), ConnectivityState::Ready);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..30 {
        let response = channel
            .clone()
            .oneshot("hi".to_string())
            .await
            .expect("call failed");
        let address = response.split(' ').next().unwrap_or_default().to_string();
        *counts.entry(address).or_default() += 1;
    }
    assert_eq!(counts.get("10.0.0.1:80"), Some(&20));
    assert_eq!(counts.get("10.0.0.2:80"), Some(&10));

    // 停止第二个实例，租约过期后流量全部转到第一个实例
    two_token.cancel();
    sleep(Duration::from_secs(6)).await;
    for _ in 0..5 {
        let picked = channel.pick().await.expect("pick failed");
        assert_eq!(picked.address, "10.0.0.1:80");
    }

    one_token.cancel();
    drop(channel);
}

/// 测试：通过平台查询成员
#[tokio::test]
async fn test_lookup_through_platform() {
    let store = MemoryStore::new();
    store.put("/rpc/echo/a", "10.0.0.1:80");
    store.put("/rpc/echo/a/balancerPriority", "7");
    let platform = Platform::new("/rpc/", Arc::new(store)).expect("valid prefix");

    let mut stream = platform
        .lookup("echo", false, CancellationToken::new())
        .await
        .expect("lookup failed");
    let snapshot = stream.next_snapshot().await.expect("stream ended").expect("lookup failed");
    assert_eq!(snapshot.get("a").map(|r| r.attributes.priority), Some(7));
    assert!(stream.next_snapshot().await.is_none());
}
