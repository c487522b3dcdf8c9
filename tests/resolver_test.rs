//! 成员解析器测试（进程内存储）

mod common;

use common::StallingStore;
use flare_rpc_platform::discovery::{MembershipStream, Resolver};
use flare_rpc_platform::store::{MemoryStore, WatchEvent};
use flare_rpc_platform::{ErrorCode, PlatformError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "/rpc/echo/";

fn resolver(store: &MemoryStore) -> Resolver {
    Resolver::new(Arc::new(store.clone())).with_request_timeout(Duration::from_secs(1))
}

async fn next(stream: &mut MembershipStream) -> flare_rpc_platform::MembershipSnapshot {
    timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for snapshot")
        .expect("stream ended")
        .expect("watch failed")
}

/// 测试：首个快照之后，每次变化产出新快照
#[tokio::test]
async fn test_snapshot_then_watch() {
    let store = MemoryStore::new();
    store.put("/rpc/echo/a", "10.0.0.1:80");
    store.put("/rpc/echo/a/balancerWeight", "4");
    store.put("/rpc/other/z", "10.0.0.9:80");

    let mut stream = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");

    let initial = next(&mut stream).await;
    assert_eq!(initial.len(), 1);
    assert_eq!(initial.get("a").map(|r| r.attributes.weight), Some(4));

    store.put("/rpc/echo/b", "10.0.0.2:80");
    let snapshot = next(&mut stream).await;
    assert!(snapshot.contains("a") && snapshot.contains("b"));

    store.delete("/rpc/echo/a");
    let snapshot = next(&mut stream).await;
    assert!(!snapshot.contains("a"));
    assert!(snapshot.contains("b"));
}

/// 测试：同一 revision 内的事件一次性生效
#[tokio::test]
async fn test_batch_is_applied_atomically() {
    let store = MemoryStore::new();
    let mut stream = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");
    assert!(next(&mut stream).await.is_empty());

    store.apply(vec![
        WatchEvent::put("/rpc/echo/c", "10.0.0.3:80"),
        WatchEvent::put("/rpc/echo/c/balancerWeight", "9"),
        WatchEvent::put("/rpc/echo/c/balancerPriority", "2"),
    ]);

    let snapshot = next(&mut stream).await;
    let record = snapshot.get("c").expect("c missing");
    assert_eq!(record.attributes.weight, 9);
    assert_eq!(record.attributes.priority, 2);
}

/// 测试：分组结果未变化时不重复产出
#[tokio::test(start_paused = true)]
async fn test_unchanged_membership_is_not_reemitted() {
    let store = MemoryStore::new();
    store.put("/rpc/echo/a", "10.0.0.1:80");

    let mut stream = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");
    next(&mut stream).await;

    // 相同值的覆盖写和半发布实例的属性键都不改变快照
    store.put("/rpc/echo/a", "10.0.0.1:80");
    store.put("/rpc/echo/late/balancerWeight", "3");
    assert!(timeout(Duration::from_secs(1), stream.next()).await.is_err());

    store.put("/rpc/echo/late", "10.0.0.7:80");
    let snapshot = next(&mut stream).await;
    assert_eq!(snapshot.get("late").map(|r| r.attributes.weight), Some(3));
}

/// 测试：不 watch 时流在首个快照后结束
#[tokio::test]
async fn test_lookup_without_watch() {
    let store = MemoryStore::new();
    store.put("/rpc/echo/a", "10.0.0.1:80");

    let mut stream = resolver(&store)
        .resolve(SERVICE, false, CancellationToken::new())
        .await
        .expect("resolve failed");
    assert_eq!(next(&mut stream).await.len(), 1);

    store.put("/rpc/echo/b", "10.0.0.2:80");
    assert!(stream.next().await.is_none());
}

/// 测试：watch 正常关闭时流直接结束
#[tokio::test]
async fn test_graceful_close_ends_stream() {
    let store = MemoryStore::new();
    let mut stream = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");
    next(&mut stream).await;

    store.put("/rpc/echo/a", "10.0.0.1:80");
    next(&mut stream).await;

    store.close_watches();
    let end = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for stream end");
    assert!(end.is_none());
}

/// 测试：watch 被取消时先产出错误再结束
#[tokio::test]
async fn test_watch_failure_is_reported() {
    let store = MemoryStore::new();
    let mut stream = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");
    next(&mut stream).await;

    store.put("/rpc/echo/a", "10.0.0.1:80");
    next(&mut stream).await;

    store.fail_watches("required revision has been compacted");
    let item = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for error")
        .expect("stream ended without error");
    match item {
        Err(PlatformError::WatchCanceled(reason)) => assert!(reason.contains("compacted")),
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

/// 测试：首次读取失败由 resolve 直接返回
#[tokio::test]
async fn test_initial_read_failure() {
    let store = MemoryStore::new();
    store.fail_next_requests(1);

    let result = resolver(&store)
        .resolve(SERVICE, true, CancellationToken::new())
        .await;
    let err = result.err().expect("resolve should fail");
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    assert!(err.is_retryable());
}

/// 测试：取消令牌结束 watch
#[tokio::test]
async fn test_shutdown_ends_stream() {
    let store = MemoryStore::new();
    let shutdown = CancellationToken::new();
    let mut stream = resolver(&store)
        .resolve(SERVICE, true, shutdown.clone())
        .await
        .expect("resolve failed");
    next(&mut stream).await;

    shutdown.cancel();
    let end = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for stream end");
    assert!(end.is_none());
}

/// 测试：打开 watch 超时时先产出超时错误再结束
#[tokio::test(start_paused = true)]
async fn test_watch_open_timeout_is_reported() {
    let memory = MemoryStore::new();
    memory.put("/rpc/echo/a", "10.0.0.1:80");
    let store = StallingStore::new(memory);
    store.hang_watches();

    let mut stream = Resolver::new(Arc::new(store))
        .with_request_timeout(Duration::from_secs(1))
        .resolve(SERVICE, true, CancellationToken::new())
        .await
        .expect("resolve failed");
    assert!(next(&mut stream).await.contains("a"));

    let item = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for error")
        .expect("stream ended without error");
    let err = item.err().expect("watch should time out");
    assert!(matches!(err, PlatformError::Timeout { operation: "watch", .. }));
    assert_eq!(err.code(), ErrorCode::StoreTimeout);
    assert!(stream.next().await.is_none());
}
