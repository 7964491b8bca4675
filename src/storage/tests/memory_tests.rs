#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use tokio::time;
    use tokio_test::assert_ok;

    use crate::config::InMemoryConfig;
    use crate::context::OpContext;
    use crate::error::{RateLimiterError, StorageError};
    use crate::storage::{MemoryStorage, StorageBackend};

    use super::super::common;

    // Helper function to create a MemoryStorage instance for testing
    fn create_test_memory(cleanup_interval: Duration) -> MemoryStorage {
        MemoryStorage::new(InMemoryConfig {
            use_background_task: true,
            cleanup_interval,
        })
    }

    fn create_quiet_memory() -> MemoryStorage {
        MemoryStorage::new(InMemoryConfig {
            use_background_task: false,
            cleanup_interval: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_memory_contract() {
        let memory = create_test_memory(Duration::from_secs(60));

        assert_ok!(common::test_untouched_key(&memory, "never_seen").await);
        assert_ok!(common::test_increment_and_get(&memory, "counter").await);
        assert_ok!(
            common::test_fixed_window(&memory, "fixed", Duration::from_millis(200)).await
        );
        assert_ok!(
            common::test_block_lifecycle(&memory, "blocked", Duration::from_millis(100)).await
        );
        assert_ok!(
            common::test_set_block_overwrites(
                &memory,
                "overwrite",
                Duration::from_millis(50),
                Duration::from_secs(10)
            )
            .await
        );

        memory.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_flag_lives_beside_counter() {
        let memory = create_quiet_memory();
        let ctx = OpContext::background();

        memory
            .increment(&ctx, "ip:1.2.3.4", Duration::from_secs(10))
            .await
            .unwrap();
        memory
            .set_block(&ctx, "ip:1.2.3.4", Duration::from_secs(10))
            .await
            .unwrap();

        // counter plus "ip:1.2.3.4:blocked"
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.get(&ctx, "ip:1.2.3.4").await.unwrap(), 1);
        assert_eq!(memory.get(&ctx, "ip:1.2.3.4:blocked").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_lose_nothing() {
        const TASKS: usize = 64;
        const PER_TASK: usize = 25;

        let memory = Arc::new(create_quiet_memory());
        let barrier = Arc::new(Barrier::new(TASKS));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let memory = Arc::clone(&memory);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    let ctx = OpContext::background();
                    barrier.wait().await;
                    for _ in 0..PER_TASK {
                        memory
                            .increment(&ctx, "hot_key", Duration::from_secs(60))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap();
        }

        let total = memory
            .get(&OpContext::background(), "hot_key")
            .await
            .unwrap();
        assert_eq!(total, (TASKS * PER_TASK) as i64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_hits_share_one_window() {
        const TASKS: usize = 100;

        let memory = Arc::new(create_quiet_memory());
        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let memory = Arc::clone(&memory);
                tokio::spawn(async move {
                    memory
                        .increment(&OpContext::background(), "fresh", Duration::from_secs(60))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut counts: Vec<i64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        counts.sort_unstable();

        // each caller saw a distinct value: exactly one of them created the entry
        let expected: Vec<i64> = (1..=TASKS as i64).collect();
        assert_eq!(counts, expected);
    }

    #[tokio::test]
    async fn test_janitor_evicts_expired_entries() {
        let memory = create_test_memory(Duration::from_millis(50));
        let ctx = OpContext::background();

        for i in 0..10 {
            memory
                .increment(&ctx, &format!("short_{}", i), Duration::from_millis(20))
                .await
                .unwrap();
        }
        memory
            .increment(&ctx, "long", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(memory.len(), 11);

        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(memory.len(), 1, "only the unexpired entry should remain");
        assert_eq!(memory.get(&ctx, "long").await.unwrap(), 1);

        memory.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_still_sweeps() {
        let memory = create_test_memory(Duration::ZERO);
        let ctx = OpContext::background();

        memory
            .increment(&ctx, "short", Duration::from_millis(10))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert!(memory.is_empty(), "janitor should keep sweeping");
        assert_ok!(memory.close().await);
    }

    #[tokio::test]
    async fn test_close_stops_janitor() {
        let memory = create_test_memory(Duration::from_millis(30));
        let ctx = OpContext::background();

        memory.close().await.unwrap();

        memory
            .increment(&ctx, "after_close", Duration::from_millis(10))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(200)).await;

        // expired but never swept
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get(&ctx, "after_close").await.unwrap(), 0);

        // a second close is harmless
        assert_ok!(memory.close().await);
    }

    #[tokio::test]
    async fn test_manual_eviction() {
        let memory = create_quiet_memory();
        let ctx = OpContext::background();

        memory
            .increment(&ctx, "a", Duration::from_millis(10))
            .await
            .unwrap();
        memory
            .set_block(&ctx, "a", Duration::from_millis(10))
            .await
            .unwrap();
        memory
            .increment(&ctx, "b", Duration::from_secs(60))
            .await
            .unwrap();

        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(memory.evict_expired().unwrap(), 2);
        assert_eq!(memory.len(), 1);
        assert!(!memory.is_empty());
    }

    #[tokio::test]
    async fn test_expired_counter_restarts_at_one() {
        let memory = create_quiet_memory();
        let ctx = OpContext::background();
        let window = Duration::from_millis(50);

        for expected in 1..=3 {
            assert_eq!(memory.increment(&ctx, "k", window).await.unwrap(), expected);
        }
        time::sleep(Duration::from_millis(80)).await;

        assert_eq!(memory.get(&ctx, "k").await.unwrap(), 0);
        assert_eq!(memory.increment(&ctx, "k", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_mutate() {
        let memory = create_quiet_memory();
        let ctx = OpContext::background();
        ctx.cancel();

        let result = memory.increment(&ctx, "k", Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(RateLimiterError::Storage(StorageError::Cancelled(_)))
        ));

        let result = memory.set_block(&ctx, "k", Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(RateLimiterError::Storage(StorageError::Cancelled(_)))
        ));

        assert!(memory.is_empty());
    }
}
