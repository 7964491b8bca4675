// src/storage/tests/mod.rs

mod memory_tests;

// Contract checks shared by every backend
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::context::OpContext;
    use crate::error::Result;
    use crate::storage::StorageBackend;

    pub async fn test_untouched_key<S: StorageBackend + ?Sized>(storage: &S, key: &str) -> Result<()> {
        let ctx = OpContext::background();

        assert_eq!(storage.get(&ctx, key).await?, 0);
        assert!(!storage.is_blocked(&ctx, key).await?);

        // reads never create state
        assert_eq!(storage.get(&ctx, key).await?, 0);
        Ok(())
    }

    pub async fn test_increment_and_get<S: StorageBackend + ?Sized>(storage: &S, key: &str) -> Result<()> {
        let ctx = OpContext::background();
        let window = Duration::from_secs(10);

        assert_eq!(storage.increment(&ctx, key, window).await?, 1);
        assert_eq!(storage.increment(&ctx, key, window).await?, 2);
        assert_eq!(storage.increment(&ctx, key, window).await?, 3);
        assert_eq!(storage.get(&ctx, key).await?, 3);

        // the counter and its block flag are independent
        assert!(!storage.is_blocked(&ctx, key).await?);
        Ok(())
    }

    /// Later increments must not push the window out
    pub async fn test_fixed_window<S: StorageBackend + ?Sized>(
        storage: &S,
        key: &str,
        window: Duration,
    ) -> Result<()> {
        let ctx = OpContext::background();

        assert_eq!(storage.increment(&ctx, key, window).await?, 1);
        time::sleep(window / 2).await;
        assert_eq!(storage.increment(&ctx, key, window).await?, 2);
        time::sleep(window / 2 + window / 4).await;

        // First hit's window is over even though the second hit was recent
        assert_eq!(storage.get(&ctx, key).await?, 0);
        assert_eq!(storage.increment(&ctx, key, window).await?, 1);
        Ok(())
    }

    pub async fn test_block_lifecycle<S: StorageBackend + ?Sized>(
        storage: &S,
        key: &str,
        block: Duration,
    ) -> Result<()> {
        let ctx = OpContext::background();

        assert!(!storage.is_blocked(&ctx, key).await?);
        storage.set_block(&ctx, key, block).await?;
        assert!(storage.is_blocked(&ctx, key).await?);

        // blocking doesn't create a counter
        assert_eq!(storage.get(&ctx, key).await?, 0);

        time::sleep(block + block / 2).await;
        assert!(!storage.is_blocked(&ctx, key).await?);
        Ok(())
    }

    pub async fn test_set_block_overwrites<S: StorageBackend + ?Sized>(
        storage: &S,
        key: &str,
        short: Duration,
        long: Duration,
    ) -> Result<()> {
        let ctx = OpContext::background();

        storage.set_block(&ctx, key, short).await?;
        storage.set_block(&ctx, key, long).await?;
        time::sleep(short + short / 2).await;

        assert!(storage.is_blocked(&ctx, key).await?);
        Ok(())
    }
}
