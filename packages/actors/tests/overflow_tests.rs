mod common;

use std::error::Error;

use keylock::{Lock, LockError, LockKey, LockOptions, OverflowStrategy, Work};

use common::{Trail, sleeper};

#[tokio::test(start_paused = true)]
async fn test_zero_queue_size_rejects_every_waiter() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_queue_size(0)).await?;
    let trail = Trail::default();

    let first = lock.acquire((), sleeper(&trail, "first", 20))?;
    let second = lock.acquire((), Work::value(|| "second".to_string()))?;

    let err = second.await.err().ok_or("second job should be kicked out")?;
    assert_eq!(
        err.to_string(),
        "Too many jobs (1) are waiting. Job #2 [default] was kicked out"
    );
    assert_eq!(first.await?, "first");
    assert!(lock.can_acquire(()).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_queue_size_bounds_waiters_per_key() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_name("bounded").with_queue_size(2)).await?;
    let trail = Trail::default();

    let holder = lock.acquire("q", sleeper(&trail, "holder", 20))?;
    let w1 = lock.acquire("q", sleeper(&trail, "w1", 1))?;
    let w2 = lock.acquire("q", sleeper(&trail, "w2", 1))?;
    let w3 = lock.acquire("q", sleeper(&trail, "w3", 1))?;
    let other = lock.acquire("r", sleeper(&trail, "other", 1))?;

    let stats = lock.stats().await?;
    let queue = stats.queue(&LockKey::named("q")).ok_or("missing queue")?;
    assert_eq!(queue.waiting, 2);
    assert!(queue.active.is_some());

    match w3.await {
        Err(err @ LockError::QueueOverflow { .. }) => assert_eq!(
            err.to_string(),
            "[bounded] Too many jobs (3) are waiting for key \"q\". Job #4 [q] was kicked out"
        ),
        other => panic!("expected an overflow, got {:?}", other),
    }

    let (holder, w1, w2, other) = tokio::join!(holder, w1, w2, other);
    assert_eq!(holder?, "holder");
    assert_eq!(w1?, "w1");
    assert_eq!(w2?, "w2");
    assert_eq!(other?, "other");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_evict_oldest_keeps_the_newest_waiters() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(
        LockOptions::new()
            .with_queue_size(1)
            .with_overflow_strategy(OverflowStrategy::EvictOldest),
    )
    .await?;
    let trail = Trail::default();

    let holder = lock.acquire("k", sleeper(&trail, "holder", 20))?;
    let oldest = lock.acquire("k", sleeper(&trail, "oldest", 1))?;
    let newest = lock.acquire("k", sleeper(&trail, "newest", 1))?;

    let err = oldest.await.err().ok_or("oldest waiter should be kicked out")?;
    assert_eq!(err.job_id().map(|id| id.0), Some(2));
    assert_eq!(holder.await?, "holder");
    assert_eq!(newest.await?, "newest");
    assert!(!trail.contains("oldest start"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_replace_newest_keeps_the_latest_arrival() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(
        LockOptions::new()
            .with_queue_size(2)
            .with_overflow_strategy(OverflowStrategy::ReplaceNewest),
    )
    .await?;
    let trail = Trail::default();

    let holder = lock.acquire("k", sleeper(&trail, "holder", 20))?;
    let first = lock.acquire("k", sleeper(&trail, "first", 1))?;
    let replaced = lock.acquire("k", sleeper(&trail, "replaced", 1))?;
    let latest = lock.acquire("k", sleeper(&trail, "latest", 1))?;

    assert!(matches!(replaced.await, Err(LockError::QueueOverflow { .. })));
    let (holder, first, latest) = tokio::join!(holder, first, latest);
    holder?;
    first?;
    latest?;

    let pos = |entry: &str| trail.position(entry).ok_or(format!("missing {entry}"));
    assert!(pos("first end")? < pos("latest start")?);
    assert!(!trail.contains("replaced start"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_overflow_evicts_multi_key_jobs_from_every_queue() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_queue_size(0)).await?;
    let trail = Trail::default();

    let holder = lock.acquire("b", sleeper(&trail, "holder", 20))?;
    // Gets "a" but would have to wait for "b".
    let both = lock.acquire(["a", "b"], sleeper(&trail, "both", 1))?;

    assert!(matches!(both.await, Err(LockError::QueueOverflow { .. })));
    assert!(lock.can_acquire("a").await?);
    holder.await?;
    Ok(())
}
