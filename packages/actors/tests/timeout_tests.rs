mod common;

use std::error::Error;

use keylock::{JobOptions, Lock, LockError, LockOptions, Work};

use common::{Trail, ms, sleeper};

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_fails_the_waiter_and_frees_the_queue() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_name("wt").with_wait_timeout(ms(20))).await?;
    let trail = Trail::default();

    let holder = lock.acquire("b", sleeper(&trail, "holder", 100))?;
    // Takes "a" right away, then times out waiting for "b".
    let both = lock.acquire(["a", "b"], sleeper(&trail, "both", 10))?;
    let only_a = lock.acquire_with(
        "a",
        sleeper(&trail, "only-a", 10),
        JobOptions::new().without_wait_timeout(),
    )?;

    match both.await {
        Err(LockError::WaitTimeout { job, .. }) => {
            assert_eq!(job.id.0, 2);
            assert_eq!(job.to_string(), "Job #2 [a, b]");
        }
        other => panic!("expected a wait timeout, got {:?}", other),
    }

    // "a" is handed on as soon as the multi-key job gives up.
    assert_eq!(only_a.await?, "only-a");
    assert!(!trail.contains("holder end"));
    assert_eq!(holder.await?, "holder");
    assert!(!trail.contains("both start"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_message() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_name("msg")).await?;
    let trail = Trail::default();

    let holder = lock.acquire("k", sleeper(&trail, "holder", 50))?;
    let waiter = lock.acquire_with(
        "k",
        Work::value(|| ()),
        JobOptions::new().with_wait_timeout(ms(10)),
    )?;

    let err = waiter.await.err().ok_or("waiter should time out")?;
    // Measured on the same clock as the timer.
    assert_eq!(err.to_string(), "[msg] Job #2 [k] has timed out after 10ms in wait queue");
    assert_eq!(err.job_id().map(|id| id.0), Some(2));
    assert!(err.incoming_backtrace().is_some());
    holder.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_wait_timeout_only_fails_jobs_that_must_wait() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(LockOptions::new().with_wait_timeout(ms(0))).await?;
    let trail = Trail::default();

    // Free key: granted during admission, never timed out.
    let first = lock.acquire("z", sleeper(&trail, "first", 20))?;
    let second = lock.acquire("z", sleeper(&trail, "second", 20))?;

    assert!(matches!(second.await, Err(LockError::WaitTimeout { .. })));
    assert_eq!(first.await?, "first");
    assert!(!trail.contains("second start"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_releases_keys_without_interrupting() -> Result<(), Box<dyn Error>> {
    let trail = Trail::default();
    let lock = Lock::new(
        LockOptions::new()
            .with_name("et")
            .with_execution_timeout(ms(20))
            .with_log(trail.sink()),
    )
    .await?;

    let slow = lock.acquire("a", sleeper(&trail, "slow", 50))?;
    let next = lock.acquire("a", sleeper(&trail, "next", 5))?;

    match slow.await {
        Err(err @ LockError::ExecutionTimeout { .. }) => assert_eq!(
            err.to_string(),
            "[et] Job #1 [a] has timed out after 20ms of execution"
        ),
        other => panic!("expected an execution timeout, got {:?}", other),
    }

    // The next job runs while the timed out one is still going.
    assert_eq!(next.await?, "next");
    assert!(!trail.contains("slow end"));

    tokio::time::sleep(ms(50)).await;
    assert!(trail.contains("slow end"));
    // The late completion of the timed out job is reported and ignored.
    let late = trail
        .entries()
        .into_iter()
        .filter(|line| line.starts_with("[et] WARNING: Job #1 is trying to end, but it has already ended"))
        .count();
    assert_eq!(late, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_job_options_override_lock_defaults() -> Result<(), Box<dyn Error>> {
    let lock = Lock::new(
        LockOptions::new()
            .with_wait_timeout(ms(5))
            .with_execution_timeout(ms(5)),
    )
    .await?;
    let trail = Trail::default();

    let patient = JobOptions::new()
        .without_wait_timeout()
        .without_execution_timeout();
    let holder = lock.acquire_with("o", sleeper(&trail, "holder", 30), patient)?;
    let waiter = lock.acquire_with("o", sleeper(&trail, "waiter", 30), patient)?;

    assert_eq!(holder.await?, "holder");
    assert_eq!(waiter.await?, "waiter");

    // Falls back to the lock's 5ms execution timeout.
    let hurried = lock.acquire("o", sleeper(&trail, "hurried", 30))?;
    assert!(matches!(hurried.await, Err(LockError::ExecutionTimeout { .. })));
    Ok(())
}
