use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use warden_helper::{HelperPool, HelperPoolConfig, PoolError, PoolStats};
use warden_test_support::fixtures::{
    CHANNEL_ECHO_HELPER, ECHO_HELPER, helper_program, sh_available, write_helper_script,
};

const SLOW_HELPER: &str = r#"while read -r line; do sleep 5; echo "OK $line"; done"#;
const CRASHING_HELPER: &str = "read -r line; exit 3";
const ONE_SHOT_HELPER: &str = r#"read -r line; echo "OK $line""#;
const LATIN1_HELPER: &str = r"while read -r line; do printf 'ERR mot de passe erron\351\n'; done";

fn pool_config(dir: &Path, body: &str) -> anyhow::Result<HelperPoolConfig> {
    let script = write_helper_script(dir, "helper.sh", body)?;
    Ok(HelperPoolConfig::new("test", helper_program(&script)))
}

async fn wait_for_stats(pool: &HelperPool, ready: impl Fn(&PoolStats) -> bool) -> anyhow::Result<()> {
    for _ in 0..500 {
        if ready(&pool.stats()) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("pool never reached expected state: {:?}", pool.stats())
}

#[tokio::test]
async fn echo_helper_answers_in_order() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let pool = HelperPool::start(pool_config(dir.path(), ECHO_HELPER)?)?;

    let first = pool.submit("alice secret\n")?;
    let second = pool.submit("bob hunter2")?;
    assert_eq!(first.wait().await?, "OK alice secret");
    assert_eq!(second.wait().await?, "OK bob hunter2");

    let stats = pool.stats();
    assert_eq!(stats.workers, 1);
    assert_eq!(stats.running_helpers, 1);
    assert_eq!(stats.requests_total, 2);
    assert_eq!(stats.replies_total, 2);
    assert_eq!(stats.busy, 0);

    pool.shutdown().await;
    assert_eq!(pool.stats().running_helpers, 0);
    Ok(())
}

#[tokio::test]
async fn channel_ids_route_concurrent_replies() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mut config = pool_config(dir.path(), CHANNEL_ECHO_HELPER)?;
    config.concurrency = 3;
    config.queue_limit = 3;
    let pool = HelperPool::start(config)?;

    let pending = ["a 1", "b 2", "c 3"]
        .into_iter()
        .map(|line| pool.submit(line))
        .collect::<Result<Vec<_>, _>>()?;
    let mut replies = Vec::new();
    for reply in pending {
        replies.push(reply.wait().await?);
    }
    assert_eq!(replies, ["OK a 1", "OK b 2", "OK c 3"]);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn full_queue_rejects_and_shutdown_resolves_waiters() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mut config = pool_config(dir.path(), SLOW_HELPER)?;
    config.queue_limit = 1;
    let pool = HelperPool::start(config)?;

    let in_flight = pool.submit("first")?;
    wait_for_stats(&pool, |stats| stats.busy == 1).await?;
    let queued = pool.submit("second")?;
    assert_eq!(pool.stats().queued, 1);

    match pool.submit("third") {
        Err(PoolError::Overloaded { queue_limit }) => assert_eq!(queue_limit, 1),
        other => bail!("expected overload, got {other:?}"),
    }

    pool.shutdown().await;
    assert_eq!(in_flight.wait().await, Err(PoolError::ShutDown));
    assert_eq!(queued.wait().await, Err(PoolError::ShutDown));
    assert!(matches!(pool.submit("late"), Err(PoolError::ShutDown)));
    assert!(pool.is_shut_down());
    Ok(())
}

#[tokio::test]
async fn non_utf8_reply_is_delivered_lossily() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let pool = HelperPool::start(pool_config(dir.path(), LATIN1_HELPER)?)?;

    let expected = "ERR mot de passe erron\u{FFFD}";
    assert_eq!(pool.submit("alice pw\n")?.wait().await?, expected);
    assert_eq!(pool.submit("alice pw")?.wait().await?, expected);

    let stats = pool.stats();
    assert_eq!(stats.replies_total, 2);
    assert_eq!(stats.failures_total, 0);
    assert_eq!(stats.restarts_total, 0);
    assert_eq!(stats.running_helpers, 1);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn crashed_helper_fails_request() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let pool = HelperPool::start(pool_config(dir.path(), CRASHING_HELPER)?)?;

    let reply = pool.submit("alice secret")?.wait().await;
    assert_eq!(reply, Err(PoolError::HelperExited { worker: 0 }));
    wait_for_stats(&pool, |stats| stats.running_helpers == 0).await?;
    assert_eq!(pool.stats().failures_total, 1);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn warm_helper_is_respawned_after_exit() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mut config = pool_config(dir.path(), ONE_SHOT_HELPER)?;
    config.startup = 1;
    config.idle = 1;
    let pool = HelperPool::start(config)?;

    assert_eq!(pool.submit("one")?.wait().await?, "OK one");
    wait_for_stats(&pool, |stats| stats.restarts_total == 1 && stats.running_helpers == 1)
        .await?;
    assert_eq!(pool.submit("two")?.wait().await?, "OK two");

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_helper_times_out() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mut config = pool_config(dir.path(), SLOW_HELPER)?;
    let timeout = Duration::from_millis(200);
    config.timeout = Some(timeout);
    let pool = HelperPool::start(config)?;

    let reply = pool.submit("alice secret")?.wait().await;
    assert_eq!(reply, Err(PoolError::Timeout { timeout }));
    let stats = pool.stats();
    assert_eq!(stats.failures_total, 1);
    assert_eq!(stats.running_helpers, 0);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_executable_reports_spawn_failure() -> anyhow::Result<()> {
    let config = HelperPoolConfig::new("test", vec!["/nonexistent/warden-helper".to_string()]);
    let pool = HelperPool::start(config)?;

    let reply = pool.submit("alice secret")?.wait().await;
    let Err(PoolError::Spawn { program, .. }) = reply else {
        bail!("expected spawn failure, got {reply:?}");
    };
    assert_eq!(program, "/nonexistent/warden-helper");

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn requests_are_validated_before_admission() -> anyhow::Result<()> {
    let unconfigured = HelperPool::start(HelperPoolConfig::new("test", Vec::new()));
    assert!(matches!(unconfigured, Err(PoolError::NotConfigured)));

    let pool = HelperPool::start(HelperPoolConfig::new("test", vec!["/bin/true".to_string()]))
        .context("pool with a program starts")?;
    assert_eq!(
        pool.submit("alice\nsecret").map(|_| ()),
        Err(PoolError::InvalidRequest)
    );
    assert_eq!(pool.submit("a\r").map(|_| ()), Err(PoolError::InvalidRequest));
    assert_eq!(pool.stats().requests_total, 0);

    pool.shutdown().await;
    Ok(())
}
