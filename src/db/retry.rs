use std::time::{Duration, Instant};

use rand::Rng;

const SLOW_OP_THRESHOLD: Duration = Duration::from_secs(1);

/// Runs a storage operation, retrying on SQLite busy/locked contention with a
/// randomized backoff. Non-transient errors fail immediately; exhausting the
/// attempts surfaces the last error unchanged.
pub async fn with_retry<T, F>(
    label: &str,
    max_attempts: u32,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        let result = op();
        let elapsed = started.elapsed();

        if elapsed > SLOW_OP_THRESHOLD {
            tracing::warn!(
                op = label,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow storage operation"
            );
        }

        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_transient(&err) => {
                let delay_ms = rand::thread_rng().gen_range(500..=1500);
                tracing::warn!(
                    op = label,
                    attempt,
                    delay_ms,
                    "transient storage contention, retrying: {err}"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(inner, _)) => matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
