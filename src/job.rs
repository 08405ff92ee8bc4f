// Job helpers - scheduling shared by the periodic background tasks

use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

/// `base` plus a uniformly random extra delay of at most `max_jitter`
pub fn jittered(base: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=max_jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `false` when the task should stop.
pub async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let sender_gone = tokio::select! {
        _ = tokio::time::sleep(delay) => return true,
        changed = shutdown.changed() => changed.is_err(),
    };
    !sender_gone && !*shutdown.borrow()
}
