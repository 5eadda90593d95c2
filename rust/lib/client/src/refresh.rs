//! Background token refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::SupabaseAuth;

/// Ticks this many times within the refresh margin.
const TICKS_PER_MARGIN: u32 = 3;

/// Periodically refreshes the session before it expires.
///
/// On every tick the session is refreshed if it expires within three
/// ticks, so one failed attempt still leaves room for two more. Dropping
/// the handle stops the task.
pub struct AutoRefresh {
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn start(auth: Arc<SupabaseAuth>, every: Duration) -> Self {
        let margin_secs = (every * TICKS_PER_MARGIN).as_secs() as i64;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match auth.session_within(margin_secs).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("no session to refresh"),
                    Err(e) => warn!(error = %e, "background refresh failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {}
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
