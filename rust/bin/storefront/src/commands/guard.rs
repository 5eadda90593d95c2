//! `storefront guard <admin|session>`: evaluate a route guard.

use anyhow::Result;
use storefront_session::{GuardOutcome, RouteGuard};

use super::app::App;

/// Returns whether the guard allowed entry.
pub async fn check(app: &App, which: &str) -> Result<bool> {
    let outcome = match which {
        "session" => app.ctx.session_guard().check().await,
        "admin" => app.ctx.admin_chain().check().await,
        other => anyhow::bail!("Unknown guard: {} (expected `session` or `admin`)", other),
    };

    match &outcome {
        GuardOutcome::Allow => println!("allow"),
        GuardOutcome::Redirect(to) => println!("redirect {}", to),
    }
    Ok(outcome.is_allowed())
}
