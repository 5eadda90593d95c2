//! `storefront watch`: keep the session alive and print its changes.

use std::time::Duration;

use anyhow::Result;
use storefront_client::AutoRefresh;
use tracing::info;

use super::app::App;

const REFRESH_TICK: Duration = Duration::from_secs(30);

pub async fn run(app: &App) -> Result<()> {
    let refresher = AutoRefresh::start(app.auth.clone(), REFRESH_TICK);

    let json = app.json;
    let _sub = app.ctx.synchronizer().on_session_change(move |change| {
        let who = change.identity.as_ref().map(|i| i.email.as_str()).unwrap_or("-");
        if json {
            println!(
                "{}",
                serde_json::json!({ "reason": format!("{:?}", change.reason), "user": change.identity })
            );
        } else {
            println!("{:?}\t{}", change.reason, who);
        }
    });

    let mut banners = app.ctx.relay().subscribe();
    let banner_task = tokio::spawn(async move {
        while banners.changed().await.is_ok() {
            let n = banners.borrow_and_update().clone();
            if let (true, Some(message)) = (n.visible, n.message) {
                eprintln!("[{:?}] {}", n.kind, message);
            }
        }
    });

    if !app.ctx.synchronizer().check_session().await {
        println!("No active session; waiting for changes.");
    }
    info!("watching session, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    banner_task.abort();
    refresher.stop();
    Ok(())
}
