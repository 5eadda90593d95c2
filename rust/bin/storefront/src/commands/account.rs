//! Account commands: register, login, logout, whoami, status, profile.

use anyhow::Result;
use serde_json::json;

use super::app::App;

pub async fn register(app: &App, email: &str, password: &str, name: Option<&str>) -> Result<()> {
    let reg = app
        .ctx
        .synchronizer()
        .register(email, password, name)
        .await
        .map_err(|e| app.fail(e))?;

    match reg.session {
        Some(_) => println!("Registered and logged in as {}.", reg.identity.email),
        None => println!("Registered {}. Confirm your e-mail, then log in.", reg.identity.email),
    }
    app.print_identity(&reg.identity)
}

pub async fn login(app: &App, email: &str, password: &str) -> Result<()> {
    let session = app
        .ctx
        .synchronizer()
        .login(email, password)
        .await
        .map_err(|e| app.fail(e))?;
    println!("Logged in as {}.", session.identity.name);
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    let was_active = app.ctx.store().is_authenticated();
    app.ctx.synchronizer().logout().await.map_err(|e| app.fail(e))?;
    if was_active {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

/// Identity from local state; `--refresh` asks the backend first.
pub async fn whoami(app: &App, refresh: bool) -> Result<()> {
    let identity = if refresh {
        app.ctx
            .synchronizer()
            .get_current_identity()
            .await
            .map_err(|e| app.fail(e))?
    } else {
        app.ctx.store().read()
    };

    match identity {
        Some(identity) => app.print_identity(&identity),
        None => {
            println!("Not logged in.");
            Ok(())
        }
    }
}

pub async fn status(app: &App) -> Result<()> {
    let live = app.ctx.synchronizer().check_session().await;
    let identity = app.ctx.store().read();

    if app.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "session": live,
                "user": identity,
            }))?
        );
        return Ok(());
    }

    match (live, identity) {
        (true, Some(identity)) => println!("Session active: {} ({})", identity.email, identity.role),
        (true, None) => println!("Session active."),
        (false, _) => {
            let banner = app.ctx.relay().current();
            match banner.message {
                Some(message) if banner.visible => println!("{}", message),
                _ => println!("No active session."),
            }
        }
    }
    Ok(())
}

pub async fn update_profile(app: &App, name: &str, avatar: Option<&str>) -> Result<()> {
    let identity = app
        .ctx
        .synchronizer()
        .update_profile(name, avatar)
        .await
        .map_err(|e| app.fail(e))?;
    println!("{}", app.messages().profile_updated());
    app.print_identity(&identity)
}
