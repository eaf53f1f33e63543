//! Subcommand handlers. Each one plays the part of a dashboard view.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use tracing::warn;

use leavedesk_core::api::OutboundRequest;
use leavedesk_core::utils::{format_remaining, format_timestamp};
use leavedesk_core::{AuthContext, Config, GuardView, LoginRequest};

use crate::Command;

/// Password source for non-interactive use
const ENV_PASSWORD: &str = "LEAVEDESK_PASSWORD";

pub async fn run(command: Command, ctx: &AuthContext, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username, no_remember } => login(ctx, config, username, !no_remember).await,
        Command::Logout => logout(ctx).await,
        Command::Whoami => whoami(ctx).await,
        Command::Status => status(ctx).await,
        Command::Request { method, path, data } => request(ctx, &method, &path, data.as_deref()).await,
    }
}

async fn login(
    ctx: &AuthContext,
    config: &mut Config,
    username: Option<String>,
    remember_session: bool,
) -> Result<()> {
    ctx.session().wait_hydrated().await;

    let username = match username.or_else(|| config.last_username.clone()) {
        Some(username) => username,
        None => prompt_username()?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password(format!("Password for {}: ", username))?,
    };

    let payload = LoginRequest {
        username: username.clone(),
        password,
    };
    let identity = ctx.sign_in(&payload, remember_session).await?.await?;

    let name = identity
        .as_ref()
        .map(|i| i.display_name.clone())
        .unwrap_or_else(|| username.clone());
    ctx.notifications()
        .success(format!("Welcome back, {}!", name), Some("Login Successful"));
    if identity.is_none() {
        println!("Signed in, but your profile could not be loaded.");
    }

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;
    let mut username = String::new();
    io::stdin()
        .read_line(&mut username)
        .context("Failed to read username")?;
    let username = username.trim().to_string();
    if username.is_empty() {
        bail!("Username required");
    }
    Ok(username)
}

async fn logout(ctx: &AuthContext) -> Result<()> {
    ctx.session().wait_hydrated().await;
    if ctx.logout() {
        ctx.notifications().info("Signed out", None);
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

async fn whoami(ctx: &AuthContext) -> Result<()> {
    let mut guard = ctx.route_guard();
    guard.mount().await;

    match guard.view() {
        GuardView::Content => {
            let Some(identity) = ctx.refresh_identity().await? else {
                bail!("Could not load your profile");
            };
            println!("{} ({})", identity.display_name, identity.id);
            if !identity.roles.is_empty() {
                let roles: Vec<&str> = identity.roles.iter().map(String::as_str).collect();
                println!("Roles: {}", roles.join(", "));
            }
            Ok(())
        }
        GuardView::Redirect(to) => bail!("Not signed in (redirected to {}). Run `leavedesk login`.", to),
        GuardView::Placeholder => bail!("Session is still loading"),
    }
}

async fn status(ctx: &AuthContext) -> Result<()> {
    ctx.session().wait_hydrated().await;
    let session = ctx.snapshot();

    if !session.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }

    match session.identity() {
        Some(identity) => println!("Signed in as {} ({})", identity.display_name, identity.id),
        None => println!("Signed in (profile not loaded)"),
    }
    if let Some(at) = session.login_timestamp() {
        println!("Since:    {}", format_timestamp(at));
    }
    match session.time_until_expiry() {
        Some(remaining) if session.is_expired() => {
            println!("Expires:  {} - you will be signed out on the next protected view", format_remaining(remaining));
        }
        Some(remaining) => println!("Expires:  in {}", format_remaining(remaining)),
        None => println!("Expires:  never (session not remembered)"),
    }
    Ok(())
}

async fn request(ctx: &AuthContext, method: &str, path: &str, data: Option<&str>) -> Result<()> {
    let mut request = match method.to_ascii_uppercase().as_str() {
        "GET" => OutboundRequest::get(path),
        "POST" => OutboundRequest::post(path),
        "PUT" => OutboundRequest::put(path),
        "DELETE" => OutboundRequest::delete(path),
        other => bail!("Unsupported method: {}", other),
    };
    if let Some(data) = data {
        let body: serde_json::Value = serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.json(&body)?;
    }

    ctx.session().wait_hydrated().await;
    let response = ctx.api().execute(request).await?;
    println!("{}", response.body);
    Ok(())
}
