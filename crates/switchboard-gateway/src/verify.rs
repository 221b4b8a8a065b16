use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::info;

use switchboard_agent::VerifyOnlyHandler;
use switchboard_channels::Router;
use switchboard_core::config::{DEFAULT_CALLBACK_BASE, DEFAULT_RELAY_URL};
use switchboard_core::types::WECOM;
use switchboard_relay::bridge::{BridgeConfig, RelayBridge, VERIFY_ONLY_REPLY};

use crate::cli::VerifyArgs;
use crate::shutdown::shutdown_signal;

/// `switchboard verify`: keep a verify-only relay session open until the
/// operator has saved the callback URL, a signal arrives, or time runs out.
pub async fn run(args: VerifyArgs) -> anyhow::Result<()> {
    let platform = args
        .platform
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_lowercase);
    let Some(platform) = platform else {
        bail!("--platform is required (currently supported: wecom)");
    };
    if platform != WECOM {
        bail!("only the 'wecom' platform is currently supported for verification");
    }

    let creds = args
        .wecom
        .clone()
        .with_env_fallback(|name| std::env::var(name).ok())
        .credentials();
    let missing = creds.missing_fields();
    if !missing.is_empty() {
        let flags: Vec<String> = missing
            .iter()
            .map(|f| format!("--wecom-{}", f.replace('_', "-")))
            .collect();
        bail!("WeCom credentials required: {}", flags.join(", "));
    }

    let server = args
        .server
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_RELAY_URL)
        .to_string();
    let user_id = format!("verify-{platform}-{}", chrono::Utc::now().timestamp());
    let corp_id = creds.corp_id.clone();

    let bridge = RelayBridge::new(BridgeConfig::verify_only(
        user_id.clone(),
        platform.clone(),
        server,
        Some(creds),
    ))
    .context("invalid WeCom credentials")?;

    let router = Router::new(Arc::new(VerifyOnlyHandler::new(VERIFY_ONLY_REPLY)));
    router.register(Arc::new(bridge))?;

    let shutdown = CancellationToken::new();
    router
        .start(shutdown.clone())
        .await
        .context("could not connect to the relay server")?;
    info!(%user_id, %platform, "verify session open");

    println!();
    println!("=== Callback URL Verification Mode ===");
    println!();
    println!("  Platform: {platform}");
    println!("  Corp ID:  {corp_id}");
    println!();
    println!("Your credentials have been sent to the cloud relay server.");
    println!();
    println!("Now go to your platform's admin console and configure the callback URL:");
    println!();
    println!("    {DEFAULT_CALLBACK_BASE}/{platform}");
    println!();
    println!("When you save the configuration, the platform sends a verification");
    println!("request that is answered automatically.");
    println!();
    println!("Press Ctrl+C to exit after verification succeeds.");
    println!();

    tokio::select! {
        _ = shutdown_signal() => {
            println!("\nShutting down...");
        }
        _ = tokio::time::sleep(Duration::from_secs(args.timeout)) => {
            println!("\nTimeout reached. If verification hasn't completed, run again.");
        }
    }

    router.stop().await;
    shutdown.cancel();

    println!();
    println!("Next step: use 'switchboard relay' to start processing messages:");
    println!();
    println!("  switchboard relay --user-id YOUR_ID --platform {platform} \\");
    println!("    --provider deepseek --api-key YOUR_API_KEY \\");
    println!("    --wecom-corp-id {corp_id} ...");
    Ok(())
}
