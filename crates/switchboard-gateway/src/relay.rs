use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchboard_agent::{build_provider, AgentDispatcher, VerifyOnlyHandler};
use switchboard_channels::{MessageHandler, Router};
use switchboard_core::config::SwitchboardConfig;
use switchboard_relay::bridge::{BridgeConfig, RelayBridge, VERIFY_ONLY_REPLY};
use switchboard_sessions::SessionStore;

use crate::cli::RelayArgs;
use crate::shutdown::shutdown_signal;

/// `switchboard relay`: serve the relayed platform until a signal arrives.
pub async fn run(config_path: Option<&str>, args: RelayArgs) -> anyhow::Result<()> {
    let mut config = SwitchboardConfig::load(config_path).context("loading configuration")?;
    args.apply(&mut config);

    let plan = config.platform_plan()?;
    for skipped in &plan.skipped {
        warn!(
            platform = %skipped.platform,
            missing = %skipped.missing.join(", "),
            "incomplete credentials, skipping platform"
        );
    }
    for platform in &plan.direct {
        warn!(
            platform,
            "direct connections are not bundled in this build, route the platform through the relay"
        );
    }
    let Some(platform) = plan.relay else {
        bail!("no relay platform configured (set --user-id and --platform, or [relay] in the config file)");
    };

    let mut bridge_config = BridgeConfig::from_config(&config)?;
    let handler: Arc<dyn MessageHandler> = if config.ai.is_verify_only() {
        info!("verify-only mode, messages get a static reply");
        Arc::new(VerifyOnlyHandler::new(VERIFY_ONLY_REPLY))
    } else {
        let resolved = build_provider(&config.ai)?;
        info!(provider = %resolved.provider.name(), model = %resolved.model, "AI provider ready");
        bridge_config.ai_model = resolved.model.clone();
        let sessions = Arc::new(SessionStore::new());
        Arc::new(AgentDispatcher::new(resolved.provider, resolved.model, sessions))
    };

    let router = Router::with_config(handler, config.router.clone());
    router.register(Arc::new(RelayBridge::new(bridge_config)?))?;

    let shutdown = CancellationToken::new();
    router.start(shutdown.clone()).await?;
    info!(%platform, adapters = ?router.adapter_names(), "router started, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("shutting down");

    router.stop().await;
    shutdown.cancel();
    Ok(())
}
