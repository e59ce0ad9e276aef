//! Gateway command — orchestrates channels, agent loop, and message routing.
//!
//!
//! Startup sequence:
//! 1. Load config
//! 2. Create message bus
//! 3. Create agent loop (with provider, tools, sessions)
//! 4. Create channel manager, register enabled channels
//! 5. Run: `tokio::select!` of agent loop + channel manager
//! 6. Handle Ctrl+C for graceful shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use switchbox_agent::{AgentLoop, AgentRegistry, ExecToolConfig, build_base_tools};
use switchbox_channels::ChannelManager;
use switchbox_core::bus::queue::MessageBus;
use switchbox_core::bus::types::OutboundMessage;
use switchbox_core::config::load_config;
use switchbox_core::heartbeat::HeartbeatService;
use switchbox_core::session::SessionManager;
use switchbox_cron::CronService;
use switchbox_providers::http_provider::create_provider;

use crate::helpers;

/// Timeout for a cron job's shell command, per the defaults table.
const CRON_SHELL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Run a cron job's shell command and return its combined output.
async fn run_cron_shell_command(command: &str) -> String {
    if command.is_empty() {
        return "Error: cron job has no command to run".to_string();
    }

    let run = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output();

    match tokio::time::timeout(CRON_SHELL_TIMEOUT, run).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.stderr.is_empty() {
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            text
        }
        Ok(Err(e)) => format!("Error: failed to run command: {e}"),
        Err(_) => format!("Error: command timed out after {}s", CRON_SHELL_TIMEOUT.as_secs()),
    }
}

/// Run the gateway — starts the agent loop + channel manager.
pub async fn run() -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: Gateway");
    println!();

    // 1. Load config
    let config = load_config(None);
    let defaults = &config.agents.defaults;

    // 2. Resolve workspace
    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    // 3. Create message bus (shared between agent + channels)
    let bus = Arc::new(MessageBus::new(100));

    // 4. Create provider
    let model = &defaults.model;
    let providers_map = config.providers.to_map();
    let provider = create_provider(model, &providers_map)
        .map_err(|e| anyhow::anyhow!(e))?;

    // 5. Brave API key
    let brave_key = if config.tools.web.search.api_key.is_empty() {
        None
    } else {
        Some(config.tools.web.search.api_key.clone())
    };

    // 6. Create session manager
    let session_manager = SessionManager::new(None)
        .context("failed to create session manager")?;

    // 7. Create agent loop (Arc-wrapped for sharing with cron callback)
    let agent_loop = Arc::new(AgentLoop::new(
        bus.clone(),
        Arc::new(provider),
        workspace.clone(),
        Some(model.to_string()),
        Some(defaults.max_tool_iterations as usize),
        None,
        brave_key.clone(),
        Some(ExecToolConfig::default()),
        config.tools.restrict_to_workspace,
        Some(session_manager),
        None,
    ));

    // 7b. Wire multi-agent routing when the config declares bindings or a
    // non-default agent list; otherwise the loop stays on its own single
    // model/session/context built above.
    if !config.bindings.is_empty() || !config.agents.list.is_empty() {
        let registry = Arc::new(AgentRegistry::new(
            &config.agents.list,
            defaults,
            |agent_cfg| {
                build_base_tools(
                    &switchbox_core::utils::expand_home(&agent_cfg.workspace),
                    agent_cfg.restrict_to_workspace,
                    60,
                    brave_key.clone(),
                )
            },
        ));
        let fallback = Arc::new(switchbox_providers::fallback::FallbackChain::new(providers_map.clone()));
        agent_loop.set_routing(config.bindings.clone(), registry, fallback);
        info!(agents = config.agents.list.len(), bindings = config.bindings.len(), "multi-agent routing enabled");
    }

    // 8. Create cron service (jobs persisted under the agent's own workspace)
    let cron_store_path = workspace.join("cron").join("jobs.json");
    let cron_service = Arc::new(CronService::new(bus.clone(), Some(cron_store_path)));
    agent_loop.set_cron_service(cron_service.clone()).await;
    {
        let agent = agent_loop.clone();
        let bus = bus.clone();
        cron_service
            .set_on_job(Arc::new(move |job: switchbox_cron::CronJob| {
                let agent = agent.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let response = match job.payload.kind {
                        switchbox_cron::CronPayloadKind::AgentTurn => agent
                            .process_direct(&job.payload.message)
                            .await
                            .unwrap_or_else(|e| format!("Error: {e}")),
                        switchbox_cron::CronPayloadKind::ShellCommand => {
                            run_cron_shell_command(job.payload.command.as_deref().unwrap_or("")).await
                        }
                    };

                    // Deliver result to channel if configured
                    if job.payload.deliver {
                        if let Some(ref chat_id) = job.payload.to {
                            let channel = job.payload.channel.as_deref().unwrap_or("cli");
                            let msg = OutboundMessage::new(channel, chat_id.as_str(), &response);
                            if let Err(e) = bus.publish_outbound(msg).await {
                                tracing::error!(error = %e, "failed to deliver cron result");
                            }
                        }
                    }

                    Ok(response)
                })
            }))
            .await;
    }

    // Pre-load to show job count in banner
    if let Err(e) = cron_service.load().await {
        tracing::warn!(error = %e, "failed to pre-load cron store");
    }
    let cron_jobs = cron_service.list_jobs().await;

    // 9. Create heartbeat service
    let heartbeat = {
        let agent = agent_loop.clone();
        let callback: switchbox_core::heartbeat::OnHeartbeatFn =
            Arc::new(move |prompt, channel, chat_id| {
                let agent = agent.clone();
                Box::pin(async move {
                    let reply = agent.process_direct_to(&prompt, &channel, &chat_id).await?;
                    Ok(Some(reply))
                })
            });
        let hb = Arc::new(HeartbeatService::new(
            workspace.clone(),
            Some(callback),
            None, // floored to MIN_HEARTBEAT_INTERVAL_S
            true,
        ));
        agent_loop.set_heartbeat(hb.clone());
        hb
    };

    // 9b. Create device service (USB hotplug monitoring)
    let devices = Arc::new(switchbox_core::devices::DeviceService::new(
        bus.clone(),
        config.devices.enabled,
        config.devices.monitor_usb,
    ));
    agent_loop.set_devices(devices.clone());

    // 10. Create channel manager
    // Register configured channels
    #[allow(unused_mut)]
    let mut channel_manager = ChannelManager::new(bus.clone());

    // Telegram
    #[cfg(feature = "telegram")]
    {
        let tg = &config.channels.telegram;
        if !tg.token.is_empty() {
            use switchbox_channels::telegram::TelegramChannel;
            let mut telegram = TelegramChannel::new(
                tg.token.clone(),
                bus.clone(),
                tg.allowed_users.clone(),
            );

            // Wire voice transcription if configured
            if config.transcription.enabled {
                let tc = &config.transcription;
                // Resolve API key: config > groq provider key > env var
                let transcription_key = if !tc.api_key.is_empty() {
                    tc.api_key.clone()
                } else if !config.providers.groq.api_key.is_empty() {
                    config.providers.groq.api_key.clone()
                } else {
                    String::new()
                };

                if !transcription_key.is_empty() {
                    use switchbox_providers::GroqTranscriber;
                    use switchbox_providers::TranscriptionProvider;
                    let transcriber = Arc::new(GroqTranscriber::new(&transcription_key));
                    if transcriber.is_configured() {
                        let t = transcriber.clone();
                        telegram = telegram.with_transcriber(Arc::new(move |path: String| {
                            let t = t.clone();
                            Box::pin(async move {
                                t.transcribe(std::path::Path::new(&path)).await
                            })
                        }));
                        info!("voice transcription enabled (Groq Whisper)");
                    }
                }
            }

            channel_manager.register(Arc::new(telegram));
            info!("registered telegram channel");
        }
    }

    // Discord
    #[cfg(feature = "discord")]
    {
        let dc = &config.channels.discord;
        if !dc.token.is_empty() {
            use switchbox_channels::discord::DiscordChannel;
            let discord = DiscordChannel::new(
                dc.token.clone(),
                bus.clone(),
                dc.allowed_users.clone(),
            );
            channel_manager.register(Arc::new(discord));
            info!("registered discord channel");
        }
    }

    // WhatsApp
    #[cfg(feature = "whatsapp")]
    {
        let wa = &config.channels.whatsapp;
        if !wa.bridge_url.is_empty() {
            use switchbox_channels::whatsapp::WhatsAppChannel;
            let whatsapp = WhatsAppChannel::new(
                wa.bridge_url.clone(),
                bus.clone(),
                wa.allowed_users.clone(),
            );
            channel_manager.register(Arc::new(whatsapp));
            info!("registered whatsapp channel");
        }
    }

    // Slack
    #[cfg(feature = "slack")]
    {
        let sl = &config.channels.slack;
        if !sl.bot_token.is_empty() && !sl.app_token.is_empty() {
            use switchbox_channels::slack::SlackChannel;
            let slack = SlackChannel::new(sl.clone(), bus.clone());
            channel_manager.register(Arc::new(slack));
            info!("registered slack channel");
        }
    }

    // Email
    #[cfg(feature = "email")]
    {
        let em = &config.channels.email;
        if !em.imap_host.is_empty() {
            use switchbox_channels::email::EmailChannel;
            let email = EmailChannel::new(em.clone(), bus.clone());
            channel_manager.register(Arc::new(email));
            info!("registered email channel");
        }
    }
    info!(
        model = %model,
        workspace = %workspace.display(),
        channels = ?channel_manager.channel_names(),
        "gateway starting"
    );

    println!(
        "  Model:     {}",
        model
    );
    println!(
        "  Workspace: {}",
        workspace.display()
    );
    println!(
        "  Channels:  {} registered",
        channel_manager.len()
    );
    if !cron_jobs.is_empty() {
        let enabled = cron_jobs.iter().filter(|j| j.enabled).count();
        println!("  Cron:      {} jobs ({} enabled)", cron_jobs.len(), enabled);
    }
    println!("  Heartbeat: every 30m");
    if config.devices.enabled && config.devices.monitor_usb {
        println!("  Devices:   USB monitoring enabled");
    }
    println!();

    if channel_manager.is_empty() {
        println!("  ⚠  No channels registered. The agent loop will run but");
        println!("     only process messages from the internal bus.");
        println!("     Configure channels in ~/.switchbox/config.json");
        println!();
    }

    println!("  Ctrl+C to stop");
    println!();

    // 11. Run: agent loop + channel manager + cron + heartbeat concurrently
    //     Ctrl+C triggers graceful shutdown
    tokio::select! {
        _ = agent_loop.run() => {
            info!("agent loop exited");
        }
        result = channel_manager.start_all() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "channel manager error");
            }
        }
        result = cron_service.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cron service error");
            }
        }
        result = heartbeat.start() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "heartbeat service error");
            }
        }
        _ = devices.start() => {
            info!("device service exited");
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            heartbeat.stop();
            devices.stop();
            cron_service.stop().await;
            channel_manager.stop_all().await;
        }
    }

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────


