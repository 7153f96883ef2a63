//! Agent-daemon command — runs the agent loop, cron, and heartbeat behind
//! the network bus, for a separate `oxibot gateway` process to attach to.
//!
//! Same component wiring as the gateway's combined mode, minus the channel
//! manager: messages arrive from and are delivered to whatever gateway
//! connects to [`NetworkBusServer`] over TCP.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use oxibot_agent::{AgentLoop, ExecToolConfig};
use oxibot_core::bus::network::NetworkBusServer;
use oxibot_core::bus::traits::Bus;
use oxibot_core::bus::types::OutboundMessage;
use oxibot_core::config::load_config;
use oxibot_core::heartbeat::HeartbeatService;
use oxibot_core::session::SessionManager;
use oxibot_cron::CronService;
use oxibot_providers::http_provider::create_provider;

use crate::helpers;

/// Run the agent-daemon: agent loop + cron + heartbeat, serving the network bus.
pub async fn run() -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: Agent daemon");
    println!();

    let config = load_config(None);
    let defaults = &config.agents.defaults;

    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let bus_cfg = &config.bus;
    let bus_server = Arc::new(NetworkBusServer::new(bus_cfg.host.clone(), bus_cfg.port));
    let bus: Arc<dyn Bus> = bus_server.clone();

    let model = &defaults.model;
    let providers_map = config.providers.to_map();
    let provider = create_provider(model, &providers_map).map_err(|e| anyhow::anyhow!(e))?;

    let brave_key = if config.tools.web.search.api_key.is_empty() {
        None
    } else {
        Some(config.tools.web.search.api_key.clone())
    };

    let session_manager =
        SessionManager::new(None).context("failed to create session manager")?;

    let agent_loop = Arc::new(AgentLoop::new(
        bus.clone(),
        Arc::new(provider),
        workspace.clone(),
        Some(model.to_string()),
        Some(defaults.max_tool_iterations as usize),
        None,
        brave_key,
        Some(ExecToolConfig::default()),
        config.tools.restrict_to_workspace,
        Some(session_manager),
        None,
        Some(oxibot_agent::CompactionConfig {
            context_window: defaults.context_window,
            threshold: defaults.compaction_threshold,
            keep_recent: defaults.keep_recent,
        }),
    ));

    let cron_service = Arc::new(CronService::new(bus.clone(), None));
    {
        let agent = agent_loop.clone();
        let bus = bus.clone();
        cron_service
            .set_on_job(Arc::new(move |job: oxibot_cron::CronJob| {
                let agent = agent.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let response = agent
                        .process_direct(&job.payload.message)
                        .await
                        .unwrap_or_else(|e| format!("Error: {e}"));

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

    if let Err(e) = cron_service.load().await {
        tracing::warn!(error = %e, "failed to pre-load cron store");
    }
    let cron_jobs = cron_service.list_jobs(true).await;

    let heartbeat = {
        let agent = agent_loop.clone();
        let callback: oxibot_core::heartbeat::OnHeartbeatFn = Arc::new(move |prompt| {
            let agent = agent.clone();
            Box::pin(async move { agent.process_direct(&prompt).await })
        });
        Arc::new(HeartbeatService::new(
            workspace.clone(),
            Some(callback),
            None,
            true,
        ))
    };

    info!(
        model = %model,
        workspace = %workspace.display(),
        host = %bus_cfg.host,
        port = bus_cfg.port,
        "agent-daemon starting"
    );

    println!("  Model:     {}", model);
    println!("  Workspace: {}", workspace.display());
    println!("  Bus:       {}:{}", bus_cfg.host, bus_cfg.port);
    if !cron_jobs.is_empty() {
        let enabled = cron_jobs.iter().filter(|j| j.enabled).count();
        println!("  Cron:      {} jobs ({} enabled)", cron_jobs.len(), enabled);
    }
    println!("  Heartbeat: every 30m");
    println!();
    println!("  Waiting for a gateway to connect. Ctrl+C to stop");
    println!();

    tokio::select! {
        result = bus_server.serve() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "network bus server error");
            }
        }
        _ = agent_loop.run() => {
            info!("agent loop exited");
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
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            heartbeat.stop();
            cron_service.stop().await;
            bus_server.stop();
        }
    }

    println!("  Agent daemon stopped. Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_module_compiles() {
        assert!(true);
    }
}
