use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dot_eth_relayer::api::{self, ApiState};
use dot_eth_relayer::chain::{
    AlloyInboundChannel, HttpBeaconClient, HttpParachainClient, HttpRelayChainClient,
    ParachainApi, RemoteSigner,
};
use dot_eth_relayer::config::Config;
use dot_eth_relayer::relay::{BeaconRelay, BeaconRelayConfig, ParachainRelay, ParachainRelayConfig};
use dot_eth_relayer::task_group::TaskGroup;
use tokio_util::sync::CancellationToken;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting Ethereum/parachain relayer");

    let config = Config::load()?;
    tracing::info!(
        directions = ?config.directions,
        para_id = config.parachain.para_id,
        ethereum_chain_id = config.ethereum.chain_id,
        "Configuration loaded"
    );

    let retry = config.retry_policy();

    // Shared by both directions
    let parachain: Arc<dyn ParachainApi> = Arc::new(HttpParachainClient::new(
        config.parachain.endpoint.clone(),
        config.parachain.indexing_prefix.clone().into_bytes(),
        config.parachain.beacon_pallet_name.clone(),
    )?);

    let beacon_relay = if config.directions.beacon() {
        Some(BeaconRelay::new(
            Arc::new(HttpBeaconClient::new(
                config.beacon.endpoint.clone(),
                config.beacon.finalized_update_endpoint.clone(),
            )?),
            parachain.clone(),
            Arc::new(RemoteSigner::new(config.parachain.signer_url.clone())),
            BeaconRelayConfig {
                trusted_block_root: config.beacon.trusted_block_root,
                spec: config.chain_spec(),
                poll_interval: Duration::from_millis(config.beacon.poll_interval_ms),
                account: config.parachain.account,
                pallet_index: config.parachain.beacon_pallet_index,
                inclusion: config.inclusion_policy(),
                retry: retry.clone(),
            },
        ))
    } else {
        None
    };

    let parachain_relay = if config.directions.parachain() {
        let channel = AlloyInboundChannel::new(
            config.ethereum.endpoint.clone(),
            config.ethereum.chain_id,
            &config.ethereum.private_key,
            config.ethereum.inbound_channel_address,
            Duration::from_secs(config.ethereum.confirmation_timeout_secs),
        )?;
        tracing::info!(relayer = %channel.relayer_address(), "Ethereum signer loaded");

        Some(ParachainRelay::new(
            Arc::new(HttpRelayChainClient::new(config.relaychain.endpoint.clone())?),
            parachain.clone(),
            Arc::new(channel),
            ParachainRelayConfig {
                para_id: config.parachain.para_id,
                poll_interval: Duration::from_millis(config.relaychain.beefy_poll_interval_ms),
                retry: retry.clone(),
            },
        ))
    } else {
        None
    };

    // Cancelled by a shutdown signal or by the first failing task
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    let api_state = Arc::new(ApiState::new(config.directions.names()));
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_cancel = CancellationToken::new();
    let api_handle = tokio::spawn(api::start_api_server(
        api_addr,
        api_state.clone(),
        api_cancel.clone(),
    ));

    let mut group = TaskGroup::with_token(shutdown.clone());

    let started = async {
        if let Some(relay) = &beacon_relay {
            relay.start(&mut group).await?;
        }
        if let Some(relay) = &parachain_relay {
            relay.start(&mut group).await?;
        }
        Ok::<_, dot_eth_relayer::error::RelayError>(())
    }
    .await;

    let result = match started {
        Ok(()) => {
            if !shutdown.is_cancelled() {
                api_state.set_ready(true);
                tracing::info!(tasks = group.len(), "Relays running");
            }
            group.wait().await
        }
        Err(e) => {
            tracing::error!(error = %e, "Relay failed to start");
            shutdown.cancel();
            let _ = group.wait().await;
            Err(e)
        }
    };

    api_state.set_ready(false);
    if let Some(relay) = &beacon_relay {
        relay.stop();
    }
    if let Some(relay) = &parachain_relay {
        relay.stop();
    }

    api_cancel.cancel();
    match api_handle.await {
        Ok(Err(e)) => tracing::error!(error = %e, "API server error"),
        Err(e) => tracing::error!(error = %e, "API server task aborted"),
        Ok(Ok(())) => {}
    }

    match result {
        Ok(()) => {
            tracing::info!("Relayer stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Relayer stopped with error");
            Err(e.into())
        }
    }
}

/// Initialize tracing/logging with structured output
///
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dot_eth_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
