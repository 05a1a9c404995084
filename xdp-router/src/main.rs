use anyhow::{Context as _, bail};
use caps::{CapSet, Capability};
use clap::Parser as _;
use eui48::MacAddress;
use tokio::signal::unix::{SignalKind, signal};

use xdp_router::{Args, Rewriter, Router, RouterConfig};

const REQUIRED_CAPS: [Capability; 3] = [
    Capability::CAP_NET_ADMIN,
    Capability::CAP_NET_RAW,
    Capability::CAP_BPF,
];

fn check_capabilities() -> anyhow::Result<()> {
    for cap in REQUIRED_CAPS {
        if !caps::has_cap(None, CapSet::Effective, cap)? {
            bail!("missing capability {cap}, run as root or grant it to the binary");
        }
    }
    Ok(())
}

/// Lifts the locked-memory limit so the UMEM and BPF maps can be pinned.
fn raise_memlock_limit() -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &limit) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn format_mac(mac: Option<[u8; 6]>) -> String {
    mac.map(|m| MacAddress::new(m).to_hex_string())
        .unwrap_or_else(|| "-".into())
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => log::info!("SIGINT received"),
        _ = terminate.recv() => log::info!("SIGTERM received"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RouterConfig::from(Args::parse());
    log::info!("===== xdp-router setup =====");
    check_capabilities()?;
    raise_memlock_limit().context("Failed to setrlimit")?;
    log::info!(
        "client {:?} ({}), server {:?} ({})",
        config.client,
        format_mac(config.client_mac),
        config.server,
        format_mac(config.server_mac)
    );

    let rewriter = Rewriter::new(config.client_mac, config.server_mac);
    let mut router = Router::new(config);
    if let Err(e) = router.start(rewriter) {
        // The interface may already be bound; give it back before exiting.
        if let Err(close_err) = router.close() {
            log::error!("{close_err}");
        }
        return Err(e).context("Failed to start router");
    }
    if let Some(binding) = router.binding() {
        log::info!(
            "using IP {} bound to nic {} ({})",
            binding.address.addr(),
            binding.interface.name,
            format_mac(binding.interface.mac)
        );
    }

    log::info!("===== xdp-router running =====");
    wait_for_signal().await?;

    let stats = router.stats();
    log::info!(
        "received {} passed {} rewritten {} injected {} dropped {} (errors {}, unknown {})",
        stats.received,
        stats.passed,
        stats.rewritten,
        stats.injected,
        stats.dropped,
        stats.decision_errors,
        stats.unknown_actions
    );
    router.close().context("Failed to restore interface")?;
    log::info!("===== xdp-router end =====");
    Ok(())
}
