mod command;
mod config;
mod connection;
mod hud;
mod navigation;
mod protocol;
mod session;
mod sim;
mod transport;

use std::sync::{Arc, Weak};

use anyhow::Result;
use auton8_shared::Vec3;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use command::CommandIntake;
use config::BridgeConfig;
use connection::{ClientConfig, ConnectionEvent, TransportClient};
use hud::HudStatusStore;
use navigation::{AvatarProbe, ChatSender, CommandSource, NavigationMonitor};
use session::{SessionManager, SessionSlot};
use sim::SimulatedAvatar;

/// Game host stand-in when neither a host nor the simulator is attached
struct DetachedHost;

impl AvatarProbe for DetachedHost {
    fn position(&self) -> Option<Vec3> {
        None
    }
}

impl ChatSender for DetachedHost {
    fn send(&self, text: &str, source: CommandSource) {
        warn!(%source, command = text, "no game host attached, dropping chat command");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::load_config()?;
    info!(
        backend = ?config.backend,
        client_id = %config.client_id,
        simulate = config.simulate,
        "bridge starting"
    );

    let slot = SessionSlot::default();
    let client = TransportClient::new(
        transport::backend_from_config(&config),
        ClientConfig::from_bridge(&config),
        slot.clone(),
    );
    spawn_connection_logger(&client);

    let shutdown = CancellationToken::new();
    let (probe, chat, avatar) = game_host(&config, &shutdown);

    let sessions = Arc::new(SessionManager::new(
        slot,
        client.clone(),
        config.endpoints.events.clone(),
    ));
    let monitor = Arc::new(
        NavigationMonitor::new(
            client.clone(),
            probe.clone(),
            chat.clone(),
            &config.endpoints,
            config.tick_interval(),
        )
        .with_session(sessions.clone()),
    );

    let intake = Arc::new(CommandIntake::new(
        monitor.state_machine(),
        client.clone(),
        probe,
        chat,
        config.endpoints.events.clone(),
        config.allow_nav_commands,
    ));
    register_handlers(&client, &config, &intake);

    if let Some(avatar) = &avatar {
        let weak: Weak<CommandIntake> = Arc::downgrade(&intake);
        avatar.set_chat_hook(Box::new(move |text, source| {
            if let Some(intake) = weak.upgrade() {
                let result = intake.observe_chat(text, source);
                debug!(?result, "chat hook");
            }
        }));
        let stdin = BufReader::new(tokio::io::stdin());
        spawn_operator_console(stdin, avatar.clone(), shutdown.child_token());
    }

    sessions.activate();
    client.connect();
    let monitor_handle = monitor.start()?;

    tokio::signal::ctrl_c().await?;
    info!(session_id = ?sessions.session_id(), "shutting down");

    monitor_handle.join().await;
    sessions.deactivate().await;
    client.close();
    shutdown.cancel();

    Ok(())
}

type GameHost = (
    Arc<dyn AvatarProbe>,
    Arc<dyn ChatSender>,
    Option<Arc<SimulatedAvatar>>,
);

fn game_host(config: &BridgeConfig, shutdown: &CancellationToken) -> GameHost {
    if !config.simulate {
        let probe: Arc<dyn AvatarProbe> = Arc::new(DetachedHost);
        let chat: Arc<dyn ChatSender> = Arc::new(DetachedHost);
        return (probe, chat, None);
    }

    let avatar = Arc::new(SimulatedAvatar::new(Vec3::new(0.5, 64.0, 0.5)));
    avatar.spawn(config.tick_interval(), shutdown.child_token());
    info!("simulated avatar attached");
    let probe: Arc<dyn AvatarProbe> = avatar.clone();
    let chat: Arc<dyn ChatSender> = avatar.clone();
    (probe, chat, Some(avatar))
}

fn register_handlers(client: &TransportClient, config: &BridgeConfig, intake: &Arc<CommandIntake>) {
    let cmd_intake = intake.clone();
    client.on_message(&config.endpoints.cmd, move |envelope| {
        if let Some(result) = cmd_intake.handle_envelope(envelope) {
            debug!(?result, "remote command handled");
        }
    });

    let hud = HudStatusStore::new();
    client.on_message(&config.endpoints.hud, move |envelope| {
        if hud.update_from_value(&envelope.data) {
            let status = hud.snapshot();
            debug!(
                status = status.status(),
                target = ?status.effective_target(),
                "hud updated"
            );
        }
    });
}

/// Lines typed on stdin reach the simulated chat as operator commands
fn spawn_operator_console<R>(
    input: R,
    avatar: Arc<SimulatedAvatar>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(text)) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        avatar.type_command(text);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "operator console read failed");
                    break;
                }
            }
        }
    })
}

fn spawn_connection_logger(client: &TransportClient) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::StateChanged { from, to }) => {
                    info!(%from, %to, "connection state changed");
                }
                Ok(ConnectionEvent::Status(status)) => {
                    debug!(status = status.as_str(), "link status");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_operator_console_types_trimmed_lines() {
        let avatar = Arc::new(SimulatedAvatar::new(Vec3::new(0.5, 64.0, 0.5)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        avatar.set_chat_hook(Box::new(move |text, source| {
            sink.lock().unwrap().push((text.to_string(), source));
        }));

        let input: &'static [u8] = b"  #goto 3 64 4  \n\n   \n#stop\n";
        spawn_operator_console(input, avatar.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("#goto 3 64 4".to_string(), CommandSource::Local),
                ("#stop".to_string(), CommandSource::Local),
            ]
        );
        assert!(!avatar.is_walking());
        assert!(avatar.goal().is_some());
    }
}
