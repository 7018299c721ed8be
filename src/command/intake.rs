//! Command intake - validates, dispatches and arms navigation commands

use std::sync::Arc;

use auton8_shared::{now_ms, Envelope, NavCommand, RejectReason};
use tracing::{debug, info, warn};

use crate::connection::TransportClient;
use crate::navigation::{lock_nav, AvatarProbe, ChatSender, CommandSource, NavHandle};
use crate::protocol::{self, event, RemotePayload};

/// Result of submitting a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Command armed on the state machine
    Armed { command: String },
    /// Command refused; remote commands also publish `cmd_reject`
    Rejected { reason: RejectReason },
    /// Command not processed at all
    Ignored { reason: &'static str },
}

/// Single entry point for commands from every source
pub struct CommandIntake {
    fsm: NavHandle,
    client: TransportClient,
    probe: Arc<dyn AvatarProbe>,
    chat: Arc<dyn ChatSender>,
    events_endpoint: String,
    allow_nav_commands: bool,
}

impl CommandIntake {
    pub fn new(
        fsm: NavHandle,
        client: TransportClient,
        probe: Arc<dyn AvatarProbe>,
        chat: Arc<dyn ChatSender>,
        events_endpoint: impl Into<String>,
        allow_nav_commands: bool,
    ) -> Self {
        Self {
            fsm,
            client,
            probe,
            chat,
            events_endpoint: events_endpoint.into(),
            allow_nav_commands,
        }
    }

    /// Submit a command tagged with its source.
    ///
    /// - `Local`: armed only; never re-sent, no events
    /// - `Remote`: validated, sent through chat, armed, traced with `accepted`
    /// - `Retry`: ignored; resends are armed by the state machine itself
    pub fn submit(&self, text: &str, source: CommandSource) -> CommandResult {
        if !self.allow_nav_commands {
            debug!(%source, "navigation commands disabled, ignoring");
            return CommandResult::Ignored {
                reason: "navigation commands disabled",
            };
        }

        match source {
            CommandSource::Local => self.arm_local(text),
            CommandSource::Remote => self.dispatch_remote(text),
            CommandSource::Retry => CommandResult::Ignored {
                reason: "automatic resend",
            },
        }
    }

    /// Chat hook entry: only operator-typed commands are taken in.
    ///
    /// Commands the bridge itself sent come back through the hook tagged
    /// with a non-local source and are dropped here.
    pub fn observe_chat(&self, text: &str, source: CommandSource) -> CommandResult {
        if source != CommandSource::Local {
            return CommandResult::Ignored {
                reason: "echo of bridge-sent command",
            };
        }
        self.submit(text, CommandSource::Local)
    }

    /// Handle an inbound `cmd` envelope; `None` when it carries no command
    pub fn handle_envelope(&self, envelope: &Envelope) -> Option<CommandResult> {
        match protocol::parse_remote_command(&envelope.data) {
            RemotePayload::Command(text) => Some(self.submit(text, CommandSource::Remote)),
            RemotePayload::Malformed if !self.allow_nav_commands => Some(CommandResult::Ignored {
                reason: "navigation commands disabled",
            }),
            RemotePayload::Malformed => {
                warn!(endpoint = %envelope.endpoint, "remote command without text");
                Some(self.reject(RejectReason::BadCmd))
            }
            RemotePayload::Other => {
                debug!(endpoint = %envelope.endpoint, "ignoring non-command payload");
                None
            }
        }
    }

    fn arm_local(&self, text: &str) -> CommandResult {
        match NavCommand::parse(text) {
            Ok(command) => {
                lock_nav(&self.fsm).arm(&command, now_ms());
                debug!(command = %command.text, "local command armed");
                CommandResult::Armed {
                    command: command.text,
                }
            }
            Err(_) => CommandResult::Ignored {
                reason: "not a navigation command",
            },
        }
    }

    fn dispatch_remote(&self, text: &str) -> CommandResult {
        let command = match NavCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "rejecting remote command");
                return self.reject(RejectReason::BadCmd);
            }
        };
        if self.probe.position().is_none() {
            warn!(command = %command.text, "no player, rejecting remote command");
            return self.reject(RejectReason::NoPlayer);
        }

        self.chat.send(&command.text, CommandSource::Remote);
        lock_nav(&self.fsm).arm(&command, now_ms());
        self.client.publish(
            &self.events_endpoint,
            protocol::event_payload(event::ACCEPTED, &command.text),
        );
        info!(command = %command.text, "remote command dispatched");

        CommandResult::Armed {
            command: command.text,
        }
    }

    fn reject(&self, reason: RejectReason) -> CommandResult {
        self.client.publish(
            &self.events_endpoint,
            protocol::event_payload(event::CMD_REJECT, reason.as_str()),
        );
        CommandResult::Rejected { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{client_with, settle, wait_for_state, FakeBackend};
    use crate::connection::ConnectionState;
    use crate::navigation::test_support::{FixedProbe, RecordingChat};
    use crate::session::SessionSlot;
    use auton8_shared::{nav, NavStateMachine, OutcomeReason};
    use serde_json::json;
    use std::sync::Mutex;

    struct Rig {
        backend: Arc<FakeBackend>,
        chat: Arc<RecordingChat>,
        probe: Arc<FixedProbe>,
        fsm: NavHandle,
        intake: CommandIntake,
    }

    async fn rig(allow: bool) -> Rig {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        let chat = Arc::new(RecordingChat::default());
        let probe = Arc::new(FixedProbe::at(0.0, 64.0, 0.0));
        let fsm: NavHandle = Arc::new(Mutex::new(NavStateMachine::new(now_ms())));
        let intake = CommandIntake::new(
            fsm.clone(),
            client,
            probe.clone(),
            chat.clone(),
            "events",
            allow,
        );
        Rig {
            backend,
            chat,
            probe,
            fsm,
            intake,
        }
    }

    fn events(backend: &FakeBackend) -> Vec<(String, String)> {
        backend
            .sent_events()
            .into_iter()
            .filter(|(event, _)| event != "status")
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_command_is_sent_armed_and_traced() {
        let rig = rig(true).await;
        let result = rig.intake.submit("#goto 10 64 10", CommandSource::Remote);
        settle().await;

        assert_eq!(
            result,
            CommandResult::Armed {
                command: "#goto 10 64 10".into()
            }
        );
        assert_eq!(
            rig.chat.sent(),
            vec![("#goto 10 64 10".to_string(), CommandSource::Remote)]
        );
        assert_eq!(lock_nav(&rig.fsm).armed_command(), Some("#goto 10 64 10"));
        assert_eq!(
            events(&rig.backend),
            vec![("accepted".to_string(), "#goto 10 64 10".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_remote_commands_are_rejected() {
        let rig = rig(true).await;
        let too_long = format!("#{}", "x".repeat(nav::MAX_COMMAND_LEN));

        assert_eq!(
            rig.intake.submit("goto 1 2 3", CommandSource::Remote),
            CommandResult::Rejected {
                reason: RejectReason::BadCmd
            }
        );
        assert_eq!(
            rig.intake.submit(&too_long, CommandSource::Remote),
            CommandResult::Rejected {
                reason: RejectReason::BadCmd
            }
        );
        settle().await;

        assert!(rig.chat.sent().is_empty());
        assert!(lock_nav(&rig.fsm).armed_command().is_none());
        let details: Vec<_> = events(&rig.backend).into_iter().map(|(_, d)| d).collect();
        assert_eq!(details, vec!["bad_cmd", "bad_cmd"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_command_without_player_is_rejected() {
        let rig = rig(true).await;
        *rig.probe.position.lock().unwrap() = None;

        let result = rig.intake.submit("#goto 1 2 3", CommandSource::Remote);
        settle().await;

        assert_eq!(
            result,
            CommandResult::Rejected {
                reason: RejectReason::NoPlayer
            }
        );
        assert!(rig.chat.sent().is_empty());
        assert_eq!(
            events(&rig.backend),
            vec![("cmd_reject".to_string(), "no_player".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_command_is_armed_silently() {
        let rig = rig(true).await;
        let result = rig.intake.observe_chat("#goto 5 64 5", CommandSource::Local);
        settle().await;

        assert!(matches!(result, CommandResult::Armed { .. }));
        assert!(rig.chat.sent().is_empty());
        assert!(events(&rig.backend).is_empty());
        assert!(lock_nav(&rig.fsm).awaiting_acceptance());
    }

    #[tokio::test(start_paused = true)]
    async fn test_echoes_of_bridge_commands_are_ignored() {
        let rig = rig(true).await;
        rig.intake.submit("#goto 10 64 10", CommandSource::Remote);
        lock_nav(&rig.fsm).cancel();

        assert!(matches!(
            rig.intake.observe_chat("#goto 10 64 10", CommandSource::Remote),
            CommandResult::Ignored { .. }
        ));
        assert!(matches!(
            rig.intake.observe_chat("#path", CommandSource::Retry),
            CommandResult::Ignored { .. }
        ));
        // The echo did not re-arm the cancelled command
        assert!(lock_nav(&rig.fsm).armed_command().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_intake_ignores_everything() {
        let rig = rig(false).await;
        let result = rig.intake.submit("#goto 1 2 3", CommandSource::Remote);
        settle().await;

        assert!(matches!(result, CommandResult::Ignored { .. }));
        assert!(rig.chat.sent().is_empty());
        assert!(events(&rig.backend).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_cancel_clears_context() {
        let rig = rig(true).await;
        rig.intake.submit("#goto 10 64 10", CommandSource::Remote);
        rig.intake.submit("#stop", CommandSource::Remote);

        let fsm = lock_nav(&rig.fsm);
        assert!(fsm.armed_command().is_none());
        assert_eq!(fsm.reason(), OutcomeReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_baritone_cmd_without_text_is_rejected() {
        let rig = rig(true).await;
        let missing = Envelope::outbound("cmd", json!({"type": "baritone_cmd"}), None);
        let numeric = Envelope::outbound("cmd", json!({"type": "baritone_cmd", "cmd": 42}), None);

        for envelope in [&missing, &numeric] {
            assert_eq!(
                rig.intake.handle_envelope(envelope),
                Some(CommandResult::Rejected {
                    reason: RejectReason::BadCmd
                })
            );
        }
        settle().await;

        assert!(rig.chat.sent().is_empty());
        assert!(lock_nav(&rig.fsm).armed_command().is_none());
        assert_eq!(
            events(&rig.backend),
            vec![
                ("cmd_reject".to_string(), "bad_cmd".to_string()),
                ("cmd_reject".to_string(), "bad_cmd".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelopes_are_filtered_by_type() {
        let rig = rig(true).await;
        let chat = Envelope::outbound("cmd", json!({"type": "chat", "cmd": "#stop"}), None);
        let nav = Envelope::outbound("cmd", json!({"type": "baritone_cmd", "cmd": "#path"}), None);

        assert!(rig.intake.handle_envelope(&chat).is_none());
        assert!(matches!(
            rig.intake.handle_envelope(&nav),
            Some(CommandResult::Armed { .. })
        ));
    }
}
