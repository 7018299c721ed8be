//! Development simulator
//!
//! Stands in for the game host: a point avatar that walks toward the last
//! `#goto` target and echoes every chat command back through the hook, the
//! same way the real chat hook reports what was sent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use auton8_shared::{command, now_ms, CommandKind, Vec3};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::navigation::{AvatarProbe, ChatSender, CommandSource};

/// Walking speed in blocks per second
pub const DEFAULT_SPEED_BPS: f64 = 4.3;

/// Callback receiving every command the chat saw, with its source
pub type ChatHook = Box<dyn Fn(&str, CommandSource) + Send + Sync>;

#[derive(Debug)]
struct Body {
    position: Vec3,
    goal: Option<Vec3>,
    walking: bool,
    last_step_ms: Option<u64>,
}

pub struct SimulatedAvatar {
    body: Mutex<Body>,
    hook: Mutex<Option<ChatHook>>,
    speed_bps: f64,
}

impl SimulatedAvatar {
    pub fn new(spawn: Vec3) -> Self {
        Self::with_speed(spawn, DEFAULT_SPEED_BPS)
    }

    pub fn with_speed(spawn: Vec3, speed_bps: f64) -> Self {
        Self {
            body: Mutex::new(Body {
                position: spawn,
                goal: None,
                walking: false,
                last_step_ms: None,
            }),
            hook: Mutex::new(None),
            speed_bps,
        }
    }

    /// Install the chat hook that observes sent commands
    pub fn set_chat_hook(&self, hook: ChatHook) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Simulate the operator typing a command
    pub fn type_command(&self, text: &str) {
        self.send(text, CommandSource::Local);
    }

    pub fn is_walking(&self) -> bool {
        self.body().walking
    }

    pub fn goal(&self) -> Option<Vec3> {
        self.body().goal
    }

    fn body(&self) -> MutexGuard<'_, Body> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn obey(&self, text: &str) {
        let mut body = self.body();
        match command::classify(text) {
            CommandKind::Goto(Some(target)) => {
                // Aim for the block centre
                body.goal = Some(Vec3::new(
                    f64::from(target.x) + 0.5,
                    f64::from(target.y),
                    f64::from(target.z) + 0.5,
                ));
                body.walking = true;
            }
            CommandKind::Resume => body.walking = body.goal.is_some(),
            CommandKind::Cancel => body.walking = false,
            CommandKind::Goto(None) | CommandKind::Other => {}
        }
    }

    /// Move toward the goal for the time elapsed since the previous step
    pub fn advance(&self, now_ms: u64) {
        let mut body = self.body();
        let elapsed = body
            .last_step_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        body.last_step_ms = Some(now_ms);

        let Some(goal) = body.goal.filter(|_| body.walking) else {
            return;
        };
        let remaining = body.position.horizontal_distance(&goal);
        let stride = self.speed_bps * elapsed as f64 / 1000.0;

        if remaining <= stride {
            body.position = Vec3::new(goal.x, body.position.y, goal.z);
            body.walking = false;
            debug!(?goal, "simulated avatar arrived");
        } else {
            let ratio = stride / remaining;
            body.position.x += (goal.x - body.position.x) * ratio;
            body.position.z += (goal.z - body.position.z) * ratio;
        }
    }

    /// Step the avatar on a fixed interval until cancelled
    pub fn spawn(self: &Arc<Self>, step: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let avatar = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(step.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => avatar.advance(now_ms()),
                }
            }
            info!("simulated avatar stopped");
        })
    }
}

impl AvatarProbe for SimulatedAvatar {
    fn position(&self) -> Option<Vec3> {
        Some(self.body().position)
    }
}

impl ChatSender for SimulatedAvatar {
    fn send(&self, text: &str, source: CommandSource) {
        debug!(%source, command = text, "simulated chat");
        self.obey(text);

        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            hook(text, source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar() -> SimulatedAvatar {
        SimulatedAvatar::with_speed(Vec3::new(0.5, 64.0, 0.5), 10.0)
    }

    fn pos(avatar: &SimulatedAvatar) -> Vec3 {
        avatar.position().unwrap()
    }

    #[test]
    fn test_walks_to_goto_target() {
        let avatar = avatar();
        avatar.send("#goto 20 64 0", CommandSource::Remote);
        assert!(avatar.is_walking());

        avatar.advance(1_000);
        avatar.advance(2_000);
        let p = pos(&avatar);
        assert!((p.x - 10.5).abs() < 1e-9);
        assert!((p.z - 0.5).abs() < 1e-9);

        avatar.advance(4_000);
        assert_eq!(pos(&avatar).x, 20.5);
        assert!(!avatar.is_walking());
    }

    #[test]
    fn test_stop_then_path_resumes() {
        let avatar = avatar();
        avatar.send("#goto 100 64 0", CommandSource::Remote);
        avatar.advance(0);
        avatar.advance(1_000);

        avatar.send("#stop", CommandSource::Remote);
        avatar.advance(2_000);
        let stopped = pos(&avatar).x;
        assert!((stopped - 10.5).abs() < 1e-9);

        avatar.send("#path", CommandSource::Retry);
        avatar.advance(3_000);
        assert!((pos(&avatar).x - 20.5).abs() < 1e-9);
    }

    #[test]
    fn test_path_without_goal_stays_put() {
        let avatar = avatar();
        avatar.send("#path", CommandSource::Retry);
        avatar.advance(0);
        avatar.advance(5_000);
        assert!(!avatar.is_walking());
        assert_eq!(pos(&avatar), Vec3::new(0.5, 64.0, 0.5));
    }

    #[test]
    fn test_echoes_commands_with_source() {
        let avatar = avatar();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        avatar.set_chat_hook(Box::new(move |text, source| {
            sink.lock().unwrap().push((text.to_string(), source));
        }));

        avatar.send("#goto 1 64 1", CommandSource::Remote);
        avatar.type_command("#cancel");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("#goto 1 64 1".to_string(), CommandSource::Remote),
                ("#cancel".to_string(), CommandSource::Local),
            ]
        );
        assert!(!avatar.is_walking());
        assert!(avatar.goal().is_some());
    }
}
