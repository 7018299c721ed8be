//! `#` command grammar
//!
//! Navigation commands travel as plain chat strings. Only the handful of
//! shapes the bridge reasons about are classified; everything else that
//! starts with `#` is carried through as a generic command.

use std::fmt;

use thiserror::Error;

use crate::nav;

/// Prefix every navigation command starts with
pub const COMMAND_PREFIX: char = '#';

/// Lightweight resume command used for automatic retries
pub const RESUME_COMMAND: &str = "#path";

/// Reasons a command string is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command does not start with '#'")]
    MissingPrefix,

    #[error("command too long: {0} chars (max: {max})", max = nav::MAX_COMMAND_LEN)]
    TooLong(usize),
}

/// Integer block coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Latch key identifying this exact target
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.x, self.y, self.z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Classification of a command string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `#goto ...`; the target is present only for the `x y z` form
    Goto(Option<BlockPos>),
    /// `#path`
    Resume,
    /// `#cancel` / `#stop`
    Cancel,
    /// Any other `#` command
    Other,
}

/// A validated navigation command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavCommand {
    pub text: String,
    pub kind: CommandKind,
}

impl NavCommand {
    /// Validate and classify a command string.
    ///
    /// Validation looks at the raw text: it must start with `#` and be at
    /// most [`nav::MAX_COMMAND_LEN`] characters long.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        if !raw.starts_with(COMMAND_PREFIX) {
            return Err(CommandError::MissingPrefix);
        }
        let len = raw.chars().count();
        if len > nav::MAX_COMMAND_LEN {
            return Err(CommandError::TooLong(len));
        }

        Ok(Self {
            text: raw.to_string(),
            kind: classify(raw),
        })
    }

    pub fn target(&self) -> Option<BlockPos> {
        match self.kind {
            CommandKind::Goto(target) => target,
            _ => None,
        }
    }

    /// Whether this is a "travel to coordinates" class command
    pub fn is_travel(&self) -> bool {
        matches!(self.kind, CommandKind::Goto(_))
    }
}

/// Classify a command string (case-insensitive, surrounding whitespace ignored)
pub fn classify(raw: &str) -> CommandKind {
    let low = raw.trim().to_lowercase();
    let parts: Vec<&str> = low.split_whitespace().collect();

    match parts.as_slice() {
        ["#goto", rest @ ..] => CommandKind::Goto(parse_coords(rest)),
        ["#path"] => CommandKind::Resume,
        ["#cancel"] | ["#stop"] => CommandKind::Cancel,
        _ => CommandKind::Other,
    }
}

fn parse_coords(parts: &[&str]) -> Option<BlockPos> {
    match parts {
        [x, y, z, ..] => Some(BlockPos::new(
            round_coord(x)?,
            round_coord(y)?,
            round_coord(z)?,
        )),
        _ => None,
    }
}

/// Round half up, the way block coordinates are usually typed
fn round_coord(s: &str) -> Option<i32> {
    let v: f64 = s.parse().ok()?;
    if !v.is_finite() {
        return None;
    }
    Some((v + 0.5).floor() as i32)
}
