//! Input handling.
//!
//! A windowed client would sample keyboard state every frame. The headless
//! client has no window, so it steers from a scripted pattern and from console
//! commands; both end up as the same [`ClientCommand`]s.

use rollback_shared::topdown::AxisInput;

/// Held directional keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl InputState {
    /// Opposite keys cancel out.
    pub fn axis(self) -> AxisInput {
        let x = f64::from(i8::from(self.right) - i8::from(self.left));
        let y = f64::from(i8::from(self.down) - i8::from(self.up));
        AxisInput::new(x, y)
    }
}

/// Something the client loop should do on behalf of the user.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand<I> {
    Input(I),
    Resync,
    NewSession,
    Status,
    Quit,
}

/// Walks a square: right, down, left, up, holding each for `hold` samples.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    hold: u32,
    sample: u32,
}

impl ScriptedInput {
    const PATTERN: [InputState; 4] = [
        InputState { left: false, right: true, up: false, down: false },
        InputState { left: false, right: false, up: false, down: true },
        InputState { left: true, right: false, up: false, down: false },
        InputState { left: false, right: false, up: true, down: false },
    ];

    pub fn new(hold: u32) -> Self {
        Self {
            hold: hold.max(1),
            sample: 0,
        }
    }

    /// Next input, or `None` while the current direction is still held.
    pub fn next_change(&mut self) -> Option<AxisInput> {
        let s = self.sample;
        self.sample = self.sample.wrapping_add(1);
        if s % self.hold != 0 {
            return None;
        }
        let idx = (s / self.hold) as usize % Self::PATTERN.len();
        Some(Self::PATTERN[idx].axis())
    }
}

/// Parses a console line.
///
/// Commands:
///   move <x> <y> - steer with an explicit axis
///   stop         - release all keys
///   resync       - ask peers for their window
///   new          - start a fresh session for everyone
///   status       - print engine status
///   quit         - exit
pub fn parse_console(line: &str) -> Result<ClientCommand<AxisInput>, String> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("move") => {
            let mut coord = || -> Result<f64, String> {
                parts
                    .next()
                    .ok_or_else(|| "usage: move <x> <y>".to_string())?
                    .parse::<f64>()
                    .map_err(|e| e.to_string())
            };
            let x = coord()?;
            let y = coord()?;
            Ok(ClientCommand::Input(AxisInput::new(x, y)))
        }
        Some("stop") => Ok(ClientCommand::Input(InputState::default().axis())),
        Some("resync") => Ok(ClientCommand::Resync),
        Some("new") => Ok(ClientCommand::NewSession),
        Some("status") => Ok(ClientCommand::Status),
        Some("quit") | Some("exit") => Ok(ClientCommand::Quit),
        Some(other) => Err(format!("unknown command: {other}")),
        None => Err("empty command".into()),
    }
}
