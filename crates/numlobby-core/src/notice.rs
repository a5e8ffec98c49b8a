use std::fmt;

/// Prefix carried by every line the server writes.
pub const SERVER_PREFIX: &str = "[SERVER] ";

/// A server-to-client notice. The protocol is one line of text per notice;
/// clients never send anything back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Waiting,
    YourNumber(u8),
    SecondsLeft(u32),
    Winner,
    Lost { winning_number: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeError {
    MissingPrefix,
    Unrecognized(String),
    InvalidNumber(String),
}

impl fmt::Display for NoticeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "line does not start with {SERVER_PREFIX:?}"),
            Self::Unrecognized(line) => write!(f, "unrecognized notice: {line:?}"),
            Self::InvalidNumber(raw) => write!(f, "invalid number in notice: {raw:?}"),
        }
    }
}

impl std::error::Error for NoticeError {}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SERVER_PREFIX)?;
        match self {
            Self::Waiting => f.write_str("Waiting for other players..."),
            Self::YourNumber(n) => write!(f, "Your number: {n}"),
            Self::SecondsLeft(s) => write!(f, "{s} seconds left to join."),
            Self::Winner => f.write_str("You are the winner!"),
            Self::Lost { winning_number } => {
                write!(f, "You lost. Winning number: {winning_number}")
            },
        }
    }
}

impl Notice {
    /// The notice as it goes on the wire, `\n` terminated.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    /// Parse one received line. A trailing `\n` or `\r\n` is accepted.
    pub fn parse_line(line: &str) -> Result<Self, NoticeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let body = line
            .strip_prefix(SERVER_PREFIX)
            .ok_or(NoticeError::MissingPrefix)?;

        match body {
            "Waiting for other players..." => return Ok(Self::Waiting),
            "You are the winner!" => return Ok(Self::Winner),
            _ => {},
        }

        if let Some(raw) = body.strip_prefix("Your number: ") {
            return parse_number(raw).map(Self::YourNumber);
        }
        if let Some(raw) = body.strip_prefix("You lost. Winning number: ") {
            return parse_number(raw).map(|winning_number| Self::Lost { winning_number });
        }
        if let Some(raw) = body.strip_suffix(" seconds left to join.") {
            return parse_number(raw).map(Self::SecondsLeft);
        }

        Err(NoticeError::Unrecognized(line.to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, NoticeError> {
    raw.parse::<T>()
        .map_err(|_| NoticeError::InvalidNumber(raw.to_string()))
}
