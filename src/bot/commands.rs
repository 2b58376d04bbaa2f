use std::str::FromStr;
use thiserror::Error;

use crate::audio::queue::LoopMode;

/// One console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    /// Skip the current track, or the queued one at a 1-based position.
    Skip(Option<usize>),
    Queue(usize),
    NowPlaying,
    Pause,
    Resume,
    Stop,
    Shuffle,
    Loop(LoopMode),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
    #[error("`{0}` is not a positive number")]
    InvalidNumber(String),
    #[error("loop mode must be `track` or `queue`, got `{0}`")]
    InvalidLoopMode(String),
}

fn positive(value: &str) -> Result<usize, ParseError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::InvalidNumber(value.to_string())),
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((line, ""));

        match name.to_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "play" | "p" => {
                if rest.is_empty() {
                    Err(ParseError::MissingArgument("play"))
                } else {
                    Ok(Self::Play(rest.to_string()))
                }
            }
            "skip" | "s" => match rest {
                "" => Ok(Self::Skip(None)),
                index => positive(index).map(|n| Self::Skip(Some(n))),
            },
            "queue" | "q" => match rest {
                "" => Ok(Self::Queue(1)),
                page => positive(page).map(Self::Queue),
            },
            "now" | "np" => Ok(Self::NowPlaying),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            "shuffle" => Ok(Self::Shuffle),
            "loop" => match rest.to_lowercase().as_str() {
                "track" => Ok(Self::Loop(LoopMode::Track)),
                "queue" => Ok(Self::Loop(LoopMode::Queue)),
                "" => Err(ParseError::MissingArgument("loop")),
                other => Err(ParseError::InvalidLoopMode(other.to_string())),
            },
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

pub fn help_text() -> &'static str {
    "Commands:\n  \
    play <url or search>   queue a track or playlist\n  \
    skip [index]           skip the current track or a queued one\n  \
    queue [page]           show the queue\n  \
    now                    show the current track\n  \
    pause | resume         pause or resume playback\n  \
    stop                   stop and clear the queue\n  \
    shuffle                toggle shuffle\n  \
    loop track|queue       toggle track or queue loop\n  \
    quit                   leave"
}
