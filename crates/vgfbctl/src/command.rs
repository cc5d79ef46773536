//! Control command parsing.

use thiserror::Error;
use vgfb_device::{Mode, Rect, UnknownMode};

/// Default time `wait` blocks before giving up, in milliseconds
pub const DEFAULT_WAIT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetResolution { width: u32, height: u32 },
    SetDepth(u32),
    SetMode(Mode),
    Map,
    Unmap,
    Wait { timeout_ms: u64 },
    Pan { x: u32, y: u32 },
    Fill { rect: Rect, color: u32 },
    Geometry,
    Stats,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown command \"{0}\"")]
    UnknownCommand(String),

    #[error("Unknown parameter \"{0}\"")]
    UnknownParameter(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number \"{0}\"")]
    InvalidNumber(String),

    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some((name, rest)) = args.split_first() else {
        return Ok(None);
    };

    let command = match *name {
        "set" => parse_set(rest)?,
        "map" => Command::Map,
        "unmap" => Command::Unmap,
        "wait" => match rest {
            [] => Command::Wait {
                timeout_ms: DEFAULT_WAIT_MS,
            },
            [ms] => Command::Wait {
                timeout_ms: number(ms)?,
            },
            _ => return Err(ParseError::Usage("wait [timeout ms]")),
        },
        "pan" => match rest {
            [x, y] => Command::Pan {
                x: number(x)?,
                y: number(y)?,
            },
            _ => return Err(ParseError::Usage("pan <x> <y>")),
        },
        "fill" => match rest {
            [x, y, w, h, color] => Command::Fill {
                rect: Rect::new(number(x)?, number(y)?, number(w)?, number(h)?),
                color: number(color)?,
            },
            _ => return Err(ParseError::Usage("fill <x> <y> <w> <h> <color>")),
        },
        "geometry" => Command::Geometry,
        "stats" => Command::Stats,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_set(args: &[&str]) -> Result<Command, ParseError> {
    match args {
        ["resolution", width, height] => Ok(Command::SetResolution {
            width: number(width)?,
            height: number(height)?,
        }),
        ["resolution", ..] => Err(ParseError::Usage("set resolution <width> <height>")),
        ["depth", bpp] => Ok(Command::SetDepth(number(bpp)?)),
        ["depth", ..] => Err(ParseError::Usage("set depth <bits per pixel>")),
        ["mode", mode] => Ok(Command::SetMode(mode.parse()?)),
        ["mode", ..] => Err(ParseError::Usage("set mode none|normal")),
        [param, ..] => Err(ParseError::UnknownParameter(param.to_string())),
        [] => Err(ParseError::Usage("set <param> <values>")),
    }
}

/// Decimal, or hex with a `0x` prefix.
fn number<T: TryFrom<u64>>(arg: &str) -> Result<T, ParseError> {
    let invalid = || ParseError::InvalidNumber(arg.to_string());
    let value = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
        None => arg.parse::<u64>().map_err(|_| invalid())?,
    };
    T::try_from(value).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse("set resolution 1024 768").unwrap(),
            Some(Command::SetResolution {
                width: 1024,
                height: 768
            })
        );
        assert_eq!(parse("set depth 24").unwrap(), Some(Command::SetDepth(24)));
        assert_eq!(
            parse("set mode none\n").unwrap(),
            Some(Command::SetMode(Mode::None))
        );
    }

    #[test]
    fn test_parse_set_errors() {
        assert!(matches!(
            parse("set resolution 1024"),
            Err(ParseError::Usage(_))
        ));
        assert_eq!(
            parse("set gamma 2"),
            Err(ParseError::UnknownParameter("gamma".to_string()))
        );
        assert!(matches!(
            parse("set mode fancy"),
            Err(ParseError::UnknownMode(_))
        ));
        assert!(matches!(parse("set"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(
            parse("fill 0 0 10 10 0xff00ff").unwrap(),
            Some(Command::Fill {
                rect: Rect::new(0, 0, 10, 10),
                color: 0x00ff_00ff
            })
        );
        assert_eq!(
            parse("pan 0 -1"),
            Err(ParseError::InvalidNumber("-1".to_string()))
        );
        assert_eq!(
            parse("set depth 99999999999"),
            Err(ParseError::InvalidNumber("99999999999".to_string()))
        );
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("wait").unwrap(),
            Some(Command::Wait {
                timeout_ms: DEFAULT_WAIT_MS
            })
        );
        assert_eq!(
            parse("wait 10").unwrap(),
            Some(Command::Wait { timeout_ms: 10 })
        );
        assert_eq!(parse("quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse("reboot"),
            Err(ParseError::UnknownCommand("reboot".to_string()))
        );
    }
}
