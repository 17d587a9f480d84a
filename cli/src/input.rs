//! Line commands read from stdin.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use warden_lsp::{Position, Range};

pub const HELP: &str = "\
commands:
  deglob <path> <line>:<col> <line>:<col>   expand the glob import in the range (1-based)
  restart                                   stop and relaunch the server
  status                                    show session state
  help                                      show this text
  quit                                      shut down and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Deglob { path: PathBuf, range: Range },
    Restart,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
///
/// Relative paths are resolved against `workspace_root`.
pub fn parse_line(line: &str, workspace_root: &Path) -> Result<Option<InputCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "deglob" => {
            let (Some(path), Some(start), Some(end), None) =
                (words.next(), words.next(), words.next(), words.next())
            else {
                bail!("usage: deglob <path> <line>:<col> <line>:<col>");
            };
            let range = Range {
                start: parse_position(start)?,
                end: parse_position(end)?,
            };
            if range.end < range.start {
                bail!("range end {end} is before start {start}");
            }
            InputCommand::Deglob {
                path: workspace_root.join(path),
                range,
            }
        }
        "restart" => InputCommand::Restart,
        "status" => InputCommand::Status,
        "help" | "?" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        other => bail!("unknown command {other:?} (try `help`)"),
    };

    if !matches!(command, InputCommand::Deglob { .. }) && words.next().is_some() {
        bail!("{verb} takes no arguments");
    }
    Ok(Some(command))
}

/// `line:col`, both 1-based, to a zero-based protocol position.
fn parse_position(text: &str) -> Result<Position> {
    let (line, col) = text
        .split_once(':')
        .with_context(|| format!("expected <line>:<col>, got {text:?}"))?;
    let line: u32 = line
        .parse()
        .with_context(|| format!("invalid line in {text:?}"))?;
    let col: u32 = col
        .parse()
        .with_context(|| format!("invalid column in {text:?}"))?;
    if line == 0 || col == 0 {
        bail!("line and column start at 1, got {text:?}");
    }
    Ok(Position::new(line - 1, col - 1))
}
