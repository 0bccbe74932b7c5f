//! Line protocol spoken with the window-embedding helper.
//!
//! Host to helper (stdin): `bounds <x> <y> <w> <h>`, `hide`, `show`, `exit`.
//! Helper to host (stdout): `ready` or `error:<message>`.

use std::fmt;

use crate::geometry::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCommand {
    Bounds(Bounds),
    Hide,
    Show,
    Exit,
}

impl fmt::Display for HelperCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelperCommand::Bounds(b) => write!(f, "bounds {} {} {} {}", b.x, b.y, b.width, b.height),
            HelperCommand::Hide => f.write_str("hide"),
            HelperCommand::Show => f.write_str("show"),
            HelperCommand::Exit => f.write_str("exit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperLine {
    Ready,
    /// The whole trimmed `error:...` line.
    Error(String),
    /// Anything else; logged and otherwise ignored.
    Other(String),
}

impl HelperLine {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed == "ready" {
            HelperLine::Ready
        } else if trimmed.starts_with("error:") {
            HelperLine::Error(trimmed.to_string())
        } else {
            HelperLine::Other(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_render_as_lines() {
        let b = Bounds { x: 0, y: 60, width: 1920, height: 1020 };
        assert_eq!(HelperCommand::Bounds(b).to_string(), "bounds 0 60 1920 1020");
        assert_eq!(HelperCommand::Hide.to_string(), "hide");
        assert_eq!(HelperCommand::Show.to_string(), "show");
        assert_eq!(HelperCommand::Exit.to_string(), "exit");
    }

    #[test]
    fn parses_helper_output() {
        assert_eq!(HelperLine::parse("ready\r"), HelperLine::Ready);
        assert_eq!(
            HelperLine::parse("  error:permission-denied "),
            HelperLine::Error("error:permission-denied".into())
        );
        assert_eq!(
            HelperLine::parse("found window 0x1234"),
            HelperLine::Other("found window 0x1234".into())
        );
        // Case matters, as it does for the helper.
        assert!(matches!(HelperLine::parse("READY"), HelperLine::Other(_)));
    }
}
