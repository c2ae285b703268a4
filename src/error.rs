//! Stage tags shared by every pipeline step.
//!
//! Each module owns its own `thiserror` enum. When an error leaves a stage,
//! the orchestrator pins it to the [`Stage`] it came from, so the CLI and
//! the watch loop can always say *where* a build failed, not just *what*
//! the raw message was.

use std::fmt;
use thiserror::Error;

/// A named step of the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Bibliography,
    Assets,
    Template,
    Render,
    Write,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Bibliography => "bibliography",
            Self::Assets => "assets",
            Self::Template => "template",
            Self::Render => "render",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A fatal failure, tagged with the stage that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{stage}] {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }
}

/// A recoverable problem. The build carried on with a substitute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

impl Warning {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_display_names_stage() {
        let err = StageError::new(Stage::Template, "undefined value `cv.name`");
        assert_eq!(err.to_string(), "[template] undefined value `cv.name`");
    }

    #[test]
    fn warning_display_names_stage() {
        let w = Warning::new(Stage::Assets, "icon missing");
        assert_eq!(w.to_string(), "[assets] icon missing");
    }

    #[test]
    fn stage_error_boxes_as_std_error() {
        let err: Box<dyn std::error::Error> =
            Box::new(StageError::new(Stage::Write, "disk full"));
        assert_eq!(err.to_string(), "[write] disk full");
    }
}
