use std::io::{self, IsTerminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    /// `Auto` colors only when stdout is a terminal.
    #[must_use]
    pub fn enabled(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => io::stdout().is_terminal(),
        }
    }
}

/// How a plan or provisioning report is rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub color: ColorChoice,
    /// Show dependencies, unchanged steps and full error details.
    pub verbose: bool,
    /// Stack name printed in the header line.
    pub stack: Option<String>,
}

impl RenderOptions {
    #[must_use]
    pub fn for_stack(stack: impl Into<String>) -> Self {
        Self {
            stack: Some(stack.into()),
            ..Self::default()
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            color: ColorChoice::Auto,
            verbose: false,
            stack: None,
        }
    }
}
