#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tmux command failed: {0}")]
    CommandFailed(String),
    #[error("parse error at line {line_num}: {detail}")]
    ParseError { line_num: usize, detail: String },
    #[error("pane not found: {0}")]
    PaneNotFound(String),
}
