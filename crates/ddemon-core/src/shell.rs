//! Remote shell output classification
//!
//! Output of `pm install` / `am start` on a device is not a structured
//! protocol. Classification is line-oriented and best-effort: every line is
//! kept for display, and two known patterns extract a failure reason and a
//! numeric error type. Unrecognized lines never fail the command.

use regex::Regex;
use std::sync::LazyLock;

/// Sentinel error type meaning "no error reported"
pub const NO_ERROR: i32 = -1;

/// `pm install` reports this while the package manager is still starting up.
/// Retryable.
pub const INSTALL_NOT_READY: i32 = 1;

/// `am start` reports this while the activity manager is not ready yet.
/// Retryable.
pub const ACTIVITY_MANAGER_NOT_READY: i32 = 2;

/// Failure reason emitted when the package is already installed.
/// Recovered by a one-shot `pm install -r` reinstall.
pub const INSTALL_FAILED_ALREADY_EXISTS: &str = "INSTALL_FAILED_ALREADY_EXISTS";

/// Matches e.g. `Failure [INSTALL_FAILED_ALREADY_EXISTS]`
static FAILURE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Failure\s+\[(.*)\]$").expect("Invalid failure pattern regex"));

/// Matches e.g. `Error type 2` / `Error Type 2 (...)`
static ERROR_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Error\s+[Tt]ype\s+(\d+).*$").expect("Invalid error type pattern regex")
});

/// Classified output of a single remote shell command.
///
/// Produced fresh for every invocation; a retry loop must never reuse a
/// result from a previous attempt.
#[derive(Debug, Clone)]
pub struct RemoteCommandResult {
    /// Parsed `Error type N`, or [`NO_ERROR`] if none was reported
    pub error_type: i32,
    /// Capture of `Failure [reason]`, if any line matched
    pub failure_message: Option<String>,
    /// Every output line, matched or not, in original order
    pub output: Vec<String>,
}

impl Default for RemoteCommandResult {
    fn default() -> Self {
        Self {
            error_type: NO_ERROR,
            failure_message: None,
            output: Vec::new(),
        }
    }
}

impl RemoteCommandResult {
    /// Classify raw command output, splitting at any run of `\r`/`\n`.
    /// `\r\n` is one line break, not two.
    pub fn classify(raw: &str) -> Self {
        let mut result = Self::default();
        for line in raw.split(['\r', '\n']).filter(|line| !line.is_empty()) {
            result.push_line(line);
        }
        result
    }

    /// Feed a single line into the classifier.
    ///
    /// Empty lines are recorded for display but skipped for pattern matching.
    pub fn push_line(&mut self, line: &str) {
        if !line.is_empty() {
            if let Some(caps) = FAILURE_PATTERN.captures(line) {
                self.failure_message = Some(caps[1].to_string());
            }
            if let Some(caps) = ERROR_TYPE_PATTERN.captures(line) {
                if let Ok(code) = caps[1].parse() {
                    self.error_type = code;
                }
            }
        }
        self.output.push(line.to_string());
    }

    /// Command completed without any device-reported error
    pub fn succeeded(&self) -> bool {
        self.error_type == NO_ERROR && self.failure_message.is_none()
    }

    /// Package manager is not ready yet; install may be retried
    pub fn is_install_busy(&self) -> bool {
        self.error_type == INSTALL_NOT_READY
    }

    /// Activity manager is not ready yet; launch may be retried
    pub fn is_launch_busy(&self) -> bool {
        self.error_type == ACTIVITY_MANAGER_NOT_READY
    }

    /// The install failed because the package already exists on the device
    pub fn is_already_installed(&self) -> bool {
        self.failure_message.as_deref() == Some(INSTALL_FAILED_ALREADY_EXISTS)
    }

    /// Full output joined with newlines, for console display
    pub fn display_output(&self) -> String {
        let mut text = self.output.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}
