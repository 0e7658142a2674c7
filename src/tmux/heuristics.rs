use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of trailing lines inspected for status signals
const RECENT_LINES: usize = 20;

/// Kind of error an agent is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// API rate limit hit
    RateLimit,
    /// Request or connection timed out
    Timeout,
    /// 5xx-class API error or overloaded backend
    ServerError,
    /// Usage quota or credit exhausted
    QuotaExceeded,
    /// Agent process crashed
    Crash,
    /// Content could not be captured or analyzed
    AnalysisFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Crash => "crash",
            ErrorKind::AnalysisFailed => "analysis_failed",
        }
    }

    /// Whether pressing Enter again has a chance of getting the agent going
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::ServerError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled regex patterns for status detection
static RE_COMPACTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(compacting conversation|compacting context|auto-compacting|consolidating (memory|memories|context|conversation)|summarizing conversation)").unwrap()
});

static RE_QUOTA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(quota exceeded|insufficient_quota|usage limit reached|credit balance is too low|limit will reset)").unwrap()
});

static RE_RATE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(rate[ _-]?limit|too many requests|\b429\b)").unwrap()
});

static RE_SERVER_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(api error:?\s*5\d\d|internal server error|service unavailable|bad gateway|gateway timeout|overloaded_error|\b(500|502|503|504|529)\b.{0,20}(error|unavailable|overloaded))").unwrap()
});

static RE_TIMEOUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(request timed out|connection timed out|timeout error|etimedout|\b408\b)").unwrap()
});

static RE_FRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(welcome to claude|/help for help|tips for getting started|how can i help you today)").unwrap()
});

static RE_SHELL_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+@[\w.-]+(:\S*)?\s*[$#%]|bash-[\d.]+[$#]|[$#%❯➜])\s*$").unwrap()
});

static RE_AGENT_UI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(│\s*>|╭─|\? for shortcuts|esc to interrupt|bypass permissions|auto-accept edits)").unwrap()
});

static RE_ERROR_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(error|err!|\[error\]|✗)[:\s]").unwrap()
});

/// Crash signatures with the reason reported for each
static CRASH_SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Traceback \(most recent call last\)", "python traceback"),
        (r"panicked at", "panic"),
        (r"(?i)segmentation fault|core dumped", "segmentation fault"),
        (r"(?mi)^\s*fatal( error)?:", "fatal error"),
        (r"(?m)^\s*Killed\s*$", "process killed"),
        (
            r"(?i)\b(claude|agent|process) (exited|terminated) with (code|status|signal)",
            "agent process exited",
        ),
        (
            r"(?i)(command not found: claude|claude: command not found)",
            "agent command not found",
        ),
        (
            r"(?i)(unhandled (promise )?rejection|uncaught exception)",
            "uncaught exception",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).unwrap(), reason))
    .collect()
});

/// Pattern checks over captured pane content
pub struct ContentSignals;

impl ContentSignals {
    /// The trailing lines of `content`, where current status shows up.
    /// Blank rows tmux pads an unfilled pane with are skipped first.
    pub fn recent(content: &str) -> String {
        let lines: Vec<&str> = content.lines().collect();
        let end = lines
            .iter()
            .rposition(|line| !line.trim().is_empty())
            .map_or(0, |i| i + 1);
        lines[end.saturating_sub(RECENT_LINES)..end].join("\n")
    }

    /// Agent is compacting or consolidating its context
    pub fn is_compacting(content: &str) -> bool {
        RE_COMPACTING.is_match(&Self::recent(content))
    }

    /// Known API error phrase in the recent output
    pub fn api_error(content: &str) -> Option<ErrorKind> {
        let recent = Self::recent(content);

        // Priority order: Quota > RateLimit > ServerError > Timeout
        if RE_QUOTA.is_match(&recent) {
            return Some(ErrorKind::QuotaExceeded);
        }
        if RE_RATE_LIMIT.is_match(&recent) {
            return Some(ErrorKind::RateLimit);
        }
        if RE_SERVER_ERROR.is_match(&recent) {
            return Some(ErrorKind::ServerError);
        }
        if RE_TIMEOUT.is_match(&recent) {
            return Some(ErrorKind::Timeout);
        }
        None
    }

    /// Agent is showing its startup greeting
    pub fn is_fresh(content: &str) -> bool {
        RE_FRESH.is_match(&Self::recent(content))
    }

    /// First crash signature found in the recent output
    pub fn crash_signature(content: &str) -> Option<&'static str> {
        let recent = Self::recent(content);
        CRASH_SIGNATURES
            .iter()
            .find(|(re, _)| re.is_match(&recent))
            .map(|(_, reason)| *reason)
    }

    /// Last non-empty line is a bare shell prompt
    pub fn ends_at_shell_prompt(content: &str) -> bool {
        content
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| RE_SHELL_PROMPT.is_match(line))
            .unwrap_or(false)
    }

    /// Agent's interactive UI is still on screen
    pub fn has_agent_ui(content: &str) -> bool {
        RE_AGENT_UI.is_match(&Self::recent(content))
    }

    /// An error banner line is visible
    pub fn has_error_banner(content: &str) -> bool {
        RE_ERROR_BANNER.is_match(&Self::recent(content))
    }
}
