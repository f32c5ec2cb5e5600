//! Failure diagnostics: attributes a failing test to a source line.
//!
//! Traces are newline-separated frames of the form
//! `Class.<Name>.<Method>: line <N>, column <M>`. Only frames in user
//! classes can be attributed; anything else (triggers, anonymous blocks,
//! platform frames) is skipped. When no frame qualifies the line number is
//! left empty rather than guessed.

use glob::Pattern;
use tracing::{debug, warn};

use crate::config::DiagnosticsConfig;
use crate::error::{Error, Result};
use crate::models::FailureDiagnostic;
use crate::runner::local_name;

pub const TRUNCATION_MARKER: &str = " ...[truncated]";

const CLASS_PREFIX: &str = "Class.";

/// One parsed stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame name as written, e.g. `Class.ContactManagerTest.makeData`.
    pub name: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl Frame {
    fn parse(text: &str) -> Option<Self> {
        let (name, position) = text.trim().rsplit_once(": line ")?;
        let (line, column) = match position.split_once(',') {
            Some((line, rest)) => (line, rest.trim().strip_prefix("column ")),
            None => (position, None),
        };
        Some(Self {
            name: name.trim().to_string(),
            line: line.trim().parse().ok()?,
            column: column.and_then(|c| c.trim().parse().ok()),
        })
    }

    /// `Class.Method` without the frame-kind prefix, for user class frames.
    pub fn location(&self) -> Option<&str> {
        self.name.strip_prefix(CLASS_PREFIX)
    }
}

/// Parse every recognisable frame. A non-empty trace with no recognisable
/// frame is malformed.
pub fn parse_frames(trace: &str) -> Result<Vec<Frame>> {
    let frames: Vec<Frame> = trace.lines().filter_map(Frame::parse).collect();
    if frames.is_empty() && !trace.trim().is_empty() {
        let first = trace.lines().next().unwrap_or_default();
        return Err(Error::MalformedStackTrace(first.to_string()));
    }
    Ok(frames)
}

pub struct StackTraceAnalyzer {
    message_cap: usize,
    platform_frames: Vec<Pattern>,
}

impl StackTraceAnalyzer {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        let platform_frames = config
            .platform_frames
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid platform frame pattern");
                    None
                }
            })
            .collect();
        Self {
            message_cap: config.message_cap,
            platform_frames,
        }
    }

    pub fn analyze(&self, raw_trace: &str, raw_message: &str) -> FailureDiagnostic {
        self.analyze_in(raw_trace, raw_message, &[])
    }

    /// Like [`analyze`](Self::analyze), preferring frames in `run_classes`.
    ///
    /// Frames in other user classes (helpers, managed packages outside the
    /// platform list) are used only when no frame of a run class qualifies.
    pub fn analyze_in(
        &self,
        raw_trace: &str,
        raw_message: &str,
        run_classes: &[String],
    ) -> FailureDiagnostic {
        let (message, message_truncated) = truncate(raw_message, self.message_cap);
        let mut diagnostic = FailureDiagnostic {
            message,
            message_truncated,
            stack_trace: raw_trace.to_string(),
            ..Default::default()
        };

        let frames = match parse_frames(raw_trace) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(error = %e, "no line attribution");
                return diagnostic;
            }
        };

        let mut candidates = frames.iter().filter(|f| self.is_attributable(f));
        let chosen = candidates
            .clone()
            .find(|f| in_run_classes(f, run_classes))
            .or_else(|| candidates.next());
        if let Some(frame) = chosen {
            diagnostic.line = Some(frame.line);
            diagnostic.column = frame.column;
            diagnostic.location = frame.location().map(str::to_string);
        }
        diagnostic
    }

    fn is_attributable(&self, frame: &Frame) -> bool {
        let Some(location) = frame.location() else {
            return false;
        };
        !self
            .platform_frames
            .iter()
            .any(|p| p.matches(&frame.name) || p.matches(location))
    }
}

impl Default for StackTraceAnalyzer {
    fn default() -> Self {
        Self::new(&DiagnosticsConfig::default())
    }
}

/// Whether the frame's class part (everything before the method) names one
/// of the run's classes. Namespace prefixes and outer classes are ignored.
fn in_run_classes(frame: &Frame, run_classes: &[String]) -> bool {
    let Some((class_part, _method)) = frame.location().and_then(|l| l.rsplit_once('.')) else {
        return false;
    };
    class_part
        .split('.')
        .any(|segment| run_classes.iter().any(|c| local_name(c) == segment))
}

/// Cut `message` to `cap` characters, appending the marker when cut.
fn truncate(message: &str, cap: usize) -> (String, bool) {
    match message.char_indices().nth(cap) {
        Some((idx, _)) => (format!("{}{}", &message[..idx], TRUNCATION_MARKER), true),
        None => (message.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> StackTraceAnalyzer {
        StackTraceAnalyzer::default()
    }

    #[test]
    fn test_single_frame() {
        let d = analyzer().analyze(
            "Class.ContactManagerTest.makeData: line 17, column 1",
            "System.AssertException: Assertion Failed",
        );
        assert_eq!(d.line, Some(17));
        assert_eq!(d.column, Some(1));
        assert_eq!(d.location.as_deref(), Some("ContactManagerTest.makeData"));
        assert!(!d.message_truncated);
    }

    #[test]
    fn test_first_user_frame_wins() {
        let trace = "Trigger.ContactTrigger: line 4, column 1\n\
                     Class.ContactHelper.validate: line 42, column 9\n\
                     Class.ContactManagerTest.makeData: line 17, column 1";
        let d = analyzer().analyze(trace, "boom");
        assert_eq!(d.line, Some(42));
        assert_eq!(d.location.as_deref(), Some("ContactHelper.validate"));
    }

    #[test]
    fn test_platform_frames_are_skipped() {
        let config = DiagnosticsConfig {
            platform_frames: vec!["Class.fflib_*".into()],
            ..Default::default()
        };
        let trace = "Class.fflib_SObjectDomain.handle: line 300, column 1\n\
                     Class.AccountsTest.insertsAccounts: line 8, column 1";
        let d = StackTraceAnalyzer::new(&config).analyze(trace, "boom");
        assert_eq!(d.line, Some(8));
    }

    #[test]
    fn test_unrecognised_trace_leaves_line_absent() {
        let d = analyzer().analyze("something went wrong somewhere", "boom");
        assert_eq!(d.line, None);
        assert_eq!(d.location, None);
        assert_eq!(d.stack_trace, "something went wrong somewhere");
    }

    #[test]
    fn test_empty_trace_leaves_line_absent() {
        let d = analyzer().analyze("", "boom");
        assert_eq!(d.line, None);
        assert!(parse_frames("").unwrap().is_empty());
    }

    #[test]
    fn test_only_non_class_frames_leaves_line_absent() {
        let d = analyzer().analyze("AnonymousBlock: line 1, column 1", "boom");
        assert_eq!(d.line, None);
    }

    #[test]
    fn test_malformed_trace_is_reported() {
        assert!(matches!(
            parse_frames("garbage"),
            Err(Error::MalformedStackTrace(_))
        ));
    }

    #[test]
    fn test_frame_without_column() {
        let frame = Frame::parse("Class.Foo.bar: line 3").unwrap();
        assert_eq!(frame.line, 3);
        assert_eq!(frame.column, None);
    }

    #[test]
    fn test_long_message_is_truncated_with_marker() {
        let config = DiagnosticsConfig {
            message_cap: 5,
            ..Default::default()
        };
        let d = StackTraceAnalyzer::new(&config).analyze("", "abcdefghij");
        assert_eq!(d.message, format!("abcde{}", TRUNCATION_MARKER));
        assert!(d.message_truncated);
    }

    #[test]
    fn test_message_at_cap_is_untouched() {
        let config = DiagnosticsConfig {
            message_cap: 5,
            ..Default::default()
        };
        let d = StackTraceAnalyzer::new(&config).analyze("", "héllo");
        assert_eq!(d.message, "héllo");
        assert!(!d.message_truncated);
    }

    #[test]
    fn test_remote_truncation_marker_is_preserved() {
        let d = analyzer().analyze("", "List index out of bounds: 3 (...)");
        assert_eq!(d.message, "List index out of bounds: 3 (...)");
    }

    #[test]
    fn test_run_class_frame_beats_unlisted_package_frame() {
        let trace = "Class.fflib_SObjectDomain.handleAfterInsert: line 210, column 1\n\
                     Class.ContactManagerTest.makeData: line 17, column 1";
        let run = vec!["ContactManagerTest".to_string()];

        let d = analyzer().analyze_in(trace, "boom", &run);
        assert_eq!(d.line, Some(17));
        assert_eq!(d.location.as_deref(), Some("ContactManagerTest.makeData"));

        let d = analyzer().analyze(trace, "boom");
        assert_eq!(d.line, Some(210));
    }

    #[test]
    fn test_run_class_match_ignores_namespace() {
        let trace = "Class.Helper.go: line 3, column 1\n\
                     Class.acme.BillingTest.run: line 9, column 5";
        let run = vec!["acme.BillingTest".to_string()];
        let d = analyzer().analyze_in(trace, "boom", &run);
        assert_eq!(d.line, Some(9));
    }

    #[test]
    fn test_falls_back_to_first_user_frame_outside_run() {
        let trace = "Class.Helper.go: line 3, column 1";
        let run = vec!["ContactManagerTest".to_string()];
        let d = analyzer().analyze_in(trace, "boom", &run);
        assert_eq!(d.line, Some(3));
    }
}
