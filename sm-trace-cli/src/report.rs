//! Notice rendering
//!
//! Text mode renders through the library's `TraceSink` callbacks; JSON mode
//! writes each notice as one JSON line.

use sm_trace::{
    Address, Highlight, InstanceChange, Notice, ReplayEntry, ReplayOutcome, SessionEnd, TraceSink,
    WarningKind,
};
use std::io::Write;

/// Human-readable line renderer
pub struct TextReport<W: Write> {
    out: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            log::error!("Failed to write report line: {}", e);
        }
    }
}

impl<W: Write> TraceSink for TextReport<W> {
    fn on_session_opened(&mut self, hash: u32, source: &str) {
        self.line(format_args!("== target opened '{}' (hash {:#010x})", source, hash));
    }

    fn on_identity_mismatch(&mut self, expected: &str, actual: &str) {
        self.line(format_args!(
            "!! target runs '{}' but the loaded diagram is '{}'",
            actual, expected
        ));
    }

    fn on_instance(&mut self, change: InstanceChange, address: Address, type_name: &str) {
        let sign = match change {
            InstanceChange::Added => '+',
            InstanceChange::Removed => '-',
        };
        self.line(format_args!("{} instance {} {}", sign, address, type_name));
    }

    fn on_replay(&mut self, address: Address, entry: &ReplayEntry) {
        let detail = match &entry.outcome {
            ReplayOutcome::Matched { from, transition, to } => {
                format!("{} -> {} via {}", from, to, transition)
            }
            ReplayOutcome::Unmatched { state } => format!("not handled in {}", state),
        };
        self.line(format_args!(
            "  [{}#{}] {} ({}): {}",
            address, entry.ordinal, entry.event_name, entry.event_id, detail
        ));
    }

    fn on_highlight(&mut self, highlight: Option<&Highlight>) {
        if highlight.is_none() {
            self.line(format_args!("  (highlight cleared)"));
        }
    }

    fn on_warning(&mut self, kind: WarningKind, message: &str) {
        self.line(format_args!("warning [{}]: {}", kind, message));
    }

    fn on_session_end(&mut self, end: &SessionEnd) {
        self.line(format_args!(
            "== session ended at {}: {}",
            end.ended_at.format("%H:%M:%S%.3f"),
            end.reason
        ));
        self.line(format_args!(
            "   frames: {}  events: {}  diagnostics: {}  unknown: {}  warnings: {}",
            end.stats.frames,
            end.stats.events_fired,
            end.stats.diagnostics,
            end.stats.unknown_frames,
            end.stats.warnings
        ));
    }
}

/// Write each notice as a single JSON line
pub fn write_json_lines(out: &mut impl Write, notices: &[Notice]) -> anyhow::Result<()> {
    for notice in notices {
        serde_json::to_writer(&mut *out, notice)?;
        writeln!(out)?;
    }
    Ok(())
}
