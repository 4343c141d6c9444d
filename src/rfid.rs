//! RFID check-in. A keyboard-wedge reader types the tag and presses Enter;
//! each Enter submits whatever was typed since the last one.

use crate::error::{Error, Result};
use crate::model::EventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Closed,
    Scanning,
    Submitting,
}

#[derive(Debug, Clone, Default)]
pub struct CheckInSession {
    state: ScanState,
    buffer: String,
    event: Option<EventId>,
}

impl CheckInSession {
    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != ScanState::Closed
    }

    pub fn event(&self) -> Option<&EventId> {
        self.event.as_ref()
    }

    /// Starts scanning for `event`. Without an event there is nothing to
    /// check in to.
    pub fn open(&mut self, event: Option<&EventId>) -> Result<()> {
        let event = event.ok_or(Error::NoEventSelected)?;
        self.event = Some(event.clone());
        self.buffer.clear();
        self.state = ScanState::Scanning;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = ScanState::Closed;
        self.buffer.clear();
        self.event = None;
    }

    /// A keystroke from the reader. Ignored unless scanning.
    pub fn push(&mut self, c: char) {
        if self.state == ScanState::Scanning && !c.is_control() {
            self.buffer.push(c);
        }
    }

    /// Enter. Returns the tag to submit and moves to `Submitting`; a blank
    /// buffer submits nothing. The buffer is emptied either way.
    pub fn submit(&mut self) -> Option<String> {
        if self.state != ScanState::Scanning {
            return None;
        }
        let tag = std::mem::take(&mut self.buffer).trim().to_string();
        if tag.is_empty() {
            return None;
        }
        self.state = ScanState::Submitting;
        Some(tag)
    }

    /// A whole line from the reader, as typed keys followed by Enter.
    pub fn feed_line(&mut self, line: &str) -> Option<String> {
        line.chars().for_each(|c| self.push(c));
        self.submit()
    }

    /// The request for the last tag finished, whatever its outcome. The
    /// session stays open for the next tap.
    pub fn finish(&mut self) {
        if self.state == ScanState::Submitting {
            self.state = ScanState::Scanning;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_an_event() {
        let mut s = CheckInSession::default();
        assert!(matches!(s.open(None), Err(Error::NoEventSelected)));
        assert_eq!(s.state(), ScanState::Closed);
        assert_eq!(s.feed_line("ABC"), None);
    }

    #[test]
    fn tap_cycle_returns_to_scanning() {
        let mut s = CheckInSession::default();
        s.open(Some(&EventId::from("4"))).unwrap();
        assert_eq!(s.feed_line("  0012345\r"), Some("0012345".to_string()));
        assert_eq!(s.state(), ScanState::Submitting);
        // keys typed while a request is out are dropped
        s.push('9');
        s.finish();
        assert_eq!(s.state(), ScanState::Scanning);
        assert_eq!(s.feed_line("777"), Some("777".to_string()));
    }

    #[test]
    fn blank_enter_is_ignored() {
        let mut s = CheckInSession::default();
        s.open(Some(&EventId::from("4"))).unwrap();
        assert_eq!(s.feed_line("   "), None);
        assert_eq!(s.state(), ScanState::Scanning);
        s.close();
        assert!(!s.is_open());
        assert!(s.event().is_none());
    }
}
