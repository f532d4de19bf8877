use chrono::{DateTime, Local};
use std::fmt;

/// A publish received from the broker, as handed to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(64).collect();
        let ellipsis = if text.chars().count() > 64 { "..." } else { "" };
        write!(
            f,
            "{} {}{} - {}{}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            if self.retained { " (retained)" } else { "" },
            preview,
            ellipsis
        )
    }
}

impl InboundFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        InboundFrame {
            topic: topic.into(),
            payload: payload.into(),
            retained,
            received_at: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_long_payloads() {
        let frame = InboundFrame::new("onehome_ctrl", vec![b'x'; 200], false);
        let rendered = frame.to_string();
        assert!(rendered.contains("onehome_ctrl"));
        assert!(rendered.ends_with("..."));
        assert!(rendered.len() < 120);
    }

    #[test]
    fn display_marks_retained_frames() {
        let frame = InboundFrame::new("onehome_ctrl", "{}", true);
        assert!(frame.to_string().contains("(retained)"));
    }
}
