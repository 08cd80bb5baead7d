//! # Chat Log
//!
//! Bounded log of chat lines and announcements. Lines age every frame and
//! hide after a while; the front end decides whether to show hidden lines
//! (scoreboard open, round stopped).

use std::collections::VecDeque;

use horus_shared::constants::{CHAT_CAPACITY, CHAT_VISIBLE_SECS};
use horus_shared::PeerId;
use tracing::debug;

use crate::registry::PlayerRegistry;

/// One line in the log.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLine {
    /// Author name at the time the line was logged.
    pub author: String,
    /// Text.
    pub text: String,
    /// Announcement rather than player chat.
    pub system: bool,
    /// Displayed without the author's name.
    pub sourceless: bool,
    /// Seconds since the line was logged.
    pub age: f32,
    /// Aged out or hidden by a round restart.
    pub hidden: bool,
}

impl ChatLine {
    /// Display form: `AUTHOR: text`, or just the text when sourceless.
    #[must_use]
    pub fn display(&self) -> String {
        if self.sourceless {
            self.text.clone()
        } else {
            format!("{}: {}", self.author.to_uppercase(), self.text)
        }
    }
}

/// Chat history of one peer.
#[derive(Debug)]
pub struct ChatLog {
    lines: VecDeque<ChatLine>,
    capacity: usize,
    visible_secs: f32,
}

impl ChatLog {
    /// Creates a log with the stock limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(CHAT_CAPACITY, CHAT_VISIBLE_SECS)
    }

    /// Creates a log keeping `capacity` lines visible for `visible_secs`.
    #[must_use]
    pub fn with_limits(capacity: usize, visible_secs: f32) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            visible_secs,
        }
    }

    /// Logs a line from `peer`. Lines naming an unregistered peer are
    /// dropped; sourceless announcements are always kept. Returns whether
    /// the line was kept.
    pub fn log(
        &mut self,
        registry: &PlayerRegistry,
        peer: PeerId,
        text: &str,
        system: bool,
        sourceless: bool,
    ) -> bool {
        let author = match registry.username(peer) {
            Some(name) => name.to_owned(),
            None if sourceless => String::new(),
            None => {
                debug!(%peer, "dropping chat from unregistered peer");
                return false;
            }
        };
        self.push(ChatLine {
            author,
            text: text.to_owned(),
            system,
            sourceless,
            age: 0.0,
            hidden: false,
        });
        true
    }

    /// Logs a local, sourceless notice (command feedback, level changes).
    pub fn notice(&mut self, text: &str) {
        self.push(ChatLine {
            author: String::new(),
            text: text.to_owned(),
            system: true,
            sourceless: true,
            age: 0.0,
            hidden: false,
        });
    }

    fn push(&mut self, line: ChatLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Ages every line by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        for line in &mut self.lines {
            line.age += dt;
            if line.age > self.visible_secs {
                line.hidden = true;
            }
        }
    }

    /// Hides every line (round restart).
    pub fn hide_all(&mut self) {
        for line in &mut self.lines {
            line.hidden = true;
        }
    }

    /// All lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter()
    }

    /// Lines that are not hidden, oldest first.
    pub fn visible(&self) -> impl Iterator<Item = &ChatLine> {
        self.lines.iter().filter(|line| !line.hidden)
    }

    /// Most recent line.
    #[must_use]
    pub fn last(&self) -> Option<&ChatLine> {
        self.lines.back()
    }

    /// Number of lines kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Forgets every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PlayerInfo;
    use horus_shared::Vec3;

    fn registry() -> PlayerRegistry {
        let mut registry = PlayerRegistry::new();
        registry.register(
            PeerId(1),
            PlayerInfo {
                username: "ana".into(),
                guid: "g1".into(),
                color: Vec3::ZERO,
                spectating: false,
            },
        );
        registry
    }

    #[test]
    fn test_unregistered_authors_dropped() {
        let mut chat = ChatLog::new();
        assert!(!chat.log(&registry(), PeerId(9), "hi", false, false));
        assert!(chat.is_empty());
        assert!(chat.log(&registry(), PeerId::SERVER, "Round over!", true, true));
        assert_eq!(chat.last().map(ChatLine::display), Some("Round over!".into()));
        assert!(chat.log(&registry(), PeerId(1), "hi", false, false));
        assert_eq!(chat.last().map(ChatLine::display), Some("ANA: hi".into()));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut chat = ChatLog::with_limits(2, 15.0);
        chat.notice("a");
        chat.notice("b");
        chat.notice("c");
        let texts: Vec<_> = chat.lines().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["b", "c"]);
    }

    #[test]
    fn test_lines_hide_after_timeout_and_on_restart() {
        let mut chat = ChatLog::new();
        chat.notice("old");
        chat.update(16.0);
        chat.notice("new");
        assert_eq!(chat.visible().count(), 1);
        chat.hide_all();
        assert_eq!(chat.visible().count(), 0);
        assert_eq!(chat.len(), 2);
    }
}
