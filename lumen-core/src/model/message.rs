//! A single displayable wall message and its formatting.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Formatting ───────────────────────────────────────────────────

/// RGBA color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FontWeight {
    Light,
    #[default]
    Regular,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TextAlignment {
    Left,
    #[default]
    Center,
    Right,
}

/// How the message enters the wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AnimationKind {
    #[default]
    None,
    FadeIn,
    SlideIn,
    Typewriter,
    Pulse,
}

/// Outline drawn around the glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub width: f32,
    pub color: Color,
}

/// Drop shadow behind the glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub radius: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub color: Color,
}

/// Full formatting for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStyle {
    pub font_size: f32,
    pub weight: FontWeight,
    pub alignment: TextAlignment,
    pub fill: Color,
    pub background: Option<Color>,
    pub stroke: Option<Stroke>,
    pub shadow: Option<Shadow>,
    pub animation: AnimationKind,
}

impl Default for MessageStyle {
    fn default() -> Self {
        Self {
            font_size: 48.0,
            weight: FontWeight::default(),
            alignment: TextAlignment::default(),
            fill: Color::WHITE,
            background: None,
            stroke: None,
            shadow: None,
            animation: AnimationKind::default(),
        }
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One queued wall message.
///
/// `display_duration` is in seconds; `None` means the message stays up
/// until something replaces or clears it. Absent means indefinite, not
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub style: MessageStyle,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub sent: bool,
    pub last_sent: Option<DateTime<Utc>>,
    pub display_duration: Option<f32>,
}

impl Message {
    /// Create an unsent message with default formatting.
    pub fn new(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            style: MessageStyle::default(),
            created_at: now,
            modified_at: now,
            sent: false,
            last_sent: None,
            display_duration: None,
        }
    }

    /// Set the formatting (builder style).
    pub fn with_style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }

    /// Set the display duration in seconds (builder style).
    pub fn with_duration(mut self, seconds: f32) -> Self {
        self.display_duration = Some(seconds);
        self
    }

    /// Record that this message was dispatched to the wall at `at`.
    ///
    /// Idempotent: applying the same timestamp twice leaves the message
    /// unchanged.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.sent = true;
        self.last_sent = Some(at);
    }

    /// The instant this message should leave the wall.
    ///
    /// Defined only when both `last_sent` and `display_duration` are
    /// present.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        let last = self.last_sent?;
        let secs = self.display_duration?;
        Some(last + TimeDelta::milliseconds((secs * 1000.0) as i64))
    }

    /// Whether the message has passed its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|e| now >= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_unsent() {
        let msg = Message::new("hello");
        assert!(!msg.sent);
        assert!(msg.last_sent.is_none());
        assert!(msg.expiry().is_none());
    }

    #[test]
    fn expiry_requires_both_fields() {
        let mut msg = Message::new("x");
        msg.display_duration = Some(5.0);
        assert!(msg.expiry().is_none());

        let at = Utc::now();
        msg.mark_sent(at);
        assert_eq!(msg.expiry(), Some(at + TimeDelta::milliseconds(5000)));

        let mut indefinite = Message::new("y");
        indefinite.mark_sent(at);
        assert!(indefinite.expiry().is_none());
    }

    #[test]
    fn mark_sent_is_idempotent() {
        let mut msg = Message::new("x").with_duration(2.0);
        let at = Utc::now();
        msg.mark_sent(at);
        let snapshot = msg.clone();
        msg.mark_sent(at);
        assert_eq!(msg, snapshot);
    }

    #[test]
    fn is_expired_boundaries() {
        let mut msg = Message::new("x").with_duration(1.0);
        let at = Utc::now();
        msg.mark_sent(at);
        assert!(!msg.is_expired(at));
        assert!(msg.is_expired(at + TimeDelta::milliseconds(1000)));
    }
}
