//! Event types carried by the event bus.
//!
//! Every event has a slash-delimited routing path. Handlers subscribe by
//! path prefix; see [`paths`] for the routes emitted by this crate.

use std::time::Duration;

use chrono::Utc;

use crate::types::Contact;

/// Reserved routing paths.
pub mod paths {
    /// Prefix shared by all new-message events.
    pub const MSG: &str = "/msg";
    /// New direct (non-group) message.
    pub const MSG_SOLO: &str = "/msg/solo";
    /// New group message.
    pub const MSG_GROUP: &str = "/msg/group";
    /// Prefix shared by all contact events.
    pub const CONTACT: &str = "/contact";
    /// A contact's profile changed.
    pub const CONTACT_MOD: &str = "/contact/mod";
    /// A contact was removed.
    pub const CONTACT_DEL: &str = "/contact/del";
    /// Prefix of recurring interval ticks, followed by the interval.
    pub const TIMER: &str = "/timer";
    /// Prefix of daily scheduled ticks, followed by `HH:MM`.
    pub const TIMING: &str = "/timing";
    /// Login state changed.
    pub const LOGIN: &str = "/login";
    /// Reserved control signal that terminates the bus loop.
    pub const STOP_LOOP: &str = "/sig/stoploop";
}

/// Origin annotation on events decoded from server pushes.
pub const FROM_SERVER: &str = "Server";
/// Destination annotation on events meant for application handlers.
pub const TO_END: &str = "End";

/// Kind of contact change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactChangeKind {
    Modify,
    Delete,
}

/// A contact was modified or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactChange {
    pub kind: ContactChangeKind,
    /// For deletions only `user_name` is populated.
    pub contact: Contact,
}

/// A new message, classified and with the real sender resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageData {
    pub is_group: bool,
    pub is_media: bool,
    pub is_sent_by_myself: bool,
    pub msg_type: i64,
    /// The self display name was mentioned (group messages from others only).
    pub at_me: bool,
    /// Download URL for image, voice and video messages.
    pub media_url: Option<String>,
    /// Message body with the group sender prefix removed.
    pub content: String,
    pub from_user_name: String,
    /// The real author: differs from `from_user_name` for group messages.
    pub sender_user_name: String,
    pub to_user_name: String,
    /// The message record exactly as the server sent it.
    pub raw: serde_json::Value,
}

/// Recurring interval tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerTick {
    pub duration: Duration,
    pub count: u64,
}

/// Daily scheduled tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingTick {
    pub count: u64,
}

/// Internal control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    StopLoop,
}

/// Login state transition observed by the keep-alive supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginChange {
    pub logged_in: bool,
}

/// Event payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    NewMessage(MessageData),
    ContactChange(ContactChange),
    TimerTick(TimerTick),
    TimingTick(TimingTick),
    Control(ControlSignal),
    LoginChange(LoginChange),
}

/// The bus's unit of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Routing path.
    pub path: String,
    /// Name of the bus source the event arrived through, set on merge.
    pub source: String,
    pub from: String,
    pub to: String,
    /// Unix timestamp in seconds.
    pub time: i64,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(path: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            path: path.into(),
            source: String::new(),
            from: String::new(),
            to: String::new(),
            time: Utc::now().timestamp(),
            payload,
        }
    }

    /// Annotate the event with its origin and destination.
    pub fn with_route(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = from.into();
        self.to = to.into();
        self
    }

    /// Build a new-message event routed to `/msg/solo` or `/msg/group`.
    pub fn new_message(data: MessageData) -> Self {
        let path = if data.is_group {
            paths::MSG_GROUP
        } else {
            paths::MSG_SOLO
        };
        Self::new(path, EventPayload::NewMessage(data)).with_route(FROM_SERVER, TO_END)
    }

    /// Build a contact event routed to `/contact/mod` or `/contact/del`.
    pub fn contact_change(kind: ContactChangeKind, contact: Contact) -> Self {
        let path = match kind {
            ContactChangeKind::Modify => paths::CONTACT_MOD,
            ContactChangeKind::Delete => paths::CONTACT_DEL,
        };
        Self::new(path, EventPayload::ContactChange(ContactChange { kind, contact }))
            .with_route(FROM_SERVER, TO_END)
    }

    /// Build a login-state event routed to `/login`.
    pub fn login_change(logged_in: bool) -> Self {
        Self::new(paths::LOGIN, EventPayload::LoginChange(LoginChange { logged_in }))
    }

    /// Build the reserved stop signal.
    pub fn stop_loop() -> Self {
        Self::new(paths::STOP_LOOP, EventPayload::Control(ControlSignal::StopLoop))
    }

    /// Short name of the payload variant.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::NewMessage(_) => "NewMessage",
            EventPayload::ContactChange(_) => "ContactChange",
            EventPayload::TimerTick(_) => "TimerTick",
            EventPayload::TimingTick(_) => "TimingTick",
            EventPayload::Control(_) => "Control",
            EventPayload::LoginChange(_) => "LoginChange",
        }
    }

    /// Returns the message payload, if this is a new-message event.
    pub fn as_message(&self) -> Option<&MessageData> {
        match &self.payload {
            EventPayload::NewMessage(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the contact payload, if this is a contact event.
    pub fn as_contact_change(&self) -> Option<&ContactChange> {
        match &self.payload {
            EventPayload::ContactChange(change) => Some(change),
            _ => None,
        }
    }
}
