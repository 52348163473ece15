//! Contract negotiation state machine.
//!
//! The machine is a pure function of `(role, state, message type, direction)`.
//! It holds no state of its own.
//!
//! ```text
//!  INITIAL ──REQUEST──► REQUESTED ──OFFER──► OFFERED ──ACCEPT──► ACCEPTED
//!     │                                         ▲                   │
//!     └──────────────────OFFER──────────────────┘               AGREEMENT
//!                                                                   ▼
//!  FINALIZED ◄──FINALIZE── VERIFIED ◄──VERIFICATION────────────── AGREED
//!
//!  any non-terminal ──TERMINATE──► TERMINATED
//! ```
//!
//! Each message also has an originating role: the consumer sends REQUEST,
//! ACCEPT and VERIFICATION, the provider sends OFFER, AGREEMENT and FINALIZE,
//! either side may send TERMINATE. A message flowing the wrong way is illegal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;
use crate::message::{Direction, MessageType, Role};

/// Negotiation state of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// Exchange begun, no message yet.
    #[default]
    Initial,
    Requested,
    Offered,
    Accepted,
    Agreed,
    Verified,
    Finalized,
    Terminated,
}

impl NegotiationState {
    /// Every state, in protocol order.
    pub const ALL: [Self; 8] = [
        Self::Initial,
        Self::Requested,
        Self::Offered,
        Self::Accepted,
        Self::Agreed,
        Self::Verified,
        Self::Finalized,
        Self::Terminated,
    ];

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Terminated)
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Requested => "requested",
            Self::Offered => "offered",
            Self::Accepted => "accepted",
            Self::Agreed => "agreed",
            Self::Verified => "verified",
            Self::Finalized => "finalized",
            Self::Terminated => "terminated",
        }
    }

    /// Compact wire value (`dspace:REQUESTED`), `None` for [`Self::Initial`].
    #[must_use]
    pub const fn wire_name(self) -> Option<&'static str> {
        match self {
            Self::Initial => None,
            Self::Requested => Some("dspace:REQUESTED"),
            Self::Offered => Some("dspace:OFFERED"),
            Self::Accepted => Some("dspace:ACCEPTED"),
            Self::Agreed => Some("dspace:AGREED"),
            Self::Verified => Some("dspace:VERIFIED"),
            Self::Finalized => Some("dspace:FINALIZED"),
            Self::Terminated => Some("dspace:TERMINATED"),
        }
    }

    /// Parse a wire value in compact, expanded or bare (`REQUESTED`) form.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        let compact = crate::vocab::compact(value);
        let bare = compact.strip_prefix(crate::vocab::DSPACE_PREFIX).unwrap_or(&compact);
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(bare) && *state != Self::Initial)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Compute the state reached when an exchange owned by `role` in `current`
/// sees a `message_type` message travelling in `direction`.
///
/// # Errors
///
/// Returns [`IllegalTransition`] when the message is not in the legal set for
/// `(role, current, direction)`. The caller's state is left untouched.
pub const fn transition(
    role: Role,
    current: NegotiationState,
    message_type: MessageType,
    direction: Direction,
) -> Result<NegotiationState, IllegalTransition> {
    let illegal = IllegalTransition {
        current_state: current,
        attempted_type: message_type,
        role,
    };

    if current.is_terminal() {
        return Err(illegal);
    }

    let sender = match direction {
        Direction::Outbound => role,
        Direction::Inbound => role.counterparty(),
    };
    match message_type.originator() {
        None => return Ok(NegotiationState::Terminated),
        Some(originator) if !role_eq(originator, sender) => return Err(illegal),
        Some(_) => {}
    }

    match (current, message_type) {
        (NegotiationState::Initial, MessageType::Request) => Ok(NegotiationState::Requested),
        (NegotiationState::Initial | NegotiationState::Requested, MessageType::Offer) => {
            Ok(NegotiationState::Offered)
        }
        (NegotiationState::Offered, MessageType::Accept) => Ok(NegotiationState::Accepted),
        (NegotiationState::Accepted, MessageType::Agreement) => Ok(NegotiationState::Agreed),
        (NegotiationState::Agreed, MessageType::Verification) => Ok(NegotiationState::Verified),
        (NegotiationState::Verified, MessageType::Finalize) => Ok(NegotiationState::Finalized),
        _ => Err(illegal),
    }
}

const fn role_eq(a: Role, b: Role) -> bool {
    matches!(
        (a, b),
        (Role::Consumer, Role::Consumer) | (Role::Provider, Role::Provider)
    )
}

/// Message types legal for `(role, state, direction)`.
#[must_use]
pub fn legal_types(role: Role, state: NegotiationState, direction: Direction) -> Vec<MessageType> {
    MessageType::ALL
        .into_iter()
        .filter(|message_type| transition(role, state, *message_type, direction).is_ok())
        .collect()
}
