//! Exhaustive checks of the negotiation transition table.
//!
//! Coverage:
//! - Accepted set for every (role, state, direction) equals the declared legal set
//! - TERMINATE from every non-terminal state, both roles, both directions
//! - Terminal states accept nothing
//! - Monotonic progress along every legal path

#![forbid(unsafe_code)]

use dsp_protocol::{
    Direction, IllegalTransition, MessageType, NegotiationState, Role, legal_types, transition,
};

const ROLES: [Role; 2] = [Role::Consumer, Role::Provider];
const DIRECTIONS: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

/// Declared legal table, written independently of the implementation.
fn declared(role: Role, state: NegotiationState, direction: Direction) -> Vec<MessageType> {
    use MessageType as M;
    use NegotiationState as S;

    if state.is_terminal() {
        return Vec::new();
    }
    let consumer_sends = matches!(
        (role, direction),
        (Role::Consumer, Direction::Outbound) | (Role::Provider, Direction::Inbound)
    );
    let mut legal = match (state, consumer_sends) {
        (S::Initial, true) => vec![M::Request],
        (S::Initial | S::Requested, false) => vec![M::Offer],
        (S::Offered, true) => vec![M::Accept],
        (S::Accepted, false) => vec![M::Agreement],
        (S::Agreed, true) => vec![M::Verification],
        (S::Verified, false) => vec![M::Finalize],
        _ => Vec::new(),
    };
    legal.push(M::Terminate);
    legal
}

fn rank(state: NegotiationState) -> usize {
    NegotiationState::ALL
        .iter()
        .position(|s| *s == state)
        .unwrap_or(usize::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn accepted_set_matches_declared_table() {
    for role in ROLES {
        for state in NegotiationState::ALL {
            for direction in DIRECTIONS {
                assert_eq!(
                    legal_types(role, state, direction),
                    declared(role, state, direction),
                    "role={role} state={state} direction={direction:?}"
                );
            }
        }
    }
}

#[test]
fn rejected_types_report_state_type_and_role() {
    for role in ROLES {
        for state in NegotiationState::ALL {
            for direction in DIRECTIONS {
                let legal = declared(role, state, direction);
                for message_type in MessageType::ALL {
                    if legal.contains(&message_type) {
                        continue;
                    }
                    assert_eq!(
                        transition(role, state, message_type, direction),
                        Err(IllegalTransition {
                            current_state: state,
                            attempted_type: message_type,
                            role,
                        })
                    );
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination and terminality
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn terminate_from_every_non_terminal_state() {
    for role in ROLES {
        for direction in DIRECTIONS {
            for state in NegotiationState::ALL.into_iter().filter(|s| !s.is_terminal()) {
                assert_eq!(
                    transition(role, state, MessageType::Terminate, direction),
                    Ok(NegotiationState::Terminated)
                );
            }
        }
    }
}

#[test]
fn terminal_states_are_idempotent() {
    for role in ROLES {
        for direction in DIRECTIONS {
            for state in [NegotiationState::Finalized, NegotiationState::Terminated] {
                assert!(legal_types(role, state, direction).is_empty());
            }
        }
    }
}

#[test]
fn legal_transitions_never_move_backwards() {
    for role in ROLES {
        for state in NegotiationState::ALL {
            for direction in DIRECTIONS {
                for message_type in legal_types(role, state, direction) {
                    let next = transition(role, state, message_type, direction).unwrap();
                    assert!(rank(next) > rank(state), "{state} -> {next}");
                }
            }
        }
    }
}

#[test]
fn provider_perspective_full_negotiation() {
    let steps = [
        (MessageType::Request, Direction::Inbound),
        (MessageType::Offer, Direction::Outbound),
        (MessageType::Accept, Direction::Inbound),
        (MessageType::Agreement, Direction::Outbound),
        (MessageType::Verification, Direction::Inbound),
        (MessageType::Finalize, Direction::Outbound),
    ];
    let final_state = steps
        .iter()
        .try_fold(NegotiationState::Initial, |state, (message_type, direction)| {
            transition(Role::Provider, state, *message_type, *direction)
        })
        .unwrap();
    assert_eq!(final_state, NegotiationState::Finalized);
}
