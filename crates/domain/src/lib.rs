//! Order lifecycle for the checkout core.
//!
//! This crate provides:
//! - the data-driven transition table and its executor ([`OrderStateMachine`])
//! - checkout, which creates an order and holds its stock atomically
//! - post-commit side-effect dispatch
//! - the expiry sweeper

pub mod checkout;
pub mod effects;
pub mod error;
pub mod machine;
pub mod policy;
pub mod sweeper;
pub mod transitions;

pub use checkout::{CheckoutLine, CheckoutReceipt, CheckoutService, PLACE_ORDER, PlaceOrder};
pub use effects::{
    EffectDispatcher, EffectError, EffectHandler, LoggingEffectHandler, Notification,
    RecordingEffectHandler, SideEffect,
};
pub use error::DomainError;
pub use machine::{OrderStateMachine, TransitionOutcome};
pub use policy::OrderPolicy;
pub use sweeper::{DEFAULT_SWEEP_BATCH, ExpirySweeper, SWEEPER_ACTOR, SweepSummary};
pub use transitions::{
    Authority, ReservationAction, TRANSITION_TABLE, Transition, TransitionContext,
    TransitionPlan, TransitionRule, available_transitions, is_listed, plan,
};
