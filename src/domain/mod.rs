//! Domain types for the exit and execution engines.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: TimeMs, Symbol, Side
//! - Positions, exit FSM state, profiles and the global control switch
//! - Intents, orders, fills, holdings and exit events

pub mod control;
pub mod decimal;
pub mod exit_event;
pub mod exit_state;
pub mod fill;
pub mod holding;
pub mod intent;
pub mod order;
pub mod position;
pub mod primitives;
pub mod profile;

pub use control::{ControlMode, ExitControl};
pub use decimal::Decimal;
pub use exit_event::{ExitEvent, ExitSignal, ExitSource, MANUAL_REASON};
pub use exit_state::{ExitPhase, ExitState};
pub use fill::{Fill, FillCursor};
pub use holding::Holding;
pub use intent::{action_key, IntentStatus, IntentType, OrderIntent, OrderType, ReasonCode};
pub use order::{Order, OrderStatus};
pub use position::{ExitMode, Position, PositionSide, PositionStatus};
pub use primitives::{ParseEnumError, Side, Symbol, TimeMs, DAY_MS};
pub use profile::{
    AtrConfig, ExitProfile, ExitProfileConfig, ProfileValidationError, StopFloorConfig,
    SymbolExitOverride, TimeStopConfig, TrailingConfig, TriggerConfig, DEFAULT_PROFILE_ID,
};
