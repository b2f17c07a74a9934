//! # Tapstake
//!
//! Stake-to-play tap battle room engine.
//!
//! Players stake Stars to enter a room, compete in a short tapping
//! contest, and the winner takes the pool. This crate wires the engine
//! layers into one server: configuration, the room manager, event
//! fan-out and the background sweeper.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tapstake::prelude::*;
//!
//! # async fn demo() -> Result<(), TapstakeError> {
//! let server = TapstakeServer::builder()
//!     .config(AppConfig::load())
//!     .build()
//!     .await?;
//! let manager = server.manager();
//! let player = manager.ledger().open_account(false).await?;
//! manager.ledger().deposit(player, Stars::whole(100), "welcome bonus").await?;
//! let joined = manager.join_or_create(player, Stars::whole(20)).await?;
//! println!("seated in {}", joined.room_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod sweeper;
pub mod telemetry;

mod error;
mod server;

pub use config::{AppConfig, ConfigError};
pub use error::TapstakeError;
pub use events::BroadcastSink;
pub use server::{TapstakeServer, TapstakeServerBuilder};
pub use sweeper::{SweeperHandle, spawn_sweeper};

/// Everything needed to run the engine.
pub mod prelude {
    pub use crate::{AppConfig, TapstakeError, TapstakeServer};
    pub use tapstake_ledger::{Ledger, LedgerError};
    pub use tapstake_protocol::{
        AccessKey, Clock, ManualClock, RoomEvent, RoomEventKind, RoomId,
        RoomKind, RoomStatus, Stars, SystemClock, UserId,
    };
    pub use tapstake_room::{ErrorCategory, RoomConfig, RoomError, RoomManager};
    pub use tapstake_store::{Store, StoreConfig};
}
