//! # Dogfight Server Library
//!
//! Authoritative core of a real-time multiplayer air-combat server. The
//! server owns every entity, decides who sees what and keeps each client
//! connection honest with login, ack and ping deadlines.
//!
//! ## Architecture
//!
//! ### Single writer
//! All simulation state lives in one [`game::Context`] that is mutated only
//! from the main loop. Systems are plain functions registered per event
//! kind; they receive the context by `&mut`, so there is no locking inside
//! the simulation.
//!
//! ### Event bus
//! [`events::Dispatcher`] runs handlers synchronously in registration order.
//! Events that must wait for a consistent point in the tick (player
//! announcements, left-horizon notices) are queued on a delayed channel and
//! flushed by the tick driver.
//!
//! ### Tick phases
//! 1. Expired connection timers
//! 2. `Tick`: viewport recompute
//! 3. Flush of the horizon channel
//! 4. Calendar markers (`Second`, `Minute`, `Hour`)
//! 5. Flush of the players channel
//!
//! ### Transport
//! [`network::Server`] binds a UDP socket, decodes [`shared::ClientPacket`]s
//! with bincode and drains the simulation's outbox after every step.
//!
//! ## Module Organization
//!
//! - `world`: entity store, components, id partitions, name history
//! - `events`: event catalog, dispatcher, delayed channels
//! - `systems`: the game logic and the per-mode manifest
//! - `clock`, `timers`: frame counting and connection deadlines
//! - `connection_registry`, `viewport`, `outbox`: per-connection state
//! - `config`, `error`: ambient plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server::error::ServerError> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod clock;
pub mod config;
pub mod connection_registry;
pub mod error;
pub mod events;
pub mod game;
pub mod network;
pub mod outbox;
pub mod systems;
pub mod timers;
pub mod viewport;
pub mod world;
