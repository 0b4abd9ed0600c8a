//! Routing events.
//!
//! # Data Flow
//! ```text
//! Message body (YAML or JSON, Ruby symbol keys allowed)
//!     → decode.rs (normalize symbols, deserialize, check fields)
//!     → types.rs (Event with an Action tag)
//!     → Dispatcher
//! ```

pub mod decode;
pub mod types;

pub use decode::{decode, DecodeError};
pub use types::{Action, Event};
