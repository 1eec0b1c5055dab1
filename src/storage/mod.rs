//! Durable storage for events that could not be delivered
//!
//! When a notification transport fails, the event is written to the queue
//! directory and retried at the start of every poll cycle until each
//! transport that still owes a delivery has succeeded.
//!
//! ## Usage
//!
//! ```no_run
//! use warden::storage::EventQueue;
//!
//! let queue = EventQueue::new("/var/lib/warden/events", Some(100));
//! for path in queue.pending()? {
//!     let event = queue.load(&path)?;
//!     println!("{} still owes {:?}", event.source, event.delivery);
//! }
//! # Ok::<(), warden::storage::StorageError>(())
//! ```

pub mod error;
pub mod queue;
pub mod record;

pub use error::{StorageError, StorageResult};
pub use queue::EventQueue;
