//! Subscriber fan-out.
//!
//! [`Subscribers`] is an owned registry handed to whoever publishes; each
//! [`Subscription`] unregisters itself when dropped. [`spawn_bridge`] connects
//! a broker queue to a registry so events raised on another node reach local
//! subscribers.

pub mod bridge;
pub mod hub;
pub mod registry;

pub use bridge::spawn_bridge;
pub use hub::Hub;
pub use registry::{DEFAULT_CAPACITY, Subscribers, Subscription};
