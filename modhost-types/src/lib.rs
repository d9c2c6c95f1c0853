//! Core type definitions for modhost.
//!
//! Everything in this crate is host-trusted: plugin configs handed down by the
//! discovery layer, the canonical UI description produced after a guest
//! response has been normalized, and the world-state graph handed (in bounded
//! form) to guest code.

pub mod config;
pub mod state;
pub mod world;

pub use config::{PluginConfig, PluginKind, TrustLevel};
pub use state::{
    Button, CallbackRef, Component, ComponentContent, ComponentType, ContentType,
    PluginState, PluginUpdateResponse, SubmitProxy,
};
pub use world::{WorldObject, WorldValue};
