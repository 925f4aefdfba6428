//! Acquisition of place pages.
//!
//! Two transports with different cost: a plain HTTP fetch (`http_client`)
//! and a full browser render (`crate::renderer`). `gateway` puts both behind
//! one trait and classifies their failures; `challenge` recognises anti-bot
//! interstitials on either path.

pub mod challenge;
pub mod gateway;
pub mod http_client;

pub use gateway::{FetchError, Gateway, GatewayOptions, WebGateway};
