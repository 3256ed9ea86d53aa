#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod registry;
mod uniqueness;

pub use self::{
    config::{EncodeError, IngressRule, TunnelConfig},
    registry::{Account, AccountSource, Credentials, Registry, TunnelRecord},
    uniqueness::{ensure_name_available, NameError},
};
