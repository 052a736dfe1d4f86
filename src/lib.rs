#![warn(
    clippy::pedantic,
    clippy::nursery,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::default_numeric_fallback,
    clippy::format_push_string,
    clippy::if_then_some_else_none,
    clippy::map_err_ignore,
    clippy::panic_in_result_fn,
    clippy::single_char_lifetime_names,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::unwrap_used,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    meta_variable_misuse,
    missing_copy_implementations,
    missing_debug_implementations,
    // missing_docs,
    // clippy::cargo,
    noop_method_call,
    single_use_lifetimes,
    unreachable_pub,
    // unsafe_code,
    unused_lifetimes,
    unused_macro_rules,
    unused_qualifications,
    unused_results,
    unused_tuple_struct_fields
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::return_self_not_must_use,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::redundant_pub_crate,
    clippy::single_match_else
)]

/*!
Alpaca adapters for observatory control software.

Each configured telescope, focuser or dome is driven through the
[ASCOM Alpaca](https://ascom-standards.org/api/) HTTP protocol. A
[`Registry`] builds the adapters from an [`ObservatoryConfig`]; every adapter
implements [`api::Device`] plus the capability traits that fit its device
type, and publishes its [`MotionStatus`] through a watch channel.

```no_run
# async fn run() -> eyre::Result<()> {
use obs_alpaca::api::PointingRaDec;
use obs_alpaca::{ObservatoryConfig, Registry};
use tokio_util::sync::CancellationToken;

let config = ObservatoryConfig::load(std::path::Path::new("observatory.toml"))?;
let registry = Registry::from_config(&config)?;
registry.open_all().await?;

let shutdown = CancellationToken::new();
let _tasks = registry.start(&shutdown);

if let Some(telescope) = registry.telescope("telescope") {
    telescope.move_radec(83.63, 22.01).await?;
}
# Ok(())
# }
```
*/

pub mod api;
pub mod client;
pub mod config;
pub mod devices;
mod errors;
pub(crate) mod macros;
mod motion;
pub(crate) mod params;
mod registry;

#[cfg(test)]
mod test_utils;

pub use client::AlpacaClient;
pub use config::{
    ConfigError, ConnectionConfig, DeviceConfig, DeviceOptions, DomeOptions, FocuserOptions,
    ObservatoryConfig, TelescopeOptions,
};
#[cfg(feature = "dome")]
pub use devices::AlpacaDome;
#[cfg(feature = "focuser")]
pub use devices::AlpacaFocuser;
#[cfg(feature = "telescope")]
pub use devices::AlpacaTelescope;
pub use errors::{ASCOMError, ASCOMErrorCode, ASCOMResult, Error, Result};
pub use motion::MotionStatus;
pub use registry::{Registry, TypedDevice, build_device};
