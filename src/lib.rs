//! Client-side data actions and caching stores for nav-addressed REST APIs.
//!
//! A [`DataContext`] ties together the navigation table, credentials, the
//! transport (network or demo fixtures), one store per nav and the action
//! layer. Build it once and share it.
//!
//! ```ignore
//! let ctx = Config::load(None)?.build_context(false)?;
//! let cars = ctx
//!   .actions()
//!   .get_all_items(PathOptions::new("cars"))
//!   .await?;
//! ```

pub mod action;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod nav;
pub mod store;
pub mod util;

pub use action::{ActionOptions, ActionTracker, Actions, ItemRequest, SaveMode};
pub use api::{PathOptions, QueryParams, Transport};
pub use auth::{Auth, Credentials};
pub use config::Config;
pub use context::DataContext;
pub use error::{ApiError, ErrorShape, Result};
pub use nav::{NavRef, Navigation, NavigationItem, StoreMode};
pub use store::{Store, StoreGetReturn};
