pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod ops;
pub mod orders;
pub mod store;
pub mod time;

pub use auth::AuthState;
pub use clients::panel::{Outcome, PanelClient, DEFAULT_PAGE_SIZE};
pub use config::{load_config, AppConfig};
pub use error::{PanelError, PanelResult};
pub use orders::{extract_username, Order, OrderStatus};
