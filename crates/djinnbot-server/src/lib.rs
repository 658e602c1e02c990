mod background;
mod error;
mod http;
mod state;

pub use background::replay_unprocessed_webhooks;
pub use background::spawn as spawn_background;
pub use error::{ControlPlaneError, ControlPlaneResult};
pub use http::{app_router, serve, CorsPolicy};
pub use state::AppState;
