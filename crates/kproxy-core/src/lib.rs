pub mod auth;
pub mod clock;
pub mod error;
pub mod registry;

pub use auth::{parse_auth_value, redact};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GatewayError;
pub use registry::{CredentialRegistry, FingerprintEntry, BLACKLIST_COOLDOWN};
