//! Command validation and path sanitization — the trust boundary in front
//! of the sandbox executor.

pub mod allowlist;
pub mod paths;
pub mod validator;

pub use allowlist::{AllowedCommand, CommandAllowList, CommandCategory, BUILTIN_ALLOWED};
pub use paths::sanitize_path;
pub use validator::{CommandValidator, CommandVerdict};
