mod chain;
mod principal;
mod resolver;

pub use chain::{AuthorizationChain, Gate, require_activated, require_authenticated};
pub use principal::{AuthenticatedUser, Principal};
pub use resolver::{AuthenticationResolver, parse_bearer};
