mod id;
mod name;
mod state;

pub use id::Id;
pub use name::{validate_dns_label, InvalidName};
pub use state::EntityState;
