pub mod booking;
pub mod error;
pub mod time;

pub use booking::*;
pub use error::*;
pub use time::*;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

/// Schema of the shared booking store, applied by whichever service starts first.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
