pub mod message;
pub mod proposal;
pub mod record;
