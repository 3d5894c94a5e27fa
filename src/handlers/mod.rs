pub mod admin;
pub mod messages;
pub mod payments;
pub mod sessions;
pub mod users;
