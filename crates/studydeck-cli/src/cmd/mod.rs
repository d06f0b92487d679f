pub mod chat;
pub mod completions;
pub mod export;
pub mod import;
pub mod record;
pub mod restore;
pub mod status;
