pub mod error;
pub(crate) mod fs;
pub(crate) mod mutex_ext;
pub(crate) mod security;
pub(crate) mod time;
