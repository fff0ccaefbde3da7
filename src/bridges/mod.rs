pub(crate) mod discord;
pub(crate) mod webhook;
