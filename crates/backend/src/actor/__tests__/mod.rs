pub(crate) mod helpers;
mod lifecycle;
mod network;
