pub(crate) mod client;

pub(crate) mod connection;

pub(crate) mod logging;

pub(crate) mod service;

pub(crate) mod text_ot;
