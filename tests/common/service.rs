use std::time::Duration;

use oplog_rs::{
    operation_log::{MemJournal, MemLogStore},
    server::{Configuration, Server, ServerSpec},
    types::{data_types::ModelID, operation::Operation},
};

use super::text_ot::{apply, TextChange, TextOT};

pub(crate) type TextServer = Server<TextChange, MemLogStore<TextChange>>;

pub(crate) fn configuration() -> Configuration {
    Configuration::builder()
        .log_events(true)
        .idle_poll_interval(Duration::from_millis(10))
        .build()
}

/// Start a server over fresh in-memory stores, with no event handlers besides logging.
pub(crate) fn start_server() -> TextServer {
    ServerSpec::builder()
        .transform(TextOT)
        .log_store(MemLogStore::<TextChange>::new())
        .journal(MemJournal::<TextChange>::new())
        .configuration(configuration())
        .build()
        .start()
}

/// Read the committed log of `model`.
pub(crate) fn log_of(server: &TextServer, model: &str) -> Vec<Operation<TextChange>> {
    server.log(&ModelID::new(model)).unwrap()
}

/// The text of `model`, as produced by applying its whole log to an empty document.
pub(crate) fn text_of(server: &TextServer, model: &str) -> String {
    log_of(server, model)
        .iter()
        .fold(String::new(), |doc, op| apply(&doc, &op.payload))
}
