use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) commit_operation_handlers: Vec<HandlerPtr<CommitOperationEvent>>,
    pub(crate) reject_operation_handlers: Vec<HandlerPtr<RejectOperationEvent>>,
    pub(crate) drop_duplicate_handlers: Vec<HandlerPtr<DropDuplicateEvent>>,
    pub(crate) subscribe_handlers: Vec<HandlerPtr<SubscribeEvent>>,
    pub(crate) bootstrap_handlers: Vec<HandlerPtr<BootstrapEvent>>,
    pub(crate) unsubscribe_handlers: Vec<HandlerPtr<UnsubscribeEvent>>,
    pub(crate) ack_handlers: Vec<HandlerPtr<AckEvent>>,
    pub(crate) model_fault_handlers: Vec<HandlerPtr<ModelFaultEvent>>,
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger())
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        commit_operation_handler: Option<HandlerPtr<CommitOperationEvent>>,
        reject_operation_handler: Option<HandlerPtr<RejectOperationEvent>>,
        drop_duplicate_handler: Option<HandlerPtr<DropDuplicateEvent>>,
        subscribe_handler: Option<HandlerPtr<SubscribeEvent>>,
        bootstrap_handler: Option<HandlerPtr<BootstrapEvent>>,
        unsubscribe_handler: Option<HandlerPtr<UnsubscribeEvent>>,
        ack_handler: Option<HandlerPtr<AckEvent>>,
        model_fault_handler: Option<HandlerPtr<ModelFaultEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            commit_operation_handlers: handlers(log_events, commit_operation_handler),
            reject_operation_handlers: handlers(log_events, reject_operation_handler),
            drop_duplicate_handlers: handlers(log_events, drop_duplicate_handler),
            subscribe_handlers: handlers(log_events, subscribe_handler),
            bootstrap_handlers: handlers(log_events, bootstrap_handler),
            unsubscribe_handlers: handlers(log_events, unsubscribe_handler),
            ack_handlers: handlers(log_events, ack_handler),
            model_fault_handlers: handlers(log_events, model_fault_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commit_operation_handlers.is_empty()
            && self.reject_operation_handlers.is_empty()
            && self.drop_duplicate_handlers.is_empty()
            && self.subscribe_handlers.is_empty()
            && self.bootstrap_handlers.is_empty()
            && self.unsubscribe_handlers.is_empty()
            && self.ack_handlers.is_empty()
            && self.model_fault_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitOperation(commit_operation_event) => self
                .commit_operation_handlers
                .iter()
                .for_each(|handler| handler(&commit_operation_event)),

            Event::RejectOperation(reject_operation_event) => self
                .reject_operation_handlers
                .iter()
                .for_each(|handler| handler(&reject_operation_event)),

            Event::DropDuplicate(drop_duplicate_event) => self
                .drop_duplicate_handlers
                .iter()
                .for_each(|handler| handler(&drop_duplicate_event)),

            Event::Subscribe(subscribe_event) => self
                .subscribe_handlers
                .iter()
                .for_each(|handler| handler(&subscribe_event)),

            Event::Bootstrap(bootstrap_event) => self
                .bootstrap_handlers
                .iter()
                .for_each(|handler| handler(&bootstrap_event)),

            Event::Unsubscribe(unsubscribe_event) => self
                .unsubscribe_handlers
                .iter()
                .for_each(|handler| handler(&unsubscribe_event)),

            Event::Ack(ack_event) => self
                .ack_handlers
                .iter()
                .for_each(|handler| handler(&ack_event)),

            Event::ModelFault(model_fault_event) => self
                .model_fault_handlers
                .iter()
                .for_each(|handler| handler(&model_fault_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire the handlers of events published before the shutdown.
                event_subscriber
                    .try_iter()
                    .for_each(|event| event_handlers.fire_handlers(event));
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(poll_interval) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
