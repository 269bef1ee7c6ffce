use batchline::{BatchingSink, EventRecord, TxError};
use std::fmt::Display;

/// Emits one `storage` record per repository call.
///
/// Success and an expected not-found are `INFO`; every other failure is `ERROR`.
#[derive(Debug, Clone)]
pub(crate) struct OutcomeLog {
    log: BatchingSink<EventRecord>,
    service: String,
}

impl OutcomeLog {
    pub(crate) fn new(log: BatchingSink<EventRecord>) -> Self {
        Self { log, service: String::new() }
    }

    pub(crate) fn set_service(&mut self, service: String) {
        self.service = service;
    }

    pub(crate) fn sink(&self) -> &BatchingSink<EventRecord> {
        &self.log
    }

    pub(crate) fn report<T, E: Display>(
        &self,
        subject: Option<i64>,
        event: &'static str,
        result: &Result<T, TxError<E>>,
        describe: impl FnOnce(&T) -> String,
    ) {
        let record = match result {
            Ok(value) => EventRecord::info("storage", event, describe(value)),
            Err(e) if e.is_not_found() => EventRecord::info("storage", event, e.to_string()),
            Err(e) => EventRecord::error("storage", event, e.to_string()),
        };
        self.emit(record, subject);
    }

    pub(crate) fn emit(&self, record: EventRecord, subject: Option<i64>) {
        let record = record.with_service(self.service.as_str());
        let record = match subject {
            Some(id) => record.with_subject(id),
            None => record,
        };
        self.log.submit(record);
    }
}
