use querymon_common::types::{Monitor, QueryResponse, Trigger};

/// Everything a notification template can reference about the firing that
/// produced it: the monitor, the trigger, the result slice backing this
/// alert, and the per-trigger error when the firing came from a failure.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub monitor: &'a Monitor,
    pub trigger: &'a Trigger,
    pub results: Option<&'a QueryResponse>,
    pub error: Option<&'a str>,
}

impl<'a> TriggerContext<'a> {
    pub fn new(monitor: &'a Monitor, trigger: &'a Trigger) -> Self {
        Self {
            monitor,
            trigger,
            results: None,
            error: None,
        }
    }

    pub fn with_results(mut self, results: &'a QueryResponse) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}
