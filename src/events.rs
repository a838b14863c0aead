//! Append-only collection of page errors and console messages

use crate::driver::{ConsoleMessage, PageError};
use std::sync::Mutex;

/// Page-level events in arrival order.
///
/// Shared with the page's handlers through an `Arc`; handlers only ever push,
/// readers get snapshots.
#[derive(Debug, Default)]
pub struct EventCollector {
    page_errors: Mutex<Vec<PageError>>,
    console_messages: Mutex<Vec<ConsoleMessage>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page_error(&self, error: PageError) {
        self.page_errors.lock().unwrap_or_else(|e| e.into_inner()).push(error);
    }

    pub fn push_console(&self, message: ConsoleMessage) {
        self.console_messages.lock().unwrap_or_else(|e| e.into_inner()).push(message);
    }

    pub fn page_errors(&self) -> Vec<PageError> {
        self.page_errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.console_messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn page_error_count(&self) -> usize {
        self.page_errors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ConsoleLevel;
    use std::sync::Arc;

    #[test]
    fn keeps_arrival_order_and_duplicates() {
        let c = EventCollector::new();
        c.push_console(ConsoleMessage::new(ConsoleLevel::Log, "b"));
        c.push_console(ConsoleMessage::new(ConsoleLevel::Error, "a"));
        c.push_console(ConsoleMessage::new(ConsoleLevel::Log, "b"));
        let texts: Vec<_> = c.console_messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["b", "a", "b"]);
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let c = Arc::new(EventCollector::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        c.push_page_error(PageError::new(format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.page_error_count(), 1000);
    }
}
