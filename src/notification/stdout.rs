//! The stdout destination.

use crate::models::{destination::StdoutDestination, notification::NotificationMessage};

/// Prints messages to standard output.
pub struct StdoutNotifier<'a> {
    config: &'a StdoutDestination,
}

impl<'a> StdoutNotifier<'a> {
    /// Creates a notifier for a stdout destination.
    pub fn new(config: &'a StdoutDestination) -> Self {
        Self { config }
    }

    /// Formats the message as printed.
    pub fn format(&self, destination_id: &str, message: &NotificationMessage) -> String {
        if self.config.with_subject && !message.title.is_empty() {
            format!("=== {} ===\n{}\n{}\n", destination_id, message.title, message.body)
        } else {
            format!("=== {} ===\n{}\n", destination_id, message.body)
        }
    }

    /// Prints the message and returns what was printed.
    pub fn notify(&self, destination_id: &str, message: &NotificationMessage) -> String {
        let out = self.format(destination_id, message);
        println!("{out}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_with_and_without_subject() {
        let message = NotificationMessage::new("Subject", "Body");

        let plain = StdoutDestination::default();
        assert_eq!(StdoutNotifier::new(&plain).format("console", &message), "=== console ===\nBody\n");

        let titled = StdoutDestination { with_subject: true };
        assert_eq!(
            StdoutNotifier::new(&titled).format("console", &message),
            "=== console ===\nSubject\nBody\n"
        );
    }
}
