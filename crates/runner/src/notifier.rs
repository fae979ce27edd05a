use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use testbed_admin::Notifier;
use tracing::{error, info};

use crate::ErrorHandling;

/// Notifier that logs command progress and optionally records the output.
///
/// Lines are logged with a `[location] ` header. Callbacks arriving after
/// `complete` are dropped.
#[derive(Debug)]
pub struct RecordingNotifier {
    description: String,
    header: String,
    error_handling: ErrorHandling,
    running: AtomicBool,
    output: Option<Mutex<String>>,
}

impl RecordingNotifier {
    /// Creates a notifier for `command target` sent to `location`.
    #[must_use]
    pub fn new(
        command: &str,
        target: &str,
        location: &str,
        error_handling: ErrorHandling,
        record_output: bool,
    ) -> Self {
        Self {
            description: format!("{command} {target}"),
            header: format!("[{location}] "),
            error_handling,
            // Some commands never report start.
            running: AtomicBool::new(true),
            output: record_output.then(|| Mutex::new(String::new())),
        }
    }

    /// The recorded output, if recording was requested.
    #[must_use]
    pub fn output(&self) -> Option<String> {
        self.output.as_ref().map(|output| output.lock().clone())
    }

    /// Whether the command has not completed yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn record(&self, line: &str) {
        if let Some(output) = &self.output {
            let mut output = output.lock();
            output.push_str(line);
            output.push('\n');
        }
    }
}

impl Notifier for RecordingNotifier {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("{}Running \"{}\"", self.header, self.description);
    }

    fn info(&self, source: &str, message: &str) {
        if self.is_running() {
            info!("{}[{}] {}", self.header, source, message);
            self.record(message);
        }
    }

    fn error(&self, source: &str, message: &str) {
        if self.is_running() {
            error!("{}[{}] {}", self.header, source, message);
            self.record(message);
        }
    }

    fn results(&self, lines: &[String]) {
        if self.is_running() {
            for line in lines {
                info!("{}{}", self.header, line);
                self.record(line);
            }
        }
    }

    fn failed(&self, exit_code: i32) {
        if !self.is_running() {
            return;
        }

        let message = format!("return code {exit_code}");
        match self.error_handling {
            ErrorHandling::Fail => {
                error!("{}[{}] {}", self.header, self.description, message);
            }
            ErrorHandling::Ignore => {
                info!("{}[{}] {} [ignored]", self.header, self.description, message);
            }
        }
        self.record(&message);
    }

    fn complete(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("{}Finished \"{}\"", self.header, self.description);
        }
    }
}
