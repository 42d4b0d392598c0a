//! User interface implementations

use std::sync::{Arc, Mutex};
use std::time::Duration;

use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::deps::{MessageStyle, ProgressIndicator, UserInterface};

/// Production UI implementation using indicatif
pub struct RealUserInterface;

impl UserInterface for RealUserInterface {
    fn create_spinner(&self) -> Box<dyn ProgressIndicator> {
        let pb = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(template);
        }
        Box::new(RealProgressIndicator { pb })
    }

    fn create_progress_bar(&self, total: u64) -> Box<dyn ProgressIndicator> {
        let pb = ProgressBar::new(total);
        if let Ok(template) = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {eta}")
        {
            pb.set_style(template.progress_chars("#>-"));
        }
        Box::new(RealProgressIndicator { pb })
    }

    fn print(&self, message: &str) {
        println!("{message}");
    }

    fn print_styled(&self, message: &str, msg_style: MessageStyle) {
        let styled = match msg_style {
            MessageStyle::Dim => style(message).dim().to_string(),
            MessageStyle::Warning => style(message).yellow().bold().to_string(),
            MessageStyle::Error => style(message).red().bold().to_string(),
            MessageStyle::Success => style(message).green().bold().to_string(),
        };
        println!("{styled}");
    }

    fn is_interactive(&self) -> bool {
        Term::stdout().is_term()
    }
}

struct RealProgressIndicator {
    pb: ProgressBar,
}

impl ProgressIndicator for RealProgressIndicator {
    fn set_message(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }

    fn set_position(&self, position: u64) {
        self.pb.set_position(position);
    }

    fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }

    fn enable_steady_tick(&self, duration: Duration) {
        self.pb.enable_steady_tick(duration);
    }

    fn finish_with_message(&self, message: String) {
        self.pb.finish_with_message(message);
    }
}

/// Test UI implementation that captures output
#[derive(Clone, Default)]
pub struct TestUserInterface {
    /// Every printed line, styled or not
    pub output: Arc<Mutex<Vec<String>>>,
    /// Styled lines with their style
    pub styled_output: Arc<Mutex<Vec<(String, MessageStyle)>>>,
    /// Bytes reported through progress indicators
    pub progress_bytes: Arc<Mutex<u64>>,
}

impl TestUserInterface {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured lines
    pub fn get_output(&self) -> Vec<String> {
        self.output.lock().unwrap().clone()
    }

    /// Captured styled lines
    pub fn get_styled_output(&self) -> Vec<(String, MessageStyle)> {
        self.styled_output.lock().unwrap().clone()
    }

    /// Current position reported by progress indicators
    pub fn get_progress_bytes(&self) -> u64 {
        *self.progress_bytes.lock().unwrap()
    }

    fn indicator(&self) -> Box<dyn ProgressIndicator> {
        Box::new(TestProgressIndicator {
            messages: Arc::new(Mutex::new(Vec::new())),
            bytes: Arc::clone(&self.progress_bytes),
        })
    }
}

impl UserInterface for TestUserInterface {
    fn create_spinner(&self) -> Box<dyn ProgressIndicator> {
        self.indicator()
    }

    fn create_progress_bar(&self, _total: u64) -> Box<dyn ProgressIndicator> {
        self.indicator()
    }

    fn print(&self, message: &str) {
        self.output.lock().unwrap().push(message.to_string());
    }

    fn print_styled(&self, message: &str, style: MessageStyle) {
        // Add to both styled output and regular output for easier testing
        self.styled_output
            .lock()
            .unwrap()
            .push((message.to_string(), style));
        self.output.lock().unwrap().push(message.to_string());
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

struct TestProgressIndicator {
    messages: Arc<Mutex<Vec<String>>>,
    bytes: Arc<Mutex<u64>>,
}

impl ProgressIndicator for TestProgressIndicator {
    fn set_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn inc(&self, delta: u64) {
        *self.bytes.lock().unwrap() += delta;
    }

    fn set_position(&self, position: u64) {
        *self.bytes.lock().unwrap() = position;
    }

    fn finish_and_clear(&self) {}

    fn enable_steady_tick(&self, _duration: Duration) {}

    fn finish_with_message(&self, message: String) {
        self.messages.lock().unwrap().push(message);
    }
}
