//! User-facing progress sink.

/// Receives progress and failure messages meant for the person running the tool.
pub trait Console {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Prints to stdout / stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl Console for StdConsole {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("{}", message);
    }
}
