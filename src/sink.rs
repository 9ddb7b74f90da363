use std::io::{self, Write};

/// Destination for rendered reports. Anything `FnMut(&str)` qualifies.
pub trait ReportSink {
    fn report(&mut self, message: &str);

    fn describe(&self) -> &str {
        "<sink>"
    }
}

impl<F: FnMut(&str)> ReportSink for F {
    fn report(&mut self, message: &str) {
        self(message)
    }
}

/// Default sink: one line per report to standard output.
#[derive(Debug, Default)]
pub struct Stdout;

impl ReportSink for Stdout {
    fn report(&mut self, message: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{message}");
    }

    fn describe(&self) -> &str {
        "<stdout>"
    }
}
