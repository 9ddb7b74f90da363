use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::time::Instant;

use tracing::{error, trace};

use crate::duration;
use crate::error::Error;
use crate::sink::{ReportSink, Stdout};
use crate::template;
use crate::value::Value;

pub const DEFAULT_MESSAGE: &str = "[{name}]: {elapsed}";

// Computed at render time, rejected by set_attr.
const COMPUTED_FIELDS: [&str; 2] = ["elapsed", "unit"];

/// A reusable named timer.
///
/// Measures the wall-clock time of code regions and, on completion of each
/// region, records the elapsed seconds and reports a rendered message to a
/// pluggable sink.
///
/// ```
/// let timer = wakati::Timer::new("load");
/// {
///     let _scope = timer.scope();
///     // timed work
/// }
/// assert_eq!(timer.num_times(), 1);
/// ```
///
/// Single-threaded by contract; a `Timer` is constructed once and reused for
/// any number of regions, sequential or nested.
pub struct Timer {
    pub name: String,
    pub report: bool,
    pub message: String,
    pub auto_unit: bool,
    report_to: RefCell<Box<dyn ReportSink>>,
    extras: BTreeMap<String, Value>,
    start: RefCell<Vec<Instant>>,
    elapsed: RefCell<Vec<f64>>,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Timer {
            name: name.into(),
            report: true,
            message: DEFAULT_MESSAGE.to_string(),
            auto_unit: true,
            report_to: RefCell::new(Box::new(Stdout)),
            extras: BTreeMap::new(),
            start: RefCell::new(Vec::new()),
            elapsed: RefCell::new(Vec::new()),
        }
    }

    pub fn with_report(mut self, report: bool) -> Self {
        self.report = report;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_auto_unit(mut self, auto_unit: bool) -> Self {
        self.auto_unit = auto_unit;
        self
    }

    pub fn with_sink(self, sink: impl ReportSink + 'static) -> Self {
        Timer {
            report_to: RefCell::new(Box::new(sink)),
            ..self
        }
    }

    pub fn set_sink(&mut self, sink: impl ReportSink + 'static) {
        self.report_to = RefCell::new(Box::new(sink));
    }

    /// Attach an extra named value for use in custom message templates.
    /// The computed fields (`elapsed`, `unit`) cannot be set.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        let key = key.into();
        if COMPUTED_FIELDS.contains(&key.as_str()) {
            return Err(Error::ImmutableAttribute);
        }
        self.extras.insert(key, value.into());
        Ok(())
    }

    /// Open a region: push a start mark. Must be matched by `exit`.
    pub fn enter(&self) {
        let mut start = self.start.borrow_mut();
        start.push(Instant::now());
        trace!(timer = %self.name, depth = start.len(), "entered");
    }

    /// Close the most recently opened region: record its elapsed seconds and,
    /// when reporting is enabled, render and emit the report before returning.
    pub fn exit(&self) -> Result<f64, Error> {
        let start = self
            .start
            .borrow_mut()
            .pop()
            .ok_or(Error::StackUnderflow)?;
        let elapsed = start.elapsed().as_secs_f64();
        self.elapsed.borrow_mut().push(elapsed);
        trace!(timer = %self.name, elapsed, "exited");
        if self.report {
            self.print_report(elapsed)?;
        }
        Ok(elapsed)
    }

    /// Open a region that closes when the returned guard is dropped.
    ///
    /// The guard closes the region on every release path, including
    /// unwinding. Nested guards on the same timer are fine and close in
    /// LIFO order. A render failure during drop cannot propagate; use
    /// [`Scope::finish`] to observe it.
    pub fn scope(&self) -> Scope<'_> {
        self.enter();
        Scope { timer: self }
    }

    /// Time a closure. The region closes on every path out of the closure;
    /// the closure's output, error or not, passes through unchanged.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = self.scope();
        f()
    }

    /// All recorded elapsed times in seconds, in completion order.
    pub fn elapsed(&self) -> Ref<'_, [f64]> {
        Ref::map(self.elapsed.borrow(), Vec::as_slice)
    }

    pub fn num_times(&self) -> usize {
        self.elapsed.borrow().len()
    }

    /// Render the message template for the given elapsed seconds and send it
    /// to the sink.
    pub fn print_report(&self, elapsed: f64) -> Result<(), Error> {
        let message = template::render(&self.message, &self.bindings(elapsed))?;
        self.report_to.borrow_mut().report(&message);
        Ok(())
    }

    fn bindings(&self, elapsed: f64) -> BTreeMap<String, Value> {
        let mut bindings = BTreeMap::new();
        bindings.insert("name".to_string(), Value::from(self.name.as_str()));
        bindings.insert("report".to_string(), Value::from(self.report));
        bindings.insert("message".to_string(), Value::from(self.message.as_str()));
        bindings.insert("auto_unit".to_string(), Value::from(self.auto_unit));
        bindings.insert(
            "report_to".to_string(),
            Value::from(self.report_to.borrow().describe()),
        );
        for (key, value) in &self.extras {
            bindings.insert(key.clone(), value.clone());
        }
        // Computed fields last so extras can never shadow them.
        if self.auto_unit {
            let human = duration::humanize(elapsed);
            bindings.insert("elapsed".to_string(), Value::from(human.text));
            bindings.insert("unit".to_string(), Value::from(human.unit));
        } else {
            bindings.insert("elapsed".to_string(), Value::from(elapsed));
            bindings.insert("unit".to_string(), Value::from(""));
        }
        bindings
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<wakati.Timer (name: {}, num_times: {})>",
            self.name,
            self.num_times()
        )
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("report", &self.report)
            .field("message", &self.message)
            .field("auto_unit", &self.auto_unit)
            .field("num_times", &self.num_times())
            .finish_non_exhaustive()
    }
}

/// Guard for an open region; closes it on drop.
#[must_use = "dropping the guard closes the region immediately"]
pub struct Scope<'a> {
    timer: &'a Timer,
}

impl Scope<'_> {
    /// Close the region now, propagating any render failure.
    pub fn finish(self) -> Result<f64, Error> {
        let scope = ManuallyDrop::new(self);
        scope.timer.exit()
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        // The guard owns its start mark, so this cannot underflow.
        if let Err(e) = self.timer.exit() {
            error!(timer = %self.timer.name, error = %e, "report failed in scope drop");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;
    use std::thread::sleep;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<String>>>);

    impl Capture {
        fn lines(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }

    impl ReportSink for Capture {
        fn report(&mut self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    fn captured(name: &str) -> (Timer, Capture) {
        let capture = Capture::default();
        (Timer::new(name).with_sink(capture.clone()), capture)
    }

    #[test]
    fn default_report() {
        let (timer, capture) = captured("test");
        timer.print_report(2.0).unwrap();
        assert_eq!(capture.lines(), ["[test]: 2.00s"]);
    }

    #[test]
    fn records_elapsed_within_tolerance() {
        let (timer, capture) = captured("test");
        timer.time(|| sleep(Duration::from_millis(50)));
        let recorded = timer.elapsed()[0];
        assert!((recorded - 0.05).abs() < 0.01, "recorded {recorded}");
        assert_eq!(capture.lines().len(), 1);
        assert!(capture.lines()[0].starts_with("[test]: "));
    }

    #[test]
    fn sequential_reuse() {
        let (timer, capture) = captured("test");
        for _ in 0..2 {
            let _scope = timer.scope();
            sleep(Duration::from_millis(20));
        }
        let elapsed = timer.elapsed();
        assert_eq!(elapsed.len(), 2);
        assert!((elapsed[0] - 0.02).abs() < 0.01);
        assert!((elapsed[1] - 0.02).abs() < 0.01);
        assert_eq!(capture.lines().len(), 2);
    }

    #[test]
    fn nested_reuse() {
        let (timer, capture) = captured("test");
        {
            let _outer = timer.scope();
            sleep(Duration::from_millis(20));
            let _inner = timer.scope();
            sleep(Duration::from_millis(20));
        }
        // Inner pair completes first; the outer span covers it.
        let elapsed = timer.elapsed();
        assert_eq!(elapsed.len(), 2);
        assert!(elapsed[1] > elapsed[0]);
        assert_eq!(capture.lines().len(), 2);
    }

    #[test]
    fn repr_counts_completions() {
        let (timer, _capture) = captured("test");
        for _ in 0..100 {
            let _scope = timer.scope();
        }
        assert_eq!(
            timer.to_string(),
            "<wakati.Timer (name: test, num_times: 100)>"
        );
    }

    #[test]
    fn no_report_when_disabled() {
        let (timer, capture) = captured("test");
        let timer = timer.with_report(false);
        timer.time(|| sleep(Duration::from_millis(5)));
        assert!(capture.lines().is_empty());
        assert_eq!(timer.num_times(), 1);
    }

    #[test]
    fn custom_message_without_auto_unit() {
        let (timer, capture) = captured("test");
        let timer = timer
            .with_message("A test message. {elapsed:.0f}s{name}")
            .with_auto_unit(false);
        timer.print_report(2.0031).unwrap();
        assert_eq!(capture.lines(), ["A test message. 2stest"]);
    }

    #[test]
    fn custom_attribute() {
        let (timer, capture) = captured("test");
        let mut timer = timer.with_message("{testattribute:.0e}");
        timer.set_attr("testattribute", 100).unwrap();
        timer.print_report(2.0).unwrap();
        assert_eq!(capture.lines(), ["1e+02"]);
    }

    #[test]
    fn unit_binding() {
        let (timer, capture) = captured("test");
        let mut timer = timer.with_message("{elapsed} ({unit})");
        timer.print_report(0.00005).unwrap();
        timer.auto_unit = false;
        timer.print_report(0.25).unwrap();
        assert_eq!(capture.lines(), ["50.00μs (μs)", "0.25 ()"]);
    }

    #[test]
    fn computed_fields_are_immutable() {
        let mut timer = Timer::new("test");
        let err = timer.set_attr("elapsed", "test").unwrap_err();
        assert_eq!(err, Error::ImmutableAttribute);
        assert_eq!(err.to_string(), "can't set attribute");
        assert_eq!(timer.set_attr("unit", "h"), Err(Error::ImmutableAttribute));
    }

    #[test]
    fn exit_without_enter_underflows() {
        let timer = Timer::new("test");
        assert_eq!(timer.exit(), Err(Error::StackUnderflow));
        assert_eq!(timer.num_times(), 0);
    }

    #[test]
    fn records_and_reports_when_body_fails() {
        let (timer, capture) = captured("test");
        let out: Result<(), &str> = timer.time(|| Err("boom"));
        assert_eq!(out, Err("boom"));
        assert_eq!(timer.num_times(), 1);
        assert_eq!(capture.lines().len(), 1);
    }

    #[test]
    fn records_and_reports_across_unwind() {
        let (timer, capture) = captured("test");
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _scope = timer.scope();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(timer.num_times(), 1);
        assert_eq!(capture.lines().len(), 1);
    }

    #[test]
    fn finish_returns_elapsed() {
        let (timer, capture) = captured("test");
        let scope = timer.scope();
        sleep(Duration::from_millis(5));
        let elapsed = scope.finish().unwrap();
        assert!(elapsed >= 0.005);
        assert_eq!(timer.num_times(), 1);
        assert_eq!(capture.lines().len(), 1);
    }

    #[test]
    fn finish_propagates_render_failure() {
        let (timer, capture) = captured("test");
        let timer = timer.with_message("{nope}");
        let err = timer.scope().finish().unwrap_err();
        assert_eq!(
            err,
            Error::MissingField {
                field: "nope".to_string()
            }
        );
        // The duration is recorded before rendering fails.
        assert_eq!(timer.num_times(), 1);
        assert!(capture.lines().is_empty());
    }

    #[test]
    fn explicit_enter_exit_pair() {
        let (timer, capture) = captured("test");
        timer.enter();
        timer.enter();
        timer.exit().unwrap();
        timer.exit().unwrap();
        assert_eq!(timer.num_times(), 2);
        assert_eq!(capture.lines().len(), 2);
    }
}
