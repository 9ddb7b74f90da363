const DECIMAL_UNITS: [&str; 4] = ["s", "ms", "μs", "ns"];
const CLOCK_UNITS: [(u64, &str); 4] = [(86400, "days"), (3600, "h"), (60, "m"), (1, "s")];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Humanized {
    pub text: String,
    pub unit: &'static str,
}

// Below a minute: scale into the largest decimal submultiple of the second
// whose magnitude is >= 0.1, two decimal places. A minute or more: nearest
// whole second decomposed into days/h/m/s, zero counts skipped.
pub(crate) fn humanize(secs: f64) -> Humanized {
    if secs < 60.0 {
        if secs == 0.0 {
            return Humanized {
                text: "0.00s".to_string(),
                unit: "s",
            };
        }
        let mut value = secs;
        let mut idx = 0;
        while value < 0.1 && idx + 1 < DECIMAL_UNITS.len() {
            value *= 1000.0;
            idx += 1;
        }
        let unit = DECIMAL_UNITS[idx];
        Humanized {
            text: format!("{value:.2}{unit}"),
            unit,
        }
    } else {
        let mut remainder = secs.round() as u64;
        let mut pieces = Vec::new();
        for (factor, unit) in CLOCK_UNITS {
            if remainder < factor {
                continue;
            }
            pieces.push(format!("{}{unit}", remainder / factor));
            remainder %= factor;
        }
        // No single suffix for the composite form.
        Humanized {
            text: pieces.join(" "),
            unit: "",
        }
    }
}
