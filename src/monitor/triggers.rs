//! Patterns ending the serial monitor when they show up in the output.
//!
//! Patterns are matched against raw chunks, so output that is not valid UTF-8
//! still gets checked.

use regex::bytes::Regex;

use crate::{error::Result, settings::TailSettings};

/// Which trigger matched, in order of precedence.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Trigger {
    Pass,
    Fail,
    Stop,
}

impl Trigger {
    /// The process exit code a match of this trigger calls for.
    pub fn exit_code(self) -> i32 {
        match self {
            Trigger::Pass | Trigger::Stop => 0,
            Trigger::Fail => 2,
        }
    }
}

/// The pass, fail and stop patterns, each optional.
#[derive(Debug, Clone, Default)]
pub struct StopTriggers {
    pass: Option<Regex>,
    fail: Option<Regex>,
    stop: Option<Regex>,
}

impl StopTriggers {
    /// Compile the patterns found in `settings`.
    pub fn from_settings(settings: &TailSettings) -> Result<Self> {
        Ok(StopTriggers {
            pass: compile(&settings.pass)?,
            fail: compile(&settings.fail)?,
            stop: compile(&settings.stop)?,
        })
    }

    /// Check `text` against the patterns. Pass is tried first, then fail,
    /// then stop; the first match wins.
    pub fn evaluate(&self, text: &[u8]) -> Option<Trigger> {
        let hit = |re: &Option<Regex>| re.as_ref().map_or(false, |re| re.is_match(text));
        if hit(&self.pass) {
            Some(Trigger::Pass)
        } else if hit(&self.fail) {
            Some(Trigger::Fail)
        } else if hit(&self.stop) {
            Some(Trigger::Stop)
        } else {
            None
        }
    }
}

fn compile(pattern: &Option<String>) -> Result<Option<Regex>> {
    Ok(match pattern {
        Some(p) => Some(Regex::new(p)?),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn triggers(pass: Option<&str>, fail: Option<&str>, stop: Option<&str>) -> StopTriggers {
        StopTriggers::from_settings(&TailSettings {
            pass: pass.map(String::from),
            fail: fail.map(String::from),
            stop: stop.map(String::from),
            ..TailSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn no_patterns_never_match() {
        assert_eq!(StopTriggers::default().evaluate(b"anything"), None);
    }

    #[test]
    fn pass_wins_over_fail() {
        let t = triggers(Some("PASS"), Some("FAIL"), Some("DONE"));
        let trigger = t.evaluate(b"tests: PASS, FAIL, DONE");
        assert_eq!(trigger, Some(Trigger::Pass));
        assert_eq!(trigger.map(Trigger::exit_code), Some(0));
    }

    #[test]
    fn fail_wins_over_stop() {
        let t = triggers(Some("PASS"), Some("FAIL"), Some("DONE"));
        let trigger = t.evaluate(b"FAIL then DONE");
        assert_eq!(trigger, Some(Trigger::Fail));
        assert_eq!(trigger.map(Trigger::exit_code), Some(2));
    }

    #[test]
    fn stop_exits_cleanly() {
        let t = triggers(None, Some("FAIL"), Some(r"^bye\n"));
        assert_eq!(t.evaluate(b"bye\n"), Some(Trigger::Stop));
        assert_eq!(Trigger::Stop.exit_code(), 0);
        assert_eq!(t.evaluate(b"good bye\n"), None);
    }

    #[test]
    fn invalid_utf8_output_is_still_matched() {
        let t = triggers(Some("PASS"), None, Some("°C"));
        assert_eq!(t.evaluate(b"\xff\xfe noise PASS"), Some(Trigger::Pass));
        assert_eq!(t.evaluate("25°C".as_bytes()), Some(Trigger::Stop));
        assert_eq!(t.evaluate(b"25\xC2"), None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let result = StopTriggers::from_settings(&TailSettings {
            fail: Some("(unclosed".into()),
            ..TailSettings::default()
        });
        assert!(matches!(result, Err(Error::Trigger(_))));
    }
}
