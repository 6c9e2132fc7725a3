use std::{fmt, str::FromStr};

/// The kinds of sleep prevention a [`SleepManager`](crate::SleepManager) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssertionKind {
  PreventDisplaySleep,
  PreventSystemIdleSleep,
  PreventSystemSleep,
  PreventUserIdleSleep,
  PreventUserIdleSystemSleep,
  /// Momentary. Wakes the display as if the user touched the machine, and goes through a
  /// separate backend call.
  DeclareUserActivity,
}

impl AssertionKind {
  pub const ALL: [AssertionKind; 6] = [
    AssertionKind::PreventDisplaySleep,
    AssertionKind::PreventSystemIdleSleep,
    AssertionKind::PreventSystemSleep,
    AssertionKind::PreventUserIdleSleep,
    AssertionKind::PreventUserIdleSystemSleep,
    AssertionKind::DeclareUserActivity,
  ];

  /// Kinds used when the caller doesn't ask for anything specific.
  pub const DEFAULT: [AssertionKind; 2] = [
    AssertionKind::PreventSystemIdleSleep,
    AssertionKind::PreventDisplaySleep,
  ];

  pub fn name(self) -> &'static str {
    match self {
      AssertionKind::PreventDisplaySleep => "prevent-display-sleep",
      AssertionKind::PreventSystemIdleSleep => "prevent-system-idle-sleep",
      AssertionKind::PreventSystemSleep => "prevent-system-sleep",
      AssertionKind::PreventUserIdleSleep => "prevent-user-idle-sleep",
      AssertionKind::PreventUserIdleSystemSleep => "prevent-user-idle-system-sleep",
      AssertionKind::DeclareUserActivity => "declare-user-activity",
    }
  }

  /// The IOKit assertion type string, or `None` for user activity which has no assertion type.
  pub fn assertion_type(self) -> Option<&'static str> {
    match self {
      AssertionKind::PreventDisplaySleep => Some("NoDisplaySleepAssertion"),
      AssertionKind::PreventSystemIdleSleep => Some("NoIdleSleepAssertion"),
      AssertionKind::PreventSystemSleep => Some("PreventSystemSleep"),
      AssertionKind::PreventUserIdleSleep => Some("PreventUserIdleDisplaySleep"),
      AssertionKind::PreventUserIdleSystemSleep => Some("PreventUserIdleSystemSleep"),
      AssertionKind::DeclareUserActivity => None,
    }
  }

  /// Whether the assertion is held until released (and so can carry a timeout).
  pub fn is_held(self) -> bool {
    self.assertion_type().is_some()
  }
}

impl fmt::Display for AssertionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown assertion kind: {0}")]
pub struct ParseKindError(String);

impl FromStr for AssertionKind {
  type Err = ParseKindError;

  /// Accepts the display name or the caffeinate(8) flag letter.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let kind = match s {
      "d" => AssertionKind::PreventDisplaySleep,
      "i" => AssertionKind::PreventSystemIdleSleep,
      "s" => AssertionKind::PreventSystemSleep,
      "u" => AssertionKind::DeclareUserActivity,
      _ => AssertionKind::ALL
        .into_iter()
        .find(|kind| kind.name() == s)
        .ok_or_else(|| ParseKindError(s.to_owned()))?,
    };
    Ok(kind)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_round_trip_through_from_str() {
    for kind in AssertionKind::ALL {
      assert_eq!(kind.to_string().parse::<AssertionKind>(), Ok(kind));
    }
  }

  #[test]
  fn flag_letters_parse() {
    assert_eq!("d".parse(), Ok(AssertionKind::PreventDisplaySleep));
    assert_eq!("i".parse(), Ok(AssertionKind::PreventSystemIdleSleep));
    assert_eq!("u".parse(), Ok(AssertionKind::DeclareUserActivity));
    assert!("x".parse::<AssertionKind>().is_err());
    assert!("".parse::<AssertionKind>().is_err());
  }

  #[test]
  fn only_user_activity_is_momentary() {
    let momentary: Vec<_> = AssertionKind::ALL
      .into_iter()
      .filter(|kind| !kind.is_held())
      .collect();
    assert_eq!(momentary, [AssertionKind::DeclareUserActivity]);
  }
}
