use serde::Serialize;
use std::fmt;

/// The four screens, in navigation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScreenId {
    Main,
    Second,
    Third,
    Fourth,
}

impl ScreenId {
    /// Screen shown after this one, `None` on the last screen.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Main => Some(Self::Second),
            Self::Second => Some(Self::Third),
            Self::Third => Some(Self::Fourth),
            Self::Fourth => None,
        }
    }

    /// Screen shown before this one, `None` on the first screen.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Main => None,
            Self::Second => Some(Self::Main),
            Self::Third => Some(Self::Second),
            Self::Fourth => Some(Self::Third),
        }
    }

    /// Window title.
    pub fn title(self) -> &'static str {
        match self {
            Self::Main => "Form 1",
            Self::Second => "Form 2",
            Self::Third => "Form 3",
            Self::Fourth => "Form 4",
        }
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Identifies one screen instance. A screen type reopened later gets a new key,
/// so messages addressed to a closed instance are never misrouted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenKey(pub u64);
