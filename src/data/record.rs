use serde::{Deserialize, Serialize};
use std::fmt;

/// Experiment arm a user was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Control,
    Treatment,
}

impl Group {
    /// Decode the `test` column (0 = control, 1 = treatment)
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(Group::Control),
            1 => Some(Group::Treatment),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> u8 {
        match self {
            Group::Control => 0,
            Group::Treatment => 1,
        }
    }

    /// The other arm
    pub fn opposite(&self) -> Self {
        match self {
            Group::Control => Group::Treatment,
            Group::Treatment => Group::Control,
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Control => write!(f, "control"),
            Group::Treatment => write!(f, "treatment"),
        }
    }
}

/// Day of week with the most impressions (1..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ImpressionDay(u8);

impl ImpressionDay {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 7;

    pub fn new(day: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&day).then_some(Self(day))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ImpressionDay {
    type Error = String;

    fn try_from(day: u8) -> Result<Self, Self::Error> {
        Self::new(day).ok_or_else(|| format!("impression day {} outside 1..=7", day))
    }
}

impl From<ImpressionDay> for u8 {
    fn from(day: ImpressionDay) -> u8 {
        day.0
    }
}

/// Hour of day with the most impressions (0..=23)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ImpressionHour(u8);

impl ImpressionHour {
    pub const MAX: u8 = 23;

    pub fn new(hour: u8) -> Option<Self> {
        (hour <= Self::MAX).then_some(Self(hour))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ImpressionHour {
    type Error = String;

    fn try_from(hour: u8) -> Result<Self, Self::Error> {
        Self::new(hour).ok_or_else(|| format!("impression hour {} outside 0..=23", hour))
    }
}

impl From<ImpressionHour> for u8 {
    fn from(hour: ImpressionHour) -> u8 {
        hour.0
    }
}

/// A validated experiment participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub group: Group,
    pub converted: bool,
    pub total_impressions: u32,
    pub mode_impression_day: ImpressionDay,
    pub mode_impression_hour: ImpressionHour,
}

impl UserRecord {
    pub fn new(
        user_id: impl Into<String>,
        group: Group,
        converted: bool,
        total_impressions: u32,
        mode_impression_day: ImpressionDay,
        mode_impression_hour: ImpressionHour,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            group,
            converted,
            total_impressions,
            mode_impression_day,
            mode_impression_hour,
        }
    }

    pub fn is_control(&self) -> bool {
        self.group == Group::Control
    }

    pub fn is_treatment(&self) -> bool {
        self.group == Group::Treatment
    }

    /// Convert back to the external column layout
    pub fn to_raw(&self) -> RawRecord {
        RawRecord {
            user_id: Some(self.user_id.clone()),
            test: Some(self.group.as_flag() as i64),
            converted: Some(self.converted as i64),
            tot_impr: Some(self.total_impressions as i64),
            mode_impr_day: Some(self.mode_impression_day.get() as i64),
            mode_impr_hour: Some(self.mode_impression_hour.get() as i64),
        }
    }
}

/// Untyped row as delivered by the loading collaborator.
///
/// Column names follow the input file; any cell may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub user_id: Option<String>,
    pub test: Option<i64>,
    pub converted: Option<i64>,
    pub tot_impr: Option<i64>,
    pub mode_impr_day: Option<i64>,
    pub mode_impr_hour: Option<i64>,
}

impl RawRecord {
    /// Fully populated row, mostly for tests and synthetic data
    pub fn complete(
        user_id: impl Into<String>,
        test: i64,
        converted: i64,
        tot_impr: i64,
        mode_impr_day: i64,
        mode_impr_hour: i64,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            test: Some(test),
            converted: Some(converted),
            tot_impr: Some(tot_impr),
            mode_impr_day: Some(mode_impr_day),
            mode_impr_hour: Some(mode_impr_hour),
        }
    }
}
