use crate::data::record::{Group, ImpressionDay, ImpressionHour, RawRecord, UserRecord};
use crate::error::{AnalysisError, Result, ValidationError, ValidationErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Which stage of the pipeline produced a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Snapshot {
    Raw,
    Cleaned,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Raw => write!(f, "raw"),
            Snapshot::Cleaned => write!(f, "cleaned"),
        }
    }
}

/// Immutable collection of validated records.
///
/// Deriving a subset always produces a new, independently owned `Dataset`;
/// the source is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    snapshot: Snapshot,
    records: Vec<UserRecord>,
}

impl Dataset {
    /// Wrap already validated records.
    ///
    /// Callers are responsible for `user_id` uniqueness; use [`load`] for
    /// untrusted input.
    pub fn from_records(snapshot: Snapshot, records: Vec<UserRecord>) -> Self {
        Self { snapshot, records }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserRecord> {
        self.records.iter()
    }

    /// Impression counts as floating point, in record order
    pub fn impressions(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.total_impressions as f64).collect()
    }

    /// New dataset holding the records that satisfy `predicate`
    pub fn filter<P>(&self, snapshot: Snapshot, predicate: P) -> Dataset
    where
        P: Fn(&UserRecord) -> bool,
    {
        Dataset {
            snapshot,
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: Fn(&UserRecord) -> bool,
    {
        count(&self.records, predicate)
    }

    pub fn rate<P>(&self, predicate: P) -> Result<f64>
    where
        P: Fn(&UserRecord) -> bool,
    {
        rate(&self.records, predicate)
    }

    pub fn split_by_group(&self) -> GroupSplit<'_> {
        split_by_group(self)
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a UserRecord;
    type IntoIter = std::slice::Iter<'a, UserRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Control and treatment subsets of one dataset snapshot
#[derive(Debug, Clone)]
pub struct GroupSplit<'a> {
    snapshot: Snapshot,
    control: Vec<&'a UserRecord>,
    treatment: Vec<&'a UserRecord>,
}

impl<'a> GroupSplit<'a> {
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    pub fn control(&self) -> &[&'a UserRecord] {
        &self.control
    }

    pub fn treatment(&self) -> &[&'a UserRecord] {
        &self.treatment
    }

    pub fn group(&self, group: Group) -> &[&'a UserRecord] {
        match group {
            Group::Control => &self.control,
            Group::Treatment => &self.treatment,
        }
    }

    /// Conversion counts per arm as `(converted, total)`
    pub fn conversions(&self, group: Group) -> (usize, usize) {
        let members = self.group(group);
        (count(members.iter().copied(), |r| r.converted), members.len())
    }

    pub fn conversion_rate(&self, group: Group) -> Result<f64> {
        rate(self.group(group).iter().copied(), |r| r.converted)
    }

    pub fn total(&self) -> usize {
        self.control.len() + self.treatment.len()
    }
}

/// Records rejected during loading alongside the accepted dataset
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub dataset: Dataset,
    pub rejected: Vec<ValidationError>,
}

/// Validate raw rows into the raw dataset snapshot.
///
/// Rows with missing or out-of-domain fields and repeated `user_id`s are
/// excluded and reported; they never abort the load.
pub fn load<I>(rows: I) -> LoadOutcome
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut rejected = Vec::new();

    for (row, raw) in rows.into_iter().enumerate() {
        match validate(row, raw) {
            Ok(record) => {
                if seen.insert(record.user_id.clone()) {
                    records.push(record);
                } else {
                    let err = ValidationError {
                        row,
                        user_id: Some(record.user_id),
                        kind: ValidationErrorKind::DuplicateUserId,
                    };
                    warn!("Rejected record: {}", err);
                    rejected.push(err);
                }
            }
            Err(err) => {
                warn!("Rejected record: {}", err);
                rejected.push(err);
            }
        }
    }

    info!(
        accepted = records.len(),
        rejected = rejected.len(),
        "Dataset loaded"
    );

    LoadOutcome {
        dataset: Dataset::from_records(Snapshot::Raw, records),
        rejected,
    }
}

fn validate(row: usize, raw: RawRecord) -> std::result::Result<UserRecord, ValidationError> {
    let user_id = raw.user_id.filter(|id| !id.trim().is_empty());
    let fail = |kind| ValidationError { row, user_id: user_id.clone(), kind };
    let missing = |field: &str| fail(ValidationErrorKind::MissingField(field.to_string()));
    let out_of_range = |field: &str, value: i64| {
        fail(ValidationErrorKind::OutOfRange { field: field.to_string(), value })
    };

    let id = user_id.clone().ok_or_else(|| missing("user_id"))?;

    let test = raw.test.ok_or_else(|| missing("test"))?;
    let group = Group::from_flag(test).ok_or_else(|| out_of_range("test", test))?;

    let converted = match raw.converted.ok_or_else(|| missing("converted"))? {
        0 => false,
        1 => true,
        other => return Err(out_of_range("converted", other)),
    };

    let impressions = raw.tot_impr.ok_or_else(|| missing("tot_impr"))?;
    let total_impressions =
        u32::try_from(impressions).map_err(|_| out_of_range("tot_impr", impressions))?;

    let day = raw.mode_impr_day.ok_or_else(|| missing("mode_impr_day"))?;
    let mode_impression_day = u8::try_from(day)
        .ok()
        .and_then(ImpressionDay::new)
        .ok_or_else(|| out_of_range("mode_impr_day", day))?;

    let hour = raw.mode_impr_hour.ok_or_else(|| missing("mode_impr_hour"))?;
    let mode_impression_hour = u8::try_from(hour)
        .ok()
        .and_then(ImpressionHour::new)
        .ok_or_else(|| out_of_range("mode_impr_hour", hour))?;

    Ok(UserRecord {
        user_id: id,
        group,
        converted,
        total_impressions,
        mode_impression_day,
        mode_impression_hour,
    })
}

/// Partition a dataset by its group field
pub fn split_by_group(dataset: &Dataset) -> GroupSplit<'_> {
    let (treatment, control): (Vec<&UserRecord>, Vec<&UserRecord>) =
        dataset.iter().partition(|r| r.is_treatment());
    GroupSplit {
        snapshot: dataset.snapshot(),
        control,
        treatment,
    }
}

/// Number of records matching `predicate`
pub fn count<'a, I, P>(records: I, predicate: P) -> usize
where
    I: IntoIterator<Item = &'a UserRecord>,
    P: Fn(&UserRecord) -> bool,
{
    records.into_iter().filter(|r| predicate(r)).count()
}

/// Share of records matching `predicate`, in [0, 1]
pub fn rate<'a, I, P>(records: I, predicate: P) -> Result<f64>
where
    I: IntoIterator<Item = &'a UserRecord>,
    P: Fn(&UserRecord) -> bool,
{
    let (hits, total) = records.into_iter().fold((0usize, 0usize), |(hits, total), r| {
        (hits + predicate(r) as usize, total + 1)
    });

    if total == 0 {
        return Err(AnalysisError::EmptyDataset { stage: "for rate computation" });
    }

    Ok(hits as f64 / total as f64)
}
