//! Cronjob types
//!
//! Schedules attached to a workflow are persisted as `Cronjob` rows and
//! announced to the cron scheduler through `CronjobPayload` messages.

use serde::{Deserialize, Serialize};

use crate::domain::workflow::WorkflowDefinition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronjobParent {
    #[default]
    Workflow,
    Testing,
    Scanning,
}

impl CronjobParent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CronjobParent::Workflow => "workflow",
            CronjobParent::Testing => "testing",
            CronjobParent::Scanning => "scanning",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// At a wall-clock time on a day or weekday
    #[default]
    Timing,
    /// Every N minutes or hours
    Gap,
    /// A raw five-field cron expression
    Crontab,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Minutes,
    Hours,
    #[default]
    Day,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Frequency {
    fn weekday(&self) -> Option<u8> {
        match self {
            Frequency::Sunday => Some(0),
            Frequency::Monday => Some(1),
            Frequency::Tuesday => Some(2),
            Frequency::Wednesday => Some(3),
            Frequency::Thursday => Some(4),
            Frequency::Friday => Some(5),
            Frequency::Saturday => Some(6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("gap schedules need a positive number")]
    InvalidGap,
    #[error("frequency {0:?} is not valid for a {1:?} schedule")]
    InvalidFrequency(Frequency, ScheduleType),
    #[error("crontab schedule has an empty expression")]
    EmptyCron,
}

/// Fields shared by schedule items and persisted cronjobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub max_failure: u32,
    #[serde(default)]
    pub workflow_args: Option<WorkflowDefinition>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Schedule {
    /// Five-field cron expression for this schedule
    pub fn cron_expression(&self) -> Result<String, ScheduleError> {
        match self.schedule_type {
            ScheduleType::Crontab => {
                let expr = self.cron.trim();
                if expr.is_empty() {
                    return Err(ScheduleError::EmptyCron);
                }
                Ok(expr.to_string())
            }
            ScheduleType::Gap => {
                if self.number == 0 {
                    return Err(ScheduleError::InvalidGap);
                }
                match self.frequency {
                    Frequency::Minutes => Ok(format!("*/{} * * * *", self.number)),
                    Frequency::Hours => Ok(format!("0 */{} * * *", self.number)),
                    other => Err(ScheduleError::InvalidFrequency(other, ScheduleType::Gap)),
                }
            }
            ScheduleType::Timing => {
                let (hour, minute) = parse_time(&self.time)?;
                match self.frequency {
                    Frequency::Day => Ok(format!("{} {} * * *", minute, hour)),
                    other => match other.weekday() {
                        Some(dow) => Ok(format!("{} {} * * {}", minute, hour, dow)),
                        None => Err(ScheduleError::InvalidFrequency(other, ScheduleType::Timing)),
                    },
                }
            }
        }
    }
}

fn parse_time(time: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(time.to_string());
    let (hour, minute) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// A persisted schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cronjob {
    pub id: String,
    /// Name of the parent the schedule belongs to
    pub name: String,
    pub parent_type: CronjobParent,
    #[serde(default)]
    pub product_name: String,
    #[serde(flatten)]
    pub schedule: Schedule,
}

/// Schedules as edited on a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleCtrl {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub items: Vec<ScheduleItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Set once the item has been persisted as a cronjob
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronjobAction {
    Enable,
    Disable,
}

/// Message published on the cronjob topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronjobPayload {
    pub name: String,
    pub job_type: CronjobParent,
    pub action: CronjobAction,
    #[serde(default)]
    pub delete_list: Vec<String>,
    #[serde(default)]
    pub job_list: Vec<Cronjob>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(schedule_type: ScheduleType, frequency: Frequency) -> Schedule {
        Schedule {
            schedule_type,
            frequency,
            ..Default::default()
        }
    }

    #[test]
    fn test_timing_daily_and_weekly() {
        let mut daily = schedule(ScheduleType::Timing, Frequency::Day);
        daily.time = "09:30".to_string();
        assert_eq!(daily.cron_expression().unwrap(), "30 9 * * *");

        let mut weekly = schedule(ScheduleType::Timing, Frequency::Friday);
        weekly.time = "18:05".to_string();
        assert_eq!(weekly.cron_expression().unwrap(), "5 18 * * 5");
    }

    #[test]
    fn test_gap_schedules() {
        let mut minutes = schedule(ScheduleType::Gap, Frequency::Minutes);
        minutes.number = 15;
        assert_eq!(minutes.cron_expression().unwrap(), "*/15 * * * *");

        let mut hours = schedule(ScheduleType::Gap, Frequency::Hours);
        hours.number = 2;
        assert_eq!(hours.cron_expression().unwrap(), "0 */2 * * *");

        hours.number = 0;
        assert_eq!(hours.cron_expression(), Err(ScheduleError::InvalidGap));
    }

    #[test]
    fn test_invalid_timing() {
        let mut bad = schedule(ScheduleType::Timing, Frequency::Day);
        bad.time = "25:00".to_string();
        assert!(matches!(bad.cron_expression(), Err(ScheduleError::InvalidTime(_))));

        let mut gap_freq = schedule(ScheduleType::Timing, Frequency::Minutes);
        gap_freq.time = "10:00".to_string();
        assert!(matches!(
            gap_freq.cron_expression(),
            Err(ScheduleError::InvalidFrequency(..))
        ));
    }

    #[test]
    fn test_crontab_passthrough() {
        let mut raw = schedule(ScheduleType::Crontab, Frequency::Day);
        raw.cron = " 0 3 * * 1-5 ".to_string();
        assert_eq!(raw.cron_expression().unwrap(), "0 3 * * 1-5");
    }
}
