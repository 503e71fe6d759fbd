use std::{str::FromStr, time::Duration};

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    error::{Error, Result},
    role::{PerRole, Role},
};

/// Construction parameters of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// participants per role, ids go 1..=N within a role
    pub population: PerRole<u32>,
    /// operations per participant
    pub ops: PerRole<u32>,
    /// completions that end a role's phase
    pub quota: PerRole<u32>,
    pub initial_turn: Role,
    pub think_time: PerRole<Duration>,
    /// per suspension point, `None` - wait forever
    pub op_timeout: Option<Duration>,
    /// for the whole run, `None` - wait forever
    pub run_timeout: Option<Duration>,
}

/// 3 writers and 5 readers, 10 operations each, batches of 3 writers and 5 readers
impl Default for Config {
    fn default() -> Self {
        Self {
            population: PerRole::new(3, 5),
            ops: PerRole::new(10, 10),
            quota: PerRole::new(3, 5),
            initial_turn: Role::Writer,
            think_time: PerRole::new(Duration::from_millis(150), Duration::from_millis(100)),
            op_timeout: None,
            run_timeout: None,
        }
    }
}

/// Keys accepted by [Config::apply]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Key {
    Writers,
    Readers,
    WriterOps,
    ReaderOps,
    WriterQuota,
    ReaderQuota,
    InitialTurn,
    WriterThinkMs,
    ReaderThinkMs,
    /// `none` turns it off
    OpTimeoutMs,
    /// `none` turns it off
    RunTimeoutMs,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for role in Role::iter() {
            if self.quota[role] == 0 {
                return Err(Error::InvalidConfig(format!("{role} quota must be positive")));
            }
        }
        Ok(())
    }

    /// operations each role performs in total
    pub fn expected_ops(&self) -> PerRole<u64> {
        let mut total = PerRole::default();
        for role in Role::iter() {
            total[role] = u64::from(self.population[role]) * u64::from(self.ops[role]);
        }
        total
    }

    /// the resource's value after a complete run: every writer adds its id once per operation
    pub fn expected_value(&self) -> i64 {
        let n = i64::from(self.population.writer);
        n * (n + 1) / 2 * i64::from(self.ops.writer)
    }

    /// The role holding the turn when the run gets stuck, judging by the numbers alone:
    /// - a role's total isn't a multiple of its quota => its last phase never ends
    /// - the roles' batch counts can't alternate, starting from the initial turn =>
    ///   the turn ends up with a role that has nothing left to do
    ///
    /// With more participants than the quota, batches may overlap and stall even if this says `None`.
    pub fn stall_risk(&self) -> Option<Role> {
        let expected = self.expected_ops();
        if Role::iter().any(|role| self.quota[role] == 0) {
            return None;
        }
        if let Some(role) =
            Role::iter().find(|&role| expected[role] % u64::from(self.quota[role]) != 0)
        {
            return Some(role);
        }

        let batches = |role: Role| expected[role] / u64::from(self.quota[role]);
        let opening = self.initial_turn;
        if batches(opening.other()) > batches(opening) {
            Some(opening)
        } else if batches(opening) > batches(opening.other()) + 1 {
            Some(opening.other())
        } else {
            None
        }
    }

    /// Set a single field from its text form, e.g. `writers=4` or `op_timeout_ms=none`
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let key = Key::from_str(key).map_err(|_| {
            Error::Parse(format!(
                "key `{key}', use one of {}",
                Key::iter().map(|k| k.to_string()).collect::<Vec<_>>().join(",")
            ))
        })?;
        match key {
            Key::Writers => self.population.writer = number(key, value)?,
            Key::Readers => self.population.reader = number(key, value)?,
            Key::WriterOps => self.ops.writer = number(key, value)?,
            Key::ReaderOps => self.ops.reader = number(key, value)?,
            Key::WriterQuota => self.quota.writer = number(key, value)?,
            Key::ReaderQuota => self.quota.reader = number(key, value)?,
            Key::InitialTurn => {
                self.initial_turn = Role::from_str(value)
                    .map_err(|_| Error::Parse(format!("{key} `{value}'")))?
            }
            Key::WriterThinkMs => self.think_time.writer = Duration::from_millis(number(key, value)?),
            Key::ReaderThinkMs => self.think_time.reader = Duration::from_millis(number(key, value)?),
            Key::OpTimeoutMs => self.op_timeout = millis_or_none(key, value)?,
            Key::RunTimeoutMs => self.run_timeout = millis_or_none(key, value)?,
        }
        Ok(())
    }
}

fn number<T: FromStr>(key: Key, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Parse(format!("{key} `{value}'")))
}

fn millis_or_none(key: Key, value: &str) -> Result<Option<Duration>> {
    match value {
        "none" => Ok(None),
        _ => number(key, value).map(|ms| Some(Duration::from_millis(ms))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_matches_the_reference_run() {
        let c = Config::default();
        assert_eq!(PerRole::new(30, 50), c.expected_ops());
        assert_eq!(60, c.expected_value());
        assert_eq!(None, c.stall_risk());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_apply() {
        let mut c = Config::default();
        c.apply("writers", "4").unwrap();
        c.apply("reader_quota", "2").unwrap();
        c.apply("initial_turn", "reader").unwrap();
        c.apply("writer_think_ms", "0").unwrap();
        c.apply("run_timeout_ms", "2500").unwrap();
        c.apply("op_timeout_ms", "none").unwrap();

        assert_eq!(4, c.population.writer);
        assert_eq!(2, c.quota.reader);
        assert_eq!(Role::Reader, c.initial_turn);
        assert!(c.think_time.writer.is_zero());
        assert_eq!(Some(Duration::from_millis(2500)), c.run_timeout);
        assert_eq!(None, c.op_timeout);
    }

    #[test]
    fn test_apply_rejects_garbage() {
        let mut c = Config::default();
        assert!(matches!(c.apply("priority", "1"), Err(Error::Parse(_))));
        assert!(matches!(c.apply("writers", "-1"), Err(Error::Parse(_))));
        assert!(matches!(c.apply("initial_turn", "admin"), Err(Error::Parse(_))));
        assert_eq!(Config::default(), c);
    }

    #[test]
    fn test_zero_quota_is_invalid() {
        let c = Config {
            quota: PerRole::new(3, 0),
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_stall_risk() {
        // fewer readers than the readers' quota
        let c = Config {
            population: PerRole::new(3, 2),
            ops: PerRole::new(1, 1),
            ..Config::default()
        };
        assert_eq!(Some(Role::Reader), c.stall_risk());

        // nobody to open with
        let c = Config {
            population: PerRole::new(0, 5),
            ..Config::default()
        };
        assert_eq!(Some(Role::Writer), c.stall_risk());

        // 4 batches of writers, 2 of readers: after the 3rd writers' batch the turn stays with the finished readers
        let c = Config {
            ops: PerRole::new(4, 2),
            ..Config::default()
        };
        assert_eq!(Some(Role::Reader), c.stall_risk());

        // writers only: the turn goes to the readers once and stays there, nobody minds
        let c = Config {
            population: PerRole::new(3, 0),
            ops: PerRole::new(1, 0),
            ..Config::default()
        };
        assert_eq!(None, c.stall_risk());
    }
}
